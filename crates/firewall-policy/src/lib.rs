//! # firewall-policy
//!
//! Interception-and-decision pipeline for messages relayed over a proxied
//! WebSocket session. Every message is submitted to an external
//! content-safety detector before it is allowed to reach its destination.
//!
//! The crate is organised leaf-first:
//!
//! 1. **[`normalize`]** -- coerces a text, binary, or structured [`Payload`]
//!    into the string form the detector accepts.
//! 2. **[`client`]** -- builds a directional detection request, performs a
//!    single timeout-bounded HTTPS call, and parses the [`DetectionResult`].
//! 3. **[`decision`]** -- turns the detector's triggered rules into an
//!    allow/deny [`Decision`].
//! 4. **[`policy`]** -- composes the three, pushes denial notices onto the
//!    right connection [`Leg`], and fails open when the detector is down.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use firewall_policy::{DetectionClient, DetectorConfig, InterceptionPolicy};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DetectorConfig::from_env()?;
//! let client = DetectionClient::new(config)?;
//! let policy = InterceptionPolicy::new(Arc::new(client));
//! # let _ = policy;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod decision;
mod error;
pub mod model;
pub mod normalize;
pub mod policy;

// Re-export primary public API at crate root.
pub use client::{DetectionClient, Detector};
pub use config::{DetectorConfig, FailureMode};
pub use decision::{decide, Decision, DENIAL_PREFIX};
pub use error::{ConfigError, DetectorUnavailable};
pub use model::{
    DetectionRequest, DetectionResult, Direction, RuleAction, RuleDetails, TriggeredRule,
};
pub use normalize::{normalize, Payload};
pub use policy::{Interception, InterceptionPolicy, Leg, LegClosed, UNAVAILABLE_NOTICE};
