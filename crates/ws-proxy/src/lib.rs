//! WebSocket reverse proxy with per-message interception.
//!
//! This crate implements the host relay that sits between clients (the
//! "source") and a backend WebSocket server (the "target"). Every data frame
//! flowing through the proxy is handed to a chain of [`MessageInterceptor`]
//! implementations before it is forwarded, allowing an external detector to
//! veto it.
//!
//! # Architecture
//!
//! ```text
//! Client  <--WS-->  ws-proxy  <--WS-->  Backend
//!                     |
//!              [Interceptors]
//!                     |
//!               [Audit Sink]
//! ```
//!
//! Each leg's write half is owned by a writer task fed through a
//! [`LegHandle`]; forwarded frames and rejection notices share that queue.
//! Two relay tasks (client-to-backend and backend-to-client) each process
//! frames strictly one at a time, so a slow interceptor can delay but never
//! reorder a direction. Ping and pong frames bypass the interceptors.

pub mod listener;
pub mod relay;

// Re-export the primary public types at the crate root for convenience.
pub use listener::{Proxy, ProxyConfig};
pub use relay::{ConnectionContext, LegClosed, LegHandle, MessageInterceptor};
