//! Per-message interception: normalize, detect, decide, then forward or
//! suppress.
//!
//! A relay event moves through `Start -> Normalized -> Detected -> Decided`
//! and ends either forwarded or suppressed. A detector failure jumps straight
//! to the end: forwarded unchanged under [`FailureMode::Open`], suppressed
//! with [`UNAVAILABLE_NOTICE`] under [`FailureMode::Closed`].

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::client::Detector;
use crate::config::{DetectorConfig, FailureMode};
use crate::decision::decide;
use crate::model::Direction;
use crate::normalize::{normalize, Payload};

/// Notice sent instead of a denial when the detector is unreachable and the
/// policy fails closed.
pub const UNAVAILABLE_NOTICE: &str =
    "AI Firewall could not check this message, so it was not forwarded.";

#[derive(Debug, Error)]
#[error("connection leg is closed")]
pub struct LegClosed;

/// One side (source or target) of a relayed connection, as far as the
/// policy is concerned: something a notice can be pushed onto.
#[async_trait]
pub trait Leg: Send + Sync {
    async fn send_notice(&self, notice: String) -> Result<(), LegClosed>;
}

/// How a single relay event ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Interception {
    /// No rule denied the message. `warnings` lists non-deny rule ids.
    Forwarded {
        payload: Payload,
        warnings: Vec<String>,
    },
    /// The detector failed and the message went through unchecked.
    FailedOpen { payload: Payload, error: String },
    /// A rule denied the message. `delivered` is `false` when the notice
    /// could not be written because the leg had already closed.
    Denied {
        notice: String,
        rule_id: String,
        delivered: bool,
    },
    /// The detector failed and the message was held back.
    FailedClosed { error: String, delivered: bool },
}

impl Interception {
    /// The payload to hand back to the relay, or `None` for "drop".
    pub fn into_forwarded(self) -> Option<Payload> {
        match self {
            Interception::Forwarded { payload, .. } | Interception::FailedOpen { payload, .. } => {
                Some(payload)
            }
            Interception::Denied { .. } | Interception::FailedClosed { .. } => None,
        }
    }

    pub fn is_forwarded(&self) -> bool {
        matches!(
            self,
            Interception::Forwarded { .. } | Interception::FailedOpen { .. }
        )
    }
}

/// Detector-backed allow/deny policy for both directions of a connection.
///
/// Holds no per-message state; the same instance may serve any number of
/// connections and both directions concurrently. Ordering within one
/// direction is the caller's job: invocations for the same direction of the
/// same connection must not overlap.
pub struct InterceptionPolicy {
    detector: Arc<dyn Detector>,
    failure_mode: FailureMode,
    surface_warnings: bool,
}

impl InterceptionPolicy {
    /// Fail-open policy that keeps non-deny rules at debug level.
    pub fn new(detector: Arc<dyn Detector>) -> Self {
        Self {
            detector,
            failure_mode: FailureMode::Open,
            surface_warnings: false,
        }
    }

    /// Policy using the failure handling settings from `config`.
    pub fn from_config(detector: Arc<dyn Detector>, config: &DetectorConfig) -> Self {
        Self::new(detector)
            .with_failure_mode(config.failure_mode)
            .with_surface_warnings(config.surface_warnings)
    }

    pub fn with_failure_mode(mut self, mode: FailureMode) -> Self {
        self.failure_mode = mode;
        self
    }

    pub fn with_surface_warnings(mut self, surface: bool) -> Self {
        self.surface_warnings = surface;
        self
    }

    pub fn failure_mode(&self) -> FailureMode {
        self.failure_mode
    }

    /// Hook for a frame travelling source -> target.
    ///
    /// Returns the payload to forward to `target`, or `None` after a notice
    /// has been pushed back to `source`.
    pub async fn on_inbound_message(
        &self,
        payload: Payload,
        target: &dyn Leg,
        source: &dyn Leg,
    ) -> Option<Payload> {
        self.intercept(payload, Direction::Inbound, target, source)
            .await
            .into_forwarded()
    }

    /// Hook for a frame travelling target -> source.
    ///
    /// Returns the payload to forward to `source`, or `None` after a notice
    /// has been pushed to `target`.
    pub async fn on_outbound_message(
        &self,
        payload: Payload,
        target: &dyn Leg,
        source: &dyn Leg,
    ) -> Option<Payload> {
        self.intercept(payload, Direction::Outbound, target, source)
            .await
            .into_forwarded()
    }

    /// Run one relay event to completion and report how it ended.
    pub async fn intercept(
        &self,
        payload: Payload,
        direction: Direction,
        target: &dyn Leg,
        source: &dyn Leg,
    ) -> Interception {
        let result = {
            let text = normalize(&payload);
            self.detector.detect(&text, direction).await
        };

        let result = match result {
            Ok(result) => result,
            Err(err) => {
                return self
                    .on_detector_failure(payload, direction, target, source, err.to_string())
                    .await
            }
        };

        let decision = decide(&result);
        if decision.forward {
            if !decision.warnings.is_empty() {
                if self.surface_warnings {
                    warn!(
                        phase = %direction,
                        rules = ?decision.warnings,
                        "AI Firewall raised non-blocking rules"
                    );
                } else {
                    debug!(phase = %direction, rules = ?decision.warnings, "ignoring non-deny rules");
                }
            }
            return Interception::Forwarded {
                payload,
                warnings: decision.warnings,
            };
        }

        // `decide` always pairs a denial with a notice and rule id.
        let notice = decision.notice.unwrap_or_default();
        let rule_id = decision.rule_id.unwrap_or_default();
        warn!(phase = %direction, %rule_id, "AI Firewall has denied the message");

        let leg = notice_leg(direction, target, source);
        let delivered = deliver_notice(leg, &notice, direction).await;
        Interception::Denied {
            notice,
            rule_id,
            delivered,
        }
    }

    async fn on_detector_failure(
        &self,
        payload: Payload,
        direction: Direction,
        target: &dyn Leg,
        source: &dyn Leg,
        error: String,
    ) -> Interception {
        match self.failure_mode {
            FailureMode::Open => {
                error!(
                    phase = %direction,
                    %error,
                    payload_kind = payload.kind(),
                    "AI Firewall detection failed; forwarding message unchecked"
                );
                Interception::FailedOpen { payload, error }
            }
            FailureMode::Closed => {
                error!(
                    phase = %direction,
                    %error,
                    payload_kind = payload.kind(),
                    "AI Firewall detection failed; holding message back"
                );
                let delivered = deliver_notice(
                    notice_leg(direction, target, source),
                    UNAVAILABLE_NOTICE,
                    direction,
                )
                .await;
                Interception::FailedClosed { error, delivered }
            }
        }
    }
}

/// Leg that sees a rejection: the sender of the suppressed message.
fn notice_leg<'a>(
    direction: Direction,
    target: &'a dyn Leg,
    source: &'a dyn Leg,
) -> &'a dyn Leg {
    match direction {
        Direction::Inbound => source,
        Direction::Outbound => target,
    }
}

async fn deliver_notice(leg: &dyn Leg, notice: &str, direction: Direction) -> bool {
    match leg.send_notice(notice.to_string()).await {
        Ok(()) => true,
        Err(err) => {
            debug!(phase = %direction, %err, "notice not delivered");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use tracing::{Event, Level, Subscriber};
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::client::DetectionClient;
    use crate::error::DetectorUnavailable;
    use crate::model::DetectionResult;

    // -- Test doubles ---------------------------------------------------------

    type Script = Box<dyn Fn() -> Result<DetectionResult, DetectorUnavailable> + Send + Sync>;

    struct ScriptedDetector {
        script: Script,
        seen: Mutex<Vec<(String, Direction)>>,
    }

    impl ScriptedDetector {
        fn new(script: Script) -> Arc<Self> {
            Arc::new(Self {
                script,
                seen: Mutex::new(Vec::new()),
            })
        }

        fn returning(body: serde_json::Value) -> Arc<Self> {
            Self::new(Box::new(move || Ok(serde_json::from_value(body.clone()).unwrap())))
        }

        fn failing() -> Arc<Self> {
            Self::new(Box::new(|| {
                Err(DetectorUnavailable::Status {
                    status: reqwest::StatusCode::INTERNAL_SERVER_ERROR,
                    body: "down".to_string(),
                })
            }))
        }

        fn seen(&self) -> Vec<(String, Direction)> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Detector for ScriptedDetector {
        async fn detect(
            &self,
            message: &str,
            direction: Direction,
        ) -> Result<DetectionResult, DetectorUnavailable> {
            self.seen
                .lock()
                .unwrap()
                .push((message.to_string(), direction));
            (self.script)()
        }
    }

    #[derive(Default)]
    struct RecordingLeg {
        notices: Mutex<Vec<String>>,
        closed: bool,
    }

    impl RecordingLeg {
        fn closed() -> Self {
            Self {
                notices: Mutex::new(Vec::new()),
                closed: true,
            }
        }

        fn notices(&self) -> Vec<String> {
            self.notices.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Leg for RecordingLeg {
        async fn send_notice(&self, notice: String) -> Result<(), LegClosed> {
            if self.closed {
                return Err(LegClosed);
            }
            self.notices.lock().unwrap().push(notice);
            Ok(())
        }
    }

    /// Counts error-level events emitted by this crate.
    struct ErrorCounter(Arc<AtomicUsize>);

    impl<S: Subscriber> Layer<S> for ErrorCounter {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            let meta = event.metadata();
            if *meta.level() == Level::ERROR && meta.target().starts_with("firewall_policy") {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn ssn_denial() -> serde_json::Value {
        serde_json::json!({
            "overallRiskScore": 90,
            "rulesTriggered": [
                {"ruleId": "pii-ssn", "action": "deny", "message": "SSN detected"}
            ]
        })
    }

    fn clean() -> serde_json::Value {
        serde_json::json!({"overallRiskScore": 0, "rulesTriggered": []})
    }

    // -- Decided -> Forwarded / Suppressed ------------------------------------

    #[tokio::test]
    async fn clean_inbound_message_is_forwarded_unchanged() {
        let detector = ScriptedDetector::returning(clean());
        let policy = InterceptionPolicy::new(detector.clone());
        let (target, source) = (RecordingLeg::default(), RecordingLeg::default());

        let out = policy
            .on_inbound_message(Payload::from("hello"), &target, &source)
            .await;

        assert_eq!(out, Some(Payload::from("hello")));
        assert!(target.notices().is_empty());
        assert!(source.notices().is_empty());
        assert_eq!(detector.seen(), vec![("hello".to_string(), Direction::Inbound)]);
    }

    #[tokio::test]
    async fn inbound_denial_notifies_source_and_drops() {
        let policy = InterceptionPolicy::new(ScriptedDetector::returning(ssn_denial()));
        let (target, source) = (RecordingLeg::default(), RecordingLeg::default());

        let out = policy
            .on_inbound_message(Payload::from("532-90-8976"), &target, &source)
            .await;

        assert!(out.is_none());
        assert!(target.notices().is_empty());
        let notices = source.notices();
        assert_eq!(notices.len(), 1);
        assert!(notices[0].ends_with("SSN detected (Rule: pii-ssn)"));
    }

    #[tokio::test]
    async fn outbound_denial_notifies_target_and_drops() {
        let detector = ScriptedDetector::returning(ssn_denial());
        let policy = InterceptionPolicy::new(detector.clone());
        let (target, source) = (RecordingLeg::default(), RecordingLeg::default());

        let out = policy
            .on_outbound_message(Payload::from("your SSN is 532-90-8976"), &target, &source)
            .await;

        assert!(out.is_none());
        assert!(source.notices().is_empty());
        assert_eq!(target.notices().len(), 1);
        assert_eq!(detector.seen()[0].1, Direction::Outbound);
    }

    #[tokio::test]
    async fn warn_rules_do_not_block() {
        let policy = InterceptionPolicy::new(ScriptedDetector::returning(serde_json::json!({
            "rulesTriggered": [{"ruleId": "tone", "action": "warn", "message": "rude"}]
        })))
        .with_surface_warnings(true);
        let (target, source) = (RecordingLeg::default(), RecordingLeg::default());

        let outcome = policy
            .intercept(Payload::from("meh"), Direction::Inbound, &target, &source)
            .await;

        assert_eq!(
            outcome,
            Interception::Forwarded {
                payload: Payload::from("meh"),
                warnings: vec!["tone".to_string()],
            }
        );
    }

    #[tokio::test]
    async fn denial_on_closed_leg_still_drops() {
        let policy = InterceptionPolicy::new(ScriptedDetector::returning(ssn_denial()));
        let (target, source) = (RecordingLeg::default(), RecordingLeg::closed());

        let outcome = policy
            .intercept(Payload::from("x"), Direction::Inbound, &target, &source)
            .await;

        match outcome {
            Interception::Denied {
                rule_id, delivered, ..
            } => {
                assert_eq!(rule_id, "pii-ssn");
                assert!(!delivered);
            }
            other => panic!("expected Denied, got {other:?}"),
        }
        assert!(target.notices().is_empty());
    }

    #[tokio::test]
    async fn binary_payload_is_submitted_as_text_and_returned_as_bytes() {
        let detector = ScriptedDetector::returning(clean());
        let policy = InterceptionPolicy::new(detector.clone());
        let (target, source) = (RecordingLeg::default(), RecordingLeg::default());

        let out = policy
            .on_inbound_message(Payload::Binary(vec![0xC3, 0x28]), &target, &source)
            .await;

        assert_eq!(out, Some(Payload::Binary(vec![0xC3, 0x28])));
        assert_eq!(detector.seen()[0].0, "\u{FFFD}(");
    }

    // -- Fail-open / fail-closed ----------------------------------------------

    #[tokio::test]
    async fn detector_failure_fails_open_with_one_error_record() {
        let errors = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry().with(ErrorCounter(errors.clone()));
        let _guard = tracing::subscriber::set_default(subscriber);

        let policy = InterceptionPolicy::new(ScriptedDetector::failing());
        let (target, source) = (RecordingLeg::default(), RecordingLeg::default());

        let out = policy
            .on_inbound_message(Payload::from("hello"), &target, &source)
            .await;

        assert_eq!(out, Some(Payload::from("hello")));
        assert!(source.notices().is_empty());
        assert!(target.notices().is_empty());
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fail_closed_notifies_sender() {
        let policy = InterceptionPolicy::new(ScriptedDetector::failing())
            .with_failure_mode(FailureMode::Closed);
        let (target, source) = (RecordingLeg::default(), RecordingLeg::default());

        let out = policy
            .on_outbound_message(Payload::from("reply"), &target, &source)
            .await;

        assert!(out.is_none());
        assert_eq!(target.notices(), vec![UNAVAILABLE_NOTICE.to_string()]);
        assert!(source.notices().is_empty());
    }

    #[tokio::test]
    async fn from_config_applies_failure_mode() {
        let config = DetectorConfig::new("1129", "k").with_failure_mode(FailureMode::Closed);
        let policy = InterceptionPolicy::from_config(ScriptedDetector::failing(), &config);
        assert_eq!(policy.failure_mode(), FailureMode::Closed);

        let (target, source) = (RecordingLeg::default(), RecordingLeg::default());
        let out = policy
            .on_inbound_message(Payload::from("hello"), &target, &source)
            .await;
        assert!(out.is_none());
        assert_eq!(source.notices(), vec![UNAVAILABLE_NOTICE.to_string()]);
    }

    async fn fail_open_against(template: ResponseTemplate) {
        let errors = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry().with(ErrorCounter(errors.clone()));
        let _guard = tracing::subscriber::set_default(subscriber);

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(template)
            .expect(1)
            .mount(&server)
            .await;

        let config = DetectorConfig::new("1129", "k")
            .with_base_url(server.uri())
            .with_timeout(Duration::from_millis(300));
        let client = DetectionClient::new(config.clone()).unwrap();
        let policy = InterceptionPolicy::from_config(Arc::new(client), &config);
        let (target, source) = (RecordingLeg::default(), RecordingLeg::default());

        let outcome = policy
            .intercept(Payload::from("hello"), Direction::Inbound, &target, &source)
            .await;

        assert!(matches!(outcome, Interception::FailedOpen { .. }), "{outcome:?}");
        assert_eq!(outcome.into_forwarded(), Some(Payload::from("hello")));
        assert!(source.notices().is_empty());
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn http_500_fails_open() {
        fail_open_against(ResponseTemplate::new(500)).await;
    }

    #[tokio::test]
    async fn malformed_json_fails_open() {
        fail_open_against(ResponseTemplate::new(200).set_body_string("not json")).await;
    }

    #[tokio::test]
    async fn timeout_fails_open() {
        fail_open_against(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"rulesTriggered": []}))
                .set_delay(Duration::from_secs(2)),
        )
        .await;
    }

    #[test]
    fn into_forwarded_maps_outcomes() {
        let denied = Interception::Denied {
            notice: "n".into(),
            rule_id: "r".into(),
            delivered: true,
        };
        assert!(!denied.is_forwarded());
        assert!(denied.into_forwarded().is_none());

        let open = Interception::FailedOpen {
            payload: Payload::from("p"),
            error: "e".into(),
        };
        assert!(open.is_forwarded());
    }
}
