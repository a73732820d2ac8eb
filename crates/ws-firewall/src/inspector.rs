//! Glue between the relay's [`MessageInterceptor`] hook and the detector
//! policy.

use std::sync::Arc;

use async_trait::async_trait;
use audit_log::{AuditEntry, AuditEventType, AuditSink, AuditSource, DecisionRecord};
use firewall_policy::{Direction, Interception, InterceptionPolicy, Leg, LegClosed, Payload};
use tokio_tungstenite::tungstenite::Message;
use ws_proxy::{ConnectionContext, LegHandle, MessageInterceptor};

/// Wraps the [`InterceptionPolicy`] as a [`MessageInterceptor`] and records
/// every non-trivial outcome in the audit log.
pub struct FirewallInterceptor {
    policy: Arc<InterceptionPolicy>,
    audit: AuditSink,
}

impl FirewallInterceptor {
    pub fn new(policy: Arc<InterceptionPolicy>, audit: AuditSink) -> Self {
        Self { policy, audit }
    }

    async fn handle(
        &self,
        msg: Message,
        direction: Direction,
        target: &LegHandle,
        source: &LegHandle,
        ctx: &ConnectionContext,
    ) -> Option<Message> {
        let payload = match to_payload(msg) {
            Ok(payload) => payload,
            // Control frames are relayed untouched.
            Err(msg) => return Some(msg),
        };
        let size = payload.len();

        let outcome = self
            .policy
            .intercept(payload, direction, &ProxyLeg(target), &ProxyLeg(source))
            .await;

        self.record(&outcome, direction, size, ctx);
        outcome.into_forwarded().map(to_message)
    }

    fn record(
        &self,
        outcome: &Interception,
        direction: Direction,
        size: usize,
        ctx: &ConnectionContext,
    ) {
        let (event_type, decision) = match outcome {
            Interception::Forwarded { warnings, .. } if warnings.is_empty() => return,
            Interception::Forwarded { warnings, .. } => (
                AuditEventType::WarningRulesTriggered,
                DecisionRecord {
                    outcome: "forwarded".to_string(),
                    direction: direction.to_string(),
                    rule_id: None,
                    reason: warnings.join(", "),
                },
            ),
            Interception::Denied {
                notice, rule_id, ..
            } => (
                AuditEventType::MessageDenied,
                DecisionRecord {
                    outcome: "denied".to_string(),
                    direction: direction.to_string(),
                    rule_id: Some(rule_id.clone()),
                    reason: notice.clone(),
                },
            ),
            Interception::FailedOpen { error, .. } => (
                AuditEventType::DetectorUnavailable,
                DecisionRecord {
                    outcome: "failed_open".to_string(),
                    direction: direction.to_string(),
                    rule_id: None,
                    reason: error.clone(),
                },
            ),
            Interception::FailedClosed { error, .. } => (
                AuditEventType::DetectorUnavailable,
                DecisionRecord {
                    outcome: "failed_closed".to_string(),
                    direction: direction.to_string(),
                    rule_id: None,
                    reason: error.clone(),
                },
            ),
        };

        let source = AuditSource {
            component: "firewall-interceptor".to_string(),
            remote_addr: Some(ctx.remote_addr.to_string()),
            session_id: Some(ctx.connection_id.to_string()),
        };
        let entry = AuditEntry::new(event_type, source, serde_json::json!({ "size": size }))
            .with_decision(decision);
        self.audit.try_log(entry);
    }
}

#[async_trait]
impl MessageInterceptor for FirewallInterceptor {
    async fn on_inbound(
        &self,
        msg: Message,
        target: &LegHandle,
        source: &LegHandle,
        ctx: &ConnectionContext,
    ) -> Option<Message> {
        self.handle(msg, Direction::Inbound, target, source, ctx)
            .await
    }

    async fn on_outbound(
        &self,
        msg: Message,
        target: &LegHandle,
        source: &LegHandle,
        ctx: &ConnectionContext,
    ) -> Option<Message> {
        self.handle(msg, Direction::Outbound, target, source, ctx)
            .await
    }
}

/// A relay leg seen through the policy's [`Leg`] interface.
struct ProxyLeg<'a>(&'a LegHandle);

#[async_trait]
impl Leg for ProxyLeg<'_> {
    async fn send_notice(&self, notice: String) -> Result<(), LegClosed> {
        self.0.send_text(notice).await.map_err(|_| LegClosed)
    }
}

/// Data frames become payloads; anything else is handed back.
fn to_payload(msg: Message) -> Result<Payload, Message> {
    match msg {
        Message::Text(text) => Ok(Payload::Text(text.to_string())),
        Message::Binary(bytes) => Ok(Payload::Binary(bytes.to_vec())),
        other => Err(other),
    }
}

fn to_message(payload: Payload) -> Message {
    match payload {
        Payload::Text(text) => Message::Text(text.into()),
        Payload::Binary(bytes) => Message::Binary(bytes.into()),
        Payload::Other(value) => Message::Text(value.to_string().into()),
    }
}
