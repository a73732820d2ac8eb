use serde::{Deserialize, Serialize};

/// One line of the firewall's audit trail.
///
/// `details` carries event-specific fields such as message length or the
/// detector error. Entries about a single intercepted message also carry a
/// [`DecisionRecord`]. Message text is never recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: uuid::Uuid,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub event_type: AuditEventType,
    pub source: AuditSource,
    pub details: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<DecisionRecord>,
}

impl AuditEntry {
    /// Stamp an event with a fresh id and the current UTC time.
    pub fn new(
        event_type: AuditEventType,
        source: AuditSource,
        details: serde_json::Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            event_type,
            source,
            details,
            decision: None,
        }
    }

    /// Attach an interception decision, builder-style.
    pub fn with_decision(mut self, decision: DecisionRecord) -> Self {
        self.decision = Some(decision);
        self
    }
}

/// What happened. Serialized in snake_case as the `event_type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    ProcessStarted,
    ProcessStopped,
    /// A client completed the WebSocket handshake with the proxy.
    ConnectionOpened,
    ConnectionClosed,
    /// The backend could not be reached for a new client.
    UpstreamConnectFailed,
    /// A deny rule matched and the message was not forwarded.
    MessageDenied,
    /// The detector failed; the decision records whether the message was
    /// forwarded unchecked or dropped.
    DetectorUnavailable,
    /// Only non-blocking rules matched; the message was forwarded.
    WarningRulesTriggered,
}

/// Which part of the firewall recorded the event: `ws-proxy`,
/// `firewall-interceptor` or `ws-firewall`. Connection events also name the
/// client address and the proxied connection id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditSource {
    pub component: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_addr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl AuditSource {
    /// Source with no connection attached, for process-level events.
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            remote_addr: None,
            session_id: None,
        }
    }
}

/// Outcome of intercepting one message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    /// `forwarded`, `denied`, `failed_open` or `failed_closed`.
    pub outcome: String,
    /// `inbound` or `outbound`.
    pub direction: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    pub reason: String,
}
