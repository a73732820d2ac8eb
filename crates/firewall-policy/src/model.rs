//! Wire types exchanged with the detector.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Direction of travel of a relayed message.
///
/// Selects the request field the detector sees and the connection leg that
/// receives a rejection notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Source (client) -> target (backend).
    Inbound,
    /// Target (backend) -> source (client).
    Outbound,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of a detection call.
///
/// The detector tells traffic direction apart by field name only:
/// `llmInput` for inbound text, `llmOutput` for outbound text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionRequest {
    #[serde(rename = "clientRequestId")]
    pub client_request_id: uuid::Uuid,
    #[serde(flatten)]
    pub text: DirectedText,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum DirectedText {
    #[serde(rename = "llmInput")]
    Input(String),
    #[serde(rename = "llmOutput")]
    Output(String),
}

impl DetectionRequest {
    /// Build a request with a freshly generated id.
    pub fn new(message: impl Into<String>, direction: Direction) -> Self {
        let message = message.into();
        let text = match direction {
            Direction::Inbound => DirectedText::Input(message),
            Direction::Outbound => DirectedText::Output(message),
        };
        Self {
            client_request_id: uuid::Uuid::new_v4(),
            text,
        }
    }

    pub fn direction(&self) -> Direction {
        match self.text {
            DirectedText::Input(_) => Direction::Inbound,
            DirectedText::Output(_) => Direction::Outbound,
        }
    }
}

/// Action a detector rule asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    Deny,
    Warn,
    Alert,
    /// Any action string this build does not know. Never treated as a denial.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleDetails {
    #[serde(default)]
    pub masked_input: Option<String>,
}

/// A single rule the detector reports as triggered. Detector-issued and
/// never modified locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggeredRule {
    pub rule_id: String,
    #[serde(default, rename = "version")]
    pub rule_version: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub message: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub risk_score: f64,
    #[serde(default)]
    pub details: RuleDetails,
    pub action: RuleAction,
    #[serde(default)]
    pub selector: Option<String>,
}

impl TriggeredRule {
    pub fn is_deny(&self) -> bool {
        self.action == RuleAction::Deny
    }
}

/// Parsed body of a successful detection call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResult {
    #[serde(default)]
    pub overall_risk_score: f64,
    /// Triggered rules in detector order. The order is significant: the
    /// first denying rule provides the rejection notice.
    pub rules_triggered: Vec<TriggeredRule>,
    #[serde(default, rename = "userApplicationId")]
    pub subject_application_id: Option<String>,
    #[serde(default)]
    pub client_request_id: Option<String>,
}
