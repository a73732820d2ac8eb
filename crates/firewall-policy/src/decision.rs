use crate::model::{DetectionResult, TriggeredRule};

/// Prefix of every denial notice pushed to a peer.
pub const DENIAL_PREFIX: &str = "AI Firewall has denied forwarding this message. ";

/// The allow/deny outcome for one detection result.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    /// `true` iff no triggered rule asked for denial.
    pub forward: bool,
    /// Rejection text for the peer; present iff `forward` is `false`.
    pub notice: Option<String>,
    /// Id of the rule that produced the notice.
    pub rule_id: Option<String>,
    /// Ids of triggered rules whose action is not `deny`, in detector order.
    pub warnings: Vec<String>,
}

impl Decision {
    pub fn is_denied(&self) -> bool {
        !self.forward
    }
}

/// Evaluate the detector's triggered rules.
///
/// The first denying rule in detector order wins, regardless of risk score.
/// Pure: no I/O and no state carried between calls.
pub fn decide(result: &DetectionResult) -> Decision {
    let warnings = result
        .rules_triggered
        .iter()
        .filter(|rule| !rule.is_deny())
        .map(|rule| rule.rule_id.clone())
        .collect();

    match result.rules_triggered.iter().find(|rule| rule.is_deny()) {
        Some(rule) => Decision {
            forward: false,
            notice: Some(denial_notice(rule)),
            rule_id: Some(rule.rule_id.clone()),
            warnings,
        },
        None => Decision {
            forward: true,
            notice: None,
            rule_id: None,
            warnings,
        },
    }
}

fn denial_notice(rule: &TriggeredRule) -> String {
    format!("{DENIAL_PREFIX}{} (Rule: {})", rule.message, rule.rule_id)
}
