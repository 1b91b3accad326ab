//! Approval gate: decide whether a classified task may run without a human.

use serde::{Deserialize, Serialize};

use crate::core::types::RiskLevel;

/// Policy knobs for the gate, loaded from `[approval]` in `taskloop.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalPolicy {
    /// Allow medium-risk tasks from trusted sources to run unattended.
    pub auto_approve_medium: bool,
    /// Sources whose medium-risk tasks may be auto-approved.
    pub trusted_sources: Vec<String>,
    /// Minimum confidence for a low-risk task to be auto-approved.
    pub min_low_confidence: f64,
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        Self {
            auto_approve_medium: false,
            trusted_sources: vec![
                "internal".to_string(),
                "system".to_string(),
                "scheduled".to_string(),
            ],
            min_low_confidence: 0.7,
        }
    }
}

impl ApprovalPolicy {
    pub fn is_trusted(&self, source: &str) -> bool {
        let source = source.trim();
        self.trusted_sources
            .iter()
            .any(|s| s.trim().eq_ignore_ascii_case(source))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    AutoApproved,
    RequiresHuman,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GateDecision {
    pub verdict: Verdict,
    pub reason: String,
}

impl GateDecision {
    fn auto(reason: String) -> Self {
        Self {
            verdict: Verdict::AutoApproved,
            reason,
        }
    }

    fn human(reason: String) -> Self {
        Self {
            verdict: Verdict::RequiresHuman,
            reason,
        }
    }

    pub fn is_auto_approved(&self) -> bool {
        self.verdict == Verdict::AutoApproved
    }
}

/// Decide auto-approval from risk, confidence and source.
///
/// High risk always requires a human, whatever the confidence or source.
pub fn decide(
    risk: RiskLevel,
    confidence: f64,
    source: &str,
    policy: &ApprovalPolicy,
) -> GateDecision {
    match risk {
        RiskLevel::High => GateDecision::human("high risk always requires human approval".into()),
        RiskLevel::Low if confidence >= policy.min_low_confidence => GateDecision::auto(format!(
            "low risk with confidence {confidence:.2} >= {:.2}",
            policy.min_low_confidence
        )),
        RiskLevel::Low => GateDecision::human(format!(
            "low risk but confidence {confidence:.2} < {:.2}",
            policy.min_low_confidence
        )),
        RiskLevel::Medium if !policy.auto_approve_medium => {
            GateDecision::human("medium risk and medium auto-approval is disabled".into())
        }
        RiskLevel::Medium if policy.is_trusted(source) => {
            GateDecision::auto(format!("medium risk from trusted source '{source}'"))
        }
        RiskLevel::Medium => {
            GateDecision::human(format!("medium risk from untrusted source '{source}'"))
        }
    }
}
