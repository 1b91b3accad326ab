//! Risk classification for incoming tasks.
//!
//! Classification is a pure function over the task id, its content and a few
//! metadata fields. Keyword tables are data; the priority order is
//! high > medium > low > default medium. An explicit `risk_level` skips the
//! keyword scan, and communication tasks are never rated below high.

use serde::Serialize;

use crate::core::keywords::{matches, matches_stems, words};
use crate::core::types::RiskLevel;

pub const HIGH_RISK_KEYWORDS: &[&str] = &[
    "delete",
    "deploy",
    "production",
    "billing",
    "payment",
    "purchase",
    "cloud",
    "database",
    "drop",
    "remove",
    "terminate",
    "cancel",
    "truncate",
    "shutdown",
    "shut",
];

pub const MEDIUM_RISK_KEYWORDS: &[&str] = &[
    "update", "modify", "push", "send", "email", "post", "publish", "edit", "change", "alter",
    "write", "upload",
];

pub const LOW_RISK_KEYWORDS: &[&str] = &[
    "read", "fetch", "query", "search", "get", "view", "list", "show", "display", "check",
    "verify", "test",
];

/// `type` values that publish something outside the vault.
pub const COMMUNICATION_TYPES: &[&str] = &[
    "email",
    "post",
    "social",
    "linkedin",
    "facebook",
    "instagram",
    "twitter",
    "whatsapp",
];

/// File name prefixes written by communication watchers.
pub const COMMUNICATION_PREFIXES: &[&str] = &[
    "EMAIL_",
    "SOCIAL_",
    "LINKEDIN_",
    "FACEBOOK_",
    "INSTAGRAM_",
    "TWITTER_",
    "WHATSAPP_",
];

pub const READ_ONLY_TYPES: &[&str] = &["read", "query", "fetch", "search"];

const EXPLICIT_CONFIDENCE: f64 = 1.0;
const COMMUNICATION_CONFIDENCE: f64 = 0.8;
const HIGH_CONFIDENCE: f64 = 0.9;
const MEDIUM_STRONG_CONFIDENCE: f64 = 0.7;
const MEDIUM_WEAK_CONFIDENCE: f64 = 0.6;
const LOW_CONFIDENCE: f64 = 0.8;
const READ_ONLY_CONFIDENCE: f64 = 0.7;
const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Closed classification of what a task is, derived from its id and `type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Sends or publishes something (email, social post, message).
    Communication,
    /// Declared read-only work (query, fetch, search).
    ReadOnly,
    General,
}

/// Determine the task kind from its file name and `type` metadata.
pub fn task_kind(task_id: &str, task_type: Option<&str>) -> TaskKind {
    let task_type = task_type.map(|t| t.trim().to_ascii_lowercase());
    if let Some(t) = task_type.as_deref()
        && COMMUNICATION_TYPES.contains(&t)
    {
        return TaskKind::Communication;
    }
    let upper = task_id.to_ascii_uppercase();
    if COMMUNICATION_PREFIXES.iter().any(|p| upper.starts_with(p)) {
        return TaskKind::Communication;
    }
    if let Some(t) = task_type.as_deref()
        && READ_ONLY_TYPES.contains(&t)
    {
        return TaskKind::ReadOnly;
    }
    TaskKind::General
}

/// Input to [`classify`].
#[derive(Debug, Clone, Copy)]
pub struct RiskInput<'a> {
    pub task_id: &'a str,
    /// Title and body text.
    pub content: &'a str,
    /// Raw `risk_level` metadata value, if any.
    pub explicit_risk: Option<&'a str>,
    /// Raw `type` metadata value, if any.
    pub task_type: Option<&'a str>,
}

/// Classifier result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub risk: RiskLevel,
    pub confidence: f64,
    pub kind: TaskKind,
    pub reasons: Vec<String>,
}

impl Classification {
    fn new(risk: RiskLevel, confidence: f64, kind: TaskKind, reason: String) -> Self {
        Self {
            risk,
            confidence,
            kind,
            reasons: vec![reason],
        }
    }

    /// Confidence formatted the way it is stored in metadata.
    pub fn confidence_label(&self) -> String {
        format!("{:.2}", self.confidence)
    }
}

pub fn classify(input: &RiskInput<'_>) -> Classification {
    let kind = task_kind(input.task_id, input.task_type);
    let mut result = classify_content(input, kind);
    if kind == TaskKind::Communication && result.risk != RiskLevel::High {
        result.reasons.push(format!(
            "communication task forced to high (was {})",
            result.risk
        ));
        result.risk = RiskLevel::High;
        result.confidence = COMMUNICATION_CONFIDENCE;
    }
    result
}

fn classify_content(input: &RiskInput<'_>, kind: TaskKind) -> Classification {
    let mut ignored = None;
    if let Some(raw) = input.explicit_risk.filter(|r| !r.trim().is_empty()) {
        match raw.parse::<RiskLevel>() {
            Ok(risk) => {
                return Classification::new(
                    risk,
                    EXPLICIT_CONFIDENCE,
                    kind,
                    format!("explicit risk_level {risk}"),
                );
            }
            Err(_) => ignored = Some(format!("ignored unknown risk_level '{}'", raw.trim())),
        }
    }

    let words = words(input.content);
    let mut result = scan_keywords(&words, kind);
    if let Some(note) = ignored {
        result.reasons.insert(0, note);
    }
    result
}

fn scan_keywords(words: &[String], kind: TaskKind) -> Classification {
    // High-risk words match by stem so no inflection slips through to a lower tier.
    let high = matches_stems(words, HIGH_RISK_KEYWORDS);
    if !high.is_empty() {
        return Classification::new(
            RiskLevel::High,
            HIGH_CONFIDENCE,
            kind,
            format!("high-risk keywords: {}", high.join(", ")),
        );
    }

    let medium = matches(words, MEDIUM_RISK_KEYWORDS);
    if !medium.is_empty() {
        let confidence = if medium.len() > 2 {
            MEDIUM_STRONG_CONFIDENCE
        } else {
            MEDIUM_WEAK_CONFIDENCE
        };
        return Classification::new(
            RiskLevel::Medium,
            confidence,
            kind,
            format!("medium-risk keywords: {}", medium.join(", ")),
        );
    }

    let low = matches(words, LOW_RISK_KEYWORDS);
    if !low.is_empty() {
        return Classification::new(
            RiskLevel::Low,
            LOW_CONFIDENCE,
            kind,
            format!("low-risk keywords: {}", low.join(", ")),
        );
    }

    if kind == TaskKind::ReadOnly {
        return Classification::new(
            RiskLevel::Low,
            READ_ONLY_CONFIDENCE,
            kind,
            "read-only task type".to_string(),
        );
    }

    Classification::new(
        RiskLevel::Medium,
        DEFAULT_CONFIDENCE,
        kind,
        "no keyword match".to_string(),
    )
}
