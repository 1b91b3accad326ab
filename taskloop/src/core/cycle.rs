//! Pure decision functions of the PLAN → ACT → OBSERVE → REFLECT cycle.

use std::fmt;

use serde::Serialize;

use crate::core::keywords::{matches, words};

pub const ACCOUNTING_KEYWORDS: &[&str] = &["odoo", "invoice", "accounting"];

pub const SOCIAL_KEYWORDS: &[&str] = &[
    "post",
    "tweet",
    "twitter",
    "instagram",
    "facebook",
    "linkedin",
];

/// Integration family a step is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionDomain {
    Accounting,
    Social,
    Generic,
}

impl ActionDomain {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionDomain::Accounting => "accounting",
            ActionDomain::Social => "social",
            ActionDomain::Generic => "generic",
        }
    }
}

/// Route a step by keyword. Accounting is checked before social.
pub fn action_domain(step: &str) -> ActionDomain {
    let words = words(step);
    if !matches(&words, ACCOUNTING_KEYWORDS).is_empty() {
        ActionDomain::Accounting
    } else if !matches(&words, SOCIAL_KEYWORDS).is_empty() {
        ActionDomain::Social
    } else {
        ActionDomain::Generic
    }
}

/// Status tag returned by an act.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActStatus {
    Success,
    PendingIntegration,
    PendingApproval,
    Other(String),
}

impl ActStatus {
    pub fn as_str(&self) -> &str {
        match self {
            ActStatus::Success => "success",
            ActStatus::PendingIntegration => "pending_integration",
            ActStatus::PendingApproval => "pending_approval",
            ActStatus::Other(tag) => tag,
        }
    }
}

impl fmt::Display for ActStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    Ok,
    Blocked,
    Unknown,
}

impl Observation {
    pub fn as_str(self) -> &'static str {
        match self {
            Observation::Ok => "ok",
            Observation::Blocked => "blocked",
            Observation::Unknown => "unknown",
        }
    }
}

pub fn observe(status: &ActStatus) -> Observation {
    match status {
        ActStatus::Success => Observation::Ok,
        ActStatus::PendingIntegration | ActStatus::PendingApproval => Observation::Blocked,
        ActStatus::Other(_) => Observation::Unknown,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    StepDone,
    NeedsHuman,
    Retry,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        match self {
            Decision::StepDone => "step_done",
            Decision::NeedsHuman => "needs_human",
            Decision::Retry => "retry",
        }
    }
}

pub fn reflect(observation: Observation) -> Decision {
    match observation {
        Observation::Ok => Decision::StepDone,
        Observation::Blocked => Decision::NeedsHuman,
        Observation::Unknown => Decision::Retry,
    }
}
