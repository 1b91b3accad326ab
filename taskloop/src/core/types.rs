//! Shared deterministic types for the task pipeline.
//!
//! These types define the stable vocabulary of the vault: queue directories,
//! lifecycle status values, risk tiers and approval decisions. All of them
//! serialize to the exact strings written into task documents.

use std::fmt;
use std::str::FromStr;

use anyhow::{Result, anyhow, bail};
use serde::{Deserialize, Serialize};

/// A directory acting as a set of tasks sharing one lifecycle stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Queue {
    Inbox,
    NeedsAction,
    AwaitingApproval,
    InProgress,
    Done,
    Failed,
}

impl Queue {
    pub const ALL: [Queue; 6] = [
        Queue::Inbox,
        Queue::NeedsAction,
        Queue::AwaitingApproval,
        Queue::InProgress,
        Queue::Done,
        Queue::Failed,
    ];

    /// Directory name under the vault root.
    pub fn dir_name(self) -> &'static str {
        match self {
            Queue::Inbox => "Inbox",
            Queue::NeedsAction => "Needs_Action",
            Queue::AwaitingApproval => "Awaiting_Approval",
            Queue::InProgress => "In_Progress",
            Queue::Done => "Done",
            Queue::Failed => "Failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Queue::Done | Queue::Failed)
    }

    /// Status a task is expected to carry while it sits in this queue.
    pub fn resting_status(self) -> TaskStatus {
        match self {
            Queue::Inbox => TaskStatus::Received,
            Queue::NeedsAction => TaskStatus::NeedsAction,
            Queue::AwaitingApproval => TaskStatus::AwaitingApproval,
            Queue::InProgress => TaskStatus::InProgress,
            Queue::Done => TaskStatus::Done,
            Queue::Failed => TaskStatus::Failed,
        }
    }
}

impl fmt::Display for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

impl FromStr for Queue {
    type Err = anyhow::Error;

    /// Accepts the directory name or its snake/kebab-case spelling.
    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Queue::ALL
            .into_iter()
            .find(|queue| queue.dir_name().to_ascii_lowercase() == normalized)
            .ok_or_else(|| anyhow!("unknown queue '{s}'"))
    }
}

/// Lifecycle status stored in the `status` metadata field.
///
/// The field is redundant with the queue directory; the pair is checked on
/// every claim so that a move without a status update shows up as drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Received,
    NeedsAction,
    AwaitingApproval,
    InProgress,
    /// Owned in In_Progress but halted waiting for a human.
    Blocked,
    Done,
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Received => "received",
            TaskStatus::NeedsAction => "needs_action",
            TaskStatus::AwaitingApproval => "awaiting_approval",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
        }
    }

    /// Queue in which a task with this status must reside.
    pub fn home_queue(self) -> Queue {
        match self {
            TaskStatus::Received => Queue::Inbox,
            TaskStatus::NeedsAction => Queue::NeedsAction,
            TaskStatus::AwaitingApproval => Queue::AwaitingApproval,
            TaskStatus::InProgress | TaskStatus::Blocked => Queue::InProgress,
            TaskStatus::Done => Queue::Done,
            TaskStatus::Failed => Queue::Failed,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "received" => Ok(TaskStatus::Received),
            "needs_action" => Ok(TaskStatus::NeedsAction),
            "awaiting_approval" | "pending_approval" => Ok(TaskStatus::AwaitingApproval),
            "in_progress" => Ok(TaskStatus::InProgress),
            "blocked" => Ok(TaskStatus::Blocked),
            "done" => Ok(TaskStatus::Done),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(anyhow!("unknown status '{other}'")),
        }
    }
}

/// Coarse classification of a task's potential for irreversible effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(RiskLevel::Low),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            other => Err(anyhow!("unknown risk level '{other}'")),
        }
    }
}

/// Approval decision recorded in the `approval` metadata field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Approval {
    NotRequired,
    Required,
    AutoApproved,
    Approved,
    Rejected,
}

impl Approval {
    pub fn as_str(self) -> &'static str {
        match self {
            Approval::NotRequired => "not_required",
            Approval::Required => "required",
            Approval::AutoApproved => "auto_approved",
            Approval::Approved => "approved",
            Approval::Rejected => "rejected",
        }
    }

    /// True once a human or the gate has granted execution.
    pub fn is_granted(self) -> bool {
        matches!(self, Approval::AutoApproved | Approval::Approved)
    }

    /// True when a human has explicitly signed off.
    pub fn is_human_approved(self) -> bool {
        self == Approval::Approved
    }
}

impl fmt::Display for Approval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Approval {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "not_required" => Ok(Approval::NotRequired),
            "required" | "pending" => Ok(Approval::Required),
            "auto_approved" => Ok(Approval::AutoApproved),
            "approved" => Ok(Approval::Approved),
            "rejected" => Ok(Approval::Rejected),
            other => Err(anyhow!("unknown approval value '{other}'")),
        }
    }
}

/// Identity of a task: its file name inside a queue directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaskId(String);

impl TaskId {
    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if raw.is_empty() {
            bail!("task id must not be empty");
        }
        if raw.starts_with('.') {
            bail!("task id '{raw}' must not start with '.'");
        }
        if !raw.ends_with(".md") || raw.len() == 3 {
            bail!("task id '{raw}' must be a markdown file name ending in .md");
        }
        if let Some(bad) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
        {
            bail!("task id '{raw}' contains invalid character {bad:?}");
        }
        Ok(Self(raw))
    }

    /// Build an id from arbitrary text by replacing disallowed characters.
    pub fn sanitized(prefix: &str, stem: &str) -> Result<Self> {
        let cleaned: String = stem
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let cleaned = cleaned.trim_matches('_');
        if cleaned.is_empty() {
            bail!("cannot derive a task id from '{stem}'");
        }
        Self::new(format!("{prefix}{cleaned}.md"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name without the `.md` extension.
    pub fn stem(&self) -> &str {
        self.0.strip_suffix(".md").unwrap_or(&self.0)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TaskId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for TaskId {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<TaskId> for String {
    fn from(value: TaskId) -> Self {
        value.0
    }
}
