//! Human decisions on tasks: approve, reject, route for approval, list pending.

use anyhow::{Result, bail};
use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::{info, instrument};

use crate::core::notes::Note;
use crate::core::types::{Approval, Queue, RiskLevel, TaskId};
use crate::io::audit::RESULT_OK;
use crate::io::claim::{Claim, ClaimedTask};
use crate::io::clock;
use crate::io::signals::events;
use crate::io::task_store::Task;
use crate::vault::Vault;

pub const SKILL: &str = "approval";

fn claim_from(vault: &Vault, id: &TaskId, from: Queue) -> Result<ClaimedTask> {
    match vault.claim(SKILL, id, from)? {
        Claim::Claimed(claimed) => Ok(claimed),
        Claim::Lost => bail!("task {id} is not in {from}"),
    }
}

/// Approve a waiting task and hand it to the executor.
#[instrument(skip_all, fields(id = %id))]
pub fn approve(vault: &Vault, id: &TaskId) -> Result<Task> {
    let span = vault.audit.span(SKILL, "approve", id);
    let mut claimed = claim_from(vault, id, Queue::AwaitingApproval)?;
    let note = Note::new("Human Approval", "Approved At", &clock::timestamp())
        .field("Decision", "approved")
        .render()?;
    let doc = claimed.doc_mut();
    doc.metadata.set("approval", Approval::Approved.as_str());
    doc.append_section(&note);
    let task = claimed.release(&vault.store, Queue::NeedsAction)?;
    vault
        .signals
        .write(events::APPROVED, Some(id.as_str()), "approved by human")?;
    span.finish(RESULT_OK, "-> Needs_Action")?;
    info!("approved");
    Ok(task)
}

/// Reject a waiting task; it ends in Failed with the reason on record.
#[instrument(skip_all, fields(id = %id))]
pub fn reject(vault: &Vault, id: &TaskId, reason: &str) -> Result<Task> {
    let span = vault.audit.span(SKILL, "reject", id);
    let mut claimed = claim_from(vault, id, Queue::AwaitingApproval)?;
    let note = Note::new("Rejected", "Rejected At", &clock::timestamp())
        .field("Reason", reason)
        .render()?;
    let doc = claimed.doc_mut();
    doc.metadata.set("approval", Approval::Rejected.as_str());
    doc.append_section(&note);
    let task = claimed.release(&vault.store, Queue::Failed)?;
    vault
        .memory
        .append(id.as_str(), &format!("REJECTED: {reason}"))?;
    vault
        .signals
        .write(events::REJECTED, Some(id.as_str()), reason)?;
    span.finish(RESULT_OK, &format!("-> Failed: {reason}"))?;
    info!("rejected");
    Ok(task)
}

/// Pull a queued task back for a human decision.
#[instrument(skip_all, fields(id = %id))]
pub fn route_for_approval(vault: &Vault, id: &TaskId, reason: &str) -> Result<Task> {
    let span = vault.audit.span(SKILL, "route_for_approval", id);
    let mut claimed = claim_from(vault, id, Queue::NeedsAction)?;
    let note = Note::new("Approval Requested", "Requested At", &clock::timestamp())
        .field("Reason", reason)
        .render()?;
    let doc = claimed.doc_mut();
    doc.metadata.set("approval", Approval::Required.as_str());
    doc.append_section(&note);
    let task = claimed.release(&vault.store, Queue::AwaitingApproval)?;
    vault
        .signals
        .write(events::APPROVAL_NEEDED, Some(id.as_str()), reason)?;
    span.finish(RESULT_OK, &format!("-> Awaiting_Approval: {reason}"))?;
    Ok(task)
}

/// A task waiting in Awaiting_Approval.
#[derive(Debug, Clone, Serialize)]
pub struct PendingApproval {
    pub id: TaskId,
    pub age_hours: f64,
    pub risk: Option<RiskLevel>,
    pub source: Option<String>,
    pub approval: Option<Approval>,
}

/// Tasks waiting for a decision, oldest first.
///
/// Age counts from `received_at`, or from the file's modification time when
/// that field is missing or unparsable. This only reads; nothing is claimed.
pub fn list_pending(vault: &Vault) -> Result<Vec<PendingApproval>> {
    let now = clock::now();
    let mut pending = Vec::new();
    for id in vault.store.list(Queue::AwaitingApproval)? {
        // Claimed by someone else between list and read.
        let Ok(task) = vault.store.read(Queue::AwaitingApproval, &id) else {
            continue;
        };
        let meta = &task.doc.metadata;
        let since = match meta.get("received_at").and_then(clock::parse_timestamp) {
            Some(ts) => ts,
            None => match vault.store.modified_at(Queue::AwaitingApproval, &id) {
                Ok(mtime) => DateTime::<Local>::from(mtime).naive_local(),
                Err(_) => now,
            },
        };
        let minutes = (now - since).num_minutes().max(0);
        pending.push(PendingApproval {
            age_hours: minutes as f64 / 60.0,
            risk: meta.risk_level(),
            source: meta.source().map(str::to_string),
            approval: meta.approval(),
            id,
        });
    }
    pending.sort_by(|a, b| b.age_hours.total_cmp(&a.age_hours));
    Ok(pending)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::TaskStatus;
    use crate::io::signals::events;
    use crate::test_support::TestVault;

    const WAITING: &str = "# Deploy\n<!-- AGENT METADATA\n  received_at : 2020-01-01 00:00:00\n  source      : gmail\n  risk_level  : high\n  approval    : required\n  status      : awaiting_approval\n-->\n\n## Steps\n- deploy the site\n";

    #[test]
    fn approve_moves_to_needs_action() {
        let tv = TestVault::new();
        let id = tv.add_task(Queue::AwaitingApproval, "DEPLOY.md", WAITING);
        let task = approve(&tv.vault, &id).unwrap();
        assert_eq!(task.doc.metadata.approval(), Some(Approval::Approved));
        let on_disk = tv.vault.store.read(Queue::NeedsAction, &id).unwrap();
        assert_eq!(on_disk.doc.metadata.status(), Some(TaskStatus::NeedsAction));
        assert!(on_disk.doc.body.contains("## Human Approval"));
        let signals = tv.vault.signals.pending().unwrap();
        assert_eq!(signals[0].event, events::APPROVED);
    }

    #[test]
    fn approve_missing_task_is_an_error() {
        let tv = TestVault::new();
        let id = TaskId::new("nope.md").unwrap();
        let err = approve(&tv.vault, &id).unwrap_err();
        assert!(err.to_string().contains("not in Awaiting_Approval"));
    }

    #[test]
    fn reject_fails_task_and_records_lesson() {
        let tv = TestVault::new();
        let id = tv.add_task(Queue::AwaitingApproval, "DEPLOY.md", WAITING);
        reject(&tv.vault, &id, "not this week").unwrap();
        let failed = tv.vault.store.read(Queue::Failed, &id).unwrap();
        assert_eq!(failed.doc.metadata.approval(), Some(Approval::Rejected));
        assert!(failed.doc.body.contains("not this week"));
        assert!(tv.memory_text().contains("REJECTED: not this week"));
    }

    #[test]
    fn route_sends_task_back_for_approval() {
        let tv = TestVault::new();
        let id = tv.add_task(Queue::NeedsAction, "A.md", "# A\n\nlist files\n");
        route_for_approval(&tv.vault, &id, "looks odd").unwrap();
        let task = tv.vault.store.read(Queue::AwaitingApproval, &id).unwrap();
        assert_eq!(task.doc.metadata.approval(), Some(Approval::Required));
    }

    #[test]
    fn pending_reports_age_and_risk() {
        let tv = TestVault::new();
        tv.add_task(Queue::AwaitingApproval, "DEPLOY.md", WAITING);
        tv.add_task(Queue::AwaitingApproval, "NEW.md", "# New\n\nsomething\n");
        let pending = list_pending(&tv.vault).unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id.as_str(), "DEPLOY.md");
        assert!(pending[0].age_hours > 24.0);
        assert_eq!(pending[0].risk, Some(RiskLevel::High));
        assert_eq!(pending[0].source.as_deref(), Some("gmail"));
        assert!(pending[1].age_hours < 1.0);
    }
}
