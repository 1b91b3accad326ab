//! Inbox triage: classify a new task and route it through the approval gate.

use anyhow::Result;
use tracing::{info, instrument};

use crate::core::approval::{GateDecision, Verdict, decide};
use crate::core::risk::{Classification, RiskInput, classify};
use crate::core::types::{Approval, Queue, TaskId};
use crate::io::audit::RESULT_OK;
use crate::io::claim::{Claim, ClaimedTask};
use crate::io::clock;
use crate::io::signals::events;
use crate::vault::Vault;

pub const SKILL: &str = "triage";

const DEFAULT_SOURCE: &str = "inbox";

/// Where a triaged task went and why.
#[derive(Debug, Clone)]
pub struct TriageReport {
    pub id: TaskId,
    pub classification: Classification,
    pub decision: GateDecision,
    pub destination: Queue,
}

/// Classify the task's current content and record risk, confidence and the
/// gate verdict in its metadata.
///
/// A document explicitly marked `approval: required` always goes to a human.
pub(crate) fn assess(
    vault: &Vault,
    claimed: &mut ClaimedTask,
) -> (Classification, GateDecision) {
    let id = claimed.id().to_string();
    let doc = claimed.doc();
    let content = doc.content();
    let classification = classify(&RiskInput {
        task_id: &id,
        content: &content,
        explicit_risk: doc.metadata.get("risk_level"),
        task_type: doc.metadata.task_type(),
    });
    let source = doc.metadata.source().unwrap_or(DEFAULT_SOURCE).to_string();
    let mut decision = decide(
        classification.risk,
        classification.confidence,
        &source,
        &vault.config.approval,
    );
    if doc.metadata.approval() == Some(Approval::Required) && decision.is_auto_approved() {
        decision = GateDecision {
            verdict: Verdict::RequiresHuman,
            reason: "task is explicitly marked approval: required".to_string(),
        };
    }

    let meta = &mut claimed.doc_mut().metadata;
    meta.set("risk_level", classification.risk.as_str());
    meta.set("confidence", classification.confidence_label());
    let approval = match decision.verdict {
        Verdict::AutoApproved => Approval::AutoApproved,
        Verdict::RequiresHuman => Approval::Required,
    };
    meta.set("approval", approval.as_str());
    (classification, decision)
}

/// Triage one Inbox task. Returns `None` if another process claimed it first.
#[instrument(skip_all, fields(id = %id))]
pub fn triage_task(vault: &Vault, id: &TaskId) -> Result<Option<TriageReport>> {
    let span = vault.audit.span(SKILL, "classify_and_route", id);
    let mut claimed = match vault.claim(SKILL, id, Queue::Inbox)? {
        Claim::Claimed(claimed) => claimed,
        Claim::Lost => return Ok(None),
    };

    let meta = &mut claimed.doc_mut().metadata;
    meta.set_default("received_at", clock::timestamp());
    meta.set_default("source", DEFAULT_SOURCE);
    meta.set_default("retries", "0");

    let (classification, decision) = assess(vault, &mut claimed);
    let destination = match decision.verdict {
        Verdict::AutoApproved => Queue::NeedsAction,
        Verdict::RequiresHuman => Queue::AwaitingApproval,
    };
    claimed.release(&vault.store, destination)?;

    let detail = format!(
        "risk={} confidence={:.2} -> {destination}: {}",
        classification.risk, classification.confidence, decision.reason
    );
    if destination == Queue::AwaitingApproval {
        vault
            .signals
            .write(events::APPROVAL_NEEDED, Some(id.as_str()), &decision.reason)?;
    }
    span.finish(RESULT_OK, &detail)?;
    info!(risk = %classification.risk, %destination, "triaged");

    Ok(Some(TriageReport {
        id: id.clone(),
        classification,
        decision,
        destination,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{RiskLevel, TaskStatus};
    use crate::test_support::TestVault;

    #[test]
    fn destructive_task_goes_to_awaiting_approval() {
        let tv = TestVault::new();
        let id = tv.add_task(
            Queue::Inbox,
            "DB.md",
            "# Cleanup\n\nplease delete the production database\n",
        );
        let report = triage_task(&tv.vault, &id).unwrap().unwrap();
        assert_eq!(report.classification.risk, RiskLevel::High);
        assert_eq!(report.decision.verdict, Verdict::RequiresHuman);
        assert_eq!(report.destination, Queue::AwaitingApproval);

        let task = tv.vault.store.read(Queue::AwaitingApproval, &id).unwrap();
        let meta = &task.doc.metadata;
        assert_eq!(meta.approval(), Some(Approval::Required));
        assert_eq!(meta.risk_level(), Some(RiskLevel::High));
        assert_eq!(meta.status(), Some(TaskStatus::AwaitingApproval));
        assert_eq!(meta.get("source"), Some("inbox"));
        assert!(meta.get("received_at").is_some());
        assert_eq!(tv.vault.signals.pending().unwrap().len(), 1);
    }

    #[test]
    fn low_risk_task_is_auto_approved() {
        let tv = TestVault::new();
        let id = tv.add_task(
            Queue::Inbox,
            "DISK.md",
            "# Disk\n\n## Steps\n- check disk space\n- view usage report\n",
        );
        let report = triage_task(&tv.vault, &id).unwrap().unwrap();
        assert_eq!(report.destination, Queue::NeedsAction);
        let task = tv.vault.store.read(Queue::NeedsAction, &id).unwrap();
        assert_eq!(task.doc.metadata.approval(), Some(Approval::AutoApproved));
        assert_eq!(task.doc.metadata.get("confidence"), Some("0.80"));
    }

    #[test]
    fn explicit_approval_required_is_honored() {
        let tv = TestVault::new();
        let id = tv.add_task(
            Queue::Inbox,
            "READ.md",
            "# Read\n<!-- AGENT METADATA\n  approval : required\n-->\n\ncheck the logs\n",
        );
        let report = triage_task(&tv.vault, &id).unwrap().unwrap();
        assert_eq!(report.destination, Queue::AwaitingApproval);
    }

    #[test]
    fn lost_claim_returns_none() {
        let tv = TestVault::new();
        let id = TaskId::new("missing.md").unwrap();
        assert!(triage_task(&tv.vault, &id).unwrap().is_none());
    }

    #[test]
    fn triage_is_audited() {
        let tv = TestVault::new();
        let id = tv.add_task(Queue::Inbox, "A.md", "# A\n\nlist files\n");
        triage_task(&tv.vault, &id).unwrap();
        let entries = tv.audit_entries();
        let entry = entries
            .iter()
            .find(|e| e.action == "classify_and_route")
            .unwrap();
        assert_eq!(entry.task_id, "A.md");
        assert!(entry.detail.contains("risk=low"));
    }
}
