//! Autonomous reviewer for the Awaiting_Approval queue.
//!
//! Tasks marked `approval: required` wait for a human and are put back
//! untouched. Human decisions found in the metadata are carried out.
//! Undecided tasks are classified again and either promoted to Needs_Action
//! or annotated and returned.

use anyhow::Result;
use tracing::{debug, info, instrument};

use crate::core::approval::Verdict;
use crate::core::notes::Note;
use crate::core::types::{Approval, Queue, TaskId};
use crate::io::audit::{RESULT_OK, RESULT_SKIPPED};
use crate::io::claim::{Claim, ClaimedTask};
use crate::io::clock;
use crate::io::signals::events;
use crate::triage::assess;
use crate::vault::Vault;

pub const SKILL: &str = "approver";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewOutcome {
    /// Waiting on a human; returned unchanged.
    Untouched,
    /// Cleared by the gate and moved to Needs_Action.
    AutoApproved,
    /// Annotated and returned to Awaiting_Approval for a human.
    NeedsHuman,
    /// Already human-approved, forwarded to Needs_Action.
    Forwarded,
    /// Marked rejected, moved to Failed.
    Rejected,
}

impl ReviewOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            ReviewOutcome::Untouched => "untouched",
            ReviewOutcome::AutoApproved => "auto_approved",
            ReviewOutcome::NeedsHuman => "needs_human",
            ReviewOutcome::Forwarded => "forwarded",
            ReviewOutcome::Rejected => "rejected",
        }
    }
}

struct Plan {
    outcome: ReviewOutcome,
    destination: Queue,
    approval_reason: Option<String>,
}

/// Review one Awaiting_Approval task. `None` means another process owns it.
#[instrument(skip_all, fields(id = %id))]
pub fn review_task(vault: &Vault, id: &TaskId) -> Result<Option<ReviewOutcome>> {
    let span = vault.audit.span(SKILL, "review", id);
    let mut claimed = match vault.claim(SKILL, id, Queue::AwaitingApproval)? {
        Claim::Claimed(claimed) => claimed,
        Claim::Lost => return Ok(None),
    };
    let plan = match plan_review(vault, &mut claimed) {
        Ok(plan) => plan,
        Err(err) => {
            vault.fail_claimed(SKILL, claimed, &err)?;
            return Err(err);
        }
    };
    claimed.release(&vault.store, plan.destination)?;

    if plan.outcome == ReviewOutcome::Rejected {
        vault.memory.append(id.as_str(), "REJECTED: approval marked rejected")?;
    }
    if let Some(reason) = &plan.approval_reason {
        vault
            .signals
            .write(events::APPROVAL_NEEDED, Some(id.as_str()), reason)?;
    }
    let result = if plan.outcome == ReviewOutcome::Untouched {
        RESULT_SKIPPED
    } else {
        RESULT_OK
    };
    span.finish(result, &format!("{} -> {}", plan.outcome.as_str(), plan.destination))?;
    info!(outcome = plan.outcome.as_str(), "reviewed");
    Ok(Some(plan.outcome))
}

fn plan_review(vault: &Vault, claimed: &mut ClaimedTask) -> Result<Plan> {
    let decided = |outcome, destination| Plan {
        outcome,
        destination,
        approval_reason: None,
    };
    match claimed.doc().metadata.approval() {
        Some(Approval::Required) => {
            debug!("waiting on a human decision");
            Ok(decided(ReviewOutcome::Untouched, Queue::AwaitingApproval))
        }
        Some(Approval::Approved) => Ok(decided(ReviewOutcome::Forwarded, Queue::NeedsAction)),
        Some(Approval::Rejected) => {
            let note = Note::new("Rejected", "Rejected At", &clock::timestamp())
                .field("Reason", "approval field marked rejected")
                .render()?;
            claimed.doc_mut().append_section(&note);
            Ok(decided(ReviewOutcome::Rejected, Queue::Failed))
        }
        None | Some(Approval::NotRequired | Approval::AutoApproved) => {
            let (classification, decision) = assess(vault, claimed);
            let heading = if decision.is_auto_approved() {
                "Autonomous Approval"
            } else {
                "Autonomous Review"
            };
            let note = Note::new(heading, "Reviewed At", &clock::timestamp())
                .field("Risk", classification.risk.as_str())
                .field("Confidence", classification.confidence_label())
                .field("Reason", &decision.reason)
                .render()?;
            claimed.doc_mut().append_section(&note);
            Ok(match decision.verdict {
                Verdict::AutoApproved => decided(ReviewOutcome::AutoApproved, Queue::NeedsAction),
                Verdict::RequiresHuman => Plan {
                    outcome: ReviewOutcome::NeedsHuman,
                    destination: Queue::AwaitingApproval,
                    approval_reason: Some(decision.reason),
                },
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::TaskStatus;
    use crate::test_support::TestVault;

    #[test]
    fn undecided_low_risk_task_is_promoted() {
        let tv = TestVault::new();
        let id = tv.add_task(
            Queue::AwaitingApproval,
            "LOOK.md",
            "# Look\n\n## Steps\n- view the calendar\n",
        );
        let outcome = review_task(&tv.vault, &id).unwrap();
        assert_eq!(outcome, Some(ReviewOutcome::AutoApproved));
        let task = tv.vault.store.read(Queue::NeedsAction, &id).unwrap();
        assert_eq!(task.doc.metadata.approval(), Some(Approval::AutoApproved));
        assert_eq!(task.doc.metadata.status(), Some(TaskStatus::NeedsAction));
        assert!(task.doc.body.contains("## Autonomous Approval"));
    }

    #[test]
    fn undecided_high_risk_task_waits_with_note() {
        let tv = TestVault::new();
        let id = tv.add_task(
            Queue::AwaitingApproval,
            "PAY.md",
            "# Pay\n\nsend the payment to the vendor\n",
        );
        let outcome = review_task(&tv.vault, &id).unwrap();
        assert_eq!(outcome, Some(ReviewOutcome::NeedsHuman));
        let task = tv.vault.store.read(Queue::AwaitingApproval, &id).unwrap();
        assert_eq!(task.doc.metadata.approval(), Some(Approval::Required));
        assert!(task.doc.body.contains("## Autonomous Review"));
        assert_eq!(tv.vault.signals.pending().unwrap().len(), 1);
    }

    #[test]
    fn required_task_is_left_alone() {
        let tv = TestVault::new();
        let text = "# Wait\n<!-- AGENT METADATA\n  approval : required\n  status   : awaiting_approval\n-->\n\nlist files\n";
        let id = tv.add_task(Queue::AwaitingApproval, "WAIT.md", text);
        let outcome = review_task(&tv.vault, &id).unwrap();
        assert_eq!(outcome, Some(ReviewOutcome::Untouched));
        let task = tv.vault.store.read(Queue::AwaitingApproval, &id).unwrap();
        assert!(!task.doc.body.contains("Autonomous"));
        assert!(tv.vault.signals.pending().unwrap().is_empty());
    }

    #[test]
    fn rejected_task_moves_to_failed() {
        let tv = TestVault::new();
        let text = "# No\n<!-- AGENT METADATA\n  approval : rejected\n-->\n\ndeploy it\n";
        let id = tv.add_task(Queue::AwaitingApproval, "NO.md", text);
        let outcome = review_task(&tv.vault, &id).unwrap();
        assert_eq!(outcome, Some(ReviewOutcome::Rejected));
        assert!(tv.vault.store.exists(Queue::Failed, &id));
        assert!(tv.memory_text().contains("NO.md"));
    }
}
