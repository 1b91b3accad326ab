//! Executor watcher: claim queued tasks and run the execution loop.

use anyhow::Result;
use tracing::{info, instrument, warn};

use super::{SeenSet, Watcher};
use crate::core::notes::Note;
use crate::core::types::{Approval, Queue, TaskId};
use crate::execute::{Actor, Finished, LoopOutcome, LoopReport, SKILL, execute_claimed};
use crate::io::audit::RESULT_WARN;
use crate::io::claim::Claim;
use crate::io::clock;
use crate::io::signals::events;
use crate::vault::Vault;

/// Where a worked task ended up.
#[derive(Debug, Clone)]
pub struct WorkResult {
    pub report: LoopReport,
    pub queue: Queue,
}

/// Claim `id` from Needs_Action and run it to a resting place.
///
/// Runs that need a person are sent to Awaiting_Approval with `approval:
/// required` and a `needs_human` signal. `None` means the claim was lost.
#[instrument(skip_all, fields(id = %id))]
pub fn work_task(vault: &Vault, id: &TaskId, actor: &mut dyn Actor) -> Result<Option<WorkResult>> {
    let claimed = match vault.claim(SKILL, id, Queue::NeedsAction)? {
        Claim::Claimed(claimed) => claimed,
        Claim::Lost => return Ok(None),
    };
    match execute_claimed(vault, claimed, actor)? {
        Finished::Released { report, queue, .. } => {
            info!(%queue, outcome = report.outcome.label(), "task finished");
            Ok(Some(WorkResult { report, queue }))
        }
        Finished::Held {
            report,
            mut claimed,
        } => {
            let reason = match &report.outcome {
                LoopOutcome::NeedsHuman { step, reason } => format!("{step}: {reason}"),
                _ => "no actionable steps".to_string(),
            };
            let note = Note::new("Needs Human", "Escalated At", &clock::timestamp())
                .field("Reason", &reason)
                .render()?;
            let doc = claimed.doc_mut();
            doc.metadata.set("approval", Approval::Required.as_str());
            doc.append_section(&note);
            claimed.release(&vault.store, Queue::AwaitingApproval)?;
            vault
                .signals
                .write(events::NEEDS_HUMAN, Some(id.as_str()), &reason)?;
            vault.audit.log(
                SKILL,
                "escalate",
                RESULT_WARN,
                Some(id.as_str()),
                &format!("-> Awaiting_Approval: {reason}"),
            )?;
            Ok(Some(WorkResult {
                report,
                queue: Queue::AwaitingApproval,
            }))
        }
    }
}

pub struct WorkWatcher<'a, A: Actor> {
    vault: &'a Vault,
    actor: A,
    seen: SeenSet<TaskId>,
}

impl<'a, A: Actor> WorkWatcher<'a, A> {
    pub fn new(vault: &'a Vault, actor: A) -> Self {
        Self {
            vault,
            actor,
            seen: SeenSet::new(),
        }
    }
}

impl<A: Actor> Watcher for WorkWatcher<'_, A> {
    type Item = TaskId;

    fn name(&self) -> &str {
        SKILL
    }

    fn poll(&mut self) -> Vec<TaskId> {
        match self.vault.store.list(Queue::NeedsAction) {
            Ok(ids) => self.seen.fresh(&ids),
            Err(err) => {
                warn!(err = %format!("{err:#}"), "queue listing failed");
                Vec::new()
            }
        }
    }

    fn process(&mut self, item: &TaskId) -> Result<()> {
        work_task(self.vault, item, &mut self.actor)?;
        Ok(())
    }

    fn on_error(&mut self, item: &TaskId, err: &anyhow::Error) {
        warn!(id = %item, err = %format!("{err:#}"), "execution failed");
        self.seen.forget(item);
    }
}
