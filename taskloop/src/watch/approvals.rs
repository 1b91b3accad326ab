//! Awaiting_Approval watcher driving the autonomous reviewer.
//!
//! Tasks returned to the queue for a human stay in the seen set while they
//! are listed, so each one is reviewed once per stay.

use anyhow::Result;
use tracing::warn;

use super::{SeenSet, Watcher};
use crate::core::types::{Queue, TaskId};
use crate::review::{SKILL, review_task};
use crate::vault::Vault;

pub struct ApprovalWatcher<'a> {
    vault: &'a Vault,
    seen: SeenSet<TaskId>,
}

impl<'a> ApprovalWatcher<'a> {
    pub fn new(vault: &'a Vault) -> Self {
        Self {
            vault,
            seen: SeenSet::new(),
        }
    }
}

impl Watcher for ApprovalWatcher<'_> {
    type Item = TaskId;

    fn name(&self) -> &str {
        SKILL
    }

    fn poll(&mut self) -> Vec<TaskId> {
        match self.vault.store.list(Queue::AwaitingApproval) {
            Ok(ids) => self.seen.fresh(&ids),
            Err(err) => {
                warn!(err = %format!("{err:#}"), "approval listing failed");
                Vec::new()
            }
        }
    }

    fn process(&mut self, item: &TaskId) -> Result<()> {
        review_task(self.vault, item)?;
        Ok(())
    }

    fn on_error(&mut self, item: &TaskId, err: &anyhow::Error) {
        warn!(id = %item, err = %format!("{err:#}"), "review failed");
        self.seen.forget(item);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestVault;
    use crate::watch::run_cycle;

    #[test]
    fn waiting_task_is_reviewed_once_per_stay() {
        let tv = TestVault::new();
        let id = tv.add_task(
            Queue::AwaitingApproval,
            "BIG.md",
            "# Big\n\ndelete the old backups\n",
        );
        let mut watcher = ApprovalWatcher::new(&tv.vault);
        assert_eq!(run_cycle(&mut watcher, &tv.vault.audit).processed, 1);
        assert_eq!(run_cycle(&mut watcher, &tv.vault.audit).polled, 0);
        let task = tv.vault.store.read(Queue::AwaitingApproval, &id).unwrap();
        assert_eq!(task.doc.body.matches("## Autonomous Review").count(), 1);
    }
}
