//! Inbox watcher: triage every new task.

use anyhow::Result;
use tracing::warn;

use super::{SeenSet, Watcher};
use crate::core::types::{Queue, TaskId};
use crate::triage::{SKILL, triage_task};
use crate::vault::Vault;

pub struct InboxWatcher<'a> {
    vault: &'a Vault,
    seen: SeenSet<TaskId>,
}

impl<'a> InboxWatcher<'a> {
    pub fn new(vault: &'a Vault) -> Self {
        Self {
            vault,
            seen: SeenSet::new(),
        }
    }
}

impl Watcher for InboxWatcher<'_> {
    type Item = TaskId;

    fn name(&self) -> &str {
        SKILL
    }

    fn poll(&mut self) -> Vec<TaskId> {
        match self.vault.store.list(Queue::Inbox) {
            Ok(ids) => self.seen.fresh(&ids),
            Err(err) => {
                warn!(err = %format!("{err:#}"), "inbox listing failed");
                Vec::new()
            }
        }
    }

    fn process(&mut self, item: &TaskId) -> Result<()> {
        triage_task(self.vault, item)?;
        Ok(())
    }

    fn on_error(&mut self, item: &TaskId, err: &anyhow::Error) {
        warn!(id = %item, err = %format!("{err:#}"), "triage failed");
        self.seen.forget(item);
    }
}
