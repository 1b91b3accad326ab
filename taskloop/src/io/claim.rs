//! Claim-by-move ownership of tasks.
//!
//! A consumer lists a queue and immediately tries to move each candidate into
//! `In_Progress`. Whoever's rename lands first owns the task; everybody else
//! gets [`Claim::Lost`] and moves on. Content is only read and mutated after
//! a successful claim, and [`ClaimedTask::release`] hands the task to its next
//! queue with a status that matches the destination.

use std::fmt;

use anyhow::{Context, Result, bail};
use tracing::{debug, instrument, warn};

use super::clock;
use super::task_store::{Task, TaskStore};
use crate::core::document::TaskDocument;
use crate::core::transitions::{check_move, status_drift};
use crate::core::types::{Queue, TaskId, TaskStatus};

/// Outcome of a claim attempt.
#[derive(Debug)]
pub enum Claim {
    Claimed(ClaimedTask),
    /// Another process moved the task first, or it no longer exists.
    Lost,
}

/// A task exclusively owned by this process, sitting in `In_Progress`.
#[derive(Debug)]
pub struct ClaimedTask {
    task: Task,
    from: Queue,
    drift: Option<String>,
}

/// A claimed task whose file could not be parsed. The raw file has been
/// moved to Failed with a `<id>.error` file next to it.
#[derive(Debug)]
pub struct UnreadableTask {
    pub id: TaskId,
    pub reason: String,
}

impl fmt::Display for UnreadableTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "task {} is unreadable and was moved to Failed: {}",
            self.id, self.reason
        )
    }
}

impl std::error::Error for UnreadableTask {}

/// Move `id` from `from` into `In_Progress` and load it.
///
/// A won claim on a file that cannot be read fails with [`UnreadableTask`]
/// after the file is parked in Failed.
#[instrument(skip_all, fields(id = %id, from = %from))]
pub fn claim(store: &TaskStore, id: &TaskId, from: Queue) -> Result<Claim> {
    check_move(from, Queue::InProgress)?;
    if !store.move_task(from, id, Queue::InProgress)? {
        debug!("claim lost");
        return Ok(Claim::Lost);
    }
    let mut task = match store.read(Queue::InProgress, id) {
        Ok(task) => task,
        Err(err) => return Err(quarantine(store, id, &err)?.into()),
    };
    let drift = status_drift(from, task.doc.metadata.status());
    if let Some(message) = &drift {
        warn!(id = %id, %message, "status drift");
    }
    task.doc
        .metadata
        .set("status", TaskStatus::InProgress.as_str());
    store.write(Queue::InProgress, &task)?;
    debug!("claimed");
    Ok(Claim::Claimed(ClaimedTask { task, from, drift }))
}

/// Park an unreadable owned file in Failed untouched, with the reason beside it.
fn quarantine(store: &TaskStore, id: &TaskId, err: &anyhow::Error) -> Result<UnreadableTask> {
    let reason = format!("{err:#}");
    warn!(id = %id, %reason, "claimed task is unreadable");
    if !store.move_task(Queue::InProgress, id, Queue::Failed)? {
        bail!("unreadable task {id} vanished from In_Progress while owned");
    }
    let note = format!("failed_at: {}\nreason: {reason}\n", clock::timestamp());
    store
        .write_sidecar(Queue::Failed, id, "error", &note)
        .with_context(|| format!("record read failure for {id}"))?;
    Ok(UnreadableTask {
        id: id.clone(),
        reason,
    })
}

impl ClaimedTask {
    pub fn id(&self) -> &TaskId {
        &self.task.id
    }

    /// Queue the task was claimed from.
    pub fn from(&self) -> Queue {
        self.from
    }

    /// Location/status mismatch observed at claim time, if any.
    pub fn drift(&self) -> Option<&str> {
        self.drift.as_deref()
    }

    pub fn doc(&self) -> &TaskDocument {
        &self.task.doc
    }

    pub fn doc_mut(&mut self) -> &mut TaskDocument {
        &mut self.task.doc
    }

    /// Write the current content while keeping ownership.
    pub fn persist(&self, store: &TaskStore) -> Result<()> {
        store.write(Queue::InProgress, &self.task)
    }

    /// Stamp the destination status, persist, then move out of `In_Progress`.
    #[instrument(skip_all, fields(id = %self.task.id, to = %to))]
    pub fn release(mut self, store: &TaskStore, to: Queue) -> Result<Task> {
        check_move(Queue::InProgress, to)?;
        self.task
            .doc
            .metadata
            .set("status", to.resting_status().as_str());
        store.write(Queue::InProgress, &self.task)?;
        if !store.move_task(Queue::InProgress, &self.task.id, to)? {
            bail!(
                "task {} vanished from In_Progress while owned",
                self.task.id
            );
        }
        debug!("released");
        Ok(self.task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::document::Metadata;
    use crate::io::paths::VaultPaths;

    fn setup(status: Option<&str>) -> (tempfile::TempDir, TaskStore, TaskId) {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = VaultPaths::new(temp.path());
        paths.ensure_layout().expect("layout");
        let store = TaskStore::new(paths);
        let mut meta = Metadata::new();
        if let Some(status) = status {
            meta.set("status", status);
        }
        let id = TaskId::new("t.md").unwrap();
        store
            .create(
                Queue::NeedsAction,
                &Task::new(id.clone(), TaskDocument::new("T", meta, "")),
            )
            .unwrap();
        (temp, store, id)
    }

    #[test]
    fn claim_moves_and_stamps_status() {
        let (_temp, store, id) = setup(Some("needs_action"));
        let Claim::Claimed(claimed) = claim(&store, &id, Queue::NeedsAction).unwrap() else {
            panic!("expected claim");
        };
        assert!(claimed.drift().is_none());
        assert!(!store.exists(Queue::NeedsAction, &id));
        let on_disk = store.read(Queue::InProgress, &id).unwrap();
        assert_eq!(on_disk.doc.metadata.status(), Some(TaskStatus::InProgress));
    }

    #[test]
    fn second_claim_is_lost() {
        let (_temp, store, id) = setup(None);
        assert!(matches!(
            claim(&store, &id, Queue::NeedsAction).unwrap(),
            Claim::Claimed(_)
        ));
        assert!(matches!(
            claim(&store, &id, Queue::NeedsAction).unwrap(),
            Claim::Lost
        ));
    }

    #[test]
    fn claim_reports_drift() {
        let (_temp, store, id) = setup(Some("done"));
        let Claim::Claimed(claimed) = claim(&store, &id, Queue::NeedsAction).unwrap() else {
            panic!("expected claim");
        };
        assert!(claimed.drift().unwrap().contains("done"));
    }

    #[test]
    fn release_sets_destination_status() {
        let (_temp, store, id) = setup(None);
        let Claim::Claimed(claimed) = claim(&store, &id, Queue::NeedsAction).unwrap() else {
            panic!("expected claim");
        };
        claimed.release(&store, Queue::Done).unwrap();
        let done = store.read(Queue::Done, &id).unwrap();
        assert_eq!(done.doc.metadata.status(), Some(TaskStatus::Done));
        assert!(!store.exists(Queue::InProgress, &id));
    }

    #[test]
    fn release_rejects_illegal_destination() {
        let (_temp, store, id) = setup(None);
        let Claim::Claimed(claimed) = claim(&store, &id, Queue::NeedsAction).unwrap() else {
            panic!("expected claim");
        };
        assert!(claimed.release(&store, Queue::Inbox).is_err());
        assert!(store.exists(Queue::InProgress, &id));
    }

    #[test]
    fn unreadable_claim_is_parked_in_failed() {
        let (_temp, store, _) = setup(None);
        let id = TaskId::new("BAD.md").unwrap();
        std::fs::write(store.path(Queue::NeedsAction, &id), [0xff, 0xfe, b'\n']).unwrap();

        let err = claim(&store, &id, Queue::NeedsAction).unwrap_err();
        let unreadable = err.downcast_ref::<UnreadableTask>().expect("unreadable error");
        assert_eq!(unreadable.id, id);
        assert!(!store.exists(Queue::InProgress, &id));
        assert!(store.exists(Queue::Failed, &id));
        let raw = std::fs::read(store.path(Queue::Failed, &id)).unwrap();
        assert_eq!(raw, vec![0xff, 0xfe, b'\n']);
        let sidecar = std::fs::read_to_string(store.sidecar_path(Queue::Failed, &id, "error")).unwrap();
        assert!(sidecar.contains("reason: "));
        assert!(!store.list(Queue::Failed).unwrap().iter().any(|t| t.as_str().ends_with(".error")));
    }

    #[test]
    fn claim_from_terminal_queue_is_an_error() {
        let (_temp, store, id) = setup(None);
        assert!(claim(&store, &id, Queue::Done).is_err());
    }
}
