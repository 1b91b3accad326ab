//! Directory-backed task store.
//!
//! Each queue is a directory and each task a markdown file in it. `move_task`
//! is a single `rename`, which is what makes claim-by-move safe across
//! processes: a task is visible in at most one queue at a time, and the loser
//! of a race finds the source gone.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, instrument};

use crate::core::document::TaskDocument;
use crate::core::types::{Queue, TaskId};
use crate::io::paths::VaultPaths;

/// A task document together with its identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: TaskId,
    pub doc: TaskDocument,
}

impl Task {
    pub fn new(id: TaskId, doc: TaskDocument) -> Self {
        Self { id, doc }
    }
}

#[derive(Debug, Clone)]
pub struct TaskStore {
    paths: VaultPaths,
}

impl TaskStore {
    pub fn new(paths: VaultPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &VaultPaths {
        &self.paths
    }

    pub fn path(&self, queue: Queue, id: &TaskId) -> PathBuf {
        self.paths.queue_dir(queue).join(id.as_str())
    }

    /// Task ids in `queue`, sorted by name. A missing directory is empty.
    pub fn list(&self, queue: Queue) -> Result<Vec<TaskId>> {
        let dir = self.paths.queue_dir(queue);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(queue = %queue, "queue directory missing");
                return Ok(Vec::new());
            }
            Err(err) => return Err(err).with_context(|| format!("list {}", dir.display())),
        };
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.with_context(|| format!("read entry in {}", dir.display()))?;
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if let Ok(id) = TaskId::new(name) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    pub fn exists(&self, queue: Queue, id: &TaskId) -> bool {
        self.path(queue, id).is_file()
    }

    pub fn read(&self, queue: Queue, id: &TaskId) -> Result<Task> {
        let path = self.path(queue, id);
        let text = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        Ok(Task::new(id.clone(), TaskDocument::parse(&text)))
    }

    /// Replace the task file atomically (temp file + rename).
    pub fn write(&self, queue: Queue, task: &Task) -> Result<()> {
        let path = self.path(queue, &task.id);
        let tmp = self.write_temp(queue, task)?;
        fs::rename(&tmp, &path).with_context(|| format!("replace {}", path.display()))?;
        Ok(())
    }

    /// Create a new task file, failing if the id is already taken in `queue`.
    #[instrument(skip_all, fields(queue = %queue, id = %task.id))]
    pub fn create(&self, queue: Queue, task: &Task) -> Result<()> {
        let path = self.path(queue, &task.id);
        let tmp = self.write_temp(queue, task)?;
        // hard_link refuses an existing destination, so a concurrent creator cannot be clobbered.
        let linked = fs::hard_link(&tmp, &path);
        let _ = fs::remove_file(&tmp);
        match linked {
            Ok(()) => {
                debug!("task created");
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                Err(anyhow!("task {} already exists in {queue}", task.id))
            }
            Err(err) => Err(err).with_context(|| format!("create {}", path.display())),
        }
    }

    /// Move a task between queues with a single rename.
    ///
    /// Returns `Ok(false)` when the source no longer exists (another process
    /// won the race). Refuses to overwrite a task already in `dst`.
    #[instrument(skip_all, fields(id = %id, src = %src, dst = %dst))]
    pub fn move_task(&self, src: Queue, id: &TaskId, dst: Queue) -> Result<bool> {
        let from = self.path(src, id);
        let to = self.path(dst, id);
        if to.exists() {
            if !from.exists() {
                debug!("already moved by another process");
                return Ok(false);
            }
            bail!("cannot move {id} to {dst}: a task with that id already exists there");
        }
        match fs::rename(&from, &to) {
            Ok(()) => {
                debug!("moved");
                Ok(true)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("source vanished, lost race");
                Ok(false)
            }
            Err(err) => Err(err).with_context(|| {
                format!("move {} -> {}", from.display(), to.display())
            }),
        }
    }

    pub fn modified_at(&self, queue: Queue, id: &TaskId) -> Result<SystemTime> {
        let path = self.path(queue, id);
        fs::metadata(&path)
            .and_then(|m| m.modified())
            .with_context(|| format!("stat {}", path.display()))
    }

    /// `<id>.<ext>` next to the task file. Not listed as a task.
    pub fn sidecar_path(&self, queue: Queue, id: &TaskId, ext: &str) -> PathBuf {
        self.paths.queue_dir(queue).join(format!("{id}.{ext}"))
    }

    pub fn write_sidecar(&self, queue: Queue, id: &TaskId, ext: &str, contents: &str) -> Result<PathBuf> {
        let path = self.sidecar_path(queue, id, ext);
        write_file(&path, contents)?;
        Ok(path)
    }

    /// Remove a task (and its sidecars) from a terminal queue. Live queues are refused.
    pub fn delete(&self, queue: Queue, id: &TaskId) -> Result<bool> {
        if !queue.is_terminal() {
            bail!("refusing to delete {id} from live queue {queue}");
        }
        let _ = fs::remove_file(self.sidecar_path(queue, id, "error"));
        let path = self.path(queue, id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err).with_context(|| format!("delete {}", path.display())),
        }
    }

    fn write_temp(&self, queue: Queue, task: &Task) -> Result<PathBuf> {
        let dir = self.paths.queue_dir(queue);
        fs::create_dir_all(&dir).with_context(|| format!("create directory {}", dir.display()))?;
        let tmp = dir.join(format!(".{}.{}.tmp", task.id, std::process::id()));
        write_file(&tmp, &task.doc.render())?;
        Ok(tmp)
    }
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    let mut file =
        fs::File::create(path).with_context(|| format!("create {}", path.display()))?;
    file.write_all(contents.as_bytes())
        .with_context(|| format!("write {}", path.display()))?;
    file.sync_all()
        .with_context(|| format!("sync {}", path.display()))?;
    Ok(())
}
