//! Vault context: the task store plus the logs every component writes to.

use std::path::Path;

use anyhow::Result;
use tracing::warn;

use crate::core::notes::Note;
use crate::core::types::{Queue, TaskId};
use crate::io::audit::{AuditLog, RESULT_WARN};
use crate::io::claim::{Claim, ClaimedTask, UnreadableTask, claim};
use crate::io::clock;
use crate::io::config::{VaultConfig, load_config};
use crate::io::memory::MemoryLog;
use crate::io::paths::VaultPaths;
use crate::io::signals::{SignalBox, events};
use crate::io::task_store::{Task, TaskStore};

#[derive(Debug, Clone)]
pub struct Vault {
    pub paths: VaultPaths,
    pub config: VaultConfig,
    pub store: TaskStore,
    pub audit: AuditLog,
    pub memory: MemoryLog,
    pub signals: SignalBox,
}

impl Vault {
    /// Load `taskloop.toml` (defaults if missing) and make sure the layout exists.
    pub fn open(root: &Path) -> Result<Self> {
        let paths = VaultPaths::new(root);
        let config = load_config(&paths.config_path)?;
        Self::with_config(root, config)
    }

    pub fn with_config(root: &Path, config: VaultConfig) -> Result<Self> {
        config.validate()?;
        let paths = VaultPaths::new(root);
        paths.ensure_layout()?;
        Ok(Self {
            store: TaskStore::new(paths.clone()),
            audit: AuditLog::new(&paths.logs_dir),
            memory: MemoryLog::new(&paths.decisions_path),
            signals: SignalBox::new(&paths.signals_dir),
            config,
            paths,
        })
    }

    /// Claim a task and record any status drift found on it.
    ///
    /// A claimed file that cannot be read ends in Failed; the failure is
    /// audited, remembered and signalled before the error is returned.
    pub fn claim(&self, skill: &str, id: &TaskId, from: Queue) -> Result<Claim> {
        let claim = match claim(&self.store, id, from) {
            Ok(claim) => claim,
            Err(err) => {
                if err.downcast_ref::<UnreadableTask>().is_some() {
                    self.audit.error(skill, "unreadable_task", Some(id.as_str()), &err)?;
                    self.memory
                        .append(id.as_str(), &format!("ERROR in {skill}: {err:#}"))?;
                    self.signals
                        .write(events::TASK_FAILED, Some(id.as_str()), &format!("{err:#}"))?;
                }
                return Err(err);
            }
        };
        if let Claim::Claimed(claimed) = &claim
            && let Some(drift) = claimed.drift()
        {
            self.audit
                .log(skill, "status_drift", RESULT_WARN, Some(id.as_str()), drift)?;
        }
        Ok(claim)
    }

    /// Move an owned task to Failed after an unexpected processing error.
    ///
    /// The error is appended to the document so the failure stays visible.
    pub fn fail_claimed(
        &self,
        skill: &str,
        mut claimed: ClaimedTask,
        err: &anyhow::Error,
    ) -> Result<Task> {
        let id = claimed.id().clone();
        warn!(id = %id, err = %format!("{err:#}"), "processing error, moving task to Failed");
        let note = Note::new("Processing Error", "Failed At", &clock::timestamp())
            .field("Component", skill)
            .field("Error", format!("{err:#}"))
            .render()?;
        claimed.doc_mut().append_section(&note);
        let task = claimed.release(&self.store, Queue::Failed)?;
        self.audit.error(skill, "processing_error", Some(id.as_str()), err)?;
        self.memory
            .append(id.as_str(), &format!("ERROR in {skill}: {err:#}"))?;
        self.signals
            .write(events::TASK_FAILED, Some(id.as_str()), &format!("{err:#}"))?;
        Ok(task)
    }
}
