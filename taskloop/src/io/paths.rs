//! Vault layout and `taskloop init` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info};

use super::config::{VaultConfig, write_config};
use super::memory::MEMORY_HEADER;
use crate::core::types::Queue;

pub const CONFIG_FILE: &str = "taskloop.toml";

/// All canonical paths of a vault rooted at `root`.
#[derive(Debug, Clone)]
pub struct VaultPaths {
    pub root: PathBuf,
    pub logs_dir: PathBuf,
    pub memory_dir: PathBuf,
    pub attachments_dir: PathBuf,
    pub signals_dir: PathBuf,
    pub decisions_path: PathBuf,
    pub config_path: PathBuf,
}

impl VaultPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let memory_dir = root.join("Memory");
        Self {
            logs_dir: root.join("Logs"),
            attachments_dir: memory_dir.join("attachments"),
            decisions_path: memory_dir.join("decisions.md"),
            signals_dir: root.join("Signals"),
            config_path: root.join(CONFIG_FILE),
            memory_dir,
            root,
        }
    }

    pub fn queue_dir(&self, queue: Queue) -> PathBuf {
        self.root.join(queue.dir_name())
    }

    /// Per-service child output log written by the supervisor.
    pub fn service_log(&self, service: &str) -> PathBuf {
        self.logs_dir.join(format!("{service}.log"))
    }

    /// Create every queue and support directory that is missing.
    pub fn ensure_layout(&self) -> Result<()> {
        for queue in Queue::ALL {
            create_dir(&self.queue_dir(queue))?;
        }
        create_dir(&self.logs_dir)?;
        create_dir(&self.attachments_dir)?;
        create_dir(&self.signals_dir)?;
        Ok(())
    }
}

/// Options for [`init_vault`].
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// Overwrite an existing `taskloop.toml` with defaults.
    pub force: bool,
}

/// Create the vault layout in `root`.
///
/// Queue contents are never touched. Fails if `taskloop.toml` already exists
/// unless `options.force` is set.
pub fn init_vault(root: &Path, options: &InitOptions) -> Result<VaultPaths> {
    let paths = VaultPaths::new(root);
    if paths.config_path.exists() && !options.force {
        return Err(anyhow!(
            "taskloop init: {} already exists (use --force to overwrite)",
            paths.config_path.display()
        ));
    }
    paths.ensure_layout()?;
    write_config(&paths.config_path, &VaultConfig::default())?;
    if !paths.decisions_path.exists() {
        fs::write(&paths.decisions_path, MEMORY_HEADER)
            .with_context(|| format!("write {}", paths.decisions_path.display()))?;
    }
    info!(root = %root.display(), "vault initialized");
    Ok(paths)
}

fn create_dir(path: &Path) -> Result<()> {
    debug!(path = %path.display(), "ensure directory");
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}
