//! Drop-folder watcher: turn files dropped into a folder into Inbox tasks.
//!
//! The file itself is moved under `Memory/attachments/` and the task points
//! at it. Names already taken in the Inbox or the attachments folder get a
//! timestamp suffix.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use super::{SeenSet, Watcher};
use crate::core::document::{Metadata, TaskDocument};
use crate::core::types::{Queue, TaskId};
use crate::io::audit::RESULT_OK;
use crate::io::clock;
use crate::io::task_store::Task;
use crate::vault::Vault;

pub const SKILL: &str = "drop_folder";

pub struct DropFolderWatcher<'a> {
    vault: &'a Vault,
    folder: PathBuf,
    extensions: Vec<String>,
    seen: SeenSet<String>,
}

impl<'a> DropFolderWatcher<'a> {
    /// Watch `folder`; a relative path resolves against the vault root.
    pub fn new(vault: &'a Vault, folder: &Path) -> Self {
        let folder = if folder.is_relative() {
            vault.paths.root.join(folder)
        } else {
            folder.to_path_buf()
        };
        Self {
            vault,
            folder,
            extensions: vault
                .config
                .watch
                .drop_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            seen: SeenSet::new(),
        }
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    fn accepts(&self, name: &str) -> bool {
        if name.starts_with('.') {
            return false;
        }
        if self.extensions.is_empty() {
            return true;
        }
        Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| self.extensions.contains(&e.to_ascii_lowercase()))
    }

    fn list_files(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.folder) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(folder = %self.folder.display(), "drop folder missing");
                return Ok(Vec::new());
            }
            Err(err) => {
                return Err(err).with_context(|| format!("list {}", self.folder.display()));
            }
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.with_context(|| format!("read entry in {}", self.folder.display()))?;
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            if let Some(name) = entry.file_name().to_str()
                && self.accepts(name)
            {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

impl Watcher for DropFolderWatcher<'_> {
    type Item = String;

    fn name(&self) -> &str {
        SKILL
    }

    fn poll(&mut self) -> Vec<String> {
        match self.list_files() {
            Ok(names) => self.seen.fresh(&names),
            Err(err) => {
                warn!(err = %format!("{err:#}"), "drop folder listing failed");
                Vec::new()
            }
        }
    }

    fn process(&mut self, item: &String) -> Result<()> {
        ingest_file(self.vault, &self.folder.join(item))?;
        Ok(())
    }

    fn on_error(&mut self, item: &String, err: &anyhow::Error) {
        warn!(file = %item, err = %format!("{err:#}"), "ingest failed");
        self.seen.forget(item);
    }
}

/// Move `source` into the attachments folder and create an Inbox task for it.
///
/// Returns `None` if the file vanished before it could be taken.
#[instrument(skip_all, fields(file = %source.display()))]
pub fn ingest_file(vault: &Vault, source: &Path) -> Result<Option<TaskId>> {
    let name = source
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("unusable file name {}", source.display()))?
        .to_string();
    let stem = Path::new(&name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(&name)
        .to_string();
    let size = match fs::metadata(source) {
        Ok(meta) => meta.len(),
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err).with_context(|| format!("stat {}", source.display())),
    };

    let stamp = clock::now().format("%Y%m%d_%H%M%S").to_string();
    let attachments = &vault.paths.attachments_dir;
    fs::create_dir_all(attachments)
        .with_context(|| format!("create directory {}", attachments.display()))?;
    let mut stored = attachments.join(&name);
    if stored.exists() {
        stored = attachments.join(format!("{stamp}_{name}"));
    }
    if !move_file(source, &stored)? {
        return Ok(None);
    }
    let relative = stored
        .strip_prefix(&vault.paths.root)
        .unwrap_or(&stored)
        .display()
        .to_string();

    let mut meta = Metadata::new();
    meta.set("received_at", clock::timestamp());
    meta.set("source", SKILL);
    meta.set("type", "file");
    meta.set("original_name", &name);
    meta.set("attachment", &relative);
    meta.set("retries", "0");
    meta.set("status", Queue::Inbox.resting_status().as_str());
    let body = format!(
        "A new file arrived in the drop folder.\n\n**File:** {name}\n**Size:** {size} bytes\n**Stored At:** {relative}\n\n## Steps\n- review the attached file\n"
    );
    let doc = TaskDocument::new(format!("New file: {name}"), meta, body);

    let mut id = TaskId::sanitized("FILE_", &stem)?;
    let taken = |id: &TaskId| Queue::ALL.into_iter().any(|q| vault.store.exists(q, id));
    if taken(&id) {
        id = TaskId::sanitized("FILE_", &format!("{stem}_{stamp}"))?;
    }
    vault.store.create(Queue::Inbox, &Task::new(id.clone(), doc))?;
    vault.audit.log(
        SKILL,
        "ingest_file",
        RESULT_OK,
        Some(id.as_str()),
        &format!("{name} ({size} bytes) -> {relative}"),
    )?;
    info!(id = %id, "file ingested");
    Ok(Some(id))
}

/// Rename, falling back to copy + remove across filesystems.
fn move_file(from: &Path, to: &Path) -> Result<bool> {
    match fs::rename(from, to) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(_) => {
            fs::copy(from, to)
                .with_context(|| format!("copy {} -> {}", from.display(), to.display()))?;
            fs::remove_file(from).with_context(|| format!("remove {}", from.display()))?;
            Ok(true)
        }
    }
}
