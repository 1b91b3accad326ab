//! Signal files: small cross-process notifications under `Signals/`.
//!
//! Writers drop `SIGNAL_<timestamp>_<event>.md` files; the supervisor drains
//! them into the audit log. Files are created exclusively so two writers in
//! the same second never overwrite each other.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use tracing::{debug, warn};

use super::clock;

const PREFIX: &str = "SIGNAL_";
const MAX_SUFFIX: u32 = 1000;

/// Events emitted by the pipeline.
pub mod events {
    pub const APPROVAL_NEEDED: &str = "approval_needed";
    pub const APPROVED: &str = "approved";
    pub const REJECTED: &str = "rejected";
    pub const NEEDS_HUMAN: &str = "needs_human";
    pub const TASK_FAILED: &str = "task_failed";
    pub const HEALTH_CHECK: &str = "health_check";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Signal {
    pub event: String,
    pub task_id: String,
    pub detail: String,
    pub timestamp: String,
}

impl Signal {
    fn render(&self) -> String {
        format!(
            "signal: {}\ntask_id: {}\ndetail: {}\ntimestamp: {}\n",
            self.event,
            self.task_id,
            self.detail.replace(['\r', '\n'], " "),
            self.timestamp
        )
    }

    fn parse(text: &str) -> Self {
        let mut signal = Signal {
            event: String::new(),
            task_id: String::new(),
            detail: String::new(),
            timestamp: String::new(),
        };
        for line in text.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim().to_string();
            match key.trim() {
                "signal" => signal.event = value,
                "task_id" => signal.task_id = value,
                "detail" => signal.detail = value,
                "timestamp" => signal.timestamp = value,
                _ => {}
            }
        }
        signal
    }
}

#[derive(Debug, Clone)]
pub struct SignalBox {
    dir: PathBuf,
}

impl SignalBox {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn write(&self, event: &str, task_id: Option<&str>, detail: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create directory {}", self.dir.display()))?;
        let signal = Signal {
            event: event.to_string(),
            task_id: task_id.unwrap_or("").to_string(),
            detail: detail.to_string(),
            timestamp: clock::timestamp(),
        };
        let stamp = clock::now().format("%Y%m%d_%H%M%S");
        for n in 0..MAX_SUFFIX {
            let name = if n == 0 {
                format!("{PREFIX}{stamp}_{event}.md")
            } else {
                format!("{PREFIX}{stamp}_{event}_{n}.md")
            };
            let path = self.dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(signal.render().as_bytes())
                        .with_context(|| format!("write {}", path.display()))?;
                    debug!(event, path = %path.display(), "signal written");
                    return Ok(path);
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
                Err(err) => {
                    return Err(err).with_context(|| format!("create {}", path.display()));
                }
            }
        }
        Err(anyhow!("too many '{event}' signals in one second"))
    }

    fn signal_files(&self) -> Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err).with_context(|| format!("list {}", self.dir.display())),
        };
        let mut files: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(PREFIX) && n.ends_with(".md"))
            })
            .collect();
        files.sort();
        Ok(files)
    }

    /// Pending signals, oldest first, without consuming them.
    pub fn pending(&self) -> Result<Vec<Signal>> {
        let mut signals = Vec::new();
        for path in self.signal_files()? {
            let text =
                fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
            signals.push(Signal::parse(&text));
        }
        Ok(signals)
    }

    /// Read and remove all pending signals, oldest first.
    ///
    /// A file that disappears mid-drain was consumed by another drainer.
    pub fn drain(&self) -> Result<Vec<Signal>> {
        let mut signals = Vec::new();
        for path in self.signal_files()? {
            let text = match fs::read_to_string(&path) {
                Ok(text) => text,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(err).with_context(|| format!("read {}", path.display())),
            };
            match fs::remove_file(&path) {
                Ok(()) => signals.push(Signal::parse(&text)),
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(path = %path.display(), err = %err, "failed to remove signal");
                }
            }
        }
        Ok(signals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_second_signals_get_distinct_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let signals = SignalBox::new(temp.path().join("Signals"));
        let a = signals
            .write(events::APPROVAL_NEEDED, Some("a.md"), "high risk")
            .unwrap();
        let b = signals
            .write(events::APPROVAL_NEEDED, Some("b.md"), "high risk")
            .unwrap();
        assert_ne!(a, b);
        assert_eq!(signals.pending().unwrap().len(), 2);
    }

    #[test]
    fn drain_consumes_in_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        let signals = SignalBox::new(temp.path());
        signals.write(events::REJECTED, Some("a.md"), "no\nthanks").unwrap();
        fs::write(temp.path().join("README.md"), "not a signal").unwrap();
        let drained = signals.drain().unwrap();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].event, "rejected");
        assert_eq!(drained[0].task_id, "a.md");
        assert_eq!(drained[0].detail, "no thanks");
        assert!(signals.drain().unwrap().is_empty());
        assert!(temp.path().join("README.md").exists());
    }
}
