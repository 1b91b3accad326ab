//! Test-only helpers: throwaway vaults and scripted collaborators.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::rc::Rc;

use anyhow::{Result, anyhow};
use tempfile::TempDir;

use crate::core::types::{Queue, TaskId};
use crate::execute::{ActContext, ActResult, Actor, Integration, Receipt};
use crate::io::audit::AuditEntry;
use crate::io::clock;
use crate::io::config::VaultConfig;
use crate::sync::SyncRemote;
use crate::vault::Vault;

/// A vault in a temporary directory, removed on drop.
pub struct TestVault {
    pub vault: Vault,
    _dir: TempDir,
}

impl TestVault {
    pub fn new() -> Self {
        Self::with_config(VaultConfig::default())
    }

    pub fn with_config(config: VaultConfig) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let vault = Vault::with_config(dir.path(), config).expect("open vault");
        Self { vault, _dir: dir }
    }

    pub fn root(&self) -> &Path {
        &self.vault.paths.root
    }

    /// Write `content` as task `name` straight into `queue`.
    pub fn add_task(&self, queue: Queue, name: &str, content: &str) -> TaskId {
        let id = TaskId::new(name).expect("valid task id");
        fs::write(self.vault.store.path(queue, &id), content).expect("write task");
        id
    }

    /// Today's audit entries in write order.
    pub fn audit_entries(&self) -> Vec<AuditEntry> {
        self.vault
            .audit
            .entries(clock::today())
            .expect("read audit log")
    }

    pub fn memory_text(&self) -> String {
        fs::read_to_string(&self.vault.paths.decisions_path).unwrap_or_default()
    }
}

impl Default for TestVault {
    fn default() -> Self {
        Self::new()
    }
}

/// Plays back canned results, then succeeds. Records every step it saw.
#[derive(Debug, Default)]
pub struct ScriptedActor {
    script: VecDeque<ActResult>,
    steps: Vec<String>,
}

impl ScriptedActor {
    pub fn new(script: Vec<ActResult>) -> Self {
        Self {
            script: script.into(),
            steps: Vec::new(),
        }
    }

    pub fn always_success() -> Self {
        Self::default()
    }

    pub fn steps(&self) -> &[String] {
        &self.steps
    }
}

impl Actor for ScriptedActor {
    fn act(&mut self, _ctx: &ActContext<'_>, step: &str) -> ActResult {
        self.steps.push(step.to_string());
        self.script
            .pop_front()
            .unwrap_or_else(|| ActResult::success(format!("done: {step}")))
    }
}

/// Integration that fails a fixed number of times before accepting.
pub struct FakeIntegration {
    name: String,
    failures_left: u32,
    calls: Rc<RefCell<Vec<String>>>,
}

impl FakeIntegration {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            failures_left: 0,
            calls: Rc::default(),
        }
    }

    pub fn failing_times(mut self, n: u32) -> Self {
        self.failures_left = n;
        self
    }

    /// Shared view of every posted content, failed attempts included.
    pub fn calls(&self) -> Rc<RefCell<Vec<String>>> {
        Rc::clone(&self.calls)
    }
}

impl Integration for FakeIntegration {
    fn name(&self) -> &str {
        &self.name
    }

    fn post(&mut self, content: &str) -> Result<Receipt> {
        let mut calls = self.calls.borrow_mut();
        calls.push(content.to_string());
        if self.failures_left > 0 {
            self.failures_left -= 1;
            return Err(anyhow!("{} unavailable", self.name));
        }
        Ok(Receipt {
            id: Some(format!("{}-{}", self.name, calls.len())),
        })
    }
}

/// In-memory remote with configurable transient failures.
#[derive(Debug, Default)]
pub struct FakeSyncRemote {
    pub changes: bool,
    pub pull_failures: u32,
    pub push_failures: u32,
    pub pulls: u32,
    pub publish_attempts: u32,
    pub published: Vec<String>,
}

impl SyncRemote for FakeSyncRemote {
    fn pull(&mut self) -> Result<()> {
        self.pulls += 1;
        if self.pull_failures > 0 {
            self.pull_failures -= 1;
            return Err(anyhow!("could not resolve host"));
        }
        Ok(())
    }

    fn has_changes(&mut self) -> Result<bool> {
        Ok(self.changes)
    }

    fn publish(&mut self, message: &str) -> Result<u32> {
        self.publish_attempts += 1;
        if self.push_failures > 0 {
            self.push_failures -= 1;
            return Err(anyhow!("push rejected"));
        }
        self.published.push(message.to_string());
        self.changes = false;
        Ok(1)
    }
}
