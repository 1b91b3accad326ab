//! Vault configuration stored in `taskloop.toml` at the vault root.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::approval::ApprovalPolicy;
use crate::retry::RetryPolicy;

/// Vault configuration (TOML).
///
/// Intended to be edited by humans. Missing fields take the defaults below.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VaultConfig {
    pub execution: ExecutionConfig,
    pub tasks: TaskConfig,
    /// Retry policy for integration calls made by the execution loop.
    pub retry: RetryPolicy,
    pub approval: ApprovalPolicy,
    pub watch: WatchConfig,
    pub supervisor: SupervisorConfig,
    pub sync: SyncConfig,
    pub health: HealthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Iteration ceiling of one execution loop run.
    pub max_iterations: u32,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self { max_iterations: 10 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TaskConfig {
    /// Retries after which `retry` moves a task to Failed.
    pub max_retries: u32,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self { max_retries: 3 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WatchConfig {
    /// Poll interval for the triage, executor and drop-folder watchers.
    pub poll_secs: u64,
    /// Poll interval for the autonomous reviewer.
    pub review_poll_secs: u64,
    /// Folder watched for dropped files; relative paths resolve against the vault.
    pub drop_folder: Option<PathBuf>,
    /// File extensions (without dot) accepted from the drop folder; empty accepts all.
    pub drop_extensions: Vec<String>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_secs: 5,
            review_poll_secs: 30,
            drop_folder: None,
            drop_extensions: ["md", "txt", "pdf", "csv", "json", "png", "jpg"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl WatchConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_secs)
    }

    pub fn review_interval(&self) -> Duration {
        Duration::from_secs(self.review_poll_secs)
    }
}

/// One long-running child owned by the supervisor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceConfig {
    pub name: String,
    /// Program followed by its arguments.
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SupervisorConfig {
    pub poll_secs: u64,
    pub restart_delay_secs: u64,
    /// Grace period between SIGTERM and kill on shutdown.
    pub grace_secs: u64,
    /// How often signal files are folded into the audit log.
    pub signal_merge_secs: u64,
    /// Stop restarting a service after this many restarts. Unset means never.
    pub max_restarts: Option<u32>,
    pub services: Vec<ServiceConfig>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_secs: 5,
            restart_delay_secs: 10,
            grace_secs: 5,
            signal_merge_secs: 60,
            max_restarts: None,
            services: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    pub interval_secs: u64,
    pub remote: String,
    pub branch: String,
    /// Paths staged before each sync commit, relative to the vault root.
    pub stage_paths: Vec<String>,
    pub author_name: String,
    pub author_email: String,
    pub command_timeout_secs: u64,
    pub retry: RetryPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            remote: "origin".to_string(),
            branch: "main".to_string(),
            stage_paths: vec![".".to_string()],
            author_name: "taskloop".to_string(),
            author_email: "taskloop@localhost".to_string(),
            command_timeout_secs: 60,
            retry: RetryPolicy {
                max_attempts: 3,
                initial_delay_ms: 10_000,
                backoff_multiplier: 1,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HealthConfig {
    pub interval_secs: u64,
    /// The audit log must have been written within this many minutes.
    pub audit_stale_mins: u64,
    /// Approvals waiting longer than this are reported.
    pub pending_warn_hours: u64,
    /// Minimum free disk space, in percent of the vault's filesystem.
    pub min_disk_free_pct: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            audit_stale_mins: 10,
            pending_warn_hours: 24,
            min_disk_free_pct: 20.0,
        }
    }
}

impl VaultConfig {
    pub fn validate(&self) -> Result<()> {
        if self.execution.max_iterations == 0 {
            return Err(anyhow!("execution.max_iterations must be > 0"));
        }
        if self.tasks.max_retries == 0 {
            return Err(anyhow!("tasks.max_retries must be > 0"));
        }
        self.retry.validate().context("retry")?;
        if !(0.0..=1.0).contains(&self.approval.min_low_confidence) {
            return Err(anyhow!("approval.min_low_confidence must be within 0.0..=1.0"));
        }
        if self.watch.poll_secs == 0 || self.watch.review_poll_secs == 0 {
            return Err(anyhow!("watch poll intervals must be > 0"));
        }
        let sup = &self.supervisor;
        if sup.poll_secs == 0 || sup.signal_merge_secs == 0 {
            return Err(anyhow!("supervisor poll intervals must be > 0"));
        }
        for service in &sup.services {
            if service.name.trim().is_empty() {
                return Err(anyhow!("supervisor.services entries need a name"));
            }
            if service.command.is_empty() || service.command[0].trim().is_empty() {
                return Err(anyhow!(
                    "supervisor service '{}' must have a non-empty command",
                    service.name
                ));
            }
        }
        if self.sync.interval_secs == 0 || self.sync.command_timeout_secs == 0 {
            return Err(anyhow!("sync intervals must be > 0"));
        }
        if self.sync.remote.trim().is_empty() || self.sync.branch.trim().is_empty() {
            return Err(anyhow!("sync.remote and sync.branch must be set"));
        }
        self.sync.retry.validate().context("sync.retry")?;
        if self.health.interval_secs == 0 {
            return Err(anyhow!("health.interval_secs must be > 0"));
        }
        if !(0.0..=100.0).contains(&self.health.min_disk_free_pct) {
            return Err(anyhow!("health.min_disk_free_pct must be within 0..=100"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `VaultConfig::default()`.
pub fn load_config(path: &Path) -> Result<VaultConfig> {
    if !path.exists() {
        let cfg = VaultConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: VaultConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &VaultConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, VaultConfig::default());
        assert_eq!(cfg.execution.max_iterations, 10);
        assert_eq!(cfg.supervisor.max_restarts, None);
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("taskloop.toml");
        let mut cfg = VaultConfig::default();
        cfg.supervisor.services.push(ServiceConfig {
            name: "triage".to_string(),
            command: vec!["taskloop".to_string(), "triage".to_string(), "--watch".to_string()],
        });
        cfg.watch.drop_folder = Some(PathBuf::from("Drop"));
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("taskloop.toml");
        fs::write(
            &path,
            "[approval]\nauto_approve_medium = true\n\n[sync]\nbranch = \"vault\"\n",
        )
        .expect("write");
        let cfg = load_config(&path).expect("load");
        assert!(cfg.approval.auto_approve_medium);
        assert_eq!(cfg.approval.trusted_sources.len(), 3);
        assert_eq!(cfg.sync.branch, "vault");
        assert_eq!(cfg.sync.remote, "origin");
    }

    #[test]
    fn rejects_service_without_command() {
        let mut cfg = VaultConfig::default();
        cfg.supervisor.services.push(ServiceConfig {
            name: "broken".to_string(),
            command: Vec::new(),
        });
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let mut cfg = VaultConfig::default();
        cfg.approval.min_low_confidence = 1.5;
        assert!(cfg.validate().is_err());
    }
}
