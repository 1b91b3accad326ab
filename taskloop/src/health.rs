//! Periodic health checks over the vault.
//!
//! Each check is pass/fail with a short detail. Any failure makes the report
//! `DEGRADED`. A report is written to the audit log (one `check_<name>` line
//! per check) and as a `health_check` signal.

use std::path::Path;
use std::time::{Duration, SystemTime};

use anyhow::Result;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::core::types::Queue;
use crate::decide::list_pending;
use crate::io::audit::{RESULT_ERROR, RESULT_OK, RESULT_WARN};
use crate::io::clock;
use crate::io::signals::events;
use crate::shutdown::StopSignal;
use crate::sync;
use crate::vault::Vault;

pub const SKILL: &str = "health";
pub const HEALTHY: &str = "HEALTHY";
pub const DEGRADED: &str = "DEGRADED";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthCheck {
    pub name: &'static str,
    pub ok: bool,
    pub detail: String,
}

impl HealthCheck {
    fn new(name: &'static str, ok: bool, detail: impl Into<String>) -> Self {
        Self {
            name,
            ok,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub timestamp: String,
    pub overall: &'static str,
    pub checks: Vec<HealthCheck>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.overall == HEALTHY
    }

    pub fn failures(&self) -> impl Iterator<Item = &HealthCheck> {
        self.checks.iter().filter(|c| !c.ok)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueCount {
    pub queue: &'static str,
    pub count: usize,
}

/// Task count per queue, in pipeline order.
pub fn queue_counts(vault: &Vault) -> Result<Vec<QueueCount>> {
    Queue::ALL
        .into_iter()
        .map(|queue| {
            Ok(QueueCount {
                queue: queue.dir_name(),
                count: vault.store.list(queue)?.len(),
            })
        })
        .collect()
}

/// Run every check, then record the report. Checks only read the vault;
/// the audit recency check runs before this report writes its own lines.
#[instrument(skip_all)]
pub fn check(vault: &Vault) -> Result<HealthReport> {
    let mut checks = vec![
        audit_recency(vault),
        stale_approvals(vault),
        failed_tasks(vault),
        last_sync(vault),
        activity(vault),
    ];
    if let Some(disk) = disk_free(&vault.paths.root, vault.config.health.min_disk_free_pct) {
        checks.push(disk);
    }
    let overall = if checks.iter().all(|c| c.ok) {
        HEALTHY
    } else {
        DEGRADED
    };
    let report = HealthReport {
        timestamp: clock::timestamp(),
        overall,
        checks,
    };
    record(vault, &report)?;
    Ok(report)
}

fn record(vault: &Vault, report: &HealthReport) -> Result<()> {
    for c in &report.checks {
        let result = if c.ok { RESULT_OK } else { RESULT_WARN };
        vault
            .audit
            .log(SKILL, &format!("check_{}", c.name), result, None, &c.detail)?;
    }
    let failing: Vec<&str> = report.failures().map(|c| c.name).collect();
    let detail = if failing.is_empty() {
        format!("{} checks passed", report.checks.len())
    } else {
        format!("failing: {}", failing.join(", "))
    };
    vault
        .signals
        .write(events::HEALTH_CHECK, None, &format!("{}: {detail}", report.overall))?;
    vault
        .audit
        .log(SKILL, "health_check", report.overall, None, &detail)?;
    if report.is_healthy() {
        info!(overall = report.overall, "health check");
    } else {
        warn!(overall = report.overall, %detail, "health check");
    }
    Ok(())
}

fn audit_recency(vault: &Vault) -> HealthCheck {
    let limit = vault.config.health.audit_stale_mins;
    let Some(written) = vault.audit.last_write(clock::today()) else {
        return HealthCheck::new("audit_log", false, "no audit log today");
    };
    let age = SystemTime::now()
        .duration_since(written)
        .unwrap_or(Duration::ZERO);
    let mins = age.as_secs_f64() / 60.0;
    HealthCheck::new(
        "audit_log",
        mins <= limit as f64,
        format!("last write {mins:.1}min ago"),
    )
}

fn stale_approvals(vault: &Vault) -> HealthCheck {
    let limit = vault.config.health.pending_warn_hours as f64;
    let pending = match list_pending(vault) {
        Ok(pending) => pending,
        Err(err) => return HealthCheck::new("pending_age", false, format!("{err:#}")),
    };
    let stale: Vec<String> = pending
        .iter()
        .filter(|p| p.age_hours > limit)
        .map(|p| format!("{} ({:.0}h)", p.id, p.age_hours))
        .collect();
    if stale.is_empty() {
        return HealthCheck::new(
            "pending_age",
            true,
            format!("{} waiting, none stale", pending.len()),
        );
    }
    let shown: Vec<&str> = stale.iter().take(3).map(String::as_str).collect();
    HealthCheck::new(
        "pending_age",
        false,
        format!("{} stale approvals: {}", stale.len(), shown.join(", ")),
    )
}

fn failed_tasks(vault: &Vault) -> HealthCheck {
    match vault.store.list(Queue::Failed) {
        Ok(ids) if ids.is_empty() => HealthCheck::new("failed", true, "none"),
        Ok(ids) => HealthCheck::new("failed", false, format!("{} failed tasks", ids.len())),
        Err(err) => HealthCheck::new("failed", false, format!("{err:#}")),
    }
}

fn last_sync(vault: &Vault) -> HealthCheck {
    match vault
        .audit
        .last_entry(clock::today(), sync::SKILL, sync::CYCLE_ACTION)
    {
        Ok(None) => HealthCheck::new("sync", true, "no sync today"),
        Ok(Some(entry)) => HealthCheck::new(
            "sync",
            entry.result != RESULT_ERROR,
            format!("{} at {}: {}", entry.result, entry.timestamp, entry.detail),
        ),
        Err(err) => HealthCheck::new("sync", false, format!("{err:#}")),
    }
}

/// Today's marker counts; informational only.
fn activity(vault: &Vault) -> HealthCheck {
    match vault.audit.summary(clock::today()) {
        Ok(s) => HealthCheck::new(
            "activity",
            true,
            format!(
                "{} lines, {} errors, {} retries, {} needs_human",
                s.total, s.errors, s.retries, s.needs_human
            ),
        ),
        Err(err) => HealthCheck::new("activity", false, format!("{err:#}")),
    }
}

#[cfg(unix)]
fn disk_free(path: &Path, min_pct: f64) -> Option<HealthCheck> {
    use nix::sys::statvfs::statvfs;

    let check = match statvfs(path) {
        Ok(stat) => {
            let block = u64::from(stat.fragment_size());
            let total = u64::from(stat.blocks()).saturating_mul(block);
            let free = u64::from(stat.blocks_available()).saturating_mul(block);
            if total == 0 {
                HealthCheck::new("disk", true, "size unknown")
            } else {
                let pct = free as f64 * 100.0 / total as f64;
                HealthCheck::new(
                    "disk",
                    pct >= min_pct,
                    format!("{pct:.1}% free ({}GB)", free / (1024 * 1024 * 1024)),
                )
            }
        }
        Err(err) => HealthCheck::new("disk", false, format!("statvfs {}: {err}", path.display())),
    };
    Some(check)
}

#[cfg(not(unix))]
fn disk_free(_path: &Path, _min_pct: f64) -> Option<HealthCheck> {
    None
}

/// Check every `health.interval_secs` until `stop` trips.
pub fn run_health_loop(vault: &Vault, stop: &StopSignal) -> Result<()> {
    let interval = Duration::from_secs(vault.config.health.interval_secs);
    while !stop.is_stopped() {
        if let Err(err) = check(vault) {
            warn!(err = %format!("{err:#}"), "health check errored");
        }
        if stop.sleep(interval) {
            break;
        }
    }
    Ok(())
}
