//! Append-only audit log, one file per calendar day under `Logs/`.
//!
//! Line format:
//!
//! ```text
//! [2026-01-05 09:30:00] | triage                 | classify_and_route           | OK         |     12ms | TASK.md | detail
//! ```
//!
//! Health checks and dashboards scan lines for the markers `ERROR`, `retry`
//! and `needs_human`, so those strings must survive formatting unchanged.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::PathBuf;
use std::time::{Instant, SystemTime};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Serialize;
use tracing::debug;

use super::clock;

pub const RESULT_OK: &str = "OK";
pub const RESULT_ERROR: &str = "ERROR";
pub const RESULT_SKIPPED: &str = "SKIPPED";
pub const RESULT_WARN: &str = "WARN";

const ERROR_DETAIL_LIMIT: usize = 120;

/// One immutable audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEntry {
    pub timestamp: String,
    pub skill: String,
    pub action: String,
    pub result: String,
    pub duration_ms: u64,
    pub task_id: String,
    pub detail: String,
}

impl AuditEntry {
    pub fn new(skill: &str, action: &str, result: &str) -> Self {
        Self {
            timestamp: clock::timestamp(),
            skill: skill.to_string(),
            action: action.to_string(),
            result: result.to_string(),
            duration_ms: 0,
            task_id: String::new(),
            detail: String::new(),
        }
    }

    pub fn task(mut self, task_id: impl ToString) -> Self {
        self.task_id = task_id.to_string();
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    pub fn duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn to_line(&self) -> String {
        let task = if self.task_id.is_empty() {
            "-".to_string()
        } else {
            field(&self.task_id)
        };
        format!(
            "[{}] | {:<22} | {:<28} | {:<10} | {:>6}ms | {} | {}",
            self.timestamp,
            field(&self.skill),
            field(&self.action),
            field(&self.result),
            self.duration_ms,
            task,
            single_line(&self.detail),
        )
    }

    /// Parse a line produced by [`AuditEntry::to_line`].
    pub fn parse_line(line: &str) -> Option<Self> {
        let rest = line.strip_prefix('[')?;
        let (timestamp, rest) = rest.split_once("] | ")?;
        let mut parts = rest.splitn(6, " | ");
        let skill = parts.next()?.trim().to_string();
        let action = parts.next()?.trim().to_string();
        let result = parts.next()?.trim().to_string();
        let duration_ms = parts.next()?.trim().strip_suffix("ms")?.trim().parse().ok()?;
        let task_id = match parts.next()?.trim() {
            "-" => String::new(),
            other => other.to_string(),
        };
        let detail = parts.next().unwrap_or("").trim().to_string();
        Some(Self {
            timestamp: timestamp.to_string(),
            skill,
            action,
            result,
            duration_ms,
            task_id,
            detail,
        })
    }
}

fn single_line(value: &str) -> String {
    value.replace(['\r', '\n'], " ").trim().to_string()
}

fn field(value: &str) -> String {
    single_line(value).replace('|', "/")
}

fn truncate_chars(value: &str, limit: usize) -> String {
    value.chars().take(limit).collect()
}

/// Marker counts for one day of audit lines.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuditSummary {
    pub total: usize,
    pub errors: usize,
    pub retries: usize,
    pub needs_human: usize,
}

#[derive(Debug, Clone)]
pub struct AuditLog {
    dir: PathBuf,
}

impl AuditLog {
    pub fn new(logs_dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: logs_dir.into(),
        }
    }

    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir
            .join(format!("{}_audit.log", date.format("%Y-%m-%d")))
    }

    /// Append one line. Each record is a single `write_all` on an append handle.
    pub fn record(&self, entry: &AuditEntry) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create directory {}", self.dir.display()))?;
        let path = self.path_for(clock::today());
        let mut line = entry.to_line();
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open {}", path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("append {}", path.display()))?;
        debug!(skill = %entry.skill, action = %entry.action, result = %entry.result, "audit");
        Ok(())
    }

    pub fn log(
        &self,
        skill: &str,
        action: &str,
        result: &str,
        task_id: Option<&str>,
        detail: &str,
    ) -> Result<()> {
        let mut entry = AuditEntry::new(skill, action, result).detail(detail);
        if let Some(task_id) = task_id {
            entry = entry.task(task_id);
        }
        self.record(&entry)
    }

    /// Record a failure with its error chain cut to a readable length.
    pub fn error(
        &self,
        skill: &str,
        action: &str,
        task_id: Option<&str>,
        err: &anyhow::Error,
    ) -> Result<()> {
        let detail = truncate_chars(&format!("{err:#}"), ERROR_DETAIL_LIMIT);
        self.log(skill, action, RESULT_ERROR, task_id, &detail)
    }

    /// Start timing an action; finish the span to write its line.
    pub fn span(&self, skill: &str, action: &str, task_id: impl ToString) -> AuditSpan<'_> {
        AuditSpan {
            log: self,
            skill: skill.to_string(),
            action: action.to_string(),
            task_id: task_id.to_string(),
            started: Instant::now(),
        }
    }

    fn read_day(&self, date: NaiveDate) -> Result<String> {
        let path = self.path_for(date);
        match fs::read_to_string(&path) {
            Ok(text) => Ok(text),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(String::new()),
            Err(err) => Err(err).with_context(|| format!("read {}", path.display())),
        }
    }

    pub fn entries(&self, date: NaiveDate) -> Result<Vec<AuditEntry>> {
        Ok(self
            .read_day(date)?
            .lines()
            .filter_map(AuditEntry::parse_line)
            .collect())
    }

    /// Count marker substrings the way external dashboards do.
    pub fn summary(&self, date: NaiveDate) -> Result<AuditSummary> {
        let mut summary = AuditSummary::default();
        for line in self.read_day(date)?.lines().filter(|l| !l.trim().is_empty()) {
            summary.total += 1;
            if line.contains(RESULT_ERROR) {
                summary.errors += 1;
            }
            if line.to_lowercase().contains("retry") {
                summary.retries += 1;
            }
            if line.contains("needs_human") {
                summary.needs_human += 1;
            }
        }
        Ok(summary)
    }

    /// Last modification time of the day's file, if it exists.
    pub fn last_write(&self, date: NaiveDate) -> Option<SystemTime> {
        fs::metadata(self.path_for(date))
            .and_then(|m| m.modified())
            .ok()
    }

    /// Most recent entry for `skill` whose action starts with `action_prefix`.
    pub fn last_entry(
        &self,
        date: NaiveDate,
        skill: &str,
        action_prefix: &str,
    ) -> Result<Option<AuditEntry>> {
        Ok(self
            .entries(date)?
            .into_iter()
            .rev()
            .find(|e| e.skill == skill && e.action.starts_with(action_prefix)))
    }
}

/// An in-flight timed action.
pub struct AuditSpan<'a> {
    log: &'a AuditLog,
    skill: String,
    action: String,
    task_id: String,
    started: Instant,
}

impl AuditSpan<'_> {
    pub fn finish(self, result: &str, detail: &str) -> Result<()> {
        let elapsed = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.log.record(
            &AuditEntry::new(&self.skill, &self.action, result)
                .task(self.task_id)
                .detail(detail)
                .duration_ms(elapsed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_round_trips() {
        let entry = AuditEntry::new("execution_loop", "act_step_1", "success")
            .task("TASK.md")
            .detail("posted | id=42")
            .duration_ms(17);
        let line = entry.to_line();
        assert!(line.contains("|     17ms |"));
        let parsed = AuditEntry::parse_line(&line).unwrap();
        assert_eq!(parsed, entry);
    }

    #[test]
    fn empty_task_renders_dash() {
        let entry = AuditEntry::new("supervisor", "start", RESULT_OK);
        let line = entry.to_line();
        assert!(line.contains("| - |"));
        assert_eq!(AuditEntry::parse_line(&line).unwrap().task_id, "");
    }

    #[test]
    fn records_append_and_summarize() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = AuditLog::new(temp.path().join("Logs"));
        log.log("triage", "classify_and_route", RESULT_OK, Some("a.md"), "")
            .unwrap();
        log.error(
            "triage",
            "process",
            Some("b.md"),
            &anyhow::anyhow!("{}", "x".repeat(500)),
        )
        .unwrap();
        log.log("sync", "push", "retry", None, "attempt 2").unwrap();
        log.log("execution_loop", "reflect_1", "needs_human", Some("c.md"), "")
            .unwrap();

        let today = clock::today();
        let entries = log.entries(today).unwrap();
        assert_eq!(entries.len(), 4);
        assert!(entries[1].detail.len() <= 120);
        let summary = log.summary(today).unwrap();
        assert_eq!(
            summary,
            AuditSummary {
                total: 4,
                errors: 1,
                retries: 1,
                needs_human: 1
            }
        );
        assert!(log.last_write(today).is_some());
        let last = log.last_entry(today, "sync", "push").unwrap().unwrap();
        assert_eq!(last.result, "retry");
    }

    #[test]
    fn span_records_duration_and_task() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = AuditLog::new(temp.path());
        log.span("execution_loop", "plan", "t.md")
            .finish(RESULT_OK, "2 steps")
            .unwrap();
        let entries = log.entries(clock::today()).unwrap();
        assert_eq!(entries[0].action, "plan");
        assert_eq!(entries[0].task_id, "t.md");
        assert_eq!(entries[0].detail, "2 steps");
    }

    #[test]
    fn missing_day_is_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = AuditLog::new(temp.path());
        assert!(log.entries(clock::today()).unwrap().is_empty());
        assert_eq!(log.summary(clock::today()).unwrap(), AuditSummary::default());
    }
}
