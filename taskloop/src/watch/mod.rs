//! Polling watchers: poll, process each item in isolation, sleep, repeat.
//!
//! A watcher owns its own [`SeenSet`] and its own sleep cycle. One failing
//! item is recorded and skipped; it never stops the poller.

pub mod approvals;
pub mod drop_folder;
pub mod inbox;
pub mod work;

use std::collections::BTreeSet;
use std::fmt::Display;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::io::audit::{AuditLog, RESULT_ERROR, RESULT_OK};
use crate::shutdown::StopSignal;

/// A polling source of work items.
pub trait Watcher {
    type Item: Clone + Ord + Display;

    /// Component name used in audit lines.
    fn name(&self) -> &str;

    /// Items to process this cycle. Must not fail: return nothing on
    /// transient trouble.
    fn poll(&mut self) -> Vec<Self::Item>;

    fn process(&mut self, item: &Self::Item) -> Result<()>;

    fn on_start(&mut self) -> Result<()> {
        Ok(())
    }

    fn on_error(&mut self, item: &Self::Item, err: &anyhow::Error) {
        warn!(watcher = self.name(), item = %item, err = %format!("{err:#}"), "item failed");
    }
}

/// Items already handed out, so a file that reappears in the same listing is
/// not processed twice.
#[derive(Debug, Clone)]
pub struct SeenSet<T: Ord> {
    seen: BTreeSet<T>,
}

impl<T: Ord> Default for SeenSet<T> {
    fn default() -> Self {
        Self {
            seen: BTreeSet::new(),
        }
    }
}

impl<T: Ord + Clone> SeenSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Items of `listing` not seen before, in listing order.
    ///
    /// Entries that are no longer listed are forgotten, so an id that leaves
    /// and later returns is picked up again.
    pub fn fresh(&mut self, listing: &[T]) -> Vec<T> {
        let current: BTreeSet<&T> = listing.iter().collect();
        self.seen.retain(|item| current.contains(item));
        let fresh: Vec<T> = listing
            .iter()
            .filter(|item| !self.seen.contains(*item))
            .cloned()
            .collect();
        self.seen.extend(fresh.iter().cloned());
        fresh
    }

    /// Forget an item so the next poll offers it again.
    pub fn forget(&mut self, item: &T) {
        self.seen.remove(item);
    }

    pub fn contains(&self, item: &T) -> bool {
        self.seen.contains(item)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Counts for one poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub polled: usize,
    pub processed: usize,
    pub failed: usize,
}

/// Poll once and process every item, isolating failures.
pub fn run_cycle<W: Watcher + ?Sized>(watcher: &mut W, audit: &AuditLog) -> CycleReport {
    let items = watcher.poll();
    let mut report = CycleReport {
        polled: items.len(),
        ..CycleReport::default()
    };
    for item in &items {
        match watcher.process(item) {
            Ok(()) => report.processed += 1,
            Err(err) => {
                report.failed += 1;
                let task = item.to_string();
                if let Err(audit_err) = audit.error(watcher.name(), "process", Some(&task), &err) {
                    warn!(err = %audit_err, "failed to write audit line");
                }
                watcher.on_error(item, &err);
            }
        }
    }
    if report.polled > 0 {
        debug!(watcher = watcher.name(), ?report, "cycle done");
    }
    report
}

/// Run cycles until `stop` is triggered, sleeping `interval` between them.
pub fn run_watcher<W: Watcher + ?Sized>(
    watcher: &mut W,
    audit: &AuditLog,
    interval: Duration,
    stop: &StopSignal,
) -> Result<()> {
    watcher.on_start()?;
    let name = watcher.name().to_string();
    audit.log(
        &name,
        "watcher_start",
        RESULT_OK,
        None,
        &format!("interval {}s", interval.as_secs()),
    )?;
    info!(watcher = %name, interval_secs = interval.as_secs(), "watching");

    let mut totals = CycleReport::default();
    while !stop.is_stopped() {
        let report = run_cycle(watcher, audit);
        totals.polled += report.polled;
        totals.processed += report.processed;
        totals.failed += report.failed;
        if stop.sleep(interval) {
            break;
        }
    }

    let result = if totals.failed > 0 {
        RESULT_ERROR
    } else {
        RESULT_OK
    };
    audit.log(
        &name,
        "watcher_stop",
        result,
        None,
        &format!(
            "processed {} failed {}",
            totals.processed, totals.failed
        ),
    )?;
    info!(watcher = %name, processed = totals.processed, failed = totals.failed, "stopped");
    Ok(())
}
