//! `taskloop` CLI: one subcommand per pipeline component.
//!
//! Long-running components (`--watch`, `--loop`, `supervise`) poll until
//! interrupted; everything else acts once and exits.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;

use taskloop::core::types::{Queue, TaskId};
use taskloop::execute::DispatchActor;
use taskloop::health::{self, HealthReport};
use taskloop::io::paths::{InitOptions, init_vault};
use taskloop::shutdown::StopSignal;
use taskloop::supervisor::Supervisor;
use taskloop::sync::{self, GitRemote};
use taskloop::vault::Vault;
use taskloop::watch::approvals::ApprovalWatcher;
use taskloop::watch::drop_folder::DropFolderWatcher;
use taskloop::watch::inbox::InboxWatcher;
use taskloop::watch::work::{WorkWatcher, work_task};
use taskloop::watch::{Watcher, run_cycle, run_watcher};
use taskloop::{decide, exit_codes, logging, outcome};

#[derive(Parser)]
#[command(
    name = "taskloop",
    version,
    about = "File-backed task pipeline with risk-gated approval"
)]
struct Cli {
    /// Vault root directory.
    #[arg(long, global = true, default_value = ".")]
    vault: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create queue directories, `taskloop.toml` and the memory log.
    Init {
        /// Overwrite an existing `taskloop.toml`.
        #[arg(short, long)]
        force: bool,
    },
    /// Classify Inbox tasks and route them.
    Triage {
        #[arg(long)]
        watch: bool,
    },
    /// Run the autonomous reviewer over Awaiting_Approval.
    Review {
        #[arg(long)]
        watch: bool,
    },
    /// Execute Needs_Action tasks.
    Work {
        #[arg(long)]
        watch: bool,
    },
    /// Execute a single Needs_Action task.
    Run { id: TaskId },
    /// Turn files in the drop folder into Inbox tasks.
    Drop {
        #[arg(long)]
        watch: bool,
        /// Folder to read; defaults to `watch.drop_folder` from the config.
        #[arg(long)]
        folder: Option<PathBuf>,
    },
    /// Approve an Awaiting_Approval task.
    Approve { id: TaskId },
    /// Reject an Awaiting_Approval task.
    Reject {
        id: TaskId,
        #[arg(long)]
        reason: String,
    },
    /// Send a Needs_Action task back for human approval.
    Route {
        id: TaskId,
        #[arg(long)]
        reason: String,
    },
    /// Mark a queued task done.
    Complete {
        id: TaskId,
        #[arg(long)]
        lesson: Option<String>,
    },
    /// Mark a queued task failed.
    Fail {
        id: TaskId,
        #[arg(long)]
        reason: String,
    },
    /// Requeue a task, failing it once the retry limit is reached.
    Retry {
        id: TaskId,
        #[arg(long)]
        reason: String,
    },
    /// List tasks waiting for approval, oldest first.
    Pending {
        #[arg(long)]
        json: bool,
    },
    /// Delete a task from Done or Failed.
    Purge { queue: Queue, id: TaskId },
    /// Start and babysit the configured services.
    Supervise,
    /// Pull and publish vault changes through git.
    Sync {
        #[arg(long = "loop")]
        repeat: bool,
    },
    /// Check vault health.
    Health {
        #[arg(long = "loop")]
        repeat: bool,
        #[arg(long)]
        json: bool,
    },
    /// Show task counts per queue.
    Status {
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { force } => cmd_init(&cli.vault, force),
        command => {
            let vault = Vault::open(&cli.vault)
                .with_context(|| format!("open vault {}", cli.vault.display()))?;
            dispatch(&vault, command)
        }
    }
}

fn dispatch(vault: &Vault, command: Command) -> Result<i32> {
    match command {
        Command::Init { force } => cmd_init(&vault.paths.root, force),
        Command::Triage { watch } => {
            let interval = vault.config.watch.poll_interval();
            drive(&mut InboxWatcher::new(vault), vault, watch, interval)
        }
        Command::Review { watch } => {
            let interval = vault.config.watch.review_interval();
            drive(&mut ApprovalWatcher::new(vault), vault, watch, interval)
        }
        Command::Work { watch } => {
            let interval = vault.config.watch.poll_interval();
            let mut watcher = WorkWatcher::new(vault, actor(vault));
            drive(&mut watcher, vault, watch, interval)
        }
        Command::Run { id } => cmd_run(vault, &id),
        Command::Drop { watch, folder } => cmd_drop(vault, watch, folder),
        Command::Approve { id } => {
            let task = decide::approve(vault, &id)?;
            println!("{} -> {}", task.id, Queue::NeedsAction);
            Ok(exit_codes::OK)
        }
        Command::Reject { id, reason } => {
            let task = decide::reject(vault, &id, &reason)?;
            println!("{} -> {}", task.id, Queue::Failed);
            Ok(exit_codes::OK)
        }
        Command::Route { id, reason } => {
            let task = decide::route_for_approval(vault, &id, &reason)?;
            println!("{} -> {}", task.id, Queue::AwaitingApproval);
            Ok(exit_codes::OK)
        }
        Command::Complete { id, lesson } => {
            let task = outcome::complete(vault, &id, lesson.as_deref())?;
            println!("{} -> {}", task.id, Queue::Done);
            Ok(exit_codes::OK)
        }
        Command::Fail { id, reason } => {
            let task = outcome::fail(vault, &id, &reason)?;
            println!("{} -> {}", task.id, Queue::Failed);
            Ok(exit_codes::OK)
        }
        Command::Retry { id, reason } => cmd_retry(vault, &id, &reason),
        Command::Pending { json } => cmd_pending(vault, json),
        Command::Purge { queue, id } => {
            if !vault.store.delete(queue, &id)? {
                bail!("task {id} is not in {queue}");
            }
            println!("purged {queue}/{id}");
            Ok(exit_codes::OK)
        }
        Command::Supervise => {
            let stop = interruptible()?;
            Supervisor::new(vault).run(&stop)?;
            Ok(exit_codes::OK)
        }
        Command::Sync { repeat } => cmd_sync(vault, repeat),
        Command::Health { repeat, json } => cmd_health(vault, repeat, json),
        Command::Status { json } => cmd_status(vault, json),
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let paths = init_vault(root, &InitOptions { force })?;
    println!("initialized vault at {}", paths.root.display());
    Ok(exit_codes::OK)
}

fn actor(vault: &Vault) -> DispatchActor {
    DispatchActor::new(vault.config.retry.clone())
}

fn interruptible() -> Result<StopSignal> {
    let stop = StopSignal::new();
    stop.install_handler()?;
    Ok(stop)
}

/// One cycle, or cycles until interrupted.
fn drive<W: Watcher>(
    watcher: &mut W,
    vault: &Vault,
    watch: bool,
    interval: Duration,
) -> Result<i32> {
    if watch {
        let stop = interruptible()?;
        run_watcher(watcher, &vault.audit, interval, &stop)?;
        return Ok(exit_codes::OK);
    }
    let report = run_cycle(watcher, &vault.audit);
    println!(
        "{}: {} polled, {} processed, {} failed",
        watcher.name(),
        report.polled,
        report.processed,
        report.failed
    );
    Ok(if report.failed > 0 {
        exit_codes::INVALID
    } else {
        exit_codes::OK
    })
}

fn cmd_run(vault: &Vault, id: &TaskId) -> Result<i32> {
    let Some(result) = work_task(vault, id, &mut actor(vault))? else {
        bail!("task {id} is not in {}", Queue::NeedsAction);
    };
    let report = &result.report;
    println!(
        "{id}: {} after {} iteration(s), {} done, {} remaining -> {}",
        report.outcome.label(),
        report.iterations,
        report.completed.len(),
        report.remaining.len(),
        result.queue
    );
    Ok(exit_codes::OK)
}

fn cmd_drop(vault: &Vault, watch: bool, folder: Option<PathBuf>) -> Result<i32> {
    let Some(folder) = folder.or_else(|| vault.config.watch.drop_folder.clone()) else {
        bail!("no drop folder: pass --folder or set watch.drop_folder in the config");
    };
    let mut watcher = DropFolderWatcher::new(vault, &folder);
    let interval = vault.config.watch.poll_interval();
    drive(&mut watcher, vault, watch, interval)
}

fn cmd_retry(vault: &Vault, id: &TaskId, reason: &str) -> Result<i32> {
    match outcome::retry(vault, id, reason)? {
        outcome::RetryOutcome::Requeued { retries } => {
            println!("{id} -> {} (retry {retries})", Queue::NeedsAction);
        }
        outcome::RetryOutcome::Failed { retries } => {
            println!("{id} -> {} after {retries} retries", Queue::Failed);
        }
        outcome::RetryOutcome::NotFound => bail!("task {id} is not queued"),
    }
    Ok(exit_codes::OK)
}

fn cmd_pending(vault: &Vault, json: bool) -> Result<i32> {
    let pending = decide::list_pending(vault)?;
    if json {
        print_json(&pending)?;
        return Ok(exit_codes::OK);
    }
    if pending.is_empty() {
        println!("nothing awaiting approval");
    }
    for p in &pending {
        println!(
            "{:<40} {:>6.1}h  risk={:<8} source={}",
            p.id.as_str(),
            p.age_hours,
            p.risk.map_or("-", |r| r.as_str()),
            p.source.as_deref().unwrap_or("-")
        );
    }
    Ok(exit_codes::OK)
}

fn cmd_sync(vault: &Vault, repeat: bool) -> Result<i32> {
    let mut remote = GitRemote::for_vault(vault);
    if repeat {
        let stop = interruptible()?;
        sync::run_sync_loop(vault, &mut remote, &stop)?;
        return Ok(exit_codes::OK);
    }
    let outcome = sync::sync_once(vault, &mut remote, std::thread::sleep)?;
    print_json(&outcome)?;
    Ok(if outcome.is_failure() {
        exit_codes::INVALID
    } else {
        exit_codes::OK
    })
}

fn cmd_health(vault: &Vault, repeat: bool, json: bool) -> Result<i32> {
    if repeat {
        let stop = interruptible()?;
        health::run_health_loop(vault, &stop)?;
        return Ok(exit_codes::OK);
    }
    let report = health::check(vault)?;
    if json {
        print_json(&report)?;
    } else {
        print_health(&report);
    }
    Ok(if report.is_healthy() {
        exit_codes::OK
    } else {
        exit_codes::DEGRADED
    })
}

fn print_health(report: &HealthReport) {
    println!("[{}] Health: {}", report.timestamp, report.overall);
    for c in &report.checks {
        let mark = if c.ok { "OK  " } else { "FAIL" };
        println!("  [{mark}] {:<12} {}", c.name, c.detail);
    }
}

fn cmd_status(vault: &Vault, json: bool) -> Result<i32> {
    let counts = health::queue_counts(vault)?;
    if json {
        print_json(&counts)?;
        return Ok(exit_codes::OK);
    }
    for c in &counts {
        println!("{:<18} {}", c.queue, c.count);
    }
    Ok(exit_codes::OK)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize json")?;
    println!("{payload}");
    Ok(())
}
