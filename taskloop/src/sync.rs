//! Git-backed synchronization between two copies of a vault.
//!
//! One cycle pulls, then publishes local changes. A failed pull ends the
//! cycle before anything is pushed so a push never lands on an unreconciled
//! base. Failures are written to the audit log and picked up by the health
//! check; they never stop the loop.

use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::io::audit::{RESULT_ERROR, RESULT_OK, RESULT_SKIPPED};
use crate::io::clock;
use crate::io::config::SyncConfig;
use crate::io::git::{Git, GitAuthor};
use crate::shutdown::StopSignal;
use crate::vault::Vault;

pub const SKILL: &str = "sync";
pub const CYCLE_ACTION: &str = "sync_cycle";
const COMMIT_PREFIX: &str = "[taskloop-sync] auto-sync";

/// Remote side of the bridge.
pub trait SyncRemote {
    fn pull(&mut self) -> Result<()>;
    /// True when there is something to publish.
    fn has_changes(&mut self) -> Result<bool>;
    /// Stage, commit with `message` and push. Returns the commits pushed.
    fn publish(&mut self, message: &str) -> Result<u32>;
}

/// [`SyncRemote`] over the `git` CLI.
pub struct GitRemote {
    git: Git,
    remote: String,
    branch: String,
    stage_paths: Vec<String>,
}

impl GitRemote {
    pub fn new(git: Git, config: &SyncConfig) -> Self {
        Self {
            git,
            remote: config.remote.clone(),
            branch: config.branch.clone(),
            stage_paths: config.stage_paths.clone(),
        }
    }

    pub fn for_vault(vault: &Vault) -> Self {
        let config = &vault.config.sync;
        let git = Git::new(&vault.paths.root)
            .with_author(GitAuthor {
                name: config.author_name.clone(),
                email: config.author_email.clone(),
            })
            .with_timeout(Duration::from_secs(config.command_timeout_secs));
        Self::new(git, config)
    }

    fn unpushed(&self) -> u32 {
        match self.git.commits_ahead(&self.remote, &self.branch) {
            Ok(count) => count,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "cannot count unpushed commits");
                0
            }
        }
    }
}

impl SyncRemote for GitRemote {
    fn pull(&mut self) -> Result<()> {
        self.git.pull_rebase(&self.remote, &self.branch)
    }

    fn has_changes(&mut self) -> Result<bool> {
        let dirty = !self.git.status_porcelain()?.is_empty();
        Ok(dirty || self.unpushed() > 0)
    }

    fn publish(&mut self, message: &str) -> Result<u32> {
        self.git.add_paths(&self.stage_paths)?;
        let committed = self.git.commit_staged(message)?;
        let ahead = self.unpushed().max(u32::from(committed));
        self.git.push(&self.remote, &self.branch)?;
        Ok(ahead)
    }
}

/// Result of one sync cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    PullFailed { error: String },
    NothingToPush,
    Pushed { commits: u32 },
    PushFailed { error: String },
}

impl SyncOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::PullFailed { .. } | Self::PushFailed { .. })
    }

    fn audit_result(&self) -> &'static str {
        match self {
            Self::PullFailed { .. } | Self::PushFailed { .. } => RESULT_ERROR,
            Self::NothingToPush => RESULT_SKIPPED,
            Self::Pushed { .. } => RESULT_OK,
        }
    }

    fn detail(&self) -> String {
        match self {
            Self::PullFailed { error } => format!("pull failed: {error}"),
            Self::NothingToPush => "no changes".to_string(),
            Self::Pushed { commits } => format!("pushed {commits} commit(s)"),
            Self::PushFailed { error } => format!("push failed: {error}"),
        }
    }
}

/// Pull, then publish local changes, each under the sync retry policy.
#[instrument(skip_all)]
pub fn sync_once(
    vault: &Vault,
    remote: &mut dyn SyncRemote,
    mut sleep: impl FnMut(Duration),
) -> Result<SyncOutcome> {
    let policy = &vault.config.sync.retry;
    let span = vault.audit.span(SKILL, CYCLE_ACTION, "");

    let outcome = match policy.run("git pull", |_| remote.pull(), &mut sleep) {
        Err(err) => SyncOutcome::PullFailed {
            error: format!("{err:#}"),
        },
        Ok(()) => {
            if !remote.has_changes()? {
                SyncOutcome::NothingToPush
            } else {
                let message = format!("{COMMIT_PREFIX} {}", clock::timestamp());
                match policy.run("git push", |_| remote.publish(&message), &mut sleep) {
                    Ok(commits) => SyncOutcome::Pushed { commits },
                    Err(err) => SyncOutcome::PushFailed {
                        error: format!("{err:#}"),
                    },
                }
            }
        }
    };

    if outcome.is_failure() {
        warn!(detail = %outcome.detail(), "sync cycle failed");
    } else {
        info!(detail = %outcome.detail(), "sync cycle finished");
    }
    span.finish(outcome.audit_result(), &outcome.detail())?;
    Ok(outcome)
}

/// Run [`sync_once`] every `sync.interval_secs` until `stop` trips.
pub fn run_sync_loop(vault: &Vault, remote: &mut dyn SyncRemote, stop: &StopSignal) -> Result<()> {
    let interval = Duration::from_secs(vault.config.sync.interval_secs);
    info!(interval_secs = interval.as_secs(), "sync loop started");
    while !stop.is_stopped() {
        if let Err(err) = sync_once(vault, remote, |d| {
            stop.sleep(d);
        }) {
            warn!(err = %format!("{err:#}"), "sync cycle errored");
        }
        if stop.sleep(interval) {
            break;
        }
    }
    info!("sync loop stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::process::Command;

    use super::*;
    use crate::core::types::Queue;
    use crate::test_support::{FakeSyncRemote, TestVault};

    #[test]
    fn clean_tree_skips_publish() {
        let tv = TestVault::new();
        let mut remote = FakeSyncRemote::default();
        let outcome = sync_once(&tv.vault, &mut remote, |_| {}).unwrap();
        assert_eq!(outcome, SyncOutcome::NothingToPush);
        assert_eq!(remote.pulls, 1);
        assert!(remote.published.is_empty());
        let entries = tv.audit_entries();
        let last = entries.last().unwrap();
        assert_eq!(last.action, CYCLE_ACTION);
        assert_eq!(last.result, RESULT_SKIPPED);
    }

    #[test]
    fn changes_are_committed_and_pushed() {
        let tv = TestVault::new();
        let mut remote = FakeSyncRemote {
            changes: true,
            ..FakeSyncRemote::default()
        };
        let outcome = sync_once(&tv.vault, &mut remote, |_| {}).unwrap();
        assert_eq!(outcome, SyncOutcome::Pushed { commits: 1 });
        assert_eq!(remote.published.len(), 1);
        assert!(remote.published[0].starts_with("[taskloop-sync] auto-sync "));
    }

    #[test]
    fn pull_failure_never_pushes() {
        let tv = TestVault::new();
        let mut remote = FakeSyncRemote {
            changes: true,
            pull_failures: u32::MAX,
            ..FakeSyncRemote::default()
        };
        let mut sleeps = 0;
        let outcome = sync_once(&tv.vault, &mut remote, |_| sleeps += 1).unwrap();
        assert!(matches!(outcome, SyncOutcome::PullFailed { .. }));
        assert_eq!(remote.pulls, 3);
        assert_eq!(sleeps, 2);
        assert!(remote.published.is_empty());
        assert_eq!(tv.audit_entries().last().unwrap().result, RESULT_ERROR);
    }

    #[test]
    fn transient_push_failure_is_retried() {
        let tv = TestVault::new();
        let mut remote = FakeSyncRemote {
            changes: true,
            push_failures: 1,
            ..FakeSyncRemote::default()
        };
        let outcome = sync_once(&tv.vault, &mut remote, |_| {}).unwrap();
        assert_eq!(outcome, SyncOutcome::Pushed { commits: 1 });
        assert_eq!(remote.publish_attempts, 2);
    }

    #[test]
    fn persistent_push_failure_is_reported() {
        let tv = TestVault::new();
        let mut remote = FakeSyncRemote {
            changes: true,
            push_failures: u32::MAX,
            ..FakeSyncRemote::default()
        };
        let outcome = sync_once(&tv.vault, &mut remote, |_| {}).unwrap();
        match outcome {
            SyncOutcome::PushFailed { error } => {
                assert!(error.contains("git push failed after 3 attempts"))
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    fn git(dir: &Path, args: &[&str]) -> String {
        let out = Command::new("git")
            .args([
                "-c",
                "user.name=test",
                "-c",
                "user.email=test@example.com",
                "-c",
                "commit.gpgsign=false",
            ])
            .args(args)
            .current_dir(dir)
            .output()
            .expect("run git");
        assert!(
            out.status.success(),
            "git {args:?} failed: {}",
            String::from_utf8_lossy(&out.stderr)
        );
        String::from_utf8_lossy(&out.stdout).into_owned()
    }

    /// Bare `origin` with one commit, the vault cloned from it as a worktree.
    fn vault_with_origin(tv: &TestVault, remote_dir: &Path) -> PathBuf {
        let bare = remote_dir.join("origin.git");
        fs::create_dir_all(&bare).unwrap();
        git(&bare, &["init", "--bare", "-q"]);
        git(&bare, &["symbolic-ref", "HEAD", "refs/heads/main"]);

        let root = tv.root();
        git(root, &["init", "-q"]);
        git(root, &["symbolic-ref", "HEAD", "refs/heads/main"]);
        fs::write(root.join("Dashboard.md"), "# Dashboard\n").unwrap();
        git(root, &["add", "Dashboard.md"]);
        git(root, &["commit", "-q", "-m", "seed"]);
        git(root, &["remote", "add", "origin", bare.to_str().unwrap()]);
        git(root, &["push", "-q", "origin", "main"]);
        bare
    }

    #[test]
    fn dirty_vault_pulls_and_pushes_against_real_remote() {
        let tv = TestVault::new();
        let remote_dir = tempfile::tempdir().unwrap();
        let bare = vault_with_origin(&tv, remote_dir.path());

        // Another machine pushes first, so the vault is behind.
        let other = remote_dir.path().join("other");
        git(
            remote_dir.path(),
            &["clone", "-q", bare.to_str().unwrap(), other.to_str().unwrap()],
        );
        fs::write(other.join("Remote.md"), "from elsewhere\n").unwrap();
        git(&other, &["add", "Remote.md"]);
        git(&other, &["commit", "-q", "-m", "remote edit"]);
        git(&other, &["push", "-q", "origin", "main"]);

        // Local edits the watchers would leave behind: a modified tracked file
        // and a new task.
        fs::write(tv.root().join("Dashboard.md"), "# Dashboard\nupdated\n").unwrap();
        tv.add_task(Queue::Inbox, "TASK_1.md", "# New\n");

        let mut remote = GitRemote::for_vault(&tv.vault);
        let outcome = sync_once(&tv.vault, &mut remote, |_| {}).unwrap();
        assert_eq!(outcome, SyncOutcome::Pushed { commits: 1 });

        assert!(tv.root().join("Remote.md").exists());
        let published = git(&bare, &["show", "main:Dashboard.md"]);
        assert!(published.contains("updated"));
        git(&bare, &["cat-file", "-e", "main:Inbox/TASK_1.md"]);
        let subject = git(&bare, &["log", "-1", "--format=%s", "main"]);
        assert!(subject.starts_with(COMMIT_PREFIX));
    }

    #[test]
    fn loop_exits_when_stopped() {
        let tv = TestVault::new();
        let stop = StopSignal::new();
        stop.trigger();
        let mut remote = FakeSyncRemote::default();
        run_sync_loop(&tv.vault, &mut remote, &stop).unwrap();
        assert_eq!(remote.pulls, 0);
    }
}
