//! Manual task outcomes: complete, fail, retry.

use anyhow::{Result, bail};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::core::notes::{Note, retry_line};
use crate::core::types::{Queue, TaskId};
use crate::io::audit::{RESULT_ERROR, RESULT_OK};
use crate::io::claim::{Claim, ClaimedTask};
use crate::io::clock;
use crate::io::signals::events;
use crate::io::task_store::Task;
use crate::vault::Vault;

pub const SKILL: &str = "task_outcome";

fn claim_queued(vault: &Vault, id: &TaskId) -> Result<Option<ClaimedTask>> {
    match vault.claim(SKILL, id, Queue::NeedsAction)? {
        Claim::Claimed(claimed) => Ok(Some(claimed)),
        Claim::Lost => Ok(None),
    }
}

/// Mark a queued task done and record what was learned.
#[instrument(skip_all, fields(id = %id))]
pub fn complete(vault: &Vault, id: &TaskId, lesson: Option<&str>) -> Result<Task> {
    let span = vault.audit.span(SKILL, "complete", id);
    let Some(mut claimed) = claim_queued(vault, id)? else {
        bail!("task {id} is not in {}", Queue::NeedsAction);
    };
    let mut note = Note::new("Completion", "Completed At", &clock::timestamp());
    if let Some(lesson) = lesson {
        note = note.field("Lesson", lesson);
    }
    claimed.doc_mut().append_section(&note.render()?);
    let task = claimed.release(&vault.store, Queue::Done)?;
    let row = match lesson {
        Some(lesson) => format!("SUCCESS: {lesson}"),
        None => "SUCCESS: completed manually".to_string(),
    };
    vault.memory.append(id.as_str(), &row)?;
    span.finish(RESULT_OK, "-> Done")?;
    info!("completed");
    Ok(task)
}

/// Move a queued task to Failed with a reason.
#[instrument(skip_all, fields(id = %id))]
pub fn fail(vault: &Vault, id: &TaskId, reason: &str) -> Result<Task> {
    let span = vault.audit.span(SKILL, "fail", id);
    let Some(claimed) = claim_queued(vault, id)? else {
        bail!("task {id} is not in {}", Queue::NeedsAction);
    };
    let task = fail_with_note(vault, claimed, reason)?;
    span.finish(RESULT_ERROR, reason)?;
    Ok(task)
}

fn fail_with_note(vault: &Vault, mut claimed: ClaimedTask, reason: &str) -> Result<Task> {
    let id = claimed.id().clone();
    let note = Note::new("Failure", "Failed At", &clock::timestamp())
        .field("Reason", reason)
        .render()?;
    claimed.doc_mut().append_section(&note);
    let task = claimed.release(&vault.store, Queue::Failed)?;
    vault
        .memory
        .append(id.as_str(), &format!("FAILED: {reason}"))?;
    vault
        .signals
        .write(events::TASK_FAILED, Some(id.as_str()), reason)?;
    warn!(id = %id, reason, "task failed");
    Ok(task)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RetryOutcome {
    /// Returned to Needs_Action with the counter bumped.
    Requeued { retries: u32 },
    /// Counter reached the limit; the task is now in Failed.
    Failed { retries: u32 },
    /// The task is not (or no longer) queued.
    NotFound,
}

/// Bump the retry counter of a queued task.
///
/// Below `tasks.max_retries` the task goes back to Needs_Action with a retry
/// line; at the limit it moves to Failed. A task that already left the queue
/// yields [`RetryOutcome::NotFound`], so repeated calls never move it twice.
#[instrument(skip_all, fields(id = %id))]
pub fn retry(vault: &Vault, id: &TaskId, reason: &str) -> Result<RetryOutcome> {
    let Some(mut claimed) = claim_queued(vault, id)? else {
        return Ok(RetryOutcome::NotFound);
    };
    let span = vault.audit.span(SKILL, "retry_item", id);
    let retries = claimed.doc().metadata.retries() + 1;
    let max_retries = vault.config.tasks.max_retries;
    claimed.doc_mut().metadata.set("retries", retries.to_string());

    if retries >= max_retries {
        fail_with_note(
            vault,
            claimed,
            &format!("max retries ({max_retries}) reached: {reason}"),
        )?;
        span.finish(RESULT_ERROR, &format!("retry {retries}/{max_retries} -> Failed"))?;
        return Ok(RetryOutcome::Failed { retries });
    }

    claimed
        .doc_mut()
        .append_line(&retry_line(retries, &clock::timestamp(), reason));
    claimed.release(&vault.store, Queue::NeedsAction)?;
    span.finish("retry", &format!("retry {retries}/{max_retries}: {reason}"))?;
    info!(retries, "requeued");
    Ok(RetryOutcome::Requeued { retries })
}
