//! Queue transition rules and status drift detection.
//!
//! Every content mutation happens while a task is owned in `In_Progress`, so
//! the only legal moves are claims into `In_Progress` and releases out of it.

use anyhow::{Result, bail};

use crate::core::types::{Queue, TaskStatus};

/// Destinations reachable from `from` in one move.
pub fn allowed_moves(from: Queue) -> &'static [Queue] {
    match from {
        Queue::Inbox | Queue::NeedsAction | Queue::AwaitingApproval => &[Queue::InProgress],
        Queue::InProgress => &[
            Queue::NeedsAction,
            Queue::AwaitingApproval,
            Queue::Done,
            Queue::Failed,
        ],
        Queue::Done | Queue::Failed => &[],
    }
}

pub fn check_move(from: Queue, to: Queue) -> Result<()> {
    if !allowed_moves(from).contains(&to) {
        bail!("illegal queue transition {from} -> {to}");
    }
    Ok(())
}

/// Describe a mismatch between a task's location and its `status` field.
///
/// A missing status is not drift: human-authored tasks may omit it.
pub fn status_drift(queue: Queue, status: Option<TaskStatus>) -> Option<String> {
    let status = status?;
    if status.home_queue() == queue {
        return None;
    }
    Some(format!(
        "status '{status}' does not match queue {queue} (expected '{}')",
        queue.resting_status()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_queues_have_no_exits() {
        for to in Queue::ALL {
            assert!(check_move(Queue::Done, to).is_err());
            assert!(check_move(Queue::Failed, to).is_err());
        }
    }

    #[test]
    fn claims_go_through_in_progress() {
        assert!(check_move(Queue::Inbox, Queue::InProgress).is_ok());
        assert!(check_move(Queue::Inbox, Queue::Done).is_err());
        assert!(check_move(Queue::NeedsAction, Queue::Failed).is_err());
        assert!(check_move(Queue::InProgress, Queue::Done).is_ok());
        assert!(check_move(Queue::InProgress, Queue::Inbox).is_err());
    }

    #[test]
    fn drift_reports_mismatch_only() {
        assert!(status_drift(Queue::NeedsAction, None).is_none());
        assert!(status_drift(Queue::NeedsAction, Some(TaskStatus::NeedsAction)).is_none());
        assert!(status_drift(Queue::InProgress, Some(TaskStatus::Blocked)).is_none());
        let msg = status_drift(Queue::Done, Some(TaskStatus::NeedsAction)).unwrap();
        assert!(msg.contains("needs_action"));
        assert!(msg.contains("Done"));
    }
}
