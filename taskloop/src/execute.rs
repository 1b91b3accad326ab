//! Bounded PLAN → ACT → OBSERVE → REFLECT loop over a claimed task.
//!
//! The loop works through the pending items of the task's `## Steps`
//! section in order. Each iteration acts on the current step, normalizes the
//! act status, and decides to advance, retry the same step, or stop for a
//! human. Iterations are counted per run, not per step, and every phase of
//! every iteration gets its own audit line so a run can be replayed from the
//! log alone.

use std::collections::{HashMap, VecDeque};
use std::thread;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::core::cycle::{ActStatus, ActionDomain, Decision, action_domain, observe, reflect};
use crate::core::notes::{ExecutionResult, render_execution_result};
use crate::core::steps::{mark_steps_done, parse_steps, pending_steps};
use crate::core::types::{Approval, Queue, TaskId, TaskStatus};
use crate::io::audit::RESULT_OK;
use crate::io::claim::ClaimedTask;
use crate::io::clock;
use crate::io::signals::events;
use crate::io::task_store::Task;
use crate::retry::RetryPolicy;
use crate::vault::Vault;

pub const SKILL: &str = "execution_loop";

/// What the actor knows about the task it is acting for.
#[derive(Debug, Clone, Copy)]
pub struct ActContext<'a> {
    pub task_id: &'a TaskId,
    pub approval: Option<Approval>,
    pub iteration: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActResult {
    pub status: ActStatus,
    pub detail: String,
}

impl ActResult {
    pub fn new(status: ActStatus, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    pub fn success(detail: impl Into<String>) -> Self {
        Self::new(ActStatus::Success, detail)
    }
}

/// Performs one step. Failures are reported through the status, not `Err`.
pub trait Actor {
    fn act(&mut self, ctx: &ActContext<'_>, step: &str) -> ActResult;
}

/// Identifier handed back by an external service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Receipt {
    pub id: Option<String>,
}

/// An external collaborator (ERP, social network) that accepts content.
pub trait Integration {
    fn name(&self) -> &str;
    fn post(&mut self, content: &str) -> Result<Receipt>;
}

/// Routes each step to an integration by keyword.
///
/// Generic steps succeed without side effects. Social steps need a human
/// approval on the task. Integration calls go through the retry policy.
pub struct DispatchActor {
    integrations: HashMap<ActionDomain, Box<dyn Integration>>,
    retry: RetryPolicy,
    sleep: Box<dyn FnMut(Duration)>,
}

impl DispatchActor {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            integrations: HashMap::new(),
            retry,
            sleep: Box::new(thread::sleep),
        }
    }

    pub fn with_integration(
        mut self,
        domain: ActionDomain,
        integration: impl Integration + 'static,
    ) -> Self {
        self.integrations.insert(domain, Box::new(integration));
        self
    }

    pub fn with_sleep(mut self, sleep: impl FnMut(Duration) + 'static) -> Self {
        self.sleep = Box::new(sleep);
        self
    }
}

impl Actor for DispatchActor {
    fn act(&mut self, ctx: &ActContext<'_>, step: &str) -> ActResult {
        let domain = action_domain(step);
        if domain == ActionDomain::Generic {
            return ActResult::success(format!("simulated: {step}"));
        }
        if domain == ActionDomain::Social && !ctx.approval.is_some_and(Approval::is_human_approved)
        {
            return ActResult::new(
                ActStatus::PendingApproval,
                "social action requires human approval",
            );
        }
        let Some(integration) = self.integrations.get_mut(&domain) else {
            return ActResult::new(
                ActStatus::PendingIntegration,
                format!("no {} integration configured", domain.as_str()),
            );
        };
        let name = integration.name().to_string();
        let sleep = &mut self.sleep;
        match self
            .retry
            .run(&format!("{name} post"), |_| integration.post(step), |d| sleep(d))
        {
            Ok(receipt) => {
                let detail = match receipt.id {
                    Some(id) => format!("{name} accepted, id={id}"),
                    None => format!("{name} accepted"),
                };
                ActResult::success(detail)
            }
            Err(err) => ActResult::new(ActStatus::Other("error".to_string()), format!("{err:#}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LoopOutcome {
    Done,
    NeedsHuman { step: String, reason: String },
    MaxIterations,
    NoSteps,
}

impl LoopOutcome {
    /// Status written into the result block.
    pub fn label(&self) -> &'static str {
        match self {
            LoopOutcome::Done => "SUCCESS",
            LoopOutcome::NeedsHuman { .. } => "BLOCKED",
            LoopOutcome::MaxIterations => "MAX_ITERATIONS",
            LoopOutcome::NoSteps => "NO_STEPS",
        }
    }

    fn audit_action(&self) -> &'static str {
        match self {
            LoopOutcome::Done => "task_complete",
            LoopOutcome::NeedsHuman { .. } => "needs_human",
            LoopOutcome::MaxIterations => "max_iterations",
            LoopOutcome::NoSteps => "no_steps",
        }
    }

    /// True when the task must wait for a person before running again.
    pub fn needs_human(&self) -> bool {
        matches!(self, LoopOutcome::NeedsHuman { .. } | LoopOutcome::NoSteps)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoopReport {
    pub outcome: LoopOutcome,
    pub iterations: u32,
    pub completed: Vec<String>,
    pub remaining: Vec<String>,
    pub last_error: Option<String>,
}

impl LoopReport {
    fn memory_row(&self, max_iterations: u32) -> String {
        match &self.outcome {
            LoopOutcome::Done => format!(
                "SUCCESS: {} steps in {} iterations",
                self.completed.len(),
                self.iterations
            ),
            LoopOutcome::NeedsHuman { step, reason } => {
                format!("BLOCKED on '{step}': {reason}")
            }
            LoopOutcome::MaxIterations => format!(
                "MAX_ITER: {}/{} steps done after {max_iterations} iterations",
                self.completed.len(),
                self.completed.len() + self.remaining.len()
            ),
            LoopOutcome::NoSteps => "NO_STEPS: no actionable steps found".to_string(),
        }
    }
}

/// Drive the claimed task through the loop and annotate it.
///
/// The task stays in In_Progress; the result block, checked-off steps and
/// final status are persisted before returning. Moving it on is the caller's
/// job (see [`execute_claimed`]).
#[instrument(skip_all, fields(id = %claimed.id()))]
pub fn run_loop(vault: &Vault, claimed: &mut ClaimedTask, actor: &mut dyn Actor) -> Result<LoopReport> {
    let id = claimed.id().clone();
    let max_iterations = vault.config.execution.max_iterations;
    let approval = claimed.doc().metadata.approval();

    let plan_span = vault.audit.span(SKILL, "plan", &id);
    let has_steps = !parse_steps(&claimed.doc().body).is_empty();
    let mut queue: VecDeque<String> = pending_steps(&claimed.doc().body).into();
    plan_span.finish(RESULT_OK, &format!("{} pending steps", queue.len()))?;

    let mut iterations = 0;
    let mut completed = Vec::new();
    let mut last_error = None;
    let mut blocked = None;

    while let Some(step) = queue.front().cloned() {
        if iterations >= max_iterations {
            break;
        }
        iterations += 1;
        let ctx = ActContext {
            task_id: &id,
            approval,
            iteration: iterations,
        };

        let act_span = vault.audit.span(SKILL, &format!("act_iter_{iterations}"), &id);
        let result = actor.act(&ctx, &step);
        act_span.finish(result.status.as_str(), &format!("{step}: {}", result.detail))?;

        let observe_span = vault.audit.span(SKILL, &format!("observe_iter_{iterations}"), &id);
        let observation = observe(&result.status);
        observe_span.finish(observation.as_str(), &step)?;

        let reflect_span = vault.audit.span(SKILL, &format!("reflect_iter_{iterations}"), &id);
        let decision = reflect(observation);
        reflect_span.finish(decision.as_str(), &step)?;
        debug!(iteration = iterations, step = %step, decision = decision.as_str(), "iteration");

        match decision {
            Decision::StepDone => {
                queue.pop_front();
                completed.push(step);
            }
            Decision::Retry => {
                warn!(step = %step, detail = %result.detail, "step will be retried");
                last_error = Some(result.detail);
            }
            Decision::NeedsHuman => {
                blocked = Some((step, result.detail));
                break;
            }
        }
    }

    let outcome = match blocked {
        Some((step, reason)) => LoopOutcome::NeedsHuman { step, reason },
        None if !has_steps => LoopOutcome::NoSteps,
        None if queue.is_empty() => LoopOutcome::Done,
        None => LoopOutcome::MaxIterations,
    };
    let report = LoopReport {
        outcome,
        iterations,
        completed,
        remaining: queue.into_iter().collect(),
        last_error,
    };
    annotate(vault, claimed, &report)?;

    vault
        .memory
        .append(id.as_str(), &report.memory_row(max_iterations))?;
    vault.audit.log(
        SKILL,
        report.outcome.audit_action(),
        report.outcome.label(),
        Some(id.as_str()),
        &format!(
            "{} done, {} remaining, {iterations}/{max_iterations} iterations",
            report.completed.len(),
            report.remaining.len()
        ),
    )?;
    info!(outcome = report.outcome.label(), iterations, "loop finished");
    Ok(report)
}

fn annotate(vault: &Vault, claimed: &mut ClaimedTask, report: &LoopReport) -> Result<()> {
    let timestamp = clock::timestamp();
    let (blocked_on, reason) = match &report.outcome {
        LoopOutcome::NeedsHuman { step, reason } => (Some(step.as_str()), Some(reason.as_str())),
        LoopOutcome::NoSteps => (
            Some("planning"),
            Some("no pending items in a ## Steps section"),
        ),
        _ => (None, None),
    };
    let block = render_execution_result(&ExecutionResult {
        status: report.outcome.label(),
        timestamp: &timestamp,
        iterations: report.iterations,
        max_iterations: vault.config.execution.max_iterations,
        completed: &report.completed,
        remaining: &report.remaining,
        blocked_on,
        reason,
        last_error: report.last_error.as_deref(),
    })?;

    let doc = claimed.doc_mut();
    doc.body = mark_steps_done(&doc.body, report.completed.len());
    doc.append_section(&block);
    if report.outcome.needs_human() {
        doc.metadata.set("status", TaskStatus::Blocked.as_str());
    }
    claimed.persist(&vault.store)
}

/// Result of [`execute_claimed`].
#[derive(Debug)]
pub enum Finished {
    /// Moved to its terminal queue.
    Released {
        report: LoopReport,
        task: Task,
        queue: Queue,
    },
    /// Still owned in In_Progress with status `blocked`.
    Held {
        report: LoopReport,
        claimed: ClaimedTask,
    },
}

impl Finished {
    pub fn report(&self) -> &LoopReport {
        match self {
            Finished::Released { report, .. } | Finished::Held { report, .. } => report,
        }
    }
}

/// Run the loop and release finished tasks to Done or Failed.
///
/// Blocked runs are handed back still claimed. An I/O failure during the run
/// moves the task to Failed with the error on record.
pub fn execute_claimed(
    vault: &Vault,
    mut claimed: ClaimedTask,
    actor: &mut dyn Actor,
) -> Result<Finished> {
    let report = match run_loop(vault, &mut claimed, actor) {
        Ok(report) => report,
        Err(err) => {
            vault.fail_claimed(SKILL, claimed, &err)?;
            return Err(err);
        }
    };
    let queue = match report.outcome {
        LoopOutcome::Done => Queue::Done,
        LoopOutcome::MaxIterations => Queue::Failed,
        LoopOutcome::NeedsHuman { .. } | LoopOutcome::NoSteps => {
            return Ok(Finished::Held { report, claimed });
        }
    };
    let id = claimed.id().clone();
    let task = claimed.release(&vault.store, queue)?;
    if queue == Queue::Failed {
        vault.signals.write(
            events::TASK_FAILED,
            Some(id.as_str()),
            &format!(
                "iteration limit reached with {} steps remaining",
                report.remaining.len()
            ),
        )?;
    }
    Ok(Finished::Released {
        report,
        task,
        queue,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cycle::ActStatus;
    use crate::io::claim::Claim;
    use crate::io::config::VaultConfig;
    use crate::test_support::{FakeIntegration, ScriptedActor, TestVault};

    const DISK: &str = "# Disk\n\n## Steps\n- check disk space\n- report usage\n\n## Notes\nnothing\n";

    fn claim(tv: &TestVault, name: &str, text: &str) -> ClaimedTask {
        let id = tv.add_task(Queue::NeedsAction, name, text);
        match tv.vault.claim(SKILL, &id, Queue::NeedsAction).unwrap() {
            Claim::Claimed(claimed) => claimed,
            Claim::Lost => panic!("claim lost"),
        }
    }

    #[test]
    fn all_success_completes_and_checks_off_steps() {
        let tv = TestVault::new();
        let claimed = claim(&tv, "DISK.md", DISK);
        let mut actor = ScriptedActor::always_success();
        let finished = execute_claimed(&tv.vault, claimed, &mut actor).unwrap();
        let Finished::Released {
            report,
            task,
            queue,
        } = finished
        else {
            panic!("expected release");
        };
        assert_eq!(queue, Queue::Done);
        assert_eq!(report.outcome, LoopOutcome::Done);
        assert_eq!(report.iterations, 2);
        assert!(task.doc.body.contains("- [x] check disk space"));
        assert!(task.doc.body.contains("- [x] report usage"));
        assert!(task.doc.body.contains("**Status:** SUCCESS"));
        assert_eq!(actor.steps(), ["check disk space", "report usage"]);
        assert!(tv.memory_text().contains("SUCCESS: 2 steps"));
    }

    #[test]
    fn every_phase_is_audited() {
        let tv = TestVault::new();
        let claimed = claim(&tv, "DISK.md", DISK);
        execute_claimed(&tv.vault, claimed, &mut ScriptedActor::always_success()).unwrap();
        let actions: Vec<String> = tv
            .audit_entries()
            .into_iter()
            .filter(|e| e.skill == SKILL)
            .map(|e| e.action)
            .collect();
        assert_eq!(
            actions,
            [
                "plan",
                "act_iter_1",
                "observe_iter_1",
                "reflect_iter_1",
                "act_iter_2",
                "observe_iter_2",
                "reflect_iter_2",
                "task_complete",
            ]
        );
    }

    #[test]
    fn social_step_without_approval_blocks() {
        let tv = TestVault::new();
        let claimed = claim(&tv, "TW.md", "# Tw\n\n## Steps\n- post to twitter\n");
        let mut actor = DispatchActor::new(RetryPolicy::default());
        let finished = execute_claimed(&tv.vault, claimed, &mut actor).unwrap();
        let Finished::Held { report, claimed } = finished else {
            panic!("expected hold");
        };
        assert_eq!(
            report.outcome,
            LoopOutcome::NeedsHuman {
                step: "post to twitter".to_string(),
                reason: "social action requires human approval".to_string(),
            }
        );
        assert_eq!(report.iterations, 1);
        let on_disk = tv.vault.store.read(Queue::InProgress, claimed.id()).unwrap();
        assert_eq!(on_disk.doc.metadata.status(), Some(TaskStatus::Blocked));
        assert!(on_disk.doc.body.contains("**Blocked On:** post to twitter"));
        assert_eq!(tv.vault.audit.summary(clock::today()).unwrap().needs_human, 2);
    }

    #[test]
    fn no_steps_is_held_for_a_human() {
        let tv = TestVault::new();
        let claimed = claim(&tv, "VAGUE.md", "# Vague\n\ndo something useful\n");
        let finished =
            execute_claimed(&tv.vault, claimed, &mut ScriptedActor::always_success()).unwrap();
        assert_eq!(finished.report().outcome, LoopOutcome::NoSteps);
        assert_eq!(finished.report().iterations, 0);
        assert!(matches!(finished, Finished::Held { .. }));
        assert!(tv.memory_text().contains("NO_STEPS"));
    }

    #[test]
    fn unknown_status_retries_until_iteration_limit() {
        let mut config = VaultConfig::default();
        config.execution.max_iterations = 3;
        let tv = TestVault::with_config(config);
        let claimed = claim(&tv, "DISK.md", DISK);
        let mut actor = ScriptedActor::new(vec![
            ActResult::success("ok"),
            ActResult::new(ActStatus::Other("timeout".into()), "api timeout"),
            ActResult::new(ActStatus::Other("timeout".into()), "api timeout again"),
        ]);
        let finished = execute_claimed(&tv.vault, claimed, &mut actor).unwrap();
        let Finished::Released { report, task, queue } = finished else {
            panic!("expected release");
        };
        assert_eq!(queue, Queue::Failed);
        assert_eq!(report.outcome, LoopOutcome::MaxIterations);
        assert_eq!(report.iterations, 3);
        assert_eq!(report.completed, ["check disk space"]);
        assert_eq!(report.remaining, ["report usage"]);
        assert_eq!(report.last_error.as_deref(), Some("api timeout again"));
        assert!(task.doc.body.contains("- [ ] report usage"));
        assert_eq!(actor.steps(), ["check disk space", "report usage", "report usage"]);
    }

    #[test]
    fn repeated_step_text_stays_pending_until_run() {
        let mut config = VaultConfig::default();
        config.execution.max_iterations = 2;
        let tv = TestVault::with_config(config);
        let claimed = claim(
            &tv,
            "REMIND.md",
            "# Remind\n\n## Steps\n- send reminder\n- send reminder\n",
        );
        let mut actor = ScriptedActor::new(vec![
            ActResult::success("sent"),
            ActResult::new(ActStatus::Other("smtp".into()), "smtp down"),
        ]);
        let finished = execute_claimed(&tv.vault, claimed, &mut actor).unwrap();
        let Finished::Released { report, task, queue } = finished else {
            panic!("expected release");
        };
        assert_eq!(queue, Queue::Failed);
        assert_eq!(report.completed, ["send reminder"]);
        assert_eq!(report.remaining, ["send reminder"]);
        assert_eq!(pending_steps(&task.doc.body), ["send reminder"]);
    }

    #[test]
    fn retry_then_success_finishes_within_limit() {
        let tv = TestVault::new();
        let claimed = claim(&tv, "DISK.md", DISK);
        let mut actor = ScriptedActor::new(vec![
            ActResult::new(ActStatus::Other("flaky".into()), "flaky"),
            ActResult::success("ok"),
            ActResult::success("ok"),
        ]);
        let finished = execute_claimed(&tv.vault, claimed, &mut actor).unwrap();
        assert_eq!(finished.report().outcome, LoopOutcome::Done);
        assert_eq!(finished.report().iterations, 3);
    }

    #[test]
    fn fully_checked_task_is_done_without_acting() {
        let tv = TestVault::new();
        let claimed = claim(&tv, "OLD.md", "# Old\n\n## Steps\n- [x] check disk space\n");
        let mut actor = ScriptedActor::always_success();
        let finished = execute_claimed(&tv.vault, claimed, &mut actor).unwrap();
        assert_eq!(finished.report().outcome, LoopOutcome::Done);
        assert!(actor.steps().is_empty());
    }

    #[test]
    fn checked_steps_are_not_run_again() {
        let tv = TestVault::new();
        let claimed = claim(
            &tv,
            "DISK.md",
            "# Disk\n\n## Steps\n- [x] check disk space\n- [ ] report usage\n",
        );
        let mut actor = ScriptedActor::always_success();
        let finished = execute_claimed(&tv.vault, claimed, &mut actor).unwrap();
        assert_eq!(finished.report().iterations, 1);
        assert_eq!(actor.steps(), ["report usage"]);
    }

    fn approved_ctx(id: &TaskId) -> ActContext<'_> {
        ActContext {
            task_id: id,
            approval: Some(Approval::Approved),
            iteration: 1,
        }
    }

    #[test]
    fn dispatch_routes_to_integration_with_retries() {
        let integration = FakeIntegration::new("odoo").failing_times(1);
        let calls = integration.calls();
        let mut actor = DispatchActor::new(RetryPolicy {
            max_attempts: 3,
            initial_delay_ms: 1,
            backoff_multiplier: 1,
        })
        .with_integration(ActionDomain::Accounting, integration)
        .with_sleep(|_| {});
        let id = TaskId::new("INV.md").unwrap();
        let result = actor.act(&approved_ctx(&id), "create invoice in odoo");
        assert_eq!(result.status, ActStatus::Success);
        assert!(result.detail.contains("odoo accepted"));
        assert_eq!(calls.borrow().len(), 2);
    }

    #[test]
    fn dispatch_reports_missing_integration_and_exhausted_retries() {
        let mut actor = DispatchActor::new(RetryPolicy {
            max_attempts: 2,
            initial_delay_ms: 1,
            backoff_multiplier: 1,
        })
        .with_integration(
            ActionDomain::Social,
            FakeIntegration::new("twitter").failing_times(5),
        )
        .with_sleep(|_| {});
        let id = TaskId::new("X.md").unwrap();
        let missing = actor.act(&approved_ctx(&id), "invoice the client");
        assert_eq!(missing.status, ActStatus::PendingIntegration);
        let failed = actor.act(&approved_ctx(&id), "tweet the news");
        assert_eq!(failed.status, ActStatus::Other("error".to_string()));
        assert!(failed.detail.contains("failed after 2 attempts"));
        let generic = actor.act(&approved_ctx(&id), "check disk space");
        assert_eq!(generic.status, ActStatus::Success);
    }
}
