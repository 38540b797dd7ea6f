//! The declarative transition table and the executor that drives it.
//!
//! The table is data, not control flow: a static slice of rows looked up
//! by `(from, to)` plus an optional condition, auditable and swappable
//! without touching the executor.

use anvil_protocol::{HistoryEvent, Task, TaskStatus};
use tracing::{info, warn};

use crate::errors::{GateError, TransitionError};
use crate::gates::{self, ReviewVerdict};
use crate::persistence;

/// Agent variant a `spawn_agent` hook should launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnVariant {
    Worker,
    WorkerRespawn,
    WorkerFix,
    Reviewer,
    StuckFix,
}

/// A symbolic side-effect the executor dispatches to the hook implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookStep {
    AcquireWorkspace,
    SpawnAgent(SpawnVariant),
    ReleaseWorkspace,
    KillSession,
    KillReviewer,
    IncrementReviewRound,
    NotifyWorker,
    SpawnNext,
    DeleteRemoteBranch,
}

/// The artifact a transition's gate checks, and (for the review gate) the
/// verdict it requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Plan,
    Handoff,
    Review(ReviewVerdict),
}

impl Gate {
    fn check(self, body: &str) -> Result<(), GateError> {
        match self {
            Gate::Plan => gates::check_plan(body),
            Gate::Handoff => gates::check_handoff(body),
            Gate::Review(expected) => match gates::check_review(body)? {
                verdict if verdict == expected => Ok(()),
                ReviewVerdict::Pass => Err(GateError::VerdictMismatch {
                    expected: "FAIL",
                    found: "PASS",
                }),
                ReviewVerdict::Fail => Err(GateError::VerdictMismatch {
                    expected: "PASS",
                    found: "FAIL",
                }),
            },
        }
    }
}

/// A condition evaluated on the current task, used to disambiguate rows
/// that share the same `(from, to)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    ReviewRoundBelowLimit,
    ReviewRoundAtLimit,
}

const REVIEW_ROUND_LIMIT: u32 = 2;

impl Condition {
    fn holds(self, task: &Task) -> bool {
        match self {
            Condition::ReviewRoundBelowLimit => task.review_round < REVIEW_ROUND_LIMIT,
            Condition::ReviewRoundAtLimit => task.review_round >= REVIEW_ROUND_LIMIT,
        }
    }
}

pub struct TransitionRow {
    pub from: TaskStatus,
    pub to: TaskStatus,
    pub gate: Option<Gate>,
    pub condition: Option<Condition>,
    pub hooks: &'static [HookStep],
}

use SpawnVariant::*;
use TaskStatus::*;

pub static TRANSITION_TABLE: &[TransitionRow] = &[
    TransitionRow {
        from: Pending,
        to: Planning,
        gate: None,
        condition: None,
        hooks: &[HookStep::AcquireWorkspace, HookStep::SpawnAgent(Worker)],
    },
    TransitionRow {
        from: Pending,
        to: Cancelled,
        gate: None,
        condition: None,
        hooks: &[],
    },
    TransitionRow {
        from: Planning,
        to: Working,
        gate: Some(Gate::Plan),
        condition: None,
        hooks: &[],
    },
    TransitionRow {
        from: Planning,
        to: Clarification,
        gate: None,
        condition: None,
        hooks: &[],
    },
    TransitionRow {
        from: Clarification,
        to: Planning,
        gate: None,
        condition: None,
        hooks: &[],
    },
    TransitionRow {
        from: Working,
        to: AgentReview,
        gate: Some(Gate::Handoff),
        condition: None,
        hooks: &[HookStep::SpawnAgent(Reviewer), HookStep::IncrementReviewRound],
    },
    TransitionRow {
        from: AgentReview,
        to: Reviewing,
        gate: Some(Gate::Review(ReviewVerdict::Pass)),
        condition: None,
        hooks: &[HookStep::KillReviewer],
    },
    TransitionRow {
        from: AgentReview,
        to: Working,
        gate: Some(Gate::Review(ReviewVerdict::Fail)),
        condition: Some(Condition::ReviewRoundBelowLimit),
        hooks: &[HookStep::KillReviewer, HookStep::NotifyWorker],
    },
    TransitionRow {
        from: AgentReview,
        to: Stuck,
        gate: Some(Gate::Review(ReviewVerdict::Fail)),
        condition: Some(Condition::ReviewRoundAtLimit),
        hooks: &[HookStep::KillReviewer],
    },
    TransitionRow {
        from: AgentReview,
        to: Cancelled,
        gate: None,
        condition: None,
        hooks: &[HookStep::KillReviewer, HookStep::KillSession, HookStep::ReleaseWorkspace],
    },
    TransitionRow {
        from: Reviewing,
        to: Working,
        gate: None,
        condition: None,
        hooks: &[HookStep::NotifyWorker],
    },
    TransitionRow {
        from: Reviewing,
        to: Done,
        gate: None,
        condition: None,
        hooks: &[HookStep::KillSession, HookStep::ReleaseWorkspace, HookStep::SpawnNext],
    },
    TransitionRow {
        from: Stuck,
        to: Reviewing,
        gate: None,
        condition: None,
        hooks: &[],
    },
    TransitionRow {
        from: Working,
        to: Stuck,
        gate: None,
        condition: None,
        hooks: &[],
    },
    // "any-active" cancel rows, one per non-terminal source.
    TransitionRow {
        from: Planning,
        to: Cancelled,
        gate: None,
        condition: None,
        hooks: &[HookStep::KillSession, HookStep::ReleaseWorkspace],
    },
    TransitionRow {
        from: Clarification,
        to: Cancelled,
        gate: None,
        condition: None,
        hooks: &[HookStep::KillSession, HookStep::ReleaseWorkspace],
    },
    TransitionRow {
        from: Working,
        to: Cancelled,
        gate: None,
        condition: None,
        hooks: &[HookStep::KillSession, HookStep::ReleaseWorkspace],
    },
    TransitionRow {
        from: Reviewing,
        to: Cancelled,
        gate: None,
        condition: None,
        hooks: &[HookStep::KillSession, HookStep::ReleaseWorkspace],
    },
    TransitionRow {
        from: Stuck,
        to: Cancelled,
        gate: None,
        condition: None,
        hooks: &[HookStep::KillSession, HookStep::ReleaseWorkspace],
    },
];

/// Result of a successful transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionOutcome {
    pub from: TaskStatus,
    pub to: TaskStatus,
}

/// Find the first row matching `(from, to)` whose condition (if any) holds.
pub fn find_row(from: TaskStatus, to: TaskStatus, task: &Task) -> Option<&'static TransitionRow> {
    TRANSITION_TABLE
        .iter()
        .filter(|row| row.from == from && row.to == to)
        .find(|row| row.condition.is_none_or(|c| c.holds(task)))
}

/// Hooks are executed by this trait so the executor stays decoupled from
/// the concrete implementations in `hooks.rs`. Hook failures are logged
/// and swallowed — they never roll back the status transition.
pub trait HookRunner {
    fn run(&mut self, step: HookStep, task: &mut Task) -> anyhow_like::HookResult;
}

/// A minimal local stand-in for `anyhow::Result` so this module doesn't
/// need a blanket error type for hook failures, which are always logged
/// and never propagated.
pub mod anyhow_like {
    pub type HookResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Validate and apply one transition: select the row, check its gate,
/// run its hooks in order, persist the new status, then append a
/// `status.changed` event.
///
/// Hook failures are logged as warnings and do not abort the transition —
/// per the engine's design, the status change itself is unconditional once
/// the gate passes. `execute_in_memory` below skips persistence entirely
/// and is what most unit tests exercise; production callers use `execute`.
pub fn execute(
    paths: &anvil_paths::AnvilPaths,
    now: &str,
    runner: &mut dyn HookRunner,
    task: &mut Task,
    to: TaskStatus,
) -> Result<TransitionOutcome, TransitionError> {
    let outcome = execute_in_memory(runner, task, to)?;

    task.updated_at = now.to_string();
    persistence::save_task(paths, task)?;

    let event = HistoryEvent::StatusChanged {
        timestamp: now.to_string(),
        from: outcome.from.to_string(),
        to: outcome.to.to_string(),
    };
    persistence::append_history(paths, &task.project, &task.id, &event)?;

    Ok(outcome)
}

/// The same procedure as [`execute`], minus persistence and the history
/// append — used where the caller will persist separately (e.g. hooks that
/// themselves save the task after mutating it) and by most unit tests.
pub fn execute_in_memory(
    runner: &mut dyn HookRunner,
    task: &mut Task,
    to: TaskStatus,
) -> Result<TransitionOutcome, TransitionError> {
    let from = task.status;
    let row = find_row(from, to, task).ok_or_else(|| TransitionError::NoValidTransition {
        from: from.to_string(),
        to: to.to_string(),
    })?;

    if let Some(gate) = row.gate {
        gate.check(&task.body)?;
    }

    for &step in row.hooks {
        if let Err(error) = runner.run(step, task) {
            warn!(
                event = "anvil.transitions.hook_failed",
                task_id = %task.id,
                step = ?step,
                error = %error,
            );
        }
    }

    task.status = to;
    task.crash_count = 0;

    info!(event = "anvil.transitions.applied", task_id = %task.id, from = %from, to = %to);

    Ok(TransitionOutcome { from, to })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anvil_protocol::{BranchName, HarnessId, ProjectName, TaskId};

    fn task_with(status: TaskStatus, body: &str) -> Task {
        Task {
            id: TaskId::new("t1"),
            project: ProjectName::new("acme"),
            branch: BranchName::new("feature"),
            harness: HarnessId::new("claude"),
            review_harness: HarnessId::new("claude"),
            status,
            review_round: 0,
            crash_count: 0,
            workspace: None,
            session: None,
            summary: "s".to_string(),
            created_at: "t0".to_string(),
            updated_at: "t0".to_string(),
            pr_url: None,
            pr_state: None,
            body: body.to_string(),
        }
    }

    struct NoopRunner;
    impl HookRunner for NoopRunner {
        fn run(&mut self, _step: HookStep, _task: &mut Task) -> anyhow_like::HookResult {
            Ok(())
        }
    }

    struct FailingRunner;
    impl HookRunner for FailingRunner {
        fn run(&mut self, _step: HookStep, _task: &mut Task) -> anyhow_like::HookResult {
            Err("boom".into())
        }
    }

    #[test]
    fn pending_to_planning_has_no_gate() {
        let mut task = task_with(Pending, "");
        let outcome = execute_in_memory(&mut NoopRunner, &mut task, Planning).unwrap();
        assert_eq!(outcome, TransitionOutcome { from: Pending, to: Planning });
        assert_eq!(task.status, Planning);
    }

    #[test]
    fn planning_to_working_requires_plan_gate() {
        let mut task = task_with(Planning, "no plan here");
        let err = execute_in_memory(&mut NoopRunner, &mut task, Working).unwrap_err();
        assert_eq!(err.kind(), "gate-failed");
        assert_eq!(task.status, Planning, "failed gate must leave task unchanged");
    }

    #[test]
    fn planning_to_working_succeeds_with_plan_gate_satisfied() {
        let mut task = task_with(Planning, "## Plan\nAPPROACH: x\n");
        execute_in_memory(&mut NoopRunner, &mut task, Working).unwrap();
        assert_eq!(task.status, Working);
    }

    #[test]
    fn agent_review_to_working_rejected_when_review_round_at_limit() {
        let mut task = task_with(AgentReview, "## Review\nVerdict: FAIL\n");
        task.review_round = 2;
        let err = execute_in_memory(&mut NoopRunner, &mut task, Working).unwrap_err();
        assert_eq!(err.kind(), "no-valid-transition");
    }

    #[test]
    fn agent_review_to_stuck_rejected_when_review_round_below_limit() {
        let mut task = task_with(AgentReview, "## Review\nVerdict: FAIL\n");
        task.review_round = 1;
        let err = execute_in_memory(&mut NoopRunner, &mut task, Stuck).unwrap_err();
        assert_eq!(err.kind(), "no-valid-transition");
    }

    #[test]
    fn agent_review_to_working_rejected_when_verdict_is_pass() {
        let mut task = task_with(AgentReview, "## Review\nVerdict: PASS\n");
        task.review_round = 0;
        let err = execute_in_memory(&mut NoopRunner, &mut task, Working).unwrap_err();
        assert_eq!(err.kind(), "gate-failed");
    }

    #[test]
    fn crash_count_resets_on_successful_transition() {
        let mut task = task_with(Pending, "");
        task.crash_count = 3;
        execute_in_memory(&mut NoopRunner, &mut task, Planning).unwrap();
        assert_eq!(task.crash_count, 0);
    }

    #[test]
    fn hook_failure_does_not_roll_back_the_transition() {
        let mut task = task_with(Pending, "");
        let outcome = execute_in_memory(&mut FailingRunner, &mut task, Planning).unwrap();
        assert_eq!(outcome.to, Planning);
        assert_eq!(task.status, Planning);
    }

    #[test]
    fn no_row_for_unrelated_status_pair() {
        let mut task = task_with(Done, "");
        let err = execute_in_memory(&mut NoopRunner, &mut task, Working).unwrap_err();
        assert_eq!(err.kind(), "no-valid-transition");
    }

    #[test]
    fn any_active_cancel_rows_exist_for_every_nonterminal_status() {
        for status in [Pending, Planning, Clarification, Working, AgentReview, Reviewing, Stuck] {
            let task = task_with(status, "");
            assert!(
                find_row(status, Cancelled, &task).is_some(),
                "expected a cancel row from {status:?}"
            );
        }
    }
}
