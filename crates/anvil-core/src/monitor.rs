//! Exit monitor: periodic reconciliation between live multiplexer sessions
//! and on-disk task state.
//!
//! Intended to run on a timer (every 10-30s, the caller's choice) via
//! whatever scheduling mechanism the embedding binary uses — this module
//! has no timer of its own, only the per-tick reconciliation logic.

use anvil_protocol::{Clock, HistoryEvent, Multiplexer, PrHost, Project, Task, TaskStatus, Vcs};
use tracing::warn;

use crate::errors::MonitorError;
use crate::gates::{self, ReviewVerdict};
use crate::hooks::{Dependencies, EngineHooks};
use crate::persistence;
use crate::pool;
use crate::transitions;

const CRASH_STUCK_THRESHOLD: u32 = 2;

const DEAD_SESSION_ELIGIBLE: &[TaskStatus] = &[
    TaskStatus::Planning,
    TaskStatus::Working,
    TaskStatus::AgentReview,
    TaskStatus::Clarification,
    TaskStatus::Reviewing,
    TaskStatus::Stuck,
];

/// Dependencies a reconciliation tick needs for one project.
pub struct Tick<'a> {
    pub paths: &'a anvil_paths::AnvilPaths,
    pub multiplexer: &'a dyn Multiplexer,
    pub vcs: &'a dyn Vcs,
    pub pr_host: &'a dyn PrHost,
    pub clock: &'a dyn Clock,
    pub project: &'a Project,
}

/// Run one reconciliation pass over every task in `tick.project`: detect
/// dead sessions, apply the per-status auto-advance or crash rule, then
/// release orphaned pool entries.
pub fn reconcile(tick: &Tick<'_>) -> Result<(), MonitorError> {
    let live_sessions = tick.multiplexer.list_sessions()?;
    let ids = persistence::list_task_ids(tick.paths, &tick.project.name);

    let mut tasks: Vec<Task> = Vec::new();
    for id in &ids {
        match persistence::load_task(tick.paths, &tick.project.name, id) {
            Ok(task) => tasks.push(task),
            Err(error) => warn!(
                event = "anvil.monitor.task_load_failed",
                project = %tick.project.name,
                task_id = %id,
                error = %error,
            ),
        }
    }

    for task in &mut tasks {
        if task.is_terminal() {
            continue;
        }
        let Some(session) = task.session.clone() else {
            continue;
        };
        if !DEAD_SESSION_ELIGIBLE.contains(&task.status) {
            continue;
        }
        if live_sessions.iter().any(|s| s.as_str() == session.as_ref()) {
            continue;
        }
        reconcile_dead_session(tick, task);
    }

    reconcile_orphans(tick, &tasks)?;
    Ok(())
}

fn reconcile_dead_session(tick: &Tick<'_>, task: &mut Task) {
    let now = tick.clock.now();
    let advance = match task.status {
        TaskStatus::Planning => gates::check_plan(&task.body).is_ok().then_some(TaskStatus::Working),
        TaskStatus::Working => gates::check_handoff(&task.body).is_ok().then_some(TaskStatus::AgentReview),
        TaskStatus::AgentReview => match gates::check_review(&task.body) {
            Ok(ReviewVerdict::Pass) => Some(TaskStatus::Reviewing),
            Ok(ReviewVerdict::Fail) if task.review_round < 2 => Some(TaskStatus::Working),
            Ok(ReviewVerdict::Fail) => Some(TaskStatus::Stuck),
            Err(_) => None,
        },
        TaskStatus::Clarification | TaskStatus::Reviewing | TaskStatus::Stuck => None,
        _ => None,
    };

    match advance {
        Some(to) => auto_advance(tick, task, to),
        None => crash(tick, task, &now),
    }
}

fn auto_advance(tick: &Tick<'_>, task: &mut Task, to: TaskStatus) {
    let now = tick.clock.now();
    let from = task.status;
    let mut runner = EngineHooks {
        deps: Dependencies {
            paths: tick.paths,
            multiplexer: tick.multiplexer,
            vcs: tick.vcs,
            pr_host: tick.pr_host,
            clock: tick.clock,
            project: tick.project,
        },
    };
    match transitions::execute_in_memory(&mut runner, task, to) {
        Ok(_) => {
            task.updated_at = now.clone();
            if let Err(error) = persistence::save_task(tick.paths, task) {
                warn!(event = "anvil.monitor.save_failed", task_id = %task.id, error = %error);
                return;
            }
            let reason = match to {
                TaskStatus::Working if from == TaskStatus::Planning => "## Plan found",
                TaskStatus::AgentReview => "## Handoff found",
                TaskStatus::Reviewing => "review verdict PASS",
                TaskStatus::Working => "review verdict FAIL, review_round < 2",
                TaskStatus::Stuck => "review verdict FAIL, review_round >= 2",
                _ => "auto-advance",
            };
            let event = HistoryEvent::AutoAdvanced {
                timestamp: now,
                from: from.to_string(),
                to: to.to_string(),
                reason: reason.to_string(),
            };
            if let Err(error) = persistence::append_history(tick.paths, &task.project, &task.id, &event) {
                warn!(event = "anvil.monitor.history_append_failed", task_id = %task.id, error = %error);
            }
        }
        Err(error) => {
            warn!(event = "anvil.monitor.auto_advance_rejected", task_id = %task.id, error = %error);
            crash(tick, task, &now);
        }
    }
}

/// Increment `crash_count`; past the threshold, force the task straight to
/// `stuck` without running it back through the executor.
fn crash(tick: &Tick<'_>, task: &mut Task, now: &str) {
    task.crash_count += 1;
    task.updated_at = now.to_string();

    let crashed_event = HistoryEvent::AgentCrashed {
        timestamp: now.to_string(),
        status: task.status.to_string(),
        crash_count: task.crash_count,
        reason: "dead session, no valid auto-advance".to_string(),
    };

    if task.crash_count >= CRASH_STUCK_THRESHOLD {
        let from = task.status;
        task.status = TaskStatus::Stuck;
        if let Err(error) = persistence::save_task(tick.paths, task) {
            warn!(event = "anvil.monitor.save_failed", task_id = %task.id, error = %error);
            return;
        }
        let _ = persistence::append_history(tick.paths, &task.project, &task.id, &crashed_event);
        let advanced_event = HistoryEvent::AutoAdvanced {
            timestamp: now.to_string(),
            from: from.to_string(),
            to: TaskStatus::Stuck.to_string(),
            reason: "crash_count reached 2".to_string(),
        };
        if let Err(error) = persistence::append_history(tick.paths, &task.project, &task.id, &advanced_event) {
            warn!(event = "anvil.monitor.history_append_failed", task_id = %task.id, error = %error);
        }
    } else if let Err(error) = persistence::save_task(tick.paths, task) {
        warn!(event = "anvil.monitor.save_failed", task_id = %task.id, error = %error);
    } else if let Err(error) = persistence::append_history(tick.paths, &task.project, &task.id, &crashed_event) {
        warn!(event = "anvil.monitor.history_append_failed", task_id = %task.id, error = %error);
    }
}

/// Release pool entries bound to tasks that are terminal but still hold a
/// workspace or session — a crash between the status write and the release
/// hook can leave this dangling.
fn reconcile_orphans(tick: &Tick<'_>, tasks: &[Task]) -> Result<(), MonitorError> {
    let doc = pool::snapshot(tick.paths).map_err(|error| {
        warn!(event = "anvil.monitor.pool_snapshot_failed", error = %error);
        error
    });
    let Ok(doc) = doc else { return Ok(()) };

    let terminal_refs: std::collections::HashSet<String> = tasks
        .iter()
        .filter(|t| t.is_terminal())
        .map(|t| format!("{}/{}", t.project, t.branch))
        .collect();

    let orphans = pool::find_orphans(&doc, |task_ref| terminal_refs.contains(task_ref));
    if orphans.is_empty() {
        return Ok(());
    }

    for task in tasks.iter().filter(|t| t.is_terminal()) {
        let is_orphaned_workspace = task.workspace.as_ref().is_some_and(|w| orphans.contains(&w.to_string()));
        if !is_orphaned_workspace && task.session.is_none() {
            continue;
        }
        let mut owned = task.clone();
        if let Some(session) = owned.session.clone() {
            tick.multiplexer.kill_session_safe(session.as_ref());
            owned.session = None;
        }
        if let Some(workspace) = owned.workspace.clone() {
            if let Err(error) = pool::release(tick.paths, tick.vcs, workspace.as_ref(), &tick.project.default_branch, true) {
                warn!(event = "anvil.monitor.orphan_release_failed", task_id = %owned.id, error = %error);
            }
            owned.workspace = None;
        }
        if let Err(error) = persistence::save_task(tick.paths, &owned) {
            warn!(event = "anvil.monitor.save_failed", task_id = %owned.id, error = %error);
        }
    }
    Ok(())
}
