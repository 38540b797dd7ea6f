//! Task lifecycle operations that sit outside the state-machine executor:
//! creation, cancellation, merge, and deletion.

use anvil_protocol::{
    BranchName, Clock, HarnessId, HistoryEvent, MergeStrategy, Multiplexer, PrHost, PrState, Project,
    Task, TaskStatus, Vcs,
};
use tracing::warn;
use uuid::Uuid;

use crate::errors::{CrudError, MergeError};
use crate::hooks::{Dependencies, EngineHooks};
use crate::persistence;
use crate::pool;
use crate::transitions;

/// Shared driver bundle every CRUD operation needs.
pub struct Engine<'a> {
    pub paths: &'a anvil_paths::AnvilPaths,
    pub multiplexer: &'a dyn Multiplexer,
    pub vcs: &'a dyn Vcs,
    pub pr_host: &'a dyn PrHost,
    pub clock: &'a dyn Clock,
}

impl<'a> Engine<'a> {
    fn hooks(&self, project: &'a Project) -> EngineHooks<'a> {
        EngineHooks {
            deps: Dependencies {
                paths: self.paths,
                multiplexer: self.multiplexer,
                vcs: self.vcs,
                pr_host: self.pr_host,
                clock: self.clock,
                project,
            },
        }
    }
}

fn fresh_task_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Inputs for [`create`].
pub struct CreateRequest<'a> {
    pub project: &'a Project,
    pub branch: &'a str,
    pub summary: &'a str,
    pub body: &'a str,
    pub harness: HarnessId,
    pub review_harness: HarnessId,
    pub initial_status: TaskStatus,
    pub auto_spawn: bool,
}

/// Create a task: pick a unique branch name, assign an id, write the
/// document, append `task.created`, and optionally auto-spawn it via the
/// executor (`pending -> planning`).
pub fn create<'a>(engine: &Engine<'a>, request: CreateRequest<'a>) -> Result<Task, CrudError> {
    let _ = engine.vcs.fetch(&request.project.path);

    let branch = unique_branch_name(engine, request.project, request.branch)?;
    let id = fresh_task_id();
    let now = engine.clock.now();

    let mut task = Task {
        id: anvil_protocol::TaskId::new(id),
        project: request.project.name.clone(),
        branch: BranchName::new(branch),
        harness: request.harness,
        review_harness: request.review_harness,
        status: request.initial_status,
        review_round: 0,
        crash_count: 0,
        workspace: None,
        session: None,
        summary: request.summary.to_string(),
        created_at: now.clone(),
        updated_at: now.clone(),
        pr_url: None,
        pr_state: None,
        body: request.body.to_string(),
    };

    persistence::save_task(engine.paths, &task)?;
    let created = HistoryEvent::TaskCreated {
        timestamp: now,
        task_id: task.id.to_string(),
        project: task.project.to_string(),
        branch: task.branch.to_string(),
        summary: task.summary.clone(),
    };
    persistence::append_history(engine.paths, &task.project, &task.id, &created)?;

    if request.auto_spawn && task.status == TaskStatus::Pending {
        let mut runner = engine.hooks(request.project);
        let now = engine.clock.now();
        transitions::execute(engine.paths, &now, &mut runner, &mut task, TaskStatus::Planning)?;
    }

    Ok(task)
}

fn unique_branch_name(engine: &Engine<'_>, project: &Project, desired: &str) -> Result<String, CrudError> {
    if !engine.vcs.branch_exists(&project.path, desired)? {
        return Ok(desired.to_string());
    }
    for suffix in 2.. {
        let candidate = format!("{desired}-{suffix}");
        if !engine.vcs.branch_exists(&project.path, &candidate)? {
            return Ok(candidate);
        }
        if suffix > 10_000 {
            break;
        }
    }
    Ok(format!("{desired}-{}", fresh_task_id()))
}

/// Cancel a task: run the transition from its current status to
/// `cancelled`; the row's hooks cover kill/release.
pub fn cancel<'a>(engine: &Engine<'a>, project: &'a Project, task: &mut Task) -> Result<(), CrudError> {
    let mut runner = engine.hooks(project);
    let now = engine.clock.now();
    transitions::execute(engine.paths, &now, &mut runner, task, TaskStatus::Cancelled)?;
    Ok(())
}

/// Inputs for [`merge`].
pub struct MergeRequest<'a> {
    pub project: &'a Project,
    pub strategy: MergeStrategy,
    pub force_local: bool,
}

/// Merge a `reviewing` task into its project's default branch.
pub fn merge<'a>(engine: &Engine<'a>, request: MergeRequest<'a>, task: &mut Task) -> Result<(), MergeError> {
    if task.status != TaskStatus::Reviewing {
        return Err(MergeError::Transition(crate::errors::TransitionError::NoValidTransition {
            from: task.status.to_string(),
            to: TaskStatus::Done.to_string(),
        }));
    }

    let commit_hash;

    if !request.force_local {
        if let Some(pr_url) = task.pr_url.clone() {
            let status = engine.pr_host.get_pr_status(&request.project.path, &task.branch)?;
            match status.state {
                Some(PrState::Merged) => {
                    let _ = engine.vcs.fetch(&request.project.path);
                    let origin_ref = format!("origin/{}", request.project.default_branch);
                    engine.vcs.reset_hard(&request.project.path, &origin_ref)?;
                    commit_hash = status.merge_commit.unwrap_or_default();
                    let event = HistoryEvent::PrMerged {
                        timestamp: engine.clock.now(),
                        url: pr_url,
                        merge_commit: commit_hash.clone(),
                    };
                    persistence::append_history(engine.paths, &task.project, &task.id, &event)?;
                }
                Some(PrState::Open) => {
                    return Err(MergeError::PrOpen {
                        branch: task.branch.to_string(),
                    });
                }
                Some(PrState::Closed) => {
                    return Err(MergeError::PrClosed {
                        branch: task.branch.to_string(),
                    });
                }
                None => {
                    commit_hash = local_merge(engine, request.project, task, request.strategy)?;
                }
            }
        } else {
            commit_hash = local_merge(engine, request.project, task, request.strategy)?;
        }
    } else {
        commit_hash = local_merge(engine, request.project, task, request.strategy)?;
    }

    let _ = engine.vcs.delete_remote_branch(&request.project.path, &task.branch, None);

    if let Some(workspace) = task.workspace.clone() {
        pool::release(engine.paths, engine.vcs, workspace.as_ref(), &request.project.default_branch, true)?;
        task.workspace = None;
    }
    if let Some(session) = task.session.clone() {
        engine.multiplexer.kill_session_safe(session.as_ref());
        task.session = None;
    }

    let from = task.status;
    task.status = TaskStatus::Done;
    task.updated_at = engine.clock.now();
    persistence::save_task(engine.paths, task)?;

    let merged_event = HistoryEvent::TaskMerged {
        timestamp: engine.clock.now(),
        commit_hash,
        strategy: match request.strategy {
            MergeStrategy::Ff => "ff".to_string(),
            MergeStrategy::Merge => "merge".to_string(),
        },
    };
    persistence::append_history(engine.paths, &task.project, &task.id, &merged_event)?;

    let status_event = HistoryEvent::StatusChanged {
        timestamp: engine.clock.now(),
        from: from.to_string(),
        to: TaskStatus::Done.to_string(),
    };
    persistence::append_history(engine.paths, &task.project, &task.id, &status_event)?;

    Ok(())
}

fn local_merge(
    engine: &Engine<'_>,
    project: &Project,
    task: &Task,
    strategy: MergeStrategy,
) -> Result<String, MergeError> {
    engine.vcs.checkout(&project.path, &project.default_branch)?;
    engine.vcs.merge(&project.path, &task.branch, strategy)?;
    let commit_hash = engine.vcs.get_commit_hash(&project.path, false)?;
    let _ = engine.vcs.push(&project.path, None, None);
    Ok(commit_hash)
}

/// Delete a task's on-disk record. Allowed only once the task is terminal;
/// releases any lingering workspace/session first.
pub fn delete(engine: &Engine<'_>, project: &Project, task: &Task) -> Result<(), CrudError> {
    if !task.is_terminal() {
        return Err(CrudError::NotTerminal(task.id.to_string()));
    }

    if let Some(workspace) = &task.workspace {
        if let Err(error) = pool::release(engine.paths, engine.vcs, workspace.as_ref(), &project.default_branch, true) {
            warn!(event = "anvil.crud.delete_release_failed", task_id = %task.id, error = %error);
        }
    }
    if let Some(session) = &task.session {
        engine.multiplexer.kill_session_safe(session.as_ref());
    }

    let dir = engine.paths.task_dir(&task.project, &task.id);
    std::fs::remove_dir_all(&dir).map_err(|source| {
        crate::errors::PersistenceError::Io {
            path: dir.display().to_string(),
            source,
        }
    })?;
    Ok(())
}
