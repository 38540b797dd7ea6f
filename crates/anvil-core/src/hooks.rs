//! Concrete hook implementations dispatched by the transition executor.
//!
//! Each hook takes the task plus the drivers it needs, mutates the task in
//! place, and is responsible for persisting anything it changes — the
//! executor only persists the status change itself.

use std::path::Path;

use anvil_protocol::{Clock, DriverError, Multiplexer, PrHost, Project, Task, Vcs};
use tracing::warn;

use crate::errors::{PersistenceError, PoolError};
use crate::persistence;
use crate::pool;
use crate::transitions::{HookRunner, HookStep, SpawnVariant};

const WORKER_WINDOW: &str = "worker";
const REVIEWER_WINDOW: &str = "reviewer";

fn session_name(task_id: &str) -> String {
    format!("anvil-{task_id}")
}

/// Builds the launch command for a given spawn variant. The actual prompt
/// construction is harness-specific and out of scope here; an empty
/// command means "drop into an interactive shell".
fn variant_command(_variant: SpawnVariant, _harness: &str) -> String {
    String::new()
}

fn harness_for_variant<'a>(variant: SpawnVariant, task: &'a Task) -> &'a str {
    match variant {
        SpawnVariant::Reviewer => &task.review_harness,
        _ => &task.harness,
    }
}

fn window_for_variant(variant: SpawnVariant) -> &'static str {
    match variant {
        SpawnVariant::Reviewer => REVIEWER_WINDOW,
        _ => WORKER_WINDOW,
    }
}

/// Bundles the dependencies every hook may need. Held by reference so the
/// caller controls the concrete driver implementations.
pub struct Dependencies<'a> {
    pub paths: &'a anvil_paths::AnvilPaths,
    pub multiplexer: &'a dyn Multiplexer,
    pub vcs: &'a dyn Vcs,
    pub pr_host: &'a dyn PrHost,
    pub clock: &'a dyn Clock,
    pub project: &'a Project,
}

/// Implements [`HookRunner`] by dispatching each [`HookStep`] to its
/// concrete effect. Constructed fresh per transition with borrowed
/// dependencies.
pub struct EngineHooks<'a> {
    pub deps: Dependencies<'a>,
}

impl<'a> HookRunner for EngineHooks<'a> {
    fn run(
        &mut self,
        step: HookStep,
        task: &mut Task,
    ) -> crate::transitions::anyhow_like::HookResult {
        match step {
            HookStep::AcquireWorkspace => self.acquire_workspace(task),
            HookStep::SpawnAgent(variant) => self.spawn_agent(task, variant),
            HookStep::ReleaseWorkspace => self.release_workspace(task),
            HookStep::KillSession => self.kill_session(task),
            HookStep::KillReviewer => self.kill_reviewer(task),
            HookStep::IncrementReviewRound => self.increment_review_round(task),
            HookStep::NotifyWorker => self.notify_worker(task),
            HookStep::SpawnNext => self.spawn_next(task),
            HookStep::DeleteRemoteBranch => self.delete_remote_branch(task),
        }
        .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)
    }
}

#[derive(Debug, thiserror::Error)]
enum HookError {
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Pool(#[from] crate::errors::PoolError),
}

impl<'a> EngineHooks<'a> {
    fn save(&self, task: &Task) -> Result<(), HookError> {
        persistence::save_task(self.deps.paths, task)?;
        Ok(())
    }

    fn acquire_workspace(&self, task: &mut Task) -> Result<(), HookError> {
        if task.workspace.is_some() {
            return Ok(());
        }
        let task_ref = format!("{}/{}", task.project, task.branch);
        let name = pool::acquire(self.deps.paths, self.deps.vcs, self.deps.project, &task_ref)?;

        if pool::is_branch_bound(self.deps.paths, &task.project, &task.branch, name.as_ref())? {
            let _ = pool::release(
                self.deps.paths,
                self.deps.vcs,
                name.as_ref(),
                &self.deps.project.default_branch,
                true,
            );
            return Err(HookError::Pool(PoolError::BranchInUseByWorktree {
                branch: task.branch.to_string(),
            }));
        }

        let workspace_path = self.deps.paths.workspace_dir(name.as_ref());

        let _ = self.deps.vcs.fetch(&workspace_path);
        let origin_ref = format!("origin/{}", self.deps.project.default_branch);
        if self.deps.vcs.reset_hard(&workspace_path, &origin_ref).is_err() {
            self.deps.vcs.reset_hard(&workspace_path, &self.deps.project.default_branch)?;
        }

        if !self.deps.vcs.branch_exists(&workspace_path, &task.branch)? {
            self.deps.vcs.create_branch(&workspace_path, &task.branch, None)?;
        }
        self.deps.vcs.checkout(&workspace_path, &task.branch)?;

        pool::patch_git_excludes(&workspace_path);
        self.symlink_task_file(task, &workspace_path)?;
        self.run_harness_workspace_setup(task, &workspace_path);

        task.workspace = Some(name);
        task.updated_at = self.deps.clock.now();
        self.save(task)
    }

    /// Symlinks the canonical `TASK.md` (the per-task document under the
    /// data directory) into the worktree so the agent can read/edit it
    /// in place.
    fn symlink_task_file(&self, task: &Task, workspace_path: &Path) -> Result<(), HookError> {
        let target = self.deps.paths.task_file(&task.project, &task.id);
        let link = workspace_path.join("TASK.md");
        let _ = std::fs::remove_file(&link);
        std::os::unix::fs::symlink(&target, &link).map_err(|source| {
            PersistenceError::Io {
                path: link.display().to_string(),
                source,
            }
            .into()
        })
    }

    /// Per-harness workspace setup (e.g. permission settings) is a concern
    /// of the concrete harness driver, out of scope for this crate; this is
    /// the hook point the spec names, left a no-op until a driver is wired.
    fn run_harness_workspace_setup(&self, _task: &Task, _workspace_path: &Path) {}

    fn spawn_agent(&self, task: &mut Task, variant: SpawnVariant) -> Result<(), HookError> {
        let Some(workspace) = task.workspace.clone() else {
            return Err(HookError::Driver(DriverError::MultiplexerUnavailable(
                "cannot spawn agent without a workspace".to_string(),
            )));
        };
        let workspace_path = self.deps.paths.workspace_dir(workspace.as_ref());
        let harness = harness_for_variant(variant, task).to_string();
        let command = variant_command(variant, &harness);
        let window = window_for_variant(variant);

        let session = match &task.session {
            Some(existing) => {
                self.deps
                    .multiplexer
                    .new_window(existing.as_ref(), window, &workspace_path, &command)?;
                existing.clone()
            }
            None => {
                let name = anvil_protocol::SessionName::new(session_name(&task.id));
                self.deps
                    .multiplexer
                    .new_session(name.as_ref(), window, &workspace_path, &command)?;
                name
            }
        };

        task.session = Some(session.clone());
        task.updated_at = self.deps.clock.now();
        self.save(task)?;

        let event = anvil_protocol::HistoryEvent::AgentSpawned {
            timestamp: self.deps.clock.now(),
            workspace: workspace.to_string(),
            session: session.to_string(),
        };
        persistence::append_history(self.deps.paths, &task.project, &task.id, &event)?;
        Ok(())
    }

    fn release_workspace(&self, task: &mut Task) -> Result<(), HookError> {
        let Some(workspace) = task.workspace.clone() else {
            return Ok(());
        };
        pool::release(
            self.deps.paths,
            self.deps.vcs,
            workspace.as_ref(),
            &self.deps.project.default_branch,
            false,
        )?;
        task.workspace = None;
        task.updated_at = self.deps.clock.now();
        self.save(task)
    }

    fn kill_session(&self, task: &mut Task) -> Result<(), HookError> {
        let Some(session) = task.session.clone() else {
            return Ok(());
        };
        self.deps.multiplexer.kill_session_safe(session.as_ref());
        task.session = None;
        task.updated_at = self.deps.clock.now();
        self.save(task)
    }

    fn kill_reviewer(&self, task: &mut Task) -> Result<(), HookError> {
        if let Some(session) = &task.session {
            self.deps.multiplexer.kill_window_safe(session.as_ref(), REVIEWER_WINDOW);
        }
        Ok(())
    }

    fn increment_review_round(&self, task: &mut Task) -> Result<(), HookError> {
        task.review_round += 1;
        task.updated_at = self.deps.clock.now();
        self.save(task)
    }

    fn notify_worker(&self, task: &mut Task) -> Result<(), HookError> {
        if let Some(session) = &task.session {
            self.deps
                .multiplexer
                .send_literal(session.as_ref(), "A new review round is available.\n")?;
        }
        Ok(())
    }

    fn spawn_next(&self, task: &mut Task) -> Result<(), HookError> {
        let ids = persistence::list_task_ids(self.deps.paths, &task.project);
        let mut pending: Vec<Task> = ids
            .iter()
            .filter_map(|id| persistence::load_task(self.deps.paths, &task.project, id).ok())
            .filter(|t| t.status == anvil_protocol::TaskStatus::Pending)
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        let Some(mut next) = pending.into_iter().next() else {
            return Ok(());
        };

        let mut runner = EngineHooks {
            deps: Dependencies {
                paths: self.deps.paths,
                multiplexer: self.deps.multiplexer,
                vcs: self.deps.vcs,
                pr_host: self.deps.pr_host,
                clock: self.deps.clock,
                project: self.deps.project,
            },
        };
        let now = self.deps.clock.now();
        if let Err(error) =
            crate::transitions::execute(self.deps.paths, &now, &mut runner, &mut next, anvil_protocol::TaskStatus::Planning)
        {
            warn!(event = "anvil.hooks.spawn_next_failed", task_id = %next.id, error = %error);
        }
        Ok(())
    }

    fn delete_remote_branch(&self, task: &mut Task) -> Result<(), HookError> {
        let _ = self
            .deps
            .vcs
            .delete_remote_branch(&self.deps.project.path, &task.branch, None);
        Ok(())
    }
}
