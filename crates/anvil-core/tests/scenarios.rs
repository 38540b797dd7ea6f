//! End-to-end scenario tests exercising the engine the way a CLI front end
//! would: create, transition, merge, cancel, and reconcile a task through
//! its full lifecycle against real on-disk persistence and a real git
//! repository, with in-process fakes standing in for tmux and a PR host.

use anvil_core::hooks::{Dependencies, EngineHooks};
use anvil_core::{crud, monitor, persistence, pool, transitions};
use anvil_protocol::{
    BranchName, Clock, HarnessId, HistoryEvent, MergeStrategy, PrState, PrStatus, Project, ProjectName, Task,
    TaskId, TaskStatus,
};
use anvil_testkit::{FixedClock, GitVcs, InMemoryMultiplexer, ScriptedPrHost};
use tempfile::TempDir;

fn init_repo(path: &std::path::Path) {
    let repo = git2::Repository::init(path).unwrap();
    let sig = git2::Signature::now("Test", "test@test.com").unwrap();
    let tree_id = repo.index().unwrap().write_tree().unwrap();
    let tree = repo.find_tree(tree_id).unwrap();
    repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[]).unwrap();
}

struct Fixture {
    _repo_dir: TempDir,
    _data_dir: TempDir,
    paths: anvil_paths::AnvilPaths,
    project: Project,
    vcs: GitVcs,
    multiplexer: InMemoryMultiplexer,
    pr_host: ScriptedPrHost,
    clock: FixedClock,
}

impl Fixture {
    fn new(pool_size: u32) -> Self {
        let repo_dir = TempDir::new().unwrap();
        init_repo(repo_dir.path());
        let data_dir = TempDir::new().unwrap();
        let paths = anvil_paths::AnvilPaths::from_dir(data_dir.path().to_path_buf());
        let project = Project {
            name: ProjectName::new("demo"),
            path: repo_dir.path().to_path_buf(),
            default_branch: "master".to_string(),
            pool_size,
        };
        Fixture {
            _repo_dir: repo_dir,
            _data_dir: data_dir,
            paths,
            project,
            vcs: GitVcs::new(),
            multiplexer: InMemoryMultiplexer::new(),
            pr_host: ScriptedPrHost::new(),
            clock: FixedClock::new("2026-01-01T00:00:00Z"),
        }
    }

    fn engine(&self) -> crud::Engine<'_> {
        crud::Engine {
            paths: &self.paths,
            multiplexer: &self.multiplexer,
            vcs: &self.vcs,
            pr_host: &self.pr_host,
            clock: &self.clock,
        }
    }

    fn hooks(&self) -> EngineHooks<'_> {
        EngineHooks {
            deps: Dependencies {
                paths: &self.paths,
                multiplexer: &self.multiplexer,
                vcs: &self.vcs,
                pr_host: &self.pr_host,
                clock: &self.clock,
                project: &self.project,
            },
        }
    }

    fn transition(&self, task: &mut Task, to: TaskStatus) -> Result<(), anvil_core::TransitionError> {
        let mut runner = self.hooks();
        let now = self.clock.now();
        transitions::execute(&self.paths, &now, &mut runner, task, to)?;
        Ok(())
    }
}

/// Scenario A — happy path: create, plan, handoff, pass review, merge.
#[test]
fn scenario_a_happy_path() {
    let fx = Fixture::new(2);
    let engine = fx.engine();

    let mut task = crud::create(
        &engine,
        crud::CreateRequest {
            project: &fx.project,
            branch: "feat-a",
            summary: "Add A",
            body: "",
            harness: HarnessId::new("claude"),
            review_harness: HarnessId::new("claude"),
            initial_status: TaskStatus::Pending,
            auto_spawn: false,
        },
    )
    .unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    let events = persistence::load_history(&fx.paths, "demo", &task.id).unwrap();
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], HistoryEvent::TaskCreated { .. }));

    fx.transition(&mut task, TaskStatus::Planning).unwrap();
    assert_eq!(task.status, TaskStatus::Planning);
    assert!(task.workspace.is_some());
    assert!(task.session.is_some());
    let doc = pool::snapshot(&fx.paths).unwrap();
    let workspace = task.workspace.clone().unwrap();
    assert_eq!(doc.workspaces[workspace.as_ref()].status, pool::PoolStatus::Bound);
    assert_eq!(doc.workspaces[workspace.as_ref()].task.as_deref(), Some("demo/feat-a"));

    task.body = "## Plan\nAPPROACH: X\nTOUCHING: y.z".to_string();
    fx.transition(&mut task, TaskStatus::Working).unwrap();
    assert_eq!(task.status, TaskStatus::Working);

    task.body.push_str("\n## Handoff\nDONE: implemented\n");
    fx.transition(&mut task, TaskStatus::AgentReview).unwrap();
    assert_eq!(task.status, TaskStatus::AgentReview);
    assert_eq!(task.review_round, 1);
    let events = persistence::load_history(&fx.paths, "demo", &task.id).unwrap();
    assert!(events.iter().any(|e| matches!(e, HistoryEvent::AgentSpawned { .. })));

    task.body.push_str("\n## Review\nVerdict: PASS\n");
    fx.transition(&mut task, TaskStatus::Reviewing).unwrap();
    assert_eq!(task.status, TaskStatus::Reviewing);

    crud::merge(
        &engine,
        crud::MergeRequest {
            project: &fx.project,
            strategy: MergeStrategy::Ff,
            force_local: false,
        },
        &mut task,
    )
    .unwrap();
    assert_eq!(task.status, TaskStatus::Done);
    assert!(task.workspace.is_none());
    assert!(task.session.is_none());

    let events = persistence::load_history(&fx.paths, "demo", &task.id).unwrap();
    assert!(matches!(events[events.len() - 2], HistoryEvent::TaskMerged { .. }));
    assert!(matches!(events[events.len() - 1], HistoryEvent::StatusChanged { .. }));
    let doc = pool::snapshot(&fx.paths).unwrap();
    assert_eq!(doc.workspaces[workspace.as_ref()].status, pool::PoolStatus::Available);
}

fn pending_task(project: &str, branch: &str, review_round: u32, body: &str) -> Task {
    Task {
        id: TaskId::new("t1"),
        project: ProjectName::new(project),
        branch: BranchName::new(branch),
        harness: HarnessId::new("claude"),
        review_harness: HarnessId::new("claude"),
        status: TaskStatus::AgentReview,
        review_round,
        crash_count: 0,
        workspace: None,
        session: None,
        summary: "s".to_string(),
        created_at: "2026-01-01T00:00:00Z".to_string(),
        updated_at: "2026-01-01T00:00:00Z".to_string(),
        pr_url: None,
        pr_state: None,
        body: body.to_string(),
    }
}

/// Scenario B — review fails twice, second failure is stuck instead of
/// looping back to working.
#[test]
fn scenario_b_review_fail_fix_fail_again_goes_stuck() {
    let fx = Fixture::new(1);
    let mut task = pending_task("demo", "feat-b", 1, "## Review\nVerdict: FAIL\n");

    fx.transition(&mut task, TaskStatus::Working).unwrap();
    assert_eq!(task.status, TaskStatus::Working);

    task.body = "## Handoff\nDONE: retried\n".to_string();
    fx.transition(&mut task, TaskStatus::AgentReview).unwrap();
    assert_eq!(task.review_round, 2);

    task.body = "## Review\nVerdict: FAIL\n".to_string();
    let err = fx.transition(&mut task, TaskStatus::Working).unwrap_err();
    assert_eq!(err.kind(), "no-valid-transition");
    assert_eq!(task.status, TaskStatus::AgentReview, "rejected transition must leave the task unchanged");

    fx.transition(&mut task, TaskStatus::Stuck).unwrap();
    assert_eq!(task.status, TaskStatus::Stuck);
}

/// Scenario C — a dead session with no handoff crashes twice, then is
/// forced to stuck by the exit monitor.
#[test]
fn scenario_c_crash_then_forced_stuck() {
    let fx = Fixture::new(1);
    let mut task = pending_task("demo", "feat-c", 0, "no handoff yet");
    task.status = TaskStatus::Working;
    task.session = Some(anvil_protocol::SessionName::new("demo/x"));
    persistence::save_task(&fx.paths, &task).unwrap();

    let tick = monitor::Tick {
        paths: &fx.paths,
        multiplexer: &fx.multiplexer,
        vcs: &fx.vcs,
        pr_host: &fx.pr_host,
        clock: &fx.clock,
        project: &fx.project,
    };
    monitor::reconcile(&tick).unwrap();
    let reloaded = persistence::load_task(&fx.paths, "demo", "t1").unwrap();
    assert_eq!(reloaded.crash_count, 1);
    assert_eq!(reloaded.status, TaskStatus::Working);

    monitor::reconcile(&tick).unwrap();
    let reloaded = persistence::load_task(&fx.paths, "demo", "t1").unwrap();
    assert_eq!(reloaded.crash_count, 2);
    assert_eq!(reloaded.status, TaskStatus::Stuck);
    let events = persistence::load_history(&fx.paths, "demo", "t1").unwrap();
    assert!(matches!(events.last(), Some(HistoryEvent::AutoAdvanced { to, .. }) if to == "stuck"));
}

/// Scenario D — pool contention: a single-slot pool exhausts on the second
/// acquire, then frees up after the first task releases.
#[test]
fn scenario_d_pool_contention() {
    let fx = Fixture::new(1);
    let name1 = pool::acquire(&fx.paths, &fx.vcs, &fx.project, "demo/feat-d1").unwrap();

    use anvil_protocol::EngineError;
    let err = pool::acquire(&fx.paths, &fx.vcs, &fx.project, "demo/feat-d2").unwrap_err();
    assert_eq!(err.error_code(), "POOL_EXHAUSTED");

    pool::release(&fx.paths, &fx.vcs, name1.as_ref(), &fx.project.default_branch, false).unwrap();

    let name2 = pool::acquire(&fx.paths, &fx.vcs, &fx.project, "demo/feat-d2").unwrap();
    assert_eq!(name1, name2, "the freed slot must be reused rather than a new one created");
}

/// Scenario E — merging via a PR host that reports the PR already merged
/// skips the local merge step entirely.
#[test]
fn scenario_e_pr_already_merged() {
    let fx = Fixture::new(1);
    let engine = fx.engine();
    fx.pr_host.push_status(PrStatus {
        exists: true,
        url: Some("https://example.invalid/pull/42".to_string()),
        state: Some(PrState::Merged),
        merge_commit: Some("abc".to_string()),
        checks: anvil_protocol::CiStatus::Pass,
    });

    let mut task = pending_task("demo", "feat-e", 0, "");
    task.status = TaskStatus::Reviewing;
    task.pr_url = Some("https://example.invalid/pull/42".to_string());

    crud::merge(
        &engine,
        crud::MergeRequest {
            project: &fx.project,
            strategy: MergeStrategy::Ff,
            force_local: false,
        },
        &mut task,
    )
    .unwrap();

    assert_eq!(task.status, TaskStatus::Done);
    let events = persistence::load_history(&fx.paths, "demo", &task.id).unwrap();
    assert!(events.iter().any(
        |e| matches!(e, HistoryEvent::PrMerged { merge_commit, .. } if merge_commit == "abc")
    ));
}

/// Scenario F — two concurrent cancels: releasing an already-available
/// workspace must not raise, and the task still ends cancelled.
#[test]
fn scenario_f_concurrent_cancel_is_idempotent_on_release() {
    let fx = Fixture::new(1);
    let mut task = pending_task("demo", "feat-f", 0, "");
    task.status = TaskStatus::Working;
    let name = pool::acquire(&fx.paths, &fx.vcs, &fx.project, "demo/feat-f").unwrap();
    task.workspace = Some(name.clone());
    task.session = Some(anvil_protocol::SessionName::new("anvil-t1"));
    persistence::save_task(&fx.paths, &task).unwrap();

    let engine = fx.engine();
    crud::cancel(&engine, &fx.project, &mut task).unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert!(task.workspace.is_none());

    // Second process' release of the same, now-available workspace must
    // not error.
    pool::release(&fx.paths, &fx.vcs, name.as_ref(), &fx.project.default_branch, false).unwrap();
}
