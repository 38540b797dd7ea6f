//! Driver contracts consumed by the engine.
//!
//! Concrete implementations (a real terminal multiplexer, a real `git`
//! wrapper, a real pull-request host) are out of scope for this crate
//! family — they live in external drivers. What lives here is the
//! interface the engine is written against, plus the fixed status/result
//! vocabularies those interfaces speak in.

use std::path::Path;

use thiserror::Error;

use crate::types::{MergeStrategy, PrState};

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("multiplexer unavailable: {0}")]
    MultiplexerUnavailable(String),
    #[error("version control operation failed: {0}")]
    VcsFailed(String),
    #[error("pr host operation failed: {0}")]
    PrHostFailed(String),
}

/// Terminal-multiplexer operations the engine needs to spawn and observe
/// agent sessions. A "session" holds one or more named "windows"; the
/// engine opens a new window in an existing session rather than a new
/// session when an agent variant is added alongside a running worker.
pub trait Multiplexer: Send + Sync {
    fn is_available(&self) -> bool;

    fn session_exists(&self, session: &str) -> bool;

    fn list_sessions(&self) -> Result<Vec<String>, DriverError>;

    fn new_session(
        &self,
        session: &str,
        window: &str,
        cwd: &Path,
        command: &str,
    ) -> Result<(), DriverError>;

    fn new_window(
        &self,
        session: &str,
        window: &str,
        cwd: &Path,
        command: &str,
    ) -> Result<(), DriverError>;

    fn rename_window(&self, session: &str, window: &str) -> Result<(), DriverError>;

    fn kill_session_safe(&self, session: &str);

    fn kill_window_safe(&self, session: &str, window: &str);

    fn send_literal(&self, session: &str, text: &str) -> Result<(), DriverError>;
}

/// Statistics describing a branch's divergence from a base ref.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiffStats {
    pub added: u64,
    pub removed: u64,
}

/// Version-control operations against a checked-out repository or worktree.
pub trait Vcs: Send + Sync {
    fn fetch(&self, cwd: &Path) -> Result<(), DriverError>;

    fn checkout(&self, cwd: &Path, branch: &str) -> Result<(), DriverError>;

    fn create_branch(&self, cwd: &Path, branch: &str, start: Option<&str>) -> Result<(), DriverError>;

    fn branch_exists(&self, cwd: &Path, branch: &str) -> Result<bool, DriverError>;

    fn delete_remote_branch(&self, cwd: &Path, branch: &str, remote: Option<&str>) -> Result<(), DriverError>;

    fn merge(&self, cwd: &Path, branch: &str, strategy: MergeStrategy) -> Result<(), DriverError>;

    fn reset_hard(&self, cwd: &Path, reference: &str) -> Result<(), DriverError>;

    fn clean(&self, cwd: &Path) -> Result<(), DriverError>;

    fn current_branch(&self, cwd: &Path) -> Result<String, DriverError>;

    fn add_worktree(&self, repo_path: &Path, worktree_path: &Path, branch: &str) -> Result<(), DriverError>;

    fn remove_worktree(&self, repo_path: &Path, worktree_path: &Path) -> Result<(), DriverError>;

    fn get_commit_hash(&self, cwd: &Path, short: bool) -> Result<String, DriverError>;

    fn is_dirty(&self, cwd: &Path) -> Result<bool, DriverError>;

    fn push(&self, cwd: &Path, remote: Option<&str>, branch: Option<&str>) -> Result<(), DriverError>;

    fn get_diff_stats(&self, cwd: &Path, base: &str) -> Result<DiffStats, DriverError>;

    fn get_commit_count(&self, cwd: &Path, base: &str) -> Result<u64, DriverError>;
}

/// CI check status as last observed for a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CiStatus {
    Pending,
    Pass,
    Fail,
    None,
}

/// Snapshot of a pull request as reported by the host.
#[derive(Debug, Clone, PartialEq)]
pub struct PrStatus {
    pub exists: bool,
    pub url: Option<String>,
    pub state: Option<PrState>,
    pub merge_commit: Option<String>,
    pub checks: CiStatus,
}

/// Parameters for creating a pull request.
#[derive(Debug, Clone)]
pub struct CreatePrRequest<'a> {
    pub branch: &'a str,
    pub base: &'a str,
    pub title: &'a str,
    pub body: &'a str,
}

/// Pull-request host operations (e.g. GitHub, GitLab). Concrete backends
/// are out of scope for this crate; only the contract is defined here.
pub trait PrHost: Send + Sync {
    fn is_available(&self, cwd: Option<&Path>) -> bool;

    fn create_pr(&self, cwd: &Path, request: CreatePrRequest<'_>) -> Result<String, DriverError>;

    fn get_pr_status(&self, cwd: &Path, branch: &str) -> Result<PrStatus, DriverError>;
}

/// Time source, injected so the engine's own tests can control `now()`.
pub trait Clock: Send + Sync {
    fn now(&self) -> String;
}
