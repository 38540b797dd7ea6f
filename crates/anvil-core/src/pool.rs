//! Workspace pool: a bounded, reusable set of git worktrees per project,
//! serialized through a single advisory lock file.
//!
//! # Lock discipline
//!
//! Every mutation (`acquire`, `release`, `init_pool`) takes an exclusive
//! flock on `.pool.lock`, re-reads `.pool.json`, performs its decision, and
//! writes the document back before releasing the lock (RAII, dropped at the
//! end of the critical section). Readers that only inspect the document may
//! skip the lock and tolerate a brief inconsistency window.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anvil_protocol::{Project, Vcs, WorkspaceName};
use nix::fcntl::{Flock, FlockArg};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::PoolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolStatus {
    Available,
    Bound,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolEntry {
    pub status: PoolStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub task: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolDocument {
    #[serde(default)]
    pub workspaces: BTreeMap<String, PoolEntry>,
}

impl PoolDocument {
    fn entries_for_project<'a>(&'a self, project: &'a str) -> impl Iterator<Item = (&'a String, &'a PoolEntry)> {
        let prefix = format!("{project}--");
        self.workspaces
            .iter()
            .filter(move |(name, _)| name.starts_with(&prefix))
    }

    fn next_slot_name(&self, project: &str) -> String {
        let prefix = format!("{project}--");
        let next_n = self
            .entries_for_project(project)
            .filter_map(|(name, _)| name[prefix.len()..].parse::<u32>().ok())
            .max()
            .map(|n| n + 1)
            .unwrap_or(1);
        format!("{prefix}{next_n}")
    }
}

fn acquire_lock(paths: &anvil_paths::AnvilPaths) -> Result<Flock<fs::File>, PoolError> {
    let lock_path = paths.pool_lock_file();
    if let Some(parent) = lock_path.parent() {
        fs::create_dir_all(parent).map_err(|source| PoolError::Lock {
            path: parent.display().to_string(),
            source,
        })?;
    }
    let file = fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(&lock_path)
        .map_err(|source| PoolError::Lock {
            path: lock_path.display().to_string(),
            source,
        })?;
    Flock::lock(file, FlockArg::LockExclusive).map_err(|(_, source)| PoolError::Lock {
        path: lock_path.display().to_string(),
        source: std::io::Error::other(source),
    })
}

fn load_pool(paths: &anvil_paths::AnvilPaths) -> Result<PoolDocument, PoolError> {
    let path = paths.pool_file();
    match fs::read_to_string(&path) {
        Ok(raw) => serde_json::from_str(&raw).map_err(|e| {
            crate::errors::PersistenceError::JsonParse {
                path: path.display().to_string(),
                source: e,
            }
            .into()
        }),
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(PoolDocument::default()),
        Err(source) => Err(crate::errors::PersistenceError::Io {
            path: path.display().to_string(),
            source,
        }
        .into()),
    }
}

fn save_pool(paths: &anvil_paths::AnvilPaths, doc: &PoolDocument) -> Result<(), PoolError> {
    let path = paths.pool_file();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| crate::errors::PersistenceError::Io {
            path: parent.display().to_string(),
            source,
        })?;
    }
    let json = serde_json::to_string_pretty(doc).map_err(|e| crate::errors::PersistenceError::JsonParse {
        path: path.display().to_string(),
        source: e,
    })?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, json).map_err(|source| crate::errors::PersistenceError::Io {
        path: tmp.display().to_string(),
        source,
    })?;
    fs::rename(&tmp, &path).map_err(|source| {
        let _ = fs::remove_file(&tmp);
        crate::errors::PersistenceError::Io {
            path: path.display().to_string(),
            source,
        }
    })?;
    Ok(())
}

/// Idempotent: ensure the pool document exists. Calling it twice leaves
/// identical pool state.
pub fn init_pool(paths: &anvil_paths::AnvilPaths) -> Result<(), PoolError> {
    let _lock = acquire_lock(paths)?;
    if !paths.pool_file().exists() {
        save_pool(paths, &PoolDocument::default())?;
    }
    Ok(())
}

/// Acquire a workspace for `task_ref` (`"<project>/<branch>"`), reusing an
/// available entry or creating a new worktree under `pool_size`.
pub fn acquire(
    paths: &anvil_paths::AnvilPaths,
    vcs: &dyn Vcs,
    project: &Project,
    task_ref: &str,
) -> Result<WorkspaceName, PoolError> {
    let _lock = acquire_lock(paths)?;
    let mut doc = load_pool(paths)?;

    let reusable = doc
        .entries_for_project(&project.name)
        .find(|(_, entry)| entry.status == PoolStatus::Available)
        .map(|(name, _)| name.clone());

    if let Some(name) = reusable {
        doc.workspaces.insert(
            name.clone(),
            PoolEntry {
                status: PoolStatus::Bound,
                task: Some(task_ref.to_string()),
            },
        );
        save_pool(paths, &doc)?;
        info!(event = "anvil.pool.acquired", workspace = %name, reused = true);
        return Ok(WorkspaceName::new(name));
    }

    let existing = doc.entries_for_project(&project.name).count() as u32;
    if existing >= project.pool_size {
        return Err(PoolError::Exhausted {
            project: project.name.to_string(),
            existing,
            limit: project.pool_size,
        });
    }

    let name = doc.next_slot_name(&project.name);
    let workspace_path = paths.workspace_dir(&name);

    // Each slot gets its own placeholder branch rather than checking out
    // `default_branch` directly: the project's own working copy already has
    // `default_branch` checked out, and git refuses to check out the same
    // branch in a second worktree.
    let placeholder = placeholder_branch(&name);
    if !vcs.branch_exists(&project.path, &placeholder)? {
        vcs.create_branch(&project.path, &placeholder, Some(&project.default_branch))?;
    }
    vcs.add_worktree(&project.path, &workspace_path, &placeholder)?;
    patch_git_excludes(&workspace_path);

    doc.workspaces.insert(
        name.clone(),
        PoolEntry {
            status: PoolStatus::Bound,
            task: Some(task_ref.to_string()),
        },
    );
    save_pool(paths, &doc)?;
    info!(event = "anvil.pool.acquired", workspace = %name, reused = false);
    Ok(WorkspaceName::new(name))
}

fn placeholder_branch(workspace_name: &str) -> String {
    format!("anvil-pool/{workspace_name}")
}

const EXCLUDE_LINES: &[&str] = &["TASK.md", ".anvil-outcome", ".anvil-harness/"];

/// Idempotently appends the harness-managed file patterns to a worktree's
/// `.git/info/exclude`, so they never show up as untracked changes. Called
/// once at worktree creation and again on every bind, in case the exclude
/// file was edited or the worktree's git metadata was recreated.
pub(crate) fn patch_git_excludes(workspace_path: &Path) {
    let exclude_path = workspace_path.join(".git").join("info").join("exclude");
    let existing = fs::read_to_string(&exclude_path).unwrap_or_default();
    let missing: Vec<&str> = EXCLUDE_LINES
        .iter()
        .copied()
        .filter(|line| !existing.lines().any(|l| l.trim() == *line))
        .collect();
    if missing.is_empty() {
        return;
    }
    let Some(parent) = exclude_path.parent() else {
        return;
    };
    if fs::create_dir_all(parent).is_err() {
        return;
    }
    let mut content = existing;
    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    for line in missing {
        content.push_str(line);
        content.push('\n');
    }
    let _ = fs::write(&exclude_path, content);
}

/// True if some workspace other than `excluding` already has `branch` bound
/// for `project`. The caller has already acquired `excluding`; this answers
/// whether binding `branch` into it would collide with another live
/// worktree before it tries to check `branch` out there.
pub(crate) fn is_branch_bound(
    paths: &anvil_paths::AnvilPaths,
    project: &str,
    branch: &str,
    excluding: &str,
) -> Result<bool, PoolError> {
    let doc = load_pool(paths)?;
    Ok(doc.entries_for_project(project).any(|(name, entry)| {
        name != excluding
            && entry.status == PoolStatus::Bound
            && entry
                .task
                .as_deref()
                .and_then(|t| t.split_once('/'))
                .is_some_and(|(_, b)| b == branch)
    }))
}

/// Release a workspace back to the pool.
///
/// Ordinary releases pass `force = false` and fail on a dirty working tree;
/// the merge path passes `force = true`.
pub fn release(
    paths: &anvil_paths::AnvilPaths,
    vcs: &dyn Vcs,
    workspace: &str,
    default_branch: &str,
    force: bool,
) -> Result<(), PoolError> {
    let _lock = acquire_lock(paths)?;
    let mut doc = load_pool(paths)?;

    if !doc.workspaces.contains_key(workspace) {
        return Err(PoolError::UnknownWorkspace {
            workspace: workspace.to_string(),
        });
    }

    let workspace_path = paths.workspace_dir(workspace);

    if !force && vcs.is_dirty(&workspace_path)? {
        return Err(PoolError::DirtyWorkspace {
            workspace: workspace.to_string(),
        });
    }

    let _ = vcs.fetch(&workspace_path);
    let origin_ref = format!("origin/{default_branch}");
    if vcs.reset_hard(&workspace_path, &origin_ref).is_err() {
        vcs.reset_hard(&workspace_path, default_branch)?;
    }
    vcs.clean(&workspace_path)?;
    clean_harness_files(&workspace_path);

    doc.workspaces.insert(
        workspace.to_string(),
        PoolEntry {
            status: PoolStatus::Available,
            task: None,
        },
    );
    save_pool(paths, &doc)?;
    info!(event = "anvil.pool.released", workspace);
    Ok(())
}

/// Removes the TASK.md symlink and outcome marker a worker leaves behind.
fn clean_harness_files(workspace_path: &Path) {
    let _ = fs::remove_file(workspace_path.join("TASK.md"));
    let _ = fs::remove_file(workspace_path.join(".anvil-outcome"));
}

/// Current snapshot of the pool document (read-only, no lock taken).
pub fn snapshot(paths: &anvil_paths::AnvilPaths) -> Result<PoolDocument, PoolError> {
    load_pool(paths)
}

/// Workspaces bound to a task whose status is terminal but whose binding
/// was never released (crashed before the release hook ran).
pub fn find_orphans(doc: &PoolDocument, is_task_terminal: impl Fn(&str) -> bool) -> Vec<String> {
    doc.workspaces
        .iter()
        .filter(|(_, entry)| entry.status == PoolStatus::Bound)
        .filter_map(|(name, entry)| entry.task.as_ref().map(|t| (name, t)))
        .filter(|(_, task_ref)| is_task_terminal(task_ref))
        .map(|(name, _)| name.clone())
        .collect()
}
