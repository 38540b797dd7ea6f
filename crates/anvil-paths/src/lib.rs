//! Centralized path construction for the `<data>/` directory layout
//! described in the engine's on-disk layout section.
//!
//! Single source of truth for every path the engine touches. Use
//! [`AnvilPaths::resolve`] in production code and [`AnvilPaths::from_dir`] in
//! tests.

use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error("home directory not found — set $HOME or $ANVIL_HOME")]
    HomeNotFound,
}

#[derive(Debug, Clone)]
pub struct AnvilPaths {
    data_dir: PathBuf,
}

impl AnvilPaths {
    /// Resolve paths from `$ANVIL_HOME`, falling back to `~/.anvil`.
    pub fn resolve() -> Result<Self, PathError> {
        if let Some(dir) = std::env::var_os("ANVIL_HOME") {
            return Ok(Self {
                data_dir: PathBuf::from(dir),
            });
        }
        let home = dirs::home_dir().ok_or(PathError::HomeNotFound)?;
        Ok(Self {
            data_dir: home.join(".anvil"),
        })
    }

    /// Create paths from an explicit base directory. Use in tests.
    pub fn from_dir(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    /// The base data directory.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn projects_file(&self) -> PathBuf {
        self.data_dir.join("projects.json")
    }

    pub fn tasks_dir(&self) -> PathBuf {
        self.data_dir.join("tasks")
    }

    pub fn project_tasks_dir(&self, project: &str) -> PathBuf {
        self.tasks_dir().join(sanitize(project))
    }

    pub fn task_dir(&self, project: &str, task_id: &str) -> PathBuf {
        self.project_tasks_dir(project).join(sanitize(task_id))
    }

    pub fn task_file(&self, project: &str, task_id: &str) -> PathBuf {
        self.task_dir(project, task_id).join("TASK.md")
    }

    pub fn history_file(&self, project: &str, task_id: &str) -> PathBuf {
        self.task_dir(project, task_id).join("history.jsonl")
    }

    pub fn workspaces_dir(&self) -> PathBuf {
        self.data_dir.join("workspaces")
    }

    pub fn pool_file(&self) -> PathBuf {
        self.workspaces_dir().join(".pool.json")
    }

    pub fn pool_lock_file(&self) -> PathBuf {
        self.workspaces_dir().join(".pool.lock")
    }

    pub fn workspace_dir(&self, workspace_name: &str) -> PathBuf {
        self.workspaces_dir().join(sanitize(workspace_name))
    }
}

/// Collapses path separators the way the rest of the engine expects: names
/// derived from branch names or task ids must never escape their directory.
fn sanitize(name: &str) -> String {
    name.replace('/', "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_paths() -> AnvilPaths {
        AnvilPaths::from_dir(PathBuf::from("/home/user/.anvil"))
    }

    #[test]
    fn from_dir_roundtrips() {
        assert_eq!(test_paths().data_dir(), Path::new("/home/user/.anvil"));
    }

    #[test]
    fn projects_file_path() {
        assert_eq!(
            test_paths().projects_file(),
            PathBuf::from("/home/user/.anvil/projects.json")
        );
    }

    #[test]
    fn task_file_path() {
        assert_eq!(
            test_paths().task_file("acme", "ab12cd34"),
            PathBuf::from("/home/user/.anvil/tasks/acme/ab12cd34/TASK.md")
        );
    }

    #[test]
    fn history_file_path() {
        assert_eq!(
            test_paths().history_file("acme", "ab12cd34"),
            PathBuf::from("/home/user/.anvil/tasks/acme/ab12cd34/history.jsonl")
        );
    }

    #[test]
    fn task_dir_sanitizes_slashes_in_project() {
        assert_eq!(
            test_paths().task_dir("acme/sub", "id"),
            PathBuf::from("/home/user/.anvil/tasks/acme_sub/id")
        );
    }

    #[test]
    fn pool_file_path() {
        assert_eq!(
            test_paths().pool_file(),
            PathBuf::from("/home/user/.anvil/workspaces/.pool.json")
        );
    }

    #[test]
    fn pool_lock_file_path() {
        assert_eq!(
            test_paths().pool_lock_file(),
            PathBuf::from("/home/user/.anvil/workspaces/.pool.lock")
        );
    }

    #[test]
    fn workspace_dir_sanitizes_slashes() {
        assert_eq!(
            test_paths().workspace_dir("acme--1"),
            PathBuf::from("/home/user/.anvil/workspaces/acme--1")
        );
    }

    #[test]
    fn resolve_honours_anvil_home() {
        temp_env::with_var("ANVIL_HOME", Some("/tmp/custom-anvil"), || {
            let paths = AnvilPaths::resolve().unwrap();
            assert_eq!(paths.data_dir(), Path::new("/tmp/custom-anvil"));
        });
    }
}
