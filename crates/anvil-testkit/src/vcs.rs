use std::path::Path;

use anvil_protocol::{DiffStats, DriverError, MergeStrategy, Vcs};
use git2::{BranchType, Repository, ResetType, WorktreeAddOptions};

/// A real `git2`-backed `Vcs` implementation for tests. Worktree semantics
/// are too intricate to fake convincingly, so tests exercise real
/// repositories under a tempdir instead of an in-memory double.
#[derive(Default)]
pub struct GitVcs;

impl GitVcs {
    pub fn new() -> Self {
        Self
    }
}

fn to_driver_err(e: git2::Error) -> DriverError {
    DriverError::VcsFailed(e.to_string())
}

impl Vcs for GitVcs {
    fn fetch(&self, cwd: &Path) -> Result<(), DriverError> {
        let repo = Repository::discover(cwd).map_err(to_driver_err)?;
        match repo.find_remote("origin") {
            Ok(mut remote) => remote
                .fetch(&[] as &[&str], None, None)
                .map_err(to_driver_err),
            Err(_) => Ok(()),
        }
    }

    fn checkout(&self, cwd: &Path, branch: &str) -> Result<(), DriverError> {
        let repo = Repository::discover(cwd).map_err(to_driver_err)?;
        let refname = format!("refs/heads/{branch}");
        let obj = repo.revparse_single(&refname).map_err(to_driver_err)?;
        repo.checkout_tree(&obj, None).map_err(to_driver_err)?;
        repo.set_head(&refname).map_err(to_driver_err)
    }

    fn create_branch(
        &self,
        cwd: &Path,
        branch: &str,
        start: Option<&str>,
    ) -> Result<(), DriverError> {
        let repo = Repository::discover(cwd).map_err(to_driver_err)?;
        let commit = match start {
            Some(reference) => repo
                .revparse_single(reference)
                .and_then(|o| o.peel_to_commit())
                .map_err(to_driver_err)?,
            None => repo
                .head()
                .and_then(|h| h.peel_to_commit())
                .map_err(to_driver_err)?,
        };
        repo.branch(branch, &commit, false)
            .map_err(to_driver_err)?;
        Ok(())
    }

    fn branch_exists(&self, cwd: &Path, branch: &str) -> Result<bool, DriverError> {
        let repo = Repository::discover(cwd).map_err(to_driver_err)?;
        match repo.find_branch(branch, BranchType::Local) {
            Ok(_) => Ok(true),
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(false),
            Err(e) => Err(to_driver_err(e)),
        }
    }

    fn delete_remote_branch(
        &self,
        _cwd: &Path,
        _branch: &str,
        _remote: Option<&str>,
    ) -> Result<(), DriverError> {
        // No real remote in test fixtures; best-effort no-op mirroring
        // production's "swallow missing remote" behaviour.
        Ok(())
    }

    fn merge(&self, cwd: &Path, branch: &str, strategy: MergeStrategy) -> Result<(), DriverError> {
        let repo = Repository::discover(cwd).map_err(to_driver_err)?;
        let their_branch = repo
            .find_branch(branch, BranchType::Local)
            .map_err(to_driver_err)?;
        let their_commit = their_branch
            .get()
            .peel_to_commit()
            .map_err(to_driver_err)?;
        let our_commit = repo.head().and_then(|h| h.peel_to_commit()).map_err(to_driver_err)?;

        match strategy {
            MergeStrategy::Ff => {
                let mut reference = repo.head().map_err(to_driver_err)?;
                reference
                    .set_target(their_commit.id(), "fast-forward merge")
                    .map_err(to_driver_err)?;
                repo.set_head_detached(their_commit.id())
                    .map_err(to_driver_err)?;
                repo.checkout_head(None).map_err(to_driver_err)
            }
            MergeStrategy::Merge => {
                let sig = repo.signature().map_err(to_driver_err)?;
                let tree = their_commit.tree().map_err(to_driver_err)?;
                repo.checkout_tree(tree.as_object(), None)
                    .map_err(to_driver_err)?;
                repo.commit(
                    Some("HEAD"),
                    &sig,
                    &sig,
                    &format!("Merge branch '{branch}'"),
                    &tree,
                    &[&our_commit, &their_commit],
                )
                .map_err(to_driver_err)?;
                Ok(())
            }
        }
    }

    fn reset_hard(&self, cwd: &Path, reference: &str) -> Result<(), DriverError> {
        let repo = Repository::discover(cwd).map_err(to_driver_err)?;
        let obj = repo.revparse_single(reference).map_err(to_driver_err)?;
        repo.reset(&obj, ResetType::Hard, None).map_err(to_driver_err)
    }

    fn clean(&self, cwd: &Path) -> Result<(), DriverError> {
        let repo = Repository::discover(cwd).map_err(to_driver_err)?;
        let mut opts = git2::StatusOptions::new();
        opts.include_untracked(true);
        let statuses = repo.statuses(Some(&mut opts)).map_err(to_driver_err)?;
        for entry in statuses.iter() {
            if entry.status().contains(git2::Status::WT_NEW)
                && let Some(path) = entry.path()
            {
                let full = cwd.join(path);
                let _ = std::fs::remove_file(&full);
            }
        }
        Ok(())
    }

    fn current_branch(&self, cwd: &Path) -> Result<String, DriverError> {
        let repo = Repository::discover(cwd).map_err(to_driver_err)?;
        let head = repo.head().map_err(to_driver_err)?;
        head.shorthand()
            .map(|s| s.to_string())
            .ok_or_else(|| DriverError::VcsFailed("detached HEAD".to_string()))
    }

    fn add_worktree(
        &self,
        repo_path: &Path,
        worktree_path: &Path,
        branch: &str,
    ) -> Result<(), DriverError> {
        let repo = Repository::open(repo_path).map_err(to_driver_err)?;
        let branch_ref = repo
            .find_branch(branch, BranchType::Local)
            .map_err(to_driver_err)?
            .into_reference();
        let mut opts = WorktreeAddOptions::new();
        opts.reference(Some(&branch_ref));
        let admin_name = worktree_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(branch);
        repo.worktree(admin_name, worktree_path, Some(&opts))
            .map_err(to_driver_err)?;
        Ok(())
    }

    fn remove_worktree(&self, repo_path: &Path, worktree_path: &Path) -> Result<(), DriverError> {
        let repo = Repository::open(repo_path).map_err(to_driver_err)?;
        if let Ok(worktrees) = repo.worktrees() {
            for name in worktrees.iter().flatten() {
                if let Ok(wt) = repo.find_worktree(name)
                    && wt.path() == worktree_path
                {
                    wt.prune(None).map_err(to_driver_err)?;
                    return Ok(());
                }
            }
        }
        std::fs::remove_dir_all(worktree_path)
            .map_err(|e| DriverError::VcsFailed(e.to_string()))
    }

    fn get_commit_hash(&self, cwd: &Path, short: bool) -> Result<String, DriverError> {
        let repo = Repository::discover(cwd).map_err(to_driver_err)?;
        let commit = repo.head().and_then(|h| h.peel_to_commit()).map_err(to_driver_err)?;
        let full = commit.id().to_string();
        Ok(if short { full[..7.min(full.len())].to_string() } else { full })
    }

    fn is_dirty(&self, cwd: &Path) -> Result<bool, DriverError> {
        let repo = match Repository::open(cwd) {
            Ok(r) => r,
            // Conservative fallback: if we can't check, assume dirty.
            Err(_) => return Ok(true),
        };
        let mut opts = git2::StatusOptions::new();
        opts.include_untracked(true);
        match repo.statuses(Some(&mut opts)) {
            Ok(statuses) => Ok(!statuses.is_empty()),
            Err(_) => Ok(true),
        }
    }

    fn push(&self, _cwd: &Path, _remote: Option<&str>, _branch: Option<&str>) -> Result<(), DriverError> {
        // No real remote in test fixtures; best-effort no-op.
        Ok(())
    }

    fn get_diff_stats(&self, cwd: &Path, base: &str) -> Result<DiffStats, DriverError> {
        let repo = Repository::discover(cwd).map_err(to_driver_err)?;
        let base_obj = repo
            .revparse_single(base)
            .and_then(|o| o.peel_to_tree())
            .map_err(to_driver_err)?;
        let head_obj = repo
            .head()
            .and_then(|h| h.peel_to_tree())
            .map_err(to_driver_err)?;
        let diff = repo
            .diff_tree_to_tree(Some(&base_obj), Some(&head_obj), None)
            .map_err(to_driver_err)?;
        let stats = diff.stats().map_err(to_driver_err)?;
        Ok(DiffStats {
            added: stats.insertions() as u64,
            removed: stats.deletions() as u64,
        })
    }

    fn get_commit_count(&self, cwd: &Path, base: &str) -> Result<u64, DriverError> {
        let repo = Repository::discover(cwd).map_err(to_driver_err)?;
        let mut revwalk = repo.revwalk().map_err(to_driver_err)?;
        revwalk.push_head().map_err(to_driver_err)?;
        let base_oid = repo.revparse_single(base).map_err(to_driver_err)?.id();
        revwalk.hide(base_oid).map_err(to_driver_err)?;
        Ok(revwalk.count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn init_repo_with_commit(path: &Path) {
        let repo = Repository::init(path).unwrap();
        let sig = git2::Signature::now("Test", "test@test.com").unwrap();
        let tree_id = repo.index().unwrap().write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[])
            .unwrap();
    }

    #[test]
    fn is_dirty_false_on_clean_repo() {
        let dir = TempDir::new().unwrap();
        init_repo_with_commit(dir.path());
        let vcs = GitVcs::new();
        assert!(!vcs.is_dirty(dir.path()).unwrap());
    }

    #[test]
    fn is_dirty_true_with_untracked_file() {
        let dir = TempDir::new().unwrap();
        init_repo_with_commit(dir.path());
        std::fs::write(dir.path().join("new.txt"), "x").unwrap();
        let vcs = GitVcs::new();
        assert!(vcs.is_dirty(dir.path()).unwrap());
    }

    #[test]
    fn is_dirty_conservative_fallback_on_unopenable_path() {
        let vcs = GitVcs::new();
        assert!(vcs.is_dirty(Path::new("/nonexistent/path")).unwrap());
    }

    #[test]
    fn branch_exists_true_after_create() {
        let dir = TempDir::new().unwrap();
        init_repo_with_commit(dir.path());
        let vcs = GitVcs::new();
        vcs.create_branch(dir.path(), "feature-x", None).unwrap();
        assert!(vcs.branch_exists(dir.path(), "feature-x").unwrap());
        assert!(!vcs.branch_exists(dir.path(), "does-not-exist").unwrap());
    }

    #[test]
    fn add_worktree_creates_checked_out_directory() {
        let dir = TempDir::new().unwrap();
        init_repo_with_commit(dir.path());
        let vcs = GitVcs::new();
        vcs.create_branch(dir.path(), "feature-y", None).unwrap();
        let worktree_path = dir.path().join("wt-feature-y");
        vcs.add_worktree(dir.path(), &worktree_path, "feature-y")
            .unwrap();
        assert!(worktree_path.join(".git").exists());
    }

    #[test]
    fn current_branch_reports_head_shorthand() {
        let dir = TempDir::new().unwrap();
        init_repo_with_commit(dir.path());
        let vcs = GitVcs::new();
        let branch = vcs.current_branch(dir.path()).unwrap();
        assert!(!branch.is_empty());
    }

    #[test]
    fn commit_count_since_base_counts_new_commits() {
        let dir = TempDir::new().unwrap();
        init_repo_with_commit(dir.path());
        let vcs = GitVcs::new();
        let base = vcs.get_commit_hash(dir.path(), false).unwrap();

        std::fs::write(dir.path().join("f.txt"), "1").unwrap();
        let repo = Repository::open(dir.path()).unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new("f.txt")).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = git2::Signature::now("Test", "test@test.com").unwrap();
        let parent = repo.head().unwrap().peel_to_commit().unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "second", &tree, &[&parent])
            .unwrap();

        let count = vcs.get_commit_count(dir.path(), &base).unwrap();
        assert_eq!(count, 1);
    }
}
