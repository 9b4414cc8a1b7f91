//! The shared application model.
//!
//! Each data domain lives inside its own [`DomainMutex`], so mutation and any
//! multi-field read that needs a consistent snapshot go through the lock.
//! Readers copy what they need inside the critical section (the `*_snapshot`
//! helpers) rather than holding live references.

pub mod entities;
pub mod path_index;
pub mod string_pool;

use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;

use crate::locks::{Domain, DomainMutex};
pub use entities::*;
pub use path_index::PathIndex;
pub use string_pool::StringPool;

#[derive(Debug, Default)]
pub struct FilesModel {
    pub files: Vec<File>,
    pub submodules: Vec<Submodule>,
}

#[derive(Debug)]
pub struct BranchesModel {
    pub branches: Vec<Branch>,
    pub remotes: Vec<Remote>,
    pub tags: Vec<Tag>,
    pub worktrees: Vec<Worktree>,
    /// Every reflog entry; used for recency and undo.
    pub reflog_commits: Arc<Vec<Commit>>,
    /// What the reflog panel shows. Same `Arc` as `reflog_commits` unless a
    /// path filter is active.
    pub filtered_reflog_commits: Arc<Vec<Commit>>,
    /// Set even on a detached head while rebasing or bisecting.
    pub checked_out_branch: String,
}

impl Default for BranchesModel {
    fn default() -> Self {
        let reflog = Arc::new(Vec::new());
        Self {
            branches: Vec::new(),
            remotes: Vec::new(),
            tags: Vec::new(),
            worktrees: Vec::new(),
            filtered_reflog_commits: reflog.clone(),
            reflog_commits: reflog,
            checked_out_branch: String::new(),
        }
    }
}

impl BranchesModel {
    pub fn set_reflog(&mut self, full: Vec<Commit>, filtered: Option<Vec<Commit>>) {
        let full = Arc::new(full);
        self.filtered_reflog_commits = match filtered {
            Some(filtered) => Arc::new(filtered),
            None => full.clone(),
        };
        self.reflog_commits = full;
    }

    #[cfg(test)]
    pub fn reflog_is_unfiltered(&self) -> bool {
        Arc::ptr_eq(&self.reflog_commits, &self.filtered_reflog_commits)
    }
}

#[derive(Debug, Default)]
pub struct CommitsModel {
    pub commits: Vec<Commit>,
    pub stash_entries: Vec<StashEntry>,
    pub working_tree_state_at_last_commit_refresh: WorkingTreeState,
}

#[derive(Debug, Default)]
pub struct SubCommitsModel {
    pub ref_name: Option<String>,
    pub commits: Vec<Commit>,
}

pub type AuthorsModel = HashMap<String, Author>;

pub struct Model {
    pub files: DomainMutex<FilesModel>,
    pub branches: DomainMutex<BranchesModel>,
    pub local_commits: DomainMutex<CommitsModel>,
    pub status: DomainMutex<RepoStatus>,
    pub sub_commits: DomainMutex<SubCommitsModel>,
    pub authors: DomainMutex<AuthorsModel>,
    files_index: RwLock<Arc<PathIndex>>,
    hash_pool: StringPool,
}

impl Model {
    pub fn new() -> Self {
        Self {
            files: DomainMutex::with_default(Domain::Files),
            branches: DomainMutex::with_default(Domain::Branches),
            local_commits: DomainMutex::with_default(Domain::LocalCommits),
            status: DomainMutex::with_default(Domain::Status),
            sub_commits: DomainMutex::with_default(Domain::SubCommits),
            authors: DomainMutex::with_default(Domain::Authors),
            files_index: RwLock::new(Arc::new(PathIndex::default())),
            hash_pool: StringPool::new(),
        }
    }

    pub fn hash_pool(&self) -> &StringPool {
        &self.hash_pool
    }

    /// Replace the Files sequence and its prefix index together. The caller
    /// holds the Files domain.
    pub fn set_files(&self, files_model: &mut FilesModel, files: Vec<File>) {
        let index = Arc::new(PathIndex::from_files(&files));
        files_model.files = files;
        *self.files_index.write() = index;
    }

    #[cfg(test)]
    pub fn replace_files(&self, files: Vec<File>) {
        let mut guard = self.files.lock();
        self.set_files(&mut guard, files);
    }

    /// The current prefix index. Does not touch the domain mutex set, so it is
    /// safe to call from keystroke handlers.
    pub fn files_index(&self) -> Arc<PathIndex> {
        self.files_index.read().clone()
    }

    pub fn files_snapshot(&self) -> Vec<File> {
        self.files.lock().files.clone()
    }

    pub fn branches_snapshot(&self) -> Vec<Branch> {
        self.branches.lock().branches.clone()
    }

    pub fn branch_names(&self) -> Vec<String> {
        self.branches
            .lock()
            .branches
            .iter()
            .map(|b| b.name.clone())
            .collect()
    }

    pub fn commits_snapshot(&self) -> Vec<Commit> {
        self.local_commits.lock().commits.clone()
    }

    pub fn status_snapshot(&self) -> RepoStatus {
        self.status.lock().clone()
    }

    /// (full, filtered) reflog, copied out as shared handles.
    pub fn reflog_snapshot(&self) -> (Arc<Vec<Commit>>, Arc<Vec<Commit>>) {
        let guard = self.branches.lock();
        (
            guard.reflog_commits.clone(),
            guard.filtered_reflog_commits.clone(),
        )
    }

    pub fn checked_out_branch(&self) -> Option<Branch> {
        self.branches
            .lock()
            .branches
            .iter()
            .find(|b| b.is_head)
            .cloned()
    }
}

impl Default for Model {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commit(pool: &StringPool, hash: &str) -> Commit {
        Commit {
            hash: pool.add(hash),
            parents: Vec::new(),
            author_name: "Ada".into(),
            author_email: "ada@example.com".into(),
            unix_timestamp: 0,
            subject: format!("commit {hash}"),
        }
    }

    #[test]
    fn unfiltered_reflog_shares_one_sequence() {
        let model = Model::new();
        let pool = model.hash_pool();
        model
            .branches
            .lock()
            .set_reflog(vec![commit(pool, "aaa"), commit(pool, "bbb")], None);

        let (full, filtered) = model.reflog_snapshot();
        assert!(Arc::ptr_eq(&full, &filtered));
        assert!(model.branches.lock().reflog_is_unfiltered());
    }

    #[test]
    fn filtered_reflog_is_a_separate_subset() {
        let model = Model::new();
        let pool = model.hash_pool();
        model.branches.lock().set_reflog(
            vec![commit(pool, "aaa"), commit(pool, "bbb")],
            Some(vec![commit(pool, "bbb")]),
        );

        let (full, filtered) = model.reflog_snapshot();
        assert!(!Arc::ptr_eq(&full, &filtered));
        assert_eq!(filtered.len(), 1);
        assert!(Arc::ptr_eq(&full[1].hash, &filtered[0].hash));
    }

    #[test]
    fn replacing_files_rebuilds_the_index() {
        let model = Model::new();
        let replace = |path: &str| {
            let mut guard = model.files.lock();
            model.set_files(&mut guard, vec![File::from_status('?', '?', path.into(), None)]);
        };
        replace("a.go");
        assert!(model.files_index().contains("a.go"));

        replace("b.go");
        let index = model.files_index();
        assert!(!index.contains("a.go"));
        assert!(index.contains("b.go"));
        assert_eq!(model.files_snapshot().len(), 1);
    }
}
