use std::sync::Arc;

/// Anything the operation registry can track.
pub trait HasUrn {
    fn urn(&self) -> String;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct File {
    pub path: String,
    pub previous_path: Option<String>,
    /// Porcelain XY status, e.g. "M ", " M", "??".
    pub short_status: String,
    pub has_staged_changes: bool,
    pub has_unstaged_changes: bool,
    pub tracked: bool,
    pub has_merge_conflicts: bool,
}

impl File {
    pub fn from_status(x: char, y: char, path: String, previous_path: Option<String>) -> Self {
        let untracked = x == '?' && y == '?';
        Self {
            path,
            previous_path,
            short_status: format!("{}{}", x, y),
            has_staged_changes: !untracked && x != ' ',
            has_unstaged_changes: untracked || y != ' ',
            tracked: !untracked,
            has_merge_conflicts: is_conflict_status(x, y),
        }
    }
}

impl HasUrn for File {
    fn urn(&self) -> String {
        format!("file-{}", self.path)
    }
}

pub fn is_conflict_status(x: char, y: char) -> bool {
    matches!(
        (x, y),
        ('U', 'U') | ('A', 'A') | ('D', 'D') | ('A', 'U') | ('U', 'A') | ('D', 'U') | ('U', 'D')
    )
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Branch {
    pub name: String,
    pub is_head: bool,
    pub upstream: Option<String>,
    pub ahead: Option<u32>,
    pub behind: Option<u32>,
    pub upstream_gone: bool,
}

impl HasUrn for Branch {
    fn urn(&self) -> String {
        format!("branch-{}", self.name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteBranch {
    pub name: String,
    pub remote_name: String,
}

impl RemoteBranch {
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.remote_name, self.name)
    }
}

impl HasUrn for RemoteBranch {
    fn urn(&self) -> String {
        format!("remote_branch-{}", self.full_name())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Remote {
    pub name: String,
    pub urls: Vec<String>,
    pub branches: Vec<RemoteBranch>,
}

impl HasUrn for Remote {
    fn urn(&self) -> String {
        format!("remote-{}", self.name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tag {
    pub name: String,
    pub message: String,
}

impl HasUrn for Tag {
    fn urn(&self) -> String {
        format!("tag-{}", self.name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Commit {
    pub hash: Arc<str>,
    pub parents: Vec<Arc<str>>,
    pub author_name: String,
    pub author_email: String,
    pub unix_timestamp: i64,
    pub subject: String,
}

impl Commit {
    pub fn short_hash(&self) -> &str {
        let end = self.hash.len().min(7);
        &self.hash[..end]
    }

    pub fn author_key(&self) -> String {
        format!("{} <{}>", self.author_name, self.author_email)
    }
}

impl HasUrn for Commit {
    fn urn(&self) -> String {
        format!("commit-{}", self.hash)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StashEntry {
    pub index: usize,
    pub name: String,
}

impl StashEntry {
    pub fn ref_name(&self) -> String {
        format!("stash@{{{}}}", self.index)
    }
}

impl HasUrn for StashEntry {
    fn urn(&self) -> String {
        format!("stash-{}", self.index)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Worktree {
    pub path: String,
    pub head: String,
    pub branch: Option<String>,
    pub is_main: bool,
    pub is_current: bool,
}

impl HasUrn for Worktree {
    fn urn(&self) -> String {
        format!("worktree-{}", self.path)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Submodule {
    pub name: String,
    pub path: String,
    pub url: String,
}

impl HasUrn for Submodule {
    fn urn(&self) -> String {
        format!("submodule-{}", self.name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Author {
    pub name: String,
    pub email: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WorkingTreeState {
    #[default]
    None,
    Merging,
    Rebasing,
    CherryPicking,
    Reverting,
    Bisecting,
}

impl WorkingTreeState {
    pub fn label(self) -> Option<&'static str> {
        match self {
            WorkingTreeState::None => None,
            WorkingTreeState::Merging => Some("merging"),
            WorkingTreeState::Rebasing => Some("rebasing"),
            WorkingTreeState::CherryPicking => Some("cherry-picking"),
            WorkingTreeState::Reverting => Some("reverting"),
            WorkingTreeState::Bisecting => Some("bisecting"),
        }
    }
}

/// Everything the status refresh loads from the repository.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RepoStatus {
    pub repo_name: String,
    pub branch: String,
    pub ahead: u32,
    pub behind: u32,
    pub working_tree_state: WorkingTreeState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_flags_follow_porcelain_status() {
        let untracked = File::from_status('?', '?', "new.rs".into(), None);
        assert!(!untracked.tracked);
        assert!(!untracked.has_staged_changes);
        assert!(untracked.has_unstaged_changes);

        let staged = File::from_status('M', ' ', "lib.rs".into(), None);
        assert!(staged.has_staged_changes);
        assert!(!staged.has_unstaged_changes);

        let conflict = File::from_status('U', 'U', "main.rs".into(), None);
        assert!(conflict.has_merge_conflicts);
    }

    #[test]
    fn urns_are_namespaced_per_kind() {
        let branch = Branch {
            name: "main".into(),
            is_head: true,
            upstream: None,
            ahead: None,
            behind: None,
            upstream_gone: false,
        };
        let tag = Tag {
            name: "main".into(),
            message: String::new(),
        };
        assert_eq!(branch.urn(), "branch-main");
        assert_ne!(branch.urn(), tag.urn());
        let rb = RemoteBranch {
            name: "main".into(),
            remote_name: "origin".into(),
        };
        assert_eq!(rb.urn(), "remote_branch-origin/main");
    }
}
