//! Loading repository state.
//!
//! [`RepoLoader`] is the seam between the refresh engine and git; tests swap
//! in an in-memory loader.

use std::path::{Path, PathBuf};

use crate::{
    error::CommandError,
    git_commands::run_git,
    model::{
        Branch, Commit, File, Remote, RemoteBranch, RepoStatus, StashEntry, StringPool, Submodule,
        Tag, WorkingTreeState, Worktree,
    },
};

pub trait RepoLoader: Send + Sync {
    fn load_files(&self) -> Result<Vec<File>, CommandError>;
    fn load_submodules(&self) -> Result<Vec<Submodule>, CommandError>;
    fn load_branches(&self) -> Result<Vec<Branch>, CommandError>;
    fn load_remotes(&self) -> Result<Vec<Remote>, CommandError>;
    fn load_tags(&self) -> Result<Vec<Tag>, CommandError>;
    fn load_worktrees(&self) -> Result<Vec<Worktree>, CommandError>;
    /// Reflog, newest first. With `path_filter`, only entries touching that path.
    fn load_reflog(
        &self,
        pool: &StringPool,
        limit: usize,
        path_filter: Option<&str>,
    ) -> Result<Vec<Commit>, CommandError>;
    /// Commits reachable from `ref_name`, or HEAD.
    fn load_commits(
        &self,
        pool: &StringPool,
        limit: usize,
        ref_name: Option<&str>,
    ) -> Result<Vec<Commit>, CommandError>;
    fn load_stash(&self) -> Result<Vec<StashEntry>, CommandError>;
    fn load_status(&self) -> Result<RepoStatus, CommandError>;
}

pub struct GitRepoLoader {
    repo_root: PathBuf,
}

impl GitRepoLoader {
    /// Find the repository containing `path`.
    pub fn discover(path: &Path) -> Result<Self, CommandError> {
        let cwd = if path.exists() { path } else { Path::new("/") };
        let root = run_git(cwd, &["rev-parse", "--show-toplevel"])
            .map_err(|_| CommandError::NotARepository)?;
        let root = root.trim();
        if root.is_empty() {
            return Err(CommandError::NotARepository);
        }
        Ok(Self {
            repo_root: PathBuf::from(root),
        })
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    fn git(&self, args: &[&str]) -> Result<String, CommandError> {
        run_git(&self.repo_root, args)
    }

    fn working_tree_state(&self) -> WorkingTreeState {
        let Ok(git_dir) = self.git(&["rev-parse", "--absolute-git-dir"]) else {
            return WorkingTreeState::None;
        };
        let git_dir = PathBuf::from(git_dir.trim());
        let has = |name: &str| git_dir.join(name).exists();
        if has("rebase-merge") || has("rebase-apply") {
            WorkingTreeState::Rebasing
        } else if has("MERGE_HEAD") {
            WorkingTreeState::Merging
        } else if has("CHERRY_PICK_HEAD") {
            WorkingTreeState::CherryPicking
        } else if has("REVERT_HEAD") {
            WorkingTreeState::Reverting
        } else if has("BISECT_LOG") {
            WorkingTreeState::Bisecting
        } else {
            WorkingTreeState::None
        }
    }
}

const COMMIT_FORMAT: &str = "--pretty=format:%H%x1f%P%x1f%an%x1f%ae%x1f%at%x1f%s";

impl RepoLoader for GitRepoLoader {
    fn load_files(&self) -> Result<Vec<File>, CommandError> {
        let out = self.git(&["status", "--porcelain=v1", "-z", "--untracked-files=all"])?;
        Ok(parse_status(&out).files)
    }

    fn load_submodules(&self) -> Result<Vec<Submodule>, CommandError> {
        if !self.repo_root.join(".gitmodules").exists() {
            return Ok(Vec::new());
        }
        let out = self.git(&[
            "config",
            "--file",
            ".gitmodules",
            "--get-regexp",
            r"^submodule\.",
        ])?;
        Ok(parse_submodules(&out))
    }

    fn load_branches(&self) -> Result<Vec<Branch>, CommandError> {
        let out = self.git(&[
            "for-each-ref",
            "--sort=-committerdate",
            "refs/heads",
            "--format",
            "%(HEAD)\t%(refname:short)\t%(upstream:short)\t%(upstream:track)",
        ])?;
        Ok(parse_branches(&out))
    }

    fn load_remotes(&self) -> Result<Vec<Remote>, CommandError> {
        let remotes = self.git(&["remote", "-v"])?;
        let branches = self.git(&[
            "for-each-ref",
            "--sort=refname",
            "refs/remotes",
            "--format",
            "%(refname:short)",
        ])?;
        Ok(parse_remotes(&remotes, &branches))
    }

    fn load_tags(&self) -> Result<Vec<Tag>, CommandError> {
        let out = self.git(&[
            "for-each-ref",
            "--sort=-creatordate",
            "refs/tags",
            "--format",
            "%(refname:short)\t%(contents:subject)",
        ])?;
        Ok(parse_tags(&out))
    }

    fn load_worktrees(&self) -> Result<Vec<Worktree>, CommandError> {
        let out = self.git(&["worktree", "list", "--porcelain"])?;
        Ok(parse_worktrees(&out, &self.repo_root))
    }

    fn load_reflog(
        &self,
        pool: &StringPool,
        limit: usize,
        path_filter: Option<&str>,
    ) -> Result<Vec<Commit>, CommandError> {
        let max = limit.to_string();
        let mut args = vec!["log", "-g", "--no-color", "--max-count", max.as_str(), COMMIT_FORMAT];
        if let Some(path) = path_filter {
            args.extend(["--", path]);
        }
        match self.git(&args) {
            Ok(out) => Ok(parse_commits(&out, pool)),
            // A fresh repository has no reflog yet.
            Err(CommandError::Failed { stderr, .. }) if stderr.contains("does not have any commits") => {
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    fn load_commits(
        &self,
        pool: &StringPool,
        limit: usize,
        ref_name: Option<&str>,
    ) -> Result<Vec<Commit>, CommandError> {
        let max = limit.to_string();
        let mut args = vec!["log", "--no-color", "--max-count", max.as_str(), COMMIT_FORMAT];
        if let Some(r) = ref_name.map(str::trim).filter(|s| !s.is_empty()) {
            args.push(r);
        }
        match self.git(&args) {
            Ok(out) => Ok(parse_commits(&out, pool)),
            Err(CommandError::Failed { stderr, .. }) if stderr.contains("does not have any commits") => {
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    fn load_stash(&self) -> Result<Vec<StashEntry>, CommandError> {
        let out = self.git(&["stash", "list", "--no-color", "--pretty=format:%gd\t%gs"])?;
        Ok(parse_stash(&out))
    }

    fn load_status(&self) -> Result<RepoStatus, CommandError> {
        let out = self.git(&["status", "--porcelain=v1", "-z", "-b", "--untracked-files=no"])?;
        let parsed = parse_status(&out);
        Ok(RepoStatus {
            repo_name: self
                .repo_root
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            branch: parsed.branch,
            ahead: parsed.ahead,
            behind: parsed.behind,
            working_tree_state: self.working_tree_state(),
        })
    }
}

#[derive(Debug, Default)]
pub struct ParsedStatus {
    pub branch: String,
    pub ahead: u32,
    pub behind: u32,
    pub files: Vec<File>,
}

/// Parse `git status --porcelain=v1 -z [-b]`.
pub fn parse_status(out: &str) -> ParsedStatus {
    let mut parsed = ParsedStatus::default();
    let items: Vec<&str> = out.split('\0').filter(|s| !s.is_empty()).collect();
    let mut i = 0;
    while i < items.len() {
        let item = items[i];
        i += 1;
        if let Some(line) = item.strip_prefix("## ") {
            parse_branch_header(line, &mut parsed);
            continue;
        }
        let mut chars = item.chars();
        let (Some(x), Some(y)) = (chars.next(), chars.next()) else {
            continue;
        };
        let Some(path) = item.get(3..).filter(|p| !p.is_empty()) else {
            continue;
        };
        // Renames and copies are followed by the source path.
        let previous = if matches!(x, 'R' | 'C') && i < items.len() {
            i += 1;
            Some(items[i - 1].to_string())
        } else {
            None
        };
        parsed
            .files
            .push(File::from_status(x, y, path.to_string(), previous));
    }
    parsed
}

fn parse_branch_header(line: &str, parsed: &mut ParsedStatus) {
    let rest = line.trim();
    let (head, track) = match rest.rsplit_once(" [") {
        Some((left, right)) => (left.trim(), Some(right.trim_end_matches(']'))),
        None => (rest, None),
    };
    let head = head.strip_prefix("No commits yet on ").unwrap_or(head);
    parsed.branch = head.split("...").next().unwrap_or(head).trim().to_string();
    let (ahead, behind, _) = parse_track(track.unwrap_or(""));
    parsed.ahead = ahead.unwrap_or(0);
    parsed.behind = behind.unwrap_or(0);
}

/// Parse "ahead 1, behind 2" / "[gone]" style tracking info.
fn parse_track(track: &str) -> (Option<u32>, Option<u32>, bool) {
    let track = track.trim().trim_start_matches('[').trim_end_matches(']');
    if track == "gone" {
        return (None, None, true);
    }
    let mut ahead = None;
    let mut behind = None;
    for part in track.split(',').map(str::trim) {
        if let Some(v) = part.strip_prefix("ahead ") {
            ahead = v.parse().ok();
        } else if let Some(v) = part.strip_prefix("behind ") {
            behind = v.parse().ok();
        }
    }
    (ahead, behind, false)
}

pub fn parse_branches(out: &str) -> Vec<Branch> {
    let mut branches = Vec::new();
    for line in out.lines() {
        let mut it = line.split('\t');
        let head = it.next().unwrap_or("").trim();
        let name = it.next().unwrap_or("").trim();
        if name.is_empty() {
            continue;
        }
        let upstream = it.next().map(str::trim).filter(|s| !s.is_empty());
        let (ahead, behind, gone) = parse_track(it.next().unwrap_or(""));
        let tracked = upstream.is_some() && !gone;
        branches.push(Branch {
            name: name.to_string(),
            is_head: head == "*",
            upstream: upstream.map(str::to_string),
            ahead: if tracked { Some(ahead.unwrap_or(0)) } else { None },
            behind: if tracked { Some(behind.unwrap_or(0)) } else { None },
            upstream_gone: gone,
        });
    }
    // Checked-out branch first, like the branches panel shows it.
    if let Some(pos) = branches.iter().position(|b| b.is_head) {
        let head = branches.remove(pos);
        branches.insert(0, head);
    }
    branches
}

pub fn parse_remotes(remote_v: &str, remote_refs: &str) -> Vec<Remote> {
    let mut remotes: Vec<Remote> = Vec::new();
    for line in remote_v.lines() {
        let mut it = line.split_whitespace();
        let (Some(name), Some(url)) = (it.next(), it.next()) else {
            continue;
        };
        match remotes.iter_mut().find(|r| r.name == name) {
            Some(remote) => {
                if !remote.urls.iter().any(|u| u == url) {
                    remote.urls.push(url.to_string());
                }
            }
            None => remotes.push(Remote {
                name: name.to_string(),
                urls: vec![url.to_string()],
                branches: Vec::new(),
            }),
        }
    }
    for line in remote_refs.lines() {
        let Some((remote_name, branch)) = line.trim().split_once('/') else {
            continue;
        };
        if branch == "HEAD" {
            continue;
        }
        if let Some(remote) = remotes.iter_mut().find(|r| r.name == remote_name) {
            remote.branches.push(RemoteBranch {
                name: branch.to_string(),
                remote_name: remote_name.to_string(),
            });
        }
    }
    remotes
}

pub fn parse_tags(out: &str) -> Vec<Tag> {
    out.lines()
        .filter_map(|line| {
            let mut it = line.splitn(2, '\t');
            let name = it.next()?.trim();
            if name.is_empty() {
                return None;
            }
            Some(Tag {
                name: name.to_string(),
                message: it.next().unwrap_or("").trim().to_string(),
            })
        })
        .collect()
}

pub fn parse_worktrees(out: &str, current_root: &Path) -> Vec<Worktree> {
    let mut worktrees = Vec::new();
    for block in out.split("\n\n") {
        let mut path = None;
        let mut head = String::new();
        let mut branch = None;
        for line in block.lines() {
            if let Some(p) = line.strip_prefix("worktree ") {
                path = Some(p.to_string());
            } else if let Some(h) = line.strip_prefix("HEAD ") {
                head = h.to_string();
            } else if let Some(b) = line.strip_prefix("branch ") {
                branch = Some(b.trim_start_matches("refs/heads/").to_string());
            }
        }
        let Some(path) = path else {
            continue;
        };
        let is_current = Path::new(&path) == current_root;
        worktrees.push(Worktree {
            is_main: worktrees.is_empty(),
            is_current,
            path,
            head,
            branch,
        });
    }
    worktrees
}

/// Parse records written with [`COMMIT_FORMAT`].
pub fn parse_commits(out: &str, pool: &StringPool) -> Vec<Commit> {
    let mut commits = Vec::new();
    for line in out.lines() {
        let mut it = line.splitn(6, '\x1f');
        let hash = it.next().unwrap_or("").trim();
        if hash.is_empty() {
            continue;
        }
        let parents = it
            .next()
            .unwrap_or("")
            .split_whitespace()
            .map(|p| pool.add(p))
            .collect();
        let author_name = it.next().unwrap_or("").to_string();
        let author_email = it.next().unwrap_or("").to_string();
        let unix_timestamp = it.next().unwrap_or("").trim().parse().unwrap_or(0);
        let subject = it.next().unwrap_or("").to_string();
        commits.push(Commit {
            hash: pool.add(hash),
            parents,
            author_name,
            author_email,
            unix_timestamp,
            subject,
        });
    }
    commits
}

pub fn parse_stash(out: &str) -> Vec<StashEntry> {
    out.lines()
        .filter_map(|line| {
            let (selector, name) = line.split_once('\t').unwrap_or((line, ""));
            let index = selector
                .trim()
                .strip_prefix("stash@{")?
                .strip_suffix('}')?
                .parse()
                .ok()?;
            Some(StashEntry {
                index,
                name: name.trim().to_string(),
            })
        })
        .collect()
}

pub fn parse_submodules(out: &str) -> Vec<Submodule> {
    let mut submodules: Vec<Submodule> = Vec::new();
    for line in out.lines() {
        let Some((key, value)) = line.split_once(' ') else {
            continue;
        };
        let Some(key) = key.strip_prefix("submodule.") else {
            continue;
        };
        let Some((name, field)) = key.rsplit_once('.') else {
            continue;
        };
        let idx = match submodules.iter().position(|s| s.name == name) {
            Some(idx) => idx,
            None => {
                submodules.push(Submodule {
                    name: name.to_string(),
                    path: String::new(),
                    url: String::new(),
                });
                submodules.len() - 1
            }
        };
        match field {
            "path" => submodules[idx].path = value.trim().to_string(),
            "url" => submodules[idx].url = value.trim().to_string(),
            _ => {}
        }
    }
    submodules
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn status_parses_branch_header_renames_and_untracked() {
        let out = "## main...origin/main [ahead 2, behind 1]\0 M src/lib.rs\0R  new.rs\0old.rs\0?? notes.md\0UU conflict.rs\0";
        let parsed = parse_status(out);
        assert_eq!(parsed.branch, "main");
        assert_eq!((parsed.ahead, parsed.behind), (2, 1));

        let paths: Vec<_> = parsed.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["src/lib.rs", "new.rs", "notes.md", "conflict.rs"]);
        assert_eq!(parsed.files[1].previous_path.as_deref(), Some("old.rs"));
        assert!(!parsed.files[2].tracked);
        assert!(parsed.files[3].has_merge_conflicts);
    }

    #[test]
    fn status_header_without_upstream() {
        let parsed = parse_status("## No commits yet on main\0");
        assert_eq!(parsed.branch, "main");
        assert_eq!((parsed.ahead, parsed.behind), (0, 0));
    }

    #[test]
    fn branches_put_head_first_and_parse_tracking() {
        let out = " \tfeature\torigin/feature\t[gone]\n*\tmain\torigin/main\t[ahead 3]\n \tlocal-only\t\t\n";
        let branches = parse_branches(out);
        assert_eq!(branches[0].name, "main");
        assert!(branches[0].is_head);
        assert_eq!(branches[0].ahead, Some(3));
        assert_eq!(branches[0].behind, Some(0));

        let feature = branches.iter().find(|b| b.name == "feature").unwrap();
        assert!(feature.upstream_gone);
        assert_eq!(feature.ahead, None);

        let local = branches.iter().find(|b| b.name == "local-only").unwrap();
        assert_eq!(local.upstream, None);
    }

    #[test]
    fn remotes_collect_urls_and_branches() {
        let remote_v = "origin\tgit@example.com:a/b.git (fetch)\norigin\tgit@example.com:a/b.git (push)\nupstream\thttps://example.com/b.git (fetch)\n";
        let refs = "origin/HEAD\norigin/main\norigin/topic/x\nupstream/main\n";
        let remotes = parse_remotes(remote_v, refs);
        assert_eq!(remotes.len(), 2);
        assert_eq!(remotes[0].urls.len(), 1);
        let names: Vec<_> = remotes[0].branches.iter().map(|b| b.full_name()).collect();
        assert_eq!(names, vec!["origin/main", "origin/topic/x"]);
    }

    #[test]
    fn commits_intern_hashes() {
        let pool = StringPool::new();
        let out = "bbb\x1faaa\x1fAda\x1fada@example.com\x1f1700000000\x1fsecond\naaa\x1f\x1fAda\x1fada@example.com\x1f1690000000\x1ffirst\n";
        let commits = parse_commits(out, &pool);
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[0].subject, "second");
        assert!(Arc::ptr_eq(&commits[0].parents[0], &commits[1].hash));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn stash_and_tags_and_submodules() {
        let stash = parse_stash("stash@{0}\tWIP on main: abc\nstash@{1}\tOn dev: tmp\ngarbage\n");
        assert_eq!(stash.len(), 2);
        assert_eq!(stash[1].ref_name(), "stash@{1}");

        let tags = parse_tags("v1.0\tfirst release\nv0.9\t\n");
        assert_eq!(tags[0].message, "first release");
        assert_eq!(tags[1].name, "v0.9");

        let subs = parse_submodules(
            "submodule.vendor/lib.path vendor/lib\nsubmodule.vendor/lib.url https://example.com/lib.git\n",
        );
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].name, "vendor/lib");
        assert_eq!(subs[0].path, "vendor/lib");
    }

    #[test]
    fn worktrees_mark_main_and_current() {
        let out = "worktree /src/repo\nHEAD 1111\nbranch refs/heads/main\n\nworktree /src/repo-wt\nHEAD 2222\ndetached\n";
        let wts = parse_worktrees(out, Path::new("/src/repo-wt"));
        assert_eq!(wts.len(), 2);
        assert!(wts[0].is_main && !wts[0].is_current);
        assert_eq!(wts[0].branch.as_deref(), Some("main"));
        assert!(wts[1].is_current);
        assert_eq!(wts[1].branch, None);
    }
}
