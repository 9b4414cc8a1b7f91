//! Full refreshes of the shared model.
//!
//! A refresh reloads one or more [`RefreshScope`]s from the [`RepoLoader`],
//! swaps each result into the model under that scope's domain mutex, then
//! queues a `post_refresh_update` on the UI thread for every context that
//! shows that scope.

use std::{
    collections::{BTreeSet, HashMap},
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    thread,
};

use parking_lot::{Mutex, RwLock};

use crate::{
    context::ContextKey,
    locks::Domain,
    model::{Author, Model},
    repo::RepoLoader,
    tasks::{Coordinator, UiState, UiTask, panic_to_error},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RefreshScope {
    Files,
    Submodules,
    Branches,
    Reflog,
    Tags,
    Remotes,
    Worktrees,
    Commits,
    Stash,
    Status,
    SubCommits,
}

impl RefreshScope {
    /// What an empty scope list means.
    pub const DEFAULT: [RefreshScope; 10] = [
        RefreshScope::Files,
        RefreshScope::Submodules,
        RefreshScope::Branches,
        RefreshScope::Reflog,
        RefreshScope::Tags,
        RefreshScope::Remotes,
        RefreshScope::Worktrees,
        RefreshScope::Commits,
        RefreshScope::Stash,
        RefreshScope::Status,
    ];

    pub fn domain(self) -> Domain {
        match self {
            RefreshScope::Files | RefreshScope::Submodules => Domain::Files,
            RefreshScope::Branches
            | RefreshScope::Reflog
            | RefreshScope::Tags
            | RefreshScope::Remotes
            | RefreshScope::Worktrees => Domain::Branches,
            RefreshScope::Commits | RefreshScope::Stash => Domain::LocalCommits,
            RefreshScope::Status => Domain::Status,
            RefreshScope::SubCommits => Domain::SubCommits,
        }
    }

    /// Contexts that render data from this scope.
    pub fn dependent_contexts(self) -> &'static [ContextKey] {
        match self {
            RefreshScope::Files => &[ContextKey::Files],
            RefreshScope::Submodules => &[ContextKey::Submodules],
            RefreshScope::Branches => &[ContextKey::LocalBranches, ContextKey::Status],
            // Branch recency comes from the reflog.
            RefreshScope::Reflog => &[ContextKey::ReflogCommits, ContextKey::LocalBranches],
            RefreshScope::Tags => &[ContextKey::Tags],
            RefreshScope::Remotes => &[ContextKey::Remotes],
            RefreshScope::Worktrees => &[ContextKey::Worktrees],
            RefreshScope::Commits => &[ContextKey::LocalCommits],
            RefreshScope::Stash => &[ContextKey::Stash],
            RefreshScope::Status => &[ContextKey::Status],
            RefreshScope::SubCommits => &[ContextKey::SubCommits],
        }
    }

    /// Scopes whose sequences hold hashes interned in the model's pool.
    fn interns_hashes(self) -> bool {
        matches!(
            self,
            RefreshScope::Reflog | RefreshScope::Commits | RefreshScope::SubCommits
        )
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RefreshMode {
    /// Block the caller until every scope is loaded. Only for fast scopes.
    Sync,
    #[default]
    Async,
}

pub struct RefreshOptions<S> {
    pub scope: Vec<RefreshScope>,
    pub mode: RefreshMode,
    /// Runs on the UI thread once every scope has finished.
    pub then: Option<UiTask<S>>,
}

impl<S> RefreshOptions<S> {
    pub fn new(scope: impl IntoIterator<Item = RefreshScope>) -> Self {
        Self {
            scope: scope.into_iter().collect(),
            mode: RefreshMode::Async,
            then: None,
        }
    }

    /// Every scope except sub-commits.
    pub fn all() -> Self {
        Self::new([])
    }

    pub fn sync(mut self) -> Self {
        self.mode = RefreshMode::Sync;
        self
    }

    pub fn then<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&mut S) -> anyhow::Result<()> + Send + 'static,
    {
        self.then = Some(Box::new(f));
        self
    }

    fn scopes(&self) -> Vec<RefreshScope> {
        if self.scope.is_empty() {
            return RefreshScope::DEFAULT.to_vec();
        }
        let unique: BTreeSet<_> = self.scope.iter().copied().collect();
        unique.into_iter().collect()
    }
}

/// UI state that can react to a committed refresh.
pub trait RefreshTarget: UiState {
    /// Re-render `key` from the model. Must not touch source-of-truth fields.
    fn post_refresh_update(&mut self, key: ContextKey) -> anyhow::Result<()>;
}

#[derive(Clone, Copy, Debug)]
pub struct RefreshLimits {
    pub commits: usize,
    pub reflog: usize,
}

impl Default for RefreshLimits {
    fn default() -> Self {
        Self {
            commits: 300,
            reflog: 500,
        }
    }
}

/// Orders results so a slow, older load never overwrites a newer one.
#[derive(Default)]
struct Tickets {
    next: AtomicU64,
    committed: Mutex<HashMap<RefreshScope, u64>>,
}

impl Tickets {
    fn take(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Must be called inside the scope's domain critical section.
    fn try_commit(&self, scope: RefreshScope, ticket: u64) -> bool {
        let mut committed = self.committed.lock();
        let last = committed.entry(scope).or_insert(0);
        if ticket <= *last {
            tracing::debug!(?scope, ticket, last = *last, "dropping stale refresh");
            return false;
        }
        *last = ticket;
        true
    }
}

pub struct Refresher<S> {
    model: Arc<Model>,
    loader: Arc<dyn RepoLoader>,
    coord: Coordinator<S>,
    limits: RefreshLimits,
    tickets: Arc<Tickets>,
    /// Path the reflog panel is filtered by.
    filter_path: Arc<RwLock<Option<String>>>,
}

impl<S> Clone for Refresher<S> {
    fn clone(&self) -> Self {
        Self {
            model: self.model.clone(),
            loader: self.loader.clone(),
            coord: self.coord.clone(),
            limits: self.limits,
            tickets: self.tickets.clone(),
            filter_path: self.filter_path.clone(),
        }
    }
}

impl<S: RefreshTarget> Refresher<S> {
    pub fn new(
        model: Arc<Model>,
        loader: Arc<dyn RepoLoader>,
        coord: Coordinator<S>,
        limits: RefreshLimits,
    ) -> Self {
        Self {
            model,
            loader,
            coord,
            limits,
            tickets: Arc::new(Tickets::default()),
            filter_path: Arc::new(RwLock::new(None)),
        }
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    pub fn set_filter_path(&self, path: Option<String>) {
        *self.filter_path.write() = path;
    }

    pub fn filter_path(&self) -> Option<String> {
        self.filter_path.read().clone()
    }

    /// Reload the requested scopes.
    ///
    /// In sync mode the caller blocks and the first load error is returned.
    /// In async mode errors go through the worker error path.
    pub fn refresh(&self, opts: RefreshOptions<S>) -> anyhow::Result<()> {
        let scopes = opts.scopes();
        // Tickets are handed out in call order, not completion order.
        let jobs: Vec<(RefreshScope, u64)> =
            scopes.iter().map(|s| (*s, self.tickets.take())).collect();
        tracing::debug!(?scopes, mode = ?opts.mode, "refresh");

        match opts.mode {
            RefreshMode::Sync => {
                let results: Vec<anyhow::Result<()>> = thread::scope(|s| {
                    let handles: Vec<_> = jobs
                        .iter()
                        .map(|(scope, ticket)| s.spawn(move || self.refresh_scope(*scope, *ticket)))
                        .collect();
                    handles
                        .into_iter()
                        .map(|h| {
                            h.join().unwrap_or_else(|payload| {
                                Err(panic_to_error("refresh thread", payload))
                            })
                        })
                        .collect()
                });
                if let Some(then) = opts.then {
                    self.coord.on_ui_thread(then);
                }
                results.into_iter().collect()
            }
            RefreshMode::Async => {
                let remaining = Arc::new(AtomicUsize::new(jobs.len()));
                let then = Arc::new(Mutex::new(opts.then));
                for (scope, ticket) in jobs {
                    let this = self.clone();
                    let done = ThenOnLast {
                        remaining: remaining.clone(),
                        then: then.clone(),
                        coord: self.coord.clone(),
                    };
                    self.coord.on_worker(move |task| {
                        let _done = done;
                        task.checkpoint()?;
                        this.refresh_scope(scope, ticket)
                    });
                }
                Ok(())
            }
        }
    }

    fn refresh_scope(&self, scope: RefreshScope, ticket: u64) -> anyhow::Result<()> {
        let committed = match scope {
            RefreshScope::Files => self.refresh_files(ticket)?,
            RefreshScope::Submodules => self.refresh_submodules(ticket)?,
            RefreshScope::Branches => self.refresh_branches(ticket)?,
            RefreshScope::Reflog => self.refresh_reflog(ticket)?,
            RefreshScope::Tags => self.refresh_tags(ticket)?,
            RefreshScope::Remotes => self.refresh_remotes(ticket)?,
            RefreshScope::Worktrees => self.refresh_worktrees(ticket)?,
            RefreshScope::Commits => self.refresh_commits(ticket)?,
            RefreshScope::Stash => self.refresh_stash(ticket)?,
            RefreshScope::Status => self.refresh_status(ticket)?,
            RefreshScope::SubCommits => self.refresh_sub_commits(ticket)?,
        };
        if committed && scope.interns_hashes() {
            // The replaced sequence is gone now, and so are its last handles.
            let pruned = self.model.hash_pool().prune();
            tracing::trace!(?scope, pruned, "pruned hash pool");
        }
        if committed {
            for key in scope.dependent_contexts() {
                let key = *key;
                self.coord.on_ui_thread(move |s| s.post_refresh_update(key));
            }
        }
        Ok(())
    }

    fn refresh_files(&self, ticket: u64) -> anyhow::Result<bool> {
        let files = self.loader.load_files()?;
        let mut guard = self.model.files.lock();
        if !self.tickets.try_commit(RefreshScope::Files, ticket) {
            return Ok(false);
        }
        self.model.set_files(&mut guard, files);
        Ok(true)
    }

    fn refresh_submodules(&self, ticket: u64) -> anyhow::Result<bool> {
        let submodules = self.loader.load_submodules()?;
        let mut guard = self.model.files.lock();
        if !self.tickets.try_commit(RefreshScope::Submodules, ticket) {
            return Ok(false);
        }
        guard.submodules = submodules;
        Ok(true)
    }

    fn refresh_branches(&self, ticket: u64) -> anyhow::Result<bool> {
        let branches = self.loader.load_branches()?;
        let mut guard = self.model.branches.lock();
        if !self.tickets.try_commit(RefreshScope::Branches, ticket) {
            return Ok(false);
        }
        // Detached heads keep whatever the status refresh recorded.
        if let Some(head) = branches.iter().find(|b| b.is_head) {
            guard.checked_out_branch = head.name.clone();
        }
        guard.branches = branches;
        Ok(true)
    }

    fn refresh_reflog(&self, ticket: u64) -> anyhow::Result<bool> {
        let pool = self.model.hash_pool();
        let full = self.loader.load_reflog(pool, self.limits.reflog, None)?;
        let filtered = match self.filter_path() {
            Some(path) => Some(
                self.loader
                    .load_reflog(pool, self.limits.reflog, Some(&path))?,
            ),
            None => None,
        };
        let mut guard = self.model.branches.lock();
        if !self.tickets.try_commit(RefreshScope::Reflog, ticket) {
            return Ok(false);
        }
        guard.set_reflog(full, filtered);
        Ok(true)
    }

    fn refresh_tags(&self, ticket: u64) -> anyhow::Result<bool> {
        let tags = self.loader.load_tags()?;
        let mut guard = self.model.branches.lock();
        if !self.tickets.try_commit(RefreshScope::Tags, ticket) {
            return Ok(false);
        }
        guard.tags = tags;
        Ok(true)
    }

    fn refresh_remotes(&self, ticket: u64) -> anyhow::Result<bool> {
        let remotes = self.loader.load_remotes()?;
        let mut guard = self.model.branches.lock();
        if !self.tickets.try_commit(RefreshScope::Remotes, ticket) {
            return Ok(false);
        }
        guard.remotes = remotes;
        Ok(true)
    }

    fn refresh_worktrees(&self, ticket: u64) -> anyhow::Result<bool> {
        let worktrees = self.loader.load_worktrees()?;
        let mut guard = self.model.branches.lock();
        if !self.tickets.try_commit(RefreshScope::Worktrees, ticket) {
            return Ok(false);
        }
        guard.worktrees = worktrees;
        Ok(true)
    }

    fn refresh_commits(&self, ticket: u64) -> anyhow::Result<bool> {
        let commits = self
            .loader
            .load_commits(self.model.hash_pool(), self.limits.commits, None)?;

        // Authors < LocalCommits < Status.
        let mut authors = self.model.authors.lock();
        let mut local = self.model.local_commits.lock();
        if !self.tickets.try_commit(RefreshScope::Commits, ticket) {
            return Ok(false);
        }
        for c in &commits {
            authors.entry(c.author_key()).or_insert_with(|| Author {
                name: c.author_name.clone(),
                email: c.author_email.clone(),
            });
        }
        local.working_tree_state_at_last_commit_refresh =
            self.model.status.lock().working_tree_state;
        local.commits = commits;
        Ok(true)
    }

    fn refresh_stash(&self, ticket: u64) -> anyhow::Result<bool> {
        let stash = self.loader.load_stash()?;
        let mut guard = self.model.local_commits.lock();
        if !self.tickets.try_commit(RefreshScope::Stash, ticket) {
            return Ok(false);
        }
        guard.stash_entries = stash;
        Ok(true)
    }

    fn refresh_status(&self, ticket: u64) -> anyhow::Result<bool> {
        let mut status = self.loader.load_status()?;

        // Branches < Status.
        let branches = self.model.branches.lock();
        let mut guard = self.model.status.lock();
        if !self.tickets.try_commit(RefreshScope::Status, ticket) {
            return Ok(false);
        }
        if (status.branch.is_empty() || status.branch.starts_with("HEAD"))
            && !branches.checked_out_branch.is_empty()
        {
            status.branch = branches.checked_out_branch.clone();
        }
        *guard = status;
        Ok(true)
    }

    fn refresh_sub_commits(&self, ticket: u64) -> anyhow::Result<bool> {
        let Some(ref_name) = self.model.sub_commits.lock().ref_name.clone() else {
            return Ok(false);
        };
        let commits =
            self.loader
                .load_commits(self.model.hash_pool(), self.limits.commits, Some(&ref_name))?;
        let mut guard = self.model.sub_commits.lock();
        // The user may have switched to another ref while we were loading.
        if guard.ref_name.as_deref() != Some(ref_name.as_str()) {
            return Ok(false);
        }
        if !self.tickets.try_commit(RefreshScope::SubCommits, ticket) {
            return Ok(false);
        }
        guard.commits = commits;
        Ok(true)
    }
}

/// Queues the refresh's `then` once the last scope's worker finishes,
/// whether it succeeded or not.
struct ThenOnLast<S> {
    remaining: Arc<AtomicUsize>,
    then: Arc<Mutex<Option<UiTask<S>>>>,
    coord: Coordinator<S>,
}

impl<S> Drop for ThenOnLast<S> {
    fn drop(&mut self) {
        if self.remaining.fetch_sub(1, Ordering::SeqCst) != 1 {
            return;
        }
        if let Some(then) = self.then.lock().take() {
            self.coord.queue_ui_task(then);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        error::{CommandError, ErrorOrigin, GuiError},
        locks::DomainMutex,
        model::{
            Branch, Commit, File, Remote, RepoStatus, StashEntry, StringPool, Submodule, Tag,
            Worktree,
        },
    };
    use rand::seq::SliceRandom;
    use std::{
        sync::mpsc,
        time::{Duration, Instant},
    };

    /// In-memory repository with optional per-scope delays and a gate that
    /// holds the first files load until released.
    #[derive(Default)]
    pub(crate) struct FakeRepo {
        pub files: Mutex<Vec<String>>,
        pub branches: Mutex<Vec<String>>,
        pub reflog: Mutex<Vec<String>>,
        pub commits: Mutex<Vec<(String, String)>>,
        pub files_delay: Option<Duration>,
        pub branches_delay: Option<Duration>,
        pub fail_branches: bool,
        /// Status loads take Status then Branches, against the global order.
        pub invert_status_locks: bool,
        pub files_gate: Mutex<Option<(mpsc::Sender<()>, mpsc::Receiver<()>)>>,
    }

    impl FakeRepo {
        pub(crate) fn with_files(paths: &[&str]) -> Self {
            let repo = Self::default();
            *repo.files.lock() = paths.iter().map(|s| s.to_string()).collect();
            repo
        }

        fn commits_from(&self, pool: &StringPool, hashes: &[String]) -> Vec<Commit> {
            hashes
                .iter()
                .map(|h| Commit {
                    hash: pool.add(h),
                    parents: Vec::new(),
                    author_name: "Ada".into(),
                    author_email: "ada@example.com".into(),
                    unix_timestamp: 0,
                    subject: format!("commit {h}"),
                })
                .collect()
        }
    }

    impl RepoLoader for FakeRepo {
        fn load_files(&self) -> Result<Vec<File>, CommandError> {
            let gate = self.files_gate.lock().take();
            if let Some((started, release)) = gate {
                let _ = started.send(());
                let _ = release.recv();
            }
            if let Some(d) = self.files_delay {
                thread::sleep(d);
            }
            Ok(self
                .files
                .lock()
                .iter()
                .map(|p| File::from_status(' ', 'M', p.clone(), None))
                .collect())
        }

        fn load_submodules(&self) -> Result<Vec<Submodule>, CommandError> {
            Ok(Vec::new())
        }

        fn load_branches(&self) -> Result<Vec<Branch>, CommandError> {
            if let Some(d) = self.branches_delay {
                thread::sleep(d);
            }
            if self.fail_branches {
                return Err(CommandError::Failed {
                    cmd: "git for-each-ref".into(),
                    code: Some(128),
                    stderr: "fatal: bad object".into(),
                });
            }
            Ok(self
                .branches
                .lock()
                .iter()
                .enumerate()
                .map(|(i, name)| Branch {
                    name: name.clone(),
                    is_head: i == 0,
                    upstream: None,
                    ahead: None,
                    behind: None,
                    upstream_gone: false,
                })
                .collect())
        }

        fn load_remotes(&self) -> Result<Vec<Remote>, CommandError> {
            Ok(Vec::new())
        }

        fn load_tags(&self) -> Result<Vec<Tag>, CommandError> {
            Ok(Vec::new())
        }

        fn load_worktrees(&self) -> Result<Vec<Worktree>, CommandError> {
            Ok(Vec::new())
        }

        fn load_reflog(
            &self,
            pool: &StringPool,
            _limit: usize,
            path_filter: Option<&str>,
        ) -> Result<Vec<Commit>, CommandError> {
            let all = self.reflog.lock().clone();
            let picked: Vec<String> = match path_filter {
                // Pretend only every other entry touches the path.
                Some(_) => all.into_iter().step_by(2).collect(),
                None => all,
            };
            Ok(self.commits_from(pool, &picked))
        }

        fn load_commits(
            &self,
            pool: &StringPool,
            _limit: usize,
            _ref_name: Option<&str>,
        ) -> Result<Vec<Commit>, CommandError> {
            Ok(self
                .commits
                .lock()
                .iter()
                .map(|(hash, author)| Commit {
                    hash: pool.add(hash),
                    parents: Vec::new(),
                    author_name: author.clone(),
                    author_email: format!("{}@example.com", author.to_lowercase()),
                    unix_timestamp: 0,
                    subject: String::new(),
                })
                .collect())
        }

        fn load_stash(&self) -> Result<Vec<StashEntry>, CommandError> {
            Ok(Vec::new())
        }

        fn load_status(&self) -> Result<RepoStatus, CommandError> {
            if self.invert_status_locks {
                let status = DomainMutex::new(Domain::Status, ());
                let branches = DomainMutex::new(Domain::Branches, ());
                let _s = status.lock();
                let _b = branches.lock();
            }
            Ok(RepoStatus {
                repo_name: "repo".into(),
                ..RepoStatus::default()
            })
        }
    }

    #[derive(Default)]
    struct TestState {
        updates: Vec<ContextKey>,
        errors: Vec<(String, ErrorOrigin)>,
        then_ran: Vec<Vec<ContextKey>>,
    }

    impl UiState for TestState {
        fn handle_error(&mut self, err: anyhow::Error, origin: ErrorOrigin) {
            self.errors.push((err.to_string(), origin));
        }
    }

    impl RefreshTarget for TestState {
        fn post_refresh_update(&mut self, key: ContextKey) -> anyhow::Result<()> {
            self.updates.push(key);
            Ok(())
        }
    }

    const WAIT: Duration = Duration::from_secs(10);

    fn setup(
        repo: FakeRepo,
    ) -> (
        Refresher<TestState>,
        Arc<FakeRepo>,
        crate::tasks::UiReceiver<TestState>,
    ) {
        let (coord, rx) = Coordinator::<TestState>::new();
        let repo = Arc::new(repo);
        let refresher = Refresher::new(
            Arc::new(Model::new()),
            repo.clone(),
            coord,
            RefreshLimits::default(),
        );
        (refresher, repo, rx)
    }

    #[test]
    fn concurrent_branches_and_files_refreshes_both_land() {
        let mut repo = FakeRepo::with_files(&["a.go", "b.go"]);
        repo.files_delay = Some(Duration::from_millis(50));
        *repo.branches.lock() = vec!["main".into(), "dev".into()];
        let (refresher, _repo, mut rx) = setup(repo);
        let mut state = TestState::default();

        refresher
            .refresh(RefreshOptions::new([RefreshScope::Files]))
            .unwrap();
        refresher
            .refresh(RefreshOptions::new([RefreshScope::Branches]))
            .unwrap();
        assert!(rx.settle(&mut state, WAIT));

        let model = refresher.model();
        assert_eq!(model.files_snapshot().len(), 2);
        assert_eq!(model.branch_names(), vec!["main", "dev"]);
        assert_eq!(model.branches.lock().checked_out_branch, "main");
        assert!(model.files_index().contains("a.go"));
        assert!(state.updates.contains(&ContextKey::Files));
        assert!(state.updates.contains(&ContextKey::LocalBranches));
        assert!(state.errors.is_empty());
    }

    #[test]
    fn unfiltered_reflog_equals_full_reflog() {
        let repo = FakeRepo::default();
        *repo.reflog.lock() = vec!["c3".into(), "c2".into(), "c1".into()];
        let (refresher, _repo, mut rx) = setup(repo);
        let mut state = TestState::default();

        refresher
            .refresh(RefreshOptions::new([RefreshScope::Reflog]).sync())
            .unwrap();
        rx.drain(&mut state);
        let (full, filtered) = refresher.model().reflog_snapshot();
        assert_eq!(full.len(), 3);
        assert_eq!(*full, *filtered);
        assert!(Arc::ptr_eq(&full, &filtered));

        refresher.set_filter_path(Some("src/lib.rs".into()));
        refresher
            .refresh(RefreshOptions::new([RefreshScope::Reflog]).sync())
            .unwrap();
        let (full, filtered) = refresher.model().reflog_snapshot();
        assert_eq!(full.len(), 3);
        assert_eq!(filtered.len(), 2);
        assert!(filtered.iter().all(|c| full.iter().any(|f| f.hash == c.hash)));
    }

    #[test]
    fn hash_pool_only_keeps_live_hashes() {
        let (refresher, repo, _rx) = setup(FakeRepo::default());

        for round in 0..20 {
            *repo.reflog.lock() = (0..50).map(|i| format!("{round}-{i}")).collect();
            refresher
                .refresh(RefreshOptions::new([RefreshScope::Reflog]).sync())
                .unwrap();
        }

        let model = refresher.model();
        assert_eq!(model.reflog_snapshot().0.len(), 50);
        assert_eq!(model.hash_pool().len(), 50);
    }

    #[test]
    fn stale_load_does_not_overwrite_newer_one() {
        let repo = FakeRepo::with_files(&["old.rs"]);
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        *repo.files_gate.lock() = Some((started_tx, release_rx));
        let (refresher, repo, mut rx) = setup(repo);
        let mut state = TestState::default();

        // First refresh blocks inside the loader.
        refresher
            .refresh(RefreshOptions::new([RefreshScope::Files]))
            .unwrap();
        started_rx.recv_timeout(WAIT).unwrap();

        *repo.files.lock() = vec!["new.rs".into()];
        refresher
            .refresh(RefreshOptions::new([RefreshScope::Files]))
            .unwrap();

        let deadline = Instant::now() + WAIT;
        while !refresher.model().files_index().contains("new.rs") {
            assert!(Instant::now() < deadline, "second refresh never landed");
            rx.drain(&mut state);
            thread::sleep(Duration::from_millis(1));
        }

        // The first load finishes last, with an older ticket.
        *repo.files.lock() = vec!["stale.rs".into()];
        release_tx.send(()).unwrap();
        assert!(rx.settle(&mut state, WAIT));

        let paths: Vec<_> = refresher
            .model()
            .files_snapshot()
            .into_iter()
            .map(|f| f.path)
            .collect();
        assert_eq!(paths, vec!["new.rs"]);
        assert_eq!(
            state.updates.iter().filter(|k| **k == ContextKey::Files).count(),
            1
        );
    }

    #[test]
    fn then_runs_after_every_scope_even_when_one_fails() {
        let mut repo = FakeRepo::with_files(&["a.rs"]);
        repo.fail_branches = true;
        repo.branches_delay = Some(Duration::from_millis(20));
        let (refresher, _repo, mut rx) = setup(repo);
        let mut state = TestState::default();

        refresher
            .refresh(
                RefreshOptions::new([RefreshScope::Files, RefreshScope::Branches]).then(
                    |s: &mut TestState| {
                        let seen = s.updates.clone();
                        s.then_ran.push(seen);
                        Ok(())
                    },
                ),
            )
            .unwrap();
        assert!(rx.settle(&mut state, WAIT));

        assert_eq!(state.then_ran.len(), 1);
        assert_eq!(state.then_ran[0], vec![ContextKey::Files]);
        assert_eq!(state.errors.len(), 1);
        assert_eq!(state.errors[0].1, ErrorOrigin::Worker);
        assert!(state.errors[0].0.contains("bad object"));
    }

    #[test]
    fn lock_order_violation_in_a_sync_refresh_stays_typed() {
        let repo = FakeRepo {
            invert_status_locks: true,
            ..FakeRepo::default()
        };
        let (refresher, _repo, _rx) = setup(repo);

        let err = refresher
            .refresh(RefreshOptions::new([RefreshScope::Status]).sync())
            .unwrap_err();
        match err.downcast_ref::<GuiError>() {
            Some(GuiError::LockOrder { held, requested }) => {
                assert_eq!(held, &vec![Domain::Status]);
                assert_eq!(*requested, Domain::Branches);
            }
            other => panic!("expected a lock order violation, got {other:?}"),
        }
    }

    #[test]
    fn commits_refresh_collects_authors() {
        let repo = FakeRepo::default();
        *repo.commits.lock() = vec![
            ("c2".into(), "Ada".into()),
            ("c1".into(), "Grace".into()),
            ("c0".into(), "Ada".into()),
        ];
        let (refresher, _repo, _rx) = setup(repo);
        refresher
            .refresh(RefreshOptions::new([RefreshScope::Commits]).sync())
            .unwrap();

        let model = refresher.model();
        assert_eq!(model.commits_snapshot().len(), 3);
        assert_eq!(model.authors.lock().len(), 2);
    }

    #[test]
    fn sync_refresh_reports_errors_to_the_caller() {
        let mut repo = FakeRepo::default();
        repo.fail_branches = true;
        let (refresher, _repo, _rx) = setup(repo);
        let err = refresher
            .refresh(RefreshOptions::new([RefreshScope::Branches, RefreshScope::Status]).sync())
            .unwrap_err();
        assert!(err.to_string().contains("bad object"));
        assert_eq!(refresher.model().status_snapshot().repo_name, "repo");
    }

    #[test]
    fn randomized_concurrent_refreshes_never_deadlock() {
        let repo = FakeRepo::with_files(&["a", "b", "c"]);
        *repo.branches.lock() = vec!["main".into()];
        *repo.reflog.lock() = vec!["r1".into(), "r2".into()];
        *repo.commits.lock() = vec![("c1".into(), "Ada".into())];
        let (refresher, _repo, mut rx) = setup(repo);
        let mut state = TestState::default();

        let mut all: Vec<RefreshScope> = RefreshScope::DEFAULT.to_vec();
        all.push(RefreshScope::SubCommits);
        refresher.model().sub_commits.lock().ref_name = Some("main".into());

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let refresher = refresher.clone();
                let mut scopes = all.clone();
                thread::spawn(move || {
                    let mut rng = rand::rng();
                    for _ in 0..20 {
                        scopes.shuffle(&mut rng);
                        let take = 1 + (scopes.len() / 2);
                        refresher
                            .refresh(RefreshOptions::new(scopes[..take].to_vec()).sync())
                            .unwrap();
                        // Multi-domain readers interleave with the writers.
                        let model = refresher.model();
                        let _b = model.branches.lock();
                        let _s = model.status.lock();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(rx.settle(&mut state, WAIT));

        let model = refresher.model();
        assert_eq!(model.files_snapshot().len(), 3);
        assert_eq!(model.branch_names(), vec!["main"]);
        assert!(model.branches.lock().reflog_is_unfiltered());
        assert_eq!(model.sub_commits.lock().commits.len(), 1);
    }
}
