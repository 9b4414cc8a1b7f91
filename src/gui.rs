//! The UI-thread state and the glue between the core components.
//!
//! [`Gui`] is only ever touched by whoever drains its [`UiReceiver`]. Workers
//! reach it through closures queued with [`Coordinator::on_ui_thread`], and
//! controllers get the narrow handles they need (popups, refresher, inline
//! status) rather than the whole thing where they can.

use std::{
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

use tokio_util::sync::CancellationToken;

use crate::{
    background::{BackgroundRoutines, Fetcher},
    command_log::CommandLog,
    config::{AppStateStore, GuiConfig, GuiFlags},
    context::{ContextKey, ContextKind, ContextMgr, MainViewPairs},
    error::{ErrorOrigin, GuiError, Presentation, presentation_for},
    git_commands::GitCommands,
    inline_status::{InlineStatus, RenderContext, WaitingStatus},
    locks::ProcessLocks,
    model::Model,
    operations::OperationRegistry,
    popup::Popups,
    presentation::context_lines,
    refresh::{RefreshLimits, RefreshOptions, RefreshScope, RefreshTarget, Refresher},
    repo::RepoLoader,
    screen::{ScreenMode, StartupStage},
    subprocess::{Subprocesses, TerminalSuspender, run_subprocess_and_refresh},
    tasks::{Coordinator, Task, UiReceiver, UiState},
    view_buffer::{CommandSpec, FlushPolicy, HasViews, UpdateTask, ViewBufferManager},
    views::Views,
};

/// Everything [`Gui::new`] needs from outside.
pub struct GuiDeps {
    pub config: GuiConfig,
    pub flags: GuiFlags,
    pub repo_root: PathBuf,
    pub loader: Arc<dyn RepoLoader>,
    pub app_state: AppStateStore,
    pub suspender: Arc<dyn TerminalSuspender>,
}

/// What to show in the main view pair. Without a secondary task the
/// secondary view is hidden.
pub struct RenderToMainOpts {
    pub title: String,
    pub main: UpdateTask,
    pub secondary: Option<UpdateTask>,
}

pub struct Gui {
    coord: Coordinator<Gui>,
    config: GuiConfig,
    flags: GuiFlags,
    model: Arc<Model>,
    refresher: Refresher<Gui>,
    contexts: ContextMgr,
    views: Views,
    popups: Popups<Gui>,
    inline: InlineStatus<Gui>,
    waiting: WaitingStatus,
    main_views: MainViewPairs,
    main: ViewBufferManager<Gui>,
    secondary: ViewBufferManager<Gui>,
    git: GitCommands,
    log: CommandLog,
    app_state: AppStateStore,
    subprocesses: Subprocesses,
    screen_mode: ScreenMode,
    startup: StartupStage,
    started: Instant,
    background: Vec<CancellationToken>,
    quit: bool,
}

impl Gui {
    /// Build the state on the calling thread, which becomes the UI thread.
    pub fn new(deps: GuiDeps) -> (Self, UiReceiver<Self>) {
        let GuiDeps {
            config,
            flags,
            repo_root,
            loader,
            app_state,
            suspender,
        } = deps;
        let (coord, rx) = Coordinator::<Gui>::new();

        let model = Arc::new(Model::new());
        let log = CommandLog::new(config.command_log_size);
        let refresher = Refresher::new(
            model.clone(),
            loader,
            coord.clone(),
            RefreshLimits {
                commits: config.commit_limit,
                reflog: config.reflog_limit,
            },
        );
        let locks = Arc::new(ProcessLocks::new());
        let flush = FlushPolicy {
            lines: config.main_view_flush_lines,
            interval: config.flush_interval(),
        };
        let main_views = MainViewPairs::default();
        let main = ViewBufferManager::new(main_views.normal.main, coord.clone(), flush, locks.clone());
        let secondary = ViewBufferManager::new(
            main_views.normal.secondary,
            coord.clone(),
            flush,
            locks.clone(),
        );
        let inline = InlineStatus::new(
            Arc::new(OperationRegistry::new()),
            coord.clone(),
            config.spinner_rate(),
            !flags.running_integration_test,
        );
        let mut views = Views::new(coord.ui_thread());
        views.set_visible(main_views.normal.secondary, false);

        let gui = Gui {
            popups: Popups::new(coord.clone(), config.toast_ttl()),
            git: GitCommands::new(repo_root, log.clone()),
            subprocesses: Subprocesses::new(locks, suspender, log.clone()),
            screen_mode: app_state.get().last_screen_mode,
            coord,
            config,
            flags,
            model,
            refresher,
            contexts: ContextMgr::new(),
            views,
            inline,
            waiting: WaitingStatus::new(),
            main_views,
            main,
            secondary,
            log,
            app_state,
            startup: StartupStage::Initial,
            started: Instant::now(),
            background: Vec::new(),
            quit: false,
        };
        (gui, rx)
    }

    /// First load. The scopes the first screen needs are loaded before this
    /// returns; the rest load in the background and finish startup.
    pub fn start(&mut self) -> anyhow::Result<()> {
        let root = self.git.repo_root().display().to_string();
        self.app_state.get_mut().push_recent_repo(&root);
        self.save_app_state_and_log_error();

        let refresher = self.refresher.clone();
        self.with_waiting_status_sync("Loading", || {
            refresher.refresh(
                RefreshOptions::new([
                    RefreshScope::Files,
                    RefreshScope::Branches,
                    RefreshScope::Status,
                ])
                .sync(),
            )
        })?;

        self.refresher.refresh(
            RefreshOptions::new([
                RefreshScope::Submodules,
                RefreshScope::Reflog,
                RefreshScope::Tags,
                RefreshScope::Remotes,
                RefreshScope::Worktrees,
                RefreshScope::Commits,
                RefreshScope::Stash,
            ])
            .then(|gui: &mut Gui| {
                gui.finish_startup();
                Ok(())
            }),
        )
    }

    fn finish_startup(&mut self) {
        self.startup.advance(StartupStage::Complete);
        let fetcher: Arc<dyn Fetcher> = Arc::new(self.git.clone());
        self.background = BackgroundRoutines::new(
            self.coord.clone(),
            self.refresher.clone(),
            fetcher,
            &self.config,
            self.flags,
        )
        .start();
        tracing::info!(elapsed = ?self.started.elapsed(), "startup complete");
        self.refresh_main_view();
        self.views.render();
    }

    pub fn coord(&self) -> &Coordinator<Gui> {
        &self.coord
    }

    pub fn config(&self) -> &GuiConfig {
        &self.config
    }

    pub fn flags(&self) -> GuiFlags {
        self.flags
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    pub fn refresher(&self) -> &Refresher<Gui> {
        &self.refresher
    }

    pub fn popups(&self) -> &Popups<Gui> {
        &self.popups
    }

    pub fn inline(&self) -> &InlineStatus<Gui> {
        &self.inline
    }

    pub fn registry(&self) -> &Arc<OperationRegistry> {
        self.inline.registry()
    }

    pub fn waiting(&self) -> &WaitingStatus {
        &self.waiting
    }

    pub fn git(&self) -> &GitCommands {
        &self.git
    }

    pub fn log(&self) -> &CommandLog {
        &self.log
    }

    pub fn contexts(&self) -> &ContextMgr {
        &self.contexts
    }

    pub fn views(&self) -> &Views {
        &self.views
    }

    pub fn app_state(&self) -> &AppStateStore {
        &self.app_state
    }

    pub fn app_state_mut(&mut self) -> &mut AppStateStore {
        &mut self.app_state
    }

    pub fn screen_mode(&self) -> ScreenMode {
        self.screen_mode
    }

    #[cfg(test)]
    pub fn startup_stage(&self) -> StartupStage {
        self.startup
    }

    pub fn main_views(&self) -> MainViewPairs {
        self.main_views
    }

    pub fn should_quit(&self) -> bool {
        self.quit
    }

    pub fn request_quit(&mut self) {
        self.quit = true;
    }

    /// Current spinner frame. Frozen on the first frame in integration tests.
    pub fn spinner(&self) -> String {
        let tick = if self.flags.running_integration_test {
            0
        } else {
            let rate = self.config.spinner_rate().as_millis().max(1);
            (self.started.elapsed().as_millis() / rate) as usize
        };
        self.config.spinner_frame(tick).to_string()
    }

    /// Run `f` on a worker with `message` in the status bar.
    pub fn with_waiting_status<F>(&self, message: &str, f: F) -> CancellationToken
    where
        F: FnOnce(&Task) -> anyhow::Result<()> + Send + 'static,
    {
        let coord = self.coord.clone();
        self.waiting.run(&self.coord, message, move |task| {
            let result = f(task);
            coord.on_ui_thread(|gui| {
                gui.views.render();
                Ok(())
            });
            result
        })
    }

    /// Run `f` on the UI thread with `message` in the status bar.
    pub fn with_waiting_status_sync<R>(&self, message: &str, f: impl FnOnce() -> R) -> R {
        self.waiting.run_sync(message, f)
    }

    /// Saving app state is never fatal; a failure is logged and toasted.
    pub fn save_app_state_and_log_error(&mut self) {
        if let Err(e) = self.app_state.save() {
            tracing::warn!("{}", e);
            self.popups.error_toast(e.to_string());
        }
    }

    pub fn set_screen_mode(&mut self, mode: ScreenMode) {
        self.screen_mode = mode;
        self.app_state.get_mut().last_screen_mode = mode;
        self.save_app_state_and_log_error();
        self.views.render();
        self.rerun_main_view_after_layout();
    }

    pub fn toggle_command_log(&mut self) {
        let state = self.app_state.get_mut();
        state.hide_command_log = !state.hide_command_log;
        self.save_app_state_and_log_error();
        self.views.render();
        self.rerun_main_view_after_layout();
    }

    /// Main view output is laid out for the size it started at. Rerun it once
    /// the next draw has recorded the new size.
    fn rerun_main_view_after_layout(&self) {
        self.coord.after_layout(|gui: &mut Gui| {
            gui.refresh_main_view();
            Ok(())
        });
    }

    pub fn command_log_visible(&self) -> bool {
        !self.app_state.get().hide_command_log
    }

    /// Focus a side context and show its selection in the main views.
    pub fn push_context(&mut self, key: ContextKey) -> anyhow::Result<()> {
        self.contexts.push(key);
        self.render_context(key)?;
        if key.kind() == ContextKind::Side {
            self.refresh_main_view();
        }
        Ok(())
    }

    pub fn next_tab(&mut self) -> anyhow::Result<()> {
        self.contexts.next_tab();
        let key = self.contexts.current_side();
        self.push_context(key)
    }

    pub fn move_selection(&mut self, delta: isize) -> anyhow::Result<()> {
        let key = self.contexts.current_side();
        self.contexts.move_selection(key, delta);
        self.views.set_cursor(key, self.contexts.selected(key));
        self.refresh_main_view();
        self.views.render();
        Ok(())
    }

    /// Keep the popup contexts on the stack in line with what is showing.
    pub fn sync_popup_context(&mut self) {
        let showing = self.popups.current_key();
        for key in [
            ContextKey::Confirmation,
            ContextKey::Prompt,
            ContextKey::Suggestions,
            ContextKey::Menu,
        ] {
            if Some(key) != showing {
                self.contexts.remove(key);
            }
        }
        if let Some(key) = showing
            && self.contexts.current() != key
        {
            self.contexts.push(key);
        }
        self.views.render();
    }

    /// Hand each main-view slot its new content, superseding whatever it
    /// was showing.
    pub fn render_to_main_views(&mut self, opts: RenderToMainOpts) {
        let pair = self.main_views.normal;
        self.views.set_title(pair.main, opts.title);
        self.main.new_task(opts.main);
        match opts.secondary {
            Some(task) => {
                self.views.set_visible(pair.secondary, true);
                self.secondary.new_task(task);
            }
            None => {
                self.secondary.stop();
                self.views.set_visible(pair.secondary, false);
            }
        }
    }

    pub fn set_main_view_size(&self, rows: u16, cols: u16) {
        self.main.set_pty_size(rows, cols);
        self.secondary.set_pty_size(rows, cols);
    }

    /// Show the current side context's selection in the main views.
    pub fn refresh_main_view(&mut self) {
        let opts = self.main_view_for_selection();
        self.render_to_main_views(opts);
    }

    fn git_task<I, A>(&self, args: I) -> UpdateTask
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        let spec = CommandSpec::git(self.git.repo_root().to_path_buf(), args);
        if self.config.main_view_use_pty {
            UpdateTask::RunPty(spec)
        } else {
            UpdateTask::RunCommand(spec)
        }
    }

    fn main_view_for_selection(&self) -> RenderToMainOpts {
        let side = self.contexts.current_side();
        let selected = self.contexts.selected(side);
        let text = |title: &str, body: String| RenderToMainOpts {
            title: title.to_string(),
            main: UpdateTask::Text(body),
            secondary: None,
        };
        let task = |title: &str, main: UpdateTask| RenderToMainOpts {
            title: title.to_string(),
            main,
            secondary: None,
        };

        match side {
            ContextKey::Files => {
                let Some(file) = self.model.files_snapshot().into_iter().nth(selected) else {
                    return text("Diff", "No changed files".to_string());
                };
                if !file.tracked {
                    return text("Diff", format!("{} is untracked", file.path));
                }
                let unstaged = self.git_task(["diff", "--color=never", "--", file.path.as_str()]);
                let staged = self.git_task([
                    "diff",
                    "--color=never",
                    "--cached",
                    "--",
                    file.path.as_str(),
                ]);
                match (file.has_unstaged_changes, file.has_staged_changes) {
                    (true, true) => RenderToMainOpts {
                        title: "Unstaged changes".to_string(),
                        main: unstaged,
                        secondary: Some(staged),
                    },
                    (false, true) => task("Staged changes", staged),
                    _ => task("Unstaged changes", unstaged),
                }
            }
            ContextKey::LocalBranches => match self.model.branches_snapshot().get(selected) {
                Some(branch) => task(
                    "Log",
                    self.git_task([
                        "log",
                        "--graph",
                        "--oneline",
                        "--decorate",
                        "--color=never",
                        "-100",
                        branch.name.as_str(),
                    ]),
                ),
                None => text("Log", "No branches".to_string()),
            },
            ContextKey::LocalCommits | ContextKey::ReflogCommits | ContextKey::SubCommits => {
                let commits = match side {
                    ContextKey::LocalCommits => self.model.commits_snapshot(),
                    ContextKey::ReflogCommits => self.model.reflog_snapshot().1.to_vec(),
                    _ => self.model.sub_commits.lock().commits.clone(),
                };
                match commits.get(selected) {
                    Some(c) => task(
                        "Patch",
                        self.git_task(["show", "--stat", "-p", "--color=never", &*c.hash]),
                    ),
                    None => text("Patch", "No commits".to_string()),
                }
            }
            ContextKey::Stash => {
                let entry = self.model.local_commits.lock().stash_entries.get(selected).cloned();
                match entry {
                    Some(s) => {
                        let name = s.ref_name();
                        task(
                            "Stash",
                            self.git_task(["stash", "show", "-p", "--color=never", name.as_str()]),
                        )
                    }
                    None => text("Stash", "No stash entries".to_string()),
                }
            }
            ContextKey::Tags => {
                let tag = self.model.branches.lock().tags.get(selected).cloned();
                match tag {
                    Some(t) => task("Tag", self.git_task(["show", "--color=never", t.name.as_str()])),
                    None => text("Tag", "No tags".to_string()),
                }
            }
            ContextKey::Remotes => {
                let remote = self.model.branches.lock().remotes.get(selected).cloned();
                match remote {
                    Some(r) => {
                        let mut body = format!("{}\n", r.name);
                        for url in &r.urls {
                            body.push_str(&format!("  {}\n", url));
                        }
                        for b in &r.branches {
                            body.push_str(&format!("  {}\n", b.full_name()));
                        }
                        text("Remote", body)
                    }
                    None => text("Remote", "No remotes".to_string()),
                }
            }
            ContextKey::Worktrees => {
                let worktree = self.model.branches.lock().worktrees.get(selected).cloned();
                match worktree {
                    Some(w) => text(
                        "Worktree",
                        format!("{}\nHEAD {}", w.path, w.head),
                    ),
                    None => text("Worktree", "No worktrees".to_string()),
                }
            }
            ContextKey::Submodules => {
                let submodule = self.model.files.lock().submodules.get(selected).cloned();
                match submodule {
                    Some(s) => text("Submodule", format!("{}\n{}\n{}", s.name, s.path, s.url)),
                    None => text("Submodule", "No submodules".to_string()),
                }
            }
            _ => {
                let status = self.model.status_snapshot();
                text(
                    "Status",
                    format!(
                        "lzgui {}\n\nRepository: {}\nBranch: {}",
                        env!("CARGO_PKG_VERSION"),
                        status.repo_name,
                        status.branch
                    ),
                )
            }
        }
    }

    /// Run an interactive command with the terminal handed over, then refresh.
    /// Blocks the UI thread until the command exits.
    pub fn run_subprocess(&mut self, spec: &CommandSpec) -> anyhow::Result<()> {
        let result = run_subprocess_and_refresh(&self.subprocesses, &self.refresher, spec);
        self.views.render();
        result
    }

    /// Stop every worker and background routine.
    pub fn shutdown(&mut self) {
        for token in self.background.drain(..) {
            token.cancel();
        }
        self.main.stop();
        self.secondary.stop();
        self.coord.shutdown();
        tracing::info!("shut down");
    }

    /// Lines of the command log, oldest first.
    pub fn command_log_lines(&self) -> Vec<String> {
        self.log.lines()
    }

    pub fn toast_lines(&self) -> Vec<(String, bool)> {
        self.popups
            .toasts()
            .active(Instant::now())
            .into_iter()
            .map(|t| (t.message, t.kind == crate::popup::ToastKind::Error))
            .collect()
    }

    /// Time until the next spinner frame is due.
    pub fn spinner_interval(&self) -> Duration {
        self.config.spinner_rate()
    }
}

impl UiState for Gui {
    fn handle_error(&mut self, err: anyhow::Error, origin: ErrorOrigin) {
        if let Some(GuiError::LockOrder { .. }) = err.downcast_ref::<GuiError>() {
            tracing::error!("{:#}", err);
            panic!("{:#}", err);
        }
        let message = err.to_string();
        match presentation_for(&err, origin) {
            Presentation::Silent => tracing::debug!(?origin, "ignoring: {:#}", err),
            Presentation::Inline => {
                tracing::debug!(?origin, "{:#}", err);
                if !self.popups.set_inline_error(&message) {
                    self.popups.error_toast(message);
                }
            }
            Presentation::Toast => {
                tracing::warn!(?origin, "{:#}", err);
                self.popups.error_toast(message);
            }
            Presentation::Popup => {
                tracing::warn!(?origin, "{:#}", err);
                if self.popups.is_showing() {
                    self.popups.error_toast(message);
                } else if let Err(e) = self.popups.error_popup(&message) {
                    tracing::debug!("error popup rejected: {}", e);
                    self.popups.error_toast(message);
                }
            }
        }
        self.sync_popup_context();
    }

    fn after_message(&mut self) {
        self.sync_popup_context();
    }
}

impl RefreshTarget for Gui {
    fn post_refresh_update(&mut self, key: ContextKey) -> anyhow::Result<()> {
        self.render_context(key)?;
        if key == self.contexts.current_side() {
            self.refresh_main_view();
        }
        Ok(())
    }
}

impl RenderContext for Gui {
    fn render_context(&mut self, key: ContextKey) -> anyhow::Result<()> {
        let spinner = self.spinner();
        if let Some(lines) = context_lines(&self.model, key, self.inline.registry(), &spinner) {
            self.contexts.set_len(key, lines.len());
            let selected = self.contexts.selected(key);
            self.views.set_view_content(key, lines);
            self.views.set_cursor(key, selected);
        }
        self.views.render();
        Ok(())
    }
}

impl HasViews for Gui {
    fn views_mut(&mut self) -> &mut Views {
        &mut self.views
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        error::CommandError,
        model::Branch,
        operations::ItemOperation,
        popup::{ConfirmOpts, PromptOpts, Resolution},
        refresh::tests::FakeRepo,
    };
    use std::{io, thread};
    use tempfile::TempDir;

    pub(crate) const WAIT: Duration = Duration::from_secs(10);

    pub(crate) struct NoopSuspender;

    impl TerminalSuspender for NoopSuspender {
        fn suspend(&self) -> io::Result<()> {
            Ok(())
        }

        fn resume(&self) -> io::Result<()> {
            Ok(())
        }
    }

    pub(crate) struct Harness {
        pub gui: Gui,
        pub rx: UiReceiver<Gui>,
        pub dir: TempDir,
    }

    impl Harness {
        pub(crate) fn settle(&mut self) {
            assert!(self.rx.settle(&mut self.gui, WAIT), "UI never went idle");
        }

        pub(crate) fn error_toasts(&self) -> Vec<String> {
            self.gui
                .toast_lines()
                .into_iter()
                .filter(|(_, is_error)| *is_error)
                .map(|(m, _)| m)
                .collect()
        }
    }

    pub(crate) fn harness(repo: FakeRepo) -> Harness {
        let dir = TempDir::new().unwrap();
        let config = GuiConfig {
            toast_ttl_ms: 60_000,
            ..GuiConfig::default()
        };
        let (gui, rx) = Gui::new(GuiDeps {
            config,
            flags: GuiFlags {
                running_integration_test: true,
                in_demo: false,
            },
            repo_root: dir.path().to_path_buf(),
            loader: Arc::new(repo),
            app_state: AppStateStore::in_memory(),
            suspender: Arc::new(NoopSuspender),
        });
        Harness { gui, rx, dir }
    }

    fn started(repo: FakeRepo) -> Harness {
        let mut h = harness(repo);
        h.gui.start().unwrap();
        h.settle();
        h
    }

    #[test]
    fn startup_loads_the_first_screen_synchronously() {
        let mut repo = FakeRepo::with_files(&["a.go", "b.go"]);
        *repo.branches.get_mut() = vec!["main".into()];
        *repo.reflog.get_mut() = vec!["r1".into(), "r2".into()];
        let mut h = harness(repo);

        h.gui.start().unwrap();
        assert_eq!(h.gui.model().files_snapshot().len(), 2);
        assert_eq!(h.gui.model().branch_names(), vec!["main"]);
        assert_eq!(h.gui.startup_stage(), StartupStage::Initial);

        h.settle();
        assert_eq!(h.gui.startup_stage(), StartupStage::Complete);
        assert_eq!(h.gui.model().reflog_snapshot().0.len(), 2);
        assert_eq!(
            h.gui.views().get(ContextKey::Files).lines,
            vec![" M a.go", " M b.go"]
        );
        assert_eq!(h.gui.contexts().for_key(ContextKey::Files).len, 2);
        // Background routines stay off in integration tests.
        assert!(h.gui.background.is_empty());
    }

    #[test]
    fn failed_startup_load_is_returned() {
        let mut repo = FakeRepo::with_files(&[]);
        repo.fail_branches = true;
        let mut h = harness(repo);
        let err = h.gui.start().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CommandError>(),
            Some(CommandError::Failed { code: Some(128), .. })
        ));
    }

    #[test]
    fn worker_errors_become_toasts() {
        let mut h = started(FakeRepo::with_files(&[]));
        h.gui
            .coord()
            .on_worker(|_| Err(anyhow::anyhow!("remote hung up")));
        h.settle();
        assert_eq!(h.error_toasts(), vec!["remote hung up"]);
        assert!(!h.gui.popups().is_showing());
    }

    #[test]
    fn show_in_panel_errors_become_popups_even_from_workers() {
        let mut h = started(FakeRepo::with_files(&[]));
        h.gui
            .coord()
            .on_worker(|_| Err(GuiError::ShowInPanel("merge conflicts".into()).into()));
        h.settle();
        let view = h.gui.popups().view().unwrap();
        assert_eq!(view.title, "Error");
        assert_eq!(view.prompt.as_deref(), Some("merge conflicts"));
        assert_eq!(h.gui.contexts().current(), ContextKey::Confirmation);
    }

    #[test]
    fn ui_errors_pop_up_unless_a_popup_is_already_showing() {
        let mut h = started(FakeRepo::with_files(&[]));
        h.gui
            .coord()
            .on_ui_thread(|_| Err(anyhow::anyhow!("first")));
        h.settle();
        assert!(h.gui.popups().is_showing());

        h.gui
            .coord()
            .on_ui_thread(|_| Err(anyhow::anyhow!("second")));
        h.settle();
        assert_eq!(h.error_toasts(), vec!["second"]);

        h.gui.popups().resolve(Resolution::Close).unwrap();
        h.gui.sync_popup_context();
        assert_eq!(h.gui.contexts().current(), ContextKey::Files);
    }

    #[test]
    fn cancellation_is_not_presented() {
        let mut h = started(FakeRepo::with_files(&[]));
        h.gui.coord().on_worker(|_| Err(GuiError::Cancelled.into()));
        h.settle();
        assert!(h.gui.toast_lines().is_empty());
        assert!(!h.gui.popups().is_showing());
    }

    #[test]
    fn failed_push_clears_the_operation_and_leaves_the_model_alone() {
        let mut repo = FakeRepo::with_files(&["a.go"]);
        *repo.branches.get_mut() = vec!["main".into()];
        let mut h = started(repo);
        let before = h.gui.model().branches_snapshot();
        let main = Branch {
            name: "main".into(),
            is_head: true,
            upstream: None,
            ahead: None,
            behind: None,
            upstream_gone: false,
        };

        h.gui.inline().with_inline_status(
            &main,
            ItemOperation::Pushing,
            ContextKey::LocalBranches,
            |_| {
                thread::sleep(Duration::from_millis(50));
                Err(anyhow::anyhow!("push rejected"))
            },
        );
        assert_eq!(h.gui.registry().get(&main), ItemOperation::Pushing);
        h.rx.drain(&mut h.gui);
        assert!(
            h.gui.views().get(ContextKey::LocalBranches).lines[0].contains("Pushing"),
            "busy indicator is drawn while the push runs"
        );

        h.settle();
        assert!(h.gui.registry().is_empty());
        assert_eq!(h.error_toasts(), vec!["push rejected"]);
        assert_eq!(h.gui.model().branches_snapshot(), before);
        assert_eq!(h.gui.views().get(ContextKey::LocalBranches).lines, vec!["* main"]);
    }

    #[test]
    fn newer_main_view_content_supersedes_older() {
        let mut h = started(FakeRepo::with_files(&[]));
        h.gui.render_to_main_views(RenderToMainOpts {
            title: "Diff".into(),
            main: UpdateTask::Text("old".into()),
            secondary: Some(UpdateTask::Text("staged".into())),
        });
        h.gui.render_to_main_views(RenderToMainOpts {
            title: "Diff".into(),
            main: UpdateTask::Text("new".into()),
            secondary: None,
        });
        h.settle();
        let pair = h.gui.main_views().normal;
        assert_eq!(h.gui.views().get(pair.main).lines, vec!["new"]);
        assert!(!h.gui.views().get(pair.secondary).visible);
    }

    #[test]
    fn save_failures_are_toasted_not_fatal() {
        let mut h = harness(FakeRepo::with_files(&[]));
        let blocker = h.dir.path().join("blocked");
        std::fs::write(&blocker, "").unwrap();
        *h.gui.app_state_mut() = AppStateStore::load(Some(&blocker.join("lzgui")));

        h.gui.set_screen_mode(ScreenMode::Half);
        assert_eq!(h.gui.screen_mode(), ScreenMode::Half);
        assert_eq!(h.error_toasts().len(), 1);
        assert!(h.error_toasts()[0].starts_with("failed to save app state"));
    }

    #[test]
    fn confirm_handlers_run_on_the_ui_thread_and_can_queue_work() {
        let mut h = started(FakeRepo::with_files(&["a.go"]));
        let coord = h.gui.coord().clone();
        h.gui
            .popups()
            .confirm(ConfirmOpts::new("Quit", "Really?", move || {
                coord.on_ui_thread(|gui: &mut Gui| {
                    gui.request_quit();
                    Ok(())
                });
                Ok(())
            }))
            .unwrap();
        h.gui.sync_popup_context();
        assert_eq!(h.gui.contexts().current(), ContextKey::Confirmation);

        h.gui.popups().resolve(Resolution::Confirm).unwrap();
        h.settle();
        assert!(h.gui.should_quit());
        assert_eq!(h.gui.contexts().current(), ContextKey::Files);
    }

    #[test]
    #[should_panic(expected = "lock order violation")]
    fn lock_order_violation_in_a_worker_is_fatal() {
        let mut h = started(FakeRepo::with_files(&["a.go"]));
        let model = h.gui.model().clone();
        h.gui.coord().on_worker(move |_| {
            let _status = model.status.lock();
            let _branches = model.branches.lock();
            Ok(())
        });
        h.settle();
    }

    #[test]
    fn popup_shown_from_a_worker_takes_focus_and_redraws() {
        let mut h = started(FakeRepo::with_files(&["a.go"]));
        h.gui.views_mut().take_needs_draw();

        let popups = h.gui.popups().clone();
        h.gui
            .coord()
            .on_worker(move |_| popups.alert("Fetched", "origin is up to date"));
        h.settle();

        assert_eq!(h.gui.contexts().current(), ContextKey::Confirmation);
        assert!(h.gui.views_mut().take_needs_draw());
    }

    #[test]
    fn input_errors_escaping_a_handler_stay_in_the_prompt() {
        let mut h = started(FakeRepo::with_files(&["a.go"]));
        h.gui
            .popups()
            .prompt(PromptOpts::new("Rename branch", |_| Ok(())))
            .unwrap();

        h.gui.handle_error(
            GuiError::UserInput("A branch named 'main' already exists".into()).into(),
            ErrorOrigin::UiThread,
        );
        let view = h.gui.popups().view().unwrap();
        assert_eq!(
            view.error.as_deref(),
            Some("A branch named 'main' already exists")
        );
        assert!(h.error_toasts().is_empty());

        h.gui.popups().resolve(Resolution::Close).unwrap();
        h.gui.handle_error(
            GuiError::UserInput("Nothing to rename".into()).into(),
            ErrorOrigin::UiThread,
        );
        assert_eq!(h.error_toasts(), vec!["Nothing to rename"]);
    }

    #[test]
    fn layout_changes_rerun_the_main_view_after_the_next_draw() {
        let mut h = started(FakeRepo::with_files(&["a.go"]));
        let before = h.gui.main.generation();

        h.gui.set_screen_mode(ScreenMode::Half);
        h.gui.toggle_command_log();
        assert_eq!(h.gui.main.generation(), before);

        h.rx.run_after_layout(&mut h.gui);
        assert_eq!(h.gui.main.generation(), before + 2);
        h.rx.run_after_layout(&mut h.gui);
        assert_eq!(h.gui.main.generation(), before + 2);
        h.settle();
    }

    #[test]
    fn waiting_status_is_cleared_and_redraws() {
        let mut h = started(FakeRepo::with_files(&[]));
        let (tx, rx) = std::sync::mpsc::channel::<()>();
        h.gui.with_waiting_status("Fetching", move |_| {
            let _ = rx.recv_timeout(WAIT);
            Ok(())
        });
        assert_eq!(h.gui.waiting().current().as_deref(), Some("Fetching"));
        tx.send(()).unwrap();
        h.settle();
        assert_eq!(h.gui.waiting().current(), None);
    }
}
