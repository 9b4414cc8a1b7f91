//! Periodic files refresh and auto-fetch.

use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use tokio_util::sync::CancellationToken;

use crate::{
    config::{GuiConfig, GuiFlags},
    error::CommandError,
    git_commands::GitCommands,
    refresh::{RefreshOptions, RefreshScope, RefreshTarget, Refresher},
    tasks::{Coordinator, Task, UiState},
};

const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// What auto-fetch runs.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, cancel: &CancellationToken) -> Result<(), CommandError>;
}

impl Fetcher for GitCommands {
    fn fetch(&self, cancel: &CancellationToken) -> Result<(), CommandError> {
        GitCommands::fetch(self, cancel)
    }
}

pub struct BackgroundRoutines<S> {
    coord: Coordinator<S>,
    refresher: Refresher<S>,
    fetcher: Arc<dyn Fetcher>,
    refresh_interval: Option<Duration>,
    fetch_interval: Option<Duration>,
    enabled: bool,
}

impl<S: RefreshTarget> BackgroundRoutines<S> {
    pub fn new(
        coord: Coordinator<S>,
        refresher: Refresher<S>,
        fetcher: Arc<dyn Fetcher>,
        config: &GuiConfig,
        flags: GuiFlags,
    ) -> Self {
        Self {
            coord,
            refresher,
            fetcher,
            refresh_interval: config.refresh_interval(),
            fetch_interval: config.fetch_interval(),
            // Background work would make integration test timing nondeterministic.
            enabled: !flags.running_integration_test,
        }
    }

    #[cfg(test)]
    pub fn with_intervals(mut self, refresh: Option<Duration>, fetch: Option<Duration>) -> Self {
        self.refresh_interval = refresh;
        self.fetch_interval = fetch;
        self
    }

    /// Start the routines. Each returned token stops its routine; the
    /// coordinator's shutdown stops them all.
    pub fn start(&self) -> Vec<CancellationToken> {
        if !self.enabled {
            tracing::debug!("background routines disabled");
            return Vec::new();
        }
        let mut tokens = Vec::new();

        if let Some(interval) = self.refresh_interval {
            let refresher = self.refresher.clone();
            tokens.push(every(&self.coord, "files refresh", interval, move |_| {
                refresher.refresh(RefreshOptions::new([RefreshScope::Files]))
            }));
        }

        if let Some(interval) = self.fetch_interval {
            let refresher = self.refresher.clone();
            let fetcher = self.fetcher.clone();
            tokens.push(every(&self.coord, "auto-fetch", interval, move |task| {
                fetcher.fetch(task.cancel_token())?;
                refresher.refresh(RefreshOptions::new([
                    RefreshScope::Branches,
                    RefreshScope::Commits,
                    RefreshScope::Remotes,
                    RefreshScope::Status,
                ]))
            }));
        }
        tokens
    }
}

/// Run `f` every `interval` on one long-lived worker. The worker is paused
/// (not counted as busy) while it sleeps.
fn every<S, F>(
    coord: &Coordinator<S>,
    name: &'static str,
    interval: Duration,
    f: F,
) -> CancellationToken
where
    S: UiState,
    F: Fn(&Task) -> anyhow::Result<()> + Send + 'static,
{
    tracing::debug!(routine = name, ?interval, "starting background routine");
    coord.on_worker(move |task| {
        loop {
            task.pause();
            let woke = sleep_unless_cancelled(task, interval);
            task.resume();
            if !woke {
                tracing::debug!(routine = name, "background routine stopped");
                return Ok(());
            }
            if let Err(e) = f(task) {
                if task.is_cancelled() {
                    return Ok(());
                }
                tracing::warn!(routine = name, "background routine failed: {:#}", e);
            }
        }
    })
}

/// False if cancelled before `duration` passed.
fn sleep_unless_cancelled(task: &Task, duration: Duration) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if task.is_cancelled() {
            return false;
        }
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            return true;
        }
        thread::sleep(left.min(SLEEP_SLICE));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        context::ContextKey,
        error::ErrorOrigin,
        model::Model,
        refresh::{RefreshLimits, tests::FakeRepo},
        tasks::UiReceiver,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingFetcher {
        calls: AtomicUsize,
    }

    impl Fetcher for CountingFetcher {
        fn fetch(&self, _cancel: &CancellationToken) -> Result<(), CommandError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct TestState {
        errors: Vec<String>,
    }

    impl UiState for TestState {
        fn handle_error(&mut self, err: anyhow::Error, _origin: ErrorOrigin) {
            self.errors.push(err.to_string());
        }
    }

    impl RefreshTarget for TestState {
        fn post_refresh_update(&mut self, _key: ContextKey) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn routines(
        flags: GuiFlags,
    ) -> (
        BackgroundRoutines<TestState>,
        Arc<CountingFetcher>,
        Arc<Model>,
        UiReceiver<TestState>,
    ) {
        let (coord, rx) = Coordinator::<TestState>::new();
        let model = Arc::new(Model::new());
        let refresher = Refresher::new(
            model.clone(),
            Arc::new(FakeRepo::with_files(&["watched.txt"])),
            coord.clone(),
            RefreshLimits::default(),
        );
        let fetcher = Arc::new(CountingFetcher::default());
        let routines = BackgroundRoutines::new(
            coord,
            refresher,
            fetcher.clone(),
            &GuiConfig::default(),
            flags,
        )
        .with_intervals(Some(Duration::from_millis(10)), Some(Duration::from_millis(10)));
        (routines, fetcher, model, rx)
    }

    #[test]
    fn routines_run_until_cancelled() {
        let (routines, fetcher, model, mut rx) = routines(GuiFlags::default());
        let mut state = TestState::default();
        let tokens = routines.start();
        assert_eq!(tokens.len(), 2);

        let deadline = Instant::now() + Duration::from_secs(10);
        while fetcher.calls.load(Ordering::SeqCst) < 2 || model.files_snapshot().is_empty() {
            assert!(Instant::now() < deadline, "routines never ran");
            rx.drain(&mut state);
            thread::sleep(Duration::from_millis(5));
        }

        for token in &tokens {
            token.cancel();
        }
        assert!(rx.settle(&mut state, Duration::from_secs(10)));
        assert!(state.errors.is_empty());
    }

    #[test]
    fn disabled_in_integration_tests() {
        let flags = GuiFlags {
            running_integration_test: true,
            in_demo: false,
        };
        let (routines, fetcher, _model, _rx) = routines(flags);
        assert!(routines.start().is_empty());
        thread::sleep(Duration::from_millis(30));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn sleeping_routines_do_not_count_as_busy() {
        let (coord, _rx) = Coordinator::<TestState>::new();
        let token = every(&coord, "idle", Duration::from_secs(60), |_| Ok(()));
        let deadline = Instant::now() + Duration::from_secs(10);
        while !coord.busy().is_idle() {
            assert!(Instant::now() < deadline);
            thread::sleep(Duration::from_millis(1));
        }
        token.cancel();
    }
}
