//! Busy indicators: per-item inline operations and the app-wide waiting status.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    thread,
    time::Duration,
};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::{
    context::ContextKey,
    model::HasUrn,
    operations::{ItemOperation, OperationRegistry},
    tasks::{Coordinator, Task, UiState},
};

/// UI state that can redraw a single context.
pub trait RenderContext: UiState {
    fn render_context(&mut self, key: ContextKey) -> anyhow::Result<()>;
}

pub struct InlineStatus<S> {
    registry: Arc<OperationRegistry>,
    coord: Coordinator<S>,
    /// Active inline operations per context. An entry exists while a ticker
    /// thread (or, without animation, an operation) is alive for it.
    tickers: Arc<Mutex<HashMap<ContextKey, usize>>>,
    tick: Duration,
    animate: bool,
}

impl<S> Clone for InlineStatus<S> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            coord: self.coord.clone(),
            tickers: self.tickers.clone(),
            tick: self.tick,
            animate: self.animate,
        }
    }
}

impl<S: RenderContext> InlineStatus<S> {
    /// `animate` is false in integration tests, where redraws must be deterministic.
    pub fn new(
        registry: Arc<OperationRegistry>,
        coord: Coordinator<S>,
        tick: Duration,
        animate: bool,
    ) -> Self {
        Self {
            registry,
            coord,
            tickers: Arc::new(Mutex::new(HashMap::new())),
            tick,
            animate,
        }
    }

    pub fn registry(&self) -> &Arc<OperationRegistry> {
        &self.registry
    }

    /// Run `f` on a worker with `operation` attached to `item`, redrawing
    /// `key` until it finishes. The operation is cleared however `f` ends.
    pub fn with_inline_status<F>(
        &self,
        item: &dyn HasUrn,
        operation: ItemOperation,
        key: ContextKey,
        f: F,
    ) -> CancellationToken
    where
        F: FnOnce(&Task) -> anyhow::Result<()> + Send + 'static,
    {
        let urn = item.urn();
        tracing::debug!(%urn, op = operation.label(), "inline operation started");
        self.registry.set(item, operation);
        self.start_ticker(key);
        self.coord.on_ui_thread(move |s| s.render_context(key));

        let guard = InlineGuard {
            urn,
            key,
            status: self.clone(),
        };
        self.coord.on_worker(move |task| {
            let _guard = guard;
            f(task)
        })
    }

    /// Contexts that currently have a live ticker.
    #[cfg(test)]
    pub fn active_tickers(&self) -> usize {
        self.tickers.lock().len()
    }

    fn start_ticker(&self, key: ContextKey) {
        let mut tickers = self.tickers.lock();
        if let Some(count) = tickers.get_mut(&key) {
            *count += 1;
            return;
        }
        tickers.insert(key, 1);
        drop(tickers);

        if !self.animate {
            return;
        }
        let this = self.clone();
        let spawned = thread::Builder::new()
            .name(format!("ticker-{:?}", key))
            .spawn(move || this.run_ticker(key));
        if let Err(e) = spawned {
            tracing::warn!("failed to start inline status ticker: {}", e);
            self.tickers.lock().remove(&key);
        }
    }

    fn run_ticker(&self, key: ContextKey) {
        loop {
            thread::sleep(self.tick);
            {
                let mut tickers = self.tickers.lock();
                let live = tickers.get(&key).is_some_and(|n| *n > 0);
                if !live || self.coord.is_shut_down() {
                    tickers.remove(&key);
                    return;
                }
            }
            self.coord.on_ui_thread(move |s| s.render_context(key));
        }
    }

    fn stop_ticker(&self, key: ContextKey) {
        let mut tickers = self.tickers.lock();
        let Some(count) = tickers.get_mut(&key) else {
            return;
        };
        *count = count.saturating_sub(1);
        // With animation the ticker removes its own entry.
        if *count == 0 && !self.animate {
            tickers.remove(&key);
        }
    }
}

struct InlineGuard<S: RenderContext> {
    urn: String,
    key: ContextKey,
    status: InlineStatus<S>,
}

impl<S: RenderContext> Drop for InlineGuard<S> {
    fn drop(&mut self) {
        self.status.registry.clear_urn(&self.urn);
        self.status.stop_ticker(self.key);
        let key = self.key;
        self.status
            .coord
            .on_ui_thread(move |s| s.render_context(key));
        tracing::debug!(urn = %self.urn, "inline operation finished");
    }
}

/// App-wide "waiting" messages shown in the status bar, newest last.
#[derive(Clone, Default)]
pub struct WaitingStatus {
    next_id: Arc<AtomicU64>,
    messages: Arc<Mutex<Vec<(u64, String)>>>,
}

impl WaitingStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// The message to show, if any.
    pub fn current(&self) -> Option<String> {
        self.messages.lock().last().map(|(_, m)| m.clone())
    }

    fn push(&self, message: &str) -> WaitingGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.messages.lock().push((id, message.to_string()));
        WaitingGuard {
            id,
            status: self.clone(),
        }
    }

    /// Show `message` while `f` runs on a worker.
    pub fn run<S, F>(&self, coord: &Coordinator<S>, message: &str, f: F) -> CancellationToken
    where
        S: UiState,
        F: FnOnce(&Task) -> anyhow::Result<()> + Send + 'static,
    {
        let guard = self.push(message);
        coord.on_worker(move |task| {
            let _guard = guard;
            f(task)
        })
    }

    /// Show `message` while `f` runs on the calling thread.
    pub fn run_sync<R>(&self, message: &str, f: impl FnOnce() -> R) -> R {
        let _guard = self.push(message);
        f()
    }
}

struct WaitingGuard {
    id: u64,
    status: WaitingStatus,
}

impl Drop for WaitingGuard {
    fn drop(&mut self) {
        self.status.messages.lock().retain(|(id, _)| *id != self.id);
    }
}
