//! UI-thread / worker coordination.
//!
//! There is exactly one logical UI thread: whoever owns the [`UiReceiver`] and
//! feeds its messages to [`UiReceiver::process`]. Everything else runs on
//! workers and talks to the UI thread by queueing closures with
//! [`Coordinator::on_ui_thread`]. The queue is FIFO, so closures queued from one
//! thread run in the order they were queued.

use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, ThreadId},
    time::{Duration, Instant},
};

use anyhow::anyhow;
use parking_lot::{Condvar, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{ErrorOrigin, GuiError};

/// State owned by the UI thread.
pub trait UiState: 'static {
    /// Topmost error entry point. Decides how `err` is presented.
    fn handle_error(&mut self, err: anyhow::Error, origin: ErrorOrigin);

    /// Called after every processed message, so state derived from what the
    /// message changed (focused popup context, redraw flag) catches up.
    fn after_message(&mut self) {}
}

const SETTLE_POLL: Duration = Duration::from_millis(1);

pub type UiTask<S> = Box<dyn FnOnce(&mut S) -> anyhow::Result<()> + Send>;

pub enum UiMessage<S> {
    Run(UiTask<S>),
    /// A worker returned an error (or panicked).
    WorkerError(anyhow::Error),
}

/// Counts outstanding work: live workers plus queued UI messages.
#[derive(Clone, Default)]
pub struct BusyTracker {
    inner: Arc<(Mutex<usize>, Condvar)>,
}

impl BusyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self) {
        *self.inner.0.lock() += 1;
    }

    pub fn decrement(&self) {
        let (count, idle) = &*self.inner;
        let mut count = count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            idle.notify_all();
        }
    }

    pub fn count(&self) -> usize {
        *self.inner.0.lock()
    }

    #[cfg(test)]
    pub fn is_idle(&self) -> bool {
        self.count() == 0
    }

    /// Block until nothing is outstanding. Returns false on timeout.
    ///
    /// Queued UI messages count as outstanding, so this only returns true
    /// if somebody else is draining the UI queue.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        let (count, idle) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut count = count.lock();
        while *count > 0 {
            if idle.wait_until(&mut count, deadline).timed_out() {
                return *count == 0;
            }
        }
        true
    }
}

/// Remembers which thread is the UI thread.
#[derive(Clone, Copy, Debug)]
pub struct UiThreadGuard {
    id: ThreadId,
}

impl UiThreadGuard {
    pub fn current() -> Self {
        Self {
            id: thread::current().id(),
        }
    }

    pub fn is_ui_thread(&self) -> bool {
        thread::current().id() == self.id
    }

    /// Panic unless called from the UI thread.
    pub fn assert(&self, what: &str) {
        if !self.is_ui_thread() {
            tracing::error!(what, "view-facing call off the UI thread");
            panic!("{what} must run on the UI thread");
        }
    }
}

/// Handle passed to worker closures.
pub struct Task {
    cancel: CancellationToken,
    busy: BusyTracker,
    paused: AtomicBool,
}

impl Task {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cooperative cancellation point.
    pub fn checkpoint(&self) -> anyhow::Result<()> {
        if self.cancel.is_cancelled() {
            return Err(GuiError::Cancelled.into());
        }
        Ok(())
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Stop counting this worker as busy, e.g. while it waits for user input.
    pub fn pause(&self) {
        if !self.paused.swap(true, Ordering::SeqCst) {
            self.busy.decrement();
        }
    }

    pub fn resume(&self) {
        if self.paused.swap(false, Ordering::SeqCst) {
            self.busy.increment();
        }
    }

    fn finish(&self) {
        if !self.paused.load(Ordering::SeqCst) {
            self.busy.decrement();
        }
    }
}

pub struct UiReceiver<S> {
    rx: mpsc::UnboundedReceiver<UiMessage<S>>,
    busy: BusyTracker,
    after_layout: AfterLayout<S>,
}

type AfterLayout<S> = Arc<Mutex<Vec<UiTask<S>>>>;

pub struct Coordinator<S> {
    tx: mpsc::UnboundedSender<UiMessage<S>>,
    ui_thread: UiThreadGuard,
    root: CancellationToken,
    busy: BusyTracker,
    after_layout: AfterLayout<S>,
}

impl<S> Clone for Coordinator<S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            ui_thread: self.ui_thread,
            root: self.root.clone(),
            busy: self.busy.clone(),
            after_layout: self.after_layout.clone(),
        }
    }
}

impl<S> Coordinator<S> {
    pub fn ui_thread(&self) -> UiThreadGuard {
        self.ui_thread
    }

    pub fn busy(&self) -> &BusyTracker {
        &self.busy
    }

    /// Queue `f` for the UI thread. Always enqueues, even from the UI thread.
    pub fn on_ui_thread<F>(&self, f: F)
    where
        F: FnOnce(&mut S) -> anyhow::Result<()> + Send + 'static,
    {
        self.send(UiMessage::Run(Box::new(f)));
    }

    fn send(&self, msg: UiMessage<S>) {
        self.busy.increment();
        if self.tx.send(msg).is_err() {
            self.busy.decrement();
            tracing::debug!("UI queue closed; dropping message");
        }
    }

    /// Queue an already boxed task.
    pub fn queue_ui_task(&self, task: UiTask<S>) {
        self.send(UiMessage::Run(task));
    }

    /// Run `f` right after the next draw.
    pub fn after_layout<F>(&self, f: F)
    where
        F: FnOnce(&mut S) -> anyhow::Result<()> + Send + 'static,
    {
        self.after_layout.lock().push(Box::new(f));
    }

    /// Cancel every worker started through this coordinator.
    pub fn shutdown(&self) {
        self.root.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.root.is_cancelled()
    }
}

impl<S: UiState> Coordinator<S> {
    /// Create a coordinator whose UI thread is the calling thread.
    pub fn new() -> (Self, UiReceiver<S>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let busy = BusyTracker::new();
        let after_layout: AfterLayout<S> = Arc::new(Mutex::new(Vec::new()));
        let coordinator = Self {
            tx,
            ui_thread: UiThreadGuard::current(),
            root: CancellationToken::new(),
            busy: busy.clone(),
            after_layout: after_layout.clone(),
        };
        let receiver = UiReceiver {
            rx,
            busy,
            after_layout,
        };
        (coordinator, receiver)
    }

    /// Run `f` on a fresh worker thread. The returned token cancels it.
    ///
    /// Errors and panics from `f` are routed to the UI thread's error handler.
    pub fn on_worker<F>(&self, f: F) -> CancellationToken
    where
        F: FnOnce(&Task) -> anyhow::Result<()> + Send + 'static,
    {
        let cancel = self.root.child_token();
        let task = Task {
            cancel: cancel.clone(),
            busy: self.busy.clone(),
            paused: AtomicBool::new(false),
        };
        self.busy.increment();

        let coordinator = self.clone();
        let spawned = thread::Builder::new()
            .name("lzgui-worker".to_string())
            .spawn(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(|| f(&task)))
                    .unwrap_or_else(|payload| Err(panic_to_error("worker", payload)));
                if let Err(err) = result {
                    coordinator.send(UiMessage::WorkerError(err));
                }
                task.finish();
            });

        if let Err(e) = spawned {
            self.busy.decrement();
            self.send(UiMessage::WorkerError(anyhow!(
                "failed to spawn worker: {}",
                e
            )));
        }
        cancel
    }
}

impl<S: UiState> UiReceiver<S> {
    pub async fn recv(&mut self) -> Option<UiMessage<S>> {
        self.rx.recv().await
    }

    /// Run one message on the UI thread.
    pub fn process(&self, state: &mut S, msg: UiMessage<S>) {
        match msg {
            UiMessage::Run(task) => {
                if let Err(err) = task(state) {
                    state.handle_error(err, ErrorOrigin::UiThread);
                }
            }
            UiMessage::WorkerError(err) => state.handle_error(err, ErrorOrigin::Worker),
        }
        state.after_message();
        self.busy.decrement();
    }

    /// Run everything queued right now, including what those messages queue.
    pub fn drain(&mut self, state: &mut S) -> usize {
        let mut n = 0;
        while let Ok(msg) = self.rx.try_recv() {
            self.process(state, msg);
            n += 1;
        }
        n
    }

    /// Run the closures registered with [`Coordinator::after_layout`].
    pub fn run_after_layout(&self, state: &mut S) {
        let pending = std::mem::take(&mut *self.after_layout.lock());
        for f in pending {
            if let Err(err) = f(state) {
                state.handle_error(err, ErrorOrigin::UiThread);
            }
        }
    }

    /// Drain until no worker is running and the queue is empty.
    /// Returns false if that did not happen within `timeout`.
    pub fn settle(&mut self, state: &mut S, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.drain(state);
            let left = deadline.saturating_duration_since(Instant::now());
            // Queued messages keep the tracker busy, so wake up often to drain them.
            if self.busy.wait_until_idle(left.min(SETTLE_POLL)) {
                return true;
            }
            if left.is_zero() {
                return false;
            }
        }
    }
}

/// Turn a caught panic into an error for the UI thread's handler.
///
/// Typed [`GuiError`] payloads (lock-order violations) keep their type so the
/// handler still treats them as fatal.
pub fn panic_to_error(origin: &str, payload: Box<dyn Any + Send>) -> anyhow::Error {
    match payload.downcast::<GuiError>() {
        Ok(err) => anyhow::Error::from(*err),
        Err(payload) => anyhow!("{origin} panicked: {}", panic_message(&*payload)),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
