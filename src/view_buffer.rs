//! Streaming content into the main views.
//!
//! Each main-view slot has a [`ViewBufferManager`]. Starting a task for a slot
//! cancels the slot's previous task and bumps its generation; output from an
//! older generation is dropped on the UI thread, so a superseded command
//! never interleaves with the current one.

use std::{
    io::{BufRead, BufReader, Read},
    path::PathBuf,
    process::{Command, Stdio},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
        mpsc::{self, RecvTimeoutError},
    },
    thread,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::{
    context::ContextKey,
    error::GuiError,
    git_commands::NON_INTERACTIVE_ENV,
    locks::ProcessLocks,
    pty,
    tasks::{Coordinator, Task, UiState},
    views::Views,
};

/// An external command for the main view.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, cwd: PathBuf) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd,
            env: Vec::new(),
        }
    }

    /// `git <args>` in `repo_root`, non-interactive.
    pub fn git<I, A>(repo_root: PathBuf, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        let mut spec = Self::new("git", repo_root).args(args);
        spec.env = NON_INTERACTIVE_ENV
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        spec
    }

    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(&self.cwd)
            .envs(self.env.iter().map(|(k, v)| (k, v)));
        cmd
    }
}

/// What to show in a main-view slot.
#[derive(Clone, Debug)]
pub enum UpdateTask {
    Text(String),
    /// Stream stdout and stderr line by line.
    RunCommand(CommandSpec),
    /// Run under a pseudo-terminal and show its screen.
    RunPty(CommandSpec),
}

/// UI state that owns the views output is streamed into.
pub trait HasViews: UiState {
    fn views_mut(&mut self) -> &mut Views;
}

#[derive(Clone, Copy, Debug)]
pub struct FlushPolicy {
    /// Flush once this many lines are buffered.
    pub lines: usize,
    /// Flush at least this often while output is arriving.
    pub interval: Duration,
}

pub struct ViewBufferManager<S> {
    key: ContextKey,
    coord: Coordinator<S>,
    generation: Arc<AtomicU64>,
    current: Mutex<Option<CancellationToken>>,
    flush: FlushPolicy,
    locks: Arc<ProcessLocks>,
    pty_size: Mutex<(u16, u16)>,
}

impl<S: HasViews> ViewBufferManager<S> {
    pub fn new(
        key: ContextKey,
        coord: Coordinator<S>,
        flush: FlushPolicy,
        locks: Arc<ProcessLocks>,
    ) -> Self {
        Self {
            key,
            coord,
            generation: Arc::new(AtomicU64::new(0)),
            current: Mutex::new(None),
            flush,
            locks,
            pty_size: Mutex::new((24, 80)),
        }
    }

    pub fn key(&self) -> ContextKey {
        self.key
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Size used for pty runs; set from the main view's last drawn area.
    pub fn set_pty_size(&self, rows: u16, cols: u16) {
        *self.pty_size.lock() = (rows.max(1), cols.max(1));
    }

    /// Cancel the running task, if any, and drop its pending output.
    pub fn stop(&self) {
        if let Some(token) = self.current.lock().take() {
            token.cancel();
        }
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Replace whatever the slot is showing with `task`.
    pub fn new_task(&self, task: UpdateTask) -> CancellationToken {
        let mut current = self.current.lock();
        if let Some(token) = current.take() {
            token.cancel();
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut sink = BatchSink {
            key: self.key,
            generation,
            latest: self.generation.clone(),
            coord: self.coord.clone(),
            first: true,
        };

        let token = match task {
            UpdateTask::Text(text) => {
                sink.send(text.lines().map(str::to_string).collect(), Apply::Replace);
                CancellationToken::new()
            }
            UpdateTask::RunCommand(spec) => {
                let flush = self.flush;
                self.coord
                    .on_worker(move |task| stream_command(&spec, task, flush, &mut sink))
            }
            UpdateTask::RunPty(spec) => {
                let flush = self.flush;
                let locks = self.locks.clone();
                let (rows, cols) = *self.pty_size.lock();
                self.coord.on_worker(move |task| {
                    pty::run_in_pty(
                        &spec,
                        rows,
                        cols,
                        &locks,
                        task.cancel_token(),
                        flush.interval,
                        |screen| {
                            if !task.is_cancelled() {
                                sink.send(screen, Apply::Replace);
                            }
                        },
                    )
                })
            }
        };
        *current = Some(token.clone());
        token
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Apply {
    Replace,
    Append,
}

/// Sends batches of one generation to the UI thread.
struct BatchSink<S> {
    key: ContextKey,
    generation: u64,
    latest: Arc<AtomicU64>,
    coord: Coordinator<S>,
    first: bool,
}

impl<S: HasViews> BatchSink<S> {
    /// The first batch of a generation always replaces the view content.
    fn send(&mut self, lines: Vec<String>, apply: Apply) {
        let reset_origin = self.first;
        let apply = if self.first { Apply::Replace } else { apply };
        self.first = false;

        let (key, generation, latest) = (self.key, self.generation, self.latest.clone());
        self.coord.on_ui_thread(move |s| {
            if latest.load(Ordering::SeqCst) != generation {
                return Ok(());
            }
            let views = s.views_mut();
            match apply {
                Apply::Replace => views.set_view_content(key, lines),
                Apply::Append => views.append_view_content(key, lines),
            }
            if reset_origin {
                views.reset_view_origin(key);
            }
            Ok(())
        });
    }
}

fn stream_command<S: HasViews>(
    spec: &CommandSpec,
    task: &Task,
    flush: FlushPolicy,
    sink: &mut BatchSink<S>,
) -> anyhow::Result<()> {
    let cmd_line = spec.display();
    let mut child = spec
        .to_command()
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| crate::error::CommandError::Spawn {
            cmd: cmd_line.clone(),
            source,
        })?;

    let (tx, rx) = mpsc::channel::<String>();
    if let Some(out) = child.stdout.take() {
        forward_lines(out, tx.clone());
    }
    if let Some(err) = child.stderr.take() {
        forward_lines(err, tx.clone());
    }
    drop(tx);

    let mut batch = Vec::new();
    let mut last_flush = Instant::now();
    loop {
        if task.is_cancelled() {
            let _ = child.kill();
            let _ = child.wait();
            tracing::debug!(cmd = %cmd_line, "superseded main view command killed");
            return Err(GuiError::Cancelled.into());
        }
        let wait = flush.interval.saturating_sub(last_flush.elapsed());
        match rx.recv_timeout(wait) {
            Ok(line) => batch.push(line),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        let due = batch.len() >= flush.lines || last_flush.elapsed() >= flush.interval;
        if due && !batch.is_empty() {
            sink.send(std::mem::take(&mut batch), Apply::Append);
            last_flush = Instant::now();
        } else if due {
            last_flush = Instant::now();
        }
    }

    let status = child.wait()?;
    // Flush the tail, or clear stale content if the command printed nothing.
    if !batch.is_empty() || sink.first {
        sink.send(batch, Apply::Append);
    }
    if !status.success() {
        tracing::debug!(cmd = %cmd_line, code = ?status.code(), "main view command failed");
    }
    Ok(())
}

fn forward_lines(pipe: impl Read + Send + 'static, tx: mpsc::Sender<String>) {
    let spawned = thread::Builder::new()
        .name("view-reader".to_string())
        .spawn(move || {
            for line in BufReader::new(pipe).lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        tracing::warn!("failed to start output reader: {}", e);
    }
}
