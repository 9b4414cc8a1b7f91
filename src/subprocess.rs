//! Interactive subprocesses that take over the terminal.

use std::{
    io::{self, Write},
    process::Stdio,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use crossterm::{
    cursor,
    event::{DisableMouseCapture, EnableMouseCapture},
    execute,
    terminal::{self, EnterAlternateScreen, LeaveAlternateScreen},
};

use crate::{
    command_log::CommandLog,
    error::CommandError,
    locks::ProcessLocks,
    refresh::{RefreshOptions, RefreshTarget, Refresher},
    view_buffer::CommandSpec,
};

/// Hands the terminal to a child process and takes it back.
pub trait TerminalSuspender: Send + Sync {
    fn suspend(&self) -> io::Result<()>;
    fn resume(&self) -> io::Result<()>;
}

/// Leaves raw mode and the alternate screen while a child runs.
#[derive(Default)]
pub struct CrosstermSuspender {
    needs_clear: AtomicBool,
}

impl CrosstermSuspender {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once after each resume; the caller then clears the terminal.
    pub fn take_needs_clear(&self) -> bool {
        self.needs_clear.swap(false, Ordering::SeqCst)
    }
}

impl TerminalSuspender for CrosstermSuspender {
    fn suspend(&self) -> io::Result<()> {
        terminal::disable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, LeaveAlternateScreen, DisableMouseCapture, cursor::Show)?;
        stdout.flush()
    }

    fn resume(&self) -> io::Result<()> {
        terminal::enable_raw_mode()?;
        let mut stdout = io::stdout();
        // Order matters: the alternate screen must be entered before clearing it.
        execute!(
            stdout,
            EnterAlternateScreen,
            terminal::Clear(terminal::ClearType::All),
            terminal::Clear(terminal::ClearType::Purge),
            cursor::MoveTo(0, 0),
            cursor::Hide,
            EnableMouseCapture
        )?;
        stdout.flush()?;
        self.needs_clear.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Clone)]
pub struct Subprocesses {
    locks: Arc<ProcessLocks>,
    suspender: Arc<dyn TerminalSuspender>,
    log: CommandLog,
}

impl Subprocesses {
    pub fn new(
        locks: Arc<ProcessLocks>,
        suspender: Arc<dyn TerminalSuspender>,
        log: CommandLog,
    ) -> Self {
        Self {
            locks,
            suspender,
            log,
        }
    }

    /// Run `spec` with the terminal handed over to it, blocking until it exits.
    ///
    /// The terminal is resumed even when the command fails to start.
    pub fn run_subprocess(&self, spec: &CommandSpec) -> anyhow::Result<()> {
        let display = spec.display();
        let _owner = self.locks.subprocess.lock();
        self.log.log_command(&display, true);

        self.suspender.suspend()?;
        let status = spec
            .to_command()
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status();
        let resumed = self.suspender.resume();

        let status = status.map_err(|source| CommandError::Spawn {
            cmd: display.clone(),
            source,
        })?;
        resumed?;
        if !status.success() {
            return Err(CommandError::Failed {
                cmd: display,
                code: status.code(),
                stderr: String::new(),
            }
            .into());
        }
        Ok(())
    }
}

/// Run an interactive command, then refresh everything it may have changed.
/// The refresh happens whether or not the command succeeded.
pub fn run_subprocess_and_refresh<S: RefreshTarget>(
    subprocesses: &Subprocesses,
    refresher: &Refresher<S>,
    spec: &CommandSpec,
) -> anyhow::Result<()> {
    let result = subprocesses.run_subprocess(spec);
    refresher.refresh(RefreshOptions::all())?;
    result
}
