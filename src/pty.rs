//! Running a command under a pseudo-terminal and rendering its screen.

use std::{
    io::Read,
    sync::mpsc::{self, RecvTimeoutError},
    thread,
    time::{Duration, Instant},
};

use anyhow::Context as _;
use portable_pty::{CommandBuilder, NativePtySystem, PtySize, PtySystem};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{CommandError, GuiError},
    locks::ProcessLocks,
    view_buffer::CommandSpec,
};

const EXIT_DRAIN: Duration = Duration::from_millis(250);

/// Run `spec` in a pty of `rows` x `cols`, handing the rendered screen to
/// `on_screen` at most once per `flush_interval` and once more at exit.
///
/// Holds the Pty lock for the whole run. Cancelling kills the child.
pub fn run_in_pty(
    spec: &CommandSpec,
    rows: u16,
    cols: u16,
    locks: &ProcessLocks,
    cancel: &CancellationToken,
    flush_interval: Duration,
    mut on_screen: impl FnMut(Vec<String>),
) -> anyhow::Result<()> {
    let cmd_line = spec.display();
    let _pty = locks.pty.lock();
    if cancel.is_cancelled() {
        return Err(GuiError::Cancelled.into());
    }

    let pair = NativePtySystem::default()
        .openpty(PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        })
        .context("failed to open pty")?;

    let mut builder = CommandBuilder::new(&spec.program);
    builder.args(&spec.args);
    builder.cwd(&spec.cwd);
    for (k, v) in &spec.env {
        builder.env(k, v);
    }
    let mut child = pair
        .slave
        .spawn_command(builder)
        .with_context(|| format!("failed to run `{}` in a pty", cmd_line))?;
    // The reader only sees EOF once every slave handle is closed.
    drop(pair.slave);

    let mut reader = pair.master.try_clone_reader().context("pty reader")?;
    let (tx, rx) = mpsc::channel::<Vec<u8>>();
    thread::Builder::new()
        .name("pty-reader".to_string())
        .spawn(move || {
            let mut buf = [0u8; 4096];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                }
            }
        })
        .context("failed to start pty reader")?;

    let mut parser = vt100::Parser::new(rows, cols, 0);
    let mut dirty = false;
    let mut last_flush = Instant::now();
    loop {
        if cancel.is_cancelled() {
            let _ = child.kill();
            let _ = child.wait();
            tracing::debug!(cmd = %cmd_line, "killed cancelled pty command");
            return Err(GuiError::Cancelled.into());
        }
        match rx.recv_timeout(flush_interval) {
            Ok(bytes) => {
                parser.process(&bytes);
                dirty = true;
            }
            Err(RecvTimeoutError::Timeout) => {
                if matches!(child.try_wait(), Ok(Some(_))) {
                    drain_after_exit(&rx, &mut parser);
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
        if dirty && last_flush.elapsed() >= flush_interval {
            on_screen(screen_lines(&parser));
            dirty = false;
            last_flush = Instant::now();
        }
    }

    let status = child
        .wait()
        .with_context(|| format!("waiting for `{}`", cmd_line))?;
    on_screen(screen_lines(&parser));
    if !status.success() {
        return Err(CommandError::Failed {
            cmd: cmd_line,
            code: i32::try_from(status.exit_code()).ok(),
            stderr: String::new(),
        }
        .into());
    }
    Ok(())
}

/// Output still in flight when the child exits.
fn drain_after_exit(rx: &mpsc::Receiver<Vec<u8>>, parser: &mut vt100::Parser) {
    let deadline = Instant::now() + EXIT_DRAIN;
    while let Ok(bytes) = rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        parser.process(&bytes);
    }
}

fn screen_lines(parser: &vt100::Parser) -> Vec<String> {
    let contents = parser.screen().contents();
    let mut lines: Vec<String> = contents.lines().map(|l| l.to_string()).collect();
    while lines.last().is_some_and(|l| l.trim().is_empty()) {
        lines.pop();
    }
    lines
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn pty_available() -> bool {
        NativePtySystem::default()
            .openpty(PtySize {
                rows: 4,
                cols: 20,
                pixel_width: 0,
                pixel_height: 0,
            })
            .is_ok()
    }

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh", PathBuf::from(".")).args(["-c", script])
    }

    #[test]
    fn renders_the_final_screen() {
        if !pty_available() {
            return;
        }
        let locks = ProcessLocks::new();
        let mut last = Vec::new();
        run_in_pty(
            &sh("printf 'hello\\nworld\\n'"),
            10,
            40,
            &locks,
            &CancellationToken::new(),
            Duration::from_millis(10),
            |screen| last = screen,
        )
        .unwrap();
        assert_eq!(last, vec!["hello", "world"]);
        assert!(!locks.pty.is_locked());
    }

    #[test]
    fn cancelling_kills_the_child() {
        if !pty_available() {
            return;
        }
        let locks = ProcessLocks::new();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            trigger.cancel();
        });
        let started = Instant::now();
        let err = run_in_pty(
            &sh("sleep 30"),
            4,
            20,
            &locks,
            &cancel,
            Duration::from_millis(10),
            |_| {},
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GuiError>(),
            Some(GuiError::Cancelled)
        ));
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
