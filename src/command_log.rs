//! The command log: what the user did and which commands ran.

use std::{collections::VecDeque, sync::Arc, time::Instant};

use parking_lot::Mutex;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogEntryKind {
    /// A user-facing action, e.g. "Push".
    Action,
    /// A command. `is_command_line` marks commands the user typed or that own
    /// the terminal, as opposed to internal invocations.
    Command { is_command_line: bool },
}

#[derive(Clone, Debug)]
pub struct CommandLogEntry {
    pub when: Instant,
    pub kind: LogEntryKind,
    pub text: String,
}

/// Bounded, newest-first log shared between the UI and workers.
#[derive(Clone)]
pub struct CommandLog {
    entries: Arc<Mutex<VecDeque<CommandLogEntry>>>,
    capacity: usize,
}

impl CommandLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(VecDeque::new())),
            capacity: capacity.max(1),
        }
    }

    pub fn log_action(&self, action: &str) {
        tracing::info!(action, "action");
        self.push(LogEntryKind::Action, action.to_string());
    }

    pub fn log_command(&self, cmd: &str, is_command_line: bool) {
        tracing::debug!(cmd, is_command_line, "command");
        self.push(LogEntryKind::Command { is_command_line }, cmd.to_string());
    }

    fn push(&self, kind: LogEntryKind, text: String) {
        let mut entries = self.entries.lock();
        entries.push_front(CommandLogEntry {
            when: Instant::now(),
            kind,
            text,
        });
        while entries.len() > self.capacity {
            entries.pop_back();
        }
    }

    pub fn entries(&self) -> Vec<CommandLogEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rendered lines for the command log view, oldest at the top.
    pub fn lines(&self) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .rev()
            .map(|e| match e.kind {
                LogEntryKind::Action => e.text.clone(),
                LogEntryKind::Command { .. } => format!("  {}", e.text),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newest_first_and_bounded() {
        let log = CommandLog::new(3);
        for i in 0..5 {
            log.log_command(&format!("git cmd {i}"), false);
        }
        let entries = log.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].text, "git cmd 4");
        assert_eq!(entries[2].text, "git cmd 2");
    }

    #[test]
    fn commands_are_indented_under_actions() {
        let log = CommandLog::new(10);
        log.log_action("Push");
        log.log_command("git push origin main", false);
        log.log_command("vim notes.md", true);
        assert_eq!(
            log.lines(),
            vec!["Push", "  git push origin main", "  vim notes.md"]
        );
        assert_eq!(
            log.entries()[0].kind,
            LogEntryKind::Command {
                is_command_line: true
            }
        );
    }
}
