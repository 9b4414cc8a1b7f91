//! Non-interactive git invocations.

use std::{
    fs,
    io::Read,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    sync::Arc,
    thread,
    time::Duration,
};

use tokio_util::sync::CancellationToken;

use crate::{command_log::CommandLog, error::CommandError};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Environment that keeps git from prompting, paging or opening an editor.
pub const NON_INTERACTIVE_ENV: [(&str, &str); 9] = [
    ("GIT_TERMINAL_PROMPT", "0"),
    ("GCM_INTERACTIVE", "never"),
    ("GIT_PAGER", "cat"),
    ("PAGER", "cat"),
    ("GIT_EDITOR", ":"),
    ("EDITOR", ":"),
    ("GIT_SEQUENCE_EDITOR", ":"),
    ("GIT_MERGE_AUTOEDIT", "no"),
    ("LC_ALL", "C"),
];

/// Set when git runs this binary as its askpass helper.
pub const ASKPASS_ENV: &str = "LZGUI_ASKPASS";
const ASKPASS_USERNAME_ENV: &str = "LZGUI_ASKPASS_USERNAME";
const ASKPASS_PASSWORD_ENV: &str = "LZGUI_ASKPASS_PASSWORD";

/// Stderr fragments git prints when it needed credentials it could not ask for.
const CREDENTIAL_FAILURES: [&str; 4] = [
    "could not read Username",
    "could not read Password",
    "terminal prompts disabled",
    "Authentication failed",
];

/// Credentials entered in the UI, handed to git through askpass.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Whether `err` means git gave up waiting for a username or password.
pub fn needs_credentials(err: &CommandError) -> bool {
    match err {
        CommandError::Failed { stderr, .. } => {
            CREDENTIAL_FAILURES.iter().any(|f| stderr.contains(f))
        }
        _ => false,
    }
}

/// Answer to git's askpass `prompt`, read from the environment git passed on.
pub fn askpass_reply(prompt: &str) -> String {
    let var = if prompt.starts_with("Username") {
        ASKPASS_USERNAME_ENV
    } else {
        ASKPASS_PASSWORD_ENV
    };
    std::env::var(var).unwrap_or_default()
}

/// `git -C <cwd>` with prompts, pagers and editors disabled.
pub fn git(cwd: &Path) -> Command {
    let mut cmd = Command::new("git");
    cmd.arg("-C").arg(cwd).envs(NON_INTERACTIVE_ENV);
    cmd
}

pub fn display_git(args: &[&str]) -> String {
    let mut s = String::from("git");
    for a in args {
        s.push(' ');
        if a.contains(char::is_whitespace) {
            s.push('"');
            s.push_str(a);
            s.push('"');
        } else {
            s.push_str(a);
        }
    }
    s
}

/// Run `git args` to completion and return stdout.
pub fn run_git(cwd: &Path, args: &[&str]) -> Result<String, CommandError> {
    let cmd_line = display_git(args);
    let out = git(cwd)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|source| CommandError::Spawn {
            cmd: cmd_line.clone(),
            source,
        })?;
    if !out.status.success() {
        return Err(CommandError::Failed {
            cmd: cmd_line,
            code: out.status.code(),
            stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&out.stdout).to_string())
}

/// Run `cmd`, killing it if `cancel` fires. Returns stdout on success.
pub fn run_cancellable(
    mut cmd: Command,
    cmd_line: &str,
    cancel: &CancellationToken,
) -> Result<String, CommandError> {
    if cancel.is_cancelled() {
        return Err(CommandError::Cancelled {
            cmd: cmd_line.to_string(),
        });
    }
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| CommandError::Spawn {
            cmd: cmd_line.to_string(),
            source,
        })?;

    // Drain both pipes on their own threads so a chatty child can't fill one
    // and block while we poll.
    let stdout = child.stdout.take().map(drain_pipe);
    let stderr = child.stderr.take().map(drain_pipe);

    let status = loop {
        if cancel.is_cancelled() {
            let _ = child.kill();
            let _ = child.wait();
            tracing::debug!(cmd = %cmd_line, "killed cancelled command");
            return Err(CommandError::Cancelled {
                cmd: cmd_line.to_string(),
            });
        }
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(source) => {
                let _ = child.kill();
                return Err(CommandError::Spawn {
                    cmd: cmd_line.to_string(),
                    source,
                });
            }
        }
    };

    let stdout = stdout
        .and_then(|h| h.join().ok())
        .unwrap_or_default();
    let stderr = stderr
        .and_then(|h| h.join().ok())
        .unwrap_or_default();

    if !status.success() {
        return Err(CommandError::Failed {
            cmd: cmd_line.to_string(),
            code: status.code(),
            stderr: stderr.trim().to_string(),
        });
    }
    Ok(stdout)
}

fn drain_pipe<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).to_string()
    })
}

/// Repository mutations. Every command is recorded in the command log.
#[derive(Clone)]
pub struct GitCommands {
    repo_root: PathBuf,
    log: CommandLog,
    credentials: Option<Arc<Credentials>>,
}

impl GitCommands {
    pub fn new(repo_root: PathBuf, log: CommandLog) -> Self {
        Self {
            repo_root,
            log,
            credentials: None,
        }
    }

    /// A copy whose commands answer git's credential prompts with `credentials`.
    pub fn with_credentials(&self, credentials: Credentials) -> Self {
        Self {
            credentials: Some(Arc::new(credentials)),
            ..self.clone()
        }
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    fn command(&self, args: &[&str]) -> Result<Command, CommandError> {
        let mut cmd = git(&self.repo_root);
        cmd.args(args);
        if let Some(credentials) = &self.credentials {
            let helper = std::env::current_exe().map_err(|source| CommandError::Spawn {
                cmd: "locate askpass helper".to_string(),
                source,
            })?;
            cmd.env("GIT_ASKPASS", helper)
                .env(ASKPASS_ENV, "1")
                .env(ASKPASS_USERNAME_ENV, &credentials.username)
                .env(ASKPASS_PASSWORD_ENV, &credentials.password);
        }
        Ok(cmd)
    }

    fn run(&self, args: &[&str], cancel: &CancellationToken) -> Result<String, CommandError> {
        let cmd_line = display_git(args);
        self.log.log_command(&cmd_line, false);
        tracing::debug!(cmd = %cmd_line, credentials = self.has_credentials(), "git");
        let cmd = self.command(args)?;
        run_cancellable(cmd, &cmd_line, cancel)
    }

    /// Push `branch`. With `set_upstream`, pushes to that remote and tracks it.
    pub fn push(
        &self,
        branch: &str,
        set_upstream: Option<&str>,
        force_with_lease: bool,
        cancel: &CancellationToken,
    ) -> Result<(), CommandError> {
        let mut args = vec!["push"];
        if force_with_lease {
            args.push("--force-with-lease");
        }
        if let Some(remote) = set_upstream {
            args.extend(["--set-upstream", remote, branch]);
        }
        self.run(&args, cancel).map(drop)
    }

    pub fn pull(&self, rebase: bool, cancel: &CancellationToken) -> Result<(), CommandError> {
        let args: &[&str] = if rebase {
            &["pull", "--rebase"]
        } else {
            &["pull", "--no-edit"]
        };
        self.run(args, cancel).map(drop)
    }

    /// Fast-forward a branch that is not checked out from its upstream.
    pub fn fast_forward(
        &self,
        branch: &str,
        remote: &str,
        remote_branch: &str,
        cancel: &CancellationToken,
    ) -> Result<(), CommandError> {
        let refspec = format!("refs/heads/{remote_branch}:refs/heads/{branch}");
        self.run(&["fetch", remote, refspec.as_str()], cancel)
            .map(drop)
    }

    pub fn fetch(&self, cancel: &CancellationToken) -> Result<(), CommandError> {
        self.run(&["fetch", "--all", "--prune"], cancel).map(drop)
    }

    pub fn fetch_remote(&self, remote: &str, cancel: &CancellationToken) -> Result<(), CommandError> {
        self.run(&["fetch", "--prune", remote], cancel).map(drop)
    }

    pub fn delete_branch(
        &self,
        branch: &str,
        force: bool,
        cancel: &CancellationToken,
    ) -> Result<(), CommandError> {
        let flag = if force { "-D" } else { "-d" };
        self.run(&["branch", flag, branch], cancel).map(drop)
    }

    pub fn delete_remote_branch(
        &self,
        remote: &str,
        branch: &str,
        cancel: &CancellationToken,
    ) -> Result<(), CommandError> {
        self.run(&["push", remote, "--delete", branch], cancel)
            .map(drop)
    }

    pub fn checkout(&self, branch: &str, cancel: &CancellationToken) -> Result<(), CommandError> {
        self.run(&["checkout", branch], cancel).map(drop)
    }

    pub fn create_branch(
        &self,
        name: &str,
        base: &str,
        cancel: &CancellationToken,
    ) -> Result<(), CommandError> {
        self.run(&["checkout", "-b", name, base], cancel).map(drop)
    }

    pub fn stage_paths(&self, paths: &[String], cancel: &CancellationToken) -> Result<(), CommandError> {
        if paths.is_empty() {
            return Ok(());
        }
        let mut args = vec!["add", "--"];
        args.extend(paths.iter().map(String::as_str));
        self.run(&args, cancel).map(drop)
    }

    pub fn unstage_paths(
        &self,
        paths: &[String],
        cancel: &CancellationToken,
    ) -> Result<(), CommandError> {
        if paths.is_empty() {
            return Ok(());
        }
        let mut args = vec!["restore", "--staged", "--"];
        args.extend(paths.iter().map(String::as_str));
        self.run(&args, cancel).map(drop)
    }

    /// Append patterns that are not already present. Returns how many were added.
    pub fn add_to_gitignore(&self, patterns: &[String]) -> Result<usize, CommandError> {
        let added = add_to_gitignore(&self.repo_root, patterns).map_err(|source| {
            CommandError::Spawn {
                cmd: "write .gitignore".to_string(),
                source,
            }
        })?;
        if added > 0 {
            self.log
                .log_command(&format!("echo {} >> .gitignore", patterns.join(" ")), false);
        }
        Ok(added)
    }
}

fn add_to_gitignore(repo_root: &Path, patterns: &[String]) -> std::io::Result<usize> {
    let path = repo_root.join(".gitignore");
    let existing = match fs::read_to_string(&path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e),
    };

    let mut present: std::collections::BTreeSet<&str> =
        existing.lines().map(str::trim_end).filter(|l| !l.is_empty()).collect();
    let mut to_add = Vec::new();
    for p in patterns {
        let p = p.trim();
        if p.is_empty() || p == ".gitignore" {
            continue;
        }
        if present.insert(p) {
            to_add.push(p);
        }
    }
    if to_add.is_empty() {
        return Ok(0);
    }

    let mut out = existing.clone();
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    for p in &to_add {
        out.push_str(p);
        out.push('\n');
    }
    fs::write(&path, out)?;
    Ok(to_add.len())
}
