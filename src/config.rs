use std::{
    env, fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{error::GuiError, screen::ScreenMode};

const APP_DIR: &str = "lzgui";
const MAX_CUSTOM_COMMAND_HISTORY: usize = 100;
const MAX_RECENT_REPOS: usize = 20;

/// `$XDG_CONFIG_HOME/lzgui`, falling back to `~/.config/lzgui`.
pub fn config_dir() -> Option<PathBuf> {
    let base = match env::var_os("XDG_CONFIG_HOME") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => env::home_dir()?.join(".config"),
    };
    Some(base.join(APP_DIR))
}

fn default_spinner_frames() -> Vec<String> {
    ["|", "/", "-", "\\"].iter().map(|s| s.to_string()).collect()
}

fn default_spinner_rate_ms() -> u64 {
    50
}

fn default_toast_ttl_ms() -> u64 {
    2500
}

fn default_commit_limit() -> usize {
    300
}

fn default_reflog_limit() -> usize {
    500
}

fn default_flush_interval_ms() -> u64 {
    50
}

fn default_flush_lines() -> usize {
    200
}

fn default_use_pty() -> bool {
    false
}

fn default_refresh_interval_secs() -> u64 {
    10
}

fn default_fetch_interval_secs() -> u64 {
    60
}

fn default_command_log_size() -> usize {
    200
}

/// User configuration. Unknown keys are ignored and every field has a default.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuiConfig {
    #[serde(default = "default_spinner_frames")]
    pub spinner_frames: Vec<String>,
    #[serde(default = "default_spinner_rate_ms")]
    pub spinner_rate_ms: u64,
    #[serde(default = "default_toast_ttl_ms")]
    pub toast_ttl_ms: u64,

    #[serde(default = "default_commit_limit")]
    pub commit_limit: usize,
    #[serde(default = "default_reflog_limit")]
    pub reflog_limit: usize,

    /// How often streamed main-view output is flushed to the view.
    #[serde(default = "default_flush_interval_ms")]
    pub main_view_flush_interval_ms: u64,
    /// Flush early once this many lines are buffered.
    #[serde(default = "default_flush_lines")]
    pub main_view_flush_lines: usize,
    #[serde(default = "default_use_pty")]
    pub main_view_use_pty: bool,

    /// 0 disables the background files refresh.
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    /// 0 disables auto-fetch.
    #[serde(default = "default_fetch_interval_secs")]
    pub fetch_interval_secs: u64,

    #[serde(default = "default_command_log_size")]
    pub command_log_size: usize,
}

impl Default for GuiConfig {
    fn default() -> Self {
        Self {
            spinner_frames: default_spinner_frames(),
            spinner_rate_ms: default_spinner_rate_ms(),
            toast_ttl_ms: default_toast_ttl_ms(),
            commit_limit: default_commit_limit(),
            reflog_limit: default_reflog_limit(),
            main_view_flush_interval_ms: default_flush_interval_ms(),
            main_view_flush_lines: default_flush_lines(),
            main_view_use_pty: default_use_pty(),
            refresh_interval_secs: default_refresh_interval_secs(),
            fetch_interval_secs: default_fetch_interval_secs(),
            command_log_size: default_command_log_size(),
        }
    }
}

impl GuiConfig {
    /// Read `config.json` from `dir`. A missing or malformed file means defaults.
    pub fn load(dir: Option<&Path>) -> Self {
        let Some(dir) = dir else {
            return Self::default();
        };
        let path = dir.join("config.json");
        let data = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), "cannot read config: {}", e);
                }
                return Self::default();
            }
        };
        match serde_json::from_str(&data) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(path = %path.display(), "ignoring malformed config: {}", e);
                Self::default()
            }
        }
    }

    pub fn spinner_rate(&self) -> Duration {
        Duration::from_millis(self.spinner_rate_ms.max(1))
    }

    pub fn toast_ttl(&self) -> Duration {
        Duration::from_millis(self.toast_ttl_ms)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.main_view_flush_interval_ms.max(1))
    }

    pub fn refresh_interval(&self) -> Option<Duration> {
        (self.refresh_interval_secs > 0).then(|| Duration::from_secs(self.refresh_interval_secs))
    }

    pub fn fetch_interval(&self) -> Option<Duration> {
        (self.fetch_interval_secs > 0).then(|| Duration::from_secs(self.fetch_interval_secs))
    }

    pub fn spinner_frame(&self, tick: usize) -> &str {
        if self.spinner_frames.is_empty() {
            return "";
        }
        &self.spinner_frames[tick % self.spinner_frames.len()]
    }
}

/// Process-level toggles that change timing and animation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GuiFlags {
    pub running_integration_test: bool,
    pub in_demo: bool,
}

impl GuiFlags {
    pub fn from_env() -> Self {
        Self {
            running_integration_test: env_flag("LZGUI_INTEGRATION_TEST"),
            in_demo: env_flag("LZGUI_DEMO"),
        }
    }
}

fn env_flag(name: &str) -> bool {
    env::var(name)
        .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

/// State that survives restarts.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppState {
    #[serde(default)]
    pub recent_repos: Vec<String>,
    /// Newest first.
    #[serde(default)]
    pub custom_command_history: Vec<String>,
    #[serde(default)]
    pub hide_command_log: bool,
    #[serde(default)]
    pub last_screen_mode: ScreenMode,
}

impl AppState {
    pub fn push_custom_command(&mut self, cmd: &str) {
        let cmd = cmd.trim();
        if cmd.is_empty() {
            return;
        }
        self.custom_command_history.retain(|c| c != cmd);
        self.custom_command_history.insert(0, cmd.to_string());
        self.custom_command_history
            .truncate(MAX_CUSTOM_COMMAND_HISTORY);
    }

    pub fn push_recent_repo(&mut self, path: &str) {
        self.recent_repos.retain(|p| p != path);
        self.recent_repos.insert(0, path.to_string());
        self.recent_repos.truncate(MAX_RECENT_REPOS);
    }
}

/// Loads and saves [`AppState`] as `state.json`.
pub struct AppStateStore {
    path: Option<PathBuf>,
    state: AppState,
}

impl AppStateStore {
    /// A store with no backing file; `save` is a no-op.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: AppState::default(),
        }
    }

    pub fn load(dir: Option<&Path>) -> Self {
        let Some(dir) = dir else {
            return Self::in_memory();
        };
        let path = dir.join("state.json");
        let state = fs::read_to_string(&path)
            .ok()
            .and_then(|data| match serde_json::from_str(&data) {
                Ok(state) => Some(state),
                Err(e) => {
                    tracing::warn!(path = %path.display(), "ignoring malformed state: {}", e);
                    None
                }
            })
            .unwrap_or_default();
        Self {
            path: Some(path),
            state,
        }
    }

    pub fn get(&self) -> &AppState {
        &self.state
    }

    pub fn get_mut(&mut self) -> &mut AppState {
        &mut self.state
    }

    /// Write atomically: temp file, then rename over the old one.
    pub fn save(&self) -> Result<(), GuiError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let content = serde_json::to_string_pretty(&self.state)
            .map_err(|e| GuiError::SaveAppState(io::Error::other(e)))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(GuiError::SaveAppState)?;
        }
        let tmp = path.with_extension("tmp");
        let written = fs::write(&tmp, content).and_then(|_| fs::rename(&tmp, path));
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(GuiError::SaveAppState(e));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_config_means_defaults() {
        let dir = TempDir::new().unwrap();
        assert_eq!(GuiConfig::load(Some(dir.path())), GuiConfig::default());
        assert_eq!(GuiConfig::load(None), GuiConfig::default());
    }

    #[test]
    fn partial_config_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("config.json"),
            r#"{"spinner_rate_ms": 120, "fetch_interval_secs": 0}"#,
        )
        .unwrap();
        let config = GuiConfig::load(Some(dir.path()));
        assert_eq!(config.spinner_rate(), Duration::from_millis(120));
        assert_eq!(config.fetch_interval(), None);
        assert_eq!(config.commit_limit, default_commit_limit());
    }

    #[test]
    fn malformed_config_falls_back() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("config.json"), "{ not json").unwrap();
        assert_eq!(GuiConfig::load(Some(dir.path())), GuiConfig::default());
    }

    #[test]
    fn spinner_frames_wrap() {
        let config = GuiConfig::default();
        assert_eq!(config.spinner_frame(0), "|");
        assert_eq!(config.spinner_frame(5), "/");
    }

    #[test]
    fn app_state_round_trips_through_disk() {
        let dir = TempDir::new().unwrap();
        let mut store = AppStateStore::load(Some(dir.path()));
        store.get_mut().push_custom_command("make test");
        store.get_mut().last_screen_mode = ScreenMode::Half;
        store.save().unwrap();

        assert!(!dir.path().join("state.tmp").exists());
        let reloaded = AppStateStore::load(Some(dir.path()));
        assert_eq!(reloaded.get(), store.get());
    }

    #[test]
    fn save_failure_is_a_typed_error() {
        let dir = TempDir::new().unwrap();
        // A file where the config directory should be.
        let blocker = dir.path().join("blocked");
        fs::write(&blocker, "").unwrap();
        let store = AppStateStore::load(Some(&blocker.join("lzgui")));
        match store.save() {
            Err(GuiError::SaveAppState(_)) => {}
            other => panic!("expected SaveAppState, got {:?}", other),
        }
    }

    #[test]
    fn custom_command_history_is_deduplicated_newest_first() {
        let mut state = AppState::default();
        state.push_custom_command("a");
        state.push_custom_command("b");
        state.push_custom_command("a");
        state.push_custom_command("   ");
        assert_eq!(state.custom_command_history, vec!["a", "b"]);

        for i in 0..150 {
            state.push_custom_command(&format!("cmd {i}"));
        }
        assert_eq!(state.custom_command_history.len(), MAX_CUSTOM_COMMAND_HISTORY);
        assert_eq!(state.custom_command_history[0], "cmd 149");
    }
}
