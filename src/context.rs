//! Which panel is active, and where input and refreshes are routed.

use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ContextKey {
    Status,
    Files,
    Submodules,
    LocalBranches,
    Remotes,
    Tags,
    Worktrees,
    LocalCommits,
    ReflogCommits,
    SubCommits,
    Stash,
    Main,
    Secondary,
    Confirmation,
    Prompt,
    Suggestions,
    Menu,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContextKind {
    Side,
    Main,
    Popup,
}

impl ContextKey {
    pub const SIDE: [ContextKey; 11] = [
        ContextKey::Status,
        ContextKey::Files,
        ContextKey::Submodules,
        ContextKey::LocalBranches,
        ContextKey::Remotes,
        ContextKey::Tags,
        ContextKey::Worktrees,
        ContextKey::LocalCommits,
        ContextKey::ReflogCommits,
        ContextKey::SubCommits,
        ContextKey::Stash,
    ];

    pub const ALL: [ContextKey; 17] = [
        ContextKey::Status,
        ContextKey::Files,
        ContextKey::Submodules,
        ContextKey::LocalBranches,
        ContextKey::Remotes,
        ContextKey::Tags,
        ContextKey::Worktrees,
        ContextKey::LocalCommits,
        ContextKey::ReflogCommits,
        ContextKey::SubCommits,
        ContextKey::Stash,
        ContextKey::Main,
        ContextKey::Secondary,
        ContextKey::Confirmation,
        ContextKey::Prompt,
        ContextKey::Suggestions,
        ContextKey::Menu,
    ];

    pub fn kind(self) -> ContextKind {
        match self {
            ContextKey::Main | ContextKey::Secondary => ContextKind::Main,
            ContextKey::Confirmation
            | ContextKey::Prompt
            | ContextKey::Suggestions
            | ContextKey::Menu => ContextKind::Popup,
            _ => ContextKind::Side,
        }
    }

    /// The window (on-screen panel) this context is drawn in. Contexts that
    /// share a window are its tabs.
    pub fn window(self) -> &'static str {
        match self {
            ContextKey::Status => "status",
            ContextKey::Files | ContextKey::Submodules => "files",
            ContextKey::LocalBranches
            | ContextKey::Remotes
            | ContextKey::Tags
            | ContextKey::Worktrees => "branches",
            ContextKey::LocalCommits | ContextKey::ReflogCommits | ContextKey::SubCommits => {
                "commits"
            }
            ContextKey::Stash => "stash",
            ContextKey::Main => "main",
            ContextKey::Secondary => "secondary",
            ContextKey::Confirmation | ContextKey::Prompt | ContextKey::Menu => "popup",
            ContextKey::Suggestions => "suggestions",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            ContextKey::Status => "Status",
            ContextKey::Files => "Files",
            ContextKey::Submodules => "Submodules",
            ContextKey::LocalBranches => "Local branches",
            ContextKey::Remotes => "Remotes",
            ContextKey::Tags => "Tags",
            ContextKey::Worktrees => "Worktrees",
            ContextKey::LocalCommits => "Commits",
            ContextKey::ReflogCommits => "Reflog",
            ContextKey::SubCommits => "Sub-commits",
            ContextKey::Stash => "Stash",
            ContextKey::Main => "Main",
            ContextKey::Secondary => "Secondary",
            ContextKey::Confirmation => "Confirm",
            ContextKey::Prompt => "Prompt",
            ContextKey::Suggestions => "Suggestions",
            ContextKey::Menu => "Menu",
        }
    }

    /// Tabs shown in this context's window, in order.
    pub fn tabs(self) -> Vec<ContextKey> {
        let window = self.window();
        ContextKey::SIDE
            .iter()
            .copied()
            // Sub-commits is only reachable by drilling into a ref.
            .filter(|k| k.window() == window && *k != ContextKey::SubCommits)
            .collect()
    }
}

#[derive(Clone, Debug, Default)]
pub struct Context {
    pub selected: usize,
    /// Items in the list as of the last render; selection is clamped to it.
    pub len: usize,
}

pub struct ContextMgr {
    contexts: HashMap<ContextKey, Context>,
    stack: Vec<ContextKey>,
}

impl ContextMgr {
    pub fn new() -> Self {
        Self {
            contexts: ContextKey::ALL
                .iter()
                .map(|k| (*k, Context::default()))
                .collect(),
            stack: vec![ContextKey::Files],
        }
    }

    pub fn current(&self) -> ContextKey {
        self.stack.last().copied().unwrap_or(ContextKey::Files)
    }

    /// The side context underneath any main or popup contexts.
    pub fn current_side(&self) -> ContextKey {
        self.stack
            .iter()
            .rev()
            .copied()
            .find(|k| k.kind() == ContextKind::Side)
            .unwrap_or(ContextKey::Files)
    }

    pub fn stack(&self) -> &[ContextKey] {
        &self.stack
    }

    /// Activate `key`. A side context replaces the whole stack; a main context
    /// sits above the current side context; popups stack on top.
    pub fn push(&mut self, key: ContextKey) {
        match key.kind() {
            ContextKind::Side => self.stack = vec![key],
            ContextKind::Main => {
                let side = self.current_side();
                self.stack = vec![side, key];
            }
            ContextKind::Popup => {
                self.stack.retain(|k| *k != key);
                self.stack.push(key);
            }
        }
    }

    /// Drop the top context. The bottom side context is never popped.
    pub fn pop(&mut self) -> Option<ContextKey> {
        if self.stack.len() <= 1 {
            return None;
        }
        self.stack.pop()
    }

    /// Remove `key` wherever it is in the stack.
    pub fn remove(&mut self, key: ContextKey) {
        if self.stack.len() > 1 {
            self.stack.retain(|k| *k != key);
        }
    }

    pub fn for_key(&self, key: ContextKey) -> &Context {
        // Every key is inserted in `new`.
        &self.contexts[&key]
    }

    pub fn for_key_mut(&mut self, key: ContextKey) -> &mut Context {
        self.contexts.entry(key).or_default()
    }

    pub fn selected(&self, key: ContextKey) -> usize {
        self.for_key(key).selected
    }

    pub fn set_len(&mut self, key: ContextKey, len: usize) {
        let ctx = self.for_key_mut(key);
        ctx.len = len;
        ctx.selected = ctx.selected.min(len.saturating_sub(1));
    }

    pub fn move_selection(&mut self, key: ContextKey, delta: isize) {
        let ctx = self.for_key_mut(key);
        if ctx.len == 0 {
            ctx.selected = 0;
            return;
        }
        let max = ctx.len as isize - 1;
        ctx.selected = (ctx.selected as isize + delta).clamp(0, max) as usize;
    }

    /// Switch to the next tab in the current side window.
    pub fn next_tab(&mut self) {
        let current = self.current_side();
        let tabs = current.tabs();
        if let Some(pos) = tabs.iter().position(|k| *k == current) {
            let next = tabs[(pos + 1) % tabs.len()];
            self.push(next);
        }
    }
}

impl Default for ContextMgr {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MainViewPair {
    pub main: ContextKey,
    pub secondary: ContextKey,
}

/// The main/secondary view pair that main-view output is rendered into.
#[derive(Clone, Copy, Debug)]
pub struct MainViewPairs {
    pub normal: MainViewPair,
}

impl Default for MainViewPairs {
    fn default() -> Self {
        Self {
            normal: MainViewPair {
                main: ContextKey::Main,
                secondary: ContextKey::Secondary,
            },
        }
    }
}
