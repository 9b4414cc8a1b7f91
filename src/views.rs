//! View-facing state. Every mutation asserts that it runs on the UI thread.

use std::collections::HashMap;

use crate::{context::ContextKey, tasks::UiThreadGuard};

#[derive(Clone, Debug, Default)]
pub struct View {
    pub title: String,
    pub lines: Vec<String>,
    /// First visible line.
    pub origin: usize,
    pub cursor: usize,
    pub visible: bool,
}

pub struct Views {
    views: HashMap<ContextKey, View>,
    ui_thread: UiThreadGuard,
    needs_draw: bool,
    renders: u64,
}

impl Views {
    pub fn new(ui_thread: UiThreadGuard) -> Self {
        let views = ContextKey::ALL
            .iter()
            .map(|k| {
                let view = View {
                    title: k.title().to_string(),
                    visible: true,
                    ..View::default()
                };
                (*k, view)
            })
            .collect();
        Self {
            views,
            ui_thread,
            needs_draw: true,
            renders: 0,
        }
    }

    pub fn get(&self, key: ContextKey) -> &View {
        // Every key is inserted in `new`.
        &self.views[&key]
    }

    fn get_mut(&mut self, key: ContextKey, what: &str) -> &mut View {
        self.ui_thread.assert(what);
        self.views.entry(key).or_default()
    }

    pub fn set_view_content(&mut self, key: ContextKey, lines: Vec<String>) {
        let view = self.get_mut(key, "set_view_content");
        view.lines = lines;
        view.cursor = view.cursor.min(view.lines.len().saturating_sub(1));
        self.needs_draw = true;
    }

    pub fn append_view_content(&mut self, key: ContextKey, lines: Vec<String>) {
        self.get_mut(key, "append_view_content").lines.extend(lines);
        self.needs_draw = true;
    }

    pub fn reset_view_origin(&mut self, key: ContextKey) {
        let view = self.get_mut(key, "reset_view_origin");
        view.origin = 0;
        view.cursor = 0;
        self.needs_draw = true;
    }

    pub fn set_title(&mut self, key: ContextKey, title: impl Into<String>) {
        self.get_mut(key, "set_title").title = title.into();
        self.needs_draw = true;
    }

    pub fn set_cursor(&mut self, key: ContextKey, cursor: usize) {
        let view = self.get_mut(key, "set_cursor");
        view.cursor = cursor.min(view.lines.len().saturating_sub(1));
        self.needs_draw = true;
    }

    pub fn set_visible(&mut self, key: ContextKey, visible: bool) {
        self.get_mut(key, "set_visible").visible = visible;
        self.needs_draw = true;
    }

    /// Scroll by `delta` lines, keeping at least one line on screen.
    pub fn scroll(&mut self, key: ContextKey, delta: isize) {
        let view = self.get_mut(key, "scroll");
        let max = view.lines.len().saturating_sub(1) as isize;
        view.origin = (view.origin as isize + delta).clamp(0, max.max(0)) as usize;
        self.needs_draw = true;
    }

    /// Ask for a redraw on the next loop iteration.
    pub fn render(&mut self) {
        self.ui_thread.assert("render");
        self.needs_draw = true;
    }

    /// True once per requested redraw.
    pub fn take_needs_draw(&mut self) -> bool {
        let needs = std::mem::take(&mut self.needs_draw);
        if needs {
            self.renders += 1;
        }
        needs
    }

    /// Redraws handed out so far.
    pub fn renders(&self) -> u64 {
        self.renders
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(s: &[&str]) -> Vec<String> {
        s.iter().map(|l| l.to_string()).collect()
    }

    #[test]
    fn content_and_origin() {
        let mut views = Views::new(UiThreadGuard::current());
        views.set_view_content(ContextKey::Main, lines(&["a", "b", "c"]));
        views.scroll(ContextKey::Main, 10);
        assert_eq!(views.get(ContextKey::Main).origin, 2);
        views.append_view_content(ContextKey::Main, lines(&["d"]));
        assert_eq!(views.get(ContextKey::Main).lines.len(), 4);
        views.reset_view_origin(ContextKey::Main);
        assert_eq!(views.get(ContextKey::Main).origin, 0);
    }

    #[test]
    fn draw_requests_coalesce() {
        let mut views = Views::new(UiThreadGuard::current());
        assert!(views.take_needs_draw());
        assert!(!views.take_needs_draw());
        views.render();
        views.render();
        assert!(views.take_needs_draw());
        assert_eq!(views.renders(), 2);
    }

    #[test]
    #[should_panic(expected = "set_view_content must run on the UI thread")]
    fn mutation_off_the_ui_thread_panics() {
        let guard = std::thread::spawn(UiThreadGuard::current).join().unwrap();
        let mut views = Views::new(guard);
        views.set_view_content(ContextKey::Main, Vec::new());
    }
}
