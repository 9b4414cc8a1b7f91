//! Keyboard and mouse dispatch.
//!
//! Popups take every key while showing. Otherwise keys go to the global
//! bindings, some of which depend on the focused side context.

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseEvent, MouseEventKind};

use crate::{
    context::ContextKey,
    controllers,
    error::ErrorOrigin,
    gui::Gui,
    popup::Resolution,
    refresh::RefreshOptions,
    tasks::UiState,
};

/// Result of handling a key event.
pub enum KeyEventResult {
    /// Continue the event loop normally
    Continue,
    /// Should quit the application
    Quit,
}

/// Handle a key press event. Errors are presented, never returned.
pub fn handle_key_event(gui: &mut Gui, key: KeyEvent) -> KeyEventResult {
    let result = if gui.popups().is_showing() {
        handle_popup_key(gui, key)
    } else {
        handle_global_key(gui, key)
    };
    if let Err(e) = result {
        gui.handle_error(e, ErrorOrigin::UiThread);
    }
    gui.sync_popup_context();

    if gui.should_quit() {
        KeyEventResult::Quit
    } else {
        KeyEventResult::Continue
    }
}

fn is_menu(gui: &Gui) -> bool {
    gui.popups().current_key() == Some(ContextKey::Menu)
}

fn handle_popup_key(gui: &mut Gui, key: KeyEvent) -> anyhow::Result<()> {
    let popups = gui.popups().clone();
    match key.code {
        KeyCode::Enter => popups.resolve(Resolution::Confirm),
        KeyCode::Esc => popups.resolve(Resolution::Close),
        KeyCode::Tab => popups.accept_suggestion(),
        KeyCode::Up if is_menu(gui) => {
            popups.move_menu_selection(-1);
            Ok(())
        }
        KeyCode::Down if is_menu(gui) => {
            popups.move_menu_selection(1);
            Ok(())
        }
        KeyCode::Up => {
            popups.select_prev_suggestion();
            Ok(())
        }
        KeyCode::Down => {
            popups.select_next_suggestion();
            Ok(())
        }
        KeyCode::Backspace => {
            popups.backspace();
            Ok(())
        }
        KeyCode::Char('d') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            popups.delete_suggestion()
        }
        KeyCode::Char(c) if is_menu(gui) => {
            if popups.press_key(c)? {
                return Ok(());
            }
            match c {
                'j' => popups.move_menu_selection(1),
                'k' => popups.move_menu_selection(-1),
                _ => {}
            }
            Ok(())
        }
        KeyCode::Char(c) => {
            popups.type_char(c);
            Ok(())
        }
        _ => Ok(()),
    }
}

fn handle_global_key(gui: &mut Gui, key: KeyEvent) -> anyhow::Result<()> {
    let side = gui.contexts().current_side();
    match key.code {
        KeyCode::Char('q') => {
            gui.request_quit();
            Ok(())
        }
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            gui.request_quit();
            Ok(())
        }
        KeyCode::Tab | KeyCode::Char(']') => gui.next_tab(),
        KeyCode::Char(c @ '1'..='5') => {
            let target = match c {
                '1' => ContextKey::Status,
                '2' => ContextKey::Files,
                '3' => ContextKey::LocalBranches,
                '4' => ContextKey::LocalCommits,
                _ => ContextKey::Stash,
            };
            gui.push_context(target)
        }
        KeyCode::Char('j') | KeyCode::Down => gui.move_selection(1),
        KeyCode::Char('k') | KeyCode::Up => gui.move_selection(-1),
        KeyCode::Char('+') => {
            gui.set_screen_mode(gui.screen_mode().next());
            Ok(())
        }
        KeyCode::Char('_') => {
            gui.set_screen_mode(gui.screen_mode().prev());
            Ok(())
        }
        KeyCode::Char('@') => {
            gui.toggle_command_log();
            Ok(())
        }
        KeyCode::Char('P') => controllers::push(gui),
        KeyCode::Char('p') => controllers::pull(gui),
        KeyCode::Char('f') if side == ContextKey::LocalBranches => controllers::fast_forward(gui),
        KeyCode::Char('f') if side == ContextKey::Remotes => controllers::fetch_remote(gui),
        KeyCode::Char('f') => controllers::fetch(gui),
        KeyCode::Char('d') if side == ContextKey::LocalBranches => controllers::delete_branch(gui),
        KeyCode::Char(' ') if side == ContextKey::LocalBranches => controllers::checkout(gui),
        KeyCode::Char(' ') if side == ContextKey::Files => controllers::toggle_staged(gui),
        KeyCode::Char('n') => controllers::new_branch(gui),
        KeyCode::Char(':') => controllers::custom_command(gui),
        KeyCode::Char('e') if side == ContextKey::Files => controllers::edit_file(gui),
        KeyCode::Char('i') => controllers::ignore_file(gui),
        KeyCode::Char('F') => controllers::toggle_reflog_filter(gui),
        KeyCode::Char('R') => {
            gui.log().log_action("Refresh");
            gui.refresher().refresh(RefreshOptions::all())
        }
        KeyCode::Char('x') | KeyCode::Char('?') => controllers::options_menu(gui),
        _ => Ok(()),
    }
}

/// Result of handling a mouse event.
pub enum MouseEventResult {
    Continue,
}

/// Scrolling moves the selection, or the menu selection while a menu shows.
pub fn handle_mouse_event(gui: &mut Gui, mouse: MouseEvent) -> MouseEventResult {
    let delta = match mouse.kind {
        MouseEventKind::ScrollDown => 1,
        MouseEventKind::ScrollUp => -1,
        _ => return MouseEventResult::Continue,
    };
    if gui.popups().is_showing() {
        if is_menu(gui) {
            gui.popups().move_menu_selection(delta);
        }
    } else if let Err(e) = gui.move_selection(delta) {
        gui.handle_error(e, ErrorOrigin::UiThread);
    }
    MouseEventResult::Continue
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        gui::tests::{Harness, harness},
        refresh::tests::FakeRepo,
        screen::ScreenMode,
    };
    use crossterm::event::KeyEventKind;

    fn started() -> Harness {
        let mut repo = FakeRepo::with_files(&["a.go", "b.go"]);
        *repo.branches.get_mut() = vec!["main".into(), "topic".into()];
        let mut h = harness(repo);
        h.gui.start().unwrap();
        h.settle();
        h
    }

    fn press(h: &mut Harness, code: KeyCode) -> KeyEventResult {
        let key = KeyEvent::new_with_kind(code, KeyModifiers::NONE, KeyEventKind::Press);
        handle_key_event(&mut h.gui, key)
    }

    fn typed(h: &mut Harness, text: &str) {
        for c in text.chars() {
            press(h, KeyCode::Char(c));
        }
    }

    #[test]
    fn quit_key_ends_the_loop() {
        let mut h = started();
        assert!(matches!(press(&mut h, KeyCode::Char('j')), KeyEventResult::Continue));
        assert!(matches!(press(&mut h, KeyCode::Char('q')), KeyEventResult::Quit));
    }

    #[test]
    fn popups_capture_keys_until_closed() {
        let mut h = started();
        press(&mut h, KeyCode::Char(':'));
        assert_eq!(h.gui.contexts().current(), ContextKey::Prompt);

        // 'q' is typed into the prompt, not a quit.
        assert!(matches!(press(&mut h, KeyCode::Char('q')), KeyEventResult::Continue));
        assert_eq!(h.gui.popups().input().as_deref(), Some("q"));
        press(&mut h, KeyCode::Backspace);
        assert_eq!(h.gui.popups().input().as_deref(), Some(""));

        press(&mut h, KeyCode::Esc);
        assert!(!h.gui.popups().is_showing());
        assert_eq!(h.gui.contexts().current(), ContextKey::Files);
    }

    #[test]
    fn disabled_menu_items_are_toasted() {
        let mut h = started();
        press(&mut h, KeyCode::Char('3'));
        assert_eq!(h.gui.contexts().current_side(), ContextKey::LocalBranches);

        press(&mut h, KeyCode::Char('d'));
        assert_eq!(h.gui.contexts().current(), ContextKey::Menu);
        press(&mut h, KeyCode::Char('c'));

        assert!(h.gui.popups().is_showing());
        assert_eq!(
            h.error_toasts(),
            vec!["You cannot delete the checked out branch!"]
        );
    }

    #[test]
    fn menu_keys_fall_back_to_navigation() {
        let mut h = started();
        press(&mut h, KeyCode::Char('x'));
        press(&mut h, KeyCode::Char('j'));
        press(&mut h, KeyCode::Char('j'));
        assert_eq!(h.gui.popups().view().unwrap().selected_item, 2);
        press(&mut h, KeyCode::Enter);
        h.settle();
        assert_eq!(h.gui.screen_mode(), ScreenMode::Full);
        assert_eq!(h.gui.contexts().current(), ContextKey::Files);
    }

    #[test]
    fn screen_mode_cycles_both_ways() {
        let mut h = started();
        press(&mut h, KeyCode::Char('+'));
        assert_eq!(h.gui.screen_mode(), ScreenMode::Half);
        press(&mut h, KeyCode::Char('_'));
        press(&mut h, KeyCode::Char('_'));
        assert_eq!(h.gui.screen_mode(), ScreenMode::Full);
        assert_eq!(h.gui.app_state().get().last_screen_mode, ScreenMode::Full);
    }

    #[test]
    fn new_branch_validation_keeps_the_prompt_open() {
        let mut h = started();
        press(&mut h, KeyCode::Char('n'));
        press(&mut h, KeyCode::Enter);
        let view = h.gui.popups().view().unwrap();
        assert_eq!(view.error.as_deref(), Some("Branch name cannot be empty"));

        typed(&mut h, "feature");
        assert_eq!(h.gui.popups().view().unwrap().error, None);
    }

    #[test]
    fn selection_follows_keys_and_scroll() {
        let mut h = started();
        press(&mut h, KeyCode::Down);
        assert_eq!(h.gui.contexts().selected(ContextKey::Files), 1);
        handle_mouse_event(
            &mut h.gui,
            MouseEvent {
                kind: MouseEventKind::ScrollUp,
                column: 0,
                row: 0,
                modifiers: KeyModifiers::NONE,
            },
        );
        assert_eq!(h.gui.contexts().selected(ContextKey::Files), 0);
    }
}
