//! Terminal rendering.
//!
//! Drawing only reads the [`Gui`]; the one side effect is telling the main
//! view buffers how big their area is.

mod panels;
mod popup;

use ratatui::prelude::*;

use crate::{context::ContextKey, gui::Gui};

/// One side window per entry; the focused tab of a window replaces its default.
const SIDE_WINDOWS: [ContextKey; 5] = [
    ContextKey::Status,
    ContextKey::Files,
    ContextKey::LocalBranches,
    ContextKey::LocalCommits,
    ContextKey::Stash,
];

const ACCENT: Color = Color::Green;
const DIM: Color = Color::DarkGray;
const ERROR: Color = Color::Red;

pub fn draw(f: &mut Frame, gui: &Gui) {
    let area = f.area();
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(3), Constraint::Length(1)])
        .split(area);

    let side_percent = gui.screen_mode().side_width_percent();
    let columns = if side_percent >= 100 {
        vec![rows[0]]
    } else {
        Layout::default()
            .direction(Direction::Horizontal)
            .constraints([
                Constraint::Percentage(side_percent),
                Constraint::Percentage(100 - side_percent),
            ])
            .split(rows[0])
            .to_vec()
    };

    draw_side(f, gui, columns[0]);
    if let Some(main_area) = columns.get(1) {
        draw_main(f, gui, *main_area);
    }
    panels::render_status_bar(f, gui, rows[1]);
    popup::render_toasts(f, gui, rows[0]);
    if let Some(view) = gui.popups().view() {
        popup::render_popup(f, &view, area);
    }
}

/// The context shown in the window `default` belongs to.
fn shown_in_window(gui: &Gui, default: ContextKey) -> ContextKey {
    let side = gui.contexts().current_side();
    if side.window() == default.window() {
        side
    } else {
        default
    }
}

fn draw_side(f: &mut Frame, gui: &Gui, area: Rect) {
    let side = gui.contexts().current_side();
    // Status is a single line; the focused window gets the most room.
    let constraints: Vec<Constraint> = SIDE_WINDOWS
        .iter()
        .map(|k| match k {
            ContextKey::Status => Constraint::Length(3),
            k if k.window() == side.window() => Constraint::Fill(3),
            _ => Constraint::Fill(1),
        })
        .collect();
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints(constraints)
        .split(area);

    for (default, chunk) in SIDE_WINDOWS.iter().zip(chunks.iter()) {
        let key = shown_in_window(gui, *default);
        panels::render_side_panel(f, gui, key, key == side, *chunk);
    }
}

fn draw_main(f: &mut Frame, gui: &Gui, area: Rect) {
    let pair = gui.main_views().normal;
    let secondary_visible = gui.views().get(pair.secondary).visible;
    let log_visible = gui.command_log_visible();

    let mut constraints = vec![Constraint::Fill(3)];
    if secondary_visible {
        constraints.push(Constraint::Fill(2));
    }
    if log_visible {
        constraints.push(Constraint::Length(8));
    }
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints(constraints)
        .split(area);

    // Borders take two rows and two columns.
    gui.set_main_view_size(
        chunks[0].height.saturating_sub(2),
        chunks[0].width.saturating_sub(2),
    );
    panels::render_main_view(f, gui, pair.main, chunks[0]);
    let mut next = 1;
    if secondary_visible {
        panels::render_main_view(f, gui, pair.secondary, chunks[next]);
        next += 1;
    }
    if log_visible {
        panels::render_command_log(f, gui, chunks[next]);
    }
}
