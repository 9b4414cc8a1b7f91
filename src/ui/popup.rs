//! Popup overlay and toasts.

use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap},
};
use unicode_width::UnicodeWidthStr;

use super::{ACCENT, DIM, ERROR};
use crate::{context::ContextKey, gui::Gui, popup::PopupView};

const MAX_TOASTS: usize = 3;

fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let w = width.min(area.width);
    let h = height.min(area.height);
    let x = area.x + (area.width.saturating_sub(w)) / 2;
    let y = area.y + (area.height.saturating_sub(h)) / 2;
    Rect::new(x, y, w, h)
}

pub(super) fn render_popup(f: &mut Frame, view: &PopupView, area: Rect) {
    let w = area.width.min(80).saturating_sub(2).max(40);
    let body_rows = match view.key {
        ContextKey::Menu => view.items.len() as u16 + 1,
        ContextKey::Prompt => 1 + view.suggestions.len().min(8) as u16,
        _ => 4,
    };
    let h = (body_rows + 3 + u16::from(view.error.is_some())).max(5);
    let modal = centered(area, w, h);

    f.render_widget(Clear, modal);
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(ACCENT))
        .title(format!(" {} ", view.title));
    let inner = block.inner(modal);
    f.render_widget(block, modal);

    let mut constraints = Vec::new();
    if view.prompt.is_some() {
        constraints.push(Constraint::Min(1));
    }
    match view.key {
        ContextKey::Prompt => {
            constraints.push(Constraint::Length(1));
            constraints.push(Constraint::Min(0));
        }
        ContextKey::Menu => constraints.push(Constraint::Min(1)),
        _ => {}
    }
    if view.error.is_some() {
        constraints.push(Constraint::Length(1));
    }
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints(constraints)
        .split(inner);
    let mut next = 0;

    if let Some(prompt) = &view.prompt {
        f.render_widget(
            Paragraph::new(prompt.as_str()).wrap(Wrap { trim: false }),
            rows[next],
        );
        next += 1;
    }

    match view.key {
        ContextKey::Prompt => {
            let input = rows[next];
            f.render_widget(Paragraph::new(view.input.as_str()), input);
            let cursor_x = input.x + (view.input.width() as u16).min(input.width.saturating_sub(1));
            f.set_cursor_position((cursor_x, input.y));
            render_list(f, &view.suggestions, view.selected_suggestion, rows[next + 1]);
            next += 2;
        }
        ContextKey::Menu => {
            render_menu(f, view, rows[next]);
            next += 1;
        }
        _ => {}
    }

    if let Some(error) = &view.error {
        f.render_widget(
            Paragraph::new(error.as_str()).style(Style::default().fg(ERROR)),
            rows[next],
        );
    }
}

fn render_list(f: &mut Frame, items: &[String], selected: Option<usize>, area: Rect) {
    if items.is_empty() || area.height == 0 {
        return;
    }
    let list = List::new(items.iter().map(|s| ListItem::new(s.as_str())))
        .highlight_style(Style::default().bg(Color::Blue))
        .highlight_symbol("▶ ");
    let mut state = ListState::default();
    state.select(selected);
    f.render_stateful_widget(list, area, &mut state);
}

fn render_menu(f: &mut Frame, view: &PopupView, area: Rect) {
    let mut section: Option<&str> = None;
    let mut items = Vec::new();
    let mut selected_row = 0;
    for (i, item) in view.items.iter().enumerate() {
        if item.section.as_deref() != section && item.section.is_some() {
            section = item.section.as_deref();
            items.push(ListItem::new(Line::styled(
                format!("--- {} ---", section.unwrap_or_default()),
                Style::default().fg(DIM),
            )));
        }
        if i == view.selected_item {
            selected_row = items.len();
        }
        let key = item.key.map(|k| format!("{} ", k)).unwrap_or_else(|| "  ".into());
        let style = if item.disabled.is_some() {
            Style::default().fg(DIM)
        } else {
            Style::default()
        };
        items.push(ListItem::new(Line::from(vec![
            Span::styled(key, Style::default().fg(Color::Cyan)),
            Span::styled(item.label.clone(), style),
        ])));
    }

    let tooltip = view
        .items
        .get(view.selected_item)
        .and_then(|i| i.disabled.clone().or_else(|| i.tooltip.clone()));
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(1), Constraint::Length(u16::from(tooltip.is_some()))])
        .split(area);

    let list = List::new(items)
        .highlight_style(Style::default().bg(Color::Blue).add_modifier(Modifier::BOLD));
    let mut state = ListState::default();
    state.select(Some(selected_row));
    f.render_stateful_widget(list, chunks[0], &mut state);

    if let Some(tooltip) = tooltip {
        f.render_widget(
            Paragraph::new(tooltip).style(Style::default().fg(DIM)),
            chunks[1],
        );
    }
}

/// Newest toasts in the bottom-right corner of `area`.
pub(super) fn render_toasts(f: &mut Frame, gui: &Gui, area: Rect) {
    let toasts = gui.toast_lines();
    let shown = &toasts[toasts.len().saturating_sub(MAX_TOASTS)..];
    let mut y = area.bottom();
    for (message, is_error) in shown.iter().rev() {
        let w = (message.width() as u16 + 4).min(area.width);
        if y < area.y + 3 {
            break;
        }
        y -= 3;
        let rect = Rect::new(area.right().saturating_sub(w), y, w, 3);
        let color = if *is_error { ERROR } else { ACCENT };
        f.render_widget(Clear, rect);
        f.render_widget(
            Paragraph::new(message.as_str()).block(
                Block::default()
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(color)),
            ),
            rect,
        );
    }
}
