//! Side panels, main views, command log and the status bar.

use ratatui::{
    prelude::*,
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph},
};
use unicode_width::UnicodeWidthStr;

use super::{ACCENT, DIM};
use crate::{context::ContextKey, gui::Gui};

fn panel_block(title: impl Into<Line<'static>>, focused: bool) -> Block<'static> {
    let border = if focused { ACCENT } else { DIM };
    Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border))
        .title(title)
}

/// Window title listing its tabs, with the shown one highlighted.
fn tab_title(shown: ContextKey) -> Line<'static> {
    let tabs = shown.tabs();
    if tabs.len() <= 1 {
        return Line::from(format!(" {} ", shown.title()));
    }
    let mut spans = vec![Span::raw(" ")];
    for (i, tab) in tabs.iter().enumerate() {
        if i > 0 {
            spans.push(Span::styled(" - ", Style::default().fg(DIM)));
        }
        let style = if *tab == shown {
            Style::default().fg(ACCENT).add_modifier(Modifier::BOLD)
        } else {
            Style::default()
        };
        spans.push(Span::styled(tab.title(), style));
    }
    spans.push(Span::raw(" "));
    Line::from(spans)
}

pub(super) fn render_side_panel(f: &mut Frame, gui: &Gui, key: ContextKey, focused: bool, area: Rect) {
    let view = gui.views().get(key);
    let len = view.lines.len();
    let selected = gui.contexts().selected(key);
    let title = if len > 0 && focused {
        format!("{} of {}", selected + 1, len)
    } else {
        String::new()
    };
    let block = panel_block(tab_title(key), focused)
        .title_bottom(Line::from(title).right_aligned());

    let items: Vec<ListItem> = view.lines.iter().map(|l| ListItem::new(l.as_str())).collect();
    let list = List::new(items).block(block).highlight_style(if focused {
        Style::default().bg(Color::Blue).add_modifier(Modifier::BOLD)
    } else {
        Style::default()
    });

    let mut state = ListState::default();
    if len > 0 {
        state.select(Some(selected.min(len - 1)));
    }
    f.render_stateful_widget(list, area, &mut state);
}

pub(super) fn render_main_view(f: &mut Frame, gui: &Gui, key: ContextKey, area: Rect) {
    let view = gui.views().get(key);
    let focused = gui.contexts().current() == key;
    let text: Vec<Line> = view.lines.iter().map(|l| Line::raw(l.as_str())).collect();
    let paragraph = Paragraph::new(text)
        .block(panel_block(format!(" {} ", view.title), focused))
        .scroll((view.origin.min(u16::MAX as usize) as u16, 0));
    f.render_widget(paragraph, area);
}

pub(super) fn render_command_log(f: &mut Frame, gui: &Gui, area: Rect) {
    let lines = gui.command_log_lines();
    let height = area.height.saturating_sub(2) as usize;
    let skip = lines.len().saturating_sub(height);
    let text: Vec<Line> = lines
        .into_iter()
        .skip(skip)
        .map(|l| {
            if l.starts_with("  ") {
                Line::styled(l, Style::default().fg(Color::Cyan))
            } else {
                Line::raw(l)
            }
        })
        .collect();
    f.render_widget(
        Paragraph::new(text).block(panel_block(" Command log ".to_string(), false)),
        area,
    );
}

/// Waiting status with spinner on the left, key hints on the right.
pub(super) fn render_status_bar(f: &mut Frame, gui: &Gui, area: Rect) {
    let hints = "q quit  P push  p pull  f fetch  : command  x options";
    let left = match gui.waiting().current() {
        Some(message) => Span::styled(
            format!("{} {}", message, gui.spinner()),
            Style::default().fg(Color::Cyan),
        ),
        None => Span::raw(""),
    };
    let pad = (area.width as usize)
        .saturating_sub(left.content.width())
        .saturating_sub(hints.width());
    let line = Line::from(vec![
        left,
        Span::raw(" ".repeat(pad)),
        Span::styled(hints, Style::default().fg(DIM)),
    ]);
    f.render_widget(Paragraph::new(line), area);
}
