use crate::app::ViewState;
use crate::core::PlayerCore;
use crate::model::PersistedState;
use crate::playlist;
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap};
use std::time::Instant;

const APP_TITLE_WITH_VERSION: &str = "cadre v0.1.0  ";
const KEY_HINT: &str =
    "Space pause, n/p next/prev, arrows seek, Enter play, Del remove, s shuffle, r repeat, : command, q quit";

struct Palette {
    bg: Color,
    panel_bg: Color,
    panel_alt_bg: Color,
    border: Color,
    text: Color,
    muted: Color,
    accent: Color,
    alert: Color,
    selected_bg: Color,
    chapter: Color,
}

const COLORS: Palette = Palette {
    bg: Color::Rgb(10, 15, 24),
    panel_bg: Color::Rgb(19, 29, 43),
    panel_alt_bg: Color::Rgb(24, 38, 58),
    border: Color::Rgb(69, 121, 176),
    text: Color::Rgb(214, 228, 248),
    muted: Color::Rgb(149, 173, 204),
    accent: Color::Rgb(100, 203, 184),
    alert: Color::Rgb(249, 174, 88),
    selected_bg: Color::Rgb(34, 55, 82),
    chapter: Color::Rgb(255, 122, 165),
};

/// Screen areas the mouse handler needs between frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct Regions {
    pub playlist: Rect,
    pub timeline: Rect,
}

fn split(area: Rect) -> (Rect, Rect, Rect, Rect, Rect) {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(3),
            Constraint::Length(3),
        ])
        .split(area);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(66), Constraint::Percentage(34)])
        .split(vertical[1]);

    (vertical[0], body[0], body[1], vertical[2], vertical[3])
}

pub fn regions(area: Rect) -> Regions {
    let (_, playlist, _, timeline, _) = split(area);
    Regions { playlist, timeline }
}

pub fn draw(
    frame: &mut Frame,
    view: &ViewState,
    core: &PlayerCore,
    state: &PersistedState,
    now: Instant,
) {
    frame.render_widget(
        Block::default().style(Style::default().bg(COLORS.bg)),
        frame.area(),
    );
    let (header_area, playlist_area, info_area, timeline_area, footer_area) = split(frame.area());

    let volume = if state.muted {
        String::from("Muted")
    } else {
        format!("Vol {}%", state.volume)
    };
    let header = Paragraph::new(Line::from(vec![
        Span::styled(
            APP_TITLE_WITH_VERSION,
            Style::default()
                .fg(COLORS.accent)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(format!("Items {}", core.len()), Style::default().fg(COLORS.text)),
        Span::styled("  |  ", Style::default().fg(COLORS.muted)),
        Span::styled(
            if core.shuffle.enabled { "Shuffle On" } else { "Shuffle Off" },
            Style::default().fg(COLORS.alert),
        ),
        Span::styled("  |  ", Style::default().fg(COLORS.muted)),
        Span::styled(core.repeat_mode.label(), Style::default().fg(COLORS.alert)),
        Span::styled("  |  ", Style::default().fg(COLORS.muted)),
        Span::styled(volume, Style::default().fg(COLORS.text)),
        Span::styled("  |  ", Style::default().fg(COLORS.muted)),
        Span::styled(state.stream_quality.label(), Style::default().fg(COLORS.muted)),
    ]))
    .block(panel_block("Status", COLORS.panel_bg, COLORS.text, COLORS.border));
    frame.render_widget(header, header_area);

    let items: Vec<ListItem> = core
        .playlist
        .iter()
        .enumerate()
        .map(|(idx, media)| {
            let playing = core.current_index == Some(idx) && !view.idle;
            let marker = if playing { "  > " } else { "    " };
            let name_style = if playing {
                Style::default().fg(COLORS.accent)
            } else {
                Style::default().fg(COLORS.text)
            };
            ListItem::new(Line::from(vec![
                Span::styled(marker, Style::default().fg(COLORS.muted)),
                Span::styled(
                    format!("{:>8}  ", playlist::format_duration(core.duration_of(media))),
                    Style::default().fg(COLORS.muted),
                ),
                Span::styled(playlist::display_name(media), name_style),
            ]))
        })
        .collect();

    let mut list_state = ListState::default();
    list_state.select((!core.is_empty()).then_some(view.selected.min(core.len().saturating_sub(1))));
    let list = List::new(items)
        .block(panel_block("Playlist", COLORS.panel_bg, COLORS.text, COLORS.border))
        .highlight_style(
            Style::default()
                .bg(COLORS.selected_bg)
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("-> ");
    frame.render_stateful_widget(list, playlist_area, &mut list_state);

    let transport = if view.idle {
        "Idle"
    } else if view.playing {
        "Playing"
    } else {
        "Paused"
    };
    let size = view
        .video_size
        .map_or_else(|| String::from("-"), |(w, h)| format!("{w}x{h}"));
    let preview = view
        .thumbnail
        .as_ref()
        .and_then(|path| path.file_name())
        .map_or_else(|| String::from("-"), |name| name.to_string_lossy().into_owned());
    let info_text = vec![
        Line::from(vec![
            Span::styled(
                "Now",
                Style::default()
                    .fg(COLORS.accent)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(format!("  {}", view.title), Style::default().fg(COLORS.text)),
        ]),
        Line::from(Span::styled(
            format!("State    {transport}"),
            Style::default().fg(COLORS.alert),
        )),
        Line::from(Span::styled(
            format!("Size     {size}"),
            Style::default().fg(COLORS.muted),
        )),
        Line::from(Span::styled(
            format!("Chapters {}", view.chapters.len()),
            Style::default().fg(COLORS.muted),
        )),
        Line::from(Span::styled(
            format!("Preview  {preview}"),
            Style::default().fg(COLORS.muted),
        )),
    ];
    let info = Paragraph::new(info_text)
        .block(panel_block("Now Playing", COLORS.panel_alt_bg, COLORS.text, COLORS.border))
        .wrap(Wrap { trim: true });
    frame.render_widget(info, info_area);

    let timeline_title = format!(
        "{} / {}",
        playlist::format_duration(Some(view.position)),
        playlist::format_duration((view.duration > 0.0).then_some(view.duration)),
    );
    let bar_width = usize::from(timeline_area.width.saturating_sub(2));
    let bar = timeline_bar(view.position, view.duration, &view.chapters, bar_width);
    let spans: Vec<Span> = bar
        .chars()
        .map(|ch| {
            let color = match ch {
                '|' => COLORS.chapter,
                '#' => COLORS.accent,
                _ => COLORS.muted,
            };
            Span::styled(ch.to_string(), Style::default().fg(color))
        })
        .collect();
    let timeline = Paragraph::new(Line::from(spans)).block(panel_block(
        &timeline_title,
        COLORS.panel_bg,
        COLORS.text,
        COLORS.border,
    ));
    frame.render_widget(timeline, timeline_area);

    let footer_line = if view.command_mode {
        Line::from(vec![
            Span::styled(":", Style::default().fg(COLORS.accent)),
            Span::styled(view.command_buffer.as_str(), Style::default().fg(COLORS.text)),
        ])
    } else if let Some(status) = view.status_text(now) {
        Line::from(Span::styled(status, Style::default().fg(COLORS.text)))
    } else {
        Line::from(Span::styled(KEY_HINT, Style::default().fg(COLORS.muted)))
    };
    let footer = Paragraph::new(footer_line).block(panel_block(
        "Message",
        COLORS.panel_bg,
        COLORS.text,
        COLORS.border,
    ));
    frame.render_widget(footer, footer_area);
}

fn panel_block(title: &str, bg: Color, text: Color, border: Color) -> Block<'_> {
    Block::default()
        .borders(Borders::ALL)
        .title(Span::styled(
            format!(" {title} "),
            Style::default().fg(text).add_modifier(Modifier::BOLD),
        ))
        .border_style(Style::default().fg(border))
        .style(Style::default().bg(bg))
}

fn column_of(seconds: f64, duration: f64, width: usize) -> usize {
    let ratio = (seconds / duration).clamp(0.0, 1.0);
    ((ratio * (width - 1) as f64).round() as usize).min(width - 1)
}

/// Progress bar `width` cells wide with chapter starts marked as `|`.
pub fn timeline_bar(position: f64, duration: f64, chapters: &[f64], width: usize) -> String {
    if width == 0 {
        return String::new();
    }
    let mut cells = vec!['-'; width];
    if duration > 0.0 && position.is_finite() {
        let filled = ((position / duration).clamp(0.0, 1.0) * width as f64).round() as usize;
        for cell in cells.iter_mut().take(filled) {
            *cell = '#';
        }
        for chapter in chapters.iter().filter(|start| **start > 0.0 && **start < duration) {
            cells[column_of(*chapter, duration, width)] = '|';
        }
    }
    cells.into_iter().collect()
}

/// Media time under `column` when the timeline panel occupies `rect`.
pub fn seconds_at(column: u16, rect: Rect, duration: f64) -> Option<f64> {
    if duration <= 0.0 || rect.width < 3 {
        return None;
    }
    let start = rect.x.saturating_add(1);
    let width = rect.width - 2;
    let offset = column.checked_sub(start)?.min(width - 1);
    let ratio = if width == 1 {
        0.0
    } else {
        f64::from(offset) / f64::from(width - 1)
    };
    Some(ratio * duration)
}
