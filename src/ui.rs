use ratatui::{
    Frame,
    layout::{Constraint, Layout, Margin, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, BorderType, Borders, Paragraph, Scrollbar, ScrollbarOrientation, ScrollbarState},
};
use unicode_width::UnicodeWidthChar;
use crate::app::{App, ASSISTANT_FG, USER_FG};
use crate::tui::WINDOW_TITLE;

// Palette of the desktop client
const WINDOW_BG: Color = Color::Rgb(28, 28, 30);
const PANEL_BG: Color = Color::Rgb(44, 44, 46);
const BORDER: Color = Color::Rgb(58, 58, 60);
const TEXT: Color = Color::Rgb(242, 242, 247);
const MUTED: Color = Color::Rgb(84, 84, 88);

const INPUT_PLACEHOLDER: &str = "What shall we talk about today...";

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();
    frame.render_widget(Block::default().style(Style::default().bg(WINDOW_BG).fg(TEXT)), area);

    // Main layout: title, conversation, input, key hints
    let [header_area, display_area, input_row, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(3),
        Constraint::Length(3),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(frame, header_area);
    render_display(app, frame, display_area);
    render_input(app, frame, input_row);
    render_footer(app, frame, footer_area);
}

fn render_header(frame: &mut Frame, area: Rect) {
    let title = Line::from(vec![
        Span::styled(format!(" {} ", WINDOW_TITLE), Style::default().fg(TEXT).bold()),
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(MUTED),
        ),
    ]);

    frame.render_widget(Paragraph::new(title).style(Style::default().bg(WINDOW_BG)), area);
}

fn render_display(app: &mut App, frame: &mut Frame, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(BORDER))
        .style(Style::default().bg(PANEL_BG));

    // Rows are laid out at the inner width; the scrollbar sits on the border
    let height = area.height.saturating_sub(2);
    app.set_display_size(area.width.saturating_sub(2), height);

    // Only the visible window of rows is handed to the paragraph
    let mut lines: Vec<Line> = app
        .display_rows()
        .iter()
        .skip(app.scroll as usize)
        .take(height as usize)
        .cloned()
        .collect();
    if app.is_streaming() && lines.len() < height as usize {
        // Animated ellipsis: cycles through ".", "..", "..."
        let dots = ".".repeat((app.animation_frame as usize) + 1);
        lines.push(Line::from(Span::styled(
            dots,
            Style::default().fg(ASSISTANT_FG).add_modifier(Modifier::BOLD),
        )));
    }
    let total_lines = app.total_display_lines();

    let text = if app.display.is_empty() && !app.is_streaming() {
        Text::from(Span::styled(
            "Type a message below and press Enter.",
            Style::default().fg(MUTED).add_modifier(Modifier::ITALIC),
        ))
    } else {
        Text::from(lines)
    };

    let paragraph = Paragraph::new(text).block(block);
    frame.render_widget(paragraph, area);

    if total_lines > app.display_height {
        let scrollbar = Scrollbar::new(ScrollbarOrientation::VerticalRight)
            .begin_symbol(None)
            .end_symbol(None)
            .track_style(Style::default().fg(PANEL_BG))
            .thumb_style(Style::default().fg(MUTED));

        let mut scrollbar_state = ScrollbarState::new(
            total_lines.saturating_sub(app.display_height) as usize,
        )
        .position(app.scroll as usize);

        frame.render_stateful_widget(
            scrollbar,
            area.inner(Margin {
                vertical: 1,
                horizontal: 0,
            }),
            &mut scrollbar_state,
        );
    }
}

fn render_input(app: &App, frame: &mut Frame, area: Rect) {
    let [input_area, button_area] = Layout::horizontal([
        Constraint::Min(10),
        Constraint::Length(11),
    ])
    .areas(area);

    let input_block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(if app.submit_enabled { USER_FG } else { BORDER }))
        .style(Style::default().bg(PANEL_BG));

    // Inner width = total width - 2 (for borders)
    let inner_width = input_area.width.saturating_sub(2) as usize;
    let (visible_text, cursor_x) = input_window(&app.input, app.cursor, inner_width);

    let input = if app.input.is_empty() {
        Paragraph::new(Span::styled(INPUT_PLACEHOLDER, Style::default().fg(MUTED)))
    } else {
        Paragraph::new(visible_text).style(Style::default().fg(TEXT))
    };
    frame.render_widget(input.block(input_block), input_area);

    frame.set_cursor_position((input_area.x + cursor_x + 1, input_area.y + 1));

    // The send control: greyed out while a response streams in
    let (label, button_style) = if app.submit_enabled {
        ("Send", Style::default().bg(USER_FG).fg(Color::White).bold())
    } else {
        ("Sending", Style::default().bg(MUTED).fg(TEXT))
    };
    let button = Paragraph::new(Line::from(label).centered())
        .style(button_style)
        .block(Block::default().borders(Borders::ALL).border_type(BorderType::Rounded));
    frame.render_widget(button, button_area);
}

/// The slice of `input` shown in a box `width` columns wide, scrolled so
/// the cursor (a char index) stays visible, plus the cursor's column in it.
fn input_window(input: &str, cursor: usize, width: usize) -> (String, u16) {
    let char_width = |c: char| c.width().unwrap_or(0);
    let cursor_col: usize = input.chars().take(cursor).map(char_width).sum();

    // Drop leading chars until the cursor cell fits
    let mut skipped_chars = 0;
    let mut skipped_cols = 0;
    for c in input.chars() {
        if width == 0 || cursor_col - skipped_cols < width {
            break;
        }
        skipped_chars += 1;
        skipped_cols += char_width(c);
    }

    let mut used = 0;
    let visible: String = input
        .chars()
        .skip(skipped_chars)
        .take_while(|c| {
            used += char_width(*c);
            used <= width
        })
        .collect();

    let cursor_x = (cursor_col - skipped_cols).min(width.saturating_sub(1));
    (visible, cursor_x as u16)
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let mut spans = vec![
        Span::styled(" Enter ", Style::default().fg(TEXT).bold()),
        Span::styled("send  ", Style::default().fg(MUTED)),
        Span::styled("PgUp/PgDn ", Style::default().fg(TEXT).bold()),
        Span::styled("scroll  ", Style::default().fg(MUTED)),
        Span::styled("Ctrl+L ", Style::default().fg(TEXT).bold()),
        Span::styled("clear  ", Style::default().fg(MUTED)),
        Span::styled("Esc ", Style::default().fg(TEXT).bold()),
        Span::styled("quit", Style::default().fg(MUTED)),
    ];

    if !app.follow {
        spans.push(Span::styled(
            "  ↓ more below",
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        ));
    }

    frame.render_widget(Paragraph::new(Line::from(spans)).style(Style::default().bg(WINDOW_BG)), area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use ratatui::{backend::TestBackend, Terminal};

    fn screen_text(terminal: &Terminal<TestBackend>) -> String {
        let buffer = terminal.backend().buffer();
        let width = buffer.area.width as usize;
        let mut out = String::new();
        for row in buffer.content().chunks(width) {
            for cell in row {
                out.push_str(cell.symbol());
            }
            out.push('\n');
        }
        out
    }

    #[test]
    fn test_render_conversation() {
        let mut terminal = Terminal::new(TestBackend::new(80, 20)).unwrap();
        let mut app = App::new(Config::default());
        for c in "Hello".chars() {
            app.insert_char(c);
        }
        app.submit();
        app.on_chunk("**Hi** there");

        terminal.draw(|frame| render(&mut app, frame)).unwrap();
        let screen = screen_text(&terminal);

        assert!(screen.contains(WINDOW_TITLE));
        assert!(screen.contains("You: Hello"));
        assert!(screen.contains("AI:"));
        assert!(screen.contains("Hi there"));
        assert!(screen.contains("Sending"));
        assert!(screen.contains(INPUT_PLACEHOLDER));
    }

    #[test]
    fn test_render_error_and_enabled_send() {
        let mut terminal = Terminal::new(TestBackend::new(80, 20)).unwrap();
        let mut app = App::new(Config::default());
        for c in "Hello".chars() {
            app.insert_char(c);
        }
        app.submit();
        app.on_failed("Connection refused");
        app.on_done();

        terminal.draw(|frame| render(&mut app, frame)).unwrap();
        let screen = screen_text(&terminal);

        assert!(screen.contains("AI error: Connection refused"));
        assert!(screen.contains("Send"));
        assert!(!screen.contains("Sending"));
    }

    #[test]
    fn test_render_tiny_terminal_does_not_panic() {
        let mut terminal = Terminal::new(TestBackend::new(8, 4)).unwrap();
        let mut app = App::new(Config::default());
        for c in "a long line of input text".chars() {
            app.insert_char(c);
        }
        terminal.draw(|frame| render(&mut app, frame)).unwrap();
    }

    #[test]
    fn test_narrow_terminal_shows_newest_chunk() {
        let mut terminal = Terminal::new(TestBackend::new(40, 20)).unwrap();
        let mut app = App::new(Config::default());
        for c in "Hello".chars() {
            app.insert_char(c);
        }
        app.submit();

        let word = "a".repeat(19);
        for _ in 0..8 {
            app.on_chunk(&format!("{word} {word} {word}"));
            terminal.draw(|frame| render(&mut app, frame)).unwrap();
        }
        app.on_chunk("LASTCHUNK");
        terminal.draw(|frame| render(&mut app, frame)).unwrap();

        assert!(app.follow);
        assert!(screen_text(&terminal).contains("LASTCHUNK"));
    }

    #[test]
    fn test_input_window_measures_columns() {
        // Two columns per character
        assert_eq!(input_window("你好你好", 4, 38), ("你好你好".to_string(), 8));
        assert_eq!(input_window("hello", 2, 38), ("hello".to_string(), 2));
    }

    #[test]
    fn test_input_window_scrolls_wide_text_to_cursor() {
        let input = "你".repeat(10);
        let (visible, cursor_x) = input_window(&input, 10, 8);
        assert_eq!(visible, "你".repeat(3));
        assert_eq!(cursor_x, 6);

        let (visible, cursor_x) = input_window("abcdefghij", 10, 4);
        assert_eq!(visible, "hij");
        assert_eq!(cursor_x, 3);
    }
}
