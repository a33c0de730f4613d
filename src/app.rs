use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use tracing::{debug, info};

use crate::config::Config;
use crate::markdown::{fit_line, render_markdown, wrap_spans};
use crate::state::{Turn, TurnHandle};
use crate::worker::StreamRequest;

pub const USER_FG: Color = Color::Rgb(0, 122, 255);
pub const ASSISTANT_FG: Color = Color::Rgb(52, 199, 89);
pub const ERROR_FG: Color = Color::Rgb(255, 69, 58);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    User,
    Assistant,
    Error,
}

/// One entry of the conversation display
#[derive(Debug, Clone)]
pub struct DisplayBlock {
    pub id: u64,
    pub kind: BlockKind,
    pub lines: Vec<Line<'static>>,
}

/// What a submit asked the caller to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// Submit control is disabled; nothing happened
    Ignored,
    /// Input was blank; only an empty placeholder was shown
    Blank,
    /// Display and input were cleared
    Cleared,
    /// Start a worker with this request
    Send(StreamRequest),
}

pub struct App {
    // Core state
    pub should_quit: bool,
    pub submit_enabled: bool,

    // Input box
    pub input: String,
    pub cursor: usize, // cursor position in input, in chars

    // Conversation
    pub turns: Vec<Turn>,
    pub display: Vec<DisplayBlock>,
    in_progress: Option<TurnHandle>,
    next_block_id: u64,

    // Display layout and scrolling
    rows: Vec<Line<'static>>, // the display blocks laid out at `rows_width`
    rows_width: usize,
    pub scroll: u16,
    pub follow: bool, // keep the newest content in view
    pub display_height: u16,

    // Animation state
    pub animation_frame: u8, // 0-2 for the typing indicator

    pub config: Config,
}

impl App {
    pub fn new(config: Config) -> Self {
        Self {
            should_quit: false,
            submit_enabled: true,

            input: String::new(),
            cursor: 0,

            turns: Vec::new(),
            display: Vec::new(),
            in_progress: None,
            next_block_id: 0,

            rows: Vec::new(),
            rows_width: config.render_width,
            scroll: 0,
            follow: true,
            display_height: 0,

            animation_frame: 0,

            config,
        }
    }

    pub fn is_streaming(&self) -> bool {
        !self.submit_enabled
    }

    /// Handle to the assistant turn still receiving chunks, if any
    pub fn in_progress(&self) -> Option<TurnHandle> {
        self.in_progress
    }

    fn push_block(&mut self, kind: BlockKind, lines: Vec<Line<'static>>) -> u64 {
        let id = self.next_block_id;
        self.next_block_id += 1;

        let block = DisplayBlock { id, kind, lines };
        lay_out_block(&block, self.display.is_empty(), self.rows_width, &mut self.rows);
        self.display.push(block);
        id
    }

    /// Sends whatever is in the input box.
    ///
    /// `clear` wipes the display, `exit` sends and then asks to quit, blank
    /// input only adds an empty assistant block.
    pub fn submit(&mut self) -> Submission {
        if !self.submit_enabled {
            return Submission::Ignored;
        }

        let user_input = self.input.trim().to_string();

        if user_input.is_empty() {
            self.push_block(BlockKind::Assistant, Vec::new());
            return Submission::Blank;
        }

        if user_input == "clear" {
            self.clear_display();
            return Submission::Cleared;
        }

        self.turns.push(Turn::user(user_input.clone()));
        let lines = self.render_user(&user_input);
        self.push_block(BlockKind::User, lines);
        self.clear_input();

        self.submit_enabled = false;
        let handle = self.open_assistant_turn();
        debug!(turn = handle.turn, block = handle.block, "opened assistant turn");

        self.scroll_to_bottom();

        let Some(request) = StreamRequest::from_turns(
            &self.turns,
            &self.config.session_tag,
            self.config.network,
        ) else {
            // Unreachable: a user turn was pushed above
            self.submit_enabled = true;
            return Submission::Blank;
        };

        info!(turns = self.turns.len(), "submitted message");

        if user_input == "exit" {
            self.should_quit = true;
        }

        Submission::Send(request)
    }

    /// Appends an empty assistant turn and its display block.
    pub fn open_assistant_turn(&mut self) -> TurnHandle {
        self.turns.push(Turn::assistant(""));
        let turn = self.turns.len() - 1;
        let block = self.push_block(BlockKind::Assistant, Vec::new());

        let handle = TurnHandle { turn, block };
        self.in_progress = Some(handle);
        handle
    }

    /// Renders `chunk` on its own and appends it to the turn behind `handle`.
    ///
    /// If the block is gone (display cleared meanwhile) a new one is started
    /// at the end of the display.
    pub fn append_chunk(&mut self, handle: TurnHandle, chunk: &str) {
        let rendered = render_markdown(chunk, self.config.render_width, &self.config.code_theme);

        if let Some(turn) = self.turns.get_mut(handle.turn) {
            // Each chunk was one line of the response
            if !turn.content.is_empty() {
                turn.content.push('\n');
            }
            turn.content.push_str(chunk);
        }

        let last = self.display.len().checked_sub(1);
        match self.display.iter().position(|b| b.id == handle.block) {
            Some(pos) if Some(pos) == last => {
                for line in &rendered {
                    self.rows.extend(fit_line(line, self.rows_width));
                }
                self.display[pos].lines.extend(rendered);
            }
            Some(pos) => {
                self.display[pos].lines.extend(rendered);
                self.rebuild_rows();
            }
            None => {
                let block = self.push_block(BlockKind::Assistant, rendered);
                self.in_progress = Some(TurnHandle { block, ..handle });
            }
        }

        self.scroll_to_bottom();
    }

    pub fn on_chunk(&mut self, chunk: &str) {
        match self.in_progress() {
            Some(handle) => self.append_chunk(handle, chunk),
            None => debug!("chunk arrived with no open turn; dropped"),
        }
    }

    pub fn on_done(&mut self) {
        if self.in_progress.take().is_some() {
            info!("response finished");
        }
        self.submit_enabled = true;
    }

    pub fn on_failed(&mut self, message: &str) {
        self.submit_enabled = true;

        let prefix = vec![Span::styled(
            "AI error: ",
            Style::default().fg(ERROR_FG).add_modifier(Modifier::BOLD),
        )];
        let rest = vec![Span::raw("          ")];
        let body = vec![Span::styled(message.to_string(), Style::default().fg(ERROR_FG))];
        let lines = wrap_spans(body, prefix, rest, self.config.render_width);

        self.push_block(BlockKind::Error, lines);
        self.scroll_to_bottom();
    }

    fn render_user(&self, text: &str) -> Vec<Line<'static>> {
        let prefix = vec![Span::styled(
            "You: ",
            Style::default().fg(USER_FG).add_modifier(Modifier::BOLD),
        )];
        let rest = vec![Span::raw("     ")];
        let body = vec![Span::raw(text.to_string())];
        wrap_spans(body, prefix, rest, self.config.render_width)
    }

    pub fn clear_display(&mut self) {
        info!(blocks = self.display.len(), "clearing display");
        self.display.clear();
        self.rows.clear();
        self.clear_input();
        self.scroll = 0;
        self.follow = true;
    }

    fn clear_input(&mut self) {
        self.input.clear();
        self.cursor = 0;
    }

    // Input editing, cursor counted in chars
    pub fn insert_char(&mut self, c: char) {
        let byte_pos = char_to_byte_index(&self.input, self.cursor);
        self.input.insert(byte_pos, c);
        self.cursor += 1;
    }

    pub fn backspace(&mut self) {
        if self.cursor > 0 {
            self.cursor -= 1;
            let byte_pos = char_to_byte_index(&self.input, self.cursor);
            self.input.remove(byte_pos);
        }
    }

    pub fn delete(&mut self) {
        let char_count = self.input.chars().count();
        if self.cursor < char_count {
            let byte_pos = char_to_byte_index(&self.input, self.cursor);
            self.input.remove(byte_pos);
        }
    }

    pub fn cursor_left(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    pub fn cursor_right(&mut self) {
        let char_count = self.input.chars().count();
        self.cursor = (self.cursor + 1).min(char_count);
    }

    pub fn cursor_home(&mut self) {
        self.cursor = 0;
    }

    pub fn cursor_end(&mut self) {
        self.cursor = self.input.chars().count();
    }

    /// The display laid out as screen rows, at most `rows_width` wide
    pub fn display_rows(&self) -> &[Line<'static>] {
        &self.rows
    }

    fn rebuild_rows(&mut self) {
        let mut rows = Vec::new();
        for (i, block) in self.display.iter().enumerate() {
            lay_out_block(block, i == 0, self.rows_width, &mut rows);
        }
        self.rows = rows;
    }

    /// Records the inner size of the display area. A new width lays the
    /// whole display out again.
    pub fn set_display_size(&mut self, width: u16, height: u16) {
        self.display_height = height;
        let width = (width as usize).max(1);
        if width != self.rows_width {
            self.rows_width = width;
            self.rebuild_rows();
        }
        self.sync_scroll();
    }

    /// Rows the display takes, typing indicator included
    pub fn total_display_lines(&self) -> u16 {
        let mut total = self.rows.len();
        if self.is_streaming() {
            total += 1; // typing indicator
        }
        total.min(u16::MAX as usize) as u16
    }

    fn max_scroll(&self) -> u16 {
        let visible_height = if self.display_height > 0 {
            self.display_height
        } else {
            20
        };
        self.total_display_lines().saturating_sub(visible_height)
    }

    /// Keep the newest content in view
    pub fn scroll_to_bottom(&mut self) {
        self.follow = true;
        self.scroll = self.max_scroll();
    }

    /// Re-applies follow mode after the display area changed size
    pub fn sync_scroll(&mut self) {
        let max = self.max_scroll();
        if self.follow || self.scroll > max {
            self.scroll = max;
        }
    }

    pub fn scroll_up(&mut self, rows: u16) {
        self.scroll = self.scroll.saturating_sub(rows);
        self.follow = false;
    }

    pub fn scroll_down(&mut self, rows: u16) {
        let max = self.max_scroll();
        self.scroll = self.scroll.saturating_add(rows).min(max);
        self.follow = self.scroll >= max;
    }

    pub fn page_size(&self) -> u16 {
        (self.display_height / 2).max(1)
    }

    /// Tick animation frame (called by Tick event)
    pub fn tick_animation(&mut self) {
        if self.is_streaming() {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }
}

/// Appends the rows of one block: a blank gap before every block but the
/// first, an `AI:` header on assistant blocks, then its lines.
fn lay_out_block(block: &DisplayBlock, first: bool, width: usize, rows: &mut Vec<Line<'static>>) {
    if !first {
        rows.push(Line::default());
    }
    if block.kind == BlockKind::Assistant {
        rows.push(Line::from(Span::styled(
            "AI:",
            Style::default().fg(ASSISTANT_FG).add_modifier(Modifier::BOLD),
        )));
    }
    for line in &block.lines {
        rows.extend(fit_line(line, width));
    }
}

/// Convert a character index to a byte index for UTF-8 safe string operations
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::StreamEvent;

    fn app() -> App {
        App::new(Config::default())
    }

    fn type_text(app: &mut App, text: &str) {
        for c in text.chars() {
            app.insert_char(c);
        }
    }

    fn submit_text(app: &mut App, text: &str) -> Submission {
        type_text(app, text);
        app.submit()
    }

    fn text_of(line: &Line) -> String {
        line.spans.iter().map(|s| s.content.as_ref()).collect()
    }

    fn block_text(block: &DisplayBlock) -> Vec<String> {
        block.lines.iter().map(text_of).collect()
    }

    fn apply(app: &mut App, event: StreamEvent) {
        match event {
            StreamEvent::Chunk(text) => app.on_chunk(&text),
            StreamEvent::Done => app.on_done(),
            StreamEvent::Failed(message) => app.on_failed(&message),
        }
    }

    #[test]
    fn test_submit_appends_user_and_placeholder() {
        let mut app = app();
        let submission = submit_text(&mut app, "Hello");

        assert_eq!(
            submission,
            Submission::Send(StreamRequest::new("Hello", "#/chat/master", true))
        );
        assert_eq!(app.turns, vec![Turn::user("Hello"), Turn::assistant("")]);
        assert_eq!(app.display.len(), 2);
        assert_eq!(app.display[0].kind, BlockKind::User);
        assert_eq!(block_text(&app.display[0]), vec!["You: Hello"]);
        assert_eq!(app.display[1].kind, BlockKind::Assistant);
        assert!(app.display[1].lines.is_empty());

        assert!(app.input.is_empty());
        assert_eq!(app.cursor, 0);
        assert!(!app.submit_enabled);
        assert_eq!(app.in_progress(), Some(TurnHandle { turn: 1, block: app.display[1].id }));
    }

    #[test]
    fn test_submit_trims_input() {
        let mut app = app();
        let submission = submit_text(&mut app, "   padded question \t");
        match submission {
            Submission::Send(request) => assert_eq!(request.prompt(), "padded question"),
            other => panic!("expected Send, got {other:?}"),
        }
        assert_eq!(app.turns[0], Turn::user("padded question"));
    }

    #[test]
    fn test_blank_input_only_adds_placeholder() {
        let mut app = app();
        let submission = submit_text(&mut app, "   ");

        assert_eq!(submission, Submission::Blank);
        assert!(app.turns.is_empty());
        assert_eq!(app.display.len(), 1);
        assert_eq!(app.display[0].kind, BlockKind::Assistant);
        assert!(app.display[0].lines.is_empty());
        assert!(app.submit_enabled);
        assert!(app.in_progress().is_none());
    }

    #[test]
    fn test_submit_while_streaming_is_ignored() {
        let mut app = app();
        submit_text(&mut app, "first");
        let submission = submit_text(&mut app, "second");

        assert_eq!(submission, Submission::Ignored);
        assert_eq!(app.turns.len(), 2);
        // Typed text stays in the box for later
        assert_eq!(app.input, "second");
    }

    #[test]
    fn test_hello_scenario() {
        let mut app = app();
        submit_text(&mut app, "Hello");

        for event in [
            StreamEvent::Chunk("Hi".to_string()),
            StreamEvent::Chunk(" there".to_string()),
            StreamEvent::Done,
        ] {
            apply(&mut app, event);
        }

        assert_eq!(block_text(&app.display[1]), vec!["Hi", "there"]);
        assert_eq!(app.turns[1], Turn::assistant("Hi\n there"));
        assert!(app.submit_enabled);
        assert!(app.display.iter().all(|b| b.kind != BlockKind::Error));
        assert!(app.in_progress().is_none());
    }

    #[test]
    fn test_done_is_idempotent() {
        let mut app = app();
        submit_text(&mut app, "question");
        for _ in 0..5 {
            app.on_chunk("part");
        }
        app.on_done();
        app.on_done();

        assert!(app.submit_enabled);
        assert_eq!(app.display[1].lines.len(), 5);
    }

    #[test]
    fn test_failure_shows_error_block() {
        let mut app = app();
        submit_text(&mut app, "Hello");

        apply(&mut app, StreamEvent::Failed("Connection refused".to_string()));
        apply(&mut app, StreamEvent::Done);

        let error = app.display.last().unwrap();
        assert_eq!(error.kind, BlockKind::Error);
        assert!(block_text(error).join(" ").contains("Connection refused"));
        assert!(block_text(error)[0].starts_with("AI error: "));
        assert!(app.submit_enabled);
    }

    #[test]
    fn test_long_error_message_kept_verbatim_when_wrapped() {
        let mut app = app();
        submit_text(&mut app, "Hello");
        let message = "error sending request for url (https://api.binjie.fun/api/generateStream): \
                       error trying to connect: dns error: failed to lookup address information";
        app.on_failed(message);

        let error = app.display.last().unwrap();
        let joined: String = block_text(error)
            .iter()
            .map(|l| l.trim())
            .collect::<Vec<_>>()
            .join(" ");
        assert!(joined.contains(message), "got {joined}");
    }

    #[test]
    fn test_clear_keeps_turns_and_starts_nothing() {
        let mut app = app();
        submit_text(&mut app, "Hello");
        app.on_chunk("Hi");
        app.on_done();

        let submission = submit_text(&mut app, "clear");
        assert_eq!(submission, Submission::Cleared);
        assert!(app.display.is_empty());
        assert!(app.input.is_empty());
        assert_eq!(app.turns.len(), 2);
        assert!(app.submit_enabled);
    }

    #[test]
    fn test_exit_sends_then_quits() {
        let mut app = app();
        let submission = submit_text(&mut app, "exit");

        assert_eq!(
            submission,
            Submission::Send(StreamRequest::new("exit", "#/chat/master", true))
        );
        assert_eq!(app.turns.len(), 2);
        assert!(app.should_quit);
    }

    #[test]
    fn test_chunk_after_clear_opens_new_block() {
        let mut app = app();
        submit_text(&mut app, "Hello");
        let handle = app.in_progress().unwrap();
        app.clear_display();

        app.append_chunk(handle, "late");
        assert_eq!(app.display.len(), 1);
        assert_eq!(block_text(&app.display[0]), vec!["late"]);

        // Later chunks follow the new block
        app.on_chunk("later");
        assert_eq!(app.display.len(), 1);
        assert_eq!(block_text(&app.display[0]), vec!["late", "later"]);
    }

    #[test]
    fn test_chunk_without_open_turn_is_dropped() {
        let mut app = app();
        app.on_chunk("stray");
        assert!(app.display.is_empty());
        assert!(app.turns.is_empty());
    }

    #[test]
    fn test_request_sends_only_latest_user_turn() {
        let mut app = app();
        submit_text(&mut app, "first");
        app.on_chunk("answer");
        app.on_done();

        match submit_text(&mut app, "second") {
            Submission::Send(request) => assert_eq!(request.prompt(), "second"),
            other => panic!("expected Send, got {other:?}"),
        }
        assert_eq!(app.turns.len(), 4);
    }

    #[test]
    fn test_utf8_input_editing() {
        let mut app = app();
        type_text(&mut app, "héllo");
        app.cursor_left();
        app.cursor_left();
        app.backspace();
        assert_eq!(app.input, "hélo");
        app.cursor_home();
        app.delete();
        assert_eq!(app.input, "élo");
        app.cursor_end();
        app.insert_char('!');
        assert_eq!(app.input, "élo!");
        assert_eq!(app.cursor, 4);
    }

    #[test]
    fn test_scrolling_follows_new_content() {
        let mut app = app();
        app.set_display_size(60, 5);
        submit_text(&mut app, "Hello");
        for i in 0..20 {
            app.on_chunk(&format!("line {}", i));
        }
        assert!(app.follow);
        assert_eq!(app.scroll, app.total_display_lines() - 5);

        app.scroll_up(3);
        assert!(!app.follow);
        app.scroll_down(100);
        assert!(app.follow);
        assert_eq!(app.scroll, app.total_display_lines() - 5);
    }

    #[test]
    fn test_rows_follow_display_width() {
        let mut app = app();
        submit_text(&mut app, "Hello");
        let word = "a".repeat(19);
        app.on_chunk(&format!("{word} {word} {word}"));

        app.set_display_size(38, 4);
        assert!(app.display_rows().iter().all(|r| r.width() <= 38));
        assert_eq!(app.display_rows().len(), 6);

        app.on_chunk("LASTCHUNK");
        assert_eq!(app.display_rows().len(), 7);
        assert_eq!(text_of(app.display_rows().last().unwrap()), "LASTCHUNK");
        assert!(app.follow);
        assert_eq!(app.scroll, app.total_display_lines() - 4);
    }

    #[test]
    fn test_turn_keeps_line_breaks_between_chunks() {
        let mut app = app();
        submit_text(&mut app, "Hello");
        app.on_chunk("first line");
        app.on_chunk("second line");
        app.on_done();
        assert_eq!(app.turns[1].content, "first line\nsecond line");
    }

    #[test]
    fn test_display_lines_headers_and_gaps() {
        let mut app = app();
        submit_text(&mut app, "Hello");
        app.on_chunk("Hi");
        app.on_done();

        let lines: Vec<String> = app.display_rows().iter().map(text_of).collect();
        assert_eq!(lines, vec!["You: Hello", "", "AI:", "Hi"]);
    }

    #[test]
    fn test_tick_only_animates_while_streaming() {
        let mut app = app();
        app.tick_animation();
        assert_eq!(app.animation_frame, 0);

        submit_text(&mut app, "Hello");
        app.tick_animation();
        app.tick_animation();
        app.tick_animation();
        assert_eq!(app.animation_frame, 0);
        app.tick_animation();
        assert_eq!(app.animation_frame, 1);
    }
}
