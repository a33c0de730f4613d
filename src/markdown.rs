//! Markdown to styled terminal lines.
//!
//! Each call converts one self-contained piece of Markdown. Callers feed it
//! one stream chunk at a time, so constructs split across chunks (an opening
//! code fence in one chunk, its body in the next) render as separate pieces.

use std::sync::OnceLock;

use pulldown_cmark::{CodeBlockKind, Event, HeadingLevel, Options, Parser, Tag, TagEnd};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use syntect::easy::HighlightLines;
use syntect::highlighting::{FontStyle, Theme, ThemeSet};
use syntect::parsing::SyntaxSet;
use syntect::util::LinesWithEndings;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

const INLINE_CODE_FG: Color = Color::Rgb(169, 183, 198);
const CODE_BG: Color = Color::Rgb(45, 45, 45);
const LINK_FG: Color = Color::Rgb(10, 132, 255);
const QUOTE_FG: Color = Color::Rgb(142, 142, 147);

/// Syntax definitions and themes, loaded once on first use.
struct HighlightAssets {
    syntax_set: SyntaxSet,
    theme_set: ThemeSet,
}

fn assets() -> &'static HighlightAssets {
    static ASSETS: OnceLock<HighlightAssets> = OnceLock::new();
    ASSETS.get_or_init(|| HighlightAssets {
        syntax_set: SyntaxSet::load_defaults_newlines(),
        theme_set: ThemeSet::load_defaults(),
    })
}

/// Looks up a bundled theme by name, falling back to the first one.
fn theme_named(name: &str) -> Option<&'static Theme> {
    let themes = &assets().theme_set.themes;
    themes.get(name).or_else(|| themes.values().next())
}

fn syntect_color_to_ratatui(c: syntect::highlighting::Color) -> Color {
    Color::Rgb(c.r, c.g, c.b)
}

/// Renders `source` into lines no wider than `width` (code blocks excepted),
/// highlighting fenced code with the syntect theme called `theme`.
pub fn render_markdown(source: &str, width: usize, theme: &str) -> Vec<Line<'static>> {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);

    let mut renderer = Renderer::new(width.max(1), theme_named(theme));
    for event in Parser::new_ext(source, options) {
        renderer.handle(event);
    }
    renderer.finish()
}

struct CodeBlock {
    lang: String,
    text: String,
}

struct Renderer {
    width: usize,
    theme: Option<&'static Theme>,
    lines: Vec<Line<'static>>,

    // Inline content of the block being built
    current: Vec<Span<'static>>,
    styles: Vec<Style>,
    heading: Option<HeadingLevel>,
    link: Option<(String, usize)>,

    // Block nesting
    lists: Vec<Option<u64>>,
    item_marker: Option<String>,
    quote_depth: usize,
    code: Option<CodeBlock>,
    needs_gap: bool,
}

impl Renderer {
    fn new(width: usize, theme: Option<&'static Theme>) -> Self {
        Self {
            width,
            theme,
            lines: Vec::new(),
            current: Vec::new(),
            styles: vec![Style::default()],
            heading: None,
            link: None,
            lists: Vec::new(),
            item_marker: None,
            quote_depth: 0,
            code: None,
            needs_gap: false,
        }
    }

    fn style(&self) -> Style {
        self.styles.last().copied().unwrap_or_default()
    }

    fn push_style(&mut self, patch: Style) {
        let next = self.style().patch(patch);
        self.styles.push(next);
    }

    fn pop_style(&mut self) {
        if self.styles.len() > 1 {
            self.styles.pop();
        }
    }

    fn handle(&mut self, event: Event<'_>) {
        match event {
            Event::Start(tag) => self.start(tag),
            Event::End(tag) => self.end(tag),
            Event::Text(text) => {
                if let Some(code) = self.code.as_mut() {
                    code.text.push_str(&text);
                } else {
                    let style = self.style();
                    self.current.push(Span::styled(text.into_string(), style));
                }
            }
            Event::Code(code) => {
                let style = self.style().fg(INLINE_CODE_FG).bg(CODE_BG);
                self.current.push(Span::styled(code.into_string(), style));
            }
            Event::Html(html) => {
                let style = self.style();
                self.current.push(Span::styled(html.trim_end().to_string(), style));
            }
            Event::SoftBreak => {
                let style = self.style();
                self.current.push(Span::styled(" ", style));
            }
            Event::HardBreak => self.flush_inline(),
            Event::Rule => {
                self.flush_inline();
                self.gap();
                self.lines.push(Line::from(Span::styled(
                    "─".repeat(self.width),
                    Style::default().fg(Color::DarkGray),
                )));
                self.end_block();
            }
            Event::TaskListMarker(checked) => {
                let marker = if checked { "[x] " } else { "[ ] " };
                self.current.push(Span::raw(marker));
            }
            _ => {}
        }
    }

    fn start(&mut self, tag: Tag<'_>) {
        match tag {
            Tag::Paragraph => {}
            Tag::Heading { level, .. } => {
                self.flush_inline();
                self.heading = Some(level);
            }
            Tag::BlockQuote => {
                self.flush_inline();
                self.quote_depth += 1;
            }
            Tag::CodeBlock(kind) => {
                self.flush_inline();
                let lang = match kind {
                    CodeBlockKind::Fenced(info) => {
                        info.split_whitespace().next().unwrap_or_default().to_string()
                    }
                    CodeBlockKind::Indented => String::new(),
                };
                self.code = Some(CodeBlock { lang, text: String::new() });
            }
            Tag::List(start) => {
                // Text of the parent item comes before a nested list
                self.flush_inline();
                self.lists.push(start);
            }
            Tag::Item => {
                self.flush_inline();
                let marker = match self.lists.last_mut() {
                    Some(Some(n)) => {
                        let marker = format!("{}. ", n);
                        *n += 1;
                        marker
                    }
                    _ => "• ".to_string(),
                };
                self.item_marker = Some(marker);
            }
            Tag::Emphasis => self.push_style(Style::default().add_modifier(Modifier::ITALIC)),
            Tag::Strong => self.push_style(Style::default().add_modifier(Modifier::BOLD)),
            Tag::Strikethrough => {
                self.push_style(Style::default().add_modifier(Modifier::CROSSED_OUT))
            }
            Tag::Link { dest_url, .. } => {
                self.link = Some((dest_url.into_string(), self.current.len()));
                self.push_style(Style::default().fg(LINK_FG).add_modifier(Modifier::UNDERLINED));
            }
            _ => {}
        }
    }

    fn end(&mut self, tag: TagEnd) {
        match tag {
            TagEnd::Paragraph => {
                self.flush_inline();
                self.end_block();
            }
            TagEnd::Heading(_) => {
                self.flush_inline();
                self.heading = None;
                self.end_block();
            }
            TagEnd::BlockQuote => {
                self.flush_inline();
                self.quote_depth = self.quote_depth.saturating_sub(1);
                self.end_block();
            }
            TagEnd::CodeBlock => {
                if let Some(code) = self.code.take() {
                    self.gap();
                    let highlighted = self.highlight(&code);
                    self.lines.extend(highlighted);
                }
                self.end_block();
            }
            TagEnd::List(_) => {
                self.flush_inline();
                self.lists.pop();
                self.end_block();
            }
            TagEnd::Item => self.flush_inline(),
            TagEnd::Emphasis | TagEnd::Strong | TagEnd::Strikethrough => self.pop_style(),
            TagEnd::Link => {
                self.pop_style();
                if let Some((dest, start)) = self.link.take() {
                    let text: String = self.current[start.min(self.current.len())..]
                        .iter()
                        .map(|s| s.content.as_ref())
                        .collect();
                    if !dest.is_empty() && text != dest {
                        self.current.push(Span::styled(
                            format!(" ({})", dest),
                            Style::default().fg(Color::DarkGray),
                        ));
                    }
                }
            }
            _ => {}
        }
    }

    /// Marks the end of a block. Blocks inside lists stay tight.
    fn end_block(&mut self) {
        if self.lists.is_empty() {
            self.needs_gap = true;
        }
    }

    fn gap(&mut self) {
        if self.needs_gap && !self.lines.is_empty() {
            self.lines.push(self.quote_prefix_line());
        }
        self.needs_gap = false;
    }

    fn quote_prefix(&self) -> Vec<Span<'static>> {
        (0..self.quote_depth)
            .map(|_| Span::styled("▌ ", Style::default().fg(QUOTE_FG)))
            .collect()
    }

    fn quote_prefix_line(&self) -> Line<'static> {
        Line::from(self.quote_prefix())
    }

    /// Wraps and emits the pending inline spans.
    fn flush_inline(&mut self) {
        if self.current.is_empty() {
            return;
        }
        let spans = std::mem::take(&mut self.current);
        self.gap();

        if let Some(level) = self.heading {
            self.emit_heading(spans, level);
            return;
        }

        let indent = "  ".repeat(self.lists.len().saturating_sub(1));
        let mut first = self.quote_prefix();
        let mut rest = self.quote_prefix();
        if let Some(marker) = self.item_marker.take() {
            first.push(Span::raw(format!("{}{}", indent, marker)));
            rest.push(Span::raw(" ".repeat(indent.width() + marker.width())));
        } else if !self.lists.is_empty() {
            // Continuation paragraph inside an item
            let pad = " ".repeat(indent.width() + 2);
            first.push(Span::raw(pad.clone()));
            rest.push(Span::raw(pad));
        }

        let wrapped = wrap_spans(spans, first, rest, self.width);
        self.lines.extend(wrapped);
    }

    fn emit_heading(&mut self, spans: Vec<Span<'static>>, level: HeadingLevel) {
        let modifier = match level {
            HeadingLevel::H1 | HeadingLevel::H2 => Modifier::BOLD | Modifier::UNDERLINED,
            HeadingLevel::H3 => Modifier::BOLD,
            _ => Modifier::BOLD | Modifier::ITALIC,
        };
        let spans: Vec<Span<'static>> = spans
            .into_iter()
            .map(|s| {
                let style = s.style.add_modifier(modifier);
                Span::styled(s.content, style)
            })
            .collect();

        let wrapped = wrap_spans(spans, self.quote_prefix(), self.quote_prefix(), self.width);
        if level == HeadingLevel::H1 {
            for line in wrapped {
                let pad = self.width.saturating_sub(line.width()) / 2;
                let mut spans = vec![Span::raw(" ".repeat(pad))];
                spans.extend(line.spans);
                self.lines.push(Line::from(spans));
            }
        } else {
            self.lines.extend(wrapped);
        }
    }

    fn highlight(&self, code: &CodeBlock) -> Vec<Line<'static>> {
        let bg = self
            .theme
            .and_then(|t| t.settings.background)
            .map(syntect_color_to_ratatui)
            .unwrap_or(CODE_BG);
        let base = Style::default().bg(bg);
        let assets = assets();

        let syntax = if code.lang.is_empty() {
            None
        } else {
            assets
                .syntax_set
                .find_syntax_by_token(&code.lang)
                .or_else(|| assets.syntax_set.find_syntax_by_extension(&code.lang))
        };
        let mut highlighter = match (syntax, self.theme) {
            (Some(syntax), Some(theme)) => Some(HighlightLines::new(syntax, theme)),
            _ => None,
        };

        let mut lines = Vec::new();
        for raw in LinesWithEndings::from(&code.text) {
            let mut spans = self.quote_prefix();
            let highlighted = highlighter
                .as_mut()
                .and_then(|h| h.highlight_line(raw, &assets.syntax_set).ok());

            match highlighted {
                Some(ranges) => {
                    for (style, text) in ranges {
                        let text = text.trim_end_matches(['\n', '\r']);
                        if text.is_empty() {
                            continue;
                        }
                        let mut span_style = base.fg(syntect_color_to_ratatui(style.foreground));
                        if style.font_style.contains(FontStyle::BOLD) {
                            span_style = span_style.add_modifier(Modifier::BOLD);
                        }
                        if style.font_style.contains(FontStyle::ITALIC) {
                            span_style = span_style.add_modifier(Modifier::ITALIC);
                        }
                        spans.push(Span::styled(text.to_string(), span_style));
                    }
                }
                None => {
                    let text = raw.trim_end_matches(['\n', '\r']);
                    spans.push(Span::styled(text.to_string(), base.fg(INLINE_CODE_FG)));
                }
            }

            // Pad so the block reads as one shaded rectangle
            let used: usize = spans.iter().map(|s| s.width()).sum();
            if used < self.width {
                spans.push(Span::styled(" ".repeat(self.width - used), base));
            }
            lines.push(Line::from(spans));
        }
        lines
    }

    fn finish(mut self) -> Vec<Line<'static>> {
        // Unclosed constructs at the end of a chunk
        if let Some(code) = self.code.take() {
            let highlighted = self.highlight(&code);
            self.lines.extend(highlighted);
        }
        self.flush_inline();
        self.lines
    }
}

/// Greedy word wrap over styled spans. `first` prefixes the first output
/// line, `rest` every following one. Words wider than a whole line are
/// split by character.
pub fn wrap_spans(
    spans: Vec<Span<'static>>,
    first: Vec<Span<'static>>,
    rest: Vec<Span<'static>>,
    width: usize,
) -> Vec<Line<'static>> {
    let mut lines = Vec::new();
    let first_width: usize = first.iter().map(|s| s.width()).sum();
    let rest_width: usize = rest.iter().map(|s| s.width()).sum();

    let mut line: Vec<Span<'static>> = first;
    let mut prefix_len = first_width;
    let mut line_len = first_width;
    let mut pending_space: Option<Span<'static>> = None;

    for (word, style, is_space) in split_words(&spans) {
        if is_space {
            if line_len > prefix_len {
                pending_space = Some(Span::styled(" ", style));
            }
            continue;
        }

        let word_len = word.width();
        let space_len = if pending_space.is_some() { 1 } else { 0 };

        if line_len > prefix_len && line_len + space_len + word_len > width {
            lines.push(Line::from(std::mem::replace(&mut line, rest.clone())));
            prefix_len = rest_width;
            line_len = rest_width;
            pending_space = None;
        } else if let Some(space) = pending_space.take() {
            line.push(space);
            line_len += 1;
        }

        if line_len + word_len <= width {
            line.push(Span::styled(word, style));
            line_len += word_len;
            continue;
        }

        // Too long for any line: break it up
        let mut piece = String::new();
        for c in word.chars() {
            let c_len = c.to_string().width();
            if line_len + c_len > width && line_len > prefix_len {
                if !piece.is_empty() {
                    line.push(Span::styled(std::mem::take(&mut piece), style));
                }
                lines.push(Line::from(std::mem::replace(&mut line, rest.clone())));
                prefix_len = rest_width;
                line_len = rest_width;
            }
            piece.push(c);
            line_len += c_len;
        }
        if !piece.is_empty() {
            line.push(Span::styled(piece, style));
        }
    }

    if line_len > prefix_len || lines.is_empty() {
        lines.push(Line::from(line));
    }
    lines
}

/// Breaks one already rendered line into rows of at most `width` columns,
/// keeping styles and spacing. Breaks after the last space that fits, or
/// mid-word when there is none.
pub fn fit_line(line: &Line<'static>, width: usize) -> Vec<Line<'static>> {
    let width = width.max(1);
    if line.width() <= width {
        return vec![line.clone()];
    }

    let cells: Vec<(char, Style)> = line
        .spans
        .iter()
        .flat_map(|span| span.content.chars().map(move |c| (c, span.style)))
        .collect();

    let mut rows = Vec::new();
    let mut row_start = 0;
    let mut row_width = 0;
    let mut last_space: Option<usize> = None;
    let mut i = 0;

    while i < cells.len() {
        let (c, _) = cells[i];
        let c_width = c.width().unwrap_or(0);

        if row_width + c_width > width && i > row_start {
            let end = match last_space {
                Some(space) => space + 1,
                None => i,
            };
            rows.push(spans_from_cells(&cells[row_start..end]));
            row_start = end;
            row_width = cells[row_start..i].iter().map(|(c, _)| c.width().unwrap_or(0)).sum();
            last_space = None;
            continue;
        }

        if c == ' ' {
            last_space = Some(i);
        }
        row_width += c_width;
        i += 1;
    }
    if row_start < cells.len() {
        rows.push(spans_from_cells(&cells[row_start..]));
    }
    rows
}

/// Regroups styled characters into spans, one per run of equal style.
fn spans_from_cells(cells: &[(char, Style)]) -> Line<'static> {
    let mut spans: Vec<Span<'static>> = Vec::new();
    let mut text = String::new();
    let mut current: Option<Style> = None;

    for &(c, style) in cells {
        if current.is_some_and(|s| s != style) {
            if let Some(prev) = current {
                spans.push(Span::styled(std::mem::take(&mut text), prev));
            }
        }
        current = Some(style);
        text.push(c);
    }
    if let Some(style) = current {
        spans.push(Span::styled(text, style));
    }
    Line::from(spans)
}

/// Splits spans into alternating runs of whitespace and non-whitespace,
/// each carrying its span's style. Words that continue across a span
/// boundary stay separate entries but are never split by a space.
fn split_words(spans: &[Span<'static>]) -> Vec<(String, Style, bool)> {
    let mut out: Vec<(String, Style, bool)> = Vec::new();
    for span in spans {
        let mut run = String::new();
        let mut run_is_space = false;
        for c in span.content.chars() {
            let is_space = c.is_whitespace();
            if !run.is_empty() && is_space != run_is_space {
                out.push((std::mem::take(&mut run), span.style, run_is_space));
            }
            run_is_space = is_space;
            run.push(c);
        }
        if !run.is_empty() {
            out.push((run, span.style, run_is_space));
        }
    }
    out
}
