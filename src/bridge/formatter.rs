//! Format strings and message splitting.
//!
//! A format string is parsed once into segments. Placeholders are
//! `%user`, `%message`, `%channel` and `%time`; anything else is literal.
//! Placeholder text inside a substituted value is never expanded again.

use chrono::Local;

/// Format used for both directions unless configured otherwise.
pub const DEFAULT_FORMAT: &str = "%user: %message";

const PLACEHOLDERS: [(&str, Segment); 4] = [
    ("%user", Segment::User),
    ("%message", Segment::Message),
    ("%channel", Segment::Channel),
    ("%time", Segment::Time),
];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    User,
    Message,
    Channel,
    Time,
}

/// A parsed format string.
#[derive(Debug, Clone)]
pub struct MessageFormatter {
    segments: Vec<Segment>,
}

impl MessageFormatter {
    pub fn new(format: impl Into<String>) -> Self {
        Self {
            segments: parse(&format.into()),
        }
    }

    /// Render the format string for one message.
    pub fn format(&self, ctx: &FormatContext<'_>) -> String {
        let mut out = String::with_capacity(ctx.message.len() + 32);
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::User => out.push_str(ctx.user),
                Segment::Message => out.push_str(ctx.message),
                Segment::Channel => out.push_str(ctx.channel),
                Segment::Time => out.push_str(&Local::now().format("%H:%M:%S").to_string()),
            }
        }
        out
    }
}

impl Default for MessageFormatter {
    fn default() -> Self {
        Self::new(DEFAULT_FORMAT)
    }
}

fn parse(format: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut rest = format;

    'outer: while !rest.is_empty() {
        if rest.starts_with('%') {
            for (token, segment) in &PLACEHOLDERS {
                if let Some(after) = rest.strip_prefix(token) {
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(segment.clone());
                    rest = after;
                    continue 'outer;
                }
            }
        }

        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            literal.push(c);
        }
        rest = chars.as_str();
    }

    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    segments
}

/// Values substituted into a format string.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormatContext<'a> {
    pub user: &'a str,
    pub message: &'a str,
    /// Source channel or room.
    pub channel: &'a str,
}

impl<'a> FormatContext<'a> {
    pub fn new(user: &'a str, message: &'a str) -> Self {
        Self {
            user,
            message,
            channel: "",
        }
    }

    pub fn with_channel(self, channel: &'a str) -> Self {
        Self { channel, ..self }
    }
}

/// Split `message` into chunks of at most `max_len` bytes.
///
/// Cuts at the last newline, then the last space, that fits. A word longer
/// than `max_len` is cut mid-word but never inside a UTF-8 character.
pub fn split_message(message: &str, max_len: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut rest = message;

    while rest.len() > max_len {
        let (end, next) = cut_point(rest, max_len);
        let chunk = rest[..end].trim_end();
        if !chunk.is_empty() {
            chunks.push(chunk.to_string());
        }
        rest = rest[next..].trim_start();
    }

    if !rest.is_empty() || chunks.is_empty() {
        chunks.push(rest.to_string());
    }
    chunks
}

/// Where to end the current chunk and where the next one starts.
fn cut_point(text: &str, max_len: usize) -> (usize, usize) {
    let mut limit = max_len.min(text.len());
    while !text.is_char_boundary(limit) {
        limit -= 1;
    }

    if limit == 0 {
        // Single character wider than the limit.
        let width = text.chars().next().map_or(text.len(), char::len_utf8);
        return (width, width);
    }

    if text[limit..].starts_with(['\n', ' ']) {
        return (limit, limit + 1);
    }

    let window = &text[..limit];
    match window.rfind('\n').or_else(|| window.rfind(' ')) {
        Some(idx) if idx > 0 => (idx, idx + 1),
        _ => (limit, limit),
    }
}
