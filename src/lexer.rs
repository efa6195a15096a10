use std::borrow::Cow;

use crate::error::{LexError, LexErrorKind};
use crate::span::{Position, Span};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub(crate) enum TokenKind {
    Content,
    Comment,
    /// `{{{{`
    OpenRawBlock,
    /// `}}}}`
    CloseRawBlock,
    /// `{{{{/name}}}}`, text is the name.
    EndRawBlock,
    /// `{{`, `{{&` or `{{*`
    Open,
    /// `{{{`
    OpenUnescaped,
    /// `{{#` or `{{#*`
    OpenBlock,
    /// `{{/`
    OpenEndBlock,
    /// `{{^`
    OpenInverse,
    /// `{{else` followed by an expression.
    OpenInverseChain,
    /// `{{>`
    OpenPartial,
    /// `{{#>`
    OpenPartialBlock,
    /// `{{^}}` or `{{else}}`
    Inverse,
    /// `}}`
    Close,
    /// `}}}`
    CloseUnescaped,
    OpenSexpr,
    CloseSexpr,
    Equals,
    Id,
    Sep,
    Data,
    String,
    Number,
    Boolean,
    Undefined,
    Null,
    /// `as |`
    OpenBlockParams,
    /// `|`
    CloseBlockParams,
}

impl TokenKind {
    pub(crate) const fn describe(self) -> &'static str {
        match self {
            Self::Content => "CONTENT",
            Self::Comment => "COMMENT",
            Self::OpenRawBlock => "'{{{{'",
            Self::CloseRawBlock => "'}}}}'",
            Self::EndRawBlock => "END_RAW_BLOCK",
            Self::Open => "'{{'",
            Self::OpenUnescaped => "'{{{'",
            Self::OpenBlock => "'{{#'",
            Self::OpenEndBlock => "'{{/'",
            Self::OpenInverse => "'{{^'",
            Self::OpenInverseChain => "'{{else'",
            Self::OpenPartial => "'{{>'",
            Self::OpenPartialBlock => "'{{#>'",
            Self::Inverse => "'{{else}}'",
            Self::Close => "'}}'",
            Self::CloseUnescaped => "'}}}'",
            Self::OpenSexpr => "'('",
            Self::CloseSexpr => "')'",
            Self::Equals => "'='",
            Self::Id => "ID",
            Self::Sep => "SEP",
            Self::Data => "DATA",
            Self::String => "STRING",
            Self::Number => "NUMBER",
            Self::Boolean => "BOOLEAN",
            Self::Undefined => "UNDEFINED",
            Self::Null => "NULL",
            Self::OpenBlockParams => "'as |'",
            Self::CloseBlockParams => "'|'",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Token<'a> {
    pub(crate) kind: TokenKind,
    /// Token text. Open/close markers keep their `~` so strip flags can be
    /// recovered; strings and bracketed ids are unescaped.
    pub(crate) text: Cow<'a, str>,
    pub(crate) span: Span,
}

impl Token<'_> {
    /// `~` directly after the opening braces.
    pub(crate) fn strips_open(&self) -> bool {
        self.text.as_bytes().get(2) == Some(&b'~')
    }

    /// `~` directly before the closing braces.
    pub(crate) fn strips_close(&self) -> bool {
        let bytes = self.text.as_bytes();
        bytes.len() >= 3 && bytes.get(bytes.len().saturating_sub(3)) == Some(&b'~')
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Mode {
    /// Literal content up to the next `{{`.
    Text,
    /// Content directly after an escaped `\{{`, which is taken literally.
    EscapedText,
    /// Inside `{{ ... }}`.
    Expression,
    /// Verbatim body of a `{{{{raw}}}}` block. Holds the nesting depth.
    RawBlock(usize),
}

/// Chars that may never appear inside an identifier.
fn is_id_char(c: char) -> bool {
    !(c.is_whitespace()
        || matches!(
            c,
            '!' | '"'
                | '#'
                | '%'..=','
                | '.'
                | '/'
                | ';'..='>'
                | '@'
                | '['..='^'
                | '`'
                | '{'..='~'
        ))
}

/// What may follow an identifier or `.`.
fn is_lookahead(c: Option<char>) -> bool {
    match c {
        None => true,
        Some(c) => c.is_whitespace() || matches!(c, '=' | '~' | '}' | '/' | '.' | ')' | '|'),
    }
}

/// What may follow a literal keyword or number.
fn is_literal_lookahead(c: Option<char>) -> bool {
    match c {
        None => true,
        Some(c) => c.is_whitespace() || matches!(c, '~' | '}' | ')'),
    }
}

/// A single forward pass over template source producing tokens on demand.
pub(crate) struct Lexer<'a> {
    input: &'a str,
    pos: usize,
    line: usize,
    /// Byte offset at which the current line starts.
    line_start_pos: usize,
    mode: Mode,
    /// Where the current `{{` expression was opened, for error reporting.
    expression_start: Position,
    done: bool,
}

impl<'a> Lexer<'a> {
    pub(crate) const fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            line: 1,
            line_start_pos: 0,
            mode: Mode::Text,
            expression_start: Position::new(1, 1),
            done: false,
        }
    }

    fn position(&self) -> Position {
        Position::new(self.line, self.column_at(self.pos))
    }

    fn column_at(&self, pos: usize) -> usize {
        self.input
            .get(self.line_start_pos..pos)
            .map_or(0, |s| s.chars().count())
            .saturating_add(1)
    }

    fn rest(&self) -> &'a str {
        self.input.get(self.pos..).unwrap_or("")
    }

    fn peek_char(&self) -> Option<char> {
        self.rest().chars().next()
    }

    /// Moves the cursor to `end`, updating line tracking for any newlines
    /// crossed on the way.
    fn advance_to(&mut self, end: usize) {
        let crossed = self.input.get(self.pos..end).unwrap_or("");
        for (offset, c) in crossed.char_indices() {
            if c == '\n' {
                self.line = self.line.saturating_add(1);
                self.line_start_pos = self.pos.saturating_add(offset).saturating_add(1);
            }
        }
        self.pos = end;
    }

    /// Emits a token spanning from the cursor to `end` with the given text.
    fn token_to(&mut self, kind: TokenKind, end: usize, text: Cow<'a, str>) -> Token<'a> {
        let start = Self::position(self);
        self.advance_to(end);
        Token {
            kind,
            text,
            span: Span::new(start, Self::position(self)),
        }
    }

    /// Emits a token for the next `len` bytes, using them as its text.
    fn token_len(&mut self, kind: TokenKind, len: usize) -> Token<'a> {
        let end = self.pos.saturating_add(len);
        let text = Cow::Borrowed(self.input.get(self.pos..end).unwrap_or(""));
        self.token_to(kind, end, text)
    }

    fn error(&self, kind: LexErrorKind) -> LexError {
        LexError::new(self.position(), kind)
    }

    fn next_token(&mut self) -> Result<Option<Token<'a>>, LexError> {
        loop {
            if self.pos >= self.input.len() {
                return match self.mode {
                    Mode::Text | Mode::EscapedText => Ok(None),
                    Mode::Expression => Err(LexError::new(
                        self.expression_start,
                        LexErrorKind::UnterminatedExpression,
                    )),
                    Mode::RawBlock(_) => Err(self.error(LexErrorKind::UnterminatedRawBlock)),
                };
            }

            let token = match self.mode {
                Mode::Text => self.lex_text(),
                Mode::EscapedText => Some(self.lex_escaped_text()),
                Mode::Expression => self.lex_expression()?,
                Mode::RawBlock(depth) => Some(self.lex_raw(depth)?),
            };

            if let Some(token) = token {
                return Ok(Some(token));
            }
        }
    }

    fn lex_text(&mut self) -> Option<Token<'a>> {
        let rest = self.rest();
        let Some(offset) = rest.find("{{") else {
            return Some(self.token_len(TokenKind::Content, rest.len()));
        };

        let mut content = rest.get(..offset).unwrap_or("");
        let end = self.pos.saturating_add(offset);

        // `\\{{` keeps one backslash and opens a mustache, `\{{` is a literal `{{`.
        if content.ends_with("\\\\") {
            content = content.get(..content.len().saturating_sub(1)).unwrap_or("");
            self.mode = Mode::Expression;
        } else if content.ends_with('\\') {
            content = content.get(..content.len().saturating_sub(1)).unwrap_or("");
            self.mode = Mode::EscapedText;
        } else {
            self.mode = Mode::Expression;
        }

        if content.is_empty() {
            self.advance_to(end);
            self.expression_start = Self::position(self);
            None
        } else {
            let token = self.token_to(TokenKind::Content, end, Cow::Borrowed(content));
            self.expression_start = Self::position(self);
            Some(token)
        }
    }

    fn lex_escaped_text(&mut self) -> Token<'a> {
        let rest = self.rest();
        self.mode = Mode::Text;

        // At least the escaped `{{` itself, then up to the next opener.
        let mut end = rest.len();
        if let Some(found) = rest.get(2..).and_then(|s| s.find("{{")) {
            let mut stop = found.saturating_add(2);
            for _ in 0..2 {
                if stop > 2 && rest.as_bytes().get(stop.saturating_sub(1)) == Some(&b'\\') {
                    stop = stop.saturating_sub(1);
                }
            }
            end = stop;
        }
        self.token_len(TokenKind::Content, end)
    }

    fn lex_raw(&mut self, depth: usize) -> Result<Token<'a>, LexError> {
        let rest = self.rest();

        if let Some(after) = rest.strip_prefix("{{{{/") {
            let name_len = after.find(|c: char| !is_id_char(c)).unwrap_or(after.len());
            let name = after.get(..name_len).unwrap_or("");
            if !name.is_empty() && after.get(name_len..).is_some_and(|s| s.starts_with("}}}}")) {
                let total = 5usize.saturating_add(name_len).saturating_add(4);
                let remaining = depth.saturating_sub(1);
                if remaining == 0 {
                    self.mode = Mode::Text;
                    let end = self.pos.saturating_add(total);
                    return Ok(self.token_to(TokenKind::EndRawBlock, end, Cow::Borrowed(name)));
                }
                self.mode = Mode::RawBlock(remaining);
                return Ok(self.token_len(TokenKind::Content, total));
            }
        } else if rest.starts_with("{{{{") {
            self.mode = Mode::RawBlock(depth.saturating_add(1));
            return Ok(self.token_len(TokenKind::Content, 4));
        }

        match rest.get(1..).and_then(|s| s.find("{{{{")) {
            Some(found) => Ok(self.token_len(TokenKind::Content, found.saturating_add(1))),
            None => {
                self.advance_to(self.input.len());
                Err(self.error(LexErrorKind::UnterminatedRawBlock))
            }
        }
    }

    fn lex_comment(&mut self) -> Result<Token<'a>, LexError> {
        let rest = self.rest();
        let long = rest
            .strip_prefix("{{~")
            .or_else(|| rest.strip_prefix("{{"))
            .is_some_and(|s| s.starts_with("!--"));

        let end = if long {
            let close = rest.find("--}}").map(|i| i.saturating_add(4));
            let strip_close = rest.find("--~}}").map(|i| i.saturating_add(5));
            match (close, strip_close) {
                (Some(a), Some(b)) => Some(std::cmp::min(a, b)),
                (a, b) => a.or(b),
            }
        } else {
            rest.find("}}").map(|i| i.saturating_add(2))
        };

        match end {
            Some(end) => {
                self.mode = Mode::Text;
                Ok(self.token_len(TokenKind::Comment, end))
            }
            None => Err(self.error(LexErrorKind::UnterminatedComment)),
        }
    }

    fn lex_expression(&mut self) -> Result<Option<Token<'a>>, LexError> {
        let rest = self.rest();

        if rest.starts_with("{{{{") {
            return Ok(Some(self.token_len(TokenKind::OpenRawBlock, 4)));
        }
        if rest.starts_with("}}}}") {
            self.mode = Mode::RawBlock(1);
            return Ok(Some(self.token_len(TokenKind::CloseRawBlock, 4)));
        }
        if rest.starts_with("{{") {
            return self.lex_opener().map(Some);
        }

        let Some(c) = self.peek_char() else {
            return Ok(None);
        };

        if c.is_whitespace() {
            let len = rest.find(|c: char| !c.is_whitespace()).unwrap_or(rest.len());
            self.advance_to(self.pos.saturating_add(len));
            return Ok(None);
        }

        let token = match c {
            '(' => self.token_len(TokenKind::OpenSexpr, 1),
            ')' => self.token_len(TokenKind::CloseSexpr, 1),
            '=' => self.token_len(TokenKind::Equals, 1),
            '@' => self.token_len(TokenKind::Data, 1),
            '|' => self.token_len(TokenKind::CloseBlockParams, 1),
            '.' if rest.starts_with("..") => self.token_len(TokenKind::Id, 2),
            '.' if is_lookahead(rest.get(1..).and_then(|s| s.chars().next())) => {
                self.token_len(TokenKind::Id, 1)
            }
            '.' | '/' => self.token_len(TokenKind::Sep, 1),
            '}' if rest.starts_with("}}}") || rest.starts_with("}~}}") => {
                self.mode = Mode::Text;
                let len = if rest.starts_with("}}}") { 3 } else { 4 };
                self.token_len(TokenKind::CloseUnescaped, len)
            }
            '}' | '~' if rest.starts_with("}}") || rest.starts_with("~}}") => {
                self.mode = Mode::Text;
                let len = if rest.starts_with("}}") { 2 } else { 3 };
                self.token_len(TokenKind::Close, len)
            }
            '"' | '\'' => self.lex_string(c)?,
            '[' => self.lex_bracketed_id()?,
            _ => match self.lex_word() {
                Some(token) => token,
                None => return Err(self.error(LexErrorKind::InvalidCharacter { found: c })),
            },
        };
        Ok(Some(token))
    }

    /// Every token starting with `{{` inside expression mode.
    fn lex_opener(&mut self) -> Result<Token<'a>, LexError> {
        let rest = self.rest();
        let strip = rest.as_bytes().get(2) == Some(&b'~');
        let marker = if strip { 3 } else { 2 };
        let after = rest.get(marker..).unwrap_or("");

        if after.starts_with('!') {
            return self.lex_comment();
        }
        if after.starts_with('>') {
            return Ok(self.token_len(TokenKind::OpenPartial, marker.saturating_add(1)));
        }
        if after.starts_with("#>") {
            return Ok(self.token_len(TokenKind::OpenPartialBlock, marker.saturating_add(2)));
        }
        if after.starts_with("#*") {
            return Ok(self.token_len(TokenKind::OpenBlock, marker.saturating_add(2)));
        }
        if after.starts_with('#') {
            return Ok(self.token_len(TokenKind::OpenBlock, marker.saturating_add(1)));
        }
        if after.starts_with('/') {
            return Ok(self.token_len(TokenKind::OpenEndBlock, marker.saturating_add(1)));
        }
        if let Some(len) = standalone_inverse(after) {
            self.mode = Mode::Text;
            return Ok(self.token_len(TokenKind::Inverse, marker.saturating_add(len)));
        }
        if after.starts_with('^') {
            return Ok(self.token_len(TokenKind::OpenInverse, marker.saturating_add(1)));
        }
        let trimmed = after.trim_start();
        if trimmed.starts_with("else") && !trimmed.get(4..).and_then(|s| s.chars().next()).is_some_and(is_id_char) {
            let len = after.len().saturating_sub(trimmed.len()).saturating_add(4);
            return Ok(self.token_len(TokenKind::OpenInverseChain, marker.saturating_add(len)));
        }
        if after.starts_with('{') {
            return Ok(self.token_len(TokenKind::OpenUnescaped, marker.saturating_add(1)));
        }
        if after.starts_with('&') || after.starts_with('*') {
            return Ok(self.token_len(TokenKind::Open, marker.saturating_add(1)));
        }
        Ok(self.token_len(TokenKind::Open, marker))
    }

    fn lex_string(&mut self, quote: char) -> Result<Token<'a>, LexError> {
        let rest = self.rest();
        let mut escaped = false;
        let mut close = None;
        for (i, c) in rest.char_indices().skip(1) {
            if c == quote && !escaped {
                close = Some(i);
                break;
            }
            escaped = c == '\\' && !escaped;
        }

        let Some(close) = close else {
            self.advance_to(self.input.len());
            return Err(LexError::new(
                self.expression_start,
                LexErrorKind::UnterminatedExpression,
            ));
        };

        let inner = rest.get(1..close).unwrap_or("");
        let escape = format!("\\{}", quote);
        let text = if inner.contains(&escape) {
            Cow::Owned(inner.replace(&escape, &quote.to_string()))
        } else {
            Cow::Borrowed(inner)
        };
        let end = self.pos.saturating_add(close).saturating_add(1);
        Ok(self.token_to(TokenKind::String, end, text))
    }

    /// `[literal segment]`, kept with its brackets so the parser can tell it
    /// apart from a bare `this` or `..`.
    fn lex_bracketed_id(&mut self) -> Result<Token<'a>, LexError> {
        let rest = self.rest();
        let mut escaped = false;
        let mut close = None;
        for (i, c) in rest.char_indices().skip(1) {
            if c == ']' && !escaped {
                close = Some(i);
                break;
            }
            escaped = c == '\\' && !escaped;
        }

        let Some(close) = close else {
            return Err(self.error(LexErrorKind::InvalidCharacter { found: '[' }));
        };
        let raw = rest.get(..=close).unwrap_or("");
        let text = if raw.contains('\\') {
            Cow::Owned(raw.replace("\\]", "]").replace("\\\\", "\\"))
        } else {
            Cow::Borrowed(raw)
        };
        let end = self.pos.saturating_add(close).saturating_add(1);
        Ok(self.token_to(TokenKind::Id, end, text))
    }

    /// Keywords, numbers, `as |` and plain identifiers.
    fn lex_word(&mut self) -> Option<Token<'a>> {
        let rest = self.rest();

        if let Some(after) = rest.strip_prefix("as") {
            let trimmed = after.trim_start();
            if trimmed.len() < after.len() && trimmed.starts_with('|') {
                let len = rest.len().saturating_sub(trimmed.len()).saturating_add(1);
                return Some(self.token_len(TokenKind::OpenBlockParams, len));
            }
        }

        for (keyword, kind) in [
            ("true", TokenKind::Boolean),
            ("false", TokenKind::Boolean),
            ("undefined", TokenKind::Undefined),
            ("null", TokenKind::Null),
        ] {
            if rest.starts_with(keyword)
                && is_literal_lookahead(rest.get(keyword.len()..).and_then(|s| s.chars().next()))
            {
                return Some(self.token_len(kind, keyword.len()));
            }
        }

        if let Some(len) = number_len(rest) {
            if is_literal_lookahead(rest.get(len..).and_then(|s| s.chars().next())) {
                return Some(self.token_len(TokenKind::Number, len));
            }
        }

        let len = rest.find(|c: char| !is_id_char(c)).unwrap_or(rest.len());
        if len == 0 || !is_lookahead(rest.get(len..).and_then(|s| s.chars().next())) {
            return None;
        }
        Some(self.token_len(TokenKind::Id, len))
    }
}

/// Length of `^}}`, `^~}}`, `else}}` and friends after the opening braces.
fn standalone_inverse(after: &str) -> Option<usize> {
    let body_start = after.len();
    let rest = if let Some(rest) = after.strip_prefix('^') {
        rest
    } else {
        let trimmed = after.trim_start();
        trimmed.strip_prefix("else")?
    };
    let rest = rest.trim_start();
    let rest = rest.strip_prefix('~').unwrap_or(rest);
    let rest = rest.strip_prefix("}}")?;
    Some(body_start.saturating_sub(rest.len()))
}

/// Length of a `-?[0-9]+(\.[0-9]+)?` prefix.
fn number_len(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut i = usize::from(bytes.first() == Some(&b'-'));
    let digits_start = i;
    while bytes.get(i).is_some_and(u8::is_ascii_digit) {
        i = i.saturating_add(1);
    }
    if i == digits_start {
        return None;
    }
    if bytes.get(i) == Some(&b'.') && bytes.get(i.saturating_add(1)).is_some_and(u8::is_ascii_digit) {
        i = i.saturating_add(1);
        while bytes.get(i).is_some_and(u8::is_ascii_digit) {
            i = i.saturating_add(1);
        }
    }
    Some(i)
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Result<Token<'a>, LexError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_token() {
            Ok(Some(token)) => Some(Ok(token)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(error) => {
                self.done = true;
                Some(Err(error))
            }
        }
    }
}

/// Splits template source into tokens, lazily.
pub(crate) const fn tokenize(input: &str) -> Lexer<'_> {
    Lexer::new(input)
}
