use std::collections::VecDeque;

use crate::{
    ast::{
        Block, Comment, Content, Expression, Hash, HashPair, Mustache, Partial, PartialBlock,
        PathExpression, Program, Statement, StripFlags, SubExpression,
    },
    error::{BraceletResult, ParseError, ParseErrorKind},
    lexer::{Lexer, Token, TokenKind, tokenize},
    span::{Position, Span},
};

/// Tokens that may begin a statement.
const STATEMENT_START: &[TokenKind] = &[
    TokenKind::Content,
    TokenKind::Comment,
    TokenKind::Open,
    TokenKind::OpenUnescaped,
    TokenKind::OpenBlock,
    TokenKind::OpenInverse,
    TokenKind::OpenRawBlock,
    TokenKind::OpenPartial,
    TokenKind::OpenPartialBlock,
];

/// Tokens that may begin a helper name.
const HELPER_NAME_START: &[TokenKind] = &[
    TokenKind::Id,
    TokenKind::Data,
    TokenKind::String,
    TokenKind::Number,
    TokenKind::Boolean,
    TokenKind::Undefined,
    TokenKind::Null,
];

/// Tokens that may begin a positional parameter.
const PARAM_START: &[TokenKind] = &[
    TokenKind::Id,
    TokenKind::Data,
    TokenKind::String,
    TokenKind::Number,
    TokenKind::Boolean,
    TokenKind::Undefined,
    TokenKind::Null,
    TokenKind::OpenSexpr,
];

/// Tokens that end a nested program.
const PROGRAM_END: &[TokenKind] = &[
    TokenKind::OpenEndBlock,
    TokenKind::Inverse,
    TokenKind::OpenInverseChain,
];

/// Name, params, hash and block params shared by every open tag.
struct OpenTag {
    path: Expression,
    params: Vec<Expression>,
    hash: Option<Hash>,
    block_params: Vec<String>,
    strip: StripFlags,
    open_text: String,
    span: Span,
}

/// The `{{else}} ...` or `{{else if ...}} ...` tail of a block.
struct InverseChain {
    strip: StripFlags,
    program: Program,
    chained: bool,
}

struct Parser<'a> {
    lexer: Lexer<'a>,
    lookahead: VecDeque<Token<'a>>,
    /// End of the last consumed token.
    last_end: Position,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Parser {
            lexer: tokenize(input),
            lookahead: VecDeque::new(),
            last_end: Position::default(),
        }
    }

    /// Makes sure `n + 1` tokens are buffered, if the input has that many.
    fn fill(&mut self, n: usize) -> BraceletResult<()> {
        while self.lookahead.len() <= n {
            match self.lexer.next() {
                Some(token) => self.lookahead.push_back(token?),
                None => break,
            }
        }
        Ok(())
    }

    fn peek_kind(&mut self) -> BraceletResult<Option<TokenKind>> {
        self.peek_nth_kind(0)
    }

    fn peek_nth_kind(&mut self, n: usize) -> BraceletResult<Option<TokenKind>> {
        self.fill(n)?;
        Ok(self.lookahead.get(n).map(|t| t.kind))
    }

    fn peek_is(&mut self, kinds: &[TokenKind]) -> BraceletResult<bool> {
        Ok(self.peek_kind()?.is_some_and(|k| kinds.contains(&k)))
    }

    fn bump(&mut self) -> BraceletResult<Token<'a>> {
        self.fill(0)?;
        match self.lookahead.pop_front() {
            Some(token) => {
                self.last_end = token.span.end;
                Ok(token)
            }
            None => Err(self.make_error(ParseErrorKind::unexpected_eof(None)).into()),
        }
    }

    #[inline]
    fn make_error(&self, kind: ParseErrorKind) -> ParseError {
        ParseError::new(self.last_end, kind)
    }

    /// The error for whatever token is next, given what would have been accepted.
    fn unexpected(&mut self, expected: &[TokenKind]) -> BraceletResult<ParseError> {
        self.fill(0)?;
        let expected: Vec<String> = expected.iter().map(|k| k.describe().to_string()).collect();
        Ok(match self.lookahead.front() {
            Some(token) => ParseError::new(
                token.span.start,
                ParseErrorKind::UnexpectedToken {
                    expected,
                    found: token.kind.describe().to_string(),
                },
            ),
            None => self.make_error(ParseErrorKind::unexpected_eof(Some(expected.join(" or ")))),
        })
    }

    fn expect(&mut self, kind: TokenKind) -> BraceletResult<Token<'a>> {
        if self.peek_kind()? == Some(kind) {
            self.bump()
        } else {
            Err(self.unexpected(&[kind])?.into())
        }
    }

    /// Parses statements until one of `terminators` (or the end of input) is next.
    fn parse_program(&mut self, terminators: &[TokenKind]) -> BraceletResult<Program> {
        let mut body = Vec::new();
        let start = self.last_end;

        loop {
            match self.peek_kind()? {
                None => break,
                Some(kind) if terminators.contains(&kind) => break,
                Some(_) => body.push(self.parse_statement()?),
            }
        }

        Ok(Program {
            body,
            block_params: Vec::new(),
            chained: false,
            span: Span::new(start, self.last_end),
        })
    }

    fn parse_statement(&mut self) -> BraceletResult<Statement> {
        let Some(kind) = self.peek_kind()? else {
            return Err(self.unexpected(STATEMENT_START)?.into());
        };

        match kind {
            TokenKind::Content => {
                let token = self.bump()?;
                Ok(Statement::Content(Content {
                    value: token.text.to_string(),
                    original: token.text.into_owned(),
                    left_stripped: false,
                    right_stripped: false,
                    span: token.span,
                }))
            }
            TokenKind::Comment => {
                let token = self.bump()?;
                Ok(Statement::Comment(Comment {
                    value: strip_comment(&token.text),
                    strip: strip_flags(&token, &token),
                    span: token.span,
                }))
            }
            TokenKind::Open | TokenKind::OpenUnescaped => self.parse_mustache(),
            TokenKind::OpenBlock | TokenKind::OpenInverse => self.parse_block(),
            TokenKind::OpenRawBlock => self.parse_raw_block(),
            TokenKind::OpenPartial => self.parse_partial(),
            TokenKind::OpenPartialBlock => self.parse_partial_block(),
            TokenKind::CloseRawBlock
            | TokenKind::EndRawBlock
            | TokenKind::OpenEndBlock
            | TokenKind::OpenInverseChain
            | TokenKind::Inverse
            | TokenKind::Close
            | TokenKind::CloseUnescaped
            | TokenKind::OpenSexpr
            | TokenKind::CloseSexpr
            | TokenKind::Equals
            | TokenKind::Id
            | TokenKind::Sep
            | TokenKind::Data
            | TokenKind::String
            | TokenKind::Number
            | TokenKind::Boolean
            | TokenKind::Undefined
            | TokenKind::Null
            | TokenKind::OpenBlockParams
            | TokenKind::CloseBlockParams => Err(self.unexpected(STATEMENT_START)?.into()),
        }
    }

    fn parse_mustache(&mut self) -> BraceletResult<Statement> {
        let open = self.bump()?;
        let close_kind = if open.kind == TokenKind::OpenUnescaped {
            TokenKind::CloseUnescaped
        } else {
            TokenKind::Close
        };

        let path = self.parse_helper_name()?;
        let (params, hash) = self.parse_params_and_hash(&[close_kind])?;
        let close = self.expect(close_kind)?;

        let mut chars = open.text.chars();
        let escape_flag = chars.nth(2).and_then(|third| chars.next().or(Some(third)));
        let mustache = Mustache {
            path,
            params,
            hash,
            escaped: !matches!(escape_flag, Some('{' | '&')),
            strip: strip_flags(&open, &close),
            span: open.span.to(close.span),
        };

        if open.text.contains('*') {
            Ok(Statement::Decorator(mustache))
        } else {
            Ok(Statement::Mustache(mustache))
        }
    }

    /// `helperName param* hash? blockParams? CLOSE` after an already-consumed opener.
    fn parse_open_tag(&mut self, open: Token<'a>, allow_block_params: bool) -> BraceletResult<OpenTag> {
        let path = self.parse_helper_name()?;
        let terminators: &[TokenKind] = if allow_block_params {
            &[TokenKind::Close, TokenKind::OpenBlockParams]
        } else {
            &[TokenKind::Close]
        };
        let (params, hash) = self.parse_params_and_hash(terminators)?;

        let mut block_params = Vec::new();
        if allow_block_params && self.peek_kind()? == Some(TokenKind::OpenBlockParams) {
            self.bump()?;
            loop {
                match self.peek_kind()? {
                    Some(TokenKind::Id) => block_params.push(strip_id(&self.bump()?.text)),
                    Some(TokenKind::CloseBlockParams) if !block_params.is_empty() => {
                        self.bump()?;
                        break;
                    }
                    _ => {
                        return Err(self
                            .unexpected(&[TokenKind::Id, TokenKind::CloseBlockParams])?
                            .into());
                    }
                }
            }
        }

        let close = self.expect(TokenKind::Close)?;
        Ok(OpenTag {
            path,
            params,
            hash,
            block_params,
            strip: strip_flags(&open, &close),
            open_text: open.text.into_owned(),
            span: open.span.to(close.span),
        })
    }

    fn parse_block(&mut self) -> BraceletResult<Statement> {
        let open = self.bump()?;
        let inverted = open.kind == TokenKind::OpenInverse;
        let tag = self.parse_open_tag(open, true)?;
        let decorator = tag.open_text.contains('*');

        let mut program = self.parse_program(PROGRAM_END)?;
        program.block_params = tag.block_params.clone();

        let chain = match self.peek_kind()? {
            Some(TokenKind::Inverse) => Some(self.parse_inverse_and_program()?),
            Some(TokenKind::OpenInverseChain) if !inverted => Some(self.parse_inverse_chain()?),
            Some(TokenKind::OpenEndBlock) => None,
            _ => return Err(self.unexpected(&[TokenKind::OpenEndBlock])?.into()),
        };

        let (close_path, close_strip, close_span) = self.parse_close_block()?;
        validate_close(&tag.path, &close_path, close_span)?;

        let mut inverse = None;
        let mut inverse_strip = StripFlags::default();
        if let Some(mut chain) = chain {
            if decorator {
                return Err(ParseError::new(
                    close_span.start,
                    ParseErrorKind::Message("Unexpected inverse block on decorator".to_string()),
                )
                .into());
            }
            if chain.chained {
                set_chain_close_strip(&mut chain.program, close_strip);
            }
            inverse_strip = chain.strip;
            inverse = Some(chain.program);
        }

        let (program, inverse) = if inverted {
            (inverse, Some(program))
        } else {
            (Some(program), inverse)
        };

        let block = Block {
            path: tag.path,
            params: tag.params,
            hash: tag.hash,
            program,
            inverse,
            open_strip: tag.strip,
            inverse_strip,
            close_strip,
            span: tag.span.to(close_span),
        };

        if decorator {
            Ok(Statement::DecoratorBlock(block))
        } else {
            Ok(Statement::Block(block))
        }
    }

    /// `{{else}} program`
    fn parse_inverse_and_program(&mut self) -> BraceletResult<InverseChain> {
        let inverse = self.bump()?;
        let program = self.parse_program(&[TokenKind::OpenEndBlock])?;
        Ok(InverseChain {
            strip: strip_flags(&inverse, &inverse),
            program,
            chained: false,
        })
    }

    /// `{{else if cond}} program inverseChain?`, lowered into a nested block.
    fn parse_inverse_chain(&mut self) -> BraceletResult<InverseChain> {
        let open = self.bump()?;
        let tag = self.parse_open_tag(open, true)?;

        let mut program = self.parse_program(PROGRAM_END)?;
        program.block_params = tag.block_params.clone();

        let next = match self.peek_kind()? {
            Some(TokenKind::Inverse) => Some(self.parse_inverse_and_program()?),
            Some(TokenKind::OpenInverseChain) => Some(self.parse_inverse_chain()?),
            _ => None,
        };

        let (inverse, inverse_strip, close_strip) = match next {
            Some(next) => (Some(next.program), next.strip, next.strip),
            None => (None, StripFlags::default(), StripFlags::default()),
        };

        let span = tag.span.to(Span::new(tag.span.start, self.last_end));
        let block = Block {
            path: tag.path,
            params: tag.params,
            hash: tag.hash,
            program: Some(program),
            inverse,
            open_strip: tag.strip,
            inverse_strip,
            close_strip,
            span,
        };

        Ok(InverseChain {
            strip: tag.strip,
            program: Program {
                body: vec![Statement::Block(block)],
                block_params: Vec::new(),
                chained: true,
                span,
            },
            chained: true,
        })
    }

    /// `{{/name}}`
    fn parse_close_block(&mut self) -> BraceletResult<(Expression, StripFlags, Span)> {
        let open = self.expect(TokenKind::OpenEndBlock)?;
        let path = self.parse_helper_name()?;
        let close = self.expect(TokenKind::Close)?;
        Ok((path, strip_flags(&open, &close), open.span.to(close.span)))
    }

    fn parse_raw_block(&mut self) -> BraceletResult<Statement> {
        let open = self.bump()?;
        let path = self.parse_helper_name()?;
        let (params, hash) = self.parse_params_and_hash(&[TokenKind::CloseRawBlock])?;
        let open_close = self.expect(TokenKind::CloseRawBlock)?;

        let mut text = String::new();
        let mut span = Span::new(open_close.span.end, open_close.span.end);
        while self.peek_kind()? == Some(TokenKind::Content) {
            let token = self.bump()?;
            span = span.to(token.span);
            text.push_str(&token.text);
        }

        let end = self.expect(TokenKind::EndRawBlock)?;
        if path.original() != end.text {
            return Err(ParseError::new(
                end.span.start,
                ParseErrorKind::MismatchedBlock {
                    open: path.original(),
                    close: end.text.into_owned(),
                },
            )
            .into());
        }

        let body = if text.is_empty() {
            Vec::new()
        } else {
            vec![Statement::Content(Content {
                value: text.clone(),
                original: text,
                left_stripped: false,
                right_stripped: false,
                span,
            })]
        };

        Ok(Statement::Block(Block {
            path,
            params,
            hash,
            program: Some(Program {
                body,
                block_params: Vec::new(),
                chained: false,
                span,
            }),
            inverse: None,
            open_strip: StripFlags::default(),
            inverse_strip: StripFlags::default(),
            close_strip: StripFlags::default(),
            span: open.span.to(end.span),
        }))
    }

    fn parse_partial(&mut self) -> BraceletResult<Statement> {
        let open = self.bump()?;
        let name = self.parse_partial_name()?;
        let (params, hash) = self.parse_params_and_hash(&[TokenKind::Close])?;
        let close = self.expect(TokenKind::Close)?;

        Ok(Statement::Partial(Partial {
            name,
            params,
            hash,
            indent: String::new(),
            strip: strip_flags(&open, &close),
            span: open.span.to(close.span),
        }))
    }

    fn parse_partial_block(&mut self) -> BraceletResult<Statement> {
        let open = self.bump()?;
        let name = self.parse_partial_name()?;
        let (params, hash) = self.parse_params_and_hash(&[TokenKind::Close])?;
        let open_close = self.expect(TokenKind::Close)?;
        let open_strip = strip_flags(&open, &open_close);

        let program = self.parse_program(&[TokenKind::OpenEndBlock])?;
        let (close_path, close_strip, close_span) = self.parse_close_block()?;
        validate_close(&name, &close_path, close_span)?;

        Ok(Statement::PartialBlock(PartialBlock {
            name,
            params,
            hash,
            program,
            open_strip,
            close_strip,
            span: open.span.to(close_span),
        }))
    }

    fn parse_partial_name(&mut self) -> BraceletResult<Expression> {
        if self.peek_kind()? == Some(TokenKind::OpenSexpr) {
            self.parse_sexpr()
        } else {
            self.parse_helper_name()
        }
    }

    /// `param* hash?`, stopping before any of `terminators`.
    fn parse_params_and_hash(
        &mut self,
        terminators: &[TokenKind],
    ) -> BraceletResult<(Vec<Expression>, Option<Hash>)> {
        let mut params = Vec::new();
        loop {
            if self.peek_kind()? == Some(TokenKind::Id)
                && self.peek_nth_kind(1)? == Some(TokenKind::Equals)
            {
                let hash = self.parse_hash()?;
                return Ok((params, Some(hash)));
            }
            if self.peek_is(PARAM_START)? {
                params.push(self.parse_param()?);
                continue;
            }
            if self.peek_is(terminators)? {
                return Ok((params, None));
            }
            let mut expected = PARAM_START.to_vec();
            expected.extend_from_slice(terminators);
            return Err(self.unexpected(&expected)?.into());
        }
    }

    fn parse_hash(&mut self) -> BraceletResult<Hash> {
        let mut pairs = Vec::new();
        let mut span: Option<Span> = None;
        while self.peek_kind()? == Some(TokenKind::Id)
            && self.peek_nth_kind(1)? == Some(TokenKind::Equals)
        {
            let key = self.bump()?;
            self.bump()?;
            let value = self.parse_param()?;
            span = Some(span.map_or(key.span, |s| s.to(key.span)).to(Span::new(key.span.start, self.last_end)));
            pairs.push(HashPair {
                key: strip_id(&key.text),
                value,
            });
        }
        Ok(Hash {
            pairs,
            span: span.unwrap_or_default(),
        })
    }

    fn parse_param(&mut self) -> BraceletResult<Expression> {
        if self.peek_kind()? == Some(TokenKind::OpenSexpr) {
            self.parse_sexpr()
        } else {
            self.parse_helper_name()
        }
    }

    fn parse_sexpr(&mut self) -> BraceletResult<Expression> {
        let open = self.expect(TokenKind::OpenSexpr)?;
        let path = self.parse_helper_name()?;
        let (params, hash) = self.parse_params_and_hash(&[TokenKind::CloseSexpr])?;
        let close = self.expect(TokenKind::CloseSexpr)?;
        Ok(Expression::SubExpression(Box::new(SubExpression {
            path,
            params,
            hash,
            span: open.span.to(close.span),
        })))
    }

    fn parse_helper_name(&mut self) -> BraceletResult<Expression> {
        let Some(kind) = self.peek_kind()? else {
            return Err(self.unexpected(HELPER_NAME_START)?.into());
        };

        match kind {
            TokenKind::Id => self.parse_path(false),
            TokenKind::Data => {
                self.bump()?;
                if self.peek_kind()? != Some(TokenKind::Id) {
                    return Err(self.unexpected(&[TokenKind::Id])?.into());
                }
                self.parse_path(true)
            }
            TokenKind::String => Ok(Expression::String(self.bump()?.text.into_owned())),
            TokenKind::Number => {
                let token = self.bump()?;
                parse_number(&token.text).map(Expression::Number).ok_or_else(|| {
                    ParseError::new(
                        token.span.start,
                        ParseErrorKind::Message(format!("Invalid number '{}'", token.text)),
                    )
                    .into()
                })
            }
            TokenKind::Boolean => Ok(Expression::Boolean(self.bump()?.text == "true")),
            TokenKind::Undefined => {
                self.bump()?;
                Ok(Expression::Undefined)
            }
            TokenKind::Null => {
                self.bump()?;
                Ok(Expression::Null)
            }
            TokenKind::Content
            | TokenKind::Comment
            | TokenKind::OpenRawBlock
            | TokenKind::CloseRawBlock
            | TokenKind::EndRawBlock
            | TokenKind::Open
            | TokenKind::OpenUnescaped
            | TokenKind::OpenBlock
            | TokenKind::OpenEndBlock
            | TokenKind::OpenInverse
            | TokenKind::OpenInverseChain
            | TokenKind::OpenPartial
            | TokenKind::OpenPartialBlock
            | TokenKind::Inverse
            | TokenKind::Close
            | TokenKind::CloseUnescaped
            | TokenKind::OpenSexpr
            | TokenKind::CloseSexpr
            | TokenKind::Equals
            | TokenKind::Sep
            | TokenKind::OpenBlockParams
            | TokenKind::CloseBlockParams => Err(self.unexpected(HELPER_NAME_START)?.into()),
        }
    }

    /// `ID (SEP ID)*`, resolving `this`, `.` and `..` segments.
    fn parse_path(&mut self, data: bool) -> BraceletResult<Expression> {
        let first = self.expect(TokenKind::Id)?;
        let start = first.span.start;
        let mut segments = vec![(String::new(), first.text.into_owned())];

        while self.peek_kind()? == Some(TokenKind::Sep) && self.peek_nth_kind(1)? == Some(TokenKind::Id) {
            let sep = self.bump()?;
            let id = self.bump()?;
            segments.push((sep.text.into_owned(), id.text.into_owned()));
        }

        let mut original = if data { "@".to_string() } else { String::new() };
        let mut parts = Vec::new();
        let mut depth = 0usize;

        for (separator, raw) in segments {
            let part = strip_id(&raw);
            let is_literal = part != raw;
            original.push_str(&separator);
            original.push_str(&part);

            if !is_literal && (part == ".." || part == "." || part == "this") {
                if !parts.is_empty() {
                    return Err(ParseError::new(start, ParseErrorKind::InvalidPath { path: original }).into());
                }
                if part == ".." {
                    depth = depth.saturating_add(1);
                }
            } else {
                parts.push(part);
            }
        }

        Ok(Expression::Path(PathExpression {
            data,
            depth,
            parts,
            original,
            span: Span::new(start, self.last_end),
        }))
    }
}

fn strip_flags(open: &Token<'_>, close: &Token<'_>) -> StripFlags {
    StripFlags {
        open: open.strips_open(),
        close: close.strips_close(),
    }
}

/// Removes the brackets from a `[literal]` segment.
fn strip_id(text: &str) -> String {
    text.strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(text)
        .to_string()
}

fn strip_comment(text: &str) -> String {
    let text = text.strip_prefix("{{").unwrap_or(text);
    let text = text.strip_prefix('~').unwrap_or(text);
    let text = text.strip_prefix('!').unwrap_or(text);
    let text = text.strip_prefix("--").unwrap_or(text);
    let text = text.strip_suffix("}}").unwrap_or(text);
    let text = text.strip_suffix('~').unwrap_or(text);
    let text = text.strip_suffix("--").unwrap_or(text);
    text.to_string()
}

fn parse_number(text: &str) -> Option<serde_json::Number> {
    if !text.contains('.') {
        if let Ok(n) = text.parse::<i64>() {
            return Some(n.into());
        }
    }
    text.parse::<f64>().ok().and_then(serde_json::Number::from_f64)
}

fn validate_close(open: &Expression, close: &Expression, span: Span) -> BraceletResult<()> {
    let (open, close) = (open.original(), close.original());
    if open == close {
        Ok(())
    } else {
        Err(ParseError::new(span.start, ParseErrorKind::MismatchedBlock { open, close }).into())
    }
}

/// Every block in an `{{else if}}` chain shares the close tag of the outer block.
fn set_chain_close_strip(program: &mut Program, strip: StripFlags) {
    let chained = program.chained;
    if let Some(Statement::Block(block)) = program.body.first_mut() {
        block.close_strip = strip;
        if let Some(inverse) = block.inverse.as_mut().filter(|_| chained) {
            set_chain_close_strip(inverse, strip);
        }
    }
}

/// Parses template source into a [`Program`].
pub(crate) fn parse(input: &str) -> BraceletResult<Program> {
    let mut parser = Parser::new(input);
    let program = parser.parse_program(&[])?;

    if parser.peek_kind()?.is_some() {
        return Err(parser.unexpected(STATEMENT_START)?.into());
    }

    log::debug!("parsed template into {} top-level statements", program.body.len());
    Ok(program)
}
