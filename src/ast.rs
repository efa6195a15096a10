use crate::span::Span;

/// `~` markers on either side of a tag.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub(crate) struct StripFlags {
    pub(crate) open: bool,
    pub(crate) close: bool,
}

/// A sequence of statements, either the template root or a block body.
#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct Program {
    pub(crate) body: Vec<Statement>,
    pub(crate) block_params: Vec<String>,
    /// Set on the inverse of an `{{else if ...}}` chain, whose body is the
    /// single chained block.
    pub(crate) chained: bool,
    pub(crate) span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Statement {
    Mustache(Mustache),
    /// `{{*decorator}}`
    Decorator(Mustache),
    Block(Block),
    /// `{{#*decorator}}...{{/decorator}}`
    DecoratorBlock(Block),
    Partial(Partial),
    PartialBlock(PartialBlock),
    Content(Content),
    Comment(Comment),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Mustache {
    pub(crate) path: Expression,
    pub(crate) params: Vec<Expression>,
    pub(crate) hash: Option<Hash>,
    pub(crate) escaped: bool,
    pub(crate) strip: StripFlags,
    pub(crate) span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Block {
    pub(crate) path: Expression,
    pub(crate) params: Vec<Expression>,
    pub(crate) hash: Option<Hash>,
    pub(crate) program: Option<Program>,
    pub(crate) inverse: Option<Program>,
    pub(crate) open_strip: StripFlags,
    pub(crate) inverse_strip: StripFlags,
    pub(crate) close_strip: StripFlags,
    pub(crate) span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Partial {
    /// A path/literal for a static name, a sub-expression for a dynamic one.
    pub(crate) name: Expression,
    pub(crate) params: Vec<Expression>,
    pub(crate) hash: Option<Hash>,
    /// Leading whitespace of a standalone partial tag.
    pub(crate) indent: String,
    pub(crate) strip: StripFlags,
    pub(crate) span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PartialBlock {
    pub(crate) name: Expression,
    pub(crate) params: Vec<Expression>,
    pub(crate) hash: Option<Hash>,
    pub(crate) program: Program,
    pub(crate) open_strip: StripFlags,
    pub(crate) close_strip: StripFlags,
    pub(crate) span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Content {
    pub(crate) value: String,
    /// The text as written, before any whitespace control.
    pub(crate) original: String,
    pub(crate) left_stripped: bool,
    pub(crate) right_stripped: bool,
    pub(crate) span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Comment {
    pub(crate) value: String,
    pub(crate) strip: StripFlags,
    pub(crate) span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expression {
    Path(PathExpression),
    SubExpression(Box<SubExpression>),
    String(String),
    Number(serde_json::Number),
    Boolean(bool),
    Null,
    Undefined,
}

impl Expression {
    /// The expression as written, used for helper names and diagnostics.
    pub(crate) fn original(&self) -> String {
        match self {
            Self::Path(path) => path.original.clone(),
            Self::SubExpression(sexpr) => sexpr.path.original(),
            Self::String(s) => s.clone(),
            Self::Number(n) => n.to_string(),
            Self::Boolean(b) => b.to_string(),
            Self::Null => "null".to_string(),
            Self::Undefined => "undefined".to_string(),
        }
    }

    pub(crate) const fn as_path(&self) -> Option<&PathExpression> {
        match self {
            Self::Path(path) => Some(path),
            Self::SubExpression(_)
            | Self::String(_)
            | Self::Number(_)
            | Self::Boolean(_)
            | Self::Null
            | Self::Undefined => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PathExpression {
    /// Prefixed with `@`.
    pub(crate) data: bool,
    /// Number of leading `../` segments.
    pub(crate) depth: usize,
    /// Named segments, with `this`/`.`/`..` removed.
    pub(crate) parts: Vec<String>,
    pub(crate) original: String,
    pub(crate) span: Span,
}

impl PathExpression {
    /// A path of the form `this.foo`, `./foo` or `.`.
    pub(crate) fn is_scoped(&self) -> bool {
        self.original.starts_with('.')
            || self.original == "this"
            || self.original.starts_with("this.")
            || self.original.starts_with("this/")
    }

    /// A single bare identifier: no `@`, no `../`, no `this`.
    pub(crate) fn is_simple(&self) -> bool {
        self.parts.len() == 1 && !self.is_scoped() && self.depth == 0 && !self.data
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SubExpression {
    pub(crate) path: Expression,
    pub(crate) params: Vec<Expression>,
    pub(crate) hash: Option<Hash>,
    pub(crate) span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Hash {
    pub(crate) pairs: Vec<HashPair>,
    pub(crate) span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct HashPair {
    pub(crate) key: String,
    pub(crate) value: Expression,
}
