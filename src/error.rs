use crate::span::Position;

pub type BraceletResult<T> = std::result::Result<T, BraceletError>;

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LexErrorKind {
    /// Input ended inside `{{ ... }}`.
    UnterminatedExpression,
    /// Input ended inside `{{!-- ... --}}` or `{{! ... }}`.
    UnterminatedComment,
    /// Input ended before the `{{{{/name}}}}` closing a raw block.
    UnterminatedRawBlock,
    /// A character that cannot start any token inside an expression.
    InvalidCharacter { found: char },
}

impl std::fmt::Display for LexErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnterminatedExpression => write!(f, "Unterminated expression, expected '}}}}'"),
            Self::UnterminatedComment => write!(f, "Unterminated comment"),
            Self::UnterminatedRawBlock => write!(f, "Unterminated raw block"),
            Self::InvalidCharacter { found } => write!(f, "Invalid character '{}'", found),
        }
    }
}

impl std::error::Error for LexErrorKind {}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LexError {
    pub line: usize,
    pub column: usize,
    pub kind: LexErrorKind,
}

impl LexError {
    pub(crate) const fn new(position: Position, kind: LexErrorKind) -> Self {
        Self {
            line: position.line,
            column: position.column,
            kind,
        }
    }
}

impl std::fmt::Display for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Lex error at line {}, column {}: {}",
            self.line, self.column, self.kind
        )
    }
}

impl std::error::Error for LexError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParseErrorKind {
    UnexpectedToken {
        expected: Vec<String>,
        found: String,
    },
    UnexpectedEOF {
        /// Describes what was expected, e.g., " (expected '{{/if}}')"
        expected_what: String,
    },
    /// A block closed with a different name than it was opened with.
    MismatchedBlock {
        open: String,
        close: String,
    },
    /// `..`, `.` or `this` after a named segment, e.g. `foo/../bar`.
    InvalidPath {
        path: String,
    },
    Message(String),
}

impl std::fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnexpectedToken { expected, found } => {
                write!(f, "Expected {}, found {}", expected.join(", "), found)
            }
            Self::UnexpectedEOF { expected_what } => {
                write!(f, "Unexpected EOF{}", expected_what)
            }
            Self::MismatchedBlock { open, close } => {
                write!(f, "{} doesn't match {}", open, close)
            }
            Self::InvalidPath { path } => {
                write!(f, "Invalid path: {}", path)
            }
            Self::Message(msg) => {
                write!(f, "Parser error: {}", msg)
            }
        }
    }
}

impl std::error::Error for ParseErrorKind {}

impl ParseErrorKind {
    pub fn unexpected_eof(expected: Option<String>) -> Self {
        Self::UnexpectedEOF {
            expected_what: expected.map_or_else(String::new, |e| format!(" (expected '{}')", e)),
        }
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParseError {
    pub line: usize,
    pub column: usize,
    pub kind: ParseErrorKind,
}

impl ParseError {
    pub(crate) const fn new(position: Position, kind: ParseErrorKind) -> Self {
        Self {
            line: position.line,
            column: position.column,
            kind,
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Parse error at line {}, column {}: {}",
            self.line, self.column, self.kind
        )
    }
}

impl std::error::Error for ParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CompileError {
    /// `known_helpers_only` is set and the template calls a helper outside the set.
    UnknownHelper { name: String, line: usize, column: usize },
    /// Partials accept at most one positional context argument.
    PartialArguments { count: usize, line: usize, column: usize },
    /// The opcode stream did not have the shape the code generator expects.
    Internal { message: String },
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownHelper { name, line, column } => write!(
                f,
                "Compile error at line {}, column {}: known_helpers_only is set, but the unknown helper '{}' is used",
                line, column, name
            ),
            Self::PartialArguments { count, line, column } => write!(
                f,
                "Compile error at line {}, column {}: unsupported number of partial arguments: {}",
                line, column, count
            ),
            Self::Internal { message } => write!(f, "Internal compiler error: {}", message),
        }
    }
}

impl std::error::Error for CompileError {}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RuntimeError {
    MissingPartial {
        name: String,
    },
    MissingHelper {
        name: String,
    },
    MissingDecorator {
        name: String,
    },
    /// Raised in strict mode, and when `assume_objects` walks through a null.
    MissingProperty {
        name: String,
        parent: String,
        line: usize,
        column: usize,
    },
    /// A built-in helper was called with the wrong number of arguments.
    HelperArity {
        helper: String,
        message: String,
    },
    MissingIterationTarget,
    DuplicateRegistration {
        kind: String,
        name: String,
    },
    RevisionMismatch {
        expected: u32,
        found: u32,
    },
    /// Failure reported by a user-supplied helper or decorator.
    Helper {
        name: String,
        message: String,
    },
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingPartial { name } => {
                write!(f, "The partial {} could not be found", name)
            }
            Self::MissingHelper { name } => write!(f, "Missing helper: \"{}\"", name),
            Self::MissingDecorator { name } => write!(f, "Missing decorator: \"{}\"", name),
            Self::MissingProperty {
                name,
                parent,
                line,
                column,
            } => write!(
                f,
                "\"{}\" not defined in {} - {}:{}",
                name, parent, line, column
            ),
            Self::HelperArity { message, .. } => write!(f, "{}", message),
            Self::MissingIterationTarget => write!(f, "Must pass iterator to #each"),
            Self::DuplicateRegistration { kind, name } => {
                write!(f, "{} \"{}\" registered twice in one call", kind, name)
            }
            Self::RevisionMismatch { expected, found } if found < expected => write!(
                f,
                "Template was precompiled with an older version of the compiler (revision {}) than the current runtime (revision {}). Please recompile the template.",
                found, expected
            ),
            Self::RevisionMismatch { expected, found } => write!(
                f,
                "Template was precompiled with a newer version of the compiler (revision {}) than the current runtime (revision {}). Please update the runtime.",
                found, expected
            ),
            Self::Helper { name, message } => write!(f, "Helper \"{}\" failed: {}", name, message),
        }
    }
}

impl std::error::Error for RuntimeError {}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BraceletError {
    TemplateExists { template_name: String },
    MissingTemplate { template_name: String },
    Lex(LexError),
    Parse(ParseError),
    Compile(CompileError),
    Runtime(RuntimeError),
}

impl std::fmt::Display for BraceletError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TemplateExists { template_name } => {
                write!(f, "Template already exists: {}", template_name)
            }
            Self::MissingTemplate { template_name } => {
                write!(f, "Template not found: {}", template_name)
            }
            Self::Lex(error) => write!(f, "{}", error),
            Self::Parse(error) => write!(f, "{}", error),
            Self::Compile(error) => write!(f, "{}", error),
            Self::Runtime(error) => write!(f, "{}", error),
        }
    }
}

impl std::error::Error for BraceletError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Lex(error) => Some(error),
            Self::Parse(error) => Some(error),
            Self::Compile(error) => Some(error),
            Self::Runtime(error) => Some(error),
            Self::TemplateExists { .. } | Self::MissingTemplate { .. } => None,
        }
    }
}

impl From<LexError> for BraceletError {
    fn from(error: LexError) -> Self {
        Self::Lex(error)
    }
}

impl From<ParseError> for BraceletError {
    fn from(error: ParseError) -> Self {
        Self::Parse(error)
    }
}

impl From<CompileError> for BraceletError {
    fn from(error: CompileError) -> Self {
        Self::Compile(error)
    }
}

impl From<RuntimeError> for BraceletError {
    fn from(error: RuntimeError) -> Self {
        Self::Runtime(error)
    }
}
