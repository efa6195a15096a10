mod ast;
mod codegen;
mod compiler;
mod decorators;
mod engine;
mod error;
mod escape;
mod frame;
mod helpers;
mod interface;
mod lexer;
mod options;
mod parser;
mod runtime;
mod span;
mod template;
mod whitespace;

// Public exports.
pub use codegen::{COMPILER_REVISION, CompiledSpec};
pub use compiler::ParamKind;
pub use decorators::DecoratorProps;
pub use engine::{Environment, RenderOverrides, Registry};
pub use error::{
    BraceletError, BraceletResult, CompileError, LexError, LexErrorKind, ParseError, ParseErrorKind, RuntimeError,
};
pub use escape::escape_expression;
pub use frame::DataFrame;
pub use helpers::{BlockArgs, HelperOptions};
pub use interface::{DecoratorDef, HelperDef, Output, Renderer};
pub use options::CompileOptions;
pub use template::{Template, precompile};
