//! Lowers a normalized AST into stack-machine opcodes, one opcode list per
//! program. Block and inverse bodies become child programs.

use serde_json::Value;

use crate::{
    ast::{
        Block, Expression, Hash, Mustache, PathExpression, Program, Statement, SubExpression,
    },
    error::{BraceletResult, CompileError},
    options::CompileOptions,
    span::Span,
};

/// Kind of a helper parameter, reported to helpers under `string_params`.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ParamKind {
    Path,
    SubExpression,
    String,
    Number,
    Boolean,
    Null,
    Undefined,
}

impl ParamKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Path => "PathExpression",
            Self::SubExpression => "SubExpression",
            Self::String => "StringLiteral",
            Self::Number => "NumberLiteral",
            Self::Boolean => "BooleanLiteral",
            Self::Null => "NullLiteral",
            Self::Undefined => "UndefinedLiteral",
        }
    }

    const fn of(expr: &Expression) -> Self {
        match expr {
            Expression::Path(_) => Self::Path,
            Expression::SubExpression(_) => Self::SubExpression,
            Expression::String(_) => Self::String,
            Expression::Number(_) => Self::Number,
            Expression::Boolean(_) => Self::Boolean,
            Expression::Null => Self::Null,
            Expression::Undefined => Self::Undefined,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Opcode {
    AppendContent(String),
    /// Selects the context `depth` levels up for the next lookup.
    GetContext(usize),
    PushContext,
    LookupOnContext {
        parts: Vec<String>,
        falsy: bool,
        strict: bool,
        scoped: bool,
    },
    LookupBlockParam {
        depth: usize,
        index: usize,
        parts: Vec<String>,
    },
    LookupData {
        depth: usize,
        parts: Vec<String>,
        strict: bool,
    },
    PushLiteral(Value),
    PushString(String),
    /// Annotates the next parameter with its source path.
    PushId {
        kind: ParamKind,
        id: Option<String>,
    },
    /// A parameter passed as source text. `None` leaves the value to the
    /// sub-expression that follows.
    PushStringParam {
        kind: ParamKind,
        value: Option<Value>,
    },
    /// Index into the enclosing program's children.
    PushProgram(Option<usize>),
    EmptyHash {
        omit: bool,
    },
    PushHash,
    AssignToHash(String),
    PopHash,
    InvokeHelper {
        argc: usize,
        name: String,
        simple: bool,
    },
    InvokeKnownHelper {
        argc: usize,
        name: String,
    },
    InvokeAmbiguous {
        name: String,
        block: bool,
    },
    InvokePartial {
        dynamic: bool,
        name: String,
        indent: String,
    },
    BlockValue(String),
    AmbiguousBlockValue,
    Append,
    AppendEscaped,
    RegisterDecorator {
        argc: usize,
        name: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Op {
    pub(crate) opcode: Opcode,
    pub(crate) span: Span,
}

/// One lowered program together with the programs it references.
#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct CompiledProgram {
    pub(crate) opcodes: Vec<Op>,
    /// Opcodes evaluating decorator arguments, run before the body.
    pub(crate) decorators: Vec<Op>,
    pub(crate) children: Vec<CompiledProgram>,
    pub(crate) block_params: usize,
    pub(crate) uses_data: bool,
    pub(crate) uses_depths: bool,
    pub(crate) uses_block_params: bool,
    pub(crate) uses_decorators: bool,
    pub(crate) uses_partials: bool,
    pub(crate) is_simple: bool,
}

impl CompiledProgram {
    /// Structural equality, ignoring source spans.
    pub(crate) fn equivalent(&self, other: &Self) -> bool {
        fn same_ops(a: &[Op], b: &[Op]) -> bool {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.opcode == y.opcode)
        }

        same_ops(&self.opcodes, &other.opcodes)
            && same_ops(&self.decorators, &other.decorators)
            && self.block_params == other.block_params
            && self.children.len() == other.children.len()
            && self
                .children
                .iter()
                .zip(&other.children)
                .all(|(a, b)| a.equivalent(b))
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum SexprKind {
    Helper,
    Simple,
    Ambiguous,
}

struct Compiler<'o> {
    options: &'o CompileOptions,
    /// Declared block params of every enclosing program, innermost last.
    scopes: Vec<Vec<String>>,
    program: CompiledProgram,
    in_decorator: bool,
}

impl<'o> Compiler<'o> {
    fn new(options: &'o CompileOptions, scopes: Vec<Vec<String>>) -> Self {
        Self {
            options,
            scopes,
            program: CompiledProgram::default(),
            in_decorator: false,
        }
    }

    fn emit(&mut self, opcode: Opcode, span: Span) {
        let op = Op { opcode, span };
        if self.in_decorator {
            self.program.decorators.push(op);
        } else {
            self.program.opcodes.push(op);
        }
    }

    fn compile(mut self, program: &Program) -> BraceletResult<(CompiledProgram, Vec<Vec<String>>)> {
        self.scopes.push(program.block_params.clone());
        for statement in &program.body {
            self.statement(statement)?;
        }
        self.scopes.pop();

        self.program.is_simple = program.body.len() == 1;
        self.program.block_params = program.block_params.len();
        if self.options.compat {
            self.program.uses_depths = true;
        }
        Ok((self.program, self.scopes))
    }

    fn child(&mut self, program: &Program) -> BraceletResult<usize> {
        let scopes = std::mem::take(&mut self.scopes);
        let (child, scopes) = Compiler::new(self.options, scopes).compile(program)?;
        self.scopes = scopes;

        self.program.uses_depths |= child.uses_depths;
        self.program.uses_partials |= child.uses_partials;
        self.program.uses_data |= child.uses_data;
        self.program.uses_block_params |= child.uses_block_params;
        self.program.uses_decorators |= child.uses_decorators;

        let index = self.program.children.len();
        self.program.children.push(child);
        Ok(index)
    }

    fn statement(&mut self, statement: &Statement) -> BraceletResult<()> {
        match statement {
            Statement::Content(content) => {
                if !content.value.is_empty() {
                    self.emit(Opcode::AppendContent(content.value.clone()), content.span);
                }
                Ok(())
            }
            Statement::Comment(_) => Ok(()),
            Statement::Mustache(mustache) => self.mustache(mustache),
            Statement::Decorator(decorator) => self.decorator(
                &decorator.path,
                &decorator.params,
                decorator.hash.as_ref(),
                None,
                decorator.span,
            ),
            Statement::Block(block) => self.block(block),
            Statement::DecoratorBlock(block) => self.decorator(
                &block.path,
                &block.params,
                block.hash.as_ref(),
                block.program.as_ref(),
                block.span,
            ),
            Statement::Partial(partial) => self.partial(
                &partial.name,
                &partial.params,
                partial.hash.as_ref(),
                None,
                &partial.indent,
                partial.span,
            ),
            Statement::PartialBlock(block) => self.partial(
                &block.name,
                &block.params,
                block.hash.as_ref(),
                Some(&block.program),
                "",
                block.span,
            ),
        }
    }

    fn mustache(&mut self, mustache: &Mustache) -> BraceletResult<()> {
        let path = callee_path(&mustache.path);
        self.sexpr(&path, &mustache.params, mustache.hash.as_ref(), false, mustache.span)?;

        if mustache.escaped && !self.options.no_escape {
            self.emit(Opcode::AppendEscaped, mustache.span);
        } else {
            self.emit(Opcode::Append, mustache.span);
        }
        Ok(())
    }

    fn sub_expression(&mut self, sexpr: &SubExpression) -> BraceletResult<()> {
        let path = callee_path(&sexpr.path);
        self.sexpr(&path, &sexpr.params, sexpr.hash.as_ref(), true, sexpr.span)
    }

    fn sexpr(
        &mut self,
        path: &PathExpression,
        params: &[Expression],
        hash: Option<&Hash>,
        is_sexpr: bool,
        span: Span,
    ) -> BraceletResult<()> {
        match self.classify(path, params, hash, is_sexpr) {
            SexprKind::Simple => {
                self.path(path, true, false);
                Ok(())
            }
            SexprKind::Helper => self.helper_sexpr(path, params, hash, None, None, span),
            SexprKind::Ambiguous => {
                self.ambiguous_sexpr(path, None, None, span);
                Ok(())
            }
        }
    }

    fn block(&mut self, block: &Block) -> BraceletResult<()> {
        let path = callee_path(&block.path);
        let program = block.program.as_ref().map(|p| self.child(p)).transpose()?;
        let inverse = block.inverse.as_ref().map(|p| self.child(p)).transpose()?;
        let span = block.span;

        match self.classify(&path, &block.params, block.hash.as_ref(), false) {
            SexprKind::Helper => {
                self.helper_sexpr(&path, &block.params, block.hash.as_ref(), program, inverse, span)?;
            }
            SexprKind::Simple => {
                self.path(&path, true, false);
                self.emit(Opcode::PushProgram(program), span);
                self.emit(Opcode::PushProgram(inverse), span);
                self.emit(Opcode::EmptyHash { omit: false }, span);
                self.emit(Opcode::BlockValue(path.original.clone()), span);
            }
            SexprKind::Ambiguous => {
                self.ambiguous_sexpr(&path, program, inverse, span);
                self.emit(Opcode::PushProgram(program), span);
                self.emit(Opcode::PushProgram(inverse), span);
                self.emit(Opcode::EmptyHash { omit: false }, span);
                self.emit(Opcode::AmbiguousBlockValue, span);
            }
        }

        self.emit(Opcode::Append, span);
        Ok(())
    }

    fn decorator(
        &mut self,
        path: &Expression,
        params: &[Expression],
        hash: Option<&Hash>,
        program: Option<&Program>,
        span: Span,
    ) -> BraceletResult<()> {
        let program = program.map(|p| self.child(p)).transpose()?;

        let was_in_decorator = std::mem::replace(&mut self.in_decorator, true);
        let argc = self.setup_full_mustache_params(params, hash, program, None, false)?;
        self.emit(
            Opcode::RegisterDecorator {
                argc,
                name: path.original(),
            },
            span,
        );
        self.in_decorator = was_in_decorator;

        self.program.uses_decorators = true;
        Ok(())
    }

    fn partial(
        &mut self,
        name: &Expression,
        params: &[Expression],
        hash: Option<&Hash>,
        program: Option<&Program>,
        indent: &str,
        span: Span,
    ) -> BraceletResult<()> {
        self.program.uses_partials = true;
        let program = program.map(|p| self.child(p)).transpose()?;

        if params.len() > 1 {
            return Err(CompileError::PartialArguments {
                count: params.len(),
                line: span.start.line,
                column: span.start.column,
            }
            .into());
        }

        let dynamic = matches!(name, Expression::SubExpression(_));
        if let Expression::SubExpression(sexpr) = name {
            self.sub_expression(sexpr)?;
        }

        if params.is_empty() {
            if self.options.explicit_partial_context {
                self.emit(Opcode::PushLiteral(Value::Null), span);
            } else {
                let this = PathExpression {
                    data: false,
                    depth: 0,
                    parts: Vec::new(),
                    original: String::new(),
                    span,
                };
                self.setup_full_mustache_params(&[Expression::Path(this)], hash, program, None, true)?;
                return self.finish_partial(dynamic, name, indent, span);
            }
        }

        self.setup_full_mustache_params(params, hash, program, None, true)?;
        self.finish_partial(dynamic, name, indent, span)
    }

    fn finish_partial(
        &mut self,
        dynamic: bool,
        name: &Expression,
        indent: &str,
        span: Span,
    ) -> BraceletResult<()> {
        let mut indent = indent.to_string();
        if self.options.prevent_indent && !indent.is_empty() {
            self.emit(Opcode::AppendContent(std::mem::take(&mut indent)), span);
        }

        self.emit(
            Opcode::InvokePartial {
                dynamic,
                name: name.original(),
                indent,
            },
            span,
        );
        self.emit(Opcode::Append, span);
        Ok(())
    }

    fn classify(
        &self,
        path: &PathExpression,
        params: &[Expression],
        hash: Option<&Hash>,
        is_sexpr: bool,
    ) -> SexprKind {
        let simple = path.is_simple();
        let is_block_param = simple
            && path
                .parts
                .first()
                .is_some_and(|name| self.block_param_index(name).is_some());

        let mut is_helper = !is_block_param && (is_sexpr || !params.is_empty() || hash.is_some());
        let mut eligible = !is_block_param && (is_helper || simple);

        if eligible && !is_helper {
            let name = path.parts.first().map_or("", String::as_str);
            if self.options.is_known_helper(name) {
                is_helper = true;
            } else if self.options.known_helpers_only {
                eligible = false;
            }
        }

        if is_helper {
            SexprKind::Helper
        } else if eligible {
            SexprKind::Ambiguous
        } else {
            SexprKind::Simple
        }
    }

    fn helper_sexpr(
        &mut self,
        path: &PathExpression,
        params: &[Expression],
        hash: Option<&Hash>,
        program: Option<usize>,
        inverse: Option<usize>,
        span: Span,
    ) -> BraceletResult<()> {
        let argc = self.setup_full_mustache_params(params, hash, program, inverse, false)?;
        let name = path.parts.first().cloned().unwrap_or_default();

        if self.options.is_known_helper(&name) {
            self.emit(Opcode::InvokeKnownHelper { argc, name }, span);
        } else if self.options.known_helpers_only {
            return Err(CompileError::UnknownHelper {
                name,
                line: span.start.line,
                column: span.start.column,
            }
            .into());
        } else {
            self.emit(
                Opcode::InvokeHelper {
                    argc,
                    name: path.original.clone(),
                    simple: path.is_simple(),
                },
                span,
            );
        }
        Ok(())
    }

    fn ambiguous_sexpr(
        &mut self,
        path: &PathExpression,
        program: Option<usize>,
        inverse: Option<usize>,
        span: Span,
    ) {
        let name = path.parts.first().cloned().unwrap_or_default();
        let block = program.is_some() || inverse.is_some();

        self.emit(Opcode::GetContext(path.depth), span);
        self.emit(Opcode::PushProgram(program), span);
        self.emit(Opcode::PushProgram(inverse), span);
        self.path(path, true, false);
        self.emit(Opcode::InvokeAmbiguous { name, block }, span);
    }

    fn setup_full_mustache_params(
        &mut self,
        params: &[Expression],
        hash: Option<&Hash>,
        program: Option<usize>,
        inverse: Option<usize>,
        omit_empty: bool,
    ) -> BraceletResult<usize> {
        for param in params {
            self.push_param(param)?;
        }

        let span = Span::default();
        self.emit(Opcode::PushProgram(program), span);
        self.emit(Opcode::PushProgram(inverse), span);

        match hash {
            Some(hash) => self.hash(hash)?,
            None => self.emit(Opcode::EmptyHash { omit: omit_empty }, span),
        }
        Ok(params.len())
    }

    fn hash(&mut self, hash: &Hash) -> BraceletResult<()> {
        self.emit(Opcode::PushHash, hash.span);
        for pair in &hash.pairs {
            self.push_param(&pair.value)?;
        }
        for pair in hash.pairs.iter().rev() {
            self.emit(Opcode::AssignToHash(pair.key.clone()), hash.span);
        }
        self.emit(Opcode::PopHash, hash.span);
        Ok(())
    }

    fn push_param(&mut self, param: &Expression) -> BraceletResult<()> {
        let kind = ParamKind::of(param);
        let span = param.as_path().map(|p| p.span).unwrap_or_default();

        if self.options.string_params {
            let value = match param {
                Expression::Path(path) => {
                    if path.depth > 0 {
                        self.program.uses_depths = true;
                    }
                    self.emit(Opcode::GetContext(path.depth), span);
                    Some(Value::String(string_param(&path.original)))
                }
                Expression::SubExpression(_) => None,
                Expression::String(s) => Some(Value::String(s.clone())),
                Expression::Number(n) => Some(Value::Number(n.clone())),
                Expression::Boolean(b) => Some(Value::Bool(*b)),
                Expression::Null | Expression::Undefined => Some(Value::Null),
            };
            let is_value = value.is_some();
            self.emit(Opcode::PushStringParam { kind, value }, span);
            if !is_value {
                self.expression(param)?;
            }
            return Ok(());
        }

        if self.options.track_ids {
            let id = match param {
                Expression::Path(path) => Some(tracked_id(&path.original)),
                Expression::SubExpression(_)
                | Expression::String(_)
                | Expression::Number(_)
                | Expression::Boolean(_)
                | Expression::Null
                | Expression::Undefined => None,
            };
            self.emit(Opcode::PushId { kind, id }, span);
        }

        self.expression(param)
    }

    fn expression(&mut self, expr: &Expression) -> BraceletResult<()> {
        match expr {
            Expression::Path(path) => self.path(path, false, false),
            Expression::SubExpression(sexpr) => self.sub_expression(sexpr)?,
            Expression::String(s) => self.emit(Opcode::PushString(s.clone()), Span::default()),
            Expression::Number(n) => {
                self.emit(Opcode::PushLiteral(Value::Number(n.clone())), Span::default());
            }
            Expression::Boolean(b) => self.emit(Opcode::PushLiteral(Value::Bool(*b)), Span::default()),
            Expression::Null | Expression::Undefined => {
                self.emit(Opcode::PushLiteral(Value::Null), Span::default());
            }
        }
        Ok(())
    }

    fn path(&mut self, path: &PathExpression, strict: bool, falsy: bool) {
        if path.depth > 0 {
            self.program.uses_depths = true;
        }
        self.emit(Opcode::GetContext(path.depth), path.span);

        let scoped = path.is_scoped();
        let block_param = match path.parts.first() {
            Some(name) if path.depth == 0 && !scoped && !path.data => self.block_param_index(name),
            Some(_) | None => None,
        };

        let opcode = if let Some((depth, index)) = block_param {
            self.program.uses_block_params = true;
            Opcode::LookupBlockParam {
                depth,
                index,
                parts: path.parts.clone(),
            }
        } else if path.parts.is_empty() {
            Opcode::PushContext
        } else if path.data {
            self.program.uses_data = true;
            Opcode::LookupData {
                depth: path.depth,
                parts: path.parts.clone(),
                strict,
            }
        } else {
            Opcode::LookupOnContext {
                parts: path.parts.clone(),
                falsy,
                strict,
                scoped,
            }
        };
        self.emit(opcode, path.span);
    }

    /// `(program depth, position)` of a block param visible from here.
    fn block_param_index(&self, name: &str) -> Option<(usize, usize)> {
        self.scopes
            .iter()
            .rev()
            .enumerate()
            .find_map(|(depth, params)| params.iter().position(|p| p == name).map(|i| (depth, i)))
    }
}

/// The callee of a mustache or block. Literal callees are looked up by their text.
fn callee_path(expr: &Expression) -> PathExpression {
    match expr {
        Expression::Path(path) => path.clone(),
        Expression::SubExpression(_)
        | Expression::String(_)
        | Expression::Number(_)
        | Expression::Boolean(_)
        | Expression::Null
        | Expression::Undefined => {
            let original = expr.original();
            PathExpression {
                data: false,
                depth: 0,
                parts: vec![original.clone()],
                original,
                span: Span::default(),
            }
        }
    }
}

/// `../foo/bar` -> `foo.bar`
fn string_param(original: &str) -> String {
    let mut rest = original;
    loop {
        if let Some(stripped) = rest.strip_prefix("../") {
            rest = stripped;
        } else if let Some(stripped) = rest.strip_prefix("./") {
            rest = stripped;
        } else {
            break;
        }
    }
    rest.replace('/', ".")
}

/// `this.foo` -> `foo`, `./foo` -> `foo`, `.` -> ``
fn tracked_id(original: &str) -> String {
    let id = if original == "this" {
        ""
    } else {
        original.strip_prefix("this.").unwrap_or(original)
    };
    let id = id.strip_prefix("./").unwrap_or(id);
    if id == "." { String::new() } else { id.to_string() }
}

/// Compiles a normalized template AST.
pub(crate) fn compile(program: &Program, options: &CompileOptions) -> BraceletResult<CompiledProgram> {
    let (mut compiled, _) = Compiler::new(options, Vec::new()).compile(program)?;
    compiled.uses_data |= options.data;
    log::debug!(
        "compiled template: {} opcodes, {} child programs",
        compiled.opcodes.len(),
        compiled.children.len()
    );
    Ok(compiled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::BraceletError, parser::parse, whitespace::WhitespaceControl};

    fn compile_str(source: &str, options: &CompileOptions) -> BraceletResult<CompiledProgram> {
        let mut program = parse(source)?;
        WhitespaceControl::new(options.ignore_standalone).apply(&mut program);
        compile(&program, options)
    }

    fn opcodes(source: &str) -> Vec<Opcode> {
        compile_str(source, &CompileOptions::default())
            .unwrap()
            .opcodes
            .into_iter()
            .map(|op| op.opcode)
            .collect()
    }

    fn has(ops: &[Opcode], pred: impl Fn(&Opcode) -> bool) -> bool {
        ops.iter().any(pred)
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_content_and_escaped_ambiguous() {
        let ops = opcodes("Hello {{name}}!");
        assert_eq!(ops[0], Opcode::AppendContent("Hello ".to_string()));
        assert!(has(&ops, |op| matches!(op, Opcode::InvokeAmbiguous { name, block: false } if name == "name")));
        assert!(has(&ops, |op| *op == Opcode::AppendEscaped));
        assert_eq!(ops.last(), Some(&Opcode::AppendContent("!".to_string())));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_simple_path_is_plain_lookup() {
        let ops = opcodes("{{{foo.bar}}}");
        assert!(has(&ops, |op| matches!(op, Opcode::LookupOnContext { parts, strict: true, .. } if parts.len() == 2)));
        assert!(!has(&ops, |op| matches!(op, Opcode::InvokeAmbiguous { .. })));
        assert_eq!(ops.last(), Some(&Opcode::Append));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_helper_with_params() {
        let ops = opcodes("{{upper name}}");
        assert!(has(&ops, |op| matches!(op, Opcode::InvokeHelper { argc: 1, name, simple: true } if name == "upper")));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_known_helper() {
        let ops = opcodes("{{#if a}}x{{/if}}");
        assert!(has(&ops, |op| matches!(op, Opcode::InvokeKnownHelper { argc: 1, name } if name == "if")));
        assert!(has(&ops, |op| *op == Opcode::PushProgram(Some(0))));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_known_helpers_only() {
        let options = CompileOptions::default().with_known_helpers_only(true);
        let err = compile_str("{{upper name}}", &options).unwrap_err();
        assert!(matches!(err, BraceletError::Compile(CompileError::UnknownHelper { ref name, .. }) if name == "upper"));

        let compiled = compile_str("{{name}}", &options).unwrap();
        assert!(!compiled.opcodes.iter().any(|op| matches!(op.opcode, Opcode::InvokeAmbiguous { .. })));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_block_param_lookup() {
        let compiled = compile_str(
            "{{#each items as |item|}}{{item.name}}{{/each}}",
            &CompileOptions::default(),
        )
        .unwrap();
        let child = &compiled.children[0];
        assert!(child.uses_block_params);
        assert!(child.opcodes.iter().any(|op| matches!(
            &op.opcode,
            Opcode::LookupBlockParam { depth: 0, index: 0, parts } if parts.len() == 2
        )));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_depths_flag_bubbles_up() {
        let compiled = compile_str("{{#each items}}{{../title}}{{/each}}", &CompileOptions::default()).unwrap();
        assert!(compiled.children[0].uses_depths);
        assert!(compiled.uses_depths);

        let compiled = compile_str("{{#each items}}{{title}}{{/each}}", &CompileOptions::default()).unwrap();
        assert!(!compiled.uses_depths);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_hash_assigned_in_reverse() {
        let ops = opcodes("{{link a=1 b=2}}");
        let keys: Vec<&str> = ops
            .iter()
            .filter_map(|op| match op {
                Opcode::AssignToHash(key) => Some(key.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(keys, vec!["b", "a"]);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_partials() {
        let ops = opcodes("{{> header}}");
        assert!(has(&ops, |op| *op == Opcode::PushContext));
        assert!(has(&ops, |op| matches!(op, Opcode::InvokePartial { dynamic: false, name, .. } if name == "header")));

        let err = compile_str("{{> header a b}}", &CompileOptions::default()).unwrap_err();
        assert!(matches!(err, BraceletError::Compile(CompileError::PartialArguments { count: 2, .. })));

        let ops = opcodes("{{> (which) }}");
        assert!(has(&ops, |op| matches!(op, Opcode::InvokePartial { dynamic: true, .. })));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_prevent_indent_emits_content() {
        let options = CompileOptions::default().with_prevent_indent(true);
        let compiled = compile_str("a\n  {{> p}}\n", &options).unwrap();
        assert!(compiled
            .opcodes
            .iter()
            .any(|op| op.opcode == Opcode::AppendContent("  ".to_string())));
        assert!(compiled.opcodes.iter().any(
            |op| matches!(&op.opcode, Opcode::InvokePartial { indent, .. } if indent.is_empty())
        ));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_decorators_compile_separately() {
        let compiled = compile_str("{{#*inline \"x\"}}body{{/inline}}after", &CompileOptions::default()).unwrap();
        assert!(compiled.uses_decorators);
        assert!(compiled
            .decorators
            .iter()
            .any(|op| matches!(&op.opcode, Opcode::RegisterDecorator { argc: 1, name } if name == "inline")));
        assert_eq!(compiled.opcodes.len(), 1);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_literal_callee_becomes_path() {
        let ops = opcodes("{{\"foo bar\"}}");
        assert!(has(&ops, |op| matches!(op, Opcode::InvokeAmbiguous { name, .. } if name == "foo bar")));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_identical_children_are_equivalent() {
        let compiled = compile_str("{{#if a}}x{{/if}}\n{{#if b}}x{{/if}}", &CompileOptions::default()).unwrap();
        assert_eq!(compiled.children.len(), 2);
        assert!(compiled.children[0].equivalent(&compiled.children[1]));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_track_ids_and_string_params() {
        let options = CompileOptions::default().with_track_ids(true);
        let compiled = compile_str("{{upper this.name}}", &options).unwrap();
        assert!(compiled.opcodes.iter().any(|op| matches!(
            &op.opcode,
            Opcode::PushId { kind: ParamKind::Path, id: Some(id) } if id == "name"
        )));

        let options = CompileOptions::default().with_string_params(true);
        let compiled = compile_str("{{upper ../name}}", &options).unwrap();
        assert!(compiled.opcodes.iter().any(|op| matches!(
            &op.opcode,
            Opcode::PushStringParam { kind: ParamKind::Path, value: Some(Value::String(s)) } if s == "name"
        )));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_string_param_cleanup() {
        assert_eq!(string_param("../../foo/bar"), "foo.bar");
        assert_eq!(string_param("./foo"), "foo");
        assert_eq!(tracked_id("this"), "");
        assert_eq!(tracked_id("this.foo"), "foo");
        assert_eq!(tracked_id("."), "");
    }
}
