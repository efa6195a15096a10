//! Turns opcode lists into executable programs.
//!
//! Opcodes are replayed against a symbolic stack: pushes become expression
//! nodes, invocations fold their operands into call nodes, and appends emit
//! instructions. The result is a tree of typed expressions per program that
//! the runtime interprets directly.

use serde_json::Value;

use crate::{
    compiler::{CompiledProgram, Op, Opcode, ParamKind},
    error::{BraceletResult, CompileError},
    options::CompileOptions,
    span::Position,
};

/// Bumped whenever the shape of [`CompiledSpec`] changes.
pub const COMPILER_REVISION: u32 = 8;

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Literal(Value),
    /// The context `depth` levels up.
    Context { depth: usize },
    Lookup(Lookup),
    BlockParam {
        depth: usize,
        index: usize,
        parts: Vec<String>,
        position: Position,
    },
    Data {
        depth: usize,
        parts: Vec<String>,
        strict: bool,
        position: Position,
    },
    Helper(Box<Call>),
    Ambiguous(Box<Ambiguous>),
    /// An ambiguous identifier used as a block.
    AmbiguousBlock(Box<Ambiguous>),
    /// A non-helper value used as a block.
    BlockValue(Box<BlockValue>),
    Partial(Box<PartialCall>),
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Lookup {
    pub(crate) depth: usize,
    pub(crate) parts: Vec<String>,
    /// Keep falsy intermediates instead of collapsing them to null.
    pub(crate) falsy: bool,
    /// Check the final segment exists when rendering strictly.
    pub(crate) strict: bool,
    /// Resolve the first segment through every enclosing context.
    pub(crate) depthed: bool,
    pub(crate) position: Position,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CallTarget {
    /// Called directly from the registry.
    Known,
    /// Looked up by name when `simple`, otherwise routed to `helperMissing`.
    Registered { simple: bool },
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct Annotations {
    pub(crate) ids: Vec<Option<String>>,
    pub(crate) types: Vec<Option<ParamKind>>,
    pub(crate) hash_ids: Vec<(String, Option<String>)>,
    pub(crate) hash_types: Vec<(String, Option<ParamKind>)>,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Call {
    pub(crate) name: String,
    pub(crate) target: CallTarget,
    pub(crate) params: Vec<Expr>,
    /// `None` when the call site asked for no hash at all.
    pub(crate) hash: Option<Vec<(String, Expr)>>,
    pub(crate) program: Option<usize>,
    pub(crate) inverse: Option<usize>,
    pub(crate) annotations: Option<Annotations>,
    pub(crate) position: Position,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Ambiguous {
    pub(crate) name: String,
    pub(crate) value: Expr,
    pub(crate) program: Option<usize>,
    pub(crate) inverse: Option<usize>,
    pub(crate) position: Position,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct BlockValue {
    pub(crate) name: String,
    pub(crate) value: Expr,
    pub(crate) program: Option<usize>,
    pub(crate) inverse: Option<usize>,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PartialName {
    Static(String),
    Dynamic(Expr),
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PartialCall {
    pub(crate) name: PartialName,
    pub(crate) context: Expr,
    pub(crate) hash: Option<Vec<(String, Expr)>>,
    /// The body of a partial block, used as `@partial-block`.
    pub(crate) program: Option<usize>,
    pub(crate) indent: String,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct DecoratorCall {
    pub(crate) name: String,
    pub(crate) params: Vec<Expr>,
    pub(crate) hash: Option<Vec<(String, Expr)>>,
    pub(crate) program: Option<usize>,
    pub(crate) position: Position,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Instr {
    Content(String),
    Append(Expr),
    AppendEscaped(Expr),
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Strategy {
    /// A single instruction whose output is the program's output.
    Return,
    /// Several instructions appended into one buffer.
    Buffer,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ProgramCode {
    pub(crate) instrs: Vec<Instr>,
    pub(crate) decorators: Vec<DecoratorCall>,
    pub(crate) strategy: Strategy,
    /// Number of block params the program declares.
    pub(crate) block_params: usize,
    pub(crate) uses_block_params: bool,
}

/// The executable form of one template: its main program, every nested
/// program it references, and the flags the runtime needs to set up a render.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledSpec {
    pub(crate) main: ProgramCode,
    pub(crate) programs: Vec<ProgramCode>,
    pub(crate) compiler_revision: u32,
    pub(crate) uses_data: bool,
    pub(crate) uses_depths: bool,
    pub(crate) uses_partials: bool,
    pub(crate) uses_decorators: bool,
    pub(crate) compat: bool,
    pub(crate) strict: bool,
    pub(crate) assume_objects: bool,
    pub(crate) track_ids: bool,
    /// Whether `@data` variables are threaded through the render.
    pub(crate) data: bool,
}

impl CompiledSpec {
    /// The revision of the compiler that produced this spec.
    pub const fn compiler_revision(&self) -> u32 {
        self.compiler_revision
    }

    /// Number of nested programs, after de-duplication.
    pub fn program_count(&self) -> usize {
        self.programs.len()
    }

    pub const fn uses_data(&self) -> bool {
        self.uses_data
    }

    pub const fn uses_depths(&self) -> bool {
        self.uses_depths
    }

    pub const fn uses_partials(&self) -> bool {
        self.uses_partials
    }

    pub const fn uses_decorators(&self) -> bool {
        self.uses_decorators
    }

    /// Whether any program binds `as |...|` block params.
    pub fn uses_block_params(&self) -> bool {
        self.main.uses_block_params || self.programs.iter().any(|p| p.uses_block_params)
    }

    pub(crate) fn program(&self, index: Option<usize>) -> Option<&ProgramCode> {
        match index {
            None => Some(&self.main),
            Some(index) => self.programs.get(index),
        }
    }
}

/// A value on the symbolic stack.
#[derive(Debug)]
enum Pending {
    Expr(Expr),
    Program(Option<usize>),
    Hash(Option<Vec<(String, Expr, Option<Annotation>)>>),
    /// Describes the parameter pushed right after it.
    Annotation(Annotation),
}

#[derive(Debug, Clone)]
struct Annotation {
    kind: ParamKind,
    id: Option<String>,
    tracked: bool,
    string_param: bool,
}

struct Generator<'a> {
    /// Local child index -> global program index.
    children: &'a [usize],
    compat: bool,
    stack: Vec<Pending>,
    hashes: Vec<Vec<(String, Expr, Option<Annotation>)>>,
    context_depth: usize,
    instrs: Vec<Instr>,
    decorators: Vec<DecoratorCall>,
}

fn internal(message: &str) -> CompileError {
    CompileError::Internal {
        message: message.to_string(),
    }
}

impl<'a> Generator<'a> {
    const fn new(children: &'a [usize], compat: bool) -> Self {
        Self {
            children,
            compat,
            stack: Vec::new(),
            hashes: Vec::new(),
            context_depth: 0,
            instrs: Vec::new(),
            decorators: Vec::new(),
        }
    }

    fn child(&self, local: Option<usize>) -> BraceletResult<Option<usize>> {
        local
            .map(|local| {
                self.children
                    .get(local)
                    .copied()
                    .ok_or_else(|| internal("program reference out of range").into())
            })
            .transpose()
    }

    fn pop(&mut self) -> BraceletResult<Pending> {
        self.stack
            .pop()
            .ok_or_else(|| internal("stack underflow").into())
    }

    fn pop_expr(&mut self) -> BraceletResult<Expr> {
        match self.pop()? {
            Pending::Expr(expr) => Ok(expr),
            Pending::Program(_) | Pending::Hash(_) | Pending::Annotation(_) => {
                Err(internal("expected an expression").into())
            }
        }
    }

    /// A parameter value and the annotation pushed before it, if any.
    fn pop_param(&mut self) -> BraceletResult<(Expr, Option<Annotation>)> {
        let expr = self.pop_expr()?;
        let annotation = if let Some(Pending::Annotation(_)) = self.stack.last() {
            match self.pop()? {
                Pending::Annotation(annotation) => Some(annotation),
                Pending::Expr(_) | Pending::Program(_) | Pending::Hash(_) => None,
            }
        } else {
            None
        };
        Ok((expr, annotation))
    }

    fn pop_program(&mut self) -> BraceletResult<Option<usize>> {
        match self.pop()? {
            Pending::Program(program) => Ok(program),
            Pending::Expr(_) | Pending::Hash(_) | Pending::Annotation(_) => {
                Err(internal("expected a program reference").into())
            }
        }
    }

    fn pop_hash(&mut self) -> BraceletResult<Option<Vec<(String, Expr, Option<Annotation>)>>> {
        match self.pop()? {
            Pending::Hash(hash) => Ok(hash),
            Pending::Expr(_) | Pending::Program(_) | Pending::Annotation(_) => {
                Err(internal("expected a hash").into())
            }
        }
    }

    /// Pops `hash, inverse, program, params...` as laid out by the compiler.
    fn pop_call_operands(
        &mut self,
        argc: usize,
    ) -> BraceletResult<(
        Vec<Expr>,
        Option<Vec<(String, Expr)>>,
        Option<usize>,
        Option<usize>,
        Option<Annotations>,
    )> {
        let hash = self.pop_hash()?;
        let inverse = self.pop_program()?;
        let program = self.pop_program()?;

        let mut params = Vec::with_capacity(argc);
        let mut annotated = Vec::with_capacity(argc);
        for _ in 0..argc {
            let (expr, annotation) = self.pop_param()?;
            params.push(expr);
            annotated.push(annotation);
        }
        params.reverse();
        annotated.reverse();

        let mut annotations = None;
        let any_hash_annotation = hash
            .as_ref()
            .is_some_and(|pairs| pairs.iter().any(|(_, _, a)| a.is_some()));
        if annotated.iter().any(Option::is_some) || any_hash_annotation {
            let mut out = Annotations::default();
            for annotation in &annotated {
                out.ids.push(annotation.as_ref().filter(|a| a.tracked).and_then(|a| a.id.clone()));
                out.types.push(annotation.as_ref().filter(|a| a.string_param).map(|a| a.kind));
            }
            for (key, _, annotation) in hash.iter().flatten() {
                out.hash_ids.push((
                    key.clone(),
                    annotation.as_ref().filter(|a| a.tracked).and_then(|a| a.id.clone()),
                ));
                out.hash_types.push((
                    key.clone(),
                    annotation.as_ref().filter(|a| a.string_param).map(|a| a.kind),
                ));
            }
            annotations = Some(out);
        }

        let hash = hash.map(|pairs| pairs.into_iter().map(|(k, v, _)| (k, v)).collect());
        Ok((params, hash, program, inverse, annotations))
    }

    fn run(&mut self, ops: &[Op]) -> BraceletResult<()> {
        for op in ops {
            self.step(op)?;
        }
        if self.stack.is_empty() {
            Ok(())
        } else {
            Err(internal("values left on the stack").into())
        }
    }

    fn step(&mut self, op: &Op) -> BraceletResult<()> {
        let position = op.span.start;
        match &op.opcode {
            Opcode::AppendContent(content) => {
                if let Some(Instr::Content(last)) = self.instrs.last_mut() {
                    last.push_str(content);
                } else {
                    self.instrs.push(Instr::Content(content.clone()));
                }
            }
            Opcode::GetContext(depth) => self.context_depth = *depth,
            Opcode::PushContext => {
                let depth = self.context_depth;
                self.stack.push(Pending::Expr(Expr::Context { depth }));
            }
            Opcode::LookupOnContext {
                parts,
                falsy,
                strict,
                scoped,
            } => {
                let depth = self.context_depth;
                self.stack.push(Pending::Expr(Expr::Lookup(Lookup {
                    depth,
                    parts: parts.clone(),
                    falsy: *falsy,
                    strict: *strict,
                    depthed: self.compat && !*scoped && depth == 0,
                    position,
                })));
            }
            Opcode::LookupBlockParam { depth, index, parts } => {
                self.stack.push(Pending::Expr(Expr::BlockParam {
                    depth: *depth,
                    index: *index,
                    parts: parts.clone(),
                    position,
                }));
            }
            Opcode::LookupData { depth, parts, strict } => {
                self.stack.push(Pending::Expr(Expr::Data {
                    depth: *depth,
                    parts: parts.clone(),
                    strict: *strict,
                    position,
                }));
            }
            Opcode::PushLiteral(value) => self.stack.push(Pending::Expr(Expr::Literal(value.clone()))),
            Opcode::PushString(s) => {
                self.stack
                    .push(Pending::Expr(Expr::Literal(Value::String(s.clone()))));
            }
            Opcode::PushId { kind, id } => self.stack.push(Pending::Annotation(Annotation {
                kind: *kind,
                id: id.clone(),
                tracked: true,
                string_param: false,
            })),
            Opcode::PushStringParam { kind, value } => {
                self.stack.push(Pending::Annotation(Annotation {
                    kind: *kind,
                    id: None,
                    tracked: false,
                    string_param: true,
                }));
                if let Some(value) = value {
                    self.stack.push(Pending::Expr(Expr::Literal(value.clone())));
                }
            }
            Opcode::PushProgram(local) => {
                let program = self.child(*local)?;
                self.stack.push(Pending::Program(program));
            }
            Opcode::EmptyHash { omit } => {
                self.stack
                    .push(Pending::Hash(if *omit { None } else { Some(Vec::new()) }));
            }
            Opcode::PushHash => self.hashes.push(Vec::new()),
            Opcode::AssignToHash(key) => {
                let (value, annotation) = self.pop_param()?;
                self.hashes
                    .last_mut()
                    .ok_or_else(|| internal("assignment outside of a hash"))?
                    .push((key.clone(), value, annotation));
            }
            Opcode::PopHash => {
                let mut pairs = self
                    .hashes
                    .pop()
                    .ok_or_else(|| internal("unbalanced hash"))?;
                // Assigned last-to-first.
                pairs.reverse();
                self.stack.push(Pending::Hash(Some(pairs)));
            }
            Opcode::InvokeHelper { argc, name, simple } => {
                let (params, hash, program, inverse, annotations) = self.pop_call_operands(*argc)?;
                self.stack.push(Pending::Expr(Expr::Helper(Box::new(Call {
                    name: name.clone(),
                    target: CallTarget::Registered { simple: *simple },
                    params,
                    hash,
                    program,
                    inverse,
                    annotations,
                    position,
                }))));
            }
            Opcode::InvokeKnownHelper { argc, name } => {
                let (params, hash, program, inverse, annotations) = self.pop_call_operands(*argc)?;
                self.stack.push(Pending::Expr(Expr::Helper(Box::new(Call {
                    name: name.clone(),
                    target: CallTarget::Known,
                    params,
                    hash,
                    program,
                    inverse,
                    annotations,
                    position,
                }))));
            }
            Opcode::InvokeAmbiguous { name, .. } => {
                let value = self.pop_expr()?;
                let inverse = self.pop_program()?;
                let program = self.pop_program()?;
                self.stack.push(Pending::Expr(Expr::Ambiguous(Box::new(Ambiguous {
                    name: name.clone(),
                    value,
                    program,
                    inverse,
                    position,
                }))));
            }
            Opcode::AmbiguousBlockValue => {
                self.pop_hash()?;
                self.pop_program()?;
                self.pop_program()?;
                match self.pop_expr()? {
                    Expr::Ambiguous(ambiguous) => {
                        self.stack.push(Pending::Expr(Expr::AmbiguousBlock(ambiguous)));
                    }
                    Expr::Literal(_)
                    | Expr::Context { .. }
                    | Expr::Lookup(_)
                    | Expr::BlockParam { .. }
                    | Expr::Data { .. }
                    | Expr::Helper(_)
                    | Expr::AmbiguousBlock(_)
                    | Expr::BlockValue(_)
                    | Expr::Partial(_) => {
                        return Err(internal("block value without an ambiguous call").into());
                    }
                }
            }
            Opcode::BlockValue(name) => {
                self.pop_hash()?;
                let inverse = self.pop_program()?;
                let program = self.pop_program()?;
                let value = self.pop_expr()?;
                self.stack.push(Pending::Expr(Expr::BlockValue(Box::new(BlockValue {
                    name: name.clone(),
                    value,
                    program,
                    inverse,
                }))));
            }
            Opcode::InvokePartial {
                dynamic,
                name,
                indent,
            } => {
                let hash = self.pop_hash()?;
                self.pop_program()?;
                let program = self.pop_program()?;
                let (context, _) = self.pop_param()?;
                let name = if *dynamic {
                    PartialName::Dynamic(self.pop_expr()?)
                } else {
                    PartialName::Static(name.clone())
                };
                self.stack.push(Pending::Expr(Expr::Partial(Box::new(PartialCall {
                    name,
                    context,
                    hash: hash.map(|pairs| pairs.into_iter().map(|(k, v, _)| (k, v)).collect()),
                    program,
                    indent: indent.clone(),
                }))));
            }
            Opcode::Append => {
                let expr = self.pop_expr()?;
                self.instrs.push(Instr::Append(expr));
            }
            Opcode::AppendEscaped => {
                let expr = self.pop_expr()?;
                self.instrs.push(Instr::AppendEscaped(expr));
            }
            Opcode::RegisterDecorator { argc, name } => {
                let (params, hash, program, _, _) = self.pop_call_operands(*argc)?;
                self.decorators.push(DecoratorCall {
                    name: name.clone(),
                    params,
                    hash,
                    program,
                    position,
                });
            }
        }
        Ok(())
    }
}

/// Lays out programs in first-discovery order, sharing identical bodies.
struct Linker<'a> {
    programs: Vec<Option<ProgramCode>>,
    seen: Vec<(&'a CompiledProgram, usize)>,
    compat: bool,
}

impl<'a> Linker<'a> {
    fn register(&mut self, program: &'a CompiledProgram) -> BraceletResult<usize> {
        if let Some((_, index)) = self.seen.iter().find(|(seen, _)| seen.equivalent(program)) {
            return Ok(*index);
        }

        let index = self.programs.len();
        self.programs.push(None);
        self.seen.push((program, index));

        let code = self.generate(program)?;
        if let Some(slot) = self.programs.get_mut(index) {
            *slot = Some(code);
        }
        Ok(index)
    }

    fn generate(&mut self, program: &'a CompiledProgram) -> BraceletResult<ProgramCode> {
        let children = program
            .children
            .iter()
            .map(|child| self.register(child))
            .collect::<BraceletResult<Vec<_>>>()?;

        let mut body = Generator::new(&children, self.compat);
        body.run(&program.opcodes)?;

        let mut decorators = Generator::new(&children, self.compat);
        decorators.run(&program.decorators)?;

        let strategy = if program.is_simple && body.instrs.len() <= 1 {
            Strategy::Return
        } else {
            Strategy::Buffer
        };

        Ok(ProgramCode {
            instrs: body.instrs,
            decorators: decorators.decorators,
            strategy,
            block_params: program.block_params,
            uses_block_params: program.uses_block_params,
        })
    }
}

/// Generates the executable spec for a compiled template.
pub(crate) fn generate(
    program: &CompiledProgram,
    options: &CompileOptions,
) -> BraceletResult<CompiledSpec> {
    let mut linker = Linker {
        programs: Vec::new(),
        seen: Vec::new(),
        compat: options.compat,
    };
    let main = linker.generate(program)?;
    let programs = linker
        .programs
        .into_iter()
        .map(|p| p.ok_or_else(|| internal("unfinished program").into()))
        .collect::<BraceletResult<Vec<_>>>()?;

    log::debug!(
        "generated spec with {} nested programs ({:?} main strategy)",
        programs.len(),
        main.strategy
    );

    Ok(CompiledSpec {
        main,
        programs,
        compiler_revision: COMPILER_REVISION,
        uses_data: program.uses_data,
        uses_depths: program.uses_depths,
        uses_partials: program.uses_partials,
        uses_decorators: program.uses_decorators,
        compat: options.compat,
        strict: options.strict,
        assume_objects: options.assume_objects,
        track_ids: options.track_ids,
        data: options.data,
    })
}
