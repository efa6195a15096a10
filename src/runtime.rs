//! Interprets compiled programs against JSON data.

use std::{borrow::Cow, collections::HashMap, rc::Rc};

use serde_json::{Map, Value};

use crate::{
    codegen::{
        Ambiguous, Annotations, BlockValue, Call, CallTarget, CompiledSpec, Expr, Instr, Lookup,
        PartialCall, PartialName, ProgramCode, Strategy,
    },
    decorators::DecoratorProps,
    engine::Environment,
    error::{BraceletResult, CompileError, RuntimeError},
    escape::{describe, escape_expression, is_truthy, stringify},
    frame::{BlockParams, DataFrame, Depths},
    helpers::HelperOptions,
    interface::{HelperDef, Output},
    span::Position,
    template::Template,
};

/// A value produced while evaluating an expression.
#[derive(Debug)]
pub(crate) enum Resolved {
    Value(Rc<Value>),
    Safe(String),
}

impl Resolved {
    /// Safe strings lose their marker when passed on as data.
    pub(crate) fn into_value(self) -> Rc<Value> {
        match self {
            Self::Value(value) => value,
            Self::Safe(markup) => Rc::new(Value::String(markup)),
        }
    }
}

impl From<Output> for Resolved {
    fn from(output: Output) -> Self {
        match output {
            Output::Value(value) => Self::Value(Rc::new(value)),
            Output::Safe(markup) => Self::Safe(markup),
        }
    }
}

/// A nested program together with the scope it was created in.
#[derive(Debug)]
pub(crate) struct BlockProgram<'a> {
    pub(crate) spec: &'a CompiledSpec,
    pub(crate) index: usize,
    pub(crate) scope: Scope<'a>,
}

/// A partial registered while rendering, by a decorator.
#[derive(Debug, Clone)]
pub(crate) enum PartialFn<'a> {
    Block(Rc<BlockProgram<'a>>),
    /// Registered without a body; renders nothing.
    Empty,
}

/// Partials registered by the decorators of one program invocation.
#[derive(Debug)]
pub(crate) struct PartialLayer<'a> {
    pub(crate) entries: HashMap<String, PartialFn<'a>>,
    pub(crate) parent: Option<Rc<PartialLayer<'a>>>,
}

impl<'a> PartialLayer<'a> {
    fn get(&self, name: &str) -> Option<&PartialFn<'a>> {
        let mut layer = self;
        loop {
            if let Some(partial) = layer.entries.get(name) {
                return Some(partial);
            }
            layer = layer.parent.as_deref()?;
        }
    }
}

/// Everything a program invocation inherits from the code that invoked it.
#[derive(Debug, Clone, Default)]
pub(crate) struct Scope<'a> {
    depths: Option<Rc<Depths>>,
    block_params: Option<Rc<BlockParams>>,
    partials: Option<Rc<PartialLayer<'a>>>,
    partial_block: Option<Rc<BlockProgram<'a>>>,
}

enum Target<'a> {
    Template(&'a Template),
    Inline(Rc<BlockProgram<'a>>),
    PartialBlock(Rc<BlockProgram<'a>>),
    Empty,
}

struct Invocation<'f, 'a> {
    spec: &'a CompiledSpec,
    context: &'f Rc<Value>,
    data: &'f Rc<DataFrame>,
    scope: &'f Scope<'a>,
}

#[derive(Clone, Copy)]
pub(crate) struct Runtime<'a> {
    env: &'a Environment,
}

impl<'a> Runtime<'a> {
    pub(crate) const fn new(env: &'a Environment) -> Self {
        Self { env }
    }

    /// Renders `template` with `context` as `this` and `@root`.
    pub(crate) fn render(
        self,
        template: &'a Template,
        context: Value,
        data: &Map<String, Value>,
    ) -> BraceletResult<String> {
        let context = Rc::new(context);
        let mut frame = DataFrame::new();
        if template.spec().data {
            for (name, value) in data {
                frame.insert(name.clone(), value.clone());
            }
            frame.insert_rc("root", Rc::clone(&context));
        }

        log::debug!(
            "rendering template {}",
            template.name().unwrap_or("<anonymous>")
        );
        self.invoke_program(
            template.spec(),
            None,
            context,
            Rc::new(frame),
            Vec::new(),
            &Scope::default(),
        )
    }

    fn enter(
        spec: &'a CompiledSpec,
        program: &ProgramCode,
        context: &Rc<Value>,
        block_params: Vec<Rc<Value>>,
        scope: &Scope<'a>,
    ) -> Scope<'a> {
        let mut scope = scope.clone();
        if spec.uses_depths {
            scope.depths = Some(Depths::push(scope.depths.as_ref(), context));
        }
        let block_params = if program.block_params == 0 {
            Vec::new()
        } else {
            block_params
        };
        scope.block_params = Some(BlockParams::push(scope.block_params.as_ref(), block_params));
        scope
    }

    /// Runs the main program (`index` is `None`) or a nested program of `spec`.
    pub(crate) fn invoke_program(
        self,
        spec: &'a CompiledSpec,
        index: Option<usize>,
        context: Rc<Value>,
        data: Rc<DataFrame>,
        block_params: Vec<Rc<Value>>,
        scope: &Scope<'a>,
    ) -> BraceletResult<String> {
        let program = spec.program(index).ok_or_else(|| CompileError::Internal {
            message: format!("program {:?} does not exist", index),
        })?;
        let mut scope = Self::enter(spec, program, &context, block_params, scope);

        if !program.decorators.is_empty() {
            let invocation = Invocation {
                spec,
                context: &context,
                data: &data,
                scope: &scope,
            };
            if let Some(layer) = self.run_decorators(program, &invocation)? {
                scope.partials = Some(layer);
            }
        }

        let invocation = Invocation {
            spec,
            context: &context,
            data: &data,
            scope: &scope,
        };
        self.execute(program, &invocation)
    }

    fn run_decorators(
        self,
        program: &'a ProgramCode,
        inv: &Invocation<'_, 'a>,
    ) -> BraceletResult<Option<Rc<PartialLayer<'a>>>> {
        let mut props = DecoratorProps::new();
        for call in &program.decorators {
            let decorator = self
                .env
                .decorator(&call.name)
                .ok_or_else(|| RuntimeError::MissingDecorator {
                    name: call.name.clone(),
                })?;
            log::trace!("applying decorator {} at {}", call.name, call.position);

            let params = self.eval_params(&call.params, inv)?;
            let hash = self.eval_hash(call.hash.as_deref(), inv)?;
            let options = self.options(inv, &call.name, params, hash, call.program, None, None);
            decorator.call(&mut props, &options)?;
        }
        Ok(props.into_layer(inv.scope.partials.clone()))
    }

    fn execute(self, program: &'a ProgramCode, inv: &Invocation<'_, 'a>) -> BraceletResult<String> {
        let mut out = match program.strategy {
            Strategy::Return => String::new(),
            Strategy::Buffer => String::with_capacity(program.instrs.len().saturating_mul(16)),
        };
        for instr in &program.instrs {
            self.append(&mut out, instr, inv)?;
        }
        Ok(out)
    }

    fn append(self, out: &mut String, instr: &'a Instr, inv: &Invocation<'_, 'a>) -> BraceletResult<()> {
        match instr {
            Instr::Content(content) => out.push_str(content),
            Instr::Append(expr) => match self.eval(expr, inv)? {
                Resolved::Value(value) => out.push_str(&stringify(&value)),
                Resolved::Safe(markup) => out.push_str(&markup),
            },
            Instr::AppendEscaped(expr) => match self.eval(expr, inv)? {
                Resolved::Value(value) => out.push_str(&escape_expression(&stringify(&value))),
                Resolved::Safe(markup) => out.push_str(&markup),
            },
        }
        Ok(())
    }

    fn eval(self, expr: &'a Expr, inv: &Invocation<'_, 'a>) -> BraceletResult<Resolved> {
        match expr {
            Expr::Literal(value) => Ok(Resolved::Value(Rc::new(value.clone()))),
            Expr::Context { depth } => Ok(Resolved::Value(context_at(*depth, inv))),
            Expr::Lookup(lookup) => self.lookup(lookup, inv).map(Resolved::Value),
            Expr::BlockParam {
                depth,
                index,
                parts,
                position,
            } => {
                let base = inv
                    .scope
                    .block_params
                    .as_ref()
                    .and_then(|params| params.get(*depth, *index))
                    .map_or_else(null, Rc::clone);
                let rest = parts.get(1..).unwrap_or_default();
                resolve_path(inv.spec, base, rest, false, false, *position).map(Resolved::Value)
            }
            Expr::Data {
                depth,
                parts,
                strict,
                position,
            } => lookup_data(inv, *depth, parts, *strict, *position).map(Resolved::Value),
            Expr::Helper(call) => self.call_helper(call, inv),
            Expr::Ambiguous(ambiguous) => match self.env.helper(&ambiguous.name) {
                Some(helper) => self.call_ambiguous(helper, ambiguous, inv),
                None => self.ambiguous_value(ambiguous, inv),
            },
            Expr::AmbiguousBlock(ambiguous) => match self.env.helper(&ambiguous.name) {
                Some(helper) => self.call_ambiguous(helper, ambiguous, inv),
                None => {
                    let value = self.ambiguous_value(ambiguous, inv)?.into_value();
                    self.block_helper_missing(
                        &ambiguous.name,
                        value,
                        ambiguous.program,
                        ambiguous.inverse,
                        inv,
                    )
                }
            },
            Expr::BlockValue(block) => self.block_value(block, inv),
            Expr::Partial(partial) => self.partial(partial, inv).map(Resolved::Safe),
        }
    }

    fn lookup(self, lookup: &Lookup, inv: &Invocation<'_, 'a>) -> BraceletResult<Rc<Value>> {
        let (base, rest) = match lookup.parts.split_first() {
            Some((first, rest)) if lookup.depthed => (depthed_lookup(first, inv), rest),
            Some(_) | None => (context_at(lookup.depth, inv), lookup.parts.as_slice()),
        };
        resolve_path(inv.spec, base, rest, lookup.falsy, lookup.strict, lookup.position)
    }

    fn eval_params(self, params: &'a [Expr], inv: &Invocation<'_, 'a>) -> BraceletResult<Vec<Rc<Value>>> {
        params
            .iter()
            .map(|param| self.eval(param, inv).map(Resolved::into_value))
            .collect()
    }

    fn eval_hash(
        self,
        hash: Option<&'a [(String, Expr)]>,
        inv: &Invocation<'_, 'a>,
    ) -> BraceletResult<Map<String, Value>> {
        let mut out = Map::new();
        for (key, expr) in hash.unwrap_or_default() {
            let value = self.eval(expr, inv)?.into_value();
            out.insert(key.clone(), Rc::unwrap_or_clone(value));
        }
        Ok(out)
    }

    fn options(
        self,
        inv: &Invocation<'_, 'a>,
        name: &'a str,
        params: Vec<Rc<Value>>,
        hash: Map<String, Value>,
        program: Option<usize>,
        inverse: Option<usize>,
        annotations: Option<&'a Annotations>,
    ) -> HelperOptions<'a> {
        HelperOptions {
            runtime: self,
            spec: inv.spec,
            scope: inv.scope.clone(),
            name,
            params,
            hash,
            context: Rc::clone(inv.context),
            data: if inv.spec.data {
                Rc::clone(inv.data)
            } else {
                Rc::new(DataFrame::new())
            },
            program,
            inverse,
            annotations,
        }
    }

    fn call_helper(self, call: &'a Call, inv: &Invocation<'_, 'a>) -> BraceletResult<Resolved> {
        let registered = match call.target {
            CallTarget::Known | CallTarget::Registered { simple: true } => self.env.helper(&call.name),
            CallTarget::Registered { simple: false } => None,
        };
        let helper = match (registered, call.target) {
            (Some(helper), _) => helper,
            (None, CallTarget::Registered { .. }) if !inv.spec.strict => self
                .env
                .helper("helperMissing")
                .ok_or_else(|| missing_helper(&call.name))?,
            (None, CallTarget::Registered { .. }) => {
                // The callee is looked up on the context first, as a path.
                if !has_property(inv.context.as_ref(), &call.name) {
                    return Err(missing_property(
                        &call.name,
                        describe(Some(inv.context.as_ref())),
                        call.position,
                    )
                    .into());
                }
                return Err(missing_helper(&call.name).into());
            }
            (None, CallTarget::Known) => {
                return Err(missing_helper(&call.name).into());
            }
        };
        log::trace!("calling helper {} at {}", call.name, call.position);

        let params = self.eval_params(&call.params, inv)?;
        let hash = self.eval_hash(call.hash.as_deref(), inv)?;
        let options = self.options(
            inv,
            &call.name,
            params,
            hash,
            call.program,
            call.inverse,
            call.annotations.as_ref(),
        );
        helper.call(&options).map(Resolved::from)
    }

    fn call_ambiguous(
        self,
        helper: &'a dyn HelperDef,
        ambiguous: &'a Ambiguous,
        inv: &Invocation<'_, 'a>,
    ) -> BraceletResult<Resolved> {
        log::trace!("calling helper {} at {}", ambiguous.name, ambiguous.position);
        let options = self.options(
            inv,
            &ambiguous.name,
            Vec::new(),
            Map::new(),
            ambiguous.program,
            ambiguous.inverse,
            None,
        );
        helper.call(&options).map(Resolved::from)
    }

    /// The value of an identifier that did not name a helper.
    fn ambiguous_value(self, ambiguous: &'a Ambiguous, inv: &Invocation<'_, 'a>) -> BraceletResult<Resolved> {
        let value = self.eval(&ambiguous.value, inv)?;
        match value {
            Resolved::Value(value) if value.is_null() && !inv.spec.strict => {
                match self.env.helper("helperMissing") {
                    Some(helper) => self.call_ambiguous(helper, ambiguous, inv),
                    None => Ok(Resolved::Value(value)),
                }
            }
            Resolved::Value(_) | Resolved::Safe(_) => Ok(value),
        }
    }

    fn block_value(self, block: &'a BlockValue, inv: &Invocation<'_, 'a>) -> BraceletResult<Resolved> {
        let value = self.eval(&block.value, inv)?.into_value();
        self.block_helper_missing(&block.name, value, block.program, block.inverse, inv)
    }

    fn block_helper_missing(
        self,
        name: &'a str,
        value: Rc<Value>,
        program: Option<usize>,
        inverse: Option<usize>,
        inv: &Invocation<'_, 'a>,
    ) -> BraceletResult<Resolved> {
        let helper = self
            .env
            .helper("blockHelperMissing")
            .ok_or_else(|| missing_helper("blockHelperMissing"))?;
        let options = self.options(inv, name, vec![value], Map::new(), program, inverse, None);
        helper.call(&options).map(Resolved::from)
    }

    fn partial(self, call: &'a PartialCall, inv: &Invocation<'_, 'a>) -> BraceletResult<String> {
        let name: Cow<'a, str> = match &call.name {
            PartialName::Static(name) => Cow::Borrowed(name),
            PartialName::Dynamic(expr) => {
                let value = self.eval(expr, inv)?.into_value();
                Cow::Owned(stringify(&value).into_owned())
            }
        };

        let mut context = self.eval(&call.context, inv)?.into_value();
        if call.hash.is_some() {
            let hash = self.eval_hash(call.hash.as_deref(), inv)?;
            let mut merged = if let Value::Object(map) = context.as_ref() {
                map.clone()
            } else {
                Map::new()
            };
            merged.extend(hash);
            context = Rc::new(Value::Object(merged));
        }

        let block = call.program.map(|index| {
            Rc::new(BlockProgram {
                spec: inv.spec,
                index,
                scope: inv.scope.clone(),
            })
        });

        // Inline partials declared in the block body are visible to the partial.
        let mut partials = inv.scope.partials.clone();
        if let Some(block) = &block {
            if let Some(program) = inv.spec.program(Some(block.index)) {
                if !program.decorators.is_empty() {
                    let scope = Self::enter(inv.spec, program, inv.context, Vec::new(), &block.scope);
                    let invocation = Invocation {
                        spec: inv.spec,
                        context: inv.context,
                        data: inv.data,
                        scope: &scope,
                    };
                    if let Some(layer) = self.run_decorators(program, &invocation)? {
                        partials = Some(layer);
                    }
                }
            }
        }

        let target = self
            .resolve_partial(&name, partials.as_deref(), inv.scope)
            .or_else(|| block.clone().map(Target::PartialBlock))
            .ok_or_else(|| RuntimeError::MissingPartial {
                name: name.to_string(),
            })?;
        log::trace!("invoking partial {}", name);

        let partial_block = block.or_else(|| inv.scope.partial_block.clone());
        let data = Rc::clone(inv.data);
        let output = match target {
            Target::Template(template) => {
                let scope = Scope {
                    depths: if inv.spec.compat {
                        inv.scope.depths.clone()
                    } else {
                        None
                    },
                    block_params: None,
                    partials,
                    partial_block,
                };
                self.invoke_program(template.spec(), None, context, data, Vec::new(), &scope)?
            }
            Target::Inline(program) => {
                let scope = Scope {
                    depths: program.scope.depths.clone(),
                    block_params: program.scope.block_params.clone(),
                    partials,
                    partial_block,
                };
                self.invoke_program(program.spec, Some(program.index), context, data, Vec::new(), &scope)?
            }
            Target::PartialBlock(program) => {
                let scope = Scope {
                    depths: program.scope.depths.clone(),
                    block_params: program.scope.block_params.clone(),
                    partials,
                    partial_block: program.scope.partial_block.clone(),
                };
                self.invoke_program(program.spec, Some(program.index), context, data, Vec::new(), &scope)?
            }
            Target::Empty => String::new(),
        };

        Ok(indent_lines(output, &call.indent))
    }

    fn resolve_partial(
        self,
        name: &str,
        partials: Option<&PartialLayer<'a>>,
        scope: &Scope<'a>,
    ) -> Option<Target<'a>> {
        if name == "@partial-block" {
            return scope.partial_block.clone().map(Target::PartialBlock);
        }
        if let Some(partial) = partials.and_then(|layer| layer.get(name)) {
            return Some(match partial {
                PartialFn::Block(program) => Target::Inline(Rc::clone(program)),
                PartialFn::Empty => Target::Empty,
            });
        }
        self.env.partial(name).map(Target::Template)
    }
}

fn null() -> Rc<Value> {
    Rc::new(Value::Null)
}

fn missing_helper(name: &str) -> RuntimeError {
    RuntimeError::MissingHelper {
        name: name.to_string(),
    }
}

fn missing_property(name: &str, parent: String, position: Position) -> RuntimeError {
    RuntimeError::MissingProperty {
        name: name.to_string(),
        parent,
        line: position.line,
        column: position.column,
    }
}

fn context_at(depth: usize, inv: &Invocation<'_, '_>) -> Rc<Value> {
    if depth == 0 {
        return Rc::clone(inv.context);
    }
    inv.scope
        .depths
        .as_ref()
        .and_then(|depths| depths.get(depth))
        .map_or_else(null, Rc::clone)
}

/// The first enclosing context defining `name`.
fn depthed_lookup(name: &str, inv: &Invocation<'_, '_>) -> Rc<Value> {
    let found = inv.scope.depths.as_ref().and_then(|depths| {
        depths
            .iter()
            .find_map(|context| property(context, name).filter(|value| !value.is_null()))
            .map(Cow::into_owned)
    });
    match found {
        Some(value) => Rc::new(value),
        None => property(inv.context, name).map_or_else(null, |value| Rc::new(value.into_owned())),
    }
}

fn lookup_data(
    inv: &Invocation<'_, '_>,
    depth: usize,
    parts: &[String],
    strict: bool,
    position: Position,
) -> BraceletResult<Rc<Value>> {
    let Some((first, rest)) = parts.split_first() else {
        return Ok(null());
    };
    if !inv.spec.data {
        return Ok(null());
    }
    let head = inv.data.ancestor(depth).and_then(|frame| frame.get(first));
    let require_terminal = inv.spec.strict && strict;

    if rest.is_empty() {
        return match head {
            Some(value) => Ok(value),
            None if require_terminal => {
                Err(missing_property(first, "[object Object]".to_string(), position).into())
            }
            None => Ok(null()),
        };
    }

    let base = head.unwrap_or_else(null);
    resolve_path(inv.spec, base, rest, true, strict, position)
}

/// Walks `parts` down from `base`.
///
/// Without `strict` or `assume_objects` a missing segment makes the whole path
/// null. With either, walking through a null is an error, and with `strict`
/// the final segment must also exist when the path asks for it.
fn resolve_path(
    spec: &CompiledSpec,
    base: Rc<Value>,
    parts: &[String],
    falsy: bool,
    strict: bool,
    position: Position,
) -> BraceletResult<Rc<Value>> {
    if parts.is_empty() {
        return Ok(base);
    }
    if spec.strict || spec.assume_objects {
        strict_walk(&base, parts, spec.strict && strict, position).map(Rc::new)
    } else {
        Ok(Rc::new(loose_walk(&base, parts, falsy)))
    }
}

fn step<'v>(current: Cow<'v, Value>, name: &str) -> Cow<'v, Value> {
    match current {
        Cow::Borrowed(value) => property(value, name).unwrap_or(Cow::Owned(Value::Null)),
        Cow::Owned(value) => Cow::Owned(property(&value, name).map_or(Value::Null, Cow::into_owned)),
    }
}

fn loose_walk(base: &Value, parts: &[String], falsy: bool) -> Value {
    let mut current = Cow::Borrowed(base);
    for part in parts {
        let stop = if falsy {
            !is_truthy(&current)
        } else {
            current.is_null()
        };
        if stop {
            break;
        }
        current = step(current, part);
    }
    current.into_owned()
}

fn strict_walk(
    base: &Value,
    parts: &[String],
    require_terminal: bool,
    position: Position,
) -> BraceletResult<Value> {
    let (walk, terminal) = match parts.split_last() {
        Some((last, init)) if require_terminal => (init, Some(last)),
        Some(_) | None => (parts, None),
    };

    let mut current = Cow::Borrowed(base);
    for part in walk {
        if current.is_null() {
            return Err(missing_property(part, "undefined".to_string(), position).into());
        }
        current = step(current, part);
    }

    if let Some(name) = terminal {
        if !is_truthy(&current) || !has_property(&current, name) {
            let parent = describe(Some(&current));
            return Err(missing_property(name, parent, position).into());
        }
        current = step(current, name);
    }
    Ok(current.into_owned())
}

/// Reads one property: an object key, an array index or `length`, or a
/// string's `length` or code unit.
pub(crate) fn property<'v>(value: &'v Value, name: &str) -> Option<Cow<'v, Value>> {
    match value {
        Value::Object(map) => map.get(name).map(Cow::Borrowed),
        Value::Array(items) if name == "length" => Some(Cow::Owned(Value::from(items.len()))),
        Value::Array(items) => name
            .parse::<usize>()
            .ok()
            .and_then(|index| items.get(index))
            .map(Cow::Borrowed),
        Value::String(s) if name == "length" => Some(Cow::Owned(Value::from(s.encode_utf16().count()))),
        Value::String(s) => name
            .parse::<usize>()
            .ok()
            .and_then(|index| s.encode_utf16().nth(index))
            .map(|unit| Cow::Owned(Value::String(String::from_utf16_lossy(&[unit])))),
        Value::Null | Value::Bool(_) | Value::Number(_) => None,
    }
}

fn has_property(value: &Value, name: &str) -> bool {
    match value {
        Value::Object(map) => map.contains_key(name),
        Value::Array(items) => {
            name == "length" || name.parse::<usize>().is_ok_and(|index| index < items.len())
        }
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => false,
    }
}

/// Prefixes every line with `indent`, except a trailing empty line.
fn indent_lines(output: String, indent: &str) -> String {
    if indent.is_empty() {
        return output;
    }

    let lines: Vec<&str> = output.split('\n').collect();
    let last = lines.len().saturating_sub(1);
    let mut out = String::with_capacity(output.len().saturating_add(indent.len().saturating_mul(lines.len())));
    for (i, line) in lines.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        if !(line.is_empty() && i == last) {
            out.push_str(indent);
        }
        out.push_str(line);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parts(path: &str) -> Vec<String> {
        path.split('.').map(str::to_string).collect()
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_property_access() {
        let value = json!({"a": [1, 2, 3], "s": "héllo"});
        assert_eq!(property(&value, "a").as_deref(), Some(&json!([1, 2, 3])));
        assert_eq!(property(&value["a"], "length").as_deref(), Some(&json!(3)));
        assert_eq!(property(&value["a"], "1").as_deref(), Some(&json!(2)));
        assert_eq!(property(&value["a"], "9"), None);
        assert_eq!(property(&value["s"], "length").as_deref(), Some(&json!(5)));
        assert_eq!(property(&value["s"], "1").as_deref(), Some(&json!("é")));
        assert_eq!(property(&json!(4), "x"), None);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_loose_walk() {
        let value = json!({"a": {"b": 0, "c": null}});
        assert_eq!(loose_walk(&value, &parts("a.b"), false), json!(0));
        assert_eq!(loose_walk(&value, &parts("a.c.d"), false), json!(null));
        assert_eq!(loose_walk(&value, &parts("x.y.z"), false), json!(null));
        // Falsy intermediates are kept as they are.
        assert_eq!(loose_walk(&value, &parts("a.b.c"), true), json!(0));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_strict_walk() {
        let value = json!({"a": {"b": 1}});
        let position = Position::new(2, 5);
        assert_eq!(strict_walk(&value, &parts("a.b"), true, position).unwrap(), json!(1));

        let err = strict_walk(&value, &parts("a.x"), true, position).unwrap_err();
        assert_eq!(
            err.to_string(),
            "\"x\" not defined in [object Object] - 2:5"
        );

        // Missing terminals are fine unless required.
        assert_eq!(strict_walk(&value, &parts("a.x"), false, position).unwrap(), json!(null));

        let err = strict_walk(&value, &parts("z.y"), false, position).unwrap_err();
        assert!(matches!(
            err,
            crate::BraceletError::Runtime(RuntimeError::MissingProperty { ref name, ref parent, .. })
                if name == "y" && parent == "undefined"
        ));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_indent_lines() {
        assert_eq!(indent_lines("a\nb\n".to_string(), "  "), "  a\n  b\n");
        assert_eq!(indent_lines("a\n\nb".to_string(), "  "), "  a\n  \n  b");
        assert_eq!(indent_lines("a".to_string(), ""), "a");
    }
}
