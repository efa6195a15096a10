//! The arguments a helper receives, and the built-in helpers.

use std::{borrow::Cow, collections::HashMap, rc::Rc, sync::Arc};

use serde_json::{Map, Value};

use crate::{
    codegen::{Annotations, CompiledSpec},
    compiler::ParamKind,
    error::{BraceletResult, RuntimeError},
    escape::{is_empty, is_truthy, stringify},
    frame::DataFrame,
    interface::{HelperDef, Output},
    runtime::{Runtime, Scope, property},
};

/// Context, data and block params for rendering a helper's block.
///
/// # Examples
///
/// ```
/// use std::rc::Rc;
/// use bracelet::{BlockArgs, DataFrame};
/// use serde_json::json;
///
/// let item = Rc::new(json!({"name": "a"}));
/// let mut frame = DataFrame::new();
/// frame.insert("index", json!(0));
/// let args = BlockArgs::new(Rc::clone(&item))
///     .with_data(frame)
///     .with_block_params(vec![item]);
/// # let _ = args;
/// ```
#[derive(Debug, Clone)]
pub struct BlockArgs {
    context: Rc<Value>,
    data: Option<Rc<DataFrame>>,
    block_params: Vec<Rc<Value>>,
}

impl BlockArgs {
    pub fn new<C: Into<Rc<Value>>>(context: C) -> Self {
        Self {
            context: context.into(),
            data: None,
            block_params: Vec::new(),
        }
    }

    /// Replaces the `@data` frame. Defaults to the helper's own frame.
    pub fn with_data<D: Into<Rc<DataFrame>>>(mut self, data: D) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Values bound to the block's `as |...|` params, in order.
    pub fn with_block_params(mut self, block_params: Vec<Rc<Value>>) -> Self {
        self.block_params = block_params;
        self
    }
}

/// Everything a helper call site passes to the helper.
pub struct HelperOptions<'a> {
    pub(crate) runtime: Runtime<'a>,
    pub(crate) spec: &'a CompiledSpec,
    pub(crate) scope: Scope<'a>,
    pub(crate) name: &'a str,
    pub(crate) params: Vec<Rc<Value>>,
    pub(crate) hash: Map<String, Value>,
    pub(crate) context: Rc<Value>,
    pub(crate) data: Rc<DataFrame>,
    pub(crate) program: Option<usize>,
    pub(crate) inverse: Option<usize>,
    pub(crate) annotations: Option<&'a Annotations>,
}

impl<'a> HelperOptions<'a> {
    /// The name the helper was called by.
    pub const fn name(&self) -> &'a str {
        self.name
    }

    pub fn params(&self) -> &[Rc<Value>] {
        &self.params
    }

    pub fn param(&self, index: usize) -> Option<&Value> {
        self.params.get(index).map(Rc::as_ref)
    }

    pub const fn hash(&self) -> &Map<String, Value> {
        &self.hash
    }

    pub fn hash_get(&self, key: &str) -> Option<&Value> {
        self.hash.get(key)
    }

    /// `this` at the call site.
    pub fn context(&self) -> &Value {
        &self.context
    }

    pub const fn context_rc(&self) -> &Rc<Value> {
        &self.context
    }

    pub const fn data(&self) -> &Rc<DataFrame> {
        &self.data
    }

    /// Whether the helper was called as a block.
    pub const fn is_block(&self) -> bool {
        self.program.is_some()
    }

    pub const fn has_inverse(&self) -> bool {
        self.inverse.is_some()
    }

    /// Whether the template was compiled with `track_ids`.
    pub const fn track_ids(&self) -> bool {
        self.spec.track_ids
    }

    /// Source path of a parameter, under `track_ids`.
    pub fn param_id(&self, index: usize) -> Option<&'a str> {
        self.annotations?.ids.get(index)?.as_deref()
    }

    /// Kind of a parameter, under `string_params`.
    pub fn param_type(&self, index: usize) -> Option<ParamKind> {
        *self.annotations?.types.get(index)?
    }

    pub fn hash_id(&self, key: &str) -> Option<&'a str> {
        let annotations = self.annotations?;
        annotations
            .hash_ids
            .iter()
            .find(|(k, _)| k == key)
            .and_then(|(_, id)| id.as_deref())
    }

    pub fn hash_type(&self, key: &str) -> Option<ParamKind> {
        let annotations = self.annotations?;
        annotations
            .hash_types
            .iter()
            .find(|(k, _)| k == key)
            .and_then(|(_, kind)| *kind)
    }

    /// Renders the block body. Renders nothing when there is no body.
    pub fn render(&self, args: BlockArgs) -> BraceletResult<String> {
        self.render_program(self.program, args)
    }

    /// Renders the `{{else}}` section. Renders nothing when there is none.
    pub fn render_inverse(&self, args: BlockArgs) -> BraceletResult<String> {
        self.render_program(self.inverse, args)
    }

    fn render_program(&self, index: Option<usize>, args: BlockArgs) -> BraceletResult<String> {
        let Some(index) = index else {
            return Ok(String::new());
        };
        let data = args.data.unwrap_or_else(|| Rc::clone(&self.data));
        self.runtime.invoke_program(
            self.spec,
            Some(index),
            args.context,
            data,
            args.block_params,
            &self.scope,
        )
    }

    /// Block args rendering with the caller's `this`.
    fn this(&self) -> BlockArgs {
        BlockArgs::new(Rc::clone(&self.context))
    }
}

fn single_param<'o>(helper: &str, options: &'o HelperOptions<'_>) -> BraceletResult<&'o Rc<Value>> {
    match options.params() {
        [param] => Ok(param),
        _ => Err(RuntimeError::HelperArity {
            helper: helper.to_string(),
            message: format!("#{} requires exactly one argument", helper),
        }
        .into()),
    }
}

/// Falsy, unless `includeZero` is set and the value is `0`.
fn fails(condition: &Value, options: &HelperOptions<'_>) -> bool {
    let include_zero = options.hash_get("includeZero").is_some_and(is_truthy);
    (!include_zero && !is_truthy(condition)) || is_empty(condition)
}

fn if_helper(options: &HelperOptions<'_>) -> BraceletResult<Output> {
    let condition = single_param("if", options)?;
    let rendered = if fails(condition, options) {
        options.render_inverse(options.this())?
    } else {
        options.render(options.this())?
    };
    Ok(Output::Safe(rendered))
}

fn unless_helper(options: &HelperOptions<'_>) -> BraceletResult<Output> {
    let condition = single_param("unless", options)?;
    let rendered = if fails(condition, options) {
        options.render(options.this())?
    } else {
        options.render_inverse(options.this())?
    };
    Ok(Output::Safe(rendered))
}

fn append_context_path(base: Option<Rc<Value>>, id: &str) -> String {
    match base.as_deref() {
        Some(Value::String(base)) if !base.is_empty() => format!("{}.{}", base, id),
        Some(_) | None => id.to_string(),
    }
}

fn each_helper(options: &HelperOptions<'_>) -> BraceletResult<Output> {
    let target = options
        .params()
        .first()
        .ok_or(RuntimeError::MissingIterationTarget)?;
    let context_path = options
        .param_id(0)
        .map(|id| format!("{}.", append_context_path(options.data().get("contextPath"), id)));
    iterate(options, target, context_path).map(Output::Safe)
}

/// Renders the block once per element or entry, or the inverse when there are none.
fn iterate(options: &HelperOptions<'_>, target: &Value, context_path: Option<String>) -> BraceletResult<String> {
    let mut out = String::new();
    let mut render_item = |key: Value, index: usize, last: bool, item: &Value| -> BraceletResult<()> {
        let mut frame = DataFrame::child(options.data());
        if let Some(path) = &context_path {
            frame.insert("contextPath", Value::String(format!("{}{}", path, stringify(&key))));
        }
        frame
            .insert("key", key.clone())
            .insert("index", Value::from(index))
            .insert("first", Value::Bool(index == 0))
            .insert("last", Value::Bool(last));

        let item = Rc::new(item.clone());
        let args = BlockArgs::new(Rc::clone(&item))
            .with_data(frame)
            .with_block_params(vec![item, Rc::new(key)]);
        out.push_str(&options.render(args)?);
        Ok(())
    };

    let count = match target {
        Value::Array(items) => {
            let last = items.len().saturating_sub(1);
            for (index, item) in items.iter().enumerate() {
                render_item(Value::from(index), index, index == last, item)?;
            }
            items.len()
        }
        Value::Object(map) => {
            let last = map.len().saturating_sub(1);
            for (index, (key, item)) in map.iter().enumerate() {
                render_item(Value::String(key.clone()), index, index == last, item)?;
            }
            map.len()
        }
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => 0,
    };

    if count == 0 {
        return options.render_inverse(options.this());
    }
    Ok(out)
}

fn with_helper(options: &HelperOptions<'_>) -> BraceletResult<Output> {
    let context = single_param("with", options)?;
    if is_empty(context) {
        return options.render_inverse(options.this()).map(Output::Safe);
    }

    let mut args = BlockArgs::new(Rc::clone(context)).with_block_params(vec![Rc::clone(context)]);
    if let Some(id) = options.param_id(0) {
        let mut frame = DataFrame::child(options.data());
        frame.insert(
            "contextPath",
            Value::String(append_context_path(options.data().get("contextPath"), id)),
        );
        args = args.with_data(frame);
    }
    options.render(args).map(Output::Safe)
}

fn lookup_helper(options: &HelperOptions<'_>) -> BraceletResult<Output> {
    let object = options.param(0).unwrap_or(&Value::Null);
    if !is_truthy(object) {
        return Ok(Output::Value(object.clone()));
    }
    let field = options.param(1).map(stringify).unwrap_or_default();
    Ok(Output::Value(
        property(object, &field).map_or(Value::Null, Cow::into_owned),
    ))
}

fn log_level(value: &Value) -> log::Level {
    let number = match value {
        Value::String(name) => match name.to_lowercase().as_str() {
            "debug" => return log::Level::Debug,
            "info" => return log::Level::Info,
            "warn" => return log::Level::Warn,
            "error" => return log::Level::Error,
            other => other.parse::<u64>().ok(),
        },
        Value::Number(n) => n.as_u64(),
        Value::Null | Value::Bool(_) | Value::Array(_) | Value::Object(_) => None,
    };
    match number {
        Some(0) => log::Level::Debug,
        Some(2) => log::Level::Warn,
        Some(3) => log::Level::Error,
        Some(_) | None => log::Level::Info,
    }
}

fn log_helper(options: &HelperOptions<'_>) -> BraceletResult<Output> {
    let level = match options.hash_get("level") {
        Some(level) => log_level(level),
        None => options
            .data()
            .get("level")
            .map_or(log::Level::Info, |level| log_level(&level)),
    };
    let message = options
        .params()
        .iter()
        .map(|param| stringify(param).into_owned())
        .collect::<Vec<_>>()
        .join(" ");
    log::log!(target: "bracelet::template", level, "{}", message);
    Ok(Output::null())
}

fn helper_missing(options: &HelperOptions<'_>) -> BraceletResult<Output> {
    if options.params().is_empty() {
        Ok(Output::null())
    } else {
        Err(RuntimeError::MissingHelper {
            name: options.name().to_string(),
        }
        .into())
    }
}

fn block_helper_missing(options: &HelperOptions<'_>) -> BraceletResult<Output> {
    let context = options
        .params()
        .first()
        .map_or_else(|| Rc::new(Value::Null), Rc::clone);

    let rendered = match context.as_ref() {
        Value::Bool(true) => options.render(options.this())?,
        Value::Bool(false) | Value::Null => options.render_inverse(options.this())?,
        Value::Array(items) if items.is_empty() => options.render_inverse(options.this())?,
        Value::Array(_) => {
            let context_path = options.track_ids().then(|| {
                format!(
                    "{}.",
                    append_context_path(options.data().get("contextPath"), options.name())
                )
            });
            iterate(options, &context, context_path)?
        }
        Value::Number(_) | Value::String(_) | Value::Object(_) => {
            let mut args = BlockArgs::new(Rc::clone(&context));
            if options.track_ids() {
                let mut frame = DataFrame::child(options.data());
                frame.insert(
                    "contextPath",
                    Value::String(append_context_path(
                        options.data().get("contextPath"),
                        options.name(),
                    )),
                );
                args = args.with_data(frame);
            }
            options.render(args)?
        }
    };
    Ok(Output::Safe(rendered))
}

/// The helpers every environment starts with.
pub(crate) fn builtins() -> HashMap<String, Arc<dyn HelperDef>> {
    let helpers: [(&str, Arc<dyn HelperDef>); 8] = [
        ("if", Arc::new(if_helper)),
        ("unless", Arc::new(unless_helper)),
        ("each", Arc::new(each_helper)),
        ("with", Arc::new(with_helper)),
        ("lookup", Arc::new(lookup_helper)),
        ("log", Arc::new(log_helper)),
        ("helperMissing", Arc::new(helper_missing)),
        ("blockHelperMissing", Arc::new(block_helper_missing)),
    ];
    helpers
        .into_iter()
        .map(|(name, helper)| (name.to_string(), helper))
        .collect()
}
