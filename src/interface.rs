use serde_json::Value;

use crate::{BraceletResult, decorators::DecoratorProps, helpers::HelperOptions};

/// The result of a helper call.
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    /// Rendered like any other value, escaped by `{{ }}`.
    Value(Value),
    /// Markup that is never escaped.
    Safe(String),
}

impl Output {
    pub fn safe<S: Into<String>>(markup: S) -> Self {
        Self::Safe(markup.into())
    }

    pub const fn null() -> Self {
        Self::Value(Value::Null)
    }
}

impl From<Value> for Output {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<String> for Output {
    fn from(value: String) -> Self {
        Self::Value(Value::String(value))
    }
}

impl From<&str> for Output {
    fn from(value: &str) -> Self {
        Self::Value(Value::String(value.to_string()))
    }
}

impl From<bool> for Output {
    fn from(value: bool) -> Self {
        Self::Value(Value::Bool(value))
    }
}

/// A function callable from templates as `{{name args...}}` or
/// `{{#name args...}}...{{/name}}`.
///
/// Functions and closures with the matching signature implement this trait.
///
/// # Examples
///
/// ```
/// use bracelet::{BraceletResult, HelperOptions, Output, Registry, Renderer};
/// use serde_json::json;
///
/// fn shout(options: &HelperOptions<'_>) -> BraceletResult<Output> {
///     let text = options.param(0).and_then(|v| v.as_str()).unwrap_or_default();
///     Ok(Output::from(text.to_uppercase()))
/// }
///
/// let mut registry = Registry::new();
/// registry.register_helper("shout", shout);
/// registry.add_template("greet", "{{shout name}}!").unwrap();
/// assert_eq!(registry.render("greet", &json!({"name": "hi"})).unwrap(), "HI!");
/// ```
pub trait HelperDef: Send + Sync {
    fn call(&self, options: &HelperOptions<'_>) -> BraceletResult<Output>;
}

impl<F> HelperDef for F
where
    F: Fn(&HelperOptions<'_>) -> BraceletResult<Output> + Send + Sync,
{
    fn call(&self, options: &HelperOptions<'_>) -> BraceletResult<Output> {
        self(options)
    }
}

/// Runs before a program renders, from `{{*name}}` or `{{#*name}}...{{/name}}`
/// tags in that program. Decorators can register partials scoped to the
/// program's execution through `props`.
pub trait DecoratorDef: Send + Sync {
    fn call<'a>(&self, props: &mut DecoratorProps<'a>, options: &HelperOptions<'a>) -> BraceletResult<()>;
}

impl<F> DecoratorDef for F
where
    F: for<'a> Fn(&mut DecoratorProps<'a>, &HelperOptions<'a>) -> BraceletResult<()> + Send + Sync,
{
    fn call<'a>(&self, props: &mut DecoratorProps<'a>, options: &HelperOptions<'a>) -> BraceletResult<()> {
        self(props, options)
    }
}

/// Anything that can render named templates against JSON data.
pub trait Renderer {
    /// Renders the template registered as `template_name`.
    ///
    /// # Errors
    /// - If no template is registered under that name.
    /// - If compiling or rendering the template fails.
    fn render<N: AsRef<str>>(&self, template_name: N, data: &Value) -> BraceletResult<String>;

    fn has_template<N: AsRef<str>>(&self, template_name: N) -> bool;
}
