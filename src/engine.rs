use std::{collections::HashMap, sync::Arc};

use serde_json::{Map, Value};

use crate::{
    codegen::CompiledSpec,
    decorators,
    error::{BraceletError, BraceletResult, RuntimeError},
    helpers,
    interface::{DecoratorDef, HelperDef, Renderer},
    options::CompileOptions,
    runtime::Runtime,
    template::Template,
};

type Helpers = HashMap<String, Arc<dyn HelperDef>>;
type Decorators = HashMap<String, Arc<dyn DecoratorDef>>;
type Templates = HashMap<String, Arc<Template>>;

/// An immutable set of helpers, decorators, partials and named templates.
///
/// Cloning is cheap: the tables are shared until a clone is modified through
/// [`RenderOverrides`].
///
/// # Examples
///
/// ```
/// use bracelet::{Environment, Template};
/// use serde_json::json;
///
/// let env = Environment::new();
/// let template = Template::new("{{#each items}}{{this}},{{/each}}").unwrap();
/// let output = env.render_template(&template, &json!({"items": [1, 2, 3]})).unwrap();
/// assert_eq!(output, "1,2,3,");
/// ```
#[derive(Clone)]
pub struct Environment {
    helpers: Arc<Helpers>,
    decorators: Arc<Decorators>,
    partials: Arc<Templates>,
    templates: Arc<Templates>,
    options: CompileOptions,
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut helpers: Vec<&String> = self.helpers.keys().collect();
        helpers.sort();
        let mut decorators: Vec<&String> = self.decorators.keys().collect();
        decorators.sort();
        let mut partials: Vec<&String> = self.partials.keys().collect();
        partials.sort();
        let mut templates: Vec<&String> = self.templates.keys().collect();
        templates.sort();

        f.debug_struct("Environment")
            .field("helpers", &helpers)
            .field("decorators", &decorators)
            .field("partials", &partials)
            .field("templates", &templates)
            .field("options", &self.options)
            .finish()
    }
}

impl Environment {
    /// Creates an environment holding only the built-in helpers and decorators.
    pub fn new() -> Self {
        Self::with_options(CompileOptions::default())
    }

    fn with_options(options: CompileOptions) -> Self {
        Self {
            helpers: Arc::new(helpers::builtins()),
            decorators: Arc::new(decorators::builtins()),
            partials: Arc::new(HashMap::new()),
            templates: Arc::new(HashMap::new()),
            options,
        }
    }

    /// The options partials and templates registered here are compiled with.
    pub const fn options(&self) -> &CompileOptions {
        &self.options
    }

    pub(crate) fn helper(&self, name: &str) -> Option<&dyn HelperDef> {
        self.helpers.get(name).map(|helper| helper.as_ref())
    }

    pub(crate) fn decorator(&self, name: &str) -> Option<&dyn DecoratorDef> {
        self.decorators.get(name).map(|decorator| decorator.as_ref())
    }

    pub(crate) fn partial(&self, name: &str) -> Option<&Template> {
        self.partials.get(name).map(|partial| partial.as_ref())
    }

    pub(crate) fn template(&self, name: &str) -> Option<&Template> {
        self.templates.get(name).map(|template| template.as_ref())
    }

    pub fn has_helper(&self, name: &str) -> bool {
        self.helpers.contains_key(name)
    }

    pub fn has_partial(&self, name: &str) -> bool {
        self.partials.contains_key(name)
    }

    pub fn has_decorator(&self, name: &str) -> bool {
        self.decorators.contains_key(name)
    }

    /// Renders `template` with `data` as the root context.
    ///
    /// # Errors
    ///
    /// Returns a [`RuntimeError`] if rendering fails, for example when a
    /// partial or helper is missing.
    pub fn render_template(&self, template: &Template, data: &Value) -> BraceletResult<String> {
        Runtime::new(self).render(template, data.clone(), &Map::new())
    }

    /// Renders `template` with call-time helpers, partials, decorators and
    /// `@data` variables layered over this environment.
    ///
    /// # Errors
    ///
    /// Returns a [`RuntimeError`] if rendering fails.
    ///
    /// # Examples
    ///
    /// ```
    /// use bracelet::{Environment, RenderOverrides, Template};
    /// use serde_json::json;
    ///
    /// let env = Environment::new();
    /// let template = Template::new("{{> header}}{{@site}}").unwrap();
    /// let overrides = RenderOverrides::new()
    ///     .partial("header", Template::new("[{{title}}]").unwrap())
    ///     .data("site", json!("example.com"));
    /// let output = env
    ///     .render_with(&template, &json!({"title": "Home"}), overrides)
    ///     .unwrap();
    /// assert_eq!(output, "[Home]example.com");
    /// ```
    pub fn render_with(
        &self,
        template: &Template,
        data: &Value,
        overrides: RenderOverrides,
    ) -> BraceletResult<String> {
        let RenderOverrides {
            helpers,
            partials,
            decorators,
            data: extra,
        } = overrides;

        let mut env = self.clone();
        if !helpers.is_empty() {
            Arc::make_mut(&mut env.helpers).extend(helpers);
        }
        if !decorators.is_empty() {
            Arc::make_mut(&mut env.decorators).extend(decorators);
        }
        if !partials.is_empty() {
            Arc::make_mut(&mut env.partials).extend(partials);
        }

        Runtime::new(&env).render(template, data.clone(), &extra)
    }

    /// Loads a precompiled spec.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::RevisionMismatch`] if the spec was produced by
    /// a different compiler revision.
    pub fn load(&self, spec: CompiledSpec) -> BraceletResult<Template> {
        Template::from_spec(spec)
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for Environment {
    fn render<N: AsRef<str>>(&self, template_name: N, data: &Value) -> BraceletResult<String> {
        let name = template_name.as_ref();
        let template = self
            .template(name)
            .ok_or_else(|| BraceletError::MissingTemplate {
                template_name: name.to_string(),
            })?;
        self.render_template(template, data)
    }

    fn has_template<N: AsRef<str>>(&self, template_name: N) -> bool {
        self.templates.contains_key(template_name.as_ref())
    }
}

/// Helpers, partials, decorators and `@data` variables that apply to a
/// single render, taking precedence over the environment's own.
#[derive(Default)]
pub struct RenderOverrides {
    helpers: Helpers,
    partials: Templates,
    decorators: Decorators,
    data: Map<String, Value>,
}

impl RenderOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn helper<N: Into<String>, H: HelperDef + 'static>(mut self, name: N, helper: H) -> Self {
        self.helpers.insert(name.into(), Arc::new(helper));
        self
    }

    #[must_use]
    pub fn partial<N: Into<String>>(mut self, name: N, template: Template) -> Self {
        let name = name.into();
        self.partials
            .insert(name.clone(), Arc::new(template.named(name)));
        self
    }

    #[must_use]
    pub fn decorator<N: Into<String>, D: DecoratorDef + 'static>(
        mut self,
        name: N,
        decorator: D,
    ) -> Self {
        self.decorators.insert(name.into(), Arc::new(decorator));
        self
    }

    /// Exposes `value` to the template as `@name`.
    #[must_use]
    pub fn data<N: Into<String>>(mut self, name: N, value: Value) -> Self {
        self.data.insert(name.into(), value);
        self
    }
}

fn insert_unique<T, I>(kind: &str, entries: I) -> BraceletResult<HashMap<String, T>>
where
    I: IntoIterator<Item = (String, T)>,
{
    let mut unique = HashMap::new();
    for (name, entry) in entries {
        if unique.contains_key(&name) {
            return Err(RuntimeError::DuplicateRegistration {
                kind: kind.to_string(),
                name,
            }
            .into());
        }
        unique.insert(name, entry);
    }
    Ok(unique)
}

/// The mutable side of the engine: register helpers, partials, decorators and
/// named templates, then render.
///
/// # Examples
///
/// ```
/// use bracelet::{Registry, Renderer};
/// use serde_json::json;
///
/// let mut registry = Registry::new();
/// registry.register_partial("user", "{{name}} <{{email}}>").unwrap();
/// registry
///     .add_template("list", "{{#each users}}{{> user}}\n{{/each}}")
///     .unwrap();
///
/// let data = json!({"users": [{"name": "Ann", "email": "ann@example.com"}]});
/// let output = registry.render("list", &data).unwrap();
/// assert_eq!(output, "Ann &lt;ann@example.com&gt;\n");
/// ```
#[derive(Debug, Clone, Default)]
pub struct Registry {
    env: Environment,
}

impl Registry {
    /// Creates a registry holding only the built-in helpers and decorators.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry whose partials and templates compile with `options`.
    pub fn with_options(options: CompileOptions) -> Self {
        Self {
            env: Environment::with_options(options),
        }
    }

    pub const fn options(&self) -> &CompileOptions {
        &self.env.options
    }

    /// An immutable snapshot of everything registered so far.
    pub fn environment(&self) -> Environment {
        self.env.clone()
    }

    /// Registers a helper, replacing any helper with the same name.
    ///
    /// # Arguments
    ///
    /// * `name` - The name templates call the helper by
    /// * `helper` - A [`HelperDef`], usually a function
    pub fn register_helper<N: Into<String>, H: HelperDef + 'static>(
        &mut self,
        name: N,
        helper: H,
    ) -> &mut Self {
        Arc::make_mut(&mut self.env.helpers).insert(name.into(), Arc::new(helper));
        self
    }

    /// Registers several helpers at once. Nothing is registered on error.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::DuplicateRegistration`] if a name appears twice.
    pub fn register_helpers<I>(&mut self, helpers: I) -> BraceletResult<&mut Self>
    where
        I: IntoIterator<Item = (String, Arc<dyn HelperDef>)>,
    {
        let helpers = insert_unique("Helper", helpers)?;
        Arc::make_mut(&mut self.env.helpers).extend(helpers);
        Ok(self)
    }

    /// Returns whether a helper was removed.
    pub fn unregister_helper(&mut self, name: &str) -> bool {
        Arc::make_mut(&mut self.env.helpers).remove(name).is_some()
    }

    /// Compiles `source` and registers it as the partial `name`, replacing any
    /// partial with the same name.
    ///
    /// # Errors
    ///
    /// Returns an error if `source` fails to compile.
    pub fn register_partial<N: Into<String>, S: Into<String>>(
        &mut self,
        name: N,
        source: S,
    ) -> BraceletResult<&mut Self> {
        let template = self.compile(source)?;
        Ok(self.register_partial_template(name, template))
    }

    pub fn register_partial_template<N: Into<String>>(
        &mut self,
        name: N,
        template: Template,
    ) -> &mut Self {
        let name = name.into();
        Arc::make_mut(&mut self.env.partials).insert(name.clone(), Arc::new(template.named(name)));
        self
    }

    /// Compiles and registers several partials at once. Nothing is registered
    /// on error.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::DuplicateRegistration`] if a name appears twice,
    /// or the first compile error.
    pub fn register_partials<I, N, S>(&mut self, partials: I) -> BraceletResult<&mut Self>
    where
        I: IntoIterator<Item = (N, S)>,
        N: Into<String>,
        S: Into<String>,
    {
        let partials = insert_unique(
            "Partial",
            partials
                .into_iter()
                .map(|(name, source)| (name.into(), source)),
        )?;
        let mut compiled = HashMap::with_capacity(partials.len());
        for (name, source) in partials {
            let template = self.compile(source)?.named(name.clone());
            compiled.insert(name, Arc::new(template));
        }
        Arc::make_mut(&mut self.env.partials).extend(compiled);
        Ok(self)
    }

    /// Returns whether a partial was removed.
    pub fn unregister_partial(&mut self, name: &str) -> bool {
        Arc::make_mut(&mut self.env.partials).remove(name).is_some()
    }

    pub fn register_decorator<N: Into<String>, D: DecoratorDef + 'static>(
        &mut self,
        name: N,
        decorator: D,
    ) -> &mut Self {
        Arc::make_mut(&mut self.env.decorators).insert(name.into(), Arc::new(decorator));
        self
    }

    /// Registers several decorators at once. Nothing is registered on error.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::DuplicateRegistration`] if a name appears twice.
    pub fn register_decorators<I>(&mut self, decorators: I) -> BraceletResult<&mut Self>
    where
        I: IntoIterator<Item = (String, Arc<dyn DecoratorDef>)>,
    {
        let decorators = insert_unique("Decorator", decorators)?;
        Arc::make_mut(&mut self.env.decorators).extend(decorators);
        Ok(self)
    }

    /// Returns whether a decorator was removed.
    pub fn unregister_decorator(&mut self, name: &str) -> bool {
        Arc::make_mut(&mut self.env.decorators).remove(name).is_some()
    }

    /// Adds a new named template to the registry.
    ///
    /// # Arguments
    ///
    /// * `name` - The name to identify this template by
    /// * `source` - The template source
    ///
    /// # Errors
    ///
    /// * [`BraceletError::TemplateExists`] if a template with the given name already exists
    /// * A lex, parse or compile error if `source` is invalid
    pub fn add_template<N: AsRef<str>, S: Into<String>>(
        &mut self,
        name: N,
        source: S,
    ) -> BraceletResult<()> {
        let name = name.as_ref();

        if self.env.templates.contains_key(name) {
            return Err(BraceletError::TemplateExists {
                template_name: name.to_string(),
            });
        }

        let template = self.compile(source)?.named(name);
        Arc::make_mut(&mut self.env.templates).insert(name.to_string(), Arc::new(template));

        Ok(())
    }

    /// Compiles `source` with the registry's options without registering it.
    ///
    /// # Errors
    ///
    /// Returns an error if `source` fails to compile.
    pub fn compile<S: Into<String>>(&self, source: S) -> BraceletResult<Template> {
        Template::with_options(source, self.env.options.clone())
    }
}

impl Renderer for Registry {
    fn render<N: AsRef<str>>(&self, template_name: N, data: &Value) -> BraceletResult<String> {
        self.env.render(template_name, data)
    }

    fn has_template<N: AsRef<str>>(&self, template_name: N) -> bool {
        self.env.has_template(template_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{HelperOptions, Output};
    use serde_json::json;

    fn upper(options: &HelperOptions<'_>) -> BraceletResult<Output> {
        let text = options.param(0).and_then(|v| v.as_str()).unwrap_or_default();
        Ok(Output::from(text.to_uppercase()))
    }

    fn lower(options: &HelperOptions<'_>) -> BraceletResult<Output> {
        let text = options.param(0).and_then(|v| v.as_str()).unwrap_or_default();
        Ok(Output::from(text.to_lowercase()))
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_add_template() {
        let mut registry = Registry::new();
        registry.add_template("hello", "Hello {{name}}").unwrap();
        assert!(registry.has_template("hello"));
        assert!(!registry.has_template("missing"));

        let err = registry.add_template("hello", "again").unwrap_err();
        assert_eq!(
            err,
            BraceletError::TemplateExists {
                template_name: "hello".to_string()
            }
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_missing_template() {
        let registry = Registry::new();
        let err = registry.render("nope", &json!({})).unwrap_err();
        assert_eq!(
            err,
            BraceletError::MissingTemplate {
                template_name: "nope".to_string()
            }
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_bulk_helpers_reject_duplicates() {
        let mut registry = Registry::new();
        let helpers: Vec<(String, Arc<dyn HelperDef>)> = vec![
            ("shout".to_string(), Arc::new(upper)),
            ("shout".to_string(), Arc::new(lower)),
        ];
        let err = registry.register_helpers(helpers).unwrap_err();
        assert_eq!(
            err,
            BraceletError::Runtime(RuntimeError::DuplicateRegistration {
                kind: "Helper".to_string(),
                name: "shout".to_string()
            })
        );
        assert!(!registry.environment().has_helper("shout"));

        let helpers: Vec<(String, Arc<dyn HelperDef>)> = vec![
            ("upper".to_string(), Arc::new(upper)),
            ("lower".to_string(), Arc::new(lower)),
        ];
        registry.register_helpers(helpers).unwrap();
        registry.add_template("t", "{{upper a}}{{lower b}}").unwrap();
        assert_eq!(
            registry.render("t", &json!({"a": "x", "b": "Y"})).unwrap(),
            "Xy"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_unregister() {
        let mut registry = Registry::new();
        registry.register_helper("upper", upper);
        registry.register_partial("p", "partial").unwrap();
        assert!(registry.unregister_helper("upper"));
        assert!(!registry.unregister_helper("upper"));
        assert!(registry.unregister_partial("p"));
        assert!(registry.unregister_decorator("inline"));
        assert!(!registry.environment().has_decorator("inline"));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_bulk_partials() {
        let mut registry = Registry::new();
        let err = registry
            .register_partials([("a", "1"), ("a", "2")])
            .unwrap_err();
        assert!(matches!(
            err,
            BraceletError::Runtime(RuntimeError::DuplicateRegistration { .. })
        ));

        let err = registry
            .register_partials([("a", "1"), ("b", "{{#if}}")])
            .unwrap_err();
        assert!(matches!(err, BraceletError::Parse(_)));
        assert!(!registry.environment().has_partial("a"));

        registry.register_partials([("a", "1"), ("b", "2")]).unwrap();
        registry.add_template("t", "{{> a}}{{> b}}").unwrap();
        assert_eq!(registry.render("t", &json!({})).unwrap(), "12");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_environment_snapshot() {
        let mut registry = Registry::new();
        registry.register_partial("p", "old").unwrap();
        let snapshot = registry.environment();
        registry.register_partial("p", "new").unwrap();

        let template = Template::new("{{> p}}").unwrap();
        assert_eq!(snapshot.render_template(&template, &json!({})).unwrap(), "old");
        assert_eq!(
            registry
                .environment()
                .render_template(&template, &json!({}))
                .unwrap(),
            "new"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_render_with_overrides() {
        let mut registry = Registry::new();
        registry.register_helper("fmt", upper);
        let env = registry.environment();
        let template = Template::new("{{fmt name}} {{@greeting}}").unwrap();

        let overrides = RenderOverrides::new()
            .helper("fmt", lower)
            .data("greeting", json!("hi"));
        assert_eq!(
            env.render_with(&template, &json!({"name": "Ann"}), overrides)
                .unwrap(),
            "ann hi"
        );
        assert_eq!(
            env.render_template(&template, &json!({"name": "Ann"}))
                .unwrap(),
            "ANN "
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_load_spec() {
        let registry = Registry::new();
        let env = registry.environment();
        let spec = crate::precompile("{{a}}", registry.options()).unwrap();
        let template = env.load(spec).unwrap();
        assert_eq!(
            env.render_template(&template, &json!({"a": 1})).unwrap(),
            "1"
        );
    }
}
