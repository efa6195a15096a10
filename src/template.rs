use crate::{
    BraceletResult,
    codegen::{COMPILER_REVISION, CompiledSpec, generate},
    compiler::compile,
    error::RuntimeError,
    options::CompileOptions,
    parser::parse,
    whitespace::WhitespaceControl,
};

/// Compiles template source into an executable [`CompiledSpec`].
///
/// Runs every compilation stage: parsing, standalone whitespace removal,
/// lowering to opcodes and code generation.
///
/// # Errors
///
/// Returns a lex, parse or compile error describing the first problem found.
pub fn precompile(source: &str, options: &CompileOptions) -> BraceletResult<CompiledSpec> {
    let mut program = parse(source)?;

    WhitespaceControl::new(options.ignore_standalone).apply(&mut program);
    log::debug!("normalized whitespace of {} statements", program.body.len());

    let compiled = compile(&program, options)?;
    generate(&compiled, options)
}

/// A compiled template.
///
/// # Examples
///
/// ```
/// use bracelet::{Environment, Template};
/// use serde_json::json;
///
/// let template = Template::new("Hello, {{name}}!").unwrap();
/// let env = Environment::new();
/// let output = env.render_template(&template, &json!({"name": "World"})).unwrap();
/// assert_eq!(output, "Hello, World!");
/// ```
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    source: String,
    name: Option<String>,
    options: CompileOptions,
    #[cfg_attr(feature = "serde", serde(skip))]
    spec: CompiledSpec,
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for Template {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(serde::Deserialize)]
        struct TemplateHelper {
            source: String,
            #[serde(default)]
            name: Option<String>,
            #[serde(default)]
            options: CompileOptions,
        }

        let helper = TemplateHelper::deserialize(deserializer)?;

        // The compiled form is not serialized; rebuild it from source.
        let template = Self::with_options(helper.source, helper.options)
            .map_err(|e| serde::de::Error::custom(format!("Failed to compile template: {}", e)))?;

        Ok(match helper.name {
            Some(name) => template.named(name),
            None => template,
        })
    }
}

impl Template {
    /// Compiles `source` with the default [`CompileOptions`].
    ///
    /// # Errors
    ///
    /// Returns an error if the template syntax is invalid.
    pub fn new<S: Into<String>>(source: S) -> BraceletResult<Self> {
        Self::with_options(source, CompileOptions::default())
    }

    /// Compiles `source` with the given options.
    ///
    /// # Errors
    ///
    /// Returns an error if the template syntax is invalid, or if it breaks a
    /// rule set by `options` such as `known_helpers_only`.
    pub fn with_options<S: Into<String>>(source: S, options: CompileOptions) -> BraceletResult<Self> {
        let source = source.into();
        let spec = precompile(&source, &options)?;
        Ok(Self {
            source,
            name: None,
            options,
            spec,
        })
    }

    /// Wraps a spec compiled elsewhere, typically loaded from disk.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::RevisionMismatch`] if the spec was produced by
    /// a different compiler revision.
    pub fn from_spec(spec: CompiledSpec) -> BraceletResult<Self> {
        if spec.compiler_revision() != COMPILER_REVISION {
            return Err(RuntimeError::RevisionMismatch {
                expected: COMPILER_REVISION,
                found: spec.compiler_revision(),
            }
            .into());
        }
        Ok(Self {
            source: String::new(),
            name: None,
            options: CompileOptions::default(),
            spec,
        })
    }

    pub(crate) fn named<N: Into<String>>(mut self, name: N) -> Self {
        self.name = Some(name.into());
        self
    }

    /// The source the template was compiled from. Empty for precompiled templates.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub const fn options(&self) -> &CompileOptions {
        &self.options
    }

    pub const fn spec(&self) -> &CompiledSpec {
        &self.spec
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BraceletError, CompileError, ParseErrorKind};

    #[test]
    #[ntest::timeout(100)]
    fn test_new_compiles() {
        let template = Template::new("{{#each xs}}{{this}}{{/each}}").unwrap();
        assert_eq!(template.source(), "{{#each xs}}{{this}}{{/each}}");
        assert_eq!(template.spec().compiler_revision(), COMPILER_REVISION);
        assert_eq!(template.spec().program_count(), 1);
        assert!(template.name().is_none());
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_syntax_errors_surface() {
        let err = Template::new("{{#if a}}open").unwrap_err();
        assert!(matches!(
            err,
            BraceletError::Parse(ref e) if matches!(e.kind, ParseErrorKind::UnexpectedEOF { .. })
        ));

        let err = Template::new("{{#if a}}x{{/unless}}").unwrap_err();
        assert!(matches!(
            err,
            BraceletError::Parse(ref e) if matches!(e.kind, ParseErrorKind::MismatchedBlock { .. })
        ));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_known_helpers_only() {
        let options = CompileOptions::default().with_known_helpers_only(true);
        let err = Template::with_options("{{shout name}}", options).unwrap_err();
        assert!(matches!(
            err,
            BraceletError::Compile(CompileError::UnknownHelper { ref name, .. }) if name == "shout"
        ));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_revision_mismatch() {
        let mut spec = precompile("hi", &CompileOptions::default()).unwrap();
        spec.compiler_revision = COMPILER_REVISION.saturating_sub(1);
        let err = Template::from_spec(spec.clone()).unwrap_err();
        assert!(err.to_string().contains("older version"), "{}", err);

        spec.compiler_revision = COMPILER_REVISION.saturating_add(1);
        let err = Template::from_spec(spec.clone()).unwrap_err();
        assert!(err.to_string().contains("newer version"), "{}", err);

        spec.compiler_revision = COMPILER_REVISION;
        assert!(Template::from_spec(spec).is_ok());
    }
}
