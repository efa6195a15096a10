use std::collections::BTreeMap;

/// Helpers every environment registers, and which the compiler therefore
/// treats as known unless told otherwise.
pub(crate) const DEFAULT_KNOWN_HELPERS: &[&str] = &[
    "helperMissing",
    "blockHelperMissing",
    "each",
    "if",
    "unless",
    "with",
    "log",
    "lookup",
];

/// Options controlling how template source is compiled.
///
/// Every option is baked into the compiled program, so a template compiled
/// with `strict` set behaves strictly in any environment it is rendered in.
///
/// # Examples
///
/// ```
/// use bracelet::CompileOptions;
///
/// let options = CompileOptions::default()
///     .with_strict(true)
///     .with_known_helper("upper");
/// assert!(options.strict);
/// assert!(options.is_known_helper("upper"));
/// assert!(options.is_known_helper("each"));
/// ```
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
    /// Raise [`RuntimeError::MissingProperty`](crate::RuntimeError::MissingProperty)
    /// instead of rendering nothing when a looked-up property does not exist.
    pub strict: bool,
    /// Skip the per-segment null guards on path lookups. A path walking
    /// through a missing value is an error instead of an empty result.
    pub assume_objects: bool,
    /// Treat `{{x}}` like `{{{x}}}`.
    pub no_escape: bool,
    /// Do not re-indent the output of standalone partials.
    pub prevent_indent: bool,
    /// Resolve the first segment of a bare path through every enclosing context.
    pub compat: bool,
    /// Helper names the compiler may call directly. Merged over the built-in
    /// helpers; mapping a built-in to `false` removes it.
    pub known_helpers: BTreeMap<String, bool>,
    /// Fail compilation when a template calls a helper outside `known_helpers`,
    /// and stop resolving bare identifiers as possible helpers.
    pub known_helpers_only: bool,
    /// Thread `@data` variables through the render.
    pub data: bool,
    /// Disable standalone-line whitespace removal.
    pub ignore_standalone: bool,
    /// Partials invoked without an argument get an empty context instead of the caller's.
    pub explicit_partial_context: bool,
    /// Expose parameter source paths to helpers and maintain `@contextPath`.
    pub track_ids: bool,
    /// Pass path parameters to helpers as their source strings.
    pub string_params: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            strict: false,
            assume_objects: false,
            no_escape: false,
            prevent_indent: false,
            compat: false,
            known_helpers: BTreeMap::new(),
            known_helpers_only: false,
            data: true,
            ignore_standalone: false,
            explicit_partial_context: false,
            track_ids: false,
            string_params: false,
        }
    }
}

impl CompileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub const fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub const fn with_assume_objects(mut self, assume_objects: bool) -> Self {
        self.assume_objects = assume_objects;
        self
    }

    pub const fn with_no_escape(mut self, no_escape: bool) -> Self {
        self.no_escape = no_escape;
        self
    }

    pub const fn with_prevent_indent(mut self, prevent_indent: bool) -> Self {
        self.prevent_indent = prevent_indent;
        self
    }

    pub const fn with_compat(mut self, compat: bool) -> Self {
        self.compat = compat;
        self
    }

    pub fn with_known_helper<N: Into<String>>(mut self, name: N) -> Self {
        self.known_helpers.insert(name.into(), true);
        self
    }

    pub fn without_known_helper<N: Into<String>>(mut self, name: N) -> Self {
        self.known_helpers.insert(name.into(), false);
        self
    }

    pub const fn with_known_helpers_only(mut self, known_helpers_only: bool) -> Self {
        self.known_helpers_only = known_helpers_only;
        self
    }

    pub const fn with_data(mut self, data: bool) -> Self {
        self.data = data;
        self
    }

    pub const fn with_ignore_standalone(mut self, ignore_standalone: bool) -> Self {
        self.ignore_standalone = ignore_standalone;
        self
    }

    pub const fn with_explicit_partial_context(mut self, explicit: bool) -> Self {
        self.explicit_partial_context = explicit;
        self
    }

    pub const fn with_track_ids(mut self, track_ids: bool) -> Self {
        self.track_ids = track_ids;
        self
    }

    pub const fn with_string_params(mut self, string_params: bool) -> Self {
        self.string_params = string_params;
        self
    }

    /// Whether `name` is a known helper after merging `known_helpers` over the defaults.
    pub fn is_known_helper(&self, name: &str) -> bool {
        match self.known_helpers.get(name) {
            Some(known) => *known,
            None => DEFAULT_KNOWN_HELPERS.contains(&name),
        }
    }
}
