use std::{collections::HashMap, rc::Rc, sync::Arc};

use crate::{
    error::BraceletResult,
    escape::stringify,
    helpers::HelperOptions,
    interface::DecoratorDef,
    runtime::{BlockProgram, PartialFn, PartialLayer},
};

/// What decorators of one program may change about its execution.
///
/// Partials registered here are visible while the program renders, including
/// inside partials it calls, and disappear once it returns.
#[derive(Debug, Default)]
pub struct DecoratorProps<'a> {
    partials: HashMap<String, PartialFn<'a>>,
}

impl<'a> DecoratorProps<'a> {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers the decorator's block body as a partial called `name`.
    pub fn register_inline<N: Into<String>>(&mut self, name: N, options: &HelperOptions<'a>) {
        let partial = match options.program {
            Some(index) => PartialFn::Block(Rc::new(BlockProgram {
                spec: options.spec,
                index,
                scope: options.scope.clone(),
            })),
            None => PartialFn::Empty,
        };
        self.partials.insert(name.into(), partial);
    }

    pub fn has_partial(&self, name: &str) -> bool {
        self.partials.contains_key(name)
    }

    pub(crate) fn into_layer(self, parent: Option<Rc<PartialLayer<'a>>>) -> Option<Rc<PartialLayer<'a>>> {
        if self.partials.is_empty() {
            return None;
        }
        Some(Rc::new(PartialLayer {
            entries: self.partials,
            parent,
        }))
    }
}

/// `{{#*inline "name"}}...{{/inline}}`
fn inline<'a>(props: &mut DecoratorProps<'a>, options: &HelperOptions<'a>) -> BraceletResult<()> {
    let name = options.param(0).map(stringify).unwrap_or_default();
    props.register_inline(name.into_owned(), options);
    Ok(())
}

pub(crate) fn builtins() -> HashMap<String, Arc<dyn DecoratorDef>> {
    let mut decorators: HashMap<String, Arc<dyn DecoratorDef>> = HashMap::new();
    decorators.insert("inline".to_string(), Arc::new(inline));
    decorators
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BraceletError, Registry, Renderer, RuntimeError};
    use serde_json::json;

    fn alias<'a>(props: &mut DecoratorProps<'a>, options: &HelperOptions<'a>) -> BraceletResult<()> {
        let name = options.param(0).and_then(|v| v.as_str()).unwrap_or_default();
        props.register_inline(name.to_string(), options);
        Ok(())
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_inline_partial() {
        let mut registry = Registry::new();
        registry
            .add_template("page", "{{#*inline \"item\"}}<{{this}}>{{/inline}}{{#each xs}}{{> item}}{{/each}}")
            .unwrap();
        assert_eq!(
            registry.render("page", &json!({"xs": [1, 2]})).unwrap(),
            "<1><2>"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_inline_scoped_to_program() {
        let mut registry = Registry::new();
        registry
            .add_template(
                "page",
                "{{#if a}}{{#*inline \"p\"}}inner{{/inline}}{{> p}}{{/if}}{{> p}}",
            )
            .unwrap();
        let err = registry.render("page", &json!({"a": true})).unwrap_err();
        assert_eq!(
            err,
            BraceletError::Runtime(RuntimeError::MissingPartial {
                name: "p".to_string()
            })
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_custom_decorator() {
        let mut registry = Registry::new();
        registry.register_decorator("alias", alias);
        registry
            .add_template("page", "{{#*alias \"greeting\"}}hi {{name}}{{/alias}}{{> greeting}}")
            .unwrap();
        assert_eq!(
            registry.render("page", &json!({"name": "Al"})).unwrap(),
            "hi Al"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_missing_decorator() {
        let mut registry = Registry::new();
        registry.add_template("page", "{{*nope}}x").unwrap();
        let err = registry.render("page", &json!({})).unwrap_err();
        assert_eq!(
            err,
            BraceletError::Runtime(RuntimeError::MissingDecorator {
                name: "nope".to_string()
            })
        );
    }
}
