#[cfg(feature = "serde")]
mod serde_tests {
    use bracelet::{
        BraceletError, COMPILER_REVISION, CompileOptions, CompiledSpec, Environment, RuntimeError,
        Template, precompile,
    };
    use serde_json::json;

    #[test]
    #[ntest::timeout(100)]
    fn test_options_serialization() {
        let options = CompileOptions::default()
            .with_strict(true)
            .with_known_helper("upper");
        let serialized = serde_json::to_string(&options).unwrap();
        let deserialized: CompileOptions = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized, options);

        // Missing fields fall back to the defaults.
        let partial: CompileOptions = serde_json::from_str(r#"{"compat": true}"#).unwrap();
        assert!(partial.compat);
        assert!(partial.data);
        assert!(!partial.strict);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_template_serialization() {
        let template = Template::new("Hello, {{name}}!").unwrap();

        let serialized = serde_json::to_value(&template).unwrap();
        assert_eq!(serialized["source"], json!("Hello, {{name}}!"));
        assert!(
            serialized.get("spec").is_none(),
            "compiled form should not be serialized"
        );

        let deserialized: Template = serde_json::from_value(serialized).unwrap();
        assert_eq!(deserialized, template);

        let env = Environment::new();
        assert_eq!(
            env.render_template(&deserialized, &json!({"name": "World"}))
                .unwrap(),
            "Hello, World!"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_template_deserialization_compiles() {
        let result: Result<Template, _> = serde_json::from_str(r#"{"source": "{{#if a}}"}"#);
        let err = result.unwrap_err();
        assert!(
            err.to_string().contains("Failed to compile template"),
            "{}",
            err
        );

        let template: Template =
            serde_json::from_str(r#"{"source": "{{a.b}}", "options": {"strict": true}}"#).unwrap();
        assert!(template.options().strict);
        let err = Environment::new()
            .render_template(&template, &json!({"a": {}}))
            .unwrap_err();
        assert!(matches!(
            err,
            BraceletError::Runtime(RuntimeError::MissingProperty { .. })
        ));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_precompiled_spec_round_trip() {
        let source = "{{#each items}}{{> row}}{{/each}}";
        let spec = precompile(source, &CompileOptions::default()).unwrap();
        let serialized = serde_json::to_string(&spec).unwrap();
        let deserialized: CompiledSpec = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized, spec);
        assert!(deserialized.uses_partials());

        let mut registry = bracelet::Registry::new();
        registry.register_partial("row", "<{{this}}>").unwrap();
        let env = registry.environment();
        let template = env.load(deserialized).unwrap();
        assert_eq!(
            env.render_template(&template, &json!({"items": [1, 2]}))
                .unwrap(),
            "<1><2>"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_revision_mismatch() {
        let spec = precompile("hi", &CompileOptions::default()).unwrap();
        let mut serialized = serde_json::to_value(&spec).unwrap();
        let older = COMPILER_REVISION.saturating_sub(1);
        serialized["compiler_revision"] = json!(older);

        let spec: CompiledSpec = serde_json::from_value(serialized).unwrap();
        let err = Environment::new().load(spec).unwrap_err();
        assert_eq!(
            err,
            BraceletError::Runtime(RuntimeError::RevisionMismatch {
                expected: COMPILER_REVISION,
                found: older,
            })
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_error_serialization() {
        let error = BraceletError::Runtime(RuntimeError::MissingPartial {
            name: "footer".to_string(),
        });
        let serialized = serde_json::to_string(&error).unwrap();
        let deserialized: BraceletError = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized, error);
    }
}
