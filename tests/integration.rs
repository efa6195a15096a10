
use std::rc::Rc;

use bracelet::{
    BlockArgs, BraceletError, BraceletResult, CompileOptions, Environment, HelperOptions, Output,
    Registry, RenderOverrides, Renderer, RuntimeError, Template,
};
use fixtures::{generate_random_whitespace, get_registry, render_once, render_with_options};
use serde_json::json;

fn shout(_: &HelperOptions<'_>) -> BraceletResult<Output> {
    Ok(Output::from("helper"))
}

fn raw(options: &HelperOptions<'_>) -> BraceletResult<Output> {
    let body = options.render(BlockArgs::new(Rc::clone(options.context_rc())))?;
    Ok(Output::safe(body))
}

fn list(options: &HelperOptions<'_>) -> BraceletResult<Output> {
    let items = options
        .param(0)
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    if items.is_empty() {
        return options
            .render_inverse(BlockArgs::new(Rc::clone(options.context_rc())))
            .map(Output::safe);
    }

    let mut out = String::from("<ul>");
    for item in items {
        out.push_str("<li>");
        out.push_str(&options.render(BlockArgs::new(item))?);
        out.push_str("</li>");
    }
    out.push_str("</ul>");
    Ok(Output::safe(out))
}

#[test]
#[ntest::timeout(100)]
fn test_basic_substitution() {
    let template = format!(
        "Hello {{{{{}name{}}}}}!",
        generate_random_whitespace(),
        generate_random_whitespace()
    );
    let rendered = render_once(&template, &json!({"name": "World"}));
    assert_eq!(
        rendered, "Hello World!",
        "Rendered string should match the template."
    );
}

#[test]
#[ntest::timeout(100)]
fn test_basic_iteration() {
    let rendered = render_once(
        "{{#each items}}{{this}},{{/each}}",
        &json!({"items": [1, 2, 3]}),
    );
    assert_eq!(rendered, "1,2,3,");
}

#[test]
#[ntest::timeout(100)]
fn test_if_else() {
    let template = "{{#if flag}}yes{{else}}no{{/if}}";
    assert_eq!(render_once(template, &json!({"flag": false})), "no");
    assert_eq!(render_once(template, &json!({"flag": true})), "yes");
    assert_eq!(render_once(template, &json!({})), "no");
}

#[test]
#[ntest::timeout(100)]
fn test_else_chain() {
    let template = "{{#if a}}A{{else if b}}B{{else}}C{{/if}}";
    assert_eq!(render_once(template, &json!({"a": 1})), "A");
    assert_eq!(render_once(template, &json!({"b": true})), "B");
    assert_eq!(render_once(template, &json!({})), "C");
}

#[test]
#[ntest::timeout(100)]
fn test_conditional_truthiness() {
    let cases = [
        (json!(false), "n", "n"),
        (json!(0), "n", "y"),
        (json!(""), "n", "n"),
        (json!(null), "n", "n"),
        (json!([]), "n", "n"),
        (json!([1]), "y", "y"),
        (json!({}), "y", "y"),
    ];
    for (value, default, include_zero) in cases {
        let data = json!({ "v": value });
        assert_eq!(
            render_once("{{#if v}}y{{else}}n{{/if}}", &data),
            default,
            "if {} without includeZero",
            value
        );
        assert_eq!(
            render_once("{{#if v includeZero=true}}y{{else}}n{{/if}}", &data),
            include_zero,
            "if {} with includeZero",
            value
        );
    }
}

#[test]
#[ntest::timeout(100)]
fn test_escaping() {
    let data = json!({"v": "<b>&\"'`</b>"});
    assert_eq!(
        render_once("{{v}}", &data),
        "&lt;b&gt;&amp;&quot;&#x27;&#x60;&lt;/b&gt;"
    );
    assert_eq!(render_once("{{{v}}}", &data), "<b>&\"'`</b>");
    assert_eq!(render_once("{{&v}}", &data), "<b>&\"'`</b>");
    assert_eq!(
        render_with_options(
            "{{v}}",
            &data,
            CompileOptions::default().with_no_escape(true)
        ),
        "<b>&\"'`</b>"
    );
}

#[test]
#[ntest::timeout(100)]
fn test_value_formatting() {
    let data = json!({"int": 1.0, "float": 1.5, "list": [1, "a", null], "obj": {"a": 1}, "no": false});
    assert_eq!(
        render_once("{{int}}|{{float}}|{{list}}|{{obj}}|{{no}}|{{missing}}", &data),
        "1|1.5|1,a,|[object Object]|false|"
    );
}

#[test]
#[ntest::timeout(100)]
fn test_iteration_metadata() {
    let rendered = render_once(
        "{{#each xs}}{{@index}}:{{@first}}:{{@last}}:{{this}} {{/each}}",
        &json!({"xs": ["a", "b", "c"]}),
    );
    assert_eq!(
        rendered,
        "0:true:false:a 1:false:false:b 2:false:true:c "
    );

    let rendered = render_once(
        "{{#each obj}}{{@key}}={{this}};{{/each}}",
        &json!({"obj": {"z": 1, "a": 2}}),
    );
    assert_eq!(rendered, "z=1;a=2;", "objects iterate in insertion order");
}

#[test]
#[ntest::timeout(100)]
fn test_block_params_and_parent_paths() {
    let data = json!({"title": "T", "xs": ["a", "b"]});
    assert_eq!(
        render_once("{{#each xs as |x i|}}{{i}}={{x}};{{/each}}", &data),
        "0=a;1=b;"
    );
    assert_eq!(
        render_once("{{#each xs}}{{../title}}{{this}}{{/each}}", &data),
        "TaTb"
    );
    assert_eq!(
        render_once(
            "{{#with xs as |list|}}{{#each list}}{{@root.title}}{{/each}}{{/with}}",
            &data
        ),
        "TT"
    );
}

#[test]
#[ntest::timeout(100)]
fn test_with_and_unless() {
    let data = json!({"person": {"name": "Ann"}, "off": false});
    assert_eq!(
        render_once("{{#with person}}{{name}}{{/with}}", &data),
        "Ann"
    );
    assert_eq!(
        render_once("{{#with missing}}x{{else}}none{{/with}}", &data),
        "none"
    );
    assert_eq!(
        render_once("{{#unless off}}shown{{/unless}}", &data),
        "shown"
    );
    assert_eq!(render_once("{{^off}}inverted{{/off}}", &data), "inverted");
}

#[test]
#[ntest::timeout(100)]
fn test_standalone_lines() {
    let data = json!({"a": true});
    assert_eq!(
        render_once("{{#if a}}\nyes\n{{/if}}\n", &data),
        "yes\n",
        "standalone tags remove their whole line"
    );
    assert_eq!(
        render_once("  {{#if a}}  \nyes\n  {{/if}}\ndone", &data),
        "yes\ndone"
    );
    assert_eq!(
        render_once("x {{#if a}}\nyes\n{{/if}}", &data),
        "x \nyes\n",
        "an open tag sharing its line keeps the line"
    );
    assert_eq!(
        render_once("a\n{{! note }}\nb", &data),
        "a\nb",
        "standalone comments vanish"
    );
    assert_eq!(
        render_with_options(
            "{{#if a}}\nyes\n{{/if}}\n",
            &data,
            CompileOptions::default().with_ignore_standalone(true)
        ),
        "\nyes\n\n"
    );
}

#[test]
#[ntest::timeout(100)]
fn test_whitespace_control() {
    let data = json!({"name": "X"});
    assert_eq!(render_once("a  {{~name~}}  b", &data), "aXb");
    assert_eq!(render_once("a  {{~name}}  b", &data), "aX  b");
    assert_eq!(
        render_once("{{#if name~}}\n  in  \n{{~/if}}", &data),
        "in"
    );
}

#[test]
#[ntest::timeout(100)]
fn test_comments_and_raw_content() {
    let data = json!({"name": "X"});
    assert_eq!(
        render_once("a{{! comment }}b{{!-- }} --}}c", &data),
        "abc"
    );
    assert_eq!(render_once("\\{{name}} {{name}}", &data), "{{name}} X");

    let mut registry = get_registry();
    registry.register_helper("raw", raw);
    registry
        .add_template("raw", "{{{{raw}}}}{{name}} {{#if}}{{{{/raw}}}}")
        .unwrap();
    assert_eq!(registry.render("raw", &data).unwrap(), "{{name}} {{#if}}");
}

#[test]
#[ntest::timeout(100)]
fn test_partial_indentation() {
    let mut registry = get_registry();
    registry.register_partial("item", "a\nb\n").unwrap();
    registry
        .add_template("list", "list:\n    {{> item}}\nend")
        .unwrap();
    assert_eq!(
        registry.render("list", &json!({})).unwrap(),
        "list:\n    a\n    b\nend"
    );

    let mut registry =
        Registry::with_options(CompileOptions::default().with_prevent_indent(true));
    registry.register_partial("item", "a\nb\n").unwrap();
    registry
        .add_template("list", "list:\n    {{> item}}\nend")
        .unwrap();
    assert_eq!(
        registry.render("list", &json!({})).unwrap(),
        "list:\n    a\nb\nend"
    );
}

#[test]
#[ntest::timeout(100)]
fn test_partial_context_and_hash() {
    let mut registry = get_registry();
    registry.register_partial("p", "{{name}}-{{extra}}").unwrap();
    registry
        .add_template("page", "{{> p person extra=1}}|{{> p}}")
        .unwrap();
    assert_eq!(
        registry
            .render("page", &json!({"person": {"name": "x"}, "name": "top"}))
            .unwrap(),
        "x-1|top-"
    );

    let mut registry =
        Registry::with_options(CompileOptions::default().with_explicit_partial_context(true));
    registry.register_partial("p", "[{{name}}]").unwrap();
    registry.add_template("page", "{{> p}}{{> p .}}").unwrap();
    assert_eq!(
        registry.render("page", &json!({"name": "top"})).unwrap(),
        "[][top]"
    );
}

#[test]
#[ntest::timeout(100)]
fn test_dynamic_partial() {
    let mut registry = get_registry();
    registry.register_partial("a", "A").unwrap();
    registry.register_partial("b", "B").unwrap();
    registry
        .add_template("page", "{{#each which}}{{> (lookup . 0)}}{{/each}}")
        .unwrap();
    assert_eq!(
        registry
            .render("page", &json!({"which": [["a"], ["b"], ["a"]]}))
            .unwrap(),
        "ABA"
    );
}

#[test]
#[ntest::timeout(100)]
fn test_partial_blocks() {
    let mut registry = get_registry();
    registry
        .register_partial("layout", "<main>{{> @partial-block}}</main>")
        .unwrap();
    registry
        .add_template("page", "{{#> layout}}body {{title}}{{/layout}}")
        .unwrap();
    registry
        .add_template("fallback", "{{#> missing}}fallback {{title}}{{/missing}}")
        .unwrap();
    registry
        .add_template(
            "inline",
            "{{#> layout}}{{#*inline \"content\"}}hi{{/inline}}{{> content}}{{/layout}}",
        )
        .unwrap();

    let data = json!({"title": "T"});
    assert_eq!(registry.render("page", &data).unwrap(), "<main>body T</main>");
    assert_eq!(registry.render("fallback", &data).unwrap(), "fallback T");
    assert_eq!(registry.render("inline", &data).unwrap(), "<main>hi</main>");
}

#[test]
#[ntest::timeout(100)]
fn test_inline_partial_visible_to_called_partial() {
    let mut registry = get_registry();
    registry.register_partial("frame", "[{{> content}}]").unwrap();
    registry
        .add_template(
            "page",
            "{{#> frame}}{{#*inline \"content\"}}{{title}}{{/inline}}{{/frame}}",
        )
        .unwrap();
    assert_eq!(
        registry.render("page", &json!({"title": "T"})).unwrap(),
        "[T]"
    );
}

#[test]
#[ntest::timeout(100)]
fn test_missing_partial() {
    let mut registry = get_registry();
    registry.add_template("page", "{{> nope}}").unwrap();
    let err = registry.render("page", &json!({})).unwrap_err();
    assert_eq!(
        err,
        BraceletError::Runtime(RuntimeError::MissingPartial {
            name: "nope".to_string()
        })
    );
    assert_eq!(err.to_string(), "The partial nope could not be found");
}

#[test]
#[ntest::timeout(100)]
fn test_strict_mode() {
    let strict = CompileOptions::default().with_strict(true);
    let mut registry = Registry::with_options(strict);
    registry.add_template("nested", "{{a.b}}").unwrap();
    registry.add_template("top", "{{x}}").unwrap();
    registry.add_template("guarded", "{{#if x}}{{x}}{{/if}}").unwrap();

    let err = registry.render("nested", &json!({"a": {}})).unwrap_err();
    assert!(
        matches!(
            err,
            BraceletError::Runtime(RuntimeError::MissingProperty { ref name, ref parent, .. })
                if name == "b" && parent == "[object Object]"
        ),
        "{:?}",
        err
    );

    let err = registry.render("top", &json!({})).unwrap_err();
    assert!(
        matches!(
            err,
            BraceletError::Runtime(RuntimeError::MissingProperty { ref name, .. }) if name == "x"
        ),
        "{:?}",
        err
    );

    assert_eq!(registry.render("nested", &json!({"a": {"b": 2}})).unwrap(), "2");
    assert_eq!(registry.render("guarded", &json!({"x": 0})).unwrap(), "");
    // Without strict mode missing data degrades to empty output.
    assert_eq!(render_once("{{a.b.c}}", &json!({"a": null})), "");
}

#[test]
#[ntest::timeout(100)]
fn test_helper_precedence() {
    let mut registry = get_registry();
    registry.register_helper("name", shout);
    registry.add_template("page", "{{name}} {{this.name}}").unwrap();
    assert_eq!(
        registry.render("page", &json!({"name": "value"})).unwrap(),
        "helper value"
    );
}

#[test]
#[ntest::timeout(100)]
fn test_missing_helper() {
    let mut registry = get_registry();
    registry.add_template("call", "{{nope 1}}").unwrap();
    registry.add_template("bare", "[{{nope}}]").unwrap();
    let err = registry.render("call", &json!({})).unwrap_err();
    assert_eq!(err.to_string(), "Missing helper: \"nope\"");
    assert_eq!(registry.render("bare", &json!({})).unwrap(), "[]");
}

#[test]
#[ntest::timeout(100)]
fn test_custom_block_helper() {
    let mut registry = get_registry();
    registry.register_helper("list", list);
    registry
        .add_template("people", "{{#list people}}{{name}}{{else}}nobody{{/list}}")
        .unwrap();
    assert_eq!(
        registry
            .render("people", &json!({"people": [{"name": "<A>"}, {"name": "B"}]}))
            .unwrap(),
        "<ul><li>&lt;A&gt;</li><li>B</li></ul>"
    );
    assert_eq!(
        registry.render("people", &json!({"people": []})).unwrap(),
        "nobody"
    );
}

#[test]
#[ntest::timeout(100)]
fn test_subexpressions() {
    let data = json!({"map": {"k": {"x": "found"}}, "key": "k"});
    assert_eq!(
        render_once("{{lookup (lookup map key) \"x\"}}", &data),
        "found"
    );
}

#[test]
#[ntest::timeout(100)]
fn test_compat_lookup() {
    let data = json!({"a": {}, "b": "outer"});
    let template = "{{#with a}}{{b}}{{/with}}";
    assert_eq!(render_once(template, &data), "");
    assert_eq!(
        render_with_options(template, &data, CompileOptions::default().with_compat(true)),
        "outer"
    );
}

#[test]
#[ntest::timeout(100)]
fn test_render_deterministic() {
    let template = Template::new("{{#each xs}}{{@index}}{{this}}{{/each}}").unwrap();
    let env = Environment::new();
    let data = json!({"xs": ["a", "b"]});
    let first = env.render_template(&template, &data).unwrap();
    let second = env.render_template(&template, &data).unwrap();
    assert_eq!(first, second);
    assert_eq!(first, "0a1b");
}

#[test]
#[ntest::timeout(100)]
fn test_render_with_overrides() {
    let mut registry = get_registry();
    registry.register_partial("header", "registry").unwrap();
    let env = registry.environment();
    let template = Template::new("{{> header}}:{{@site}}:{{name}}").unwrap();

    let overrides = RenderOverrides::new()
        .partial("header", Template::new("call").unwrap())
        .helper("name", shout)
        .data("site", json!("example"));
    assert_eq!(
        env.render_with(&template, &json!({"name": "n"}), overrides)
            .unwrap(),
        "call:example:helper"
    );
    assert_eq!(
        env.render_template(&template, &json!({"name": "n"}))
            .unwrap(),
        "registry::n",
        "overrides do not leak into the environment"
    );
}

#[test]
#[ntest::timeout(100)]
fn test_registry_errors() {
    let mut registry = get_registry();
    registry.add_template("a", "x").unwrap();
    assert_eq!(
        registry.add_template("a", "y").unwrap_err(),
        BraceletError::TemplateExists {
            template_name: "a".to_string()
        }
    );
    assert!(matches!(
        registry.add_template("b", "{{#each}}").unwrap_err(),
        BraceletError::Parse(_)
    ));
    assert!(matches!(
        registry.add_template("c", "{{oops").unwrap_err(),
        BraceletError::Lex(_)
    ));
    assert!(!registry.has_template("b"));
    assert_eq!(
        registry.render("zzz", &json!({})).unwrap_err(),
        BraceletError::MissingTemplate {
            template_name: "zzz".to_string()
        }
    );
}

#[test]
#[ntest::timeout(100)]
fn test_data_disabled() {
    let data = json!({"x": "R", "xs": [1, 2]});
    let template = "[{{@root.x}}]{{#each xs}}<{{@index}}>{{/each}}";
    assert_eq!(render_once(template, &data), "[R]<0><1>");
    assert_eq!(
        render_with_options(template, &data, CompileOptions::default().with_data(false)),
        "[]<><>"
    );

    let env = Environment::new();
    let template = Template::with_options(
        "[{{@site}}]",
        CompileOptions::default().with_data(false),
    )
    .unwrap();
    let overrides = RenderOverrides::new().data("site", json!("example"));
    assert_eq!(
        env.render_with(&template, &json!({}), overrides).unwrap(),
        "[]"
    );
}

#[test]
#[ntest::timeout(100)]
fn test_strict_missing_helper_reports_path_first() {
    let mut registry = Registry::with_options(CompileOptions::default().with_strict(true));
    registry.add_template("call", "{{nope 1}}").unwrap();

    let err = registry.render("call", &json!({})).unwrap_err();
    assert!(
        matches!(
            err,
            BraceletError::Runtime(RuntimeError::MissingProperty { ref name, ref parent, .. })
                if name == "nope" && parent == "[object Object]"
        ),
        "{:?}",
        err
    );

    // Present on the context but not callable.
    let err = registry.render("call", &json!({"nope": 1})).unwrap_err();
    assert_eq!(
        err,
        BraceletError::Runtime(RuntimeError::MissingHelper {
            name: "nope".to_string()
        })
    );
}
