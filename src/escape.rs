//! Rendering of values into template output.

use std::borrow::Cow;

use serde_json::{Number, Value};

/// Escapes the characters that are unsafe in HTML text and attribute values.
///
/// # Examples
///
/// ```
/// use bracelet::escape_expression;
///
/// assert_eq!(escape_expression("<a href=\"x\">"), "&lt;a href&#x3D;&quot;x&quot;&gt;");
/// assert_eq!(escape_expression("plain"), "plain");
/// ```
pub fn escape_expression(input: &str) -> Cow<'_, str> {
    if !input.contains(['&', '<', '>', '"', '\'', '`', '=']) {
        return Cow::Borrowed(input);
    }

    let mut out = String::with_capacity(input.len().saturating_add(16));
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            '`' => out.push_str("&#x60;"),
            '=' => out.push_str("&#x3D;"),
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

fn number_to_string(n: &Number) -> String {
    if n.is_f64() {
        if let Some(f) = n.as_f64() {
            if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e21 {
                return format!("{:.0}", f);
            }
            return f.to_string();
        }
    }
    n.to_string()
}

/// The text a value renders as.
pub(crate) fn stringify(value: &Value) -> Cow<'_, str> {
    match value {
        Value::Null => Cow::Borrowed(""),
        Value::Bool(true) => Cow::Borrowed("true"),
        Value::Bool(false) => Cow::Borrowed("false"),
        Value::Number(n) => Cow::Owned(number_to_string(n)),
        Value::String(s) => Cow::Borrowed(s),
        Value::Array(items) => Cow::Owned(
            items
                .iter()
                .map(stringify)
                .collect::<Vec<_>>()
                .join(","),
        ),
        Value::Object(_) => Cow::Borrowed("[object Object]"),
    }
}

/// Describes a value in error messages, where a missing value reads `undefined`.
pub(crate) fn describe(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "undefined".to_string(),
        Some(value) => stringify(value).into_owned(),
    }
}

pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Empty for block purposes: falsy, except that `0` is not empty and `[]` is.
pub(crate) fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !*b,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Number(_) | Value::Object(_) => false,
    }
}

/// Whether two values count as the same context when deciding to push a new depth.
pub(crate) fn same_primitive(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_), _)
        | (Value::Array(_) | Value::Object(_), _) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    #[ntest::timeout(100)]
    fn test_escape() {
        assert_eq!(escape_expression("&<>\"'`="), "&amp;&lt;&gt;&quot;&#x27;&#x60;&#x3D;");
        assert!(matches!(escape_expression("nothing here"), Cow::Borrowed(_)));
        assert_eq!(escape_expression("ü & ö"), "ü &amp; ö");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_stringify() {
        assert_eq!(stringify(&json!(null)), "");
        assert_eq!(stringify(&json!(true)), "true");
        assert_eq!(stringify(&json!(12)), "12");
        assert_eq!(stringify(&json!(-3)), "-3");
        assert_eq!(stringify(&json!(1.0)), "1");
        assert_eq!(stringify(&json!(1.5)), "1.5");
        assert_eq!(stringify(&json!([1, null, "a"])), "1,,a");
        assert_eq!(stringify(&json!({"a": 1})), "[object Object]");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_truthiness() {
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(is_truthy(&json!([])));
        assert!(is_truthy(&json!({})));

        assert!(!is_empty(&json!(0)));
        assert!(is_empty(&json!([])));
        assert!(is_empty(&json!(false)));
        assert!(!is_empty(&json!({})));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_same_primitive() {
        assert!(same_primitive(&json!("a"), &json!("a")));
        assert!(!same_primitive(&json!(1), &json!("1")));
        assert!(!same_primitive(&json!({}), &json!({})));
    }
}
