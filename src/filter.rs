//! Placeholder substitution for filter expressions.

use serde_json::Value;

/// Replace every `{:name}` placeholder in `expr` with the escaped value of
/// `name`.
///
/// - `null` → `null`
/// - numbers and booleans → as written
/// - strings → single-quoted, `'` escaped as `\'`
/// - arrays and objects → JSON-encoded, then quoted like strings
///
/// Placeholders without a parameter are left untouched.
///
/// ```rust
/// use pocket_link::filter;
/// use serde_json::json;
///
/// let expr = filter(
///     "title ~ {:title} && views > {:views}",
///     [("title", json!("it's")), ("views", json!(10))],
/// );
/// assert_eq!(expr, r"title ~ 'it\'s' && views > 10");
/// ```
pub fn filter<I, K, V>(expr: &str, params: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Into<Value>,
{
    let mut result = expr.to_string();
    for (name, value) in params {
        let placeholder = format!("{{:{}}}", name.as_ref());
        if result.contains(&placeholder) {
            result = result.replace(&placeholder, &render(&value.into()));
        }
    }
    result
}

fn render(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => quote(s),
        other => quote(&other.to_string()),
    }
}

fn quote(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', "\\'"))
}
