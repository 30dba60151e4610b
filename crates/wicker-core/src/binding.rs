//! Template binding: `{{ expr }}` resolution inside JSON trees.
//!
//! Two token forms live inside string leaves:
//!
//! - `{{ path }}`: lookup against the binding scope. A string that is
//!   exactly one token yields the raw value; a mixed string interpolates the
//!   stringified value. Unknown paths resolve to null (empty in mixed
//!   strings).
//! - `{{ fn(arg, …) }}`: invoke a registered helper. Arguments are
//!   `:path` lookups, `'literal'` strings, numbers, or `true`/`false`.
//!
//! Binding recurses through objects and arrays; non-string leaves pass
//! through unchanged. Substituted content is never rescanned, so binding is
//! idempotent for helper-free values.

use std::collections::HashMap;
use std::sync::Arc;

use regex_lite::Regex;
use serde_json::{Map, Value};

/// A registered template helper.
pub type HelperFn = Arc<dyn Fn(Vec<Value>) -> Value + Send + Sync>;

/// Named slots available to template expressions (`$in`, `$res`, …).
#[derive(Debug, Clone, Default)]
pub struct BindScope {
    roots: Map<String, Value>,
}

impl BindScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a root slot.
    pub fn set(&mut self, key: impl Into<String>, value: Value) -> &mut Self {
        self.roots.insert(key.into(), value);
        self
    }

    /// Spreads every key of `map` as a `$key` root slot.
    pub fn spread(&mut self, map: &Map<String, Value>) -> &mut Self {
        for (key, value) in map {
            self.roots.insert(format!("${key}"), value.clone());
        }
        self
    }

    /// Resolves a dotted path (`$res.users.0.name`) against the scope.
    pub fn lookup(&self, path: &str) -> Option<Value> {
        let mut segments = path.split('.');
        let root = segments.next()?;
        let mut current = self.roots.get(root)?;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current.clone())
    }
}

fn token_regex() -> Regex {
    // Single-line token; `{` and `}` never appear inside an expression.
    Regex::new(r"\{\{([^{}]*)\}\}").expect("static regex")
}

/// Binds templates in `value` without helper support.
pub fn bind(value: &Value, scope: &BindScope) -> Value {
    bind_with(value, scope, &HashMap::new())
}

/// Binds templates in `value`, resolving helper calls against `helpers`.
pub fn bind_with(value: &Value, scope: &BindScope, helpers: &HashMap<String, HelperFn>) -> Value {
    match value {
        Value::String(text) => bind_string(text, scope, helpers),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| bind_with(item, scope, helpers))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| (key.clone(), bind_with(item, scope, helpers)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn bind_string(text: &str, scope: &BindScope, helpers: &HashMap<String, HelperFn>) -> Value {
    let re = token_regex();
    let trimmed = text.trim();

    // Whole-string token: return the raw value.
    if let Some(caps) = re.captures(trimmed)
        && caps.get(0).map(|m| m.as_str()) == Some(trimmed)
    {
        let expr = caps.get(1).map(|m| m.as_str().trim()).unwrap_or("");
        return evaluate(expr, scope, helpers);
    }

    if !re.is_match(text) {
        return Value::String(text.to_string());
    }

    // Mixed string: stringified interpolation, nulls render empty.
    let mut out = String::new();
    let mut last = 0;
    for caps in re.captures_iter(text) {
        let whole = caps.get(0).expect("match");
        out.push_str(&text[last..whole.start()]);
        let expr = caps.get(1).map(|m| m.as_str().trim()).unwrap_or("");
        match evaluate(expr, scope, helpers) {
            Value::Null => {}
            Value::String(s) => out.push_str(&s),
            other => out.push_str(&other.to_string()),
        }
        last = whole.end();
    }
    out.push_str(&text[last..]);
    Value::String(out)
}

fn evaluate(expr: &str, scope: &BindScope, helpers: &HashMap<String, HelperFn>) -> Value {
    if expr.is_empty() {
        return Value::Null;
    }
    if let Some((name, args)) = parse_call(expr) {
        let Some(helper) = helpers.get(&name) else {
            return Value::Null;
        };
        let args = args
            .into_iter()
            .map(|token| evaluate_arg(&token, scope))
            .collect();
        return helper(args);
    }
    scope.lookup(expr).unwrap_or(Value::Null)
}

/// Parses `fn(a, b, …)` into the helper name and raw argument tokens.
fn parse_call(expr: &str) -> Option<(String, Vec<String>)> {
    let open = expr.find('(')?;
    if !expr.ends_with(')') {
        return None;
    }
    let name = expr[..open].trim();
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
    {
        return None;
    }
    let inner = &expr[open + 1..expr.len() - 1];
    Some((name.to_string(), split_args(inner)))
}

/// Splits on top-level commas, honouring single-quoted literals.
fn split_args(inner: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for ch in inner.chars() {
        match ch {
            '\'' => {
                quoted = !quoted;
                current.push(ch);
            }
            ',' if !quoted => {
                if !current.trim().is_empty() {
                    args.push(current.trim().to_string());
                }
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    if !current.trim().is_empty() {
        args.push(current.trim().to_string());
    }
    args
}

fn evaluate_arg(token: &str, scope: &BindScope) -> Value {
    if let Some(path) = token.strip_prefix(':') {
        return scope.lookup(path).unwrap_or(Value::Null);
    }
    if token.len() >= 2 && token.starts_with('\'') && token.ends_with('\'') {
        return Value::String(token[1..token.len() - 1].to_string());
    }
    if let Ok(n) = token.parse::<i64>() {
        return Value::from(n);
    }
    if let Ok(f) = token.parse::<f64>() {
        return Value::from(f);
    }
    match token {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope() -> BindScope {
        let mut scope = BindScope::new();
        scope.set("$in", json!([1, {"name": "ada"}]));
        scope.set("$res", json!({"users": [{"id": 7}], "count": 2}));
        scope.set("$global", json!({"app": "wicker"}));
        scope
    }

    #[test]
    fn test_whole_token_returns_raw_value() {
        let bound = bind(&json!("{{ $in.0 }}"), &scope());
        assert_eq!(bound, json!(1));
    }

    #[test]
    fn test_nested_path() {
        let bound = bind(&json!("{{ $res.users.0.id }}"), &scope());
        assert_eq!(bound, json!(7));
    }

    #[test]
    fn test_mixed_string_interpolates() {
        let bound = bind(&json!("user_{{ $in.0 }}"), &scope());
        assert_eq!(bound, json!("user_1"));
    }

    #[test]
    fn test_unknown_path_is_null() {
        assert_eq!(bind(&json!("{{ $res.missing }}"), &scope()), Value::Null);
        assert_eq!(bind(&json!("x{{ $res.missing }}y"), &scope()), json!("xy"));
    }

    #[test]
    fn test_recurses_through_trees() {
        let value = json!({"a": ["{{ $res.count }}"], "b": {"c": "{{ $global.app }}"}});
        let bound = bind(&value, &scope());
        assert_eq!(bound, json!({"a": [2], "b": {"c": "wicker"}}));
    }

    #[test]
    fn test_non_string_leaves_unchanged() {
        let value = json!({"n": 42, "flag": true});
        assert_eq!(bind(&value, &scope()), value);
    }

    #[test]
    fn test_helper_call() {
        let mut helpers: HashMap<String, HelperFn> = HashMap::new();
        helpers.insert(
            "concat".to_string(),
            Arc::new(|args: Vec<Value>| {
                Value::String(
                    args.iter()
                        .map(|a| match a {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        })
                        .collect(),
                )
            }),
        );
        let bound = bind_with(
            &json!("{{ concat(:$global.app, '-', 1) }}"),
            &scope(),
            &helpers,
        );
        assert_eq!(bound, json!("wicker-1"));
    }

    #[test]
    fn test_unknown_helper_is_null() {
        let bound = bind(&json!("{{ nope(:$in.0) }}"), &scope());
        assert_eq!(bound, Value::Null);
    }

    #[test]
    fn test_binding_is_idempotent() {
        let s = scope();
        for value in [
            json!("{{ $in.0 }}"),
            json!("user_{{ $in.1.name }}"),
            json!({"list": ["{{ $res.users }}", "plain"]}),
        ] {
            let once = bind(&value, &s);
            let twice = bind(&once, &s);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_spread_keys() {
        let mut s = BindScope::new();
        let map = json!({"limit": 5});
        if let Value::Object(obj) = &map {
            s.spread(obj);
        }
        assert_eq!(bind(&json!("{{ $limit }}"), &s), json!(5));
    }
}
