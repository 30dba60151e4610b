//! Shared value types exchanged between transports, handlers, and
//! collaborators.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ProcessError, ProcessResult};

// =============================================================================
// QueryParam
// =============================================================================

/// A single filter condition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryWhere {
    pub column: String,
    #[serde(default)]
    pub value: Value,
    /// Comparison operator (`eq`, `gt`, `lt`, `like`, …). Defaults to `eq`.
    #[serde(default = "default_op")]
    pub op: String,
    /// Combinator (`where` or `orwhere`). Defaults to `where`.
    #[serde(default = "default_method")]
    pub method: String,
}

fn default_op() -> String {
    "eq".to_string()
}

fn default_method() -> String {
    "where".to_string()
}

/// A sort directive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryOrder {
    pub column: String,
    /// `asc` or `desc`. Defaults to `asc`.
    #[serde(default = "default_order")]
    pub option: String,
}

fn default_order() -> String {
    "asc".to_string()
}

/// Declarative query shaping passed to the [`QueryExecutor`] collaborator.
///
/// Transports may build it from a URL query string
/// (`?select=id,name&limit=10&where.status.eq=enabled&order=id desc`),
/// flows and scripts pass it as a JSON object.
///
/// [`QueryExecutor`]: crate::query::QueryExecutor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryParam {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub select: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub wheres: Vec<QueryWhere>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub orders: Vec<QueryOrder>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagesize: Option<u64>,
}

impl QueryParam {
    /// Builds a `QueryParam` from a URL query map (`name → values`).
    ///
    /// Recognised keys: `select`, `limit`, `page`, `pagesize`,
    /// `order` / `order.<column>`, `where.<column>[.<op>]`,
    /// `orwhere.<column>[.<op>]`. Unknown keys are ignored so transports can
    /// mix query shaping with their own parameters.
    pub fn from_query_map(map: &Map<String, Value>) -> Self {
        let mut param = QueryParam::default();
        for (key, value) in map {
            let first = first_string(value);
            match key.as_str() {
                "select" => {
                    param.select = first
                        .split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect();
                }
                "limit" => param.limit = first.parse().ok(),
                "page" => param.page = first.parse().ok(),
                "pagesize" => param.pagesize = first.parse().ok(),
                "order" => {
                    for item in first.split(',') {
                        let mut parts = item.trim().splitn(2, ' ');
                        let column = parts.next().unwrap_or("").to_string();
                        if column.is_empty() {
                            continue;
                        }
                        let option = parts.next().unwrap_or("asc").to_string();
                        param.orders.push(QueryOrder { column, option });
                    }
                }
                other => {
                    if let Some(rest) = other
                        .strip_prefix("where.")
                        .map(|r| ("where", r))
                        .or_else(|| other.strip_prefix("orwhere.").map(|r| ("orwhere", r)))
                    {
                        let (method, rest) = rest;
                        let mut parts = rest.splitn(2, '.');
                        let column = parts.next().unwrap_or("").to_string();
                        let op = parts.next().unwrap_or("eq").to_string();
                        if !column.is_empty() {
                            param.wheres.push(QueryWhere {
                                column,
                                value: Value::from(first.clone()),
                                op,
                                method: method.to_string(),
                            });
                        }
                    }
                }
            }
        }
        param
    }

    /// Parses a `QueryParam` out of an argument value.
    ///
    /// Accepts an object in either the canonical shape or a raw query map
    /// (`name → [values]`, as produced by the HTTP `:query` facet).
    pub fn from_value(value: &Value) -> ProcessResult<Self> {
        match value {
            Value::Null => Ok(QueryParam::default()),
            Value::Object(map) => {
                if looks_like_query_map(map) {
                    Ok(Self::from_query_map(map))
                } else {
                    serde_json::from_value(value.clone()).map_err(|err| {
                        ProcessError::argument(format!("invalid query param: {err}"))
                    })
                }
            }
            other => Err(ProcessError::argument(format!(
                "query param must be an object, got {other}"
            ))),
        }
    }
}

fn first_string(value: &Value) -> String {
    match value {
        Value::Array(items) => items
            .first()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .unwrap_or_default(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A raw query map has list-of-string values or dotted filter keys; the
/// canonical shape has the known field names with structured values.
fn looks_like_query_map(map: &Map<String, Value>) -> bool {
    if map.contains_key("wheres") || map.contains_key("orders") || map.contains_key("model") {
        return false;
    }
    map.keys()
        .any(|k| k.starts_with("where.") || k.starts_with("orwhere."))
        || map.values().any(
            |v| matches!(v, Value::Array(items) if !items.is_empty() && items.iter().all(Value::is_string)),
        )
}

// =============================================================================
// UploadFile
// =============================================================================

/// A file extracted from a multipart request into a per-request temp file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadFile {
    /// Original file name as sent by the client.
    pub name: String,
    /// Path of the reserved temp file holding the content.
    pub temp_path: String,
    /// Content length in bytes.
    pub size: u64,
    /// Declared content type, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

impl UploadFile {
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn query_map(pairs: &[(&str, &[&str])]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, vs)| {
                (
                    k.to_string(),
                    Value::Array(vs.iter().map(|v| Value::from(*v)).collect()),
                )
            })
            .collect()
    }

    #[test]
    fn test_from_query_map_select_and_limit() {
        let map = query_map(&[("select", &["id,name"]), ("limit", &["10"])]);
        let param = QueryParam::from_query_map(&map);
        assert_eq!(param.select, vec!["id", "name"]);
        assert_eq!(param.limit, Some(10));
    }

    #[test]
    fn test_from_query_map_wheres() {
        let map = query_map(&[("where.status.eq", &["enabled"]), ("where.age.gt", &["18"])]);
        let param = QueryParam::from_query_map(&map);
        assert_eq!(param.wheres.len(), 2);
        let status = param.wheres.iter().find(|w| w.column == "status").unwrap();
        assert_eq!(status.op, "eq");
        assert_eq!(status.value, Value::from("enabled"));
    }

    #[test]
    fn test_from_query_map_order() {
        let map = query_map(&[("order", &["id desc,name"])]);
        let param = QueryParam::from_query_map(&map);
        assert_eq!(param.orders.len(), 2);
        assert_eq!(param.orders[0].column, "id");
        assert_eq!(param.orders[0].option, "desc");
        assert_eq!(param.orders[1].option, "asc");
    }

    #[test]
    fn test_from_value_canonical_shape() {
        let value = json!({"select": ["id"], "limit": 5});
        let param = QueryParam::from_value(&value).unwrap();
        assert_eq!(param.select, vec!["id"]);
        assert_eq!(param.limit, Some(5));
    }

    #[test]
    fn test_from_value_rejects_scalar() {
        assert!(QueryParam::from_value(&json!(42)).is_err());
    }
}
