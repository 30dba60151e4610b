//! Outbound HTTP client handler group.
//!
//! `http.<class>.<verb>` sends a request with the shared client; the class
//! segment is free-form (conventionally `client`). Argument shapes:
//!
//! - `get/delete/head`: `(url, query?, headers?)`
//! - `post/put/patch`: `(url, payload?, query?, headers?)`
//! - `send`: `(method, url, payload?, query?, headers?)`
//!
//! The response value is `{status, headers, body}`; the body is JSON-decoded
//! when the payload parses, raw text otherwise.

use std::sync::Arc;

use reqwest::Client;
use serde_json::{Map, Value, json};

use wicker_core::kernel::handler;
use wicker_core::{HandlerGroup, Kernel, Process, ProcessError, ProcessResult};

/// Installs the `http` group with a default client.
pub fn install(kernel: &Arc<Kernel>) {
    install_with(kernel, Client::new());
}

/// Installs the `http` group with a caller-configured client.
pub fn install_with(kernel: &Arc<Kernel>, client: Client) {
    let mut group = HandlerGroup::new();
    for verb in ["get", "post", "put", "patch", "delete", "head", "send"] {
        let client = client.clone();
        group = group.with(
            verb,
            handler(move |p: Process| {
                let client = client.clone();
                async move { http_exec(client, p).await }
            }),
        );
    }
    kernel.register_group("http", group);
}

async fn http_exec(client: Client, p: Process) -> ProcessResult<Value> {
    let (method, base) = match p.method() {
        "send" => (p.arg_string(0)?.to_uppercase(), 1),
        verb => (verb.to_uppercase(), 0),
    };
    let url = p.arg_string(base)?;
    let has_body = matches!(method.as_str(), "POST" | "PUT" | "PATCH") || p.method() == "send";
    let (payload, query_index) = if has_body {
        (p.arg(base + 1).cloned(), base + 2)
    } else {
        (None, base + 1)
    };
    let query = p.arg_map_opt(query_index)?;
    let headers = p.arg_map_opt(query_index + 1)?;

    let method = reqwest::Method::from_bytes(method.as_bytes())
        .map_err(|_| ProcessError::argument(format!("invalid HTTP method '{method}'")))?;
    let mut request = client.request(method, &url);
    if let Some(query) = query {
        request = request.query(&flatten_pairs(&query));
    }
    if let Some(headers) = headers {
        for (name, value) in &headers {
            let value = match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            request = request.header(name, value);
        }
    }
    if let Some(payload) = payload {
        request = request.json(&payload);
    }

    let response = request
        .send()
        .await
        .map_err(|e| ProcessError::internal(format!("http request to '{url}' failed: {e}")))?;

    let status = response.status().as_u16();
    let mut header_map = Map::new();
    for (name, value) in response.headers() {
        if let Ok(text) = value.to_str() {
            header_map.insert(name.as_str().to_string(), Value::from(text));
        }
    }
    let text = response
        .text()
        .await
        .map_err(|e| ProcessError::internal(format!("http response from '{url}' unreadable: {e}")))?;
    let body = serde_json::from_str(&text).unwrap_or(Value::from(text));

    Ok(json!({ "status": status, "headers": header_map, "body": body }))
}

/// Flattens a query map (scalars or arrays of scalars) into pairs.
fn flatten_pairs(map: &Map<String, Value>) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for (name, value) in map {
        match value {
            Value::Array(items) => {
                for item in items {
                    pairs.push((name.clone(), scalar_text(item)));
                }
            }
            other => pairs.push((name.clone(), scalar_text(other))),
        }
    }
    pairs
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_pairs() {
        let map: Map<String, Value> = serde_json::from_value(json!({
            "tag": ["a", "b"],
            "n": 3
        }))
        .unwrap();
        let mut pairs = flatten_pairs(&map);
        pairs.sort();
        assert_eq!(
            pairs,
            vec![
                ("n".to_string(), "3".to_string()),
                ("tag".to_string(), "a".to_string()),
                ("tag".to_string(), "b".to_string()),
            ]
        );
    }
}
