//! Request facet extraction.
//!
//! Each API path declares its process arguments as a list of input tokens
//! mapped to request facets: whole facets (`:body`, `:payload`, `:query`,
//! `:params`, `:headers`, `:context`, `:fullpath`) and single fields
//! (`$query.name`, `$payload.name`, `$form.name`, `$param.name`,
//! `$file.name`, `$session.name`). The leading `:`/`$` sigils are
//! interchangeable; both appear in existing widget documents.
//!
//! Multipart file fields are streamed into per-request temp files and passed
//! on as [`UploadFile`] records.

use std::collections::HashMap;

use axum::extract::{FromRequest, Multipart, Query, Request};
use axum::http::Uri;
use serde_json::{Map, Value, json};
use uuid::Uuid;

use std::sync::Arc;

use wicker_core::{Kernel, ProcessError, ProcessResult, StoreWidget, UploadFile, WidgetKind};

use crate::api::InSpec;

/// Session id header and cookie names.
pub const SID_HEADER: &str = "wicker-sid";
pub const SID_COOKIE: &str = "sid";

/// Whole-facet tokens and dotted-facet prefixes accepted in `in` lists.
const FACETS: [&str; 7] = [
    "body", "payload", "query", "params", "headers", "context", "fullpath",
];
const FIELD_FACETS: [&str; 6] = ["query", "payload", "form", "param", "file", "session"];

/// Validates an input token; used by the loader to reject unknown tokens.
pub fn validate_token(token: &str) -> bool {
    let token = token.trim_start_matches([':', '$']);
    match token.split_once('.') {
        None => FACETS.contains(&token),
        Some((facet, field)) => !field.is_empty() && FIELD_FACETS.contains(&facet),
    }
}

/// The decomposed request, ready for token extraction.
#[derive(Debug, Default)]
pub struct RequestFacets {
    pub sid: String,
    pub method: String,
    /// The route pattern the request matched (`/user/info/:id`).
    pub fullpath: String,
    pub params: Map<String, Value>,
    pub query: Map<String, Value>,
    pub headers: Map<String, Value>,
    pub body: String,
    pub payload: Value,
    pub form: Map<String, Value>,
    pub files: HashMap<String, UploadFile>,
}

impl RequestFacets {
    /// Decomposes a request: headers, query, sid, and the body in whichever
    /// shape it arrives (raw, JSON, urlencoded form, multipart).
    pub async fn from_request(
        request: Request,
        params: HashMap<String, String>,
        fullpath: &str,
    ) -> ProcessResult<Self> {
        let method = request.method().to_string();
        let uri = request.uri().clone();

        let mut headers = Map::new();
        for (name, value) in request.headers() {
            if let Ok(text) = value.to_str() {
                headers.insert(name.as_str().to_lowercase(), Value::from(text));
            }
        }
        let sid = extract_sid(&headers);
        let query = query_map(&uri);
        let params = params
            .into_iter()
            .map(|(k, v)| (k, Value::from(v)))
            .collect();

        let content_type = headers
            .get("content-type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let mut facets = Self {
            sid,
            method,
            fullpath: fullpath.to_string(),
            params,
            query,
            headers,
            ..Default::default()
        };

        if content_type.starts_with("multipart/form-data") {
            facets.read_multipart(request).await?;
        } else {
            let bytes = axum::body::to_bytes(request.into_body(), 32 * 1024 * 1024)
                .await
                .map_err(|e| ProcessError::argument(format!("unreadable request body: {e}")))?;
            facets.body = String::from_utf8_lossy(&bytes).into_owned();
            if content_type.starts_with("application/x-www-form-urlencoded") {
                facets.form = urlencoded_map(&facets.body);
            } else if !facets.body.is_empty() {
                facets.payload = serde_json::from_str(&facets.body).unwrap_or(Value::Null);
            }
        }
        Ok(facets)
    }

    async fn read_multipart(&mut self, request: Request) -> ProcessResult<()> {
        let mut multipart = Multipart::from_request(request, &())
            .await
            .map_err(|e| ProcessError::argument(format!("invalid multipart body: {e}")))?;
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ProcessError::argument(format!("invalid multipart field: {e}")))?
        {
            let name = field.name().unwrap_or_default().to_string();
            if let Some(file_name) = field.file_name().map(str::to_string) {
                let content_type = field.content_type().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ProcessError::argument(format!("unreadable upload: {e}")))?;
                // Reserve a per-request temp file for the upload.
                let temp_path =
                    std::env::temp_dir().join(format!("wicker-upload-{}", Uuid::new_v4()));
                tokio::fs::write(&temp_path, &bytes).await?;
                self.files.insert(
                    name,
                    UploadFile {
                        name: file_name,
                        temp_path: temp_path.to_string_lossy().into_owned(),
                        size: bytes.len() as u64,
                        content_type,
                    },
                );
            } else {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ProcessError::argument(format!("unreadable form field: {e}")))?;
                self.form.insert(name, Value::from(text));
            }
        }
        Ok(())
    }

    /// Resolves one input token into a process argument.
    pub async fn extract(&self, spec: &InSpec, kernel: &Arc<Kernel>) -> ProcessResult<Value> {
        let token = spec.token().trim_start_matches([':', '$']);
        let value = match token.split_once('.') {
            None => match token {
                "body" => Value::from(self.body.clone()),
                "payload" => self.payload.clone(),
                "query" => Value::Object(self.query.clone()),
                "params" => Value::Object(self.params.clone()),
                "headers" => Value::Object(self.headers.clone()),
                "fullpath" => Value::from(self.fullpath.clone()),
                "context" => json!({
                    "sid": self.sid,
                    "method": self.method,
                    "path": self.fullpath,
                }),
                other => {
                    return Err(ProcessError::argument(format!(
                        "unknown input token ':{other}'"
                    )));
                }
            },
            Some(("query", field)) => self
                .query
                .get(field)
                .and_then(|v| v.as_array())
                .and_then(|items| items.first())
                .cloned()
                .unwrap_or(Value::Null),
            Some(("param", field)) => self.params.get(field).cloned().unwrap_or(Value::Null),
            Some(("payload", field)) => self
                .payload
                .as_object()
                .and_then(|map| map.get(field))
                .cloned()
                .unwrap_or(Value::Null),
            Some(("form", field)) => self.form.get(field).cloned().unwrap_or(Value::Null),
            Some(("file", field)) => self
                .files
                .get(field)
                .map(UploadFile::to_value)
                .unwrap_or(Value::Null),
            Some(("session", field)) => self.session_field(field, kernel).await,
            Some((facet, _)) => {
                return Err(ProcessError::argument(format!(
                    "unknown input facet '${facet}'"
                )));
            }
        };
        if value.is_null()
            && let Some(default) = spec.default_value()
        {
            return Ok(default.clone());
        }
        Ok(value)
    }

    /// `$session.name` reads the store named `session` keyed by the request
    /// sid; an absent store, sid, or key yields null.
    async fn session_field(&self, field: &str, kernel: &Arc<Kernel>) -> Value {
        if self.sid.is_empty() {
            return Value::Null;
        }
        let Ok(widget) = kernel
            .registry()
            .select_as::<StoreWidget>(WidgetKind::Store, "session")
        else {
            return Value::Null;
        };
        widget
            .store
            .get(&self.sid)
            .await
            .and_then(|session| session.get(field).cloned())
            .unwrap_or(Value::Null)
    }
}

fn extract_sid(headers: &Map<String, Value>) -> String {
    if let Some(sid) = headers.get(SID_HEADER).and_then(Value::as_str)
        && !sid.is_empty()
    {
        return sid.to_string();
    }
    if let Some(cookies) = headers.get("cookie").and_then(Value::as_str) {
        for pair in cookies.split(';') {
            if let Some((name, value)) = pair.trim().split_once('=')
                && name.trim() == SID_COOKIE
                && !value.trim().is_empty()
            {
                return value.trim().to_string();
            }
        }
    }
    Uuid::new_v4().to_string()
}

/// Parses the URL query into a `name → [values]` map.
fn query_map(uri: &Uri) -> Map<String, Value> {
    pairs_to_map(
        Query::<Vec<(String, String)>>::try_from_uri(uri)
            .map(|q| q.0)
            .unwrap_or_default(),
    )
}

/// Parses an urlencoded body through the same machinery as the URL query.
fn urlencoded_map(body: &str) -> Map<String, Value> {
    let Ok(uri) = Uri::try_from(format!("/?{body}")) else {
        return Map::new();
    };
    query_map(&uri)
}

fn pairs_to_map(pairs: Vec<(String, String)>) -> Map<String, Value> {
    let mut map: Map<String, Value> = Map::new();
    for (name, value) in pairs {
        match map.get_mut(&name) {
            Some(Value::Array(items)) => items.push(Value::from(value)),
            _ => {
                map.insert(name, Value::Array(vec![Value::from(value)]));
            }
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_token_accepts_known_shapes() {
        for token in [
            ":body",
            ":payload",
            ":query",
            ":params",
            ":headers",
            ":context",
            ":fullpath",
            "$query.select",
            "$param.id",
            ":param.id",
            "$form.name",
            "$file.avatar",
            "$session.user_id",
            "$payload.email",
        ] {
            assert!(validate_token(token), "token {token} must validate");
        }
    }

    #[test]
    fn test_validate_token_rejects_unknown() {
        for token in [":cookie", "$remote.addr", ":payload.", "whatever"] {
            assert!(!validate_token(token), "token {token} must be rejected");
        }
    }

    #[test]
    fn test_query_map_collects_repeats() {
        let uri: Uri = "/x?select=id,name&tag=a&tag=b".parse().unwrap();
        let map = query_map(&uri);
        assert_eq!(map["select"], json!(["id,name"]));
        assert_eq!(map["tag"], json!(["a", "b"]));
    }

    #[test]
    fn test_urlencoded_map_decodes() {
        let map = urlencoded_map("name=ada+l&age=36");
        assert_eq!(map["name"], json!(["ada l"]));
        assert_eq!(map["age"], json!(["36"]));
    }

    #[test]
    fn test_sid_from_header_and_cookie() {
        let mut headers = Map::new();
        headers.insert(SID_HEADER.into(), json!("h-sid"));
        assert_eq!(extract_sid(&headers), "h-sid");

        let mut headers = Map::new();
        headers.insert("cookie".into(), json!("a=1; sid=c-sid; b=2"));
        assert_eq!(extract_sid(&headers), "c-sid");

        // No sid source: a fresh opaque id is minted.
        let minted = extract_sid(&Map::new());
        assert!(!minted.is_empty());
    }

    fn request(
        method: &str,
        uri: &str,
        content_type: Option<&str>,
        body: &str,
    ) -> Request {
        let mut builder = axum::http::Request::builder().method(method).uri(uri);
        if let Some(content_type) = content_type {
            builder = builder.header("content-type", content_type);
        }
        builder
            .header(SID_HEADER, "sess-1")
            .body(axum::body::Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_facets_from_json_request() {
        let req = request(
            "POST",
            "/user/info/9?select=id",
            Some("application/json"),
            r#"{"email": "a@b.c"}"#,
        );
        let params = HashMap::from([("id".to_string(), "9".to_string())]);
        let facets = RequestFacets::from_request(req, params, "/user/info/:id")
            .await
            .unwrap();

        assert_eq!(facets.sid, "sess-1");
        assert_eq!(facets.method, "POST");
        assert_eq!(facets.params["id"], json!("9"));
        assert_eq!(facets.query["select"], json!(["id"]));
        assert_eq!(facets.payload["email"], json!("a@b.c"));
        assert!(facets.body.contains("a@b.c"));
    }

    #[tokio::test]
    async fn test_facets_from_urlencoded_request() {
        let req = request(
            "POST",
            "/login",
            Some("application/x-www-form-urlencoded"),
            "user=ada&password=s3cret",
        );
        let facets = RequestFacets::from_request(req, HashMap::new(), "/login")
            .await
            .unwrap();
        assert_eq!(facets.form["user"], json!(["ada"]));
        assert_eq!(facets.form["password"], json!(["s3cret"]));
    }

    #[tokio::test]
    async fn test_facets_from_multipart_request() {
        let body = concat!(
            "--B\r\n",
            "Content-Disposition: form-data; name=\"avatar\"; filename=\"me.png\"\r\n",
            "Content-Type: image/png\r\n\r\n",
            "PNGDATA\r\n",
            "--B\r\n",
            "Content-Disposition: form-data; name=\"note\"\r\n\r\n",
            "hello\r\n",
            "--B--\r\n"
        );
        let req = request("POST", "/upload", Some("multipart/form-data; boundary=B"), body);
        let facets = RequestFacets::from_request(req, HashMap::new(), "/upload")
            .await
            .unwrap();

        assert_eq!(facets.form["note"], json!("hello"));
        let upload = facets.files.get("avatar").unwrap();
        assert_eq!(upload.name, "me.png");
        assert_eq!(upload.size, 7);
        assert_eq!(upload.content_type.as_deref(), Some("image/png"));
        let stored = tokio::fs::read_to_string(&upload.temp_path).await.unwrap();
        assert_eq!(stored, "PNGDATA");
        let _ = tokio::fs::remove_file(&upload.temp_path).await;
    }

    #[tokio::test]
    async fn test_extract_tokens() {
        let kernel = wicker_core::Kernel::new();
        let req = request(
            "POST",
            "/user/info/9?select=id,name&limit=3",
            Some("application/json"),
            r#"{"email": "a@b.c"}"#,
        );
        let params = HashMap::from([("id".to_string(), "9".to_string())]);
        let facets = RequestFacets::from_request(req, params, "/user/info/:id")
            .await
            .unwrap();

        let cases = [
            (":param.id", json!("9")),
            ("$query.select", json!("id,name")),
            ("$payload.email", json!("a@b.c")),
            (":fullpath", json!("/user/info/:id")),
            ("$query.missing", Value::Null),
        ];
        for (token, expected) in cases {
            let value = facets
                .extract(&InSpec::Token(token.to_string()), &kernel)
                .await
                .unwrap();
            assert_eq!(value, expected, "token {token}");
        }

        let context = facets
            .extract(&InSpec::Token(":context".to_string()), &kernel)
            .await
            .unwrap();
        assert_eq!(context["sid"], json!("sess-1"));
        assert_eq!(context["method"], json!("POST"));

        // Object-shaped specs supply defaults for missing facets.
        let with_default = facets
            .extract(
                &InSpec::Spec {
                    name: "$form.theme".to_string(),
                    default: Some(json!("dark")),
                },
                &kernel,
            )
            .await
            .unwrap();
        assert_eq!(with_default, json!("dark"));
    }

    #[tokio::test]
    async fn test_session_facet_reads_session_store() {
        use std::time::Duration;
        use wicker_core::{KVStore, StoreDefinition, StoreWidget};

        struct OneUser;

        #[async_trait::async_trait]
        impl KVStore for OneUser {
            async fn get(&self, key: &str) -> Option<Value> {
                (key == "sess-1").then(|| json!({"user_id": 7}))
            }
            async fn set(&self, _: &str, _: Value, _: Option<Duration>) {}
            async fn has(&self, key: &str) -> bool {
                key == "sess-1"
            }
            async fn del(&self, _: &str) {}
            async fn get_del(&self, _: &str) -> Option<Value> {
                None
            }
            async fn get_set(&self, _: &str, default: Value, _: Option<Duration>) -> Value {
                default
            }
            async fn len(&self) -> usize {
                1
            }
            async fn keys(&self) -> Vec<String> {
                vec!["sess-1".to_string()]
            }
            async fn clear(&self) {}
        }

        let kernel = wicker_core::Kernel::new();
        kernel.registry().register(std::sync::Arc::new(StoreWidget::new(
            "session",
            "inline",
            StoreDefinition::default(),
            std::sync::Arc::new(OneUser),
        )));

        let req = request("GET", "/me", None, "");
        let facets = RequestFacets::from_request(req, HashMap::new(), "/me")
            .await
            .unwrap();
        let user_id = facets
            .extract(&InSpec::Token("$session.user_id".to_string()), &kernel)
            .await
            .unwrap();
        assert_eq!(user_id, json!(7));

        let missing = facets
            .extract(&InSpec::Token("$session.role".to_string()), &kernel)
            .await
            .unwrap();
        assert_eq!(missing, Value::Null);
    }
}
