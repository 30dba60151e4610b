//! Mounting API widgets onto an axum router.
//!
//! Every loaded API widget contributes its paths under
//! `<root>/<group><path>`. Per path an input-extractor closure is built from
//! the declarative `in` list, the configured process runs with the extracted
//! arguments, and the response is rendered per the `out` spec. Guards resolve
//! against a registered middleware table first; an unknown guard name is
//! treated as a process to invoke before the handler.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, Request};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{MethodRouter, any, delete, get, head, options, patch, post, put};
use futures::future::BoxFuture;
use serde_json::{Value, json};
use tracing::{debug, info};

use wicker_core::{BindScope, Kernel, ProcessError, ProcessResult, RequestContext, WidgetKind};

use crate::api::{ApiWidget, OutSpec, PathSpec};
use crate::http::extract::RequestFacets;

/// A registered guard middleware.
pub type GuardFn = Arc<dyn Fn(GuardContext) -> BoxFuture<'static, ProcessResult<()>> + Send + Sync>;

/// What a guard gets to look at.
#[derive(Debug, Clone)]
pub struct GuardContext {
    pub sid: String,
    pub method: String,
    pub path: String,
}

/// Mount configuration.
#[derive(Clone, Default)]
pub struct MountOptions {
    /// Server-wide path prefix (`server.root`).
    pub root: String,
    /// Named guard middlewares; unknown guard names fall back to processes.
    pub guards: HashMap<String, GuardFn>,
}

/// Mounts every loaded API widget's paths onto `router`.
///
/// Fails with a [`Load`](wicker_core::ErrorKind::Load) error when two paths
/// share the same `(method, path)` pair.
pub fn mount(
    mut router: Router,
    kernel: &Arc<Kernel>,
    options: &MountOptions,
) -> ProcessResult<Router> {
    let options = Arc::new(options.clone());
    let mut seen: HashSet<(String, String)> = HashSet::new();

    for widget in kernel.registry().widgets(WidgetKind::Api) {
        let Ok(api) = widget.as_any().downcast::<ApiWidget>() else {
            continue;
        };
        for (index, spec) in api.definition.paths.iter().enumerate() {
            let full_path = join_paths(&options.root, &api.definition.group, &spec.path);
            let method = spec.method.to_uppercase();
            if !seen.insert((method.clone(), full_path.clone())) {
                return Err(ProcessError::load(format!(
                    "duplicate route {method} {full_path}"
                )));
            }
            let route = axum_path(&full_path);
            info!(method = %method, path = %full_path, process = %spec.process, "Mounting route");
            router = router.route(
                &route,
                method_router(&method, handler_for(kernel, &api, index, &options))?,
            );
        }
    }
    Ok(router)
}

/// Builds the request handler for one path spec.
fn handler_for(
    kernel: &Arc<Kernel>,
    api: &Arc<ApiWidget>,
    path_index: usize,
    options: &Arc<MountOptions>,
) -> impl Fn(Path<HashMap<String, String>>, Request) -> BoxFuture<'static, Response>
+ Clone
+ Send
+ Sync
+ 'static {
    let kernel = Arc::clone(kernel);
    let api = Arc::clone(api);
    let options = Arc::clone(options);
    move |Path(params): Path<HashMap<String, String>>, request: Request| {
        let kernel = Arc::clone(&kernel);
        let api = Arc::clone(&api);
        let options = Arc::clone(&options);
        Box::pin(async move {
            let spec = &api.definition.paths[path_index];
            match handle(&kernel, &api, spec, &options, params, request).await {
                Ok(response) => response,
                Err(err) => error_response(&err),
            }
        })
    }
}

async fn handle(
    kernel: &Arc<Kernel>,
    api: &Arc<ApiWidget>,
    spec: &PathSpec,
    options: &MountOptions,
    params: HashMap<String, String>,
    request: Request,
) -> ProcessResult<Response> {
    let facets = RequestFacets::from_request(request, params, &spec.path).await?;

    for guard in [&api.definition.guard, &spec.guard].into_iter().flatten() {
        run_guard(kernel, options, guard, &facets).await?;
    }

    let mut args = Vec::with_capacity(spec.input.len());
    for input in &spec.input {
        args.push(facets.extract(input, kernel).await?);
    }

    debug!(process = %spec.process, sid = %facets.sid, "HTTP request dispatch");
    let context = RequestContext::with_sid(facets.sid.clone());
    let result = kernel
        .process(&spec.process, args)?
        .with_context(context)
        .exec()
        .await?;
    Ok(render(kernel, &spec.out, result))
}

/// Resolves and runs one guard: middleware table first, process fallback.
async fn run_guard(
    kernel: &Arc<Kernel>,
    options: &MountOptions,
    guard: &str,
    facets: &RequestFacets,
) -> ProcessResult<()> {
    let ctx = GuardContext {
        sid: facets.sid.clone(),
        method: facets.method.clone(),
        path: facets.fullpath.clone(),
    };
    if let Some(middleware) = options.guards.get(guard) {
        return middleware(ctx).await;
    }
    let args = vec![json!({ "sid": ctx.sid, "method": ctx.method, "path": ctx.path })];
    kernel
        .process(guard, args)?
        .with_context(RequestContext::with_sid(facets.sid.clone()))
        .exec()
        .await
        .map(|_| ())
}

/// Renders the process result per the `out` spec.
fn render(kernel: &Arc<Kernel>, out: &OutSpec, result: Value) -> Response {
    let status = StatusCode::from_u16(out.status).unwrap_or(StatusCode::OK);
    let (body, inferred_type) = match &result {
        Value::Null => (String::new(), "text/plain; charset=utf-8"),
        Value::String(text) => (text.clone(), "text/plain; charset=utf-8"),
        other => (
            serde_json::to_string(other).unwrap_or_default(),
            "application/json; charset=utf-8",
        ),
    };
    let content_type = out.content_type.clone().unwrap_or_else(|| inferred_type.to_string());

    let mut response = (status, body).into_response();
    if let Ok(value) = HeaderValue::from_str(&content_type) {
        response
            .headers_mut()
            .insert(axum::http::header::CONTENT_TYPE, value);
    }

    // Extra headers are templates bindable from the response body.
    if let Some(templates) = &out.headers {
        let mut scope = BindScope::new();
        scope.set("$res", result.clone());
        if let Value::Object(map) = &result {
            scope.spread(map);
        }
        for (name, template) in templates {
            let bound = kernel.bind(template, &scope);
            let text = match bound {
                Value::String(text) => text,
                Value::Null => continue,
                other => other.to_string(),
            };
            if let (Ok(name), Ok(value)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::from_str(&text),
            ) {
                response.headers_mut().insert(name, value);
            }
        }
    }
    response
}

/// Converts a kernel error into the wire shape `{code, message}` with the
/// HTTP status taken from the error code.
pub fn error_response(err: &ProcessError) -> Response {
    let status = StatusCode::from_u16(err.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, axum::Json(err.to_response_value())).into_response()
}

fn method_router<H, T>(method: &str, handler: H) -> ProcessResult<MethodRouter>
where
    H: axum::handler::Handler<T, ()>,
    T: 'static,
{
    Ok(match method {
        "GET" => get(handler),
        "POST" => post(handler),
        "PUT" => put(handler),
        "PATCH" => patch(handler),
        "DELETE" => delete(handler),
        "HEAD" => head(handler),
        "OPTIONS" => options(handler),
        "ANY" => any(handler),
        other => {
            return Err(ProcessError::load(format!(
                "unsupported HTTP method '{other}'"
            )));
        }
    })
}

/// Joins root, group, and path into one normalized route.
fn join_paths(root: &str, group: &str, path: &str) -> String {
    let mut full = String::new();
    for part in [root, group, path] {
        let part = part.trim_matches('/');
        if !part.is_empty() {
            full.push('/');
            full.push_str(part);
        }
    }
    if full.is_empty() {
        full.push('/');
    }
    full
}

/// Translates `:param` path segments into axum's `{param}` captures.
fn axum_path(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if let Some(name) = segment.strip_prefix(':') {
                format!("{{{name}}}")
            } else {
                segment.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}
