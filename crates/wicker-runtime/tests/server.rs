//! End-to-end server tests: HTTP dispatch into the kernel, guards, output
//! rendering, and the graceful-shutdown protocol.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;

use wicker_core::{
    ProcessError, ProcessResult, QueryExecutor, QueryParam, RequestContext, WidgetKind, handler,
};
use wicker_runtime::{Runtime, Server, ServerConfig};

/// Minimal model backend: one `user` table with one row.
struct UserTable;

#[async_trait]
impl QueryExecutor for UserTable {
    async fn find(&self, model: &str, id: &Value, param: &QueryParam) -> ProcessResult<Value> {
        if model != "user" {
            return Err(ProcessError::not_loaded(format!("model '{model}'")));
        }
        assert_eq!(param.select, vec!["id", "name"]);
        if id == &json!("1") || id == &json!(1) {
            Ok(json!({"id": 1, "name": "管理员"}))
        } else {
            Err(ProcessError::not_found(format!("user {id}")))
        }
    }

    async fn get(&self, _: &str, _: &QueryParam) -> ProcessResult<Value> {
        Ok(json!([{"id": 1}]))
    }

    async fn paginate(&self, _: &str, _: &QueryParam, page: u64, pagesize: u64) -> ProcessResult<Value> {
        Ok(json!({"page": page, "pagesize": pagesize, "data": []}))
    }

    async fn count(&self, _: &str, _: &QueryParam) -> ProcessResult<Value> {
        Ok(json!(1))
    }

    async fn create(&self, _: &str, _: Map<String, Value>) -> ProcessResult<Value> {
        Ok(json!(2))
    }

    async fn update(&self, _: &str, _: &Value, _: Map<String, Value>) -> ProcessResult<Value> {
        Ok(Value::Null)
    }

    async fn save(&self, _: &str, _: Map<String, Value>) -> ProcessResult<Value> {
        Ok(json!(1))
    }

    async fn delete(&self, _: &str, _: &Value) -> ProcessResult<Value> {
        Ok(Value::Null)
    }

    async fn destroy(&self, _: &str, _: &Value) -> ProcessResult<Value> {
        Ok(Value::Null)
    }

    async fn insert(&self, _: &str, _: Vec<String>, rows: Vec<Vec<Value>>) -> ProcessResult<Value> {
        Ok(json!(rows.len()))
    }

    async fn upsert(
        &self,
        _: &str,
        _: Map<String, Value>,
        _: Vec<String>,
        _: Vec<String>,
    ) -> ProcessResult<Value> {
        Ok(json!(1))
    }

    async fn update_where(&self, _: &str, _: &QueryParam, _: Map<String, Value>) -> ProcessResult<Value> {
        Ok(json!(0))
    }

    async fn delete_where(&self, _: &str, _: &QueryParam) -> ProcessResult<Value> {
        Ok(json!(0))
    }

    async fn destroy_where(&self, _: &str, _: &QueryParam) -> ProcessResult<Value> {
        Ok(json!(0))
    }

    async fn each_save(
        &self,
        _: &str,
        rows: Vec<Map<String, Value>>,
        _: Option<Map<String, Value>>,
    ) -> ProcessResult<Value> {
        Ok(json!(rows.len()))
    }

    async fn each_save_after_delete(
        &self,
        _: &str,
        _: Vec<Value>,
        rows: Vec<Map<String, Value>>,
        _: Option<Map<String, Value>>,
    ) -> ProcessResult<Value> {
        Ok(json!(rows.len()))
    }

    async fn select_option(&self, _: &str, _: &str, _: &str, _: &str) -> ProcessResult<Value> {
        Ok(json!([]))
    }

    async fn migrate(&self, _: &str, _: bool) -> ProcessResult<Value> {
        Ok(Value::Bool(true))
    }

    async fn take_snapshot(&self, _: &str, _: bool) -> ProcessResult<Value> {
        Ok(json!("snapshot"))
    }

    async fn restore_snapshot(&self, _: &str, _: &str) -> ProcessResult<Value> {
        Ok(Value::Bool(true))
    }

    async fn drop_snapshot(&self, _: &str, _: &str) -> ProcessResult<Value> {
        Ok(Value::Bool(true))
    }

    async fn query(&self, _: &str, _: &Value, _: &RequestContext) -> ProcessResult<Value> {
        Ok(Value::Null)
    }
}

fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        root: String::new(),
        grace: 1,
    }
}

async fn user_runtime() -> Arc<Runtime> {
    let runtime = Runtime::new();
    runtime.set_query_executor(Arc::new(UserTable));
    runtime
        .load(WidgetKind::Model, "user", r#"{"name": "user"}"#)
        .await
        .unwrap();
    runtime
        .load(
            WidgetKind::Api,
            "user",
            r#"{
                "name": "user",
                "paths": [
                    {"path": "/info/:id", "method": "GET", "process": "models.user.Find",
                     "in": [":param.id", ":query"], "out": {"status": 200}}
                ]
            }"#,
        )
        .await
        .unwrap();
    runtime
}

#[tokio::test(flavor = "multi_thread")]
async fn test_http_to_model_find() {
    let runtime = user_runtime().await;
    let bound = Server::new(runtime, test_config()).bind().await.unwrap();
    let addr = bound.addr();
    let shutdown = CancellationToken::new();
    let server = tokio::spawn(bound.serve(shutdown.clone(), || {}));

    let response = reqwest::get(format!("http://{addr}/user/info/1?select=id,name"))
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(
        response.headers()["content-type"]
            .to_str()
            .unwrap(),
        "application/json; charset=utf-8"
    );
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({"id": 1, "name": "管理员"}));

    shutdown.cancel();
    server.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_error_renders_code_and_message() {
    let runtime = user_runtime().await;
    let bound = Server::new(runtime, test_config()).bind().await.unwrap();
    let addr = bound.addr();
    let shutdown = CancellationToken::new();
    let server = tokio::spawn(bound.serve(shutdown.clone(), || {}));

    let response = reqwest::get(format!("http://{addr}/user/info/999?select=id,name"))
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], json!(404));
    assert!(body["message"].as_str().unwrap().contains("999"));

    shutdown.cancel();
    server.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_guard_process_rejects_request() {
    let runtime = user_runtime().await;
    runtime.kernel().register_handler(
        "auth.check.token",
        handler(|_p| async {
            Err::<Value, _>(ProcessError::not_found("unauthorized").with_code(401))
        }),
    );
    runtime
        .load(
            WidgetKind::Api,
            "locked",
            r#"{
                "name": "locked",
                "guard": "auth.check.token",
                "paths": [
                    {"path": "/secret", "method": "GET", "process": "models.user.count"}
                ]
            }"#,
        )
        .await
        .unwrap();

    let bound = Server::new(runtime, test_config()).bind().await.unwrap();
    let addr = bound.addr();
    let shutdown = CancellationToken::new();
    let server = tokio::spawn(bound.serve(shutdown.clone(), || {}));

    let response = reqwest::get(format!("http://{addr}/locked/secret")).await.unwrap();
    assert_eq!(response.status().as_u16(), 401);

    shutdown.cancel();
    server.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_flow_behind_http_with_header_template() {
    let runtime = Runtime::new();
    runtime.kernel().register_handler(
        "utils.echo.args",
        handler(|p: wicker_core::Process| async move { Ok(Value::Array(p.into_args())) }),
    );
    runtime
        .load(
            WidgetKind::Flow,
            "stat",
            r#"{
                "name": "stat",
                "nodes": [{"name": "users", "process": "utils.echo.args", "args": [{"limit": 2}]}],
                "output": {"users": "{{ $res.users }}", "kind": "report"}
            }"#,
        )
        .await
        .unwrap();
    runtime
        .load(
            WidgetKind::Api,
            "stat",
            r#"{
                "name": "stat",
                "paths": [
                    {"path": "/", "method": "GET", "process": "flows.stat",
                     "out": {"status": 200, "headers": {"x-kind": "{{ $res.kind }}"}}}
                ]
            }"#,
        )
        .await
        .unwrap();

    let bound = Server::new(runtime, test_config()).bind().await.unwrap();
    let addr = bound.addr();
    let shutdown = CancellationToken::new();
    let server = tokio::spawn(bound.serve(shutdown.clone(), || {}));

    let response = reqwest::get(format!("http://{addr}/stat")).await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(response.headers()["x-kind"].to_str().unwrap(), "report");
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["users"], json!([{"limit": 2}]));

    shutdown.cancel();
    server.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_graceful_shutdown_protocol() {
    let runtime = user_runtime().await;

    // A long-lived plugin subprocess that must be gone after shutdown.
    let plugin = wicker_plugin::load_plugin(
        runtime.kernel(),
        "lingering",
        "inline",
        wicker_plugin::PluginDefinition {
            name: "lingering".to_string(),
            cmd: r#"echo '{"wicker":1,"name":"lingering"}'; sleep 60"#.to_string(),
            shell: true,
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert!(!plugin.client.exited().await);

    let bound = Server::new(runtime, test_config()).bind().await.unwrap();
    let addr = bound.addr();
    let shutdown = CancellationToken::new();

    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let server = tokio::spawn(bound.serve(shutdown.clone(), move || {
        seen.fetch_add(1, Ordering::SeqCst);
    }));

    // The server answers while running.
    let response = reqwest::get(format!("http://{addr}/user/info/1?select=id,name"))
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    shutdown.cancel();
    server.await.unwrap().unwrap();

    // on_shutdown ran exactly once, the listener is gone, and the plugin
    // subprocess was killed within the grace window.
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(reqwest::get(format!("http://{addr}/user/info/1")).await.is_err());
    assert!(plugin.client.exited().await);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_bind_failure_surfaces() {
    let runtime = Runtime::new();
    let blocker = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = ServerConfig {
        host: "127.0.0.1".to_string(),
        port: blocker.local_addr().unwrap().port(),
        root: String::new(),
        grace: 1,
    };
    let err = match Server::new(runtime, config).bind().await {
        Err(e) => e,
        Ok(_) => panic!("expected bind to fail when the port is already in use"),
    };
    assert_eq!(err.kind, wicker_core::ErrorKind::Internal);
}
