//! Loader integration tests: source resolution, format sniffing, env
//! substitution, validation, reload semantics.

use std::io::Write;

use serde_json::json;

use wicker_core::{ErrorKind, Widget, WidgetKind};
use wicker_runtime::Runtime;

fn expect_err<T>(result: Result<T, wicker_core::ProcessError>) -> wicker_core::ProcessError {
    match result {
        Err(e) => e,
        Ok(_) => panic!("expected an error result"),
    }
}

#[tokio::test]
async fn test_load_api_inline_json() {
    let runtime = Runtime::new();
    let widget = runtime
        .load(
            WidgetKind::Api,
            "user",
            r#"{
                "name": "user",
                "paths": [
                    {"path": "/info/:id", "method": "GET", "process": "models.user.find",
                     "in": [":param.id", ":query"], "out": {"status": 200}}
                ]
            }"#,
        )
        .await
        .unwrap();
    assert_eq!(widget.id(), "user");
    assert!(runtime.kernel().registry().contains(WidgetKind::Api, "user"));
}

#[tokio::test]
async fn test_load_flow_inline_yaml() {
    let runtime = Runtime::new();
    runtime
        .load(
            WidgetKind::Flow,
            "stat",
            "name: stat\nlabel: statistics\nnodes:\n  - name: users\n    process: utils.echo.args\n",
        )
        .await
        .unwrap();
    assert!(runtime.kernel().registry().contains(WidgetKind::Flow, "stat"));
}

#[tokio::test]
async fn test_load_from_file_derives_id() {
    let runtime = Runtime::new();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("orders.flow.json");
    let mut file = std::fs::File::create(&path).unwrap();
    write!(
        file,
        r#"{{"name": "orders", "nodes": [{{"name": "list", "process": "utils.echo.args"}}]}}"#
    )
    .unwrap();

    let widget = runtime
        .load_file(WidgetKind::Flow, path.to_str().unwrap())
        .await
        .unwrap();
    assert_eq!(widget.id(), "orders");
    assert!(widget.source().starts_with("file://"));
}

#[tokio::test]
async fn test_api_duplicate_paths_rejected() {
    let runtime = Runtime::new();
    let err = expect_err(
        runtime
            .load(
                WidgetKind::Api,
                "dup",
                r#"{
                "name": "dup",
                "paths": [
                    {"path": "/a", "method": "GET", "process": "flows.x"},
                    {"path": "/a", "method": "get", "process": "flows.y"}
                ]
            }"#,
            )
            .await,
    );
    assert_eq!(err.kind, ErrorKind::Load);
}

#[tokio::test]
async fn test_api_unknown_in_token_rejected() {
    let runtime = Runtime::new();
    let err = expect_err(
        runtime
            .load(
                WidgetKind::Api,
                "badtoken",
                r#"{
                "name": "badtoken",
                "paths": [
                    {"path": "/a", "method": "GET", "process": "flows.x", "in": [":cookie"]}
                ]
            }"#,
            )
            .await,
    );
    assert_eq!(err.kind, ErrorKind::Load);
    assert!(err.message.contains("cookie"));
}

#[tokio::test]
async fn test_store_env_substitution() {
    // SAFETY: tests in this binary run on separate vars.
    unsafe { std::env::set_var("WICKER_TEST_STORE_TOKEN", "sekrit") };
    let runtime = Runtime::new();
    runtime
        .load(
            WidgetKind::Store,
            "cache",
            r#"{"name": "cache", "type": "lru", "option": {"size": 32, "token": "$ENV.WICKER_TEST_STORE_TOKEN"}}"#,
        )
        .await
        .unwrap();

    let widget: std::sync::Arc<wicker_core::StoreWidget> = runtime
        .kernel()
        .registry()
        .select_as(WidgetKind::Store, "cache")
        .unwrap();
    assert_eq!(widget.definition.option["token"], json!("sekrit"));
    unsafe { std::env::remove_var("WICKER_TEST_STORE_TOKEN") };
}

#[tokio::test]
async fn test_store_unknown_type_rejected() {
    let runtime = Runtime::new();
    let err = expect_err(
        runtime
            .load(
                WidgetKind::Store,
                "r",
                r#"{"name": "r", "type": "redis"}"#,
            )
            .await,
    );
    assert_eq!(err.kind, ErrorKind::Load);
}

#[tokio::test]
async fn test_schedule_invalid_cron_rejected() {
    let runtime = Runtime::new();
    let err = expect_err(
        runtime
            .load(
                WidgetKind::Schedule,
                "tick",
                r#"{"name": "tick", "schedule": "whenever", "process": "flows.x"}"#,
            )
            .await,
    );
    assert_eq!(err.kind, ErrorKind::Load);
}

#[tokio::test]
async fn test_reload_keeps_previous_on_failure() {
    let runtime = Runtime::new();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stat.flow.json");
    std::fs::write(
        &path,
        r#"{"name": "stat", "nodes": [{"name": "a", "process": "utils.echo.args"}]}"#,
    )
    .unwrap();
    let source = format!("file://{}", path.display());

    runtime
        .load(WidgetKind::Flow, "stat", &source)
        .await
        .unwrap();

    // Corrupt the file; reload must fail and keep the loaded widget.
    std::fs::write(&path, "{not json").unwrap();
    let err = expect_err(runtime.reload(WidgetKind::Flow, "stat").await);
    assert_eq!(err.kind, ErrorKind::Load);
    assert!(runtime.kernel().registry().contains(WidgetKind::Flow, "stat"));
}

#[tokio::test]
async fn test_unload_is_noop_when_absent() {
    let runtime = Runtime::new();
    runtime.unload(WidgetKind::Flow, "ghost").await;
    runtime
        .load(
            WidgetKind::Flow,
            "f",
            r#"{"name": "f", "nodes": [{"name": "a", "process": "utils.echo.args"}]}"#,
        )
        .await
        .unwrap();
    runtime.unload(WidgetKind::Flow, "f").await;
    assert!(!runtime.kernel().registry().contains(WidgetKind::Flow, "f"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_flow_local_scripts_register() {
    let runtime = Runtime::new();
    runtime
        .load(
            WidgetKind::Flow,
            "report",
            r#"{
                "name": "report",
                "nodes": [{"name": "total", "script": "sum", "args": []}],
                "scripts": {"sum": "fn main(input, out, res, global) { 40 + 2 }"},
                "output": "{{ $res.total }}"
            }"#,
        )
        .await
        .unwrap();
    assert!(
        runtime
            .kernel()
            .registry()
            .contains(WidgetKind::Script, "flows.report.sum")
    );

    let result = runtime
        .kernel()
        .process("flows.report", vec![])
        .unwrap()
        .exec()
        .await
        .unwrap();
    assert_eq!(result, json!(42));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_load_script_source_directly() {
    let runtime = Runtime::new();
    runtime
        .load(WidgetKind::Script, "mathkit", "fn triple(x) { x * 3 }")
        .await
        .unwrap();
    let result = runtime
        .kernel()
        .process("scripts.mathkit.triple", vec![json!(5)])
        .unwrap()
        .exec()
        .await
        .unwrap();
    assert_eq!(result, json!(15));
}

#[tokio::test]
async fn test_task_and_crypt_load() {
    let runtime = Runtime::new();
    runtime
        .load(
            WidgetKind::Task,
            "import",
            r#"{"name": "import", "process": "flows.x", "workers": 2, "queueSize": 16}"#,
        )
        .await
        .unwrap();
    runtime
        .load(WidgetKind::Crypt, "pass", r#"{"name": "pass", "type": "hmac"}"#)
        .await
        .unwrap();
    assert!(runtime.kernel().registry().contains(WidgetKind::Task, "import"));
    assert!(runtime.kernel().registry().contains(WidgetKind::Crypt, "pass"));
}
