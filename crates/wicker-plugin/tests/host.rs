//! Plugin host integration tests against the reference echo plugin.

use serde_json::json;

use wicker_core::{ErrorKind, Kernel};
use wicker_plugin::{PluginDefinition, PluginState, load_plugin, select_plugin};

fn echo_definition() -> PluginDefinition {
    PluginDefinition {
        name: "user".to_string(),
        cmd: env!("CARGO_BIN_EXE_wicker-echo-plugin").to_string(),
        ..Default::default()
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_exec_round_trip() {
    let kernel = Kernel::new();
    wicker_plugin::install(&kernel);
    load_plugin(&kernel, "user", "inline", echo_definition())
        .await
        .unwrap();

    let result = kernel
        .process("plugins.user.Login", vec![json!(1)])
        .unwrap()
        .exec()
        .await
        .unwrap();
    assert_eq!(result, json!({"name": "login", "args": [1]}));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_relaunch_after_kill() {
    let kernel = Kernel::new();
    wicker_plugin::install(&kernel);
    let plugin = load_plugin(&kernel, "user", "inline", echo_definition())
        .await
        .unwrap();

    plugin.client.kill().await;
    assert!(plugin.client.exited().await);

    // Select must transparently relaunch before returning.
    let selected = select_plugin(&kernel, "user").await.unwrap();
    assert_eq!(selected.client.state().await, PluginState::Running);

    let result = selected.exec("Login", &[json!(1)]).await.unwrap();
    assert_eq!(result, json!({"name": "login", "args": [1]}));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unknown_plugin_is_not_loaded() {
    let kernel = Kernel::new();
    wicker_plugin::install(&kernel);
    let err = select_plugin(&kernel, "ghost").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotLoaded);

    // Process construction fails the same way.
    let err = kernel.process("plugins.ghost.run", vec![]).unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotLoaded);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_load_replaces_previous_process() {
    let kernel = Kernel::new();
    let first = load_plugin(&kernel, "user", "inline", echo_definition())
        .await
        .unwrap();
    let second = load_plugin(&kernel, "user", "inline", echo_definition())
        .await
        .unwrap();

    assert!(first.client.exited().await);
    assert_eq!(second.client.state().await, PluginState::Running);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shell_opt_in() {
    let kernel = Kernel::new();
    let definition = PluginDefinition {
        name: "shelled".to_string(),
        cmd: format!("exec {}", env!("CARGO_BIN_EXE_wicker-echo-plugin")),
        shell: true,
        ..Default::default()
    };
    let plugin = load_plugin(&kernel, "shelled", "inline", definition)
        .await
        .unwrap();
    let result = plugin.exec("Ping", &[]).await.unwrap();
    assert_eq!(result, json!({"name": "ping", "args": []}));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_call_timeout_forces_relaunch() {
    let kernel = Kernel::new();
    // Hand-shakes, then never answers; the 1-second call timeout must fire
    // and the stream is torn down so the next call relaunches.
    let definition = PluginDefinition {
        name: "stall".to_string(),
        cmd: r#"echo '{"wicker":1,"name":"stall"}'; sleep 60"#.to_string(),
        shell: true,
        timeout: 1,
        ..Default::default()
    };
    let plugin = load_plugin(&kernel, "stall", "inline", definition)
        .await
        .unwrap();

    let err = plugin.exec("Ping", &[]).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Timeout);
    assert!(plugin.client.exited().await);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_handshake_failure_rejected() {
    let kernel = Kernel::new();
    let definition = PluginDefinition {
        name: "mute".to_string(),
        cmd: "echo not-a-handshake".to_string(),
        shell: true,
        ..Default::default()
    };
    let err = load_plugin(&kernel, "mute", "inline", definition)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::PluginRpc);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_kill_all() {
    let kernel = Kernel::new();
    let a = load_plugin(&kernel, "a", "inline", echo_definition())
        .await
        .unwrap();
    let b = load_plugin(&kernel, "b", "inline", echo_definition())
        .await
        .unwrap();

    wicker_plugin::kill_all(&kernel).await;
    assert!(a.client.exited().await);
    assert!(b.client.exited().await);
}
