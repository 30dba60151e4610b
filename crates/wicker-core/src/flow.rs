//! The flow engine.
//!
//! A flow is an ordered list of nodes orchestrating processes, query-DSL
//! statements, and script functions. Nodes run strictly sequentially; each
//! node's result is stored under its name in `$res` and is visible to every
//! subsequent node's template bindings. Any node failure aborts the flow and
//! surfaces the error unchanged.

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::binding::BindScope;
use crate::context::RequestContext;
use crate::error::{ProcessError, ProcessResult};
use crate::kernel::{HandlerGroup, Kernel, handler};
use crate::process::Process;
use crate::widget::{FlowNode, FlowWidget, Widget, WidgetKind};

pub(crate) fn install(kernel: &Arc<Kernel>) {
    kernel.register_group("flows", HandlerGroup::new().with_wildcard(handler(flow_exec)));
}

/// The `flows.<name>` handler: select the flow widget and execute it.
async fn flow_exec(p: Process) -> ProcessResult<Value> {
    let flow_id = match (p.class().is_empty(), p.method().is_empty()) {
        (false, true) => p.class().to_string(),
        (true, false) => p.method().to_string(),
        (false, false) => format!("{}.{}", p.class(), p.method()),
        (true, true) => return Err(ProcessError::bad_name("flow name is empty")),
    };
    let kernel = Arc::clone(p.kernel());
    let widget: Arc<FlowWidget> = kernel.registry().select_as(WidgetKind::Flow, &flow_id)?;
    let context = p.context().clone();
    let cancel = p.cancel_token().clone();
    execute(&kernel, &widget, p.into_args(), context, cancel).await
}

/// Executes a flow with the given inputs and inherited request context.
pub async fn execute(
    kernel: &Arc<Kernel>,
    flow: &FlowWidget,
    args: Vec<Value>,
    context: RequestContext,
    cancel: CancellationToken,
) -> ProcessResult<Value> {
    let flow_id = flow.id().to_lowercase();
    let input = Value::Array(args);
    let mut results = Map::new();

    for node in &flow.definition.nodes {
        if cancel.is_cancelled() {
            return Err(ProcessError::cancelled(format!(
                "flow '{flow_id}' cancelled at node '{}'",
                node.name
            )));
        }
        guard_self_call(&flow_id, node)?;
        let response = run_node(kernel, flow, node, &input, &results, &context, &cancel).await?;
        results.insert(node.name.clone(), response);
    }

    let scope = flow_scope(&input, &results, &context);
    match &flow.definition.output {
        Some(template) => Ok(kernel.bind(template, &scope)),
        None => Ok(Value::Object(results)),
    }
}

/// A node may not re-enter its own flow.
fn guard_self_call(flow_id: &str, node: &FlowNode) -> ProcessResult<()> {
    let Some(process) = node.process.as_deref() else {
        return Ok(());
    };
    let lower = process.to_lowercase();
    let Some(rest) = lower.strip_prefix("flows.") else {
        return Ok(());
    };
    if rest == flow_id || rest.starts_with(&format!("{flow_id}.")) {
        return Err(ProcessError::flow_self_call(format!(
            "flow '{flow_id}' node '{}' calls back into its own flow",
            node.name
        )));
    }
    Ok(())
}

fn flow_scope(input: &Value, results: &Map<String, Value>, context: &RequestContext) -> BindScope {
    let mut scope = BindScope::new();
    scope.set("$in", input.clone());
    scope.set("$res", Value::Object(results.clone()));
    scope.set("$global", context.global_value());
    scope.set("$sid", Value::from(context.sid()));
    // The first input spreads as `$key` slots when it is an object.
    if let Some(Value::Object(first)) = input.as_array().and_then(|items| items.first()) {
        scope.spread(first);
    }
    scope
}

#[allow(clippy::too_many_arguments)]
async fn run_node(
    kernel: &Arc<Kernel>,
    flow: &FlowWidget,
    node: &FlowNode,
    input: &Value,
    results: &Map<String, Value>,
    context: &RequestContext,
    cancel: &CancellationToken,
) -> ProcessResult<Value> {
    let scope = flow_scope(input, results, context);
    let bound_args: Vec<Value> = node.args.iter().map(|arg| kernel.bind(arg, &scope)).collect();

    // Query beats process when both are present; the script always runs last
    // and sees the earlier response.
    let mut response = Value::Null;
    if let (Some(engine), Some(query)) = (&node.engine, &node.query) {
        let dsl = kernel.bind(query, &scope);
        response = kernel.query_executor()?.query(engine, &dsl, context).await?;
    } else if let Some(process) = &node.process {
        debug!(flow = %flow.id(), node = %node.name, process = %process, "Flow node");
        response = kernel
            .process(process, bound_args.clone())?
            .with_context(context.clone())
            .with_cancel(cancel.clone())
            .exec()
            .await?;
    }

    if let Some(alias) = &node.script {
        let script_process = script_process_name(kernel, flow, alias);
        let script_args = vec![
            input.clone(),
            response.clone(),
            Value::Object(results.clone()),
            context.global_value(),
        ];
        response = kernel
            .process(&script_process, script_args)?
            .with_context(context.clone())
            .with_cancel(cancel.clone())
            .exec()
            .await?;
    }

    if node.outs.is_empty() {
        return Ok(response);
    }

    // Shape the stored result through the `outs` templates; `$out` is the
    // raw node response.
    let mut out_scope = flow_scope(input, results, context);
    out_scope.set("$out", response);
    let outs = node
        .outs
        .iter()
        .map(|out| kernel.bind(out, &out_scope))
        .collect();
    Ok(Value::Array(outs))
}

/// A node script is either a globally loaded script of that name or a
/// flow-local script registered as `flows.<flow>.<alias>`.
fn script_process_name(kernel: &Arc<Kernel>, flow: &FlowWidget, alias: &str) -> String {
    if kernel.registry().contains(WidgetKind::Script, alias) {
        format!("scripts.{alias}.main")
    } else {
        format!("scripts.flows.{}.{alias}.main", flow.id().to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::kernel::handler;
    use crate::widget::FlowDefinition;
    use serde_json::json;

    fn flow_widget(id: &str, definition: Value) -> Arc<FlowWidget> {
        let definition: FlowDefinition = serde_json::from_value(definition).unwrap();
        Arc::new(FlowWidget::new(id, "inline", definition))
    }

    fn kernel() -> Arc<Kernel> {
        let kernel = Kernel::new();
        kernel.register_handler(
            "utils.echo.args",
            handler(|p: Process| async move { Ok(Value::Array(p.into_args())) }),
        );
        kernel.register_handler("utils.now.stamp", handler(|_p| async {
            Ok(json!("2026-08-01T09:00:00Z"))
        }));
        kernel
    }

    #[tokio::test]
    async fn test_two_node_chain_with_output() {
        let kernel = kernel();
        let widget = flow_widget(
            "stat",
            json!({
                "name": "stat",
                "nodes": [
                    {"name": "users", "process": "utils.echo.args", "args": [{"limit": 2}]},
                    {"name": "t", "process": "utils.now.stamp"}
                ],
                "output": {"users": "{{ $res.users }}", "at": "{{ $res.t }}"}
            }),
        );
        kernel.registry().register(widget.clone());

        let result = execute(
            &kernel,
            &widget,
            vec![],
            RequestContext::new(),
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(result["users"], json!([{"limit": 2}]));
        assert_eq!(result["at"], json!("2026-08-01T09:00:00Z"));
    }

    #[tokio::test]
    async fn test_without_output_returns_res_map() {
        let kernel = kernel();
        let widget = flow_widget(
            "raw",
            json!({
                "name": "raw",
                "nodes": [{"name": "a", "process": "utils.now.stamp"}]
            }),
        );
        let result = execute(
            &kernel,
            &widget,
            vec![],
            RequestContext::new(),
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(result, json!({"a": "2026-08-01T09:00:00Z"}));
    }

    #[tokio::test]
    async fn test_self_call_guard() {
        let kernel = kernel();
        let widget = flow_widget(
            "loop",
            json!({
                "name": "loop",
                "nodes": [{"name": "again", "process": "flows.loop"}]
            }),
        );
        kernel.registry().register(widget.clone());

        let err = execute(
            &kernel,
            &widget,
            vec![],
            RequestContext::new(),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::FlowSelfCall);
        assert_eq!(err.code, 400);
    }

    #[tokio::test]
    async fn test_self_call_guard_ignores_prefix_named_flows() {
        let kernel = kernel();
        let other = flow_widget(
            "loopback",
            json!({"name": "loopback", "nodes": [{"name": "a", "process": "utils.now.stamp"}]}),
        );
        kernel.registry().register(other);
        let widget = flow_widget(
            "loop",
            json!({
                "name": "loop",
                "nodes": [{"name": "a", "process": "flows.loopback"}]
            }),
        );
        kernel.registry().register(widget.clone());

        // `flows.loopback` is a different flow; the guard must not fire.
        let result = execute(
            &kernel,
            &widget,
            vec![],
            RequestContext::new(),
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(result["a"], json!("2026-08-01T09:00:00Z"));
    }

    #[tokio::test]
    async fn test_node_args_bind_from_in_and_res() {
        let kernel = kernel();
        let widget = flow_widget(
            "bindings",
            json!({
                "name": "bindings",
                "nodes": [
                    {"name": "first", "process": "utils.echo.args", "args": ["{{ $in.0 }}"]},
                    {"name": "second", "process": "utils.echo.args", "args": ["{{ $res.first.0 }}", "{{ $limit }}"]}
                ],
                "output": "{{ $res.second }}"
            }),
        );
        let result = execute(
            &kernel,
            &widget,
            vec![json!({"limit": 7})],
            RequestContext::new(),
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(result, json!([{"limit": 7}, 7]));
    }

    #[tokio::test]
    async fn test_outs_shape_node_result() {
        let kernel = kernel();
        let widget = flow_widget(
            "shaped",
            json!({
                "name": "shaped",
                "nodes": [
                    {
                        "name": "a",
                        "process": "utils.echo.args",
                        "args": [1, 2],
                        "outs": ["{{ $out.1 }}", "{{ $out.0 }}"]
                    }
                ]
            }),
        );
        let result = execute(
            &kernel,
            &widget,
            vec![],
            RequestContext::new(),
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(result, json!({"a": [2, 1]}));
    }

    #[tokio::test]
    async fn test_node_failure_aborts_flow() {
        let kernel = kernel();
        let widget = flow_widget(
            "failing",
            json!({
                "name": "failing",
                "nodes": [
                    {"name": "boom", "process": "utils.not.registered"},
                    {"name": "never", "process": "utils.now.stamp"}
                ]
            }),
        );
        let err = execute(
            &kernel,
            &widget,
            vec![],
            RequestContext::new(),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::HandlerNotFound);
    }

    #[tokio::test]
    async fn test_flow_invoked_through_kernel() {
        let kernel = kernel();
        let widget = flow_widget(
            "viaproc",
            json!({
                "name": "viaproc",
                "nodes": [{"name": "a", "process": "utils.echo.args", "args": ["{{ $in.0 }}"]}],
                "output": "{{ $res.a.0 }}"
            }),
        );
        kernel.registry().register(widget);
        let result = kernel
            .process("flows.viaproc", vec![json!(41)])
            .unwrap()
            .exec()
            .await
            .unwrap();
        assert_eq!(result, json!(41));
    }

    #[tokio::test]
    async fn test_query_node_uses_executor() {
        use crate::query::QueryExecutor;
        use async_trait::async_trait;

        struct RecordingEngine;

        #[async_trait]
        impl QueryExecutor for RecordingEngine {
            async fn query(
                &self,
                engine: &str,
                dsl: &Value,
                _ctx: &RequestContext,
            ) -> crate::error::ProcessResult<Value> {
                assert_eq!(engine, "query-test");
                Ok(json!({"dsl": dsl}))
            }
        }

        let kernel = kernel();
        kernel.set_query_executor(Arc::new(RecordingEngine));
        let widget = flow_widget(
            "lookup",
            json!({
                "name": "lookup",
                "nodes": [
                    {
                        "name": "rows",
                        "engine": "query-test",
                        "query": {"select": ["id"], "limit": "{{ $in.0 }}"}
                    }
                ],
                "output": "{{ $res.rows.dsl.limit }}"
            }),
        );
        let result = execute(
            &kernel,
            &widget,
            vec![json!(3)],
            RequestContext::new(),
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(result, json!(3));
    }

    #[tokio::test]
    async fn test_sid_adoption_between_nodes() {
        let kernel = kernel();
        kernel.register_handler(
            "session.start.new",
            handler(|p: Process| async move {
                p.context().adopt_sid("sess-42");
                Ok(json!("started"))
            }),
        );
        kernel.register_handler(
            "session.read.sid",
            handler(|p: Process| async move { Ok(json!(p.context().sid())) }),
        );
        let widget = flow_widget(
            "login",
            json!({
                "name": "login",
                "nodes": [
                    {"name": "start", "process": "session.start.new"},
                    {"name": "sid", "process": "session.read.sid"}
                ],
                "output": "{{ $res.sid }}"
            }),
        );
        let result = execute(
            &kernel,
            &widget,
            vec![],
            RequestContext::new(),
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(result, json!("sess-42"));
    }
}
