//! Built-in `models` and `stores` handler groups.
//!
//! Both are thin forwarders: `models.*` methods map onto the configured
//! [`QueryExecutor`](crate::query::QueryExecutor), `stores.*` methods onto
//! the named widget's [`KVStore`](crate::kv::KVStore) backend.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::error::{ProcessError, ProcessResult};
use crate::kernel::{HandlerGroup, Kernel, handler};
use crate::process::Process;
use crate::widget::{StoreWidget, WidgetKind};

pub(crate) const MODEL_METHODS: [&str; 21] = [
    "find",
    "get",
    "paginate",
    "count",
    "create",
    "update",
    "save",
    "delete",
    "destroy",
    "insert",
    "upsert",
    "updatewhere",
    "deletewhere",
    "destroywhere",
    "eachsave",
    "eachsaveafterdelete",
    "selectoption",
    "migrate",
    "takesnapshot",
    "restoresnapshot",
    "dropsnapshot",
];

pub(crate) const STORE_METHODS: [&str; 9] = [
    "get", "set", "has", "del", "getdel", "getset", "len", "keys", "clear",
];

pub(crate) fn install(kernel: &Arc<Kernel>) {
    let mut models = HandlerGroup::new();
    for method in MODEL_METHODS {
        models = models.with(method, handler(model_exec));
    }
    kernel.register_group("models", models);

    let mut stores = HandlerGroup::new();
    for method in STORE_METHODS {
        stores = stores.with(method, handler(store_exec));
    }
    kernel.register_group("stores", stores);
}

async fn model_exec(p: Process) -> ProcessResult<Value> {
    let executor = p.kernel().query_executor()?;
    let model = p.class().to_string();
    match p.method() {
        "find" => {
            let id = p.arg_value(0)?;
            let param = p.arg_query_param(1)?;
            executor.find(&model, &id, &param).await
        }
        "get" => {
            let param = p.arg_query_param(0)?;
            executor.get(&model, &param).await
        }
        "paginate" => {
            let param = p.arg_query_param(0)?;
            let page = p.arg_u64_or(1, 1)?;
            let pagesize = p.arg_u64_or(2, 15)?;
            executor.paginate(&model, &param, page, pagesize).await
        }
        "count" => {
            let param = p.arg_query_param(0)?;
            executor.count(&model, &param).await
        }
        "create" => {
            let row = p.arg_map(0)?;
            executor.create(&model, row).await
        }
        "update" => {
            let id = p.arg_value(0)?;
            let row = p.arg_map(1)?;
            executor.update(&model, &id, row).await
        }
        "save" => {
            let row = p.arg_map(0)?;
            executor.save(&model, row).await
        }
        "delete" => {
            let id = p.arg_value(0)?;
            executor.delete(&model, &id).await
        }
        "destroy" => {
            let id = p.arg_value(0)?;
            executor.destroy(&model, &id).await
        }
        "insert" => {
            let columns = p.arg_strings(0)?;
            let rows = p
                .arg_array(1)?
                .into_iter()
                .map(|row| match row {
                    Value::Array(cells) => Ok(cells),
                    other => Err(ProcessError::argument(format!(
                        "insert rows must be arrays, got {other}"
                    ))),
                })
                .collect::<ProcessResult<Vec<_>>>()?;
            executor.insert(&model, columns, rows).await
        }
        "upsert" => {
            let row = p.arg_map(0)?;
            let unique_by = p.arg_strings(1)?;
            let update_columns = p.arg_strings_or_default(2)?;
            executor.upsert(&model, row, unique_by, update_columns).await
        }
        "updatewhere" => {
            let param = p.arg_query_param(0)?;
            let row = p.arg_map(1)?;
            executor.update_where(&model, &param, row).await
        }
        "deletewhere" => {
            let param = p.arg_query_param(0)?;
            executor.delete_where(&model, &param).await
        }
        "destroywhere" => {
            let param = p.arg_query_param(0)?;
            executor.destroy_where(&model, &param).await
        }
        "eachsave" => {
            let rows = p.arg_records(0)?;
            let each = p.arg_map_opt(1)?;
            executor.each_save(&model, rows, each).await
        }
        "eachsaveafterdelete" => {
            let ids = p.arg_array(0)?;
            let rows = p.arg_records(1)?;
            let each = p.arg_map_opt(2)?;
            executor.each_save_after_delete(&model, ids, rows, each).await
        }
        "selectoption" => {
            let keyword = p.arg_string_or(0, "")?;
            let name_column = p.arg_string_or(1, "name")?;
            let value_column = p.arg_string_or(2, "id")?;
            executor
                .select_option(&model, &keyword, &name_column, &value_column)
                .await
        }
        "migrate" => {
            let force = p.arg_bool_or(0, false)?;
            executor.migrate(&model, force).await
        }
        "takesnapshot" => {
            let in_memory = p.arg_bool_or(0, false)?;
            executor.take_snapshot(&model, in_memory).await
        }
        "restoresnapshot" => {
            let name = p.arg_string(0)?;
            executor.restore_snapshot(&model, &name).await
        }
        "dropsnapshot" => {
            let name = p.arg_string(0)?;
            executor.drop_snapshot(&model, &name).await
        }
        other => Err(ProcessError::not_found(format!(
            "models has no method '{other}'"
        ))),
    }
}

async fn store_exec(p: Process) -> ProcessResult<Value> {
    let widget: Arc<StoreWidget> = p
        .kernel()
        .registry()
        .select_as(WidgetKind::Store, p.class())?;
    let store = Arc::clone(&widget.store);
    match p.method() {
        "get" => {
            let key = p.arg_string(0)?;
            Ok(store.get(&key).await.unwrap_or(Value::Null))
        }
        "set" => {
            let key = p.arg_string(0)?;
            let value = p.arg_value(1)?;
            let ttl = ttl_arg(&p, 2)?;
            store.set(&key, value, ttl).await;
            Ok(Value::Bool(true))
        }
        "has" => {
            let key = p.arg_string(0)?;
            Ok(Value::Bool(store.has(&key).await))
        }
        "del" => {
            let key = p.arg_string(0)?;
            store.del(&key).await;
            Ok(Value::Bool(true))
        }
        "getdel" => {
            let key = p.arg_string(0)?;
            Ok(store.get_del(&key).await.unwrap_or(Value::Null))
        }
        "getset" => {
            let key = p.arg_string(0)?;
            let default = p.arg_value(1)?;
            let ttl = ttl_arg(&p, 2)?;
            Ok(store.get_set(&key, default, ttl).await)
        }
        "len" => Ok(Value::from(store.len().await as u64)),
        "keys" => Ok(Value::Array(
            store.keys().await.into_iter().map(Value::from).collect(),
        )),
        "clear" => {
            store.clear().await;
            Ok(Value::Bool(true))
        }
        other => Err(ProcessError::not_found(format!(
            "stores has no method '{other}'"
        ))),
    }
}

/// Optional TTL argument, in seconds; 0 or absent means no expiry.
fn ttl_arg(p: &Process, index: usize) -> ProcessResult<Option<Duration>> {
    let secs = p.arg_u64_or(index, 0)?;
    Ok((secs > 0).then(|| Duration::from_secs(secs)))
}
