//! Data-model collaborator interface.
//!
//! The SQL builder and schema migrator are external; the `models` handler
//! group and flow query nodes drive them through this trait. `model` is the
//! widget id of the model being operated on; row values are plain JSON
//! objects.
//!
//! Every method has a default body failing with `Internal`, so backends only
//! implement the operations they support.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::context::RequestContext;
use crate::error::{ProcessError, ProcessResult};
use crate::types::QueryParam;

fn unsupported<T>(op: &str) -> ProcessResult<T> {
    Err(ProcessError::internal(format!(
        "the query executor does not support '{op}'"
    )))
}

/// Executes model operations and query-DSL statements.
///
/// Implementations translate these calls into their storage engine;
/// validation failures surface as [`ErrorKind::Validation`] errors.
///
/// [`ErrorKind::Validation`]: crate::error::ErrorKind::Validation
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn find(&self, _model: &str, _id: &Value, _param: &QueryParam) -> ProcessResult<Value> {
        unsupported("find")
    }

    async fn get(&self, _model: &str, _param: &QueryParam) -> ProcessResult<Value> {
        unsupported("get")
    }

    async fn paginate(
        &self,
        _model: &str,
        _param: &QueryParam,
        _page: u64,
        _pagesize: u64,
    ) -> ProcessResult<Value> {
        unsupported("paginate")
    }

    async fn count(&self, _model: &str, _param: &QueryParam) -> ProcessResult<Value> {
        unsupported("count")
    }

    async fn create(&self, _model: &str, _row: Map<String, Value>) -> ProcessResult<Value> {
        unsupported("create")
    }

    async fn update(
        &self,
        _model: &str,
        _id: &Value,
        _row: Map<String, Value>,
    ) -> ProcessResult<Value> {
        unsupported("update")
    }

    async fn save(&self, _model: &str, _row: Map<String, Value>) -> ProcessResult<Value> {
        unsupported("save")
    }

    async fn delete(&self, _model: &str, _id: &Value) -> ProcessResult<Value> {
        unsupported("delete")
    }

    async fn destroy(&self, _model: &str, _id: &Value) -> ProcessResult<Value> {
        unsupported("destroy")
    }

    async fn insert(
        &self,
        _model: &str,
        _columns: Vec<String>,
        _rows: Vec<Vec<Value>>,
    ) -> ProcessResult<Value> {
        unsupported("insert")
    }

    async fn upsert(
        &self,
        _model: &str,
        _row: Map<String, Value>,
        _unique_by: Vec<String>,
        _update_columns: Vec<String>,
    ) -> ProcessResult<Value> {
        unsupported("upsert")
    }

    async fn update_where(
        &self,
        _model: &str,
        _param: &QueryParam,
        _row: Map<String, Value>,
    ) -> ProcessResult<Value> {
        unsupported("updatewhere")
    }

    async fn delete_where(&self, _model: &str, _param: &QueryParam) -> ProcessResult<Value> {
        unsupported("deletewhere")
    }

    async fn destroy_where(&self, _model: &str, _param: &QueryParam) -> ProcessResult<Value> {
        unsupported("destroywhere")
    }

    async fn each_save(
        &self,
        _model: &str,
        _rows: Vec<Map<String, Value>>,
        _each: Option<Map<String, Value>>,
    ) -> ProcessResult<Value> {
        unsupported("eachsave")
    }

    async fn each_save_after_delete(
        &self,
        _model: &str,
        _ids: Vec<Value>,
        _rows: Vec<Map<String, Value>>,
        _each: Option<Map<String, Value>>,
    ) -> ProcessResult<Value> {
        unsupported("eachsaveafterdelete")
    }

    async fn select_option(
        &self,
        _model: &str,
        _keyword: &str,
        _name_column: &str,
        _value_column: &str,
    ) -> ProcessResult<Value> {
        unsupported("selectoption")
    }

    async fn migrate(&self, _model: &str, _force: bool) -> ProcessResult<Value> {
        unsupported("migrate")
    }

    async fn take_snapshot(&self, _model: &str, _in_memory: bool) -> ProcessResult<Value> {
        unsupported("takesnapshot")
    }

    async fn restore_snapshot(&self, _model: &str, _name: &str) -> ProcessResult<Value> {
        unsupported("restoresnapshot")
    }

    async fn drop_snapshot(&self, _model: &str, _name: &str) -> ProcessResult<Value> {
        unsupported("dropsnapshot")
    }

    /// Runs a query-DSL statement on the named engine (flow query nodes).
    async fn query(
        &self,
        _engine: &str,
        _dsl: &Value,
        _ctx: &RequestContext,
    ) -> ProcessResult<Value> {
        unsupported("query")
    }
}

/// Shared handle to the configured executor.
pub type SharedQueryExecutor = Arc<dyn QueryExecutor>;
