//! `sql.query` block executor backed by SQLite.
//!
//! The connection work is blocking, so each attempt runs on the blocking
//! pool rather than the actor dispatch threads.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde_json::{Map, Value};

use crate::core::{
    BlockContext, BlockMetrics, ResourceClass, ResultMetadata, StepRequest, StepResult,
};
use crate::error::ErrorCode;
use crate::executors::base::{require_inputs, ExecutionStats};
use crate::executors::BlockExecutor;

pub struct SqlQueryExecutor {
    stats: ExecutionStats,
}

#[derive(Debug)]
enum QueryOutcome {
    Rows { rows: Vec<Value>, count: usize },
    Statement { affected_rows: usize },
}

impl SqlQueryExecutor {
    pub fn new() -> Self {
        SqlQueryExecutor {
            stats: ExecutionStats::new(),
        }
    }

    fn run_query(connection: &str, query: &str) -> Result<QueryOutcome, rusqlite::Error> {
        let conn = if connection == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(connection)?
        };

        let mut stmt = conn.prepare(query)?;
        if stmt.column_count() == 0 {
            drop(stmt);
            let affected_rows = conn.execute(query, [])?;
            return Ok(QueryOutcome::Statement { affected_rows });
        }

        let column_names: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect();
        let mut rows = stmt.query([])?;
        let mut collected = Vec::new();
        while let Some(row) = rows.next()? {
            let mut object = Map::new();
            for (index, name) in column_names.iter().enumerate() {
                let rendered = match row.get_ref(index)? {
                    ValueRef::Null => String::new(),
                    ValueRef::Integer(i) => i.to_string(),
                    ValueRef::Real(f) => f.to_string(),
                    ValueRef::Text(t) => String::from_utf8_lossy(t).to_string(),
                    ValueRef::Blob(b) => format!("<{} bytes>", b.len()),
                };
                object.insert(name.clone(), Value::String(rendered));
            }
            collected.push(Value::Object(object));
        }
        let count = collected.len();
        Ok(QueryOutcome::Rows {
            rows: collected,
            count,
        })
    }
}

impl Default for SqlQueryExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlockExecutor for SqlQueryExecutor {
    fn block_type(&self) -> &str {
        "sql.query"
    }

    fn resource_class(&self) -> ResourceClass {
        ResourceClass::Cpu
    }

    async fn execute(&self, req: &StepRequest, ctx: &BlockContext) -> StepResult {
        let start = Instant::now();
        let metadata = ResultMetadata::from_context(ctx);

        if let Err(result) = require_inputs(req, &metadata, &["query"]) {
            self.stats.record_error(0);
            return result;
        }

        // Parameter binding is undefined on this contract; refuse rather
        // than silently run an unbound query.
        if req.inputs.contains_key("params") {
            self.stats.record_error(0);
            return StepResult::error(
                ErrorCode::InvalidInput,
                "Query parameters are not supported",
                metadata,
                0,
            );
        }

        let query = req.input_or("query", "").to_string();
        let connection = req.input_or("connection", ":memory:").to_string();
        let deadline = Duration::from_millis(req.timeout_ms.max(0) as u64);

        let handle =
            tokio::task::spawn_blocking(move || Self::run_query(&connection, &query));
        let outcome = tokio::time::timeout(deadline, handle).await;
        let latency_ms = start.elapsed().as_millis() as i64;

        match outcome {
            Err(_) => {
                self.stats.record_error(latency_ms);
                let mut result = StepResult::timeout(metadata, latency_ms);
                result.error_message =
                    format!("SQL query exceeded {}ms deadline", deadline.as_millis());
                result
            }
            Ok(Err(join_error)) => {
                self.stats.record_error(latency_ms);
                StepResult::error(
                    ErrorCode::InternalError,
                    format!("SQL worker task failed: {join_error}"),
                    metadata,
                    latency_ms,
                )
            }
            Ok(Ok(Err(e))) => {
                self.stats.record_error(latency_ms);
                StepResult::error(
                    ErrorCode::ExecutionFailed,
                    format!("SQL query execution failed: {e}"),
                    metadata,
                    latency_ms,
                )
            }
            Ok(Ok(Ok(outcome))) => {
                let mut outputs = HashMap::new();
                match outcome {
                    QueryOutcome::Rows { rows, count } => {
                        outputs.insert(
                            "rows".into(),
                            serde_json::to_string(&rows).unwrap_or_else(|_| "[]".into()),
                        );
                        outputs.insert("row_count".into(), count.to_string());
                    }
                    QueryOutcome::Statement { affected_rows } => {
                        outputs.insert("affected_rows".into(), affected_rows.to_string());
                    }
                }
                self.stats.record_success(latency_ms, 0, 0);
                StepResult::success(metadata, outputs, latency_ms)
            }
        }
    }

    fn metrics(&self) -> BlockMetrics {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StepStatus;

    fn request(query: &str) -> StepRequest {
        let mut req = StepRequest::new("sql.query", BlockContext::default());
        req.inputs.insert("query".into(), query.into());
        req
    }

    #[tokio::test]
    async fn test_select_returns_rows() {
        let executor = SqlQueryExecutor::new();
        let req = request("SELECT 1 AS id, 'alpha' AS name");
        let result = executor.execute(&req, &req.context.clone()).await;
        assert_eq!(result.status, StepStatus::Ok, "{}", result.error_message);
        assert_eq!(result.outputs["row_count"], "1");
        let rows: Value = serde_json::from_str(&result.outputs["rows"]).unwrap();
        assert_eq!(rows[0]["id"], "1");
        assert_eq!(rows[0]["name"], "alpha");
    }

    #[tokio::test]
    async fn test_statement_reports_affected_rows() {
        let executor = SqlQueryExecutor::new();
        // In-memory connection per query: a bare CREATE affects zero rows.
        let req = request("CREATE TABLE t (id INTEGER)");
        let result = executor.execute(&req, &req.context.clone()).await;
        assert_eq!(result.status, StepStatus::Ok);
        assert_eq!(result.outputs["affected_rows"], "0");
    }

    #[tokio::test]
    async fn test_invalid_sql_is_execution_failed() {
        let executor = SqlQueryExecutor::new();
        let req = request("SELEC nonsense");
        let result = executor.execute(&req, &req.context.clone()).await;
        assert_eq!(result.error_code, ErrorCode::ExecutionFailed);
    }

    #[tokio::test]
    async fn test_params_rejected() {
        let executor = SqlQueryExecutor::new();
        let mut req = request("SELECT ?");
        req.inputs.insert("params".into(), "[1]".into());
        let result = executor.execute(&req, &req.context.clone()).await;
        assert_eq!(result.error_code, ErrorCode::InvalidInput);
    }

    #[tokio::test]
    async fn test_missing_query() {
        let executor = SqlQueryExecutor::new();
        let req = StepRequest::new("sql.query", BlockContext::default());
        let result = executor.execute(&req, &req.context.clone()).await;
        assert_eq!(result.error_code, ErrorCode::MissingRequiredField);
    }
}
