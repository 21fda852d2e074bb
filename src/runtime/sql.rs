//! SQL execution against the local sandbox database.
//!
//! The pool is created lazily on first use and shared for the daemon's
//! lifetime; queries carry no session state.

use std::sync::Arc;

use log::error;
use serde::Serialize;
use serde_json::{json, Map, Value};
use sqlx::mysql::{MySqlPoolOptions, MySqlRow};
use sqlx::{Column, MySqlPool, Row, TypeInfo, ValueRef};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{Controller, EventSink, ExecuteRequest, ExecutionTask, RuntimeResult};
use crate::jupyter::ErrorOutput;

const SERVER_DSN: &str = "mysql://root@127.0.0.1:3306";
const SANDBOX_DSN: &str = "mysql://root@127.0.0.1:3306/sandbox";

/// Serialized query outcome delivered as a single `text/plain` result.
#[derive(Debug, Serialize)]
pub(crate) struct QueryResult {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rows: Vec<Vec<Value>>,
}

impl Controller {
    async fn db_pool(&self) -> Result<&MySqlPool, sqlx::Error> {
        self.db
            .get_or_try_init(|| async {
                let server = MySqlPoolOptions::new()
                    .max_connections(1)
                    .connect(SERVER_DSN)
                    .await?;
                sqlx::query("CREATE DATABASE IF NOT EXISTS sandbox")
                    .execute(&server)
                    .await?;
                server.close().await;

                MySqlPoolOptions::new().connect(SANDBOX_DSN).await
            })
            .await
    }

    pub(super) async fn run_sql(
        self: &Arc<Self>,
        request: ExecuteRequest,
        sink: EventSink,
        cancel: CancellationToken,
    ) -> RuntimeResult<ExecutionTask> {
        let session = Self::new_context_id();
        let code = request.code.clone();
        let controller = Arc::clone(self);

        Ok(ExecutionTask::new(async move {
            sink.init(&session).await;

            // connectivity problems are in-stream failures, not dispatch ones
            let pool = match controller.db_pool().await {
                Ok(pool) => pool.clone(),
                Err(err) => {
                    error!("DBInitError: error initializing db server: {err}");
                    sink.error(ErrorOutput::new("DBInitError", err.to_string()))
                        .await;
                    return;
                }
            };
            if let Err(err) = pool.acquire().await {
                error!("DBPingError: error pinging db server: {err}");
                sink.error(ErrorOutput::new("DBPingError", err.to_string()))
                    .await;
                return;
            }

            let started = Instant::now();

            let outcome = tokio::select! {
                outcome = run_query(&pool, &code) => outcome,
                _ = cancel.cancelled() => {
                    sink.error(ErrorOutput::new("ContextCancelled", "context cancelled")).await;
                    return;
                }
            };

            match outcome {
                Ok(result) => {
                    let payload = match serde_json::to_string(&result) {
                        Ok(payload) => payload,
                        Err(err) => {
                            error!("JSONMarshalError: {err}");
                            sink.error(ErrorOutput::new("JSONMarshalError", err.to_string()))
                                .await;
                            return;
                        }
                    };
                    let mut data = Map::new();
                    data.insert("text/plain".to_string(), Value::String(payload));
                    sink.result(data, 1).await;
                    sink.complete(started.elapsed()).await;
                }
                Err((ename, err)) => {
                    error!("{ename}: {err}");
                    sink.error(ErrorOutput::new(ename, err.to_string())).await;
                }
            }
        }))
    }
}

/// Classify by the first whitespace-delimited token: `SELECT` runs a query,
/// anything else runs as a statement reporting affected rows.
fn query_type(code: &str) -> String {
    code.split_whitespace()
        .next()
        .unwrap_or_default()
        .to_uppercase()
}

async fn run_query(pool: &MySqlPool, code: &str) -> Result<QueryResult, (&'static str, sqlx::Error)> {
    if query_type(code) == "SELECT" {
        let rows = sqlx::query(code)
            .fetch_all(pool)
            .await
            .map_err(|err| ("DBQueryError", err))?;

        let columns = rows
            .first()
            .map(|row| {
                row.columns()
                    .iter()
                    .map(|c| c.name().to_string())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        let rows = rows
            .iter()
            .map(|row| {
                (0..row.columns().len())
                    .map(|idx| match cell_to_string(row, idx) {
                        Some(text) => Value::String(text),
                        None => Value::Null,
                    })
                    .collect()
            })
            .collect();

        Ok(QueryResult { columns, rows })
    } else {
        let done = sqlx::query(code)
            .execute(pool)
            .await
            .map_err(|err| ("DBExecError", err))?;

        Ok(QueryResult {
            columns: vec!["affected_rows".to_string()],
            rows: vec![vec![json!(done.rows_affected())]],
        })
    }
}

/// Stringify one cell with default formatting; NULL stays null.
fn cell_to_string(row: &MySqlRow, idx: usize) -> Option<String> {
    let raw = row.try_get_raw(idx).ok()?;
    if raw.is_null() {
        return None;
    }

    let type_name = raw.type_info().name().to_string();
    match type_name.as_str() {
        "BOOLEAN" => row.try_get::<bool, _>(idx).ok().map(|v| v.to_string()),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
            row.try_get::<i64, _>(idx).ok().map(|v| v.to_string())
        }
        "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
        | "BIGINT UNSIGNED" => row.try_get::<u64, _>(idx).ok().map(|v| v.to_string()),
        "FLOAT" => row.try_get::<f32, _>(idx).ok().map(|v| v.to_string()),
        "DOUBLE" => row.try_get::<f64, _>(idx).ok().map(|v| v.to_string()),
        "DATE" => row
            .try_get::<chrono::NaiveDate, _>(idx)
            .ok()
            .map(|v| v.to_string()),
        "TIME" => row
            .try_get::<chrono::NaiveTime, _>(idx)
            .ok()
            .map(|v| v.to_string()),
        "DATETIME" | "TIMESTAMP" => row
            .try_get::<chrono::NaiveDateTime, _>(idx)
            .ok()
            .map(|v| v.to_string()),
        _ => row
            .try_get::<String, _>(idx)
            .ok()
            .or_else(|| {
                row.try_get::<Vec<u8>, _>(idx)
                    .ok()
                    .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            }),
    }
}
