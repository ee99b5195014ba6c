//! DuckDB row store
//!
//! One shared connection behind a mutex. Statements run on the blocking
//! pool with a timeout.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ::duckdb::types::{TimeUnit, ToSqlOutput, Value as DuckValue};
use ::duckdb::{Connection, ToSql};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeDelta};
use parking_lot::Mutex;
use serde_json::Value as JsonValue;

use super::{Decode, OutputColumn, RowStore, decode_json};
use crate::core::constants::STORE_QUERY_TIMEOUT_SECS;
use crate::error::{EngineError, QueryError};
use crate::filter::ast::Value;
use crate::ordering::Row;
use crate::sql::{DuckdbDialect, SqlDialect, Statement};

const CONNECTION_SETUP: &str = "SET autoinstall_known_extensions = false;
     SET autoload_known_extensions = false;
     SET extension_directory = '';
     LOAD json;";

#[derive(Clone)]
pub struct DuckdbStore {
    conn: Arc<Mutex<Connection>>,
    timeout: Duration,
}

impl DuckdbStore {
    /// Open (or create) a database file
    pub async fn open(path: &Path) -> Result<Self, EngineError> {
        let path = path.to_path_buf();
        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&path)?;
            conn.execute_batch(CONNECTION_SETUP)?;
            tracing::debug!(path = %path.display(), "DuckDB store opened");
            Ok::<_, ::duckdb::Error>(conn)
        })
        .await
        .map_err(|e| EngineError::Io(std::io::Error::other(e)))??;
        Ok(Self::from_connection(conn))
    }

    pub fn in_memory() -> Result<Self, EngineError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(CONNECTION_SETUP)?;
        tracing::debug!("DuckDB in-memory store opened");
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            timeout: Duration::from_secs(STORE_QUERY_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run a multi-statement SQL script (schema setup, fixtures)
    pub async fn execute_batch(&self, sql: &str) -> Result<(), EngineError> {
        let sql = sql.to_string();
        let conn = Arc::clone(&self.conn);
        self.run(move || conn.lock().execute_batch(&sql).map_err(EngineError::from))
            .await?
    }

    async fn run<T, F>(&self, f: F) -> Result<T, EngineError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let timeout_secs = self.timeout.as_secs();
        tokio::time::timeout(self.timeout, tokio::task::spawn_blocking(f))
            .await
            .map_err(|_| {
                tracing::warn!("DuckDB query timed out after {}s", timeout_secs);
                EngineError::Timeout { timeout_secs }
            })?
            .map_err(|e| {
                tracing::error!(error = %e, "DuckDB query task failed");
                EngineError::Io(std::io::Error::other(format!(
                    "Query execution failed: {}",
                    e
                )))
            })
    }
}

#[async_trait]
impl RowStore for DuckdbStore {
    fn dialect(&self) -> &'static dyn SqlDialect {
        &DuckdbDialect
    }

    async fn count(&self, stmt: Statement) -> Result<u64, QueryError> {
        tracing::trace!(sql = %stmt.sql, params = stmt.params.len(), "DuckDB count");
        let conn = Arc::clone(&self.conn);
        let count = self
            .run(move || {
                let conn = conn.lock();
                let params: Vec<SqlParam> = stmt.params.into_iter().map(SqlParam).collect();
                let params_refs: Vec<&dyn ToSql> = params.iter().map(|p| p as &dyn ToSql).collect();
                conn.query_row(&stmt.sql, &*params_refs, |row| row.get::<_, i64>(0))
            })
            .await??;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn fetch(
        &self,
        stmt: Statement,
        columns: Vec<OutputColumn>,
    ) -> Result<Vec<Row>, QueryError> {
        tracing::trace!(sql = %stmt.sql, params = stmt.params.len(), "DuckDB fetch");
        let conn = Arc::clone(&self.conn);
        let rows = self
            .run(move || {
                let conn = conn.lock();
                let mut prepared = conn.prepare(&stmt.sql)?;
                let params: Vec<SqlParam> = stmt.params.into_iter().map(SqlParam).collect();
                let params_refs: Vec<&dyn ToSql> = params.iter().map(|p| p as &dyn ToSql).collect();
                let mapped = prepared.query_map(&*params_refs, |row| {
                    let mut out = Row::new();
                    for (i, column) in columns.iter().enumerate() {
                        let value = to_json(row.get::<_, DuckValue>(i)?);
                        let value = match column.decode {
                            Decode::Plain => value,
                            Decode::Json => decode_json(value),
                        };
                        out.insert(column.name.clone(), value);
                    }
                    Ok(out)
                })?;
                mapped.collect::<Result<Vec<_>, _>>()
            })
            .await??;
        Ok(rows)
    }
}

/// Bind parameter
struct SqlParam(Value);

impl ToSql for SqlParam {
    fn to_sql(&self) -> ::duckdb::Result<ToSqlOutput<'_>> {
        let value = match &self.0 {
            Value::Null => DuckValue::Null,
            Value::Bool(b) => DuckValue::Boolean(*b),
            Value::Int(i) => DuckValue::BigInt(*i),
            Value::Float(f) => DuckValue::Double(*f),
            Value::Text(s) => DuckValue::Text(s.clone()),
            Value::List(_) => DuckValue::Text(self.0.to_json().to_string()),
            Value::Json(json) => DuckValue::Text(json.to_string()),
        };
        Ok(ToSqlOutput::Owned(value))
    }
}

fn to_json(value: DuckValue) -> JsonValue {
    match value {
        DuckValue::Null => JsonValue::Null,
        DuckValue::Boolean(b) => JsonValue::Bool(b),
        DuckValue::TinyInt(i) => JsonValue::from(i),
        DuckValue::SmallInt(i) => JsonValue::from(i),
        DuckValue::Int(i) => JsonValue::from(i),
        DuckValue::BigInt(i) => JsonValue::from(i),
        DuckValue::HugeInt(i) => match i64::try_from(i) {
            Ok(i) => JsonValue::from(i),
            Err(_) => JsonValue::String(i.to_string()),
        },
        DuckValue::UTinyInt(i) => JsonValue::from(i),
        DuckValue::USmallInt(i) => JsonValue::from(i),
        DuckValue::UInt(i) => JsonValue::from(i),
        DuckValue::UBigInt(i) => JsonValue::from(i),
        DuckValue::Float(f) => JsonValue::from(f64::from(f)),
        DuckValue::Double(f) => JsonValue::from(f),
        DuckValue::Decimal(d) => {
            let text = d.to_string();
            match text.parse::<f64>() {
                Ok(f) => JsonValue::from(f),
                Err(_) => JsonValue::String(text),
            }
        }
        DuckValue::Text(s) | DuckValue::Enum(s) => JsonValue::String(s),
        DuckValue::Date32(days) => NaiveDate::from_ymd_opt(1970, 1, 1)
            .and_then(|epoch| epoch.checked_add_signed(TimeDelta::days(i64::from(days))))
            .map(|d| JsonValue::String(d.format("%Y-%m-%d").to_string()))
            .unwrap_or(JsonValue::Null),
        DuckValue::Timestamp(unit, v) => {
            let ts = match unit {
                TimeUnit::Second => DateTime::from_timestamp(v, 0),
                TimeUnit::Millisecond => DateTime::from_timestamp_millis(v),
                TimeUnit::Microsecond => DateTime::from_timestamp_micros(v),
                TimeUnit::Nanosecond => Some(DateTime::from_timestamp_nanos(v)),
            };
            ts.map(|ts| JsonValue::String(ts.naive_utc().format("%Y-%m-%d %H:%M:%S%.f").to_string()))
                .unwrap_or(JsonValue::Null)
        }
        DuckValue::List(items) | DuckValue::Array(items) => {
            JsonValue::Array(items.into_iter().map(to_json).collect())
        }
        other => JsonValue::String(format!("{:?}", other)),
    }
}
