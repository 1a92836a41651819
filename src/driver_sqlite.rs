//! SQLite adapter
//!
//! `ConnectionConfig.host` is the database file path. SQLite is a
//! single-writer embedded engine, so the pool is capped at one connection
//! (advertised concurrency of 1) and the file is opened read-only as a
//! second line of defense behind the validator.

use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::TryStreamExt;
use log::debug;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row};

use crate::adapter::DatabaseAdapter;
use crate::errors::{DbError, ValidationError};
use crate::models::enums::DatabaseType;
use crate::models::structs::{ColumnInfo, ConnectionConfig, QueryOptions, QueryResult, TableInfo};
use crate::safety;

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

const DIALECT: &str = "SQLite dialect. Quote identifiers with double quotes; strings use single \
quotes. Paginate with LIMIT n OFFSET m. Dates are stored as TEXT/REAL/INTEGER; use date('now'), \
datetime(ts, '-7 days'), strftime('%Y-%m-%d', ts). Types are dynamic (type affinity), so \
comparisons may coerce. Concatenate with ||.";

pub struct SqliteAdapter {
    pool: Option<SqlitePool>,
    config: Option<ConnectionConfig>,
    closed: AtomicBool,
}

impl SqliteAdapter {
    pub fn new() -> Self {
        Self {
            pool: None,
            config: None,
            closed: AtomicBool::new(false),
        }
    }

    fn handles(&self) -> Result<(&SqlitePool, &ConnectionConfig), DbError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DbError::Closed);
        }
        match (self.pool.as_ref(), self.config.as_ref()) {
            (Some(pool), Some(config)) => Ok((pool, config)),
            _ => Err(DbError::NotConnected),
        }
    }
}

impl Default for SqliteAdapter {
    fn default() -> Self {
        Self::new()
    }
}

async fn with_timeout<T, F>(timeout: Duration, fut: F) -> Result<T, DbError>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| DbError::Timeout(timeout))?
        .map_err(|e| DbError::Execution(e.to_string()))
}

fn row_values(row: &SqliteRow) -> Vec<Value> {
    (0..row.columns().len())
        .map(|i| {
            if let Ok(v) = row.try_get::<Option<String>, _>(i) {
                v.map(Value::String).unwrap_or(Value::Null)
            } else if let Ok(v) = row.try_get::<Option<i64>, _>(i) {
                v.map(Value::from).unwrap_or(Value::Null)
            } else if let Ok(v) = row.try_get::<Option<f64>, _>(i) {
                v.map(Value::from).unwrap_or(Value::Null)
            } else if let Ok(v) = row.try_get::<Option<bool>, _>(i) {
                v.map(Value::from).unwrap_or(Value::Null)
            } else if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(i) {
                v.map(|b| Value::String(format!("<{} byte blob>", b.len())))
                    .unwrap_or(Value::Null)
            } else {
                Value::Null
            }
        })
        .collect()
}

#[async_trait]
impl DatabaseAdapter for SqliteAdapter {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::SQLite
    }

    fn sql_dialect(&self) -> &'static str {
        DIALECT
    }

    fn schema_table_cap(&self) -> usize {
        self.config.as_ref().map(|c| c.schema_table_cap).unwrap_or(40)
    }

    async fn connect(&mut self, config: &ConnectionConfig) -> Result<(), DbError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DbError::Closed);
        }
        if !Path::new(&config.host).exists() {
            return Err(DbError::Connect(format!(
                "database file does not exist: {}",
                config.host
            )));
        }
        let options = SqliteConnectOptions::new()
            .filename(&config.host)
            .read_only(true)
            .create_if_missing(false);
        // Single-writer engine: one connection, queries serialize in-pool.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .acquire_timeout(config.timeout())
            .connect_with(options)
            .await
            .map_err(|e| DbError::Connect(e.to_string()))?;

        tokio::time::timeout(config.timeout(), sqlx::query("SELECT 1").execute(&pool))
            .await
            .map_err(|_| DbError::Timeout(config.timeout()))?
            .map_err(|e| DbError::Connect(e.to_string()))?;

        debug!("sqlite: opened {}", config.host);
        self.pool = Some(pool);
        self.config = Some(config.clone());
        Ok(())
    }

    async fn close(&self) -> Result<(), DbError> {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(pool) = self.pool.as_ref() {
            pool.close().await;
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<(), DbError> {
        let (pool, _) = self.handles()?;
        with_timeout(HEALTH_CHECK_TIMEOUT, async {
            sqlx::query("SELECT 1").execute(pool).await.map(|_| ())
        })
        .await
    }

    async fn list_tables(&self) -> Result<Vec<String>, DbError> {
        let (pool, config) = self.handles()?;
        with_timeout(config.timeout(), async {
            sqlx::query_scalar::<_, String>(
                "SELECT name FROM sqlite_master \
                 WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%' \
                 ORDER BY name",
            )
            .fetch_all(pool)
            .await
        })
        .await
    }

    async fn describe_table(&self, table: &str) -> Result<TableInfo, DbError> {
        let (pool, config) = self.handles()?;

        // pragma_table_info is the table-valued form of PRAGMA table_info,
        // which unlike the PRAGMA statement accepts a bound argument.
        let cols = with_timeout(config.timeout(), async {
            sqlx::query_as::<_, (String, String, i64, i64)>(
                "SELECT name, type, \"notnull\", pk FROM pragma_table_info(?) ORDER BY cid",
            )
            .bind(table)
            .fetch_all(pool)
            .await
        })
        .await?;
        if cols.is_empty() {
            return Err(DbError::NotFound(table.to_string()));
        }

        let columns = cols
            .into_iter()
            .map(|(name, data_type, notnull, pk)| ColumnInfo {
                name,
                data_type: if data_type.is_empty() {
                    "ANY".to_string()
                } else {
                    data_type
                },
                nullable: notnull == 0,
                primary_key: pk > 0,
                comment: None,
            })
            .collect();

        Ok(TableInfo {
            name: table.to_string(),
            schema: None,
            columns,
            // Exact counts need a full scan here; report unknown instead.
            approx_rows: None,
        })
    }

    fn validate_query(&self, sql: &str) -> Result<(), ValidationError> {
        safety::validate_sql(sql, &safety::SQLITE_BLOCKLIST)
    }

    async fn execute_query(
        &self,
        sql: &str,
        opts: &QueryOptions,
    ) -> Result<QueryResult, DbError> {
        let (pool, config) = self.handles()?;
        self.validate_query(sql)?;

        let (max_rows, timeout) = config.effective_limits(opts);
        let sql = safety::enforce_limit(sql, max_rows, "LIMIT");
        debug!("sqlite: executing: {}", sql);

        tokio::time::timeout(timeout, async {
            let mut stream = sqlx::query(&sql).fetch(pool);
            // Column names come off the first fetched row; a zero-row
            // result reports an empty projection.
            let mut columns: Vec<String> = Vec::new();
            let mut rows: Vec<Vec<Value>> = Vec::new();
            let mut truncated = false;
            while let Some(row) = stream
                .try_next()
                .await
                .map_err(|e| DbError::Execution(e.to_string()))?
            {
                if columns.is_empty() {
                    columns = row.columns().iter().map(|c| c.name().to_string()).collect();
                }
                if rows.len() as u32 >= max_rows {
                    truncated = true;
                    break;
                }
                rows.push(row_values(&row));
            }
            Ok(QueryResult::new(columns, rows, truncated))
        })
        .await
        .map_err(|_| DbError::Timeout(timeout))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_identity() {
        let adapter = SqliteAdapter::new();
        assert_eq!(adapter.database_type(), DatabaseType::SQLite);
        assert!(adapter.sql_dialect().contains("affinity"));
    }

    #[test]
    fn test_dialect_validation() {
        let adapter = SqliteAdapter::new();
        assert!(adapter.validate_query("SELECT * FROM logs").is_ok());
        assert!(
            adapter
                .validate_query("SELECT load_extension('/tmp/evil.so')")
                .is_err()
        );
        assert!(adapter.validate_query("ATTACH DATABASE '/tmp/x' AS x").is_err());
    }

    #[tokio::test]
    async fn test_connect_missing_file_fails_fast() {
        let mut adapter = SqliteAdapter::new();
        let config = ConnectionConfig {
            host: "/nonexistent/path/to.db".into(),
            port: 0,
            database: String::new(),
            username: String::new(),
            password: String::new(),
            ssl_mode: Default::default(),
            max_rows: 100,
            timeout_secs: 5,
            schema_table_cap: 40,
        };
        assert!(matches!(
            adapter.connect(&config).await,
            Err(DbError::Connect(_))
        ));
    }
}
