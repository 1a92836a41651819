//! PostgreSQL adapter
//!
//! Reference implementation of the adapter contract: sqlx pool, catalog
//! introspection over `information_schema` (`public` schema), row-count
//! estimates from `pg_class.reltuples`.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::TryStreamExt;
use log::debug;
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow, PgSslMode};
use sqlx::{Column, Row};

use crate::adapter::DatabaseAdapter;
use crate::errors::{DbError, ValidationError};
use crate::models::enums::DatabaseType;
use crate::models::structs::{
    ColumnInfo, ConnectionConfig, QueryOptions, QueryResult, SslMode, TableInfo,
};
use crate::safety;

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

const DIALECT: &str = "PostgreSQL dialect. Unquoted identifiers fold to lowercase; quote them \
with double quotes (\"UserName\") to preserve case. Strings use single quotes. Paginate with \
LIMIT n OFFSET m. Dates: NOW(), CURRENT_DATE, date_trunc('day', ts), intervals like \
NOW() - INTERVAL '7 days'. String concatenation with ||. NULL-safe comparison via \
IS DISTINCT FROM; plain = never matches NULL.";

pub struct PostgresAdapter {
    pool: Option<PgPool>,
    config: Option<ConnectionConfig>,
    closed: AtomicBool,
}

impl PostgresAdapter {
    pub fn new() -> Self {
        Self {
            pool: None,
            config: None,
            closed: AtomicBool::new(false),
        }
    }

    fn handles(&self) -> Result<(&PgPool, &ConnectionConfig), DbError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DbError::Closed);
        }
        match (self.pool.as_ref(), self.config.as_ref()) {
            (Some(pool), Some(config)) => Ok((pool, config)),
            _ => Err(DbError::NotConnected),
        }
    }
}

impl Default for PostgresAdapter {
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

/// Decode one row into JSON values, trying the common Postgres scalar
/// types in order and falling back to NULL for anything exotic.
fn row_values(row: &PgRow) -> Vec<Value> {
    (0..row.columns().len())
        .map(|i| {
            if let Ok(v) = row.try_get::<Option<String>, _>(i) {
                v.map(Value::String).unwrap_or(Value::Null)
            } else if let Ok(v) = row.try_get::<Option<i64>, _>(i) {
                v.map(Value::from).unwrap_or(Value::Null)
            } else if let Ok(v) = row.try_get::<Option<i32>, _>(i) {
                v.map(Value::from).unwrap_or(Value::Null)
            } else if let Ok(v) = row.try_get::<Option<i16>, _>(i) {
                v.map(Value::from).unwrap_or(Value::Null)
            } else if let Ok(v) = row.try_get::<Option<f64>, _>(i) {
                v.map(Value::from).unwrap_or(Value::Null)
            } else if let Ok(v) = row.try_get::<Option<f32>, _>(i) {
                v.map(Value::from).unwrap_or(Value::Null)
            } else if let Ok(v) = row.try_get::<Option<bool>, _>(i) {
                v.map(Value::from).unwrap_or(Value::Null)
            } else if let Ok(v) = row.try_get::<Option<rust_decimal::Decimal>, _>(i) {
                v.map(|d| Value::String(d.to_string())).unwrap_or(Value::Null)
            } else if let Ok(v) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(i) {
                v.map(|t| Value::String(t.to_rfc3339())).unwrap_or(Value::Null)
            } else if let Ok(v) = row.try_get::<Option<chrono::NaiveDateTime>, _>(i) {
                v.map(|t| Value::String(t.to_string())).unwrap_or(Value::Null)
            } else if let Ok(v) = row.try_get::<Option<chrono::NaiveDate>, _>(i) {
                v.map(|d| Value::String(d.to_string())).unwrap_or(Value::Null)
            } else if let Ok(v) = row.try_get::<Option<Value>, _>(i) {
                v.unwrap_or(Value::Null)
            } else {
                Value::Null
            }
        })
        .collect()
}

#[async_trait]
impl DatabaseAdapter for PostgresAdapter {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::PostgreSQL
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
        let ssl_mode = match config.ssl_mode {
            SslMode::Disable => PgSslMode::Disable,
            SslMode::Prefer => PgSslMode::Prefer,
            SslMode::Require => PgSslMode::Require,
        };
        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.database)
            .username(&config.username)
            .password(&config.password)
            .ssl_mode(ssl_mode);
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(config.timeout())
            .test_before_acquire(true)
            .connect_with(options)
            .await
            .map_err(|e| DbError::Connect(e.to_string()))?;

        // Success here must mean the handle is immediately usable.
        tokio::time::timeout(config.timeout(), sqlx::query("SELECT 1").execute(&pool))
            .await
            .map_err(|_| DbError::Timeout(config.timeout()))?
            .map_err(|e| DbError::Connect(e.to_string()))?;

        debug!("postgres: connected to {}:{}", config.host, config.port);
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
                "SELECT table_name FROM information_schema.tables \
                 WHERE table_schema = 'public' AND table_type IN ('BASE TABLE', 'VIEW') \
                 ORDER BY table_name",
            )
            .fetch_all(pool)
            .await
        })
        .await
    }

    async fn describe_table(&self, table: &str) -> Result<TableInfo, DbError> {
        let (pool, config) = self.handles()?;

        let cols = with_timeout(config.timeout(), async {
            sqlx::query_as::<_, (String, String, String)>(
                "SELECT column_name, data_type, is_nullable \
                 FROM information_schema.columns \
                 WHERE table_schema = 'public' AND table_name = $1 \
                 ORDER BY ordinal_position",
            )
            .bind(table)
            .fetch_all(pool)
            .await
        })
        .await?;
        if cols.is_empty() {
            return Err(DbError::NotFound(table.to_string()));
        }

        let pk_cols = with_timeout(config.timeout(), async {
            sqlx::query_scalar::<_, String>(
                "SELECT kcu.column_name \
                 FROM information_schema.table_constraints tc \
                 JOIN information_schema.key_column_usage kcu \
                   ON tc.constraint_name = kcu.constraint_name \
                  AND tc.table_schema = kcu.table_schema \
                 WHERE tc.table_schema = 'public' AND tc.table_name = $1 \
                   AND tc.constraint_type = 'PRIMARY KEY'",
            )
            .bind(table)
            .fetch_all(pool)
            .await
        })
        .await?;

        // reltuples is -1 until the table has been analyzed.
        let estimate = with_timeout(config.timeout(), async {
            sqlx::query_scalar::<_, i64>(
                "SELECT reltuples::bigint FROM pg_class c \
                 JOIN pg_namespace n ON n.oid = c.relnamespace \
                 WHERE n.nspname = 'public' AND c.relname = $1",
            )
            .bind(table)
            .fetch_optional(pool)
            .await
        })
        .await?;

        let columns = cols
            .into_iter()
            .map(|(name, data_type, is_nullable)| ColumnInfo {
                primary_key: pk_cols.contains(&name),
                nullable: is_nullable.eq_ignore_ascii_case("yes"),
                name,
                data_type,
                comment: None,
            })
            .collect();

        Ok(TableInfo {
            name: table.to_string(),
            schema: Some("public".to_string()),
            columns,
            approx_rows: estimate.filter(|n| *n >= 0).map(|n| n as u64),
        })
    }

    fn validate_query(&self, sql: &str) -> Result<(), ValidationError> {
        safety::validate_sql(sql, &safety::POSTGRES_BLOCKLIST)
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
        debug!("postgres: executing: {}", sql);

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
