//! MySQL adapter
//!
//! Same shape as the Postgres adapter; introspection is scoped with
//! `DATABASE()` so only the configured schema is visible, and MySQL's
//! `information_schema` supplies column comments and row estimates.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::TryStreamExt;
use log::debug;
use serde_json::Value;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow, MySqlSslMode};
use sqlx::{Column, Row};

use crate::adapter::DatabaseAdapter;
use crate::errors::{DbError, ValidationError};
use crate::models::enums::DatabaseType;
use crate::models::structs::{
    ColumnInfo, ConnectionConfig, QueryOptions, QueryResult, SslMode, TableInfo,
};
use crate::safety;

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

const DIALECT: &str = "MySQL dialect. Quote identifiers with backticks (`order`); strings use \
single quotes. Paginate with LIMIT n OFFSET m. Dates: NOW(), CURDATE(), \
DATE_SUB(NOW(), INTERVAL 7 DAY), DATE_FORMAT(ts, '%Y-%m-%d'). Concatenate with CONCAT(); || \
is logical OR unless PIPES_AS_CONCAT is set. NULL-safe comparison with <=>.";

pub struct MySqlAdapter {
    pool: Option<MySqlPool>,
    config: Option<ConnectionConfig>,
    closed: AtomicBool,
}

impl MySqlAdapter {
    pub fn new() -> Self {
        Self {
            pool: None,
            config: None,
            closed: AtomicBool::new(false),
        }
    }

    fn handles(&self) -> Result<(&MySqlPool, &ConnectionConfig), DbError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DbError::Closed);
        }
        match (self.pool.as_ref(), self.config.as_ref()) {
            (Some(pool), Some(config)) => Ok((pool, config)),
            _ => Err(DbError::NotConnected),
        }
    }
}

impl Default for MySqlAdapter {
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

fn row_values(row: &MySqlRow) -> Vec<Value> {
    (0..row.columns().len())
        .map(|i| {
            if let Ok(v) = row.try_get::<Option<String>, _>(i) {
                v.map(Value::String).unwrap_or(Value::Null)
            } else if let Ok(v) = row.try_get::<Option<i64>, _>(i) {
                v.map(Value::from).unwrap_or(Value::Null)
            } else if let Ok(v) = row.try_get::<Option<u64>, _>(i) {
                v.map(Value::from).unwrap_or(Value::Null)
            } else if let Ok(v) = row.try_get::<Option<i32>, _>(i) {
                v.map(Value::from).unwrap_or(Value::Null)
            } else if let Ok(v) = row.try_get::<Option<f64>, _>(i) {
                v.map(Value::from).unwrap_or(Value::Null)
            } else if let Ok(v) = row.try_get::<Option<bool>, _>(i) {
                v.map(Value::from).unwrap_or(Value::Null)
            } else if let Ok(v) = row.try_get::<Option<rust_decimal::Decimal>, _>(i) {
                v.map(|d| Value::String(d.to_string())).unwrap_or(Value::Null)
            } else if let Ok(v) = row.try_get::<Option<chrono::NaiveDateTime>, _>(i) {
                v.map(|t| Value::String(t.to_string())).unwrap_or(Value::Null)
            } else if let Ok(v) = row.try_get::<Option<chrono::NaiveDate>, _>(i) {
                v.map(|d| Value::String(d.to_string())).unwrap_or(Value::Null)
            } else if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(i) {
                v.map(|b| Value::String(format!("0x{}", hex_string(&b))))
                    .unwrap_or(Value::Null)
            } else {
                Value::Null
            }
        })
        .collect()
}

fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[async_trait]
impl DatabaseAdapter for MySqlAdapter {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::MySQL
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
            SslMode::Disable => MySqlSslMode::Disabled,
            SslMode::Prefer => MySqlSslMode::Preferred,
            SslMode::Require => MySqlSslMode::Required,
        };
        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.database)
            .username(&config.username)
            .password(&config.password)
            .ssl_mode(ssl_mode);
        let pool = MySqlPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(config.timeout())
            .test_before_acquire(true)
            .connect_with(options)
            .await
            .map_err(|e| DbError::Connect(e.to_string()))?;

        tokio::time::timeout(config.timeout(), sqlx::query("SELECT 1").execute(&pool))
            .await
            .map_err(|_| DbError::Timeout(config.timeout()))?
            .map_err(|e| DbError::Connect(e.to_string()))?;

        debug!("mysql: connected to {}:{}", config.host, config.port);
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
                 WHERE table_schema = DATABASE() \
                   AND table_type IN ('BASE TABLE', 'VIEW') \
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
            sqlx::query_as::<_, (String, String, String, String, String)>(
                "SELECT column_name, column_type, is_nullable, column_key, column_comment \
                 FROM information_schema.columns \
                 WHERE table_schema = DATABASE() AND table_name = ? \
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

        let estimate = with_timeout(config.timeout(), async {
            sqlx::query_scalar::<_, Option<i64>>(
                "SELECT CAST(table_rows AS SIGNED) FROM information_schema.tables \
                 WHERE table_schema = DATABASE() AND table_name = ?",
            )
            .bind(table)
            .fetch_optional(pool)
            .await
        })
        .await?;

        let columns = cols
            .into_iter()
            .map(|(name, data_type, is_nullable, column_key, comment)| ColumnInfo {
                name,
                data_type,
                nullable: is_nullable.eq_ignore_ascii_case("yes"),
                primary_key: column_key == "PRI",
                comment: (!comment.is_empty()).then_some(comment),
            })
            .collect();

        Ok(TableInfo {
            name: table.to_string(),
            schema: self.config.as_ref().map(|c| c.database.clone()),
            columns,
            approx_rows: estimate.flatten().filter(|n| *n >= 0).map(|n| n as u64),
        })
    }

    fn validate_query(&self, sql: &str) -> Result<(), ValidationError> {
        safety::validate_sql(sql, &safety::MYSQL_BLOCKLIST)
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
        debug!("mysql: executing: {}", sql);

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
        let adapter = MySqlAdapter::new();
        assert_eq!(adapter.database_type(), DatabaseType::MySQL);
        assert!(adapter.sql_dialect().contains("backticks"));
    }

    #[test]
    fn test_dialect_validation() {
        let adapter = MySqlAdapter::new();
        assert!(adapter.validate_query("SELECT * FROM orders").is_ok());
        assert!(
            adapter
                .validate_query("SELECT * FROM users INTO OUTFILE '/tmp/dump'")
                .is_err()
        );
        assert!(adapter.validate_query("SELECT SLEEP(10)").is_err());
        assert!(adapter.validate_query("SELECT LOAD_FILE('/etc/passwd')").is_err());
    }

    #[tokio::test]
    async fn test_operations_fail_fast_when_unconnected() {
        let adapter = MySqlAdapter::new();
        assert!(matches!(
            adapter.describe_table("users").await,
            Err(DbError::NotConnected)
        ));
    }
}
