//! ClickHouse adapter
//!
//! Talks to ClickHouse over its HTTP interface: statements are POSTed with
//! `default_format=JSON` and results come back as `{meta, data, rows}`
//! JSON. Introspection reads `system.tables` / `system.columns`, with
//! values bound through server-side `{name:String}` parameters.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use serde_json::Value;

use crate::adapter::DatabaseAdapter;
use crate::errors::{DbError, ValidationError};
use crate::models::enums::DatabaseType;
use crate::models::structs::{
    ColumnInfo, ConnectionConfig, QueryOptions, QueryResult, SslMode, TableInfo,
};
use crate::safety;

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

const DIALECT: &str = "ClickHouse SQL dialect. Quote identifiers with backticks or double \
quotes; strings use single quotes. Paginate with LIMIT n OFFSET m. Dates: now(), today(), \
toDate(ts), toStartOfDay(ts), ts - INTERVAL 7 DAY. Aggregations are the core idiom; prefer \
GROUP BY over row-by-row work. Columns may be Nullable(T); use ifNull/coalesce. Table \
functions reaching outside the database (file, url, remote) are not available here.";

pub struct ClickHouseAdapter {
    http: Option<reqwest::Client>,
    endpoint: String,
    config: Option<ConnectionConfig>,
    closed: AtomicBool,
}

impl ClickHouseAdapter {
    pub fn new() -> Self {
        Self {
            http: None,
            endpoint: String::new(),
            config: None,
            closed: AtomicBool::new(false),
        }
    }

    fn handles(&self) -> Result<(&reqwest::Client, &ConnectionConfig), DbError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DbError::Closed);
        }
        match (self.http.as_ref(), self.config.as_ref()) {
            (Some(http), Some(config)) => Ok((http, config)),
            _ => Err(DbError::NotConnected),
        }
    }

    /// POST one statement and parse the `FORMAT JSON` response body.
    /// `params` become server-side query parameters (`param_x=...`).
    async fn run(
        &self,
        sql: &str,
        params: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<Value, DbError> {
        let (http, config) = self.handles()?;
        let mut query: Vec<(String, String)> = vec![
            ("database".to_string(), config.database.clone()),
            ("default_format".to_string(), "JSON".to_string()),
        ];
        for (name, value) in params {
            query.push((format!("param_{}", name), value.to_string()));
        }

        let response = http
            .post(&self.endpoint)
            .query(&query)
            .basic_auth(&config.username, Some(&config.password))
            .timeout(timeout)
            .body(sql.to_string())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DbError::Timeout(timeout)
                } else {
                    DbError::Execution(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| DbError::Execution(e.to_string()))?;
        if !status.is_success() {
            return Err(DbError::Execution(body.trim().to_string()));
        }
        serde_json::from_str(&body).map_err(|e| DbError::Execution(e.to_string()))
    }
}

impl Default for ClickHouseAdapter {
    fn default() -> Self {
        Self::new()
    }
}

/// Shape a `FORMAT JSON` payload into columns + row tuples, capped at
/// `max_rows`.
fn shape_result(payload: &Value, max_rows: u32) -> QueryResult {
    let columns: Vec<String> = payload["meta"]
        .as_array()
        .map(|meta| {
            meta.iter()
                .filter_map(|m| m["name"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    let data = payload["data"].as_array().cloned().unwrap_or_default();
    let truncated = data.len() as u32 > max_rows;
    let rows: Vec<Vec<Value>> = data
        .iter()
        .take(max_rows as usize)
        .map(|entry| {
            columns
                .iter()
                .map(|col| entry.get(col).cloned().unwrap_or(Value::Null))
                .collect()
        })
        .collect();

    QueryResult::new(columns, rows, truncated)
}

#[async_trait]
impl DatabaseAdapter for ClickHouseAdapter {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::ClickHouse
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
        let scheme = match config.ssl_mode {
            SslMode::Require => "https",
            SslMode::Disable | SslMode::Prefer => "http",
        };
        self.endpoint = format!("{}://{}:{}/", scheme, config.host, config.port);
        self.http = Some(
            reqwest::Client::builder()
                .build()
                .map_err(|e| DbError::Connect(e.to_string()))?,
        );
        self.config = Some(config.clone());

        // HTTP is connectionless; the ping is what proves host, port,
        // credentials, and database all line up.
        if let Err(e) = self.run("SELECT 1", &[], config.timeout()).await {
            self.http = None;
            self.config = None;
            return Err(match e {
                DbError::Execution(msg) => DbError::Connect(msg),
                other => other,
            });
        }
        debug!("clickhouse: connected to {}", self.endpoint);
        Ok(())
    }

    async fn close(&self) -> Result<(), DbError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn health_check(&self) -> Result<(), DbError> {
        self.run("SELECT 1", &[], HEALTH_CHECK_TIMEOUT).await.map(|_| ())
    }

    async fn list_tables(&self) -> Result<Vec<String>, DbError> {
        let (_, config) = self.handles()?;
        let payload = self
            .run(
                "SELECT name FROM system.tables \
                 WHERE database = currentDatabase() ORDER BY name",
                &[],
                config.timeout(),
            )
            .await?;
        Ok(payload["data"]
            .as_array()
            .map(|data| {
                data.iter()
                    .filter_map(|entry| entry["name"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn describe_table(&self, table: &str) -> Result<TableInfo, DbError> {
        let (_, config) = self.handles()?;

        let payload = self
            .run(
                "SELECT name, type, comment, is_in_primary_key \
                 FROM system.columns \
                 WHERE database = currentDatabase() AND table = {t:String} \
                 ORDER BY position",
                &[("t", table)],
                config.timeout(),
            )
            .await?;
        let data = payload["data"].as_array().cloned().unwrap_or_default();
        if data.is_empty() {
            return Err(DbError::NotFound(table.to_string()));
        }

        let columns = data
            .iter()
            .map(|entry| {
                let data_type = entry["type"].as_str().unwrap_or("String").to_string();
                let comment = entry["comment"].as_str().unwrap_or_default();
                ColumnInfo {
                    name: entry["name"].as_str().unwrap_or_default().to_string(),
                    nullable: data_type.starts_with("Nullable("),
                    // 64-bit ints arrive quoted in JSON output by default.
                    primary_key: matches!(
                        &entry["is_in_primary_key"],
                        Value::Number(n) if n.as_u64() == Some(1)
                    ) || entry["is_in_primary_key"].as_str() == Some("1"),
                    data_type,
                    comment: (!comment.is_empty()).then(|| comment.to_string()),
                }
            })
            .collect();

        let estimate = self
            .run(
                "SELECT total_rows FROM system.tables \
                 WHERE database = currentDatabase() AND name = {t:String}",
                &[("t", table)],
                config.timeout(),
            )
            .await?;
        let approx_rows = estimate["data"]
            .as_array()
            .and_then(|data| data.first())
            .and_then(|entry| match &entry["total_rows"] {
                Value::Number(n) => n.as_u64(),
                Value::String(s) => s.parse().ok(),
                _ => None,
            });

        Ok(TableInfo {
            name: table.to_string(),
            schema: Some(config.database.clone()),
            columns,
            approx_rows,
        })
    }

    fn validate_query(&self, sql: &str) -> Result<(), ValidationError> {
        safety::validate_sql(sql, &safety::CLICKHOUSE_BLOCKLIST)
    }

    async fn execute_query(
        &self,
        sql: &str,
        opts: &QueryOptions,
    ) -> Result<QueryResult, DbError> {
        let (_, config) = self.handles()?;
        self.validate_query(sql)?;

        let (max_rows, timeout) = config.effective_limits(opts);
        let sql = safety::enforce_limit(sql, max_rows, "LIMIT");
        debug!("clickhouse: executing: {}", sql);

        let payload = self.run(&sql, &[], timeout).await?;
        Ok(shape_result(&payload, max_rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_adapter_identity() {
        let adapter = ClickHouseAdapter::new();
        assert_eq!(adapter.database_type(), DatabaseType::ClickHouse);
        assert!(adapter.sql_dialect().contains("Nullable"));
    }

    #[test]
    fn test_dialect_validation() {
        let adapter = ClickHouseAdapter::new();
        assert!(adapter.validate_query("SELECT count() FROM hits").is_ok());
        assert!(
            adapter
                .validate_query("SELECT * FROM url('http://evil/x.csv', 'CSV')")
                .is_err()
        );
        assert!(
            adapter
                .validate_query("SELECT * FROM remote('evil:9000', system.one)")
                .is_err()
        );
        assert!(
            adapter
                .validate_query("SELECT * FROM mysql('evil:3306', 'db', 't', 'u', 'p')")
                .is_err()
        );
    }

    #[test]
    fn test_shape_result_preserves_meta_order_and_caps() {
        let payload = json!({
            "meta": [{"name": "b", "type": "String"}, {"name": "a", "type": "UInt8"}],
            "data": [
                {"a": 1, "b": "x"},
                {"a": 2, "b": "y"},
                {"a": 3, "b": "z"}
            ],
            "rows": 3
        });
        let result = shape_result(&payload, 2);
        assert_eq!(result.columns, vec!["b", "a"]);
        assert_eq!(result.row_count, 2);
        assert!(result.truncated);
        assert_eq!(result.rows[0], vec![json!("x"), json!(1)]);
    }

    #[test]
    fn test_shape_result_empty_payload() {
        let result = shape_result(&json!({"meta": [], "data": [], "rows": 0}), 10);
        assert_eq!(result.row_count, 0);
        assert!(!result.truncated);
    }
}
