use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

fn default_max_rows() -> u32 {
    500
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_schema_table_cap() -> usize {
    40
}

/// TLS requirement for a backend connection, mapped to each driver's
/// native ssl-mode option.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SslMode {
    Disable,
    #[default]
    Prefer,
    Require,
}

/// How to reach one backend instance, plus the safety ceilings every query
/// against it must respect. Supplied fresh on each `get_adapter` call; the
/// router keeps it only for as long as it takes to connect.
///
/// For SQLite `host` is the database file path and `port` is ignored.
#[derive(Clone, Deserialize)]
pub struct ConnectionConfig {
    pub host: String,
    #[serde(default)]
    pub port: u16,
    pub database: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub ssl_mode: SslMode,
    #[serde(default = "default_max_rows")]
    pub max_rows: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_schema_table_cap")]
    pub schema_table_cap: usize,
}

impl ConnectionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Clamp per-call overrides to the configured ceilings. Callers cannot
    /// raise either bound above what the connection allows.
    pub fn effective_limits(&self, opts: &QueryOptions) -> (u32, Duration) {
        let max_rows = opts
            .max_rows
            .map(|r| r.min(self.max_rows))
            .unwrap_or(self.max_rows);
        let timeout_secs = opts
            .timeout_secs
            .map(|t| t.min(self.timeout_secs))
            .unwrap_or(self.timeout_secs);
        (max_rows.max(1), Duration::from_secs(timeout_secs.max(1)))
    }
}

// Passwords must never reach a log line, so Debug redacts them.
impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"***")
            .field("ssl_mode", &self.ssl_mode)
            .field("max_rows", &self.max_rows)
            .field("timeout_secs", &self.timeout_secs)
            .field("schema_table_cap", &self.schema_table_cap)
            .finish()
    }
}

/// Per-call overrides for row cap and deadline. Clamped by the adapter to
/// the connection's configured ceilings, never trusted as-is.
#[derive(Clone, Copy, Debug, Default, Deserialize)]
pub struct QueryOptions {
    pub max_rows: Option<u32>,
    pub timeout_secs: Option<u64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    /// Declared type as the backend spells it (`bigint`, `Nullable(String)`, ...).
    pub data_type: String,
    pub nullable: bool,
    pub primary_key: bool,
    pub comment: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TableInfo {
    pub name: String,
    pub schema: Option<String>,
    pub columns: Vec<ColumnInfo>,
    /// Estimate where the backend only keeps statistics; `None` means
    /// unknown, not zero.
    pub approx_rows: Option<u64>,
}

/// One introspection pass over a connection's catalog. `tables` and `ddl`
/// are always derived from the same pass.
#[derive(Clone, Debug)]
pub struct SchemaInfo {
    pub tables: Vec<TableInfo>,
    pub ddl: String,
    pub captured_at: DateTime<Utc>,
}

/// Materialized query output. `rows.len()` always equals `row_count` and
/// never exceeds the enforced cap; `truncated` is set when the backend had
/// more rows than the cap allowed through. On the sqlx backends `columns`
/// is empty when no row came back, since those drivers only surface column
/// metadata on fetched rows.
#[derive(Clone, Debug, Default)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub row_count: usize,
    pub truncated: bool,
}

impl QueryResult {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>, truncated: bool) -> Self {
        let row_count = rows.len();
        Self {
            columns,
            rows,
            row_count,
            truncated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ConnectionConfig {
        ConnectionConfig {
            host: "localhost".into(),
            port: 5432,
            database: "app".into(),
            username: "reader".into(),
            password: "hunter2".into(),
            ssl_mode: SslMode::Prefer,
            max_rows: 500,
            timeout_secs: 30,
            schema_table_cap: 40,
        }
    }

    #[test]
    fn test_effective_limits_clamp_to_ceiling() {
        let cfg = config();
        let opts = QueryOptions {
            max_rows: Some(10_000),
            timeout_secs: Some(600),
        };
        let (rows, timeout) = cfg.effective_limits(&opts);
        assert_eq!(rows, 500);
        assert_eq!(timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_effective_limits_lower_override_wins() {
        let cfg = config();
        let opts = QueryOptions {
            max_rows: Some(25),
            timeout_secs: Some(5),
        };
        assert_eq!(cfg.effective_limits(&opts), (25, Duration::from_secs(5)));
    }

    #[test]
    fn test_effective_limits_defaults_to_config() {
        let cfg = config();
        assert_eq!(
            cfg.effective_limits(&QueryOptions::default()),
            (500, Duration::from_secs(30))
        );
    }

    #[test]
    fn test_debug_redacts_password() {
        let rendered = format!("{:?}", config());
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("***"));
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let cfg: ConnectionConfig = serde_json::from_str(
            r#"{"host": "db.internal", "port": 3306, "database": "shop"}"#,
        )
        .unwrap();
        assert_eq!(cfg.max_rows, 500);
        assert_eq!(cfg.timeout_secs, 30);
        assert_eq!(cfg.schema_table_cap, 40);
        assert_eq!(cfg.ssl_mode, SslMode::Prefer);
    }
}
