//! Database-agnostic adapter contract and factory registry
//!
//! Every backend family implements [`DatabaseAdapter`] once; the registry
//! maps a [`DatabaseType`] to a constructor producing an unconnected
//! instance. The router drives the lifecycle: construct, `connect`, reuse
//! while healthy, `close` and recreate on failure.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;

use crate::errors::{DbError, ValidationError};
use crate::models::enums::DatabaseType;
use crate::models::structs::{
    ConnectionConfig, QueryOptions, QueryResult, SchemaInfo, TableInfo,
};
use crate::schema;

/// One live backend session behind a uniform surface.
///
/// Lifecycle is `Unconnected → Connected → Closed`, driven externally:
/// `connect` is the only way in, `close` is terminal, and an instance is
/// never re-connected in place — discard and build a fresh one instead.
/// Every operation other than `connect`/`close` fails fast with
/// [`DbError::NotConnected`] or [`DbError::Closed`] outside the connected
/// state.
#[async_trait]
pub trait DatabaseAdapter: Send + Sync {
    /// Stable identifier, also the registry key.
    fn database_type(&self) -> DatabaseType;

    /// Prose hints about this backend's SQL idioms (quoting, pagination,
    /// date handling, NULL semantics) for LLM prompt construction. Pure
    /// data, no behavior.
    fn sql_dialect(&self) -> &'static str;

    /// Catalog objects to render in full in the schema DDL before falling
    /// back to a names-only manifest.
    fn schema_table_cap(&self) -> usize;

    /// Establish the backend handle and ping it. Success means the handle
    /// is immediately usable. Calling this on an already-connected
    /// instance is not supported; recreate instead.
    async fn connect(&mut self, config: &ConnectionConfig) -> Result<(), DbError>;

    /// Release all resources. Safe to call on an instance whose `connect`
    /// never succeeded.
    async fn close(&self) -> Result<(), DbError>;

    /// Cheap liveness probe, used by the router to decide reuse vs.
    /// recreation.
    async fn health_check(&self) -> Result<(), DbError>;

    /// Name-only listing of the configured database's tables/collections.
    async fn list_tables(&self) -> Result<Vec<String>, DbError>;

    /// Full column shape for one object; `NotFound` if the name does not
    /// resolve in the configured database.
    async fn describe_table(&self, table: &str) -> Result<TableInfo, DbError>;

    /// Validate a statement against this backend's dialect rules without
    /// executing it.
    fn validate_query(&self, sql: &str) -> Result<(), ValidationError>;

    /// Validate, cap, and run one statement. The row cap and deadline from
    /// `opts` are clamped to the connection's ceilings before use.
    async fn execute_query(&self, sql: &str, opts: &QueryOptions)
    -> Result<QueryResult, DbError>;

    /// One full introspection pass: table shapes plus the rendered DDL
    /// text, stamped with the capture time.
    async fn schema_info(&self) -> Result<SchemaInfo, DbError> {
        let names = self.list_tables().await?;
        let mut tables = Vec::with_capacity(names.len());
        for name in &names {
            tables.push(self.describe_table(name).await?);
        }
        let ddl = schema::render_ddl(&tables, self.schema_table_cap());
        Ok(SchemaInfo {
            tables,
            ddl,
            captured_at: Utc::now(),
        })
    }

    /// LLM-friendly textual rendering of the whole catalog.
    async fn schema_ddl(&self) -> Result<String, DbError> {
        Ok(self.schema_info().await?.ddl)
    }
}

/// Constructor for an unconnected adapter.
pub type AdapterFactory = Box<dyn Fn() -> Box<dyn DatabaseAdapter> + Send + Sync>;

/// Maps backend types to adapter constructors.
///
/// The last registration for a type wins, which lets tests swap a real
/// backend for a scripted one.
pub struct AdapterRegistry {
    factories: HashMap<DatabaseType, AdapterFactory>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register(&mut self, db_type: DatabaseType, factory: AdapterFactory) {
        self.factories.insert(db_type, factory);
    }

    pub fn create(&self, db_type: DatabaseType) -> Result<Box<dyn DatabaseAdapter>, DbError> {
        self.factories
            .get(&db_type)
            .map(|f| f())
            .ok_or_else(|| DbError::UnsupportedBackend(db_type.to_string()))
    }

    pub fn supported(&self) -> Vec<DatabaseType> {
        let mut types: Vec<_> = self.factories.keys().copied().collect();
        types.sort_by_key(|t| t.as_str());
        types
    }

    /// Registry with every built-in backend.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(
            DatabaseType::PostgreSQL,
            Box::new(|| Box::new(crate::driver_postgres::PostgresAdapter::new())),
        );
        registry.register(
            DatabaseType::MySQL,
            Box::new(|| Box::new(crate::driver_mysql::MySqlAdapter::new())),
        );
        registry.register(
            DatabaseType::SQLite,
            Box::new(|| Box::new(crate::driver_sqlite::SqliteAdapter::new())),
        );
        registry.register(
            DatabaseType::ClickHouse,
            Box::new(|| Box::new(crate::driver_clickhouse::ClickHouseAdapter::new())),
        );
        registry.register(
            DatabaseType::MongoDB,
            Box::new(|| Box::new(crate::driver_mongodb::MongoAdapter::new())),
        );
        registry
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_all_backends() {
        let registry = AdapterRegistry::with_defaults();
        assert_eq!(
            registry.supported(),
            vec![
                DatabaseType::ClickHouse,
                DatabaseType::MongoDB,
                DatabaseType::MySQL,
                DatabaseType::PostgreSQL,
                DatabaseType::SQLite,
            ]
        );
    }

    #[test]
    fn test_create_unregistered_type_fails() {
        let registry = AdapterRegistry::new();
        let err = registry
            .create(DatabaseType::PostgreSQL)
            .map(|_| ())
            .unwrap_err();
        match err {
            DbError::UnsupportedBackend(name) => assert_eq!(name, "postgres"),
            other => panic!("expected UnsupportedBackend, got {other}"),
        }
    }

    #[test]
    fn test_last_registration_wins() {
        let mut registry = AdapterRegistry::with_defaults();
        registry.register(
            DatabaseType::SQLite,
            Box::new(|| Box::new(crate::driver_sqlite::SqliteAdapter::new())),
        );
        assert_eq!(registry.supported().len(), 5);
        assert!(registry.create(DatabaseType::SQLite).is_ok());
    }
}
