//! sqlgate — database adapter router and SQL safety gateway.
//!
//! An upstream caller submits machine-generated SQL (or, for document
//! stores, a JSON command document) against one of several heterogeneous
//! backends. This crate guarantees the statement is read-only, bounded in
//! row count, and free of known exfiltration patterns, while reusing live
//! backend handles across requests:
//!
//! - [`safety`]: pure validation over the query text, no I/O.
//! - [`adapter`]: the per-backend contract plus the factory registry.
//! - [`driver_postgres`] / [`driver_mysql`] / [`driver_sqlite`] /
//!   [`driver_clickhouse`] / [`driver_mongodb`]: one adapter per backend
//!   family.
//! - [`router`]: the keyed pool that health-checks, reuses, and recreates
//!   adapters per connection identity.

pub mod adapter;
pub mod errors;
pub mod models;
pub mod router;
pub mod safety;
pub mod schema;
pub mod schema_cache;

pub mod driver_clickhouse;
pub mod driver_mongodb;
pub mod driver_mysql;
pub mod driver_postgres;
pub mod driver_sqlite;

pub use adapter::{AdapterFactory, AdapterRegistry, DatabaseAdapter};
pub use errors::{DbError, ValidationError};
pub use models::enums::DatabaseType;
pub use models::structs::{
    ColumnInfo, ConnectionConfig, QueryOptions, QueryResult, SchemaInfo, SslMode, TableInfo,
};
pub use router::ConnectionRouter;
pub use schema_cache::{MemorySchemaCache, SchemaCache};
