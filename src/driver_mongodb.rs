//! MongoDB adapter
//!
//! MongoDB has no SQL; the "query" here is a JSON command document, e.g.
//! `{"find": "users", "filter": {"active": true}}`. Safety flips from a
//! blocklist to an allowlist: only read-only command verbs run, and
//! aggregate pipelines are scanned for the write stages `$out`/`$merge`.
//! Results are shaped like SQL output, with headers taken from the first
//! document.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::TryStreamExt;
use log::{debug, warn};
use mongodb::bson::{Bson, Document, doc};
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde_json::Value;

use crate::adapter::DatabaseAdapter;
use crate::errors::{DbError, ValidationError};
use crate::models::enums::DatabaseType;
use crate::models::structs::{ColumnInfo, ConnectionConfig, QueryOptions, QueryResult, TableInfo};

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);
const SAMPLE_SIZE: i64 = 20;

/// Server commands that only read. Everything else is rejected up front.
const READ_ONLY_COMMANDS: &[&str] = &[
    "find",
    "aggregate",
    "count",
    "distinct",
    "listCollections",
    "listIndexes",
    "collStats",
    "dbStats",
];

const DIALECT: &str = "MongoDB command documents, not SQL. Send a single JSON object whose \
command verb is one of: find, aggregate, count, distinct, listCollections, listIndexes, \
collStats, dbStats. Examples: {\"find\": \"users\", \"filter\": {\"active\": true}, \
\"projection\": {\"name\": 1}, \"sort\": {\"created_at\": -1}, \"limit\": 20} or \
{\"aggregate\": \"orders\", \"pipeline\": [{\"$match\": {...}}, {\"$group\": {...}}]}. \
Filters use operators like $eq, $gt, $in, $regex. Aggregate $out and $merge stages are \
rejected.";

pub struct MongoAdapter {
    client: Option<mongodb::Client>,
    config: Option<ConnectionConfig>,
    closed: AtomicBool,
}

/// Parse the query text into (verb, full object). Exactly one allowlisted
/// verb key must be present; its position in the JSON does not matter
/// because the server command is rebuilt verb-first.
fn parse_command(text: &str) -> Result<(String, serde_json::Map<String, Value>), ValidationError> {
    let value: Value = serde_json::from_str(text.trim())
        .map_err(|e| ValidationError::InvalidCommand(e.to_string()))?;
    let Value::Object(obj) = value else {
        return Err(ValidationError::InvalidCommand(
            "expected a JSON object".to_string(),
        ));
    };
    if obj.is_empty() {
        return Err(ValidationError::EmptyQuery);
    }

    let mut verbs = obj
        .keys()
        .filter(|k| READ_ONLY_COMMANDS.contains(&k.as_str()));
    let verb = match (verbs.next(), verbs.next()) {
        (Some(verb), None) => verb.clone(),
        (Some(_), Some(_)) => {
            return Err(ValidationError::InvalidCommand(
                "more than one command verb in document".to_string(),
            ));
        }
        (None, _) => {
            // Report the verb the caller presumably meant: any key that is
            // not an obvious option field.
            let attempted = obj.keys().next().cloned().unwrap_or_default();
            return Err(ValidationError::CommandNotAllowed(attempted));
        }
    };

    if verb == "aggregate" {
        let pipeline = obj.get("pipeline").cloned().unwrap_or(Value::Array(vec![]));
        reject_write_stages(&pipeline)?;
    }

    Ok((verb, obj))
}

/// `$out` and `$merge` write to collections; they can hide inside
/// sub-pipelines ($lookup, $facet, $unionWith), so scan recursively.
fn reject_write_stages(value: &Value) -> Result<(), ValidationError> {
    match value {
        Value::Object(map) => {
            for (key, inner) in map {
                if key == "$out" || key == "$merge" {
                    return Err(ValidationError::CommandNotAllowed(key.clone()));
                }
                reject_write_stages(inner)?;
            }
            Ok(())
        }
        Value::Array(items) => {
            for item in items {
                reject_write_stages(item)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn json_to_bson(value: &Value) -> Result<Bson, DbError> {
    mongodb::bson::to_bson(value).map_err(|e| DbError::Execution(e.to_string()))
}

fn bson_to_json(value: &Bson) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn bson_type_name(value: &Bson) -> &'static str {
    match value {
        Bson::Double(_) => "double",
        Bson::String(_) => "string",
        Bson::Array(_) => "array",
        Bson::Document(_) => "object",
        Bson::Boolean(_) => "bool",
        Bson::Null => "null",
        Bson::Int32(_) => "int",
        Bson::Int64(_) => "long",
        Bson::Timestamp(_) => "timestamp",
        Bson::DateTime(_) => "date",
        Bson::ObjectId(_) => "objectId",
        Bson::Decimal128(_) => "decimal",
        Bson::Binary(_) => "binData",
        _ => "mixed",
    }
}

/// Rows shaped the way the SQL adapters shape them: headers from the first
/// document, missing fields as NULL.
fn docs_to_result(docs: &[Document], max_rows: u32, more_available: bool) -> QueryResult {
    let columns: Vec<String> = docs
        .first()
        .map(|d| d.keys().map(|k| k.to_string()).collect())
        .unwrap_or_default();
    let truncated = more_available || docs.len() as u32 > max_rows;
    let rows: Vec<Vec<Value>> = docs
        .iter()
        .take(max_rows as usize)
        .map(|d| {
            columns
                .iter()
                .map(|col| d.get(col).map(bson_to_json).unwrap_or(Value::Null))
                .collect()
        })
        .collect();
    QueryResult::new(columns, rows, truncated)
}

impl MongoAdapter {
    pub fn new() -> Self {
        Self {
            client: None,
            config: None,
            closed: AtomicBool::new(false),
        }
    }

    fn handles(&self) -> Result<(&mongodb::Client, &ConnectionConfig), DbError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DbError::Closed);
        }
        match (self.client.as_ref(), self.config.as_ref()) {
            (Some(client), Some(config)) => Ok((client, config)),
            _ => Err(DbError::NotConnected),
        }
    }

    fn database(&self) -> Result<(mongodb::Database, &ConnectionConfig), DbError> {
        let (client, config) = self.handles()?;
        Ok((client.database(&config.database), config))
    }

    /// Rebuild the caller's document as a server command: verb first (the
    /// server requires it), then the remaining options, then the row-cap
    /// fields.
    fn build_command(
        verb: &str,
        obj: &serde_json::Map<String, Value>,
        max_rows: u32,
    ) -> Result<Document, DbError> {
        let mut cmd = Document::new();
        let target = obj.get(verb).cloned().unwrap_or(Value::Null);
        cmd.insert(verb, json_to_bson(&target)?);
        for (key, value) in obj {
            if key != verb {
                cmd.insert(key, json_to_bson(value)?);
            }
        }

        match verb {
            "find" => {
                // The server reads limit 0 as "no limit", so zero and
                // negative values count as absent and fall back to the cap.
                let requested = cmd
                    .get("limit")
                    .and_then(|b| match b {
                        Bson::Int32(n) => Some(*n as i64),
                        Bson::Int64(n) => Some(*n),
                        Bson::Double(f) => Some(*f as i64),
                        _ => None,
                    })
                    .filter(|n| *n > 0)
                    .unwrap_or(i64::MAX);
                cmd.insert("limit", (max_rows as i64).min(requested));
                cmd.insert("batchSize", max_rows as i64);
            }
            "aggregate" => {
                let mut pipeline = match cmd.get_array("pipeline") {
                    Ok(stages) => stages.clone(),
                    Err(_) => Vec::new(),
                };
                pipeline.push(Bson::Document(doc! { "$limit": max_rows as i64 }));
                cmd.insert("pipeline", pipeline);
                if !cmd.contains_key("cursor") {
                    cmd.insert("cursor", doc! { "batchSize": max_rows as i64 });
                }
            }
            _ => {}
        }
        Ok(cmd)
    }
}

impl Default for MongoAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatabaseAdapter for MongoAdapter {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::MongoDB
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
        let uri = if config.username.is_empty() {
            format!("mongodb://{}:{}/", config.host, config.port)
        } else {
            format!(
                "mongodb://{}:{}@{}:{}/?authSource=admin",
                utf8_percent_encode(&config.username, NON_ALPHANUMERIC),
                utf8_percent_encode(&config.password, NON_ALPHANUMERIC),
                config.host,
                config.port
            )
        };
        let client = mongodb::Client::with_uri_str(&uri)
            .await
            .map_err(|e| DbError::Connect(e.to_string()))?;

        // The driver connects lazily; ping to fail fast on a bad host or
        // bad credentials.
        tokio::time::timeout(
            config.timeout(),
            client.database(&config.database).run_command(doc! { "ping": 1 }),
        )
        .await
        .map_err(|_| DbError::Timeout(config.timeout()))?
        .map_err(|e| DbError::Connect(e.to_string()))?;

        debug!("mongodb: connected to {}:{}", config.host, config.port);
        self.client = Some(client);
        self.config = Some(config.clone());
        Ok(())
    }

    async fn close(&self) -> Result<(), DbError> {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(client) = self.client.clone() {
            client.shutdown().await;
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<(), DbError> {
        let (db, _) = self.database()?;
        tokio::time::timeout(HEALTH_CHECK_TIMEOUT, db.run_command(doc! { "ping": 1 }))
            .await
            .map_err(|_| DbError::Timeout(HEALTH_CHECK_TIMEOUT))?
            .map_err(|e| DbError::Execution(e.to_string()))?;
        Ok(())
    }

    async fn list_tables(&self) -> Result<Vec<String>, DbError> {
        let (db, config) = self.database()?;
        let mut names = tokio::time::timeout(config.timeout(), db.list_collection_names())
            .await
            .map_err(|_| DbError::Timeout(config.timeout()))?
            .map_err(|e| DbError::Execution(e.to_string()))?;
        names.sort();
        Ok(names)
    }

    async fn describe_table(&self, table: &str) -> Result<TableInfo, DbError> {
        let (db, config) = self.database()?;
        if !self.list_tables().await?.iter().any(|n| n == table) {
            return Err(DbError::NotFound(table.to_string()));
        }

        let collection = db.collection::<Document>(table);
        let docs: Vec<Document> = tokio::time::timeout(config.timeout(), async {
            let cursor = collection.find(doc! {}).limit(SAMPLE_SIZE).await?;
            cursor.try_collect().await
        })
        .await
        .map_err(|_| DbError::Timeout(config.timeout()))?
        .map_err(|e: mongodb::error::Error| DbError::Execution(e.to_string()))?;

        // Collections are schemaless; infer field shape from a sample.
        // A field absent from some sampled document counts as nullable.
        let mut fields: Vec<(String, &'static str)> = Vec::new();
        for document in &docs {
            for (key, value) in document {
                if !fields.iter().any(|(name, _)| name == key) {
                    fields.push((key.clone(), bson_type_name(value)));
                }
            }
        }
        let columns = fields
            .into_iter()
            .map(|(name, data_type)| ColumnInfo {
                primary_key: name == "_id",
                nullable: docs.iter().any(|d| !d.contains_key(&name)),
                name,
                data_type: data_type.to_string(),
                comment: None,
            })
            .collect();

        let estimate = tokio::time::timeout(
            config.timeout(),
            collection.estimated_document_count(),
        )
        .await
        .map_err(|_| DbError::Timeout(config.timeout()))?
        .ok();

        Ok(TableInfo {
            name: table.to_string(),
            schema: Some(config.database.clone()),
            columns,
            approx_rows: estimate,
        })
    }

    fn validate_query(&self, sql: &str) -> Result<(), ValidationError> {
        parse_command(sql).map(|_| ())
    }

    async fn execute_query(
        &self,
        sql: &str,
        opts: &QueryOptions,
    ) -> Result<QueryResult, DbError> {
        let (db, config) = self.database()?;
        let (verb, obj) = parse_command(sql)?;

        let (max_rows, timeout) = config.effective_limits(opts);
        let cmd = Self::build_command(&verb, &obj, max_rows)?;
        debug!("mongodb: running {} command", verb);

        let reply = tokio::time::timeout(timeout, db.run_command(cmd))
            .await
            .map_err(|_| DbError::Timeout(timeout))?
            .map_err(|e| DbError::Execution(e.to_string()))?;

        if let Ok(cursor) = reply.get_document("cursor") {
            let batch = cursor
                .get_array("firstBatch")
                .map_err(|e| DbError::Execution(e.to_string()))?;
            let docs: Vec<Document> = batch
                .iter()
                .filter_map(|b| b.as_document().cloned())
                .collect();
            let cursor_id = cursor.get_i64("id").unwrap_or(0);
            if cursor_id != 0 {
                // We never getMore past the cap; release the server cursor.
                if let Some(Bson::String(target)) = cmd_target(&verb, &obj)
                    && let Err(e) = db
                        .run_command(doc! { "killCursors": target, "cursors": [cursor_id] })
                        .await
                {
                    warn!("mongodb: failed to kill cursor {}: {}", cursor_id, e);
                }
            }
            return Ok(docs_to_result(&docs, max_rows, cursor_id != 0));
        }

        if let Ok(values) = reply.get_array("values") {
            let rows: Vec<Vec<Value>> = values
                .iter()
                .take(max_rows as usize)
                .map(|v| vec![bson_to_json(v)])
                .collect();
            let truncated = values.len() as u32 > max_rows;
            return Ok(QueryResult::new(vec!["value".to_string()], rows, truncated));
        }

        // Scalar replies (count, dbStats, collStats): one row, the reply's
        // own fields minus the wire-status noise.
        let mut document = reply.clone();
        document.remove("ok");
        document.remove("$clusterTime");
        document.remove("operationTime");
        Ok(docs_to_result(std::slice::from_ref(&document), max_rows, false))
    }
}

fn cmd_target(verb: &str, obj: &serde_json::Map<String, Value>) -> Option<Bson> {
    obj.get(verb).and_then(|v| json_to_bson(v).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_identity() {
        let adapter = MongoAdapter::new();
        assert_eq!(adapter.database_type(), DatabaseType::MongoDB);
        assert!(adapter.sql_dialect().contains("command"));
    }

    #[test]
    fn test_allowlisted_commands_pass() {
        let adapter = MongoAdapter::new();
        assert!(
            adapter
                .validate_query(r#"{"find": "users", "filter": {"active": true}}"#)
                .is_ok()
        );
        assert!(
            adapter
                .validate_query(
                    r#"{"aggregate": "orders", "pipeline": [{"$match": {"total": {"$gt": 10}}}]}"#
                )
                .is_ok()
        );
        assert!(adapter.validate_query(r#"{"listCollections": 1}"#).is_ok());
        assert!(
            adapter
                .validate_query(r#"{"distinct": "users", "key": "country"}"#)
                .is_ok()
        );
    }

    #[test]
    fn test_write_commands_rejected() {
        let adapter = MongoAdapter::new();
        for cmd in [
            r#"{"insert": "users", "documents": [{}]}"#,
            r#"{"delete": "users", "deletes": []}"#,
            r#"{"drop": "users"}"#,
            r#"{"findAndModify": "users"}"#,
        ] {
            assert!(
                matches!(
                    adapter.validate_query(cmd),
                    Err(ValidationError::CommandNotAllowed(_))
                ),
                "{cmd}"
            );
        }
    }

    #[test]
    fn test_aggregate_write_stages_rejected() {
        let adapter = MongoAdapter::new();
        assert!(matches!(
            adapter.validate_query(
                r#"{"aggregate": "a", "pipeline": [{"$match": {}}, {"$out": "stolen"}]}"#
            ),
            Err(ValidationError::CommandNotAllowed(stage)) if stage == "$out"
        ));
        // $merge hidden inside a $facet sub-pipeline.
        assert!(
            adapter
                .validate_query(
                    r#"{"aggregate": "a", "pipeline": [{"$facet": {"x": [{"$merge": {"into": "t"}}]}}]}"#
                )
                .is_err()
        );
    }

    #[test]
    fn test_malformed_documents_rejected() {
        let adapter = MongoAdapter::new();
        assert!(matches!(
            adapter.validate_query("SELECT * FROM users"),
            Err(ValidationError::InvalidCommand(_))
        ));
        assert!(matches!(
            adapter.validate_query("{}"),
            Err(ValidationError::EmptyQuery)
        ));
        assert!(matches!(
            adapter.validate_query(r#"{"find": "a", "count": "b"}"#),
            Err(ValidationError::InvalidCommand(_))
        ));
    }

    #[test]
    fn test_build_command_clamps_find_limit() {
        let (verb, obj) =
            parse_command(r#"{"find": "users", "limit": 10000, "filter": {}}"#).unwrap();
        let cmd = MongoAdapter::build_command(&verb, &obj, 50).unwrap();
        assert_eq!(cmd.get_i64("limit").unwrap(), 50);
        assert_eq!(cmd.get_i64("batchSize").unwrap(), 50);
        // Verb must be the first key on the wire.
        let first_key = cmd.iter().next().map(|(k, _)| k.clone()).unwrap();
        assert_eq!(first_key, "find");
    }

    #[test]
    fn test_build_command_keeps_smaller_find_limit() {
        let (verb, obj) = parse_command(r#"{"find": "users", "limit": 5}"#).unwrap();
        let cmd = MongoAdapter::build_command(&verb, &obj, 50).unwrap();
        assert_eq!(cmd.get_i64("limit").unwrap(), 5);
    }

    #[test]
    fn test_build_command_treats_zero_find_limit_as_absent() {
        let (verb, obj) = parse_command(r#"{"find": "users", "limit": 0}"#).unwrap();
        let cmd = MongoAdapter::build_command(&verb, &obj, 50).unwrap();
        assert_eq!(cmd.get_i64("limit").unwrap(), 50);
    }

    #[test]
    fn test_build_command_appends_aggregate_limit() {
        let (verb, obj) = parse_command(
            r#"{"aggregate": "orders", "pipeline": [{"$match": {}}]}"#,
        )
        .unwrap();
        let cmd = MongoAdapter::build_command(&verb, &obj, 25).unwrap();
        let pipeline = cmd.get_array("pipeline").unwrap();
        let last = pipeline.last().unwrap().as_document().unwrap();
        assert_eq!(last.get_i64("$limit").unwrap(), 25);
        assert!(cmd.contains_key("cursor"));
    }

    #[test]
    fn test_docs_to_result_headers_and_cap() {
        let docs = vec![
            doc! { "_id": 1, "name": "a" },
            doc! { "_id": 2, "name": "b" },
            doc! { "_id": 3, "name": "c" },
        ];
        let result = docs_to_result(&docs, 2, false);
        assert_eq!(result.columns, vec!["_id", "name"]);
        assert_eq!(result.row_count, 2);
        assert!(result.truncated);
    }
}
