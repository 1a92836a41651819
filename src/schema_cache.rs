//! Schema cache boundary
//!
//! Introspection results are cacheable per connection identity. The cache
//! itself is a collaborator outside this core (a deployment may back it
//! with Redis); only the trait seam plus an in-process implementation used
//! by tests live here.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::models::structs::SchemaInfo;

#[async_trait]
pub trait SchemaCache: Send + Sync {
    async fn get(&self, connection_id: &str) -> Option<SchemaInfo>;
    async fn set(&self, connection_id: &str, schema: SchemaInfo);
    async fn invalidate(&self, connection_id: &str);
}

/// Process-local cache keyed by connection identity.
#[derive(Default)]
pub struct MemorySchemaCache {
    entries: RwLock<HashMap<String, SchemaInfo>>,
}

impl MemorySchemaCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SchemaCache for MemorySchemaCache {
    async fn get(&self, connection_id: &str) -> Option<SchemaInfo> {
        self.entries
            .read()
            .ok()
            .and_then(|map| map.get(connection_id).cloned())
    }

    async fn set(&self, connection_id: &str, schema: SchemaInfo) {
        if let Ok(mut map) = self.entries.write() {
            map.insert(connection_id.to_string(), schema);
        }
    }

    async fn invalidate(&self, connection_id: &str) {
        if let Ok(mut map) = self.entries.write() {
            map.remove(connection_id);
        }
    }
}
