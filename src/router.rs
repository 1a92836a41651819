//! Connection router
//!
//! Keyed pool of live adapters. Lookups reuse a pooled adapter while its
//! health check passes; an unhealthy incumbent is closed exactly once and
//! replaced by exactly one fresh connect per call. Pooling is keyed by the
//! caller's opaque connection identity rather than by config, so rotated
//! credentials self-heal on the next health-check failure instead of
//! needing explicit invalidation.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, warn};
use tokio::sync::{Mutex, RwLock};

use crate::adapter::{AdapterRegistry, DatabaseAdapter};
use crate::errors::DbError;
use crate::models::enums::DatabaseType;
use crate::models::structs::ConnectionConfig;

/// One pooled identity. The slot mutex serializes health-check, eviction,
/// and connect for a single identity; distinct identities never share a
/// slot, so slow connects do not block each other.
type Slot = Arc<Mutex<Option<Arc<dyn DatabaseAdapter>>>>;

/// Owns the pool map and the factory registry. A plain value, not a
/// process-wide singleton: tests run several routers side by side.
pub struct ConnectionRouter {
    registry: AdapterRegistry,
    pool: RwLock<HashMap<String, Slot>>,
}

impl ConnectionRouter {
    pub fn new(registry: AdapterRegistry) -> Self {
        Self {
            registry,
            pool: RwLock::new(HashMap::new()),
        }
    }

    /// Router over every built-in backend.
    pub fn with_defaults() -> Self {
        Self::new(AdapterRegistry::with_defaults())
    }

    /// Swap in a factory, e.g. a scripted adapter in tests. Last
    /// registration for a type wins.
    pub fn register_adapter(
        &mut self,
        db_type: DatabaseType,
        factory: crate::adapter::AdapterFactory,
    ) {
        self.registry.register(db_type, factory);
    }

    pub fn supported_backends(&self) -> Vec<DatabaseType> {
        self.registry.supported()
    }

    /// Return a connected adapter for `connection_id`, reusing the pooled
    /// one when it is healthy and otherwise evicting it and connecting a
    /// fresh instance. The map lock is only held to fetch or insert the
    /// identity's slot, never across I/O.
    pub async fn get_adapter(
        &self,
        connection_id: &str,
        db_type: DatabaseType,
        config: &ConnectionConfig,
    ) -> Result<Arc<dyn DatabaseAdapter>, DbError> {
        let slot = self.slot_for(connection_id).await;
        let mut guard = slot.lock().await;

        if let Some(adapter) = guard.take() {
            if adapter.database_type() == db_type && adapter.health_check().await.is_ok() {
                debug!("reusing pooled {} adapter for {}", db_type, connection_id);
                *guard = Some(adapter.clone());
                return Ok(adapter);
            }
            // Stale or repointed to a different backend: evict once.
            debug!(
                "evicting unhealthy {} adapter for {}",
                adapter.database_type(),
                connection_id
            );
            if let Err(e) = adapter.close().await {
                warn!("failed to close stale adapter for {}: {}", connection_id, e);
            }
        }

        let mut fresh = self.registry.create(db_type)?;
        fresh.connect(config).await?;
        let fresh: Arc<dyn DatabaseAdapter> = Arc::from(fresh);
        *guard = Some(fresh.clone());
        debug!("connected new {} adapter for {}", db_type, connection_id);
        Ok(fresh)
    }

    /// Remove and close one pooled adapter; no-op if the identity is not
    /// pooled. Invoked when the upstream connection record is deleted.
    pub async fn close_connection(&self, connection_id: &str) {
        let slot = {
            let mut pool = self.pool.write().await;
            pool.remove(connection_id)
        };
        if let Some(slot) = slot
            && let Some(adapter) = slot.lock().await.take()
            && let Err(e) = adapter.close().await
        {
            warn!("failed to close adapter for {}: {}", connection_id, e);
        }
    }

    /// Drain and close every pooled adapter. Intended for process shutdown.
    pub async fn close_all(&self) {
        let slots: Vec<(String, Slot)> = {
            let mut pool = self.pool.write().await;
            pool.drain().collect()
        };
        for (connection_id, slot) in slots {
            if let Some(adapter) = slot.lock().await.take()
                && let Err(e) = adapter.close().await
            {
                warn!("failed to close adapter for {}: {}", connection_id, e);
            }
        }
    }

    /// Number of identities currently pooled (connected or pending).
    pub async fn pooled_count(&self) -> usize {
        self.pool.read().await.len()
    }

    async fn slot_for(&self, connection_id: &str) -> Slot {
        {
            let pool = self.pool.read().await;
            if let Some(slot) = pool.get(connection_id) {
                return slot.clone();
            }
        }
        let mut pool = self.pool.write().await;
        pool.entry(connection_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }
}
