//! Multi-tenant data routing.
//!
//! Every unit of work runs inside a task-local binding that names the
//! backing-store connection it must use. The process-wide descriptor
//! registry is the only cross-request shared mutable state; inserts are
//! idempotent so concurrent first-use races cost duplicate construction,
//! never corruption.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use once_cell::sync::Lazy;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;

use crate::config;
use crate::store::{KvStore, MasterStore, StoreError, TenantRecord};

/// Reserved app groupings that bypass per-tenant resolution.
pub const MASTER: &str = "master";
pub const QUEUE: &str = "queue";

#[derive(Debug, Error)]
pub enum TenantError {
    #[error("Unknown tenant: {0}")]
    UnknownTenant(String),

    #[error("Tenant {0} is missing connection parameters")]
    MissingConnectionParams(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One backing-store connection target. Immutable once constructed;
/// identical re-construction for the same tenant is harmless.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ConnectionDescriptor {
    pub database: String,
    pub host: String,
    pub user: String,
    pub password: String,
    pub port: u16,
}

impl ConnectionDescriptor {
    pub fn fixed(database: &str) -> Arc<Self> {
        Arc::new(Self {
            database: database.to_string(),
            host: "localhost".to_string(),
            user: String::new(),
            password: String::new(),
            port: 5432,
        })
    }

    fn from_record(record: &TenantRecord, database: String) -> Result<Self, TenantError> {
        let host = record
            .host
            .clone()
            .ok_or_else(|| TenantError::MissingConnectionParams(record.id.clone()))?;
        let user = record
            .user
            .clone()
            .ok_or_else(|| TenantError::MissingConnectionParams(record.id.clone()))?;
        let password = record
            .password
            .clone()
            .ok_or_else(|| TenantError::MissingConnectionParams(record.id.clone()))?;
        Ok(Self {
            database,
            host,
            user,
            password,
            port: record.port.unwrap_or(5432),
        })
    }
}

static DEFAULT_BINDING: Lazy<Arc<ConnectionDescriptor>> =
    Lazy::new(|| ConnectionDescriptor::fixed("default"));

tokio::task_local! {
    static ACTIVE_BINDING: Arc<ConnectionDescriptor>;
}

/// Runs `fut` with `descriptor` as the active binding. Concurrent units of
/// work each carry their own scope; one task's binding is never observable
/// from another.
pub async fn with_binding<F>(descriptor: Arc<ConnectionDescriptor>, fut: F) -> F::Output
where
    F: Future,
{
    ACTIVE_BINDING.scope(descriptor, fut).await
}

/// The binding of the current unit of work; the unbound default outside
/// any scope.
pub fn current() -> Arc<ConnectionDescriptor> {
    ACTIVE_BINDING
        .try_with(|d| d.clone())
        .unwrap_or_else(|_| DEFAULT_BINDING.clone())
}

/// Resolves tenant identifiers to connection descriptors, registering new
/// descriptors lazily.
pub struct TenantRouter {
    registry: RwLock<HashMap<String, Arc<ConnectionDescriptor>>>,
    master: Arc<dyn MasterStore>,
    kv: Arc<dyn KvStore>,
}

impl TenantRouter {
    pub fn new(master: Arc<dyn MasterStore>, kv: Arc<dyn KvStore>) -> Self {
        Self {
            registry: RwLock::new(HashMap::new()),
            master,
            kv,
        }
    }

    /// Fixed descriptors for reserved groupings; tenant resolution never
    /// applies to these.
    pub fn reserved(group: &str) -> Option<Arc<ConnectionDescriptor>> {
        match group {
            MASTER => Some(ConnectionDescriptor::fixed(MASTER)),
            QUEUE => Some(ConnectionDescriptor::fixed(QUEUE)),
            _ => None,
        }
    }

    pub fn unbound() -> Arc<ConnectionDescriptor> {
        DEFAULT_BINDING.clone()
    }

    /// Resolves a tenant id to its descriptor. Empty/absent ids get the
    /// unbound default. Registry misses fetch the tenant record from the
    /// master store, build the descriptor outside the lock, and register it
    /// idempotently; the descriptor is also published to the KV store so
    /// sibling processes can skip the derivation.
    pub async fn resolve(
        &self,
        tenant_id: Option<&str>,
    ) -> Result<Arc<ConnectionDescriptor>, TenantError> {
        let tenant_id = match tenant_id {
            None | Some("") => return Ok(Self::unbound()),
            Some(id) => id,
        };
        if let Some(fixed) = Self::reserved(tenant_id) {
            return Ok(fixed);
        }

        // Fast path: read lock only
        {
            let registry = self.registry.read().await;
            if let Some(descriptor) = registry.get(tenant_id) {
                return Ok(descriptor.clone());
            }
        }

        // Construct outside the lock; a lost race discards this copy
        let record = self
            .master
            .fetch_tenant(tenant_id)
            .await?
            .ok_or_else(|| TenantError::UnknownTenant(tenant_id.to_string()))?;
        let database = format!("{}_{}", config::config().tenant.db_prefix, tenant_id);
        let descriptor = Arc::new(ConnectionDescriptor::from_record(&record, database)?);

        let registered = {
            let mut registry = self.registry.write().await;
            registry
                .entry(tenant_id.to_string())
                .or_insert_with(|| descriptor.clone())
                .clone()
        };

        if Arc::ptr_eq(&registered, &descriptor) {
            info!("registered tenant binding: {}", registered.database);
            self.publish(tenant_id, &registered).await;
        }

        Ok(registered)
    }

    /// Best-effort descriptor publication; cache misses elsewhere fall back
    /// to the master store.
    async fn publish(&self, tenant_id: &str, descriptor: &ConnectionDescriptor) {
        let key = format!(
            "{}:connections:{}",
            config::config().kv.prefix,
            tenant_id
        );
        match serde_json::to_string(descriptor) {
            Ok(payload) => {
                if let Err(err) = self.kv.set_ex(&key, &payload, 0).await {
                    tracing::warn!("failed to publish tenant descriptor {}: {}", key, err);
                }
            }
            Err(err) => tracing::warn!("failed to serialize tenant descriptor: {}", err),
        }
    }
}
