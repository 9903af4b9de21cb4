//! Keyed store contract for gate state.
//!
//! Correctness under concurrent callers relies on two atomic primitives:
//! - insert-if-absent for email records (and content items)
//! - set-unlocked-if-locked for unlock state
//!
//! Components never hold locks across calls; every backend must make these
//! primitives atomic on its own.

mod error;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use error::{StorageError, StorageResult};
pub use memory::InMemoryGateStorage;

use crate::types::{
    ContentItem, EmailCollectionRecord, InsertOutcome, PaymentSessionRecord, UnlockRecord,
    UnlockTransition, UnlockVia,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Storage for immutable generated content.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Store a new item unless one with the same id exists; existing items are never replaced.
    async fn insert_content_if_absent(
        &self,
        item: ContentItem,
    ) -> StorageResult<InsertOutcome<ContentItem>>;

    async fn get_content(&self, content_id: &str) -> StorageResult<Option<ContentItem>>;
}

/// Storage for the monotonic unlock state.
#[async_trait]
pub trait UnlockStore: Send + Sync {
    /// `None` means locked.
    async fn get_unlock(&self, content_id: &str) -> StorageResult<Option<UnlockRecord>>;

    /// Atomically transition `locked -> unlocked`. Never overwrites an existing record.
    async fn set_unlocked_if_locked(
        &self,
        content_id: &str,
        via: UnlockVia,
        at: DateTime<Utc>,
    ) -> StorageResult<UnlockTransition>;
}

/// Storage for captured email addresses.
#[async_trait]
pub trait EmailRecordStore: Send + Sync {
    async fn insert_email_if_absent(
        &self,
        record: EmailCollectionRecord,
    ) -> StorageResult<InsertOutcome<EmailCollectionRecord>>;

    async fn list_email_records(&self, content_id: &str)
        -> StorageResult<Vec<EmailCollectionRecord>>;
}

/// Informational record of provider-acknowledged checkout sessions.
#[async_trait]
pub trait PaymentSessionStore: Send + Sync {
    async fn record_session(&self, record: PaymentSessionRecord) -> StorageResult<()>;

    async fn get_session(&self, session_id: &str) -> StorageResult<Option<PaymentSessionRecord>>;

    /// Sessions for one content item, oldest first.
    async fn list_sessions(&self, content_id: &str) -> StorageResult<Vec<PaymentSessionRecord>>;
}

/// Storage bundle used by the gate components.
pub trait GateStorage:
    ContentStore + UnlockStore + EmailRecordStore + PaymentSessionStore + Send + Sync
{
    fn backend_label(&self) -> &'static str;
}

/// Storage backend selection.
#[derive(Debug, Clone, Default)]
pub enum StorageConfig {
    /// Process memory only. State is lost on restart.
    #[default]
    Memory,
    /// PostgreSQL; tables are created on bootstrap.
    Postgres {
        database_url: String,
        max_connections: u32,
    },
}

impl StorageConfig {
    pub fn postgres(database_url: impl Into<String>, max_connections: u32) -> Self {
        Self::Postgres {
            database_url: database_url.into(),
            max_connections,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Postgres { .. } => "postgres",
        }
    }
}

/// Build the configured backend.
pub async fn bootstrap_storage(config: StorageConfig) -> StorageResult<Arc<dyn GateStorage>> {
    match config {
        StorageConfig::Memory => Ok(Arc::new(InMemoryGateStorage::new())),
        #[cfg(feature = "postgres")]
        StorageConfig::Postgres {
            database_url,
            max_connections,
        } => {
            let store =
                postgres::PostgresGateStorage::connect(&database_url, max_connections).await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "postgres"))]
        StorageConfig::Postgres { .. } => Err(StorageError::Backend(
            "postgres storage requested but the `postgres` feature is not enabled".to_string(),
        )),
    }
}
