//! In-memory reference implementation of the gate storage traits.
//!
//! Each atomic primitive runs under a single write guard, which gives the
//! same insert-if-absent guarantees a transactional backend provides.

use super::{
    ContentStore, EmailRecordStore, GateStorage, PaymentSessionStore, StorageError,
    StorageResult, UnlockStore,
};
use crate::types::{
    ContentItem, EmailCollectionRecord, EmailRecordKey, InsertOutcome, PaymentSessionRecord,
    UnlockRecord, UnlockTransition, UnlockVia,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::hash_map::Entry as HashEntry;
use std::collections::btree_map::Entry as BTreeEntry;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

#[derive(Default)]
pub struct InMemoryGateStorage {
    content: RwLock<HashMap<String, ContentItem>>,
    unlocks: RwLock<HashMap<String, UnlockRecord>>,
    emails: RwLock<BTreeMap<EmailRecordKey, EmailCollectionRecord>>,
    sessions: RwLock<HashMap<String, PaymentSessionRecord>>,
}

impl InMemoryGateStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned(name: &str) -> StorageError {
    StorageError::Backend(format!("{name} lock poisoned"))
}

#[async_trait]
impl ContentStore for InMemoryGateStorage {
    async fn insert_content_if_absent(
        &self,
        item: ContentItem,
    ) -> StorageResult<InsertOutcome<ContentItem>> {
        let mut guard = self.content.write().map_err(|_| poisoned("content"))?;
        match guard.entry(item.content_id.clone()) {
            HashEntry::Occupied(existing) => {
                Ok(InsertOutcome::AlreadyPresent(existing.get().clone()))
            }
            HashEntry::Vacant(slot) => Ok(InsertOutcome::Inserted(slot.insert(item).clone())),
        }
    }

    async fn get_content(&self, content_id: &str) -> StorageResult<Option<ContentItem>> {
        let guard = self.content.read().map_err(|_| poisoned("content"))?;
        Ok(guard.get(content_id).cloned())
    }
}

#[async_trait]
impl UnlockStore for InMemoryGateStorage {
    async fn get_unlock(&self, content_id: &str) -> StorageResult<Option<UnlockRecord>> {
        let guard = self.unlocks.read().map_err(|_| poisoned("unlock"))?;
        Ok(guard.get(content_id).cloned())
    }

    async fn set_unlocked_if_locked(
        &self,
        content_id: &str,
        via: UnlockVia,
        at: DateTime<Utc>,
    ) -> StorageResult<UnlockTransition> {
        let mut guard = self.unlocks.write().map_err(|_| poisoned("unlock"))?;
        match guard.entry(content_id.to_string()) {
            HashEntry::Occupied(existing) => {
                Ok(UnlockTransition::AlreadyUnlocked(existing.get().clone()))
            }
            HashEntry::Vacant(slot) => {
                let record = slot.insert(UnlockRecord {
                    content_id: content_id.to_string(),
                    unlocked_via: via,
                    unlocked_at: at,
                });
                Ok(UnlockTransition::Transitioned(record.clone()))
            }
        }
    }
}

#[async_trait]
impl EmailRecordStore for InMemoryGateStorage {
    async fn insert_email_if_absent(
        &self,
        record: EmailCollectionRecord,
    ) -> StorageResult<InsertOutcome<EmailCollectionRecord>> {
        let mut guard = self.emails.write().map_err(|_| poisoned("email"))?;
        match guard.entry(record.key.clone()) {
            BTreeEntry::Occupied(existing) => {
                Ok(InsertOutcome::AlreadyPresent(existing.get().clone()))
            }
            BTreeEntry::Vacant(slot) => Ok(InsertOutcome::Inserted(slot.insert(record).clone())),
        }
    }

    async fn list_email_records(
        &self,
        content_id: &str,
    ) -> StorageResult<Vec<EmailCollectionRecord>> {
        let guard = self.emails.read().map_err(|_| poisoned("email"))?;
        let mut records = guard
            .values()
            .filter(|record| record.key.content_id == content_id)
            .cloned()
            .collect::<Vec<_>>();
        records.sort_by_key(|record| record.captured_at);
        Ok(records)
    }
}

#[async_trait]
impl PaymentSessionStore for InMemoryGateStorage {
    async fn record_session(&self, record: PaymentSessionRecord) -> StorageResult<()> {
        let mut guard = self.sessions.write().map_err(|_| poisoned("session"))?;
        if guard.contains_key(&record.session_id) {
            return Err(StorageError::InvariantViolation(format!(
                "payment session {} already recorded",
                record.session_id
            )));
        }
        guard.insert(record.session_id.clone(), record);
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> StorageResult<Option<PaymentSessionRecord>> {
        let guard = self.sessions.read().map_err(|_| poisoned("session"))?;
        Ok(guard.get(session_id).cloned())
    }

    async fn list_sessions(&self, content_id: &str) -> StorageResult<Vec<PaymentSessionRecord>> {
        let guard = self.sessions.read().map_err(|_| poisoned("session"))?;
        let mut sessions = guard
            .values()
            .filter(|session| session.content_id == content_id)
            .cloned()
            .collect::<Vec<_>>();
        sessions.sort_by_key(|session| session.created_at);
        Ok(sessions)
    }
}

impl GateStorage for InMemoryGateStorage {
    fn backend_label(&self) -> &'static str {
        "memory"
    }
}
