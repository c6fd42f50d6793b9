//! Record persistence
//!
//! The pipeline and dispatch loop work exclusively through `RecordStore`,
//! saving after every stage so a crash mid-turn loses at most one stage.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreError;
use crate::record::EventRecord;

pub trait RecordStore: Send + Sync {
    fn load(&self, event_id: Uuid) -> Result<Option<EventRecord>, StoreError>;
    fn save(&self, record: &EventRecord) -> Result<(), StoreError>;

    /// Load, failing with `NotFound` if the record does not exist
    fn get(&self, event_id: Uuid) -> Result<EventRecord, StoreError> {
        self.load(event_id)?.ok_or(StoreError::NotFound(event_id))
    }
}

// ── MemoryRecordStore ──

/// In-memory RecordStore for tests and the replay harness
pub struct MemoryRecordStore {
    inner: RwLock<HashMap<Uuid, EventRecord>>,
    saves: AtomicUsize,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            saves: AtomicUsize::new(0),
        }
    }

    /// Number of successful saves since creation
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordStore for MemoryRecordStore {
    fn load(&self, event_id: Uuid) -> Result<Option<EventRecord>, StoreError> {
        let store = self
            .inner
            .read()
            .map_err(|e| StoreError::Unavailable(format!("Lock: {}", e)))?;
        Ok(store.get(&event_id).cloned())
    }

    fn save(&self, record: &EventRecord) -> Result<(), StoreError> {
        let mut store = self
            .inner
            .write()
            .map_err(|e| StoreError::Unavailable(format!("Lock: {}", e)))?;
        store.insert(record.event_id, record.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
