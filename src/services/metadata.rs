use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::models::FileRecord;

struct Slot {
    record: FileRecord,
    /// Held by an upload whose blob is not written yet
    pending: bool,
    removed: bool,
}

impl Slot {
    fn visible(&self) -> bool {
        !self.pending && !self.removed
    }
}

/// In-memory file metadata, keyed by file id.
///
/// Each record sits behind its own lock, so work on one id never waits on
/// another. The map lock is only held to find or swap slots, never across
/// an await on a record lock.
#[derive(Default)]
pub struct MetadataTable {
    records: RwLock<HashMap<String, Arc<Mutex<Slot>>>>,
}

/// Exclusive access to one record.
///
/// This is the multi-step form of `update`/`delete`: holding the guard
/// serializes a sequence that awaits in between (open the blob then count
/// the download, delete the blob then drop the record) against every other
/// operation on the same id.
pub struct RecordGuard<'a> {
    table: &'a MetadataTable,
    slot: OwnedMutexGuard<Slot>,
}

impl MetadataTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new record. Returns `false` if the id is already taken.
    pub async fn insert(&self, record: FileRecord) -> bool {
        self.insert_slot(record, false).await
    }

    /// Claim an id for an upload in progress. The record stays out of
    /// lookups and snapshots until `commit`, but the id counts as taken.
    pub async fn reserve(&self, record: FileRecord) -> bool {
        self.insert_slot(record, true).await
    }

    async fn insert_slot(&self, record: FileRecord, pending: bool) -> bool {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return false;
        }
        records.insert(
            record.id.clone(),
            Arc::new(Mutex::new(Slot {
                record,
                pending,
                removed: false,
            })),
        );
        true
    }

    /// Publish a reserved record. Returns `false` if the reservation is gone.
    pub async fn commit(&self, id: &str) -> bool {
        let Some(slot) = self.records.read().await.get(id).cloned() else {
            return false;
        };
        let mut slot = slot.lock().await;
        if !slot.pending || slot.removed {
            return false;
        }
        slot.pending = false;
        true
    }

    /// Give back a reservation whose upload failed
    pub async fn release(&self, id: &str) {
        let Some(slot) = self.records.read().await.get(id).cloned() else {
            return;
        };
        let slot = slot.lock_owned().await;
        if slot.pending && !slot.removed {
            RecordGuard { table: self, slot }.remove().await;
        }
    }

    /// Drop reservations for which `stale` holds, e.g. ones left behind by
    /// an upload that was cancelled mid-write. Returns how many were dropped.
    pub async fn release_stale<F>(&self, stale: F) -> usize
    where
        F: Fn(&FileRecord) -> bool,
    {
        let slots: Vec<Arc<Mutex<Slot>>> = self.records.read().await.values().cloned().collect();

        let mut released = 0;
        for slot in slots {
            let slot = slot.lock_owned().await;
            if slot.pending && !slot.removed && stale(&slot.record) {
                RecordGuard { table: self, slot }.remove().await;
                released += 1;
            }
        }
        released
    }

    /// Whether `id` is taken, reservations included
    pub async fn contains(&self, id: &str) -> bool {
        self.records.read().await.contains_key(id)
    }

    /// Number of taken ids, reservations included
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Lock the record for `id`, or `None` if there is none
    pub async fn lock(&self, id: &str) -> Option<RecordGuard<'_>> {
        let slot = self.records.read().await.get(id).cloned()?;
        let slot = slot.lock_owned().await;
        // lost a race with a removal that happened while we waited
        if !slot.visible() {
            return None;
        }
        Some(RecordGuard { table: self, slot })
    }

    pub async fn get(&self, id: &str) -> Option<FileRecord> {
        let guard = self.lock(id).await?;
        Some(guard.record().clone())
    }

    /// Atomic read-modify-write of one record
    pub async fn update<F, R>(&self, id: &str, mutate: F) -> Option<R>
    where
        F: FnOnce(&mut FileRecord) -> R,
    {
        let mut guard = self.lock(id).await?;
        Some(mutate(guard.record_mut()))
    }

    pub async fn delete(&self, id: &str) -> Option<FileRecord> {
        let guard = self.lock(id).await?;
        Some(guard.remove().await)
    }

    /// Point-in-time copy of every record
    pub async fn snapshot(&self) -> Vec<FileRecord> {
        let slots: Vec<Arc<Mutex<Slot>>> = self.records.read().await.values().cloned().collect();

        let mut snapshot = Vec::with_capacity(slots.len());
        for slot in slots {
            let slot = slot.lock().await;
            if slot.visible() {
                snapshot.push(slot.record.clone());
            }
        }
        snapshot
    }
}

impl RecordGuard<'_> {
    pub fn record(&self) -> &FileRecord {
        &self.slot.record
    }

    pub fn record_mut(&mut self) -> &mut FileRecord {
        &mut self.slot.record
    }

    /// Remove the record from the table, releasing the lock
    pub async fn remove(mut self) -> FileRecord {
        self.slot.removed = true;

        let mut records = self.table.records.write().await;
        let owned = records
            .get(&self.slot.record.id)
            .is_some_and(|slot| Arc::ptr_eq(slot, OwnedMutexGuard::mutex(&self.slot)));
        if owned {
            records.remove(&self.slot.record.id);
        }
        self.slot.record.clone()
    }
}
