//! Latency ledger: per-item timing records plus the completed list

use crate::error::ItemError;
use crate::types::{whole_millis, Item, ItemId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// A fully processed item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletedItem {
    pub id: ItemId,
    pub created_at: Instant,
    pub completed_at: Instant,
}

impl CompletedItem {
    pub fn latency(&self) -> Duration {
        self.completed_at.saturating_duration_since(self.created_at)
    }

    pub fn latency_ms(&self) -> u64 {
        whole_millis(self.latency())
    }
}

/// Serializable view of one completed item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LatencyEntry {
    pub id: ItemId,
    pub latency_ms: u64,
}

/// Shared record store.
///
/// Producers insert disjoint keys; consumers stamp completion on the
/// record they dequeued and append to `completed`.
#[derive(Default)]
pub struct LatencyLedger {
    records: DashMap<ItemId, Item>,
    completed: Mutex<Vec<CompletedItem>>,
}

impl LatencyLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly created item. Keys are write-once.
    pub fn register(&self, item: &Item) -> Result<(), ItemError> {
        if item.created_at().is_none() {
            return Err(ItemError::NotCreated);
        }
        match self.records.entry(item.id()) {
            Entry::Occupied(_) => Err(ItemError::AlreadyRegistered),
            Entry::Vacant(slot) => {
                slot.insert(item.clone());
                Ok(())
            }
        }
    }

    /// Stamp completion on the item's record and append it to `completed`
    pub fn complete(&self, id: ItemId, at: Instant) -> Result<CompletedItem, ItemError> {
        let done = {
            let mut record = self.records.get_mut(&id).ok_or(ItemError::Unregistered)?;
            record.stamp_completed(at)?;
            CompletedItem {
                id,
                created_at: record.created_at().ok_or(ItemError::NotCreated)?,
                completed_at: record.completed_at().ok_or(ItemError::NotCreated)?,
            }
        };
        // the record shard lock is released before the append
        self.completed.lock().push(done);
        Ok(done)
    }

    pub fn get(&self, id: &ItemId) -> Option<Item> {
        self.records.get(id).map(|r| r.value().clone())
    }

    pub fn records_len(&self) -> usize {
        self.records.len()
    }

    pub fn completed_len(&self) -> usize {
        self.completed.lock().len()
    }

    /// Owned copy of the current state.
    ///
    /// `completed` is copied first: a record is always stamped before its
    /// append, so every listed item already has a stamped record.
    pub fn snapshot(&self) -> LedgerSnapshot {
        let completed = self.completed.lock().clone();
        let records = self
            .records
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        LedgerSnapshot { records, completed }
    }
}

/// Immutable ledger state handed back to the caller after a run
#[derive(Debug, Clone, Default)]
pub struct LedgerSnapshot {
    pub records: HashMap<ItemId, Item>,
    pub completed: Vec<CompletedItem>,
}

impl LedgerSnapshot {
    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    /// Completed items, in completion order
    pub fn latencies(&self) -> Vec<LatencyEntry> {
        self.completed
            .iter()
            .map(|c| LatencyEntry {
                id: c.id,
                latency_ms: c.latency_ms(),
            })
            .collect()
    }

    /// Every completed item has a fully stamped record that agrees with it
    pub fn is_consistent(&self) -> bool {
        self.completed.iter().all(|c| {
            self.records.get(&c.id).is_some_and(|r| {
                r.created_at() == Some(c.created_at) && r.completed_at() == Some(c.completed_at)
            })
        })
    }

    /// Registered items that never completed
    pub fn in_flight(&self) -> usize {
        self.records.values().filter(|r| !r.is_complete()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn created_item() -> Item {
        let mut item = Item::new();
        item.stamp_created(Instant::now()).unwrap();
        item
    }

    #[test]
    fn test_register_then_complete() {
        let ledger = LatencyLedger::new();
        let item = created_item();
        ledger.register(&item).unwrap();

        let done = ledger.complete(item.id(), Instant::now()).unwrap();
        assert_eq!(done.id, item.id());
        assert!(done.completed_at >= done.created_at);

        let snapshot = ledger.snapshot();
        assert_eq!(snapshot.completed_count(), 1);
        assert_eq!(snapshot.in_flight(), 0);
        assert!(snapshot.is_consistent());
    }

    #[test]
    fn test_rejects_duplicates_and_unknown_ids() {
        let ledger = LatencyLedger::new();
        let item = created_item();
        ledger.register(&item).unwrap();

        assert_eq!(ledger.register(&item), Err(ItemError::AlreadyRegistered));
        assert_eq!(
            ledger.register(&Item::new()),
            Err(ItemError::NotCreated)
        );
        assert_eq!(
            ledger.complete(ItemId::random(), Instant::now()),
            Err(ItemError::Unregistered)
        );

        ledger.complete(item.id(), Instant::now()).unwrap();
        assert_eq!(
            ledger.complete(item.id(), Instant::now()),
            Err(ItemError::AlreadyStamped("completed"))
        );
        assert_eq!(ledger.completed_len(), 1);
    }

    #[test]
    fn test_concurrent_registration_loses_nothing() {
        const THREADS: usize = 16;
        const PER_THREAD: usize = 250;

        let ledger = Arc::new(LatencyLedger::new());
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let ledger = ledger.clone();
                std::thread::spawn(move || {
                    let mut ids = Vec::with_capacity(PER_THREAD);
                    for _ in 0..PER_THREAD {
                        let item = created_item();
                        ledger.register(&item).unwrap();
                        ids.push(item.id());
                    }
                    ids
                })
            })
            .collect();

        let ids: Vec<ItemId> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(ledger.records_len(), THREADS * PER_THREAD);

        // complete them all from several threads at once
        let chunks: Vec<Vec<ItemId>> = ids.chunks(PER_THREAD).map(|c| c.to_vec()).collect();
        let handles: Vec<_> = chunks
            .into_iter()
            .map(|chunk| {
                let ledger = ledger.clone();
                std::thread::spawn(move || {
                    for id in chunk {
                        ledger.complete(id, Instant::now()).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let snapshot = ledger.snapshot();
        assert_eq!(snapshot.completed_count(), THREADS * PER_THREAD);
        let unique: HashSet<_> = snapshot.completed.iter().map(|c| c.id).collect();
        assert_eq!(unique.len(), THREADS * PER_THREAD);
        assert!(snapshot.is_consistent());
    }

    #[test]
    fn test_snapshot_consistent_while_completing() {
        const THREADS: usize = 4;
        const PER_THREAD: usize = 20_000;

        let ledger = Arc::new(LatencyLedger::new());
        let chunks: Vec<Vec<ItemId>> = (0..THREADS)
            .map(|_| {
                (0..PER_THREAD)
                    .map(|_| {
                        let item = created_item();
                        ledger.register(&item).unwrap();
                        item.id()
                    })
                    .collect()
            })
            .collect();

        let handles: Vec<_> = chunks
            .into_iter()
            .map(|chunk| {
                let ledger = ledger.clone();
                std::thread::spawn(move || {
                    for id in chunk {
                        ledger.complete(id, Instant::now()).unwrap();
                    }
                })
            })
            .collect();

        let mut inconsistent = 0;
        for _ in 0..200 {
            if !ledger.snapshot().is_consistent() {
                inconsistent += 1;
            }
        }
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(inconsistent, 0);
        assert!(ledger.snapshot().is_consistent());
        assert_eq!(ledger.completed_len(), THREADS * PER_THREAD);
    }
}
