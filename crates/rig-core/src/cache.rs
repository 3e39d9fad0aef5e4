use crate::model::ExportRequest;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache capacity must be positive, got {0}")]
    InvalidCapacity(usize),
}

/// A handled request and the moment it was handled.
#[derive(Debug, Clone)]
pub struct CacheRecord {
    pub request: Arc<ExportRequest>,
    pub timestamp: DateTime<Utc>,
}

impl CacheRecord {
    pub fn new(request: Arc<ExportRequest>, timestamp: DateTime<Utc>) -> Self {
        Self { request, timestamp }
    }

    pub fn now(request: Arc<ExportRequest>) -> Self {
        Self::new(request, Utc::now())
    }
}

struct Ring {
    slots: Vec<Option<CacheRecord>>,
    head: usize,
    tail: usize,
    len: usize,
}

/// Fixed-capacity ring of the most recent records.
///
/// Once full, every insert overwrites the oldest record. Head, tail, length
/// and storage live behind one lock so concurrent writers always observe a
/// consistent ring.
pub struct OutcomeCache {
    capacity: usize,
    ring: Mutex<Ring>,
}

impl std::fmt::Debug for OutcomeCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutcomeCache")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

impl OutcomeCache {
    pub fn new(capacity: usize) -> Result<Self, CacheError> {
        if capacity == 0 {
            return Err(CacheError::InvalidCapacity(capacity));
        }
        Ok(Self {
            capacity,
            ring: Mutex::new(Ring {
                slots: vec![None; capacity],
                head: 0,
                tail: 0,
                len: 0,
            }),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.ring.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append at the tail, evicting the oldest record when full.
    pub fn enqueue(&self, record: CacheRecord) {
        let mut ring = self.ring.lock();
        if ring.len == self.capacity {
            ring.head = (ring.head + 1) % self.capacity;
            ring.len -= 1;
        }
        let tail = ring.tail;
        let evicted = ring.slots[tail].replace(record);
        ring.tail = (tail + 1) % self.capacity;
        ring.len += 1;
        drop(ring);
        drop(evicted);
    }

    /// Resident records, oldest first.
    pub fn snapshot(&self) -> Vec<CacheRecord> {
        let ring = self.ring.lock();
        (0..ring.len)
            .filter_map(|offset| ring.slots[(ring.head + offset) % self.capacity].clone())
            .collect()
    }

    pub fn first(&self) -> Option<CacheRecord> {
        let ring = self.ring.lock();
        if ring.len == 0 {
            return None;
        }
        ring.slots[ring.head].clone()
    }

    pub fn last(&self) -> Option<CacheRecord> {
        let ring = self.ring.lock();
        if ring.len == 0 {
            return None;
        }
        ring.slots[(ring.tail + self.capacity - 1) % self.capacity].clone()
    }
}
