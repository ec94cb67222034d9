use crate::Record;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::time::SystemTime;

/// An append-only, offset-ordered record store for one topic.
///
/// Offsets start at 1 and are never reused; purging removes records but the
/// counter keeps climbing, so gaps can only appear through eviction.
pub(crate) struct MessageLog {
    inner: RwLock<LogInner>,
}

struct LogInner {
    next_offset: u64,
    records: BTreeMap<u64, Record>,
}

impl MessageLog {
    pub(crate) fn new() -> Self {
        Self {
            inner: RwLock::new(LogInner {
                next_offset: 0,
                records: BTreeMap::new(),
            }),
        }
    }

    /// Append a payload, assigning the next offset.
    ///
    /// Offset assignment and insertion happen under a single write lock, so
    /// the record is readable the instant its offset is handed out and two
    /// concurrent appends can never receive the same offset.
    pub(crate) fn append(&self, payload: Bytes) -> Record {
        let mut inner = self.inner.write();
        inner.next_offset += 1;
        let record = Record {
            offset: inner.next_offset,
            payload,
            timestamp: SystemTime::now(),
        };
        inner.records.insert(record.offset, record.clone());
        record
    }

    /// All records with an offset greater than `offset`, ascending.
    ///
    /// If `offset` points into an already-purged region the batch simply
    /// starts at the oldest surviving record; the gap is not surfaced to the
    /// caller and readers must tolerate it.
    pub(crate) fn read_after(&self, offset: u64) -> Vec<Record> {
        let inner = self.inner.read();
        inner
            .records
            .range((Bound::Excluded(offset), Bound::Unbounded))
            .map(|(_, record)| record.clone())
            .collect()
    }

    /// Highest offset handed out so far, 0 before the first append.
    pub(crate) fn high_water_mark(&self) -> u64 {
        self.inner.read().next_offset
    }

    /// Drop every record whose timestamp is strictly before `cutoff`,
    /// returning how many were removed.
    ///
    /// Timestamps are non-decreasing in offset order (appends stamp the
    /// clock under the same lock), so eviction only ever pops from the
    /// front of the map.
    pub(crate) fn purge_older_than(&self, cutoff: SystemTime) -> usize {
        let mut inner = self.inner.write();
        let mut purged = 0;
        while let Some(entry) = inner.records.first_entry() {
            if entry.get().timestamp >= cutoff {
                break;
            }
            entry.remove();
            purged += 1;
        }
        purged
    }

    /// Number of records currently held.
    pub(crate) fn len(&self) -> usize {
        self.inner.read().records.len()
    }
}
