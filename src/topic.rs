use crate::broker::{log::MessageLog, Counters};
use crate::error::{Error, Result};
use crate::{Record, SubscriberId};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

/// A named, independent record stream with its own retention policy and
/// subscriber set.
///
/// The topic owns its log and the cursor table; subscriber handles only
/// read and advance their own entry. Each topic runs one background purger
/// task for as long as the topic is alive.
pub struct Topic {
    name: String,
    retention: Duration,
    log: MessageLog,
    cursors: RwLock<HashMap<SubscriberId, Arc<AtomicU64>>>,
    data_ready: Notify,
    shutdown_tx: watch::Sender<bool>,
    purger: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<Counters>,
    max_subscribers: usize,
}

impl Topic {
    /// Create the topic and spawn its retention purger. Must be called from
    /// within a Tokio runtime.
    pub(crate) fn new(
        name: String,
        retention: Duration,
        max_subscribers: usize,
        min_purge_interval: Duration,
        counters: Arc<Counters>,
    ) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        let topic = Arc::new(Self {
            name,
            retention,
            log: MessageLog::new(),
            cursors: RwLock::new(HashMap::new()),
            data_ready: Notify::new(),
            shutdown_tx,
            purger: Mutex::new(None),
            counters,
            max_subscribers,
        });

        // Running the purger at a fraction of the retention window keeps a
        // record's actual lifetime close to the stated retention instead of
        // letting it stretch toward twice that.
        let purge_interval = (retention / 10).max(min_purge_interval);
        let handle = tokio::spawn(Self::run_purger(Arc::clone(&topic), purge_interval));
        *topic.purger.lock() = Some(handle);

        topic
    }

    async fn run_purger(topic: Arc<Topic>, interval: Duration) {
        let mut shutdown = topic.shutdown_tx.subscribe();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // An interval's first tick completes immediately; skip it.
        ticker.tick().await;

        debug!(topic = %topic.name, ?interval, "retention purger started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Some(cutoff) = SystemTime::now().checked_sub(topic.retention) {
                        let purged = topic.log.purge_older_than(cutoff);
                        if purged > 0 {
                            topic
                                .counters
                                .records_purged
                                .fetch_add(purged as u64, Ordering::Relaxed);
                            debug!(topic = %topic.name, purged, "evicted aged records");
                        }
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        debug!(topic = %topic.name, "retention purger stopped");
    }

    /// Get the topic name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Retention window applied by this topic's purger
    pub fn retention(&self) -> Duration {
        self.retention
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Append a payload to the log, returning the assigned offset.
    pub fn append(&self, payload: Bytes) -> Result<u64> {
        if self.is_shutdown() {
            return Err(Error::ShuttingDown(self.name.clone()));
        }
        let record = self.log.append(payload);
        self.counters
            .messages_published
            .fetch_add(1, Ordering::Relaxed);
        trace!(topic = %self.name, offset = record.offset, "appended record");
        self.data_ready.notify_waiters();
        Ok(record.offset)
    }

    /// Register a subscriber with its cursor at offset 0.
    ///
    /// Re-registering an existing subscriber is a no-op and preserves the
    /// cursor, so a stopped consumer can resume where it left off.
    pub fn register_subscriber(&self, id: SubscriberId) -> Result<()> {
        let mut cursors = self.cursors.write();
        if cursors.contains_key(&id) {
            debug!(topic = %self.name, subscriber = %id, "subscriber already registered");
            return Ok(());
        }
        if cursors.len() >= self.max_subscribers {
            return Err(Error::SubscriberLimitExceeded(self.name.clone()));
        }
        debug!(topic = %self.name, subscriber = %id, "registered subscriber");
        cursors.insert(id, Arc::new(AtomicU64::new(0)));
        Ok(())
    }

    /// Read everything past the subscriber's cursor, in offset order, and
    /// advance the cursor to the last returned offset. An empty batch is
    /// not an error; an unregistered subscriber is.
    ///
    /// A cursor pointing at data the purger already evicted resumes at the
    /// oldest surviving record. That gap is deliberately silent and callers
    /// must tolerate it.
    pub fn consume(&self, id: &SubscriberId) -> Result<Vec<Record>> {
        let cursor = self
            .cursors
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::UnknownSubscriber {
                topic: self.name.clone(),
                subscriber: id.to_string(),
            })?;

        let batch = self.log.read_after(cursor.load(Ordering::Acquire));
        if let Some(last) = batch.last() {
            // Only this subscriber's own consume calls write its cursor, so
            // a plain store cannot race another advance.
            cursor.store(last.offset, Ordering::Release);
            self.counters
                .messages_delivered
                .fetch_add(batch.len() as u64, Ordering::Relaxed);
            trace!(topic = %self.name, subscriber = %id, batch = batch.len(), "delivered batch");
        }
        Ok(batch)
    }

    /// Move a subscriber's cursor to `offset`, enabling replay of whatever
    /// the purger has not yet evicted, or skipping ahead. An unknown
    /// subscriber is registered fresh at that offset.
    pub fn reset_offset(&self, id: &SubscriberId, offset: u64) -> Result<()> {
        {
            let cursors = self.cursors.read();
            if let Some(cursor) = cursors.get(id) {
                cursor.store(offset, Ordering::Release);
                info!(topic = %self.name, subscriber = %id, offset, "cursor reset");
                return Ok(());
            }
        }

        let mut cursors = self.cursors.write();
        // Re-check under the write lock: the subscriber may have been
        // registered between the two lock acquisitions.
        if let Some(cursor) = cursors.get(id) {
            cursor.store(offset, Ordering::Release);
        } else {
            if cursors.len() >= self.max_subscribers {
                return Err(Error::SubscriberLimitExceeded(self.name.clone()));
            }
            cursors.insert(id.clone(), Arc::new(AtomicU64::new(offset)));
        }
        info!(topic = %self.name, subscriber = %id, offset, "cursor reset");
        Ok(())
    }

    /// Unconsumed record count per registered subscriber.
    ///
    /// A cursor that was reset past the head reports zero rather than a
    /// negative lag.
    pub fn lag_per_consumer(&self) -> HashMap<SubscriberId, u64> {
        let high = self.log.high_water_mark();
        self.cursors
            .read()
            .iter()
            .map(|(id, cursor)| {
                (
                    id.clone(),
                    high.saturating_sub(cursor.load(Ordering::Acquire)),
                )
            })
            .collect()
    }

    /// Number of registered subscribers
    pub fn subscriber_count(&self) -> usize {
        self.cursors.read().len()
    }

    /// Highest offset assigned so far
    pub fn high_water_mark(&self) -> u64 {
        self.log.high_water_mark()
    }

    /// Number of records currently retained in the log
    pub fn depth(&self) -> usize {
        self.log.len()
    }

    /// Stop the retention purger and signal every consumer loop on this
    /// topic to stop. In-flight handler invocations finish; no new batches
    /// are fetched afterwards.
    pub fn shutdown(&self) {
        if self.shutdown_tx.send_replace(true) {
            return;
        }
        info!(topic = %self.name, "topic shutting down");
        // Wake parked consumer loops so they observe the flag promptly.
        self.data_ready.notify_waiters();
    }

    pub(crate) fn data_ready(&self) -> &Notify {
        &self.data_ready
    }

    pub(crate) fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }
}
