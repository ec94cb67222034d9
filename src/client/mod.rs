use crate::error::{Error, Result};
use crate::{Broker, Record, SubscriberId, Topic};
use bytes::Bytes;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// A client handle that publishes messages to one topic
#[derive(Clone)]
pub struct Publisher {
    broker: Arc<Broker>,
    topic: String,
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}

impl Publisher {
    /// Create a new publisher
    pub(crate) fn new(broker: Arc<Broker>, topic: String) -> Self {
        debug!(topic = %topic, "creating new publisher");
        Self { broker, topic }
    }

    /// Name of the topic this publisher writes to
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish a payload to the bound topic
    pub fn publish(&self, payload: impl Into<Bytes>) -> Result<()> {
        self.broker.publish(&self.topic, payload)
    }

    /// Publish multiple payloads.
    ///
    /// The whole batch is appended by a single dispatch task, so the
    /// payloads keep their relative order in the log.
    pub fn publish_batch<I>(&self, payloads: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: Into<Bytes>,
    {
        let topic = self.broker.topic(&self.topic)?;
        let payloads: Vec<Bytes> = payloads.into_iter().map(Into::into).collect();
        debug!(topic = %self.topic, count = payloads.len(), "dispatching batch publish");
        tokio::spawn(async move {
            for payload in payloads {
                if let Err(e) = topic.append(payload) {
                    warn!("dropping rest of batch: {}", e);
                    break;
                }
            }
        });
        Ok(())
    }
}

/// A consumer handle: an identity plus a persistent read cursor into one
/// topic.
///
/// Consumption can be driven two ways: [`Subscriber::start`] spawns an
/// independent loop that feeds a handler, while [`Subscriber::poll`] and
/// [`Subscriber::poll_wait`] fetch batches on demand. Either way the
/// cursor lives in the topic, so stopping the handle loses nothing.
pub struct Subscriber {
    id: SubscriberId,
    topic: Arc<Topic>,
    control: Mutex<LoopControl>,
    idle_poll: Duration,
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("idle_poll", &self.idle_poll)
            .finish_non_exhaustive()
    }
}

/// Control state for the spawned consumption loop. Each started loop gets
/// its own stop channel; `stop_tx` is `Some` exactly while a loop has been
/// started and not yet told to stop.
struct LoopControl {
    stop_tx: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl Subscriber {
    pub(crate) fn new(topic: Arc<Topic>, id: SubscriberId, idle_poll: Duration) -> Self {
        Self {
            id,
            topic,
            control: Mutex::new(LoopControl {
                stop_tx: None,
                task: None,
            }),
            idle_poll,
        }
    }

    /// Get the subscriber's identity
    pub fn id(&self) -> &SubscriberId {
        &self.id
    }

    /// Name of the topic this subscriber reads from
    pub fn topic_name(&self) -> &str {
        self.topic.name()
    }

    /// Whether a consumption loop is currently running (including one that
    /// was told to stop but is still finishing its in-flight batch)
    pub fn is_running(&self) -> bool {
        self.control
            .lock()
            .task
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    /// Spawn the consumption loop, invoking `handler` on every record in
    /// offset order.
    ///
    /// When caught up, the loop parks on the topic's append notifier with a
    /// bounded idle sleep as fallback, so it neither spins on an empty log
    /// nor misses a wake-up for long. A handler panic is contained to this
    /// subscriber: it is logged and the loop moves on to the next record.
    ///
    /// Starting an already-running subscriber is a no-op. Must be called
    /// from within a Tokio runtime.
    pub fn start<F>(&self, mut handler: F)
    where
        F: FnMut(Record) + Send + 'static,
    {
        let mut control = self.control.lock();
        let finished = control
            .task
            .as_ref()
            .map(|task| task.is_finished())
            .unwrap_or(true);
        // A loop that exited on its own (topic shut down or deleted) leaves
        // a stale stop sender behind; only a live, un-stopped loop counts.
        if control.stop_tx.is_some() && !finished {
            warn!(subscriber = %self.id, "consumption loop already running");
            return;
        }

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let previous = control.task.take();

        let id = self.id.clone();
        let topic = Arc::clone(&self.topic);
        let mut shutdown_rx = self.topic.shutdown_signal();
        let idle_poll = self.idle_poll;

        let task = tokio::spawn(async move {
            // A restarted loop begins only after the previous one has fully
            // exited, so two loops never drain the same cursor at once.
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            debug!(topic = %topic.name(), subscriber = %id, "consumption loop started");
            loop {
                if *stop_rx.borrow() || topic.is_shutdown() {
                    break;
                }

                let batch = match topic.consume(&id) {
                    Ok(batch) => batch,
                    Err(e) => {
                        error!(subscriber = %id, "consume failed: {}", e);
                        break;
                    }
                };

                if batch.is_empty() {
                    // An append landing between the consume above and the
                    // wait below can slip past the notifier; the idle sleep
                    // bounds how long that stays unnoticed.
                    tokio::select! {
                        _ = topic.data_ready().notified() => {}
                        _ = stop_rx.changed() => {}
                        _ = shutdown_rx.changed() => {}
                        _ = tokio::time::sleep(idle_poll) => {}
                    }
                    continue;
                }

                for record in batch {
                    let offset = record.offset;
                    let outcome =
                        std::panic::catch_unwind(AssertUnwindSafe(|| handler(record)));
                    if outcome.is_err() {
                        error!(subscriber = %id, offset, "handler panicked, skipping record");
                    }
                }
            }
            debug!(topic = %topic.name(), subscriber = %id, "consumption loop stopped");
        });

        control.stop_tx = Some(stop_tx);
        control.task = Some(task);
    }

    /// Signal the consumption loop to stop.
    ///
    /// In-flight handler invocations complete; no new batches are fetched.
    /// The cursor survives in the topic, so a later [`Subscriber::start`]
    /// resumes where consumption stopped.
    pub fn stop(&self) {
        let stop_tx = self.control.lock().stop_tx.take();
        if let Some(stop_tx) = stop_tx {
            let _ = stop_tx.send(true);
            info!(topic = %self.topic.name(), subscriber = %self.id, "stopping consumption loop");
        }
    }

    /// Wait for a previously started consumption loop to finish
    pub async fn join(&self) {
        let task = self.control.lock().task.take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    /// Fetch one batch immediately. An empty batch means "nothing new yet".
    pub fn poll(&self) -> Result<Vec<Record>> {
        self.topic.consume(&self.id)
    }

    /// Wait until a non-empty batch is available or the timeout elapses
    pub async fn poll_wait(&self, timeout: Duration) -> Result<Vec<Record>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let batch = self.topic.consume(&self.id)?;
            if !batch.is_empty() {
                return Ok(batch);
            }
            if self.topic.is_shutdown() {
                return Err(Error::ShuttingDown(self.topic.name().to_string()));
            }
            tokio::select! {
                _ = self.topic.data_ready().notified() => {}
                _ = tokio::time::sleep_until(deadline) => return Err(Error::Timeout),
                _ = tokio::time::sleep(self.idle_poll) => {}
            }
        }
    }
}
