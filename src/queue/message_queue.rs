//! Priority aware message queue with per-type processors, retry with
//! exponential backoff, expiration and optional persistence.
//!
//! All queue state lives behind one async mutex. Processors run on their
//! own task with the lock released; a failed message goes back into the same
//! ordered list with an `available_at` time, and a timer triggers the drain
//! that picks it up. A message stays in the persisted snapshot until it has
//! been processed or dropped.
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use tracing_futures::Instrument;

use super::message::{NewMessage, ProcessingMode, QueueMessage};
use super::retry::RetryPolicy;
use super::stats::{QueueStats, StatsRecorder};
use crate::clock::Clock;
use crate::error::{QueueError, Result};
use crate::event::Priority;
use crate::notify::{Category, Notification, Notifier, Severity};
use crate::settings::QueueSettings;
use crate::storage::{self, Storage};

pub const PERSISTENCE_KEY: &str = "queue:messages";

/// Handles every message of one type
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    async fn process(&self, message: QueueMessage) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> MessageProcessor for F
where
    F: Fn(QueueMessage) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn process(&self, message: QueueMessage) -> anyhow::Result<()> {
        (self)(message).await
    }
}

/// Returns false to refuse a message at enqueue time
pub type MessageFilter = Arc<dyn Fn(&QueueMessage) -> bool + Send + Sync>;

struct QueueState {
    messages: Vec<QueueMessage>,
    /// Taken by a drain, still part of the persisted snapshot
    in_flight: Vec<QueueMessage>,
    processors: HashMap<String, Arc<dyn MessageProcessor>>,
    filters: Vec<MessageFilter>,
    retry: RetryPolicy,
    stats: StatsRecorder,
    next_sequence: u64,
}

impl QueueState {
    /// Place a message according to the processing mode
    fn insert(&mut self, mode: ProcessingMode, message: QueueMessage) {
        match mode {
            ProcessingMode::Fifo => self.messages.push(message),
            ProcessingMode::Lifo => self.messages.insert(0, message),
            ProcessingMode::Priority => {
                let position = self
                    .messages
                    .iter()
                    .position(|queued| queued.priority < message.priority)
                    .unwrap_or(self.messages.len());
                self.messages.insert(position, message);
            }
        }
    }

    fn evict_oldest(&mut self) -> Option<QueueMessage> {
        let index = self
            .messages
            .iter()
            .enumerate()
            .min_by_key(|(_, message)| message.sequence)
            .map(|(index, _)| index)?;
        Some(self.messages.remove(index))
    }

    fn drop_expired(&mut self, now: i64) -> usize {
        let before = self.messages.len();
        self.messages.retain(|message| !message.is_expired(now));
        let expired = before - self.messages.len();
        self.stats.expired += expired as u64;
        expired
    }

    fn finish(&mut self, id: &str) {
        self.in_flight.retain(|message| message.id != id);
    }
}

/// Clears the draining flag even if the drain future is dropped mid-pass
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct Inner {
    settings: QueueSettings,
    state: Mutex<QueueState>,
    storage: Option<Arc<dyn Storage>>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    draining: AtomicBool,
    rerun: AtomicBool,
    retry_timer: std::sync::Mutex<Option<JoinHandle<()>>>,
}

/// Cloneable handle to a shared queue
#[derive(Clone)]
pub struct MessageQueue {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for MessageQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageQueue")
            .field("settings", &self.inner.settings)
            .field("persistent", &self.inner.storage.is_some())
            .finish()
    }
}

impl MessageQueue {
    /// In-memory queue
    pub fn new(settings: QueueSettings, clock: Arc<dyn Clock>, notifier: Arc<dyn Notifier>) -> Self {
        Self::build(settings, None, Vec::new(), clock, notifier)
    }

    /// Queue backed by `storage`. When persistence is enabled the stored
    /// snapshot is loaded and expired entries are discarded. An unreadable
    /// snapshot is logged and the queue starts empty.
    pub async fn with_storage(
        settings: QueueSettings,
        storage: Arc<dyn Storage>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        if !settings.persistence {
            return Self::new(settings, clock, notifier);
        }
        let now = clock.now_ms();
        let mut messages = match load_snapshot(storage.as_ref()).await {
            Ok(messages) => messages,
            Err(err) => {
                warn!("Failed to restore queue snapshot, starting empty: {}", err);
                Vec::new()
            }
        };
        let loaded = messages.len();
        messages.retain(|message| !message.is_expired(now));
        info!(
            "Restored {} queued messages ({} expired)",
            messages.len(),
            loaded - messages.len()
        );
        Self::build(settings, Some(storage), messages, clock, notifier)
    }

    fn build(
        settings: QueueSettings,
        storage: Option<Arc<dyn Storage>>,
        messages: Vec<QueueMessage>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let next_sequence = messages
            .iter()
            .map(|message| message.sequence + 1)
            .max()
            .unwrap_or(0);
        let state = QueueState {
            messages,
            in_flight: Vec::new(),
            processors: HashMap::new(),
            filters: Vec::new(),
            retry: RetryPolicy::from(&settings.retry),
            stats: StatsRecorder::default(),
            next_sequence,
        };
        Self {
            inner: Arc::new(Inner {
                settings,
                state: Mutex::new(state),
                storage,
                clock,
                notifier,
                draining: AtomicBool::new(false),
                rerun: AtomicBool::new(false),
                retry_timer: std::sync::Mutex::new(None),
            }),
        }
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.inner.settings
    }

    pub async fn set_retry_policy(&self, policy: RetryPolicy) {
        self.inner.state.lock().await.retry = policy;
    }

    pub async fn register_processor<P>(&self, message_type: impl Into<String>, processor: P)
    where
        P: MessageProcessor + 'static,
    {
        let message_type = message_type.into();
        debug!("Registered processor for '{}'", message_type);
        self.inner
            .state
            .lock()
            .await
            .processors
            .insert(message_type, Arc::new(processor));
    }

    /// Returns true if a processor was registered for this type
    pub async fn unregister_processor(&self, message_type: &str) -> bool {
        self.inner
            .state
            .lock()
            .await
            .processors
            .remove(message_type)
            .is_some()
    }

    pub async fn add_filter<F>(&self, filter: F)
    where
        F: Fn(&QueueMessage) -> bool + Send + Sync + 'static,
    {
        self.inner.state.lock().await.filters.push(Arc::new(filter));
    }

    /// Store a message and return its id
    pub async fn enqueue(&self, new: NewMessage) -> std::result::Result<String, QueueError> {
        let now = self.inner.clock.now_ms();
        let mut state = self.inner.state.lock().await;
        let message = new.into_message(now, state.retry.max_retries, state.next_sequence);

        if !state.filters.iter().all(|filter| filter(&message)) {
            state.stats.filtered += 1;
            debug!(message_type = %message.message_type, "Message rejected by filter");
            return Err(QueueError::Filtered {
                message_type: message.message_type,
            });
        }
        state.next_sequence += 1;

        if state.messages.len() >= self.inner.settings.max_size {
            if let Some(evicted) = state.evict_oldest() {
                state.stats.dropped += 1;
                warn!(
                    id = %evicted.id,
                    message_type = %evicted.message_type,
                    "Queue full, evicted oldest message"
                );
            }
        }

        let id = message.id.clone();
        debug!(
            id = %id,
            message_type = %message.message_type,
            priority = %message.priority,
            "Enqueued message"
        );
        state.insert(self.inner.settings.processing_mode, message);
        state.stats.enqueued += 1;
        self.persist(&state).await;
        Ok(id)
    }

    /// Remove a queued message by id
    pub async fn remove(&self, id: &str) -> std::result::Result<QueueMessage, QueueError> {
        let mut state = self.inner.state.lock().await;
        let index = state
            .messages
            .iter()
            .position(|message| message.id == id)
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;
        let message = state.messages.remove(index);
        self.persist(&state).await;
        Ok(message)
    }

    /// Drop every queued message; returns how many were removed
    pub async fn clear(&self) -> usize {
        let mut state = self.inner.state.lock().await;
        let cleared = state.messages.len();
        state.messages.clear();
        self.persist(&state).await;
        info!("Cleared {} queued messages", cleared);
        cleared
    }

    /// Snapshot of the queued messages in drain order
    pub async fn messages(&self) -> Vec<QueueMessage> {
        self.inner.state.lock().await.messages.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.state.lock().await.messages.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.state.lock().await.messages.is_empty()
    }

    pub async fn stats(&self) -> QueueStats {
        let now = self.inner.clock.now_ms();
        let state = self.inner.state.lock().await;
        let oldest = state
            .messages
            .iter()
            .map(|message| message.age_ms(now))
            .max();
        state.stats.snapshot(state.messages.len(), oldest)
    }

    /// Queued message counts per priority
    pub async fn counts_by_priority(&self) -> HashMap<Priority, usize> {
        let state = self.inner.state.lock().await;
        let mut counts = HashMap::new();
        for message in state.messages.iter() {
            *counts.entry(message.priority).or_insert(0) += 1;
        }
        counts
    }

    /// Drain every message that is ready to run, one at a time. If a drain
    /// is already running this returns immediately and the active drain
    /// makes another pass. Returns the number of messages handled.
    pub async fn process_messages(&self) -> usize {
        if self.inner.draining.swap(true, Ordering::SeqCst) {
            self.inner.rerun.store(true, Ordering::SeqCst);
            return 0;
        }

        let mut handled = 0;
        loop {
            {
                let _draining = DrainGuard(&self.inner.draining);
                self.inner.rerun.store(false, Ordering::SeqCst);
                while let Some((message, processor)) = self.take_next().await {
                    self.run_one(message, processor).await;
                    handled += 1;
                }
            }

            // a request that arrived after the last pass found nothing
            let requested = self.inner.rerun.swap(false, Ordering::SeqCst);
            if !requested || self.inner.draining.swap(true, Ordering::SeqCst) {
                break;
            }
        }

        self.schedule_retry().await;
        handled
    }

    async fn take_next(&self) -> Option<(QueueMessage, Option<Arc<dyn MessageProcessor>>)> {
        let now = self.inner.clock.now_ms();
        let mut state = self.inner.state.lock().await;
        let expired = state.drop_expired(now);
        if expired > 0 {
            debug!("Discarded {} expired messages", expired);
        }

        let next = state
            .messages
            .iter()
            .position(|message| message.is_available(now))
            .map(|index| state.messages.remove(index));
        if let Some(message) = &next {
            state.in_flight.push(message.clone());
        }
        if expired > 0 {
            self.persist(&state).await;
        }

        next.map(|message| {
            let processor = state.processors.get(&message.message_type).cloned();
            (message, processor)
        })
    }

    async fn run_one(&self, message: QueueMessage, processor: Option<Arc<dyn MessageProcessor>>) {
        let started = Instant::now();
        let span = tracing::debug_span!(
            "queue_message",
            id = %message.id,
            message_type = %message.message_type,
            attempt = message.retry_count + 1,
        );
        let result = match processor {
            Some(processor) => {
                let task = message.clone();
                tokio::spawn(async move { processor.process(task).await }.instrument(span))
                    .await
                    .unwrap_or_else(|err| Err(anyhow::anyhow!("processor panicked: {}", err)))
            }
            None => Err(anyhow::Error::new(QueueError::NoProcessor {
                message_type: message.message_type.clone(),
            })),
        };
        let elapsed = started.elapsed();

        match result {
            Ok(()) => {
                let mut state = self.inner.state.lock().await;
                state.finish(&message.id);
                state.stats.processed += 1;
                state.stats.record_duration(elapsed);
                self.persist(&state).await;
                debug!(id = %message.id, "Processed message");
            }
            Err(err) => self.handle_failure(message, err, elapsed).await,
        }
    }

    async fn handle_failure(&self, mut message: QueueMessage, err: anyhow::Error, elapsed: Duration) {
        message.retry_count += 1;
        let now = self.inner.clock.now_ms();
        let mut state = self.inner.state.lock().await;
        state.finish(&message.id);
        state.stats.failed += 1;
        state.stats.record_duration(elapsed);

        if message.retry_count > message.max_retries {
            state.stats.dropped += 1;
            self.persist(&state).await;
            drop(state);
            let failure = QueueError::Processing {
                message_id: message.id.clone(),
                reason: err.to_string(),
            };
            error!(
                message_type = %message.message_type,
                attempts = message.retry_count,
                "Dropping message: {}",
                failure
            );
            self.inner.notifier.notify(
                Notification::new(
                    format!(
                        "Message of type '{}' dropped after {} attempts",
                        message.message_type, message.retry_count
                    ),
                    Category::Queue,
                    Severity::High,
                )
                .with_priority(Priority::High)
                .with_context(json!({
                    "messageId": message.id,
                    "type": message.message_type,
                    "source": message.source,
                    "error": err.to_string(),
                })),
            );
            return;
        }

        if !state.retry.should_retry(&message, &err) {
            state.stats.dropped += 1;
            self.persist(&state).await;
            debug!(id = %message.id, "Retry condition declined message: {}", err);
            return;
        }

        let delay = state.retry.delay_for(message.retry_count);
        warn!(
            id = %message.id,
            retry_count = message.retry_count,
            delay_ms = delay,
            "Message failed, scheduling retry: {}",
            err
        );
        message.available_at = Some(now + delay as i64);
        state.insert(self.inner.settings.processing_mode, message);
        self.persist(&state).await;
    }

    /// Arm a timer for the earliest message waiting on backoff
    async fn schedule_retry(&self) {
        let now = self.inner.clock.now_ms();
        let earliest = {
            let state = self.inner.state.lock().await;
            state
                .messages
                .iter()
                .filter_map(|message| message.available_at)
                .filter(|at| *at > now)
                .min()
        };
        let Some(at) = earliest else {
            return;
        };

        let delay = Duration::from_millis((at - now) as u64);
        let handle = tokio::spawn(self.drain_after(delay));
        if let Ok(mut slot) = self.inner.retry_timer.lock() {
            if let Some(previous) = slot.replace(handle) {
                previous.abort();
            }
        }
    }

    /// The timer re-enters `process_messages`, so its future is boxed behind
    /// a nameable type to keep the recursion `Send`.
    fn drain_after(&self, delay: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        let queue = self.clone();
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            if let Ok(mut slot) = queue.inner.retry_timer.lock() {
                slot.take();
            }
            queue.process_messages().await;
        })
    }

    /// Drain on a fixed interval until the handle is aborted
    pub fn start(&self) -> JoinHandle<()> {
        let queue = self.clone();
        let every = Duration::from_millis(self.inner.settings.processing_interval_ms.max(1));
        let span = tracing::debug_span!("queue_drain");
        tokio::spawn(
            async move {
                let mut interval = tokio::time::interval(every);
                info!("Queue drain loop started with {}ms interval", every.as_millis());
                loop {
                    interval.tick().await;
                    let handled = queue.process_messages().await;
                    if handled > 0 {
                        debug!("Drained {} messages", handled);
                    }
                }
            }
            .instrument(span),
        )
    }

    async fn persist(&self, state: &QueueState) {
        let Some(storage) = &self.inner.storage else {
            return;
        };
        let snapshot: Vec<&QueueMessage> = state.in_flight.iter().chain(&state.messages).collect();
        if let Err(err) = storage::set_typed(storage.as_ref(), PERSISTENCE_KEY, &snapshot).await {
            warn!("Failed to persist queue snapshot: {}", err);
        }
    }
}

async fn load_snapshot(storage: &dyn Storage) -> Result<Vec<QueueMessage>> {
    Ok(storage::get_typed(storage, PERSISTENCE_KEY)
        .await?
        .unwrap_or_default())
}
