//! Fan-out of state messages to subscribers
//!
//! Flow per subscriber: subscribe → seed (`Initial`, plus buffered deltas
//! for delayed views) → `Update` deltas in publish order.
//!
//! The registry is a `BTreeMap` behind one `RwLock`. `publish` holds the
//! read lock only for non-blocking `try_send`s on bounded queues and removes
//! failed subscribers afterwards under the write lock. `subscribe` seeds and
//! registers under the write lock, so no publish can land between the two;
//! a message already covered by the seed is recognised by its sequence and
//! skipped by the handle.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};
use types::ids::SubscriberId;

use crate::backpressure::{BackpressureConfig, DropCounters, DropReason};
use crate::delay::{secs_to_ms, Clock, SharedDelayBuffer};
use crate::events::{StreamMessage, StreamView};
use crate::store::StateStore;

/// Errors returned to a would-be subscriber.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FanoutError {
    #[error("subscriber limit of {limit} reached")]
    SubscriberLimitReached { limit: usize },

    #[error("broadcaster is shut down")]
    Closed,
}

/// Outcome of one publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub dropped: usize,
}

/// Fan-out statistics for observability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FanoutStatistics {
    pub subscribers: usize,
    pub subscribers_total: u64,
    pub messages_published: u64,
    pub subscribers_dropped: u64,
    pub lagged: u64,
    pub disconnected: u64,
}

struct Slot {
    sender: mpsc::Sender<Arc<StreamMessage>>,
    view: StreamView,
}

struct Registry {
    slots: RwLock<BTreeMap<SubscriberId, Slot>>,
    closed: AtomicBool,
    drops: DropCounters,
    messages_published: AtomicU64,
    subscribers_total: AtomicU64,
}

impl Registry {
    fn remove(&self, id: &SubscriberId) -> bool {
        let removed = self
            .slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .is_some();
        if removed {
            debug!(subscriber_id = %id, "Subscriber unsubscribed");
        }
        removed
    }
}

/// Broadcasts state messages to every registered subscriber.
pub struct Broadcaster {
    registry: Arc<Registry>,
    store: Arc<StateStore>,
    buffer: Arc<SharedDelayBuffer>,
    config: BackpressureConfig,
}

impl Broadcaster {
    pub fn new(
        store: Arc<StateStore>,
        buffer: Arc<SharedDelayBuffer>,
        config: BackpressureConfig,
    ) -> Self {
        info!(
            queue_capacity = config.queue_capacity,
            max_subscribers = config.max_subscribers,
            "Broadcaster initialized"
        );

        Self {
            registry: Arc::new(Registry {
                slots: RwLock::new(BTreeMap::new()),
                closed: AtomicBool::new(false),
                drops: DropCounters::default(),
                messages_published: AtomicU64::new(0),
                subscribers_total: AtomicU64::new(0),
            }),
            store,
            buffer,
            config,
        }
    }

    /// Register a subscriber and seed it for `view`.
    pub fn subscribe(&self, view: StreamView) -> Result<SubscriberHandle, FanoutError> {
        if self.registry.closed.load(Ordering::Acquire) {
            return Err(FanoutError::Closed);
        }

        let mut slots = self
            .registry
            .slots
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if slots.len() >= self.config.max_subscribers {
            warn!(limit = self.config.max_subscribers, "Rejecting subscriber, limit reached");
            return Err(FanoutError::SubscriberLimitReached {
                limit: self.config.max_subscribers,
            });
        }

        let seed = self.seed(&view);
        let seed_sequence = seed.front().and_then(|message| message.sequence());
        let capacity = self.config.queue_capacity_for(&view);
        let (sender, receiver) = mpsc::channel(capacity);
        let id = SubscriberId::new();
        slots.insert(id, Slot { sender, view });
        let subscribers = slots.len();
        drop(slots);

        self.registry.subscribers_total.fetch_add(1, Ordering::Relaxed);
        info!(
            subscriber_id = %id,
            view = ?view,
            seeded = seed.len(),
            capacity,
            subscribers,
            "Subscriber registered"
        );

        Ok(SubscriberHandle {
            id,
            view,
            receiver,
            pending: seed,
            seed_sequence,
            held: None,
            last_sequence: 0,
            clock: self.buffer.clock(),
            registry: Arc::downgrade(&self.registry),
        })
    }

    fn seed(&self, view: &StreamView) -> VecDeque<Arc<StreamMessage>> {
        let mut seed = VecDeque::new();
        match view {
            StreamView::Live => {
                let snapshot = self.store.snapshot();
                if snapshot.has_data() {
                    seed.push_back(Arc::new(StreamMessage::from_snapshot(&snapshot)));
                }
            }
            StreamView::Delayed { delay_secs } => {
                if let Some((frame, backlog)) = self.buffer.delayed_with_backlog(*delay_secs) {
                    seed.push_back(Arc::new(StreamMessage::seed_from_frame(&frame)));
                    seed.extend(
                        backlog
                            .iter()
                            .map(|frame| Arc::new(StreamMessage::from_frame(frame))),
                    );
                }
            }
        }
        seed
    }

    /// Deliver a message to every subscriber without blocking.
    ///
    /// Subscribers whose queue is full or closed are removed.
    pub fn publish(&self, message: StreamMessage) -> PublishReport {
        let message = Arc::new(message);
        let mut report = PublishReport::default();
        let mut failed = Vec::new();

        {
            let slots = self
                .registry
                .slots
                .read()
                .unwrap_or_else(PoisonError::into_inner);

            for (id, slot) in slots.iter() {
                match slot.sender.try_send(Arc::clone(&message)) {
                    Ok(()) => report.delivered += 1,
                    Err(TrySendError::Full(_)) => failed.push((*id, DropReason::Lagged)),
                    Err(TrySendError::Closed(_)) => failed.push((*id, DropReason::Disconnected)),
                }
            }
        }

        if !failed.is_empty() {
            let mut slots = self
                .registry
                .slots
                .write()
                .unwrap_or_else(PoisonError::into_inner);

            for (id, reason) in failed {
                if let Some(slot) = slots.remove(&id) {
                    report.dropped += 1;
                    self.registry.drops.record(reason);
                    warn!(
                        subscriber_id = %id,
                        reason = reason.as_str(),
                        view = ?slot.view,
                        "Dropping subscriber"
                    );
                }
            }
        }

        self.registry.messages_published.fetch_add(1, Ordering::Relaxed);
        report
    }

    /// Remove a subscriber. Returns whether it was registered.
    pub fn unsubscribe(&self, id: &SubscriberId) -> bool {
        self.registry.remove(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn statistics(&self) -> FanoutStatistics {
        FanoutStatistics {
            subscribers: self.subscriber_count(),
            subscribers_total: self.registry.subscribers_total.load(Ordering::Relaxed),
            messages_published: self.registry.messages_published.load(Ordering::Relaxed),
            subscribers_dropped: self.registry.drops.total(),
            lagged: self.registry.drops.lagged(),
            disconnected: self.registry.drops.disconnected(),
        }
    }

    /// Refuse new subscribers and close every queue. Handles drain what is
    /// already queued, then end.
    pub fn shutdown(&self) {
        self.registry.closed.store(true, Ordering::Release);
        let mut slots = self
            .registry
            .slots
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let closed = slots.len();
        slots.clear();
        info!(closed, "Broadcaster shut down");
    }
}

/// Receiving end of one subscription. Dropping it unsubscribes.
pub struct SubscriberHandle {
    id: SubscriberId,
    view: StreamView,
    receiver: mpsc::Receiver<Arc<StreamMessage>>,
    pending: VecDeque<Arc<StreamMessage>>,
    /// Sequence of the seed `Initial`, delivered without a hold.
    seed_sequence: Option<u64>,
    /// Message waiting out its delay; kept here so a cancelled `recv`
    /// does not lose it.
    held: Option<Arc<StreamMessage>>,
    last_sequence: u64,
    clock: Arc<dyn Clock>,
    registry: Weak<Registry>,
}

impl SubscriberHandle {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn view(&self) -> StreamView {
        self.view
    }

    /// Next message, in publish order. `None` once the subscription has
    /// been dropped by the broadcaster and its queue is drained.
    ///
    /// The seed is yielded at once. After it, delayed views yield a message
    /// no earlier than its timestamp plus the delay. Cancel safe.
    pub async fn recv(&mut self) -> Option<Arc<StreamMessage>> {
        let message = match self.held.take() {
            Some(message) => message,
            None => self.next_fresh().await?,
        };

        if let Some(wait) = self.hold_time(&message) {
            self.held = Some(Arc::clone(&message));
            tokio::time::sleep(wait).await;
            self.held = None;
        }

        Some(message)
    }

    async fn next_fresh(&mut self) -> Option<Arc<StreamMessage>> {
        loop {
            let message = match self.pending.pop_front() {
                Some(message) => message,
                None => self.receiver.recv().await?,
            };

            if let Some(sequence) = message.sequence() {
                if sequence <= self.last_sequence {
                    debug!(subscriber_id = %self.id, sequence, "Skipping message covered by seed");
                    continue;
                }
                self.last_sequence = sequence;
            }
            return Some(message);
        }
    }

    fn hold_time(&self, message: &StreamMessage) -> Option<Duration> {
        let StreamView::Delayed { delay_secs } = self.view else {
            return None;
        };
        // The seed can be younger than the delay when the buffer holds less
        // history than requested.
        if matches!(message, StreamMessage::Initial { .. })
            && message.sequence() == self.seed_sequence
        {
            return None;
        }
        let due = message.timestamp_ms().saturating_add(secs_to_ms(delay_secs));
        let wait = due.saturating_sub(self.clock.now_ms());
        (wait > 0).then(|| Duration::from_millis(wait as u64))
    }
}

impl Drop for SubscriberHandle {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.id);
        }
    }
}

impl std::fmt::Debug for SubscriberHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberHandle")
            .field("id", &self.id)
            .field("view", &self.view)
            .field("pending", &self.pending.len())
            .field("last_sequence", &self.last_sequence)
            .finish()
    }
}
