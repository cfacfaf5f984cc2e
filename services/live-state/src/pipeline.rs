//! Ingestion pipeline and service facade
//!
//! `LivePipeline::handle` runs one raw message through the whole chain,
//! synchronously and in order:
//!
//! ```text
//! RawMessage → Normalizer → StateStore → DelayBuffer → Broadcaster
//!                (process)    (apply)       (push)       (publish)
//! ```
//!
//! `LiveState` bundles the shared components. It is built explicitly and
//! passed around in an `Arc`; nothing in the crate is global.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use types::message::{ProcessedMessage, RawMessage};

use crate::config::{ConfigError, LiveStateConfig};
use crate::delay::{Clock, DelayBufferStatistics, Frame, SharedDelayBuffer, SystemClock};
use crate::events::{StreamMessage, StreamView};
use crate::fanout::{Broadcaster, FanoutError, FanoutStatistics, SubscriberHandle};
use crate::ingestion::{IngestionSource, IngestionStats};
use crate::metrics::{Alert, AlertThresholds, ServiceMetrics};
use crate::normalize::Normalizer;
use crate::snapshot::{SnapshotBuilder, VersionedSnapshot};
use crate::store::{StateStore, StoreStatistics};

/// Shared components of the live state service.
pub struct LiveState {
    config: LiveStateConfig,
    store: Arc<StateStore>,
    buffer: Arc<SharedDelayBuffer>,
    broadcaster: Arc<Broadcaster>,
    metrics: Arc<ServiceMetrics>,
    snapshots: SnapshotBuilder,
    normalizer: Normalizer,
}

/// Combined statistics of every component.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatistics {
    pub store: StoreStatistics,
    pub fanout: FanoutStatistics,
    pub delay_buffer: DelayBufferStatistics,
    pub metrics: BTreeMap<String, u64>,
    pub alerts: Vec<Alert>,
}

impl LiveState {
    pub fn new(config: LiveStateConfig, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        config.validate()?;

        let metrics = Arc::new(ServiceMetrics::new());
        let store = Arc::new(StateStore::new());
        let buffer = Arc::new(SharedDelayBuffer::new(config.delay_buffer.clone(), clock));
        let broadcaster = Arc::new(Broadcaster::new(
            Arc::clone(&store),
            Arc::clone(&buffer),
            config.backpressure.clone(),
        ));

        info!(
            max_delay_secs = config.max_delay_secs,
            max_frames = config.delay_buffer.max_frames,
            publish_raw = config.publish_raw,
            "Live state initialized"
        );

        Ok(Self {
            normalizer: Normalizer::new(config.normalizer.clone()),
            snapshots: SnapshotBuilder::with_metrics(Arc::clone(&metrics)),
            config,
            store,
            buffer,
            broadcaster,
            metrics,
        })
    }

    /// Build with the wall clock.
    pub fn with_config(config: LiveStateConfig) -> Result<Self, ConfigError> {
        Self::new(config, Arc::new(SystemClock))
    }

    /// Pipeline driving this state.
    pub fn pipeline(&self) -> LivePipeline {
        LivePipeline {
            config: self.config.clone(),
            normalizer: self.normalizer.clone(),
            store: Arc::clone(&self.store),
            buffer: Arc::clone(&self.buffer),
            broadcaster: Arc::clone(&self.broadcaster),
            metrics: Arc::clone(&self.metrics),
        }
    }

    /// Subscribe to the live view (`delay_secs <= 0`) or a delayed view.
    pub fn subscribe(&self, delay_secs: f64) -> Result<SubscriberHandle, FanoutError> {
        self.broadcaster.subscribe(StreamView::from_delay(delay_secs))
    }

    /// Versioned snapshot of the current document.
    pub fn snapshot(&self) -> VersionedSnapshot {
        self.snapshots.build(&self.store.snapshot())
    }

    /// Versioned snapshot of the document as of `delay_secs` ago. `None`
    /// when nothing has been buffered yet.
    pub fn delayed_snapshot(&self, delay_secs: f64) -> Option<VersionedSnapshot> {
        if delay_secs.is_nan() || delay_secs <= 0.0 {
            return Some(self.snapshot());
        }
        self.buffer
            .delayed(delay_secs)
            .map(|frame| self.snapshots.build_from_frame(&frame))
    }

    pub fn statistics(&self) -> ServiceStatistics {
        ServiceStatistics {
            store: self.store.statistics(),
            fanout: self.broadcaster.statistics(),
            delay_buffer: self.buffer.statistics(),
            metrics: self.metrics.export(),
            alerts: self.metrics.recent_alerts(),
        }
    }

    pub fn config(&self) -> &LiveStateConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn buffer(&self) -> &Arc<SharedDelayBuffer> {
        &self.buffer
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    pub fn metrics(&self) -> &Arc<ServiceMetrics> {
        &self.metrics
    }

    /// Close every subscriber stream.
    pub fn shutdown(&self) {
        self.broadcaster.shutdown();
    }
}

/// Single-writer pipeline from raw messages to subscribers.
#[derive(Clone)]
pub struct LivePipeline {
    config: LiveStateConfig,
    normalizer: Normalizer,
    store: Arc<StateStore>,
    buffer: Arc<SharedDelayBuffer>,
    broadcaster: Arc<Broadcaster>,
    metrics: Arc<ServiceMetrics>,
}

impl LivePipeline {
    /// Process one raw message. Returns the store sequence it produced, or
    /// `None` when the message carried no usable state.
    pub fn handle(&self, raw: &RawMessage) -> Option<u64> {
        self.metrics.record_received(raw.len());

        if self.config.publish_raw {
            self.broadcaster.publish(StreamMessage::from_raw(raw));
        }

        let outcome = self.normalizer.process_with_outcome(raw);
        self.metrics.record_fragments_dropped(outcome.failed_fragments);
        let Some(message) = outcome.message else {
            if outcome.malformed {
                self.metrics.record_malformed();
            } else {
                self.metrics.record_ignored();
            }
            return None;
        };

        let started = Instant::now();
        let timestamp_ms = message.timestamp_ms();
        let kind = message.kind_label();
        let (snapshot, update) = match message {
            ProcessedMessage::Initial(initial) => (self.store.set_initial(&initial), None),
            ProcessedMessage::Update(update) => {
                let applied = self.store.apply_update(&update);
                // After a session reset subscribers need the whole document.
                let delta = (!applied.session_reset).then(|| Arc::new(update.updates));
                (applied.snapshot, delta)
            }
        };

        let frame = Frame {
            timestamp_ms,
            sequence: snapshot.sequence,
            state: snapshot.state,
            update,
        };
        let outbound = StreamMessage::from_frame(&frame);
        self.buffer.push(frame);
        self.metrics
            .record_applied(kind == "initial", started.elapsed().as_nanos() as u64);

        let publish_started = Instant::now();
        let report = self.broadcaster.publish(outbound);
        self.metrics
            .record_broadcast(report.dropped, publish_started.elapsed().as_nanos() as u64);

        debug!(
            sequence = snapshot.sequence,
            kind,
            delivered = report.delivered,
            dropped = report.dropped,
            "Message applied"
        );
        Some(snapshot.sequence)
    }

    /// Evict delay buffer frames beyond the largest servable delay and check
    /// alert thresholds.
    pub fn maintain(&self) -> usize {
        let evicted = self.buffer.cleanup(self.config.max_delay_secs);
        self.metrics.record_frames_evicted(evicted);

        for alert in self.metrics.check_thresholds(&AlertThresholds::default()) {
            warn!(metric = %alert.metric, level = ?alert.level, "{}", alert.message);
        }
        evicted
    }

    /// Drive `source` until it is exhausted or `shutdown` turns true (or
    /// its sender is dropped). Buffer maintenance runs on a fixed interval
    /// in the same loop.
    pub async fn run<S>(&self, mut source: S, mut shutdown: watch::Receiver<bool>) -> IngestionStats
    where
        S: IngestionSource,
    {
        info!(source = source.name(), "Pipeline started");

        let mut maintenance = tokio::time::interval(self.config.cleanup_interval);
        maintenance.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        maintenance.tick().await;

        if !*shutdown.borrow() {
            loop {
                tokio::select! {
                    biased;

                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("Pipeline shutdown requested");
                            break;
                        }
                    }
                    _ = maintenance.tick() => {
                        self.maintain();
                    }
                    raw = source.next_message() => match raw {
                        Some(raw) => {
                            self.handle(&raw);
                        }
                        None => {
                            info!(source = source.name(), "Source exhausted");
                            break;
                        }
                    },
                }
            }
        }

        let stats = source.stats();
        info!(
            source = source.name(),
            messages = stats.messages_received,
            bytes = stats.bytes_received,
            skipped = stats.skipped,
            sequence = self.store.sequence(),
            "Pipeline stopped"
        );
        stats
    }
}
