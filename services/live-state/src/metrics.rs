//! Observability and metrics for the live state service
//!
//! Counters for ingestion, normalization, state application and fan-out,
//! plus latency windows for message processing and snapshot building.
//! Exported as a flat map for Prometheus-style exposition.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::Serialize;

/// Alerts kept for inspection; older ones are discarded.
pub const MAX_RETAINED_ALERTS: usize = 100;

/// Core metrics for the live state service.
pub struct ServiceMetrics {
    // Ingestion
    pub messages_received: AtomicU64,
    pub bytes_received: AtomicU64,
    pub messages_malformed: AtomicU64,
    pub messages_ignored: AtomicU64,
    pub fragments_dropped: AtomicU64,

    // State
    pub initial_states_applied: AtomicU64,
    pub updates_applied: AtomicU64,
    pub processing_ns: Mutex<LatencyTracker>,

    // Broadcasting
    pub messages_broadcast: AtomicU64,
    pub subscribers_dropped: AtomicU64,
    pub broadcast_latency_ns: Mutex<LatencyTracker>,

    // Snapshots
    pub snapshots_built: AtomicU64,
    pub snapshot_build_ns: Mutex<LatencyTracker>,

    // Delay buffer
    pub frames_evicted: AtomicU64,

    // Alerts
    pub alerts: Mutex<Vec<Alert>>,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self {
            messages_received: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            messages_malformed: AtomicU64::new(0),
            messages_ignored: AtomicU64::new(0),
            fragments_dropped: AtomicU64::new(0),
            initial_states_applied: AtomicU64::new(0),
            updates_applied: AtomicU64::new(0),
            processing_ns: Mutex::new(LatencyTracker::new(1000)),
            messages_broadcast: AtomicU64::new(0),
            subscribers_dropped: AtomicU64::new(0),
            broadcast_latency_ns: Mutex::new(LatencyTracker::new(1000)),
            snapshots_built: AtomicU64::new(0),
            snapshot_build_ns: Mutex::new(LatencyTracker::new(100)),
            frames_evicted: AtomicU64::new(0),
            alerts: Mutex::new(Vec::new()),
        }
    }

    /// Record a raw message received from the source.
    pub fn record_received(&self, bytes: usize) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record a payload that was not valid JSON.
    pub fn record_malformed(&self) {
        self.messages_malformed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a message that carried no state.
    pub fn record_ignored(&self) {
        self.messages_ignored.fetch_add(1, Ordering::Relaxed);
    }

    /// Record fragments discarded during normalization.
    pub fn record_fragments_dropped(&self, count: usize) {
        if count > 0 {
            self.fragments_dropped.fetch_add(count as u64, Ordering::Relaxed);
        }
    }

    /// Record an initial state or update applied to the store.
    pub fn record_applied(&self, initial: bool, latency_ns: u64) {
        if initial {
            self.initial_states_applied.fetch_add(1, Ordering::Relaxed);
        } else {
            self.updates_applied.fetch_add(1, Ordering::Relaxed);
        }
        if let Ok(mut tracker) = self.processing_ns.lock() {
            tracker.record(latency_ns);
        }
    }

    /// Record a publish to subscribers.
    pub fn record_broadcast(&self, dropped_subscribers: usize, latency_ns: u64) {
        self.messages_broadcast.fetch_add(1, Ordering::Relaxed);
        self.subscribers_dropped
            .fetch_add(dropped_subscribers as u64, Ordering::Relaxed);
        if let Ok(mut tracker) = self.broadcast_latency_ns.lock() {
            tracker.record(latency_ns);
        }
    }

    /// Record a snapshot built.
    pub fn record_snapshot(&self, build_ns: u64) {
        self.snapshots_built.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut tracker) = self.snapshot_build_ns.lock() {
            tracker.record(build_ns);
        }
    }

    /// Record delay buffer frames evicted by cleanup.
    pub fn record_frames_evicted(&self, count: usize) {
        self.frames_evicted.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Check alert thresholds and generate alerts.
    pub fn check_thresholds(&self, thresholds: &AlertThresholds) -> Vec<Alert> {
        let mut alerts = Vec::new();

        let malformed = self.messages_malformed.load(Ordering::Relaxed);
        if malformed > thresholds.max_messages_malformed {
            alerts.push(Alert {
                level: AlertLevel::Warning,
                metric: "messages_malformed".to_string(),
                message: format!(
                    "Malformed messages: {} > threshold {}",
                    malformed, thresholds.max_messages_malformed
                ),
            });
        }

        let fragments = self.fragments_dropped.load(Ordering::Relaxed);
        if fragments > thresholds.max_fragments_dropped {
            alerts.push(Alert {
                level: AlertLevel::Warning,
                metric: "fragments_dropped".to_string(),
                message: format!(
                    "Fragments dropped: {} > threshold {}",
                    fragments, thresholds.max_fragments_dropped
                ),
            });
        }

        let dropped = self.subscribers_dropped.load(Ordering::Relaxed);
        if dropped > thresholds.max_subscribers_dropped {
            alerts.push(Alert {
                level: AlertLevel::Critical,
                metric: "subscribers_dropped".to_string(),
                message: format!(
                    "Subscribers dropped: {} > threshold {}",
                    dropped, thresholds.max_subscribers_dropped
                ),
            });
        }

        if let Ok(tracker) = self.processing_ns.lock() {
            if let Some(p99) = tracker.percentile(99) {
                if p99 > thresholds.max_processing_p99_ns {
                    alerts.push(Alert {
                        level: AlertLevel::Warning,
                        metric: "processing_p99".to_string(),
                        message: format!(
                            "Message processing p99: {}ns > threshold {}ns",
                            p99, thresholds.max_processing_p99_ns
                        ),
                    });
                }
            }
        }

        if let Ok(mut alert_store) = self.alerts.lock() {
            alert_store.extend(alerts.clone());
            let excess = alert_store.len().saturating_sub(MAX_RETAINED_ALERTS);
            alert_store.drain(..excess);
        }

        alerts
    }

    /// Most recent alerts, oldest first.
    pub fn recent_alerts(&self) -> Vec<Alert> {
        self.alerts
            .lock()
            .map(|alerts| alerts.clone())
            .unwrap_or_default()
    }

    /// Export metrics as a BTreeMap for Prometheus-style exposition.
    pub fn export(&self) -> BTreeMap<String, u64> {
        let mut m = BTreeMap::new();
        m.insert("messages_received".to_string(), self.messages_received.load(Ordering::Relaxed));
        m.insert("bytes_received".to_string(), self.bytes_received.load(Ordering::Relaxed));
        m.insert("messages_malformed".to_string(), self.messages_malformed.load(Ordering::Relaxed));
        m.insert("messages_ignored".to_string(), self.messages_ignored.load(Ordering::Relaxed));
        m.insert("fragments_dropped".to_string(), self.fragments_dropped.load(Ordering::Relaxed));
        m.insert("initial_states_applied".to_string(), self.initial_states_applied.load(Ordering::Relaxed));
        m.insert("updates_applied".to_string(), self.updates_applied.load(Ordering::Relaxed));
        m.insert("messages_broadcast".to_string(), self.messages_broadcast.load(Ordering::Relaxed));
        m.insert("subscribers_dropped".to_string(), self.subscribers_dropped.load(Ordering::Relaxed));
        m.insert("snapshots_built".to_string(), self.snapshots_built.load(Ordering::Relaxed));
        m.insert("frames_evicted".to_string(), self.frames_evicted.load(Ordering::Relaxed));
        if let Ok(tracker) = self.processing_ns.lock() {
            if let Some(p99) = tracker.percentile(99) {
                m.insert("processing_p99_ns".to_string(), p99);
            }
        }
        m
    }
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks latency samples over a sliding window for percentiles.
pub struct LatencyTracker {
    samples: VecDeque<u64>,
    max_samples: usize,
}

impl LatencyTracker {
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(max_samples),
            max_samples,
        }
    }

    /// Record a latency sample.
    pub fn record(&mut self, value: u64) {
        if self.samples.len() >= self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    /// Get a percentile value (0-100).
    pub fn percentile(&self, p: usize) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }

        let mut sorted: Vec<u64> = self.samples.iter().copied().collect();
        sorted.sort_unstable();

        let idx = (p as f64 / 100.0 * (sorted.len() - 1) as f64) as usize;
        Some(sorted[idx.min(sorted.len() - 1)])
    }

    /// Average latency.
    pub fn average(&self) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: u64 = self.samples.iter().sum();
        Some(sum / self.samples.len() as u64)
    }

    /// Number of samples recorded.
    pub fn count(&self) -> usize {
        self.samples.len()
    }
}

/// Alert severity level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

/// An alert triggered by threshold breach.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub level: AlertLevel,
    pub metric: String,
    pub message: String,
}

/// Configurable alert thresholds.
#[derive(Debug, Clone)]
pub struct AlertThresholds {
    pub max_messages_malformed: u64,
    pub max_fragments_dropped: u64,
    /// Max subscribers dropped before a critical alert.
    pub max_subscribers_dropped: u64,
    /// Max message processing p99 latency in nanoseconds.
    pub max_processing_p99_ns: u64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            max_messages_malformed: 100,
            max_fragments_dropped: 100,
            max_subscribers_dropped: 50,
            max_processing_p99_ns: 5_000_000, // 5ms
        }
    }
}
