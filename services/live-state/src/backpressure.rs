//! Backpressure policy for subscriber queues
//!
//! Every subscriber owns a bounded outbound queue. Publishing never blocks:
//! a subscriber whose queue is full is lagging and gets disconnected, so
//! one slow consumer can never stall the others or the ingestion path.
//!
//! Delayed subscribers hold each message for the length of their delay
//! before handing it to the transport, so their queues need headroom
//! proportional to the delay.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::events::StreamView;

/// Why a subscriber was removed by the broadcaster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Queue full: the consumer is not keeping up.
    Lagged,
    /// Receiving end already gone.
    Disconnected,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::Lagged => "lagged",
            DropReason::Disconnected => "disconnected",
        }
    }
}

/// Configuration for subscriber queues.
#[derive(Debug, Clone)]
pub struct BackpressureConfig {
    /// Queue capacity of a live subscriber.
    pub queue_capacity: usize,
    /// Extra queue slots per second of delay for delayed subscribers.
    pub delayed_rate_allowance: usize,
    /// Upper bound on any single queue.
    pub max_queue_capacity: usize,
    /// Maximum concurrently registered subscribers.
    pub max_subscribers: usize,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            delayed_rate_allowance: 50,
            max_queue_capacity: 65_536,
            max_subscribers: 10_000,
        }
    }
}

impl BackpressureConfig {
    /// Queue capacity for a subscriber with the given view.
    pub fn queue_capacity_for(&self, view: &StreamView) -> usize {
        let base = self.queue_capacity.max(1);
        let extra = match view {
            StreamView::Live => 0,
            StreamView::Delayed { delay_secs } => {
                (delay_secs.ceil().max(0.0) as usize).saturating_mul(self.delayed_rate_allowance)
            }
        };
        base.saturating_add(extra).min(self.max_queue_capacity.max(base))
    }
}

/// Running counts of removed subscribers.
#[derive(Debug, Default)]
pub struct DropCounters {
    lagged: AtomicU64,
    disconnected: AtomicU64,
}

impl DropCounters {
    pub fn record(&self, reason: DropReason) {
        match reason {
            DropReason::Lagged => self.lagged.fetch_add(1, Ordering::Relaxed),
            DropReason::Disconnected => self.disconnected.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn lagged(&self) -> u64 {
        self.lagged.load(Ordering::Relaxed)
    }

    pub fn disconnected(&self) -> u64 {
        self.disconnected.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.lagged() + self.disconnected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_capacity() {
        let config = BackpressureConfig::default();
        assert_eq!(config.queue_capacity_for(&StreamView::Live), 1024);
    }

    #[test]
    fn test_delayed_capacity_scales_with_delay() {
        let config = BackpressureConfig {
            queue_capacity: 100,
            delayed_rate_allowance: 10,
            max_queue_capacity: 1_000,
            max_subscribers: 1,
        };
        assert_eq!(
            config.queue_capacity_for(&StreamView::Delayed { delay_secs: 2.5 }),
            130
        );
        assert_eq!(
            config.queue_capacity_for(&StreamView::Delayed { delay_secs: 3600.0 }),
            1_000
        );
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let config = BackpressureConfig {
            queue_capacity: 0,
            ..BackpressureConfig::default()
        };
        assert_eq!(config.queue_capacity_for(&StreamView::Live), 1);
    }

    #[test]
    fn test_drop_counters() {
        let counters = DropCounters::default();
        counters.record(DropReason::Lagged);
        counters.record(DropReason::Lagged);
        counters.record(DropReason::Disconnected);

        assert_eq!(counters.lagged(), 2);
        assert_eq!(counters.disconnected(), 1);
        assert_eq!(counters.total(), 3);
        assert_eq!(DropReason::Lagged.as_str(), "lagged");
    }
}
