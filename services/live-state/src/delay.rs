//! Delay buffer of timestamped full-state frames
//!
//! Every applied event produces one `Frame`: the full document after the
//! event plus the delta that produced it. Subscribers asking for a
//! time-shifted view ("as of N seconds ago") are served from here.
//!
//! `DelayBuffer` is plain data and takes `now_ms` explicitly so it stays
//! deterministic under test. `SharedDelayBuffer` wraps it in its own lock
//! and reads time from an injected `Clock`.

use std::collections::VecDeque;
use std::fmt::Debug;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use types::document::Document;

/// Source of wall clock time in Unix milliseconds.
pub trait Clock: Send + Sync + Debug {
    fn now_ms(&self) -> i64;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Manually driven clock.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(now_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// One buffered state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Frame {
    pub timestamp_ms: i64,
    /// Store sequence of the event that produced this frame.
    pub sequence: u64,
    /// Full document after the event. Topics the event did not touch are
    /// shared with the previous frame.
    pub state: Arc<Document>,
    /// Delta that produced `state`; `None` for an initial state.
    pub update: Option<Arc<Value>>,
}

/// Configuration for the delay buffer.
#[derive(Debug, Clone)]
pub struct DelayBufferConfig {
    /// Hard cap on retained frames.
    pub max_frames: usize,
    /// Extra history kept beyond the requested delay on cleanup.
    pub retention_margin_ms: i64,
}

impl Default for DelayBufferConfig {
    fn default() -> Self {
        Self {
            max_frames: 2000,
            retention_margin_ms: 5_000,
        }
    }
}

/// Frames ordered by non-decreasing timestamp.
#[derive(Debug)]
pub struct DelayBuffer {
    frames: VecDeque<Frame>,
    config: DelayBufferConfig,
}

impl DelayBuffer {
    pub fn new(config: DelayBufferConfig) -> Self {
        Self {
            frames: VecDeque::with_capacity(config.max_frames.min(4096)),
            config,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DelayBufferConfig::default())
    }

    /// Append a frame, restoring timestamp order if it arrived late, then
    /// trim to `max_frames` oldest first.
    pub fn push(&mut self, frame: Frame) {
        let out_of_order = self
            .frames
            .back()
            .is_some_and(|last| frame.timestamp_ms < last.timestamp_ms);

        self.frames.push_back(frame);

        if out_of_order {
            // Stable, so frames with equal timestamps keep arrival order.
            self.frames
                .make_contiguous()
                .sort_by_key(|frame| frame.timestamp_ms);
            debug!(frames = self.frames.len(), "Re-sorted delay buffer after late frame");
        }

        while self.frames.len() > self.config.max_frames {
            self.frames.pop_front();
        }
    }

    pub fn latest(&self) -> Option<&Frame> {
        self.frames.back()
    }

    pub fn oldest(&self) -> Option<&Frame> {
        self.frames.front()
    }

    /// Frame with the greatest timestamp at or before `now_ms - delay`.
    ///
    /// A non-positive delay returns the latest frame. A target older than
    /// everything retained returns the oldest frame.
    pub fn delayed(&self, delay_secs: f64, now_ms: i64) -> Option<&Frame> {
        if self.frames.is_empty() {
            return None;
        }
        if delay_secs.is_nan() || delay_secs <= 0.0 {
            return self.frames.back();
        }

        let target = now_ms.saturating_sub(secs_to_ms(delay_secs));
        let idx = self.frames.partition_point(|frame| frame.timestamp_ms <= target);
        if idx == 0 {
            self.frames.front()
        } else {
            self.frames.get(idx - 1)
        }
    }

    /// Evict frames no longer reachable by a lookup at `delay_secs`, keeping
    /// the retention margin. Returns the number evicted.
    pub fn cleanup(&mut self, delay_secs: f64, now_ms: i64) -> usize {
        let delay_ms = if delay_secs > 0.0 { secs_to_ms(delay_secs) } else { 0 };
        let cutoff = now_ms
            .saturating_sub(delay_ms)
            .saturating_sub(self.config.retention_margin_ms);

        let evictable = self.frames.partition_point(|frame| frame.timestamp_ms <= cutoff);
        // The newest evictable frame still answers lookups at the cutoff.
        let evict = evictable.saturating_sub(1);
        self.frames.drain(..evict);

        if evict > 0 {
            debug!(evicted = evict, remaining = self.frames.len(), "Delay buffer cleanup");
        }
        evict
    }

    /// Whole seconds of history available.
    pub fn max_delay(&self, now_ms: i64) -> f64 {
        match self.frames.front() {
            Some(oldest) => (now_ms.saturating_sub(oldest.timestamp_ms).max(0) / 1000) as f64,
            None => 0.0,
        }
    }

    /// Frames produced after `sequence`, in sequence order.
    pub fn frames_after(&self, sequence: u64) -> Vec<Frame> {
        let mut frames: Vec<Frame> = self
            .frames
            .iter()
            .filter(|frame| frame.sequence > sequence)
            .cloned()
            .collect();
        frames.sort_by_key(|frame| frame.sequence);
        frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

impl Default for DelayBuffer {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Delay buffer statistics for observability.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DelayBufferStatistics {
    pub frames: usize,
    pub max_delay_secs: f64,
    pub oldest_ms: Option<i64>,
    pub newest_ms: Option<i64>,
}

/// Thread-safe delay buffer with its own lock and clock.
#[derive(Debug)]
pub struct SharedDelayBuffer {
    inner: RwLock<DelayBuffer>,
    clock: Arc<dyn Clock>,
}

impl SharedDelayBuffer {
    pub fn new(config: DelayBufferConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: RwLock::new(DelayBuffer::new(config)),
            clock,
        }
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    pub fn push(&self, frame: Frame) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(frame);
    }

    pub fn latest(&self) -> Option<Frame> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .latest()
            .cloned()
    }

    pub fn delayed(&self, delay_secs: f64) -> Option<Frame> {
        let now = self.clock.now_ms();
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .delayed(delay_secs, now)
            .cloned()
    }

    /// Seed frame for a delayed view plus every frame buffered after it,
    /// read under one lock so nothing falls between the two.
    pub fn delayed_with_backlog(&self, delay_secs: f64) -> Option<(Frame, Vec<Frame>)> {
        let now = self.clock.now_ms();
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let seed = inner.delayed(delay_secs, now)?.clone();
        let backlog = inner.frames_after(seed.sequence);
        Some((seed, backlog))
    }

    pub fn cleanup(&self, delay_secs: f64) -> usize {
        let now = self.clock.now_ms();
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .cleanup(delay_secs, now)
    }

    pub fn max_delay(&self) -> f64 {
        let now = self.clock.now_ms();
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .max_delay(now)
    }

    pub fn frames_after(&self, sequence: u64) -> Vec<Frame> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .frames_after(sequence)
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    pub fn clear(&self) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn statistics(&self) -> DelayBufferStatistics {
        let now = self.clock.now_ms();
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        DelayBufferStatistics {
            frames: inner.len(),
            max_delay_secs: inner.max_delay(now),
            oldest_ms: inner.oldest().map(|frame| frame.timestamp_ms),
            newest_ms: inner.latest().map(|frame| frame.timestamp_ms),
        }
    }
}

pub(crate) fn secs_to_ms(secs: f64) -> i64 {
    // `as` saturates on overflow and maps NaN to 0.
    (secs * 1000.0).round() as i64
}
