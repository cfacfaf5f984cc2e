//! Ingestion sources feeding raw upstream messages into the pipeline
//!
//! The pipeline pulls from exactly one `IngestionSource` sequentially, so
//! raw messages are handled strictly in arrival order. Two sources ship
//! with the service:
//! - `ChannelSource`: fed through a cloneable `FeedSender` (an external
//!   upstream connector, or the gateway's ingest endpoint)
//! - `ReplaySource`: a recorded session, one upstream envelope per line
//!
//! Connecting to the live upstream hub, and reconnecting with backoff, is
//! the job of whoever holds the `FeedSender`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use types::message::RawMessage;

use crate::delay::{Clock, SystemClock};

/// Topic assigned to recorded full-state lines.
pub const REPLAY_FULL_STATE_TOPIC: &str = "simulation";
/// Topic assigned to recorded update lines.
pub const REPLAY_UPDATES_TOPIC: &str = "updates";

/// Errors that can occur while feeding or opening a source.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IngestionError {
    #[error("cannot open {path}: {reason}")]
    Io { path: PathBuf, reason: String },

    #[error("ingestion queue is full")]
    Full,

    #[error("ingestion pipeline has stopped")]
    Closed,
}

/// Counters kept by every source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestionStats {
    pub messages_received: u64,
    pub bytes_received: u64,
    /// Input discarded by the source itself (blank or unreadable lines).
    pub skipped: u64,
}

impl IngestionStats {
    fn record(&mut self, raw: &RawMessage) {
        self.messages_received += 1;
        self.bytes_received += raw.len() as u64;
    }
}

/// A sequential stream of raw upstream messages.
#[async_trait]
pub trait IngestionSource: Send {
    /// Next message; `None` when the source is exhausted.
    ///
    /// Must be cancel safe: the pipeline polls it inside `select!`.
    async fn next_message(&mut self) -> Option<RawMessage>;

    fn stats(&self) -> IngestionStats;

    /// Label for logging.
    fn name(&self) -> &'static str;
}

/// Create a bounded feed channel.
pub fn channel(capacity: usize) -> (FeedSender, ChannelSource) {
    channel_with_clock(capacity, Arc::new(SystemClock))
}

/// Create a bounded feed channel whose sender stamps arrival times from
/// `clock`.
pub fn channel_with_clock(capacity: usize, clock: Arc<dyn Clock>) -> (FeedSender, ChannelSource) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (
        FeedSender { sender, clock },
        ChannelSource {
            receiver,
            stats: IngestionStats::default(),
        },
    )
}

/// Producer side of a `ChannelSource`.
#[derive(Debug, Clone)]
pub struct FeedSender {
    sender: mpsc::Sender<RawMessage>,
    clock: Arc<dyn Clock>,
}

impl FeedSender {
    /// Send a message, waiting for queue space.
    pub async fn send(&self, raw: RawMessage) -> Result<(), IngestionError> {
        self.sender
            .send(raw)
            .await
            .map_err(|_| IngestionError::Closed)
    }

    /// Send without waiting.
    pub fn try_send(&self, raw: RawMessage) -> Result<(), IngestionError> {
        self.sender.try_send(raw).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => IngestionError::Full,
            mpsc::error::TrySendError::Closed(_) => IngestionError::Closed,
        })
    }

    /// Stamp a payload with the current time and send it without waiting.
    pub fn submit(&self, topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Result<(), IngestionError> {
        self.try_send(RawMessage::new(topic, payload, self.clock.now_ms()))
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Source fed by one or more `FeedSender`s. Ends once every sender is
/// dropped.
#[derive(Debug)]
pub struct ChannelSource {
    receiver: mpsc::Receiver<RawMessage>,
    stats: IngestionStats,
}

#[async_trait]
impl IngestionSource for ChannelSource {
    async fn next_message(&mut self) -> Option<RawMessage> {
        let raw = self.receiver.recv().await?;
        self.stats.record(&raw);
        Some(raw)
    }

    fn stats(&self) -> IngestionStats {
        self.stats
    }

    fn name(&self) -> &'static str {
        "channel"
    }
}

/// Configuration for session replay.
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// Pause between consecutive lines; zero replays as fast as possible.
    pub interval: Duration,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
        }
    }
}

type BoxedLines = Lines<Box<dyn AsyncBufRead + Send + Unpin>>;

/// Replays a recorded session file.
///
/// Each non-blank line is one upstream envelope: lines with an `R` field
/// become `simulation` messages, lines with `M` become `updates` messages.
pub struct ReplaySource {
    lines: BoxedLines,
    config: ReplayConfig,
    clock: Arc<dyn Clock>,
    next_due: Option<Instant>,
    stats: IngestionStats,
}

impl ReplaySource {
    /// Open a recorded session file.
    pub async fn open(path: impl AsRef<Path>, config: ReplayConfig) -> Result<Self, IngestionError> {
        let path = path.as_ref();
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| IngestionError::Io {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        info!(path = %path.display(), interval_ms = config.interval.as_millis() as u64, "Opened replay file");
        Ok(Self::from_reader(BufReader::new(file), config))
    }

    /// Replay from any buffered reader.
    pub fn from_reader<R>(reader: R, config: ReplayConfig) -> Self
    where
        R: AsyncBufRead + Send + Unpin + 'static,
    {
        let reader: Box<dyn AsyncBufRead + Send + Unpin> = Box::new(reader);
        Self {
            lines: reader.lines(),
            config,
            clock: Arc::new(SystemClock),
            next_due: None,
            stats: IngestionStats::default(),
        }
    }

    /// Stamp arrival times from `clock` instead of the wall clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

#[async_trait]
impl IngestionSource for ReplaySource {
    async fn next_message(&mut self) -> Option<RawMessage> {
        if let Some(due) = self.next_due {
            tokio::time::sleep_until(due).await;
        }

        loop {
            let line = match self.lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    info!(
                        messages = self.stats.messages_received,
                        skipped = self.stats.skipped,
                        "Replay finished"
                    );
                    return None;
                }
                Err(e) => {
                    error!(error = %e, "Replay read failed, stopping");
                    return None;
                }
            };

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let Some(topic) = replay_topic(line) else {
                self.stats.skipped += 1;
                warn!(bytes = line.len(), "Skipping unrecognised replay line");
                continue;
            };

            let raw = RawMessage::new(topic, line.as_bytes().to_vec(), self.clock.now_ms());
            self.stats.record(&raw);
            if !self.config.interval.is_zero() {
                self.next_due = Some(Instant::now() + self.config.interval);
            }
            debug!(topic, bytes = raw.len(), "Replaying line");
            return Some(raw);
        }
    }

    fn stats(&self) -> IngestionStats {
        self.stats
    }

    fn name(&self) -> &'static str {
        "replay"
    }
}

fn replay_topic(line: &str) -> Option<&'static str> {
    match serde_json::from_str::<Value>(line) {
        Ok(Value::Object(envelope)) if envelope.contains_key("R") => Some(REPLAY_FULL_STATE_TOPIC),
        Ok(Value::Object(envelope)) if envelope.contains_key("M") => Some(REPLAY_UPDATES_TOPIC),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delay::ManualClock;
    use std::io::Cursor;

    fn replay(content: &str, interval: Duration) -> ReplaySource {
        ReplaySource::from_reader(Cursor::new(content.as_bytes().to_vec()), ReplayConfig { interval })
    }

    #[tokio::test]
    async fn test_channel_source() {
        let clock = Arc::new(ManualClock::new(5_000));
        let (sender, mut source) = channel_with_clock(4, clock);

        sender.submit("updates", b"{\"M\":[]}".to_vec()).unwrap();
        sender
            .send(RawMessage::new("simulation", b"{}".to_vec(), 1))
            .await
            .unwrap();
        drop(sender);

        let first = source.next_message().await.unwrap();
        assert_eq!(first.topic, "updates");
        assert_eq!(first.arrival_ms, 5_000);
        assert_eq!(source.next_message().await.unwrap().topic, "simulation");
        assert!(source.next_message().await.is_none());

        let stats = source.stats();
        assert_eq!(stats.messages_received, 2);
        assert_eq!(stats.bytes_received, 10);
    }

    #[tokio::test]
    async fn test_feed_sender_full_and_closed() {
        let (sender, source) = channel(1);
        sender.submit("updates", b"1".to_vec()).unwrap();
        assert_eq!(sender.submit("updates", b"2".to_vec()), Err(IngestionError::Full));

        drop(source);
        assert!(sender.is_closed());
        assert_eq!(sender.submit("updates", b"3".to_vec()), Err(IngestionError::Closed));
    }

    #[tokio::test]
    async fn test_replay_topics_and_skips() {
        let content = concat!(
            "{\"R\": {\"SessionInfo\": {\"Name\": \"Race\"}}}\n",
            "\n",
            "not json\n",
            "{\"M\": [{\"A\": [\"Heartbeat\", {}]}]}\n",
            "{\"C\": \"keepalive\"}\n",
        );
        let mut source = replay(content, Duration::ZERO);

        let first = source.next_message().await.unwrap();
        assert_eq!(first.topic, REPLAY_FULL_STATE_TOPIC);
        let second = source.next_message().await.unwrap();
        assert_eq!(second.topic, REPLAY_UPDATES_TOPIC);
        assert!(source.next_message().await.is_none());

        let stats = source.stats();
        assert_eq!(stats.messages_received, 2);
        assert_eq!(stats.skipped, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_pacing() {
        let content = "{\"M\": []}\n{\"M\": []}\n{\"M\": []}\n";
        let mut source = replay(content, Duration::from_millis(100));

        let start = Instant::now();
        while source.next_message().await.is_some() {}
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_replay_open_missing_file() {
        let err = ReplaySource::open("/nonexistent/session.jsonl", ReplayConfig::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, IngestionError::Io { .. }));
    }
}
