//! Live State Service
//!
//! Consumes the multiplexed upstream timing feed and produces:
//! - One canonical state document, updated in arrival order
//! - Incremental deltas fanned out to any number of subscribers
//! - Time-shifted views of the document ("as of N seconds ago")
//! - Versioned, checksummed snapshots for initial loads
//!
//! # Architecture
//!
//! ```text
//!   Upstream feed / replay file
//!          │
//!      ┌───▼────┐
//!      │Ingest  │  ← one source, read sequentially
//!      └───┬────┘
//!          │ RawMessage
//!   ┌──────▼──────┐
//!   │ Normalizer  │  ← inflate .z topics, camelCase keys, drop _kf
//!   └──────┬──────┘
//!          │ InitialState | StateUpdate
//!   ┌──────▼──────┐
//!   │ StateStore  │  ← recursive merge, Arc snapshots
//!   └──────┬──────┘
//!          │ Frame
//!   ┌──────▼──────┐
//!   │DelayBuffer  │  ← timestamped frames for delayed views
//!   └──────┬──────┘
//!          │ StreamMessage
//!   ┌──────▼──────┐
//!   │ Broadcaster │  ← bounded per-subscriber queues
//!   └─────────────┘
//! ```

pub mod backpressure;
pub mod compression;
pub mod config;
pub mod delay;
pub mod events;
pub mod fanout;
pub mod ingestion;
pub mod merge;
pub mod metrics;
pub mod normalize;
pub mod pipeline;
pub mod snapshot;
pub mod store;

pub use config::LiveStateConfig;
pub use pipeline::{LivePipeline, LiveState};

// Library version
pub const SERVICE_VERSION: &str = "0.1.0";
