//! Types library for the live timing state service
//!
//! Provides the data model shared by the core service and the gateway:
//! raw upstream messages, normalized state documents and updates, subscriber
//! identifiers, the decode error taxonomy, and a thin typed facade over the
//! parts of the state document that presentation code reads.
//!
//! # Modules
//! - `ids`: Unique identifiers (SubscriberId)
//! - `document`: Topic-keyed canonical state document
//! - `message`: RawMessage, StateUpdate, InitialState, ProcessedMessage
//! - `casing`: Upstream key naming to canonical lower camel case
//! - `numeric`: Boolean-for-integer coercion helpers for upstream quirks
//! - `timing`: Typed views over timing and driver branches
//! - `errors`: Error taxonomy

pub mod casing;
pub mod document;
pub mod errors;
pub mod ids;
pub mod message;
pub mod numeric;
pub mod timing;

// Library version constant
pub const LIB_VERSION: &str = "1.0.0";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::casing::*;
    pub use crate::document::*;
    pub use crate::errors::*;
    pub use crate::ids::*;
    pub use crate::message::*;
    pub use crate::numeric::*;
    pub use crate::timing::*;
}
