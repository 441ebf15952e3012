//! ticketline-core library.
//!
//! Rebuilds canonical ticket metadata from an append-only audit log and
//! merges it with conversation threads into one ordered timeline.
//!
//! # Conventions
//!
//! - **Errors**: `thiserror` enums at the library surface ([`error::EngineError`],
//!   [`error::SourceError`]); `anyhow::Result` for config and database setup.
//! - **Logging**: `tracing` macros (`info!`, `warn!`, `debug!`). Nothing here
//!   installs a subscriber.
//! - **Boundaries**: all I/O goes through the traits in [`source`]. The
//!   reconstruction and merge functions are pure.

pub mod access;
pub mod classify;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod feed;
pub mod lease;
pub mod memory;
pub mod model;
pub mod reconstruct;
pub mod source;
pub mod timeline;

pub use access::Viewer;
pub use engine::{BatchReport, Engine, EngineConfig, Recomputed};
pub use error::{EngineError, ErrorCode, SourceError};
pub use feed::{ChangeFeed, FeedOutcome};
pub use timeline::{Timeline, TimelineEvent, TimelineEventType};
