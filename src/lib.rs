//! An embedded, append-only log-structured key-value store.
//!
//! Keys and values are written to an append-only active segment; an
//! in-memory index tracks where the newest record for each key lives.
//! Segments rotate once the active one reaches a configurable size, and a
//! background-triggerable merge reclaims space held by superseded and
//! deleted records. See [`Engine`] for the entry point.

mod config;
mod engine;
mod error;
mod file;
mod id;
mod index;
mod merge;
mod record;
mod segment;

pub use config::Config;
pub use engine::Engine;
pub use error::{Error, Result};
pub use id::SegmentId;
