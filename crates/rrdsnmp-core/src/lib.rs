//! rrdsnmp-core - sampling scheduler and round-robin archive engine.
//!
//! Provides:
//! - `collector` - OID catalog, protocol client, counter normalizer, metric sampler
//! - `storage` - snapshot model, archive descriptor, round-robin archive store
//! - `graph` - chart model and SVG renderer
//! - `export` - signal-triggered exporter
//! - `config` - validated agent configuration
//! - `fmt` - shared formatting helpers (bytes, rates, memory)
//! - `util` - retry backoff

pub mod collector;
pub mod config;
pub mod export;
pub mod fmt;
pub mod graph;
pub mod storage;
pub mod util;

pub use collector::Shared;
