//! Keel - broker feed bridge with an authoritative account ledger.
//!
//! Keel sits between a broker's real-time wire protocol and local
//! display/analytics consumers. Inbound messages are normalized into a
//! closed set of canonical events, marshalled across a single channel
//! boundary into one consumption context, and applied to per-account
//! balance state and per-instrument position state. Structural position
//! state and completed round trips persist to SQLite and are recovered
//! on startup.

pub mod config;
pub mod error;
pub mod feed;
pub mod services;
pub mod types;

pub use error::{KeelError, Result};
// Re-export commonly used types
pub use types::*;
