//! Restack Core - Shared Types
//!
//! Error and configuration types used across the restack crates.

pub mod config;
pub mod error;

// Re-export commonly used types
pub use config::{LogLevel, RestackConfig};
pub use error::{RestackError, Result};

/// Restack version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
