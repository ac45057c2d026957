//! # meshcall Diagnostics
//!
//! Debugging and diagnostic tools for meshcall.
//! Provides logging initialisation and per-call connection reports.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod connection_analyzer;
pub mod debug_logger;

// Re-export main types
pub use connection_analyzer::{CallReport, ConnectionInfo, ConnectionState};
pub use debug_logger::{init_logging, DebugLogger, LogConfig};
