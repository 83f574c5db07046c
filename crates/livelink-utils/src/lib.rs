//! # livelink Utilities
//!
//! Logging setup shared by the livelink binary and hosts that embed
//! `livelink-core`.

pub mod logging;

// Re-export commonly used logging functions for convenience
pub use logging::{
    default_log_file, init_logging, init_logging_to_file, init_logging_with_level, LogFormat, LogLevel, LoggingError,
};
pub use tracing::{debug, error, info, trace, warn};
