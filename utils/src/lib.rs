//! Shared utilities for the Taler wallet.

pub mod logging;
pub mod time;

pub use logging::{init_logging, LogFormat, LogFormatError};
pub use time::{format_duration, format_millis};
