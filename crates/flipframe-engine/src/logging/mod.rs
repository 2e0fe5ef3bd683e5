//! Logging utilities.
//!
//! Centralizes logger initialization. Engine code only talks to the `log`
//! facade; the `env_logger` backend is installed here.

mod init;

pub use init::{init_logging, LoggingConfig};
