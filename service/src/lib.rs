//! Process-wide infrastructure for the Qonic client: configuration and logging.

pub mod config;
pub mod logging;
