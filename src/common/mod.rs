//! Common utilities and types shared across shardmeta

pub mod config;
pub mod error;
pub mod utils;

pub use config::{Config, CoordinatorConfig, GcConfig};
pub use error::{Error, Result};
pub use utils::{current_hostname, parse_duration, timestamp_now, validate_product};
