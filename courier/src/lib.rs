//! The courier worker daemon and its configuration.

pub mod config;
pub mod controller;

pub use config::{Courier, find_config_file};
pub use controller::SHUTDOWN_BROADCAST;
