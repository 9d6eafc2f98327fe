//! Policies applied by the worker loop.
//!
//! - [`RetryPolicy`]: how long a failed job waits before its next attempt

pub mod retry;

pub use retry::RetryPolicy;
