//! Shared building blocks for the courier mail queue.
//!
//! - [`config`]: validated connection and worker configuration
//! - [`events`]: pure-data lifecycle events and the sink that delivers them
//! - [`logging`]: tracing subscriber setup and the `internal!` and `job!` macros
//! - [`time`]: unix millisecond timestamps used throughout the store
//! - [`transport`]: the delivery channels a transport may use

pub mod config;
pub mod events;
pub mod logging;
pub mod time;
pub mod transport;

pub use config::{ConfigError, ConnectionConfig, WorkerConfig};
pub use events::{EventSink, MailEvent, TracingEventSink};
pub use tracing;
pub use transport::TransportKind;

/// Process-wide lifecycle signal broadcast to long-running loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
    Finalised,
}
