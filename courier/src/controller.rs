use std::sync::{Arc, LazyLock};

use courier_common::{Signal, TracingEventSink, internal, logging, tracing};
use courier_delivery::WorkerExit;
use tokio::sync::broadcast;

use crate::Courier;

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

/// Wait for SIGINT or SIGTERM and ask every worker to stop.
///
/// A second CTRL+C exits immediately, abandoning the in-flight job to its
/// lease.
///
/// # Errors
///
/// Returns an error if the signal handlers cannot be installed.
pub async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!(level = INFO, "CTRL+C entered -- Enter it again to force shutdown");
        }
        _ = terminate.recv() => {
            internal!(level = INFO, "Terminate Signal received, shutting down");
        }
    };

    SHUTDOWN_BROADCAST
        .send(Signal::Shutdown)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string()))?;

    tokio::signal::ctrl_c().await?;
    internal!(level = WARN, "Forcing shutdown");
    std::process::exit(130);
}

impl Courier {
    /// Run a worker until it is told to stop or outgrows its memory limit.
    ///
    /// Both ends are a clean exit; a supervisor is expected to start a fresh
    /// worker after a memory-limit exit.
    ///
    /// # Errors
    ///
    /// This function will return an error if the store, transport or worker
    /// cannot be built from the configuration.
    pub async fn run(self) -> anyhow::Result<()> {
        logging::init();

        internal!(
            level = INFO,
            "Courier starting with {} transport",
            self.transport.kind()
        );

        let store = self.store()?;
        let worker = self.worker(store, Arc::new(TracingEventSink))?;

        let receiver = SHUTDOWN_BROADCAST.subscribe();
        let signals = tokio::spawn(async {
            if let Err(err) = shutdown().await {
                tracing::error!("Unable to listen for shutdown signals: {err}");
            }
        });

        let exit = worker.run(receiver).await;
        signals.abort();

        match exit? {
            WorkerExit::Stopped => internal!(level = INFO, "Worker stopped"),
            WorkerExit::MemoryExceeded {
                used_bytes,
                limit_bytes,
            } => internal!(
                level = WARN,
                "Worker exited after using {used_bytes} of {limit_bytes} bytes"
            ),
        }

        SHUTDOWN_BROADCAST.send(Signal::Finalised).ok();
        internal!(level = INFO, "Shutting down...");

        Ok(())
    }
}
