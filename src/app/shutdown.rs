use super::service::ServiceError;
use crate::sender::StatsSnapshot;
use std::time::Duration;
use tokio::signal;
#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal as unix_signal};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

// Fits within Docker's default 10s stop grace period with room for the
// final connection close.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(4);

/// Owns the running tasks. Dropping it without `shutdown` leaves them running.
#[derive(Debug)]
pub struct ShutdownHandle {
    cancel: CancellationToken,
    forwarder: JoinHandle<StatsSnapshot>,
    collector: JoinHandle<()>,
    timeout: Duration,
}

impl ShutdownHandle {
    pub fn new(
        cancel: CancellationToken,
        forwarder: JoinHandle<StatsSnapshot>,
        collector: JoinHandle<()>,
    ) -> Self {
        Self {
            cancel,
            forwarder,
            collector,
            timeout: SHUTDOWN_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Cancel both tasks and wait for the forwarder to drain. Tasks still
    /// running after the timeout are aborted.
    pub async fn shutdown(self) -> Result<StatsSnapshot, ServiceError> {
        let Self {
            cancel,
            forwarder,
            collector,
            timeout,
        } = self;

        info!("Initiating graceful shutdown...");
        cancel.cancel();

        let forwarder_abort = forwarder.abort_handle();
        let collector_abort = collector.abort_handle();
        let joined = tokio::time::timeout(timeout, async move {
            if let Err(e) = collector.await {
                warn!("Log source task ended abnormally: {}", e);
            }
            forwarder.await
        })
        .await;

        match joined {
            Ok(Ok(snapshot)) => {
                info!("Graceful shutdown completed");
                Ok(snapshot)
            }
            Ok(Err(e)) => Err(ServiceError::TaskFailed(e.to_string())),
            Err(_) => {
                error!("Shutdown timeout exceeded, aborting tasks");
                forwarder_abort.abort();
                collector_abort.abort();
                Err(ServiceError::ShutdownTimeout)
            }
        }
    }

    /// Block until a signal arrives or a task cancels the run, then shut down.
    pub async fn wait_for_shutdown(self) -> Result<StatsSnapshot, ServiceError> {
        tokio::select! {
            result = SignalHandler::wait() => {
                if let Err(e) = result {
                    error!("Failed to listen for shutdown signals: {}", e);
                }
            }
            _ = self.cancel.cancelled() => {
                warn!("Pipeline stopped on its own");
            }
        }
        self.shutdown().await
    }
}

pub struct SignalHandler;

impl SignalHandler {
    /// Resolve on SIGINT, or SIGTERM on unix.
    pub async fn wait() -> std::io::Result<()> {
        #[cfg(unix)]
        {
            let mut sigterm = unix_signal(SignalKind::terminate())?;
            tokio::select! {
                result = signal::ctrl_c() => {
                    result?;
                    info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
                }
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown");
                }
            }
            Ok(())
        }

        #[cfg(not(unix))]
        {
            signal::ctrl_c().await?;
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
            Ok(())
        }
    }
}
