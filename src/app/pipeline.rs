use crate::{
    domain::LogMessage,
    enrich::Enricher,
    reliability::RetryPolicy,
    sender::{Connection, PipelineStats, StatsSnapshot, Transport, TransportError},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Connected,
    Streaming,
    /// The last write failed; the connection is gone until the next dial.
    Faulted,
    Closed,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub write_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            write_timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
        }
    }
}

/// One adapter: a connection to the collector and the loop that feeds it.
pub struct ForwardingPipeline {
    transport: Arc<dyn Transport>,
    connection: Option<Box<dyn Connection>>,
    enricher: Enricher,
    config: PipelineConfig,
    stats: PipelineStats,
    state: PipelineState,
}

impl ForwardingPipeline {
    /// Dial the collector. An adapter that cannot connect is never created.
    pub async fn connect(
        transport: Arc<dyn Transport>,
        enricher: Enricher,
        config: PipelineConfig,
    ) -> Result<Self, TransportError> {
        let connection = transport.dial().await?;
        info!(
            "Connected to {} (delivery={}, write_timeout={:?})",
            transport.describe(),
            config.retry.mode(),
            config.write_timeout
        );

        Ok(Self {
            transport,
            connection: Some(connection),
            enricher,
            config,
            stats: PipelineStats::new(),
            state: PipelineState::Connected,
        })
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Handle on the counters; stays valid after `run` consumes the pipeline.
    pub fn stats(&self) -> PipelineStats {
        self.stats.clone()
    }

    /// Consume `messages` until the channel closes or `cancel` fires.
    pub async fn run(
        mut self,
        mut messages: mpsc::Receiver<LogMessage>,
        cancel: CancellationToken,
    ) -> StatsSnapshot {
        self.state = PipelineState::Streaming;
        info!("Forwarding to {}", self.transport.describe());

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!("Received shutdown signal, stopping forwarding loop");
                    break;
                }

                message = messages.recv() => match message {
                    Some(message) => self.forward(message, &cancel).await,
                    None => {
                        info!("Message channel closed, stopping forwarding loop");
                        break;
                    }
                },
            }
        }

        self.close().await
    }

    async fn forward(&mut self, message: LogMessage, cancel: &CancellationToken) {
        self.stats.record_received();
        let container_id = message.container_id();

        let enriched = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.enricher.enrich(&message) => Some(result),
        };
        let Some(enriched) = enriched else {
            warn!(container_id, "Shutdown during metadata lookup, dropping record");
            self.stats.record_dropped();
            return;
        };

        let line = match enriched.and_then(|record| record.to_json_line()) {
            Ok(line) => line,
            Err(e) => {
                error!(container_id, stage = "serialize", "logstash: could not marshal JSON: {}", e);
                self.stats.record_dropped();
                return;
            }
        };

        self.deliver(&line, container_id, cancel).await;
    }

    /// Write one line, applying the delivery mode on failure.
    async fn deliver(&mut self, line: &[u8], container_id: &str, cancel: &CancellationToken) -> bool {
        let mut attempts: u32 = 0;

        loop {
            let written = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = self.write(line) => Some(result),
            };
            let Some(written) = written else {
                warn!(container_id, "Shutdown during write, dropping record");
                self.stats.record_dropped();
                return false;
            };

            match written {
                Ok(()) => {
                    self.stats.record_forwarded(line.len());
                    if self.state == PipelineState::Faulted {
                        info!(
                            "Connection to {} restored after {} retries",
                            self.transport.describe(),
                            attempts
                        );
                    }
                    self.state = PipelineState::Streaming;
                    return true;
                }
                Err(e) => {
                    self.stats.record_write_failure();
                    self.state = PipelineState::Faulted;
                    error!(
                        container_id,
                        stage = "write",
                        attempt = attempts + 1,
                        "logstash: could not write to {}: {}",
                        self.transport.describe(),
                        e
                    );

                    if !self.config.retry.should_retry(attempts) {
                        warn!(
                            container_id,
                            delivery = %self.config.retry.mode(),
                            "Dropping record after {} failed attempts",
                            attempts + 1
                        );
                        self.stats.record_dropped();
                        return false;
                    }

                    let delay = self.config.retry.calculate_delay(attempts);
                    attempts += 1;
                    debug!(container_id, "Reconnecting in {:?} (retry {})", delay, attempts);

                    tokio::select! {
                        _ = cancel.cancelled() => {
                            warn!(container_id, "Shutdown during retry, dropping record");
                            self.stats.record_dropped();
                            return false;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Write on the open connection, dialing first if the last one failed.
    /// A connection that fails a write is discarded.
    async fn write(&mut self, line: &[u8]) -> Result<(), TransportError> {
        let mut connection = match self.connection.take() {
            Some(connection) => connection,
            None => {
                let connection = self.transport.dial().await?;
                self.stats.record_reconnect();
                info!("Reconnected to {}", self.transport.describe());
                connection
            }
        };

        let write_timeout = self.config.write_timeout;
        let result = match timeout(write_timeout, connection.write_record(line)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::WriteTimeout(write_timeout)),
        };

        if result.is_ok() {
            self.connection = Some(connection);
        }
        result
    }

    async fn close(mut self) -> StatsSnapshot {
        if let Some(mut connection) = self.connection.take()
            && let Err(e) = connection.close().await
        {
            warn!("Error closing connection to {}: {}", self.transport.describe(), e);
        }
        self.state = PipelineState::Closed;

        let snapshot = self.stats.snapshot();
        let cache = self.enricher.metadata_cache().stats();
        info!(
            received = snapshot.received,
            forwarded = snapshot.forwarded,
            dropped = snapshot.dropped,
            write_failures = snapshot.write_failures,
            reconnects = snapshot.reconnects,
            cache_hits = cache.hits,
            cache_misses = cache.misses,
            "Forwarding loop closed"
        );
        snapshot
    }
}
