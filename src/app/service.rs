use super::Config;
use super::pipeline::ForwardingPipeline;
use super::shutdown::ShutdownHandle;
use crate::{
    collector::{DockerLogSource, LogStreamOptions},
    enrich::{Enricher, FieldCache, MetadataCache, policy_for_capacity},
    rancher::{MetadataResolver, RancherClient},
    sender::transport_for,
};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {0}")]
    ConfigError(#[from] crate::app::ConfigError),
    #[error("Rancher client error: {0}")]
    MetadataError(#[from] crate::rancher::RancherError),
    #[error("Logstash transport error: {0}")]
    TransportError(#[from] crate::sender::TransportError),
    #[error("Collector error: {0}")]
    CollectorError(#[from] crate::collector::CollectorError),
    #[error("Service already running")]
    AlreadyRunning,
    #[error("Shutdown timeout")]
    ShutdownTimeout,
    #[error("Task failed: {0}")]
    TaskFailed(String),
}

/// Wires the Rancher client, caches, Logstash connection and Docker log
/// source together and starts them.
pub struct ServiceManager {
    config: Config,
    start_time: Instant,
    running: bool,
}

impl ServiceManager {
    pub fn new(config: Config) -> Self {
        info!(
            "Initializing adapter: logstash={} ({}), rancher={}",
            config.address, config.transport, config.cattle_url
        );

        Self {
            config,
            start_time: Instant::now(),
            running: false,
        }
    }

    pub async fn start(&mut self) -> Result<ShutdownHandle, ServiceError> {
        if self.running {
            return Err(ServiceError::AlreadyRunning);
        }

        let enricher = self.build_enricher()?;

        let transport = transport_for(
            self.config.transport,
            &self.config.address,
            self.config.dial_timeout,
        );
        let pipeline =
            ForwardingPipeline::connect(transport, enricher, self.config.pipeline_config()).await?;

        let source = DockerLogSource::connect(&self.config.docker_socket, LogStreamOptions::default())?;
        if !source.can_connect().await {
            warn!(
                "Docker daemon at {} did not answer ping",
                self.config.docker_socket
            );
        }

        let (tx, rx) = mpsc::channel(self.config.channel_capacity);
        let cancel = CancellationToken::new();

        let forwarder = tokio::spawn(pipeline.run(rx, cancel.clone()));

        let collector_cancel = cancel.clone();
        let collector = tokio::spawn(async move {
            if let Err(e) = source.run(tx, collector_cancel.clone()).await {
                error!("Log source stopped: {}", e);
                collector_cancel.cancel();
            }
        });

        self.running = true;
        info!(
            "Adapter started in {}ms",
            self.start_time.elapsed().as_millis()
        );

        Ok(ShutdownHandle::new(cancel, forwarder, collector))
    }

    fn build_enricher(&self) -> Result<Enricher, ServiceError> {
        let client = RancherClient::new(self.config.rancher_client_config())?;
        let resolver = Arc::new(MetadataResolver::new(Arc::new(client)));
        let metadata = Arc::new(MetadataCache::with_policy(
            resolver,
            policy_for_capacity(self.config.metadata_cache_capacity),
        ));
        let fields = Arc::new(FieldCache::new(self.config.logstash_fields.as_str()));

        Ok(Enricher::new(fields, metadata))
    }

    pub fn is_running(&self) -> bool {
        self.running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enricher_built_from_config() {
        let mut config = Config {
            logstash_fields: "env=prod".to_string(),
            metadata_cache_capacity: 16,
            ..Config::default()
        };
        config.post_process().unwrap();

        let manager = ServiceManager::new(config);
        let enricher = manager.build_enricher().unwrap();
        assert!(enricher.metadata_cache().is_empty());
        assert!(!manager.is_running());
    }

    #[test]
    fn test_invalid_rancher_url_fails_before_start() {
        let config = Config {
            cattle_url: "mailto:ops@example.com".to_string(),
            ..Config::default()
        };
        let manager = ServiceManager::new(config);
        assert!(matches!(
            manager.build_enricher(),
            Err(ServiceError::MetadataError(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_logstash_fails_start() {
        let mut config = Config {
            address: "127.0.0.1:1".to_string(),
            transport: crate::sender::TransportKind::Tcp,
            dial_timeout_secs: 1,
            ..Config::default()
        };
        config.post_process().unwrap();

        let mut manager = ServiceManager::new(config);
        assert!(matches!(
            manager.start().await,
            Err(ServiceError::TransportError(_))
        ));
        assert!(!manager.is_running());
    }
}
