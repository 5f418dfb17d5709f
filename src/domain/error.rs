use thiserror::Error;

/// Top-level error type for the adapter.
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::app::ConfigError),

    #[error("Logging initialization error: {0}")]
    Logging(#[from] crate::app::InitializationError),

    #[error("Metadata client error: {0}")]
    Metadata(#[from] crate::rancher::RancherError),

    #[error("Transport error: {0}")]
    Transport(#[from] crate::sender::TransportError),

    #[error("Collector error: {0}")]
    Collector(#[from] crate::collector::CollectorError),

    #[error("Service error: {0}")]
    Service(#[from] crate::app::ServiceError),
}
