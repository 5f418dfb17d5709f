pub mod config;
pub mod initialization;
pub mod logging_system;
pub mod pipeline;
pub mod service;
pub mod shutdown;

pub use config::{Config, ConfigError, LogFormat, LogLevel};
pub use initialization::InitializationError;
pub use logging_system::{LoggingSystem, setup_logging_safe};
pub use pipeline::{ForwardingPipeline, PipelineConfig, PipelineState};
pub use service::{ServiceError, ServiceManager};
pub use shutdown::{ShutdownHandle, SignalHandler};

use crate::domain::AdapterError;
use std::process;
use tracing::{error, info};

pub struct App {
    service_manager: ServiceManager,
}

impl App {
    pub fn from_args<I, T>(args: I) -> Result<Self, AdapterError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let config = Config::from_args_and_env(args)?;
        Self::from_config(config)
    }

    pub fn from_config(config: Config) -> Result<Self, AdapterError> {
        setup_logging_safe(config.log_level, config.log_format)?;

        info!("Starting rancher-logstash-adapter v{}", crate::VERSION);
        if let Some(path) = &config.config_file {
            info!("Configuration loaded from {}", path.display());
        }
        info!(
            "Configuration: delivery={}, cache_capacity={}, channel_capacity={}",
            config.delivery, config.metadata_cache_capacity, config.channel_capacity
        );

        Ok(Self {
            service_manager: ServiceManager::new(config),
        })
    }

    pub async fn run(mut self) -> Result<(), AdapterError> {
        let shutdown_handle = self.service_manager.start().await?;

        info!("rancher-logstash-adapter is running. Press Ctrl+C to stop.");

        let snapshot = shutdown_handle.wait_for_shutdown().await?;

        info!(
            forwarded = snapshot.forwarded,
            dropped = snapshot.dropped,
            "rancher-logstash-adapter stopped."
        );
        Ok(())
    }
}

pub async fn main() -> Result<(), AdapterError> {
    let app = match App::from_args(std::env::args_os()) {
        Ok(app) => app,
        // --help and --version land here too; clap prints and picks the exit code.
        Err(AdapterError::Config(ConfigError::ArgError(e))) => e.exit(),
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = app.run().await {
        error!("Application error: {}", e);
        process::exit(1);
    }

    Ok(())
}
