use super::{ConfigError, LogFormat, LogLevel};
use crate::app::pipeline::PipelineConfig;
use crate::rancher::RancherClientConfig;
use crate::reliability::{DeliveryMode, RetryConfig, RetryPolicy};
use crate::sender::TransportKind;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser, Debug, Clone, Serialize, Deserialize)]
#[command(author, version, about, long_about = None)]
#[serde(default)]
pub struct Config {
    /// Logstash address as host:port
    #[arg(long, env = "LOGSTASH_ADDRESS", default_value = "logstash:5000")]
    pub address: String,

    /// Transport used to reach Logstash
    #[arg(long, env = "LOGSTASH_TRANSPORT", default_value = "udp")]
    pub transport: TransportKind,

    /// Default extra fields (k1=v1,k2=v2), overridable per container
    #[arg(long, env = "LOGSTASH_FIELDS", default_value = "")]
    pub logstash_fields: String,

    /// Rancher API endpoint
    #[arg(long, env = "CATTLE_URL", default_value = "http://rancher:8080/v3")]
    pub cattle_url: String,

    /// Rancher API access key
    #[arg(long, env = "CATTLE_ACCESS_KEY", default_value = "")]
    pub cattle_access_key: String,

    /// Rancher API secret key
    #[arg(long, env = "CATTLE_SECRET_KEY", default_value = "", hide_env_values = true)]
    #[serde(skip_serializing)]
    pub cattle_secret_key: String,

    /// Timeout for each Rancher API call in seconds
    #[arg(long, env = "CATTLE_API_TIMEOUT_SECS", default_value = "10")]
    pub api_timeout_secs: u64,

    /// Timeout for a single write to Logstash in seconds
    #[arg(long, env = "WRITE_TIMEOUT_SECS", default_value = "5")]
    pub write_timeout_secs: u64,

    /// Timeout for dialing Logstash in seconds
    #[arg(long, env = "DIAL_TIMEOUT_SECS", default_value = "10")]
    pub dial_timeout_secs: u64,

    /// What to do with a record whose write failed
    #[arg(long, env = "DELIVERY_MODE", default_value = "retry")]
    pub delivery: DeliveryMode,

    /// Reconnect attempts per record in retry mode
    #[arg(long, env = "RETRY_MAX_ATTEMPTS", default_value = "5")]
    pub retry_max_attempts: u32,

    /// First reconnect delay in milliseconds
    #[arg(long, env = "RETRY_BASE_DELAY_MS", default_value = "500")]
    pub retry_base_delay_ms: u64,

    /// Reconnect delay cap in milliseconds
    #[arg(long, env = "RETRY_MAX_DELAY_MS", default_value = "30000")]
    pub retry_max_delay_ms: u64,

    /// Rancher metadata cache capacity (0 = unbounded)
    #[arg(long, env = "METADATA_CACHE_CAPACITY", default_value = "0")]
    pub metadata_cache_capacity: usize,

    /// Docker socket to read container logs from
    #[arg(long, env = "DOCKER_SOCKET", default_value = "/var/run/docker.sock")]
    pub docker_socket: String,

    /// Capacity of the channel between log source and forwarder
    #[arg(long, env = "CHANNEL_CAPACITY", default_value = "4096")]
    pub channel_capacity: usize,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: LogLevel,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", default_value = "compact")]
    pub log_format: LogFormat,

    /// Configuration file path (optional)
    #[arg(long, env = "CONFIG_FILE")]
    #[serde(skip)]
    pub config_file: Option<PathBuf>,

    /// Derived fields (not CLI arguments)
    #[serde(skip)]
    #[arg(skip)]
    pub api_timeout: Duration,

    #[serde(skip)]
    #[arg(skip)]
    pub write_timeout: Duration,

    #[serde(skip)]
    #[arg(skip)]
    pub dial_timeout: Duration,

    #[serde(skip)]
    #[arg(skip)]
    pub retry_config: RetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: "logstash:5000".to_string(),
            transport: TransportKind::Udp,
            logstash_fields: String::new(),
            cattle_url: "http://rancher:8080/v3".to_string(),
            cattle_access_key: String::new(),
            cattle_secret_key: String::new(),
            api_timeout_secs: 10,
            write_timeout_secs: 5,
            dial_timeout_secs: 10,
            delivery: DeliveryMode::Retry,
            retry_max_attempts: 5,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 30_000,
            metadata_cache_capacity: 0,
            docker_socket: "/var/run/docker.sock".to_string(),
            channel_capacity: 4096,
            log_level: LogLevel::Info,
            log_format: LogFormat::Compact,
            config_file: None,
            api_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(5),
            dial_timeout: Duration::from_secs(10),
            retry_config: RetryConfig::default(),
        }
    }
}

impl Config {
    /// Parse CLI arguments (with environment fallbacks). A `--config-file`
    /// replaces everything else.
    pub fn from_args_and_env<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let mut config = Config::try_parse_from(args)?;

        if let Some(config_file) = config.config_file.take() {
            return Self::from_file(config_file);
        }

        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(&path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.config_file = Some(path.as_ref().to_path_buf());
        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    pub fn post_process(&mut self) -> Result<(), ConfigError> {
        self.api_timeout = Duration::from_secs(self.api_timeout_secs);
        self.write_timeout = Duration::from_secs(self.write_timeout_secs);
        self.dial_timeout = Duration::from_secs(self.dial_timeout_secs);

        self.retry_config = RetryConfig {
            max_attempts: self.retry_max_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
        };

        Ok(())
    }

    pub fn rancher_client_config(&self) -> RancherClientConfig {
        RancherClientConfig {
            url: self.cattle_url.clone(),
            access_key: self.cattle_access_key.clone(),
            secret_key: self.cattle_secret_key.clone(),
            timeout: self.api_timeout,
            ..Default::default()
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            write_timeout: self.write_timeout,
            retry: RetryPolicy::new(self.delivery, self.retry_config.clone()),
        }
    }
}
