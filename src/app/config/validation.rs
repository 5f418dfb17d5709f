use super::{Config, ConfigError};
use url::Url;

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Validate Logstash address
        let port = self
            .address
            .rsplit_once(':')
            .filter(|(host, _)| !host.is_empty())
            .map(|(_, port)| port);
        match port.map(str::parse::<u16>) {
            Some(Ok(port)) if port > 0 => {}
            _ => {
                return Err(ConfigError::InvalidConfig(format!(
                    "Logstash address must be host:port, got '{}'",
                    self.address
                )));
            }
        }

        // Validate Rancher API URL
        Url::parse(&self.cattle_url).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid CATTLE_URL '{}': {}", self.cattle_url, e))
        })?;

        // Validate timeouts
        if self.api_timeout_secs == 0 || self.write_timeout_secs == 0 || self.dial_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "Timeouts must be greater than 0".to_string(),
            ));
        }

        // Validate retry config
        if self.retry_config.max_attempts == 0 {
            return Err(ConfigError::InvalidConfig(
                "Retry max attempts must be greater than 0".to_string(),
            ));
        }
        if self.retry_config.base_delay > self.retry_config.max_delay {
            return Err(ConfigError::InvalidConfig(format!(
                "Retry base delay ({:?}) exceeds max delay ({:?})",
                self.retry_config.base_delay, self.retry_config.max_delay
            )));
        }

        if self.channel_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "Channel capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
