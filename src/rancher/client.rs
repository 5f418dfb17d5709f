use super::model::{ApiContainer, ApiService, ApiStack, Collection};
use async_trait::async_trait;
use reqwest::{Client, ClientBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

#[cfg(test)]
use mockall::automock;

#[derive(Error, Debug)]
pub enum RancherError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("HTTP error: {status} from {url}")]
    HttpError { status: u16, url: String },
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

impl RancherError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RancherError::HttpError { status, .. } if *status == StatusCode::NOT_FOUND.as_u16())
    }
}

/// The three lookups the resolver needs from the orchestration API.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn containers_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Vec<ApiContainer>, RancherError>;
    async fn service_by_id(&self, id: &str) -> Result<ApiService, RancherError>;
    async fn stack_by_id(&self, id: &str) -> Result<ApiStack, RancherError>;
}

#[derive(Debug, Clone)]
pub struct RancherClientConfig {
    pub url: String,
    pub access_key: String,
    pub secret_key: String,
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for RancherClientConfig {
    fn default() -> Self {
        Self {
            url: "http://rancher:8080/v3".to_string(),
            access_key: String::new(),
            secret_key: String::new(),
            timeout: Duration::from_secs(10),
            user_agent: format!("rancher-logstash-adapter/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// HTTP client for the Rancher cattle API.
#[derive(Debug, Clone)]
pub struct RancherClient {
    client: Client,
    base_url: Url,
    access_key: String,
    secret_key: String,
}

impl RancherClient {
    pub fn new(config: RancherClientConfig) -> Result<Self, RancherError> {
        let base_url: Url = config
            .url
            .parse()
            .map_err(|e| RancherError::InvalidConfiguration(format!("Invalid API URL: {e}")))?;

        if base_url.cannot_be_a_base() {
            return Err(RancherError::InvalidConfiguration(format!(
                "API URL cannot be a base: {base_url}"
            )));
        }

        let client = ClientBuilder::new()
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| {
                RancherError::InvalidConfiguration(format!("Failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            base_url,
            access_key: config.access_key,
            secret_key: config.secret_key,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // cannot_be_a_base was rejected in new()
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, RancherError> {
        debug!("GET {}", url);

        let mut request = self.client.get(url.clone());
        if !self.access_key.is_empty() {
            request = request.basic_auth(&self.access_key, Some(&self.secret_key));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RancherError::HttpError {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl MetadataSource for RancherClient {
    async fn containers_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Vec<ApiContainer>, RancherError> {
        let mut url = self.endpoint(&["containers"]);
        url.query_pairs_mut().append_pair("externalId", external_id);

        let collection: Collection<ApiContainer> = self.get_json(url).await?;
        Ok(collection.data)
    }

    async fn service_by_id(&self, id: &str) -> Result<ApiService, RancherError> {
        self.get_json(self.endpoint(&["services", id])).await
    }

    async fn stack_by_id(&self, id: &str) -> Result<ApiStack, RancherError> {
        self.get_json(self.endpoint(&["stacks", id])).await
    }
}
