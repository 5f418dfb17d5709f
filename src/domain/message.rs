use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Container attributes as reported by the Docker runtime.
///
/// Shared between every message of a container, so messages hold it behind an `Arc`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerDescriptor {
    pub id: String,
    /// Name as reported by Docker, usually with a leading `/`.
    pub name: String,
    pub image: String,
    pub hostname: String,
    /// Environment entries in `KEY=VALUE` form.
    pub env: Vec<String>,
    pub labels: HashMap<String, String>,
}

impl ContainerDescriptor {
    /// Value of the last `KEY=...` environment entry, if any.
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env.iter().rev().find_map(|entry| {
            entry
                .strip_prefix(key)
                .and_then(|rest| rest.strip_prefix('='))
        })
    }

    /// Container name without the leading `/` Docker adds.
    pub fn display_name(&self) -> &str {
        self.name.trim_start_matches('/')
    }
}

/// A single raw log line delivered by the log source.
#[derive(Debug, Clone)]
pub struct LogMessage {
    pub data: String,
    pub time: DateTime<Utc>,
    /// `stdout` or `stderr`.
    pub source: String,
    pub container: Arc<ContainerDescriptor>,
}

impl LogMessage {
    pub fn new(data: impl Into<String>, container: Arc<ContainerDescriptor>) -> Self {
        Self {
            data: data.into(),
            time: Utc::now(),
            source: "stdout".to_string(),
            container,
        }
    }

    pub fn container_id(&self) -> &str {
        &self.container.id
    }
}

/// The `docker` section of an enriched record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerInfo {
    pub name: String,
    pub id: String,
    pub image: String,
    pub hostname: String,
}

impl From<&ContainerDescriptor> for DockerInfo {
    fn from(container: &ContainerDescriptor) -> Self {
        Self {
            name: container.name.clone(),
            id: container.id.clone(),
            image: container.image.clone(),
            hostname: container.hostname.clone(),
        }
    }
}
