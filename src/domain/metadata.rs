use serde::{Deserialize, Serialize};

/// Rancher attribution for one container, captured once at first sight.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestrationMetadata {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub environment: String,
    pub container: RancherContainer,
    pub stack: RancherStack,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RancherContainer {
    /// `io.rancher.container.name`
    pub name: String,
    /// `io.rancher.container.ip`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ip: String,
    /// Rancher's own container id.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host_id: String,
    pub docker_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RancherStack {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stack_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stack_state: String,
}

/// Outcome of a metadata lookup. Every consumer must handle `Absent`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataLookup {
    Found(OrchestrationMetadata),
    Absent,
}

impl MetadataLookup {
    pub fn as_found(&self) -> Option<&OrchestrationMetadata> {
        match self {
            MetadataLookup::Found(metadata) => Some(metadata),
            MetadataLookup::Absent => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, MetadataLookup::Found(_))
    }

    /// Routing index: stack name, else Rancher container name, else `default`.
    pub fn index_or<'a>(&'a self, default: &'a str) -> &'a str {
        match self {
            MetadataLookup::Found(metadata) if !metadata.stack.stack_name.is_empty() => {
                &metadata.stack.stack_name
            }
            MetadataLookup::Found(metadata) if !metadata.container.name.is_empty() => {
                &metadata.container.name
            }
            _ => default,
        }
    }
}
