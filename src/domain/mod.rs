//! Domain layer for rancher-logstash-adapter.
//!
//! Contains the canonical types shared across all modules:
//! - `LogMessage`: a raw log line tagged with its container
//! - `OrchestrationMetadata`: Rancher attribution for a container
//! - `MetadataLookup`: explicit found/absent result threaded through enrichment
//! - `AdapterError`: Top-level error type

pub mod error;
pub mod message;
pub mod metadata;

pub use error::AdapterError;
pub use message::{ContainerDescriptor, DockerInfo, LogMessage};
pub use metadata::{MetadataLookup, OrchestrationMetadata, RancherContainer, RancherStack};
