pub mod client;
pub mod model;
pub mod resolver;

pub use client::{MetadataSource, RancherClient, RancherClientConfig, RancherError};
pub use model::{ApiContainer, ApiService, ApiStack, RancherLabels};
pub use resolver::{MetadataResolver, ResolveMetadata};
