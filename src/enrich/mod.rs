//! Enrichment: static fields, cached Rancher metadata and payload assembly.

pub mod fields;
pub mod metadata_cache;
pub mod payload;

pub use fields::{FIELDS_ENV_KEY, FieldCache, StaticFields, parse_fields};
pub use metadata_cache::{
    CacheStats, EvictionPolicy, Lru, MetadataCache, Unbounded, policy_for_capacity,
};
pub use payload::{EnrichedRecord, PayloadBuilder};

use crate::domain::{DockerInfo, LogMessage};
use std::sync::Arc;

/// Shared enrichment state. Cheap to clone; every adapter in the process
/// can hold one pointing at the same caches.
#[derive(Debug, Clone)]
pub struct Enricher {
    fields: Arc<FieldCache>,
    metadata: Arc<MetadataCache>,
    builder: PayloadBuilder,
}

impl Enricher {
    pub fn new(fields: Arc<FieldCache>, metadata: Arc<MetadataCache>) -> Self {
        Self {
            fields,
            metadata,
            builder: PayloadBuilder::new(),
        }
    }

    pub async fn enrich(&self, message: &LogMessage) -> Result<EnrichedRecord, serde_json::Error> {
        let container = message.container.as_ref();
        let fields = self.fields.resolve(container);
        let metadata = self.metadata.resolve_or_fetch(&container.id).await;

        self.builder.merge(
            &message.data,
            &fields,
            &DockerInfo::from(container),
            &metadata,
            container.display_name(),
        )
    }

    pub fn field_cache(&self) -> &Arc<FieldCache> {
        &self.fields
    }

    pub fn metadata_cache(&self) -> &Arc<MetadataCache> {
        &self.metadata
    }
}
