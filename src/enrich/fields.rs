use crate::domain::ContainerDescriptor;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Environment key holding the extra fields, both process-wide and per container.
pub const FIELDS_ENV_KEY: &str = "LOGSTASH_FIELDS";

pub type StaticFields = HashMap<String, String>;

/// Per-container memo of the operator-configured `key=value` tags.
#[derive(Debug, Default)]
pub struct FieldCache {
    default_fields: String,
    entries: RwLock<HashMap<String, Arc<StaticFields>>>,
}

impl FieldCache {
    pub fn new(default_fields: impl Into<String>) -> Self {
        Self {
            default_fields: default_fields.into(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Fields for `container`, parsed on first sight and frozen afterwards.
    pub fn resolve(&self, container: &ContainerDescriptor) -> Arc<StaticFields> {
        if let Some(fields) = self.entries.read().get(&container.id) {
            return fields.clone();
        }

        let source = container
            .env_value(FIELDS_ENV_KEY)
            .unwrap_or(&self.default_fields);
        let (fields, malformed) = parse_fields(source);
        for segment in &malformed {
            warn!(
                container_id = %container.id,
                stage = "fields",
                "Skipping malformed {} entry '{}'",
                FIELDS_ENV_KEY,
                segment
            );
        }

        // A concurrent resolver may have won; keep whichever landed first.
        self.entries
            .write()
            .entry(container.id.clone())
            .or_insert_with(|| Arc::new(fields))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// Parse `k1=v1,k2=v2`. Returns the parsed map and the segments that were skipped.
pub fn parse_fields(input: &str) -> (StaticFields, Vec<String>) {
    let mut fields = StaticFields::new();
    let mut malformed = Vec::new();

    for segment in input.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match segment.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                fields.insert(key.trim().to_string(), value.trim().to_string());
            }
            _ => malformed.push(segment.to_string()),
        }
    }

    (fields, malformed)
}
