use super::fields::StaticFields;
use crate::domain::{DockerInfo, MetadataLookup};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const MESSAGE_KEY: &str = "message";
pub const DOCKER_KEY: &str = "docker";
pub const RANCHER_KEY: &str = "rancher";
pub const INDEX_KEY: &str = "index";

/// The outgoing document: one flat JSON object per log line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnrichedRecord(Map<String, Value>);

impl EnrichedRecord {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn index(&self) -> Option<&str> {
        self.0.get(INDEX_KEY).and_then(Value::as_str)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Serialize as one line of line-delimited JSON, newline included.
    pub fn to_json_line(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut line = serde_json::to_vec(&self.0)?;
        line.push(b'\n');
        Ok(line)
    }
}

/// Assembles enriched records from the raw line and its attribute sets.
#[derive(Debug, Clone, Copy, Default)]
pub struct PayloadBuilder;

impl PayloadBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Merge order: raw message, then static fields, then the reserved keys.
    ///
    /// A raw line that is not a JSON object is nested under `message`.
    pub fn merge(
        &self,
        raw: &str,
        fields: &StaticFields,
        docker: &DockerInfo,
        metadata: &MetadataLookup,
        default_index: &str,
    ) -> Result<EnrichedRecord, serde_json::Error> {
        let mut data = match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => map,
            _ => {
                let mut map = Map::new();
                map.insert(MESSAGE_KEY.to_string(), Value::String(raw.to_string()));
                map
            }
        };

        for (key, value) in fields {
            data.insert(key.clone(), Value::String(value.clone()));
        }

        data.insert(DOCKER_KEY.to_string(), serde_json::to_value(docker)?);

        match metadata.as_found() {
            Some(found) => {
                data.insert(RANCHER_KEY.to_string(), serde_json::to_value(found)?);
            }
            None => {
                data.remove(RANCHER_KEY);
            }
        }

        data.insert(
            INDEX_KEY.to_string(),
            Value::String(metadata.index_or(default_index).to_string()),
        );

        Ok(EnrichedRecord(data))
    }
}
