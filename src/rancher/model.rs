use serde::Deserialize;
use std::collections::HashMap;

pub const LABEL_CONTAINER_NAME: &str = "io.rancher.container.name";
pub const LABEL_CONTAINER_IP: &str = "io.rancher.container.ip";
/// Since Rancher 2.0 an environment is a Kubernetes namespace.
pub const LABEL_POD_NAMESPACE: &str = "io.kubernetes.pod.namespace";

/// Envelope returned by list endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct Collection<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiContainer {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub host_id: Option<String>,
    #[serde(default)]
    pub service_id: Option<String>,
    #[serde(default)]
    pub stack_id: Option<String>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

impl ApiContainer {
    pub fn labels(&self) -> RancherLabels<'_> {
        RancherLabels::new(&self.labels)
    }

    pub fn service_ref(&self) -> Option<&str> {
        non_empty(self.service_id.as_deref())
    }

    pub fn stack_ref(&self) -> Option<&str> {
        non_empty(self.stack_id.as_deref())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiService {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiStack {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

/// Typed read-only view over a container's label map.
///
/// Missing labels read as the empty string.
#[derive(Debug, Clone, Copy)]
pub struct RancherLabels<'a> {
    labels: &'a HashMap<String, String>,
}

impl<'a> RancherLabels<'a> {
    pub fn new(labels: &'a HashMap<String, String>) -> Self {
        Self { labels }
    }

    pub fn container_name(&self) -> &'a str {
        self.get(LABEL_CONTAINER_NAME)
    }

    pub fn container_ip(&self) -> &'a str {
        self.get(LABEL_CONTAINER_IP)
    }

    pub fn namespace(&self) -> &'a str {
        self.get(LABEL_POD_NAMESPACE)
    }

    fn get(&self, key: &str) -> &'a str {
        self.labels.get(key).map(String::as_str).unwrap_or_default()
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_deserialization() {
        let json = r#"{
            "data": [{
                "id": "1i42",
                "type": "container",
                "externalId": "deadbeef",
                "hostId": "1h3",
                "serviceId": "1s7",
                "stackId": null,
                "labels": {
                    "io.rancher.container.name": "checkout-web-1",
                    "io.rancher.container.ip": "10.42.0.7"
                }
            }]
        }"#;

        let collection: Collection<ApiContainer> = serde_json::from_str(json).unwrap();
        assert_eq!(collection.data.len(), 1);

        let container = &collection.data[0];
        assert_eq!(container.external_id.as_deref(), Some("deadbeef"));
        assert_eq!(container.service_ref(), Some("1s7"));
        assert_eq!(container.stack_ref(), None);
        assert_eq!(container.labels().container_name(), "checkout-web-1");
        assert_eq!(container.labels().container_ip(), "10.42.0.7");
        assert_eq!(container.labels().namespace(), "");
    }

    #[test]
    fn test_empty_collection() {
        let collection: Collection<ApiContainer> = serde_json::from_str("{}").unwrap();
        assert!(collection.data.is_empty());
    }
}
