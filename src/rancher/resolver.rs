use super::client::MetadataSource;
use super::model::{ApiContainer, ApiService, ApiStack};
use crate::domain::{MetadataLookup, OrchestrationMetadata, RancherContainer, RancherStack};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Anything that can turn a Docker container ID into orchestration metadata.
#[async_trait]
pub trait ResolveMetadata: Send + Sync {
    async fn resolve(&self, docker_id: &str) -> MetadataLookup;
}

/// Composes the container, service and stack lookups into one metadata snapshot.
///
/// Sub-lookup failures degrade to empty fields; only a missing container
/// record yields `Absent`.
#[derive(Clone)]
pub struct MetadataResolver {
    source: Arc<dyn MetadataSource>,
}

impl MetadataResolver {
    pub fn new(source: Arc<dyn MetadataSource>) -> Self {
        Self { source }
    }

    async fn find_container(&self, docker_id: &str) -> Option<ApiContainer> {
        let containers = match self.source.containers_by_external_id(docker_id).await {
            Ok(containers) => containers,
            Err(e) => {
                warn!(container_id = %docker_id, stage = "container", "Rancher container lookup failed: {}", e);
                return None;
            }
        };

        if containers.len() > 1 {
            debug!(
                container_id = %docker_id,
                "Rancher returned {} containers for one external id, using the first",
                containers.len()
            );
        }

        containers.into_iter().next()
    }

    async fn fetch_service(&self, docker_id: &str, container: &ApiContainer) -> Option<ApiService> {
        let service_id = container.service_ref()?;
        match self.source.service_by_id(service_id).await {
            Ok(service) => Some(service),
            Err(e) => {
                warn!(container_id = %docker_id, stage = "service", service_id, "Rancher service lookup failed: {}", e);
                None
            }
        }
    }

    async fn fetch_stack(&self, docker_id: &str, container: &ApiContainer) -> Option<ApiStack> {
        let stack_id = container.stack_ref()?;
        match self.source.stack_by_id(stack_id).await {
            Ok(stack) => Some(stack),
            Err(e) => {
                warn!(container_id = %docker_id, stage = "stack", stack_id, "Rancher stack lookup failed: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl ResolveMetadata for MetadataResolver {
    async fn resolve(&self, docker_id: &str) -> MetadataLookup {
        let Some(container) = self.find_container(docker_id).await else {
            warn!(container_id = %docker_id, "Could not find rancher metadata in the API");
            return MetadataLookup::Absent;
        };

        let service = self.fetch_service(docker_id, &container).await;
        let stack = self.fetch_stack(docker_id, &container).await;

        MetadataLookup::Found(assemble(docker_id, &container, service, stack))
    }
}

fn assemble(
    docker_id: &str,
    container: &ApiContainer,
    service: Option<ApiService>,
    stack: Option<ApiStack>,
) -> OrchestrationMetadata {
    let labels = container.labels();
    let (stack_name, stack_state) = stack
        .map(|s| (s.name.unwrap_or_default(), s.state.unwrap_or_default()))
        .unwrap_or_default();

    OrchestrationMetadata {
        environment: labels.namespace().to_string(),
        container: RancherContainer {
            name: labels.container_name().to_string(),
            ip: labels.container_ip().to_string(),
            id: container.id.clone(),
            host_id: container.host_id.clone().unwrap_or_default(),
            docker_id: docker_id.to_string(),
        },
        stack: RancherStack {
            service: service.and_then(|s| s.name).unwrap_or_default(),
            stack_name,
            stack_state,
        },
    }
}
