//! Docker implementation of the container runtime boundary, backed by bollard.

use async_trait::async_trait;
use bollard::container::{InspectContainerOptions, ListContainersOptions};
use bollard::models::{ContainerInspectResponse, EventMessage};
use bollard::system::EventsOptions;
use bollard::{Docker, API_DEFAULT_VERSION};
use futures::StreamExt;
use std::collections::HashMap;
use tracing::{debug, trace};

use crate::error::RuntimeError;
use crate::runtime::{
    ContainerDetails, ContainerInspector, ContainerRuntime, ContainerSummary, EventStream,
    LifecycleAction, LifecycleEvent, NetworkEndpoint,
};

/// Request timeout for daemon calls, in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Container runtime backed by a Docker daemon.
#[derive(Debug, Clone)]
pub struct BollardRuntime {
    docker: Docker,
}

impl BollardRuntime {
    /// Connect to the daemon at `host`, or to the local default
    /// (`DOCKER_HOST`, then the platform socket) when `host` is `None`.
    ///
    /// No request is made here; reachability is checked by [`ContainerRuntime::ping`].
    pub fn connect(host: Option<&str>) -> Result<Self, RuntimeError> {
        let docker = match host {
            None => Docker::connect_with_local_defaults()?,
            Some(addr) if addr.starts_with("unix://") => {
                Docker::connect_with_socket(addr, REQUEST_TIMEOUT_SECS, API_DEFAULT_VERSION)?
            }
            Some(addr) => {
                Docker::connect_with_http(addr, REQUEST_TIMEOUT_SECS, API_DEFAULT_VERSION)?
            }
        };
        Ok(Self { docker })
    }
}

#[async_trait]
impl ContainerInspector for BollardRuntime {
    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails, RuntimeError> {
        let inspect = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await?;
        Ok(details_from_inspect(id, inspect))
    }
}

#[async_trait]
impl ContainerRuntime for BollardRuntime {
    async fn ping(&self) -> Result<(), RuntimeError> {
        self.docker.ping().await?;
        Ok(())
    }

    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, RuntimeError> {
        let options = ListContainersOptions::<String> {
            all: false,
            ..Default::default()
        };
        let containers = self.docker.list_containers(Some(options)).await?;
        Ok(containers
            .into_iter()
            .filter_map(|summary| summary.id.map(ContainerSummary::new))
            .collect())
    }

    async fn subscribe_events(
        &self,
        actions: &[LifecycleAction],
    ) -> Result<EventStream, RuntimeError> {
        // The event stream is lazy; ping first so an unreachable daemon fails here.
        self.docker.ping().await?;

        let mut filters = HashMap::new();
        filters.insert("type".to_string(), vec!["container".to_string()]);
        filters.insert(
            "event".to_string(),
            actions.iter().map(|a| a.as_str().to_string()).collect(),
        );

        let options = EventsOptions::<String> {
            filters,
            ..Default::default()
        };

        let stream = self
            .docker
            .events(Some(options))
            .filter_map(|item| async move {
                match item {
                    Ok(message) => event_from_message(message).map(Ok),
                    Err(e) => Some(Err(RuntimeError::from(e))),
                }
            })
            .boxed();

        debug!(actions = actions.len(), "subscribed to docker events");
        Ok(stream)
    }
}

/// Convert a daemon event into a lifecycle event. Actions outside the
/// subscribed set (or events without an actor) are dropped.
fn event_from_message(message: EventMessage) -> Option<LifecycleEvent> {
    let action_str = message.action.as_deref()?;
    let action = match action_str.parse::<LifecycleAction>() {
        Ok(action) => action,
        Err(_) => {
            trace!(action = %action_str, "ignoring docker event");
            return None;
        }
    };
    let container_id = message.actor.and_then(|actor| actor.id).unwrap_or_default();
    Some(LifecycleEvent {
        action,
        container_id,
    })
}

/// Flatten bollard's inspect response into [`ContainerDetails`].
fn details_from_inspect(id: &str, inspect: ContainerInspectResponse) -> ContainerDetails {
    let network_mode = inspect
        .host_config
        .as_ref()
        .and_then(|host| host.network_mode.clone())
        .unwrap_or_default();

    let labels = inspect
        .config
        .as_ref()
        .and_then(|config| config.labels.clone())
        .unwrap_or_default();

    let settings = inspect.network_settings.unwrap_or_default();

    let networks = settings
        .networks
        .unwrap_or_default()
        .into_iter()
        .map(|(name, endpoint)| {
            (
                name,
                NetworkEndpoint {
                    ip_address: endpoint.ip_address.unwrap_or_default(),
                    aliases: endpoint.aliases.unwrap_or_default(),
                    dns_names: endpoint.dns_names.unwrap_or_default(),
                },
            )
        })
        .collect();

    let ports = settings
        .ports
        .map(|ports| ports.into_keys().collect())
        .unwrap_or_default();

    ContainerDetails {
        id: inspect.id.unwrap_or_else(|| id.to_string()),
        name: inspect.name.unwrap_or_default(),
        network_mode,
        networks,
        labels,
        ports,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bollard::models::{
        ContainerConfig, EndpointSettings, EventActor, HostConfig, NetworkSettings,
    };

    #[test]
    fn test_details_from_inspect_maps_fields() {
        let mut endpoints = HashMap::new();
        endpoints.insert(
            "bridge".to_string(),
            EndpointSettings {
                ip_address: Some("172.17.0.2".to_string()),
                aliases: Some(vec!["www".to_string()]),
                dns_names: Some(vec!["web".to_string()]),
                ..Default::default()
            },
        );
        let mut port_map = HashMap::new();
        port_map.insert("80/tcp".to_string(), None);

        let mut labels = HashMap::new();
        labels.insert("com.example/srv.tcp.http".to_string(), "80".to_string());

        let inspect = ContainerInspectResponse {
            id: Some("abc123".to_string()),
            name: Some("/web".to_string()),
            host_config: Some(HostConfig {
                network_mode: Some("bridge".to_string()),
                ..Default::default()
            }),
            config: Some(ContainerConfig {
                labels: Some(labels),
                ..Default::default()
            }),
            network_settings: Some(NetworkSettings {
                networks: Some(endpoints),
                ports: Some(port_map),
                ..Default::default()
            }),
            ..Default::default()
        };

        let details = details_from_inspect("abc123", inspect);
        assert_eq!(details.id, "abc123");
        assert_eq!(details.name, "/web");
        assert_eq!(details.network_mode, "bridge");
        assert_eq!(details.ports, vec!["80/tcp".to_string()]);
        let bridge = &details.networks["bridge"];
        assert_eq!(bridge.ip_address, "172.17.0.2");
        assert_eq!(bridge.aliases, vec!["www".to_string()]);
        assert_eq!(bridge.dns_names, vec!["web".to_string()]);
        assert_eq!(details.labels["com.example/srv.tcp.http"], "80");
    }

    #[test]
    fn test_details_from_empty_inspect() {
        let details = details_from_inspect("abc123", ContainerInspectResponse::default());
        assert_eq!(details.id, "abc123");
        assert!(details.name.is_empty());
        assert!(details.networks.is_empty());
        assert!(details.ports.is_empty());
    }

    #[test]
    fn test_event_from_message() {
        let message = EventMessage {
            action: Some("start".to_string()),
            actor: Some(EventActor {
                id: Some("abc123".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(
            event_from_message(message),
            Some(LifecycleEvent {
                action: LifecycleAction::Start,
                container_id: "abc123".to_string(),
            })
        );
    }

    #[test]
    fn test_event_from_message_drops_other_actions() {
        let message = EventMessage {
            action: Some("health_status: healthy".to_string()),
            ..Default::default()
        };
        assert_eq!(event_from_message(message), None);
    }

    #[test]
    fn test_not_found_maps_to_not_found() {
        let err = bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message: "No such container: abc".to_string(),
        };
        assert!(matches!(RuntimeError::from(err), RuntimeError::NotFound(_)));

        let err = bollard::errors::Error::DockerResponseServerError {
            status_code: 500,
            message: "boom".to_string(),
        };
        assert!(matches!(RuntimeError::from(err), RuntimeError::Unavailable(_)));
    }
}
