//! Container runtime boundary.
//!
//! The reconciliation engine and record derivation only see these traits and
//! plain data types; [`crate::docker::BollardRuntime`] is the production
//! implementation.

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::RuntimeError;

/// Minimal metadata returned by a container listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    /// Container identifier.
    pub id: String,
}

impl ContainerSummary {
    /// Summary for the given container id.
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// One network attachment of an inspected container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkEndpoint {
    /// Address string as reported by the runtime; may be empty.
    pub ip_address: String,
    /// Network-scoped aliases.
    pub aliases: Vec<String>,
    /// DNS names the runtime resolves for this attachment.
    pub dns_names: Vec<String>,
}

/// Full metadata of one inspected container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerDetails {
    /// Container identifier.
    pub id: String,
    /// Raw container name, usually with a leading `/`.
    pub name: String,
    /// Network mode selector (`bridge`, `default`, a network name, ...).
    pub network_mode: String,
    /// Attachments keyed by network name.
    pub networks: HashMap<String, NetworkEndpoint>,
    /// Container labels.
    pub labels: HashMap<String, String>,
    /// Exposed port keys such as `80/tcp`, `53/udp` or `8080`.
    pub ports: Vec<String>,
}

/// Container lifecycle actions that trigger a resync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleAction {
    /// Container created.
    Create,
    /// Container started.
    Start,
    /// Container restarted.
    Restart,
    /// Container process exited.
    Die,
    /// Container stopped.
    Stop,
    /// Container removed.
    Destroy,
}

impl LifecycleAction {
    /// Every action the engine subscribes to.
    pub const ALL: [LifecycleAction; 6] = [
        LifecycleAction::Create,
        LifecycleAction::Start,
        LifecycleAction::Restart,
        LifecycleAction::Die,
        LifecycleAction::Stop,
        LifecycleAction::Destroy,
    ];

    /// Name used by the runtime's event API.
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleAction::Create => "create",
            LifecycleAction::Start => "start",
            LifecycleAction::Restart => "restart",
            LifecycleAction::Die => "die",
            LifecycleAction::Stop => "stop",
            LifecycleAction::Destroy => "destroy",
        }
    }
}

impl fmt::Display for LifecycleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LifecycleAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LifecycleAction::ALL
            .into_iter()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| format!("unsupported lifecycle action: {}", s))
    }
}

/// A lifecycle notification for one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleEvent {
    /// What happened.
    pub action: LifecycleAction,
    /// Which container it happened to.
    pub container_id: String,
}

/// Live sequence of lifecycle events. An `Err` item or the end of the stream
/// means the subscription is broken.
pub type EventStream = BoxStream<'static, Result<LifecycleEvent, RuntimeError>>;

/// Inspect one container by id.
#[async_trait]
pub trait ContainerInspector: Send + Sync {
    /// Fetch the full metadata of a container.
    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails, RuntimeError>;
}

/// Everything the reconciliation engine needs from the container runtime.
#[async_trait]
pub trait ContainerRuntime: ContainerInspector {
    /// Confirm the runtime is reachable.
    async fn ping(&self) -> Result<(), RuntimeError>;

    /// List running containers.
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, RuntimeError>;

    /// Subscribe to container events restricted to `actions`.
    async fn subscribe_events(
        &self,
        actions: &[LifecycleAction],
    ) -> Result<EventStream, RuntimeError>;
}
