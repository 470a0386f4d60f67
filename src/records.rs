//! Record derivation: turns inspected container metadata into the address and
//! SRV tables for one synchronization pass.
//!
//! For every running container attached to its selected network:
//!
//! ```text
//! /web  (bridge, 172.17.0.2, label <prefix>/srv.tcp.http=80)
//!   → web.docker.            A    172.17.0.2
//!   → _http._tcp.web.docker. SRV  10 10 80 web.docker.
//! ```
//!
//! Candidate names are the container name, its network aliases, the network's
//! DNS names and, for Compose containers, `<project>.<service>`. Service ports
//! come from `srv.` labels when any are valid, otherwise from exposed ports.

use std::collections::HashMap;
use std::net::IpAddr;
use tracing::debug;

use crate::config::DnsConfig;
use crate::metrics::{self, SkipReason};
use crate::runtime::{ContainerDetails, ContainerInspector, ContainerSummary, NetworkEndpoint};

/// Compose label naming the project a container belongs to.
pub const COMPOSE_PROJECT_LABEL: &str = "com.docker.compose.project";

/// Compose label naming the service a container implements.
pub const COMPOSE_SERVICE_LABEL: &str = "com.docker.compose.service";

/// Network used when a container's network mode is empty or `default`.
pub const DEFAULT_NETWORK: &str = "bridge";

/// One SRV answer: the address-record name to contact and its port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SrvTarget {
    /// Fully-qualified target name, also a key of the address table.
    pub target: String,
    /// Service port.
    pub port: u16,
}

/// Address table: qualified name → addresses in discovery order.
pub type AddressTable = HashMap<String, Vec<IpAddr>>;

/// SRV table: `_service._proto.<name>.<zone>.` → targets in discovery order.
pub type SrvTable = HashMap<String, Vec<SrvTarget>>;

/// Both tables produced by one derivation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordTables {
    /// Address records.
    pub addresses: AddressTable,
    /// SRV records.
    pub services: SrvTable,
}

/// Settings that shape derivation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeriveOptions {
    /// Zone suffix appended to every candidate name.
    pub zone: String,
    /// SRV label namespace; empty matches bare `srv.` labels.
    pub label_prefix: String,
    /// Allowed network scopes; empty allows all.
    pub networks: Vec<String>,
}

impl DeriveOptions {
    /// Derivation settings taken from the DNS configuration.
    pub fn from_config(config: &DnsConfig) -> Self {
        Self {
            zone: config.zone.clone(),
            label_prefix: config.label_prefix.clone(),
            networks: config.networks.clone(),
        }
    }

    fn allows(&self, scope: &str) -> bool {
        self.networks.is_empty() || self.networks.iter().any(|n| n == scope)
    }
}

/// A service declaration: SRV name fragment (`_http._tcp`) and its port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServicePort {
    /// Leading SRV labels, `_service._proto`.
    pub fragment: String,
    /// Port published in the SRV answer.
    pub port: u16,
}

impl ServicePort {
    fn new(fragment: String, port: u16) -> Self {
        Self { fragment, port }
    }
}

/// Inspect every listed container and derive the complete tables for one pass.
///
/// A container that cannot be inspected, is filtered out, or has no usable
/// address is skipped; it never aborts the pass.
pub async fn derive_records<I>(
    containers: &[ContainerSummary],
    inspector: &I,
    options: &DeriveOptions,
) -> RecordTables
where
    I: ContainerInspector + ?Sized,
{
    let mut tables = RecordTables::default();

    for container in containers {
        let details = match inspector.inspect_container(&container.id).await {
            Ok(details) => details,
            Err(e) => {
                debug!(container = %container.id, error = %e, "failed to inspect container, skipping");
                metrics::record_container_skipped(SkipReason::InspectFailed);
                continue;
            }
        };

        if let Err(reason) = add_container(&mut tables, &details, options) {
            debug!(container = %container.id, reason = reason.as_str(), "skipping container");
            metrics::record_container_skipped(reason);
        }
    }

    tables
}

/// Add the records of one inspected container to `tables`.
///
/// Returns the number of address entries added, or why the container was skipped.
pub fn add_container(
    tables: &mut RecordTables,
    details: &ContainerDetails,
    options: &DeriveOptions,
) -> Result<usize, SkipReason> {
    let scope = network_scope(&details.network_mode);
    if !options.allows(scope) {
        return Err(SkipReason::NetworkNotAllowed);
    }

    let endpoint = details
        .networks
        .get(scope)
        .ok_or(SkipReason::NotAttached)?;

    let ip = parse_address(&endpoint.ip_address).ok_or(SkipReason::InvalidAddress)?;

    let services = service_ports(&details.labels, &details.ports, &options.label_prefix);

    let mut added = 0;
    for name in candidate_names(details, endpoint) {
        let Some(fqdn) = qualify(&name, &options.zone) else {
            continue;
        };

        tables.addresses.entry(fqdn.clone()).or_default().push(ip);
        added += 1;

        for service in &services {
            tables
                .services
                .entry(format!("{}.{}", service.fragment, fqdn))
                .or_default()
                .push(SrvTarget {
                    target: fqdn.clone(),
                    port: service.port,
                });
        }
    }

    Ok(added)
}

/// Network scope selected by a container's network mode.
pub fn network_scope(network_mode: &str) -> &str {
    match network_mode {
        "" | "default" => DEFAULT_NETWORK,
        mode => mode,
    }
}

/// Parse an address, folding IPv4-mapped IPv6 into plain IPv4.
fn parse_address(raw: &str) -> Option<IpAddr> {
    raw.trim().parse::<IpAddr>().ok().map(|ip| ip.to_canonical())
}

/// All names a container should be reachable under, before zone qualification.
///
/// Order: container name, aliases, network DNS names, Compose `project.service`.
/// Duplicates are kept.
pub fn candidate_names(details: &ContainerDetails, endpoint: &NetworkEndpoint) -> Vec<String> {
    let mut names = Vec::with_capacity(1 + endpoint.aliases.len() + endpoint.dns_names.len() + 1);
    names.push(details.name.trim_start_matches('/').to_string());
    names.extend(endpoint.aliases.iter().cloned());
    names.extend(endpoint.dns_names.iter().cloned());

    let project = details.labels.get(COMPOSE_PROJECT_LABEL).map(String::as_str);
    let service = details.labels.get(COMPOSE_SERVICE_LABEL).map(String::as_str);
    if let (Some(project), Some(service)) = (project, service) {
        if !project.is_empty() && !service.is_empty() {
            names.push(format!("{}.{}", project, service));
        }
    }

    names
}

/// Qualify a candidate name with the zone: lowercase and dot-terminated.
/// Empty names and an empty zone yield `None`.
pub fn qualify(name: &str, zone: &str) -> Option<String> {
    if name.is_empty() || zone.trim_matches('.').is_empty() {
        return None;
    }
    let mut fqdn = format!("{}.{}", name, zone).to_lowercase();
    if !fqdn.ends_with('.') {
        fqdn.push('.');
    }
    Some(fqdn)
}

/// Service ports for a container: label declarations win; exposed ports are
/// only consulted when no label is valid.
pub fn service_ports(
    labels: &HashMap<String, String>,
    exposed_ports: &[String],
    label_prefix: &str,
) -> Vec<ServicePort> {
    let declared = label_service_ports(labels, label_prefix);
    if !declared.is_empty() {
        return declared;
    }
    exposed_service_ports(exposed_ports)
}

/// Label key prefix that marks an SRV declaration.
pub fn srv_label_prefix(label_prefix: &str) -> String {
    if label_prefix.is_empty() {
        "srv.".to_string()
    } else {
        format!("{}/srv.", label_prefix)
    }
}

/// Service ports declared by `<prefix>/srv.<proto>.<service> = <port>` labels.
///
/// The label names protocol first, the SRV fragment names service first
/// (`_service._proto`). Labels of any other shape are ignored.
pub fn label_service_ports(
    labels: &HashMap<String, String>,
    label_prefix: &str,
) -> Vec<ServicePort> {
    let prefix = srv_label_prefix(label_prefix);

    let mut ports: Vec<ServicePort> = labels
        .iter()
        .filter_map(|(key, value)| {
            let rest = key.strip_prefix(prefix.as_str())?;
            let (proto, service) = rest.split_once('.')?;
            if proto.is_empty() || service.is_empty() || service.contains('.') {
                return None;
            }
            let port = value.trim().parse::<u16>().ok()?;
            Some(ServicePort::new(
                format!("{}.{}", srv_label(service), srv_label(proto)),
                port,
            ))
        })
        .collect();

    ports.sort();
    ports.dedup();
    ports
}

/// Service ports inferred from exposed port keys (`80/tcp`, `53/udp`, `8080`).
///
/// A key with a protocol yields `_<proto>._<proto>`; a bare port is published
/// under both `_tcp._tcp` and `_udp._udp`.
pub fn exposed_service_ports(exposed_ports: &[String]) -> Vec<ServicePort> {
    let mut ports = Vec::new();

    for key in exposed_ports {
        let (number, proto) = match key.split_once('/') {
            Some((number, proto)) => (number, proto.trim()),
            None => (key.as_str(), ""),
        };
        let Ok(port) = number.trim().parse::<u16>() else {
            continue;
        };

        if proto.is_empty() {
            ports.push(ServicePort::new("_tcp._tcp".to_string(), port));
            ports.push(ServicePort::new("_udp._udp".to_string(), port));
        } else {
            let label = srv_label(proto);
            ports.push(ServicePort::new(format!("{}.{}", label, label), port));
        }
    }

    ports.sort();
    ports.dedup();
    ports
}

/// Lowercase an SRV label and give it exactly one leading underscore.
fn srv_label(raw: &str) -> String {
    format!("_{}", raw.trim_start_matches('_').to_lowercase())
}
