//! Docker DNS - An authoritative DNS server for the containers of a Docker host.
//!
//! This crate serves A, AAAA and SRV records for running containers under a
//! configurable zone. It keeps an in-memory snapshot of records converged with
//! the Docker daemon by re-deriving everything whenever a container lifecycle
//! event arrives, and defers every query it cannot answer to the next authority.
//!
//! ## Features
//!
//! - Records for container names, network aliases, DNS names and compose services
//! - SRV records from `<label_prefix>/srv.<proto>.<service>` labels or exposed ports
//! - Network allow-list
//! - Reconnect with capped exponential backoff, serving stale data meanwhile
//! - HTTP readiness probe and graceful shutdown
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           docker-dns                             │
//! │                                                                  │
//! │  ┌──────────────────┐    ┌──────────────────┐                   │
//! │  │ Reconciler       │───▶│   DNS State      │◀── GET /ready     │
//! │  │ (events, resync) │    │   (snapshot)     │                   │
//! │  └──────────────────┘    └────────┬─────────┘                   │
//! │         │                         │                              │
//! │         │ list / inspect          ▼                              │
//! │         │ events            ┌──────────────────┐                │
//! │         ▼                   │  Hickory DNS     │◀── UDP/TCP     │
//! │   Docker daemon             │  Server          │                │
//! │                             └──────────────────┘                │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## DNS Resolution
//!
//! ```text
//! web.docker.              → A/AAAA of the container on its selected network
//! _http._tcp.web.docker.   → SRV 10 10 <port> web.docker.
//! anything else            → next authority
//! ```
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use docker_dns::{DnsConfig, DnsServer};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = DnsConfig {
//!         listen_addr: "127.0.0.1:5353".parse().unwrap(),
//!         zone: "docker.".to_string(),
//!         ..DnsConfig::default()
//!     };
//!
//!     let cancel = CancellationToken::new();
//!     let server = DnsServer::new(config);
//!     server.run(cancel).await.unwrap();
//! }
//! ```

#![warn(missing_docs)]

pub mod authority;
pub mod config;
pub mod docker;
pub mod engine;
pub mod error;
pub mod health;
pub mod metrics;
pub mod records;
pub mod resolver;
pub mod runtime;
pub mod server;
pub mod state;
pub mod telemetry;

// Re-export main types
pub use authority::DockerAuthority;
pub use config::{Config, DnsConfig, LogFormat, SoaConfig, TelemetryConfig};
pub use docker::BollardRuntime;
pub use engine::Reconciler;
pub use error::{DnsError, RuntimeError};
pub use runtime::{ContainerInspector, ContainerRuntime};
pub use server::DnsServer;
pub use state::DnsState;
