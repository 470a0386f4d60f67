//! DNS server setup and lifecycle management.

use hickory_server::authority::{AuthorityObject, Catalog};
use hickory_server::ServerFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::authority::DockerAuthority;
use crate::config::DnsConfig;
use crate::docker::BollardRuntime;
use crate::engine::Reconciler;
use crate::error::DnsError;
use crate::health;
use crate::runtime::ContainerRuntime;
use crate::state::DnsState;

/// Interval for emitting state metrics.
const METRICS_INTERVAL: Duration = Duration::from_secs(10);

/// Idle timeout for TCP connections.
const TCP_TIMEOUT: Duration = Duration::from_secs(30);

/// Await a background task, logging a panic or abort. Returns whether it exited cleanly.
async fn join_task(name: &'static str, handle: JoinHandle<()>) -> bool {
    match handle.await {
        Ok(()) => true,
        Err(e) => {
            error!(task = name, error = %e, "background task failed");
            false
        }
    }
}

/// Periodically emit state metrics.
async fn metrics_loop(state: DnsState, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(METRICS_INTERVAL);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                state.emit_metrics();
                let snapshot = state.snapshot();
                debug!(
                    generation = snapshot.generation(),
                    addresses = snapshot.address_count(),
                    services = snapshot.service_count(),
                    ready = state.is_ready(),
                    "emitted state metrics"
                );
            }
            _ = cancel.cancelled() => {
                debug!("metrics loop shutting down");
                return;
            }
        }
    }
}

/// Build a catalog with the container authority registered for the zone.
pub fn build_catalog(config: &DnsConfig, state: &DnsState) -> Result<Catalog, DnsError> {
    let authority = DockerAuthority::new(config.clone(), state.clone())?;

    let mut catalog = Catalog::new();
    let authority: Arc<dyn AuthorityObject> = Arc::new(authority);
    catalog.upsert(authority.origin().clone(), vec![authority]);

    Ok(catalog)
}

/// DNS server backed by the containers of a Docker host.
pub struct DnsServer {
    config: DnsConfig,
    state: DnsState,
    ready_addr: Option<SocketAddr>,
}

impl DnsServer {
    /// Create a new DNS server with the given configuration.
    pub fn new(config: DnsConfig) -> Self {
        Self {
            config,
            state: DnsState::new(),
            ready_addr: None,
        }
    }

    /// Also serve the HTTP readiness probe on `addr`.
    pub fn with_ready_addr(mut self, addr: Option<SocketAddr>) -> Self {
        self.ready_addr = addr;
        self
    }

    /// Get a reference to the DNS state.
    pub fn state(&self) -> &DnsState {
        &self.state
    }

    /// Connect to the Docker daemon and serve until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), DnsError> {
        let runtime = BollardRuntime::connect(self.config.docker_host.as_deref())?;

        // An unreachable daemon is retried by the engine.
        match runtime.ping().await {
            Ok(()) => info!("connected to Docker daemon"),
            Err(e) => warn!(error = %e, "Docker daemon not reachable yet, will keep retrying"),
        }

        self.serve(runtime, cancel).await
    }

    /// Serve using `runtime` until `cancel` fires.
    ///
    /// Queries are answered from the start, before the first snapshot is derived.
    pub async fn serve<R>(self, runtime: R, cancel: CancellationToken) -> Result<(), DnsError>
    where
        R: ContainerRuntime + 'static,
    {
        info!(
            listen_addr = %self.config.listen_addr,
            zone = %self.config.zone,
            ttl = self.config.ttl,
            "Starting docker-dns server"
        );

        let tasks = cancel.child_token();

        let engine = Reconciler::new(runtime, self.state.clone(), &self.config);
        let engine_handle = tokio::spawn(engine.run(tasks.clone()));

        let metrics_handle = tokio::spawn(metrics_loop(self.state.clone(), tasks.clone()));

        let health_handle: Option<JoinHandle<()>> = self.ready_addr.map(|addr| {
            let state = self.state.clone();
            let health_cancel = tasks.clone();
            tokio::spawn(async move {
                if let Err(e) = health::serve(addr, state, health_cancel).await {
                    error!("Readiness endpoint error: {}", e);
                }
            })
        });

        let result = self.serve_dns(&cancel).await;

        // Stop background tasks whether the listener exited cleanly or not.
        tasks.cancel();

        join_task("metrics loop", metrics_handle).await;
        if let Some(handle) = health_handle {
            join_task("readiness endpoint", handle).await;
        }

        info!("Waiting for reconciliation engine to stop...");
        join_task("reconciliation engine", engine_handle).await;

        info!("DNS server stopped");
        result
    }

    async fn serve_dns(&self, cancel: &CancellationToken) -> Result<(), DnsError> {
        let catalog = build_catalog(&self.config, &self.state)?;
        let mut server = ServerFuture::new(catalog);

        let udp_socket = UdpSocket::bind(self.config.listen_addr).await?;
        info!(addr = %self.config.listen_addr, "DNS UDP listening");
        server.register_socket(udp_socket);

        let tcp_listener = TcpListener::bind(self.config.listen_addr).await?;
        info!(addr = %self.config.listen_addr, "DNS TCP listening");
        server.register_listener(tcp_listener, TCP_TIMEOUT);

        self.state.emit_metrics();
        info!(zone = %self.config.zone, "DNS server ready to serve queries");

        tokio::select! {
            _ = cancel.cancelled() => {
                info!("DNS server shutdown requested");
            }
            result = server.block_until_done() => {
                if let Err(e) = result {
                    error!("DNS server error: {}", e);
                }
            }
        }

        Ok(())
    }
}
