//! Reconciliation engine: keeps [`DnsState`] converged with the running containers.
//!
//! ```text
//!              subscribed                   stream error / end
//! Connecting ─────────────▶ Synced ⟲ event ───────────────────▶ Degraded
//!      ▲                                                            │
//!      └──────────────────────── backoff elapsed ◀──────────────────┘
//!
//! any phase ── cancelled ──▶ Stopped
//! ```
//!
//! Every trigger (connect, reconnect, lifecycle event) re-lists and re-inspects
//! all containers and swaps in a fresh snapshot; there is no incremental patching,
//! so events missed while disconnected cannot leave stale entries behind.
//!
//! The backoff only returns to its floor after a processed event. A stream that
//! breaks straight after each subscribe keeps doubling the delay.

use futures::StreamExt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::DnsConfig;
use crate::error::RuntimeError;
use crate::metrics::{self, ReconnectReason, ResyncOutcome, Timer};
use crate::records::{derive_records, DeriveOptions};
use crate::runtime::{ContainerRuntime, EventStream, LifecycleAction};
use crate::state::DnsState;

/// Initial reconnect delay, and the delay restored after a healthy event.
pub const BACKOFF_FLOOR: Duration = Duration::from_secs(1);

/// Reconnect delay that doubles per consecutive failure, capped at a ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    floor: Duration,
    ceiling: Duration,
    current: Duration,
}

impl Backoff {
    /// Start at `floor`; the floor is clamped to `ceiling`.
    pub fn new(floor: Duration, ceiling: Duration) -> Self {
        let floor = floor.min(ceiling);
        Self {
            floor,
            ceiling,
            current: floor,
        }
    }

    /// Delay the next failure will wait.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Take the delay to wait now and double the one after it.
    pub fn advance(&mut self) -> Duration {
        let delay = self.current;
        self.current = delay
            .checked_mul(2)
            .unwrap_or(self.ceiling)
            .min(self.ceiling);
        delay
    }

    /// Return to the floor.
    pub fn reset(&mut self) {
        self.current = self.floor;
    }
}

/// Engine phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Resyncing and opening the event subscription.
    Connecting,
    /// Subscribed; resyncing on every lifecycle event.
    Synced,
    /// Subscription lost; waiting out the backoff delay.
    Degraded,
    /// Cancelled. Terminal.
    Stopped,
}

/// What happened while in a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// The event subscription was opened.
    Subscribed,
    /// Opening the event subscription failed.
    SubscribeFailed,
    /// A lifecycle event arrived and was processed.
    Event,
    /// The event stream errored or ended.
    StreamBroken,
    /// The backoff delay elapsed.
    BackoffElapsed,
    /// Shutdown was requested.
    Cancelled,
}

impl Phase {
    /// Transition for `trigger`. Triggers that do not apply leave the phase unchanged.
    pub fn next(self, trigger: Trigger) -> Phase {
        match (self, trigger) {
            (_, Trigger::Cancelled) | (Phase::Stopped, _) => Phase::Stopped,
            (Phase::Connecting, Trigger::Subscribed) => Phase::Synced,
            (Phase::Connecting, Trigger::SubscribeFailed) => Phase::Degraded,
            (Phase::Synced, Trigger::Event) => Phase::Synced,
            (Phase::Synced, Trigger::StreamBroken) => Phase::Degraded,
            (Phase::Degraded, Trigger::BackoffElapsed) => Phase::Connecting,
            (phase, _) => phase,
        }
    }
}

/// Drives the reconciliation loop against a container runtime.
pub struct Reconciler<R> {
    runtime: R,
    state: DnsState,
    options: DeriveOptions,
    backoff: Backoff,
}

impl<R> Reconciler<R>
where
    R: ContainerRuntime + 'static,
{
    /// Engine writing into `state`, configured from `config`.
    pub fn new(runtime: R, state: DnsState, config: &DnsConfig) -> Self {
        Self {
            runtime,
            state,
            options: DeriveOptions::from_config(config),
            backoff: Backoff::new(BACKOFF_FLOOR, config.max_backoff),
        }
    }

    /// Override the initial reconnect delay.
    pub fn with_backoff_floor(mut self, floor: Duration) -> Self {
        self.backoff = Backoff::new(floor, self.backoff.ceiling);
        self
    }

    /// Current backoff.
    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    /// List, inspect and derive every container, then swap the snapshot in.
    ///
    /// A listing failure leaves the previous snapshot in place.
    pub async fn resync(&self) -> Result<(), RuntimeError> {
        let containers = self.runtime.list_containers().await?;
        let tables = derive_records(&containers, &self.runtime, &self.options).await;
        debug!(
            containers = containers.len(),
            addresses = tables.addresses.len(),
            services = tables.services.len(),
            "derived records"
        );
        self.state.replace(tables);
        self.state.emit_metrics();
        Ok(())
    }

    /// Run until `cancel` fires. The runtime client is dropped on return.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            zone = %self.options.zone,
            networks = ?self.options.networks,
            max_backoff_ms = self.backoff.ceiling.as_millis() as u64,
            "starting reconciliation engine"
        );

        let mut phase = Phase::Connecting;
        let mut events: Option<EventStream> = None;
        let mut first_connect = true;

        while phase != Phase::Stopped {
            let trigger = match phase {
                Phase::Connecting => {
                    let (trigger, stream) = self.connect(&cancel, first_connect).await;
                    first_connect = false;
                    events = stream;
                    trigger
                }
                Phase::Synced => match events.as_mut() {
                    Some(stream) => self.next_event(&cancel, stream).await,
                    None => Trigger::StreamBroken,
                },
                Phase::Degraded => {
                    events = None;
                    self.wait_backoff(&cancel).await
                }
                Phase::Stopped => Trigger::Cancelled,
            };

            let next = phase.next(trigger);
            if next != phase {
                info!(from = ?phase, to = ?next, trigger = ?trigger, "engine phase change");
            }
            phase = next;
        }

        drop(events);
        self.state.mark_disconnected();
        self.state.emit_metrics();
        info!("reconciliation engine stopped, releasing runtime client");
    }

    async fn connect(
        &mut self,
        cancel: &CancellationToken,
        first_connect: bool,
    ) -> (Trigger, Option<EventStream>) {
        if !self.resync_or_cancel(cancel).await {
            return (Trigger::Cancelled, None);
        }

        let subscribed = tokio::select! {
            biased;

            _ = cancel.cancelled() => return (Trigger::Cancelled, None),

            result = self.runtime.subscribe_events(&LifecycleAction::ALL) => result,
        };

        match subscribed {
            Ok(stream) => {
                if first_connect {
                    metrics::record_reconnect(ReconnectReason::InitialConnect);
                }
                self.state.mark_connected();
                self.state.emit_metrics();
                info!("subscribed to container lifecycle events");
                (Trigger::Subscribed, Some(stream))
            }
            Err(e) => {
                warn!(error = %e, "failed to subscribe to container events");
                metrics::record_reconnect(ReconnectReason::SubscribeFailed);
                self.state.mark_disconnected();
                (Trigger::SubscribeFailed, None)
            }
        }
    }

    async fn next_event(&mut self, cancel: &CancellationToken, stream: &mut EventStream) -> Trigger {
        let item = tokio::select! {
            biased;

            _ = cancel.cancelled() => return Trigger::Cancelled,

            item = stream.next() => item,
        };

        match item {
            Some(Ok(event)) => {
                debug!(action = %event.action, container = %event.container_id, "container event");
                metrics::record_lifecycle_event(event.action);
                if !self.resync_or_cancel(cancel).await {
                    return Trigger::Cancelled;
                }
                self.backoff.reset();
                Trigger::Event
            }
            Some(Err(e)) => {
                warn!(error = %e, "container event stream error");
                metrics::record_reconnect(ReconnectReason::StreamError);
                self.state.mark_disconnected();
                self.state.emit_metrics();
                Trigger::StreamBroken
            }
            None => {
                info!("container event stream ended");
                metrics::record_reconnect(ReconnectReason::StreamEnded);
                self.state.mark_disconnected();
                self.state.emit_metrics();
                Trigger::StreamBroken
            }
        }
    }

    async fn wait_backoff(&mut self, cancel: &CancellationToken) -> Trigger {
        let delay = self.backoff.advance();
        metrics::record_backoff(delay);
        info!(delay_ms = delay.as_millis() as u64, "reconnecting to container runtime after backoff");

        tokio::select! {
            biased;

            _ = cancel.cancelled() => Trigger::Cancelled,

            _ = tokio::time::sleep(delay) => Trigger::BackoffElapsed,
        }
    }

    /// Resync unless cancelled first. Returns `false` on cancellation.
    async fn resync_or_cancel(&self, cancel: &CancellationToken) -> bool {
        let timer = Timer::start();

        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!("resync interrupted by shutdown");
                metrics::record_resync(ResyncOutcome::Cancelled, timer.elapsed());
                false
            }

            result = self.resync() => {
                match result {
                    Ok(()) => metrics::record_resync(ResyncOutcome::Applied, timer.elapsed()),
                    Err(e) => {
                        warn!(error = %e, "failed to list containers, keeping previous records");
                        metrics::record_resync(ResyncOutcome::ListFailed, timer.elapsed());
                    }
                }
                true
            }
        }
    }
}
