//! In-memory DNS state fed by the reconciliation engine.
//!
//! The state holds one immutable [`Snapshot`] behind a reader/writer lock.
//! The engine swaps in a complete snapshot after every derivation pass;
//! readers clone the `Arc` and never observe a partially written table.

use parking_lot::RwLock;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::debug;

use crate::metrics;
use crate::records::{AddressTable, RecordTables, SrvTable, SrvTarget};

/// One complete, internally consistent pair of tables.
#[derive(Debug, Default)]
pub struct Snapshot {
    generation: u64,
    addresses: AddressTable,
    services: SrvTable,
}

impl Snapshot {
    /// Pass number that produced this snapshot; 0 for the initial empty one.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Addresses stored for a qualified name.
    pub fn addresses(&self, name: &str) -> Option<&[IpAddr]> {
        self.addresses.get(name).map(Vec::as_slice)
    }

    /// SRV targets stored for a qualified name.
    pub fn services(&self, name: &str) -> Option<&[SrvTarget]> {
        self.services.get(name).map(Vec::as_slice)
    }

    /// Number of address-record names.
    pub fn address_count(&self) -> usize {
        self.addresses.len()
    }

    /// Number of SRV-record names.
    pub fn service_count(&self) -> usize {
        self.services.len()
    }
}

/// Thread-safe in-memory DNS state.
#[derive(Debug, Clone)]
pub struct DnsState {
    inner: Arc<RwLock<DnsStateInner>>,
}

#[derive(Debug)]
struct DnsStateInner {
    /// Latest fully derived snapshot.
    snapshot: Arc<Snapshot>,

    /// Serial number for SOA (incremented on every swap).
    serial: u32,

    /// True once at least one derived snapshot has been installed.
    synced: bool,

    /// True while the event subscription is established.
    connected: bool,
}

impl Default for DnsStateInner {
    fn default() -> Self {
        Self {
            snapshot: Arc::new(Snapshot::default()),
            serial: 0,
            synced: false,
            connected: false,
        }
    }
}

impl Default for DnsState {
    fn default() -> Self {
        Self::new()
    }
}

impl DnsState {
    /// Create an empty, not-ready state.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(DnsStateInner::default())),
        }
    }

    /// Atomically replace both tables with the result of one derivation pass.
    pub fn replace(&self, tables: RecordTables) {
        let mut inner = self.inner.write();
        let snapshot = Snapshot {
            generation: inner.snapshot.generation + 1,
            addresses: tables.addresses,
            services: tables.services,
        };
        debug!(
            generation = snapshot.generation,
            addresses = snapshot.address_count(),
            services = snapshot.service_count(),
            "installed snapshot"
        );
        inner.snapshot = Arc::new(snapshot);
        inner.serial = inner.serial.wrapping_add(1);
        inner.synced = true;
    }

    /// Current snapshot. Both tables in it come from the same pass.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.inner.read().snapshot)
    }

    /// Addresses for a qualified name, or `None` if the name is unknown.
    pub fn lookup_addresses(&self, name: &str) -> Option<Vec<IpAddr>> {
        self.snapshot().addresses(name).map(<[IpAddr]>::to_vec)
    }

    /// SRV targets for a qualified name, or `None` if the name is unknown.
    pub fn lookup_srv(&self, name: &str) -> Option<Vec<SrvTarget>> {
        self.snapshot().services(name).map(<[SrvTarget]>::to_vec)
    }

    /// Get current SOA serial.
    pub fn serial(&self) -> u32 {
        self.inner.read().serial
    }

    /// Ready means a derived snapshot exists and the runtime connection is up.
    pub fn is_ready(&self) -> bool {
        let inner = self.inner.read();
        inner.synced && inner.connected
    }

    /// Whether at least one snapshot has been installed.
    pub fn has_synced(&self) -> bool {
        self.inner.read().synced
    }

    /// Record that the event subscription is established.
    pub fn mark_connected(&self) {
        self.set_connected(true);
    }

    /// Record that the event subscription broke. Served data stays in place.
    pub fn mark_disconnected(&self) {
        self.set_connected(false);
    }

    fn set_connected(&self, connected: bool) {
        let mut inner = self.inner.write();
        if inner.connected != connected {
            debug!(connected, synced = inner.synced, "runtime connection state changed");
        }
        inner.connected = connected;
    }

    /// Emit current state metrics.
    pub fn emit_metrics(&self) {
        let inner = self.inner.read();
        metrics::record_state_counts(
            inner.snapshot.address_count(),
            inner.snapshot.service_count(),
        );
        metrics::record_ready_state(inner.synced && inner.connected);
        metrics::record_serial(inner.serial);
    }
}
