//! Query decision over a snapshot.
//!
//! | query                                  | result                 |
//! |----------------------------------------|------------------------|
//! | name outside the zone                  | [`Resolution::Defer`]  |
//! | name in neither table                  | [`Resolution::Defer`]  |
//! | type other than A, AAAA, SRV           | [`Resolution::Defer`]  |
//! | known name, no record of that type     | [`Resolution::NoData`] |
//! | known name with matching records       | answer                 |

use hickory_proto::rr::RecordType;
use std::net::IpAddr;

use crate::records::SrvTarget;
use crate::state::Snapshot;

/// Priority published on every SRV answer.
pub const SRV_PRIORITY: u16 = 10;

/// Weight published on every SRV answer.
pub const SRV_WEIGHT: u16 = 10;

/// Outcome of resolving one query against a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Not ours; the next handler in the chain should answer.
    Defer,
    /// The name exists but has no record of the requested type.
    NoData,
    /// A or AAAA answers, already filtered to the requested family.
    Addresses(Vec<IpAddr>),
    /// SRV answers.
    Services(Vec<SrvTarget>),
}

/// Lowercase a query name and make it dot-terminated.
pub fn normalize_name(name: &str) -> String {
    let mut name = name.to_lowercase();
    if !name.ends_with('.') {
        name.push('.');
    }
    name
}

/// Whether `name` is the zone itself or a descendant of it. Both must be normalized.
pub fn in_zone(name: &str, zone: &str) -> bool {
    name == zone
        || name
            .strip_suffix(zone)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

/// Decide how to answer `rtype` for `name` from a single snapshot.
pub fn resolve(snapshot: &Snapshot, zone: &str, name: &str, rtype: RecordType) -> Resolution {
    let name = normalize_name(name);
    if !in_zone(&name, zone) {
        return Resolution::Defer;
    }

    let addresses = snapshot.addresses(&name);
    let services = snapshot.services(&name);
    if addresses.is_none() && services.is_none() {
        return Resolution::Defer;
    }

    let resolution = match rtype {
        RecordType::A => Resolution::Addresses(family(addresses, IpAddr::is_ipv4)),
        RecordType::AAAA => Resolution::Addresses(family(addresses, IpAddr::is_ipv6)),
        RecordType::SRV => {
            Resolution::Services(services.map(<[SrvTarget]>::to_vec).unwrap_or_default())
        }
        _ => return Resolution::Defer,
    };

    match resolution {
        Resolution::Addresses(ref ips) if ips.is_empty() => Resolution::NoData,
        Resolution::Services(ref targets) if targets.is_empty() => Resolution::NoData,
        other => other,
    }
}

fn family(addresses: Option<&[IpAddr]>, keep: fn(&IpAddr) -> bool) -> Vec<IpAddr> {
    addresses
        .unwrap_or_default()
        .iter()
        .copied()
        .filter(|ip| keep(ip))
        .collect()
}
