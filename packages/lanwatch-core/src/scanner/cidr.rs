//! CIDR to scan-target expansion.

use std::net::Ipv4Addr;

use crate::validation::validate_cidr;

/// Default ceiling on emitted hosts.
pub const DEFAULT_MAX_TARGETS: usize = 4096;

/// Host addresses of `cidr`, excluding the network and broadcast addresses,
/// capped at `max_targets`.
///
/// A malformed CIDR yields no targets. Prefixes of /31 and /32 have no
/// usable host range and also yield none.
pub fn expand(cidr: &str, max_targets: usize) -> Vec<Ipv4Addr> {
    let network = match validate_cidr(cidr) {
        Ok(network) => network,
        Err(e) => {
            tracing::debug!("Not expanding: {}", e);
            return Vec::new();
        }
    };

    let prefix = u32::from(network.prefix());
    if prefix >= 31 {
        return Vec::new();
    }

    let mask: u32 = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
    let base = u32::from(network.ip()) & mask;
    let broadcast = base | !mask;

    ((base + 1)..broadcast)
        .take(max_targets)
        .map(Ipv4Addr::from)
        .collect()
}

/// Network address of `cidr` in canonical `a.b.c.d/n` form.
pub fn canonical(cidr: &str) -> Option<String> {
    let network = validate_cidr(cidr).ok()?;
    Some(format!("{}/{}", network.network(), network.prefix()))
}
