//! Input validation for values that reach the network layer.

use crate::error::ValidationError;
use ipnetwork::Ipv4Network;
use std::net::Ipv4Addr;

/// Upper bound accepted for per-request probe timeouts.
pub const MAX_TIMEOUT_MS: i64 = 30_000;

/// Parse a dotted-quad IPv4 address.
pub fn validate_ip(ip: &str) -> Result<Ipv4Addr, ValidationError> {
    ip.trim()
        .parse::<Ipv4Addr>()
        .map_err(|_| ValidationError::Ip(ip.to_string()))
}

/// Parse `a.b.c.d/n` with a prefix in 0..=32.
pub fn validate_cidr(cidr: &str) -> Result<Ipv4Network, ValidationError> {
    let trimmed = cidr.trim();
    let (addr, prefix) = trimmed
        .split_once('/')
        .ok_or_else(|| ValidationError::Cidr(cidr.to_string()))?;
    let addr = addr
        .parse::<Ipv4Addr>()
        .map_err(|_| ValidationError::Cidr(cidr.to_string()))?;
    let prefix = prefix
        .parse::<u8>()
        .map_err(|_| ValidationError::Cidr(cidr.to_string()))?;
    Ipv4Network::new(addr, prefix).map_err(|_| ValidationError::Cidr(cidr.to_string()))
}

/// Accepts six hex octets separated by `:` or `-` and returns the
/// canonical upper-case colon form.
pub fn validate_mac(mac: &str) -> Result<String, ValidationError> {
    let trimmed = mac.trim();
    let octets: Vec<&str> = trimmed.split([':', '-']).collect();
    let well_formed = octets.len() == 6
        && octets
            .iter()
            .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()));
    if !well_formed {
        return Err(ValidationError::Mac(mac.to_string()));
    }
    Ok(octets.join(":").to_uppercase())
}

pub fn validate_port(port: i64) -> Result<u16, ValidationError> {
    if (1..=65_535).contains(&port) {
        Ok(port as u16)
    } else {
        Err(ValidationError::Port(port))
    }
}

pub fn validate_timeout(timeout_ms: i64) -> Result<u64, ValidationError> {
    if (0..=MAX_TIMEOUT_MS).contains(&timeout_ms) {
        Ok(timeout_ms as u64)
    } else {
        Err(ValidationError::Timeout(timeout_ms))
    }
}
