//! Client address resolution and whitelisting.

use ipnetwork::IpNetwork;
use std::net::{IpAddr, SocketAddr};

use crate::error::{GuardError, GuardResult};

/// Key used for clients whose address cannot be determined.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Resolves the throttling key for a request.
///
/// Precedence: first entry of `X-Forwarded-For`, then `X-Real-IP`, then the
/// peer address of the connection.
pub fn resolve_client_key(
    forwarded_for: Option<&str>,
    real_ip: Option<&str>,
    peer: Option<SocketAddr>,
) -> String {
    let forwarded = forwarded_for
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if let Some(first) = forwarded {
        return normalize_client_key(first);
    }

    if let Some(real) = real_ip.map(str::trim).filter(|value| !value.is_empty()) {
        return normalize_client_key(real);
    }

    match peer {
        Some(addr) => canonical_ip(addr.ip()).to_string(),
        None => UNKNOWN_CLIENT.to_string(),
    }
}

/// Normalizes an address string.
///
/// Ports and IPv6 brackets are stripped and IPv4-mapped IPv6 addresses
/// collapse to IPv4. Strings that are not addresses are kept as-is.
pub fn normalize_client_key(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return UNKNOWN_CLIENT.to_string();
    }
    match parse_ip(trimmed) {
        Some(ip) => ip.to_string(),
        None => trimmed.to_string(),
    }
}

fn parse_ip(value: &str) -> Option<IpAddr> {
    if let Ok(ip) = value.parse::<IpAddr>() {
        return Some(canonical_ip(ip));
    }
    if let Ok(addr) = value.parse::<SocketAddr>() {
        return Some(canonical_ip(addr.ip()));
    }
    value
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .and_then(|inner| inner.parse::<IpAddr>().ok())
        .map(canonical_ip)
}

fn canonical_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6
            .to_ipv4_mapped()
            .map(IpAddr::V4)
            .unwrap_or(IpAddr::V6(v6)),
        v4 => v4,
    }
}

/// Addresses exempt from login throttling.
#[derive(Debug, Clone, Default)]
pub struct Whitelist {
    networks: Vec<IpNetwork>,
}

impl Whitelist {
    /// Parses IP addresses and CIDR networks.
    pub fn parse<I, S>(entries: I) -> GuardResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut networks = Vec::new();
        for entry in entries {
            let entry = entry.as_ref().trim();
            let network = if entry.contains('/') {
                entry.parse::<IpNetwork>().map_err(|e| invalid(entry, e))?
            } else {
                entry
                    .parse::<IpAddr>()
                    .map(|ip| IpNetwork::from(canonical_ip(ip)))
                    .map_err(|e| invalid(entry, e))?
            };
            networks.push(network);
        }
        Ok(Self { networks })
    }

    /// Whether `client_key` falls inside a whitelisted network. Keys that are
    /// not IP addresses never match.
    pub fn contains(&self, client_key: &str) -> bool {
        if self.networks.is_empty() {
            return false;
        }
        match parse_ip(client_key) {
            Some(ip) => self.networks.iter().any(|network| network.contains(ip)),
            None => false,
        }
    }
}

fn invalid(entry: &str, err: impl std::fmt::Display) -> GuardError {
    GuardError::InvalidWhitelistEntry {
        entry: entry.to_string(),
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forwarded_for_takes_first_entry() {
        let key = resolve_client_key(
            Some(" 203.0.113.7, 10.0.0.1"),
            Some("10.0.0.2"),
            Some("10.0.0.3:443".parse().unwrap()),
        );
        assert_eq!(key, "203.0.113.7");
    }

    #[test]
    fn test_real_ip_then_peer() {
        let peer: SocketAddr = "192.0.2.10:5555".parse().unwrap();
        assert_eq!(resolve_client_key(None, Some("198.51.100.4"), Some(peer)), "198.51.100.4");
        assert_eq!(resolve_client_key(Some("  "), None, Some(peer)), "192.0.2.10");
        assert_eq!(resolve_client_key(None, None, None), UNKNOWN_CLIENT);
    }

    #[test]
    fn test_normalize_strips_port_and_mapping() {
        assert_eq!(normalize_client_key("198.51.100.4:8080"), "198.51.100.4");
        assert_eq!(normalize_client_key("[2001:db8::1]:443"), "2001:db8::1");
        assert_eq!(normalize_client_key("[2001:db8::1]"), "2001:db8::1");
        assert_eq!(normalize_client_key("::ffff:192.0.2.1"), "192.0.2.1");
        assert_eq!(normalize_client_key("not-an-ip"), "not-an-ip");
    }

    #[test]
    fn test_whitelist_addresses_and_networks() {
        let whitelist = Whitelist::parse(["127.0.0.1", "::1", "10.0.0.0/8"]).unwrap();

        assert!(whitelist.contains("127.0.0.1"));
        assert!(whitelist.contains("::1"));
        assert!(whitelist.contains("10.20.30.40"));
        assert!(!whitelist.contains("203.0.113.7"));
        assert!(!whitelist.contains("localhost"));
    }

    #[test]
    fn test_whitelist_rejects_garbage() {
        let err = Whitelist::parse(["10.0.0.0/99"]).unwrap_err();
        assert!(matches!(err, GuardError::InvalidWhitelistEntry { .. }));

        assert!(Whitelist::parse(["example.com"]).is_err());
    }
}
