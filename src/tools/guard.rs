//! Outbound URL validation.
//!
//! Every URL is checked before it can reach the network: scheme must be
//! http(s), the host must not be a loopback/metadata/blocked name or a
//! private, loopback, or link-local address, and when the grant supplies
//! an allowlist the host must match an entry exactly or be a subdomain
//! of one. Failures never reach a socket.

use std::net::{Ipv4Addr, Ipv6Addr};

use url::{Host, Url};

const BLOCKED_HOSTS: &[&str] = &[
    "localhost",
    "127.0.0.1",
    "0.0.0.0",
    "::1",
    "[::1]",
    "metadata.google.internal",
    "169.254.169.254",
];

const LOOPBACK_HOSTS: &[&str] = &["localhost", "127.0.0.1", "::1", "[::1]", "0.0.0.0"];

/// Validate an outbound URL. `allow_loopback` relaxes only the loopback
/// entries (local development and tests); metadata endpoints and private
/// ranges stay blocked.
pub fn validate_url(
    raw: &str,
    allowed_hosts: Option<&[String]>,
    allow_loopback: bool,
) -> Result<Url, String> {
    let url = Url::parse(raw).map_err(|e| format!("invalid URL: {e}"))?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(format!("blocked scheme: {other}")),
    }

    let host = url.host().ok_or_else(|| "empty hostname".to_string())?;
    let hostname = match &host {
        Host::Domain(domain) => domain.trim_matches('.').to_ascii_lowercase(),
        Host::Ipv4(addr) => addr.to_string(),
        Host::Ipv6(addr) => addr.to_string(),
    };
    if hostname.is_empty() {
        return Err("empty hostname".to_string());
    }

    let exempt = allow_loopback && LOOPBACK_HOSTS.contains(&hostname.as_str());
    if !exempt && BLOCKED_HOSTS.contains(&hostname.as_str()) {
        return Err(format!("blocked host: {hostname}"));
    }

    match host {
        Host::Ipv4(addr) => check_ipv4(addr, allow_loopback)?,
        Host::Ipv6(addr) => check_ipv6(addr, allow_loopback)?,
        Host::Domain(_) => {}
    }

    if let Some(allowed) = allowed_hosts {
        let normalized: Vec<String> = allowed
            .iter()
            .map(|h| h.trim_matches('.').to_ascii_lowercase())
            .collect();
        let permitted = normalized.iter().any(|allowed| {
            hostname == *allowed || hostname.ends_with(&format!(".{allowed}"))
        });
        if !permitted {
            return Err(format!("host `{hostname}` not in allowlist"));
        }
    }

    Ok(url)
}

fn check_ipv4(addr: Ipv4Addr, allow_loopback: bool) -> Result<(), String> {
    if addr.is_loopback() || addr.is_unspecified() {
        if allow_loopback {
            return Ok(());
        }
        return Err(format!("blocked loopback address: {addr}"));
    }
    if addr.is_private() || addr.is_link_local() {
        return Err(format!("blocked private address: {addr}"));
    }
    Ok(())
}

fn check_ipv6(addr: Ipv6Addr, allow_loopback: bool) -> Result<(), String> {
    if addr.is_loopback() || addr.is_unspecified() {
        if allow_loopback {
            return Ok(());
        }
        return Err(format!("blocked loopback address: {addr}"));
    }
    let segments = addr.segments();
    // fc00::/7 unique-local, fe80::/10 link-local.
    if segments[0] & 0xfe00 == 0xfc00 || segments[0] & 0xffc0 == 0xfe80 {
        return Err(format!("blocked private address: {addr}"));
    }
    // IPv4-mapped addresses smuggle v4 targets through v6 parsing.
    if let Some(mapped) = addr.to_ipv4_mapped() {
        return check_ipv4(mapped, allow_loopback);
    }
    Ok(())
}
