//! Per-namespace resolver configuration
//!
//! `ip netns exec` bind-mounts `/etc/netns/<name>/resolv.conf` over
//! `/etc/resolv.conf`, so a copy of the host resolver file placed there is
//! what processes in the namespace resolve with.
//!
//! A host running systemd-resolved points `/etc/resolv.conf` at the stub
//! listener on `127.0.0.53`, which is not reachable from inside the
//! namespace. In that case the upstream list kept by resolved is copied
//! instead.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Upstream resolver list maintained by systemd-resolved
pub const RESOLVED_UPSTREAM: &str = "/run/systemd/resolve/resolv.conf";

/// File name expected inside `/etc/netns/<name>`
pub const RESOLV_CONF: &str = "resolv.conf";

/// Nameserver addresses listed in a resolv.conf
#[must_use]
pub fn nameservers(content: &str) -> Vec<IpAddr> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#') && !line.starts_with(';'))
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some("nameserver"), Some(addr)) => addr.parse().ok(),
                _ => None,
            }
        })
        .collect()
}

/// Whether every nameserver is a loopback address (and there is at least one)
#[must_use]
pub fn only_loopback(content: &str) -> bool {
    let servers = nameservers(content);
    !servers.is_empty() && servers.iter().all(IpAddr::is_loopback)
}

/// Pick the resolver file to copy into the namespace
///
/// Returns `primary` unless it only lists loopback servers and `fallback`
/// exists.
pub async fn resolver_source(primary: &Path, fallback: &Path) -> PathBuf {
    let Ok(content) = fs::read_to_string(primary).await else {
        return primary.to_path_buf();
    };

    if only_loopback(&content) && fs::try_exists(fallback).await.unwrap_or(false) {
        debug!(
            primary = %primary.display(),
            fallback = %fallback.display(),
            "Host resolver is a local stub, using upstream list"
        );
        return fallback.to_path_buf();
    }

    primary.to_path_buf()
}
