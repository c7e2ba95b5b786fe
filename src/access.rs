//! Connection admission by address/host-name blacklist.
//!
//! The filter only ever rejects on positive evidence. A peer whose address
//! cannot be resolved, or whose lookups fail, is admitted unless its address
//! itself is listed.

use dns_lookup::{lookup_addr, lookup_host};
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, trace};

/// Name resolution consumed by the filter.
pub trait Resolver: Send + Sync {
    /// Canonical host name for `ip`, if a reverse record exists.
    fn reverse(&self, ip: IpAddr) -> Option<String>;

    /// Addresses `host` resolves to. Empty when the lookup fails.
    fn forward(&self, host: &str) -> Vec<IpAddr>;
}

/// Resolver backed by the system's getnameinfo/getaddrinfo.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl Resolver for SystemResolver {
    fn reverse(&self, ip: IpAddr) -> Option<String> {
        lookup_addr(&ip).ok()
    }

    fn forward(&self, host: &str) -> Vec<IpAddr> {
        lookup_host(host).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admit,
    Reject,
}

#[derive(Clone)]
pub struct AccessFilter {
    addresses: HashSet<IpAddr>,
    hosts: HashSet<String>,
    resolver: Arc<dyn Resolver>,
}

impl std::fmt::Debug for AccessFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessFilter")
            .field("addresses", &self.addresses)
            .field("hosts", &self.hosts)
            .finish_non_exhaustive()
    }
}

impl AccessFilter {
    /// Build a filter from raw blacklist entries. Entries that are neither an
    /// IP address nor a syntactically valid host name are dropped.
    pub fn new<I, S>(entries: I, resolver: Arc<dyn Resolver>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut addresses = HashSet::new();
        let mut hosts = HashSet::new();
        for entry in entries {
            let raw = entry.as_ref().trim();
            let candidate = raw
                .strip_prefix('[')
                .and_then(|inner| inner.strip_suffix(']'))
                .unwrap_or(raw);
            if let Ok(ip) = candidate.parse::<IpAddr>() {
                addresses.insert(ip.to_canonical());
            } else if is_host_name(candidate) {
                hosts.insert(normalize_hostname_owned(candidate.to_string()));
            } else {
                debug!("ignoring blacklist entry {:?}", raw);
            }
        }
        Self {
            addresses,
            hosts,
            resolver,
        }
    }

    /// A filter that admits everyone.
    pub fn allow_all() -> Self {
        Self::new(std::iter::empty::<&str>(), Arc::new(SystemResolver))
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty() && self.hosts.is_empty()
    }

    /// Decide whether `peer` may open a session. May block on DNS; callers
    /// on an async runtime should run it on the blocking pool.
    pub fn decide(&self, peer: IpAddr) -> Admission {
        let peer = peer.to_canonical();
        if self.addresses.contains(&peer) {
            return Admission::Reject;
        }
        if self.hosts.is_empty() {
            return Admission::Admit;
        }

        if let Some(name) = self.reverse_name(peer) {
            if self.hosts.contains(&name) {
                trace!(%peer, %name, "reverse name is blacklisted");
                return Admission::Reject;
            }
        }

        for host in &self.hosts {
            let resolved = self.resolver.forward(host);
            if resolved.iter().any(|ip| ip.to_canonical() == peer) {
                trace!(%peer, %host, "blacklisted host resolves to peer");
                return Admission::Reject;
            }
        }

        Admission::Admit
    }

    fn reverse_name(&self, peer: IpAddr) -> Option<String> {
        let name = self.resolver.reverse(peer)?;
        // getnameinfo falls back to the numeric form when no PTR exists
        if name == peer.to_string() || name.parse::<IpAddr>().is_ok() {
            return None;
        }
        Some(normalize_hostname_owned(name))
    }
}

fn normalize_hostname_owned(mut name: String) -> String {
    if name.ends_with('.') {
        name.pop();
    }
    name.make_ascii_lowercase();
    name
}

/// RFC 1123 host name syntax, with an optional trailing root dot.
fn is_host_name(text: &str) -> bool {
    let text = text.strip_suffix('.').unwrap_or(text);
    if text.is_empty() || text.len() > 253 {
        return false;
    }
    text.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
    })
}
