use std::net::IpAddr;

/// Read-only view of previously resolved host addresses.
///
/// Consulted for IP pooling only. A lookup must never start a resolution;
/// a host that is not cached is simply not a pooling candidate.
pub trait HostCache {
    fn lookup(&self, host: &str) -> Option<Vec<IpAddr>>;
}
