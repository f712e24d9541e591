use super::{Address, Endpoint, NetworkMapping};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};

pub const DEFAULT_PORT_RANGE_START: u16 = 51000;
pub const DEFAULT_PORT_RANGE_END: u16 = 59999;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 200;

/// Inclusive range of candidate ports scanned by the allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> u32 {
        if self.end < self.start {
            0
        } else {
            u32::from(self.end - self.start) + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, port: u16) -> bool {
        port >= self.start && port <= self.end
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self::new(DEFAULT_PORT_RANGE_START, DEFAULT_PORT_RANGE_END)
    }
}

/// Capability used by the supervisor to turn endpoints into a mapping.
pub trait Allocate: Send + Sync {
    fn allocate(&self, service: &str, host: &str, endpoints: &[Endpoint])
        -> Result<NetworkMapping>;

    /// Hand back the ports of a mapping that will not be used again.
    fn release(&self, _mapping: &NetworkMapping) {}
}

/// Scan-and-bind port allocator.
///
/// Each candidate port is bound on every address `host` resolves to and the
/// listeners are dropped immediately; a port that bound cleanly is recorded as
/// reserved so no two endpoints (or two allocations) ever share it.
///
/// # Thread Safety
///
/// The reserved set and the scan cursor sit behind `parking_lot::Mutex`es, so
/// `allocate` only needs `&self` and may be called from several tasks.
pub struct PortAllocator {
    range: PortRange,
    max_attempts: u32,
    reserved: Mutex<HashSet<u16>>,
    cursor: Mutex<u16>,
}

impl PortAllocator {
    pub fn new(range: PortRange, max_attempts: u32) -> Self {
        Self {
            range,
            max_attempts,
            reserved: Mutex::new(HashSet::new()),
            cursor: Mutex::new(range.start),
        }
    }

    pub fn range(&self) -> PortRange {
        self.range
    }

    /// Ports handed out so far, sorted.
    pub fn reserved_ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self.reserved.lock().iter().copied().collect();
        ports.sort_unstable();
        ports
    }

    /// Forget all reservations. Ports are never held open, so nothing else
    /// needs releasing.
    pub fn release_all(&self) {
        self.reserved.lock().clear();
        *self.cursor.lock() = self.range.start;
    }

    fn unreserve(&self, ports: &[u16]) {
        let mut reserved = self.reserved.lock();
        for port in ports {
            reserved.remove(port);
        }
    }

    /// Next candidate from the cursor, wrapping at the end of the range.
    fn next_candidate(&self) -> u16 {
        let mut cursor = self.cursor.lock();
        let candidate = *cursor;
        *cursor = if candidate >= self.range.end {
            self.range.start
        } else {
            candidate + 1
        };
        candidate
    }

    /// Reserve one port for `endpoint`, probing at most `max_attempts` candidates.
    fn reserve_one(&self, host: &str, endpoint: &str, addrs: &[SocketAddr]) -> Result<u16> {
        for _ in 0..self.max_attempts {
            let candidate = self.next_candidate();
            if self.reserved.lock().contains(&candidate) {
                continue;
            }
            if probe(addrs, candidate) {
                self.reserved.lock().insert(candidate);
                tracing::debug!(
                    "Reserved port {} on {} for endpoint '{}'",
                    candidate,
                    host,
                    endpoint
                );
                return Ok(candidate);
            }
            tracing::trace!("Port {} on {} is busy", candidate, host);
        }
        Err(Error::PortExhausted {
            endpoint: endpoint.to_string(),
            attempts: self.max_attempts,
        })
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new(PortRange::default(), DEFAULT_MAX_ATTEMPTS)
    }
}

impl Allocate for PortAllocator {
    fn allocate(
        &self,
        service: &str,
        host: &str,
        endpoints: &[Endpoint],
    ) -> Result<NetworkMapping> {
        if self.range.is_empty() {
            return Err(Error::PortAllocation(format!(
                "empty port range {}-{}",
                self.range.start, self.range.end
            )));
        }

        let addrs = resolve(host)?;
        let mut mapping = NetworkMapping::new(service);
        let mut taken = Vec::with_capacity(endpoints.len());

        for endpoint in endpoints {
            match self.reserve_one(host, &endpoint.name, &addrs) {
                Ok(port) => {
                    taken.push(port);
                    mapping.push(endpoint.clone(), vec![Address::new(host, port)]);
                }
                Err(e) => {
                    // Roll back this call's reservations so a failed Init leaves nothing behind
                    self.unreserve(&taken);
                    return Err(e);
                }
            }
        }

        tracing::info!(
            "Allocated {} endpoint(s) for '{}': {}",
            mapping.len(),
            service,
            mapping
                .iter()
                .filter_map(|e| e.primary().map(|a| format!("{}={}", e.endpoint.name, a)))
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(mapping)
    }

    fn release(&self, mapping: &NetworkMapping) {
        let ports = mapping.ports();
        tracing::debug!("Releasing ports {:?} of '{}'", ports, mapping.service);
        self.unreserve(&ports);
    }
}

fn resolve(host: &str) -> Result<Vec<SocketAddr>> {
    let addrs: Vec<SocketAddr> = (host, 0u16)
        .to_socket_addrs()
        .map_err(|e| Error::PortAllocation(format!("cannot resolve host '{}': {}", host, e)))?
        .collect();
    if addrs.is_empty() {
        return Err(Error::PortAllocation(format!(
            "host '{}' resolved to no addresses",
            host
        )));
    }
    Ok(addrs)
}

/// Returns true when `port` can be bound on the resolved addresses.
///
/// `localhost` often resolves to both 127.0.0.1 and ::1. An address family
/// the machine cannot bind at all (EADDRNOTAVAIL) is not a conflict, but any
/// other bind failure is; at least one address must bind.
fn probe(addrs: &[SocketAddr], port: u16) -> bool {
    let mut bound_any = false;
    for addr in addrs {
        let mut addr = *addr;
        addr.set_port(port);
        match TcpListener::bind(addr) {
            Ok(listener) => {
                bound_any = true;
                drop(listener);
            }
            Err(e) if e.kind() == io::ErrorKind::AddrNotAvailable => continue,
            Err(_) => return false,
        }
    }
    bound_any
}
