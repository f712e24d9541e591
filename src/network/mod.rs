//! Endpoint declarations and the resolved network mapping.
//!
//! A service declares its [`Endpoint`]s once in configuration. `Init` turns
//! them into a [`NetworkMapping`] through the [`PortAllocator`]; the mapping is
//! then shared read-only with the environment synthesizer and every `Start`.

mod allocator;

pub use allocator::*;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Wire protocol spoken on an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Grpc,
    Http,
    Tcp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Grpc => write!(f, "grpc"),
            Protocol::Http => write!(f, "http"),
            Protocol::Tcp => write!(f, "tcp"),
        }
    }
}

/// Whether other services may be handed this endpoint's address.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Private,
    Public,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub name: String,
    pub protocol: Protocol,
    #[serde(default)]
    pub visibility: Visibility,
}

impl Endpoint {
    pub fn new(name: impl Into<String>, protocol: Protocol) -> Self {
        Self {
            name: name.into(),
            protocol,
            visibility: Visibility::Private,
        }
    }

    pub fn public(mut self) -> Self {
        self.visibility = Visibility::Public;
        self
    }

    pub fn is_public(&self) -> bool {
        self.visibility == Visibility::Public
    }
}

/// A reachable `host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    pub host: String,
    pub port: u16,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappedEndpoint {
    pub endpoint: Endpoint,
    pub addresses: Vec<Address>,
}

impl MappedEndpoint {
    /// First address, which is the one exported to the child environment.
    pub fn primary(&self) -> Option<&Address> {
        self.addresses.first()
    }
}

/// Ordered mapping from endpoint name to the addresses backing it.
///
/// Entries keep the declaration order of the endpoints so that generated
/// environment files are stable across restarts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkMapping {
    pub service: String,
    pub entries: Vec<MappedEndpoint>,
}

impl NetworkMapping {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, endpoint: Endpoint, addresses: Vec<Address>) {
        self.entries.push(MappedEndpoint {
            endpoint,
            addresses,
        });
    }

    pub fn get(&self, name: &str) -> Option<&MappedEndpoint> {
        self.entries.iter().find(|e| e.endpoint.name == name)
    }

    pub fn address(&self, name: &str) -> Option<&Address> {
        self.get(name).and_then(MappedEndpoint::primary)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MappedEndpoint> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All ports referenced by the mapping, in entry order.
    pub fn ports(&self) -> Vec<u16> {
        self.entries
            .iter()
            .flat_map(|e| e.addresses.iter().map(|a| a.port))
            .collect()
    }

    /// A copy restricted to public endpoints, the only ones other services see.
    pub fn public(&self) -> NetworkMapping {
        NetworkMapping {
            service: self.service.clone(),
            entries: self
                .entries
                .iter()
                .filter(|e| e.endpoint.is_public())
                .cloned()
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> NetworkMapping {
        let mut mapping = NetworkMapping::new("billing");
        mapping.push(
            Endpoint::new("grpc", Protocol::Grpc),
            vec![Address::new("localhost", 51000)],
        );
        mapping.push(
            Endpoint::new("http", Protocol::Http).public(),
            vec![Address::new("localhost", 51001)],
        );
        mapping
    }

    #[test]
    fn address_lookup_by_name() {
        let mapping = sample();
        assert_eq!(
            mapping.address("grpc").map(ToString::to_string).as_deref(),
            Some("localhost:51000")
        );
        assert!(mapping.address("missing").is_none());
    }

    #[test]
    fn public_filters_private_endpoints() {
        let public = sample().public();
        assert_eq!(public.len(), 1);
        assert_eq!(public.entries[0].endpoint.name, "http");
        assert_eq!(public.service, "billing");
    }

    #[test]
    fn endpoint_yaml_defaults_to_private() {
        let endpoint: Endpoint = serde_yaml::from_str("name: grpc\nprotocol: grpc\n").unwrap();
        assert_eq!(endpoint.visibility, Visibility::Private);
        assert_eq!(endpoint.protocol, Protocol::Grpc);
    }
}
