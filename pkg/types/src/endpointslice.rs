use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use crate::meta::{ObjectMeta, Resource};
use crate::service::default_protocol;

/// Address family of every endpoint in a slice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressType {
    #[default]
    IPv4,
    IPv6,
    FQDN,
}

impl AddressType {
    /// Address family of a textual IP. Anything unparseable is treated as FQDN.
    pub fn of(ip: &str) -> Self {
        match ip.parse::<IpAddr>() {
            Ok(IpAddr::V4(_)) => AddressType::IPv4,
            Ok(IpAddr::V6(_)) => AddressType::IPv6,
            Err(_) => AddressType::FQDN,
        }
    }
}

/// A port exposed by every endpoint of the slice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointPort {
    #[serde(default)]
    pub name: String,
    pub port: u16,
    #[serde(default = "default_protocol")]
    pub protocol: String,
}

/// One backend in a slice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliceEndpoint {
    pub addresses: Vec<String>,
    #[serde(default = "default_ready")]
    pub ready: bool,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub node_name: Option<String>,
}

fn default_ready() -> bool {
    true
}

impl SliceEndpoint {
    /// First address; slices hold one address per endpoint in practice.
    pub fn address(&self) -> Option<&str> {
        self.addresses.first().map(String::as_str)
    }
}

/// A bounded set of backend addresses for a Service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointSlice {
    pub meta: ObjectMeta,
    #[serde(default)]
    pub address_type: AddressType,
    #[serde(default)]
    pub endpoints: Vec<SliceEndpoint>,
    #[serde(default)]
    pub ports: Vec<EndpointPort>,
}

impl Resource for EndpointSlice {
    const KIND: &'static str = "endpointslices";

    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.meta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_family_detection() {
        assert_eq!(AddressType::of("10.0.0.1"), AddressType::IPv4);
        assert_eq!(AddressType::of("fd00::1"), AddressType::IPv6);
        assert_eq!(AddressType::of("db.example.com"), AddressType::FQDN);
    }
}
