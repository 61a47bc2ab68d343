//! Encoding of an [`Endpoint`] onto a registry instance's attribute map.
//!
//! Required keys: IP, endpoint port, service port, cluster id, clusterset id.
//! Everything else is optional and falls back to a default. Keys this module
//! does not know about are carried in `Endpoint::attributes` unchanged.

use pkg_constants::registry::*;
use pkg_types::model::{Endpoint, Port, ServiceType};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AttributeError {
    #[error("instance {instance_id}: missing required attribute {key}")]
    Missing { instance_id: String, key: &'static str },
    #[error("instance {instance_id}: invalid value '{value}' for attribute {key}")]
    Invalid {
        instance_id: String,
        key: &'static str,
        value: String,
    },
}

const DEFAULT_PROTOCOL: &str = "TCP";

const KNOWN_KEYS: &[&str] = &[
    ATTR_IPV4,
    ATTR_PORT,
    ATTR_ENDPOINT_PORT_NAME,
    ATTR_ENDPOINT_PROTOCOL,
    ATTR_SERVICE_PORT_NAME,
    ATTR_SERVICE_PORT,
    ATTR_SERVICE_TARGET_PORT,
    ATTR_SERVICE_PROTOCOL,
    ATTR_SERVICE_TYPE,
    ATTR_CLUSTER_ID,
    ATTR_CLUSTER_SET_ID,
    ATTR_READY,
    ATTR_HOSTNAME,
    ATTR_NODENAME,
    ATTR_EXPORT_CREATION_TIMESTAMP,
    ATTR_CONTROLLER_VERSION,
];

/// Attribute map registered for `endpoint`.
pub fn encode_attributes(endpoint: &Endpoint) -> BTreeMap<String, String> {
    let mut attrs = endpoint.attributes.clone();
    let mut set = |key: &str, value: String| {
        attrs.insert(key.to_string(), value);
    };

    set(ATTR_IPV4, endpoint.ip.clone());
    set(ATTR_PORT, endpoint.endpoint_port.port.to_string());
    set(ATTR_ENDPOINT_PORT_NAME, endpoint.endpoint_port.name.clone());
    set(ATTR_ENDPOINT_PROTOCOL, endpoint.endpoint_port.protocol.clone());
    set(ATTR_SERVICE_PORT_NAME, endpoint.service_port.name.clone());
    set(ATTR_SERVICE_PORT, endpoint.service_port.port.to_string());
    set(ATTR_SERVICE_PROTOCOL, endpoint.service_port.protocol.clone());
    set(ATTR_SERVICE_TYPE, endpoint.service_type.to_string());
    set(ATTR_CLUSTER_ID, endpoint.cluster_id.clone());
    set(ATTR_CLUSTER_SET_ID, endpoint.cluster_set_id.clone());
    set(ATTR_READY, endpoint.ready.to_string());
    set(
        ATTR_EXPORT_CREATION_TIMESTAMP,
        endpoint.service_export_creation_timestamp.to_string(),
    );
    set(ATTR_CONTROLLER_VERSION, CONTROLLER_VERSION.to_string());
    if let Some(target) = &endpoint.service_port.target_port {
        set(ATTR_SERVICE_TARGET_PORT, target.clone());
    }
    if let Some(hostname) = &endpoint.hostname {
        set(ATTR_HOSTNAME, hostname.clone());
    }
    if let Some(nodename) = &endpoint.nodename {
        set(ATTR_NODENAME, nodename.clone());
    }
    attrs
}

struct Decoder<'a> {
    instance_id: &'a str,
    attrs: &'a BTreeMap<String, String>,
}

impl Decoder<'_> {
    fn required(&self, key: &'static str) -> Result<String, AttributeError> {
        self.attrs
            .get(key)
            .cloned()
            .ok_or_else(|| AttributeError::Missing {
                instance_id: self.instance_id.to_string(),
                key,
            })
    }

    fn optional(&self, key: &str) -> Option<String> {
        self.attrs.get(key).cloned()
    }

    fn parse<T: std::str::FromStr>(&self, key: &'static str, value: String) -> Result<T, AttributeError> {
        value.parse().map_err(|_| AttributeError::Invalid {
            instance_id: self.instance_id.to_string(),
            key,
            value,
        })
    }

    fn parse_optional<T: std::str::FromStr>(
        &self,
        key: &'static str,
        default: T,
    ) -> Result<T, AttributeError> {
        match self.optional(key) {
            Some(value) => self.parse(key, value),
            None => Ok(default),
        }
    }
}

/// Rebuild an endpoint from a registered instance.
pub fn endpoint_from_instance(
    instance_id: &str,
    attrs: &BTreeMap<String, String>,
) -> Result<Endpoint, AttributeError> {
    let d = Decoder { instance_id, attrs };

    let ip = d.required(ATTR_IPV4)?;
    let port: u16 = d.parse(ATTR_PORT, d.required(ATTR_PORT)?)?;
    let service_port: u16 = d.parse(ATTR_SERVICE_PORT, d.required(ATTR_SERVICE_PORT)?)?;
    let cluster_id = d.required(ATTR_CLUSTER_ID)?;
    let cluster_set_id = d.required(ATTR_CLUSTER_SET_ID)?;

    let service_type: ServiceType = match d.optional(ATTR_SERVICE_TYPE) {
        Some(v) => v.parse().map_err(|_| AttributeError::Invalid {
            instance_id: instance_id.to_string(),
            key: ATTR_SERVICE_TYPE,
            value: v,
        })?,
        None => ServiceType::default(),
    };

    let attributes = attrs
        .iter()
        .filter(|(k, _)| !KNOWN_KEYS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    Ok(Endpoint {
        id: instance_id.to_string(),
        ip,
        endpoint_port: Port {
            name: d.optional(ATTR_ENDPOINT_PORT_NAME).unwrap_or_default(),
            port,
            target_port: None,
            protocol: d
                .optional(ATTR_ENDPOINT_PROTOCOL)
                .unwrap_or_else(|| DEFAULT_PROTOCOL.to_string()),
        },
        service_port: Port {
            name: d.optional(ATTR_SERVICE_PORT_NAME).unwrap_or_default(),
            port: service_port,
            target_port: d.optional(ATTR_SERVICE_TARGET_PORT),
            protocol: d
                .optional(ATTR_SERVICE_PROTOCOL)
                .unwrap_or_else(|| DEFAULT_PROTOCOL.to_string()),
        },
        cluster_id,
        cluster_set_id,
        service_type,
        ready: d.parse_optional(ATTR_READY, true)?,
        hostname: d.optional(ATTR_HOSTNAME),
        nodename: d.optional(ATTR_NODENAME),
        service_export_creation_timestamp: d.parse_optional(ATTR_EXPORT_CREATION_TIMESTAMP, 0)?,
        attributes,
    })
}
