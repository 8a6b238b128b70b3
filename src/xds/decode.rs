//! Explicit decoder table mapping type URLs to concrete resource decoders.
//!
//! Nothing here relies on a global protobuf registry: the set of kinds a
//! session understands is whatever table it was constructed with.

use std::collections::HashMap;
use std::fmt;

use envoy_types::pb::envoy::config::cluster::v3::Cluster;
use envoy_types::pb::envoy::config::core::v3::TypedExtensionConfig;
use envoy_types::pb::envoy::config::endpoint::v3::ClusterLoadAssignment;
use envoy_types::pb::envoy::config::listener::v3::Listener;
use envoy_types::pb::envoy::config::route::v3::RouteConfiguration;
use envoy_types::pb::envoy::extensions::transport_sockets::tls::v3::Secret;
use envoy_types::pb::envoy::service::discovery::v3::Resource;
use envoy_types::pb::google::protobuf::Any;
use prost::Message;

use super::type_url::{ResourceType, RESOURCE_WRAPPER_TYPE_URL};
use crate::errors::{AdscError, Result};

/// A resource decoded into its concrete Envoy type
#[derive(Clone, Debug, PartialEq)]
pub enum DecodedResource {
    Cluster(Cluster),
    Listener(Listener),
    RouteConfiguration(RouteConfiguration),
    ClusterLoadAssignment(ClusterLoadAssignment),
    Secret(Secret),
    ExtensionConfig(TypedExtensionConfig),
}

impl DecodedResource {
    /// Resource name; endpoints are named after their cluster
    pub fn name(&self) -> &str {
        match self {
            DecodedResource::Cluster(c) => &c.name,
            DecodedResource::Listener(l) => &l.name,
            DecodedResource::RouteConfiguration(r) => &r.name,
            DecodedResource::ClusterLoadAssignment(e) => &e.cluster_name,
            DecodedResource::Secret(s) => &s.name,
            DecodedResource::ExtensionConfig(x) => &x.name,
        }
    }

    pub fn resource_type(&self) -> ResourceType {
        match self {
            DecodedResource::Cluster(_) => ResourceType::Cluster,
            DecodedResource::Listener(_) => ResourceType::Listener,
            DecodedResource::RouteConfiguration(_) => ResourceType::RouteConfiguration,
            DecodedResource::ClusterLoadAssignment(_) => ResourceType::ClusterLoadAssignment,
            DecodedResource::Secret(_) => ResourceType::Secret,
            DecodedResource::ExtensionConfig(_) => ResourceType::ExtensionConfig,
        }
    }

    pub fn as_cluster(&self) -> Option<&Cluster> {
        match self {
            DecodedResource::Cluster(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_listener(&self) -> Option<&Listener> {
        match self {
            DecodedResource::Listener(l) => Some(l),
            _ => None,
        }
    }
}

/// Decodes the raw bytes of one resource kind
pub type DecodeFn = fn(&[u8]) -> std::result::Result<DecodedResource, prost::DecodeError>;

/// Type URL to decoder mapping
#[derive(Clone)]
pub struct DecoderTable {
    decoders: HashMap<String, DecodeFn>,
}

impl fmt::Debug for DecoderTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut urls: Vec<&str> = self.decoders.keys().map(String::as_str).collect();
        urls.sort_unstable();
        f.debug_struct("DecoderTable")
            .field("type_urls", &urls)
            .finish()
    }
}

impl Default for DecoderTable {
    fn default() -> Self {
        Self::envoy_v3()
    }
}

impl DecoderTable {
    /// A table with no decoders registered
    pub fn empty() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// Decoders for the six Envoy v3 kinds an ADS session subscribes to
    pub fn envoy_v3() -> Self {
        let mut table = Self::empty();
        table.register(ResourceType::Cluster.type_url(), |bytes| {
            Cluster::decode(bytes).map(DecodedResource::Cluster)
        });
        table.register(ResourceType::Listener.type_url(), |bytes| {
            Listener::decode(bytes).map(DecodedResource::Listener)
        });
        table.register(ResourceType::RouteConfiguration.type_url(), |bytes| {
            RouteConfiguration::decode(bytes).map(DecodedResource::RouteConfiguration)
        });
        table.register(ResourceType::ClusterLoadAssignment.type_url(), |bytes| {
            ClusterLoadAssignment::decode(bytes).map(DecodedResource::ClusterLoadAssignment)
        });
        table.register(ResourceType::Secret.type_url(), |bytes| {
            Secret::decode(bytes).map(DecodedResource::Secret)
        });
        table.register(ResourceType::ExtensionConfig.type_url(), |bytes| {
            TypedExtensionConfig::decode(bytes).map(DecodedResource::ExtensionConfig)
        });
        table
    }

    pub fn register(&mut self, type_url: impl Into<String>, decoder: DecodeFn) -> &mut Self {
        self.decoders.insert(type_url.into(), decoder);
        self
    }

    pub fn supports(&self, type_url: &str) -> bool {
        self.decoders.contains_key(type_url)
    }

    /// Decode one `Any`, unwrapping the discovery `Resource` envelope if present.
    pub fn decode(&self, any: &Any) -> Result<DecodedResource> {
        if any.type_url == RESOURCE_WRAPPER_TYPE_URL {
            let wrapper = Resource::decode(any.value.as_slice())
                .map_err(|e| AdscError::decode(&any.type_url, e.to_string()))?;
            let inner = wrapper.resource.ok_or_else(|| {
                AdscError::decode(
                    &any.type_url,
                    format!("resource '{}' has no body", wrapper.name),
                )
            })?;
            return self.decode_bytes(&inner.type_url, &inner.value);
        }
        self.decode_bytes(&any.type_url, &any.value)
    }

    pub fn decode_bytes(&self, type_url: &str, bytes: &[u8]) -> Result<DecodedResource> {
        let decoder = self
            .decoders
            .get(type_url)
            .ok_or_else(|| AdscError::decode(type_url, "no decoder registered"))?;
        decoder(bytes)
            .map_err(|e| AdscError::decode(type_url, e.to_string()))
    }
}
