//! Resource type identifiers and their wire type URLs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::AdscError;

/// Type URL for Envoy Cluster resources (CDS)
pub const CLUSTER_TYPE_URL: &str = "type.googleapis.com/envoy.config.cluster.v3.Cluster";
/// Type URL for Envoy Listener resources (LDS)
pub const LISTENER_TYPE_URL: &str = "type.googleapis.com/envoy.config.listener.v3.Listener";
/// Type URL for Envoy RouteConfiguration resources (RDS)
pub const ROUTE_TYPE_URL: &str = "type.googleapis.com/envoy.config.route.v3.RouteConfiguration";
/// Type URL for Envoy ClusterLoadAssignment resources (EDS)
pub const ENDPOINT_TYPE_URL: &str =
    "type.googleapis.com/envoy.config.endpoint.v3.ClusterLoadAssignment";
/// Type URL for Envoy Secret resources (SDS)
pub const SECRET_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.Secret";
/// Type URL for TypedExtensionConfig resources (ECDS)
pub const EXTENSION_CONFIG_TYPE_URL: &str =
    "type.googleapis.com/envoy.config.core.v3.TypedExtensionConfig";
/// Envelope some control planes wrap SotW resources in
pub const RESOURCE_WRAPPER_TYPE_URL: &str =
    "type.googleapis.com/envoy.service.discovery.v3.Resource";

/// HttpConnectionManager network filter config
pub const HTTP_CONNECTION_MANAGER_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.network.http_connection_manager.v3.HttpConnectionManager";
/// Downstream TLS transport socket config
pub const DOWNSTREAM_TLS_CONTEXT_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.DownstreamTlsContext";

/// The closed set of resource kinds an ADS session handles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Cluster,
    Listener,
    RouteConfiguration,
    ClusterLoadAssignment,
    Secret,
    ExtensionConfig,
}

impl ResourceType {
    /// Every supported type, in subscription order
    pub const ALL: [ResourceType; 6] = [
        ResourceType::Cluster,
        ResourceType::Listener,
        ResourceType::RouteConfiguration,
        ResourceType::ClusterLoadAssignment,
        ResourceType::Secret,
        ResourceType::ExtensionConfig,
    ];

    pub fn type_url(&self) -> &'static str {
        match self {
            ResourceType::Cluster => CLUSTER_TYPE_URL,
            ResourceType::Listener => LISTENER_TYPE_URL,
            ResourceType::RouteConfiguration => ROUTE_TYPE_URL,
            ResourceType::ClusterLoadAssignment => ENDPOINT_TYPE_URL,
            ResourceType::Secret => SECRET_TYPE_URL,
            ResourceType::ExtensionConfig => EXTENSION_CONFIG_TYPE_URL,
        }
    }

    /// Discovery service short name used for events and logs ("cds", "lds", ...)
    pub fn short_name(&self) -> &'static str {
        match self {
            ResourceType::Cluster => "cds",
            ResourceType::Listener => "lds",
            ResourceType::RouteConfiguration => "rds",
            ResourceType::ClusterLoadAssignment => "eds",
            ResourceType::Secret => "sds",
            ResourceType::ExtensionConfig => "ecds",
        }
    }

    pub fn from_type_url(type_url: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.type_url() == type_url)
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

impl FromStr for ResourceType {
    type Err = AdscError;

    /// Accepts either the short name or the full type URL
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.short_name() == s || kind.type_url() == s)
            .ok_or_else(|| AdscError::validation(format!("Unknown resource type '{}'", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_url_lookup() {
        for kind in ResourceType::ALL {
            assert_eq!(ResourceType::from_type_url(kind.type_url()), Some(kind));
        }
        let unknown = "type.googleapis.com/unknown.Thing";
        assert!(ResourceType::from_type_url(unknown).is_none());
    }

    #[test]
    fn test_short_names() {
        assert_eq!(ResourceType::Cluster.to_string(), "cds");
        assert_eq!(ResourceType::ClusterLoadAssignment.to_string(), "eds");
        assert_eq!(ResourceType::ExtensionConfig.to_string(), "ecds");
    }

    #[test]
    fn test_parse() {
        let rds: ResourceType = "rds".parse().unwrap();
        assert_eq!(rds, ResourceType::RouteConfiguration);
        let sds: ResourceType = SECRET_TYPE_URL.parse().unwrap();
        assert_eq!(sds, ResourceType::Secret);
        assert!("xds".parse::<ResourceType>().is_err());
    }
}
