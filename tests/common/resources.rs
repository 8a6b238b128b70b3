//! Builders for the Envoy resources pushed by the scripted server.

use envoy_types::pb::envoy::config::cluster::v3::{
    cluster::{ClusterDiscoveryType, DiscoveryType, EdsClusterConfig},
    Cluster,
};
use envoy_types::pb::envoy::config::endpoint::v3::ClusterLoadAssignment;
use envoy_types::pb::envoy::config::listener::v3::{filter, Filter, FilterChain, Listener};
use envoy_types::pb::envoy::config::route::v3::RouteConfiguration;
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::{
    http_connection_manager::RouteSpecifier, HttpConnectionManager, Rds,
};
use envoy_types::pb::envoy::service::discovery::v3::{
    DeltaDiscoveryResponse, DiscoveryResponse, Resource,
};
use envoy_types::pb::google::protobuf::Any;
use flowplane_adsc::xds::type_url::{
    CLUSTER_TYPE_URL, ENDPOINT_TYPE_URL, HTTP_CONNECTION_MANAGER_TYPE_URL, LISTENER_TYPE_URL,
    ROUTE_TYPE_URL,
};
use prost::Message;

fn any<M: Message>(type_url: &str, message: &M) -> Any {
    Any {
        type_url: type_url.to_string(),
        value: message.encode_to_vec(),
    }
}

pub fn eds_cluster(name: &str) -> Any {
    any(CLUSTER_TYPE_URL, &cluster(name, DiscoveryType::Eds))
}

/// EDS cluster whose endpoints are published under `service_name`
pub fn eds_cluster_with_service(name: &str, service_name: &str) -> Any {
    let mut cluster = cluster(name, DiscoveryType::Eds);
    cluster.eds_cluster_config = Some(EdsClusterConfig {
        service_name: service_name.to_string(),
        ..Default::default()
    });
    any(CLUSTER_TYPE_URL, &cluster)
}

pub fn static_cluster(name: &str) -> Any {
    any(CLUSTER_TYPE_URL, &cluster(name, DiscoveryType::Static))
}

fn cluster(name: &str, kind: DiscoveryType) -> Cluster {
    Cluster {
        name: name.to_string(),
        cluster_discovery_type: Some(ClusterDiscoveryType::Type(kind as i32)),
        ..Default::default()
    }
}

/// Listener with one HTTP connection manager bound to RDS route `route`
pub fn http_listener(name: &str, route: &str) -> Any {
    let hcm = HttpConnectionManager {
        stat_prefix: name.to_string(),
        route_specifier: Some(RouteSpecifier::Rds(Rds {
            route_config_name: route.to_string(),
            ..Default::default()
        })),
        ..Default::default()
    };
    let listener = Listener {
        name: name.to_string(),
        filter_chains: vec![FilterChain {
            filters: vec![Filter {
                name: "envoy.filters.network.http_connection_manager".to_string(),
                config_type: Some(filter::ConfigType::TypedConfig(any(
                    HTTP_CONNECTION_MANAGER_TYPE_URL,
                    &hcm,
                ))),
            }],
            ..Default::default()
        }],
        ..Default::default()
    };
    any(LISTENER_TYPE_URL, &listener)
}

pub fn route_config(name: &str) -> Any {
    let route = RouteConfiguration {
        name: name.to_string(),
        ..Default::default()
    };
    any(ROUTE_TYPE_URL, &route)
}

pub fn load_assignment(cluster_name: &str) -> Any {
    let assignment = ClusterLoadAssignment {
        cluster_name: cluster_name.to_string(),
        ..Default::default()
    };
    any(ENDPOINT_TYPE_URL, &assignment)
}

/// Bytes that claim to be `type_url` but do not decode
pub fn garbage(type_url: &str) -> Any {
    Any {
        type_url: type_url.to_string(),
        value: vec![0xff, 0xff, 0xff],
    }
}

pub fn sotw_response(
    type_url: &str,
    version: &str,
    nonce: &str,
    resources: Vec<Any>,
) -> DiscoveryResponse {
    DiscoveryResponse {
        version_info: version.to_string(),
        resources,
        type_url: type_url.to_string(),
        nonce: nonce.to_string(),
        ..Default::default()
    }
}

/// Delta response carrying `(name, body)` pairs and removed names
pub fn delta_response(
    type_url: &str,
    nonce: &str,
    resources: Vec<(&str, Any)>,
    removed: &[&str],
) -> DeltaDiscoveryResponse {
    DeltaDiscoveryResponse {
        system_version_info: format!("v-{}", nonce),
        resources: resources
            .into_iter()
            .map(|(name, body)| Resource {
                name: name.to_string(),
                version: nonce.to_string(),
                resource: Some(body),
                ..Default::default()
            })
            .collect(),
        type_url: type_url.to_string(),
        removed_resources: removed.iter().map(|name| name.to_string()).collect(),
        nonce: nonce.to_string(),
        ..Default::default()
    }
}
