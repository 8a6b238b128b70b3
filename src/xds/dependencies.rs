//! Resource names implied by the contents of other resources.
//!
//! Listeners point at route configurations, secrets and extension configs;
//! EDS clusters point at endpoint assignments. Every function here is pure and
//! returns sorted, deduplicated names so that request payloads are stable and
//! the watch table can tell when nothing changed.

use std::collections::BTreeSet;

use envoy_types::pb::envoy::config::cluster::v3::{
    cluster::{ClusterDiscoveryType, DiscoveryType},
    Cluster,
};
use envoy_types::pb::envoy::config::core::v3::{transport_socket, TransportSocket};
use envoy_types::pb::envoy::config::listener::v3::{filter, FilterChain, Listener};
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::{
    http_connection_manager::RouteSpecifier, http_filter, HttpConnectionManager,
};
use envoy_types::pb::envoy::extensions::transport_sockets::tls::v3::{
    common_tls_context::ValidationContextType, DownstreamTlsContext,
};
use prost::Message;
use tracing::debug;

use super::decode::DecodedResource;
use super::type_url::{
    ResourceType, DOWNSTREAM_TLS_CONTEXT_TYPE_URL, HTTP_CONNECTION_MANAGER_TYPE_URL,
};

/// Secret names that refer to local or self-signed material and are never
/// requested over SDS
pub const EXCLUDED_SECRET_NAMES: [&str; 3] = ["", "ROOTCA", "default"];

/// Names a listener batch needs from other discovery services
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListenerDependencies {
    pub routes: Vec<String>,
    pub secrets: Vec<String>,
    pub extension_configs: Vec<String>,
}

#[derive(Default)]
struct Collector {
    routes: BTreeSet<String>,
    secrets: BTreeSet<String>,
    extension_configs: BTreeSet<String>,
}

impl Collector {
    fn finish(self) -> ListenerDependencies {
        ListenerDependencies {
            routes: self.routes.into_iter().collect(),
            secrets: self.secrets.into_iter().collect(),
            extension_configs: self.extension_configs.into_iter().collect(),
        }
    }
}

/// Route, secret and extension-config names referenced by a listener batch.
pub fn listener_dependencies<'a>(
    listeners: impl IntoIterator<Item = &'a Listener>,
) -> ListenerDependencies {
    let mut collector = Collector::default();
    for listener in listeners {
        for chain in filter_chains(listener) {
            collect_chain(&listener.name, chain, &mut collector);
        }
    }
    collector.finish()
}

/// Route configuration names only
pub fn route_names<'a>(listeners: impl IntoIterator<Item = &'a Listener>) -> Vec<String> {
    listener_dependencies(listeners).routes
}

/// Endpoint assignment names for the EDS clusters in a batch.
pub fn endpoint_names<'a>(clusters: impl IntoIterator<Item = &'a Cluster>) -> Vec<String> {
    clusters
        .into_iter()
        .filter_map(endpoint_name)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// The endpoint assignment an EDS cluster subscribes to: its EDS service name
/// when one is configured, otherwise the cluster name. `None` for every other
/// discovery type.
pub fn endpoint_name(cluster: &Cluster) -> Option<String> {
    if !is_eds(cluster) {
        return None;
    }
    let service_name = cluster
        .eds_cluster_config
        .as_ref()
        .map(|eds| eds.service_name.as_str())
        .filter(|name| !name.is_empty());
    Some(service_name.unwrap_or(&cluster.name).to_string())
}

pub fn is_eds(cluster: &Cluster) -> bool {
    matches!(
        cluster.cluster_discovery_type,
        Some(ClusterDiscoveryType::Type(kind)) if kind == DiscoveryType::Eds as i32
    )
}

/// Subscriptions implied by a decoded state-of-the-world batch of `resource_type`.
pub fn derived_subscriptions(
    resource_type: ResourceType,
    resources: &[DecodedResource],
) -> Vec<(ResourceType, Vec<String>)> {
    match resource_type {
        ResourceType::Listener => {
            let listeners = resources.iter().filter_map(DecodedResource::as_listener);
            let deps = listener_dependencies(listeners);
            vec![
                (ResourceType::RouteConfiguration, deps.routes),
                (ResourceType::Secret, deps.secrets),
                (ResourceType::ExtensionConfig, deps.extension_configs),
            ]
        }
        ResourceType::Cluster => {
            let clusters = resources.iter().filter_map(DecodedResource::as_cluster);
            let endpoints = endpoint_names(clusters);
            vec![(ResourceType::ClusterLoadAssignment, endpoints)]
        }
        _ => Vec::new(),
    }
}

fn filter_chains(listener: &Listener) -> impl Iterator<Item = &FilterChain> {
    listener
        .filter_chains
        .iter()
        .chain(listener.default_filter_chain.as_ref())
}

fn collect_chain(listener: &str, chain: &FilterChain, collector: &mut Collector) {
    for network_filter in &chain.filters {
        match &network_filter.config_type {
            Some(filter::ConfigType::ConfigDiscovery(_)) => {
                insert_named(&mut collector.extension_configs, &network_filter.name);
            }
            Some(filter::ConfigType::TypedConfig(any))
                if any.type_url == HTTP_CONNECTION_MANAGER_TYPE_URL =>
            {
                match HttpConnectionManager::decode(any.value.as_slice()) {
                    Ok(hcm) => collect_hcm(&hcm, collector),
                    Err(e) => debug!(
                        listener = %listener,
                        filter = %network_filter.name,
                        error = %e,
                        "Skipping undecodable HttpConnectionManager"
                    ),
                }
            }
            _ => {}
        }
    }

    if let Some(socket) = &chain.transport_socket {
        collect_transport_socket(listener, socket, collector);
    }
}

fn collect_hcm(hcm: &HttpConnectionManager, collector: &mut Collector) {
    if let Some(RouteSpecifier::Rds(rds)) = &hcm.route_specifier {
        insert_named(&mut collector.routes, &rds.route_config_name);
    }
    for http_filter in &hcm.http_filters {
        if let Some(http_filter::ConfigType::ConfigDiscovery(_)) = &http_filter.config_type {
            insert_named(&mut collector.extension_configs, &http_filter.name);
        }
    }
}

/// An empty name would turn into a wildcard subscription on the wire
fn insert_named(names: &mut BTreeSet<String>, name: &str) {
    if !name.is_empty() {
        names.insert(name.to_string());
    }
}

fn collect_transport_socket(listener: &str, socket: &TransportSocket, collector: &mut Collector) {
    let Some(transport_socket::ConfigType::TypedConfig(any)) = &socket.config_type else {
        return;
    };
    if any.type_url != DOWNSTREAM_TLS_CONTEXT_TYPE_URL {
        return;
    }
    let tls = match DownstreamTlsContext::decode(any.value.as_slice()) {
        Ok(tls) => tls,
        Err(e) => {
            debug!(
                listener = %listener,
                error = %e,
                "Skipping undecodable DownstreamTlsContext"
            );
            return;
        }
    };
    let Some(common) = tls.common_tls_context else {
        return;
    };

    let mut names: Vec<String> = common
        .tls_certificate_sds_secret_configs
        .iter()
        .map(|sds| sds.name.clone())
        .collect();
    match common.validation_context_type {
        Some(ValidationContextType::ValidationContextSdsSecretConfig(sds)) => names.push(sds.name),
        Some(ValidationContextType::CombinedValidationContext(combined)) => {
            if let Some(sds) = combined.validation_context_sds_secret_config {
                names.push(sds.name);
            }
        }
        _ => {}
    }

    let requested = names
        .into_iter()
        .filter(|name| !EXCLUDED_SECRET_NAMES.contains(&name.as_str()));
    collector.secrets.extend(requested);
}
