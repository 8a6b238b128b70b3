//! Incremental (delta) ADS client.
//!
//! Responses carry only changed and removed resources. Subscriptions grow by
//! sending just the names that are new, and ACKs carry nothing but the nonce.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use envoy_types::pb::envoy::config::core::v3::Node;
use envoy_types::pb::envoy::service::discovery::v3::{
    DeltaDiscoveryRequest, DeltaDiscoveryResponse,
};
use tracing::{debug, info, warn, Instrument};

use super::decode::DecodedResource;
use super::dependencies::{endpoint_name, route_names};
use super::events::Event;
use super::session::{AdsSession, SessionCore, SessionSettings};
use super::store::ResponseSnapshot;
use super::transport::AdsTransport;
use super::type_url::ResourceType;
use super::watch::WatchState;
use crate::adsc_span;
use crate::config::AdscConfig;
use crate::errors::Result;

/// Transport carrying the `DeltaAggregatedResources` RPC
pub type DeltaTransport = AdsTransport<DeltaDiscoveryRequest, DeltaDiscoveryResponse>;

/// Types subscribed when the stream opens, both as wildcards
const INITIAL_TYPES: [ResourceType; 2] = [ResourceType::Cluster, ResourceType::Listener];

/// Delta session handle. Clones share the same session.
#[derive(Clone, Debug)]
pub struct DeltaAdsClient {
    inner: Arc<DeltaInner>,
}

#[derive(Debug)]
struct DeltaInner {
    core: SessionCore<DeltaDiscoveryRequest, DeltaDiscoveryResponse>,
    watch_sent: AtomicBool,
}

impl DeltaAdsClient {
    /// Dial `config.address` and open the stream with the initial cluster and
    /// listener subscriptions queued.
    pub async fn connect(config: &AdscConfig) -> Result<Self> {
        let settings = SessionSettings::from_config(config);
        let node = settings.identity.build()?;
        let initial = INITIAL_TYPES
            .iter()
            .enumerate()
            .map(|(index, kind)| DeltaDiscoveryRequest {
                node: (index == 0).then(|| node.clone()),
                type_url: kind.type_url().to_string(),
                ..Default::default()
            })
            .collect();

        let transport = DeltaTransport::open_delta(config, initial).await?;
        let client = Self::start(&settings, node, transport, true);
        info!(
            node_id = %client.inner.core.node_id,
            address = %config.address,
            "Delta ADS session active"
        );
        Ok(client)
    }

    /// Run a session over an existing transport. Nothing is sent until
    /// [`DeltaAdsClient::watch`] is called.
    pub fn from_transport(settings: SessionSettings, transport: DeltaTransport) -> Result<Self> {
        let node = settings.identity.build()?;
        Ok(Self::start(&settings, node, transport, false))
    }

    fn start(
        settings: &SessionSettings,
        node: Node,
        transport: DeltaTransport,
        watch_sent: bool,
    ) -> Self {
        let core = SessionCore::new(settings, node, transport, watch_sent);
        if watch_sent {
            core.state.with(|inner| {
                for kind in INITIAL_TYPES {
                    inner.watches.update(kind, &[]);
                }
            });
        }
        let inner = Arc::new(DeltaInner {
            core,
            watch_sent: AtomicBool::new(watch_sent),
        });

        let span = adsc_span!("delta_receive", inner.core.node_id, stream = "delta");
        tokio::spawn(receive_loop(inner.clone()).instrument(span));
        Self { inner }
    }

    pub fn node_id(&self) -> &str {
        &self.inner.core.node_id
    }

    /// Subscribe to all clusters and listeners. Idempotent.
    pub async fn watch(&self) -> Result<()> {
        self.inner.core.ensure_open()?;
        if self.inner.watch_sent.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.inner.core.state.with(|inner| {
            for kind in INITIAL_TYPES {
                inner.watches.update(kind, &[]);
            }
        });
        for kind in INITIAL_TYPES {
            let request = self.inner.subscribe(kind, Vec::new());
            self.inner.core.send(request).await?;
        }
        Ok(())
    }

    pub fn close(&self) {
        self.inner.core.teardown(None);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.core.events.is_closed()
    }

    pub async fn wait(&self, want: Option<Event>, timeout: Duration) -> Result<Event> {
        self.inner.core.events.wait(want, timeout).await
    }

    pub async fn wait_clear(&self) -> usize {
        self.inner.core.events.wait_clear().await
    }

    pub fn responses(&self) -> ResponseSnapshot {
        self.inner.core.state.responses()
    }

    pub fn watches(&self) -> BTreeMap<ResourceType, WatchState> {
        self.inner.core.state.watches()
    }
}

async fn receive_loop(inner: Arc<DeltaInner>) {
    loop {
        match inner.core.transport.receive().await {
            Ok(response) => inner.handle_response(response).await,
            Err(e) => {
                inner.core.teardown(Some(&e));
                break;
            }
        }
    }
    debug!("Delta receive loop finished");
}

impl DeltaInner {
    fn subscribe(&self, resource_type: ResourceType, names: Vec<String>) -> DeltaDiscoveryRequest {
        DeltaDiscoveryRequest {
            node: self.core.take_node(),
            type_url: resource_type.type_url().to_string(),
            resource_names_subscribe: names,
            ..Default::default()
        }
    }

    fn unsubscribe(
        &self,
        resource_type: ResourceType,
        names: Vec<String>,
    ) -> DeltaDiscoveryRequest {
        DeltaDiscoveryRequest {
            node: self.core.take_node(),
            type_url: resource_type.type_url().to_string(),
            resource_names_unsubscribe: names,
            ..Default::default()
        }
    }

    fn ack(&self, type_url: String, nonce: String) -> DeltaDiscoveryRequest {
        DeltaDiscoveryRequest {
            node: self.core.take_node(),
            type_url,
            response_nonce: nonce,
            ..Default::default()
        }
    }

    async fn handle_response(&self, response: DeltaDiscoveryResponse) {
        let Some(resource_type) = ResourceType::from_type_url(&response.type_url) else {
            warn!(
                type_url = %response.type_url,
                nonce = %response.nonce,
                "Delta response for unsupported type"
            );
            let ack = self.ack(response.type_url, response.nonce);
            let _ = self.core.send(ack).await;
            return;
        };

        let resources = self.core.decode_batch(
            resource_type,
            response.resources.iter().filter_map(|entry| {
                if entry.resource.is_none() {
                    debug!(name = %entry.name, "Delta resource without body");
                }
                entry.resource.as_ref()
            }),
        );

        // Names implied by this message, grouped per type
        let mut endpoints = Vec::new();
        let mut routes = Vec::new();
        for resource in &resources {
            match resource {
                DecodedResource::Cluster(cluster) => endpoints.extend(endpoint_name(cluster)),
                DecodedResource::Listener(listener) => routes.extend(route_names([listener])),
                _ => {}
            }
        }

        debug!(
            type_url = %response.type_url,
            version = %response.system_version_info,
            nonce = %response.nonce,
            resource_count = resources.len(),
            removed = response.removed_resources.len(),
            "Processing delta response"
        );

        let plan = self.core.update_state(|state| {
            for resource in resources {
                state.store_one(resource);
            }
            let mut released = Vec::new();
            for name in &response.removed_resources {
                let removed = state.forget(resource_type, name);
                if resource_type == ResourceType::Cluster {
                    released.extend(released_endpoint(name, removed.as_ref()));
                }
            }
            state.watches.record_ack(
                resource_type,
                &response.nonce,
                &response.system_version_info,
            );

            let subscriptions = [
                (ResourceType::ClusterLoadAssignment, endpoints),
                (ResourceType::RouteConfiguration, routes),
            ]
            .into_iter()
            .map(|(kind, names)| (kind, state.watches.subscribe(kind, &names)))
            .filter(|(_, added)| !added.is_empty())
            .collect::<Vec<_>>();
            let eds = ResourceType::ClusterLoadAssignment;
            let unsubscribed = state.watches.unsubscribe(eds, &released);
            (subscriptions, unsubscribed)
        });
        let Some((subscriptions, unsubscribed)) = plan else {
            debug!(nonce = %response.nonce, "Session closed, dropping delta response");
            return;
        };

        for (kind, names) in subscriptions {
            info!(type_url = %kind.type_url(), resources = ?names, "Subscribing to resources");
            let _ = self.core.send(self.subscribe(kind, names)).await;
        }
        if !unsubscribed.is_empty() {
            let kind = ResourceType::ClusterLoadAssignment;
            info!(
                type_url = %kind.type_url(),
                resources = ?unsubscribed,
                "Unsubscribing from resources"
            );
            let _ = self.core.send(self.unsubscribe(kind, unsubscribed)).await;
        }

        let ack = self.ack(response.type_url, response.nonce);
        let _ = self.core.send(ack).await;
        self.core.events.publish(resource_type);
    }
}

/// Endpoint assignment to drop for a removed cluster. A stored cluster gives
/// the exact name; without one the removed name is used, which matches EDS
/// clusters that have no service name.
fn released_endpoint(name: &str, removed: Option<&DecodedResource>) -> Option<String> {
    match removed {
        Some(DecodedResource::Cluster(cluster)) => endpoint_name(cluster),
        Some(_) => None,
        None => Some(name.to_string()),
    }
}

#[async_trait]
impl AdsSession for DeltaAdsClient {
    fn node_id(&self) -> &str {
        DeltaAdsClient::node_id(self)
    }

    async fn watch(&self) -> Result<()> {
        DeltaAdsClient::watch(self).await
    }

    fn close(&self) {
        DeltaAdsClient::close(self)
    }

    fn is_closed(&self) -> bool {
        DeltaAdsClient::is_closed(self)
    }

    async fn wait(&self, want: Option<Event>, timeout: Duration) -> Result<Event> {
        DeltaAdsClient::wait(self, want, timeout).await
    }

    async fn wait_clear(&self) -> usize {
        DeltaAdsClient::wait_clear(self).await
    }

    fn responses(&self) -> ResponseSnapshot {
        DeltaAdsClient::responses(self)
    }

    fn watches(&self) -> BTreeMap<ResourceType, WatchState> {
        DeltaAdsClient::watches(self)
    }
}
