//! State-of-the-world ADS client.
//!
//! Every response carries the full resource set for its type. The receive
//! loop stores it, derives follow-up subscriptions from listener and cluster
//! contents, ACKs with the nonce and version it just processed, and then
//! publishes an event.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use envoy_types::pb::envoy::config::core::v3::Node;
use envoy_types::pb::envoy::service::discovery::v3::{DiscoveryRequest, DiscoveryResponse};
use tracing::{debug, info, warn, Instrument};

use super::dependencies::derived_subscriptions;
use super::events::Event;
use super::session::{AdsSession, SessionCore, SessionSettings};
use super::store::ResponseSnapshot;
use super::transport::AdsTransport;
use super::type_url::ResourceType;
use super::watch::WatchState;
use crate::adsc_span;
use crate::config::AdscConfig;
use crate::errors::Result;

/// Transport carrying the `StreamAggregatedResources` RPC
pub type SotwTransport = AdsTransport<DiscoveryRequest, DiscoveryResponse>;

/// SotW session handle. Clones share the same session.
#[derive(Clone, Debug)]
pub struct AdsClient {
    inner: Arc<SotwInner>,
}

#[derive(Debug)]
struct SotwInner {
    core: SessionCore<DiscoveryRequest, DiscoveryResponse>,
    watch_sent: AtomicBool,
    clusters_seen: AtomicBool,
}

/// What the receive loop sends after updating state for one response
struct ResponsePlan {
    subscriptions: Vec<(ResourceType, Vec<String>)>,
    ack_names: Vec<String>,
    watch_listeners: bool,
}

impl AdsClient {
    /// Dial `config.address`, open the stream with the initial cluster
    /// subscription already queued, and start the receive loop.
    pub async fn connect(config: &AdscConfig) -> Result<Self> {
        let settings = SessionSettings::from_config(config);
        let node = settings.identity.build()?;
        let initial = DiscoveryRequest {
            node: Some(node.clone()),
            type_url: ResourceType::Cluster.type_url().to_string(),
            ..Default::default()
        };

        let transport = SotwTransport::open_sotw(config, vec![initial]).await?;
        let client = Self::start(&settings, node, transport, true);
        info!(
            node_id = %client.inner.core.node_id,
            address = %config.address,
            "SotW ADS session active"
        );
        Ok(client)
    }

    /// Run a session over an existing transport. Nothing is sent until
    /// [`AdsClient::watch`] is called.
    pub fn from_transport(settings: SessionSettings, transport: SotwTransport) -> Result<Self> {
        let node = settings.identity.build()?;
        Ok(Self::start(&settings, node, transport, false))
    }

    fn start(
        settings: &SessionSettings,
        node: Node,
        transport: SotwTransport,
        watch_sent: bool,
    ) -> Self {
        let core = SessionCore::new(settings, node, transport, watch_sent);
        if watch_sent {
            let cds = ResourceType::Cluster;
            core.state.with(|inner| inner.watches.update(cds, &[]));
        }
        let inner = Arc::new(SotwInner {
            core,
            watch_sent: AtomicBool::new(watch_sent),
            clusters_seen: AtomicBool::new(false),
        });

        let span = adsc_span!("sotw_receive", inner.core.node_id, stream = "sotw");
        tokio::spawn(receive_loop(inner.clone()).instrument(span));
        Self { inner }
    }

    pub fn node_id(&self) -> &str {
        &self.inner.core.node_id
    }

    /// Subscribe to all clusters. Idempotent.
    pub async fn watch(&self) -> Result<()> {
        self.inner.core.ensure_open()?;
        if self.inner.watch_sent.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let cds = ResourceType::Cluster;
        let core = &self.inner.core;
        core.state.with(|inner| inner.watches.update(cds, &[]));
        let request = self.inner.request(cds, Vec::new(), "", "");
        core.send(request).await
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

async fn receive_loop(inner: Arc<SotwInner>) {
    loop {
        match inner.core.transport.receive().await {
            Ok(response) => inner.handle_response(response).await,
            Err(e) => {
                inner.core.teardown(Some(&e));
                break;
            }
        }
    }
    debug!("SotW receive loop finished");
}

impl SotwInner {
    fn request(
        &self,
        resource_type: ResourceType,
        resource_names: Vec<String>,
        version: &str,
        nonce: &str,
    ) -> DiscoveryRequest {
        DiscoveryRequest {
            version_info: version.to_string(),
            node: self.core.take_node(),
            resource_names,
            type_url: resource_type.type_url().to_string(),
            response_nonce: nonce.to_string(),
            ..Default::default()
        }
    }

    async fn handle_response(&self, response: DiscoveryResponse) {
        let Some(resource_type) = ResourceType::from_type_url(&response.type_url) else {
            warn!(
                type_url = %response.type_url,
                nonce = %response.nonce,
                "Response for unsupported type"
            );
            let ack = DiscoveryRequest {
                version_info: response.version_info,
                node: self.core.take_node(),
                type_url: response.type_url,
                response_nonce: response.nonce,
                ..Default::default()
            };
            let _ = self.core.send(ack).await;
            return;
        };

        let resources = self.core.decode_batch(resource_type, &response.resources);
        debug!(
            type_url = %response.type_url,
            version = %response.version_info,
            nonce = %response.nonce,
            resource_count = resources.len(),
            received = response.resources.len(),
            names = ?resources.iter().map(|r| r.name()).collect::<Vec<_>>(),
            "Processing SotW response"
        );

        let derived = derived_subscriptions(resource_type, &resources);
        let plan = self.core.update_state(|state| {
            state.store_all(resource_type, resources);

            let subscriptions: Vec<(ResourceType, Vec<String>)> = derived
                .into_iter()
                .filter(|(kind, names)| state.watches.desired_names_changed(*kind, names))
                .collect();
            for (kind, names) in &subscriptions {
                state.watches.update(*kind, names);
            }

            state
                .watches
                .record_ack(resource_type, &response.nonce, &response.version_info);

            let watch_listeners = resource_type == ResourceType::Cluster
                && !self.clusters_seen.swap(true, Ordering::AcqRel);
            if watch_listeners {
                state.watches.update(ResourceType::Listener, &[]);
            }

            ResponsePlan {
                subscriptions,
                ack_names: state.watches.names(resource_type),
                watch_listeners,
            }
        });
        let Some(plan) = plan else {
            debug!(nonce = %response.nonce, "Session closed, dropping response");
            return;
        };

        for (kind, names) in plan.subscriptions {
            info!(type_url = %kind.type_url(), resources = ?names, "Updating subscription");
            let _ = self.core.send(self.request(kind, names, "", "")).await;
        }

        let ack = self.request(
            resource_type,
            plan.ack_names,
            &response.version_info,
            &response.nonce,
        );
        let _ = self.core.send(ack).await;

        if plan.watch_listeners {
            info!("First cluster response processed, watching listeners");
            let lds = self.request(ResourceType::Listener, Vec::new(), "", "");
            let _ = self.core.send(lds).await;
        }

        self.core.events.publish(resource_type);
    }
}

#[async_trait]
impl AdsSession for AdsClient {
    fn node_id(&self) -> &str {
        AdsClient::node_id(self)
    }

    async fn watch(&self) -> Result<()> {
        AdsClient::watch(self).await
    }

    fn close(&self) {
        AdsClient::close(self)
    }

    fn is_closed(&self) -> bool {
        AdsClient::is_closed(self)
    }

    async fn wait(&self, want: Option<Event>, timeout: Duration) -> Result<Event> {
        AdsClient::wait(self, want, timeout).await
    }

    async fn wait_clear(&self) -> usize {
        AdsClient::wait_clear(self).await
    }

    fn responses(&self) -> ResponseSnapshot {
        AdsClient::responses(self)
    }

    fn watches(&self) -> BTreeMap<ResourceType, WatchState> {
        AdsClient::watches(self)
    }
}
