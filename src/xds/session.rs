//! Caller-facing session API shared by the SotW and Delta clients.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use envoy_types::pb::envoy::config::core::v3::Node;
use envoy_types::pb::google::protobuf::Any;
use tracing::{info, warn};

use super::decode::{DecodedResource, DecoderTable};
use super::delta::DeltaAdsClient;
use super::events::{Event, EventChannel};
use super::node::NodeIdentity;
use super::sotw::AdsClient;
use super::state::{SessionInner, SessionState};
use super::store::ResponseSnapshot;
use super::transport::{AdsTransport, TypedRequest};
use super::type_url::ResourceType;
use super::watch::WatchState;
use crate::config::AdscConfig;
use crate::errors::{AdscError, Result};

/// Default capacity of a session's event buffer
pub const DEFAULT_EVENT_BUFFER: usize = 100;

/// Everything a client needs besides its transport
#[derive(Clone, Debug)]
pub struct SessionSettings {
    pub identity: NodeIdentity,
    pub store_responses: bool,
    pub event_buffer: usize,
    pub decoders: DecoderTable,
}

impl SessionSettings {
    pub fn new(identity: NodeIdentity) -> Self {
        Self {
            identity,
            store_responses: false,
            event_buffer: DEFAULT_EVENT_BUFFER,
            decoders: DecoderTable::envoy_v3(),
        }
    }

    pub fn from_config(config: &AdscConfig) -> Self {
        Self {
            store_responses: config.store_responses,
            event_buffer: config.event_buffer,
            ..Self::new(NodeIdentity::from_config(&config.identity))
        }
    }

    pub fn with_store_responses(mut self, store_responses: bool) -> Self {
        self.store_responses = store_responses;
        self
    }

    pub fn with_event_buffer(mut self, event_buffer: usize) -> Self {
        self.event_buffer = event_buffer;
        self
    }

    pub fn with_decoders(mut self, decoders: DecoderTable) -> Self {
        self.decoders = decoders;
        self
    }
}

/// One emulated proxy's ADS session.
///
/// A session is `Active` from construction until the stream fails or
/// [`AdsSession::close`] is called; after that it is closed for good and a new
/// session has to be opened to reconnect.
#[async_trait]
pub trait AdsSession: Send + Sync + fmt::Debug {
    fn node_id(&self) -> &str;

    /// Issue the initial subscription. Sessions opened through [`connect`]
    /// have already done so, in which case this is a no-op.
    async fn watch(&self) -> Result<()>;

    /// Tear the session down. Idempotent.
    fn close(&self);

    fn is_closed(&self) -> bool;

    /// Wait for the next event matching `want`, or any event when `None`.
    async fn wait(&self, want: Option<Event>, timeout: Duration) -> Result<Event>;

    /// Discard buffered events, returning how many were dropped.
    async fn wait_clear(&self) -> usize;

    /// Last decoded resources; empty unless response storage was requested.
    fn responses(&self) -> ResponseSnapshot;

    fn watches(&self) -> BTreeMap<ResourceType, WatchState>;
}

/// Open a session for `config`, choosing the Delta or SotW variant.
pub async fn connect(config: &AdscConfig) -> Result<Arc<dyn AdsSession>> {
    config.validate()?;
    if config.delta {
        Ok(Arc::new(DeltaAdsClient::connect(config).await?))
    } else {
        Ok(Arc::new(AdsClient::connect(config).await?))
    }
}

/// State common to both protocol variants.
pub(crate) struct SessionCore<Req, Resp> {
    pub node: Node,
    pub node_id: String,
    pub transport: AdsTransport<Req, Resp>,
    pub state: SessionState,
    pub events: EventChannel,
    pub decoders: DecoderTable,
    node_sent: AtomicBool,
}

impl<Req, Resp> fmt::Debug for SessionCore<Req, Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCore")
            .field("node_id", &self.node_id)
            .field("transport", &self.transport)
            .field("closed", &self.events.is_closed())
            .finish()
    }
}

impl<Req: TypedRequest, Resp: Send + 'static> SessionCore<Req, Resp> {
    pub fn new(
        settings: &SessionSettings,
        node: Node,
        transport: AdsTransport<Req, Resp>,
        node_sent: bool,
    ) -> Self {
        Self {
            node_id: node.id.clone(),
            node,
            transport,
            state: SessionState::new(settings.store_responses),
            events: EventChannel::new(settings.event_buffer),
            decoders: settings.decoders.clone(),
            node_sent: AtomicBool::new(node_sent),
        }
    }

    /// The node, for the first request of the stream only
    pub fn take_node(&self) -> Option<Node> {
        (!self.node_sent.swap(true, Ordering::AcqRel)).then(|| self.node.clone())
    }

    /// Send a request, logging failures. Send errors never close the session.
    pub async fn send(&self, request: Req) -> Result<()> {
        let type_url = request.type_url().to_string();
        self.transport.send(request).await.inspect_err(|e| {
            warn!(type_url = %type_url, error = %e, "Failed to send ADS request");
        })
    }

    /// Decode a batch, skipping resources that fail to decode or are not of
    /// `resource_type`.
    pub fn decode_batch<'a>(
        &self,
        resource_type: ResourceType,
        resources: impl IntoIterator<Item = &'a Any>,
    ) -> Vec<DecodedResource> {
        resources
            .into_iter()
            .filter_map(|any| match self.decoders.decode(any) {
                Ok(resource) if resource.resource_type() == resource_type => Some(resource),
                Ok(resource) => {
                    warn!(
                        expected = %resource_type,
                        actual = %resource.resource_type(),
                        name = %resource.name(),
                        "Skipping resource of unexpected type"
                    );
                    None
                }
                Err(e) => {
                    warn!(type_url = %any.type_url, error = %e, "Skipping undecodable resource");
                    None
                }
            })
            .collect()
    }

    /// Run `f` against the session state unless teardown has begun. The
    /// transport is closed before teardown takes the state lock, so a response
    /// either lands before the watches are cleared or not at all.
    pub fn update_state<R>(&self, f: impl FnOnce(&mut SessionInner) -> R) -> Option<R> {
        self.state.with(|inner| {
            if self.transport.is_closed() {
                None
            } else {
                Some(f(inner))
            }
        })
    }

    /// Enter `Closed`: release the stream, drop the watches and signal close
    /// exactly once.
    pub fn teardown(&self, reason: Option<&AdscError>) {
        self.transport.close();
        self.state.with(|inner| inner.watches.clear());
        if self.events.publish_close() {
            match reason {
                Some(error) => {
                    warn!(node_id = %self.node_id, error = %error, "ADS session terminated")
                }
                None => info!(node_id = %self.node_id, "ADS session closed"),
            }
        }
    }

    pub fn ensure_open(&self) -> Result<()> {
        if self.events.is_closed() {
            return Err(AdscError::Closed);
        }
        Ok(())
    }
}
