//! One connection and one bidirectional ADS stream.
//!
//! Outbound requests go through a bounded channel that tonic drains into the
//! request body, so concurrent `send` calls never interleave on the wire.
//! Inbound messages are read by exactly one receive loop.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use envoy_types::pb::envoy::service::discovery::v3::{
    aggregated_discovery_service_client::AggregatedDiscoveryServiceClient, DeltaDiscoveryRequest,
    DeltaDiscoveryResponse, DiscoveryRequest, DiscoveryResponse,
};
use futures::stream::{BoxStream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, info};

use crate::config::AdscConfig;
use crate::errors::{AdscError, Result};

/// Largest message accepted from or sent to the control plane
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Requests queued ahead of the wire before `send` starts waiting
const OUTBOUND_BUFFER: usize = 64;

/// Inbound half of a stream
pub type InboundStream<T> = BoxStream<'static, std::result::Result<T, tonic::Status>>;

/// Requests the transport can describe in errors and logs
pub trait TypedRequest: Send + 'static {
    fn type_url(&self) -> &str;
}

impl TypedRequest for DiscoveryRequest {
    fn type_url(&self) -> &str {
        &self.type_url
    }
}

impl TypedRequest for DeltaDiscoveryRequest {
    fn type_url(&self) -> &str {
        &self.type_url
    }
}

/// Transport session over a single ADS stream
pub struct AdsTransport<Req, Resp> {
    address: String,
    outbound: Mutex<Option<mpsc::Sender<Req>>>,
    inbound: tokio::sync::Mutex<Option<InboundStream<Resp>>>,
    channel: Mutex<Option<Channel>>,
    closed: CancellationToken,
}

impl<Req, Resp> std::fmt::Debug for AdsTransport<Req, Resp> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdsTransport")
            .field("address", &self.address)
            .field("closed", &self.closed.is_cancelled())
            .finish()
    }
}

impl<Req: TypedRequest, Resp: Send + 'static> AdsTransport<Req, Resp> {
    /// Build a transport from already-established halves.
    pub fn from_parts(
        address: impl Into<String>,
        outbound: mpsc::Sender<Req>,
        inbound: InboundStream<Resp>,
    ) -> Self {
        Self {
            address: address.into(),
            outbound: Mutex::new(Some(outbound)),
            inbound: tokio::sync::Mutex::new(Some(inbound)),
            channel: Mutex::new(None),
            closed: CancellationToken::new(),
        }
    }

    fn with_channel(self, channel: Channel) -> Self {
        *lock(&self.channel) = Some(channel);
        self
    }

    /// Queue a request for the wire.
    pub async fn send(&self, request: Req) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(AdscError::Closed);
        }
        // Clone the sender so the lock is not held while waiting for capacity
        let sender = lock(&self.outbound).clone().ok_or(AdscError::Closed)?;
        let type_url = request.type_url().to_string();

        sender
            .send(request)
            .await
            .map_err(|_| AdscError::send(type_url, "stream is no longer accepting requests"))
    }

    /// Wait for the next message; only the session's receive loop calls this.
    pub async fn receive(&self) -> Result<Resp> {
        let mut inbound = self.inbound.lock().await;
        let stream = inbound.as_mut().ok_or(AdscError::Closed)?;

        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(AdscError::Closed),
            next = stream.next() => match next {
                Some(Ok(message)) => Ok(message),
                Some(Err(status)) => Err(status.into()),
                None => Err(AdscError::recv("stream closed by control plane")),
            },
        }
    }

    /// Half-close the send side and release the connection. Safe to call
    /// repeatedly and from any task.
    pub fn close(&self) {
        let first = !self.closed.is_cancelled();
        self.closed.cancel();
        lock(&self.outbound).take();
        lock(&self.channel).take();

        // The receive loop drops the inbound half itself if it is mid-read
        if let Ok(mut inbound) = self.inbound.try_lock() {
            inbound.take();
        }

        if first {
            debug!(address = %self.address, "ADS transport closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

impl AdsTransport<DiscoveryRequest, DiscoveryResponse> {
    /// Dial and open a `StreamAggregatedResources` stream. `initial` requests
    /// are queued before the stream opens so servers that hold response
    /// headers until the first request do not stall the handshake.
    pub async fn open_sotw(config: &AdscConfig, initial: Vec<DiscoveryRequest>) -> Result<Self> {
        let channel = dial(config).await?;
        let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER.max(initial.len()));
        enqueue(&tx, initial, &config.address)?;

        let mut client = AggregatedDiscoveryServiceClient::new(channel.clone())
            .max_decoding_message_size(MAX_MESSAGE_SIZE)
            .max_encoding_message_size(MAX_MESSAGE_SIZE);
        let response = client
            .stream_aggregated_resources(ReceiverStream::new(rx))
            .await
            .map_err(|status| stream_open_error(&config.address, status))?;

        info!(address = %config.address, "Opened state-of-the-world ADS stream");
        let inbound = response.into_inner().boxed();
        let transport = Self::from_parts(config.address.clone(), tx, inbound);
        Ok(transport.with_channel(channel))
    }
}

impl AdsTransport<DeltaDiscoveryRequest, DeltaDiscoveryResponse> {
    /// Dial and open a `DeltaAggregatedResources` stream.
    pub async fn open_delta(
        config: &AdscConfig,
        initial: Vec<DeltaDiscoveryRequest>,
    ) -> Result<Self> {
        let channel = dial(config).await?;
        let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER.max(initial.len()));
        enqueue(&tx, initial, &config.address)?;

        let mut client = AggregatedDiscoveryServiceClient::new(channel.clone())
            .max_decoding_message_size(MAX_MESSAGE_SIZE)
            .max_encoding_message_size(MAX_MESSAGE_SIZE);
        let response = client
            .delta_aggregated_resources(ReceiverStream::new(rx))
            .await
            .map_err(|status| stream_open_error(&config.address, status))?;

        info!(address = %config.address, "Opened delta ADS stream");
        let inbound = response.into_inner().boxed();
        let transport = Self::from_parts(config.address.clone(), tx, inbound);
        Ok(transport.with_channel(channel))
    }
}

/// Establish the HTTP/2 connection to the control plane
pub async fn dial(config: &AdscConfig) -> Result<Channel> {
    let address = config.address.clone();
    let mut endpoint = Endpoint::from_shared(address.clone())
        .map_err(|e| AdscError::dial_with_source(&address, "invalid address", Box::new(e)))?
        .connect_timeout(config.connect_timeout())
        .http2_keep_alive_interval(Duration::from_secs(30))
        .tcp_nodelay(true);

    if let Some(tls) = &config.tls {
        endpoint = endpoint.tls_config(tls.to_tonic()?).map_err(|e| {
            AdscError::dial_with_source(&address, "invalid TLS configuration", Box::new(e))
        })?;
    }

    debug!(address = %address, "Dialing control plane");
    endpoint
        .connect()
        .await
        .map_err(|e| AdscError::dial_with_source(&address, "connection failed", Box::new(e)))
}

fn enqueue<Req: TypedRequest>(
    tx: &mpsc::Sender<Req>,
    requests: Vec<Req>,
    address: &str,
) -> Result<()> {
    for request in requests {
        let type_url = request.type_url().to_string();
        tx.try_send(request).map_err(|_| {
            AdscError::dial(
                address,
                format!("could not queue initial {} request", type_url),
            )
        })?;
    }
    Ok(())
}

fn stream_open_error(address: &str, status: tonic::Status) -> AdscError {
    AdscError::dial(
        address,
        format!("failed to open ADS stream: {}", status.message()),
    )
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
