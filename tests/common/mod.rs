//! Common test utilities for all integration tests.
//!
//! Provides an in-process ADS server that records every request it receives
//! and lets the test push responses onto the most recent stream.

#![allow(dead_code)]
#![allow(clippy::duplicate_mod)]

pub mod resources;

use std::pin::Pin;
use std::time::Duration;

use envoy_types::pb::envoy::service::discovery::v3::{
    aggregated_discovery_service_server::{
        AggregatedDiscoveryService, AggregatedDiscoveryServiceServer,
    },
    DeltaDiscoveryRequest, DeltaDiscoveryResponse, DiscoveryRequest, DiscoveryResponse,
};
use flowplane_adsc::{AdsSession, AdscConfig, Event, ResourceType};
use futures::Stream;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream};
use tokio_util::sync::CancellationToken;
use tonic::{transport::Server, Request, Response, Status, Streaming};

pub const WAIT: Duration = Duration::from_secs(5);

type ResponseTx<T> = mpsc::Sender<Result<T, Status>>;
type ResponseStream<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send>>;

struct ScriptedAds {
    sotw_requests: mpsc::UnboundedSender<DiscoveryRequest>,
    delta_requests: mpsc::UnboundedSender<DeltaDiscoveryRequest>,
    sotw_streams: mpsc::UnboundedSender<ResponseTx<DiscoveryResponse>>,
    delta_streams: mpsc::UnboundedSender<ResponseTx<DeltaDiscoveryResponse>>,
}

fn forward<T: Send + 'static>(mut inbound: Streaming<T>, sink: mpsc::UnboundedSender<T>) {
    tokio::spawn(async move {
        while let Ok(Some(message)) = inbound.message().await {
            if sink.send(message).is_err() {
                break;
            }
        }
    });
}

#[tonic::async_trait]
impl AggregatedDiscoveryService for ScriptedAds {
    type StreamAggregatedResourcesStream = ResponseStream<DiscoveryResponse>;
    type DeltaAggregatedResourcesStream = ResponseStream<DeltaDiscoveryResponse>;

    async fn stream_aggregated_resources(
        &self,
        request: Request<Streaming<DiscoveryRequest>>,
    ) -> Result<Response<Self::StreamAggregatedResourcesStream>, Status> {
        forward(request.into_inner(), self.sotw_requests.clone());
        let (tx, rx) = mpsc::channel(64);
        let _ = self.sotw_streams.send(tx);
        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }

    async fn delta_aggregated_resources(
        &self,
        request: Request<Streaming<DeltaDiscoveryRequest>>,
    ) -> Result<Response<Self::DeltaAggregatedResourcesStream>, Status> {
        forward(request.into_inner(), self.delta_requests.clone());
        let (tx, rx) = mpsc::channel(64);
        let _ = self.delta_streams.send(tx);
        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }
}

/// Handle to a running scripted ADS server
pub struct MockAds {
    pub address: String,
    sotw_requests: mpsc::UnboundedReceiver<DiscoveryRequest>,
    delta_requests: mpsc::UnboundedReceiver<DeltaDiscoveryRequest>,
    sotw_streams: mpsc::UnboundedReceiver<ResponseTx<DiscoveryResponse>>,
    delta_streams: mpsc::UnboundedReceiver<ResponseTx<DeltaDiscoveryResponse>>,
    sotw: Option<ResponseTx<DiscoveryResponse>>,
    delta: Option<ResponseTx<DeltaDiscoveryResponse>>,
    shutdown: CancellationToken,
}

impl MockAds {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock ADS server");
        let address = format!("http://{}", listener.local_addr().expect("local addr"));

        let (sotw_req_tx, sotw_requests) = mpsc::unbounded_channel();
        let (delta_req_tx, delta_requests) = mpsc::unbounded_channel();
        let (sotw_stream_tx, sotw_streams) = mpsc::unbounded_channel();
        let (delta_stream_tx, delta_streams) = mpsc::unbounded_channel();
        let service = ScriptedAds {
            sotw_requests: sotw_req_tx,
            delta_requests: delta_req_tx,
            sotw_streams: sotw_stream_tx,
            delta_streams: delta_stream_tx,
        };

        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        let incoming = TcpListenerStream::new(listener);
        tokio::spawn(async move {
            let _ = Server::builder()
                .add_service(AggregatedDiscoveryServiceServer::new(service))
                .serve_with_incoming_shutdown(incoming, signal.cancelled_owned())
                .await;
        });

        Self {
            address,
            sotw_requests,
            delta_requests,
            sotw_streams,
            delta_streams,
            sotw: None,
            delta: None,
            shutdown,
        }
    }

    /// Client configuration pointing at this server
    pub fn config(&self) -> AdscConfig {
        AdscConfig {
            address: self.address.clone(),
            store_responses: true,
            connect_timeout_seconds: 5,
            ..Default::default()
        }
    }

    pub async fn next_sotw_request(&mut self) -> DiscoveryRequest {
        tokio::time::timeout(WAIT, self.sotw_requests.recv())
            .await
            .expect("timed out waiting for SotW request")
            .expect("request channel closed")
    }

    pub async fn next_delta_request(&mut self) -> DeltaDiscoveryRequest {
        tokio::time::timeout(WAIT, self.delta_requests.recv())
            .await
            .expect("timed out waiting for delta request")
            .expect("request channel closed")
    }

    /// Fail if a SotW request arrives within `window`
    pub async fn expect_no_sotw_request(&mut self, window: Duration) {
        let next = tokio::time::timeout(window, self.sotw_requests.recv()).await;
        if let Ok(Some(request)) = next {
            panic!(
                "unexpected request: {:?} {:?}",
                request.type_url, request.resource_names
            );
        }
    }

    async fn sotw_stream(&mut self) -> &ResponseTx<DiscoveryResponse> {
        if self.sotw.is_none() {
            let tx = tokio::time::timeout(WAIT, self.sotw_streams.recv())
                .await
                .expect("timed out waiting for SotW stream")
                .expect("stream channel closed");
            self.sotw = Some(tx);
        }
        self.sotw.as_ref().expect("stream registered")
    }

    async fn delta_stream(&mut self) -> &ResponseTx<DeltaDiscoveryResponse> {
        if self.delta.is_none() {
            let tx = tokio::time::timeout(WAIT, self.delta_streams.recv())
                .await
                .expect("timed out waiting for delta stream")
                .expect("stream channel closed");
            self.delta = Some(tx);
        }
        self.delta.as_ref().expect("stream registered")
    }

    pub async fn push(&mut self, response: DiscoveryResponse) {
        self.sotw_stream()
            .await
            .send(Ok(response))
            .await
            .expect("client stream gone");
    }

    pub async fn push_delta(&mut self, response: DeltaDiscoveryResponse) {
        self.delta_stream()
            .await
            .send(Ok(response))
            .await
            .expect("client stream gone");
    }

    /// Terminate the current SotW stream with an error status
    pub async fn fail_sotw(&mut self, status: Status) {
        self.sotw_stream()
            .await
            .send(Err(status))
            .await
            .expect("client stream gone");
        self.sotw = None;
    }
}

/// Wait for an update of `kind`, failing the test on timeout or close
pub async fn expect_update<S: AdsSession + ?Sized>(session: &S, kind: ResourceType) {
    session
        .wait(Some(Event::Update(kind)), WAIT)
        .await
        .expect("update event");
}

impl Drop for MockAds {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
