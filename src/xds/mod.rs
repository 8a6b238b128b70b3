//! Envoy ADS client
//!
//! Emulates a proxy talking to an xDS control plane over the Aggregated
//! Discovery Service:
//! - SotW (`StreamAggregatedResources`) via [`AdsClient`]
//! - Delta (`DeltaAggregatedResources`) via [`DeltaAdsClient`]
//!
//! Both start from a cluster subscription, follow listeners to routes,
//! secrets and extension configs, follow EDS clusters to endpoints, and ACK
//! every push. Callers observe progress through [`Event`]s.

pub mod decode;
pub mod delta;
pub mod dependencies;
pub mod events;
pub mod node;
pub mod session;
pub mod sotw;
pub mod state;
pub mod store;
pub mod transport;
pub mod type_url;
pub mod watch;

pub use decode::{DecodedResource, DecoderTable};
pub use delta::{DeltaAdsClient, DeltaTransport};
pub use dependencies::{
    endpoint_names, listener_dependencies, route_names, ListenerDependencies,
    EXCLUDED_SECRET_NAMES,
};
pub use events::{Event, EventChannel};
pub use node::{NodeIdentity, NodeType};
pub use session::{connect, AdsSession, SessionSettings};
pub use sotw::{AdsClient, SotwTransport};
pub use store::{ResponseSnapshot, ResponseStore, SnapshotDiff, TypeDiff};
pub use transport::{AdsTransport, MAX_MESSAGE_SIZE};
pub use type_url::ResourceType;
pub use watch::{WatchState, WatchTable};
