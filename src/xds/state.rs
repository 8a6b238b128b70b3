use std::collections::BTreeMap;
use std::sync::Mutex;

use super::decode::DecodedResource;
use super::store::{ResponseSnapshot, ResponseStore};
use super::type_url::ResourceType;
use super::watch::{WatchState, WatchTable};

/// Mutable protocol state of one session.
#[derive(Debug, Default)]
pub struct SessionInner {
    pub watches: WatchTable,
    /// Present only when response storage was requested
    pub store: Option<ResponseStore>,
}

impl SessionInner {
    pub fn store_all(&mut self, resource_type: ResourceType, resources: Vec<DecodedResource>) {
        if let Some(store) = self.store.as_mut() {
            store.replace_all(resource_type, resources);
        }
    }

    pub fn store_one(&mut self, resource: DecodedResource) {
        if let Some(store) = self.store.as_mut() {
            store.upsert(resource);
        }
    }

    /// Remove a stored resource, returning it when storage is enabled
    pub fn forget(&mut self, resource_type: ResourceType, name: &str) -> Option<DecodedResource> {
        self.store.as_mut()?.remove(resource_type, name)
    }
}

/// Watch table and response store behind a single lock.
///
/// Callers copy what they need out of the closure passed to [`SessionState::with`];
/// the lock is never held across a send.
#[derive(Debug, Default)]
pub struct SessionState {
    inner: Mutex<SessionInner>,
}

impl SessionState {
    pub fn new(store_responses: bool) -> Self {
        Self {
            inner: Mutex::new(SessionInner {
                watches: WatchTable::new(),
                store: store_responses.then(ResponseStore::new),
            }),
        }
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut SessionInner) -> R) -> R {
        let mut guard = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }

    /// Stored responses; empty when storage is disabled
    pub fn responses(&self) -> ResponseSnapshot {
        self.with(|inner| {
            inner
                .store
                .as_ref()
                .map(ResponseStore::snapshot)
                .unwrap_or_default()
        })
    }

    pub fn watches(&self) -> BTreeMap<ResourceType, WatchState> {
        self.with(|inner| inner.watches.snapshot())
    }
}
