//! Per-type subscription and acknowledgment state.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use super::type_url::ResourceType;

/// Subscription record for one resource type
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct WatchState {
    /// Subscribed names; empty means wildcard for CDS and LDS
    pub resource_names: BTreeSet<String>,
    pub last_nonce: String,
    pub last_version: String,
}

impl WatchState {
    /// Names in the order they go on the wire
    pub fn names(&self) -> Vec<String> {
        self.resource_names.iter().cloned().collect()
    }
}

/// At most one `WatchState` per resource type.
#[derive(Clone, Debug, Default)]
pub struct WatchTable {
    watches: BTreeMap<ResourceType, WatchState>,
}

impl WatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `names` differs from the current subscription as a set.
    /// A type with no watch compares as an empty subscription.
    pub fn desired_names_changed(&self, resource_type: ResourceType, names: &[String]) -> bool {
        let desired: BTreeSet<&str> = names.iter().map(String::as_str).collect();
        match self.watches.get(&resource_type) {
            Some(state) => {
                desired.len() != state.resource_names.len()
                    || desired.iter().any(|name| !state.resource_names.contains(*name))
            }
            None => !desired.is_empty(),
        }
    }

    /// Replace the subscribed names, creating the watch if needed
    pub fn update(&mut self, resource_type: ResourceType, names: &[String]) {
        let state = self.watches.entry(resource_type).or_default();
        state.resource_names = names.iter().cloned().collect();
    }

    /// Add names to a subscription, returning the ones that were not there yet
    pub fn subscribe(&mut self, resource_type: ResourceType, names: &[String]) -> Vec<String> {
        let state = self.watches.entry(resource_type).or_default();
        let mut added: Vec<String> = names
            .iter()
            .filter(|name| state.resource_names.insert((*name).clone()))
            .cloned()
            .collect();
        added.sort();
        added.dedup();
        added
    }

    /// Drop names from a subscription, returning the ones that were subscribed
    pub fn unsubscribe(&mut self, resource_type: ResourceType, names: &[String]) -> Vec<String> {
        let Some(state) = self.watches.get_mut(&resource_type) else {
            return Vec::new();
        };
        let mut removed: Vec<String> = names
            .iter()
            .filter(|name| state.resource_names.remove(name.as_str()))
            .cloned()
            .collect();
        removed.sort();
        removed
    }

    /// Record the nonce and version of a processed response.
    pub fn record_ack(&mut self, resource_type: ResourceType, nonce: &str, version: &str) {
        let state = self.watches.entry(resource_type).or_default();
        state.last_nonce = nonce.to_string();
        state.last_version = version.to_string();
    }

    pub fn get(&self, resource_type: ResourceType) -> Option<&WatchState> {
        self.watches.get(&resource_type)
    }

    /// Sorted subscription list for a type, empty if unwatched
    pub fn names(&self, resource_type: ResourceType) -> Vec<String> {
        self.watches
            .get(&resource_type)
            .map(WatchState::names)
            .unwrap_or_default()
    }

    pub fn clear(&mut self) {
        self.watches.clear();
    }

    pub fn snapshot(&self) -> BTreeMap<ResourceType, WatchState> {
        self.watches.clone()
    }
}
