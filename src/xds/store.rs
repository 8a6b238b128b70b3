//! Last-known decoded resources, kept for sessions that asked for them.

use std::collections::{BTreeMap, BTreeSet};

use super::decode::DecodedResource;
use super::type_url::ResourceType;

type ResourceMap = BTreeMap<ResourceType, BTreeMap<String, DecodedResource>>;

/// Decoded resources by type and name
#[derive(Clone, Debug, Default)]
pub struct ResponseStore {
    resources: ResourceMap,
}

impl ResponseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// State-of-the-world update: everything previously stored for the type
    /// is replaced by `resources`.
    pub fn replace_all(&mut self, resource_type: ResourceType, resources: Vec<DecodedResource>) {
        let entries = resources
            .into_iter()
            .map(|resource| (resource.name().to_string(), resource))
            .collect();
        self.resources.insert(resource_type, entries);
    }

    /// Incremental update of a single resource
    pub fn upsert(&mut self, resource: DecodedResource) {
        self.resources
            .entry(resource.resource_type())
            .or_default()
            .insert(resource.name().to_string(), resource);
    }

    pub fn remove(&mut self, resource_type: ResourceType, name: &str) -> Option<DecodedResource> {
        self.resources
            .get_mut(&resource_type)
            .and_then(|entries| entries.remove(name))
    }

    pub fn snapshot(&self) -> ResponseSnapshot {
        ResponseSnapshot {
            resources: self.resources.clone(),
        }
    }
}

/// Point-in-time copy of a session's stored responses
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResponseSnapshot {
    resources: ResourceMap,
}

impl ResponseSnapshot {
    pub fn get(&self, resource_type: ResourceType) -> Option<&BTreeMap<String, DecodedResource>> {
        self.resources.get(&resource_type)
    }

    pub fn resource(&self, resource_type: ResourceType, name: &str) -> Option<&DecodedResource> {
        self.get(resource_type).and_then(|entries| entries.get(name))
    }

    /// Names stored for a type, sorted
    pub fn names(&self, resource_type: ResourceType) -> Vec<String> {
        self.get(resource_type)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn resource_count(&self) -> usize {
        self.resources.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.resource_count() == 0
    }

    /// Compare with another session's snapshot. `added` holds names only
    /// `other` has, `removed` names only `self` has.
    pub fn diff(&self, other: &ResponseSnapshot) -> SnapshotDiff {
        let empty = BTreeMap::new();
        let types: BTreeSet<ResourceType> = self
            .resources
            .keys()
            .chain(other.resources.keys())
            .copied()
            .collect();

        let mut per_type = BTreeMap::new();
        for resource_type in types {
            let ours = self.resources.get(&resource_type).unwrap_or(&empty);
            let theirs = other.resources.get(&resource_type).unwrap_or(&empty);

            let mut diff = TypeDiff::default();
            for (name, resource) in theirs {
                match ours.get(name) {
                    None => diff.added.push(name.clone()),
                    Some(existing) if existing != resource => diff.changed.push(name.clone()),
                    Some(_) => {}
                }
            }
            diff.removed = ours
                .keys()
                .filter(|name| !theirs.contains_key(*name))
                .cloned()
                .collect();

            if !diff.is_empty() {
                per_type.insert(resource_type, diff);
            }
        }

        SnapshotDiff { per_type }
    }
}

/// Differences for one resource type
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TypeDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
}

impl TypeDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

/// Result of [`ResponseSnapshot::diff`]; types without differences are omitted
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SnapshotDiff {
    pub per_type: BTreeMap<ResourceType, TypeDiff>,
}

impl SnapshotDiff {
    pub fn is_empty(&self) -> bool {
        self.per_type.is_empty()
    }
}
