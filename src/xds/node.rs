//! Synthetic proxy identity sent with the first request of every stream.

use std::fmt;
use std::str::FromStr;

use envoy_types::pb::envoy::config::core::v3::{node::UserAgentVersionType, Node};
use envoy_types::pb::google::protobuf::{value::Kind, ListValue, Struct, Value};
use serde::{Deserialize, Serialize};

use crate::config::IdentityConfig;
use crate::errors::{AdscError, Result};

/// Proxy role encoded as the first segment of the node id
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    #[default]
    Sidecar,
    Router,
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeType::Sidecar => f.write_str("sidecar"),
            NodeType::Router => f.write_str("router"),
        }
    }
}

impl FromStr for NodeType {
    type Err = AdscError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "sidecar" => Ok(NodeType::Sidecar),
            "router" => Ok(NodeType::Router),
            other => Err(AdscError::validation_field(
                format!(
                    "Unknown node type '{}', expected 'sidecar' or 'router'",
                    other
                ),
                "node_type",
            )),
        }
    }
}

/// Identity fields plus free-form metadata for one emulated proxy.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeIdentity {
    pub node_type: NodeType,
    pub ip: String,
    pub workload: String,
    pub namespace: String,
    metadata: serde_json::Map<String, serde_json::Value>,
}

impl NodeIdentity {
    pub fn new(
        node_type: NodeType,
        ip: impl Into<String>,
        workload: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            node_type,
            ip: ip.into(),
            workload: workload.into(),
            namespace: namespace.into(),
            metadata: serde_json::Map::new(),
        }
    }

    pub fn from_config(config: &IdentityConfig) -> Self {
        Self {
            node_type: config.node_type,
            ip: config.ip.clone(),
            workload: config.workload.clone(),
            namespace: config.namespace.clone(),
            metadata: config.metadata.clone(),
        }
    }

    /// Replace the metadata with any serializable map-like value.
    ///
    /// Fails with `InvalidMetadata` if the value cannot be serialized or is not
    /// a JSON object.
    pub fn with_metadata<T: Serialize + ?Sized>(mut self, metadata: &T) -> Result<Self> {
        match serde_json::to_value(metadata)? {
            serde_json::Value::Object(map) => {
                self.metadata = map;
                Ok(self)
            }
            other => Err(AdscError::invalid_metadata(format!(
                "metadata must be an object, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Add or overwrite a single metadata entry
    pub fn insert_metadata<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.metadata.insert(key.to_string(), value);
        Ok(())
    }

    pub fn metadata(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.metadata
    }

    /// `role~ip~workload.namespace~namespace.svc.cluster.local`
    pub fn node_id(&self) -> String {
        format!(
            "{}~{}~{}.{}~{}.svc.cluster.local",
            self.node_type, self.ip, self.workload, self.namespace, self.namespace
        )
    }

    /// Build the protobuf node sent on the wire
    pub fn build(&self) -> Result<Node> {
        Ok(Node {
            id: self.node_id(),
            metadata: Some(json_map_to_struct(&self.metadata)?),
            user_agent_name: crate::APP_NAME.to_string(),
            user_agent_version_type: Some(UserAgentVersionType::UserAgentVersion(
                crate::VERSION.to_string(),
            )),
            ..Default::default()
        })
    }
}

fn json_map_to_struct(map: &serde_json::Map<String, serde_json::Value>) -> Result<Struct> {
    let fields = map
        .iter()
        .map(|(key, value)| Ok((key.clone(), json_to_value(key, value)?)))
        .collect::<Result<_>>()?;
    Ok(Struct { fields })
}

fn json_to_value(key: &str, value: &serde_json::Value) -> Result<Value> {
    let kind = match value {
        serde_json::Value::Null => Kind::NullValue(0),
        serde_json::Value::Bool(b) => Kind::BoolValue(*b),
        serde_json::Value::Number(n) => {
            let number = n.as_f64().filter(|f| f.is_finite()).ok_or_else(|| {
                AdscError::invalid_metadata(format!(
                    "metadata key '{}' holds a number that is not a finite double",
                    key
                ))
            })?;
            Kind::NumberValue(number)
        }
        serde_json::Value::String(s) => Kind::StringValue(s.clone()),
        serde_json::Value::Array(items) => Kind::ListValue(ListValue {
            values: items
                .iter()
                .map(|item| json_to_value(key, item))
                .collect::<Result<_>>()?,
        }),
        serde_json::Value::Object(map) => Kind::StructValue(json_map_to_struct(map)?),
    };
    Ok(Value { kind: Some(kind) })
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
