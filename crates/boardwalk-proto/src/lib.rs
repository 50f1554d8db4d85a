//! Shared wire-payload definitions for the boardwalk synchronization protocol.
//! Keeping these in a dedicated crate allows clients and tooling to decode
//! batches without pulling in the server runtime.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

pub const PROTOCOL_VERSION: u8 = 1;

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("invalid batch payload: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("batch payload could not be encoded: {0}")]
    Encode(#[source] serde_json::Error),
}

/// One server→client state entry. Either the client copy is already current
/// (`cached`) or a state-diff body follows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEntry {
    pub connector: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub cached: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// One method invocation record, used in both directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcEntry {
    pub connector: String,
    pub interface: String,
    pub method: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

/// Server→client response batch: per-connector state changes plus the
/// globally-ordered outbound invocation list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundBatch {
    /// Server-side sync counter, incremented once per written response.
    pub sequence: u64,
    #[serde(default)]
    pub state: Vec<StateEntry>,
    #[serde(default)]
    pub rpc: Vec<RpcEntry>,
}

/// Client→server request batch: legacy variable changes keyed by owner wire
/// id, plus inbound invocation records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InboundBatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csrf_token: Option<String>,
    #[serde(default)]
    pub variables: BTreeMap<String, BTreeMap<String, Value>>,
    #[serde(default)]
    pub rpc: Vec<RpcEntry>,
}

pub fn encode_outbound(batch: &OutboundBatch) -> Result<Vec<u8>, BatchError> {
    serde_json::to_vec(batch).map_err(BatchError::Encode)
}

pub fn decode_inbound(bytes: &[u8]) -> Result<InboundBatch, BatchError> {
    serde_json::from_slice(bytes).map_err(BatchError::Decode)
}

/// Wire reference to another connector. State fields that point at a
/// connector carry its id string rather than any nested body.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectorRef(pub String);

impl Serialize for ConnectorRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ConnectorRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(ConnectorRef(String::deserialize(deserializer)?))
    }
}

/// Map with non-string keys, encoded as two parallel lists so the wire shape
/// stays valid JSON: `[[k0, k1, ...], [v0, v1, ...]]`. String-keyed maps
/// encode as plain objects and never need this.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PairedMap<K, V>(pub Vec<(K, V)>);

impl<K, V> PairedMap<K, V> {
    pub fn new() -> Self {
        PairedMap(Vec::new())
    }

    pub fn insert(&mut self, key: K, value: V) {
        self.0.push((key, value));
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Serialize, V: Serialize> Serialize for PairedMap<K, V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let keys: Vec<&K> = self.0.iter().map(|(k, _)| k).collect();
        let values: Vec<&V> = self.0.iter().map(|(_, v)| v).collect();
        (keys, values).serialize(serializer)
    }
}

impl<'de, K, V> Deserialize<'de> for PairedMap<K, V>
where
    K: DeserializeOwned,
    V: DeserializeOwned,
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (keys, values): (Vec<K>, Vec<V>) = Deserialize::deserialize(deserializer)?;
        if keys.len() != values.len() {
            return Err(serde::de::Error::custom(
                "paired map key and value lists differ in length",
            ));
        }
        Ok(PairedMap(keys.into_iter().zip(values).collect()))
    }
}
