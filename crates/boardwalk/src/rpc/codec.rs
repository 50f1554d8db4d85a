use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::connector::ConnectorId;
use crate::rpc::queue::ClientMethodInvocation;
use crate::tracker::ConnectorTracker;

/// Encoding applied uniformly to every invocation argument crossing a
/// persistence boundary (session passivation, replication). One codec covers
/// all argument types; there is no per-type special-casing.
pub trait ArgumentCodec: Send + Sync {
    fn encode(&self, value: &Value) -> Result<String, CodecError>;
    fn decode(&self, raw: &str) -> Result<Value, CodecError>;
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("argument could not be encoded: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("argument could not be decoded: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Default codec: arguments round-trip through their JSON text form.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonArgumentCodec;

impl ArgumentCodec for JsonArgumentCodec {
    fn encode(&self, value: &Value) -> Result<String, CodecError> {
        serde_json::to_string(value).map_err(CodecError::Encode)
    }

    fn decode(&self, raw: &str) -> Result<Value, CodecError> {
        serde_json::from_str(raw).map_err(CodecError::Decode)
    }
}

/// Persistable form of one pending invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredInvocation {
    pub connector: String,
    pub interface: String,
    pub method: String,
    pub args: Vec<String>,
    pub seq: u64,
}

/// Drain the tracker's pending queues into persistable records, arguments
/// encoded through `codec`, ordered by sequence number.
pub fn persist_pending(
    tracker: &mut ConnectorTracker,
    codec: &dyn ArgumentCodec,
) -> Result<Vec<StoredInvocation>, CodecError> {
    let mut stored = Vec::new();
    for invocation in tracker.drain_all_pending() {
        let mut args = Vec::with_capacity(invocation.args.len());
        for arg in &invocation.args {
            args.push(codec.encode(arg)?);
        }
        stored.push(StoredInvocation {
            connector: invocation.connector.as_str().to_string(),
            interface: invocation.interface,
            method: invocation.method,
            args,
            seq: invocation.seq,
        });
    }
    Ok(stored)
}

/// Re-enqueue previously persisted invocations, preserving their original
/// sequence numbers so the global flush order survives passivation.
pub fn restore_pending(
    tracker: &mut ConnectorTracker,
    codec: &dyn ArgumentCodec,
    stored: Vec<StoredInvocation>,
) -> Result<(), CodecError> {
    let mut invocations = Vec::with_capacity(stored.len());
    for record in stored {
        let mut args = Vec::with_capacity(record.args.len());
        for raw in &record.args {
            args.push(codec.decode(raw)?);
        }
        invocations.push(ClientMethodInvocation {
            connector: ConnectorId::from(record.connector.as_str()),
            interface: record.interface,
            method: record.method,
            args,
            seq: record.seq,
        });
    }
    tracker.import_invocations(invocations);
    Ok(())
}
