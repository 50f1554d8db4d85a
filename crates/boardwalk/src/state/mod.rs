pub mod diff;

use std::any::Any;

use serde::Serialize;
use serde_json::Value;
use tracing::warn;

pub use diff::diff_value;

/// Plain data snapshot describing a connector's client-visible configuration.
/// One state type per connector type; the connector's own code is the only
/// writer.
pub trait ConnectorState: Serialize + Default + Send + 'static {
    /// Whether the wire representation may be diffed against the previously
    /// sent baseline. Dynamically-shaped states opt out and are retransmitted
    /// in full every time.
    const DIFFABLE: bool = true;
}

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("state could not be encoded: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// Object-safe view over a connector's state, erasing the concrete type so
/// the tracker and the response pipeline can hold heterogeneous connectors.
pub trait SharedState: Send {
    fn encode(&self) -> Result<Value, EncodeError>;

    /// Encoding of the state type's default instance, used as the reference
    /// when no baseline has been sent yet. Never transmitted.
    fn zero_value(&self) -> Result<Value, EncodeError>;

    fn diffable(&self) -> bool;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: ConnectorState> SharedState for T {
    fn encode(&self) -> Result<Value, EncodeError> {
        serde_json::to_value(self).map_err(EncodeError::Serialize)
    }

    fn zero_value(&self) -> Result<Value, EncodeError> {
        serde_json::to_value(T::default()).map_err(EncodeError::Serialize)
    }

    fn diffable(&self) -> bool {
        T::DIFFABLE
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

pub fn boxed_state<T: ConnectorState>(state: T) -> Box<dyn SharedState> {
    Box::new(state)
}

/// Result of one encoding pass: the payload to transmit and, for diffable
/// states, the full live encoding to store as the next baseline.
#[derive(Debug)]
pub struct StateEncoding {
    pub payload: Value,
    pub new_baseline: Option<Value>,
}

impl StateEncoding {
    pub fn is_empty_diff(&self) -> bool {
        matches!(&self.payload, Value::Object(map) if map.is_empty())
    }
}

/// Encode `live` relative to `baseline`. With no baseline the state type's
/// zero value serves as the reference; if that reference cannot be produced
/// the full live encoding is sent for this pass only.
pub fn encode_state(
    live: &Value,
    diffable: bool,
    zero_value: impl FnOnce() -> Result<Value, EncodeError>,
    baseline: Option<&Value>,
) -> StateEncoding {
    if !diffable {
        return StateEncoding {
            payload: live.clone(),
            new_baseline: None,
        };
    }
    let reference = match baseline {
        Some(value) => value.clone(),
        None => match zero_value() {
            Ok(value) => value,
            Err(err) => {
                warn!(
                    target = "boardwalk::state",
                    error = %err,
                    "zero-value reference unavailable, sending full state"
                );
                return StateEncoding {
                    payload: live.clone(),
                    new_baseline: Some(live.clone()),
                };
            }
        },
    };
    StateEncoding {
        payload: diff_value(&reference, live),
        new_baseline: Some(live.clone()),
    }
}
