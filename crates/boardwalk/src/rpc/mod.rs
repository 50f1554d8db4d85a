pub mod codec;
pub mod queue;

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::ui::ConnectorContext;

pub use codec::{ArgumentCodec, JsonArgumentCodec};
pub use queue::ClientMethodInvocation;

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

type Handler = Box<dyn FnMut(&mut ConnectorContext<'_>, &[Value]) -> Result<(), HandlerError> + Send>;

/// Failure applying one inbound invocation, carrying the interface and method
/// names for diagnostics. Propagated to the caller and routed through the
/// connector-aware error handler chain; never silently swallowed.
#[derive(Debug, thiserror::Error)]
pub enum RpcInvocationError {
    #[error("rpc interface {interface} has no method {method}")]
    UnknownMethod { interface: String, method: String },
    #[error("argument {index} of {interface}.{method} did not decode: {source}")]
    ArgumentMismatch {
        interface: String,
        method: String,
        index: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("invocation of {interface}.{method} failed: {source}")]
    HandlerFailed {
        interface: String,
        method: String,
        #[source]
        source: HandlerError,
    },
}

impl RpcInvocationError {
    pub fn interface(&self) -> &str {
        match self {
            RpcInvocationError::UnknownMethod { interface, .. }
            | RpcInvocationError::ArgumentMismatch { interface, .. }
            | RpcInvocationError::HandlerFailed { interface, .. } => interface,
        }
    }

    pub fn method(&self) -> &str {
        match self {
            RpcInvocationError::UnknownMethod { method, .. }
            | RpcInvocationError::ArgumentMismatch { method, .. }
            | RpcInvocationError::HandlerFailed { method, .. } => method,
        }
    }
}

/// Inbound dispatch table for one RPC interface on one connector: method
/// name → typed handler closure, built at registration time. This is the
/// server-side RPC manager; one table per (connector, interface), and
/// re-registration replaces the previous table silently.
pub struct ServerRpcTable {
    interface: String,
    methods: HashMap<String, Handler>,
}

impl ServerRpcTable {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            methods: HashMap::new(),
        }
    }

    pub fn method<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: FnMut(&mut ConnectorContext<'_>, &[Value]) -> Result<(), HandlerError> + Send + 'static,
    {
        self.methods.insert(name.into(), Box::new(handler));
        self
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn method_names(&self) -> Vec<&str> {
        self.methods.keys().map(String::as_str).collect()
    }

    /// Apply one inbound invocation record to the bound handlers. The
    /// supplied argument array is matched positionally by each handler's own
    /// `decode_arg` calls.
    pub fn invoke(
        &mut self,
        method: &str,
        args: &[Value],
        ctx: &mut ConnectorContext<'_>,
    ) -> Result<(), RpcInvocationError> {
        let Some(handler) = self.methods.get_mut(method) else {
            return Err(RpcInvocationError::UnknownMethod {
                interface: self.interface.clone(),
                method: method.to_string(),
            });
        };
        handler(ctx, args).map_err(|source| RpcInvocationError::HandlerFailed {
            interface: self.interface.clone(),
            method: method.to_string(),
            source,
        })
    }
}

/// Decode the positional argument at `index`. A missing slot decodes as JSON
/// `null`, so a handler that allows trailing omission takes an `Option`.
pub fn decode_arg<T: DeserializeOwned>(
    interface: &str,
    method: &str,
    args: &[Value],
    index: usize,
) -> Result<T, RpcInvocationError> {
    let value = args.get(index).cloned().unwrap_or(Value::Null);
    serde_json::from_value(value).map_err(|source| RpcInvocationError::ArgumentMismatch {
        interface: interface.to_string(),
        method: method.to_string(),
        index,
        source,
    })
}
