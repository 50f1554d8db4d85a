use serde_json::Value;

use crate::connector::ConnectorId;

/// One queued server→client method call. Created when server code invokes a
/// client RPC interface, held on the target connector's queue, and drained
/// exactly once per response cycle.
///
/// Invocations order by `seq` alone; sequence numbers come from the owning
/// tracker's counter, so ties cannot occur within one UI.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientMethodInvocation {
    pub connector: ConnectorId,
    pub interface: String,
    pub method: String,
    pub args: Vec<Value>,
    pub seq: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn invocation(connector: u64, method: &str, seq: u64) -> ClientMethodInvocation {
        ClientMethodInvocation {
            connector: ConnectorId::from(connector.to_string().as_str()),
            interface: "demo".into(),
            method: method.into(),
            args: vec![json!(seq)],
            seq,
        }
    }

    #[test]
    fn sorting_by_seq_restores_enqueue_order_across_connectors() {
        let mut invocations = vec![
            invocation(2, "b", 1),
            invocation(1, "c", 2),
            invocation(1, "a", 0),
        ];
        invocations.sort_by_key(|i| i.seq);
        let methods: Vec<&str> = invocations.iter().map(|i| i.method.as_str()).collect();
        assert_eq!(methods, vec!["a", "b", "c"]);
    }
}
