use std::collections::{HashMap, HashSet};

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::Value;
use tracing::{debug, trace};

use crate::connector::{Connector, ConnectorError, ConnectorId, ConnectorLogic, ConnectorRole};
use crate::rpc::queue::ClientMethodInvocation;
use crate::rpc::ServerRpcTable;
use crate::session::error::ErrorHandler;
use crate::state::SharedState;

const SECKEY_LEN: usize = 22;

/// Receiver side of a streamed upload registered under
/// (connector id, variable name). All hooks run with the session locked.
pub trait StreamVariable: Send {
    fn streaming_started(&mut self, name: &str) {
        let _ = name;
    }

    fn on_data(&mut self, chunk: &[u8]) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    fn streaming_finished(&mut self, name: &str) {
        let _ = name;
    }

    fn streaming_failed(&mut self, name: &str, error: &(dyn std::error::Error + 'static)) {
        let _ = (name, error);
    }

    /// A disposed variable is dropped from the registry after its upload
    /// completes.
    fn is_disposed(&self) -> bool {
        false
    }
}

pub(crate) struct StreamVariableSlot {
    pub(crate) seckey: String,
    pub(crate) variable: Box<dyn StreamVariable>,
}

/// Per-UI registry of connector id → connector plus the response-cycle
/// bookkeeping: the dirty set, the per-connector diff baselines, pending
/// outbound invocations, and stream-variable registrations.
///
/// Everything in here is part of the session's shared state and must only be
/// touched while holding the session lock.
#[derive(Default)]
pub struct ConnectorTracker {
    connectors: HashMap<ConnectorId, Connector>,
    logic: HashMap<ConnectorId, Box<dyn ConnectorLogic>>,
    rpc_tables: HashMap<ConnectorId, HashMap<String, ServerRpcTable>>,
    error_handlers: HashMap<ConnectorId, Box<dyn ErrorHandler>>,
    pending: HashMap<ConnectorId, Vec<ClientMethodInvocation>>,
    dirty: HashSet<ConnectorId>,
    diff_states: HashMap<ConnectorId, Value>,
    stream_variables: HashMap<ConnectorId, HashMap<String, StreamVariableSlot>>,
    next_connector_id: u64,
    next_sequence: u64,
}

impl ConnectorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connector and hand out its wire id. Ids come from an
    /// incrementing counter and are never reused while the connector lives.
    pub fn register(
        &mut self,
        role: ConnectorRole,
        type_name: &'static str,
        state: Box<dyn SharedState>,
        logic: Box<dyn ConnectorLogic>,
    ) -> ConnectorId {
        self.next_connector_id += 1;
        let id = ConnectorId::new(self.next_connector_id);
        self.connectors
            .insert(id.clone(), Connector::new(id.clone(), role, type_name, state));
        self.logic.insert(id.clone(), logic);
        trace!(target = "boardwalk::tracker", connector = %id, ?role, type_name, "connector registered");
        id
    }

    pub fn contains(&self, id: &ConnectorId) -> bool {
        self.connectors.contains_key(id)
    }

    pub fn connector(&self, id: &ConnectorId) -> Option<&Connector> {
        self.connectors.get(id)
    }

    pub fn connector_mut(&mut self, id: &ConnectorId) -> Option<&mut Connector> {
        self.connectors.get_mut(id)
    }

    pub fn connector_ids(&self) -> Vec<ConnectorId> {
        let mut ids: Vec<ConnectorId> = self.connectors.keys().cloned().collect();
        ids.sort_by_key(ConnectorId::order_key);
        ids
    }

    pub fn connector_count(&self) -> usize {
        self.connectors.len()
    }

    // --- dirty bookkeeping

    pub fn mark_dirty(&mut self, id: &ConnectorId) {
        if self.connectors.contains_key(id) {
            self.dirty.insert(id.clone());
        }
    }

    pub fn mark_clean(&mut self, id: &ConnectorId) {
        self.dirty.remove(id);
    }

    pub fn is_dirty(&self, id: &ConnectorId) -> bool {
        self.dirty.contains(id)
    }

    /// Snapshot, not a live view: processing one dirty connector may mark
    /// another, and the caller iterates without holding a borrow on the set.
    pub fn dirty_snapshot(&self) -> Vec<ConnectorId> {
        let mut ids: Vec<ConnectorId> = self.dirty.iter().cloned().collect();
        ids.sort_by_key(ConnectorId::order_key);
        ids
    }

    pub fn mark_all_connectors_dirty(&mut self) {
        let ids: Vec<ConnectorId> = self.connectors.keys().cloned().collect();
        self.dirty.extend(ids);
        debug!(target = "boardwalk::tracker", count = self.dirty.len(), "all connectors marked dirty");
    }

    /// Drop every diff baseline so the next encoding of each connector is a
    /// full, non-diff state.
    pub fn mark_all_client_sides_uninitialized(&mut self) {
        self.diff_states.clear();
    }

    // --- diff baselines

    pub fn diff_state(&self, id: &ConnectorId) -> Option<&Value> {
        self.diff_states.get(id)
    }

    pub fn has_diff_state(&self, id: &ConnectorId) -> bool {
        self.diff_states.contains_key(id)
    }

    pub fn set_diff_state(&mut self, id: &ConnectorId, state: Value) {
        self.diff_states.insert(id.clone(), state);
    }

    pub fn clear_diff_state(&mut self, id: &ConnectorId) {
        self.diff_states.remove(id);
    }

    // --- outbound invocation queue

    /// Issue the next invocation sequence number. The counter is owned per
    /// UI, so ordering is meaningful within one UI and independent across
    /// sessions.
    pub fn next_sequence(&mut self) -> u64 {
        let seq = self.next_sequence;
        self.next_sequence += 1;
        seq
    }

    pub fn enqueue_invocation(
        &mut self,
        id: &ConnectorId,
        interface: impl Into<String>,
        method: impl Into<String>,
        args: Vec<Value>,
    ) -> Result<u64, ConnectorError> {
        if !self.connectors.contains_key(id) {
            return Err(ConnectorError::NotFound(id.clone()));
        }
        let seq = self.next_sequence();
        let invocation = ClientMethodInvocation {
            connector: id.clone(),
            interface: interface.into(),
            method: method.into(),
            args,
            seq,
        };
        self.pending.entry(id.clone()).or_default().push(invocation);
        self.dirty.insert(id.clone());
        Ok(seq)
    }

    /// Drain this connector's queued invocations. The returned list is a
    /// one-time snapshot; a second call with nothing enqueued in between
    /// returns an empty list.
    pub fn retrieve_pending_rpc(&mut self, id: &ConnectorId) -> Vec<ClientMethodInvocation> {
        self.pending.remove(id).unwrap_or_default()
    }

    /// Drain every connector's queue, merged in ascending sequence order.
    pub fn drain_all_pending(&mut self) -> Vec<ClientMethodInvocation> {
        let mut all: Vec<ClientMethodInvocation> = self
            .pending
            .drain()
            .flat_map(|(_, invocations)| invocations)
            .collect();
        all.sort_by_key(|invocation| invocation.seq);
        all
    }

    pub fn has_pending_rpc(&self, id: &ConnectorId) -> bool {
        self.pending.get(id).is_some_and(|queue| !queue.is_empty())
    }

    /// Re-enqueue invocations with their sequence numbers intact, bumping the
    /// counter past the highest import so fresh enqueues stay ordered after
    /// them. Records for connectors no longer in the id table are dropped.
    pub fn import_invocations(&mut self, invocations: Vec<ClientMethodInvocation>) {
        for invocation in invocations {
            self.next_sequence = self.next_sequence.max(invocation.seq + 1);
            if !self.connectors.contains_key(&invocation.connector) {
                debug!(
                    target = "boardwalk::tracker",
                    connector = %invocation.connector,
                    "dropping imported invocation for unknown connector"
                );
                continue;
            }
            self.dirty.insert(invocation.connector.clone());
            self.pending
                .entry(invocation.connector.clone())
                .or_default()
                .push(invocation);
        }
    }

    // --- behavior and dispatch-table side tables

    pub(crate) fn take_logic(&mut self, id: &ConnectorId) -> Option<Box<dyn ConnectorLogic>> {
        self.logic.remove(id)
    }

    pub(crate) fn restore_logic(&mut self, id: &ConnectorId, logic: Box<dyn ConnectorLogic>) {
        self.logic.entry(id.clone()).or_insert(logic);
    }

    /// Bind a dispatch table for one RPC interface. Re-registration replaces
    /// the previous binding silently.
    pub fn register_rpc(&mut self, id: &ConnectorId, table: ServerRpcTable) -> Result<(), ConnectorError> {
        if !self.connectors.contains_key(id) {
            return Err(ConnectorError::NotFound(id.clone()));
        }
        self.rpc_tables
            .entry(id.clone())
            .or_default()
            .insert(table.interface().to_string(), table);
        Ok(())
    }

    pub(crate) fn take_rpc_table(
        &mut self,
        id: &ConnectorId,
        interface: &str,
    ) -> Option<ServerRpcTable> {
        self.rpc_tables.get_mut(id)?.remove(interface)
    }

    pub(crate) fn restore_rpc_table(&mut self, id: &ConnectorId, table: ServerRpcTable) {
        self.rpc_tables
            .entry(id.clone())
            .or_default()
            .entry(table.interface().to_string())
            .or_insert(table);
    }

    pub fn has_rpc_interface(&self, id: &ConnectorId, interface: &str) -> bool {
        self.rpc_tables
            .get(id)
            .is_some_and(|tables| tables.contains_key(interface))
    }

    pub fn set_error_handler(&mut self, id: &ConnectorId, handler: Box<dyn ErrorHandler>) {
        self.error_handlers.insert(id.clone(), handler);
    }

    pub(crate) fn take_error_handler(&mut self, id: &ConnectorId) -> Option<Box<dyn ErrorHandler>> {
        self.error_handlers.remove(id)
    }

    pub(crate) fn restore_error_handler(&mut self, id: &ConnectorId, handler: Box<dyn ErrorHandler>) {
        self.error_handlers.entry(id.clone()).or_insert(handler);
    }

    pub fn has_error_handler(&self, id: &ConnectorId) -> bool {
        self.error_handlers.contains_key(id)
    }

    // --- stream variables

    /// Register an upload target under (connector, name) and return its
    /// one-time security key. A same-named registration replaces the previous
    /// one and invalidates its key.
    pub fn add_stream_variable(
        &mut self,
        id: &ConnectorId,
        name: impl Into<String>,
        variable: Box<dyn StreamVariable>,
    ) -> Result<String, ConnectorError> {
        if !self.connectors.contains_key(id) {
            return Err(ConnectorError::NotFound(id.clone()));
        }
        let seckey = generate_seckey();
        self.stream_variables.entry(id.clone()).or_default().insert(
            name.into(),
            StreamVariableSlot {
                seckey: seckey.clone(),
                variable,
            },
        );
        Ok(seckey)
    }

    pub(crate) fn stream_variable_mut(
        &mut self,
        id: &ConnectorId,
        name: &str,
    ) -> Option<&mut StreamVariableSlot> {
        self.stream_variables.get_mut(id)?.get_mut(name)
    }

    pub fn remove_stream_variable(&mut self, id: &ConnectorId, name: &str) {
        if let Some(slots) = self.stream_variables.get_mut(id) {
            slots.remove(name);
            if slots.is_empty() {
                self.stream_variables.remove(id);
            }
        }
    }

    pub(crate) fn remove_stream_variables_for(&mut self, id: &ConnectorId) {
        self.stream_variables.remove(id);
    }

    pub fn has_stream_variable(&self, id: &ConnectorId, name: &str) -> bool {
        self.stream_variables
            .get(id)
            .is_some_and(|slots| slots.contains_key(name))
    }

    // --- cleanup

    /// Drop every connector no longer reachable from `root`, together with
    /// its side-table rows. Runs at the end of each response cycle.
    pub(crate) fn sweep_unreachable(&mut self, root: &ConnectorId) -> usize {
        let mut reachable = HashSet::new();
        let mut stack = vec![root.clone()];
        while let Some(id) = stack.pop() {
            if !reachable.insert(id.clone()) {
                continue;
            }
            if let Some(entry) = self.connectors.get(&id) {
                stack.extend(entry.children.iter().cloned());
                stack.extend(entry.extensions.iter().cloned());
            }
        }
        let doomed: Vec<ConnectorId> = self
            .connectors
            .keys()
            .filter(|id| !reachable.contains(*id))
            .cloned()
            .collect();
        for id in &doomed {
            self.connectors.remove(id);
            self.logic.remove(id);
            self.rpc_tables.remove(id);
            self.error_handlers.remove(id);
            self.pending.remove(id);
            self.dirty.remove(id);
            self.diff_states.remove(id);
            self.stream_variables.remove(id);
            trace!(target = "boardwalk::tracker", connector = %id, "unreachable connector dropped");
        }
        doomed.len()
    }
}

fn generate_seckey() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .map(char::from)
        .take(SECKEY_LEN)
        .collect()
}
