use serde_json::Value;
use tracing::trace;

use crate::connector::{
    check_extension_latch, check_supported_parent, Connector, ConnectorError, ConnectorId,
    ConnectorLogic, ConnectorRole, ParentSpec,
};
use crate::session::error::{DefaultErrorHandler, ErrorEvent, ErrorHandler};
use crate::state::ConnectorState;
use crate::state::SharedState;
use crate::tracker::ConnectorTracker;
use crate::vars::VariableRouter;

/// One server-held UI: the root connector, its tracker, and the legacy
/// variable routing table. Lives inside the session and is only reachable
/// through the session lock.
pub struct Ui {
    id: u64,
    root: ConnectorId,
    tracker: ConnectorTracker,
    pub(crate) variables: VariableRouter,
    server_sync_id: u64,
}

impl Ui {
    pub fn new(
        id: u64,
        root_type: &'static str,
        root_state: Box<dyn SharedState>,
        root_logic: Box<dyn ConnectorLogic>,
    ) -> Self {
        let mut tracker = ConnectorTracker::new();
        let root = tracker.register(ConnectorRole::UiRoot, root_type, root_state, root_logic);
        let mut ui = Self {
            id,
            root: root.clone(),
            tracker,
            variables: VariableRouter::new(),
            server_sync_id: 0,
        };
        ui.attach_subtree(&root);
        ui
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn root_id(&self) -> &ConnectorId {
        &self.root
    }

    pub fn tracker(&self) -> &ConnectorTracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut ConnectorTracker {
        &mut self.tracker
    }

    pub fn connector(&self, id: &ConnectorId) -> Option<&Connector> {
        self.tracker.connector(id)
    }

    pub(crate) fn next_sync_id(&mut self) -> u64 {
        self.server_sync_id += 1;
        self.server_sync_id
    }

    // --- construction

    pub fn create_component(
        &mut self,
        type_name: &'static str,
        state: Box<dyn SharedState>,
        logic: Box<dyn ConnectorLogic>,
    ) -> ConnectorId {
        self.tracker
            .register(ConnectorRole::Component, type_name, state, logic)
    }

    pub fn create_extension(
        &mut self,
        type_name: &'static str,
        supported_parent: ParentSpec,
        state: Box<dyn SharedState>,
        logic: Box<dyn ConnectorLogic>,
    ) -> ConnectorId {
        let id = self
            .tracker
            .register(ConnectorRole::Extension, type_name, state, logic);
        if let Some(entry) = self.tracker.connector_mut(&id) {
            entry.supported_parent = supported_parent;
        }
        id
    }

    // --- tree operations

    /// Link `child` under `parent`. The child must be a currently parentless
    /// component; if the parent is already attached the whole subtree is
    /// attached before this returns.
    pub fn attach(&mut self, parent: &ConnectorId, child: &ConnectorId) -> Result<(), ConnectorError> {
        let child_entry = self
            .tracker
            .connector(child)
            .ok_or_else(|| ConnectorError::NotFound(child.clone()))?;
        if child_entry.role() != ConnectorRole::Component {
            return Err(ConnectorError::RoleMismatch {
                connector: child.clone(),
                role: child_entry.role(),
                expected: ConnectorRole::Component,
            });
        }
        if let Some(existing) = child_entry.parent() {
            return Err(ConnectorError::ParentAlreadySet {
                connector: child.clone(),
                parent: existing.clone(),
            });
        }
        let parent_entry = self
            .tracker
            .connector(parent)
            .ok_or_else(|| ConnectorError::NotFound(parent.clone()))?;
        if parent_entry.role() == ConnectorRole::Extension {
            return Err(ConnectorError::RoleMismatch {
                connector: parent.clone(),
                role: ConnectorRole::Extension,
                expected: ConnectorRole::Component,
            });
        }
        self.check_no_cycle(parent, child)?;

        let parent_attached = parent_entry.is_attached();
        if let Some(entry) = self.tracker.connector_mut(child) {
            entry.parent = Some(parent.clone());
            entry.previously_attached = true;
        }
        if let Some(entry) = self.tracker.connector_mut(parent) {
            entry.children.push(child.clone());
        }
        self.tracker.mark_dirty(parent);
        if parent_attached {
            self.attach_subtree(child);
        }
        Ok(())
    }

    /// Extend `target` with `extension`. Extensions accept one parent ever:
    /// once attached, moving them is an invalid-state error, and the target
    /// must satisfy the extension's supported-parent declaration.
    pub fn add_extension(
        &mut self,
        target: &ConnectorId,
        extension: &ConnectorId,
    ) -> Result<(), ConnectorError> {
        let extension_entry = self
            .tracker
            .connector(extension)
            .ok_or_else(|| ConnectorError::NotFound(extension.clone()))?;
        if extension_entry.role() != ConnectorRole::Extension {
            return Err(ConnectorError::RoleMismatch {
                connector: extension.clone(),
                role: extension_entry.role(),
                expected: ConnectorRole::Extension,
            });
        }
        if let Some(existing) = extension_entry.parent() {
            return Err(ConnectorError::ParentAlreadySet {
                connector: extension.clone(),
                parent: existing.clone(),
            });
        }
        let target_entry = self
            .tracker
            .connector(target)
            .ok_or_else(|| ConnectorError::NotFound(target.clone()))?;
        check_extension_latch(extension_entry, target)?;
        check_supported_parent(extension_entry, target_entry)?;

        let target_attached = target_entry.is_attached();
        if let Some(entry) = self.tracker.connector_mut(extension) {
            entry.parent = Some(target.clone());
            entry.previously_attached = true;
        }
        if let Some(entry) = self.tracker.connector_mut(target) {
            entry.extensions.push(extension.clone());
        }
        self.tracker.mark_dirty(target);
        if target_attached {
            self.attach_subtree(extension);
        }
        Ok(())
    }

    /// Unlink `connector` from its parent, delivering detach to the whole
    /// subtree first. The entry stays in the id table until the end-of-cycle
    /// sweep finds it unreachable.
    pub fn detach(&mut self, connector: &ConnectorId) -> Result<(), ConnectorError> {
        let entry = self
            .tracker
            .connector(connector)
            .ok_or_else(|| ConnectorError::NotFound(connector.clone()))?;
        let Some(parent) = entry.parent().cloned() else {
            return Ok(());
        };
        if entry.is_attached() {
            self.detach_subtree(connector);
        }
        if let Some(parent_entry) = self.tracker.connector_mut(&parent) {
            parent_entry.children.retain(|id| id != connector);
            parent_entry.extensions.retain(|id| id != connector);
        }
        if let Some(entry) = self.tracker.connector_mut(connector) {
            entry.parent = None;
        }
        self.tracker.mark_dirty(&parent);
        Ok(())
    }

    /// Detach and drop an extension from its target.
    pub fn remove_extension(&mut self, extension: &ConnectorId) -> Result<(), ConnectorError> {
        self.detach(extension)
    }

    fn check_no_cycle(&self, parent: &ConnectorId, child: &ConnectorId) -> Result<(), ConnectorError> {
        let mut cursor = Some(parent.clone());
        while let Some(id) = cursor {
            if &id == child {
                return Err(ConnectorError::WouldCycle {
                    connector: child.clone(),
                });
            }
            cursor = self
                .tracker
                .connector(&id)
                .and_then(|entry| entry.parent().cloned());
        }
        Ok(())
    }

    /// Pre-order subtree listing: node first, then children, then extensions.
    pub(crate) fn collect_subtree(&self, id: &ConnectorId) -> Vec<ConnectorId> {
        let mut out = Vec::new();
        let mut stack = vec![id.clone()];
        while let Some(current) = stack.pop() {
            if let Some(entry) = self.tracker.connector(&current) {
                out.push(current.clone());
                // Reversed so the stack pops in declaration order.
                for child in entry.extensions().iter().rev() {
                    stack.push(child.clone());
                }
                for child in entry.children().iter().rev() {
                    stack.push(child.clone());
                }
            }
        }
        out
    }

    fn attach_subtree(&mut self, id: &ConnectorId) {
        for current in self.collect_subtree(id) {
            if let Some(entry) = self.tracker.connector_mut(&current) {
                if entry.attached {
                    continue;
                }
                entry.attached = true;
                entry.previously_attached = true;
            } else {
                continue;
            }
            self.tracker.mark_dirty(&current);
            trace!(target = "boardwalk::tree", connector = %current, "attached");
            self.with_logic(&current, |logic, ctx| logic.attached(ctx));
        }
    }

    fn detach_subtree(&mut self, id: &ConnectorId) {
        let mut order = self.collect_subtree(id);
        order.reverse();
        for current in order {
            let attached = self
                .tracker
                .connector(&current)
                .is_some_and(Connector::is_attached);
            if !attached {
                continue;
            }
            self.with_logic(&current, |logic, ctx| logic.detached(ctx));
            if let Some(entry) = self.tracker.connector_mut(&current) {
                entry.attached = false;
            }
            self.tracker.remove_stream_variables_for(&current);
            self.tracker.mark_clean(&current);
            self.tracker.clear_diff_state(&current);
            trace!(target = "boardwalk::tree", connector = %current, "detached");
        }
    }

    /// Detach notification for the whole tree, used during session teardown.
    pub(crate) fn tear_down(&mut self) {
        let root = self.root.clone();
        self.detach_subtree(&root);
    }

    // --- dirty marking and state access

    pub fn mark_dirty(&mut self, id: &ConnectorId) {
        self.tracker.mark_dirty(id);
    }

    pub fn mark_dirty_recursive(&mut self, id: &ConnectorId) {
        for current in self.collect_subtree(id) {
            self.tracker.mark_dirty(&current);
        }
    }

    pub fn mark_all_connectors_dirty(&mut self) {
        self.tracker.mark_all_connectors_dirty();
    }

    pub fn state<T: ConnectorState>(&self, id: &ConnectorId) -> Result<&T, ConnectorError> {
        let entry = self
            .tracker
            .connector(id)
            .ok_or_else(|| ConnectorError::NotFound(id.clone()))?;
        entry
            .state()
            .as_any()
            .downcast_ref::<T>()
            .ok_or_else(|| ConnectorError::StateTypeMismatch {
                connector: id.clone(),
                expected: std::any::type_name::<T>(),
            })
    }

    /// Typed mutable state access; the connector is marked dirty because its
    /// encoding may now differ from the last sent snapshot.
    pub fn state_mut<T: ConnectorState>(&mut self, id: &ConnectorId) -> Result<&mut T, ConnectorError> {
        self.tracker.mark_dirty(id);
        let entry = self
            .tracker
            .connector_mut(id)
            .ok_or_else(|| ConnectorError::NotFound(id.clone()))?;
        entry
            .state
            .as_any_mut()
            .downcast_mut::<T>()
            .ok_or_else(|| ConnectorError::StateTypeMismatch {
                connector: id.clone(),
                expected: std::any::type_name::<T>(),
            })
    }

    /// Diff of this connector's state versus its last-sent snapshot; the
    /// live encoding becomes the new baseline. Only meaningful under the
    /// session lock, like every other tracker access.
    pub fn encode_state(&mut self, id: &ConnectorId) -> Result<Value, crate::state::EncodeError> {
        let entry = crate::sync::response::encode_connector(self, id)?;
        Ok(entry.state.unwrap_or_else(|| Value::Object(Default::default())))
    }

    pub fn set_enabled(&mut self, id: &ConnectorId, enabled: bool) -> Result<(), ConnectorError> {
        let entry = self
            .tracker
            .connector_mut(id)
            .ok_or_else(|| ConnectorError::NotFound(id.clone()))?;
        if entry.enabled != enabled {
            entry.enabled = enabled;
            self.tracker.mark_dirty(id);
        }
        Ok(())
    }

    pub fn set_component_error(&mut self, id: &ConnectorId, message: Option<String>) {
        if let Some(entry) = self.tracker.connector_mut(id) {
            entry.component_error = message;
            self.tracker.mark_dirty(id);
        }
    }

    // --- rpc conveniences

    pub fn enqueue_rpc(
        &mut self,
        id: &ConnectorId,
        interface: impl Into<String>,
        method: impl Into<String>,
        args: Vec<Value>,
    ) -> Result<u64, ConnectorError> {
        self.tracker.enqueue_invocation(id, interface, method, args)
    }

    pub fn register_rpc(
        &mut self,
        id: &ConnectorId,
        table: crate::rpc::ServerRpcTable,
    ) -> Result<(), ConnectorError> {
        self.tracker.register_rpc(id, table)
    }

    // --- hook plumbing

    /// Run `f` against a connector's logic with the logic temporarily lifted
    /// out of the tracker, so the hook can borrow the rest of the UI through
    /// its context. Returns `None` for unknown connectors.
    pub(crate) fn with_logic<R>(
        &mut self,
        id: &ConnectorId,
        f: impl FnOnce(&mut dyn ConnectorLogic, &mut ConnectorContext<'_>) -> R,
    ) -> Option<R> {
        let mut logic = self.tracker.take_logic(id)?;
        let result = {
            let mut ctx = ConnectorContext::new(self, id.clone());
            f(logic.as_mut(), &mut ctx)
        };
        self.tracker.restore_logic(id, logic);
        Some(result)
    }

    // --- error routing

    /// Route `error` through the connector-aware handler chain: the
    /// originating connector's handler, else the nearest ancestor's, else
    /// the session handler, else the default handler (which logs the chain
    /// and, when the error is traceable to a connector, attaches a
    /// user-visible component error).
    pub(crate) fn handle_connector_error(
        &mut self,
        session_handler: Option<&mut dyn ErrorHandler>,
        origin: Option<&ConnectorId>,
        error: &(dyn std::error::Error + 'static),
    ) {
        let mut cursor = origin.cloned();
        while let Some(id) = cursor {
            if let Some(mut handler) = self.tracker.take_error_handler(&id) {
                handler.error(&ErrorEvent::new(origin, error));
                self.tracker.restore_error_handler(&id, handler);
                return;
            }
            cursor = self
                .tracker
                .connector(&id)
                .and_then(|entry| entry.parent().cloned());
        }
        if let Some(handler) = session_handler {
            handler.error(&ErrorEvent::new(origin, error));
            return;
        }
        DefaultErrorHandler.error(&ErrorEvent::new(origin, error));
        if let Some(id) = origin {
            if self.tracker.contains(id) {
                self.set_component_error(id, Some(error.to_string()));
            }
        }
    }
}

/// Connector-scoped view handed to logic hooks and RPC handlers. Exposes the
/// connector's own state, dirty marking, and outbound invocations, but no
/// tree mutation, which keeps `before_client_response` within its contract.
pub struct ConnectorContext<'a> {
    ui: &'a mut Ui,
    connector: ConnectorId,
}

impl<'a> ConnectorContext<'a> {
    pub(crate) fn new(ui: &'a mut Ui, connector: ConnectorId) -> Self {
        Self { ui, connector }
    }

    pub fn connector_id(&self) -> &ConnectorId {
        &self.connector
    }

    pub fn ui_id(&self) -> u64 {
        self.ui.id
    }

    pub fn is_attached(&self) -> bool {
        self.ui
            .connector(&self.connector)
            .is_some_and(Connector::is_attached)
    }

    pub fn is_enabled(&self) -> bool {
        self.ui
            .connector(&self.connector)
            .is_some_and(Connector::is_enabled)
    }

    pub fn parent(&self) -> Option<ConnectorId> {
        self.ui
            .connector(&self.connector)?
            .parent()
            .cloned()
    }

    pub fn state<T: ConnectorState>(&self) -> Result<&T, ConnectorError> {
        self.ui.state(&self.connector)
    }

    pub fn state_mut<T: ConnectorState>(&mut self) -> Result<&mut T, ConnectorError> {
        let connector = self.connector.clone();
        self.ui.state_mut(&connector)
    }

    pub fn mark_dirty(&mut self) {
        let connector = self.connector.clone();
        self.ui.mark_dirty(&connector);
    }

    pub fn mark_connector_dirty(&mut self, id: &ConnectorId) {
        self.ui.mark_dirty(id);
    }

    pub fn mark_dirty_recursive(&mut self) {
        let connector = self.connector.clone();
        self.ui.mark_dirty_recursive(&connector);
    }

    pub fn enqueue_rpc(
        &mut self,
        interface: impl Into<String>,
        method: impl Into<String>,
        args: Vec<Value>,
    ) -> Result<u64, ConnectorError> {
        let connector = self.connector.clone();
        self.ui.enqueue_rpc(&connector, interface, method, args)
    }

    pub fn set_component_error(&mut self, message: Option<String>) {
        let connector = self.connector.clone();
        self.ui.set_component_error(&connector, message);
    }
}
