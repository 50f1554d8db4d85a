use serde_json::Value;
use tracing::{error, warn};

use crate::connector::ConnectorId;
use crate::ui::{ConnectorContext, Ui};
use crate::vars::{ServiceVariableOwner, VariableMap};

pub const DRAG_AND_DROP_SERVICE: &str = "drag-and-drop";

const VAR_DROP_TARGET: &str = "dropTarget";
const VAR_SOURCE: &str = "source";

/// One delivered drop: the originating connector (when the client named one)
/// and the remaining transfer data from the variable burst.
#[derive(Debug, Clone, PartialEq)]
pub struct DropEvent {
    pub source: Option<ConnectorId>,
    pub data: VariableMap,
}

/// Capability a connector needs before the drag-and-drop service will hand
/// it a drop.
pub trait DropTarget {
    fn handle_drop(&mut self, event: &DropEvent, ctx: &mut ConnectorContext<'_>);
}

/// Built-in variable owner translating drop bursts into [`DropTarget`]
/// calls. Addressed on the wire through the router key handed out by
/// [`DragAndDropService::install`].
pub struct DragAndDropService {
    enabled: bool,
}

impl DragAndDropService {
    pub fn new() -> Self {
        Self { enabled: true }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Register the service on a UI's variable router and return its wire
    /// key.
    pub fn install(ui: &mut Ui) -> String {
        ui.variables
            .register_service(DRAG_AND_DROP_SERVICE, Box::new(DragAndDropService::new()))
    }
}

impl Default for DragAndDropService {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceVariableOwner for DragAndDropService {
    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn change_variables(&mut self, variables: &VariableMap, ui: &mut Ui) {
        let Some(target_raw) = variables.get(VAR_DROP_TARGET).and_then(Value::as_str) else {
            warn!(target = "boardwalk::dnd", "drop burst without a target, dropping");
            return;
        };
        let target = ConnectorId::from(target_raw);
        let Some(entry) = ui.connector(&target) else {
            warn!(target = "boardwalk::dnd", connector = %target, "drop target is not registered, dropping");
            return;
        };
        if !entry.is_enabled() {
            warn!(
                target = "boardwalk::dnd",
                connector = %target,
                "ignoring drop on disabled connector"
            );
            return;
        }
        let event = DropEvent {
            source: variables
                .get(VAR_SOURCE)
                .and_then(Value::as_str)
                .map(ConnectorId::from),
            data: variables
                .iter()
                .filter(|(name, _)| name.as_str() != VAR_DROP_TARGET && name.as_str() != VAR_SOURCE)
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
        };
        let handled = ui.with_logic(&target, |logic, ctx| match logic.as_drop_target() {
            Some(drop_target) => {
                drop_target.handle_drop(&event, ctx);
                true
            }
            None => false,
        });
        if handled != Some(true) {
            error!(
                target = "boardwalk::dnd",
                connector = %target,
                "drop target connector does not implement drop handling, dropping request"
            );
        }
    }
}
