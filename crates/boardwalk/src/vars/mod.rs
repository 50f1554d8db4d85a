pub mod dragdrop;

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;
use tracing::{error, warn};

use crate::connector::ConnectorId;
use crate::keymap::KeyMapper;
use crate::ui::{ConnectorContext, Ui};

pub use dragdrop::{DragAndDropService, DropEvent, DropTarget, DRAG_AND_DROP_SERVICE};

/// One owner's slice of a request's flat variable burst.
pub type VariableMap = BTreeMap<String, Value>;

/// Legacy pre-RPC capability: receive a flat name→value change map. The
/// dispatcher never calls this on a disabled connector.
pub trait VariableOwner {
    fn change_variables(&mut self, variables: &VariableMap, ctx: &mut ConnectorContext<'_>);
}

/// Framework-level variable owner that is not itself a connector. Addressed
/// on the wire through a key handed out by the router's [`KeyMapper`].
pub trait ServiceVariableOwner: Send {
    fn is_enabled(&self) -> bool {
        true
    }

    fn change_variables(&mut self, variables: &VariableMap, ui: &mut Ui);
}

/// Per-UI routing table for legacy variable changes: connector ids resolve
/// through the tracker, service owners through the key mapper.
#[derive(Default)]
pub struct VariableRouter {
    keys: KeyMapper<String>,
    services: HashMap<String, Box<dyn ServiceVariableOwner>>,
}

impl VariableRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service owner under `name`, returning its wire key.
    pub fn register_service(
        &mut self,
        name: impl Into<String>,
        owner: Box<dyn ServiceVariableOwner>,
    ) -> String {
        let name = name.into();
        let key = self.keys.key(Some(&name));
        self.services.insert(name, owner);
        key
    }

    pub fn service_name(&self, wire_key: &str) -> Option<&String> {
        self.keys.get(wire_key)
    }

    pub fn remove_service(&mut self, name: &str) {
        self.services.remove(name);
        self.keys.remove(&name.to_string());
    }

    pub(crate) fn take_service(&mut self, name: &str) -> Option<Box<dyn ServiceVariableOwner>> {
        self.services.remove(name)
    }

    pub(crate) fn restore_service(&mut self, name: String, owner: Box<dyn ServiceVariableOwner>) {
        self.services.entry(name).or_insert(owner);
    }
}

/// Route one owner's variable changes. Unknown owners and disabled owners
/// are dropped with a log entry; a malformed request must not abort the rest
/// of the batch, so nothing in here returns an error.
pub fn dispatch_owner(ui: &mut Ui, owner_key: &str, variables: &VariableMap) {
    if let Some(name) = ui.variables.service_name(owner_key).cloned() {
        let Some(mut service) = ui.variables.take_service(&name) else {
            warn!(target = "boardwalk::vars", owner = %owner_key, "service owner vanished, dropping change");
            return;
        };
        if service.is_enabled() {
            service.change_variables(variables, ui);
        } else {
            warn!(
                target = "boardwalk::vars",
                owner = %owner_key,
                service = %name,
                "ignoring variable change for disabled service owner"
            );
        }
        ui.variables.restore_service(name, service);
        return;
    }

    let id = ConnectorId::from(owner_key);
    let Some(entry) = ui.connector(&id) else {
        warn!(target = "boardwalk::vars", owner = %owner_key, "variable change for unknown connector, dropping");
        return;
    };
    if !entry.is_enabled() {
        warn!(
            target = "boardwalk::vars",
            connector = %id,
            "ignoring variable change for disabled connector"
        );
        return;
    }
    let accepted = ui.with_logic(&id, |logic, ctx| match logic.as_variable_owner() {
        Some(owner) => {
            owner.change_variables(variables, ctx);
            true
        }
        None => false,
    });
    if accepted != Some(true) {
        error!(
            target = "boardwalk::vars",
            connector = %id,
            "connector does not accept variable changes, dropping request"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::logic::NoopLogic;
    use crate::connector::ConnectorLogic;
    use crate::state::{boxed_state, ConnectorState};
    use serde::Serialize;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[derive(Serialize, Default)]
    struct EmptyState;

    impl ConnectorState for EmptyState {}

    struct OwnerLogic {
        seen: Arc<Mutex<Vec<VariableMap>>>,
    }

    impl ConnectorLogic for OwnerLogic {
        fn as_variable_owner(&mut self) -> Option<&mut dyn VariableOwner> {
            Some(self)
        }
    }

    impl VariableOwner for OwnerLogic {
        fn change_variables(&mut self, variables: &VariableMap, _ctx: &mut ConnectorContext<'_>) {
            self.seen.lock().unwrap().push(variables.clone());
        }
    }

    fn ui_with_owner() -> (Ui, crate::connector::ConnectorId, Arc<Mutex<Vec<VariableMap>>>) {
        let mut ui = Ui::new(1, "root", boxed_state(EmptyState), Box::new(NoopLogic));
        let root = ui.root_id().clone();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let owner = ui.create_component(
            "field",
            boxed_state(EmptyState),
            Box::new(OwnerLogic { seen: seen.clone() }),
        );
        ui.attach(&root, &owner).unwrap();
        (ui, owner, seen)
    }

    fn changes(pairs: &[(&str, Value)]) -> VariableMap {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn changes_reach_an_enabled_owner() {
        let (mut ui, owner, seen) = ui_with_owner();
        let vars = changes(&[("value", json!("typed"))]);
        dispatch_owner(&mut ui, owner.as_str(), &vars);
        assert_eq!(*seen.lock().unwrap(), vec![vars]);
    }

    #[test]
    fn disabled_owners_never_see_changes() {
        let (mut ui, owner, seen) = ui_with_owner();
        ui.set_enabled(&owner, false).unwrap();
        dispatch_owner(&mut ui, owner.as_str(), &changes(&[("value", json!("stale"))]));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn unknown_owners_are_dropped_quietly() {
        let (mut ui, _owner, _seen) = ui_with_owner();
        dispatch_owner(&mut ui, "9999", &changes(&[("value", json!(1))]));
    }

    #[test]
    fn connectors_without_the_capability_drop_the_request() {
        let mut ui = Ui::new(1, "root", boxed_state(EmptyState), Box::new(NoopLogic));
        let root = ui.root_id().clone();
        let plain = ui.create_component("label", boxed_state(EmptyState), Box::new(NoopLogic));
        ui.attach(&root, &plain).unwrap();
        dispatch_owner(&mut ui, plain.as_str(), &changes(&[("value", json!(1))]));
    }

    #[test]
    fn service_owners_resolve_through_their_wire_key() {
        struct Recorder(Arc<Mutex<usize>>);

        impl ServiceVariableOwner for Recorder {
            fn change_variables(&mut self, _variables: &VariableMap, _ui: &mut Ui) {
                *self.0.lock().unwrap() += 1;
            }
        }

        let mut ui = Ui::new(1, "root", boxed_state(EmptyState), Box::new(NoopLogic));
        let calls = Arc::new(Mutex::new(0));
        let key = ui
            .variables
            .register_service("recorder", Box::new(Recorder(calls.clone())));
        dispatch_owner(&mut ui, &key, &changes(&[("x", json!(1))]));
        assert_eq!(*calls.lock().unwrap(), 1);
    }
}
