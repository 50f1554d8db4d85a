use std::collections::{HashSet, VecDeque};

use boardwalk_proto::{OutboundBatch, RpcEntry, StateEntry};
use serde_json::Value;
use tracing::{debug, trace};

use crate::connector::{Connector, ConnectorId};
use crate::state::{encode_state, EncodeError};
use crate::ui::Ui;

/// Synthetic state field carrying the user-visible component error message.
const FIELD_COMPONENT_ERROR: &str = "componentError";

/// Produce one response cycle for a UI. Caller holds the session lock.
///
/// The cycle runs `before_client_response` once per dirty connector (newly
/// dirtied connectors join the worklist, already-hooked ones do not re-run),
/// encodes every dirty connector's state as a diff against its baseline,
/// drains all pending invocations in global sequence order, and finally
/// sweeps connectors that are no longer reachable from the root.
pub fn write_response(ui: &mut Ui) -> Result<OutboundBatch, EncodeError> {
    run_response_hooks(ui);

    let mut entries = Vec::new();
    for id in ui.tracker().dirty_snapshot() {
        let attached = ui.connector(&id).is_some_and(Connector::is_attached);
        if !attached {
            ui.tracker_mut().mark_clean(&id);
            continue;
        }
        let entry = encode_connector(ui, &id)?;
        entries.push(entry);
        ui.tracker_mut().mark_clean(&id);
    }

    let rpc: Vec<RpcEntry> = ui
        .tracker_mut()
        .drain_all_pending()
        .into_iter()
        .map(|invocation| RpcEntry {
            connector: invocation.connector.as_str().to_string(),
            interface: invocation.interface,
            method: invocation.method,
            args: invocation.args,
        })
        .collect();

    let root = ui.root_id().clone();
    let swept = ui.tracker_mut().sweep_unreachable(&root);
    if swept > 0 {
        debug!(target = "boardwalk::sync", ui = ui.id(), swept, "dropped unreachable connectors");
    }

    let batch = OutboundBatch {
        sequence: ui.next_sync_id(),
        state: entries,
        rpc,
    };
    trace!(
        target = "boardwalk::sync",
        ui = ui.id(),
        sequence = batch.sequence,
        state_entries = batch.state.len(),
        rpc_entries = batch.rpc.len(),
        "response batch written"
    );
    Ok(batch)
}

fn run_response_hooks(ui: &mut Ui) {
    let mut seen: HashSet<ConnectorId> = HashSet::new();
    let mut worklist: VecDeque<ConnectorId> = ui.tracker().dirty_snapshot().into();
    while let Some(id) = worklist.pop_front() {
        if !seen.insert(id.clone()) {
            continue;
        }
        let attached = ui.connector(&id).is_some_and(Connector::is_attached);
        if !attached {
            continue;
        }
        let initial = !ui.tracker().has_diff_state(&id);
        ui.with_logic(&id, |logic, ctx| logic.before_client_response(initial, ctx));
        for dirtied in ui.tracker().dirty_snapshot() {
            if !seen.contains(&dirtied) {
                worklist.push_back(dirtied);
            }
        }
    }
}

pub(crate) fn encode_connector(ui: &mut Ui, id: &ConnectorId) -> Result<StateEntry, EncodeError> {
    let initial = !ui.tracker().has_diff_state(id);
    let (live, diffable) = {
        let entry = match ui.connector(id) {
            Some(entry) => entry,
            None => {
                return Ok(StateEntry {
                    connector: id.as_str().to_string(),
                    cached: true,
                    state: None,
                })
            }
        };
        let mut live = entry.state().encode()?;
        if let (Value::Object(map), Some(message)) = (&mut live, entry.component_error()) {
            map.insert(FIELD_COMPONENT_ERROR.into(), Value::String(message.to_string()));
        }
        (live, entry.state().diffable())
    };
    let baseline = ui.tracker().diff_state(id).cloned();
    let encoding = encode_state(
        &live,
        diffable,
        || match ui.connector(id) {
            Some(entry) => entry.state().zero_value(),
            None => Ok(Value::Object(Default::default())),
        },
        baseline.as_ref(),
    );
    let empty_diff = encoding.is_empty_diff();
    match encoding.new_baseline {
        Some(next) => ui.tracker_mut().set_diff_state(id, next),
        None => ui.tracker_mut().clear_diff_state(id),
    }
    if !initial && empty_diff {
        Ok(StateEntry {
            connector: id.as_str().to_string(),
            cached: true,
            state: None,
        })
    } else {
        Ok(StateEntry {
            connector: id.as_str().to_string(),
            cached: false,
            state: Some(encoding.payload),
        })
    }
}
