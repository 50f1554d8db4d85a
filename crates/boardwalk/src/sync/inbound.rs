use boardwalk_proto::InboundBatch;
use tracing::{debug, warn};

use crate::connector::ConnectorId;
use crate::session::SessionState;
use crate::ui::ConnectorContext;
use crate::vars::dispatch_owner;

#[derive(Debug, thiserror::Error)]
pub enum InboundError {
    #[error("unknown ui id {0}")]
    UnknownUi(u64),
    #[error("request security token did not match the session")]
    CsrfMismatch,
}

/// Apply one inbound batch to the addressed UI. Caller holds the session
/// lock. Variable changes dispatch before RPC records, matching the order
/// the client produced them in.
///
/// Entries addressing unknown connectors or unregistered RPC interfaces are
/// logged and skipped; one bad entry never aborts the rest of the batch.
/// Handler failures propagate through the connector-aware error chain and
/// processing continues, so the session stays usable for unrelated requests.
pub fn apply_inbound(
    state: &mut SessionState,
    ui_id: u64,
    batch: InboundBatch,
) -> Result<(), InboundError> {
    if !state.validate_csrf(batch.csrf_token.as_deref()) {
        warn!(target = "boardwalk::sync", ui = ui_id, "rejecting batch with invalid security token");
        return Err(InboundError::CsrfMismatch);
    }
    let (ui, mut session_handler) = state.ui_and_error_handler(ui_id);
    let Some(ui) = ui else {
        warn!(target = "boardwalk::sync", ui = ui_id, "batch addressed an unknown ui");
        return Err(InboundError::UnknownUi(ui_id));
    };

    for (owner, variables) in &batch.variables {
        dispatch_owner(ui, owner, variables);
    }

    for entry in &batch.rpc {
        let id = ConnectorId::from(entry.connector.as_str());
        if !ui.tracker().contains(&id) {
            warn!(
                target = "boardwalk::sync",
                connector = %id,
                interface = %entry.interface,
                "rpc for unknown connector, skipping"
            );
            continue;
        }
        let Some(mut table) = ui.tracker_mut().take_rpc_table(&id, &entry.interface) else {
            warn!(
                target = "boardwalk::sync",
                connector = %id,
                interface = %entry.interface,
                "no rpc manager registered for interface, dropping invocation"
            );
            continue;
        };
        debug!(
            target = "boardwalk::sync",
            connector = %id,
            interface = %entry.interface,
            method = %entry.method,
            "applying inbound rpc"
        );
        let result = {
            let mut ctx = ConnectorContext::new(ui, id.clone());
            table.invoke(&entry.method, &entry.args, &mut ctx)
        };
        ui.tracker_mut().restore_rpc_table(&id, table);
        if let Err(err) = result {
            ui.handle_connector_error(session_handler.as_deref_mut(), Some(&id), &err);
        }
    }
    Ok(())
}
