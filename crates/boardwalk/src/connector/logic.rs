use crate::request::{SyncRequest, SyncResponse};
use crate::ui::ConnectorContext;
use crate::vars::{DropTarget, VariableOwner};

/// Server-side behavior bound to one connector. The record in the tracker
/// carries the data; this trait carries the hooks the runtime calls into.
///
/// All hooks run with the owning session locked by the caller.
pub trait ConnectorLogic: Send {
    /// Invoked when the connector becomes reachable from a live UI root.
    /// By the time the tree operation returns, every descendant has been
    /// attached as well.
    fn attached(&mut self, ctx: &mut ConnectorContext<'_>) {
        let _ = ctx;
    }

    /// Invoked when the connector is unlinked from the tree. Every descendant
    /// receives exactly one detach per attach.
    fn detached(&mut self, ctx: &mut ConnectorContext<'_>) {
        let _ = ctx;
    }

    /// Last chance to compute derived state or enqueue final invocations
    /// before this connector's state is encoded. Called exactly once per
    /// response cycle, with `initial` set when the client holds no copy of
    /// this connector yet. Must not alter the connector tree.
    fn before_client_response(&mut self, initial: bool, ctx: &mut ConnectorContext<'_>) {
        let _ = (initial, ctx);
    }

    /// Connector-scoped handling for out-of-band requests routed by path
    /// suffix. Returns whether the request was handled. The session is locked
    /// on entry; implementations that stream large bodies should finish their
    /// bookkeeping quickly and perform long I/O after the request handler
    /// chain releases the lock.
    fn handle_connector_request(
        &mut self,
        request: &dyn SyncRequest,
        response: &mut dyn SyncResponse,
        path: &str,
        ctx: &mut ConnectorContext<'_>,
    ) -> bool {
        let _ = (request, response, path, ctx);
        false
    }

    /// Legacy variable-change capability, if this connector has one.
    fn as_variable_owner(&mut self) -> Option<&mut dyn VariableOwner> {
        None
    }

    /// Drop-target capability for the drag-and-drop service, if any.
    fn as_drop_target(&mut self) -> Option<&mut dyn DropTarget> {
        None
    }
}

/// Logic for connectors that are pure state holders.
#[derive(Debug, Default)]
pub struct NoopLogic;

impl ConnectorLogic for NoopLogic {}
