use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use boardwalk::connector::logic::NoopLogic;
use boardwalk::connector::{ConnectorError, ConnectorRole, ParentSpec};
use boardwalk::request::{default_handlers, handle_request, SyncRequest, SyncResponse};
use boardwalk::rpc::ServerRpcTable;
use boardwalk::session::Session;
use boardwalk::state::{boxed_state, ConnectorState};
use boardwalk_proto::{InboundBatch, RpcEntry};
use serde::Serialize;
use serde_json::json;

#[derive(Serialize, Default)]
struct PlainState {
    caption: String,
}

impl ConnectorState for PlainState {}

struct TestRequest {
    path: String,
    body: Vec<u8>,
}

impl SyncRequest for TestRequest {
    fn path_info(&self) -> &str {
        &self.path
    }

    fn parameter(&self, _name: &str) -> Option<&str> {
        None
    }

    fn content(&self) -> &[u8] {
        &self.body
    }
}

#[derive(Default)]
struct TestResponse {
    status: Option<u16>,
    body: Vec<u8>,
}

impl SyncResponse for TestResponse {
    fn set_status(&mut self, status: u16) {
        self.status = Some(status);
    }

    fn set_header(&mut self, _name: &str, _value: &str) {}

    fn write_all(&mut self, body: &[u8]) -> io::Result<()> {
        self.body.extend_from_slice(body);
        Ok(())
    }
}

fn post(session: &Session, ui_id: u64, batch: &InboundBatch) -> TestResponse {
    let request = TestRequest {
        path: format!("/sync/{ui_id}"),
        body: serde_json::to_vec(batch).unwrap(),
    };
    let mut response = TestResponse::default();
    handle_request(session, &default_handlers(), &request, &mut response).unwrap();
    response
}

#[test]
fn extensions_are_one_shot_and_validate_their_parent() {
    let session = Session::new();
    let mut state = session.lock();
    let ui_id = state.create_ui("root", boxed_state(PlainState::default()), Box::new(NoopLogic));
    let ui = state.ui_mut(ui_id).unwrap();
    let root = ui.root_id().clone();
    let a = ui.create_component("panel", boxed_state(PlainState::default()), Box::new(NoopLogic));
    let b = ui.create_component("panel", boxed_state(PlainState::default()), Box::new(NoopLogic));
    ui.attach(&root, &a).unwrap();
    ui.attach(&root, &b).unwrap();

    let ext = ui.create_extension(
        "tooltip",
        ParentSpec::Role(ConnectorRole::Component),
        boxed_state(PlainState::default()),
        Box::new(NoopLogic),
    );
    ui.add_extension(&a, &ext).unwrap();
    ui.remove_extension(&ext).unwrap();
    let err = ui.add_extension(&b, &ext).unwrap_err();
    assert!(matches!(err, ConnectorError::ExtensionReattach { .. }));

    let root_only = ui.create_extension(
        "debug-overlay",
        ParentSpec::Role(ConnectorRole::UiRoot),
        boxed_state(PlainState::default()),
        Box::new(NoopLogic),
    );
    let err = ui.add_extension(&a, &root_only).unwrap_err();
    match err {
        ConnectorError::UnsupportedParent {
            extension_type,
            parent_type,
            ..
        } => {
            assert_eq!(extension_type, "debug-overlay");
            assert_eq!(parent_type, "panel");
        }
        other => panic!("expected UnsupportedParent, got {other:?}"),
    }
}

#[test]
fn a_failing_rpc_leaves_the_session_usable() {
    let session = Session::new();
    let (ui_id, target) = {
        let mut state = session.lock();
        let ui_id = state.create_ui("root", boxed_state(PlainState::default()), Box::new(NoopLogic));
        let ui = state.ui_mut(ui_id).unwrap();
        let root = ui.root_id().clone();
        let target = ui.create_component("form", boxed_state(PlainState::default()), Box::new(NoopLogic));
        ui.attach(&root, &target).unwrap();
        ui.register_rpc(
            &target,
            ServerRpcTable::new("form.SubmitRpc")
                .method("submit", |_ctx, _args| Err("validation backend offline".into()))
                .method("caption", |ctx, args| {
                    ctx.state_mut::<PlainState>()?.caption =
                        boardwalk::rpc::decode_arg("form.SubmitRpc", "caption", args, 0)?;
                    Ok(())
                }),
        )
        .unwrap();
        (ui_id, target)
    };

    let token = session.lock().csrf_token().to_string();
    let failing = InboundBatch {
        csrf_token: Some(token.clone()),
        variables: Default::default(),
        rpc: vec![RpcEntry {
            connector: target.as_str().to_string(),
            interface: "form.SubmitRpc".into(),
            method: "submit".into(),
            args: vec![],
        }],
    };
    let response = post(&session, ui_id, &failing);
    assert_eq!(response.status, Some(200));
    {
        let state = session.lock();
        let ui = state.ui(ui_id).unwrap();
        let attached = ui.connector(&target).unwrap().component_error().unwrap();
        assert!(attached.contains("form.SubmitRpc"));
        assert!(attached.contains("submit"));
    }

    // An unrelated follow-up request against the same session still works.
    let follow_up = InboundBatch {
        csrf_token: Some(token),
        variables: Default::default(),
        rpc: vec![RpcEntry {
            connector: target.as_str().to_string(),
            interface: "form.SubmitRpc".into(),
            method: "caption".into(),
            args: vec![json!("recovered")],
        }],
    };
    let response = post(&session, ui_id, &follow_up);
    assert_eq!(response.status, Some(200));
    let state = session.lock();
    let ui = state.ui(ui_id).unwrap();
    assert_eq!(
        ui.state::<PlainState>(&target).unwrap().caption,
        "recovered"
    );
}

#[test]
fn teardown_runs_every_listener_and_aggregates_the_failure() {
    #[derive(Debug, thiserror::Error)]
    #[error("cache flush failed")]
    struct FlushFailure;

    let session = Session::new();
    let mut state = session.lock();
    state.create_ui("root", boxed_state(PlainState::default()), Box::new(NoopLogic));
    let calls = Arc::new(AtomicUsize::new(0));
    for fail in [false, true, false] {
        let calls = calls.clone();
        state.add_close_listener(Box::new(move |_state| {
            calls.fetch_add(1, Ordering::SeqCst);
            if fail {
                Err(Box::new(FlushFailure) as _)
            } else {
                Ok(())
            }
        }));
    }

    let err = state.close().unwrap_err();
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(err.failures.len(), 1);
    assert!(err.to_string().contains("cache flush failed"));
    assert!(state.is_closed());
}

#[test]
fn detach_is_delivered_to_the_whole_subtree_during_teardown() {
    use boardwalk::connector::ConnectorLogic;
    use boardwalk::ui::ConnectorContext;
    use std::sync::Mutex;

    struct DetachProbe {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl ConnectorLogic for DetachProbe {
        fn detached(&mut self, _ctx: &mut ConnectorContext<'_>) {
            self.log.lock().unwrap().push(self.name);
        }
    }

    let session = Session::new();
    let mut state = session.lock();
    let ui_id = state.create_ui("root", boxed_state(PlainState::default()), Box::new(NoopLogic));
    let log = Arc::new(Mutex::new(Vec::new()));
    {
        let ui = state.ui_mut(ui_id).unwrap();
        let root = ui.root_id().clone();
        let outer = ui.create_component(
            "outer",
            boxed_state(PlainState::default()),
            Box::new(DetachProbe { name: "outer", log: log.clone() }),
        );
        let inner = ui.create_component(
            "inner",
            boxed_state(PlainState::default()),
            Box::new(DetachProbe { name: "inner", log: log.clone() }),
        );
        ui.attach(&root, &outer).unwrap();
        ui.attach(&outer, &inner).unwrap();
    }

    state.close().unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["inner", "outer"]);
}
