use std::io;

use boardwalk_proto as proto;
use tracing::{info, warn};

use crate::connector::ConnectorId;
use crate::session::{Session, SessionState};
use crate::state::EncodeError;
use crate::sync::{self, InboundError};

/// Opaque view of one container request: routing path, flat parameters, and
/// the buffered body. The container integration owns the real object.
pub trait SyncRequest {
    /// Path below the mount point, starting with `/`.
    fn path_info(&self) -> &str;

    fn parameter(&self, name: &str) -> Option<&str>;

    fn content(&self) -> &[u8];
}

/// Opaque response sink: status, headers, byte body.
pub trait SyncResponse {
    fn set_status(&mut self, status: u16);

    fn set_header(&mut self, name: &str, value: &str);

    fn write_all(&mut self, body: &[u8]) -> io::Result<()>;
}

#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error(transparent)]
    Batch(#[from] proto::BatchError),
    #[error(transparent)]
    State(#[from] EncodeError),
}

/// One link in the request handler chain. Returns whether the request was
/// handled; unhandled requests fall through to the next link.
pub trait RequestHandler: Send {
    fn handle(
        &self,
        session: &Session,
        request: &dyn SyncRequest,
        response: &mut dyn SyncResponse,
    ) -> Result<bool, RequestError>;
}

/// Handler body that runs with the session already locked.
pub trait SessionRequestBody: Send {
    fn handle(
        &self,
        state: &mut SessionState,
        request: &dyn SyncRequest,
        response: &mut dyn SyncResponse,
    ) -> Result<bool, RequestError>;
}

/// Mandated shape for any request path touching session state: acquire the
/// session lock, run the body, release on every exit path (the guard drops
/// on panic and error alike).
pub struct SynchronizedRequestHandler<B> {
    body: B,
}

impl<B> SynchronizedRequestHandler<B> {
    pub fn new(body: B) -> Self {
        Self { body }
    }
}

impl<B: SessionRequestBody> RequestHandler for SynchronizedRequestHandler<B> {
    fn handle(
        &self,
        session: &Session,
        request: &dyn SyncRequest,
        response: &mut dyn SyncResponse,
    ) -> Result<bool, RequestError> {
        let mut state = session.lock();
        state.touch();
        self.body.handle(&mut state, request, response)
    }
}

/// Run the handler chain for one request. Requests no handler claims are
/// answered not-found; handler errors propagate to the container layer.
pub fn handle_request(
    session: &Session,
    handlers: &[Box<dyn RequestHandler>],
    request: &dyn SyncRequest,
    response: &mut dyn SyncResponse,
) -> Result<(), RequestError> {
    for handler in handlers {
        if handler.handle(session, request, &mut *response)? {
            return Ok(());
        }
    }
    warn!(target = "boardwalk::request", path = request.path_info(), "no handler claimed request");
    not_found(response, "unhandled request path");
    Ok(())
}

/// The default handler chain: sync batches, connector sub-requests, uploads.
pub fn default_handlers() -> Vec<Box<dyn RequestHandler>> {
    vec![
        Box::new(SynchronizedRequestHandler::new(SyncBatchBody)),
        Box::new(SynchronizedRequestHandler::new(ConnectorResourceBody)),
        Box::new(SynchronizedRequestHandler::new(UploadBody)),
    ]
}

fn respond(response: &mut dyn SyncResponse, status: u16, message: &str) {
    response.set_status(status);
    response.set_header("Content-Type", "text/plain; charset=utf-8");
    if let Err(err) = response.write_all(message.as_bytes()) {
        // The client going away mid-response is expected, not an application
        // error.
        info!(target = "boardwalk::request", error = %err, "client connection closed while writing response");
    }
}

pub(crate) fn not_found(response: &mut dyn SyncResponse, message: &str) {
    respond(response, 404, message);
}

/// Handles `/sync/{uiId}`: decodes the inbound batch, applies it, and writes
/// the response batch for the addressed UI.
pub struct SyncBatchBody;

impl SessionRequestBody for SyncBatchBody {
    fn handle(
        &self,
        state: &mut SessionState,
        request: &dyn SyncRequest,
        response: &mut dyn SyncResponse,
    ) -> Result<bool, RequestError> {
        let Some(rest) = request.path_info().strip_prefix("/sync/") else {
            return Ok(false);
        };
        let Ok(ui_id) = rest.trim_end_matches('/').parse::<u64>() else {
            return Ok(false);
        };
        let batch = match proto::decode_inbound(request.content()) {
            Ok(batch) => batch,
            Err(err) => {
                warn!(target = "boardwalk::request", ui = ui_id, error = %err, "rejecting malformed sync batch");
                respond(response, 400, "invalid sync batch");
                return Ok(true);
            }
        };
        match sync::apply_inbound(state, ui_id, batch) {
            Ok(()) => {}
            Err(InboundError::UnknownUi(_)) => {
                not_found(response, "unknown ui");
                return Ok(true);
            }
            Err(InboundError::CsrfMismatch) => {
                respond(response, 403, "invalid security token");
                return Ok(true);
            }
        }
        let Some(ui) = state.ui_mut(ui_id) else {
            not_found(response, "unknown ui");
            return Ok(true);
        };
        let outbound = sync::write_response(ui)?;
        let bytes = proto::encode_outbound(&outbound)?;
        response.set_status(200);
        response.set_header("Content-Type", "application/json; charset=utf-8");
        if let Err(err) = response.write_all(&bytes) {
            info!(target = "boardwalk::request", ui = ui_id, error = %err, "client connection closed while writing sync response");
        }
        Ok(true)
    }
}

/// Handles `/connector/{uiId}/{connectorId}/{rest}` by delegating to the
/// target connector's own request handling. Unknown ids are answered
/// not-found and the request loop continues.
pub struct ConnectorResourceBody;

impl SessionRequestBody for ConnectorResourceBody {
    fn handle(
        &self,
        state: &mut SessionState,
        request: &dyn SyncRequest,
        response: &mut dyn SyncResponse,
    ) -> Result<bool, RequestError> {
        let Some(rest) = request.path_info().strip_prefix("/connector/") else {
            return Ok(false);
        };
        let mut parts = rest.splitn(3, '/');
        let (Some(ui_raw), Some(connector_raw)) = (parts.next(), parts.next()) else {
            return Ok(false);
        };
        let sub_path = parts.next().unwrap_or("");
        let Ok(ui_id) = ui_raw.parse::<u64>() else {
            return Ok(false);
        };
        let Some(ui) = state.ui_mut(ui_id) else {
            warn!(target = "boardwalk::request", ui = ui_id, "connector request for unknown ui");
            not_found(response, "unknown ui");
            return Ok(true);
        };
        let id = ConnectorId::from(connector_raw);
        if !ui.tracker().contains(&id) {
            warn!(target = "boardwalk::request", ui = ui_id, connector = %id, "connector request for unknown connector");
            not_found(response, "unknown connector");
            return Ok(true);
        }
        let handled = ui.with_logic(&id, |logic, ctx| {
            logic.handle_connector_request(request, &mut *response, sub_path, ctx)
        });
        if handled != Some(true) {
            not_found(response, "connector sub-request not handled");
        }
        Ok(true)
    }
}

/// Handles `/upload/{uiId}/{connectorId}/{name}/{seckey}`: resolves the
/// registered stream variable and feeds it the request body. The security
/// key must match the one generated at registration or the request is
/// rejected outright.
pub struct UploadBody;

impl SessionRequestBody for UploadBody {
    fn handle(
        &self,
        state: &mut SessionState,
        request: &dyn SyncRequest,
        response: &mut dyn SyncResponse,
    ) -> Result<bool, RequestError> {
        let Some(rest) = request.path_info().strip_prefix("/upload/") else {
            return Ok(false);
        };
        let mut parts = rest.splitn(4, '/');
        let (Some(ui_raw), Some(connector_raw), Some(name), Some(seckey)) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Ok(false);
        };
        let Ok(ui_id) = ui_raw.parse::<u64>() else {
            return Ok(false);
        };
        let Some(ui) = state.ui_mut(ui_id) else {
            not_found(response, "unknown ui");
            return Ok(true);
        };
        let id = ConnectorId::from(connector_raw);
        let Some(slot) = ui.tracker_mut().stream_variable_mut(&id, name) else {
            warn!(target = "boardwalk::request", connector = %id, name, "upload for unknown stream variable");
            not_found(response, "unknown stream variable");
            return Ok(true);
        };
        if slot.seckey != seckey {
            warn!(target = "boardwalk::request", connector = %id, name, "upload security key mismatch, rejecting");
            respond(response, 403, "invalid upload key");
            return Ok(true);
        }
        let (succeeded, disposed) = {
            slot.variable.streaming_started(name);
            match slot.variable.on_data(request.content()) {
                Ok(()) => {
                    slot.variable.streaming_finished(name);
                    (true, slot.variable.is_disposed())
                }
                Err(err) => {
                    slot.variable.streaming_failed(name, err.as_ref());
                    warn!(target = "boardwalk::request", connector = %id, name, error = %err, "stream variable rejected upload");
                    (false, slot.variable.is_disposed())
                }
            }
        };
        if disposed {
            ui.tracker_mut().remove_stream_variable(&id, name);
        }
        if succeeded {
            respond(response, 200, "upload received");
        } else {
            respond(response, 500, "upload failed");
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::logic::NoopLogic;
    use crate::state::{boxed_state, ConnectorState};
    use crate::tracker::StreamVariable;
    use serde::Serialize;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[derive(Serialize, Default)]
    struct EmptyState;

    impl ConnectorState for EmptyState {}

    #[derive(Default)]
    pub(crate) struct TestRequest {
        path: String,
        params: HashMap<String, String>,
        body: Vec<u8>,
    }

    impl TestRequest {
        pub(crate) fn new(path: &str, body: &[u8]) -> Self {
            Self {
                path: path.to_string(),
                params: HashMap::new(),
                body: body.to_vec(),
            }
        }
    }

    impl SyncRequest for TestRequest {
        fn path_info(&self) -> &str {
            &self.path
        }

        fn parameter(&self, name: &str) -> Option<&str> {
            self.params.get(name).map(String::as_str)
        }

        fn content(&self) -> &[u8] {
            &self.body
        }
    }

    #[derive(Default)]
    pub(crate) struct TestResponse {
        pub(crate) status: Option<u16>,
        pub(crate) headers: Vec<(String, String)>,
        pub(crate) body: Vec<u8>,
    }

    impl SyncResponse for TestResponse {
        fn set_status(&mut self, status: u16) {
            self.status = Some(status);
        }

        fn set_header(&mut self, name: &str, value: &str) {
            self.headers.push((name.to_string(), value.to_string()));
        }

        fn write_all(&mut self, body: &[u8]) -> io::Result<()> {
            self.body.extend_from_slice(body);
            Ok(())
        }
    }

    fn session_with_ui() -> (Session, u64) {
        let session = Session::new();
        let ui_id = session
            .lock()
            .create_ui("root", boxed_state(EmptyState), Box::new(NoopLogic));
        (session, ui_id)
    }

    #[test]
    fn sync_batch_round_trip_produces_a_response_batch() {
        let (session, ui_id) = session_with_ui();
        let token = session.lock().csrf_token().to_string();
        let body = format!(r#"{{ "csrf_token": "{token}" }}"#);
        let request = TestRequest::new(&format!("/sync/{ui_id}"), body.as_bytes());
        let mut response = TestResponse::default();
        handle_request(&session, &default_handlers(), &request, &mut response).unwrap();
        assert_eq!(response.status, Some(200));
        let batch: boardwalk_proto::OutboundBatch = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(batch.sequence, 1);
        // Root was dirty from UI construction, so it is in the first batch.
        assert_eq!(batch.state.len(), 1);
    }

    #[test]
    fn unknown_ui_gets_not_found_and_the_session_survives() {
        let (session, _ui_id) = session_with_ui();
        let token = session.lock().csrf_token().to_string();
        let body = format!(r#"{{ "csrf_token": "{token}" }}"#);
        let request = TestRequest::new("/sync/777", body.as_bytes());
        let mut response = TestResponse::default();
        handle_request(&session, &default_handlers(), &request, &mut response).unwrap();
        assert_eq!(response.status, Some(404));
        assert!(!session.lock().is_closed());
    }

    #[test]
    fn malformed_batches_get_a_bad_request_response() {
        let (session, ui_id) = session_with_ui();
        let request = TestRequest::new(&format!("/sync/{ui_id}"), b"this is not json");
        let mut response = TestResponse::default();
        handle_request(&session, &default_handlers(), &request, &mut response).unwrap();
        assert_eq!(response.status, Some(400));
    }

    #[test]
    fn unclaimed_paths_fall_through_to_not_found() {
        let (session, _ui_id) = session_with_ui();
        let request = TestRequest::new("/totally/elsewhere", b"");
        let mut response = TestResponse::default();
        handle_request(&session, &default_handlers(), &request, &mut response).unwrap();
        assert_eq!(response.status, Some(404));
    }

    struct CollectingVariable {
        data: Arc<Mutex<Vec<u8>>>,
        dispose: bool,
    }

    impl StreamVariable for CollectingVariable {
        fn on_data(&mut self, chunk: &[u8]) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.data.lock().unwrap().extend_from_slice(chunk);
            Ok(())
        }

        fn is_disposed(&self) -> bool {
            self.dispose
        }
    }

    fn register_upload(
        session: &Session,
        ui_id: u64,
        dispose: bool,
    ) -> (crate::connector::ConnectorId, String, Arc<Mutex<Vec<u8>>>) {
        let mut state = session.lock();
        let ui = state.ui_mut(ui_id).unwrap();
        let root = ui.root_id().clone();
        let upload = ui.create_component("upload", boxed_state(EmptyState), Box::new(NoopLogic));
        ui.attach(&root, &upload).unwrap();
        let data = Arc::new(Mutex::new(Vec::new()));
        let seckey = ui
            .tracker_mut()
            .add_stream_variable(
                &upload,
                "file",
                Box::new(CollectingVariable {
                    data: data.clone(),
                    dispose,
                }),
            )
            .unwrap();
        (upload, seckey, data)
    }

    #[test]
    fn uploads_with_the_right_key_reach_the_variable() {
        let (session, ui_id) = session_with_ui();
        let (upload, seckey, data) = register_upload(&session, ui_id, false);
        let request = TestRequest::new(
            &format!("/upload/{ui_id}/{upload}/file/{seckey}"),
            b"file bytes",
        );
        let mut response = TestResponse::default();
        handle_request(&session, &default_handlers(), &request, &mut response).unwrap();
        assert_eq!(response.status, Some(200));
        assert_eq!(&*data.lock().unwrap(), b"file bytes");
        assert!(session
            .lock()
            .ui(ui_id)
            .unwrap()
            .tracker()
            .has_stream_variable(&upload, "file"));
    }

    #[test]
    fn uploads_with_a_wrong_key_are_rejected() {
        let (session, ui_id) = session_with_ui();
        let (upload, _seckey, data) = register_upload(&session, ui_id, false);
        let request = TestRequest::new(
            &format!("/upload/{ui_id}/{upload}/file/guessed-key"),
            b"file bytes",
        );
        let mut response = TestResponse::default();
        handle_request(&session, &default_handlers(), &request, &mut response).unwrap();
        assert_eq!(response.status, Some(403));
        assert!(data.lock().unwrap().is_empty());
    }

    #[test]
    fn disposed_variables_are_dropped_after_the_upload() {
        let (session, ui_id) = session_with_ui();
        let (upload, seckey, _data) = register_upload(&session, ui_id, true);
        let request = TestRequest::new(
            &format!("/upload/{ui_id}/{upload}/file/{seckey}"),
            b"x",
        );
        let mut response = TestResponse::default();
        handle_request(&session, &default_handlers(), &request, &mut response).unwrap();
        assert!(!session
            .lock()
            .ui(ui_id)
            .unwrap()
            .tracker()
            .has_stream_variable(&upload, "file"));
    }

    #[test]
    fn connector_requests_route_to_the_connector() {
        use crate::connector::ConnectorLogic;
        use crate::ui::ConnectorContext;

        struct ResourceLogic;

        impl ConnectorLogic for ResourceLogic {
            fn handle_connector_request(
                &mut self,
                _request: &dyn SyncRequest,
                response: &mut dyn SyncResponse,
                path: &str,
                _ctx: &mut ConnectorContext<'_>,
            ) -> bool {
                if path == "icon.png" {
                    response.set_status(200);
                    let _ = response.write_all(b"png");
                    true
                } else {
                    false
                }
            }
        }

        let (session, ui_id) = session_with_ui();
        let target = {
            let mut state = session.lock();
            let ui = state.ui_mut(ui_id).unwrap();
            let root = ui.root_id().clone();
            let target = ui.create_component("image", boxed_state(EmptyState), Box::new(ResourceLogic));
            ui.attach(&root, &target).unwrap();
            target
        };

        let request = TestRequest::new(&format!("/connector/{ui_id}/{target}/icon.png"), b"");
        let mut response = TestResponse::default();
        handle_request(&session, &default_handlers(), &request, &mut response).unwrap();
        assert_eq!(response.status, Some(200));
        assert_eq!(response.body, b"png");

        let request = TestRequest::new(&format!("/connector/{ui_id}/{target}/other.bin"), b"");
        let mut response = TestResponse::default();
        handle_request(&session, &default_handlers(), &request, &mut response).unwrap();
        assert_eq!(response.status, Some(404));

        let request = TestRequest::new(&format!("/connector/{ui_id}/9999/icon.png"), b"");
        let mut response = TestResponse::default();
        handle_request(&session, &default_handlers(), &request, &mut response).unwrap();
        assert_eq!(response.status, Some(404));
    }
}
