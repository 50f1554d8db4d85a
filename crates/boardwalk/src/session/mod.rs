pub mod error;

use std::any::Any;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

use crate::connector::ConnectorLogic;
use crate::session::error::{format_error_chain, ErrorHandler};
use crate::settings::SyncSettings;
use crate::state::SharedState;
use crate::ui::Ui;

pub type CloseListener =
    Box<dyn FnOnce(&mut SessionState) -> Result<(), Box<dyn std::error::Error + Send + Sync>> + Send>;

/// Aggregate of every close-listener failure collected during teardown. No
/// listener's failure prevents the others from running; the combined report
/// is raised once all of them had their chance.
#[derive(Debug, thiserror::Error)]
#[error("session teardown reported {} failure(s): {}", failures.len(), failures.join("; "))]
pub struct TeardownError {
    pub failures: Vec<String>,
}

/// One logical application session. Owns the mutual-exclusion lock guarding
/// every UI's connector tree, dirty set and diff baselines; any code path
/// that reads or mutates that state goes through [`Session::lock`].
pub struct Session {
    state: Mutex<SessionState>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SessionState::new()),
        }
    }

    /// Acquire the session lock, blocking until any concurrent request for
    /// this session releases it. Readers and writers serialize identically;
    /// the guard releases on every exit path, panics included.
    pub fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

pub struct SessionState {
    uis: HashMap<u64, Ui>,
    next_ui_id: u64,
    attributes: HashMap<String, Box<dyn Any + Send>>,
    error_handler: Option<Box<dyn ErrorHandler>>,
    csrf_token: String,
    close_listeners: Vec<CloseListener>,
    closing: bool,
    closed: bool,
    last_request: Instant,
}

impl SessionState {
    fn new() -> Self {
        Self {
            uis: HashMap::new(),
            next_ui_id: 0,
            attributes: HashMap::new(),
            error_handler: None,
            csrf_token: Uuid::new_v4().to_string(),
            close_listeners: Vec::new(),
            closing: false,
            closed: false,
            last_request: Instant::now(),
        }
    }

    // --- UIs

    pub fn create_ui(
        &mut self,
        root_type: &'static str,
        root_state: Box<dyn SharedState>,
        root_logic: Box<dyn ConnectorLogic>,
    ) -> u64 {
        self.next_ui_id += 1;
        let id = self.next_ui_id;
        self.uis.insert(id, Ui::new(id, root_type, root_state, root_logic));
        debug!(target = "boardwalk::session", ui = id, "ui created");
        id
    }

    pub fn ui(&self, id: u64) -> Option<&Ui> {
        self.uis.get(&id)
    }

    pub fn ui_mut(&mut self, id: u64) -> Option<&mut Ui> {
        self.uis.get_mut(&id)
    }

    pub fn ui_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.uis.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    // --- attributes

    pub fn set_attribute(&mut self, name: impl Into<String>, value: Box<dyn Any + Send>) {
        self.attributes.insert(name.into(), value);
    }

    pub fn attribute<T: 'static>(&self, name: &str) -> Option<&T> {
        self.attributes.get(name)?.downcast_ref()
    }

    pub fn attribute_mut<T: 'static>(&mut self, name: &str) -> Option<&mut T> {
        self.attributes.get_mut(name)?.downcast_mut()
    }

    pub fn remove_attribute(&mut self, name: &str) {
        self.attributes.remove(name);
    }

    // --- error handling

    pub fn set_error_handler(&mut self, handler: Box<dyn ErrorHandler>) {
        self.error_handler = Some(handler);
    }

    /// Disjoint borrows for the inbound pipeline, which routes handler
    /// failures through the session-level handler while holding the UI.
    pub(crate) fn ui_and_error_handler(
        &mut self,
        id: u64,
    ) -> (Option<&mut Ui>, Option<&mut (dyn ErrorHandler + '_)>) {
        let handler: Option<&mut (dyn ErrorHandler + '_)> = match &mut self.error_handler {
            Some(b) => Some(b.as_mut()),
            None => None,
        };
        (self.uis.get_mut(&id), handler)
    }

    // --- request bookkeeping

    pub fn csrf_token(&self) -> &str {
        &self.csrf_token
    }

    pub fn validate_csrf(&self, token: Option<&str>) -> bool {
        token == Some(self.csrf_token.as_str())
    }

    pub fn touch(&mut self) {
        self.last_request = Instant::now();
    }

    pub fn last_request_age(&self) -> Duration {
        self.last_request.elapsed()
    }

    /// Idle expiry is enforced by the container; this only evaluates it.
    pub fn is_idle_expired(&self, settings: &SyncSettings) -> bool {
        settings.close_idle_sessions && self.last_request_age() >= settings.session_idle_timeout
    }

    // --- teardown

    pub fn add_close_listener(&mut self, listener: CloseListener) {
        self.close_listeners.push(listener);
    }

    pub fn is_closing(&self) -> bool {
        self.closing
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Close the session: every close listener runs exactly once, every UI's
    /// connector tree goes through detach, and listener failures come back
    /// as one aggregated error after the teardown completed.
    pub fn close(&mut self) -> Result<(), TeardownError> {
        if self.closed {
            return Ok(());
        }
        self.closing = true;
        let listeners = std::mem::take(&mut self.close_listeners);
        let mut failures = Vec::new();
        for listener in listeners {
            if let Err(err) = listener(self) {
                failures.push(format_error_chain(err.as_ref()));
            }
        }
        let mut uis = std::mem::take(&mut self.uis);
        for (id, ui) in uis.iter_mut() {
            ui.tear_down();
            debug!(target = "boardwalk::session", ui = id, "ui torn down");
        }
        self.closing = false;
        self.closed = true;
        if failures.is_empty() {
            Ok(())
        } else {
            Err(TeardownError { failures })
        }
    }
}
