use std::collections::HashMap;
use std::time::Duration;

use tracing::warn;

use crate::connector::ConnectorLogic;
use crate::session::SessionState;
use crate::state::SharedState;

pub const PARAM_HEARTBEAT_INTERVAL: &str = "heartbeatInterval";
pub const PARAM_CLOSE_IDLE_SESSIONS: &str = "closeIdleSessions";
pub const PARAM_SESSION_IDLE_TIMEOUT: &str = "sessionIdleTimeout";
pub const PARAM_ROOT_UI: &str = "rootUi";

const DEFAULT_HEARTBEAT_SECS: u64 = 300;
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 1800;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("no root ui configured")]
    MissingRootUi,
    #[error("configured root ui '{0}' is not registered")]
    UnknownRootUi(String),
}

/// Deployment-level knobs parsed from the container's init parameter map.
/// Bad numeric values log a descriptive warning and keep the default; a
/// missing or unresolvable root UI has no safe default and fails at startup
/// when the registry is consulted.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSettings {
    pub heartbeat_interval: Duration,
    pub close_idle_sessions: bool,
    pub session_idle_timeout: Duration,
    pub root_ui: Option<String>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_SECS),
            close_idle_sessions: false,
            session_idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
            root_ui: None,
        }
    }
}

impl SyncSettings {
    pub fn from_params(params: &HashMap<String, String>) -> Self {
        let mut settings = Self::default();
        if let Some(raw) = params.get(PARAM_HEARTBEAT_INTERVAL) {
            match raw.trim().parse::<u64>() {
                Ok(secs) => settings.heartbeat_interval = Duration::from_secs(secs),
                Err(_) => warn!(
                    target = "boardwalk::settings",
                    value = %raw,
                    "ignoring invalid {PARAM_HEARTBEAT_INTERVAL}, keeping {DEFAULT_HEARTBEAT_SECS}s"
                ),
            }
        }
        if let Some(raw) = params.get(PARAM_SESSION_IDLE_TIMEOUT) {
            match raw.trim().parse::<u64>() {
                Ok(secs) => settings.session_idle_timeout = Duration::from_secs(secs),
                Err(_) => warn!(
                    target = "boardwalk::settings",
                    value = %raw,
                    "ignoring invalid {PARAM_SESSION_IDLE_TIMEOUT}, keeping {DEFAULT_IDLE_TIMEOUT_SECS}s"
                ),
            }
        }
        if let Some(raw) = params.get(PARAM_CLOSE_IDLE_SESSIONS) {
            settings.close_idle_sessions = parse_flag(raw);
        }
        settings.root_ui = params.get(PARAM_ROOT_UI).map(|raw| raw.trim().to_string());
        settings
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Produces the root connector parts for one freshly created UI.
pub type UiFactory =
    Box<dyn Fn() -> (&'static str, Box<dyn SharedState>, Box<dyn ConnectorLogic>) + Send + Sync>;

/// Startup-time registry of root UI factories by configured name.
#[derive(Default)]
pub struct UiFactoryRegistry {
    factories: HashMap<String, UiFactory>,
}

impl UiFactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, factory: UiFactory) {
        self.factories.insert(name.into(), factory);
    }

    pub fn resolve(&self, settings: &SyncSettings) -> Result<&UiFactory, SettingsError> {
        let name = settings.root_ui.as_deref().ok_or(SettingsError::MissingRootUi)?;
        self.factories
            .get(name)
            .ok_or_else(|| SettingsError::UnknownRootUi(name.to_string()))
    }

    /// Create a UI in `state` from the configured root factory.
    pub fn instantiate(
        &self,
        settings: &SyncSettings,
        state: &mut SessionState,
    ) -> Result<u64, SettingsError> {
        let factory = self.resolve(settings)?;
        let (type_name, root_state, root_logic) = factory();
        Ok(state.create_ui(type_name, root_state, root_logic))
    }
}
