pub mod logic;

use std::fmt;

use crate::state::SharedState;

pub use logic::ConnectorLogic;

/// Process-unique wire identity of a connector. Assigned by the tracker from
/// an incrementing counter on registration and stable for the connector's
/// whole lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectorId(String);

impl ConnectorId {
    pub(crate) fn new(raw: u64) -> Self {
        ConnectorId(raw.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric ordering key; ids we assign are always numeric, but a foreign
    /// string sorts last rather than panicking.
    pub(crate) fn order_key(&self) -> u64 {
        self.0.parse().unwrap_or(u64::MAX)
    }
}

impl fmt::Display for ConnectorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectorId {
    fn from(raw: &str) -> Self {
        ConnectorId(raw.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectorRole {
    UiRoot,
    Component,
    Extension,
}

/// Which parents an extension accepts. Checked when the extension is added;
/// violations are invalid-argument errors naming both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentSpec {
    AnyConnector,
    Role(ConnectorRole),
    Named(&'static str),
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error("connector {0} is not registered")]
    NotFound(ConnectorId),
    #[error("extension {extension} was already attached once and cannot extend {parent}")]
    ExtensionReattach {
        extension: ConnectorId,
        parent: ConnectorId,
    },
    #[error("{parent_type} {parent} cannot host extension {extension_type} {extension}")]
    UnsupportedParent {
        extension: ConnectorId,
        extension_type: &'static str,
        parent: ConnectorId,
        parent_type: &'static str,
    },
    #[error("connector {connector} already has parent {parent}")]
    ParentAlreadySet {
        connector: ConnectorId,
        parent: ConnectorId,
    },
    #[error("attaching {connector} would create a cycle")]
    WouldCycle { connector: ConnectorId },
    #[error("connector {connector} has role {role:?}, expected {expected:?}")]
    RoleMismatch {
        connector: ConnectorId,
        role: ConnectorRole,
        expected: ConnectorRole,
    },
    #[error("connector {connector} state is not a {expected}")]
    StateTypeMismatch {
        connector: ConnectorId,
        expected: &'static str,
    },
}

/// One node of the connector tree. A single concrete record covers root,
/// component and extension connectors; role-specific rules are explicit
/// validation functions rather than subtypes.
pub struct Connector {
    pub(crate) id: ConnectorId,
    pub(crate) role: ConnectorRole,
    pub(crate) type_name: &'static str,
    pub(crate) parent: Option<ConnectorId>,
    pub(crate) children: Vec<ConnectorId>,
    pub(crate) extensions: Vec<ConnectorId>,
    pub(crate) attached: bool,
    /// One-way latch: set the first time the connector gains a parent.
    /// Extensions that have tripped it can never be re-parented.
    pub(crate) previously_attached: bool,
    pub(crate) enabled: bool,
    pub(crate) supported_parent: ParentSpec,
    pub(crate) state: Box<dyn SharedState>,
    pub(crate) component_error: Option<String>,
}

impl Connector {
    pub(crate) fn new(
        id: ConnectorId,
        role: ConnectorRole,
        type_name: &'static str,
        state: Box<dyn SharedState>,
    ) -> Self {
        Self {
            id,
            role,
            type_name,
            parent: None,
            children: Vec::new(),
            extensions: Vec::new(),
            attached: false,
            previously_attached: false,
            enabled: true,
            supported_parent: ParentSpec::AnyConnector,
            state,
            component_error: None,
        }
    }

    pub fn id(&self) -> &ConnectorId {
        &self.id
    }

    pub fn role(&self) -> ConnectorRole {
        self.role
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn parent(&self) -> Option<&ConnectorId> {
        self.parent.as_ref()
    }

    pub fn children(&self) -> &[ConnectorId] {
        &self.children
    }

    /// Read-only view; mutation goes through the tree operations.
    pub fn extensions(&self) -> &[ConnectorId] {
        &self.extensions
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn component_error(&self) -> Option<&str> {
        self.component_error.as_deref()
    }

    pub fn state(&self) -> &dyn SharedState {
        self.state.as_ref()
    }
}

/// Reject hosting `extension` under a parent it does not support.
pub(crate) fn check_supported_parent(
    extension: &Connector,
    parent: &Connector,
) -> Result<(), ConnectorError> {
    let accepted = match extension.supported_parent {
        ParentSpec::AnyConnector => parent.role != ConnectorRole::Extension,
        ParentSpec::Role(role) => parent.role == role,
        ParentSpec::Named(name) => parent.type_name == name,
    };
    if accepted {
        Ok(())
    } else {
        Err(ConnectorError::UnsupportedParent {
            extension: extension.id.clone(),
            extension_type: extension.type_name,
            parent: parent.id.clone(),
            parent_type: parent.type_name,
        })
    }
}

/// Reject moving an extension that has ever been attached.
pub(crate) fn check_extension_latch(
    extension: &Connector,
    parent: &ConnectorId,
) -> Result<(), ConnectorError> {
    if extension.previously_attached {
        return Err(ConnectorError::ExtensionReattach {
            extension: extension.id.clone(),
            parent: parent.clone(),
        });
    }
    Ok(())
}
