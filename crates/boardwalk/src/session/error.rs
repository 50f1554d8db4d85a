use std::error::Error;
use std::fmt::Write as _;

use tracing::error;

use crate::connector::ConnectorId;

/// One routed error, carrying the originating connector when the failure is
/// attributable to one.
pub struct ErrorEvent<'a> {
    connector: Option<&'a ConnectorId>,
    error: &'a (dyn Error + 'static),
}

impl<'a> ErrorEvent<'a> {
    pub fn new(connector: Option<&'a ConnectorId>, error: &'a (dyn Error + 'static)) -> Self {
        Self { connector, error }
    }

    pub fn connector(&self) -> Option<&ConnectorId> {
        self.connector
    }

    pub fn error(&self) -> &(dyn Error + 'static) {
        self.error
    }

    pub fn chain(&self) -> String {
        format_error_chain(self.error)
    }
}

/// Receiver in the connector-aware error chain: the originating connector's
/// handler, else the nearest ancestor's, else the session's, else the
/// default handler.
pub trait ErrorHandler: Send {
    fn error(&mut self, event: &ErrorEvent<'_>);
}

/// Fallback handler: logs the full error chain. The response pipeline
/// attaches the component-level error message separately when the error is
/// traceable to a connector.
#[derive(Debug, Default)]
pub struct DefaultErrorHandler;

impl ErrorHandler for DefaultErrorHandler {
    fn error(&mut self, event: &ErrorEvent<'_>) {
        match event.connector() {
            Some(connector) => error!(
                target = "boardwalk::error",
                connector = %connector,
                "unhandled error: {}",
                event.chain()
            ),
            None => error!(target = "boardwalk::error", "unhandled error: {}", event.chain()),
        }
    }
}

/// Render an error and its source chain into one line.
pub fn format_error_chain(error: &(dyn Error + 'static)) -> String {
    let mut out = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let _ = write!(out, "; caused by: {cause}");
        source = cause.source();
    }
    out
}
