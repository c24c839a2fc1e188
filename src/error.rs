use std::time::Duration;

use thiserror::Error;

/// Failures raised by a [`crate::page::Page`] backend.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PageError {
    /// The selector could not be parsed (or the browser rejected it).
    #[error("Invalid selector: {0}")]
    InvalidSelector(String),

    /// The node handle no longer refers to an element in the document.
    #[error("Stale node reference: {0}")]
    StaleNode(u64),

    /// Transport or evaluation failure in the underlying browser.
    #[error("Page backend error: {0}")]
    Backend(String),
}

/// Errors surfaced inside the automation pipeline. They never escape
/// [`crate::engine::AutomationEngine::handle_command`]; the dispatcher turns
/// them into failed [`crate::engine::ActionResult`]s.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AutomationError {
    #[error(transparent)]
    Page(#[from] PageError),

    #[error("Element not found within {}ms: {target}", .timeout.as_millis())]
    ElementTimeout { target: String, timeout: Duration },

    #[error("Missing parameter: {0}")]
    MissingParam(&'static str),
}

pub type Result<T, E = AutomationError> = std::result::Result<T, E>;
