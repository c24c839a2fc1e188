//! The document being automated.
//!
//! [`Page`] is the narrow set of DOM capabilities the resolver and the
//! executors need. Node handles are borrowed from the live document for the
//! duration of one action; nothing here owns page state.

pub mod chrome;
pub mod memory;
mod selector;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::PageError;

pub use chrome::ChromePage;
pub use memory::{ElementSpec, MemoryPage, RecordedEvent, el};

/// Opaque handle to an element of the current document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeRef(pub u64);

/// Keyboard event details.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyInit {
    pub key: Option<&'static str>,
    pub code: Option<&'static str>,
    pub key_code: Option<u32>,
}

impl KeyInit {
    pub const ENTER: KeyInit = KeyInit {
        key: Some("Enter"),
        code: Some("Enter"),
        key_code: Some(13),
    };
}

/// Synthetic events the engine dispatches. All bubble and are cancelable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomEvent {
    Input,
    Change,
    KeyDown(KeyInit),
    KeyPress(KeyInit),
    KeyUp(KeyInit),
    /// A `MouseEvent('click')`, separate from the element's native `click()`.
    MouseClick,
}

impl DomEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DomEvent::Input => "input",
            DomEvent::Change => "change",
            DomEvent::KeyDown(_) => "keydown",
            DomEvent::KeyPress(_) => "keypress",
            DomEvent::KeyUp(_) => "keyup",
            DomEvent::MouseClick => "click",
        }
    }
}

/// Live subscription to document mutations (child list, subtree and
/// attributes). Dropping it disconnects the observer.
pub struct MutationObserver {
    rx: broadcast::Receiver<()>,
}

impl MutationObserver {
    pub fn new(rx: broadcast::Receiver<()>) -> Self {
        Self { rx }
    }

    /// Resolves on the next batch of mutations. A closed source never
    /// resolves, leaving the caller to its own deadline.
    pub async fn changed(&mut self) {
        loop {
            match self.rx.recv().await {
                Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => return,
                Err(broadcast::error::RecvError::Closed) => std::future::pending::<()>().await,
            }
        }
    }
}

/// DOM capabilities required by the automation core.
pub trait Page: Send + Sync {
    fn query_selector(&self, selector: &str) -> Result<Option<NodeRef>, PageError>;

    fn query_selector_all(&self, selector: &str) -> Result<Vec<NodeRef>, PageError>;

    /// First descendant of `root` matching `selector`.
    fn query_within(&self, root: NodeRef, selector: &str) -> Result<Option<NodeRef>, PageError>;

    fn matches(&self, node: NodeRef, selector: &str) -> Result<bool, PageError>;

    /// Nearest inclusive ancestor of `node` matching `selector`.
    fn closest(&self, node: NodeRef, selector: &str) -> Result<Option<NodeRef>, PageError>;

    fn element_by_id(&self, id: &str) -> Result<Option<NodeRef>, PageError>;

    fn next_element_sibling(&self, node: NodeRef) -> Result<Option<NodeRef>, PageError>;

    fn text_content(&self, node: NodeRef) -> Result<String, PageError>;

    fn attribute(&self, node: NodeRef, name: &str) -> Result<Option<String>, PageError>;

    /// The `value` property of form controls; `None` for other elements.
    fn value(&self, node: NodeRef) -> Result<Option<String>, PageError>;

    fn focus(&self, node: NodeRef) -> Result<(), PageError>;

    /// Writes `value` through the element prototype's own setter, bypassing
    /// any instance-level interceptor a framework installed. Fires no events.
    fn set_value_native(&self, node: NodeRef, value: &str) -> Result<(), PageError>;

    fn dispatch_event(&self, node: NodeRef, event: DomEvent) -> Result<(), PageError>;

    /// The element's native `click()`.
    fn click(&self, node: NodeRef) -> Result<(), PageError>;

    /// Smooth, centered `scrollIntoView`.
    fn scroll_into_view(&self, node: NodeRef) -> Result<(), PageError>;

    fn observe_mutations(&self) -> MutationObserver;

    fn url(&self) -> Result<String, PageError>;
}

/// Text a user would read on a clickable: `textContent`, or the `value` of
/// input buttons when there is none.
pub fn visible_text(page: &dyn Page, node: NodeRef) -> Result<String, PageError> {
    let text = page.text_content(node)?;
    if !text.is_empty() {
        return Ok(text);
    }
    Ok(page.value(node)?.unwrap_or_default())
}
