//! Value injection, key presses and clicks.

use std::time::Duration;

use tracing::debug;

use crate::error::PageError;
use crate::page::{DomEvent, KeyInit, NodeRef, Page};

/// Writes a field's value and notifies framework listeners.
///
/// Implementations update the value synchronously and then fire whatever
/// events make the page's change detection see it as typed input.
pub trait ValueSetter: Send + Sync {
    fn set_field_value(&self, page: &dyn Page, node: NodeRef, value: &str) -> Result<(), PageError>;
}

/// Uses the prototype's native `value` setter, then dispatches `input`,
/// `change`, `keydown`, `keypress` and `keyup` in that order.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeValueSetter;

impl ValueSetter for NativeValueSetter {
    fn set_field_value(&self, page: &dyn Page, node: NodeRef, value: &str) -> Result<(), PageError> {
        page.set_value_native(node, value)?;
        let plain = KeyInit::default();
        for event in [
            DomEvent::Input,
            DomEvent::Change,
            DomEvent::KeyDown(plain),
            DomEvent::KeyPress(plain),
            DomEvent::KeyUp(plain),
        ] {
            page.dispatch_event(node, event)?;
        }
        Ok(())
    }
}

/// Synthesizes an Enter keydown, keypress and keyup on `node`.
pub fn press_enter(page: &dyn Page, node: NodeRef) -> Result<(), PageError> {
    debug!(?node, "pressing Enter");
    for event in [
        DomEvent::KeyDown(KeyInit::ENTER),
        DomEvent::KeyPress(KeyInit::ENTER),
        DomEvent::KeyUp(KeyInit::ENTER),
    ] {
        page.dispatch_event(node, event)?;
    }
    Ok(())
}

/// Scrolls `node` into view, waits `settle` for layout, then fires the
/// native `click()` followed by a synthetic `MouseEvent('click')`.
pub async fn click_element(page: &dyn Page, node: NodeRef, settle: Duration) -> Result<(), PageError> {
    page.scroll_into_view(node)?;
    tokio::time::sleep(settle).await;
    page.click(node)?;
    page.dispatch_event(node, DomEvent::MouseClick)
}
