//! [`Page`] backed by a live Chrome tab.
//!
//! Each call evaluates a short script in the tab. Elements handed out as
//! [`NodeRef`]s are tagged with a `data-vynce-ref` attribute so later calls
//! can find them again; a tag whose element was removed reports
//! [`PageError::StaleNode`].
//!
//! CDP calls block, so they run under `tokio::task::block_in_place`; use a
//! multi-threaded runtime.

use std::sync::{Arc, Weak};

use headless_chrome::Tab;
use headless_chrome::browser::tab::EventListener;
use headless_chrome::protocol::cdp::types::Event;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::{DomEvent, MutationObserver, NodeRef, Page};
use crate::error::PageError;

type SyncSendEvent = dyn EventListener<Event> + Send + Sync;

/// Installed once per document; hands out and resolves element tags.
const PRELUDE: &str = r#"
const __vy = window.__vynce || (window.__vynce = {
  seq: 0,
  ref(el) {
    if (!el) return null;
    let r = el.getAttribute('data-vynce-ref');
    if (!r) {
      r = String(++this.seq);
      el.setAttribute('data-vynce-ref', r);
    }
    return Number(r);
  },
  need(r) {
    const el = document.querySelector('[data-vynce-ref="' + r + '"]');
    if (!el) throw { stale: r };
    return el;
  },
});
"#;

#[derive(Debug, Deserialize)]
struct ScriptReply {
    #[serde(default)]
    ok: serde_json::Value,
    err: Option<String>,
    #[serde(default)]
    syntax: bool,
    stale: Option<u64>,
}

pub struct ChromePage {
    tab: Arc<Tab>,
    mutations: broadcast::Sender<()>,
    listener: Option<Weak<SyncSendEvent>>,
}

impl ChromePage {
    /// Wraps `tab` and starts forwarding DOM mutation events to observers.
    pub fn new(tab: Arc<Tab>) -> Self {
        let (mutations, _) = broadcast::channel(64);

        // DOM domain events only flow once the document has been requested.
        if let Err(err) = tab.get_document() {
            warn!("DOM events unavailable, element waits will poll only: {}", err);
        }

        let sender = mutations.clone();
        let forward: Arc<SyncSendEvent> = Arc::new(move |event: &Event| {
            if matches!(
                event,
                Event::DOMChildNodeInserted(_)
                    | Event::DOMChildNodeRemoved(_)
                    | Event::DOMChildNodeCountUpdated(_)
                    | Event::DOMAttributeModified(_)
            ) {
                let _ = sender.send(());
            }
        });
        let listener = match tab.add_event_listener(forward) {
            Ok(handle) => Some(handle),
            Err(err) => {
                warn!("could not subscribe to DOM events: {}", err);
                None
            }
        };

        Self {
            tab,
            mutations,
            listener,
        }
    }

    fn run<T: DeserializeOwned>(&self, body: &str) -> Result<T, PageError> {
        let script = format!(
            "(() => {{ {PRELUDE} try {{ const out = (() => {{ {body} }})(); \
             return JSON.stringify({{ ok: out === undefined ? null : out }}); }} \
             catch (e) {{ return JSON.stringify(e && e.stale !== undefined \
             ? {{ stale: e.stale }} \
             : {{ err: String((e && e.message) || e), syntax: !!(e && e.name === 'SyntaxError') }}); }} }})()"
        );

        let result = tokio::task::block_in_place(|| self.tab.evaluate(&script, false))
            .map_err(|e| PageError::Backend(e.to_string()))?;
        let raw = result
            .value
            .and_then(|v| v.as_str().map(String::from))
            .ok_or_else(|| PageError::Backend("script returned no value".to_string()))?;

        let reply: ScriptReply =
            serde_json::from_str(&raw).map_err(|e| PageError::Backend(e.to_string()))?;
        if let Some(stale) = reply.stale {
            return Err(PageError::StaleNode(stale));
        }
        if let Some(err) = reply.err {
            debug!("page script failed: {}", err);
            return Err(if reply.syntax {
                PageError::InvalidSelector(err)
            } else {
                PageError::Backend(err)
            });
        }
        serde_json::from_value(reply.ok).map_err(|e| PageError::Backend(e.to_string()))
    }
}

impl Drop for ChromePage {
    fn drop(&mut self) {
        if let Some(listener) = &self.listener {
            let _ = self.tab.remove_event_listener(listener);
        }
    }
}

/// JSON-encodes `s` into a JavaScript string literal.
fn js(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

fn event_script(event: DomEvent) -> String {
    let base = "bubbles: true, cancelable: true";
    match event {
        DomEvent::Input | DomEvent::Change => {
            format!("new Event({}, {{ {base} }})", js(event.name()))
        }
        DomEvent::KeyDown(init) | DomEvent::KeyPress(init) | DomEvent::KeyUp(init) => {
            let mut fields = vec![base.to_string()];
            if let Some(key) = init.key {
                fields.push(format!("key: {}", js(key)));
            }
            if let Some(code) = init.code {
                fields.push(format!("code: {}", js(code)));
            }
            if let Some(key_code) = init.key_code {
                fields.push(format!("keyCode: {key_code}, which: {key_code}"));
            }
            format!("new KeyboardEvent({}, {{ {} }})", js(event.name()), fields.join(", "))
        }
        DomEvent::MouseClick => format!("new MouseEvent('click', {{ {base}, view: window }})"),
    }
}

impl Page for ChromePage {
    fn query_selector(&self, selector: &str) -> Result<Option<NodeRef>, PageError> {
        let r: Option<u64> = self.run(&format!(
            "return __vy.ref(document.querySelector({}));",
            js(selector)
        ))?;
        Ok(r.map(NodeRef))
    }

    fn query_selector_all(&self, selector: &str) -> Result<Vec<NodeRef>, PageError> {
        let refs: Vec<u64> = self.run(&format!(
            "return Array.from(document.querySelectorAll({}), el => __vy.ref(el));",
            js(selector)
        ))?;
        Ok(refs.into_iter().map(NodeRef).collect())
    }

    fn query_within(&self, root: NodeRef, selector: &str) -> Result<Option<NodeRef>, PageError> {
        let r: Option<u64> = self.run(&format!(
            "return __vy.ref(__vy.need({}).querySelector({}));",
            root.0,
            js(selector)
        ))?;
        Ok(r.map(NodeRef))
    }

    fn matches(&self, node: NodeRef, selector: &str) -> Result<bool, PageError> {
        self.run(&format!(
            "return __vy.need({}).matches({});",
            node.0,
            js(selector)
        ))
    }

    fn closest(&self, node: NodeRef, selector: &str) -> Result<Option<NodeRef>, PageError> {
        let r: Option<u64> = self.run(&format!(
            "return __vy.ref(__vy.need({}).closest({}));",
            node.0,
            js(selector)
        ))?;
        Ok(r.map(NodeRef))
    }

    fn element_by_id(&self, id: &str) -> Result<Option<NodeRef>, PageError> {
        let r: Option<u64> = self.run(&format!(
            "return __vy.ref(document.getElementById({}));",
            js(id)
        ))?;
        Ok(r.map(NodeRef))
    }

    fn next_element_sibling(&self, node: NodeRef) -> Result<Option<NodeRef>, PageError> {
        let r: Option<u64> = self.run(&format!(
            "return __vy.ref(__vy.need({}).nextElementSibling);",
            node.0
        ))?;
        Ok(r.map(NodeRef))
    }

    fn text_content(&self, node: NodeRef) -> Result<String, PageError> {
        self.run(&format!("return __vy.need({}).textContent || '';", node.0))
    }

    fn attribute(&self, node: NodeRef, name: &str) -> Result<Option<String>, PageError> {
        self.run(&format!(
            "return __vy.need({}).getAttribute({});",
            node.0,
            js(name)
        ))
    }

    fn value(&self, node: NodeRef) -> Result<Option<String>, PageError> {
        self.run(&format!(
            "const el = __vy.need({});
             const control = el instanceof HTMLInputElement || el instanceof HTMLTextAreaElement
               || el instanceof HTMLSelectElement || el instanceof HTMLButtonElement;
             return control ? el.value : null;",
            node.0
        ))
    }

    fn focus(&self, node: NodeRef) -> Result<(), PageError> {
        self.run(&format!("__vy.need({}).focus();", node.0))
    }

    fn set_value_native(&self, node: NodeRef, value: &str) -> Result<(), PageError> {
        // Call the prototype's setter so React/Vue instance interceptors are skipped.
        self.run(&format!(
            "const el = __vy.need({});
             const proto = el instanceof HTMLInputElement ? HTMLInputElement.prototype
               : el instanceof HTMLTextAreaElement ? HTMLTextAreaElement.prototype : null;
             if (proto) {{
               Object.getOwnPropertyDescriptor(proto, 'value').set.call(el, {value});
             }} else {{
               el.value = {value};
             }}",
            node.0,
            value = js(value)
        ))
    }

    fn dispatch_event(&self, node: NodeRef, event: DomEvent) -> Result<(), PageError> {
        self.run(&format!(
            "__vy.need({}).dispatchEvent({});",
            node.0,
            event_script(event)
        ))
    }

    fn click(&self, node: NodeRef) -> Result<(), PageError> {
        self.run(&format!("__vy.need({}).click();", node.0))
    }

    fn scroll_into_view(&self, node: NodeRef) -> Result<(), PageError> {
        self.run(&format!(
            "__vy.need({}).scrollIntoView({{ behavior: 'smooth', block: 'center' }});",
            node.0
        ))
    }

    fn observe_mutations(&self) -> MutationObserver {
        MutationObserver::new(self.mutations.subscribe())
    }

    fn url(&self) -> Result<String, PageError> {
        Ok(self.tab.get_url())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::KeyInit;

    #[test]
    fn js_literals_are_escaped() {
        assert_eq!(js(r#"a"b'c"#), r#""a\"b'c""#);
    }

    #[test]
    fn keyboard_events_carry_enter_details() {
        let script = event_script(DomEvent::KeyDown(KeyInit::ENTER));
        assert!(script.starts_with("new KeyboardEvent(\"keydown\""));
        assert!(script.contains("key: \"Enter\""));
        assert!(script.contains("keyCode: 13, which: 13"));
    }

    #[test]
    fn plain_events_bubble() {
        assert_eq!(
            event_script(DomEvent::Input),
            "new Event(\"input\", { bubbles: true, cancelable: true })"
        );
        assert!(event_script(DomEvent::MouseClick).contains("view: window"));
    }
}
