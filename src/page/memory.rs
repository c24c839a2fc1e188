//! In-process document used to drive the engine without a browser.
//!
//! The tree starts as `<html><body></body></html>` and is built with
//! [`el`] specs. Every structural or attribute change is broadcast to live
//! [`MutationObserver`]s, and every interaction the engine performs is
//! appended to an event log that callers can inspect.

use std::sync::{Mutex, MutexGuard};

use tokio::sync::broadcast;

use super::selector::{ElementTree, SelectorList};
use super::{DomEvent, MutationObserver, NodeRef, Page};
use crate::error::PageError;

const FORM_CONTROLS: [&str; 4] = ["input", "textarea", "select", "button"];

/// Declarative description of an element subtree.
#[derive(Debug, Clone, Default)]
pub struct ElementSpec {
    tag: String,
    attrs: Vec<(String, String)>,
    children: Vec<ChildSpec>,
}

#[derive(Debug, Clone)]
enum ChildSpec {
    Element(ElementSpec),
    Text(String),
}

/// Starts an [`ElementSpec`] for `tag`.
pub fn el(tag: &str) -> ElementSpec {
    ElementSpec {
        tag: tag.to_ascii_lowercase(),
        ..ElementSpec::default()
    }
}

impl ElementSpec {
    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.push((name.to_string(), value.to_string()));
        self
    }

    pub fn id(self, id: &str) -> Self {
        self.attr("id", id)
    }

    pub fn class(self, class: &str) -> Self {
        self.attr("class", class)
    }

    pub fn text(mut self, text: &str) -> Self {
        self.children.push(ChildSpec::Text(text.to_string()));
        self
    }

    pub fn child(mut self, child: ElementSpec) -> Self {
        self.children.push(ChildSpec::Element(child));
        self
    }
}

/// One interaction observed on the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub node: NodeRef,
    /// DOM event type, or `focus`, `native-click`, `scroll-into-view`.
    pub name: &'static str,
    pub key: Option<&'static str>,
}

#[derive(Debug)]
enum NodeKind {
    Document,
    Element(Element),
    Text(String),
}

#[derive(Debug)]
struct Element {
    tag: String,
    attrs: Vec<(String, String)>,
    value: Option<String>,
}

#[derive(Debug)]
struct Node {
    parent: Option<usize>,
    children: Vec<usize>,
    kind: NodeKind,
}

#[derive(Debug)]
struct Dom {
    nodes: Vec<Node>,
    body: usize,
    focused: Option<usize>,
    events: Vec<RecordedEvent>,
}

impl ElementTree for Dom {
    fn tag(&self, node: usize) -> Option<&str> {
        self.element(node).map(|e| e.tag.as_str())
    }

    fn attr(&self, node: usize, name: &str) -> Option<&str> {
        self.element(node)?
            .attrs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn parent(&self, node: usize) -> Option<usize> {
        self.nodes.get(node)?.parent
    }
}

impl Dom {
    fn new() -> Self {
        let mut dom = Self {
            nodes: vec![Node {
                parent: None,
                children: Vec::new(),
                kind: NodeKind::Document,
            }],
            body: 0,
            focused: None,
            events: Vec::new(),
        };
        let html = dom.insert(0, &el("html"));
        dom.body = dom.insert(html, &el("body"));
        dom
    }

    fn element(&self, node: usize) -> Option<&Element> {
        match &self.nodes.get(node)?.kind {
            NodeKind::Element(element) => Some(element),
            _ => None,
        }
    }

    fn element_mut(&mut self, node: usize) -> Option<&mut Element> {
        match &mut self.nodes.get_mut(node)?.kind {
            NodeKind::Element(element) => Some(element),
            _ => None,
        }
    }

    fn checked(&self, node: NodeRef) -> Result<usize, PageError> {
        let idx = usize::try_from(node.0).map_err(|_| PageError::StaleNode(node.0))?;
        if self.element(idx).is_none() || !self.connected(idx) {
            return Err(PageError::StaleNode(node.0));
        }
        Ok(idx)
    }

    /// Whether `node` is still reachable from the document.
    fn connected(&self, node: usize) -> bool {
        let mut cursor = Some(node);
        while let Some(idx) = cursor {
            if idx == 0 {
                return true;
            }
            cursor = self.nodes[idx].parent;
        }
        false
    }

    fn push_node(&mut self, parent: usize, kind: NodeKind) -> usize {
        let idx = self.nodes.len();
        self.nodes.push(Node {
            parent: Some(parent),
            children: Vec::new(),
            kind,
        });
        self.nodes[parent].children.push(idx);
        idx
    }

    fn insert(&mut self, parent: usize, spec: &ElementSpec) -> usize {
        let value = FORM_CONTROLS.contains(&spec.tag.as_str()).then(|| {
            spec.attrs
                .iter()
                .find(|(k, _)| k == "value")
                .map(|(_, v)| v.clone())
                .unwrap_or_default()
        });
        let idx = self.push_node(
            parent,
            NodeKind::Element(Element {
                tag: spec.tag.clone(),
                attrs: spec.attrs.clone(),
                value,
            }),
        );
        for child in &spec.children {
            match child {
                ChildSpec::Element(child) => {
                    self.insert(idx, child);
                }
                ChildSpec::Text(text) => {
                    self.push_node(idx, NodeKind::Text(text.clone()));
                }
            }
        }
        idx
    }

    /// Connected elements in document order, excluding `root` itself.
    fn descendants(&self, root: usize) -> Vec<usize> {
        let mut out = Vec::new();
        let mut stack: Vec<usize> = self.nodes[root].children.iter().rev().copied().collect();
        while let Some(idx) = stack.pop() {
            if self.element(idx).is_some() {
                out.push(idx);
            }
            stack.extend(self.nodes[idx].children.iter().rev());
        }
        out
    }

    fn text_of(&self, node: usize, out: &mut String) {
        match &self.nodes[node].kind {
            NodeKind::Text(text) => out.push_str(text),
            _ => {
                for &child in &self.nodes[node].children {
                    self.text_of(child, out);
                }
            }
        }
    }

    fn query_all_from(&self, root: usize, selector: &str) -> Result<Vec<NodeRef>, PageError> {
        let list = SelectorList::parse(selector)?;
        if root == 0 {
            if let Some(id) = list.id_only() {
                return Ok(self
                    .descendants(0)
                    .into_iter()
                    .find(|&idx| self.attr(idx, "id") == Some(id))
                    .map(|idx| NodeRef(idx as u64))
                    .into_iter()
                    .collect());
            }
        }
        Ok(self
            .descendants(root)
            .into_iter()
            .filter(|&idx| list.matches(self, idx))
            .map(|idx| NodeRef(idx as u64))
            .collect())
    }

    fn record(&mut self, node: NodeRef, name: &'static str, key: Option<&'static str>) {
        self.events.push(RecordedEvent { node, name, key });
    }
}

/// Thread-safe in-memory [`Page`].
#[derive(Debug)]
pub struct MemoryPage {
    url: Mutex<String>,
    dom: Mutex<Dom>,
    mutations: broadcast::Sender<()>,
}

impl Default for MemoryPage {
    fn default() -> Self {
        Self::new("about:blank")
    }
}

impl MemoryPage {
    pub fn new(url: &str) -> Self {
        let (mutations, _) = broadcast::channel(64);
        Self {
            url: Mutex::new(url.to_string()),
            dom: Mutex::new(Dom::new()),
            mutations,
        }
    }

    /// A page at `url` whose body holds `children`.
    pub fn with_body(url: &str, children: impl IntoIterator<Item = ElementSpec>) -> Self {
        let page = Self::new(url);
        for child in children {
            page.append(page.body(), child);
        }
        page
    }

    fn dom(&self) -> MutexGuard<'_, Dom> {
        self.dom.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn notify(&self) {
        // no receivers simply means nobody is observing
        let _ = self.mutations.send(());
    }

    pub fn body(&self) -> NodeRef {
        NodeRef(self.dom().body as u64)
    }

    pub fn set_url(&self, url: &str) {
        *self.url.lock().unwrap_or_else(|p| p.into_inner()) = url.to_string();
    }

    /// Appends `spec` under `parent` and returns the new element.
    pub fn append(&self, parent: NodeRef, spec: ElementSpec) -> NodeRef {
        let idx = {
            let mut dom = self.dom();
            let parent = usize::try_from(parent.0)
                .ok()
                .filter(|&p| p < dom.nodes.len())
                .unwrap_or(dom.body);
            dom.insert(parent, &spec)
        };
        self.notify();
        NodeRef(idx as u64)
    }

    /// Detaches `node` from the tree.
    pub fn remove(&self, node: NodeRef) {
        {
            let mut dom = self.dom();
            let Ok(idx) = dom.checked(node) else {
                return;
            };
            if let Some(parent) = dom.nodes[idx].parent.take() {
                dom.nodes[parent].children.retain(|&child| child != idx);
            }
        }
        self.notify();
    }

    pub fn set_attribute(&self, node: NodeRef, name: &str, value: &str) {
        {
            let mut dom = self.dom();
            let Ok(idx) = dom.checked(node) else {
                return;
            };
            if let Some(element) = dom.element_mut(idx) {
                match element.attrs.iter_mut().find(|(k, _)| k == name) {
                    Some(entry) => entry.1 = value.to_string(),
                    None => element.attrs.push((name.to_string(), value.to_string())),
                }
            }
        }
        self.notify();
    }

    /// Everything the engine did to the page so far, in order.
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.dom().events.clone()
    }

    /// Event names recorded against `node`, in order.
    pub fn event_names(&self, node: NodeRef) -> Vec<&'static str> {
        self.dom()
            .events
            .iter()
            .filter(|event| event.node == node)
            .map(|event| event.name)
            .collect()
    }

    pub fn clear_events(&self) {
        self.dom().events.clear();
    }

    pub fn focused(&self) -> Option<NodeRef> {
        self.dom().focused.map(|idx| NodeRef(idx as u64))
    }

    /// Number of mutation observers currently connected.
    pub fn live_observers(&self) -> usize {
        self.mutations.receiver_count()
    }
}

impl Page for MemoryPage {
    fn query_selector(&self, selector: &str) -> Result<Option<NodeRef>, PageError> {
        Ok(self.query_selector_all(selector)?.into_iter().next())
    }

    fn query_selector_all(&self, selector: &str) -> Result<Vec<NodeRef>, PageError> {
        self.dom().query_all_from(0, selector)
    }

    fn query_within(&self, root: NodeRef, selector: &str) -> Result<Option<NodeRef>, PageError> {
        let dom = self.dom();
        let root = dom.checked(root)?;
        Ok(dom.query_all_from(root, selector)?.into_iter().next())
    }

    fn matches(&self, node: NodeRef, selector: &str) -> Result<bool, PageError> {
        let dom = self.dom();
        let idx = dom.checked(node)?;
        Ok(SelectorList::parse(selector)?.matches(&*dom, idx))
    }

    fn closest(&self, node: NodeRef, selector: &str) -> Result<Option<NodeRef>, PageError> {
        let dom = self.dom();
        let list = SelectorList::parse(selector)?;
        let mut cursor = Some(dom.checked(node)?);
        while let Some(idx) = cursor {
            if list.matches(&*dom, idx) {
                return Ok(Some(NodeRef(idx as u64)));
            }
            cursor = dom.parent(idx);
        }
        Ok(None)
    }

    fn element_by_id(&self, id: &str) -> Result<Option<NodeRef>, PageError> {
        let dom = self.dom();
        Ok(dom
            .descendants(0)
            .into_iter()
            .find(|&idx| dom.attr(idx, "id") == Some(id))
            .map(|idx| NodeRef(idx as u64)))
    }

    fn next_element_sibling(&self, node: NodeRef) -> Result<Option<NodeRef>, PageError> {
        let dom = self.dom();
        let idx = dom.checked(node)?;
        let Some(parent) = dom.nodes[idx].parent else {
            return Ok(None);
        };
        Ok(dom.nodes[parent]
            .children
            .iter()
            .skip_while(|&&child| child != idx)
            .skip(1)
            .find(|&&child| dom.element(child).is_some())
            .map(|&child| NodeRef(child as u64)))
    }

    fn text_content(&self, node: NodeRef) -> Result<String, PageError> {
        let dom = self.dom();
        let idx = dom.checked(node)?;
        let mut out = String::new();
        dom.text_of(idx, &mut out);
        Ok(out)
    }

    fn attribute(&self, node: NodeRef, name: &str) -> Result<Option<String>, PageError> {
        let dom = self.dom();
        let idx = dom.checked(node)?;
        Ok(dom.attr(idx, name).map(String::from))
    }

    fn value(&self, node: NodeRef) -> Result<Option<String>, PageError> {
        let dom = self.dom();
        let idx = dom.checked(node)?;
        Ok(dom.element(idx).and_then(|e| e.value.clone()))
    }

    fn focus(&self, node: NodeRef) -> Result<(), PageError> {
        let mut dom = self.dom();
        let idx = dom.checked(node)?;
        dom.focused = Some(idx);
        dom.record(node, "focus", None);
        Ok(())
    }

    fn set_value_native(&self, node: NodeRef, value: &str) -> Result<(), PageError> {
        let mut dom = self.dom();
        let idx = dom.checked(node)?;
        if let Some(element) = dom.element_mut(idx) {
            element.value = Some(value.to_string());
        }
        Ok(())
    }

    fn dispatch_event(&self, node: NodeRef, event: DomEvent) -> Result<(), PageError> {
        let mut dom = self.dom();
        dom.checked(node)?;
        let key = match event {
            DomEvent::KeyDown(init) | DomEvent::KeyPress(init) | DomEvent::KeyUp(init) => init.key,
            _ => None,
        };
        dom.record(node, event.name(), key);
        Ok(())
    }

    fn click(&self, node: NodeRef) -> Result<(), PageError> {
        let mut dom = self.dom();
        dom.checked(node)?;
        dom.record(node, "native-click", None);
        Ok(())
    }

    fn scroll_into_view(&self, node: NodeRef) -> Result<(), PageError> {
        let mut dom = self.dom();
        dom.checked(node)?;
        dom.record(node, "scroll-into-view", None);
        Ok(())
    }

    fn observe_mutations(&self) -> MutationObserver {
        MutationObserver::new(self.mutations.subscribe())
    }

    fn url(&self) -> Result<String, PageError> {
        Ok(self.url.lock().unwrap_or_else(|p| p.into_inner()).clone())
    }
}
