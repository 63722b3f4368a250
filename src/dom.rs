// In-memory replica of the host document.
// Backs the headless `civlink run` mode and the test suite: elements answer
// to the selectors they were registered with, and every mutation is written
// to a shared journal that callers can inspect.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::Selectors;
use crate::host::{ClickListener, ElementRef, HostElement, HostRoot, Notification};

/// Observable mutation of the replica document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomEvent {
    ValueSet { element: String, value: String },
    Input { element: String },
    Click { element: String },
    ClassSet { element: String, class: String, enabled: bool },
    Appended { element: String },
    Inserted { element: String, before: String },
    LocationReplaced { url: String },
    Notified(Notification),
    WindowOpened { url: String },
}

type Journal = Mutex<Vec<DomEvent>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panicking listener must not take the whole document down with it
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn record(journal: &Journal, event: DomEvent) {
    tracing::debug!(?event, "dom");
    lock(journal).push(event);
}

/// Description of an element to insert into a [`Document`]
#[derive(Debug, Clone, Default)]
pub struct ElementSpec {
    id: Option<String>,
    classes: Vec<String>,
    aliases: Vec<String>,
    attributes: Vec<(String, String)>,
}

impl ElementSpec {
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    /// An element that answers to an arbitrary selector string verbatim
    pub fn matching(selector: impl Into<String>) -> Self {
        Self {
            aliases: vec![selector.into()],
            ..Self::default()
        }
    }

    pub fn class(mut self, class: impl Into<String>) -> Self {
        self.classes.push(class.into());
        self
    }

    pub fn alias(mut self, selector: impl Into<String>) -> Self {
        self.aliases.push(selector.into());
        self
    }

    pub fn attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((name.into(), value.into()));
        self
    }
}

#[derive(Default)]
struct NodeState {
    value: String,
    classes: BTreeSet<String>,
    attributes: BTreeMap<String, String>,
    listeners: Vec<ClickListener>,
}

/// Element of the replica document
pub struct Node {
    label: String,
    id: Option<String>,
    aliases: Vec<String>,
    journal: Arc<Journal>,
    state: Mutex<NodeState>,
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("Node")
            .field("label", &self.label)
            .field("value", &state.value)
            .field("classes", &state.classes)
            .finish()
    }
}

impl Node {
    pub fn label(&self) -> &str {
        &self.label
    }

    fn matches(&self, selector: &str) -> bool {
        if self.aliases.iter().any(|alias| alias == selector) {
            return true;
        }
        if selector.contains(char::is_whitespace) {
            return false;
        }
        if let Some(id) = selector.strip_prefix('#') {
            return self.id.as_deref() == Some(id);
        }
        if selector.starts_with('.') {
            let state = lock(&self.state);
            return selector
                .split('.')
                .filter(|class| !class.is_empty())
                .all(|class| state.classes.contains(class));
        }
        false
    }
}

impl HostElement for Node {
    fn value(&self) -> String {
        lock(&self.state).value.clone()
    }

    fn set_value(&self, value: &str) {
        lock(&self.state).value = value.to_string();
        record(
            &self.journal,
            DomEvent::ValueSet {
                element: self.label.clone(),
                value: value.to_string(),
            },
        );
    }

    fn dispatch_input(&self) {
        record(
            &self.journal,
            DomEvent::Input {
                element: self.label.clone(),
            },
        );
    }

    fn click(&self) {
        record(
            &self.journal,
            DomEvent::Click {
                element: self.label.clone(),
            },
        );
        let listeners = lock(&self.state).listeners.clone();
        for listener in listeners {
            listener();
        }
    }

    fn set_class(&self, class: &str, enabled: bool) {
        {
            let mut state = lock(&self.state);
            if enabled {
                state.classes.insert(class.to_string());
            } else {
                state.classes.remove(class);
            }
        }
        record(
            &self.journal,
            DomEvent::ClassSet {
                element: self.label.clone(),
                class: class.to_string(),
                enabled,
            },
        );
    }

    fn has_class(&self, class: &str) -> bool {
        lock(&self.state).classes.contains(class)
    }

    fn attribute(&self, name: &str) -> Option<String> {
        lock(&self.state).attributes.get(name).cloned()
    }

    fn set_attribute(&self, name: &str, value: &str) {
        lock(&self.state)
            .attributes
            .insert(name.to_string(), value.to_string());
    }

    fn add_click_listener(&self, listener: ClickListener) {
        lock(&self.state).listeners.push(listener);
    }
}

struct DocumentInner {
    nodes: Mutex<Vec<Arc<Node>>>,
    journal: Arc<Journal>,
    location: Mutex<String>,
    next_anonymous: AtomicU64,
}

/// Cheaply cloneable in-memory host document
#[derive(Clone)]
pub struct Document {
    inner: Arc<DocumentInner>,
}

impl Document {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(DocumentInner {
                nodes: Mutex::new(Vec::new()),
                journal: Arc::new(Mutex::new(Vec::new())),
                location: Mutex::new(location.into()),
                next_anonymous: AtomicU64::new(0),
            }),
        }
    }

    /// A document carrying every control the bridge drives, keyed by the
    /// configured selectors
    pub fn gradio_replica(selectors: &Selectors, location: impl Into<String>) -> Self {
        let doc = Self::new(location);
        doc.insert(ElementSpec::matching(&selectors.container));
        doc.insert(ElementSpec::matching(&selectors.prompt));
        doc.insert(ElementSpec::matching(&selectors.paste));
        doc.insert(ElementSpec::matching(&selectors.generate));
        doc.insert(ElementSpec::matching(&selectors.refresh_models));
        doc
    }

    pub fn insert(&self, spec: ElementSpec) -> Arc<Node> {
        let node = self.build(spec);
        lock(&self.inner.nodes).push(Arc::clone(&node));
        node
    }

    /// Remove every element matching `selector`; returns how many went away
    pub fn remove(&self, selector: &str) -> usize {
        let mut nodes = lock(&self.inner.nodes);
        let before = nodes.len();
        nodes.retain(|node| !node.matches(selector));
        before - nodes.len()
    }

    /// Snapshot of the journal
    pub fn events(&self) -> Vec<DomEvent> {
        lock(&self.inner.journal).clone()
    }

    pub fn clear_events(&self) {
        lock(&self.inner.journal).clear();
    }

    /// Number of clicks recorded against the element labelled `element`
    pub fn clicks(&self, element: &str) -> usize {
        lock(&self.inner.journal)
            .iter()
            .filter(|event| matches!(event, DomEvent::Click { element: e } if e == element))
            .count()
    }

    /// Number of class changes recorded against the element labelled `element`
    pub fn class_changes(&self, element: &str) -> usize {
        lock(&self.inner.journal)
            .iter()
            .filter(|event| matches!(event, DomEvent::ClassSet { element: e, .. } if e == element))
            .count()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        lock(&self.inner.journal)
            .iter()
            .filter_map(|event| match event {
                DomEvent::Notified(notification) => Some(notification.clone()),
                _ => None,
            })
            .collect()
    }

    fn build(&self, spec: ElementSpec) -> Arc<Node> {
        let label = match (&spec.id, spec.aliases.first()) {
            (Some(id), _) => format!("#{id}"),
            (None, Some(alias)) => alias.clone(),
            (None, None) => {
                let n = self.inner.next_anonymous.fetch_add(1, Ordering::Relaxed);
                format!("element-{n}")
            }
        };
        let state = NodeState {
            classes: spec.classes.into_iter().collect(),
            attributes: spec.attributes.into_iter().collect(),
            ..NodeState::default()
        };
        Arc::new(Node {
            label,
            id: spec.id,
            aliases: spec.aliases,
            journal: Arc::clone(&self.inner.journal),
            state: Mutex::new(state),
        })
    }
}

fn same_element(node: &Arc<Node>, element: &ElementRef) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(node), Arc::as_ptr(element))
}

impl HostRoot for Document {
    fn query_selector(&self, selector: &str) -> Option<ElementRef> {
        lock(&self.inner.nodes)
            .iter()
            .find(|node| node.matches(selector))
            .map(|node| Arc::clone(node) as ElementRef)
    }

    fn query_selector_all(&self, selector: &str) -> Vec<ElementRef> {
        lock(&self.inner.nodes)
            .iter()
            .filter(|node| node.matches(selector))
            .map(|node| Arc::clone(node) as ElementRef)
            .collect()
    }

    fn append_element(&self, id: &str, classes: &[&str]) -> ElementRef {
        let spec = classes
            .iter()
            .fold(ElementSpec::with_id(id), |spec, class| spec.class(*class));
        let node = self.insert(spec);
        record(
            &self.inner.journal,
            DomEvent::Appended {
                element: node.label.clone(),
            },
        );
        node
    }

    fn insert_before(&self, anchor: &ElementRef, classes: &[&str]) -> ElementRef {
        let spec = classes
            .iter()
            .fold(ElementSpec::default(), |spec, class| spec.class(*class));
        let node = self.build(spec);
        let before = {
            let mut nodes = lock(&self.inner.nodes);
            let position = nodes.iter().position(|n| same_element(n, anchor));
            let before = position.map(|i| nodes[i].label.clone());
            match position {
                Some(i) => nodes.insert(i, Arc::clone(&node)),
                None => nodes.push(Arc::clone(&node)),
            }
            before
        };
        record(
            &self.inner.journal,
            DomEvent::Inserted {
                element: node.label.clone(),
                before: before.unwrap_or_default(),
            },
        );
        node
    }

    fn location(&self) -> String {
        lock(&self.inner.location).clone()
    }

    fn replace_location(&self, url: &str) {
        *lock(&self.inner.location) = url.to_string();
        record(
            &self.inner.journal,
            DomEvent::LocationReplaced {
                url: url.to_string(),
            },
        );
    }

    fn notify(&self, notification: &Notification) {
        tracing::info!(
            success = notification.success,
            message = %notification.message,
            "notification"
        );
        record(&self.inner.journal, DomEvent::Notified(notification.clone()));
    }

    fn open_window(&self, url: &str) {
        record(
            &self.inner.journal,
            DomEvent::WindowOpened {
                url: url.to_string(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn query_matches_id_class_and_alias_selectors() {
        let doc = Document::new("http://localhost/");
        doc.insert(ElementSpec::with_id("paste"));
        doc.insert(ElementSpec::default().class("copy-path-button").class("card-button"));
        doc.insert(ElementSpec::matching("#txt2img_prompt textarea"));

        assert!(doc.query_selector("#paste").is_some());
        assert!(doc.query_selector(".copy-path-button.card-button").is_some());
        assert!(doc.query_selector(".card-button").is_some());
        assert!(doc.query_selector("#txt2img_prompt textarea").is_some());
        assert!(doc.query_selector("#missing").is_none());
        assert!(doc.query_selector(".copy-path-button.other").is_none());
    }

    #[test]
    fn removed_elements_no_longer_match() {
        let doc = Document::new("http://localhost/");
        doc.insert(ElementSpec::with_id("paste"));
        assert_eq!(doc.remove("#paste"), 1);
        assert!(doc.query_selector("#paste").is_none());
    }

    #[test]
    fn click_runs_listeners_and_records_event() {
        let doc = Document::new("http://localhost/");
        let node = doc.insert(ElementSpec::with_id("go"));
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        node.add_click_listener(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        node.click();
        node.click();

        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(doc.clicks("#go"), 2);
    }

    #[test]
    fn insert_before_places_sibling_ahead_of_anchor() {
        let doc = Document::new("http://localhost/");
        doc.insert(ElementSpec::with_id("first"));
        let anchor: ElementRef = doc.insert(ElementSpec::with_id("second"));
        doc.insert_before(&anchor, &["open-civ-page"]);

        let all = doc.query_selector_all(".open-civ-page");
        assert_eq!(all.len(), 1);
        assert!(doc.events().iter().any(|event| matches!(
            event,
            DomEvent::Inserted { before, .. } if before == "#second"
        )));
    }

    #[test]
    fn set_class_records_every_call() {
        let doc = Document::new("http://localhost/");
        let node = doc.append_element("civitai-status", &["civitai-status"]);
        node.set_class("connected", true);
        node.set_class("connected", true);
        assert!(node.has_class("connected"));
        assert_eq!(doc.class_changes("#civitai-status"), 2);
    }

    #[test]
    fn replica_carries_configured_controls() {
        let selectors = Selectors::default();
        let doc = Document::gradio_replica(&selectors, "http://localhost/");
        for selector in [
            &selectors.container,
            &selectors.prompt,
            &selectors.paste,
            &selectors.generate,
            &selectors.refresh_models,
        ] {
            assert!(doc.query_selector(selector).is_some(), "missing {selector}");
        }
    }
}
