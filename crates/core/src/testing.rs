//! In-memory doubles for driving sessions without a browser

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tokio::sync::mpsc;

use crate::background::{Tab, Tabs};
use crate::dom::{InputElement, InputEvent, InputEventKind, MutationObserver, Page};
use crate::errors::{DockError, Result};
use crate::messages::{ContentCommand, Reply, TabId};

#[derive(Debug, Default)]
struct ElementState {
    value:  String,
    marker: Option<String>,
    events: Vec<InputEvent>,
}

/// A text field that records every event dispatched on it
#[derive(Debug, Clone, Default)]
pub struct FakeElement {
    state: Rc<RefCell<ElementState>>,
}

impl FakeElement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<InputEvent> {
        self.state.borrow().events.clone()
    }

    pub fn event_count(&self, kind: InputEventKind) -> usize {
        self.state.borrow().events.iter().filter(|e| e.kind == kind).count()
    }

    pub fn same_node(&self, other: &FakeElement) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }
}

impl InputElement for FakeElement {
    fn value(&self) -> String {
        self.state.borrow().value.clone()
    }

    fn set_value(&self, value: &str) {
        self.state.borrow_mut().value = value.to_string();
    }

    fn marker(&self) -> Option<String> {
        self.state.borrow().marker.clone()
    }

    fn set_marker(&self, marker: Option<&str>) {
        self.state.borrow_mut().marker = marker.map(String::from);
    }

    fn dispatch(&self, event: InputEvent) {
        self.state.borrow_mut().events.push(event);
    }
}

type ObserverList = Rc<RefCell<Vec<(u64, mpsc::UnboundedSender<()>)>>>;

/// A page whose body can be mutated from the test
#[derive(Debug)]
pub struct FakePage {
    hostname:      String,
    href:          RefCell<String>,
    selection:     RefCell<Option<String>>,
    elements:      RefCell<Vec<(String, FakeElement)>>,
    observers:     ObserverList,
    next_observer: Cell<u64>,
}

impl FakePage {
    /// A page at `https://<hostname>/`
    pub fn new(hostname: &str) -> Self {
        FakePage {
            hostname:      hostname.to_string(),
            href:          RefCell::new(format!("https://{}/", hostname)),
            selection:     RefCell::new(None),
            elements:      RefCell::new(Vec::new()),
            observers:     Rc::new(RefCell::new(Vec::new())),
            next_observer: Cell::new(0),
        }
    }

    pub fn set_href(&self, href: &str) {
        *self.href.borrow_mut() = href.to_string();
    }

    pub fn set_selection(&self, selection: Option<&str>) {
        *self.selection.borrow_mut() = selection.map(String::from);
    }

    /// Attach an element matched by `selector` and notify observers
    pub fn insert(&self, selector: &str, element: FakeElement) {
        self.elements.borrow_mut().push((selector.to_string(), element));
        self.mutate();
    }

    /// Detach every element matched by `selector` and notify observers
    pub fn remove(&self, selector: &str) {
        self.elements.borrow_mut().retain(|(s, _)| s != selector);
        self.mutate();
    }

    /// Deliver one mutation batch to every live observer
    pub fn mutate(&self) {
        for (_, tx) in self.observers.borrow().iter() {
            let _ = tx.send(());
        }
    }

    /// Observers created and not yet disconnected
    pub fn live_observers(&self) -> usize {
        self.observers.borrow().len()
    }

    /// Observers created over the page's lifetime
    pub fn observers_created(&self) -> u64 {
        self.next_observer.get()
    }
}

impl Page for FakePage {
    type Element = FakeElement;

    fn hostname(&self) -> String {
        self.hostname.clone()
    }

    fn href(&self) -> String {
        self.href.borrow().clone()
    }

    fn selected_text(&self) -> Option<String> {
        self.selection.borrow().clone().filter(|s| !s.is_empty())
    }

    fn query_selector(&self, selector: &str) -> Option<FakeElement> {
        self.elements
            .borrow()
            .iter()
            .find(|(s, _)| s == selector)
            .map(|(_, element)| element.clone())
    }

    fn observe_body(&self) -> MutationObserver {
        let id = self.next_observer.get();
        self.next_observer.set(id + 1);

        let (tx, rx) = mpsc::unbounded_channel();
        self.observers.borrow_mut().push((id, tx));

        let observers = self.observers.clone();
        MutationObserver::new(rx, move || {
            observers.borrow_mut().retain(|(other, _)| *other != id);
        })
    }
}

/// Tabs that acknowledge every command and remember what they were sent
#[derive(Debug, Default)]
pub struct RecordingTabs {
    active:  RefCell<Option<Tab>>,
    sent:    RefCell<Vec<(TabId, ContentCommand)>>,
    failure: RefCell<Option<String>>,
}

impl RecordingTabs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_active(tab: Tab) -> Self {
        let tabs = Self::new();
        tabs.set_active(Some(tab));
        tabs
    }

    pub fn set_active(&self, tab: Option<Tab>) {
        *self.active.borrow_mut() = tab;
    }

    /// Make every later send fail as if no content script were listening
    pub fn fail_with(&self, message: Option<&str>) {
        *self.failure.borrow_mut() = message.map(String::from);
    }

    /// Delivered commands, oldest first
    pub fn sent(&self) -> Vec<(TabId, ContentCommand)> {
        self.sent.borrow().clone()
    }
}

impl Tabs for RecordingTabs {
    async fn active_tab(&self) -> Result<Option<Tab>> {
        Ok(self.active.borrow().clone())
    }

    async fn send(&self, tab: TabId, command: ContentCommand) -> Result<Reply> {
        if let Some(message) = self.failure.borrow().clone() {
            return Err(DockError::Transport(message));
        }
        self.sent.borrow_mut().push((tab, command));
        Ok(Reply::ack())
    }
}
