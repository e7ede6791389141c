//! The slice of the browser page the core needs
//!
//! The extension's WASM shim implements [`Page`] and [`InputElement`] over
//! `web_sys`; [`crate::testing`] implements them in memory.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use tokio::sync::mpsc;

/// Notification replayed on an input after its value is written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputEventKind {
    Input,
    Change,
}

impl InputEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputEventKind::Input => "input",
            InputEventKind::Change => "change",
        }
    }
}

/// A synthetic DOM event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputEvent {
    pub kind:    InputEventKind,
    pub bubbles: bool,
}

impl InputEvent {
    pub fn bubbling(kind: InputEventKind) -> Self {
        InputEvent {
            kind,
            bubbles: true,
        }
    }
}

/// A text field owned by the host page
///
/// Element handles are cheap clones of a shared node, so mutation goes
/// through `&self`.
pub trait InputElement: Clone {
    fn value(&self) -> String;
    fn set_value(&self, value: &str);

    /// Text last written by the injector (`data-context-dock-prompt`)
    fn marker(&self) -> Option<String>;
    fn set_marker(&self, marker: Option<&str>);

    fn dispatch(&self, event: InputEvent);
}

/// The document of one tab
pub trait Page {
    type Element: InputElement;

    fn hostname(&self) -> String;
    fn href(&self) -> String;
    /// Current text selection, `None` when nothing is selected
    fn selected_text(&self) -> Option<String>;

    fn query_selector(&self, selector: &str) -> Option<Self::Element>;

    /// Watch `document.body` for child-list changes (subtree)
    ///
    /// The observer's disconnect hook must drop the batch sender, so a
    /// pending [`MutationObserver::next_batch`] wakes up with `false`.
    fn observe_body(&self) -> MutationObserver;
}

type DisconnectHook = Rc<RefCell<Option<Box<dyn FnOnce()>>>>;

/// Live subscription to structural mutations
///
/// Each received unit is one mutation batch. The disconnect hook runs
/// exactly once: on [`disconnect`](Self::disconnect), on drop, or through
/// an [`ObserverHandle`], whichever comes first.
pub struct MutationObserver {
    batches: mpsc::UnboundedReceiver<()>,
    hook:    DisconnectHook,
}

impl MutationObserver {
    pub fn new(batches: mpsc::UnboundedReceiver<()>, disconnect: impl FnOnce() + 'static) -> Self {
        MutationObserver {
            batches,
            hook: Rc::new(RefCell::new(Some(Box::new(disconnect)))),
        }
    }

    /// Wait for the next batch. `false` once disconnected or the page side
    /// has gone away.
    pub async fn next_batch(&mut self) -> bool {
        if !self.is_connected() {
            return false;
        }
        let received = self.batches.recv().await.is_some();
        // coalesce batches that queued up while we were querying
        while self.batches.try_recv().is_ok() {}
        received && self.is_connected()
    }

    pub fn is_connected(&self) -> bool {
        self.hook.borrow().is_some()
    }

    /// A handle that can disconnect this observer from elsewhere
    pub fn handle(&self) -> ObserverHandle {
        ObserverHandle {
            hook: self.hook.clone(),
        }
    }

    pub fn disconnect(mut self) {
        self.release();
    }

    fn release(&mut self) {
        self.batches.close();
        run_hook(&self.hook);
    }
}

impl Drop for MutationObserver {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for MutationObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationObserver")
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Remote control for a [`MutationObserver`]
#[derive(Clone)]
pub struct ObserverHandle {
    hook: DisconnectHook,
}

impl ObserverHandle {
    pub fn disconnect(&self) {
        run_hook(&self.hook);
    }

    pub fn is_connected(&self) -> bool {
        self.hook.borrow().is_some()
    }
}

impl fmt::Debug for ObserverHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverHandle")
            .field("connected", &self.is_connected())
            .finish()
    }
}

fn run_hook(hook: &DisconnectHook) {
    // release the borrow before the hook runs
    let disconnect = hook.borrow_mut().take();
    if let Some(disconnect) = disconnect {
        disconnect();
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    fn observer(counter: &Rc<Cell<u32>>) -> (mpsc::UnboundedSender<()>, MutationObserver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let counter = counter.clone();
        let observer = MutationObserver::new(rx, move || counter.set(counter.get() + 1));
        (tx, observer)
    }

    #[test]
    fn test_disconnect_runs_once() {
        let count = Rc::new(Cell::new(0));
        let (_tx, obs) = observer(&count);
        obs.disconnect();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_handle_disconnect_wins_over_drop() {
        let count = Rc::new(Cell::new(0));
        let (_tx, obs) = observer(&count);
        let handle = obs.handle();

        handle.disconnect();
        assert!(!obs.is_connected());
        drop(obs);
        handle.disconnect();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_drop_disconnects() {
        let count = Rc::new(Cell::new(0));
        {
            let (_tx, _obs) = observer(&count);
        }
        assert_eq!(count.get(), 1);
    }

    #[tokio::test]
    async fn test_next_batch_coalesces_queued_batches() {
        let count = Rc::new(Cell::new(0));
        let (tx, mut obs) = observer(&count);
        tx.send(()).unwrap();
        tx.send(()).unwrap();
        tx.send(()).unwrap();

        assert!(obs.next_batch().await);
        drop(tx);
        assert!(!obs.next_batch().await);
    }

    #[test]
    fn test_event_names() {
        assert_eq!(InputEventKind::Input.as_str(), "input");
        assert_eq!(InputEventKind::Change.as_str(), "change");
        assert!(InputEvent::bubbling(InputEventKind::Change).bubbles);
    }
}
