//! Finding the chat input, waiting for it to render if needed

use std::cell::{Cell, RefCell};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::debug;

use crate::dom::{ObserverHandle, Page};

/// How long to wait for an input to appear
pub const DEFAULT_LOCATE_TIMEOUT: Duration = Duration::from_millis(15_000);

#[derive(Debug)]
struct PendingWait {
    generation: u64,
    cancel:     oneshot::Sender<()>,
    observer:   ObserverHandle,
}

/// How a wait for the input ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Located<E> {
    Found(E),
    /// No match before the timeout
    TimedOut,
    /// Superseded by a newer wait, cancelled, or the observer went away
    Cancelled,
}

impl<E> Located<E> {
    pub fn found(self) -> Option<E> {
        match self {
            Located::Found(element) => Some(element),
            _ => None,
        }
    }
}

/// Waits for an input element, holding at most one live body observer
///
/// A new [`locate`](Self::locate) supersedes the one in flight: the old
/// observer is disconnected on the spot and the old call resolves `None`.
#[derive(Debug, Default)]
pub struct InputLocator {
    pending:    RefCell<Option<PendingWait>>,
    generation: Cell<u64>,
}

impl InputLocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Abandon the wait in flight, if any. Returns whether one was live.
    pub fn cancel(&self) -> bool {
        let pending = self.pending.borrow_mut().take();
        match pending {
            Some(wait) => {
                let was_live = wait.observer.is_connected();
                wait.observer.disconnect();
                let _ = wait.cancel.send(());
                was_live
            },
            None => false,
        }
    }

    /// Whether a wait is currently observing the page
    pub fn is_waiting(&self) -> bool {
        self.pending
            .borrow()
            .as_ref()
            .map(|wait| wait.observer.is_connected())
            .unwrap_or(false)
    }

    /// Return the first element matching `selectors` (in order), waiting up
    /// to `timeout` for body mutations to produce one
    pub async fn locate<P: Page>(
        &self,
        page: &P,
        selectors: &[String],
        timeout: Duration,
    ) -> Option<P::Element> {
        self.wait_for(page, selectors, timeout).await.found()
    }

    /// [`locate`](Self::locate), telling a timeout apart from a cancellation
    pub async fn wait_for<P: Page>(
        &self,
        page: &P,
        selectors: &[String],
        timeout: Duration,
    ) -> Located<P::Element> {
        self.cancel();

        if let Some(found) = query_first(page, selectors) {
            return Located::Found(found);
        }

        let generation = self.generation.get() + 1;
        self.generation.set(generation);

        let mut observer = page.observe_body();
        let (cancel, mut cancelled) = oneshot::channel();
        *self.pending.borrow_mut() = Some(PendingWait {
            generation,
            cancel,
            observer: observer.handle(),
        });

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        let found = loop {
            tokio::select! {
                biased;

                _ = &mut cancelled => {
                    debug!(generation, "Input wait superseded");
                    break Located::Cancelled;
                }
                _ = &mut deadline => {
                    debug!(generation, timeout_ms = timeout.as_millis() as u64, "Input wait timed out");
                    break Located::TimedOut;
                }
                alive = observer.next_batch() => {
                    if !alive {
                        break Located::Cancelled;
                    }
                    if let Some(found) = query_first(page, selectors) {
                        break Located::Found(found);
                    }
                }
            }
        };

        observer.disconnect();
        let mut pending = self.pending.borrow_mut();
        if pending.as_ref().map(|wait| wait.generation) == Some(generation) {
            pending.take();
        }

        found
    }
}

/// One synchronous pass over `selectors`, in order
pub fn query_first<P: Page>(page: &P, selectors: &[String]) -> Option<P::Element> {
    selectors
        .iter()
        .filter(|selector| !selector.trim().is_empty())
        .find_map(|selector| page.query_selector(selector))
}
