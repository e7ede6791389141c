//! Registry of connected tabs

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::debug;

use super::{Tab, Tabs};
use crate::bridge::Port;
use crate::errors::{DockError, Result};
use crate::messages::{ContentCommand, Reply, TabId};

#[derive(Debug)]
struct Connected {
    url:  Option<String>,
    port: Port<ContentCommand>,
}

#[derive(Debug, Default)]
struct HubState {
    tabs:   HashMap<TabId, Connected>,
    active: Option<TabId>,
}

/// Tabs whose page session has connected, plus which one is focused
#[derive(Debug, Clone, Default)]
pub struct TabHub {
    state: Rc<RefCell<HubState>>,
}

impl TabHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tab's command port, replacing any earlier one
    pub fn register(&self, id: TabId, url: Option<String>, port: Port<ContentCommand>) {
        debug!(tab = id, url = ?url, "Tab connected");
        self.state.borrow_mut().tabs.insert(id, Connected { url, port });
    }

    pub fn unregister(&self, id: TabId) {
        let mut state = self.state.borrow_mut();
        state.tabs.remove(&id);
        if state.active == Some(id) {
            state.active = None;
        }
    }

    /// Focus `id`; `None` when no tab has focus
    pub fn activate(&self, id: Option<TabId>) {
        self.state.borrow_mut().active = id;
    }

    pub fn navigate(&self, id: TabId, url: impl Into<String>) {
        if let Some(tab) = self.state.borrow_mut().tabs.get_mut(&id) {
            tab.url = Some(url.into());
        }
    }

    pub fn tab_count(&self) -> usize {
        self.state.borrow().tabs.len()
    }

    /// Send `command` to every connected tab; returns how many answered ok
    pub async fn broadcast(&self, command: &ContentCommand) -> usize {
        let ports: Vec<(TabId, Port<ContentCommand>)> = self
            .state
            .borrow()
            .tabs
            .iter()
            .map(|(id, tab)| (*id, tab.port.clone()))
            .collect();

        let mut delivered = 0;
        for (id, port) in ports {
            match port.send(command.clone()).await {
                Ok(reply) if reply.ok => delivered += 1,
                Ok(reply) => debug!(tab = id, error = ?reply.error, "Tab rejected broadcast"),
                Err(e) => debug!(tab = id, error = %e, "Tab unreachable"),
            }
        }
        delivered
    }

    pub async fn send_to_tab(&self, id: TabId, command: ContentCommand) -> Result<Reply> {
        let port = self
            .state
            .borrow()
            .tabs
            .get(&id)
            .map(|tab| tab.port.clone())
            .ok_or_else(|| DockError::Transport(format!("Tab {} not connected", id)))?;

        port.send(command).await
    }
}

impl Tabs for TabHub {
    async fn active_tab(&self) -> Result<Option<Tab>> {
        let state = self.state.borrow();
        Ok(state.active.map(|id| Tab {
            id,
            url: state.tabs.get(&id).and_then(|tab| tab.url.clone()),
        }))
    }

    async fn send(&self, tab: TabId, command: ContentCommand) -> Result<Reply> {
        self.send_to_tab(tab, command).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge;

    fn picker() -> ContentCommand {
        ContentCommand::OpenPicker {
            prompts:      vec![],
            last_used_id: None,
        }
    }

    #[test]
    fn test_register_and_unregister() {
        let hub = TabHub::new();
        let (port1, _inbox1) = bridge::channel();
        let (port2, _inbox2) = bridge::channel();

        hub.register(1, None, port1);
        assert_eq!(hub.tab_count(), 1);
        hub.register(2, None, port2);
        assert_eq!(hub.tab_count(), 2);

        hub.unregister(1);
        assert_eq!(hub.tab_count(), 1);
        hub.unregister(999);
        assert_eq!(hub.tab_count(), 1);
    }

    #[tokio::test]
    async fn test_active_tab_follows_focus_and_navigation() {
        let hub = TabHub::new();
        let (port, _inbox) = bridge::channel();
        hub.register(5, Some("https://claude.ai/".into()), port);

        assert_eq!(hub.active_tab().await.unwrap(), None);

        hub.activate(Some(5));
        hub.navigate(5, "https://claude.ai/chat/2");
        assert_eq!(
            hub.active_tab().await.unwrap(),
            Some(Tab::new(5, "https://claude.ai/chat/2"))
        );

        hub.unregister(5);
        assert_eq!(hub.active_tab().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_send_to_tab() {
        let hub = TabHub::new();
        let (port1, mut inbox1) = bridge::channel();
        let (port2, _inbox2) = bridge::channel();
        hub.register(1, None, port1);
        hub.register(2, None, port2);

        let (reply, _) = tokio::join!(hub.send_to_tab(1, picker()), async {
            let envelope = inbox1.recv().await.unwrap();
            assert_eq!(envelope.message, picker());
            envelope.respond(Reply::ack());
        });

        assert!(reply.unwrap().ok);
    }

    #[tokio::test]
    async fn test_send_to_unknown_tab() {
        let hub = TabHub::new();

        match hub.send_to_tab(999, picker()).await {
            Err(DockError::Transport(msg)) => assert!(msg.contains("Tab 999 not connected")),
            other => panic!("Expected Transport error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_broadcast_counts_acknowledged() {
        let hub = TabHub::new();
        let (port1, mut inbox1) = bridge::channel();
        let (port2, inbox2) = bridge::channel();
        hub.register(1, None, port1);
        hub.register(2, None, port2);
        drop(inbox2);

        let command = picker();
        let (delivered, _) = tokio::join!(hub.broadcast(&command), async {
            inbox1.recv().await.unwrap().respond(Reply::ack());
        });

        assert_eq!(delivered, 1);
    }
}
