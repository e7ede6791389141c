//! Background coordinator
//!
//! Reacts to the keyboard shortcut and the context menu, relays storage
//! requests from pages and the popup, and closes the picker loop: a page
//! reports `promptSelected`, the coordinator records usage and sends the
//! prompt back to that tab for injection.

pub mod hub;

use std::rc::Rc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::bridge::Inbox;
use crate::errors::{DockError, Result};
use crate::messages::{self, BackgroundRequest, ContentCommand, Message, Reply, TabId};
use crate::sites::SiteRegistry;
use crate::storage::{KeyValueStore, Prompt, PromptPatch, PromptStore};

pub use hub::TabHub;

/// Words of a selection used for the suggested title
const SUGGESTED_TITLE_WORDS: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tab {
    pub id:  TabId,
    pub url: Option<String>,
}

impl Tab {
    pub fn new(id: TabId, url: impl Into<String>) -> Self {
        Tab {
            id,
            url: Some(url.into()),
        }
    }
}

/// The browser's tabs, as far as the coordinator needs them
#[allow(async_fn_in_trait)]
pub trait Tabs {
    /// Focused tab of the current window
    async fn active_tab(&self) -> Result<Option<Tab>>;

    async fn send(&self, tab: TabId, command: ContentCommand) -> Result<Reply>;
}

/// What a shortcut press ended up doing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShortcutOutcome {
    NoActiveTab,
    Unsupported,
    NoPrompts,
    OpenedPicker,
    /// The only prompt was sent for injection
    Injected(String),
}

pub struct Coordinator<S, T> {
    store:    PromptStore<S>,
    tabs:     T,
    registry: SiteRegistry,
}

impl<S: KeyValueStore, T: Tabs> Coordinator<S, T> {
    pub fn new(store: PromptStore<S>, tabs: T, registry: SiteRegistry) -> Self {
        Coordinator {
            store,
            tabs,
            registry,
        }
    }

    pub fn store(&self) -> &PromptStore<S> {
        &self.store
    }

    pub fn tabs(&self) -> &T {
        &self.tabs
    }

    // ========================================
    // Browser events
    // ========================================

    /// Keyboard shortcut: offer the picker, or inject the only prompt
    pub async fn on_shortcut(&self) -> Result<ShortcutOutcome> {
        let Some(tab) = self.tabs.active_tab().await? else {
            return Ok(ShortcutOutcome::NoActiveTab);
        };
        let supported = tab
            .url
            .as_deref()
            .map(|url| self.registry.supports_url(url))
            .unwrap_or(false);
        if !supported {
            debug!(tab = tab.id, url = ?tab.url, "Shortcut on unsupported tab");
            return Ok(ShortcutOutcome::Unsupported);
        }

        let prompts = self.store.get_prompts().await?;
        let last_used_id = self.store.last_used_prompt_id().await?;
        let Some(chosen) = resolve_prompt(&prompts, last_used_id.as_deref()).cloned() else {
            info!("No saved prompts to inject");
            return Ok(ShortcutOutcome::NoPrompts);
        };

        if prompts.len() > 1 {
            let command = ContentCommand::OpenPicker {
                prompts,
                last_used_id: Some(chosen.id),
            };
            self.send_checked(tab.id, command).await?;
            return Ok(ShortcutOutcome::OpenedPicker);
        }

        self.inject_into(tab.id, chosen.clone(), prompts).await?;
        Ok(ShortcutOutcome::Injected(chosen.id))
    }

    /// Context menu on a selection: open the save form in that tab.
    /// Returns `false` for a blank selection.
    pub async fn on_context_selection(
        &self,
        tab: &Tab,
        selection: &str,
        page_url: Option<&str>,
    ) -> Result<bool> {
        let selection = selection.trim();
        if selection.is_empty() {
            return Ok(false);
        }

        let source_url = page_url
            .filter(|url| !url.is_empty())
            .or(tab.url.as_deref())
            .unwrap_or_default()
            .to_string();

        let command = ContentCommand::OpenSaveModal {
            selection_text: selection.to_string(),
            source_url,
            suggested_title: suggested_title(selection),
        };
        self.send_checked(tab.id, command).await?;
        Ok(true)
    }

    // ========================================
    // Requests
    // ========================================

    /// Answer one request; failures become error replies
    pub async fn handle(&self, origin: Option<TabId>, request: BackgroundRequest) -> Reply {
        let kind = request.kind();
        let result = self.dispatch(origin, request).await;
        if let Err(e) = &result {
            warn!(kind, origin = ?origin, category = e.category(), error = %e, "Request failed");
        }
        Reply::from_result(result)
    }

    /// Decode and answer one raw message; `None` when it is not ours
    pub async fn handle_raw(&self, origin: Option<TabId>, raw: &Value) -> Option<Reply> {
        match messages::decode::<BackgroundRequest>(raw) {
            Ok(None) => None,
            Ok(Some(request)) => Some(self.handle(origin, request).await),
            Err(e) => {
                warn!(origin = ?origin, error = %e, "Rejected malformed request");
                Some(Reply::failure(&e))
            },
        }
    }

    pub async fn dispatch(&self, origin: Option<TabId>, request: BackgroundRequest) -> Result<Value> {
        match request {
            BackgroundRequest::PromptSelected { prompt_id } => {
                let stat = self.store.record_prompt_usage(&prompt_id, Utc::now()).await?;
                self.store.set_last_used_prompt_id(&prompt_id).await?;

                let prompt = self
                    .store
                    .get_prompt(&prompt_id)
                    .await?
                    .ok_or_else(|| DockError::NotFound(prompt_id.clone()))?;

                match origin {
                    Some(tab) => {
                        let command = ContentCommand::InjectPrompt {
                            prompt:  Some(prompt),
                            prompts: Vec::new(),
                        };
                        self.send_checked(tab, command).await?;
                    },
                    None => warn!(prompt_id, "Prompt selected outside a tab; nothing to inject"),
                }
                Ok(serde_json::to_value(stat)?)
            },
            BackgroundRequest::GetPrompts => Ok(serde_json::to_value(self.store.get_prompts().await?)?),
            BackgroundRequest::SavePrompt(record) => {
                let saved = self.store.save_prompt(Prompt::from_value(record)?).await?;
                Ok(serde_json::to_value(saved)?)
            },
            BackgroundRequest::UpdatePrompt { id, changes } => {
                let updated = self.store.update_prompt(&id, PromptPatch::from_value(changes)?).await?;
                Ok(serde_json::to_value(updated)?)
            },
            BackgroundRequest::DeletePrompt { id } => Ok(Value::Bool(self.store.delete_prompt(&id).await?)),
            BackgroundRequest::RecordUsage { prompt_id } => {
                let stat = self.store.record_prompt_usage(&prompt_id, Utc::now()).await?;
                Ok(serde_json::to_value(stat)?)
            },
            BackgroundRequest::GetStats => Ok(serde_json::to_value(self.store.get_prompt_stats().await?)?),
            BackgroundRequest::ExportPrompts => Ok(Value::String(self.store.export_prompts().await?)),
            BackgroundRequest::ImportPrompts { payload } => {
                let outcome = self.store.import_prompts(payload).await?;
                info!(added = outcome.added.len(), total = outcome.prompts.len(), "Imported prompts");
                Ok(serde_json::to_value(outcome)?)
            },
        }
    }

    /// Record the use and send `prompt` to `tab` for injection
    pub async fn inject_into(&self, tab: TabId, prompt: Prompt, prompts: Vec<Prompt>) -> Result<()> {
        self.store.record_prompt_usage(&prompt.id, Utc::now()).await?;
        self.store.set_last_used_prompt_id(&prompt.id).await?;

        let command = ContentCommand::InjectPrompt {
            prompt: Some(prompt),
            prompts,
        };
        self.send_checked(tab, command).await
    }

    async fn send_checked(&self, tab: TabId, command: ContentCommand) -> Result<()> {
        let kind = command.kind();
        self.tabs.send(tab, command).await?.into_result()?;
        debug!(tab, kind, "Command delivered");
        Ok(())
    }
}

impl<S: KeyValueStore + 'static, T: Tabs + 'static> Coordinator<S, T> {
    /// Answer every request on `inbox`, each on its own local task
    ///
    /// Must be polled inside a `LocalSet`.
    pub async fn serve(self: Rc<Self>, mut inbox: Inbox<BackgroundRequest>) {
        while let Some(envelope) = inbox.recv().await {
            let origin = envelope.origin;
            let coordinator = self.clone();
            tokio::task::spawn_local(async move {
                let (request, responder) = envelope.into_parts();
                responder.respond(coordinator.handle(origin, request).await);
            });
        }
        debug!("Background inbox closed");
    }
}

/// The last used prompt if it still exists, else the newest one
pub fn resolve_prompt<'a>(prompts: &'a [Prompt], last_used_id: Option<&str>) -> Option<&'a Prompt> {
    last_used_id
        .and_then(|id| prompts.iter().find(|p| p.id == id))
        .or_else(|| prompts.last())
}

/// First six whitespace-separated words
pub fn suggested_title(selection: &str) -> String {
    selection
        .split_whitespace()
        .take(SUGGESTED_TITLE_WORDS)
        .collect::<Vec<_>>()
        .join(" ")
}
