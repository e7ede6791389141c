//! Page-bound session: everything the extension keeps per chat tab
//!
//! A [`PageSession`] is created once per page load and owns the resolved
//! site profile, the text pending injection, the picker overlay, the input
//! locator and any staged save draft. Pages on unsupported hosts still get
//! a session; it ignores picker and injection commands.
//!
//! Sessions are `!Send`. Run [`PageSession::serve`] inside a
//! `tokio::task::LocalSet` so commands from the background are handled while
//! a DOM event handler is waiting on its own request.

use std::cell::{Ref, RefCell};
use std::rc::Rc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::bridge::{Inbox, Port};
use crate::config::DockConfig;
use crate::dom::{MutationObserver, ObserverHandle, Page};
use crate::errors::{DockError, Result};
use crate::injector::{self, ApplyOptions};
use crate::locator::{self, InputLocator, Located};
use crate::messages::{self, BackgroundRequest, ContentCommand, Message, Reply};
use crate::picker::{KeyOutcome, PickerKey, PromptPicker};
use crate::sites::{SiteProfile, SiteRegistry};
use crate::storage::Prompt;
use crate::variables::Interpolator;

/// Selection captured by the context menu, waiting for the save form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveDraft {
    pub selection_text:  String,
    pub source_url:      String,
    pub suggested_title: String,
}

/// What the user submitted from the save form
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveForm {
    pub title:   String,
    pub content: String,
    pub tags:    Vec<String>,
}

impl SaveForm {
    /// The form as first shown for `draft`
    pub fn prefilled(draft: &SaveDraft) -> Self {
        SaveForm {
            title:   draft.suggested_title.clone(),
            content: draft.selection_text.clone(),
            tags:    Vec::new(),
        }
    }

    /// Split a comma-separated tag field, dropping blanks
    pub fn parse_tags(raw: &str) -> Vec<String> {
        raw.split(',')
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
            .map(String::from)
            .collect()
    }
}

pub struct PageSession<P: Page> {
    page:           Rc<P>,
    site:           Option<SiteProfile>,
    interpolator:   Interpolator,
    locator:        InputLocator,
    picker:         RefCell<PromptPicker>,
    current_prompt: RefCell<String>,
    save_draft:     RefCell<Option<SaveDraft>>,
    background:     Option<Port<BackgroundRequest>>,
    locate_timeout: Duration,
    /// Body observer that re-applies the prompt after the page re-renders
    keeper:         RefCell<Option<ObserverHandle>>,
    keeper_tx:      RefCell<Option<mpsc::UnboundedSender<MutationObserver>>>,
    keeper_rx:      RefCell<Option<mpsc::UnboundedReceiver<MutationObserver>>>,
}

impl<P: Page + 'static> PageSession<P> {
    pub fn new(
        page: Rc<P>,
        registry: &SiteRegistry,
        background: Option<Port<BackgroundRequest>>,
        config: &DockConfig,
    ) -> Self {
        let hostname = page.hostname();
        let site = registry.resolve(&hostname).cloned();
        match &site {
            Some(profile) => info!(host = %hostname, site = %profile.display_name, "Page session started"),
            None => warn!(
                error = %DockError::ResolutionMiss(hostname.clone()),
                "Page session started on an unsupported host"
            ),
        }

        let (keeper_tx, keeper_rx) = mpsc::unbounded_channel();
        PageSession {
            interpolator: Interpolator::for_page(page.clone()),
            page,
            site,
            locator: InputLocator::new(),
            picker: RefCell::new(PromptPicker::new()),
            current_prompt: RefCell::new(String::new()),
            save_draft: RefCell::new(None),
            background,
            locate_timeout: config.locate_timeout(),
            keeper: RefCell::new(None),
            keeper_tx: RefCell::new(Some(keeper_tx)),
            keeper_rx: RefCell::new(Some(keeper_rx)),
        }
    }

    pub fn page(&self) -> &P {
        &self.page
    }

    pub fn site(&self) -> Option<&SiteProfile> {
        self.site.as_ref()
    }

    /// Resolved text of the prompt most recently asked for
    pub fn current_prompt(&self) -> String {
        self.current_prompt.borrow().clone()
    }

    pub fn interpolator_mut(&mut self) -> &mut Interpolator {
        &mut self.interpolator
    }

    // ========================================
    // Commands from the background
    // ========================================

    pub async fn handle(&self, command: ContentCommand) -> Result<()> {
        let kind = command.kind();
        match command {
            ContentCommand::InjectPrompt { prompt, prompts } => {
                if !self.supported(kind) {
                    return Ok(());
                }
                self.current_prompt.borrow_mut().clear();

                if prompts.len() > 1 {
                    let last_used_id = prompt.map(|p| p.id);
                    self.open_picker(prompts, last_used_id);
                    return Ok(());
                }
                if let Some(prompt) = prompt {
                    self.inject(&prompt).await;
                }
                Ok(())
            },
            ContentCommand::OpenPicker {
                prompts,
                last_used_id,
            } => {
                if self.supported(kind) {
                    self.open_picker(prompts, last_used_id);
                }
                Ok(())
            },
            ContentCommand::OpenSaveModal {
                selection_text,
                source_url,
                suggested_title,
            } => {
                debug!(chars = selection_text.chars().count(), "Save draft staged");
                *self.save_draft.borrow_mut() = Some(SaveDraft {
                    selection_text,
                    source_url,
                    suggested_title,
                });
                Ok(())
            },
        }
    }

    /// Decode and handle one raw runtime message. `None` means the message
    /// was not for us and gets no reply.
    pub async fn handle_raw(&self, raw: &Value) -> Option<Reply> {
        match messages::decode::<ContentCommand>(raw) {
            Ok(None) => None,
            Ok(Some(command)) => Some(Reply::from_result(self.handle(command).await.map(|_| Value::Null))),
            Err(e) => {
                warn!(error = %e, "Rejected malformed command");
                Some(Reply::failure(&e))
            },
        }
    }

    /// Handle every command arriving on `inbox`, each on its own local task
    ///
    /// Must be polled inside a `LocalSet`.
    pub async fn serve(self: Rc<Self>, mut inbox: Inbox<ContentCommand>) {
        let keeper = self.clone();
        tokio::task::spawn_local(async move { keeper.keep_applied().await });

        while let Some(envelope) = inbox.recv().await {
            let session = self.clone();
            tokio::task::spawn_local(async move {
                let (command, responder) = envelope.into_parts();
                let kind = command.kind();
                let result = session.handle(command).await;
                if let Err(e) = &result {
                    warn!(kind, error = %e, "Command failed");
                }
                responder.respond(Reply::from_result(result.map(|_| Value::Null)));
            });
        }
        debug!("Content inbox closed");
    }

    // ========================================
    // Injection
    // ========================================

    /// Resolve `prompt`'s smart variables and write it into the page input.
    /// Returns whether the input was written.
    pub async fn inject(&self, prompt: &Prompt) -> bool {
        let resolved = self.interpolator.interpolate(&prompt.content);
        *self.current_prompt.borrow_mut() = resolved;
        self.ensure_prompt_applied().await
    }

    /// Locate the site's input and apply the current prompt to it
    ///
    /// A missing input is logged, not an error. Applying text the input
    /// already carries is skipped. Once applied, the body stays observed so
    /// a re-rendered input gets the prompt again.
    pub async fn ensure_prompt_applied(&self) -> bool {
        let Some(site) = &self.site else {
            return false;
        };
        let text = self.current_prompt();
        if text.is_empty() {
            return false;
        }

        // the wait below owns the only body observer until it ends
        self.stop_keeper();

        let outcome = self
            .locator
            .wait_for(&*self.page, &site.input_selectors, self.locate_timeout)
            .await;

        match outcome {
            Located::Found(element) => {
                let written = injector::apply(&element, &text, ApplyOptions::default());
                self.start_keeper();
                written
            },
            Located::TimedOut => {
                warn!(
                    site = %site.display_name,
                    error = %DockError::ResolutionMiss(format!("no input on {}", self.page.hostname())),
                    "Unable to locate input"
                );
                false
            },
            Located::Cancelled => {
                debug!(site = %site.display_name, "Input wait cancelled");
                false
            },
        }
    }

    /// Re-apply the current prompt on every body mutation observed after a
    /// successful injection. Returns once the session is torn down.
    ///
    /// [`serve`](Self::serve) runs this on its own local task.
    pub async fn keep_applied(&self) {
        let Some(mut observers) = self.keeper_rx.borrow_mut().take() else {
            return;
        };
        while let Some(mut observer) = observers.recv().await {
            while observer.next_batch().await {
                self.reapply();
            }
        }
        debug!("Prompt keeper stopped");
    }

    fn reapply(&self) {
        let Some(site) = &self.site else {
            return;
        };
        let text = self.current_prompt();
        if text.is_empty() {
            return;
        }
        if let Some(element) = locator::query_first(&*self.page, &site.input_selectors) {
            if injector::apply(&element, &text, ApplyOptions::default()) {
                debug!(site = %site.display_name, "Re-applied prompt to re-rendered input");
            }
        }
    }

    fn start_keeper(&self) {
        let Some(tx) = self.keeper_tx.borrow().clone() else {
            return;
        };
        let observer = self.page.observe_body();
        *self.keeper.borrow_mut() = Some(observer.handle());
        // a send error means the session is torn down; dropping disconnects
        let _ = tx.send(observer);
    }

    fn stop_keeper(&self) {
        if let Some(handle) = self.keeper.borrow_mut().take() {
            handle.disconnect();
        }
    }

    // ========================================
    // Picker overlay
    // ========================================

    pub fn open_picker(&self, prompts: Vec<Prompt>, last_used_id: Option<String>) {
        debug!(prompts = prompts.len(), "Opening prompt picker");
        self.picker.borrow_mut().open(prompts, last_used_id);
    }

    pub fn picker(&self) -> Ref<'_, PromptPicker> {
        self.picker.borrow()
    }

    pub fn type_query(&self, query: &str) {
        self.picker.borrow_mut().type_query(query);
    }

    /// Route a key press to the overlay; a commit is reported to the
    /// background, which then sends the prompt back for injection
    pub async fn handle_key(&self, key: PickerKey) -> Result<KeyOutcome> {
        let outcome = self.picker.borrow_mut().handle_key(key);
        if let KeyOutcome::Selected(id) = &outcome {
            self.notify_selected(id).await?;
        }
        Ok(outcome)
    }

    /// Click on a visible row
    pub async fn select_at(&self, row: usize) -> Result<Option<String>> {
        let selected = self.picker.borrow_mut().select_at(row);
        if let Some(id) = &selected {
            self.notify_selected(id).await?;
        }
        Ok(selected)
    }

    /// Returns `true` if the press dismissed the overlay
    pub fn pointer_down(&self, inside_overlay: bool) -> bool {
        self.picker.borrow_mut().pointer_down(inside_overlay)
    }

    async fn notify_selected(&self, prompt_id: &str) -> Result<()> {
        let port = self.background_port()?;
        debug!(prompt_id, "Prompt selected");
        port.request(BackgroundRequest::PromptSelected {
            prompt_id: prompt_id.to_string(),
        })
        .await?;
        Ok(())
    }

    // ========================================
    // Save form
    // ========================================

    pub fn save_draft(&self) -> Option<SaveDraft> {
        self.save_draft.borrow().clone()
    }

    /// Build a prompt from `form` and the staged draft, and ask the
    /// background to store it. The draft is kept if anything fails.
    pub async fn submit_save(&self, form: SaveForm) -> Result<Prompt> {
        let source_url = self
            .save_draft()
            .map(|draft| draft.source_url)
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| self.page.href());

        let mut prompt = Prompt::new(form.title.trim(), form.content);
        prompt.tags = if form.tags.is_empty() { None } else { Some(form.tags) };
        prompt.source_url = Some(source_url);
        prompt.host = Some(self.page.hostname());
        prompt.validate()?;

        let port = self.background_port()?;
        port.request(BackgroundRequest::SavePrompt(serde_json::to_value(&prompt)?))
            .await?;

        self.save_draft.borrow_mut().take();
        info!(prompt_id = %prompt.id, "Saved selection as prompt");
        Ok(prompt)
    }

    pub fn cancel_save(&self) {
        self.save_draft.borrow_mut().take();
    }

    /// Drop all per-page state: abandon any input wait, close the overlay
    /// and forget the draft
    pub fn teardown(&self) {
        if self.locator.cancel() {
            debug!("Abandoned input wait on teardown");
        }
        self.stop_keeper();
        self.keeper_tx.borrow_mut().take();
        self.picker.borrow_mut().dismiss();
        self.save_draft.borrow_mut().take();
        self.current_prompt.borrow_mut().clear();
    }

    fn supported(&self, kind: &str) -> bool {
        if self.site.is_none() {
            debug!(kind, host = %self.page.hostname(), "Ignoring command on unsupported host");
            return false;
        }
        true
    }

    fn background_port(&self) -> Result<&Port<BackgroundRequest>> {
        self.background
            .as_ref()
            .ok_or_else(|| DockError::Transport("No background connection".to_string()))
    }
}
