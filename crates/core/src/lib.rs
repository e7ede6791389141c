//! context-dock-core: prompt recall and injection for web chat apps
//!
//! The logic behind the ContextDock browser extension, independent of the
//! browser. It provides:
//! - Site profiles and hostname matching
//! - Smart variables (`{currentURL}`, `{currentDate}`, `{selectedText}`)
//! - Waiting for a chat input to render, then writing text into it
//! - The searchable prompt picker overlay
//! - Prompt storage, usage stats, export and import
//!
//! ## Architecture
//!
//! - **background**: one [`Coordinator`] per browser profile; reacts to the
//!   shortcut and the context menu, owns the [`PromptStore`]
//! - **content**: one [`PageSession`] per chat tab; owns the picker, the
//!   locator and the injector
//! - **bridge**: typed request/response ports between the two
//!
//! The DOM is reached through the [`dom::Page`] and [`dom::InputElement`]
//! traits; [`testing`] has in-memory implementations.

pub mod background;
pub mod bridge;
pub mod config;
pub mod content;
pub mod dom;
pub mod errors;
pub mod injector;
pub mod locator;
pub mod logging;
pub mod messages;
pub mod picker;
pub mod runtime;
pub mod sites;
pub mod storage;
pub mod testing;
pub mod variables;

pub use background::{Coordinator, ShortcutOutcome, Tab, TabHub, Tabs};
pub use config::DockConfig;
pub use content::{PageSession, SaveDraft, SaveForm};
pub use errors::{DockError, Result};
pub use messages::{BackgroundRequest, ContentCommand, Reply};
pub use picker::{KeyOutcome, PickerKey, PromptPicker};
pub use sites::{SiteProfile, SiteRegistry};
pub use storage::{Prompt, PromptStore};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modules_exist() {
        let _error: errors::DockError = "test".into();
        assert!(!SiteRegistry::with_defaults().is_empty());
    }
}
