//! Writing text into a host page's input
//!
//! The value is set directly and then `input` and `change` are replayed so
//! the page's own framework notices. The last text written is kept on the
//! element as a marker; re-applying the same text is a no-op unless forced.

use tracing::debug;

use crate::dom::{InputElement, InputEvent, InputEventKind};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOptions {
    /// Write and notify even if the marker already equals the text
    pub force: bool,
}

impl ApplyOptions {
    pub fn forced() -> Self {
        ApplyOptions { force: true }
    }
}

/// Write `text` into `element`. Returns `false` when skipped as redundant.
pub fn apply<E: InputElement>(element: &E, text: &str, options: ApplyOptions) -> bool {
    if !options.force && element.marker().as_deref() == Some(text) {
        return false;
    }

    element.set_value(text);
    element.set_marker(Some(text));
    notify(element);

    debug!(chars = text.chars().count(), forced = options.force, "Injected prompt");
    true
}

/// Empty the input and forget the marker
pub fn clear<E: InputElement>(element: &E) {
    element.set_value("");
    element.set_marker(None);
    notify(element);
}

fn notify<E: InputElement>(element: &E) {
    element.dispatch(InputEvent::bubbling(InputEventKind::Input));
    element.dispatch(InputEvent::bubbling(InputEventKind::Change));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeElement;

    #[test]
    fn test_apply_sets_value_marker_and_events_in_order() {
        let el = FakeElement::new();
        assert!(apply(&el, "Hello", ApplyOptions::default()));

        assert_eq!(el.value(), "Hello");
        assert_eq!(el.marker().as_deref(), Some("Hello"));
        assert_eq!(
            el.events(),
            vec![
                InputEvent::bubbling(InputEventKind::Input),
                InputEvent::bubbling(InputEventKind::Change),
            ]
        );
    }

    #[test]
    fn test_apply_twice_notifies_once() {
        let el = FakeElement::new();
        apply(&el, "X", ApplyOptions::default());
        assert!(!apply(&el, "X", ApplyOptions::default()));

        assert_eq!(el.event_count(InputEventKind::Input), 1);
        assert_eq!(el.event_count(InputEventKind::Change), 1);
    }

    #[test]
    fn test_forced_apply_always_notifies() {
        let el = FakeElement::new();
        apply(&el, "X", ApplyOptions::forced());
        assert!(apply(&el, "X", ApplyOptions::forced()));

        assert_eq!(el.event_count(InputEventKind::Input), 2);
        assert_eq!(el.event_count(InputEventKind::Change), 2);
    }

    #[test]
    fn test_user_edits_do_not_defeat_marker() {
        // the marker tracks what we wrote, not what the field holds now
        let el = FakeElement::new();
        apply(&el, "X", ApplyOptions::default());
        el.set_value("X plus user typing");

        assert!(!apply(&el, "X", ApplyOptions::default()));
        assert_eq!(el.value(), "X plus user typing");
    }

    #[test]
    fn test_different_text_is_written() {
        let el = FakeElement::new();
        apply(&el, "X", ApplyOptions::default());
        assert!(apply(&el, "Y", ApplyOptions::default()));
        assert_eq!(el.value(), "Y");
        assert_eq!(el.event_count(InputEventKind::Input), 2);
    }

    #[test]
    fn test_clear_resets_marker_and_notifies() {
        let el = FakeElement::new();
        apply(&el, "X", ApplyOptions::default());
        clear(&el);

        assert_eq!(el.value(), "");
        assert_eq!(el.marker(), None);
        assert_eq!(el.event_count(InputEventKind::Change), 2);

        // after a clear the same text is written again
        assert!(apply(&el, "X", ApplyOptions::default()));
    }
}
