//! Prompt picker overlay state machine
//!
//! Holds the prompt collection while the overlay is open, keeps a filtered
//! view in sync with the query, tracks one highlighted row and reports the
//! chosen prompt id on commit. It never touches storage or the page; the
//! caller injects and records usage.
//!
//! ## Matching
//!
//! The query is lowercased and split on whitespace. A prompt is kept when
//! every term occurs in its title or in its content. The view keeps the
//! collection's order; nothing is scored.

use crate::storage::Prompt;

const PREVIEW_CHARS: usize = 80;

/// Keys the overlay reacts to while open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickerKey {
    ArrowDown,
    ArrowUp,
    Enter,
    Escape,
}

impl PickerKey {
    /// Map a DOM `KeyboardEvent.key` value
    pub fn from_dom_key(key: &str) -> Option<Self> {
        match key {
            "ArrowDown" | "Down" => Some(PickerKey::ArrowDown),
            "ArrowUp" | "Up" => Some(PickerKey::ArrowUp),
            "Enter" => Some(PickerKey::Enter),
            "Escape" | "Esc" => Some(PickerKey::Escape),
            _ => None,
        }
    }
}

/// What a key press did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyOutcome {
    /// Overlay closed or key not handled: let the page have it
    Ignored,
    /// Handled by the overlay (including a swallowed Enter)
    Consumed,
    /// A prompt was chosen and the overlay closed
    Selected(String),
}

/// Why the overlay has no rows to show
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyReason {
    NoPrompts,
    NoMatches,
}

/// One rendered row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PickerRow<'a> {
    pub id:          &'a str,
    pub title:       &'a str,
    pub preview:     String,
    pub highlighted: bool,
}

/// Everything a renderer needs for one frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PickerView<'a> {
    pub query: &'a str,
    pub rows:  Vec<PickerRow<'a>>,
    pub empty: Option<EmptyReason>,
}

#[derive(Debug, Clone)]
struct OpenState {
    source:       Vec<Prompt>,
    query:        String,
    /// Indices into `source`, ascending
    view:         Vec<usize>,
    highlighted:  Option<usize>,
    last_used_id: Option<String>,
}

impl OpenState {
    fn first_or_none(&self) -> Option<usize> {
        if self.view.is_empty() {
            None
        } else {
            Some(0)
        }
    }
}

/// The overlay: `Closed` until [`open`](Self::open), `Open` until a commit
/// or a dismiss
#[derive(Debug, Clone, Default)]
pub struct PromptPicker {
    open: Option<OpenState>,
}

impl PromptPicker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter `Open` with an empty query, highlighting `last_used_id` if it is
    /// in the collection. An empty collection is a valid open state.
    pub fn open(&mut self, prompts: Vec<Prompt>, last_used_id: Option<String>) {
        let view: Vec<usize> = (0..prompts.len()).collect();
        let highlighted = last_used_id
            .as_deref()
            .and_then(|id| prompts.iter().position(|p| p.id == id))
            .or(if view.is_empty() { None } else { Some(0) });

        self.open = Some(OpenState {
            source: prompts,
            query: String::new(),
            view,
            highlighted,
            last_used_id,
        });
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    /// Replace the query and refilter; the highlight goes back to the top
    pub fn type_query(&mut self, query: &str) {
        if let Some(state) = self.open.as_mut() {
            state.query = query.to_string();
            state.view = filter_indices(&state.source, query);
            state.highlighted = state.first_or_none();
        }
    }

    /// Move the highlight by `delta` rows, wrapping around
    pub fn move_highlight(&mut self, delta: isize) {
        let Some(state) = self.open.as_mut() else {
            return;
        };
        let len = state.view.len();
        if len <= 1 {
            return;
        }
        if let Some(current) = state.highlighted {
            let next = (current as isize + delta).rem_euclid(len as isize);
            state.highlighted = Some(next as usize);
        }
    }

    /// Choose the highlighted prompt and close. `None` (and still open) when
    /// there is nothing to choose.
    pub fn commit(&mut self) -> Option<String> {
        let state = self.open.as_ref()?;
        let row = state.highlighted?;
        let index = *state.view.get(row)?;
        let id = state.source[index].id.clone();
        self.open = None;
        Some(id)
    }

    /// Click on a row: highlight it, then commit
    pub fn select_at(&mut self, row: usize) -> Option<String> {
        let state = self.open.as_mut()?;
        if row >= state.view.len() {
            return None;
        }
        state.highlighted = Some(row);
        self.commit()
    }

    /// Close without choosing
    pub fn dismiss(&mut self) {
        self.open = None;
    }

    pub fn handle_key(&mut self, key: PickerKey) -> KeyOutcome {
        if !self.is_open() {
            return KeyOutcome::Ignored;
        }
        match key {
            PickerKey::ArrowDown => self.move_highlight(1),
            PickerKey::ArrowUp => self.move_highlight(-1),
            PickerKey::Enter => {
                if let Some(id) = self.commit() {
                    return KeyOutcome::Selected(id);
                }
            },
            PickerKey::Escape => self.dismiss(),
        }
        KeyOutcome::Consumed
    }

    /// Pointer pressed somewhere on the page. Returns `true` if that
    /// dismissed the overlay.
    pub fn pointer_down(&mut self, inside_overlay: bool) -> bool {
        if self.is_open() && !inside_overlay {
            self.dismiss();
            return true;
        }
        false
    }

    pub fn query(&self) -> Option<&str> {
        self.open.as_ref().map(|s| s.query.as_str())
    }

    pub fn highlighted_index(&self) -> Option<usize> {
        self.open.as_ref().and_then(|s| s.highlighted)
    }

    pub fn highlighted_prompt(&self) -> Option<&Prompt> {
        let state = self.open.as_ref()?;
        state.highlighted.map(|row| &state.source[state.view[row]])
    }

    pub fn last_used_id(&self) -> Option<&str> {
        self.open.as_ref().and_then(|s| s.last_used_id.as_deref())
    }

    /// Prompts currently shown, in collection order
    pub fn filtered(&self) -> Vec<&Prompt> {
        match &self.open {
            Some(state) => state.view.iter().map(|&i| &state.source[i]).collect(),
            None => Vec::new(),
        }
    }

    /// Render-agnostic snapshot, `None` while closed
    pub fn view(&self) -> Option<PickerView<'_>> {
        let state = self.open.as_ref()?;

        let rows = state
            .view
            .iter()
            .enumerate()
            .map(|(row, &index)| {
                let prompt = &state.source[index];
                PickerRow {
                    id:          &prompt.id,
                    title:       &prompt.title,
                    preview:     preview(&prompt.content),
                    highlighted: state.highlighted == Some(row),
                }
            })
            .collect::<Vec<_>>();

        let empty = if !rows.is_empty() {
            None
        } else if state.source.is_empty() {
            Some(EmptyReason::NoPrompts)
        } else {
            Some(EmptyReason::NoMatches)
        };

        Some(PickerView {
            query: &state.query,
            rows,
            empty,
        })
    }
}

/// Lowercased whitespace-separated terms of a query
pub fn query_terms(query: &str) -> Vec<String> {
    query.split_whitespace().map(str::to_lowercase).collect()
}

/// Every term occurs in the title or the content (case-insensitive)
pub fn matches(prompt: &Prompt, terms: &[String]) -> bool {
    if terms.is_empty() {
        return true;
    }
    let title = prompt.title.to_lowercase();
    let content = prompt.content.to_lowercase();
    terms
        .iter()
        .all(|term| title.contains(term.as_str()) || content.contains(term.as_str()))
}

/// Positions in `prompts` that match `query`, ascending
pub fn filter_indices(prompts: &[Prompt], query: &str) -> Vec<usize> {
    let terms = query_terms(query);
    prompts
        .iter()
        .enumerate()
        .filter(|(_, prompt)| matches(prompt, &terms))
        .map(|(i, _)| i)
        .collect()
}

fn preview(content: &str) -> String {
    let flat = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= PREVIEW_CHARS {
        return flat;
    }
    let mut cut: String = flat.chars().take(PREVIEW_CHARS - 1).collect();
    cut.push('…');
    cut
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    fn prompt(id: &str, title: &str, content: &str) -> Prompt {
        Prompt::from_value(json!({ "id": id, "title": title, "content": content })).unwrap()
    }

    fn greetings() -> Vec<Prompt> {
        vec![
            prompt("1", "Greeting", "Hello there, how are you?"),
            prompt("2", "Goodbye", "See you later"),
        ]
    }

    fn ids(picker: &PromptPicker) -> Vec<&str> {
        picker.filtered().iter().map(|p| p.id.as_str()).collect()
    }

    // ========================================
    // open()
    // ========================================

    #[test]
    fn test_open_highlights_last_used() {
        let mut picker = PromptPicker::new();
        picker.open(greetings(), Some("2".into()));

        assert!(picker.is_open());
        assert_eq!(picker.query(), Some(""));
        assert_eq!(ids(&picker), vec!["1", "2"]);
        assert_eq!(picker.highlighted_index(), Some(1));
        assert_eq!(picker.highlighted_prompt().unwrap().id, "2");
    }

    #[test]
    fn test_open_unknown_last_used_highlights_first() {
        let mut picker = PromptPicker::new();
        picker.open(greetings(), Some("gone".into()));
        assert_eq!(picker.highlighted_index(), Some(0));
    }

    #[test]
    fn test_open_empty_collection() {
        let mut picker = PromptPicker::new();
        picker.open(vec![], None);

        assert!(picker.is_open());
        assert_eq!(picker.highlighted_index(), None);
        assert_eq!(picker.view().unwrap().empty, Some(EmptyReason::NoPrompts));
    }

    // ========================================
    // type_query()
    // ========================================

    #[test]
    fn test_scenario_type_then_commit() {
        let mut picker = PromptPicker::new();
        picker.open(greetings(), Some("2".into()));

        picker.type_query("good");
        assert_eq!(ids(&picker), vec!["2"]);
        assert_eq!(picker.highlighted_index(), Some(0));

        assert_eq!(picker.commit(), Some("2".to_string()));
        assert!(!picker.is_open());
    }

    #[test]
    fn test_terms_are_anded_across_title_or_content() {
        let mut picker = PromptPicker::new();
        picker.open(greetings(), None);

        picker.type_query("hello greeting");
        assert_eq!(ids(&picker), vec!["1"]);

        picker.type_query("  SEE   later ");
        assert_eq!(ids(&picker), vec!["2"]);

        picker.type_query("hello later");
        assert!(ids(&picker).is_empty());
        assert_eq!(picker.highlighted_index(), None);
        assert_eq!(picker.view().unwrap().empty, Some(EmptyReason::NoMatches));
    }

    #[test]
    fn test_whitespace_query_matches_all() {
        let mut picker = PromptPicker::new();
        picker.open(greetings(), Some("2".into()));
        picker.type_query("   ");
        assert_eq!(ids(&picker), vec!["1", "2"]);
        assert_eq!(picker.highlighted_index(), Some(0));
    }

    #[test]
    fn test_no_subsequence_fuzzy_matching() {
        let mut picker = PromptPicker::new();
        picker.open(greetings(), None);
        picker.type_query("gdby");
        assert!(ids(&picker).is_empty());
    }

    // ========================================
    // move_highlight()
    // ========================================

    #[test]
    fn test_move_highlight_wraps() {
        let mut picker = PromptPicker::new();
        picker.open(
            vec![prompt("a", "A", "x"), prompt("b", "B", "x"), prompt("c", "C", "x")],
            Some("c".into()),
        );
        assert_eq!(picker.highlighted_index(), Some(2));

        picker.move_highlight(1);
        assert_eq!(picker.highlighted_index(), Some(0));

        picker.move_highlight(-1);
        assert_eq!(picker.highlighted_index(), Some(2));
    }

    #[test]
    fn test_move_highlight_single_and_empty_are_noops() {
        let mut picker = PromptPicker::new();
        picker.open(vec![prompt("a", "A", "x")], None);
        picker.move_highlight(1);
        assert_eq!(picker.highlighted_index(), Some(0));

        picker.type_query("zzz");
        picker.move_highlight(1);
        assert_eq!(picker.highlighted_index(), None);
    }

    // ========================================
    // commit() / dismiss() / keys
    // ========================================

    #[test]
    fn test_enter_on_empty_view_is_swallowed() {
        let mut picker = PromptPicker::new();
        picker.open(greetings(), None);
        picker.type_query("nothing matches this");

        assert_eq!(picker.handle_key(PickerKey::Enter), KeyOutcome::Consumed);
        assert!(picker.is_open());
        assert_eq!(picker.commit(), None);
    }

    #[test]
    fn test_keyboard_navigation_and_commit() {
        let mut picker = PromptPicker::new();
        picker.open(greetings(), None);

        assert_eq!(picker.handle_key(PickerKey::ArrowDown), KeyOutcome::Consumed);
        assert_eq!(
            picker.handle_key(PickerKey::Enter),
            KeyOutcome::Selected("2".to_string())
        );
        assert_eq!(picker.handle_key(PickerKey::Enter), KeyOutcome::Ignored);
    }

    #[test]
    fn test_escape_dismisses_without_selection() {
        let mut picker = PromptPicker::new();
        picker.open(greetings(), None);
        assert_eq!(picker.handle_key(PickerKey::Escape), KeyOutcome::Consumed);
        assert!(!picker.is_open());
        assert_eq!(picker.commit(), None);
    }

    #[test]
    fn test_pointer_outside_dismisses() {
        let mut picker = PromptPicker::new();
        picker.open(greetings(), None);

        assert!(!picker.pointer_down(true));
        assert!(picker.is_open());
        assert!(picker.pointer_down(false));
        assert!(!picker.is_open());
        assert!(!picker.pointer_down(false));
    }

    #[test]
    fn test_select_at_row() {
        let mut picker = PromptPicker::new();
        picker.open(greetings(), None);
        picker.type_query("o");

        assert_eq!(picker.select_at(5), None);
        assert!(picker.is_open());
        assert_eq!(picker.select_at(1), Some("2".to_string()));
    }

    #[test]
    fn test_dom_key_mapping() {
        assert_eq!(PickerKey::from_dom_key("ArrowDown"), Some(PickerKey::ArrowDown));
        assert_eq!(PickerKey::from_dom_key("Esc"), Some(PickerKey::Escape));
        assert_eq!(PickerKey::from_dom_key("a"), None);
    }

    // ========================================
    // view()
    // ========================================

    #[test]
    fn test_view_rows_and_preview() {
        let mut picker = PromptPicker::new();
        let long = "word ".repeat(40);
        picker.open(vec![prompt("a", "A", "multi\n  line\tbody"), prompt("b", "B", &long)], None);

        let view = picker.view().unwrap();
        assert_eq!(view.rows.len(), 2);
        assert!(view.rows[0].highlighted);
        assert!(!view.rows[1].highlighted);
        assert_eq!(view.rows[0].preview, "multi line body");
        assert_eq!(view.rows[1].preview.chars().count(), PREVIEW_CHARS);
        assert!(view.rows[1].preview.ends_with('…'));
        assert_eq!(view.empty, None);
    }

    #[test]
    fn test_view_closed_is_none() {
        assert!(PromptPicker::new().view().is_none());
    }

    // ========================================
    // Properties
    // ========================================

    #[derive(Debug, Clone)]
    enum Op {
        Type(String),
        Move(isize),
    }

    fn collection() -> impl Strategy<Value = Vec<Prompt>> {
        prop::collection::vec(("[a-cA-C ]{1,6}", "[a-cA-C ]{1,10}"), 0..8).prop_map(|pairs| {
            pairs
                .into_iter()
                .enumerate()
                .map(|(i, (title, content))| {
                    prompt(&i.to_string(), &format!("t{}", title), &format!("c{}", content))
                })
                .collect()
        })
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            "[a-cA-C ]{0,5}".prop_map(Op::Type),
            (-3isize..=3).prop_map(Op::Move),
        ]
    }

    proptest! {
        #[test]
        fn prop_filtered_view_is_matching_subsequence(prompts in collection(), query in "[a-cA-C ]{0,6}") {
            let indices = filter_indices(&prompts, &query);
            prop_assert!(indices.windows(2).all(|w| w[0] < w[1]));

            let terms = query_terms(&query);
            for (i, p) in prompts.iter().enumerate() {
                let expected = terms.iter().all(|t| {
                    p.title.to_lowercase().contains(t.as_str())
                        || p.content.to_lowercase().contains(t.as_str())
                });
                prop_assert_eq!(indices.contains(&i), expected);
            }
        }

        #[test]
        fn prop_highlight_valid_iff_view_nonempty(prompts in collection(), ops in prop::collection::vec(op(), 0..20)) {
            let mut picker = PromptPicker::new();
            let last = prompts.last().map(|p| p.id.clone());
            picker.open(prompts, last);

            for op in ops {
                match op {
                    Op::Type(q) => picker.type_query(&q),
                    Op::Move(d) => picker.move_highlight(d),
                }
                let len = picker.filtered().len();
                match picker.highlighted_index() {
                    None => prop_assert_eq!(len, 0),
                    Some(i) => prop_assert!(i < len),
                }
            }
        }
    }
}
