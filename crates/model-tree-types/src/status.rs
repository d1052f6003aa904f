//! Visibility status and its merge algebra.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VisibilityState {
    Visible,
    Hidden,
    Partial,
    /// The node is outside what the current view can show. Terminal: never merged.
    Disabled,
}

impl fmt::Display for VisibilityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VisibilityState::Visible => "visible",
            VisibilityState::Hidden => "hidden",
            VisibilityState::Partial => "partial",
            VisibilityState::Disabled => "disabled",
        };
        f.write_str(s)
    }
}

/// Computed visibility of one hierarchy node. Created fresh per computation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisibilityStatus {
    pub state: VisibilityState,
    /// Opaque reason key a renderer may turn into a tooltip.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl VisibilityStatus {
    pub fn new(state: VisibilityState) -> Self {
        Self {
            state,
            reason: None,
        }
    }

    pub fn visible() -> Self {
        Self::new(VisibilityState::Visible)
    }

    pub fn hidden() -> Self {
        Self::new(VisibilityState::Hidden)
    }

    pub fn partial() -> Self {
        Self::new(VisibilityState::Partial)
    }

    pub fn disabled() -> Self {
        Self::new(VisibilityState::Disabled)
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn is_visible(&self) -> bool {
        self.state == VisibilityState::Visible
    }

    pub fn is_hidden(&self) -> bool {
        self.state == VisibilityState::Hidden
    }

    pub fn is_partial(&self) -> bool {
        self.state == VisibilityState::Partial
    }

    pub fn is_disabled(&self) -> bool {
        self.state == VisibilityState::Disabled
    }

    /// Tri-state merge of two statuses. Equal visible/hidden states keep the
    /// left-hand reason; anything mixed becomes `partial` without a reason.
    ///
    /// `disabled` never takes part: the other operand is returned unchanged.
    pub fn merge(self, other: VisibilityStatus) -> VisibilityStatus {
        if other.is_disabled() {
            return self;
        }
        if self.is_disabled() {
            return other;
        }
        if self.state == other.state && self.state != VisibilityState::Partial {
            return self;
        }
        VisibilityStatus::partial()
    }
}

// ─── Reducer ──────────────────────────────────────────────────

/// Early-exit reduction over child statuses.
///
/// All visible → visible, all hidden → hidden, anything else → partial, and an
/// empty set of children → visible. Disabled children are skipped.
#[derive(Clone, Debug, Default)]
pub struct StatusMerger {
    seen_visible: bool,
    seen_hidden: bool,
    seen_partial: bool,
    count: usize,
    first: Option<VisibilityStatus>,
}

impl StatusMerger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, status: VisibilityStatus) {
        match status.state {
            VisibilityState::Visible => self.seen_visible = true,
            VisibilityState::Hidden => self.seen_hidden = true,
            VisibilityState::Partial => self.seen_partial = true,
            VisibilityState::Disabled => return,
        }
        self.count += 1;
        if self.first.is_none() {
            self.first = Some(status);
        }
    }

    /// True once the result can no longer change; callers stop scanning.
    pub fn is_settled(&self) -> bool {
        self.seen_partial || (self.seen_visible && self.seen_hidden)
    }

    pub fn finish(self) -> VisibilityStatus {
        if self.is_settled() {
            return VisibilityStatus::partial();
        }
        // Only one of visible/hidden was seen (or nothing at all). A single
        // child's reason is kept, several children collapse into a bare status.
        match self.first {
            Some(first) if self.count == 1 => first,
            Some(first) => VisibilityStatus::new(first.state),
            None => VisibilityStatus::visible(),
        }
    }
}

/// Reduce a complete set of child statuses.
pub fn merge_all(statuses: impl IntoIterator<Item = VisibilityStatus>) -> VisibilityStatus {
    let mut merger = StatusMerger::new();
    for status in statuses {
        merger.push(status);
        if merger.is_settled() {
            break;
        }
    }
    merger.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_empty_children_are_visible() {
        assert_eq!(merge_all(Vec::new()).state, VisibilityState::Visible);
    }

    #[test]
    fn test_uniform_children() {
        let all_hidden = vec![VisibilityStatus::hidden(); 3];
        assert_eq!(merge_all(all_hidden).state, VisibilityState::Hidden);
        let all_visible = vec![VisibilityStatus::visible(); 3];
        assert_eq!(merge_all(all_visible).state, VisibilityState::Visible);
    }

    #[test]
    fn test_mixed_children_are_partial() {
        let mixed = vec![VisibilityStatus::visible(), VisibilityStatus::hidden()];
        assert_eq!(merge_all(mixed).state, VisibilityState::Partial);
        let with_partial = vec![VisibilityStatus::visible(), VisibilityStatus::partial()];
        assert_eq!(merge_all(with_partial).state, VisibilityState::Partial);
    }

    #[test]
    fn test_merger_settles_early() {
        let mut merger = StatusMerger::new();
        merger.push(VisibilityStatus::visible());
        assert!(!merger.is_settled());
        merger.push(VisibilityStatus::hidden());
        assert!(merger.is_settled());
    }

    #[test]
    fn test_disabled_is_never_merged() {
        let status = VisibilityStatus::hidden().merge(VisibilityStatus::disabled());
        assert_eq!(status.state, VisibilityState::Hidden);
        let only_disabled = vec![VisibilityStatus::disabled(), VisibilityStatus::disabled()];
        assert_eq!(merge_all(only_disabled).state, VisibilityState::Visible);
    }

    #[test]
    fn test_single_child_keeps_reason() {
        let status = merge_all(vec![VisibilityStatus::hidden().with_reason("model.notDisplayed")]);
        assert_eq!(status.reason.as_deref(), Some("model.notDisplayed"));
    }

    #[test]
    fn test_pairwise_merge() {
        let v = VisibilityStatus::visible();
        let h = VisibilityStatus::hidden();
        assert!(v.clone().merge(v.clone()).is_visible());
        assert!(h.clone().merge(h.clone()).is_hidden());
        assert!(v.clone().merge(h.clone()).is_partial());
        assert!(h.merge(v).is_partial());
    }

    fn arb_state() -> impl Strategy<Value = VisibilityState> {
        prop_oneof![
            Just(VisibilityState::Visible),
            Just(VisibilityState::Hidden),
            Just(VisibilityState::Partial),
            Just(VisibilityState::Disabled),
        ]
    }

    fn expected(states: &[VisibilityState]) -> VisibilityState {
        let relevant: Vec<_> = states
            .iter()
            .filter(|s| **s != VisibilityState::Disabled)
            .collect();
        if relevant.iter().all(|s| **s == VisibilityState::Visible) {
            VisibilityState::Visible
        } else if relevant.iter().all(|s| **s == VisibilityState::Hidden) {
            VisibilityState::Hidden
        } else {
            VisibilityState::Partial
        }
    }

    proptest! {
        #[test]
        fn merge_is_order_independent(states in prop::collection::vec(arb_state(), 0..12)) {
            let forward = merge_all(states.iter().map(|s| VisibilityStatus::new(*s)));
            let backward = merge_all(states.iter().rev().map(|s| VisibilityStatus::new(*s)));
            prop_assert_eq!(forward.state, backward.state);
            prop_assert_eq!(forward.state, expected(&states));
        }

        #[test]
        fn pairwise_fold_matches_reducer(states in prop::collection::vec(arb_state(), 1..12)) {
            let folded = states
                .iter()
                .map(|s| VisibilityStatus::new(*s))
                .fold(VisibilityStatus::disabled(), VisibilityStatus::merge);
            let reduced = merge_all(states.iter().map(|s| VisibilityStatus::new(*s)));
            if folded.is_disabled() {
                // Every input was disabled; the reducer treats that as empty.
                prop_assert!(reduced.is_visible());
            } else {
                prop_assert_eq!(folded.state, reduced.state);
            }
        }
    }
}
