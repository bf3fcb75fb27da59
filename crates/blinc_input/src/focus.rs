//! Keyboard focus
//!
//! Holds the element that keyboard and text events route to. Changing focus
//! yields a [`FocusChange`]; the pipeline routes it as LostFocus on the old
//! element followed by GotFocus on the new one.

use blinc_core::tree::{ElementId, HitTestable};

use crate::routing::FocusChange;

/// Tracks the focused element
#[derive(Clone, Debug, Default)]
pub struct FocusManager {
    focused: Option<ElementId>,
}

impl FocusManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Currently focused element
    pub fn focused(&self) -> Option<ElementId> {
        self.focused
    }

    /// Move focus, returning the change if focus actually moved
    pub fn set_focus(&mut self, element: Option<ElementId>) -> Option<FocusChange> {
        if self.focused == element {
            return None;
        }
        let change = FocusChange {
            old: self.focused,
            new: element,
        };
        self.focused = element;
        tracing::debug!(target: "blinc_input::pipeline", old = ?change.old, new = ?change.new, "focus changed");
        Some(change)
    }

    /// Drop focus from an element that is no longer in the tree
    pub fn validate<T: HitTestable + ?Sized>(&mut self, tree: &T) -> Option<FocusChange> {
        match self.focused {
            Some(element) if !tree.contains(element) => {
                self.focused = None;
                Some(FocusChange {
                    old: Some(element),
                    new: None,
                })
            }
            _ => None,
        }
    }
}
