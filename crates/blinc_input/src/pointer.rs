//! Per-pointer state: capture and hover
//!
//! Pointers are keyed by (device id, pointer id) so simultaneous touches on
//! one device are tracked independently.

use blinc_core::tree::ElementId;
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

/// (device id, pointer id)
pub type PointerKey = (u32, u64);

/// Pointer capture table
///
/// A captured pointer routes to its capturing element instead of whatever
/// is under it, until released.
#[derive(Clone, Debug, Default)]
pub struct CaptureManager {
    captures: FxHashMap<PointerKey, ElementId>,
}

impl CaptureManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture `pointer` to `element`, returning the previous captor
    pub fn capture(&mut self, pointer: PointerKey, element: ElementId) -> Option<ElementId> {
        tracing::debug!(target: "blinc_input::pipeline", ?pointer, ?element, "pointer captured");
        self.captures.insert(pointer, element)
    }

    pub fn release(&mut self, pointer: PointerKey) -> Option<ElementId> {
        let released = self.captures.remove(&pointer);
        if released.is_some() {
            tracing::debug!(target: "blinc_input::pipeline", ?pointer, "pointer released");
        }
        released
    }

    /// Release every pointer captured by `element`
    pub fn release_element(&mut self, element: ElementId) -> usize {
        let before = self.captures.len();
        self.captures.retain(|_, e| *e != element);
        before - self.captures.len()
    }

    pub fn captured(&self, pointer: PointerKey) -> Option<ElementId> {
        self.captures.get(&pointer).copied()
    }

    pub fn clear(&mut self) {
        self.captures.clear();
    }

    pub fn len(&self) -> usize {
        self.captures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.captures.is_empty()
    }
}

/// Elements a pointer left and entered
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HoverTransition {
    /// Deepest first
    pub left: SmallVec<[ElementId; 8]>,
    /// Outermost first
    pub entered: SmallVec<[ElementId; 8]>,
}

impl HoverTransition {
    pub fn is_empty(&self) -> bool {
        self.left.is_empty() && self.entered.is_empty()
    }
}

/// Hovered path per pointer
#[derive(Clone, Debug, Default)]
pub struct HoverTracker {
    hovered: FxHashMap<PointerKey, SmallVec<[ElementId; 16]>>,
}

impl HoverTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the hovered path of `pointer` and diff it against the old one
    pub fn update(&mut self, pointer: PointerKey, path: &[ElementId]) -> HoverTransition {
        let old = self.hovered.remove(&pointer).unwrap_or_default();
        let old_set: FxHashSet<ElementId> = old.iter().copied().collect();
        let new_set: FxHashSet<ElementId> = path.iter().copied().collect();

        let transition = HoverTransition {
            left: old.iter().rev().copied().filter(|e| !new_set.contains(e)).collect(),
            entered: path.iter().copied().filter(|e| !old_set.contains(e)).collect(),
        };
        if !path.is_empty() {
            self.hovered.insert(pointer, path.iter().copied().collect());
        }
        transition
    }

    /// Forget `pointer`, returning everything it was hovering (deepest first)
    pub fn leave(&mut self, pointer: PointerKey) -> SmallVec<[ElementId; 8]> {
        self.hovered
            .remove(&pointer)
            .map(|path| path.into_iter().rev().collect())
            .unwrap_or_default()
    }

    pub fn hovered(&self, pointer: PointerKey) -> &[ElementId] {
        self.hovered
            .get(&pointer)
            .map(|p| p.as_slice())
            .unwrap_or(&[])
    }

    /// Whether any pointer hovers `element`
    pub fn is_hovered(&self, element: ElementId) -> bool {
        self.hovered.values().any(|path| path.contains(&element))
    }
}
