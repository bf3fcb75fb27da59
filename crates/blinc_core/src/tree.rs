//! Element tree observed by input dispatch
//!
//! The layout system owns the visual tree; input dispatch only looks at it
//! through the [`HitTestable`] capability. Nodes are addressed by a
//! generation-checked [`ElementId`] so caches and handler tables can key on
//! a stable handle instead of object identity.
//!
//! [`ElementTree`] is a SlotMap-backed arena implementing the capability.
//! Hosts that already have their own tree only need to implement
//! [`HitTestable`].
//!
//! # Example
//!
//! ```rust
//! use blinc_core::geometry::{Affine2D, Point, Rect};
//! use blinc_core::tree::{ElementProps, ElementTree, HitTestable};
//!
//! let mut tree = ElementTree::new();
//! let root = tree.create_root(ElementProps::new(Rect::new(0.0, 0.0, 800.0, 600.0)));
//! let button = tree
//!     .create_child(
//!         root,
//!         ElementProps::new(Rect::new(0.0, 0.0, 120.0, 40.0))
//!             .with_transform(Affine2D::translation(20.0, 20.0))
//!             .with_name("button"),
//!     )
//!     .unwrap();
//!
//! assert_eq!(tree.parent(button), Some(root));
//! assert!(tree.hit_test_local(button, Point::new(60.0, 20.0)));
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use slotmap::{new_key_type, Key, SlotMap};
use smallvec::SmallVec;
use thiserror::Error;

use crate::geometry::{Affine2D, Point, Rect};

new_key_type! {
    /// Stable handle to an element in a visual tree
    pub struct ElementId;
}

impl ElementId {
    /// Convert to a raw u64 representation
    ///
    /// This is useful for hashing and for logging.
    pub fn to_raw(self) -> u64 {
        self.data().as_ffi()
    }

    /// Create from a raw u64 representation produced by [`ElementId::to_raw`]
    pub fn from_raw(raw: u64) -> Self {
        Self::from(slotmap::KeyData::from_ffi(raw))
    }
}

/// Element tree errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    /// The element does not exist (never created or already removed)
    #[error("Unknown element: {0:?}")]
    UnknownElement(ElementId),

    /// Re-parenting would make an element its own ancestor
    #[error("Attaching {child:?} under {parent:?} would create a cycle")]
    WouldCycle { parent: ElementId, child: ElementId },

    /// The element already has a parent
    #[error("Element {0:?} is already attached")]
    AlreadyAttached(ElementId),
}

/// Shape used by an element's local hit-test predicate
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum HitShape {
    /// The whole local bounds rectangle
    #[default]
    Bounds,
    /// The ellipse inscribed in the local bounds
    Ellipse,
    /// Never hit locally (e.g. a pass-through container); children still can be
    None,
}

/// Per-element state needed for spatial queries and routing
#[derive(Clone, Debug, PartialEq)]
pub struct ElementProps {
    /// Debug name, shown in logs
    pub name: Option<String>,
    /// Whether the element is rendered at all
    pub visible: bool,
    /// Whether the element participates in hit testing
    pub hit_test_visible: bool,
    /// Whether the element accepts input
    pub enabled: bool,
    /// Bounds in the element's own coordinate space
    pub local_bounds: Rect,
    /// Local-to-parent transform (includes the layout offset)
    pub transform: Affine2D,
    /// Opacity in 0.0..=1.0
    pub opacity: f32,
    /// Paint/hit-test order, higher is on top
    pub z_index: i32,
    /// Clip rectangle in local coordinates
    pub clip: Option<Rect>,
    /// Local hit-test predicate
    pub hit_shape: HitShape,
}

impl Default for ElementProps {
    fn default() -> Self {
        Self::new(Rect::ZERO)
    }
}

impl ElementProps {
    pub fn new(local_bounds: Rect) -> Self {
        Self {
            name: None,
            visible: true,
            hit_test_visible: true,
            enabled: true,
            local_bounds,
            transform: Affine2D::IDENTITY,
            opacity: 1.0,
            z_index: 0,
            clip: None,
            hit_shape: HitShape::Bounds,
        }
    }

    /// Bounds after applying the local transform, in parent coordinates
    pub fn render_bounds(&self) -> Rect {
        self.transform.transform_rect(&self.local_bounds)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_transform(mut self, transform: Affine2D) -> Self {
        self.transform = transform;
        self
    }

    /// Shorthand for a translation transform
    pub fn at(self, x: f32, y: f32) -> Self {
        self.with_transform(Affine2D::translation(x, y))
    }

    pub fn with_z_index(mut self, z_index: i32) -> Self {
        self.z_index = z_index;
        self
    }

    pub fn with_opacity(mut self, opacity: f32) -> Self {
        self.opacity = opacity;
        self
    }

    pub fn with_clip(mut self, clip: Rect) -> Self {
        self.clip = Some(clip);
        self
    }

    pub fn with_hit_shape(mut self, shape: HitShape) -> Self {
        self.hit_shape = shape;
        self
    }

    pub fn with_visible(mut self, visible: bool) -> Self {
        self.visible = visible;
        self
    }

    pub fn with_hit_test_visible(mut self, hit_test_visible: bool) -> Self {
        self.hit_test_visible = hit_test_visible;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Evaluate the hit shape at a point in local coordinates
    pub fn shape_contains(&self, local: Point) -> bool {
        match self.hit_shape {
            HitShape::Bounds => self.local_bounds.contains(local),
            HitShape::Ellipse => {
                let b = &self.local_bounds;
                let rx = b.width() / 2.0;
                let ry = b.height() / 2.0;
                if rx <= 0.0 || ry <= 0.0 {
                    return false;
                }
                let c = b.center();
                let nx = (local.x - c.x) / rx;
                let ny = (local.y - c.y) / ry;
                nx * nx + ny * ny <= 1.0
            }
            HitShape::None => false,
        }
    }
}

/// Capability a visual tree exposes to hit testing and routing
///
/// Parent references are for lookup only. Implementations are not required
/// to be well formed: callers walking parents guard against cycles.
pub trait HitTestable {
    /// Whether the handle refers to a live element
    fn contains(&self, id: ElementId) -> bool {
        self.props(id).is_some()
    }

    /// Geometry and visibility state of an element
    fn props(&self, id: ElementId) -> Option<&ElementProps>;

    /// Parent element, `None` for roots and unknown ids
    fn parent(&self, id: ElementId) -> Option<ElementId>;

    /// Children in paint order (later children are drawn on top)
    fn children(&self, id: ElementId) -> &[ElementId];

    /// Local hit-test predicate, `local` is in the element's own space
    fn hit_test_local(&self, id: ElementId, local: Point) -> bool {
        self.props(id).is_some_and(|p| p.shape_contains(local))
    }
}

/// Callback invoked when geometry changes
///
/// `Some(id)` for a single element, `None` when the whole tree was re-laid-out.
pub type LayoutCallback = Arc<dyn Fn(Option<ElementId>) + Send + Sync>;

struct ElementNode {
    props: ElementProps,
    parent: Option<ElementId>,
    children: SmallVec<[ElementId; 4]>,
}

/// Arena-backed element tree
pub struct ElementTree {
    nodes: SlotMap<ElementId, ElementNode>,
    root: Option<ElementId>,
    layout_listeners: Mutex<Vec<LayoutCallback>>,
}

impl Default for ElementTree {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ElementTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElementTree")
            .field("len", &self.nodes.len())
            .field("root", &self.root)
            .finish()
    }
}

impl ElementTree {
    pub fn new() -> Self {
        Self {
            nodes: SlotMap::with_key(),
            root: None,
            layout_listeners: Mutex::new(Vec::new()),
        }
    }

    /// Create a detached element
    pub fn create(&mut self, props: ElementProps) -> ElementId {
        self.nodes.insert(ElementNode {
            props,
            parent: None,
            children: SmallVec::new(),
        })
    }

    /// Create an element and make it the tree root
    pub fn create_root(&mut self, props: ElementProps) -> ElementId {
        let id = self.create(props);
        self.root = Some(id);
        id
    }

    /// Create an element as the last child of `parent`
    pub fn create_child(
        &mut self,
        parent: ElementId,
        props: ElementProps,
    ) -> Result<ElementId, TreeError> {
        if !self.nodes.contains_key(parent) {
            return Err(TreeError::UnknownElement(parent));
        }
        let id = self.create(props);
        self.append_child(parent, id)?;
        Ok(id)
    }

    /// Attach a detached element as the last child of `parent`
    pub fn append_child(&mut self, parent: ElementId, child: ElementId) -> Result<(), TreeError> {
        if !self.nodes.contains_key(parent) {
            return Err(TreeError::UnknownElement(parent));
        }
        let Some(child_node) = self.nodes.get(child) else {
            return Err(TreeError::UnknownElement(child));
        };
        if child_node.parent.is_some() {
            return Err(TreeError::AlreadyAttached(child));
        }

        // The new parent must not be inside the child's subtree
        let mut cursor = Some(parent);
        while let Some(node) = cursor {
            if node == child {
                return Err(TreeError::WouldCycle { parent, child });
            }
            cursor = self.nodes.get(node).and_then(|n| n.parent);
        }

        if let Some(node) = self.nodes.get_mut(child) {
            node.parent = Some(parent);
        }
        if let Some(node) = self.nodes.get_mut(parent) {
            node.children.push(child);
        }
        self.notify_layout_updated(Some(parent));
        Ok(())
    }

    /// Detach an element from its parent without removing it
    pub fn detach(&mut self, id: ElementId) -> Result<(), TreeError> {
        let Some(node) = self.nodes.get_mut(id) else {
            return Err(TreeError::UnknownElement(id));
        };
        if let Some(parent) = node.parent.take() {
            if let Some(parent_node) = self.nodes.get_mut(parent) {
                parent_node.children.retain(|c| *c != id);
            }
            self.notify_layout_updated(Some(parent));
        }
        Ok(())
    }

    /// Remove an element and all its descendants
    pub fn remove(&mut self, id: ElementId) -> Result<(), TreeError> {
        self.detach(id)?;

        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.remove(current) {
                stack.extend(node.children);
            }
        }
        if self.root == Some(id) {
            self.root = None;
        }
        tracing::trace!(element = ?id, "removed element subtree");
        self.notify_layout_updated(None);
        Ok(())
    }

    /// Current root element
    pub fn root(&self) -> Option<ElementId> {
        self.root
    }

    pub fn set_root(&mut self, root: Option<ElementId>) {
        self.root = root;
        self.notify_layout_updated(None);
    }

    /// Mutably update an element's props and notify layout listeners
    pub fn update<F>(&mut self, id: ElementId, f: F) -> Result<(), TreeError>
    where
        F: FnOnce(&mut ElementProps),
    {
        let Some(node) = self.nodes.get_mut(id) else {
            return Err(TreeError::UnknownElement(id));
        };
        f(&mut node.props);
        self.notify_layout_updated(Some(id));
        Ok(())
    }

    /// Replace an element's props and notify layout listeners
    pub fn set_props(&mut self, id: ElementId, props: ElementProps) -> Result<(), TreeError> {
        self.update(id, |p| *p = props)
    }

    /// Look up an element by debug name (first match in arena order)
    pub fn find_by_name(&self, name: &str) -> Option<ElementId> {
        self.nodes
            .iter()
            .find(|(_, n)| n.props.name.as_deref() == Some(name))
            .map(|(id, _)| id)
    }

    /// Number of elements in the arena
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Register a listener for geometry changes
    pub fn on_layout_updated<F>(&self, callback: F)
    where
        F: Fn(Option<ElementId>) + Send + Sync + 'static,
    {
        self.layout_listeners.lock().push(Arc::new(callback));
    }

    /// Tell listeners that geometry changed
    ///
    /// Called automatically by mutating methods; layout systems that write
    /// geometry in bulk call it once with `None` after arrange.
    pub fn notify_layout_updated(&self, element: Option<ElementId>) {
        let listeners: Vec<LayoutCallback> = self.layout_listeners.lock().clone();
        for listener in listeners {
            listener(element);
        }
    }
}

impl HitTestable for ElementTree {
    fn contains(&self, id: ElementId) -> bool {
        self.nodes.contains_key(id)
    }

    fn props(&self, id: ElementId) -> Option<&ElementProps> {
        self.nodes.get(id).map(|n| &n.props)
    }

    fn parent(&self, id: ElementId) -> Option<ElementId> {
        self.nodes.get(id).and_then(|n| n.parent)
    }

    fn children(&self, id: ElementId) -> &[ElementId] {
        self.nodes
            .get(id)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }
}
