//! Hit testing
//!
//! Resolves a window point to the topmost interactive element and its
//! ancestor path. Each query starts with a depth-first walk from the given
//! root that accumulates global transforms, bounds, clips and opacity. The
//! indexed variant then loads the walked bounds into a [`QuadTree`] and only
//! tests the elements under the point; the basic variant tests every walked
//! element. Both order candidates the same way (z-index, then paint order,
//! topmost first) so they always agree.
//!
//! ```text
//! walk (transform, bounds, clip, opacity)
//!     ↓
//! candidates (quadtree query | linear scan)
//!     ↓
//! sort by (z_index desc, paint order desc)
//!     ↓
//! reject (visibility, opacity, clip) → local predicate → first pass wins
//! ```

use blinc_core::geometry::{Affine2D, Point, Rect};
use blinc_core::tree::{ElementId, ElementProps, HitTestable};
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::cache::{BoundsCache, TransformCache};
use crate::config::HitTestConfig;
use crate::spatial::QuadTree;

const TARGET: &str = "blinc_input::hit_test";

/// Result of a hit test
#[derive(Clone, Debug, PartialEq)]
pub struct HitTestResult {
    /// The hit element, `None` for a miss
    pub element: Option<ElementId>,
    /// Query point in window coordinates
    pub global_point: Point,
    /// Query point in the hit element's local space
    pub local_point: Point,
    /// Ancestor path from the walk root to the hit element (inclusive)
    pub path: Vec<ElementId>,
}

impl HitTestResult {
    pub fn miss(point: Point) -> Self {
        Self {
            element: None,
            global_point: point,
            local_point: point,
            path: Vec::new(),
        }
    }

    pub fn is_hit(&self) -> bool {
        self.element.is_some()
    }
}

/// What a filter wants done with an element during the walk
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterBehavior {
    Continue,
    /// Not hittable, children still are
    SkipSelf,
    /// Hittable, children are not walked
    SkipChildren,
    SkipSelfAndChildren,
}

/// Walk filter hook
pub type HitTestFilter = Box<dyn Fn(ElementId, &ElementProps) -> FilterBehavior + Send + Sync>;

/// Engine counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HitTestStats {
    pub queries: u64,
    pub index_rebuilds: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Elements loaded by the most recent walk
    pub last_indexed: usize,
}

/// Per-element state accumulated by the walk
#[derive(Clone, Copy, Debug)]
struct WalkRecord {
    parent: Option<ElementId>,
    transform: Affine2D,
    bounds: Rect,
    /// Intersection of every clip on the ancestor chain, in window space
    clip: Option<Rect>,
    /// An ancestor clip has an empty intersection
    clipped_out: bool,
    opacity: f32,
    z_index: i32,
    order: u32,
    /// Cleared by `SkipSelf` filters
    selectable: bool,
}

/// Hit-test engine with spatial index and global transform caches
pub struct HitTestEngine {
    config: HitTestConfig,
    index: QuadTree,
    transforms: TransformCache,
    bounds: BoundsCache,
    filter: Option<HitTestFilter>,
    records: FxHashMap<ElementId, WalkRecord>,
    walk_order: Vec<ElementId>,
    queries: u64,
    index_rebuilds: u64,
}

impl std::fmt::Debug for HitTestEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HitTestEngine")
            .field("config", &self.config)
            .field("indexed", &self.index.len())
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

impl Default for HitTestEngine {
    fn default() -> Self {
        Self::new(HitTestConfig::default())
    }
}

impl HitTestEngine {
    pub fn new(config: HitTestConfig) -> Self {
        let index = QuadTree::with_limits(
            Rect::ZERO,
            config.max_elements_per_node.max(1),
            config.max_quadtree_depth,
        );
        Self {
            config,
            index,
            transforms: TransformCache::new(),
            bounds: BoundsCache::new(),
            filter: None,
            records: FxHashMap::default(),
            walk_order: Vec::new(),
            queries: 0,
            index_rebuilds: 0,
        }
    }

    pub fn config(&self) -> &HitTestConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: HitTestConfig) {
        self.index = QuadTree::with_limits(
            Rect::ZERO,
            config.max_elements_per_node.max(1),
            config.max_quadtree_depth,
        );
        self.config = config;
    }

    /// Install a walk filter
    pub fn set_filter<F>(&mut self, filter: F)
    where
        F: Fn(ElementId, &ElementProps) -> FilterBehavior + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(filter));
    }

    pub fn clear_filter(&mut self) {
        self.filter = None;
    }

    pub fn stats(&self) -> HitTestStats {
        let t = self.transforms.stats();
        let b = self.bounds.stats();
        HitTestStats {
            queries: self.queries,
            index_rebuilds: self.index_rebuilds,
            cache_hits: t.hits + b.hits,
            cache_misses: t.misses + b.misses,
            last_indexed: self.walk_order.len(),
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Topmost element under `point`
    pub fn hit_test<T: HitTestable + ?Sized>(
        &mut self,
        tree: &T,
        root: ElementId,
        point: Point,
    ) -> HitTestResult {
        self.queries += 1;
        self.prepare(tree, root);
        let candidates = self.candidates_at(point);
        for id in candidates {
            if let Some(result) = self.test_candidate(tree, id, point) {
                tracing::trace!(target: TARGET, element = ?id, x = point.x, y = point.y, "hit");
                return result;
            }
        }
        tracing::trace!(target: TARGET, x = point.x, y = point.y, "miss");
        HitTestResult::miss(point)
    }

    /// Every element under `point`, topmost first
    pub fn hit_test_all<T: HitTestable + ?Sized>(
        &mut self,
        tree: &T,
        root: ElementId,
        point: Point,
    ) -> Vec<HitTestResult> {
        self.queries += 1;
        self.prepare(tree, root);
        self.candidates_at(point)
            .into_iter()
            .filter_map(|id| self.test_candidate(tree, id, point))
            .collect()
    }

    /// Hittable elements whose global bounds intersect `rect`, in no particular order
    ///
    /// Local shape predicates are not evaluated for region queries.
    pub fn hit_test_region<T: HitTestable + ?Sized>(
        &mut self,
        tree: &T,
        root: ElementId,
        rect: Rect,
    ) -> Vec<HitTestResult> {
        self.queries += 1;
        self.prepare(tree, root);

        let candidates = if self.config.use_spatial_index {
            self.index.query_region(&rect)
        } else {
            self.walk_order.clone()
        };

        let center = rect.center();
        candidates
            .into_iter()
            .filter_map(|id| {
                let record = self.records.get(&id)?;
                if !record.bounds.touches(&rect) {
                    return None;
                }
                if let Some(clip) = record.clip {
                    if !clip.touches(&rect) {
                        return None;
                    }
                }
                let props = tree.props(id)?;
                if !self.accepts(record, props) {
                    return None;
                }
                Some(HitTestResult {
                    element: Some(id),
                    global_point: center,
                    local_point: to_local(&record.transform, center),
                    path: self.path_to(id),
                })
            })
            .collect()
    }

    // ========================================================================
    // Global geometry
    // ========================================================================

    /// Global transform of `id`, composed up the parent chain
    ///
    /// Returns `None` for unknown elements.
    pub fn global_transform<T: HitTestable + ?Sized>(
        &mut self,
        tree: &T,
        id: ElementId,
    ) -> Option<Affine2D> {
        if let Some(cached) = self.transforms.get(id) {
            return Some(cached);
        }
        tree.props(id)?;

        // Collect ancestors up to the first cached one (or the root)
        let mut chain: SmallVec<[ElementId; 16]> = SmallVec::new();
        let mut visited = FxHashSet::default();
        let mut base = Affine2D::IDENTITY;
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if !visited.insert(current) {
                tracing::warn!(target: TARGET, element = ?current, "parent cycle while composing transform");
                break;
            }
            if current != id {
                if let Some(cached) = self.transforms.peek(current) {
                    base = cached;
                    break;
                }
            }
            if !tree.contains(current) {
                break;
            }
            chain.push(current);
            cursor = tree.parent(current);
        }

        for &element in chain.iter().rev() {
            let local = tree
                .props(element)
                .map_or(Affine2D::IDENTITY, |p| p.transform);
            base = base.then(&local);
            self.transforms.insert(element, base);
        }
        Some(base)
    }

    /// Axis-aligned global bounds of `id`
    pub fn global_bounds<T: HitTestable + ?Sized>(
        &mut self,
        tree: &T,
        id: ElementId,
    ) -> Option<Rect> {
        if let Some(cached) = self.bounds.get(id) {
            return Some(cached);
        }
        let transform = self.global_transform(tree, id)?;
        let bounds = transform.transform_rect(&tree.props(id)?.local_bounds);
        self.bounds.insert(id, bounds);
        Some(bounds)
    }

    // ========================================================================
    // Invalidation
    // ========================================================================

    /// Drop cached geometry for one element
    pub fn invalidate_element(&mut self, id: ElementId) {
        self.transforms.invalidate(id);
        self.bounds.invalidate(id);
    }

    /// Drop cached geometry for an element and its descendants
    pub fn invalidate_subtree<T: HitTestable + ?Sized>(&mut self, tree: &T, id: ElementId) {
        let mut visited = FxHashSet::default();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            self.invalidate_element(current);
            stack.extend_from_slice(tree.children(current));
        }
    }

    /// Drop all cached geometry
    pub fn on_layout_updated(&mut self) {
        self.transforms.invalidate_all();
        self.bounds.invalidate_all();
        tracing::trace!(target: TARGET, version = self.transforms.version(), "geometry caches invalidated");
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Walk the tree from `root` and, for indexed queries, reload the quadtree
    fn prepare<T: HitTestable + ?Sized>(&mut self, tree: &T, root: ElementId) {
        self.walk(tree, root);
        if !self.config.use_spatial_index {
            return;
        }

        let region = self
            .walk_order
            .iter()
            .filter_map(|id| self.records.get(id))
            .map(|r| r.bounds)
            .reduce(|a, b| a.union(&b))
            .unwrap_or(Rect::ZERO);

        self.index.reset(region);
        for id in &self.walk_order {
            if let Some(record) = self.records.get(id) {
                if record.selectable {
                    self.index.insert(*id, record.bounds);
                }
            }
        }
        self.index_rebuilds += 1;
        tracing::trace!(
            target: TARGET,
            elements = self.index.len(),
            nodes = self.index.node_count(),
            "spatial index rebuilt"
        );
    }

    fn walk<T: HitTestable + ?Sized>(&mut self, tree: &T, root: ElementId) {
        self.records.clear();
        self.walk_order.clear();

        // A root that is not the tree root still sits under its ancestors' transforms
        let base = tree
            .parent(root)
            .and_then(|p| self.global_transform(tree, p))
            .unwrap_or(Affine2D::IDENTITY);

        struct Frame {
            id: ElementId,
            parent: Option<ElementId>,
            parent_transform: Affine2D,
            clip: Option<Rect>,
            clipped_out: bool,
            opacity: f32,
            depth: usize,
        }

        let mut stack = vec![Frame {
            id: root,
            parent: None,
            parent_transform: base,
            clip: None,
            clipped_out: false,
            opacity: 1.0,
            depth: 0,
        }];
        let mut order: u32 = 0;
        let mut depth_warned = false;

        while let Some(frame) = stack.pop() {
            if self.records.contains_key(&frame.id) {
                tracing::warn!(target: TARGET, element = ?frame.id, "element reached twice during walk, skipping");
                continue;
            }
            let Some(props) = tree.props(frame.id) else {
                continue;
            };
            if !props.visible {
                continue;
            }

            let behavior = self
                .filter
                .as_ref()
                .map_or(FilterBehavior::Continue, |f| f(frame.id, props));
            if behavior == FilterBehavior::SkipSelfAndChildren {
                continue;
            }

            let transform = match self.transforms.get(frame.id) {
                Some(t) => t,
                None => {
                    let t = frame.parent_transform.then(&props.transform);
                    self.transforms.insert(frame.id, t);
                    t
                }
            };
            let bounds = match self.bounds.get(frame.id) {
                Some(b) => b,
                None => {
                    let b = transform.transform_rect(&props.local_bounds);
                    self.bounds.insert(frame.id, b);
                    b
                }
            };

            let (clip, clipped_out) = match props.clip {
                Some(local_clip) if !frame.clipped_out => {
                    let own = transform.transform_rect(&local_clip);
                    match frame.clip {
                        Some(parent_clip) => match parent_clip.intersection(&own) {
                            Some(c) => (Some(c), false),
                            None => (frame.clip, true),
                        },
                        None => (Some(own), false),
                    }
                }
                _ => (frame.clip, frame.clipped_out),
            };
            let opacity = frame.opacity * props.opacity.clamp(0.0, 1.0);

            self.records.insert(
                frame.id,
                WalkRecord {
                    parent: frame.parent,
                    transform,
                    bounds,
                    clip,
                    clipped_out,
                    opacity,
                    z_index: props.z_index,
                    order,
                    selectable: behavior != FilterBehavior::SkipSelf,
                },
            );
            self.walk_order.push(frame.id);
            order += 1;

            if behavior == FilterBehavior::SkipChildren {
                continue;
            }
            if frame.depth >= self.config.max_depth {
                if !depth_warned {
                    tracing::warn!(
                        target: TARGET,
                        element = ?frame.id,
                        max_depth = self.config.max_depth,
                        "hit-test walk depth limit reached"
                    );
                    depth_warned = true;
                }
                continue;
            }

            // Reverse push keeps paint order on pop
            for &child in tree.children(frame.id).iter().rev() {
                stack.push(Frame {
                    id: child,
                    parent: Some(frame.id),
                    parent_transform: transform,
                    clip,
                    clipped_out,
                    opacity,
                    depth: frame.depth + 1,
                });
            }
        }
    }

    /// Candidate ids under `point`, topmost first
    fn candidates_at(&self, point: Point) -> Vec<ElementId> {
        let mut candidates: Vec<ElementId> = if self.config.use_spatial_index {
            self.index.query(point)
        } else {
            self.walk_order
                .iter()
                .copied()
                .filter(|id| {
                    self.records
                        .get(id)
                        .is_some_and(|r| r.selectable && r.bounds.contains(point))
                })
                .collect()
        };

        candidates.sort_by(|a, b| {
            let (ra, rb) = (self.records.get(a), self.records.get(b));
            let key = |r: Option<&WalkRecord>| r.map_or((i32::MIN, 0), |r| (r.z_index, r.order));
            key(rb).cmp(&key(ra))
        });
        candidates
    }

    fn accepts(&self, record: &WalkRecord, props: &ElementProps) -> bool {
        record.selectable
            && props.hit_test_visible
            && (props.enabled || self.config.include_disabled)
            && record.opacity > self.config.opacity_threshold
            && !record.clipped_out
    }

    fn test_candidate<T: HitTestable + ?Sized>(
        &self,
        tree: &T,
        id: ElementId,
        point: Point,
    ) -> Option<HitTestResult> {
        let record = self.records.get(&id)?;
        let props = tree.props(id)?;
        if !self.accepts(record, props) {
            return None;
        }
        if let Some(clip) = record.clip {
            if !clip.contains(point) {
                return None;
            }
        }
        if !record.bounds.contains(point) {
            return None;
        }

        let local = to_local(&record.transform, point);
        if !self.config.bounding_box_only && !tree.hit_test_local(id, local) {
            return None;
        }

        Some(HitTestResult {
            element: Some(id),
            global_point: point,
            local_point: local,
            path: self.path_to(id),
        })
    }

    /// Walk-root → `id` path from the recorded walk parents
    fn path_to(&self, id: ElementId) -> Vec<ElementId> {
        let mut path = Vec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            path.push(current);
            cursor = self.records.get(&current).and_then(|r| r.parent);
        }
        path.reverse();
        path
    }
}

/// Map a window point into local space
///
/// Non-invertible transforms fall back to the untransformed point.
fn to_local(transform: &Affine2D, point: Point) -> Point {
    match transform.inverse() {
        Some(inverse) => inverse.transform_point(point),
        None => point,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blinc_core::tree::{ElementTree, HitShape};

    fn sized(w: f32, h: f32) -> ElementProps {
        ElementProps::new(Rect::new(0.0, 0.0, w, h))
    }

    /// Root(0,0 400x400) → Mid(at 50,50 200x200) → Leaf(at 25,25 50x50)
    fn chain() -> (ElementTree, ElementId, ElementId, ElementId) {
        let mut tree = ElementTree::new();
        let root = tree.create_root(sized(400.0, 400.0).with_name("root"));
        let mid = tree
            .create_child(root, sized(200.0, 200.0).at(50.0, 50.0).with_name("mid"))
            .unwrap();
        let leaf = tree
            .create_child(mid, sized(50.0, 50.0).at(25.0, 25.0).with_name("leaf"))
            .unwrap();
        (tree, root, mid, leaf)
    }

    fn engines() -> [HitTestEngine; 2] {
        [
            HitTestEngine::default(),
            HitTestEngine::new(HitTestConfig {
                use_spatial_index: false,
                ..HitTestConfig::default()
            }),
        ]
    }

    #[test]
    fn test_point_outside_everything_misses() {
        let (tree, root, _, _) = chain();
        for mut engine in engines() {
            let result = engine.hit_test(&tree, root, Point::new(500.0, 10.0));
            assert!(!result.is_hit());
            assert!(result.path.is_empty());
        }
    }

    #[test]
    fn test_leaf_hit_with_path() {
        let (tree, root, mid, leaf) = chain();
        for mut engine in engines() {
            let result = engine.hit_test(&tree, root, Point::new(90.0, 90.0));
            assert_eq!(result.element, Some(leaf));
            assert_eq!(result.path, vec![root, mid, leaf]);
            assert!(result.local_point.approx_eq(Point::new(15.0, 15.0), 1e-4));
        }
    }

    #[test]
    fn test_higher_z_index_wins() {
        let mut tree = ElementTree::new();
        let root = tree.create_root(sized(200.0, 200.0));
        let top = tree.create_child(root, sized(100.0, 100.0).with_z_index(5)).unwrap();
        let _later = tree.create_child(root, sized(100.0, 100.0)).unwrap();

        for mut engine in engines() {
            let result = engine.hit_test(&tree, root, Point::new(50.0, 50.0));
            assert_eq!(result.element, Some(top));
        }
    }

    #[test]
    fn test_later_sibling_wins_on_equal_z() {
        let mut tree = ElementTree::new();
        let root = tree.create_root(sized(200.0, 200.0));
        let _first = tree.create_child(root, sized(100.0, 100.0)).unwrap();
        let second = tree.create_child(root, sized(100.0, 100.0)).unwrap();

        let mut engine = HitTestEngine::default();
        let all = engine.hit_test_all(&tree, root, Point::new(10.0, 10.0));
        assert_eq!(all[0].element, Some(second));
        assert_eq!(all.len(), 3);
        assert_eq!(all[2].element, Some(root));
    }

    #[test]
    fn test_basic_and_indexed_agree() {
        let mut tree = ElementTree::new();
        let root = tree.create_root(sized(1000.0, 1000.0));
        for i in 0..10 {
            for j in 0..10 {
                let cell = tree
                    .create_child(
                        root,
                        sized(120.0, 120.0)
                            .at(i as f32 * 100.0, j as f32 * 100.0)
                            .with_z_index(((i + j) % 3) as i32)
                            .with_hit_shape(if (i * j) % 2 == 0 {
                                HitShape::Bounds
                            } else {
                                HitShape::Ellipse
                            }),
                    )
                    .unwrap();
                if (i + j) % 4 == 0 {
                    tree.update(cell, |p| p.opacity = 0.0).unwrap();
                }
            }
        }

        let [mut indexed, mut basic] = engines();
        for step in 0..200 {
            let p = Point::new((step * 37 % 1000) as f32 + 0.5, (step * 53 % 1000) as f32 + 0.5);
            assert_eq!(
                indexed.hit_test(&tree, root, p),
                basic.hit_test(&tree, root, p),
                "disagreement at {p:?}"
            );
        }
    }

    #[test]
    fn test_rotated_element_uses_local_predicate() {
        let mut tree = ElementTree::new();
        let root = tree.create_root(sized(400.0, 400.0).with_hit_shape(HitShape::None));
        let diamond = tree
            .create_child(
                root,
                sized(100.0, 100.0).with_transform(
                    Affine2D::translation(200.0, 100.0)
                        .then(&Affine2D::rotation(std::f32::consts::FRAC_PI_4)),
                ),
            )
            .unwrap();

        let mut engine = HitTestEngine::default();
        // Centre of the rotated square
        let center = Point::new(200.0, 100.0 + 100.0 * std::f32::consts::SQRT_2 / 2.0);
        assert_eq!(engine.hit_test(&tree, root, center).element, Some(diamond));
        // Inside the AABB but outside the rotated square
        let corner = Point::new(140.0, 105.0);
        assert!(!engine.hit_test(&tree, root, corner).is_hit());

        // Bounding-box mode accepts the AABB corner
        let mut coarse = HitTestEngine::new(HitTestConfig {
            bounding_box_only: true,
            ..HitTestConfig::default()
        });
        assert_eq!(coarse.hit_test(&tree, root, corner).element, Some(diamond));
    }

    #[test]
    fn test_clip_rejects_overflowing_child() {
        let mut tree = ElementTree::new();
        let root = tree.create_root(sized(400.0, 400.0).with_hit_shape(HitShape::None));
        let panel = tree
            .create_child(
                root,
                sized(100.0, 100.0)
                    .at(100.0, 100.0)
                    .with_clip(Rect::new(0.0, 0.0, 100.0, 100.0)),
            )
            .unwrap();
        let child = tree
            .create_child(panel, sized(300.0, 50.0).at(50.0, 0.0))
            .unwrap();

        for mut engine in engines() {
            assert_eq!(
                engine.hit_test(&tree, root, Point::new(180.0, 120.0)).element,
                Some(child)
            );
            // Inside the child but outside the panel's clip
            assert!(!engine.hit_test(&tree, root, Point::new(300.0, 120.0)).is_hit());
        }
    }

    #[test]
    fn test_rejections() {
        let mut tree = ElementTree::new();
        let root = tree.create_root(sized(100.0, 100.0).with_hit_shape(HitShape::None));
        let faded = tree.create_child(root, sized(100.0, 100.0).with_opacity(0.0)).unwrap();
        let disabled = tree.create_child(root, sized(100.0, 100.0).with_enabled(false)).unwrap();
        let _ghost = tree
            .create_child(root, sized(100.0, 100.0).with_hit_test_visible(false))
            .unwrap();
        let hidden_parent = tree.create_child(root, sized(100.0, 100.0).with_visible(false)).unwrap();
        let _hidden_child = tree.create_child(hidden_parent, sized(100.0, 100.0)).unwrap();

        let mut engine = HitTestEngine::default();
        assert!(!engine.hit_test(&tree, root, Point::new(50.0, 50.0)).is_hit());

        let mut lenient = HitTestEngine::new(HitTestConfig {
            include_disabled: true,
            ..HitTestConfig::default()
        });
        assert_eq!(
            lenient.hit_test(&tree, root, Point::new(50.0, 50.0)).element,
            Some(disabled)
        );
        assert_ne!(Some(faded), lenient.hit_test(&tree, root, Point::new(50.0, 50.0)).element);
    }

    #[test]
    fn test_filter_behaviors() {
        let (tree, root, mid, leaf) = chain();
        let mut engine = HitTestEngine::default();

        engine.set_filter(move |id, _| {
            if id == leaf {
                FilterBehavior::SkipSelf
            } else {
                FilterBehavior::Continue
            }
        });
        assert_eq!(engine.hit_test(&tree, root, Point::new(90.0, 90.0)).element, Some(mid));

        engine.set_filter(move |id, _| {
            if id == mid {
                FilterBehavior::SkipSelfAndChildren
            } else {
                FilterBehavior::Continue
            }
        });
        assert_eq!(engine.hit_test(&tree, root, Point::new(90.0, 90.0)).element, Some(root));

        engine.set_filter(move |id, _| {
            if id == mid {
                FilterBehavior::SkipChildren
            } else {
                FilterBehavior::Continue
            }
        });
        assert_eq!(engine.hit_test(&tree, root, Point::new(90.0, 90.0)).element, Some(mid));

        engine.clear_filter();
        assert_eq!(engine.hit_test(&tree, root, Point::new(90.0, 90.0)).element, Some(leaf));
    }

    #[test]
    fn test_depth_limit_stops_descent() {
        let (tree, root, mid, _) = chain();
        let mut engine = HitTestEngine::new(HitTestConfig {
            max_depth: 1,
            ..HitTestConfig::default()
        });
        assert_eq!(engine.hit_test(&tree, root, Point::new(90.0, 90.0)).element, Some(mid));
    }

    #[test]
    fn test_invalidate_element_recomputes() {
        let (mut tree, root, mid, leaf) = chain();
        let mut engine = HitTestEngine::default();

        let before = engine.global_bounds(&tree, leaf).unwrap();
        assert_eq!(before, Rect::new(75.0, 75.0, 50.0, 50.0));

        tree.update(leaf, |p| p.transform = Affine2D::translation(100.0, 100.0))
            .unwrap();
        // Still cached until invalidated
        assert_eq!(engine.global_bounds(&tree, leaf), Some(before));

        engine.invalidate_element(leaf);
        assert_eq!(
            engine.global_bounds(&tree, leaf),
            Some(Rect::new(150.0, 150.0, 50.0, 50.0))
        );

        tree.update(mid, |p| p.transform = Affine2D::translation(0.0, 0.0))
            .unwrap();
        engine.invalidate_subtree(&tree, mid);
        assert_eq!(
            engine.global_bounds(&tree, leaf),
            Some(Rect::new(100.0, 100.0, 50.0, 50.0))
        );

        engine.on_layout_updated();
        assert!(engine.hit_test(&tree, root, Point::new(120.0, 120.0)).is_hit());
    }

    #[test]
    fn test_global_transform_matches_walk() {
        let (tree, root, _, leaf) = chain();
        let mut engine = HitTestEngine::default();
        let t = engine.global_transform(&tree, leaf).unwrap();
        assert!(t.transform_point(Point::ZERO).approx_eq(Point::new(75.0, 75.0), 1e-4));

        engine.on_layout_updated();
        let result = engine.hit_test(&tree, root, Point::new(76.0, 76.0));
        assert_eq!(result.element, Some(leaf));
    }

    #[test]
    fn test_region_query() {
        let (tree, root, mid, leaf) = chain();
        let mut engine = HitTestEngine::default();
        let mut hits: Vec<ElementId> = engine
            .hit_test_region(&tree, root, Rect::new(0.0, 0.0, 60.0, 60.0))
            .into_iter()
            .filter_map(|r| r.element)
            .collect();
        hits.sort();
        let mut expected = vec![root, mid];
        expected.sort();
        assert_eq!(hits, expected);
        assert!(!hits.contains(&leaf));
    }

    #[test]
    fn test_stats_count_queries_and_rebuilds() {
        let (tree, root, _, _) = chain();
        let mut engine = HitTestEngine::default();
        engine.hit_test(&tree, root, Point::new(1.0, 1.0));
        engine.hit_test(&tree, root, Point::new(2.0, 2.0));

        let stats = engine.stats();
        assert_eq!(stats.queries, 2);
        assert_eq!(stats.index_rebuilds, 2);
        assert_eq!(stats.last_indexed, 3);
        assert!(stats.cache_hits > 0);
    }

    #[test]
    fn test_non_invertible_transform_falls_back_to_global_point() {
        let mut tree = ElementTree::new();
        let root = tree.create_root(
            sized(100.0, 100.0).with_transform(Affine2D::new([1.0, 0.0, 0.0, 0.0, 0.0, 0.0])),
        );
        let mut engine = HitTestEngine::new(HitTestConfig {
            bounding_box_only: true,
            ..HitTestConfig::default()
        });
        let result = engine.hit_test(&tree, root, Point::new(50.0, 0.0));
        assert_eq!(result.element, Some(root));
        assert_eq!(result.local_point, Point::new(50.0, 0.0));
    }
}
