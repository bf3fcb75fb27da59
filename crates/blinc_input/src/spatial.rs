//! Quadtree spatial index over element bounds
//!
//! Stores `(ElementId, Rect)` entries in global coordinates and answers
//! point and region queries. A node keeps entries until it holds more than
//! `max_elements_per_node`, then splits into four equal quadrants (unless it
//! is already at `max_depth`) and pushes its entries down. Entries that
//! straddle a split line are stored in every quadrant they overlap, and
//! queries de-duplicate. An entry covering a node's whole region stays in
//! that node and does not count toward its split threshold, so stacks of
//! full-size containers never force a split.
//!
//! Entries not fully inside the root region go to an overflow list that is
//! scanned on every query; the index never drops an inserted element.
//!
//! The hit-test engine rebuilds the whole index before a query batch, so
//! there is no incremental maintenance on tree mutation.

use blinc_core::geometry::{Point, Rect};
use blinc_core::tree::ElementId;
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

/// Default per-node capacity before a split
pub const DEFAULT_MAX_ELEMENTS_PER_NODE: usize = 8;
/// Default maximum tree depth
pub const DEFAULT_MAX_DEPTH: usize = 8;

#[derive(Clone, Copy, Debug)]
struct Entry {
    element: ElementId,
    bounds: Rect,
}

#[derive(Debug)]
struct QuadNode {
    region: Rect,
    depth: usize,
    entries: SmallVec<[Entry; DEFAULT_MAX_ELEMENTS_PER_NODE]>,
    children: Option<Box<[QuadNode; 4]>>,
}

impl QuadNode {
    fn new(region: Rect, depth: usize) -> Self {
        Self {
            region,
            depth,
            entries: SmallVec::new(),
            children: None,
        }
    }

    fn insert(&mut self, entry: Entry, max_per_node: usize, max_depth: usize) {
        // Covers every point of this node, so no child would narrow it down
        if encloses(&entry.bounds, &self.region) {
            self.entries.push(entry);
            return;
        }

        if let Some(children) = self.children.as_mut() {
            let mut placed = false;
            // Edge contact is not overlap; queries on a seam visit both sides
            for child in children.iter_mut() {
                if child.region.intersects(&entry.bounds) {
                    child.insert(entry, max_per_node, max_depth);
                    placed = true;
                }
            }
            if !placed {
                self.entries.push(entry);
            }
            return;
        }

        self.entries.push(entry);
        if self.depth < max_depth && self.partial_len() > max_per_node {
            self.split(max_per_node, max_depth);
        }
    }

    /// Entries that cover only part of the region
    fn partial_len(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| !encloses(&e.bounds, &self.region))
            .count()
    }

    fn split(&mut self, max_per_node: usize, max_depth: usize) {
        let [q0, q1, q2, q3] = self.region.quadrants();
        let depth = self.depth + 1;
        self.children = Some(Box::new([
            QuadNode::new(q0, depth),
            QuadNode::new(q1, depth),
            QuadNode::new(q2, depth),
            QuadNode::new(q3, depth),
        ]));

        let entries = std::mem::take(&mut self.entries);
        for entry in entries {
            self.insert(entry, max_per_node, max_depth);
        }
    }

    fn remove(&mut self, element: ElementId, bounds: &Rect) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.element != element);
        let mut removed = self.entries.len() != before;

        if let Some(children) = self.children.as_mut() {
            for child in children.iter_mut() {
                if child.region.touches(bounds) {
                    removed |= child.remove(element, bounds);
                }
            }
        }
        removed
    }

    fn query_point(&self, point: Point, out: &mut Vec<ElementId>, seen: &mut FxHashSet<ElementId>) {
        for entry in &self.entries {
            if entry.bounds.contains(point) && seen.insert(entry.element) {
                out.push(entry.element);
            }
        }
        if let Some(children) = self.children.as_ref() {
            for child in children.iter() {
                if child.region.contains(point) {
                    child.query_point(point, out, seen);
                }
            }
        }
    }

    fn query_region(&self, rect: &Rect, out: &mut Vec<ElementId>, seen: &mut FxHashSet<ElementId>) {
        for entry in &self.entries {
            if entry.bounds.touches(rect) && seen.insert(entry.element) {
                out.push(entry.element);
            }
        }
        if let Some(children) = self.children.as_ref() {
            for child in children.iter() {
                if child.region.touches(rect) {
                    child.query_region(rect, out, seen);
                }
            }
        }
    }

    fn node_count(&self) -> usize {
        1 + self
            .children
            .as_ref()
            .map_or(0, |c| c.iter().map(QuadNode::node_count).sum())
    }

    fn max_reached_depth(&self) -> usize {
        self.children.as_ref().map_or(self.depth, |c| {
            c.iter().map(QuadNode::max_reached_depth).max().unwrap_or(self.depth)
        })
    }
}

fn encloses(outer: &Rect, inner: &Rect) -> bool {
    inner.origin.x >= outer.origin.x
        && inner.origin.y >= outer.origin.y
        && inner.right() <= outer.right()
        && inner.bottom() <= outer.bottom()
}

/// Quadtree over element bounds
#[derive(Debug)]
pub struct QuadTree {
    root: QuadNode,
    /// Entries extending past the root region
    overflow: Vec<Entry>,
    max_elements_per_node: usize,
    max_depth: usize,
    /// Bounds of every inserted element, for replace/remove
    locations: FxHashMap<ElementId, Rect>,
}

impl QuadTree {
    /// Create an index covering `region` with default capacity settings
    pub fn new(region: Rect) -> Self {
        Self::with_limits(region, DEFAULT_MAX_ELEMENTS_PER_NODE, DEFAULT_MAX_DEPTH)
    }

    pub fn with_limits(region: Rect, max_elements_per_node: usize, max_depth: usize) -> Self {
        Self {
            root: QuadNode::new(region, 0),
            overflow: Vec::new(),
            max_elements_per_node: max_elements_per_node.max(1),
            max_depth,
            locations: FxHashMap::default(),
        }
    }

    /// Region covered by the root node
    pub fn region(&self) -> Rect {
        self.root.region
    }

    /// Insert or replace the entry for `element`
    pub fn insert(&mut self, element: ElementId, bounds: Rect) {
        if let Some(previous) = self.locations.insert(element, bounds) {
            self.remove_entry(element, &previous);
        }
        let entry = Entry { element, bounds };
        if encloses(&self.root.region, &bounds) {
            self.root
                .insert(entry, self.max_elements_per_node, self.max_depth);
        } else {
            self.overflow.push(entry);
        }
    }

    fn remove_entry(&mut self, element: ElementId, bounds: &Rect) -> bool {
        let before = self.overflow.len();
        self.overflow.retain(|e| e.element != element);
        let removed = self.overflow.len() != before;
        self.root.remove(element, bounds) || removed
    }

    /// Remove an element, returning whether it was present
    pub fn remove(&mut self, element: ElementId) -> bool {
        match self.locations.remove(&element) {
            Some(bounds) => self.remove_entry(element, &bounds),
            None => false,
        }
    }

    /// Elements whose bounds contain `point`
    pub fn query(&self, point: Point) -> Vec<ElementId> {
        let mut out = Vec::new();
        let mut seen = FxHashSet::default();
        for entry in &self.overflow {
            if entry.bounds.contains(point) && seen.insert(entry.element) {
                out.push(entry.element);
            }
        }
        self.root.query_point(point, &mut out, &mut seen);
        out
    }

    /// Elements whose bounds intersect `rect` (edges included)
    pub fn query_region(&self, rect: &Rect) -> Vec<ElementId> {
        let mut out = Vec::new();
        let mut seen = FxHashSet::default();
        for entry in &self.overflow {
            if entry.bounds.touches(rect) && seen.insert(entry.element) {
                out.push(entry.element);
            }
        }
        self.root.query_region(rect, &mut out, &mut seen);
        out
    }

    /// Remove all entries, keeping the current region
    pub fn clear(&mut self) {
        self.root = QuadNode::new(self.root.region, 0);
        self.overflow.clear();
        self.locations.clear();
    }

    /// Remove all entries and cover a new region
    pub fn reset(&mut self, region: Rect) {
        self.root = QuadNode::new(region, 0);
        self.overflow.clear();
        self.locations.clear();
    }

    /// Bounds stored for an element
    pub fn bounds_of(&self, element: ElementId) -> Option<Rect> {
        self.locations.get(&element).copied()
    }

    /// Number of distinct elements
    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    /// Total number of quadtree nodes (diagnostics)
    pub fn node_count(&self) -> usize {
        self.root.node_count()
    }

    /// Deepest level that has been split into (diagnostics)
    pub fn depth(&self) -> usize {
        self.root.max_reached_depth()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    fn ids(n: usize) -> Vec<ElementId> {
        let mut map: SlotMap<ElementId, ()> = SlotMap::with_key();
        (0..n).map(|_| map.insert(())).collect()
    }

    #[test]
    fn test_point_query_finds_containing() {
        let e = ids(3);
        let mut tree = QuadTree::new(Rect::new(0.0, 0.0, 100.0, 100.0));
        tree.insert(e[0], Rect::new(0.0, 0.0, 50.0, 50.0));
        tree.insert(e[1], Rect::new(25.0, 25.0, 50.0, 50.0));
        tree.insert(e[2], Rect::new(80.0, 80.0, 10.0, 10.0));

        let mut hits = tree.query(Point::new(30.0, 30.0));
        hits.sort();
        let mut expected = vec![e[0], e[1]];
        expected.sort();
        assert_eq!(hits, expected);
        assert!(tree.query(Point::new(95.0, 5.0)).is_empty());
    }

    #[test]
    fn test_split_keeps_all_entries() {
        let e = ids(64);
        let mut tree = QuadTree::with_limits(Rect::new(0.0, 0.0, 800.0, 800.0), 4, 6);
        for (i, id) in e.iter().enumerate() {
            let x = (i % 8) as f32 * 100.0;
            let y = (i / 8) as f32 * 100.0;
            tree.insert(*id, Rect::new(x, y, 100.0, 100.0));
        }
        assert!(tree.node_count() > 1);
        assert!(tree.depth() <= 6);

        for (i, id) in e.iter().enumerate() {
            let x = (i % 8) as f32 * 100.0 + 50.0;
            let y = (i / 8) as f32 * 100.0 + 50.0;
            assert_eq!(tree.query(Point::new(x, y)), vec![*id]);
        }
    }

    #[test]
    fn test_full_size_entries_do_not_split() {
        let e = ids(18);
        let window = Rect::new(0.0, 0.0, 1920.0, 1080.0);
        let mut tree = QuadTree::new(window);
        for id in &e[..9] {
            tree.insert(*id, window);
        }
        assert_eq!(tree.node_count(), 1);

        // Half-width panels split the root once and then cover whole quadrants
        for id in &e[9..] {
            tree.insert(*id, Rect::new(0.0, 0.0, 960.0, 1080.0));
        }
        assert_eq!(tree.node_count(), 5);
        assert_eq!(tree.depth(), 1);

        let mut hits = tree.query(Point::new(100.0, 100.0));
        hits.sort();
        let mut expected = e.clone();
        expected.sort();
        assert_eq!(hits, expected);
        assert_eq!(tree.query(Point::new(1500.0, 100.0)).len(), 9);
    }

    #[test]
    fn test_straddling_entry_reported_once() {
        let e = ids(10);
        let mut tree = QuadTree::with_limits(Rect::new(0.0, 0.0, 100.0, 100.0), 2, 4);
        // Crosses both split lines
        tree.insert(e[0], Rect::new(40.0, 40.0, 20.0, 20.0));
        for id in &e[1..] {
            tree.insert(*id, Rect::new(1.0, 1.0, 2.0, 2.0));
        }
        let region_hits = tree.query_region(&Rect::new(0.0, 0.0, 100.0, 100.0));
        assert_eq!(region_hits.iter().filter(|id| **id == e[0]).count(), 1);
        assert_eq!(tree.query(Point::new(50.0, 50.0)), vec![e[0]]);
    }

    #[test]
    fn test_insert_replaces_previous_bounds() {
        let e = ids(1);
        let mut tree = QuadTree::new(Rect::new(0.0, 0.0, 100.0, 100.0));
        tree.insert(e[0], Rect::new(0.0, 0.0, 10.0, 10.0));
        tree.insert(e[0], Rect::new(90.0, 90.0, 10.0, 10.0));

        assert!(tree.query(Point::new(5.0, 5.0)).is_empty());
        assert_eq!(tree.query(Point::new(95.0, 95.0)), vec![e[0]]);
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_remove_and_clear() {
        let e = ids(2);
        let mut tree = QuadTree::new(Rect::new(0.0, 0.0, 100.0, 100.0));
        tree.insert(e[0], Rect::new(0.0, 0.0, 10.0, 10.0));
        tree.insert(e[1], Rect::new(0.0, 0.0, 10.0, 10.0));

        assert!(tree.remove(e[0]));
        assert!(!tree.remove(e[0]));
        assert_eq!(tree.query(Point::new(5.0, 5.0)), vec![e[1]]);

        tree.clear();
        assert!(tree.is_empty());
        assert!(tree.query(Point::new(5.0, 5.0)).is_empty());
    }

    #[test]
    fn test_entries_outside_region_still_found() {
        let e = ids(1);
        let mut tree = QuadTree::new(Rect::new(0.0, 0.0, 100.0, 100.0));
        tree.insert(e[0], Rect::new(150.0, 150.0, 20.0, 20.0));
        assert_eq!(tree.query(Point::new(160.0, 160.0)), vec![e[0]]);
    }

    #[test]
    fn test_partially_outside_entry_found_past_region_edge() {
        let e = ids(12);
        let mut tree = QuadTree::with_limits(Rect::new(0.0, 0.0, 100.0, 100.0), 2, 4);
        for id in &e[1..] {
            tree.insert(*id, Rect::new(10.0, 10.0, 5.0, 5.0));
        }
        tree.insert(e[0], Rect::new(90.0, 90.0, 60.0, 60.0));

        assert_eq!(tree.query(Point::new(120.0, 120.0)), vec![e[0]]);
        assert_eq!(tree.query(Point::new(95.0, 95.0)), vec![e[0]]);
        assert!(tree.remove(e[0]));
        assert!(tree.query(Point::new(120.0, 120.0)).is_empty());
    }
}
