//! Event routes

use blinc_core::tree::{ElementId, HitTestable};
use rustc_hash::FxHashSet;
use smallvec::SmallVec;

use super::definition::RoutingStrategy;
use crate::error::{InputError, Result};

/// Root-to-target path an event travels
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventRoute {
    nodes: SmallVec<[ElementId; 16]>,
    strategy: RoutingStrategy,
    source_index: usize,
}

impl EventRoute {
    /// Use a hit-test path verbatim
    ///
    /// The source is the last occurrence of `target` in `path`. Returns `None`
    /// if `target` is not on the path.
    pub fn from_path(path: &[ElementId], target: ElementId, strategy: RoutingStrategy) -> Option<Self> {
        let source_index = path.iter().rposition(|e| *e == target)?;
        Some(Self {
            nodes: path.iter().copied().collect(),
            strategy,
            source_index,
        })
    }

    /// Build a route by walking parents from `target`
    ///
    /// A parent cycle ends the walk at the first repeated element.
    pub fn build<T: HitTestable + ?Sized>(
        tree: &T,
        target: ElementId,
        strategy: RoutingStrategy,
    ) -> Result<Self> {
        if !tree.contains(target) {
            return Err(InputError::UnknownElement(target));
        }

        let mut nodes: SmallVec<[ElementId; 16]> = SmallVec::new();
        let mut visited = FxHashSet::default();
        let mut cursor = Some(target);
        while let Some(current) = cursor {
            if !visited.insert(current) {
                tracing::warn!(
                    target: "blinc_input::router",
                    element = ?current,
                    "parent cycle detected while building route"
                );
                break;
            }
            nodes.push(current);
            cursor = tree.parent(current);
        }
        nodes.reverse();

        let source_index = nodes.len() - 1;
        Ok(Self {
            nodes,
            strategy,
            source_index,
        })
    }

    /// Path from root to target
    pub fn nodes(&self) -> &[ElementId] {
        &self.nodes
    }

    pub fn strategy(&self) -> RoutingStrategy {
        self.strategy
    }

    pub fn source_index(&self) -> usize {
        self.source_index
    }

    pub fn source(&self) -> ElementId {
        self.nodes[self.source_index]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Same path under another strategy
    pub fn with_strategy(&self, strategy: RoutingStrategy) -> Self {
        Self {
            strategy,
            ..self.clone()
        }
    }

    /// Elements in invocation order
    ///
    /// Tunnel runs root to source, Bubble runs source to root, Direct visits
    /// only the source.
    pub fn routing_order(&self) -> SmallVec<[ElementId; 16]> {
        let upto_source = &self.nodes[..=self.source_index];
        match self.strategy {
            RoutingStrategy::Tunnel => upto_source.iter().copied().collect(),
            RoutingStrategy::Bubble => upto_source.iter().rev().copied().collect(),
            RoutingStrategy::Direct => SmallVec::from_slice(&[self.source()]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blinc_core::geometry::Rect;
    use blinc_core::tree::{ElementProps, ElementTree};

    fn chain() -> (ElementTree, [ElementId; 3]) {
        let mut tree = ElementTree::new();
        let root = tree.create_root(ElementProps::new(Rect::new(0.0, 0.0, 10.0, 10.0)));
        let mid = tree.create_child(root, ElementProps::default()).unwrap();
        let leaf = tree.create_child(mid, ElementProps::default()).unwrap();
        (tree, [root, mid, leaf])
    }

    #[test]
    fn test_routing_orders() {
        let (tree, [root, mid, leaf]) = chain();
        let bubble = EventRoute::build(&tree, leaf, RoutingStrategy::Bubble).unwrap();
        assert_eq!(bubble.nodes(), &[root, mid, leaf]);
        assert_eq!(bubble.routing_order().as_slice(), &[leaf, mid, root]);

        let tunnel = bubble.with_strategy(RoutingStrategy::Tunnel);
        assert_eq!(tunnel.routing_order().as_slice(), &[root, mid, leaf]);

        let direct = bubble.with_strategy(RoutingStrategy::Direct);
        assert_eq!(direct.routing_order().as_slice(), &[leaf]);
    }

    #[test]
    fn test_from_path_source_position() {
        let (_, [root, mid, leaf]) = chain();
        let route = EventRoute::from_path(&[root, mid, leaf], mid, RoutingStrategy::Bubble).unwrap();
        assert_eq!(route.source(), mid);
        assert_eq!(route.routing_order().as_slice(), &[mid, root]);
        assert!(EventRoute::from_path(&[root, mid], leaf, RoutingStrategy::Bubble).is_none());
    }

    #[test]
    fn test_unknown_target_fails() {
        let (mut tree, [_, _, leaf]) = chain();
        tree.remove(leaf).unwrap();
        assert!(matches!(
            EventRoute::build(&tree, leaf, RoutingStrategy::Bubble),
            Err(InputError::UnknownElement(_))
        ));
    }

    /// A tree whose parent links loop back on themselves
    struct Looped {
        a: ElementId,
        b: ElementId,
        props: ElementProps,
    }

    impl HitTestable for Looped {
        fn props(&self, id: ElementId) -> Option<&ElementProps> {
            (id == self.a || id == self.b).then_some(&self.props)
        }

        fn parent(&self, id: ElementId) -> Option<ElementId> {
            if id == self.a {
                Some(self.b)
            } else {
                Some(self.a)
            }
        }

        fn children(&self, _id: ElementId) -> &[ElementId] {
            &[]
        }
    }

    #[test]
    fn test_parent_cycle_terminates() {
        let mut map: slotmap::SlotMap<ElementId, ()> = slotmap::SlotMap::with_key();
        let looped = Looped {
            a: map.insert(()),
            b: map.insert(()),
            props: ElementProps::default(),
        };
        let route = EventRoute::build(&looped, looped.a, RoutingStrategy::Bubble).unwrap();
        assert_eq!(route.nodes(), &[looped.b, looped.a]);
    }
}
