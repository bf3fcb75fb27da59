//! Blinc Core
//!
//! Foundational primitives shared by the Blinc input stack:
//!
//! - **Geometry**: points, sizes, rectangles and 2D affine transforms
//! - **Element tree**: the visual tree capability ([`HitTestable`]) that hit
//!   testing and event routing observe, plus an arena-backed [`ElementTree`]
//!
//! # Example
//!
//! ```rust
//! use blinc_core::geometry::{Affine2D, Point, Rect};
//! use blinc_core::tree::{ElementProps, ElementTree, HitTestable};
//!
//! let mut tree = ElementTree::new();
//! let root = tree.create_root(ElementProps::new(Rect::new(0.0, 0.0, 100.0, 100.0)));
//! let child = tree
//!     .create_child(root, ElementProps::new(Rect::new(0.0, 0.0, 10.0, 10.0)).at(20.0, 20.0))
//!     .unwrap();
//!
//! assert_eq!(tree.parent(child), Some(root));
//! let moved = Affine2D::translation(20.0, 20.0).transform_point(Point::new(5.0, 5.0));
//! assert_eq!(moved, Point::new(25.0, 25.0));
//! ```

pub mod geometry;
pub mod tree;

pub use geometry::{Affine2D, Point, Rect, Size};
pub use tree::{ElementId, ElementProps, ElementTree, HitShape, HitTestable, LayoutCallback, TreeError};
