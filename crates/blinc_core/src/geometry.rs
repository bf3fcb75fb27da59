//! Core geometry types
//!
//! Points, sizes, axis-aligned rectangles and 2D affine transforms shared by
//! the element tree and input dispatch. All coordinates are `f32` logical
//! pixels with the y axis pointing down.

// ─────────────────────────────────────────────────────────────────────────────
// Point / Size
// ─────────────────────────────────────────────────────────────────────────────

/// 2D point
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const ZERO: Point = Point { x: 0.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point
    pub fn distance(&self, other: Point) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    /// Both coordinates are finite (not NaN or infinite)
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    /// Approximate equality within `epsilon` on each axis
    pub fn approx_eq(&self, other: Point, epsilon: f32) -> bool {
        (self.x - other.x).abs() <= epsilon && (self.y - other.y).abs() <= epsilon
    }
}

/// 2D size
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

impl Size {
    pub const ZERO: Size = Size {
        width: 0.0,
        height: 0.0,
    };

    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    /// Convert to a Rect at the origin (0, 0)
    pub const fn to_rect(self) -> Rect {
        Rect {
            origin: Point::ZERO,
            size: self,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Rect
// ─────────────────────────────────────────────────────────────────────────────

/// Axis-aligned rectangle
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Rect {
    pub origin: Point,
    pub size: Size,
}

impl Rect {
    pub const ZERO: Rect = Rect {
        origin: Point::ZERO,
        size: Size::ZERO,
    };

    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            origin: Point::new(x, y),
            size: Size::new(width, height),
        }
    }

    pub fn from_origin_size(origin: Point, size: Size) -> Self {
        Self { origin, size }
    }

    /// Create a rect from two corner points
    pub fn from_points(p1: Point, p2: Point) -> Self {
        let min_x = p1.x.min(p2.x);
        let min_y = p1.y.min(p2.y);
        let max_x = p1.x.max(p2.x);
        let max_y = p1.y.max(p2.y);
        Rect::new(min_x, min_y, max_x - min_x, max_y - min_y)
    }

    pub fn x(&self) -> f32 {
        self.origin.x
    }

    pub fn y(&self) -> f32 {
        self.origin.y
    }

    pub fn width(&self) -> f32 {
        self.size.width
    }

    pub fn height(&self) -> f32 {
        self.size.height
    }

    pub fn right(&self) -> f32 {
        self.origin.x + self.size.width
    }

    pub fn bottom(&self) -> f32 {
        self.origin.y + self.size.height
    }

    pub fn center(&self) -> Point {
        Point::new(
            self.origin.x + self.size.width / 2.0,
            self.origin.y + self.size.height / 2.0,
        )
    }

    /// A rect with no area
    pub fn is_empty(&self) -> bool {
        self.size.width <= 0.0 || self.size.height <= 0.0
    }

    /// Point containment, inclusive of all four edges
    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.origin.x
            && point.x <= self.right()
            && point.y >= self.origin.y
            && point.y <= self.bottom()
    }

    /// Check if this rect intersects with another
    ///
    /// Returns true if the two rects overlap with a non-zero area.
    pub fn intersects(&self, other: &Rect) -> bool {
        self.origin.x < other.right()
            && self.right() > other.origin.x
            && self.origin.y < other.bottom()
            && self.bottom() > other.origin.y
    }

    /// Like [`Rect::intersects`] but also true for rects that only share an
    /// edge or a corner, and for zero-area rects lying inside `other`.
    pub fn touches(&self, other: &Rect) -> bool {
        self.origin.x <= other.right()
            && self.right() >= other.origin.x
            && self.origin.y <= other.bottom()
            && self.bottom() >= other.origin.y
    }

    /// Get the intersection of two rects (if they overlap)
    pub fn intersection(&self, other: &Rect) -> Option<Self> {
        if !self.touches(other) {
            return None;
        }

        let x = self.origin.x.max(other.origin.x);
        let y = self.origin.y.max(other.origin.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());

        Some(Rect::new(x, y, right - x, bottom - y))
    }

    /// Get the union of two rects (smallest rect containing both)
    pub fn union(&self, other: &Rect) -> Self {
        let min_x = self.origin.x.min(other.origin.x);
        let min_y = self.origin.y.min(other.origin.y);
        let max_x = self.right().max(other.right());
        let max_y = self.bottom().max(other.bottom());
        Rect::new(min_x, min_y, max_x - min_x, max_y - min_y)
    }

    /// Offset the rect by a delta
    pub fn offset(&self, dx: f32, dy: f32) -> Self {
        Rect {
            origin: Point::new(self.origin.x + dx, self.origin.y + dy),
            size: self.size,
        }
    }

    /// Split into four equal quadrants: top-left, top-right, bottom-left, bottom-right
    pub fn quadrants(&self) -> [Rect; 4] {
        let hw = self.size.width / 2.0;
        let hh = self.size.height / 2.0;
        let x = self.origin.x;
        let y = self.origin.y;
        [
            Rect::new(x, y, hw, hh),
            Rect::new(x + hw, y, hw, hh),
            Rect::new(x, y + hh, hw, hh),
            Rect::new(x + hw, y + hh, hw, hh),
        ]
    }

    /// The four corners, clockwise from the origin
    pub fn corners(&self) -> [Point; 4] {
        [
            self.origin,
            Point::new(self.right(), self.origin.y),
            Point::new(self.right(), self.bottom()),
            Point::new(self.origin.x, self.bottom()),
        ]
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Affine2D
// ─────────────────────────────────────────────────────────────────────────────

/// Determinants with a smaller magnitude are treated as singular
const SINGULAR_EPSILON: f32 = 1e-12;

/// 2D affine transformation
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Affine2D {
    /// Matrix elements [a, b, c, d, tx, ty]
    /// | a  c  tx |
    /// | b  d  ty |
    /// | 0  0   1 |
    pub elements: [f32; 6],
}

impl Default for Affine2D {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Affine2D {
    pub const IDENTITY: Affine2D = Affine2D {
        elements: [1.0, 0.0, 0.0, 1.0, 0.0, 0.0],
    };

    pub const fn new(elements: [f32; 6]) -> Self {
        Self { elements }
    }

    pub fn translation(x: f32, y: f32) -> Self {
        Self {
            elements: [1.0, 0.0, 0.0, 1.0, x, y],
        }
    }

    pub fn scale(sx: f32, sy: f32) -> Self {
        Self {
            elements: [sx, 0.0, 0.0, sy, 0.0, 0.0],
        }
    }

    pub fn rotation(angle: f32) -> Self {
        let c = angle.cos();
        let s = angle.sin();
        Self {
            elements: [c, s, -s, c, 0.0, 0.0],
        }
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    pub fn transform_point(&self, point: Point) -> Point {
        let [a, b, c, d, tx, ty] = self.elements;
        Point::new(
            a * point.x + c * point.y + tx,
            b * point.x + d * point.y + ty,
        )
    }

    /// Axis-aligned bounding box of `rect` after transformation
    pub fn transform_rect(&self, rect: &Rect) -> Rect {
        if self.is_identity() {
            return *rect;
        }
        let [p0, p1, p2, p3] = rect.corners().map(|p| self.transform_point(p));
        let min_x = p0.x.min(p1.x).min(p2.x).min(p3.x);
        let min_y = p0.y.min(p1.y).min(p2.y).min(p3.y);
        let max_x = p0.x.max(p1.x).max(p2.x).max(p3.x);
        let max_y = p0.y.max(p1.y).max(p2.y).max(p3.y);
        Rect::new(min_x, min_y, max_x - min_x, max_y - min_y)
    }

    /// Concatenate this transform with another (self * other)
    /// The resulting transform first applies `other`, then `self`.
    pub fn then(&self, other: &Affine2D) -> Affine2D {
        let [a1, b1, c1, d1, tx1, ty1] = self.elements;
        let [a2, b2, c2, d2, tx2, ty2] = other.elements;

        Affine2D {
            elements: [
                a1 * a2 + c1 * b2,
                b1 * a2 + d1 * b2,
                a1 * c2 + c1 * d2,
                b1 * c2 + d1 * d2,
                a1 * tx2 + c1 * ty2 + tx1,
                b1 * tx2 + d1 * ty2 + ty1,
            ],
        }
    }

    pub fn determinant(&self) -> f32 {
        let [a, b, c, d, _, _] = self.elements;
        a * d - b * c
    }

    /// The inverse transform, or `None` when the matrix is singular
    pub fn inverse(&self) -> Option<Affine2D> {
        let det = self.determinant();
        if det.abs() < SINGULAR_EPSILON || !det.is_finite() {
            return None;
        }
        let [a, b, c, d, tx, ty] = self.elements;
        let inv_det = 1.0 / det;
        Some(Affine2D {
            elements: [
                d * inv_det,
                -b * inv_det,
                -c * inv_det,
                a * inv_det,
                (c * ty - d * tx) * inv_det,
                (b * tx - a * ty) * inv_det,
            ],
        })
    }
}
