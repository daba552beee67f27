//! Frame geometry: sizes, rectangles, and 2-D affine transforms.
//!
//! Coordinates are in source pixel space with the origin at the top-left
//! corner and y pointing down.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

/// Degrees to radians.
pub fn deg_to_rad(degrees: f64) -> f64 {
    degrees * PI / 180.0
}

/// A width × height pair in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub const ZERO: Size = Size {
        width: 0.0,
        height: 0.0,
    };

    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// Component-wise absolute value.
    pub fn abs(&self) -> Size {
        Size {
            width: self.width.abs(),
            height: self.height.abs(),
        }
    }

    /// Width and height swapped.
    pub fn transposed(&self) -> Size {
        Size {
            width: self.height,
            height: self.width,
        }
    }

    /// Whether both dimensions are strictly positive.
    pub fn is_positive(&self) -> bool {
        self.width > 0.0 && self.height > 0.0
    }

    /// Rounded integer dimensions, as encoders and filters expect them.
    pub fn to_pixels(&self) -> (u32, u32) {
        (
            self.width.abs().round() as u32,
            self.height.abs().round() as u32,
        )
    }
}

/// A 2-D point.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// An axis-aligned rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub origin: Point,
    pub size: Size,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            origin: Point::new(x, y),
            size: Size::new(width, height),
        }
    }

    /// A rectangle at the origin with the given size.
    pub fn from_size(size: Size) -> Self {
        Self {
            origin: Point::default(),
            size,
        }
    }

    pub fn min_x(&self) -> f64 {
        self.origin.x
    }

    pub fn min_y(&self) -> f64 {
        self.origin.y
    }

    pub fn max_x(&self) -> f64 {
        self.origin.x + self.size.width
    }

    pub fn max_y(&self) -> f64 {
        self.origin.y + self.size.height
    }

    /// The four corners: top-left, top-right, bottom-left, bottom-right.
    pub fn corners(&self) -> [Point; 4] {
        [
            Point::new(self.min_x(), self.min_y()),
            Point::new(self.max_x(), self.min_y()),
            Point::new(self.min_x(), self.max_y()),
            Point::new(self.max_x(), self.max_y()),
        ]
    }

    /// Smallest rectangle containing all the points.
    pub fn bounding(points: &[Point]) -> Rect {
        if points.is_empty() {
            return Rect::default();
        }
        let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
        let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
        for p in points {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        Rect::new(min_x, min_y, max_x - min_x, max_y - min_y)
    }

    /// Whether `other` lies entirely within this rectangle.
    pub fn contains_rect(&self, other: &Rect) -> bool {
        other.min_x() >= self.min_x()
            && other.min_y() >= self.min_y()
            && other.max_x() <= self.max_x()
            && other.max_y() <= self.max_y()
    }
}

/// A 2-D affine transform.
///
/// Row-vector convention, matching the matrices capture devices store in
/// track headers:
///
/// ```text
/// x' = a·x + c·y + tx
/// y' = b·x + d·y + ty
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AffineTransform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub tx: f64,
    pub ty: f64,
}

impl AffineTransform {
    pub const IDENTITY: AffineTransform = AffineTransform {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        tx: 0.0,
        ty: 0.0,
    };

    pub fn new(a: f64, b: f64, c: f64, d: f64, tx: f64, ty: f64) -> Self {
        Self { a, b, c, d, tx, ty }
    }

    pub fn translation(tx: f64, ty: f64) -> Self {
        Self::new(1.0, 0.0, 0.0, 1.0, tx, ty)
    }

    pub fn rotation(radians: f64) -> Self {
        let (sin, cos) = radians.sin_cos();
        Self::new(cos, sin, -sin, cos, 0.0, 0.0)
    }

    /// `self` followed by `other`.
    pub fn concat(&self, other: &AffineTransform) -> AffineTransform {
        AffineTransform {
            a: self.a * other.a + self.b * other.c,
            b: self.a * other.b + self.b * other.d,
            c: self.c * other.a + self.d * other.c,
            d: self.c * other.b + self.d * other.d,
            tx: self.tx * other.a + self.ty * other.c + other.tx,
            ty: self.tx * other.b + self.ty * other.d + other.ty,
        }
    }

    /// Prepend a translation: points are translated, then `self` applies.
    pub fn translated_by(&self, tx: f64, ty: f64) -> AffineTransform {
        AffineTransform::translation(tx, ty).concat(self)
    }

    /// Prepend a rotation: points are rotated, then `self` applies.
    pub fn rotated_by(&self, radians: f64) -> AffineTransform {
        AffineTransform::rotation(radians).concat(self)
    }

    pub fn apply_to_point(&self, p: Point) -> Point {
        Point {
            x: self.a * p.x + self.c * p.y + self.tx,
            y: self.b * p.x + self.d * p.y + self.ty,
        }
    }

    /// Apply the linear part only; translation does not affect sizes.
    pub fn apply_to_size(&self, s: Size) -> Size {
        Size {
            width: self.a * s.width + self.c * s.height,
            height: self.b * s.width + self.d * s.height,
        }
    }

    /// Bounding box of a rectangle after transformation.
    pub fn apply_to_rect(&self, r: &Rect) -> Rect {
        let corners = r.corners().map(|p| self.apply_to_point(p));
        Rect::bounding(&corners)
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    /// Rotation angle of the linear part in degrees, in `(-180, 180]`.
    pub fn rotation_degrees(&self) -> f64 {
        self.b.atan2(self.a).to_degrees()
    }

    /// Classify the linear part as a clockwise quarter-turn count (0..=3)
    /// in y-down screen space, or `None` for anything that is not a pure
    /// multiple of 90°.
    pub fn quarter_turns(&self) -> Option<u8> {
        const EPS: f64 = 1e-9;
        let near = |v: f64, target: f64| (v - target).abs() < EPS;
        let (a, b, c, d) = (self.a, self.b, self.c, self.d);
        if near(a, 1.0) && near(b, 0.0) && near(c, 0.0) && near(d, 1.0) {
            Some(0)
        } else if near(a, 0.0) && near(b, 1.0) && near(c, -1.0) && near(d, 0.0) {
            Some(1)
        } else if near(a, -1.0) && near(b, 0.0) && near(c, 0.0) && near(d, -1.0) {
            Some(2)
        } else if near(a, 0.0) && near(b, -1.0) && near(c, 1.0) && near(d, 0.0) {
            Some(3)
        } else {
            None
        }
    }
}

impl Default for AffineTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_translated_then_rotated_applies_rotation_first() {
        let t = AffineTransform::IDENTITY
            .translated_by(10.0, 0.0)
            .rotated_by(deg_to_rad(90.0));
        // (1, 0) rotates to (0, 1), then translates to (10, 1).
        let p = t.apply_to_point(Point::new(1.0, 0.0));
        assert!(approx(p.x, 10.0));
        assert!(approx(p.y, 1.0));
    }

    #[test]
    fn test_apply_to_size_ignores_translation() {
        let t = AffineTransform::new(0.0, 1.0, -1.0, 0.0, 1080.0, 0.0);
        let s = t.apply_to_size(Size::new(1920.0, 1080.0));
        assert!(approx(s.width, -1080.0));
        assert!(approx(s.height, 1920.0));
        assert_eq!(s.abs(), Size::new(1080.0, 1920.0));
    }

    #[test]
    fn test_quarter_turns() {
        assert_eq!(AffineTransform::IDENTITY.quarter_turns(), Some(0));
        assert_eq!(
            AffineTransform::rotation(deg_to_rad(90.0)).quarter_turns(),
            Some(1)
        );
        assert_eq!(
            AffineTransform::rotation(deg_to_rad(-180.0)).quarter_turns(),
            Some(2)
        );
        assert_eq!(
            AffineTransform::rotation(deg_to_rad(-90.0)).quarter_turns(),
            Some(3)
        );
        assert_eq!(
            AffineTransform::rotation(deg_to_rad(45.0)).quarter_turns(),
            None
        );
    }

    #[test]
    fn test_rotation_degrees() {
        let t = AffineTransform::rotation(deg_to_rad(-90.0));
        assert!(approx(t.rotation_degrees(), -90.0));
    }

    #[test]
    fn test_bounding_rect() {
        let r = Rect::bounding(&[
            Point::new(5.0, -2.0),
            Point::new(-1.0, 3.0),
            Point::new(2.0, 2.0),
        ]);
        assert_eq!(r, Rect::new(-1.0, -2.0, 6.0, 5.0));
        assert!(Rect::new(-2.0, -3.0, 10.0, 10.0).contains_rect(&r));
    }
}
