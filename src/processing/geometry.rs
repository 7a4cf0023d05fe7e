//! Pure 2D geometry for the alignment engine: points, axis-aligned
//! rectangles and affine maps between coordinate spaces.

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use crate::models::DocumentFormat;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Point { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Rect { x, y, width, height }
    }

    /// Smallest rectangle containing every point.
    pub fn bounding(points: &[Point]) -> Option<Rect> {
        let first = points.first()?;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
        for p in &points[1..] {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        Some(Rect::new(min_x, min_y, max_x - min_x, max_y - min_y))
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Clockwise from the top-left corner.
    pub fn corners(&self) -> [Point; 4] {
        [
            Point::new(self.x, self.y),
            Point::new(self.right(), self.y),
            Point::new(self.right(), self.bottom()),
            Point::new(self.x, self.bottom()),
        ]
    }

    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right <= x || bottom <= y {
            None
        } else {
            Some(Rect::new(x, y, right - x, bottom - y))
        }
    }

    pub fn iou(&self, other: &Rect) -> f32 {
        let inter = self.intersection(other).map(|r| r.area()).unwrap_or(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    /// Grow by `fraction` of the size on every side, clamped to `bounds`.
    pub fn padded(&self, fraction: f32, bounds: &Rect) -> Rect {
        let dx = self.width * fraction;
        let dy = self.height * fraction;
        let x = (self.x - dx).max(bounds.x);
        let y = (self.y - dy).max(bounds.y);
        let right = (self.right() + dx).min(bounds.right());
        let bottom = (self.bottom() + dy).min(bounds.bottom());
        Rect::new(x, y, (right - x).max(0.0), (bottom - y).max(0.0))
    }

    /// Image of the rectangle under `map`, as the bounding box of its
    /// mapped corners.
    pub fn transformed(&self, map: &AffineMap) -> Rect {
        let corners = map.apply_all(&self.corners());
        Rect::bounding(&corners).unwrap_or_default()
    }
}

/// 2D affine transform in homogeneous coordinates. `a.then(b)` applies `a`
/// first, so chains read in the order the spaces are crossed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineMap {
    matrix: Matrix3<f32>,
}

impl Default for AffineMap {
    fn default() -> Self {
        Self::identity()
    }
}

impl AffineMap {
    pub fn identity() -> Self {
        AffineMap {
            matrix: Matrix3::identity(),
        }
    }

    pub fn translation(dx: f32, dy: f32) -> Self {
        AffineMap {
            matrix: Matrix3::new(1.0, 0.0, dx, 0.0, 1.0, dy, 0.0, 0.0, 1.0),
        }
    }

    pub fn scale(sx: f32, sy: f32) -> Self {
        AffineMap {
            matrix: Matrix3::new(sx, 0.0, 0.0, 0.0, sy, 0.0, 0.0, 0.0, 1.0),
        }
    }

    pub fn then(&self, next: &AffineMap) -> AffineMap {
        AffineMap {
            matrix: next.matrix * self.matrix,
        }
    }

    pub fn inverse(&self) -> Option<AffineMap> {
        self.matrix.try_inverse().map(|matrix| AffineMap { matrix })
    }

    pub fn apply(&self, point: Point) -> Point {
        let v = self.matrix * Vector3::new(point.x, point.y, 1.0);
        Point::new(v.x, v.y)
    }

    pub fn apply_all<const N: usize>(&self, points: &[Point; N]) -> [Point; N] {
        points.map(|p| self.apply(p))
    }
}

/// Order four points as [top-left, top-right, bottom-right, bottom-left]:
/// the two smallest y are the top edge, each edge is then sorted by x.
pub fn order_corners(points: [Point; 4]) -> [Point; 4] {
    let mut sorted = points;
    sorted.sort_by(|a, b| a.y.total_cmp(&b.y).then(a.x.total_cmp(&b.x)));
    let (mut top, mut bottom) = ([sorted[0], sorted[1]], [sorted[2], sorted[3]]);
    top.sort_by(|a, b| a.x.total_cmp(&b.x));
    bottom.sort_by(|a, b| a.x.total_cmp(&b.x));
    [top[0], top[1], bottom[1], bottom[0]]
}

/// Frame to preview mapping for a preview that shows the whole frame with
/// a uniform scale, centered, with letterbox bars on the short axis.
pub fn preview_map(frame_width: f32, frame_height: f32, preview_width: f32, preview_height: f32) -> AffineMap {
    if frame_width <= 0.0 || frame_height <= 0.0 {
        return AffineMap::identity();
    }
    let frame_aspect = frame_width / frame_height;
    let preview_aspect = preview_width / preview_height;
    let scale = if frame_aspect > preview_aspect {
        preview_width / frame_width
    } else {
        preview_height / frame_height
    };
    let offset_x = (preview_width - frame_width * scale) / 2.0;
    let offset_y = (preview_height - frame_height * scale) / 2.0;
    AffineMap::scale(scale, scale).then(&AffineMap::translation(offset_x, offset_y))
}

/// On-screen guide box for a document format: centered, `fill` of the
/// preview width, with the card's physical aspect ratio.
pub fn guide_for_format(format: DocumentFormat, preview_width: f32, preview_height: f32, fill: f32) -> Rect {
    let aspect = format.aspect_ratio();
    let mut width = preview_width * fill;
    let mut height = width / aspect;
    if height > preview_height * fill {
        height = preview_height * fill;
        width = height * aspect;
    }
    Rect::new((preview_width - width) / 2.0, (preview_height - height) / 2.0, width, height)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Point, b: Point) -> bool {
        (a.x - b.x).abs() < 1e-3 && (a.y - b.y).abs() < 1e-3
    }

    #[test]
    fn test_iou() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        assert_eq!(a.iou(&a), 1.0);
        let b = Rect::new(5.0, 0.0, 10.0, 10.0);
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
        assert_eq!(a.iou(&Rect::new(20.0, 20.0, 5.0, 5.0)), 0.0);
    }

    #[test]
    fn test_order_corners() {
        let shuffled = [
            Point::new(98.0, 52.0),
            Point::new(2.0, 1.0),
            Point::new(0.0, 50.0),
            Point::new(100.0, 0.0),
        ];
        let ordered = order_corners(shuffled);
        assert_eq!(ordered[0], Point::new(2.0, 1.0));
        assert_eq!(ordered[1], Point::new(100.0, 0.0));
        assert_eq!(ordered[2], Point::new(98.0, 52.0));
        assert_eq!(ordered[3], Point::new(0.0, 50.0));
    }

    #[test]
    fn test_composition_is_left_to_right() {
        let map = AffineMap::translation(10.0, 0.0).then(&AffineMap::scale(2.0, 2.0));
        assert!(close(map.apply(Point::new(1.0, 1.0)), Point::new(22.0, 2.0)));
        let back = map.inverse().unwrap();
        assert!(close(back.apply(Point::new(22.0, 2.0)), Point::new(1.0, 1.0)));
    }

    #[test]
    fn test_preview_letterbox() {
        // 4:3 frame in a 1:1 preview: bars top and bottom
        let map = preview_map(400.0, 300.0, 200.0, 200.0);
        assert!(close(map.apply(Point::new(0.0, 0.0)), Point::new(0.0, 25.0)));
        assert!(close(map.apply(Point::new(400.0, 300.0)), Point::new(200.0, 175.0)));
        // tall frame in a wide preview: bars left and right
        let map = preview_map(300.0, 600.0, 400.0, 300.0);
        assert!(close(map.apply(Point::new(0.0, 0.0)), Point::new(125.0, 0.0)));
    }

    #[test]
    fn test_padded_is_clamped() {
        let bounds = Rect::new(0.0, 0.0, 100.0, 100.0);
        let padded = Rect::new(5.0, 10.0, 50.0, 50.0).padded(0.1, &bounds);
        assert_eq!(padded, Rect::new(0.0, 5.0, 60.0, 60.0));
    }

    #[test]
    fn test_guide_keeps_aspect_ratio() {
        let guide = guide_for_format(DocumentFormat::TD1, 1000.0, 1000.0, 0.9);
        assert!((guide.width / guide.height - DocumentFormat::TD1.aspect_ratio()).abs() < 1e-3);
        assert!((guide.center().x - 500.0).abs() < 1e-3);
    }
}
