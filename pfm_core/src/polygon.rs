//! Planar polygon tests used by area edits.
//!
//! Polygons are open vertex lists; the closing edge from the last vertex back
//! to the first is implied.

use crate::types::{Mbr, Point2};

/// Minimum vertex count of a usable polygon.
pub const MIN_POLYGON_VERTICES: usize = 3;

/// Crossing-number point-in-polygon test.
///
/// Returns `false` for polygons with fewer than three vertices. Points exactly
/// on an edge may fall either side.
pub fn point_in_polygon(point: Point2, polygon: &[Point2]) -> bool {
    if polygon.len() < MIN_POLYGON_VERTICES {
        return false;
    }

    let mut inside = false;
    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        let a = polygon[i];
        let b = polygon[j];
        if (a.y > point.y) != (b.y > point.y) {
            let x_cross = a.x + (point.y - a.y) * (b.x - a.x) / (b.y - a.y);
            if point.x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// Bounding rectangle of a polygon.
#[inline]
pub fn polygon_mbr(polygon: &[Point2]) -> Option<Mbr> {
    Mbr::from_points(polygon)
}

/// Polygon with a precomputed bounding rectangle for cheap rejection.
#[derive(Debug, Clone, Copy)]
pub struct BoundedPolygon<'a> {
    vertices: &'a [Point2],
    mbr: Mbr,
}

impl<'a> BoundedPolygon<'a> {
    /// Wrap a vertex list. `None` when it has fewer than three vertices.
    pub fn new(vertices: &'a [Point2]) -> Option<Self> {
        if vertices.len() < MIN_POLYGON_VERTICES {
            return None;
        }
        let mbr = polygon_mbr(vertices)?;
        Some(Self { vertices, mbr })
    }

    /// Bounding rectangle.
    #[inline]
    pub fn mbr(&self) -> Mbr {
        self.mbr
    }

    /// Vertices.
    #[inline]
    pub fn vertices(&self) -> &'a [Point2] {
        self.vertices
    }

    /// Whether `point` lies inside.
    #[inline]
    pub fn contains(&self, point: Point2) -> bool {
        point.x >= self.mbr.min_x
            && point.x <= self.mbr.max_x
            && point.y >= self.mbr.min_y
            && point.y <= self.mbr.max_y
            && point_in_polygon(point, self.vertices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> [Point2; 4] {
        [
            Point2::new(0.0, 0.0),
            Point2::new(10.0, 0.0),
            Point2::new(10.0, 10.0),
            Point2::new(0.0, 10.0),
        ]
    }

    #[test]
    fn test_square() {
        let sq = square();
        assert!(point_in_polygon(Point2::new(5.0, 5.0), &sq));
        assert!(!point_in_polygon(Point2::new(15.0, 5.0), &sq));
        assert!(!point_in_polygon(Point2::new(5.0, -1.0), &sq));
    }

    #[test]
    fn test_concave() {
        // U shape opening north
        let u = [
            Point2::new(0.0, 0.0),
            Point2::new(9.0, 0.0),
            Point2::new(9.0, 9.0),
            Point2::new(6.0, 9.0),
            Point2::new(6.0, 3.0),
            Point2::new(3.0, 3.0),
            Point2::new(3.0, 9.0),
            Point2::new(0.0, 9.0),
        ];
        assert!(point_in_polygon(Point2::new(1.5, 6.0), &u));
        assert!(!point_in_polygon(Point2::new(4.5, 6.0), &u));
        assert!(point_in_polygon(Point2::new(4.5, 1.5), &u));
    }

    #[test]
    fn test_degenerate() {
        let line = [Point2::new(0.0, 0.0), Point2::new(1.0, 1.0)];
        assert!(!point_in_polygon(Point2::new(0.5, 0.5), &line));
        assert!(BoundedPolygon::new(&line).is_none());
    }

    #[test]
    fn test_bounded() {
        let sq = square();
        let poly = BoundedPolygon::new(&sq).unwrap();
        assert_eq!(poly.mbr(), Mbr::new(0.0, 0.0, 10.0, 10.0));
        assert!(poly.contains(Point2::new(2.0, 8.0)));
        assert!(!poly.contains(Point2::new(-2.0, 8.0)));
    }
}
