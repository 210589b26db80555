//! Core types for PFM bin-indexed storage.
//!
//! Provides planar positions, bin coordinates and minimum bounding rectangles
//! shared by the storage engine and the area filter.

use core::ops::{Add, Sub};

/// A horizontal position in geographic (lon/lat degrees) or projected units.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point2 {
    /// Longitude or easting.
    pub x: f64,
    /// Latitude or northing.
    pub y: f64,
}

impl Point2 {
    /// Create a new Point2.
    #[inline]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean length when treated as a vector.
    #[inline]
    pub fn length(self) -> f64 {
        libm::sqrt(self.x * self.x + self.y * self.y)
    }
}

impl Add for Point2 {
    type Output = Self;
    #[inline]
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Point2 {
    type Output = Self;
    #[inline]
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl From<[f64; 2]> for Point2 {
    #[inline]
    fn from(arr: [f64; 2]) -> Self {
        Self::new(arr[0], arr[1])
    }
}

/// Integer coordinate of a bin in the PFM grid.
///
/// Row 0 is the southern (minimum y) edge, column 0 the western (minimum x) edge.
/// Signed so that neighbourhood arithmetic (`row - 1`) never wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct BinCoord {
    /// Row index (y axis).
    pub row: i32,
    /// Column index (x axis).
    pub col: i32,
}

impl BinCoord {
    /// Create a new BinCoord.
    #[inline]
    pub const fn new(row: i32, col: i32) -> Self {
        Self { row, col }
    }

    /// Coordinate offset by `(d_row, d_col)`.
    #[inline]
    pub const fn offset(self, d_row: i32, d_col: i32) -> Self {
        Self::new(self.row + d_row, self.col + d_col)
    }
}

/// Minimum bounding rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Mbr {
    /// Western edge.
    pub min_x: f64,
    /// Southern edge.
    pub min_y: f64,
    /// Eastern edge.
    pub max_x: f64,
    /// Northern edge.
    pub max_y: f64,
}

impl Mbr {
    /// Create a new MBR. Edges are taken as given.
    #[inline]
    pub const fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Smallest MBR containing every point, `None` for an empty slice.
    pub fn from_points(points: &[Point2]) -> Option<Self> {
        let first = points.first()?;
        let mut mbr = Self::new(first.x, first.y, first.x, first.y);
        for p in &points[1..] {
            mbr.min_x = mbr.min_x.min(p.x);
            mbr.min_y = mbr.min_y.min(p.y);
            mbr.max_x = mbr.max_x.max(p.x);
            mbr.max_y = mbr.max_y.max(p.y);
        }
        Some(mbr)
    }

    /// Width along x.
    #[inline]
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    /// Height along y.
    #[inline]
    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Whether the rectangle has positive area.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.max_x > self.min_x && self.max_y > self.min_y
    }

    /// Half-open containment: west and south edges inclusive.
    #[inline]
    pub fn contains(&self, p: Point2) -> bool {
        p.x >= self.min_x && p.x < self.max_x && p.y >= self.min_y && p.y < self.max_y
    }

    /// Closed containment: every edge inclusive.
    #[inline]
    pub fn contains_closed(&self, p: Point2) -> bool {
        p.x >= self.min_x && p.x <= self.max_x && p.y >= self.min_y && p.y <= self.max_y
    }

    /// Grow every edge outward by `dx` and `dy`.
    #[inline]
    pub fn expand(&self, dx: f64, dy: f64) -> Self {
        Self::new(self.min_x - dx, self.min_y - dy, self.max_x + dx, self.max_y + dy)
    }

    /// Overlap of two rectangles, `None` when disjoint.
    pub fn intersection(&self, other: &Mbr) -> Option<Self> {
        let mbr = Self::new(
            self.min_x.max(other.min_x),
            self.min_y.max(other.min_y),
            self.max_x.min(other.max_x),
            self.max_y.min(other.max_y),
        );
        if mbr.max_x >= mbr.min_x && mbr.max_y >= mbr.min_y {
            Some(mbr)
        } else {
            None
        }
    }

    /// Whether two rectangles share any area or edge.
    #[inline]
    pub fn intersects(&self, other: &Mbr) -> bool {
        self.intersection(other).is_some()
    }

    /// Centre point.
    #[inline]
    pub fn center(&self) -> Point2 {
        Point2::new(
            (self.min_x + self.max_x) * 0.5,
            (self.min_y + self.max_y) * 0.5,
        )
    }

    /// The four corners, counter-clockwise from south-west.
    pub fn corners(&self) -> [Point2; 4] {
        [
            Point2::new(self.min_x, self.min_y),
            Point2::new(self.max_x, self.min_y),
            Point2::new(self.max_x, self.max_y),
            Point2::new(self.min_x, self.max_y),
        ]
    }
}
