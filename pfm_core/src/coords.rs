//! Bin coordinate mathematics.
//!
//! Maps geographic or projected positions to `(row, col)` bin coordinates and
//! back. The forward map subtracts the MBR origin and truncates the division by
//! the per-axis bin size; the inverse returns the bin centre, so
//! `compute_index(bin_center(c)) == c` for every bin inside the grid.

use crate::error::PfmCoreError;
use crate::types::{BinCoord, Mbr, Point2};

/// Metres in one degree of latitude (60 nautical miles).
pub const METERS_PER_DEGREE_LAT: f64 = 111_120.0;

/// Scale applied to the fractional in-bin position stored in depth records.
pub const POSITION_SCALE: f64 = u32::MAX as f64;

/// Shape of a PFM bin grid.
///
/// `mbr.max_x`/`mbr.max_y` are snapped to `min + width * bin_size` on
/// construction so that every position inside the MBR falls in a real bin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BinGeometry {
    /// Snapped bounding rectangle.
    pub mbr: Mbr,
    /// Bin size along x (degrees of longitude or projected units).
    pub x_bin_size: f64,
    /// Bin size along y (degrees of latitude or projected units).
    pub y_bin_size: f64,
    /// Number of columns.
    pub width: u32,
    /// Number of rows.
    pub height: u32,
    /// True for projected (metric) coordinates, false for lon/lat degrees.
    pub projected: bool,
}

impl BinGeometry {
    /// Build a grid covering `mbr` with the given per-axis bin sizes.
    pub fn new(
        mbr: Mbr,
        x_bin_size: f64,
        y_bin_size: f64,
        projected: bool,
    ) -> Result<Self, PfmCoreError> {
        if !mbr.is_valid() {
            return Err(PfmCoreError::InvalidGeometry {
                reason: "MBR has no area",
            });
        }
        if !(x_bin_size > 0.0 && y_bin_size > 0.0) {
            return Err(PfmCoreError::InvalidGeometry {
                reason: "bin size must be positive",
            });
        }

        let width = libm::ceil(mbr.width() / x_bin_size);
        let height = libm::ceil(mbr.height() / y_bin_size);
        if width > i32::MAX as f64 || height > i32::MAX as f64 {
            return Err(PfmCoreError::InvalidGeometry {
                reason: "grid dimensions exceed 2^31 bins per axis",
            });
        }
        let width = (width as u32).max(1);
        let height = (height as u32).max(1);

        let snapped = Mbr::new(
            mbr.min_x,
            mbr.min_y,
            mbr.min_x + width as f64 * x_bin_size,
            mbr.min_y + height as f64 * y_bin_size,
        );

        Ok(Self {
            mbr: snapped,
            x_bin_size,
            y_bin_size,
            width,
            height,
            projected,
        })
    }

    /// Build a grid from a bin size in metres.
    ///
    /// For geographic MBRs the latitude bin size is `meters / 111120` and the
    /// longitude bin size is widened by `1 / cos(centre latitude)` so bins are
    /// roughly square on the ground.
    pub fn from_meters(mbr: Mbr, bin_size_m: f64, projected: bool) -> Result<Self, PfmCoreError> {
        if projected {
            return Self::new(mbr, bin_size_m, bin_size_m, true);
        }

        let y_bin = bin_size_m / METERS_PER_DEGREE_LAT;
        let cos_lat = libm::cos(mbr.center().y.to_radians());
        if cos_lat <= 1e-9 {
            return Err(PfmCoreError::InvalidGeometry {
                reason: "geographic MBR centred on a pole",
            });
        }
        Self::new(mbr, y_bin / cos_lat, y_bin, false)
    }

    /// Total number of bins.
    #[inline]
    pub fn num_bins(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Whether `coord` lies inside the grid.
    #[inline]
    pub fn contains(&self, coord: BinCoord) -> bool {
        coord.row >= 0
            && coord.col >= 0
            && (coord.row as u32) < self.height
            && (coord.col as u32) < self.width
    }

    /// Row-major linear index of a bin.
    #[inline]
    pub fn linear_index(&self, coord: BinCoord) -> Option<u64> {
        if self.contains(coord) {
            Some(coord.row as u64 * self.width as u64 + coord.col as u64)
        } else {
            None
        }
    }

    /// Bin containing `point`, `None` when outside the grid.
    #[inline]
    pub fn compute_index(&self, point: Point2) -> Option<BinCoord> {
        compute_index(point, self)
    }

    /// Bin coordinate for `point` without a bounds check.
    ///
    /// Uses floor rather than truncation so positions west or south of the
    /// grid get negative coordinates.
    #[inline]
    pub fn compute_index_unbounded(&self, point: Point2) -> BinCoord {
        let col = libm::floor((point.x - self.mbr.min_x) / self.x_bin_size);
        let row = libm::floor((point.y - self.mbr.min_y) / self.y_bin_size);
        BinCoord::new(row as i32, col as i32)
    }

    /// Centre of a bin.
    #[inline]
    pub fn bin_center(&self, coord: BinCoord) -> Point2 {
        bin_center(coord, self)
    }

    /// South-west corner of a bin.
    #[inline]
    pub fn bin_origin(&self, coord: BinCoord) -> Point2 {
        Point2::new(
            self.mbr.min_x + coord.col as f64 * self.x_bin_size,
            self.mbr.min_y + coord.row as f64 * self.y_bin_size,
        )
    }

    /// Bounding rectangle of a bin.
    #[inline]
    pub fn bin_mbr(&self, coord: BinCoord) -> Mbr {
        let origin = self.bin_origin(coord);
        Mbr::new(
            origin.x,
            origin.y,
            origin.x + self.x_bin_size,
            origin.y + self.y_bin_size,
        )
    }

    /// Fractional position of `point` inside bin `coord`, clamped to `[0, 1]`.
    #[inline]
    pub fn position_in_bin(&self, point: Point2, coord: BinCoord) -> (f64, f64) {
        let origin = self.bin_origin(coord);
        let fx = (point.x - origin.x) / self.x_bin_size;
        let fy = (point.y - origin.y) / self.y_bin_size;
        (fx.clamp(0.0, 1.0), fy.clamp(0.0, 1.0))
    }

    /// Inverse of [`position_in_bin`](Self::position_in_bin).
    #[inline]
    pub fn point_from_position(&self, coord: BinCoord, fx: f64, fy: f64) -> Point2 {
        let origin = self.bin_origin(coord);
        Point2::new(
            origin.x + fx * self.x_bin_size,
            origin.y + fy * self.y_bin_size,
        )
    }

    /// Encode a fractional in-bin position as two unsigned 32-bit integers.
    #[inline]
    pub fn encode_position(&self, point: Point2, coord: BinCoord) -> (u32, u32) {
        let (fx, fy) = self.position_in_bin(point, coord);
        (
            libm::round(fx * POSITION_SCALE) as u32,
            libm::round(fy * POSITION_SCALE) as u32,
        )
    }

    /// Decode a position written by [`encode_position`](Self::encode_position).
    #[inline]
    pub fn decode_position(&self, coord: BinCoord, ix: u32, iy: u32) -> Point2 {
        self.point_from_position(coord, ix as f64 / POSITION_SCALE, iy as f64 / POSITION_SCALE)
    }

    /// Width and height of one bin in metres.
    ///
    /// Geographic grids use the latitude at the grid centre.
    pub fn bin_dimensions_m(&self) -> (f64, f64) {
        if self.projected {
            return (self.x_bin_size, self.y_bin_size);
        }
        let cos_lat = libm::cos(self.mbr.center().y.to_radians());
        (
            self.x_bin_size * METERS_PER_DEGREE_LAT * cos_lat,
            self.y_bin_size * METERS_PER_DEGREE_LAT,
        )
    }

    /// Ground distance between two positions in metres.
    ///
    /// Equirectangular approximation for geographic grids, which is accurate
    /// at the few-bin distances the filter works with.
    pub fn distance_m(&self, a: Point2, b: Point2) -> f64 {
        if self.projected {
            return (b - a).length();
        }
        let mean_lat = ((a.y + b.y) * 0.5).to_radians();
        let dx = (b.x - a.x) * METERS_PER_DEGREE_LAT * libm::cos(mean_lat);
        let dy = (b.y - a.y) * METERS_PER_DEGREE_LAT;
        libm::sqrt(dx * dx + dy * dy)
    }
}

/// Bin containing `point`: truncating division of the offset from the MBR
/// origin by the bin size. `None` when the point is outside the grid.
#[inline]
pub fn compute_index(point: Point2, geometry: &BinGeometry) -> Option<BinCoord> {
    if !geometry.mbr.contains(point) {
        return None;
    }
    let col = ((point.x - geometry.mbr.min_x) / geometry.x_bin_size) as i32;
    let row = ((point.y - geometry.mbr.min_y) / geometry.y_bin_size) as i32;
    let coord = BinCoord::new(
        row.min(geometry.height as i32 - 1),
        col.min(geometry.width as i32 - 1),
    );
    Some(coord)
}

/// Centre of bin `coord`.
#[inline]
pub fn bin_center(coord: BinCoord, geometry: &BinGeometry) -> Point2 {
    Point2::new(
        geometry.mbr.min_x + (coord.col as f64 + 0.5) * geometry.x_bin_size,
        geometry.mbr.min_y + (coord.row as f64 + 0.5) * geometry.y_bin_size,
    )
}

/// The 3x3 neighbourhood of `coord` in row-major order starting at `row - 1`.
///
/// The centre bin is at index 4.
#[inline]
pub fn neighborhood(coord: BinCoord) -> [BinCoord; 9] {
    let mut out = [coord; 9];
    let mut i = 0;
    for d_row in -1..=1 {
        for d_col in -1..=1 {
            out[i] = coord.offset(d_row, d_col);
            i += 1;
        }
    }
    out
}
