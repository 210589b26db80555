//! PFM creation parameters.

use pfm_core::validity::NUM_USER_FLAGS;
use pfm_core::{AverageType, BinGeometry, Mbr, PointerPacking};

use crate::error::{PfmError, Result};
use crate::format::header::FLAG_NAME_LEN;

/// Default depth scale: millimetre resolution.
pub const DEFAULT_DEPTH_SCALE: f32 = 1000.0;

/// Default depth offset: depths down to -1000 m (above datum) are storable.
pub const DEFAULT_DEPTH_OFFSET: f32 = 1000.0;

/// Default null-depth sentinel.
pub const DEFAULT_NULL_DEPTH: f32 = 1_000_000.0;

/// Default depth records per chain buffer.
pub const DEFAULT_RECORDS_PER_BUFFER: u32 = 16;

/// Parameters of a new PFM structure (immutable after creation).
#[derive(Debug, Clone, PartialEq)]
pub struct PfmCreateParams {
    /// Area covered.
    pub mbr: Mbr,
    /// Bin size along x (degrees of longitude or projected units).
    pub x_bin_size: f64,
    /// Bin size along y.
    pub y_bin_size: f64,
    /// Projected (metric) coordinates instead of lon/lat.
    pub projected: bool,
    /// Sentinel depth of empty bins.
    pub null_depth: f32,
    /// Depth quantisation scale.
    pub depth_scale: f32,
    /// Offset added to depths before scaling.
    pub depth_offset: f32,
    /// Horizontal error quantisation scale.
    pub horizontal_error_scale: f32,
    /// Vertical error quantisation scale.
    pub vertical_error_scale: f32,
    /// Depth records per chain buffer.
    pub records_per_buffer: u32,
    /// Names of USER_01..USER_05; empty means unused.
    pub user_flag_names: [String; NUM_USER_FLAGS],
    /// 64-bit split for chain addresses.
    pub pointer_packing: PointerPacking,
    /// What a bin's average filtered depth holds.
    pub average_type: AverageType,
}

impl PfmCreateParams {
    /// Create parameters for a grid over `mbr` with the given bin sizes.
    ///
    /// # Arguments
    /// * `mbr` - Area covered
    /// * `x_bin_size` - Bin size along x
    /// * `y_bin_size` - Bin size along y
    /// * `projected` - Whether the coordinates are projected
    #[inline]
    pub const fn new(mbr: Mbr, x_bin_size: f64, y_bin_size: f64, projected: bool) -> Self {
        Self {
            mbr,
            x_bin_size,
            y_bin_size,
            projected,
            null_depth: DEFAULT_NULL_DEPTH,
            depth_scale: DEFAULT_DEPTH_SCALE,
            depth_offset: DEFAULT_DEPTH_OFFSET,
            horizontal_error_scale: 100.0,
            vertical_error_scale: 100.0,
            records_per_buffer: DEFAULT_RECORDS_PER_BUFFER,
            user_flag_names: [String::new(), String::new(), String::new(), String::new(), String::new()],
            pointer_packing: PointerPacking::Pfm,
            average_type: AverageType::Mean,
        }
    }

    /// Parameters from a bin size in metres; geographic MBRs get per-axis
    /// degree sizes.
    pub fn from_meters(mbr: Mbr, bin_size_m: f64, projected: bool) -> Result<Self> {
        let g = BinGeometry::from_meters(mbr, bin_size_m, projected)?;
        Ok(Self::new(mbr, g.x_bin_size, g.y_bin_size, projected))
    }

    /// Set the null-depth sentinel.
    pub fn with_null_depth(mut self, null_depth: f32) -> Self {
        self.null_depth = null_depth;
        self
    }

    /// Set depth quantisation.
    pub fn with_depth_scaling(mut self, scale: f32, offset: f32) -> Self {
        self.depth_scale = scale;
        self.depth_offset = offset;
        self
    }

    /// Set error quantisation.
    pub fn with_error_scales(mut self, horizontal: f32, vertical: f32) -> Self {
        self.horizontal_error_scale = horizontal;
        self.vertical_error_scale = vertical;
        self
    }

    /// Set records per chain buffer.
    pub fn with_records_per_buffer(mut self, rpb: u32) -> Self {
        self.records_per_buffer = rpb;
        self
    }

    /// Name a user flag. Out-of-range indices are ignored by `validate`.
    pub fn with_user_flag_name(mut self, index: usize, name: impl Into<String>) -> Self {
        if let Some(slot) = self.user_flag_names.get_mut(index) {
            *slot = name.into();
        }
        self
    }

    /// Choose the chain address split. Only legacy tooling needs `Ivs`.
    pub fn with_pointer_packing(mut self, packing: PointerPacking) -> Self {
        self.pointer_packing = packing;
        self
    }

    /// Choose what bin averages hold.
    pub fn with_average_type(mut self, average: AverageType) -> Self {
        self.average_type = average;
        self
    }

    /// Grid described by these parameters.
    pub fn geometry(&self) -> Result<BinGeometry> {
        Ok(BinGeometry::new(self.mbr, self.x_bin_size, self.y_bin_size, self.projected)?)
    }

    /// Check the parameters describe a storable structure.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Err(PfmError::InvalidParams { reason });

        let geometry = self.geometry()?;
        if geometry.width > i32::MAX as u32 / 2 || geometry.height > i32::MAX as u32 / 2 {
            return invalid(format!("grid of {}x{} bins is too large", geometry.width, geometry.height));
        }
        if !(self.depth_scale > 0.0 && self.depth_scale.is_finite()) {
            return invalid(format!("depth scale {} must be positive", self.depth_scale));
        }
        if !self.depth_offset.is_finite() || self.depth_offset < 0.0 {
            return invalid(format!("depth offset {} must be non-negative", self.depth_offset));
        }
        let null_scaled = (self.null_depth as f64 + self.depth_offset as f64) * self.depth_scale as f64;
        if !(0.0..=u32::MAX as f64).contains(&null_scaled) {
            return invalid(format!(
                "null depth {} does not fit the 32-bit depth field at scale {} offset {}",
                self.null_depth, self.depth_scale, self.depth_offset
            ));
        }
        if !(self.horizontal_error_scale > 0.0 && self.vertical_error_scale > 0.0) {
            return invalid("error scales must be positive".into());
        }
        if self.records_per_buffer == 0 || self.records_per_buffer > 4096 {
            return invalid(format!(
                "records per buffer {} must be in 1..=4096",
                self.records_per_buffer
            ));
        }
        for (i, name) in self.user_flag_names.iter().enumerate() {
            if name.len() >= FLAG_NAME_LEN {
                return invalid(format!(
                    "user flag {} name is {} bytes, at most {} fit",
                    i + 1,
                    name.len(),
                    FLAG_NAME_LEN - 1
                ));
            }
        }
        Ok(())
    }
}

impl Default for PfmCreateParams {
    fn default() -> Self {
        Self::new(Mbr::new(0.0, 0.0, 100.0, 100.0), 1.0, 1.0, true)
    }
}
