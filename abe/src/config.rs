//! Area filter configuration.
//!
//! [`FilterConfig`] is plain data with JSON (de)serialisation. Fields missing
//! from a JSON document take their defaults, so a file only needs to name what
//! it changes:
//!
//! ```text
//! { "filter_std": 2.4, "deep_filter_only": true }
//! ```

use std::path::Path;

use pfm_io::FilterParams;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Tuning of one area filter run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Multiplier applied to the reference standard deviation.
    pub filter_std: f32,
    /// Only invalidate soundings deeper than the neighbourhood average.
    pub deep_filter_only: bool,
    /// Radius around point features that is never filtered, metres.
    pub feature_radius: f32,
    /// Bins of the 3x3 neighbourhood, centre included, that must hold valid data.
    pub min_neighbors: usize,
    /// Largest rise/run along any line through the centre for a flat neighbourhood.
    pub flat_slope_limit: f64,
    /// Rows filtered between checks of the cancel flag.
    pub cancel_check_rows: usize,
}

impl FilterConfig {
    /// Default configuration.
    pub const fn new() -> Self {
        Self {
            filter_std: 2.4,
            deep_filter_only: false,
            feature_radius: 0.0,
            min_neighbors: 5,
            flat_slope_limit: 1.0,
            cancel_check_rows: 10,
        }
    }

    /// Set the standard-deviation multiplier.
    pub fn with_filter_std(mut self, filter_std: f32) -> Self {
        self.filter_std = filter_std;
        self
    }

    /// Restrict invalidation to soundings deeper than the neighbourhood.
    pub fn with_deep_filter_only(mut self, deep: bool) -> Self {
        self.deep_filter_only = deep;
        self
    }

    /// Set the feature protection radius in metres.
    pub fn with_feature_radius(mut self, radius: f32) -> Self {
        self.feature_radius = radius;
        self
    }

    /// Parse from JSON text.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Pretty-printed JSON.
    pub fn to_json_string(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check every field is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.filter_std.is_finite() && self.filter_std > 0.0) {
            return Err(ConfigError::Invalid {
                field: "filter_std",
                reason: "must be a positive number",
            });
        }
        if !(self.feature_radius.is_finite() && self.feature_radius >= 0.0) {
            return Err(ConfigError::Invalid {
                field: "feature_radius",
                reason: "must be zero or positive",
            });
        }
        if !(1..=9).contains(&self.min_neighbors) {
            return Err(ConfigError::Invalid {
                field: "min_neighbors",
                reason: "must be between 1 and 9",
            });
        }
        if !(self.flat_slope_limit.is_finite() && self.flat_slope_limit >= 0.0) {
            return Err(ConfigError::Invalid {
                field: "flat_slope_limit",
                reason: "must be zero or positive",
            });
        }
        if self.cancel_check_rows == 0 {
            return Err(ConfigError::Invalid {
                field: "cancel_check_rows",
                reason: "must be at least 1",
            });
        }
        Ok(())
    }

    /// Take the parameters the editor published in the session segment,
    /// keeping this configuration's remaining fields.
    pub fn with_share_params(mut self, params: &FilterParams) -> Self {
        self.filter_std = params.filter_std;
        self.feature_radius = params.feature_radius;
        self.deep_filter_only = params.deep_filter_only != 0;
        self
    }

    /// Write this configuration's shared fields over `params`.
    pub fn apply_to_share_params(&self, params: &mut FilterParams) {
        params.filter_std = self.filter_std;
        params.feature_radius = self.feature_radius;
        params.deep_filter_only = u32::from(self.deep_filter_only);
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self::new()
    }
}
