//! Protected geometry and record masks.
//!
//! Point features mark soundings that must never be auto-filtered: everything
//! within the feature radius of a feature position, and everything inside a
//! feature's own exclusion polygon.

use std::path::Path;

use pfm_core::{point_in_polygon, BinGeometry, DepthRecord, Mbr, Point2};
use serde::{Deserialize, Serialize};

use crate::error::{AbeError, ConfigError};

/// A point feature with an optional exclusion polygon.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    /// Feature position.
    pub position: Point2,
    /// Area around the feature that is never filtered.
    pub polygon: Option<Vec<Point2>>,
}

impl Feature {
    /// A feature with no exclusion polygon.
    pub const fn point(position: Point2) -> Self {
        Self {
            position,
            polygon: None,
        }
    }

    /// Attach an exclusion polygon.
    pub fn with_polygon(mut self, polygon: Vec<Point2>) -> Self {
        self.polygon = Some(polygon);
        self
    }

    fn extent(&self) -> Mbr {
        let point = Mbr::new(
            self.position.x,
            self.position.y,
            self.position.x,
            self.position.y,
        );
        match self.polygon.as_deref().and_then(Mbr::from_points) {
            Some(m) => Mbr::new(
                m.min_x.min(point.min_x),
                m.min_y.min(point.min_y),
                m.max_x.max(point.max_x),
                m.max_y.max(point.max_y),
            ),
            None => point,
        }
    }

    /// Whether `p` is within `radius_m` of the feature or inside its polygon.
    pub fn protects(&self, p: Point2, radius_m: f64, geometry: &BinGeometry) -> bool {
        if radius_m > 0.0 && geometry.distance_m(self.position, p) <= radius_m {
            return true;
        }
        match &self.polygon {
            Some(poly) => point_in_polygon(p, poly),
            None => false,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct FeatureEntry {
    x: f64,
    y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    polygon: Option<Vec<[f64; 2]>>,
}

impl From<FeatureEntry> for Feature {
    fn from(e: FeatureEntry) -> Self {
        Self {
            position: Point2::new(e.x, e.y),
            polygon: e
                .polygon
                .map(|v| v.into_iter().map(|[x, y]| Point2::new(x, y)).collect()),
        }
    }
}

/// Features in force for a filter run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureSet {
    features: Vec<Feature>,
}

impl FeatureSet {
    /// An empty set.
    pub const fn new() -> Self {
        Self {
            features: Vec::new(),
        }
    }

    /// Add a feature.
    pub fn push(&mut self, feature: Feature) {
        self.features.push(feature);
    }

    /// Number of features.
    #[inline]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// Whether the set is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Iterate over the features.
    pub fn iter(&self) -> impl Iterator<Item = &Feature> {
        self.features.iter()
    }

    /// Parse a JSON array of `{ "x", "y", "polygon": [[x, y], ...] }` entries.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let entries: Vec<FeatureEntry> = serde_json::from_str(text)?;
        Ok(Self {
            features: entries.into_iter().map(Feature::from).collect(),
        })
    }

    /// Load a JSON feature file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// The features whose protection can reach into `area`.
    ///
    /// A feature is kept when its position or polygon, grown by `radius_m`,
    /// overlaps the area.
    pub fn load_for_area(
        &self,
        area: &Mbr,
        radius_m: f64,
        geometry: &BinGeometry,
    ) -> Result<Self, AbeError> {
        let (bin_w_m, bin_h_m) = geometry.bin_dimensions_m();
        let dx = radius_m * geometry.x_bin_size / bin_w_m;
        let dy = radius_m * geometry.y_bin_size / bin_h_m;
        let reach = area.expand(dx, dy);

        let reaching: Vec<&Feature> = self
            .features
            .iter()
            .filter(|f| f.extent().intersects(&reach))
            .collect();
        let mut features = Vec::new();
        features
            .try_reserve_exact(reaching.len())
            .map_err(|_| AbeError::Allocation { bins: 0 })?;
        features.extend(reaching.into_iter().cloned());
        log::debug!(
            "{} of {} features reach the filter area",
            features.len(),
            self.features.len()
        );
        Ok(Self { features })
    }

    /// Whether any feature protects `p`.
    pub fn protects(&self, p: Point2, radius_m: f64, geometry: &BinGeometry) -> bool {
        self.features.iter().any(|f| f.protects(p, radius_m, geometry))
    }
}

impl FromIterator<Feature> for FeatureSet {
    fn from_iter<I: IntoIterator<Item = Feature>>(iter: I) -> Self {
        Self {
            features: iter.into_iter().collect(),
        }
    }
}

/// Additional per-record bounds a filter run must respect.
pub trait RecordMask {
    /// Whether the filter may invalidate `record`.
    fn accepts(&self, record: &DepthRecord) -> bool;
}

impl<F> RecordMask for F
where
    F: Fn(&DepthRecord) -> bool,
{
    #[inline]
    fn accepts(&self, record: &DepthRecord) -> bool {
        self(record)
    }
}

/// Mask that accepts every record.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl RecordMask for AcceptAll {
    #[inline]
    fn accepts(&self, _record: &DepthRecord) -> bool {
        true
    }
}
