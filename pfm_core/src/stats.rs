//! Bin aggregate statistics.
//!
//! A bin's cached aggregates are derived strictly from its currently valid
//! soundings: mean (or the configured average), minimum, maximum and the sample
//! standard deviation.

use crate::alloc_prelude::Vec;

/// Which statistic a bin's average filtered depth holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum AverageType {
    /// Arithmetic mean of the valid soundings.
    #[default]
    Mean = 0,
    /// Median of the valid soundings.
    Median = 1,
    /// Shoalest valid sounding.
    Minimum = 2,
    /// Deepest valid sounding.
    Maximum = 3,
}

impl AverageType {
    /// Decode a stored tag.
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(AverageType::Mean),
            1 => Some(AverageType::Median),
            2 => Some(AverageType::Minimum),
            3 => Some(AverageType::Maximum),
            _ => None,
        }
    }
}

/// Summary of a set of depths.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DepthSummary {
    /// Number of depths summarised.
    pub count: u32,
    /// Value selected by the [`AverageType`].
    pub average: f64,
    /// Arithmetic mean.
    pub mean: f64,
    /// Smallest depth.
    pub min: f64,
    /// Largest depth.
    pub max: f64,
    /// Sample standard deviation; exactly 0.0 when `count < 2`.
    pub std_dev: f64,
}

impl DepthSummary {
    /// Whether any depth contributed.
    #[inline]
    pub fn has_data(&self) -> bool {
        self.count > 0
    }
}

/// Summarise `depths`. Returns `None` for an empty slice.
pub fn summarize(depths: &[f64], average: AverageType) -> Option<DepthSummary> {
    if depths.is_empty() {
        return None;
    }

    let n = depths.len() as f64;
    let mut sum = 0.0;
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for &z in depths {
        sum += z;
        min = min.min(z);
        max = max.max(z);
    }
    let mean = sum / n;

    let std_dev = if depths.len() < 2 {
        0.0
    } else {
        let ss: f64 = depths.iter().map(|&z| (z - mean) * (z - mean)).sum();
        libm::sqrt(ss / (n - 1.0))
    };

    let average = match average {
        AverageType::Mean => mean,
        AverageType::Median => median(depths),
        AverageType::Minimum => min,
        AverageType::Maximum => max,
    };

    Some(DepthSummary {
        count: depths.len() as u32,
        average,
        mean,
        min,
        max,
        std_dev,
    })
}

/// Median of a non-empty slice. Even counts average the two middle values.
pub fn median(values: &[f64]) -> f64 {
    let mut sorted: Vec<f64> = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) * 0.5
    } else {
        sorted[mid]
    }
}

/// Sample standard deviation of a slice; 0.0 for fewer than two values.
pub fn sample_std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let ss: f64 = values.iter().map(|&v| (v - mean) * (v - mean)).sum();
    libm::sqrt(ss / (n - 1.0))
}
