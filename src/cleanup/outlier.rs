//! Statistical outlier removal for point clouds.
//!
//! # Algorithm
//!
//! For each point:
//! 1. Find the k nearest neighbors (the point itself excluded)
//! 2. Compute the mean distance to those neighbors
//! 3. Rank all points by this statistic, largest first
//! 4. Remove the top `removed_fraction` of the ranking
//!
//! Survivors keep their relative order. Ranking ties are broken by input
//! index, so identical input always produces identical output.
//!
//! # Example
//!
//! ```
//! use cloud_pipeline::{remove_outliers, OutlierParams, PointCloud};
//! use nalgebra::Point3;
//!
//! let mut positions: Vec<_> = (0..100)
//!     .map(|i| Point3::new(i as f64 * 0.1, i as f64 * 0.001, i as f64 * 0.002))
//!     .collect();
//! positions.push(Point3::new(5.0, 100.0, 0.0));
//!
//! let cloud = PointCloud::from_positions(&positions);
//! let params = OutlierParams::new().with_removed_fraction(0.02);
//! let filtered = remove_outliers(&cloud, &params).unwrap();
//! assert!(filtered.len() < cloud.len());
//! ```

use std::time::Instant;

use rayon::prelude::*;
use tracing::debug;

use crate::cloud::PointCloud;
use crate::error::{PipelineError, PipelineResult};
use crate::spatial::SpatialIndex;

/// Parameters for statistical outlier removal.
#[derive(Debug, Clone)]
pub struct OutlierParams {
    /// Fraction of points to remove, in `[0, 1]`. Default: 0.05.
    pub removed_fraction: f64,

    /// Number of neighbors used for the distance statistic. Default: 24.
    pub k_neighbors: usize,
}

impl Default for OutlierParams {
    fn default() -> Self {
        Self {
            removed_fraction: 0.05,
            k_neighbors: 24,
        }
    }
}

impl OutlierParams {
    /// Creates new parameters with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the fraction of points to remove.
    #[must_use]
    pub const fn with_removed_fraction(mut self, fraction: f64) -> Self {
        self.removed_fraction = fraction;
        self
    }

    /// Sets the number of neighbors.
    #[must_use]
    pub const fn with_k_neighbors(mut self, k: usize) -> Self {
        self.k_neighbors = k;
        self
    }
}

/// Result of outlier removal with statistics.
#[derive(Debug, Clone)]
pub struct OutlierResult {
    /// The filtered cloud.
    pub cloud: PointCloud,

    /// Number of points in the original cloud.
    pub original_count: usize,

    /// Number of outliers removed.
    pub outliers_removed: usize,
}

impl std::fmt::Display for OutlierResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Outlier removal: {} -> {} points ({} removed)",
            self.original_count,
            self.cloud.len(),
            self.outliers_removed
        )
    }
}

/// Removes statistical outliers, returning the filtered cloud.
///
/// At most `floor(removed_fraction * len)` points are removed. `k_neighbors`
/// is clamped to `len - 1`; clouds with at most one point are returned
/// unchanged.
///
/// # Errors
///
/// [`PipelineError::InvalidParameter`] if `k_neighbors == 0` or
/// `removed_fraction` is not a finite value in `[0, 1]`.
pub fn remove_outliers(cloud: &PointCloud, params: &OutlierParams) -> PipelineResult<PointCloud> {
    Ok(remove_outliers_with_result(cloud, params)?.cloud)
}

/// Removes statistical outliers and returns detailed results.
///
/// # Errors
///
/// Same conditions as [`remove_outliers`].
pub fn remove_outliers_with_result(
    cloud: &PointCloud,
    params: &OutlierParams,
) -> PipelineResult<OutlierResult> {
    validate(params)?;

    let start = Instant::now();
    let original_count = cloud.len();

    if original_count <= 1 {
        return Ok(OutlierResult {
            cloud: cloud.clone(),
            original_count,
            outliers_removed: 0,
        });
    }

    let k = params.k_neighbors.min(original_count - 1);
    let positions = cloud.positions();
    let index = SpatialIndex::build(&positions);

    // Mean distance to the k nearest neighbors, per point.
    let mean_distances: Vec<f64> = positions
        .par_iter()
        .map(|p| {
            let neighbors = index.neighbors_of(p, k);
            #[allow(clippy::cast_precision_loss)]
            let mean =
                neighbors.iter().map(|n| n.distance).sum::<f64>() / neighbors.len().max(1) as f64;
            mean
        })
        .collect();

    // Rank largest-first; ties resolved by input index.
    let mut ranking: Vec<usize> = (0..original_count).collect();
    ranking.sort_unstable_by(|&a, &b| {
        mean_distances[b]
            .total_cmp(&mean_distances[a])
            .then_with(|| a.cmp(&b))
    });

    #[allow(clippy::cast_precision_loss, clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    let remove_count = (params.removed_fraction * original_count as f64).floor() as usize;

    let mut keep = vec![true; original_count];
    for &idx in ranking.iter().take(remove_count) {
        keep[idx] = false;
    }

    let points: Vec<_> = cloud
        .points
        .iter()
        .zip(&keep)
        .filter_map(|(p, &k)| k.then_some(*p))
        .collect();

    let outliers_removed = original_count - points.len();
    debug!(
        original_count,
        outliers_removed,
        "outlier removal completed in {:?}",
        start.elapsed()
    );

    Ok(OutlierResult {
        cloud: PointCloud { points },
        original_count,
        outliers_removed,
    })
}

fn validate(params: &OutlierParams) -> PipelineResult<()> {
    if params.k_neighbors == 0 {
        return Err(PipelineError::invalid("k_neighbors must be greater than 0"));
    }
    if !params.removed_fraction.is_finite()
        || params.removed_fraction < 0.0
        || params.removed_fraction > 1.0
    {
        return Err(PipelineError::invalid(
            "removed_fraction must be a finite value in [0, 1]",
        ));
    }
    Ok(())
}
