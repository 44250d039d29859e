//! Grid-based point cloud simplification.
//!
//! Space is partitioned into a uniform grid of cubes with edge `cell_size`;
//! each occupied cell keeps the **first point encountered** in input order
//! and discards the rest. First-seen is the representative rule (rather than
//! the cell centroid) so the output consists of actual samples and is stable
//! with respect to input order.
//!
//! The output size is bounded by the number of occupied cells, so it shrinks
//! (or stays equal) as `cell_size` grows.
//!
//! # Example
//!
//! ```
//! use cloud_pipeline::{grid_simplify, PointCloud};
//! use nalgebra::Point3;
//!
//! // 100 points bunched along a short segment
//! let positions: Vec<_> = (0..100)
//!     .map(|i| Point3::new(i as f64 * 0.01, 0.0, 0.0))
//!     .collect();
//! let cloud = PointCloud::from_positions(&positions);
//!
//! let simplified = grid_simplify(&cloud, 0.5).unwrap();
//! assert!(simplified.len() <= 3);
//! ```

use std::time::Instant;

use hashbrown::HashSet;
use nalgebra::Point3;
use tracing::debug;

use crate::cloud::PointCloud;
use crate::error::{PipelineError, PipelineResult};

/// Result of grid simplification with statistics.
#[derive(Debug, Clone)]
pub struct SimplifyResult {
    /// The simplified cloud.
    pub cloud: PointCloud,

    /// Number of points in the original cloud.
    pub original_count: usize,

    /// Number of occupied grid cells (equals the output size).
    pub occupied_cells: usize,
}

impl std::fmt::Display for SimplifyResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Grid simplification: {} -> {} points ({} cells)",
            self.original_count,
            self.cloud.len(),
            self.occupied_cells
        )
    }
}

/// Reduces point density to at most one point per grid cell.
///
/// # Errors
///
/// [`PipelineError::InvalidParameter`] if `cell_size` is not a finite
/// positive value.
pub fn grid_simplify(cloud: &PointCloud, cell_size: f64) -> PipelineResult<PointCloud> {
    Ok(grid_simplify_with_result(cloud, cell_size)?.cloud)
}

/// Reduces point density and returns detailed results.
///
/// # Errors
///
/// Same conditions as [`grid_simplify`].
pub fn grid_simplify_with_result(
    cloud: &PointCloud,
    cell_size: f64,
) -> PipelineResult<SimplifyResult> {
    if !cell_size.is_finite() || cell_size <= 0.0 {
        return Err(PipelineError::invalid(
            "cell_size must be a finite positive value",
        ));
    }

    let start = Instant::now();
    let original_count = cloud.len();

    let mut occupied: HashSet<(i64, i64, i64)> = HashSet::with_capacity(original_count);
    let mut points = Vec::new();

    for point in &cloud.points {
        if occupied.insert(cell_key(&point.position, cell_size)) {
            points.push(*point);
        }
    }
    points.shrink_to_fit();

    let occupied_cells = occupied.len();
    debug!(
        original_count,
        occupied_cells,
        cell_size,
        "grid simplification completed in {:?}",
        start.elapsed()
    );

    Ok(SimplifyResult {
        cloud: PointCloud { points },
        original_count,
        occupied_cells,
    })
}

/// Maps a world position to its integer grid cell.
#[allow(clippy::cast_possible_truncation)]
fn cell_key(p: &Point3<f64>, cell_size: f64) -> (i64, i64, i64) {
    (
        (p.x / cell_size).floor() as i64,
        (p.y / cell_size).floor() as i64,
        (p.z / cell_size).floor() as i64,
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn make_dense_cloud(n: usize) -> PointCloud {
        let positions: Vec<_> = (0..n)
            .map(|i| {
                let t = i as f64;
                Point3::new(t * 0.01, (t * 0.7).sin() * 0.02, (t * 1.3).cos() * 0.02)
            })
            .collect();
        PointCloud::from_positions(&positions)
    }

    #[test]
    fn test_output_bounded_by_occupied_cells() {
        let cloud = make_dense_cloud(500);
        let result = grid_simplify_with_result(&cloud, 0.1).unwrap();
        assert_eq!(result.cloud.len(), result.occupied_cells);
        assert!(result.cloud.len() <= cloud.len());
    }

    #[test]
    fn test_monotone_in_cell_size() {
        let cloud = make_dense_cloud(500);
        let fine = grid_simplify(&cloud, 0.05).unwrap();
        let coarse = grid_simplify(&cloud, 0.5).unwrap();
        assert!(coarse.len() <= fine.len());
    }

    #[test]
    fn test_first_seen_representative() {
        let cloud = PointCloud::from_positions(&[
            Point3::new(0.1, 0.1, 0.1),
            Point3::new(0.2, 0.2, 0.2), // same cell as the first at cell_size 1.0
            Point3::new(5.0, 5.0, 5.0),
        ]);
        let simplified = grid_simplify(&cloud, 1.0).unwrap();
        assert_eq!(simplified.len(), 2);
        assert_eq!(simplified.points[0].position, Point3::new(0.1, 0.1, 0.1));
        assert_eq!(simplified.points[1].position, Point3::new(5.0, 5.0, 5.0));
    }

    #[test]
    fn test_negative_coordinates() {
        // Cells must not alias across the origin.
        let cloud = PointCloud::from_positions(&[
            Point3::new(-0.4, 0.0, 0.0),
            Point3::new(0.4, 0.0, 0.0),
        ]);
        let simplified = grid_simplify(&cloud, 1.0).unwrap();
        assert_eq!(simplified.len(), 2);
    }

    #[test]
    fn test_zero_cell_size_rejected() {
        let cloud = make_dense_cloud(10);
        let result = grid_simplify(&cloud, 0.0);
        assert!(matches!(result, Err(PipelineError::InvalidParameter { .. })));
    }

    #[test]
    fn test_negative_cell_size_rejected() {
        let cloud = make_dense_cloud(10);
        let result = grid_simplify(&cloud, -1.0);
        assert!(matches!(result, Err(PipelineError::InvalidParameter { .. })));
    }

    #[test]
    fn test_nan_cell_size_rejected() {
        let cloud = make_dense_cloud(10);
        let result = grid_simplify(&cloud, f64::NAN);
        assert!(matches!(result, Err(PipelineError::InvalidParameter { .. })));
    }

    #[test]
    fn test_empty_cloud_ok() {
        let simplified = grid_simplify(&PointCloud::new(), 1.0).unwrap();
        assert!(simplified.is_empty());
    }
}
