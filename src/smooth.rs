//! Jet smoothing: projecting points onto locally fitted polynomial surfaces.
//!
//! For every point, the smoother gathers its k nearest neighbors, builds a
//! local tangent frame by PCA, fits a degree-2 height polynomial (a "jet")
//! over the frame by least squares, and moves the point onto the fitted
//! surface. Repeating the pass relaxes scanner noise while preserving
//! curvature much better than plain Laplacian averaging.
//!
//! Iterations are sequential: each pass queries the positions produced by
//! the previous pass, so the neighbor index is rebuilt per pass.
//!
//! # Example
//!
//! ```
//! use cloud_pipeline::{jet_smooth, SmoothParams, PointCloud};
//! use nalgebra::Point3;
//!
//! // A wavy line of points
//! let positions: Vec<_> = (0..100)
//!     .map(|i| {
//!         let t = i as f64 * 0.1;
//!         Point3::new(t, (t * 8.0).sin() * 0.01, t * 0.001)
//!     })
//!     .collect();
//! let cloud = PointCloud::from_positions(&positions);
//!
//! let params = SmoothParams::new().with_k_neighbors(12);
//! let smoothed = jet_smooth(&cloud, &params).unwrap();
//! assert_eq!(smoothed.len(), cloud.len());
//! ```

use std::time::Instant;

use nalgebra::{Matrix3, Point3, SMatrix, SVector, SymmetricEigen, Vector3};
use rayon::prelude::*;
use tracing::debug;

use crate::cloud::PointCloud;
use crate::error::{PipelineError, PipelineResult};
use crate::spatial::SpatialIndex;

/// Coefficients of a fitted quadric require at least this many samples.
const MIN_JET_NEIGHBORS: usize = 6;

/// Parameters for jet smoothing.
#[derive(Debug, Clone)]
pub struct SmoothParams {
    /// Number of neighbors used for each local fit. Default: 24.
    pub k_neighbors: usize,

    /// Number of smoothing passes. Zero is the identity. Default: 1.
    pub iterations: usize,
}

impl Default for SmoothParams {
    fn default() -> Self {
        Self {
            k_neighbors: 24,
            iterations: 1,
        }
    }
}

impl SmoothParams {
    /// Creates new parameters with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of neighbors.
    #[must_use]
    pub const fn with_k_neighbors(mut self, k: usize) -> Self {
        self.k_neighbors = k;
        self
    }

    /// Sets the number of passes.
    #[must_use]
    pub const fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }
}

/// Smooths a point cloud by iterated jet projection.
///
/// The output has the same length and order as the input; no points are
/// added or removed. `k_neighbors` is clamped to `len - 1`; points with too
/// few usable neighbors for a quadric fall back to projection onto the
/// fitted plane, and points with fewer than 3 are left untouched.
///
/// # Errors
///
/// [`PipelineError::InvalidParameter`] if `k_neighbors == 0`.
pub fn jet_smooth(cloud: &PointCloud, params: &SmoothParams) -> PipelineResult<PointCloud> {
    if params.k_neighbors == 0 {
        return Err(PipelineError::invalid("k_neighbors must be greater than 0"));
    }

    if params.iterations == 0 || cloud.len() < 3 {
        return Ok(cloud.clone());
    }

    let start = Instant::now();
    let k = params.k_neighbors.min(cloud.len() - 1);
    let mut positions = cloud.positions();

    for _ in 0..params.iterations {
        let index = SpatialIndex::build(&positions);
        positions = (0..positions.len())
            .into_par_iter()
            .map(|i| project_onto_jet(&positions[i], &index, &positions, k))
            .collect();
    }

    debug!(
        points = cloud.len(),
        iterations = params.iterations,
        "jet smoothing completed in {:?}",
        start.elapsed()
    );

    let points = cloud
        .points
        .iter()
        .zip(positions)
        .map(|(p, position)| crate::cloud::CloudPoint {
            position,
            normal: p.normal,
        })
        .collect();

    Ok(PointCloud { points })
}

/// Projects one point onto the degree-2 surface fitted to its neighborhood.
fn project_onto_jet(
    point: &Point3<f64>,
    index: &SpatialIndex,
    positions: &[Point3<f64>],
    k: usize,
) -> Point3<f64> {
    // The query point is indexed too, so ask for k + 1 and keep everything:
    // including the point itself in the fit is intentional.
    let neighbors = index.nearest_n(point, k + 1);
    if neighbors.len() < 3 {
        return *point;
    }

    let samples: Vec<Vector3<f64>> = neighbors
        .iter()
        .map(|n| positions[n.index].coords)
        .collect();

    #[allow(clippy::cast_precision_loss)]
    let centroid: Vector3<f64> = samples.iter().sum::<Vector3<f64>>() / samples.len() as f64;

    let mut cov = Matrix3::zeros();
    for s in &samples {
        let d = s - centroid;
        cov += d * d.transpose();
    }

    let eigen = SymmetricEigen::new(cov);
    let (min_idx, max_idx) = extreme_eigen_indices(&eigen.eigenvalues);

    let normal = eigen.eigenvectors.column(min_idx).into_owned();
    let norm = normal.norm();
    if norm < 1e-12 {
        return *point;
    }
    let normal = normal / norm;

    let e1 = eigen.eigenvectors.column(max_idx).into_owned().normalize();
    let e2 = normal.cross(&e1);

    // Neighbor coordinates in the local frame.
    let local: Vec<(f64, f64, f64)> = samples
        .iter()
        .map(|s| {
            let d = s - centroid;
            (d.dot(&e1), d.dot(&e2), d.dot(&normal))
        })
        .collect();

    let d0 = point.coords - centroid;
    let (u0, v0) = (d0.dot(&e1), d0.dot(&e2));

    let height = if local.len() >= MIN_JET_NEIGHBORS {
        fit_quadric(&local).map_or(0.0, |c| eval_quadric(&c, u0, v0))
    } else {
        // Too few samples for a stable quadric: project onto the plane.
        0.0
    };

    // A near-singular fit (collinear neighborhoods) can produce wild
    // heights; the projection must stay inside the neighborhood.
    let reach = neighbors.last().map_or(0.0, |n| n.distance);
    let height = if height.is_finite() && height.abs() <= reach {
        height
    } else {
        0.0
    };

    Point3::from(centroid + u0 * e1 + v0 * e2 + height * normal)
}

/// Indices of the smallest and largest eigenvalue.
fn extreme_eigen_indices(eigenvalues: &Vector3<f64>) -> (usize, usize) {
    let mut min_idx = 0;
    let mut max_idx = 0;
    for i in 1..3 {
        if eigenvalues[i] < eigenvalues[min_idx] {
            min_idx = i;
        }
        if eigenvalues[i] > eigenvalues[max_idx] {
            max_idx = i;
        }
    }
    (min_idx, max_idx)
}

/// Least-squares fit of `h(u, v) = c0 u^2 + c1 uv + c2 v^2 + c3 u + c4 v + c5`
/// through `(u, v, w)` samples via the normal equations.
fn fit_quadric(samples: &[(f64, f64, f64)]) -> Option<SVector<f64, 6>> {
    let mut ata: SMatrix<f64, 6, 6> = SMatrix::zeros();
    let mut atb: SVector<f64, 6> = SVector::zeros();

    for &(u, v, w) in samples {
        let phi = SVector::<f64, 6>::from([u * u, u * v, v * v, u, v, 1.0]);
        ata += phi * phi.transpose();
        atb += phi * w;
    }

    ata.lu().solve(&atb)
}

fn eval_quadric(c: &SVector<f64, 6>, u: f64, v: f64) -> f64 {
    c[0] * u * u + c[1] * u * v + c[2] * v * v + c[3] * u + c[4] * v + c[5]
}
