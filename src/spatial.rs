//! Nearest-neighbor index and the average spacing utility.
//!
//! Every pipeline stage queries point neighborhoods through [`SpatialIndex`],
//! a thin wrapper over a KD-tree. The index is immutable once built; stages
//! that move or remove points build a fresh index over their own output.

use kiddo::float::kdtree::KdTree;
use kiddo::SquaredEuclidean;
use nalgebra::Point3;
use rayon::prelude::*;

use crate::cloud::PointCloud;
use crate::error::{PipelineError, PipelineResult};

/// A neighbor returned by a spatial query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Index of the neighbor in the slice the index was built from.
    pub index: usize,

    /// Euclidean distance from the query point.
    pub distance: f64,
}

/// KD-tree over a fixed set of 3D points.
///
/// # Example
///
/// ```
/// use cloud_pipeline::SpatialIndex;
/// use nalgebra::Point3;
///
/// let positions = vec![
///     Point3::new(0.0, 0.0, 0.0),
///     Point3::new(1.0, 0.0, 0.0),
///     Point3::new(10.0, 0.0, 0.0),
/// ];
/// let index = SpatialIndex::build(&positions);
/// let nearest = index.nearest_n(&Point3::new(0.1, 0.0, 0.0), 1);
/// assert_eq!(nearest[0].index, 0);
/// ```
// Bucket size must exceed the number of points sharing a coordinate on a
// split axis (kiddo panics otherwise), which axis-aligned planar clouds hit
// with the default of 32.
type Tree = KdTree<f64, u64, 3, 256, u32>;

pub struct SpatialIndex {
    tree: Tree,
}

impl SpatialIndex {
    /// Builds an index over a slice of positions.
    ///
    /// The returned neighbors refer to positions by their index in `positions`.
    #[must_use]
    pub fn build(positions: &[Point3<f64>]) -> Self {
        let mut tree = Tree::new();
        for (i, p) in positions.iter().enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            let idx = i as u64;
            tree.add(&[p.x, p.y, p.z], idx);
        }
        Self { tree }
    }

    /// Returns the `n` points nearest to `query`, closest first.
    ///
    /// If `query` is one of the indexed points, it appears in its own result
    /// at distance zero.
    #[must_use]
    pub fn nearest_n(&self, query: &Point3<f64>, n: usize) -> Vec<Neighbor> {
        self.tree
            .nearest_n::<SquaredEuclidean>(&[query.x, query.y, query.z], n)
            .into_iter()
            .map(|nn| Neighbor {
                index: nn.item as usize,
                distance: nn.distance.sqrt(),
            })
            .collect()
    }

    /// Returns up to `k` nearest neighbors of an indexed point, excluding the
    /// point itself.
    ///
    /// With duplicate positions, one zero-distance entry (the point's own) is
    /// skipped; remaining duplicates count as ordinary neighbors.
    #[must_use]
    pub fn neighbors_of(&self, query: &Point3<f64>, k: usize) -> Vec<Neighbor> {
        let mut neighbors = self.nearest_n(query, k + 1);
        if !neighbors.is_empty() {
            neighbors.remove(0);
        }
        neighbors
    }
}

/// Mean distance from each point to its `k` nearest neighbors, averaged over
/// all points.
///
/// This is the sampling-density statistic the reconstruction stage scales its
/// meshing criteria by; it is also useful for picking a grid cell size for
/// [`grid_simplify`](crate::grid_simplify). Pure: the cloud is not mutated.
///
/// `k` is clamped to `len - 1` for small clouds. Scale-equivariant: scaling
/// the cloud by `s` scales the result by `s`.
///
/// # Errors
///
/// - [`PipelineError::InvalidParameter`] if `k == 0`
/// - [`PipelineError::EmptyCloud`] for an empty cloud
/// - [`PipelineError::InsufficientPoints`] for a single-point cloud
///
/// # Example
///
/// ```
/// use cloud_pipeline::{average_spacing, PointCloud};
/// use nalgebra::Point3;
///
/// let positions: Vec<_> = (0..10)
///     .map(|i| Point3::new(f64::from(i), f64::from(i) * 0.001, 0.0))
///     .collect();
/// let cloud = PointCloud::from_positions(&positions);
/// let spacing = average_spacing(&cloud, 1).unwrap();
/// assert!((spacing - 1.0).abs() < 0.01);
/// ```
pub fn average_spacing(cloud: &PointCloud, k: usize) -> PipelineResult<f64> {
    if k == 0 {
        return Err(PipelineError::invalid("k must be greater than 0"));
    }
    if cloud.is_empty() {
        return Err(PipelineError::EmptyCloud);
    }
    if cloud.len() < 2 {
        return Err(PipelineError::InsufficientPoints {
            required: 2,
            actual: cloud.len(),
        });
    }

    let k = k.min(cloud.len() - 1);
    let positions = cloud.positions();
    let index = SpatialIndex::build(&positions);

    // Per-point means are collected in input order and reduced sequentially;
    // a parallel float sum would vary with the work-stealing split.
    let means: Vec<f64> = positions
        .par_iter()
        .map(|p| {
            let neighbors = index.neighbors_of(p, k);
            #[allow(clippy::cast_precision_loss)]
            let mean =
                neighbors.iter().map(|n| n.distance).sum::<f64>() / neighbors.len().max(1) as f64;
            mean
        })
        .collect();
    let total: f64 = means.iter().sum();

    #[allow(clippy::cast_precision_loss)]
    Ok(total / positions.len() as f64)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn make_line_cloud(n: usize) -> PointCloud {
        // Small off-axis variation keeps KD-tree splits well conditioned.
        let positions: Vec<_> = (0..n)
            .map(|i| {
                let t = i as f64;
                Point3::new(t, t * 0.001, t * 0.002)
            })
            .collect();
        PointCloud::from_positions(&positions)
    }

    #[test]
    fn test_nearest_n_orders_by_distance() {
        let positions = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(5.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
        ];
        let index = SpatialIndex::build(&positions);
        let nearest = index.nearest_n(&Point3::new(0.2, 0.0, 0.0), 3);
        assert_eq!(nearest[0].index, 0);
        assert_eq!(nearest[1].index, 2);
        assert_eq!(nearest[2].index, 1);
    }

    #[test]
    fn test_neighbors_of_excludes_self() {
        let cloud = make_line_cloud(10);
        let positions = cloud.positions();
        let index = SpatialIndex::build(&positions);
        let neighbors = index.neighbors_of(&positions[3], 2);
        assert_eq!(neighbors.len(), 2);
        for n in &neighbors {
            assert_ne!(n.index, 3);
            assert!(n.distance > 0.0);
        }
    }

    #[test]
    fn test_average_spacing_line() {
        let cloud = make_line_cloud(50);
        let spacing = average_spacing(&cloud, 2).unwrap();
        // Neighbors on a unit-step line are ~1 and ~2 away on average.
        assert!(spacing > 1.0 && spacing < 2.0, "spacing = {spacing}");
    }

    #[test]
    fn test_average_spacing_scale_equivariant() {
        let cloud = make_line_cloud(40);
        let mut scaled = cloud.clone();
        scaled.scale(3.5);

        let base = average_spacing(&cloud, 4).unwrap();
        let after = average_spacing(&scaled, 4).unwrap();
        assert_relative_eq!(after, 3.5 * base, max_relative = 1e-9);
    }

    #[test]
    fn test_average_spacing_clamps_k() {
        let cloud = make_line_cloud(3);
        // k is clamped to len - 1 = 2.
        let spacing = average_spacing(&cloud, 100).unwrap();
        assert!(spacing > 0.0);
    }

    #[test]
    fn test_average_spacing_thread_count_invariant() {
        // Bit-identical result no matter how rayon splits the work.
        let cloud = make_line_cloud(2000);

        let single = rayon::ThreadPoolBuilder::new()
            .num_threads(1)
            .build()
            .unwrap();
        let many = rayon::ThreadPoolBuilder::new()
            .num_threads(8)
            .build()
            .unwrap();

        let a = single.install(|| average_spacing(&cloud, 4).unwrap());
        for _ in 0..20 {
            let b = many.install(|| average_spacing(&cloud, 4).unwrap());
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn test_average_spacing_empty() {
        let result = average_spacing(&PointCloud::new(), 6);
        assert!(matches!(result, Err(PipelineError::EmptyCloud)));
    }

    #[test]
    fn test_average_spacing_single_point() {
        let cloud = PointCloud::from_positions(&[Point3::origin()]);
        let result = average_spacing(&cloud, 6);
        assert!(matches!(
            result,
            Err(PipelineError::InsufficientPoints { .. })
        ));
    }

    #[test]
    fn test_average_spacing_zero_k() {
        let cloud = make_line_cloud(5);
        let result = average_spacing(&cloud, 0);
        assert!(matches!(result, Err(PipelineError::InvalidParameter { .. })));
    }
}
