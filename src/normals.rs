//! Normal estimation and consistent orientation.
//!
//! Estimation fits a plane to each point's neighborhood by PCA and takes the
//! direction of least variance as the normal. PCA fixes a line, not a
//! direction, so the estimated normals point to arbitrary sides of the
//! surface; [`orient_normals`] makes them globally consistent by propagating
//! orientation along a minimum spanning tree of the neighbor graph, flipping
//! each normal to agree with its tree parent.
//!
//! Both steps are deterministic: ties in tree construction are broken by
//! point index, so the same input always yields the same orientation.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Instant;

use nalgebra::{Matrix3, Point3, SymmetricEigen, Vector3};
use rayon::prelude::*;
use tracing::debug;

use crate::cloud::{OrientedCloud, OrientedPoint, PointCloud};
use crate::error::{PipelineError, PipelineResult};
use crate::spatial::SpatialIndex;

/// Estimates a unit normal per point by PCA over its `k` nearest neighbors.
///
/// The output has the same length and order as the input. The neighborhood
/// includes the point itself; `k` is clamped to `len - 1`. A point whose
/// neighborhood is too degenerate for a plane fit gets the zero-vector
/// sentinel and is skipped by later stages.
///
/// Estimated directions are unoriented (either side of the surface); run
/// [`orient_normals`] afterwards.
///
/// # Errors
///
/// - [`PipelineError::InvalidParameter`] if `k == 0`
/// - [`PipelineError::InsufficientPoints`] if the cloud has fewer than 3
///   points
///
/// # Example
///
/// ```
/// use cloud_pipeline::{estimate_normals, PointCloud};
/// use nalgebra::Point3;
///
/// // Points on the z = 0 plane
/// let positions: Vec<_> = (0..25)
///     .map(|i| Point3::new(f64::from(i % 5), f64::from(i / 5), 0.0))
///     .collect();
/// let cloud = PointCloud::from_positions(&positions);
///
/// let oriented = estimate_normals(&cloud, 8).unwrap();
/// assert!((oriented.points[12].normal.z.abs() - 1.0).abs() < 1e-9);
/// ```
pub fn estimate_normals(cloud: &PointCloud, k: usize) -> PipelineResult<OrientedCloud> {
    if k == 0 {
        return Err(PipelineError::invalid("k must be greater than 0"));
    }
    if cloud.len() < 3 {
        return Err(PipelineError::InsufficientPoints {
            required: 3,
            actual: cloud.len(),
        });
    }

    let start = Instant::now();
    let k = k.min(cloud.len() - 1);
    let positions = cloud.positions();
    let index = SpatialIndex::build(&positions);

    let points: Vec<OrientedPoint> = positions
        .par_iter()
        .map(|p| {
            let normal = pca_normal(p, &index, &positions, k);
            OrientedPoint::new(*p, normal)
        })
        .collect();

    let estimated = points.iter().filter(|p| p.has_normal()).count();
    debug!(
        points = points.len(),
        estimated,
        "normal estimation completed in {:?}",
        start.elapsed()
    );

    Ok(OrientedCloud::from_points(points))
}

/// Direction of least variance in the neighborhood, or zeros if degenerate.
fn pca_normal(
    point: &Point3<f64>,
    index: &SpatialIndex,
    positions: &[Point3<f64>],
    k: usize,
) -> Vector3<f64> {
    // Query point included in its own fit.
    let neighbors = index.nearest_n(point, k + 1);
    if neighbors.len() < 3 {
        return Vector3::zeros();
    }

    #[allow(clippy::cast_precision_loss)]
    let centroid: Vector3<f64> = neighbors
        .iter()
        .map(|n| positions[n.index].coords)
        .sum::<Vector3<f64>>()
        / neighbors.len() as f64;

    let mut cov = Matrix3::zeros();
    for n in &neighbors {
        let d = positions[n.index].coords - centroid;
        cov += d * d.transpose();
    }

    let eigen = SymmetricEigen::new(cov);
    let mut min_idx = 0;
    for i in 1..3 {
        if eigen.eigenvalues[i] < eigen.eigenvalues[min_idx] {
            min_idx = i;
        }
    }

    let normal = eigen.eigenvectors.column(min_idx).into_owned();
    let norm = normal.norm();
    if norm < 1e-12 {
        return Vector3::zeros();
    }
    normal / norm
}

/// Parameters for MST normal orientation.
#[derive(Debug, Clone)]
pub struct OrientParams {
    /// Number of neighbors in the propagation graph. Default: 24.
    pub k_neighbors: usize,

    /// Drop points whose normal could not be resolved. Default: true.
    pub trim_unoriented: bool,
}

impl Default for OrientParams {
    fn default() -> Self {
        Self {
            k_neighbors: 24,
            trim_unoriented: true,
        }
    }
}

impl OrientParams {
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

    /// Sets whether unresolved points are dropped.
    #[must_use]
    pub const fn with_trim_unoriented(mut self, trim: bool) -> Self {
        self.trim_unoriented = trim;
        self
    }
}

/// A candidate tree edge in the orientation propagation.
///
/// Ordered so that a max-heap pops the lowest weight first, with index
/// tie-breaks for determinism.
#[derive(Debug, Clone, Copy)]
struct PropagationEdge {
    weight: f64,
    child: usize,
    parent: usize,
}

impl PartialEq for PropagationEdge {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PropagationEdge {}

impl PartialOrd for PropagationEdge {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PropagationEdge {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .weight
            .total_cmp(&self.weight)
            .then_with(|| other.child.cmp(&self.child))
            .then_with(|| other.parent.cmp(&self.parent))
    }
}

/// Orients normals consistently by spanning-tree propagation.
///
/// Builds a neighbor graph over the points that carry a normal, weights each
/// edge by `1 - |n_i . n_j|` (parallel normals are cheap to cross), and grows
/// a minimum spanning forest with Prim's algorithm. Each component is rooted
/// at its highest point, the root normal is flipped upward, and every other
/// normal is flipped to agree with its tree parent.
///
/// Records are reordered: resolved points first (in their original relative
/// order), unresolved points after them. With `trim_unoriented` the
/// unresolved tail is dropped. Returns the number of resolved points.
///
/// # Errors
///
/// - [`PipelineError::InvalidParameter`] if `k_neighbors == 0`
/// - [`PipelineError::EmptyCloud`] for an empty cloud
pub fn orient_normals(cloud: &mut OrientedCloud, params: &OrientParams) -> PipelineResult<usize> {
    if params.k_neighbors == 0 {
        return Err(PipelineError::invalid("k_neighbors must be greater than 0"));
    }
    if cloud.is_empty() {
        return Err(PipelineError::EmptyCloud);
    }

    let start = Instant::now();
    let n = cloud.len();
    let k = params.k_neighbors.min(n - 1);
    let positions = cloud.positions();
    let index = SpatialIndex::build(&positions);

    let usable: Vec<bool> = cloud.points.iter().map(OrientedPoint::has_normal).collect();

    // Neighbor indices per point, restricted to usable endpoints.
    let adjacency: Vec<Vec<usize>> = (0..n)
        .into_par_iter()
        .map(|i| {
            if !usable[i] {
                return Vec::new();
            }
            index
                .neighbors_of(&positions[i], k)
                .into_iter()
                .map(|nb| nb.index)
                .filter(|&j| usable[j])
                .collect()
        })
        .collect();

    // Components are rooted highest-z first so every root normal can be
    // flipped upward before propagation.
    let mut root_order: Vec<usize> = (0..n).filter(|&i| usable[i]).collect();
    root_order.sort_unstable_by(|&a, &b| {
        positions[b]
            .z
            .total_cmp(&positions[a].z)
            .then_with(|| a.cmp(&b))
    });

    let mut visited = vec![false; n];
    let mut heap: BinaryHeap<PropagationEdge> = BinaryHeap::new();
    let mut resolved = 0;

    for &root in &root_order {
        if visited[root] {
            continue;
        }
        visited[root] = true;
        resolved += 1;
        if cloud.points[root].normal.z < 0.0 {
            cloud.points[root].normal = -cloud.points[root].normal;
        }

        heap.clear();
        push_edges(&mut heap, root, &adjacency, &cloud.points, &visited);

        while let Some(edge) = heap.pop() {
            if visited[edge.child] {
                continue;
            }
            visited[edge.child] = true;
            resolved += 1;

            let parent_normal = cloud.points[edge.parent].normal;
            if cloud.points[edge.child].normal.dot(&parent_normal) < 0.0 {
                cloud.points[edge.child].normal = -cloud.points[edge.child].normal;
            }

            push_edges(&mut heap, edge.child, &adjacency, &cloud.points, &visited);
        }
    }

    // Stable partition: resolved records first, unresolved after.
    let (mut front, back): (Vec<_>, Vec<_>) =
        cloud.points.iter().copied().partition(OrientedPoint::has_normal);
    if !params.trim_unoriented {
        front.extend(back);
    }
    cloud.points = front;

    debug!(
        points = n,
        resolved,
        trimmed = params.trim_unoriented,
        "normal orientation completed in {:?}",
        start.elapsed()
    );

    Ok(resolved)
}

fn push_edges(
    heap: &mut BinaryHeap<PropagationEdge>,
    from: usize,
    adjacency: &[Vec<usize>],
    points: &[OrientedPoint],
    visited: &[bool],
) {
    let from_normal = points[from].normal;
    for &to in &adjacency[from] {
        if !visited[to] {
            heap.push(PropagationEdge {
                weight: 1.0 - points[to].normal.dot(&from_normal).abs(),
                child: to,
                parent: from,
            });
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn make_planar_cloud(n: usize) -> PointCloud {
        let positions: Vec<_> = (0..n)
            .flat_map(|i| {
                (0..n).map(move |j| {
                    Point3::new(i as f64 * 0.1, j as f64 * 0.1, 0.0)
                })
            })
            .collect();
        PointCloud::from_positions(&positions)
    }

    fn make_sphere_cloud(n: usize, radius: f64) -> PointCloud {
        // Fibonacci sphere: even coverage, no duplicate poles.
        let golden = std::f64::consts::PI * (3.0 - 5.0_f64.sqrt());
        let positions: Vec<_> = (0..n)
            .map(|i| {
                let y = 1.0 - 2.0 * (i as f64 + 0.5) / n as f64;
                let r = (1.0 - y * y).sqrt();
                let theta = golden * i as f64;
                Point3::new(
                    radius * r * theta.cos(),
                    radius * y,
                    radius * r * theta.sin(),
                )
            })
            .collect();
        PointCloud::from_positions(&positions)
    }

    #[test]
    fn test_planar_normals_are_vertical() {
        let cloud = make_planar_cloud(10);
        let oriented = estimate_normals(&cloud, 8).unwrap();
        assert_eq!(oriented.len(), cloud.len());
        for p in &oriented.points {
            assert_relative_eq!(p.normal.z.abs(), 1.0, epsilon = 1e-9);
            assert_relative_eq!(p.normal.norm(), 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_estimate_too_few_points() {
        let cloud = PointCloud::from_positions(&[
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
        ]);
        assert!(matches!(
            estimate_normals(&cloud, 6),
            Err(PipelineError::InsufficientPoints {
                required: 3,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_estimate_zero_k() {
        let cloud = make_planar_cloud(4);
        assert!(matches!(
            estimate_normals(&cloud, 0),
            Err(PipelineError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_orient_planar_all_upward() {
        let cloud = make_planar_cloud(10);
        let mut oriented = estimate_normals(&cloud, 8).unwrap();
        let resolved = orient_normals(&mut oriented, &OrientParams::default()).unwrap();

        assert_eq!(resolved, cloud.len());
        assert_eq!(oriented.len(), cloud.len());
        for p in &oriented.points {
            assert!(p.normal.z > 0.9, "normal not upward: {:?}", p.normal);
        }
    }

    #[test]
    fn test_orient_sphere_mostly_outward() {
        let cloud = make_sphere_cloud(500, 1.0);
        let mut oriented = estimate_normals(&cloud, 12).unwrap();
        orient_normals(&mut oriented, &OrientParams::new().with_k_neighbors(12)).unwrap();

        let outward = oriented
            .points
            .iter()
            .filter(|p| p.normal.dot(&p.position.coords) > 0.0)
            .count();
        // All normals must agree on a side; the root points up, which is
        // outward on a sphere.
        assert!(
            outward * 10 >= oriented.len() * 9,
            "only {outward}/{} outward",
            oriented.len()
        );
    }

    #[test]
    fn test_orient_trims_unresolved() {
        let mut cloud = OrientedCloud::from_points(vec![
            OrientedPoint::new(Point3::new(0.0, 0.0, 0.0), Vector3::z()),
            OrientedPoint::new(Point3::new(1.0, 0.0, 0.0), Vector3::zeros()),
            OrientedPoint::new(Point3::new(2.0, 0.0, 0.1), Vector3::z()),
        ]);
        let resolved = orient_normals(&mut cloud, &OrientParams::default()).unwrap();
        assert_eq!(resolved, 2);
        assert_eq!(cloud.len(), 2);
        assert!(cloud.points.iter().all(OrientedPoint::has_normal));
    }

    #[test]
    fn test_orient_keeps_unresolved_at_tail() {
        let mut cloud = OrientedCloud::from_points(vec![
            OrientedPoint::new(Point3::new(1.0, 0.0, 0.0), Vector3::zeros()),
            OrientedPoint::new(Point3::new(0.0, 0.0, 0.0), Vector3::z()),
            OrientedPoint::new(Point3::new(2.0, 0.0, 0.1), Vector3::z()),
        ]);
        let params = OrientParams::new().with_trim_unoriented(false);
        let resolved = orient_normals(&mut cloud, &params).unwrap();
        assert_eq!(resolved, 2);
        assert_eq!(cloud.len(), 3);
        assert!(!cloud.points[2].has_normal());
    }

    #[test]
    fn test_orient_deterministic() {
        let cloud = make_sphere_cloud(200, 1.0);
        let oriented = estimate_normals(&cloud, 10).unwrap();

        let mut a = oriented.clone();
        let mut b = oriented.clone();
        orient_normals(&mut a, &OrientParams::default()).unwrap();
        orient_normals(&mut b, &OrientParams::default()).unwrap();

        assert_eq!(a.len(), b.len());
        for (p, q) in a.points.iter().zip(&b.points) {
            assert_eq!(p.normal, q.normal);
            assert_eq!(p.position, q.position);
        }
    }

    #[test]
    fn test_orient_empty() {
        let mut cloud = OrientedCloud::new();
        assert!(matches!(
            orient_normals(&mut cloud, &OrientParams::default()),
            Err(PipelineError::EmptyCloud)
        ));
    }

    #[test]
    fn test_orient_zero_k() {
        let mut cloud = OrientedCloud::from_points(vec![OrientedPoint::new(
            Point3::origin(),
            Vector3::z(),
        )]);
        let params = OrientParams::new().with_k_neighbors(0);
        assert!(matches!(
            orient_normals(&mut cloud, &params),
            Err(PipelineError::InvalidParameter { .. })
        ));
    }
}
