//! Point cloud and mesh data structures.
//!
//! The pipeline works with three owned collections:
//!
//! - [`PointCloud`] - positions with optional per-point normals, the input
//!   to (and output of) the cleanup and smoothing stages
//! - [`OrientedCloud`] - positions paired with normals in a single record
//!   per point, produced by normal estimation and consumed by reconstruction
//! - [`TriangleMesh`] - the indexed triangle mesh produced by surface
//!   reconstruction
//!
//! Storage is always dense: every stage that removes points physically
//! erases them, so list length equals live point count at all times. Later
//! stages rely on this.

use nalgebra::{Point3, Vector3};

/// A point in the cloud with an optional normal.
#[derive(Debug, Clone, Copy)]
pub struct CloudPoint {
    /// 3D position.
    pub position: Point3<f64>,

    /// Unit normal vector, if known (from the scanner or a previous run).
    pub normal: Option<Vector3<f64>>,
}

impl CloudPoint {
    /// Creates a point with only a position.
    #[inline]
    #[must_use]
    pub const fn new(position: Point3<f64>) -> Self {
        Self {
            position,
            normal: None,
        }
    }

    /// Creates a point from raw coordinates.
    #[inline]
    #[must_use]
    pub fn from_coords(x: f64, y: f64, z: f64) -> Self {
        Self::new(Point3::new(x, y, z))
    }

    /// Creates a point with position and normal.
    #[inline]
    #[must_use]
    pub const fn with_normal(position: Point3<f64>, normal: Vector3<f64>) -> Self {
        Self {
            position,
            normal: Some(normal),
        }
    }
}

/// An ordered collection of 3D points.
///
/// Duplicate positions are permitted. The collection is mutated by
/// replacement: each pipeline stage consumes a cloud and returns a new one
/// with excess capacity already trimmed.
///
/// # Example
///
/// ```
/// use cloud_pipeline::PointCloud;
/// use nalgebra::Point3;
///
/// let cloud = PointCloud::from_positions(&[
///     Point3::new(0.0, 0.0, 0.0),
///     Point3::new(1.0, 0.0, 0.0),
///     Point3::new(0.5, 1.0, 0.0),
/// ]);
/// assert_eq!(cloud.len(), 3);
/// ```
#[derive(Debug, Clone, Default)]
pub struct PointCloud {
    /// The points in the cloud.
    pub points: Vec<CloudPoint>,
}

impl PointCloud {
    /// Creates a new empty point cloud.
    #[must_use]
    pub const fn new() -> Self {
        Self { points: Vec::new() }
    }

    /// Creates a point cloud with pre-allocated capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            points: Vec::with_capacity(capacity),
        }
    }

    /// Creates a point cloud from a list of positions.
    #[must_use]
    pub fn from_positions(positions: &[Point3<f64>]) -> Self {
        Self {
            points: positions.iter().map(|&p| CloudPoint::new(p)).collect(),
        }
    }

    /// Number of points in the cloud.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Returns true if the cloud has no points.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Returns true if every point carries a normal.
    #[must_use]
    pub fn has_normals(&self) -> bool {
        !self.points.is_empty() && self.points.iter().all(|p| p.normal.is_some())
    }

    /// Appends a point to the cloud.
    #[inline]
    pub fn push(&mut self, point: CloudPoint) {
        self.points.push(point);
    }

    /// Appends a point from raw coordinates.
    #[inline]
    pub fn push_coords(&mut self, x: f64, y: f64, z: f64) {
        self.points.push(CloudPoint::from_coords(x, y, z));
    }

    /// Returns the positions of all points as a new vector.
    #[must_use]
    pub fn positions(&self) -> Vec<Point3<f64>> {
        self.points.iter().map(|p| p.position).collect()
    }

    /// Axis-aligned bounding box, or `None` for an empty cloud.
    #[must_use]
    pub fn bounds(&self) -> Option<(Point3<f64>, Point3<f64>)> {
        let first = self.points.first()?.position;
        let mut min = first;
        let mut max = first;
        for p in &self.points {
            let pos = p.position;
            min = Point3::new(min.x.min(pos.x), min.y.min(pos.y), min.z.min(pos.z));
            max = Point3::new(max.x.max(pos.x), max.y.max(pos.y), max.z.max(pos.z));
        }
        Some((min, max))
    }

    /// Centroid of all points, or `None` for an empty cloud.
    #[must_use]
    pub fn centroid(&self) -> Option<Point3<f64>> {
        if self.points.is_empty() {
            return None;
        }
        let sum: Vector3<f64> = self.points.iter().map(|p| p.position.coords).sum();
        #[allow(clippy::cast_precision_loss)]
        Some(Point3::from(sum / self.points.len() as f64))
    }

    /// Translates all points by an offset.
    pub fn translate(&mut self, offset: Vector3<f64>) {
        for p in &mut self.points {
            p.position += offset;
        }
    }

    /// Scales all points uniformly about the origin.
    pub fn scale(&mut self, factor: f64) {
        for p in &mut self.points {
            p.position = Point3::from(p.position.coords * factor);
        }
    }
}

/// A point paired with its normal in a single owned record.
///
/// Pairing by record rather than by parallel lists means trimming or
/// reordering can never desynchronize a point from its normal.
/// `Vector3::zeros()` is the sentinel for "unestimated/unoriented".
#[derive(Debug, Clone, Copy)]
pub struct OrientedPoint {
    /// 3D position.
    pub position: Point3<f64>,

    /// Unit normal, or the zero vector if estimation left it unresolved.
    pub normal: Vector3<f64>,
}

impl OrientedPoint {
    /// Creates an oriented point.
    #[inline]
    #[must_use]
    pub const fn new(position: Point3<f64>, normal: Vector3<f64>) -> Self {
        Self { position, normal }
    }

    /// Returns true if the normal carries a usable direction.
    #[inline]
    #[must_use]
    pub fn has_normal(&self) -> bool {
        self.normal != Vector3::zeros()
    }
}

/// An ordered collection of point-normal records.
///
/// Produced by [`estimate_normals`](crate::estimate_normals) with the same
/// length and order as the input cloud; reordered and optionally shortened
/// by [`orient_normals`](crate::orient_normals).
#[derive(Debug, Clone, Default)]
pub struct OrientedCloud {
    /// The point-normal records.
    pub points: Vec<OrientedPoint>,
}

impl OrientedCloud {
    /// Creates a new empty oriented cloud.
    #[must_use]
    pub const fn new() -> Self {
        Self { points: Vec::new() }
    }

    /// Creates an oriented cloud from records.
    #[must_use]
    pub const fn from_points(points: Vec<OrientedPoint>) -> Self {
        Self { points }
    }

    /// Number of records.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Returns true if there are no records.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Returns the positions of all records as a new vector.
    #[must_use]
    pub fn positions(&self) -> Vec<Point3<f64>> {
        self.points.iter().map(|p| p.position).collect()
    }

    /// Centroid of all records, or `None` when empty.
    #[must_use]
    pub fn centroid(&self) -> Option<Point3<f64>> {
        if self.points.is_empty() {
            return None;
        }
        let sum: Vector3<f64> = self.points.iter().map(|p| p.position.coords).sum();
        #[allow(clippy::cast_precision_loss)]
        Some(Point3::from(sum / self.points.len() as f64))
    }
}

/// An indexed triangle mesh.
///
/// Faces use **counter-clockwise winding viewed from outside**, so normals
/// point outward by the right-hand rule, matching the orientation of the
/// point normals the mesh was reconstructed from. The mesh owns its storage
/// independently of the input cloud.
#[derive(Debug, Clone, Default)]
pub struct TriangleMesh {
    /// Vertex positions.
    pub vertices: Vec<Point3<f64>>,

    /// Triangle faces as indices into the vertex array.
    pub faces: Vec<[u32; 3]>,
}

impl TriangleMesh {
    /// Creates a new empty mesh.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            vertices: Vec::new(),
            faces: Vec::new(),
        }
    }

    /// Number of vertices.
    #[inline]
    #[must_use]
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Number of triangle faces.
    #[inline]
    #[must_use]
    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    /// Returns true if the mesh has no vertices.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_cloud_from_positions() {
        let cloud = PointCloud::from_positions(&[
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(2.0, 0.0, 0.0),
        ]);
        assert_eq!(cloud.len(), 2);
        assert!(!cloud.has_normals());
    }

    #[test]
    fn test_cloud_bounds() {
        let cloud = PointCloud::from_positions(&[
            Point3::new(-1.0, 2.0, 0.5),
            Point3::new(3.0, -2.0, 1.5),
        ]);
        let (min, max) = cloud.bounds().unwrap();
        assert_relative_eq!(min.x, -1.0);
        assert_relative_eq!(min.y, -2.0);
        assert_relative_eq!(max.x, 3.0);
        assert_relative_eq!(max.z, 1.5);
    }

    #[test]
    fn test_cloud_bounds_empty() {
        assert!(PointCloud::new().bounds().is_none());
    }

    #[test]
    fn test_cloud_centroid() {
        let cloud = PointCloud::from_positions(&[
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(2.0, 4.0, 6.0),
        ]);
        let c = cloud.centroid().unwrap();
        assert_relative_eq!(c.x, 1.0);
        assert_relative_eq!(c.y, 2.0);
        assert_relative_eq!(c.z, 3.0);
    }

    #[test]
    fn test_cloud_scale_translate() {
        let mut cloud = PointCloud::from_positions(&[Point3::new(1.0, 1.0, 1.0)]);
        cloud.scale(2.0);
        cloud.translate(Vector3::new(0.0, 0.0, -2.0));
        assert_relative_eq!(cloud.points[0].position.x, 2.0);
        assert_relative_eq!(cloud.points[0].position.z, 0.0);
    }

    #[test]
    fn test_oriented_point_sentinel() {
        let p = OrientedPoint::new(Point3::origin(), Vector3::zeros());
        assert!(!p.has_normal());
        let q = OrientedPoint::new(Point3::origin(), Vector3::z());
        assert!(q.has_normal());
    }

    #[test]
    fn test_mesh_counts() {
        let mut mesh = TriangleMesh::new();
        assert!(mesh.is_empty());
        mesh.vertices.push(Point3::origin());
        mesh.vertices.push(Point3::new(1.0, 0.0, 0.0));
        mesh.vertices.push(Point3::new(0.0, 1.0, 0.0));
        mesh.faces.push([0, 1, 2]);
        assert_eq!(mesh.vertex_count(), 3);
        assert_eq!(mesh.face_count(), 1);
    }
}
