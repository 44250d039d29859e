//! Implicit surface reconstruction from oriented points.
//!
//! The oriented samples define a signed indicator field: negative inside
//! the surface, positive outside. Reconstruction samples the
//! field on a uniform grid sized from the cloud's average spacing, contours
//! the zero level set with surface nets, then refines every vertex along the
//! field gradient until it sits on the zero set within the dichotomy
//! tolerance. Face winding is fixed against the field gradient so triangle
//! normals point outward.
//!
//! Sizing follows the sampling density: with average spacing `s`, the
//! surface approximation error is `approximation_factor * s` and the grid
//! cell is twice that, so the contour resolves features on the order of the
//! sampling itself.

mod field;

use std::time::Instant;

use fast_surface_nets::{ndshape::RuntimeShape, surface_nets, SurfaceNetsBuffer};
use nalgebra::{Point3, Vector3};
use rayon::prelude::*;
use tracing::debug;

use crate::cloud::{OrientedCloud, TriangleMesh};
use crate::error::{PipelineError, PipelineResult};
use crate::spatial::average_spacing;
use field::IndicatorField;

/// Grid cells of padding around the sample bounding box.
const GRID_PADDING: usize = 3;

/// Maximum vertex refinement steps along the field gradient.
const MAX_REFINE_STEPS: usize = 8;

/// Parameters for surface reconstruction.
///
/// The `*_factor` parameters are multiples of the cloud's average spacing,
/// so defaults behave the same at any scale.
#[derive(Debug, Clone)]
pub struct ReconstructParams {
    /// Neighbors for the average spacing estimate. Default: 6.
    pub spacing_k: usize,

    /// Minimum triangle angle in degrees; triangles below it are counted as
    /// slivers in the result statistics. Default: 20.0.
    pub min_angle_deg: f64,

    /// Upper bound on the grid cell, in multiples of spacing. Default: 30.0.
    pub facet_size_factor: f64,

    /// Surface approximation error, in multiples of spacing. Default: 0.375.
    pub approximation_factor: f64,

    /// Vertex refinement tolerance, in multiples of the approximation error.
    /// Default: 1e-3.
    pub dichotomy_factor: f64,

    /// Oriented samples blended per field query. Default: 8.
    pub field_neighbors: usize,

    /// Region of interest radius, in multiples of the bounding sphere radius;
    /// queries beyond it are unconditionally outside. Default: 5.0.
    pub domain_radius_scale: f64,

    /// Maximum grid nodes per axis. Default: 128.
    pub max_grid_resolution: usize,
}

impl Default for ReconstructParams {
    fn default() -> Self {
        Self {
            spacing_k: 6,
            min_angle_deg: 20.0,
            facet_size_factor: 30.0,
            approximation_factor: 0.375,
            dichotomy_factor: 1e-3,
            field_neighbors: 8,
            domain_radius_scale: 5.0,
            max_grid_resolution: 128,
        }
    }
}

impl ReconstructParams {
    /// Creates new parameters with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the spacing estimation neighbor count.
    #[must_use]
    pub const fn with_spacing_k(mut self, k: usize) -> Self {
        self.spacing_k = k;
        self
    }

    /// Sets the minimum triangle angle in degrees.
    #[must_use]
    pub const fn with_min_angle_deg(mut self, angle: f64) -> Self {
        self.min_angle_deg = angle;
        self
    }

    /// Sets the facet size bound in multiples of spacing.
    #[must_use]
    pub const fn with_facet_size_factor(mut self, factor: f64) -> Self {
        self.facet_size_factor = factor;
        self
    }

    /// Sets the approximation error in multiples of spacing.
    #[must_use]
    pub const fn with_approximation_factor(mut self, factor: f64) -> Self {
        self.approximation_factor = factor;
        self
    }

    /// Sets the refinement tolerance in multiples of the approximation error.
    #[must_use]
    pub const fn with_dichotomy_factor(mut self, factor: f64) -> Self {
        self.dichotomy_factor = factor;
        self
    }

    /// Sets the number of samples blended per field query.
    #[must_use]
    pub const fn with_field_neighbors(mut self, n: usize) -> Self {
        self.field_neighbors = n;
        self
    }

    /// Sets the region of interest scale.
    #[must_use]
    pub const fn with_domain_radius_scale(mut self, scale: f64) -> Self {
        self.domain_radius_scale = scale;
        self
    }

    /// Sets the maximum grid nodes per axis.
    #[must_use]
    pub const fn with_max_grid_resolution(mut self, resolution: usize) -> Self {
        self.max_grid_resolution = resolution;
        self
    }
}

/// Result of surface reconstruction with statistics.
#[derive(Debug, Clone)]
pub struct ReconstructResult {
    /// The reconstructed mesh.
    pub mesh: TriangleMesh,

    /// Average spacing the grid was sized from.
    pub spacing: f64,

    /// Grid nodes per axis.
    pub grid_dims: [usize; 3],

    /// Triangles whose minimum angle is below `min_angle_deg`.
    pub sliver_faces: usize,
}

impl std::fmt::Display for ReconstructResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Reconstruction: {} vertices, {} faces ({} slivers, grid {}x{}x{})",
            self.mesh.vertex_count(),
            self.mesh.face_count(),
            self.sliver_faces,
            self.grid_dims[0],
            self.grid_dims[1],
            self.grid_dims[2]
        )
    }
}

/// Reconstructs a watertight triangle mesh from oriented points.
///
/// Records with the zero-normal sentinel are ignored; the field is built
/// from the remaining samples. Triangle winding is counter-clockwise viewed
/// from outside.
///
/// # Errors
///
/// - [`PipelineError::InvalidParameter`] for out-of-range parameters
/// - [`PipelineError::EmptyCloud`] for an empty cloud
/// - [`PipelineError::InsufficientPoints`] for fewer than 4 points
/// - [`PipelineError::ReconstructionFailed`] if no sample carries a normal,
///   the field has no zero crossing inside the grid, or contouring yields an
///   empty mesh. No partial mesh is returned.
pub fn reconstruct_surface(
    cloud: &OrientedCloud,
    params: &ReconstructParams,
) -> PipelineResult<TriangleMesh> {
    Ok(reconstruct_surface_with_result(cloud, params)?.mesh)
}

/// Reconstructs a surface and returns detailed results.
///
/// # Errors
///
/// Same conditions as [`reconstruct_surface`].
#[allow(clippy::too_many_lines)]
pub fn reconstruct_surface_with_result(
    cloud: &OrientedCloud,
    params: &ReconstructParams,
) -> PipelineResult<ReconstructResult> {
    validate(params)?;

    if cloud.is_empty() {
        return Err(PipelineError::EmptyCloud);
    }
    if cloud.len() < 4 {
        return Err(PipelineError::InsufficientPoints {
            required: 4,
            actual: cloud.len(),
        });
    }

    let start = Instant::now();

    let oriented = OrientedCloud::from_points(
        cloud
            .points
            .iter()
            .filter(|p| p.has_normal())
            .copied()
            .collect(),
    );
    if oriented.len() < 4 {
        return Err(PipelineError::reconstruction(
            "not enough oriented normals to define a surface",
        ));
    }

    let spacing = average_spacing(
        &crate::cloud::PointCloud::from_positions(&oriented.positions()),
        params.spacing_k,
    )?;
    if !spacing.is_finite() || spacing <= 0.0 {
        return Err(PipelineError::reconstruction(
            "degenerate sampling: average spacing is not positive",
        ));
    }

    let approximation_error = params.approximation_factor * spacing;
    let refine_tolerance = params.dichotomy_factor * approximation_error;

    // Bounding sphere of the samples.
    let center = oriented.centroid().unwrap_or_else(Point3::origin);
    let bounding_radius = oriented
        .points
        .iter()
        .map(|p| (p.position - center).norm())
        .fold(0.0_f64, f64::max)
        .max(spacing);
    let domain_radius = params.domain_radius_scale * bounding_radius;

    let grid = GridLayout::fit(&oriented, approximation_error, spacing, params)?;
    let field = IndicatorField::new(
        &oriented,
        params.field_neighbors.min(oriented.len()),
        2.0 * spacing,
        center,
        domain_radius,
    );

    let sdf = sample_grid(&field, &grid)?;
    let mut buffer = SurfaceNetsBuffer::default();
    #[allow(clippy::cast_possible_truncation)]
    let shape = RuntimeShape::<u32, 3>::new([
        grid.dims[0] as u32,
        grid.dims[1] as u32,
        grid.dims[2] as u32,
    ]);
    #[allow(clippy::cast_possible_truncation)]
    surface_nets(
        &sdf,
        &shape,
        [0; 3],
        [
            grid.dims[0] as u32 - 1,
            grid.dims[1] as u32 - 1,
            grid.dims[2] as u32 - 1,
        ],
        &mut buffer,
    );

    if buffer.positions.is_empty() || buffer.indices.is_empty() {
        return Err(PipelineError::reconstruction(
            "contouring produced no triangles",
        ));
    }

    // Grid coordinates to world, then pull every vertex onto the zero set.
    let vertices: Vec<Point3<f64>> = buffer
        .positions
        .par_iter()
        .map(|p| {
            let world = grid.to_world(p);
            refine_vertex(&field, world, grid.cell, refine_tolerance)
        })
        .collect();

    let mut faces: Vec<[u32; 3]> = buffer
        .indices
        .chunks_exact(3)
        .map(|t| [t[0], t[1], t[2]])
        .collect();
    orient_faces(&field, &vertices, &mut faces, grid.cell);

    let sliver_faces = count_slivers(&vertices, &faces, params.min_angle_deg);
    let mesh = TriangleMesh { vertices, faces };

    debug!(
        samples = oriented.len(),
        vertices = mesh.vertex_count(),
        faces = mesh.face_count(),
        spacing,
        "surface reconstruction completed in {:?}",
        start.elapsed()
    );

    Ok(ReconstructResult {
        mesh,
        spacing,
        grid_dims: grid.dims,
        sliver_faces,
    })
}

fn validate(params: &ReconstructParams) -> PipelineResult<()> {
    if params.spacing_k == 0 {
        return Err(PipelineError::invalid("spacing_k must be greater than 0"));
    }
    if params.field_neighbors == 0 {
        return Err(PipelineError::invalid(
            "field_neighbors must be greater than 0",
        ));
    }
    if !(params.min_angle_deg > 0.0 && params.min_angle_deg < 90.0) {
        return Err(PipelineError::invalid(
            "min_angle_deg must be in (0, 90) degrees",
        ));
    }
    for (name, value) in [
        ("facet_size_factor", params.facet_size_factor),
        ("approximation_factor", params.approximation_factor),
        ("dichotomy_factor", params.dichotomy_factor),
        ("domain_radius_scale", params.domain_radius_scale),
    ] {
        if !value.is_finite() || value <= 0.0 {
            return Err(PipelineError::invalid(format!(
                "{name} must be a finite positive value"
            )));
        }
    }
    if params.max_grid_resolution < 2 * GRID_PADDING + 2 {
        return Err(PipelineError::invalid(format!(
            "max_grid_resolution must be at least {}",
            2 * GRID_PADDING + 2
        )));
    }
    Ok(())
}

/// Uniform sampling grid: origin, cell size, and node counts per axis.
struct GridLayout {
    origin: Point3<f64>,
    cell: f64,
    dims: [usize; 3],
}

impl GridLayout {
    /// Sizes a grid around the samples' bounding box with padding, growing
    /// the cell if the resolution cap would otherwise be exceeded.
    fn fit(
        cloud: &OrientedCloud,
        approximation_error: f64,
        spacing: f64,
        params: &ReconstructParams,
    ) -> PipelineResult<Self> {
        let positions = cloud.positions();
        let (min, max) = bounds(&positions)
            .ok_or_else(|| PipelineError::reconstruction("cloud has no bounds"))?;
        let extent = max - min;

        // Contour resolution: twice the approximation error, capped by the
        // facet size bound and the per-axis node budget.
        let mut cell = (2.0 * approximation_error).min(params.facet_size_factor * spacing);
        let usable = params.max_grid_resolution - 1 - 2 * GRID_PADDING;
        #[allow(clippy::cast_precision_loss)]
        let min_cell = extent.max() / usable as f64;
        if cell < min_cell {
            cell = min_cell;
        }

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let dim = |e: f64| -> usize {
            let interior = (e / cell).ceil().max(1.0) as usize;
            (interior + 1 + 2 * GRID_PADDING).min(params.max_grid_resolution)
        };
        let dims = [dim(extent.x), dim(extent.y), dim(extent.z)];

        #[allow(clippy::cast_precision_loss)]
        let origin = min - Vector3::repeat(GRID_PADDING as f64 * cell);
        Ok(Self { origin, cell, dims })
    }

    /// Node position for integer grid coordinates.
    fn node(&self, x: usize, y: usize, z: usize) -> Point3<f64> {
        #[allow(clippy::cast_precision_loss)]
        Point3::from(self.origin.coords + Vector3::new(x as f64, y as f64, z as f64) * self.cell)
    }

    /// World position of a contour vertex given in grid coordinates.
    fn to_world(&self, p: &[f32; 3]) -> Point3<f64> {
        Point3::from(
            self.origin.coords
                + Vector3::new(f64::from(p[0]), f64::from(p[1]), f64::from(p[2])) * self.cell,
        )
    }
}

fn bounds(positions: &[Point3<f64>]) -> Option<(Point3<f64>, Point3<f64>)> {
    let first = *positions.first()?;
    let mut min = first;
    let mut max = first;
    for p in positions {
        min = Point3::new(min.x.min(p.x), min.y.min(p.y), min.z.min(p.z));
        max = Point3::new(max.x.max(p.x), max.y.max(p.y), max.z.max(p.z));
    }
    Some((min, max))
}

/// Samples the field at every grid node, x-fastest to match the contouring
/// shape's linearization.
fn sample_grid(field: &IndicatorField, grid: &GridLayout) -> PipelineResult<Vec<f32>> {
    let [nx, ny, nz] = grid.dims;

    let values: Vec<f32> = (0..nx * ny * nz)
        .into_par_iter()
        .map(|i| {
            let x = i % nx;
            let y = (i / nx) % ny;
            let z = i / (nx * ny);
            #[allow(clippy::cast_possible_truncation)]
            let v = field.value(&grid.node(x, y, z)) as f32;
            v
        })
        .collect();

    if values.iter().any(|v| !v.is_finite()) {
        return Err(PipelineError::reconstruction(
            "implicit function is not finite on the grid",
        ));
    }
    let has_inside = values.iter().any(|&v| v < 0.0);
    let has_outside = values.iter().any(|&v| v >= 0.0);
    if !(has_inside && has_outside) {
        return Err(PipelineError::reconstruction(
            "implicit function has no zero crossing",
        ));
    }

    Ok(values)
}

/// Newton steps along the field gradient until the field value is within
/// tolerance. Steps are capped at one cell to stay near the contour.
fn refine_vertex(
    field: &IndicatorField,
    mut p: Point3<f64>,
    cell: f64,
    tolerance: f64,
) -> Point3<f64> {
    let h = 0.5 * cell;
    for _ in 0..MAX_REFINE_STEPS {
        let v = field.value(&p);
        if v.abs() <= tolerance {
            break;
        }
        let g = field.gradient(&p, h);
        let g_sq = g.norm_squared();
        if g_sq < 1e-12 {
            break;
        }
        let mut step = g * (-v / g_sq);
        let len = step.norm();
        if len > cell {
            step *= cell / len;
        }
        p += step;
    }
    p
}

/// Flips faces whose geometric normal opposes the field gradient, so winding
/// is counter-clockwise viewed from outside.
fn orient_faces(
    field: &IndicatorField,
    vertices: &[Point3<f64>],
    faces: &mut [[u32; 3]],
    cell: f64,
) {
    let h = 0.5 * cell;
    faces.par_iter_mut().for_each(|face| {
        let a = vertices[face[0] as usize];
        let b = vertices[face[1] as usize];
        let c = vertices[face[2] as usize];
        let geometric = (b - a).cross(&(c - a));
        let centroid = Point3::from((a.coords + b.coords + c.coords) / 3.0);
        if geometric.dot(&field.gradient(&centroid, h)) < 0.0 {
            face.swap(1, 2);
        }
    });
}

/// Counts triangles whose minimum interior angle is below the bound.
fn count_slivers(vertices: &[Point3<f64>], faces: &[[u32; 3]], min_angle_deg: f64) -> usize {
    let threshold = min_angle_deg.to_radians();
    faces
        .iter()
        .filter(|face| {
            let a = vertices[face[0] as usize];
            let b = vertices[face[1] as usize];
            let c = vertices[face[2] as usize];
            min_angle(a, b, c) < threshold
        })
        .count()
}

fn min_angle(a: Point3<f64>, b: Point3<f64>, c: Point3<f64>) -> f64 {
    let angle = |apex: Point3<f64>, p: Point3<f64>, q: Point3<f64>| -> f64 {
        let u = p - apex;
        let v = q - apex;
        let denom = u.norm() * v.norm();
        if denom < 1e-30 {
            return 0.0;
        }
        (u.dot(&v) / denom).clamp(-1.0, 1.0).acos()
    };
    angle(a, b, c).min(angle(b, c, a)).min(angle(c, a, b))
}
