//! End-to-end pipeline from a raw point cloud to a triangle mesh.
//!
//! Stages run in a fixed order; the optional ones are skipped when their
//! parameters are absent:
//!
//! 1. Statistical outlier removal (optional)
//! 2. Grid simplification (optional)
//! 3. Jet smoothing (optional)
//! 4. PCA normal estimation
//! 5. MST normal orientation
//! 6. Implicit surface reconstruction
//!
//! Each stage consumes the previous stage's output and the pipeline records
//! a per-stage report (point counts and elapsed time). The first failing
//! stage aborts the run; no partial mesh is returned.
//!
//! # Example
//!
//! ```no_run
//! use cloud_pipeline::{run_pipeline, PipelineParams, PointCloud};
//! # let cloud = PointCloud::new();
//!
//! let output = run_pipeline(&cloud, &PipelineParams::default())?;
//! println!("{} faces", output.mesh.face_count());
//! for report in &output.stages {
//!     println!("{report}");
//! }
//! # Ok::<(), cloud_pipeline::PipelineError>(())
//! ```

use std::time::{Duration, Instant};

use tracing::info;

use crate::cleanup::{grid_simplify, remove_outliers, OutlierParams};
use crate::cloud::{PointCloud, TriangleMesh};
use crate::error::{PipelineError, PipelineResult};
use crate::normals::{estimate_normals, orient_normals, OrientParams};
use crate::reconstruct::{reconstruct_surface, ReconstructParams};
use crate::smooth::{jet_smooth, SmoothParams};

/// A pipeline stage, for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Statistical outlier removal.
    OutlierRemoval,
    /// Grid simplification.
    Simplification,
    /// Jet smoothing.
    Smoothing,
    /// PCA normal estimation.
    NormalEstimation,
    /// MST normal orientation.
    NormalOrientation,
    /// Implicit surface reconstruction.
    Reconstruction,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::OutlierRemoval => "outlier removal",
            Self::Simplification => "simplification",
            Self::Smoothing => "smoothing",
            Self::NormalEstimation => "normal estimation",
            Self::NormalOrientation => "normal orientation",
            Self::Reconstruction => "reconstruction",
        };
        f.write_str(name)
    }
}

/// Per-stage accounting for one pipeline run.
#[derive(Debug, Clone)]
pub struct StageReport {
    /// Which stage ran.
    pub stage: Stage,

    /// Points (or records) entering the stage.
    pub points_in: usize,

    /// Points leaving the stage; mesh vertices for reconstruction.
    pub points_out: usize,

    /// Wall-clock time spent in the stage.
    pub elapsed: Duration,
}

impl std::fmt::Display for StageReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} -> {} in {:?}",
            self.stage, self.points_in, self.points_out, self.elapsed
        )
    }
}

/// Output of a full pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// The reconstructed mesh.
    pub mesh: TriangleMesh,

    /// Reports for the stages that ran, in execution order.
    pub stages: Vec<StageReport>,
}

/// Parameters for the full pipeline.
///
/// Defaults enable outlier removal and smoothing and skip simplification,
/// matching the scanner-cleanup use case. Set `simplify_cell_size` (a good
/// starting value is a small multiple of the cloud's
/// [`average_spacing`](crate::average_spacing)) to thin oversampled input.
#[derive(Debug, Clone)]
pub struct PipelineParams {
    /// Outlier removal parameters, or `None` to skip the stage.
    pub outlier: Option<OutlierParams>,

    /// Simplification grid cell size, or `None` to skip the stage.
    pub simplify_cell_size: Option<f64>,

    /// Smoothing parameters, or `None` to skip the stage.
    pub smooth: Option<SmoothParams>,

    /// Neighbors for normal estimation. Default: 24.
    pub estimate_k: usize,

    /// Normal orientation parameters.
    pub orient: OrientParams,

    /// Surface reconstruction parameters.
    pub reconstruct: ReconstructParams,
}

impl Default for PipelineParams {
    fn default() -> Self {
        Self {
            outlier: Some(OutlierParams::default()),
            simplify_cell_size: None,
            smooth: Some(SmoothParams::default()),
            estimate_k: 24,
            orient: OrientParams::default(),
            reconstruct: ReconstructParams::default(),
        }
    }
}

impl PipelineParams {
    /// Creates new parameters with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the outlier removal parameters.
    #[must_use]
    pub fn with_outlier(mut self, params: OutlierParams) -> Self {
        self.outlier = Some(params);
        self
    }

    /// Disables outlier removal.
    #[must_use]
    pub fn skip_outlier_removal(mut self) -> Self {
        self.outlier = None;
        self
    }

    /// Enables simplification with the given grid cell size.
    #[must_use]
    pub const fn with_simplify_cell_size(mut self, cell_size: f64) -> Self {
        self.simplify_cell_size = Some(cell_size);
        self
    }

    /// Sets the smoothing parameters.
    #[must_use]
    pub fn with_smooth(mut self, params: SmoothParams) -> Self {
        self.smooth = Some(params);
        self
    }

    /// Disables smoothing.
    #[must_use]
    pub fn skip_smoothing(mut self) -> Self {
        self.smooth = None;
        self
    }

    /// Sets the normal estimation neighbor count.
    #[must_use]
    pub const fn with_estimate_k(mut self, k: usize) -> Self {
        self.estimate_k = k;
        self
    }

    /// Sets the normal orientation parameters.
    #[must_use]
    pub fn with_orient(mut self, params: OrientParams) -> Self {
        self.orient = params;
        self
    }

    /// Sets the reconstruction parameters.
    #[must_use]
    pub fn with_reconstruct(mut self, params: ReconstructParams) -> Self {
        self.reconstruct = params;
        self
    }
}

/// Runs the full pipeline on a cloud and returns the mesh with per-stage
/// reports.
///
/// # Errors
///
/// [`PipelineError::EmptyCloud`] for an empty input; otherwise whatever the
/// first failing stage returns.
pub fn run_pipeline(
    cloud: &PointCloud,
    params: &PipelineParams,
) -> PipelineResult<PipelineOutput> {
    if cloud.is_empty() {
        return Err(PipelineError::EmptyCloud);
    }

    let mut stages = Vec::new();
    let mut current = cloud.clone();

    if let Some(outlier) = &params.outlier {
        let points_in = current.len();
        let start = Instant::now();
        current = remove_outliers(&current, outlier)?;
        record(&mut stages, Stage::OutlierRemoval, points_in, current.len(), start);
    }

    if let Some(cell_size) = params.simplify_cell_size {
        let points_in = current.len();
        let start = Instant::now();
        current = grid_simplify(&current, cell_size)?;
        record(&mut stages, Stage::Simplification, points_in, current.len(), start);
    }

    if let Some(smooth) = &params.smooth {
        let points_in = current.len();
        let start = Instant::now();
        current = jet_smooth(&current, smooth)?;
        record(&mut stages, Stage::Smoothing, points_in, current.len(), start);
    }

    let points_in = current.len();
    let start = Instant::now();
    let mut oriented = estimate_normals(&current, params.estimate_k)?;
    record(&mut stages, Stage::NormalEstimation, points_in, oriented.len(), start);

    let points_in = oriented.len();
    let start = Instant::now();
    orient_normals(&mut oriented, &params.orient)?;
    record(&mut stages, Stage::NormalOrientation, points_in, oriented.len(), start);

    let points_in = oriented.len();
    let start = Instant::now();
    let mesh = reconstruct_surface(&oriented, &params.reconstruct)?;
    record(&mut stages, Stage::Reconstruction, points_in, mesh.vertex_count(), start);

    Ok(PipelineOutput { mesh, stages })
}

fn record(
    stages: &mut Vec<StageReport>,
    stage: Stage,
    points_in: usize,
    points_out: usize,
    start: Instant,
) {
    let elapsed = start.elapsed();
    info!(%stage, points_in, points_out, ?elapsed, "pipeline stage finished");
    stages.push(StageReport {
        stage,
        points_in,
        points_out,
        elapsed,
    });
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use nalgebra::Point3;

    fn make_sphere_cloud(n: usize, radius: f64) -> PointCloud {
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
    fn test_default_pipeline_on_sphere() {
        let cloud = make_sphere_cloud(800, 1.0);
        let params = PipelineParams::new().with_estimate_k(12);
        let output = run_pipeline(&cloud, &params).unwrap();

        assert!(!output.mesh.is_empty());
        assert!(output.mesh.face_count() > 0);

        // Optional simplification skipped, everything else reported.
        let ran: Vec<Stage> = output.stages.iter().map(|r| r.stage).collect();
        assert_eq!(
            ran,
            vec![
                Stage::OutlierRemoval,
                Stage::Smoothing,
                Stage::NormalEstimation,
                Stage::NormalOrientation,
                Stage::Reconstruction,
            ]
        );
    }

    #[test]
    fn test_simplification_thins_cloud() {
        let cloud = make_sphere_cloud(1000, 1.0);
        let params = PipelineParams::new()
            .skip_outlier_removal()
            .skip_smoothing()
            .with_simplify_cell_size(0.2)
            .with_estimate_k(12);
        let output = run_pipeline(&cloud, &params).unwrap();

        let simplify = output
            .stages
            .iter()
            .find(|r| r.stage == Stage::Simplification)
            .unwrap();
        assert!(simplify.points_out < simplify.points_in);
    }

    #[test]
    fn test_empty_input() {
        let result = run_pipeline(&PointCloud::new(), &PipelineParams::default());
        assert!(matches!(result, Err(PipelineError::EmptyCloud)));
    }

    #[test]
    fn test_stage_error_propagates() {
        let cloud = make_sphere_cloud(100, 1.0);
        let params = PipelineParams::new().with_simplify_cell_size(-1.0);
        let result = run_pipeline(&cloud, &params);
        assert!(matches!(result, Err(PipelineError::InvalidParameter { .. })));
    }

    #[test]
    fn test_stage_report_display() {
        let report = StageReport {
            stage: Stage::Smoothing,
            points_in: 100,
            points_out: 100,
            elapsed: Duration::from_millis(5),
        };
        let display = format!("{report}");
        assert!(display.starts_with("smoothing: 100 -> 100"));
    }
}
