//! Point cloud processing and surface reconstruction.
//!
//! This crate turns raw 3D scanner output into a watertight triangle mesh:
//!
//! - **Cleanup** - Remove statistical outliers and thin oversampled regions
//! - **Smoothing** - Relax scanner noise by local polynomial fitting
//! - **Normals** - Estimate normals by PCA and orient them consistently
//! - **Reconstruction** - Contour an implicit surface fitted to the
//!   oriented points
//!
//! The stages compose into a single [`run_pipeline`] call, or run
//! individually for custom workflows. Every stage is deterministic: the
//! same input and parameters always produce the same output.
//!
//! # Quick Start
//!
//! ## Cleaning a Cloud
//!
//! ```
//! use cloud_pipeline::{remove_outliers, OutlierParams, PointCloud};
//! use nalgebra::Point3;
//!
//! let mut cloud = PointCloud::new();
//! for i in 0..50 {
//!     cloud.push_coords(f64::from(i) * 0.1, 0.0, f64::from(i) * 0.001);
//! }
//! cloud.push_coords(0.0, 1000.0, 0.0); // scanner glitch
//!
//! let params = OutlierParams::new().with_removed_fraction(0.02);
//! let cleaned = remove_outliers(&cloud, &params).unwrap();
//! assert_eq!(cleaned.len(), 50);
//! ```
//!
//! ## Estimating Normals
//!
//! ```
//! use cloud_pipeline::{estimate_normals, orient_normals, OrientParams, PointCloud};
//! use nalgebra::Point3;
//!
//! let positions: Vec<_> = (0..25)
//!     .map(|i| Point3::new(f64::from(i % 5), f64::from(i / 5), 0.0))
//!     .collect();
//! let cloud = PointCloud::from_positions(&positions);
//!
//! let mut oriented = estimate_normals(&cloud, 8).unwrap();
//! orient_normals(&mut oriented, &OrientParams::default()).unwrap();
//! assert!(oriented.points.iter().all(|p| p.normal.z > 0.9));
//! ```
//!
//! # Module Overview
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`cloud`] | Point cloud and mesh data structures |
//! | [`spatial`] | Nearest-neighbor index and average spacing |
//! | [`cleanup`] | Outlier removal and grid simplification |
//! | [`smooth`] | Jet smoothing |
//! | [`normals`] | Normal estimation and orientation |
//! | [`reconstruct`] | Implicit surface reconstruction |
//! | [`pipeline`] | End-to-end pipeline with per-stage reports |
//!
//! # Complete Workflow Example
//!
//! ```no_run
//! use cloud_pipeline::{run_pipeline, PipelineParams, PointCloud, SmoothParams};
//!
//! # fn load_scan() -> PointCloud { PointCloud::new() }
//! let cloud = load_scan();
//!
//! let params = PipelineParams::new()
//!     .with_simplify_cell_size(0.5)
//!     .with_smooth(SmoothParams::new().with_iterations(2));
//!
//! let output = run_pipeline(&cloud, &params)?;
//! println!("reconstructed {} faces", output.mesh.face_count());
//! for report in &output.stages {
//!     println!("  {report}");
//! }
//! # Ok::<(), cloud_pipeline::PipelineError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![deny(clippy::unwrap_used, clippy::expect_used)]
#![allow(clippy::module_name_repetitions)]
// Allow certain pedantic lints that are too strict for this crate
#![allow(clippy::missing_const_for_fn)] // Not all functions benefit from const
#![allow(clippy::cast_precision_loss)] // Expected when converting counts to f64
#![allow(clippy::cast_possible_truncation)] // Expected when converting u64 to usize
#![allow(clippy::needless_range_loop)] // Sometimes indices are clearer
#![allow(clippy::trivially_copy_pass_by_ref)] // Consistency in function signatures
#![allow(clippy::manual_let_else)] // Match expressions can be clearer
#![allow(clippy::suboptimal_flops)] // Plain arithmetic reads better than mul_add

pub mod cleanup;
pub mod cloud;
pub mod error;
pub mod normals;
pub mod pipeline;
pub mod reconstruct;
pub mod smooth;
pub mod spatial;

// Re-export main types at crate root for convenience
pub use cleanup::{
    grid_simplify, grid_simplify_with_result, remove_outliers, remove_outliers_with_result,
    OutlierParams, OutlierResult, SimplifyResult,
};
pub use cloud::{CloudPoint, OrientedCloud, OrientedPoint, PointCloud, TriangleMesh};
pub use error::{PipelineError, PipelineResult};
pub use normals::{estimate_normals, orient_normals, OrientParams};
pub use pipeline::{run_pipeline, PipelineOutput, PipelineParams, Stage, StageReport};
pub use reconstruct::{
    reconstruct_surface, reconstruct_surface_with_result, ReconstructParams, ReconstructResult,
};
pub use smooth::{jet_smooth, SmoothParams};
pub use spatial::{average_spacing, Neighbor, SpatialIndex};
