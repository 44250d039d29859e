//! Point cloud cleanup: outlier removal and grid simplification.
//!
//! These are the first two pipeline stages. Both consume a cloud and return
//! a new one with the surviving points in their original relative order.

pub mod outlier;
pub mod simplify;

pub use outlier::{remove_outliers, remove_outliers_with_result, OutlierParams, OutlierResult};
pub use simplify::{grid_simplify, grid_simplify_with_result, SimplifyResult};
