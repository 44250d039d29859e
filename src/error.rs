//! Error types for the point cloud pipeline.

use thiserror::Error;

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors that can occur during point cloud processing.
///
/// Numeric edge cases (a neighbor count larger than the cloud) are clamped
/// inside the stages and never surface here; only structural failures do.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Point cloud is empty.
    #[error("point cloud is empty")]
    EmptyCloud,

    /// Not enough points for the requested operation, even after clamping.
    #[error("insufficient points: need at least {required}, got {actual}")]
    InsufficientPoints {
        /// Minimum number of points required.
        required: usize,
        /// Actual number of points provided.
        actual: usize,
    },

    /// Invalid parameter value.
    #[error("invalid parameter: {reason}")]
    InvalidParameter {
        /// Description of why the parameter is invalid.
        reason: String,
    },

    /// Surface reconstruction failed. No partial mesh is returned.
    #[error("reconstruction failed: {reason}")]
    ReconstructionFailed {
        /// Description of why reconstruction failed.
        reason: String,
    },
}

impl PipelineError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            reason: reason.into(),
        }
    }

    pub(crate) fn reconstruction(reason: impl Into<String>) -> Self {
        Self::ReconstructionFailed {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_cloud_error() {
        let err = PipelineError::EmptyCloud;
        assert_eq!(format!("{err}"), "point cloud is empty");
    }

    #[test]
    fn test_insufficient_points_error() {
        let err = PipelineError::InsufficientPoints {
            required: 3,
            actual: 1,
        };
        assert_eq!(format!("{err}"), "insufficient points: need at least 3, got 1");
    }

    #[test]
    fn test_invalid_parameter_error() {
        let err = PipelineError::invalid("cell size must be positive");
        assert_eq!(
            format!("{err}"),
            "invalid parameter: cell size must be positive"
        );
    }

    #[test]
    fn test_reconstruction_failed_error() {
        let err = PipelineError::reconstruction("implicit function has no zero crossing");
        assert_eq!(
            format!("{err}"),
            "reconstruction failed: implicit function has no zero crossing"
        );
    }
}
