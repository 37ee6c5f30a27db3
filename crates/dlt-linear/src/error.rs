use dlt_core::{InputError, Real};
use thiserror::Error;

/// Coarse classification of a [`DltError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// An operation ran before the step it depends on succeeded.
    State,
    /// The normal-equation system is singular or numerically unusable.
    Numerical,
    /// Malformed or insufficient correspondence data.
    Input,
}

/// Errors that can occur during calibration, projection and triangulation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DltError {
    /// `project`/`reproject` (or a triangulation) needs a calibrated camera.
    #[error("camera is not calibrated")]
    NotCalibrated,
    /// `reprojection_error` needs a prior `reproject`.
    #[error("reprojection has not been computed")]
    NotReprojected,
    /// `AᵗA` is singular or too ill-conditioned to solve.
    #[error("singular system (normal-equation pivot {pivot:e})")]
    SingularSystem { pivot: Real },
    /// The fixed `P[2][3] = 1` normalization divides by (near) zero.
    #[error("projection matrix cannot be normalized: P[2][3] = {value:e}")]
    DegenerateNormalization { value: Real },
    /// The left 3x3 block of the projection matrix is not invertible.
    #[error("intrinsics matrix is not invertible")]
    SingularIntrinsics,
    /// A stereo pair could not be triangulated.
    #[error("stereo pair {index} failed: {source}")]
    PairFailed {
        index: usize,
        #[source]
        source: Box<DltError>,
    },
    #[error(transparent)]
    Input(#[from] InputError),
}

impl DltError {
    /// Classify the error as a state, numerical or input failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotCalibrated | Self::NotReprojected => ErrorKind::State,
            Self::SingularSystem { .. }
            | Self::DegenerateNormalization { .. }
            | Self::SingularIntrinsics => ErrorKind::Numerical,
            Self::PairFailed { source, .. } => source.kind(),
            Self::Input(_) => ErrorKind::Input,
        }
    }
}
