//! Observation types for calibration and stereo data.
//!
//! A [`Correspondence`] pairs one image point with its known world point and
//! is the row type of a calibration table (`u, v, X, Y, Z`). A
//! [`StereoCorrespondence`] pairs the images of one unknown world point in two
//! cameras (`u1, v1, u2, v2`).

use crate::{Pt2, Pt3, Real};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Minimum number of correspondences for a determined DLT system
/// (11 unknowns, two equations per point).
pub const MIN_CALIBRATION_POINTS: usize = 6;

/// Malformed or insufficient correspondence data.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InputError {
    /// No correspondences were provided.
    #[error("no correspondences provided")]
    Empty,
    /// Fewer correspondences than the solver needs.
    #[error("need at least {required} point correspondences, got {got}")]
    NotEnoughPoints { required: usize, got: usize },
    /// Column-wise inputs have different lengths.
    #[error("mismatched point counts: {first} vs {second}")]
    CountMismatch { first: usize, second: usize },
    /// A coordinate is NaN or infinite.
    #[error("correspondence {index} has a non-finite coordinate")]
    NonFinite { index: usize },
}

/// A 2D image point and its known 3D world point.
///
/// # Example
///
/// ```
/// use dlt_core::{Correspondence, Pt2, Pt3};
///
/// let c = Correspondence::from_row([128.0, 324.0, 3.0, 5.0, 0.0]);
/// assert_eq!(c.image, Pt2::new(128.0, 324.0));
/// assert_eq!(c.world, Pt3::new(3.0, 5.0, 0.0));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Correspondence {
    /// Pixel coordinates `(u, v)`; may be fractional.
    pub image: Pt2,
    /// World coordinates `(X, Y, Z)`.
    pub world: Pt3,
}

impl Correspondence {
    pub fn new(image: Pt2, world: Pt3) -> Self {
        Self { image, world }
    }

    /// Build from a table row laid out as `[u, v, X, Y, Z]`.
    pub fn from_row(row: [Real; 5]) -> Self {
        Self {
            image: Pt2::new(row[0], row[1]),
            world: Pt3::new(row[2], row[3], row[4]),
        }
    }

    /// Zip image and world columns into correspondences.
    ///
    /// # Errors
    ///
    /// [`InputError::CountMismatch`] if the columns differ in length.
    pub fn from_columns(image: &[Pt2], world: &[Pt3]) -> Result<Vec<Self>, InputError> {
        if image.len() != world.len() {
            return Err(InputError::CountMismatch {
                first: image.len(),
                second: world.len(),
            });
        }
        Ok(image
            .iter()
            .zip(world.iter())
            .map(|(uv, xyz)| Self::new(*uv, *xyz))
            .collect())
    }

    /// Returns true if every coordinate is finite.
    #[inline]
    pub fn is_finite(&self) -> bool {
        self.image
            .iter()
            .chain(self.world.iter())
            .all(|c| c.is_finite())
    }
}

/// Images of the same world point in camera 1 and camera 2.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StereoCorrespondence {
    /// `(u1, v1)` in camera 1.
    pub first: Pt2,
    /// `(u2, v2)` in camera 2.
    pub second: Pt2,
}

impl StereoCorrespondence {
    pub fn new(first: Pt2, second: Pt2) -> Self {
        Self { first, second }
    }

    /// Build from a table row laid out as `[u1, v1, u2, v2]`.
    pub fn from_row(row: [Real; 4]) -> Self {
        Self {
            first: Pt2::new(row[0], row[1]),
            second: Pt2::new(row[2], row[3]),
        }
    }

    /// Zip per-camera columns into stereo correspondences.
    ///
    /// # Errors
    ///
    /// [`InputError::CountMismatch`] if the columns differ in length.
    pub fn from_columns(first: &[Pt2], second: &[Pt2]) -> Result<Vec<Self>, InputError> {
        if first.len() != second.len() {
            return Err(InputError::CountMismatch {
                first: first.len(),
                second: second.len(),
            });
        }
        Ok(first
            .iter()
            .zip(second.iter())
            .map(|(a, b)| Self::new(*a, *b))
            .collect())
    }

    /// Returns true if every coordinate is finite.
    #[inline]
    pub fn is_finite(&self) -> bool {
        self.first
            .iter()
            .chain(self.second.iter())
            .all(|c| c.is_finite())
    }
}

/// Check a calibration set before any system is built.
///
/// Rejects empty input, fewer than [`MIN_CALIBRATION_POINTS`] points and
/// non-finite coordinates. Degenerate geometry (coplanar points) is left to
/// the solver.
pub fn validate_correspondences(points: &[Correspondence]) -> Result<(), InputError> {
    if points.is_empty() {
        return Err(InputError::Empty);
    }
    if points.len() < MIN_CALIBRATION_POINTS {
        return Err(InputError::NotEnoughPoints {
            required: MIN_CALIBRATION_POINTS,
            got: points.len(),
        });
    }
    match points.iter().position(|c| !c.is_finite()) {
        Some(index) => Err(InputError::NonFinite { index }),
        None => Ok(()),
    }
}

/// Check stereo pairs for non-finite coordinates. An empty set is valid.
pub fn validate_stereo_correspondences(pairs: &[StereoCorrespondence]) -> Result<(), InputError> {
    match pairs.iter().position(|p| !p.is_finite()) {
        Some(index) => Err(InputError::NonFinite { index }),
        None => Ok(()),
    }
}
