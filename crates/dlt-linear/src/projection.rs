//! The 3x4 perspective projection matrix and its decomposition.
//!
//! A [`ProjectionMatrix`] is stored with the bottom-right entry fixed to `1`,
//! which leaves the 11 free entries estimated by the DLT. Flattened in
//! row-major order the entries are `p0 .. p11` with `p11 = 1`.

use crate::DltError;
use dlt_core::{to_homogeneous_3d, Mat3, Mat34, Pt2, Pt3, Real, Vec3};
use serde::{Deserialize, Serialize};

/// Camera projection matrix `P ~ K [R | t]`, normalized so that `P[2][3] = 1`.
///
/// Deserialization goes through [`ProjectionMatrix::from_matrix`], so a
/// stored matrix of any scale is renormalized and a degenerate one rejected.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Mat34", into = "Mat34")]
pub struct ProjectionMatrix(Mat34);

/// Camera matrix decomposition into `K`, `R`, `t` with `K` upper-triangular.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraMatrixDecomposition {
    /// Intrinsics matrix (upper-triangular, positive diagonal, `K[2][2] = 1`).
    pub k: Mat3,
    /// Rotation matrix (orthonormal, det=+1).
    pub r: Mat3,
    /// Translation vector in camera coordinates.
    pub t: Vec3,
}

impl ProjectionMatrix {
    /// Number of free entries estimated by the DLT.
    pub const NUM_PARAMETERS: usize = 11;

    /// Reshape the DLT solution `p0 .. p10` (row-major) and append `p11 = 1`.
    pub fn from_parameters(p: &[Real; Self::NUM_PARAMETERS]) -> Self {
        #[rustfmt::skip]
        let m = Mat34::new(
            p[0], p[1], p[2], p[3],
            p[4], p[5], p[6], p[7],
            p[8], p[9], p[10], 1.0,
        );
        Self(m)
    }

    /// Wrap an arbitrary-scale projection matrix, rescaling it so that `P[2][3] = 1`.
    ///
    /// # Errors
    ///
    /// [`DltError::DegenerateNormalization`] if `P[2][3]` is zero relative to
    /// the largest entry (the world origin lies on the principal plane).
    pub fn from_matrix(m: Mat34) -> Result<Self, DltError> {
        let value = m[(2, 3)];
        let largest = m.amax();
        if !value.is_finite() || value.abs() <= Real::EPSILON * largest {
            return Err(DltError::DegenerateNormalization { value });
        }
        Ok(Self(m / value))
    }

    /// The underlying 3x4 matrix.
    #[inline]
    pub fn matrix(&self) -> &Mat34 {
        &self.0
    }

    /// Entries in row-major order (`p0 .. p11`).
    pub fn flat(&self) -> [Real; 12] {
        std::array::from_fn(|i| self.0[(i / 4, i % 4)])
    }

    /// The projective denominator `λ = p8 X + p9 Y + p10 Z + 1`.
    ///
    /// `λ` near zero means the point lies on the camera's principal plane.
    #[inline]
    pub fn depth(&self, world: &Pt3) -> Real {
        self.0.row(2).transpose().dot(&to_homogeneous_3d(world))
    }

    /// Forward-project a world point: `u = (p0 X + p1 Y + p2 Z + p3) / λ`,
    /// `v = (p4 X + p5 Y + p6 Z + p7) / λ`.
    ///
    /// No special handling for `λ ≈ 0`; the result is then very large or
    /// non-finite.
    pub fn project(&self, world: &Pt3) -> Pt2 {
        let x = self.0 * to_homogeneous_3d(world);
        Pt2::new(x.x / x.z, x.y / x.z)
    }

    /// Optical centre `C` in world coordinates (`P [C; 1] = 0`).
    ///
    /// # Errors
    ///
    /// [`DltError::SingularIntrinsics`] if the left 3x3 block is singular
    /// (camera at infinity).
    pub fn camera_center(&self) -> Result<Pt3, DltError> {
        let m = self.0.fixed_view::<3, 3>(0, 0).into_owned();
        let m_inv = m.try_inverse().ok_or(DltError::SingularIntrinsics)?;
        Ok(Pt3::from(-(m_inv * self.0.column(3))))
    }

    /// Decompose into intrinsics, rotation, and translation.
    ///
    /// Returns `K`, `R`, and `t` such that `P ~ K [R | t]`. The diagonal of
    /// `K` is forced positive and `K` is scaled so that `K[2][2] = 1`.
    pub fn decompose(&self) -> Result<CameraMatrixDecomposition, DltError> {
        let p = &self.0;
        let m = p.fixed_view::<3, 3>(0, 0).into_owned();
        let (mut k, mut r) = rq_decompose(&m);

        if k[(2, 2)] < 0.0 {
            k = -k;
            r = -r;
        }

        let k_inv = k.try_inverse().ok_or(DltError::SingularIntrinsics)?;
        let mut t = k_inv * p.column(3);

        if r.determinant() < 0.0 {
            r = -r;
            t = -t;
        }

        let scale = k[(2, 2)];
        if scale.abs() <= Real::EPSILON {
            return Err(DltError::SingularIntrinsics);
        }

        Ok(CameraMatrixDecomposition {
            k: k / scale,
            r,
            t: t.into_owned(),
        })
    }
}

impl From<ProjectionMatrix> for Mat34 {
    fn from(p: ProjectionMatrix) -> Self {
        p.0
    }
}

impl TryFrom<Mat34> for ProjectionMatrix {
    type Error = DltError;

    fn try_from(m: Mat34) -> Result<Self, Self::Error> {
        Self::from_matrix(m)
    }
}

/// Factor `m = K R` with `K` upper-triangular and `R` orthonormal.
///
/// Computed from the QR factorization of the row- and column-reversed
/// transpose of `m`. Signs are fixed so that `K` has a non-negative
/// diagonal; `R` is then a reflection (`det R = -1`) when `det m < 0`.
pub fn rq_decompose(m: &Mat3) -> (Mat3, Mat3) {
    let reverse = Mat3::new(0.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 0.0);
    let qr = (reverse * m.transpose() * reverse).qr();
    let k = reverse * qr.r().transpose() * reverse;
    let r = reverse * qr.q().transpose() * reverse;

    let signs = Mat3::from_diagonal(&k.diagonal().map(|v| if v < 0.0 { -1.0 } else { 1.0 }));
    (k * signs, signs * r)
}
