//! Shared linear-algebra utilities for the DLT solvers.
//!
//! - **Normal-equation solve** for overdetermined systems `A x = b`, with an
//!   explicit singularity test instead of silently returning garbage.
//! - **Hartley normalization** for 2D and 3D points (numerical conditioning).
//!
//! # Normal equations
//!
//! The least-squares solution of `A x = b` satisfies `AᵗA x = Aᵗb`. `AᵗA` is
//! symmetric positive semi-definite; it is positive definite exactly when `A`
//! has full column rank. [`solve_normal_equations`] first scales `AᵗA` to unit
//! diagonal (Jacobi equilibration) so that the pivot threshold does not
//! depend on the units of the columns (pixels vs. world units), then
//! factors it with Cholesky. Equilibration does not recover the precision
//! lost when forming `AᵗA`: the relative error of `x` still grows with the
//! condition number of `A` squared.
//!
//! # Example
//!
//! ```
//! use dlt_linear::math::solve_normal_equations;
//! use nalgebra::{DMatrix, DVector};
//!
//! // x + y = 3, x - y = 1, 2x = 4
//! let a = DMatrix::from_row_slice(3, 2, &[1.0, 1.0, 1.0, -1.0, 2.0, 0.0]);
//! let b = DVector::from_vec(vec![3.0, 1.0, 4.0]);
//! let sol = solve_normal_equations(&a, &b, 1e-10).unwrap();
//! assert!((sol.x[0] - 2.0).abs() < 1e-12);
//! assert!((sol.x[1] - 1.0).abs() < 1e-12);
//! ```

use crate::DltError;
use dlt_core::{InputError, Mat3, Mat4, Pt2, Pt3, Real};
use log::trace;
use nalgebra::{Cholesky, DMatrix, DVector};

/// Solution of a normal-equation solve.
#[derive(Debug, Clone)]
pub struct NormalSolution {
    /// Least-squares solution `x`.
    pub x: DVector<Real>,
    /// Smallest Cholesky pivot of the equilibrated `AᵗA` (in `(0, 1]`).
    ///
    /// Values close to the tolerance indicate a nearly degenerate system.
    pub min_pivot: Real,
}

/// Solve `x = solve(AᵗA, Aᵗb)` for an overdetermined system `A x = b`.
///
/// # Errors
///
/// - [`DltError::Input`] with [`InputError::CountMismatch`] if `b` does not
///   have one entry per row of `A`.
/// - [`DltError::SingularSystem`] if `A` has an all-zero column, or if the
///   equilibrated `AᵗA` is not positive definite or its smallest Cholesky
///   pivot is `<= tol`.
pub fn solve_normal_equations(
    a: &DMatrix<Real>,
    b: &DVector<Real>,
    tol: Real,
) -> Result<NormalSolution, DltError> {
    if a.nrows() != b.len() {
        return Err(InputError::CountMismatch {
            first: a.nrows(),
            second: b.len(),
        }
        .into());
    }

    let ata = a.transpose() * a;
    let atb = a.transpose() * b;
    trace!("AᵗA = {ata}");
    trace!("Aᵗb = {atb}");

    let diag = ata.diagonal();
    if diag.iter().any(|&v| v <= 0.0 || !v.is_finite()) {
        return Err(DltError::SingularSystem { pivot: 0.0 });
    }
    let d = diag.map(|v| 1.0 / v.sqrt());

    let m = DMatrix::from_fn(ata.nrows(), ata.ncols(), |r, c| ata[(r, c)] * d[r] * d[c]);
    let rhs = atb.component_mul(&d);

    let chol = Cholesky::new(m)
        .ok_or(DltError::SingularSystem { pivot: 0.0 })?;
    let min_pivot = chol
        .l_dirty()
        .diagonal()
        .iter()
        .map(|l| l * l)
        .fold(Real::INFINITY, Real::min);
    if min_pivot <= tol || min_pivot.is_nan() {
        return Err(DltError::SingularSystem { pivot: min_pivot });
    }

    let z = chol.solve(&rhs);
    Ok(NormalSolution {
        x: z.component_mul(&d),
        min_pivot,
    })
}

/// Hartley normalization for 2D points.
///
/// Centers points at the origin and scales so that the mean distance from
/// the origin is `√2`.
///
/// Returns `Some((normalized_points, T))` with `p_norm = T * p_homogeneous`,
/// or `None` if input is empty or all points coincide.
///
/// # References
///
/// Hartley & Zisserman, "Multiple View Geometry in Computer Vision", 2nd ed.,
/// Algorithm 4.2 (Normalized DLT)
pub fn normalize_points_2d(points: &[Pt2]) -> Option<(Vec<Pt2>, Mat3)> {
    if points.is_empty() {
        return None;
    }

    let n = points.len() as Real;
    let (sx, sy) = points
        .iter()
        .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
    let cx = sx / n;
    let cy = sy / n;

    let mean_dist = points
        .iter()
        .map(|p| ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt())
        .sum::<Real>()
        / n;
    if mean_dist <= Real::EPSILON {
        return None;
    }

    let scale = (2.0 as Real).sqrt() / mean_dist;
    #[rustfmt::skip]
    let t = Mat3::new(
        scale, 0.0, -scale * cx,
        0.0, scale, -scale * cy,
        0.0, 0.0, 1.0,
    );

    let norm = points
        .iter()
        .map(|p| Pt2::new((p.x - cx) * scale, (p.y - cy) * scale))
        .collect();

    Some((norm, t))
}

/// Hartley normalization for 3D points.
///
/// Centers points at the origin and scales so that the mean distance from
/// the origin is `√3`. This is the 3D analog of [`normalize_points_2d`].
pub fn normalize_points_3d(points: &[Pt3]) -> Option<(Vec<Pt3>, Mat4)> {
    if points.is_empty() {
        return None;
    }

    let n = points.len() as Real;
    let centroid = points.iter().fold(Pt3::origin(), |acc, p| acc + p.coords) / n;

    let mean_dist = points.iter().map(|p| (p - centroid).norm()).sum::<Real>() / n;
    if mean_dist <= Real::EPSILON {
        return None;
    }

    let scale = (3.0 as Real).sqrt() / mean_dist;
    #[rustfmt::skip]
    let t = Mat4::new(
        scale, 0.0, 0.0, -scale * centroid.x,
        0.0, scale, 0.0, -scale * centroid.y,
        0.0, 0.0, scale, -scale * centroid.z,
        0.0, 0.0, 0.0, 1.0,
    );

    let norm = points
        .iter()
        .map(|p| Pt3::from((p - centroid) * scale))
        .collect();

    Some((norm, t))
}
