//! Two-view linear triangulation.
//!
//! For a stereo pair `(u1, v1, u2, v2)` and flattened projection matrices
//! `p` (camera 1) and `q` (camera 2), each image coordinate gives one linear
//! equation in `(X, Y, Z)`:
//!
//! ```text
//! [p0 - u1 p8, p1 - u1 p9, p2 - u1 p10]   = u1 - p3
//! [p4 - v1 p8, p5 - v1 p9, p6 - v1 p10]   = v1 - p7
//! [q0 - u2 q8, q1 - u2 q9, q2 - u2 q10]   = u2 - q3
//! [q4 - v2 q8, q5 - v2 q9, q6 - v2 q10]   = v2 - q7
//! ```
//!
//! The `4 x 3` system is solved in the least-squares sense with the same
//! normal-equation solver as calibration. Pairs are independent.

use crate::math::solve_normal_equations;
use crate::{Calibrator, DltError, ProjectionMatrix};
use dlt_core::{validate_stereo_correspondences, Pt2, Pt3, Real, StereoCorrespondence};
use log::{debug, warn};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// What [`Triangulator::triangulate`] does when a pair cannot be solved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairFailurePolicy {
    /// Stop at the first failed pair and return [`DltError::PairFailed`].
    Abort,
    /// Leave a hole for the failed pair, record it, and keep going.
    #[default]
    Skip,
}

/// Options for [`Triangulator`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriangulationOptions {
    /// Smallest accepted Cholesky pivot of the equilibrated `AᵗA`.
    pub singular_tolerance: Real,
    pub on_pair_failure: PairFailurePolicy,
}

impl Default for TriangulationOptions {
    fn default() -> Self {
        Self {
            singular_tolerance: 1e-10,
            on_pair_failure: PairFailurePolicy::Skip,
        }
    }
}

/// A stereo pair that could not be triangulated.
#[derive(Debug, Clone, PartialEq)]
pub struct PairFailure {
    /// Position of the pair in the input.
    pub index: usize,
    pub error: DltError,
}

/// Output of [`Triangulator::triangulate`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TriangulationResult {
    /// One entry per input pair, in input order; `None` where the pair failed.
    pub points: Vec<Option<Pt3>>,
    /// Failed pairs in input order.
    pub failures: Vec<PairFailure>,
}

impl TriangulationResult {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Returns true if every pair was triangulated.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// All points, or the first failure as [`DltError::PairFailed`].
    pub fn into_points(self) -> Result<Vec<Pt3>, DltError> {
        if let Some(failure) = self.failures.into_iter().next() {
            return Err(DltError::PairFailed {
                index: failure.index,
                source: Box::new(failure.error),
            });
        }
        Ok(self.points.into_iter().flatten().collect())
    }
}

/// Build the `4 x 3` system `A x = b` for one stereo pair.
pub fn triangulation_system(
    first: &ProjectionMatrix,
    second: &ProjectionMatrix,
    pair: &StereoCorrespondence,
) -> (DMatrix<Real>, DVector<Real>) {
    let mut a = DMatrix::<Real>::zeros(4, 3);
    let mut b = DVector::<Real>::zeros(4);

    let views: [(&ProjectionMatrix, Pt2); 2] = [(first, pair.first), (second, pair.second)];
    for (cam, (p, uv)) in views.iter().enumerate() {
        let p = p.flat();
        for (axis, coord) in [uv.x, uv.y].into_iter().enumerate() {
            let row = 2 * cam + axis;
            let base = 4 * axis;
            for col in 0..3 {
                a[(row, col)] = p[base + col] - coord * p[8 + col];
            }
            b[row] = coord - p[base + 3];
        }
    }

    (a, b)
}

/// Triangulate one stereo pair from two projection matrices.
///
/// # Errors
///
/// [`DltError::SingularSystem`] if the two viewing rays are parallel or
/// coincide (e.g. the point lies on the baseline).
pub fn triangulate_linear(
    first: &ProjectionMatrix,
    second: &ProjectionMatrix,
    pair: &StereoCorrespondence,
    tol: Real,
) -> Result<Pt3, DltError> {
    let (a, b) = triangulation_system(first, second, pair);
    let sol = solve_normal_equations(&a, &b, tol)?;
    Ok(Pt3::new(sol.x[0], sol.x[1], sol.x[2]))
}

/// Recovers 3D points seen by two calibrated cameras.
///
/// Borrows both calibrators read-only; their calibration is checked when a
/// triangulation runs, not at construction.
///
/// # Example
///
/// ```
/// use dlt_core::synthetic::camera::{
///     correspondences, pinhole_projection, stereo_correspondences, volume_grid,
/// };
/// use dlt_core::{Mat3, Pt3, Vec3};
/// use dlt_linear::{Calibrator, Triangulator};
/// use nalgebra::Rotation3;
///
/// let k = Mat3::new(800.0, 0.0, 320.0, 0.0, 800.0, 240.0, 0.0, 0.0, 1.0);
/// let p1 = pinhole_projection(&k, &Mat3::identity(), &Vec3::new(0.0, 0.0, 5.0)).unwrap();
/// let r2 = *Rotation3::from_euler_angles(0.0, 0.3, 0.0).matrix();
/// let p2 = pinhole_projection(&k, &r2, &Vec3::new(-1.0, 0.0, 5.0)).unwrap();
///
/// let grid = volume_grid(3, 3, 2, 0.5);
/// let mut cam1 = Calibrator::new(correspondences(&p1, &grid)).unwrap();
/// let mut cam2 = Calibrator::new(correspondences(&p2, &grid)).unwrap();
/// cam1.calibrate().unwrap();
/// cam2.calibrate().unwrap();
///
/// let target = Pt3::new(0.1, -0.2, 0.4);
/// let pairs = stereo_correspondences(&p1, &p2, &[target]);
/// let tri = Triangulator::new(&cam1, &cam2, pairs).unwrap();
/// let points = tri.triangulate().unwrap().into_points().unwrap();
/// assert!((points[0] - target).norm() < 1e-6);
/// ```
#[derive(Debug, Clone)]
pub struct Triangulator<'a> {
    first: &'a Calibrator,
    second: &'a Calibrator,
    pairs: Vec<StereoCorrespondence>,
    options: TriangulationOptions,
}

impl<'a> Triangulator<'a> {
    /// Create a triangulator with default options.
    ///
    /// # Errors
    ///
    /// [`DltError::Input`] if a pair has a non-finite coordinate.
    pub fn new(
        first: &'a Calibrator,
        second: &'a Calibrator,
        pairs: Vec<StereoCorrespondence>,
    ) -> Result<Self, DltError> {
        Self::with_options(first, second, pairs, TriangulationOptions::default())
    }

    pub fn with_options(
        first: &'a Calibrator,
        second: &'a Calibrator,
        pairs: Vec<StereoCorrespondence>,
        options: TriangulationOptions,
    ) -> Result<Self, DltError> {
        validate_stereo_correspondences(&pairs)?;
        Ok(Self {
            first,
            second,
            pairs,
            options,
        })
    }

    /// The stereo pairs, in input order.
    pub fn pairs(&self) -> &[StereoCorrespondence] {
        &self.pairs
    }

    pub fn options(&self) -> &TriangulationOptions {
        &self.options
    }

    fn projections(&self) -> Result<(&'a ProjectionMatrix, &'a ProjectionMatrix), DltError> {
        Ok((self.first.projection()?, self.second.projection()?))
    }

    /// Triangulate a single pair with the two cameras' matrices.
    ///
    /// # Errors
    ///
    /// [`DltError::NotCalibrated`] if either camera has no projection matrix,
    /// [`DltError::SingularSystem`] for degenerate rays.
    pub fn triangulate_pair(&self, pair: &StereoCorrespondence) -> Result<Pt3, DltError> {
        let (p, q) = self.projections()?;
        triangulate_linear(p, q, pair, self.options.singular_tolerance)
    }

    /// Triangulate every pair, preserving input order.
    ///
    /// Failed pairs are handled according to
    /// [`TriangulationOptions::on_pair_failure`].
    ///
    /// # Errors
    ///
    /// [`DltError::NotCalibrated`] if either camera has no projection matrix;
    /// [`DltError::PairFailed`] for the first failed pair under
    /// [`PairFailurePolicy::Abort`].
    pub fn triangulate(&self) -> Result<TriangulationResult, DltError> {
        let (p, q) = self.projections()?;
        let tol = self.options.singular_tolerance;

        let mut result = TriangulationResult {
            points: Vec::with_capacity(self.pairs.len()),
            failures: Vec::new(),
        };
        for (index, pair) in self.pairs.iter().enumerate() {
            match triangulate_linear(p, q, pair, tol) {
                Ok(point) => result.points.push(Some(point)),
                Err(error) => {
                    warn!("stereo pair {index} failed: {error}");
                    if self.options.on_pair_failure == PairFailurePolicy::Abort {
                        return Err(DltError::PairFailed {
                            index,
                            source: Box::new(error),
                        });
                    }
                    result.points.push(None);
                    result.failures.push(PairFailure { index, error });
                }
            }
        }

        debug!(
            "triangulated {} of {} stereo pairs",
            result.len() - result.failures.len(),
            result.len()
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use dlt_core::synthetic::camera::{
        correspondences, pinhole_projection, project, stereo_correspondences, volume_grid,
    };
    use dlt_core::{InputError, Mat3, Mat34, Vec3};
    use nalgebra::Rotation3;

    fn camera(f: Real, cx: Real, cy: Real, rot: Rotation3<Real>, t: Vec3) -> Mat34 {
        let k = Mat3::new(f, 0.0, cx, 0.0, f, cy, 0.0, 0.0, 1.0);
        pinhole_projection(&k, rot.matrix(), &t).unwrap()
    }

    fn rig() -> (Mat34, Mat34) {
        let p1 = camera(
            900.0,
            640.0,
            360.0,
            Rotation3::from_euler_angles(0.1, -0.2, 0.05),
            Vec3::new(0.2, -0.1, 6.0),
        );
        let p2 = camera(
            880.0,
            600.0,
            350.0,
            Rotation3::from_euler_angles(-0.05, 0.35, 0.0),
            Vec3::new(-1.5, 0.1, 6.2),
        );
        (p1, p2)
    }

    fn calibrated(p: &Mat34) -> Calibrator {
        let mut cam = Calibrator::new(correspondences(p, &volume_grid(4, 3, 2, 0.4))).unwrap();
        cam.calibrate().unwrap();
        cam
    }

    fn targets() -> Vec<Pt3> {
        vec![
            Pt3::new(0.0, 0.0, 0.0),
            Pt3::new(0.35, -0.2, 0.6),
            Pt3::new(-0.4, 0.25, 0.1),
            Pt3::new(0.1, 0.45, 0.9),
        ]
    }

    #[test]
    fn system_rows_follow_projection_entries() {
        let params: [Real; 11] = std::array::from_fn(|i| i as Real + 1.0);
        let p = ProjectionMatrix::from_parameters(&params);
        let pair = StereoCorrespondence::from_row([2.0, 3.0, 0.0, 0.0]);
        let (a, b) = triangulation_system(&p, &p, &pair);

        assert_eq!(a.shape(), (4, 3));
        // p0 - u1 p8, with p0 = 1, p8 = 9.
        assert_eq!(a[(0, 0)], 1.0 - 2.0 * 9.0);
        assert_eq!(a[(1, 2)], 7.0 - 3.0 * 11.0);
        assert_eq!(b[0], 2.0 - 4.0);
        assert_eq!(b[1], 3.0 - 8.0);
        assert_eq!(a[(2, 1)], 2.0);
        assert_eq!(b[3], -8.0);
    }

    #[test]
    fn recovers_known_points() {
        let (p1, p2) = rig();
        let (cam1, cam2) = (calibrated(&p1), calibrated(&p2));
        let pairs = stereo_correspondences(&p1, &p2, &targets());
        let tri = Triangulator::new(&cam1, &cam2, pairs).unwrap();

        let result = tri.triangulate().unwrap();
        assert!(result.is_complete());
        for (est, gt) in result.points.iter().zip(targets()) {
            let est = est.expect("pair should triangulate");
            assert!((est - gt).norm() < 1e-8, "{est} vs {gt}");
        }
    }

    #[test]
    fn output_order_matches_input_order() {
        let (p1, p2) = rig();
        let (cam1, cam2) = (calibrated(&p1), calibrated(&p2));
        let mut world = targets();
        world.reverse();
        let pairs = stereo_correspondences(&p1, &p2, &world);
        let tri = Triangulator::new(&cam1, &cam2, pairs.clone()).unwrap();

        let points = tri.triangulate().unwrap().into_points().unwrap();
        assert_eq!(points.len(), world.len());
        for (i, (est, gt)) in points.iter().zip(&world).enumerate() {
            assert!((est - gt).norm() < 1e-8, "pair {i}");
            let single = tri.triangulate_pair(&pairs[i]).unwrap();
            assert!((single - est).norm() < 1e-12);
        }
    }

    #[test]
    fn empty_pair_set_gives_empty_result() {
        let (p1, p2) = rig();
        let (cam1, cam2) = (calibrated(&p1), calibrated(&p2));
        let result = Triangulator::new(&cam1, &cam2, Vec::new())
            .unwrap()
            .triangulate()
            .unwrap();
        assert!(result.is_empty());
        assert!(result.is_complete());
    }

    // Both rays through the epipoles run along the baseline.
    fn baseline_pair(p1: &Mat34, p2: &Mat34) -> StereoCorrespondence {
        let center = |p: &Mat34| {
            let p = ProjectionMatrix::from_matrix(*p).unwrap();
            p.camera_center().unwrap()
        };
        let (c1, c2) = (center(p1), center(p2));
        StereoCorrespondence::new(project(p1, &c2), project(p2, &c1))
    }

    #[test]
    fn degenerate_pair_is_skipped_and_reported() {
        let (p1, p2) = rig();
        let (cam1, cam2) = (calibrated(&p1), calibrated(&p2));
        let mut pairs = stereo_correspondences(&p1, &p2, &targets());
        pairs.insert(2, baseline_pair(&p1, &p2));

        let tri = Triangulator::new(&cam1, &cam2, pairs).unwrap();
        let result = tri.triangulate().unwrap();

        assert_eq!(result.len(), 5);
        assert!(result.points[2].is_none());
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].index, 2);
        assert_eq!(result.failures[0].error.kind(), ErrorKind::Numerical);
        for i in [0, 1, 3, 4] {
            assert!(result.points[i].is_some(), "pair {i} should survive");
        }

        let err = result.into_points().unwrap_err();
        assert!(matches!(err, DltError::PairFailed { index: 2, .. }), "{err}");
    }

    #[test]
    fn abort_policy_stops_at_first_failure() {
        let (p1, p2) = rig();
        let (cam1, cam2) = (calibrated(&p1), calibrated(&p2));
        let mut pairs = stereo_correspondences(&p1, &p2, &targets());
        pairs.insert(1, baseline_pair(&p1, &p2));

        let options = TriangulationOptions {
            on_pair_failure: PairFailurePolicy::Abort,
            ..Default::default()
        };
        let tri = Triangulator::with_options(&cam1, &cam2, pairs, options).unwrap();
        match tri.triangulate() {
            Err(DltError::PairFailed { index, source }) => {
                assert_eq!(index, 1);
                assert!(matches!(*source, DltError::SingularSystem { .. }));
            }
            other => panic!("expected pair failure, got {other:?}"),
        }
    }

    #[test]
    fn same_camera_twice_is_singular() {
        let (p1, _) = rig();
        let cam = calibrated(&p1);
        let pairs = stereo_correspondences(&p1, &p1, &targets()[..1]);
        let tri = Triangulator::new(&cam, &cam, pairs.clone()).unwrap();
        assert!(matches!(
            tri.triangulate_pair(&pairs[0]),
            Err(DltError::SingularSystem { .. })
        ));
    }

    #[test]
    fn uncalibrated_camera_fails_at_use_time() {
        let (p1, p2) = rig();
        let cam1 = calibrated(&p1);
        let cam2 = Calibrator::new(correspondences(&p2, &volume_grid(4, 3, 2, 0.4))).unwrap();
        let pairs = stereo_correspondences(&p1, &p2, &targets());

        let tri = Triangulator::new(&cam1, &cam2, pairs.clone()).unwrap();
        assert_eq!(tri.triangulate().unwrap_err(), DltError::NotCalibrated);
        assert_eq!(
            tri.triangulate_pair(&pairs[0]).unwrap_err().kind(),
            ErrorKind::State
        );
    }

    #[test]
    fn non_finite_pairs_are_rejected() {
        let (p1, p2) = rig();
        let (cam1, cam2) = (calibrated(&p1), calibrated(&p2));
        let mut pairs = stereo_correspondences(&p1, &p2, &targets());
        pairs[3].second.y = Real::NAN;
        let err = Triangulator::new(&cam1, &cam2, pairs).unwrap_err();
        assert_eq!(err, DltError::Input(InputError::NonFinite { index: 3 }));
    }

    #[test]
    fn options_deserialize_with_defaults() {
        let opts: TriangulationOptions =
            serde_json::from_str(r#"{ "on_pair_failure": "abort" }"#).unwrap();
        assert_eq!(opts.on_pair_failure, PairFailurePolicy::Abort);
        assert_eq!(opts.singular_tolerance, 1e-10);
    }
}
