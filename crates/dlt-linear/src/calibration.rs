//! Single-camera DLT calibration.
//!
//! Each correspondence `(u, v, X, Y, Z)` contributes two rows to a linear
//! system in the 11 free entries of `P` (row-major, `P[2][3]` fixed to `1`):
//!
//! ```text
//! [X, Y, Z, 1, 0, 0, 0, 0, -uX, -uY, -uZ]   = u
//! [0, 0, 0, 0, X, Y, Z, 1, -vX, -vY, -vZ]   = v
//! ```
//!
//! obtained by cross-multiplying `u = (p0 X + p1 Y + p2 Z + p3) / λ` with
//! the denominator `λ = p8 X + p9 Y + p10 Z + 1`. The stacked `2n x 11`
//! system is solved with the normal equations.
//!
//! A [`Calibrator`] moves through an explicit [`CalibrationState`]: the
//! linear system is built once inside [`Calibrator::calibrate`] and kept with
//! the resulting matrix, so repeated calls return the memoized result.

use crate::math::{normalize_points_2d, normalize_points_3d, solve_normal_equations};
use crate::{DltError, ProjectionMatrix};
use dlt_core::{validate_correspondences, Correspondence, Mat3, Mat4, Pt2, Pt3, Real};
use log::{debug, trace, warn};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Options for [`Calibrator`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationOptions {
    /// Smallest accepted Cholesky pivot of the equilibrated `AᵗA`.
    pub singular_tolerance: Real,
    /// Hartley-normalize image and world points before building the system.
    pub normalize_points: bool,
}

impl Default for CalibrationOptions {
    fn default() -> Self {
        Self {
            singular_tolerance: 1e-10,
            normalize_points: false,
        }
    }
}

/// The stacked DLT system `A x = b` for one correspondence set.
#[derive(Debug, Clone, PartialEq)]
pub struct DltSystem {
    /// Coefficient matrix `A` (`2n x 11`).
    pub a: DMatrix<Real>,
    /// Right-hand side `b` (`2n`).
    pub b: DVector<Real>,
    /// Image / world conditioning transforms when the points were normalized.
    pub conditioning: Option<(Mat3, Mat4)>,
}

impl DltSystem {
    /// Build the system from raw correspondences.
    pub fn from_correspondences(points: &[Correspondence]) -> Self {
        let n = points.len();
        let mut a = DMatrix::<Real>::zeros(2 * n, ProjectionMatrix::NUM_PARAMETERS);
        let mut b = DVector::<Real>::zeros(2 * n);

        for (i, c) in points.iter().enumerate() {
            let (u, v) = (c.image.x, c.image.y);
            let (x, y, z) = (c.world.x, c.world.y, c.world.z);

            let r0 = 2 * i;
            let r1 = 2 * i + 1;

            a[(r0, 0)] = x;
            a[(r0, 1)] = y;
            a[(r0, 2)] = z;
            a[(r0, 3)] = 1.0;
            a[(r0, 8)] = -u * x;
            a[(r0, 9)] = -u * y;
            a[(r0, 10)] = -u * z;
            b[r0] = u;

            a[(r1, 4)] = x;
            a[(r1, 5)] = y;
            a[(r1, 6)] = z;
            a[(r1, 7)] = 1.0;
            a[(r1, 8)] = -v * x;
            a[(r1, 9)] = -v * y;
            a[(r1, 10)] = -v * z;
            b[r1] = v;
        }

        Self {
            a,
            b,
            conditioning: None,
        }
    }

    /// Build the system from Hartley-normalized correspondences.
    ///
    /// Returns `None` when either point set collapses to a single point.
    pub fn from_correspondences_normalized(points: &[Correspondence]) -> Option<Self> {
        let image: Vec<_> = points.iter().map(|c| c.image).collect();
        let world: Vec<_> = points.iter().map(|c| c.world).collect();
        let (image_n, t_image) = normalize_points_2d(&image)?;
        let (world_n, t_world) = normalize_points_3d(&world)?;

        let normalized: Vec<_> = image_n
            .into_iter()
            .zip(world_n)
            .map(|(uv, xyz)| Correspondence::new(uv, xyz))
            .collect();

        let mut system = Self::from_correspondences(&normalized);
        system.conditioning = Some((t_image, t_world));
        Some(system)
    }

    /// Solve the normal equations and map the solution back to a
    /// [`ProjectionMatrix`] in the original coordinates.
    fn solve(&self, tol: Real) -> Result<(ProjectionMatrix, Real), DltError> {
        let sol = solve_normal_equations(&self.a, &self.b, tol)?;
        let params: [Real; ProjectionMatrix::NUM_PARAMETERS] = std::array::from_fn(|i| sol.x[i]);
        let p = ProjectionMatrix::from_parameters(&params);

        let p = match &self.conditioning {
            None => p,
            Some((t_image, t_world)) => {
                let t_image_inv = t_image
                    .try_inverse()
                    .ok_or(DltError::SingularSystem { pivot: 0.0 })?;
                ProjectionMatrix::from_matrix(t_image_inv * p.matrix() * t_world)?
            }
        };
        Ok((p, sol.min_pivot))
    }
}

/// Reprojection of one calibration correspondence.
///
/// Pixel coordinates are truncated toward zero, matching pixel addressing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReprojectedPoint {
    pub u: i64,
    pub v: i64,
    pub world: Pt3,
}

/// Products of a successful calibration.
#[derive(Debug, Clone)]
pub struct Calibration {
    system: DltSystem,
    projection: ProjectionMatrix,
    min_pivot: Real,
    reprojection: Option<Vec<ReprojectedPoint>>,
}

impl Calibration {
    /// The memoized linear system.
    pub fn system(&self) -> &DltSystem {
        &self.system
    }

    /// The estimated projection matrix.
    pub fn projection(&self) -> &ProjectionMatrix {
        &self.projection
    }

    /// Smallest equilibrated pivot seen by the solver (conditioning indicator).
    pub fn min_pivot(&self) -> Real {
        self.min_pivot
    }
}

/// Lifecycle of a [`Calibrator`].
#[derive(Debug, Clone)]
pub enum CalibrationState {
    /// `calibrate` has not run.
    Uninitialized,
    /// `calibrate` succeeded.
    Calibrated(Calibration),
    /// `calibrate` failed; the error is replayed on later calls.
    Failed(DltError),
}

/// DLT calibrator for one camera.
///
/// # Example
///
/// ```
/// use dlt_core::synthetic::camera::{correspondences, pinhole_projection, volume_grid};
/// use dlt_core::{Mat3, Vec3};
/// use dlt_linear::Calibrator;
///
/// let k = Mat3::new(800.0, 0.0, 320.0, 0.0, 800.0, 240.0, 0.0, 0.0, 1.0);
/// let p = pinhole_projection(&k, &Mat3::identity(), &Vec3::new(0.1, 0.0, 5.0)).unwrap();
/// let points = correspondences(&p, &volume_grid(3, 3, 2, 0.5));
///
/// let mut cam = Calibrator::new(points).unwrap();
/// let estimated = cam.calibrate().unwrap();
/// assert!((estimated.matrix() - p).norm() < 1e-6);
/// ```
#[derive(Debug, Clone)]
pub struct Calibrator {
    points: Vec<Correspondence>,
    options: CalibrationOptions,
    state: CalibrationState,
}

impl Calibrator {
    /// Create a calibrator with default options.
    ///
    /// # Errors
    ///
    /// [`DltError::Input`] for empty input, fewer than six correspondences or
    /// non-finite coordinates.
    pub fn new(points: Vec<Correspondence>) -> Result<Self, DltError> {
        Self::with_options(points, CalibrationOptions::default())
    }

    pub fn with_options(
        points: Vec<Correspondence>,
        options: CalibrationOptions,
    ) -> Result<Self, DltError> {
        validate_correspondences(&points)?;
        Ok(Self {
            points,
            options,
            state: CalibrationState::Uninitialized,
        })
    }

    /// The calibration correspondences, in input order.
    pub fn points(&self) -> &[Correspondence] {
        &self.points
    }

    pub fn options(&self) -> &CalibrationOptions {
        &self.options
    }

    pub fn state(&self) -> &CalibrationState {
        &self.state
    }

    /// Estimate the projection matrix.
    ///
    /// The system is built and solved once; later calls return the memoized
    /// matrix (or replay the memoized failure).
    ///
    /// # Errors
    ///
    /// [`DltError::SingularSystem`] for degenerate configurations (e.g. all
    /// points coplanar), [`DltError::DegenerateNormalization`] when the
    /// conditioned solution cannot be rescaled to `P[2][3] = 1`.
    pub fn calibrate(&mut self) -> Result<ProjectionMatrix, DltError> {
        match &self.state {
            CalibrationState::Calibrated(cal) => return Ok(cal.projection),
            CalibrationState::Failed(err) => return Err(err.clone()),
            CalibrationState::Uninitialized => {}
        }

        let result = self.run();
        match result {
            Ok(cal) => {
                let p = cal.projection;
                debug!(
                    "calibrated from {} correspondences (min pivot {:.3e})",
                    self.points.len(),
                    cal.min_pivot
                );
                self.state = CalibrationState::Calibrated(cal);
                Ok(p)
            }
            Err(err) => {
                warn!("calibration failed: {err}");
                self.state = CalibrationState::Failed(err.clone());
                Err(err)
            }
        }
    }

    fn run(&self) -> Result<Calibration, DltError> {
        let system = if self.options.normalize_points {
            DltSystem::from_correspondences_normalized(&self.points)
                .ok_or(DltError::SingularSystem { pivot: 0.0 })?
        } else {
            DltSystem::from_correspondences(&self.points)
        };
        trace!("A = {}", system.a);
        trace!("b = {}", system.b);

        let (projection, min_pivot) = system.solve(self.options.singular_tolerance)?;
        Ok(Calibration {
            system,
            projection,
            min_pivot,
            reprojection: None,
        })
    }

    fn calibration(&self) -> Result<&Calibration, DltError> {
        match &self.state {
            CalibrationState::Calibrated(cal) => Ok(cal),
            _ => Err(DltError::NotCalibrated),
        }
    }

    /// The calibrated projection matrix.
    ///
    /// # Errors
    ///
    /// [`DltError::NotCalibrated`] before a successful [`Self::calibrate`].
    pub fn projection(&self) -> Result<&ProjectionMatrix, DltError> {
        Ok(&self.calibration()?.projection)
    }

    /// Forward-project a world point through the calibrated matrix.
    ///
    /// # Errors
    ///
    /// [`DltError::NotCalibrated`] before a successful [`Self::calibrate`].
    pub fn project(&self, world: &Pt3) -> Result<Pt2, DltError> {
        Ok(self.projection()?.project(world))
    }

    /// Reproject every calibration point, in input order.
    ///
    /// The result is kept for [`Self::reprojection_error`].
    ///
    /// # Errors
    ///
    /// [`DltError::NotCalibrated`] before a successful [`Self::calibrate`].
    pub fn reproject(&mut self) -> Result<&[ReprojectedPoint], DltError> {
        let CalibrationState::Calibrated(cal) = &mut self.state else {
            return Err(DltError::NotCalibrated);
        };

        let projection = cal.projection;
        let points = &self.points;
        let reprojection = cal.reprojection.get_or_insert_with(|| {
            points
                .iter()
                .map(|c| {
                    let uv = projection.project(&c.world);
                    ReprojectedPoint {
                        u: uv.x as i64,
                        v: uv.y as i64,
                        world: c.world,
                    }
                })
                .collect()
        });
        Ok(reprojection.as_slice())
    }

    /// The last reprojection, if [`Self::reproject`] has run.
    pub fn reprojection(&self) -> Option<&[ReprojectedPoint]> {
        match &self.state {
            CalibrationState::Calibrated(cal) => cal.reprojection.as_deref(),
            _ => None,
        }
    }

    /// Mean Euclidean pixel distance between observed and reprojected points.
    ///
    /// # Errors
    ///
    /// [`DltError::NotCalibrated`] before calibration,
    /// [`DltError::NotReprojected`] before [`Self::reproject`].
    pub fn reprojection_error(&self) -> Result<Real, DltError> {
        let cal = self.calibration()?;
        let reprojection = cal
            .reprojection
            .as_deref()
            .ok_or(DltError::NotReprojected)?;

        let total: Real = self
            .points
            .iter()
            .zip(reprojection)
            .map(|(c, r)| {
                let du = c.image.x - r.u as Real;
                let dv = c.image.y - r.v as Real;
                (du * du + dv * dv).sqrt()
            })
            .sum();
        Ok(total / self.points.len() as Real)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use dlt_core::synthetic::camera::{
        correspondences, correspondences_with_noise, pinhole_projection, visible_cube_corners,
    };
    use dlt_core::synthetic::noise::PixelNoise;
    use dlt_core::{InputError, Mat34, Vec2, Vec3};

    fn cube_camera() -> Mat34 {
        let k = Mat3::new(800.0, 0.0, 320.0, 0.0, 800.0, 240.0, 0.0, 0.0, 1.0);
        pinhole_projection(&k, &Mat3::identity(), &Vec3::new(0.0, 0.0, 4.0)).unwrap()
    }

    fn cube_points() -> Vec<Correspondence> {
        let corners = visible_cube_corners(&Pt3::new(0.25, 0.3, 0.5), 1.0);
        correspondences(&cube_camera(), &corners)
    }

    #[test]
    fn system_rows_follow_dlt_layout() {
        let c = Correspondence::from_row([10.0, 20.0, 1.0, 2.0, 3.0]);
        let sys = DltSystem::from_correspondences(&[c]);
        assert_eq!(sys.a.shape(), (2, 11));
        let row_u: Vec<Real> = sys.a.row(0).iter().copied().collect();
        let row_v: Vec<Real> = sys.a.row(1).iter().copied().collect();
        assert_eq!(
            row_u,
            vec![1.0, 2.0, 3.0, 1.0, 0.0, 0.0, 0.0, 0.0, -10.0, -20.0, -30.0]
        );
        assert_eq!(
            row_v,
            vec![0.0, 0.0, 0.0, 0.0, 1.0, 2.0, 3.0, 1.0, -20.0, -40.0, -60.0]
        );
        assert_eq!(sys.b.as_slice(), &[10.0, 20.0]);
        assert!(sys.conditioning.is_none());
    }

    #[test]
    fn cube_corners_recover_projection() {
        let p_gt = cube_camera();
        #[rustfmt::skip]
        let expected = Mat34::new(
            200.0, 0.0, 80.0, 320.0,
            0.0, 200.0, 60.0, 240.0,
            0.0, 0.0, 0.25, 1.0,
        );
        assert!((p_gt - expected).norm() < 1e-12);

        let mut cam = Calibrator::new(cube_points()).unwrap();
        let p = cam.calibrate().unwrap();
        let max_err = (p.matrix() - p_gt).amax();
        assert!(max_err < 1e-9, "projection error too large: {max_err}");
        assert_eq!(p.matrix()[(2, 3)], 1.0);
    }

    #[test]
    fn cube_corners_reproject_to_original_pixels() {
        let points = cube_points();
        let mut cam = Calibrator::new(points.clone()).unwrap();
        cam.calibrate().unwrap();

        for c in &points {
            let uv = cam.project(&c.world).unwrap();
            assert!((uv - c.image).norm() < 1e-8);
        }

        let reprojected = cam.reproject().unwrap().to_vec();
        assert_eq!(reprojected.len(), points.len());
        for (r, c) in reprojected.iter().zip(&points) {
            assert_eq!(r.u, c.image.x as i64);
            assert_eq!(r.v, c.image.y as i64);
            assert_eq!(r.world, c.world);
        }

        let err = cam.reprojection_error().unwrap();
        assert!(err < 1.0, "reprojection error {err}");
    }

    #[test]
    fn calibrate_is_memoized() {
        let mut cam = Calibrator::new(cube_points()).unwrap();
        let first = cam.calibrate().unwrap();
        let a_before = match cam.state() {
            CalibrationState::Calibrated(cal) => cal.system().a.clone(),
            other => panic!("unexpected state {other:?}"),
        };
        let second = cam.calibrate().unwrap();
        assert_eq!(first, second);
        match cam.state() {
            CalibrationState::Calibrated(cal) => {
                assert_eq!(cal.system().a, a_before);
                assert!(cal.min_pivot() > cam.options().singular_tolerance);
            }
            other => panic!("unexpected state {other:?}"),
        }
    }

    #[test]
    fn operations_before_calibration_are_state_errors() {
        let mut cam = Calibrator::new(cube_points()).unwrap();
        assert_eq!(
            cam.project(&Pt3::new(0.0, 0.0, 0.0)),
            Err(DltError::NotCalibrated)
        );
        assert_eq!(cam.reproject().unwrap_err(), DltError::NotCalibrated);
        assert_eq!(cam.reprojection_error(), Err(DltError::NotCalibrated));
        assert_eq!(cam.projection().unwrap_err().kind(), ErrorKind::State);
        assert!(cam.reprojection().is_none());
    }

    #[test]
    fn reprojection_error_requires_reproject() {
        let mut cam = Calibrator::new(cube_points()).unwrap();
        cam.calibrate().unwrap();
        assert_eq!(cam.reprojection_error(), Err(DltError::NotReprojected));
        cam.reproject().unwrap();
        assert!(cam.reprojection_error().is_ok());
    }

    #[test]
    fn five_points_are_rejected_at_construction() {
        let mut points = cube_points();
        points.pop();
        let err = Calibrator::new(points).unwrap_err();
        assert_eq!(
            err,
            DltError::Input(InputError::NotEnoughPoints {
                required: 6,
                got: 5,
            })
        );
        assert_eq!(err.kind(), ErrorKind::Input);
    }

    #[test]
    fn coplanar_points_fail_and_failure_is_replayed() {
        let p = cube_camera();
        let world: Vec<Pt3> = (0..4)
            .flat_map(|i| (0..3).map(move |j| Pt3::new(i as Real * 0.3, j as Real * 0.3, 0.0)))
            .collect();
        let mut cam = Calibrator::new(correspondences(&p, &world)).unwrap();

        let err = cam.calibrate().unwrap_err();
        assert!(matches!(err, DltError::SingularSystem { .. }), "{err}");
        assert_eq!(err.kind(), ErrorKind::Numerical);
        assert!(matches!(cam.state(), CalibrationState::Failed(_)));
        assert_eq!(cam.calibrate().unwrap_err(), err);
        assert_eq!(cam.projection().unwrap_err(), DltError::NotCalibrated);
    }

    #[test]
    fn tilted_plane_fails_on_pivot_with_or_without_noise() {
        let p = cube_camera();
        let world: Vec<Pt3> = (0..4)
            .flat_map(|i| (0..3).map(move |j| (i as Real * 0.3, j as Real * 0.3)))
            .map(|(x, y)| Pt3::new(x, y, 0.5 * x - 0.3 * y + 0.2))
            .collect();
        let noise = PixelNoise::new(21, 0.5);

        for points in [
            correspondences(&p, &world),
            correspondences_with_noise(&p, &world, &noise),
        ] {
            let mut cam = Calibrator::new(points).unwrap();
            match cam.calibrate() {
                Err(DltError::SingularSystem { pivot }) => {
                    assert!(pivot <= cam.options().singular_tolerance, "pivot {pivot}");
                }
                other => panic!("expected singular system, got {other:?}"),
            }
        }
    }

    #[test]
    fn fractional_pixels_are_truncated_toward_zero() {
        let mut points = cube_points();
        // Shift the image so some points land at negative u.
        for c in &mut points {
            c.image -= Vec2::new(364.9, 0.0);
        }
        let mut cam = Calibrator::new(points.clone()).unwrap();
        cam.calibrate().unwrap();
        let reprojected = cam.reproject().unwrap();
        assert_eq!(reprojected[0].u, 0);
        assert_eq!(reprojected[3].u, -8);
        assert!(points[3].image.x < -8.0 && points[3].image.x > -9.0);
    }
}
