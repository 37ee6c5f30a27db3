//! Linear camera calibration and stereo triangulation.
//!
//! - [`Calibrator`] estimates a 3x4 [`ProjectionMatrix`] from at least six
//!   non-coplanar `(u, v) <-> (X, Y, Z)` correspondences with the Direct
//!   Linear Transformation, then projects and reprojects world points.
//! - [`Triangulator`] recovers `(X, Y, Z)` from matching pixels in two
//!   calibrated cameras.
//!
//! Both reduce to small overdetermined linear systems solved through the
//! normal equations ([`math::solve_normal_equations`]).

mod calibration;
mod error;
pub mod math;
mod projection;
mod triangulation;

pub use calibration::*;
pub use error::*;
pub use projection::*;
pub use triangulation::*;
