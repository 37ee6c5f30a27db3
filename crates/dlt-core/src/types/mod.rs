//! Input records for calibration and triangulation.

mod observation;

pub use observation::*;
