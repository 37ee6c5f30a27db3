//! Seeded pixel perturbation of correspondence records.
//!
//! Only image coordinates are perturbed; world points stay exact, matching a
//! calibration target whose geometry is known but whose detections are not.

use crate::{Correspondence, Pt2, Real, StereoCorrespondence};
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Uniform per-axis pixel noise in `[-max_abs_px, max_abs_px]`.
///
/// The same seed always yields the same perturbation for the same input
/// length. Use different seeds for different cameras.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PixelNoise {
    pub seed: u64,
    /// Maximum absolute offset per axis (pixels).
    pub max_abs_px: Real,
}

impl PixelNoise {
    pub fn new(seed: u64, max_abs_px: Real) -> Self {
        Self { seed, max_abs_px }
    }

    fn jitter(&self, rng: &mut StdRng, uv: &mut Pt2) {
        let m = self.max_abs_px.abs();
        uv.x += rng.random_range(-m..=m);
        uv.y += rng.random_range(-m..=m);
    }

    /// Offset the image point of every correspondence, in order.
    pub fn perturb(&self, points: &mut [Correspondence]) {
        if self.max_abs_px == 0.0 {
            return;
        }
        let mut rng = StdRng::seed_from_u64(self.seed);
        for c in points {
            self.jitter(&mut rng, &mut c.image);
        }
    }

    /// Offset both image points of every stereo pair, in order.
    pub fn perturb_stereo(&self, pairs: &mut [StereoCorrespondence]) {
        if self.max_abs_px == 0.0 {
            return;
        }
        let mut rng = StdRng::seed_from_u64(self.seed);
        for pair in pairs {
            self.jitter(&mut rng, &mut pair.first);
            self.jitter(&mut rng, &mut pair.second);
        }
    }
}
