//! Deterministic synthetic data generation helpers.
//!
//! This module provides small, reusable building blocks for constructing
//! synthetic calibration and stereo problems used in tests:
//! - ground-truth pinhole projection matrices,
//! - non-coplanar point sets (volume grids, cube corners),
//! - projection helpers producing [`crate::Correspondence`] and
//!   [`crate::StereoCorrespondence`] records,
//! - seeded pixel noise applied to correspondence records.
//!
//! # Example
//!
//! ```
//! use dlt_core::synthetic::{camera, noise::PixelNoise};
//! use dlt_core::{Mat3, Vec3};
//!
//! let k = Mat3::new(800.0, 0.0, 320.0, 0.0, 800.0, 240.0, 0.0, 0.0, 1.0);
//! let p = camera::pinhole_projection(&k, &Mat3::identity(), &Vec3::new(0.0, 0.0, 4.0)).unwrap();
//! assert_eq!(p[(2, 3)], 1.0);
//!
//! let world = camera::volume_grid(4, 3, 2, 0.4);
//! let corrs = camera::correspondences_with_noise(&p, &world, &PixelNoise::new(7, 0.5));
//! assert_eq!(corrs.len(), 24);
//! ```

pub mod camera;
pub mod noise;
