//! Core math and data primitives for `stereo-dlt`.
//!
//! This crate contains:
//! - linear algebra type aliases (`Real`, `Pt2`, `Pt3`, `Mat34`, ...),
//! - input records for calibration (`u, v, X, Y, Z`) and stereo
//!   (`u1, v1, u2, v2`) correspondences, with their validation,
//! - deterministic synthetic cameras, point sets and pixel noise.
//!
//! Projection model:
//! `(u, v) = ((p0 X + p1 Y + p2 Z + p3) / λ, (p4 X + p5 Y + p6 Z + p7) / λ)`
//! with `λ = p8 X + p9 Y + p10 Z + 1`.

/// Linear algebra type aliases and helpers.
pub mod math;
/// Deterministic synthetic data for tests.
pub mod synthetic;
/// Correspondence records and input validation.
pub mod types;

pub use math::*;
pub use types::*;
