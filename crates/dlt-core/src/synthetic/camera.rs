//! Synthetic pinhole cameras and point sets.
//!
//! Projection matrices produced here follow the same normalization as the
//! calibrated ones: the bottom-right entry `P[2][3]` is scaled to `1`.

use super::noise::PixelNoise;
use crate::{
    to_homogeneous_3d, Correspondence, Mat3, Mat34, Pt2, Pt3, Real, StereoCorrespondence, Vec3,
};

/// Build `P = K [R | t]` scaled so that `P[2][3] = 1`.
///
/// Returns `None` when `K t` has a (near) zero third component, i.e. the
/// world origin lies on the camera's principal plane and the normalization
/// is undefined.
pub fn pinhole_projection(k: &Mat3, rotation: &Mat3, translation: &Vec3) -> Option<Mat34> {
    let mut p = Mat34::zeros();
    p.fixed_view_mut::<3, 3>(0, 0).copy_from(&(k * rotation));
    p.set_column(3, &(k * translation));

    let scale = p[(2, 3)];
    if scale.abs() <= Real::EPSILON {
        return None;
    }
    Some(p / scale)
}

/// Project a world point through `p` (no checks on the depth denominator).
pub fn project(p: &Mat34, world: &Pt3) -> Pt2 {
    let x = p * to_homogeneous_3d(world);
    Pt2::new(x.x / x.z, x.y / x.z)
}

/// Generate a non-coplanar `nx * ny * nz` grid centred in X/Y, starting at Z=0.
///
/// Points are ordered deterministically with X varying fastest, then Y, then Z.
pub fn volume_grid(nx: usize, ny: usize, nz: usize, spacing: Real) -> Vec<Pt3> {
    let half_x = nx.saturating_sub(1) as Real * spacing * 0.5;
    let half_y = ny.saturating_sub(1) as Real * spacing * 0.5;
    let mut points = Vec::with_capacity(nx * ny * nz);
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                points.push(Pt3::new(
                    i as Real * spacing - half_x,
                    j as Real * spacing - half_y,
                    k as Real * spacing,
                ));
            }
        }
    }
    points
}

/// The six cube corners visible from a camera looking down +Z at the cube.
///
/// `origin` is the corner closest to the camera; the cube extends by `side`
/// along +X, +Y and +Z. Order: origin, +X, +Y, +Z, +X+Y, +X+Z.
pub fn visible_cube_corners(origin: &Pt3, side: Real) -> [Pt3; 6] {
    let offsets = [
        (0.0, 0.0, 0.0),
        (1.0, 0.0, 0.0),
        (0.0, 1.0, 0.0),
        (0.0, 0.0, 1.0),
        (1.0, 1.0, 0.0),
        (1.0, 0.0, 1.0),
    ];
    offsets.map(|(dx, dy, dz)| {
        Pt3::new(
            origin.x + dx * side,
            origin.y + dy * side,
            origin.z + dz * side,
        )
    })
}

/// Project every world point through `p`, keeping input order.
pub fn correspondences(p: &Mat34, world: &[Pt3]) -> Vec<Correspondence> {
    world
        .iter()
        .map(|pw| Correspondence::new(project(p, pw), *pw))
        .collect()
}

/// Project every world point through `p` and perturb the pixels.
pub fn correspondences_with_noise(
    p: &Mat34,
    world: &[Pt3],
    noise: &PixelNoise,
) -> Vec<Correspondence> {
    let mut points = correspondences(p, world);
    noise.perturb(&mut points);
    points
}

/// Project every world point into both cameras.
pub fn stereo_correspondences(p1: &Mat34, p2: &Mat34, world: &[Pt3]) -> Vec<StereoCorrespondence> {
    world
        .iter()
        .map(|pw| StereoCorrespondence::new(project(p1, pw), project(p2, pw)))
        .collect()
}
