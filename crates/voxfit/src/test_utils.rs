//! Shared synthetic fixtures for volume, mesh and body-model tests.

use nalgebra::Point3;
use ndarray::{Array2, Array3};

use crate::body::LbsModel;

/// Signed-distance-style sphere field: positive inside, zero on the surface.
pub(crate) fn sphere_field(n: usize, center: f64, radius: f64) -> Array3<f32> {
    let mut field = Array3::zeros((n, n, n));
    for ((x, y, z), v) in field.indexed_iter_mut() {
        let d = ((x as f64 - center).powi(2)
            + (y as f64 - center).powi(2)
            + (z as f64 - center).powi(2))
        .sqrt();
        *v = (radius - d) as f32;
    }
    field
}

/// Binary occupancy cube covering `[lo, hi)` on every axis.
pub(crate) fn cube_field(n: usize, lo: usize, hi: usize) -> Array3<f32> {
    let mut field = Array3::zeros((n, n, n));
    for ((x, y, z), v) in field.indexed_iter_mut() {
        if (lo..hi).contains(&x) && (lo..hi).contains(&y) && (lo..hi).contains(&z) {
            *v = 1.0;
        }
    }
    field
}

/// Three-joint articulated chain with an eight-vertex ring around each
/// joint, rigidly skinned.
///
/// Shape coefficient 0 elongates the chain (rest joints move with it),
/// coefficient 1 inflates the ring radius (rest joints stay put). Every pose
/// and shape parameter is observable from the surface, which makes the
/// model a complete fixture for the fitting stages.
pub(crate) fn chain_model() -> LbsModel {
    let joint_y = [0.0, 0.5, 1.0];
    let ring_radius = 0.1;
    let mut template = Vec::new();
    for &y in &joint_y {
        for k in 0..8 {
            let theta = k as f64 * std::f64::consts::FRAC_PI_4;
            template.push(Point3::new(
                ring_radius * theta.cos(),
                y,
                ring_radius * theta.sin(),
            ));
        }
    }
    let v = template.len();

    let mut shape_dirs = Array3::zeros((v, 3, 2));
    for (i, p) in template.iter().enumerate() {
        shape_dirs[[i, 1, 0]] = p.y;
        shape_dirs[[i, 0, 1]] = p.x;
        shape_dirs[[i, 2, 1]] = p.z;
    }

    let mut joint_regressor = Array2::zeros((3, v));
    let mut weights = Array2::zeros((v, 3));
    for j in 0..3 {
        for k in 0..8 {
            let i = 8 * j + k;
            joint_regressor[[j, i]] = 1.0 / 8.0;
            weights[[i, j]] = 1.0;
        }
    }

    // Quad strips between consecutive rings, split into triangles.
    let mut faces = Vec::new();
    for ring in 0..2u32 {
        for k in 0..8u32 {
            let a = ring * 8 + k;
            let b = ring * 8 + (k + 1) % 8;
            let c = (ring + 1) * 8 + k;
            let d = (ring + 1) * 8 + (k + 1) % 8;
            faces.push([a, b, c]);
            faces.push([b, d, c]);
        }
    }

    LbsModel::from_parts(
        template,
        shape_dirs,
        joint_regressor,
        vec![0, 0, 1],
        weights,
        faces,
    )
    .expect("chain model data is well-formed")
}
