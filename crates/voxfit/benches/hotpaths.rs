use std::f64::consts::PI;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use nalgebra::Point3;
use ndarray::{Array2, Array3, Array4};

use voxfit::body::{DeformableModel, LbsModel};
use voxfit::fit::{fit_to_surface, FitConfig};
use voxfit::marching::extract_surface;
use voxfit::volume::{foreground_probability, VolumeGrid};

fn make_ball_field(n: usize) -> VolumeGrid {
    let mut data = Array3::zeros((n, n, n));
    let c = (n as f32 - 1.0) * 0.5;
    let r = n as f32 * 0.35;

    // Soft occupancy with gentle deterministic texture to emulate network output.
    for ((x, y, z), v) in data.indexed_iter_mut() {
        let dx = x as f32 - c;
        let dy = y as f32 - c;
        let dz = z as f32 - c;
        let d = (dx * dx + dy * dy + dz * dz).sqrt();
        let soft = 1.0 / (1.0 + ((d - r) * 1.5).exp());
        let texture = 0.02 * ((x as f32 * 0.31).sin() + (z as f32 * 0.17).cos());
        *v = (soft + texture).clamp(0.0, 1.0);
    }

    VolumeGrid::new(data)
}

fn bench_surface_extraction(c: &mut Criterion) {
    let ball_64 = make_ball_field(64);
    let ball_128 = make_ball_field(128);

    c.bench_function("extract_surface_64", |b| {
        b.iter(|| {
            let mesh = extract_surface(black_box(&ball_64), black_box(0.5))
                .expect("ball fixture always crosses the iso level");
            black_box(mesh.vertices.len())
        })
    });

    c.bench_function("extract_surface_128", |b| {
        b.iter(|| {
            let mesh = extract_surface(black_box(&ball_128), black_box(0.5))
                .expect("ball fixture always crosses the iso level");
            black_box(mesh.vertices.len())
        })
    });
}

fn make_part_logits(n: usize, channels: usize) -> Array4<f32> {
    let mut logits = Array4::zeros((channels, n, n, n));
    let c = (n as f32 - 1.0) * 0.5;
    let r = n as f32 * 0.3;

    for x in 0..n {
        for y in 0..n {
            for z in 0..n {
                let dx = x as f32 - c;
                let dy = y as f32 - c;
                let dz = z as f32 - c;
                if (dx * dx + dy * dy + dz * dz).sqrt() < r {
                    let part = 1 + (x + y + z) % (channels - 1);
                    logits[[part, x, y, z]] = 6.0;
                } else {
                    logits[[0, x, y, z]] = 6.0;
                }
            }
        }
    }

    logits
}

fn bench_foreground_collapse(c: &mut Criterion) {
    let n = 64;
    let logits = make_part_logits(n, 7);

    c.bench_function("foreground_collapse_64_c7", |b| {
        b.iter(|| {
            let field = foreground_probability(black_box(&logits));
            black_box(field[[n / 2, n / 2, n / 2]])
        })
    });
}

/// Articulated tube: four joints stacked along +y, three vertex rings per bone.
fn make_limb_model() -> LbsModel {
    let joints = 4usize;
    let rings_per_joint = 3usize;
    let ring_len = 16usize;
    let v = joints * rings_per_joint * ring_len;

    let mut template = Vec::with_capacity(v);
    let mut weights = Array2::zeros((v, joints));
    let mut joint_regressor = Array2::zeros((joints, v));
    let mut shape_dirs = Array3::zeros((v, 3, 2));

    for j in 0..joints {
        for ring in 0..rings_per_joint {
            let y = j as f64 * 0.5 + ring as f64 * 0.5 / rings_per_joint as f64;
            for k in 0..ring_len {
                let i = (j * rings_per_joint + ring) * ring_len + k;
                let a = 2.0 * PI * k as f64 / ring_len as f64;
                let px = 0.12 * a.cos();
                let pz = 0.12 * a.sin();
                template.push(Point3::new(px, y, pz));
                weights[[i, j]] = 1.0;
                // Direction 0 lengthens the limb, direction 1 thickens it.
                shape_dirs[[i, 1, 0]] = y;
                shape_dirs[[i, 0, 1]] = px;
                shape_dirs[[i, 2, 1]] = pz;
            }
        }
    }
    for j in 0..joints {
        for k in 0..ring_len {
            joint_regressor[[j, (j * rings_per_joint) * ring_len + k]] = 1.0 / ring_len as f64;
        }
    }

    let mut faces = Vec::new();
    let total_rings = (joints * rings_per_joint) as u32;
    let ring_len = ring_len as u32;
    for ring in 0..total_rings - 1 {
        for k in 0..ring_len {
            let a = ring * ring_len + k;
            let b = ring * ring_len + (k + 1) % ring_len;
            let c = (ring + 1) * ring_len + k;
            let d = (ring + 1) * ring_len + (k + 1) % ring_len;
            faces.push([a, b, c]);
            faces.push([b, d, c]);
        }
    }

    LbsModel::from_parts(
        template,
        shape_dirs,
        joint_regressor,
        vec![0, 0, 1, 2],
        weights,
        faces,
    )
    .expect("limb fixture is well-formed")
}

fn bench_surface_fit(c: &mut Criterion) {
    let rest = make_limb_model();

    let mut bent = rest.clone();
    let mut pose = bent.pose().to_vec();
    pose[3] = 0.4;
    pose[6] = -0.3;
    bent.set_pose(&pose);
    bent.set_shape(&[0.2, -0.1]);
    let targets = bent.vertices();
    let confidences = vec![1.0f32; targets.len()];

    let mut config = FitConfig {
        outer_iterations: 2,
        joint_weight: 0.0,
        ..FitConfig::default()
    };
    config.solver.max_iterations = 15;

    c.bench_function("surface_fit_192v_2rounds", |b| {
        b.iter(|| {
            let mut model = rest.clone();
            let report = fit_to_surface(
                &mut model,
                black_box(&targets),
                black_box(&confidences),
                black_box(&config),
            );
            black_box(report.final_cost)
        })
    });
}

criterion_group!(
    hotpaths,
    bench_surface_extraction,
    bench_foreground_collapse,
    bench_surface_fit
);
criterion_main!(hotpaths);
