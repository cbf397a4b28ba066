//! Iso-surface extraction with per-vertex confidence.
//!
//! Classic marching cubes over a [`VolumeGrid`]: every grid cell is
//! classified against the iso level, crossed edges receive interpolated
//! vertices and the cell's triangulation comes from the 256-case tables.
//! Vertices are deduplicated across neighboring cells through a canonical
//! per-edge key, so shared edges resolve to shared indices and closed fields
//! yield watertight meshes.
//!
//! Output coordinates stay in voxel-index space; axis order matches the
//! field's array axes. Alignment into the body frame happens later.

mod tables;

use std::collections::HashMap;

use nalgebra::Point3;

use crate::mesh::SurfaceMesh;
use crate::volume::VolumeGrid;
use tables::{CORNER_OFFSETS, EDGE_CORNERS, EDGE_TABLE, TRI_TABLE};

// ── Error type ───────────────────────────────────────────────────────────

/// The field never crosses the iso level, so no surface exists.
#[derive(Debug, Clone, PartialEq)]
pub struct EmptyMeshError {
    pub iso_level: f32,
}

impl std::fmt::Display for EmptyMeshError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "no iso-surface crossing at level {}: field is entirely on one side",
            self.iso_level
        )
    }
}

impl std::error::Error for EmptyMeshError {}

// ── Extraction ───────────────────────────────────────────────────────────

/// Canonical identity of a cell edge: base lattice point plus axis, shared
/// between the (up to four) cells touching that edge.
fn edge_key(x: usize, y: usize, z: usize, edge: usize) -> (usize, usize, usize, u8) {
    let [a, b] = EDGE_CORNERS[edge];
    let ca = CORNER_OFFSETS[a];
    let cb = CORNER_OFFSETS[b];
    let axis = if ca[0] != cb[0] {
        0
    } else if ca[1] != cb[1] {
        1
    } else {
        2
    };
    (
        x + ca[0].min(cb[0]),
        y + ca[1].min(cb[1]),
        z + ca[2].min(cb[2]),
        axis,
    )
}

/// Extract the iso-surface of `grid` at `iso_level`.
///
/// Per-vertex confidence is the larger of the two field samples bounding the
/// crossing edge, i.e. the strongest local evidence for the surface at that
/// vertex. Points near ambiguous voxels end up with confidence close to the
/// iso level and weigh less in the downstream surface fit.
pub fn extract_surface(grid: &VolumeGrid, iso_level: f32) -> Result<SurfaceMesh, EmptyMeshError> {
    let (nx, ny, nz) = grid.dims();
    let mut vertices: Vec<Point3<f64>> = Vec::new();
    let mut confidences: Vec<f32> = Vec::new();
    let mut triangles: Vec<[u32; 3]> = Vec::new();
    let mut edge_vertices: HashMap<(usize, usize, usize, u8), u32> = HashMap::new();

    if nx >= 2 && ny >= 2 && nz >= 2 {
        for x in 0..nx - 1 {
            for y in 0..ny - 1 {
                for z in 0..nz - 1 {
                    let mut case = 0usize;
                    let mut samples = [0.0f32; 8];
                    for (i, off) in CORNER_OFFSETS.iter().enumerate() {
                        let v = grid.value(x + off[0], y + off[1], z + off[2]);
                        samples[i] = v;
                        if v < iso_level {
                            case |= 1 << i;
                        }
                    }
                    if EDGE_TABLE[case] == 0 {
                        continue;
                    }

                    let row = &TRI_TABLE[case];
                    for tri in row.chunks(3).take_while(|c| c[0] >= 0) {
                        let mut ids = [0u32; 3];
                        for (k, &e) in tri.iter().enumerate() {
                            let e = e as usize;
                            let key = edge_key(x, y, z, e);
                            let next = vertices.len() as u32;
                            let id = *edge_vertices.entry(key).or_insert(next);
                            if id == next {
                                let (p, c) = interpolate_edge(x, y, z, e, &samples, iso_level);
                                vertices.push(p);
                                confidences.push(c);
                            }
                            ids[k] = id;
                        }
                        triangles.push(ids);
                    }
                }
            }
        }
    }

    if vertices.is_empty() {
        return Err(EmptyMeshError { iso_level });
    }

    Ok(SurfaceMesh {
        vertices,
        triangles,
        confidences,
    })
}

/// Linear interpolation along a crossed cell edge, plus the confidence
/// sample. The parameter runs from the edge's canonical base corner so that
/// every incident cell produces the identical vertex.
fn interpolate_edge(
    x: usize,
    y: usize,
    z: usize,
    edge: usize,
    samples: &[f32; 8],
    iso_level: f32,
) -> (Point3<f64>, f32) {
    let [a, b] = EDGE_CORNERS[edge];
    let ca = CORNER_OFFSETS[a];
    let cb = CORNER_OFFSETS[b];
    // Order endpoints canonically: base first.
    let (lo, hi) = if (ca[0], ca[1], ca[2]) <= (cb[0], cb[1], cb[2]) {
        (a, b)
    } else {
        (b, a)
    };
    let v1 = samples[lo] as f64;
    let v2 = samples[hi] as f64;
    let denom = v2 - v1;
    let t = if denom.abs() < 1e-12 {
        0.5
    } else {
        ((iso_level as f64 - v1) / denom).clamp(0.0, 1.0)
    };

    let p1 = CORNER_OFFSETS[lo];
    let p2 = CORNER_OFFSETS[hi];
    let point = Point3::new(
        (x + p1[0]) as f64 + t * (p2[0] as f64 - p1[0] as f64),
        (y + p1[1]) as f64 + t * (p2[1] as f64 - p1[1] as f64),
        (z + p1[2]) as f64 + t * (p2[2] as f64 - p1[2] as f64),
    );
    (point, samples[a].max(samples[b]))
}
