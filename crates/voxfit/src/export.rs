//! Mesh and parameter export.
//!
//! One pipeline run produces four Wavefront OBJ files (reference, initial
//! fit, final fit, raw iso-surface) and a JSON parameter bundle whose layout
//! follows the historical record format: `gt` / `initial` / `final` blocks
//! with `pose`, `betas`, `vertices`, `joints3D`, plus an `mcubes` block for
//! the extracted surface.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use nalgebra::Point3;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::pipeline::{FitOutcome, ModelSnapshot};

// ── OBJ ─────────────────────────────────────────────────────────────────────

/// Emit vertices and 1-indexed triangular faces as Wavefront OBJ.
pub fn write_obj<W: Write>(
    out: &mut W,
    vertices: &[Point3<f64>],
    triangles: &[[u32; 3]],
) -> io::Result<()> {
    for v in vertices {
        writeln!(out, "v {} {} {}", v.x, v.y, v.z)?;
    }
    for t in triangles {
        writeln!(out, "f {} {} {}", t[0] + 1, t[1] + 1, t[2] + 1)?;
    }
    Ok(())
}

pub fn write_obj_file(
    path: &Path,
    vertices: &[Point3<f64>],
    triangles: &[[u32; 3]],
) -> io::Result<()> {
    let file = fs::File::create(path)?;
    let mut out = io::BufWriter::new(file);
    write_obj(&mut out, vertices, triangles)?;
    out.flush()
}

// ── Parameter bundle ────────────────────────────────────────────────────────

/// One model state in the bundle's historical naming.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotParams {
    pub pose: Vec<f64>,
    pub betas: Vec<f64>,
    pub vertices: Vec<Point3<f64>>,
    #[serde(rename = "joints3D")]
    pub joints_3d: Vec<Point3<f64>>,
}

impl From<&ModelSnapshot> for SnapshotParams {
    fn from(snapshot: &ModelSnapshot) -> Self {
        Self {
            pose: snapshot.pose.clone(),
            betas: snapshot.shape.clone(),
            vertices: snapshot.vertices.clone(),
            joints_3d: snapshot.joints.clone(),
        }
    }
}

/// The extracted iso-surface block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshParams {
    pub vertices: Vec<Point3<f64>>,
    pub triangles: Vec<[u32; 3]>,
    pub values: Vec<f32>,
}

/// Full parameter record for one sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamsBundle {
    pub gt: SnapshotParams,
    pub initial: SnapshotParams,
    #[serde(rename = "final")]
    pub fitted: SnapshotParams,
    pub mcubes: MeshParams,
}

impl ParamsBundle {
    pub fn from_outcome(outcome: &FitOutcome) -> Self {
        Self {
            gt: SnapshotParams::from(&outcome.reference),
            initial: SnapshotParams::from(&outcome.initial),
            fitted: SnapshotParams::from(&outcome.fitted),
            mcubes: MeshParams {
                vertices: outcome.mesh.vertices.clone(),
                triangles: outcome.mesh.triangles.clone(),
                values: outcome.mesh.confidences.clone(),
            },
        }
    }
}

// ── Bundle writing ──────────────────────────────────────────────────────────

/// Write the four OBJ meshes and the parameter bundle for one sample.
///
/// Files land in `dir` as `{stem}_gt.obj`, `{stem}_initial.obj`,
/// `{stem}_final.obj`, `{stem}_mcubes.obj` and `{stem}_params.json`.
/// `model_faces` is the reference model's triangle list, shared by the three
/// model meshes.
pub fn write_outcome(
    dir: &Path,
    stem: &str,
    outcome: &FitOutcome,
    model_faces: &[[u32; 3]],
) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    write_obj_file(
        &dir.join(format!("{stem}_gt.obj")),
        &outcome.reference.vertices,
        model_faces,
    )?;
    write_obj_file(
        &dir.join(format!("{stem}_initial.obj")),
        &outcome.initial.vertices,
        model_faces,
    )?;
    write_obj_file(
        &dir.join(format!("{stem}_final.obj")),
        &outcome.fitted.vertices,
        model_faces,
    )?;
    write_obj_file(
        &dir.join(format!("{stem}_mcubes.obj")),
        &outcome.mesh.vertices,
        &outcome.mesh.triangles,
    )?;

    let bundle = ParamsBundle::from_outcome(outcome);
    let json = serde_json::to_string_pretty(&bundle)?;
    fs::write(dir.join(format!("{stem}_params.json")), json)?;
    info!("wrote meshes and parameters to {}", dir.display());
    Ok(())
}
