//! Voxel-to-model coordinate alignment.
//!
//! The iso-surface comes out of [`crate::marching`] in voxel index units.
//! Before fitting it has to land in the frame of the reference body model.
//! The mapping is derived from three pieces of evidence: where the
//! ground-truth occupancy sits inside the grid (padding), how large the
//! subject appears in the 2D segmentation (scale), and the bounding box of
//! the reference model's posed vertices (destination frame). The scale goes
//! through an empirically tuned snapping step that is reproduced verbatim;
//! do not simplify it.

use std::fmt;

use image::GrayImage;
use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::mesh::SurfaceMesh;
use crate::volume::VolumeGrid;

/// Occupancy above this value counts as evidence for padding.
const OCCUPANCY_THRESHOLD: f32 = 0.5;

// ── Errors ──────────────────────────────────────────────────────────────────

/// Alignment cannot be derived from degenerate evidence.
#[derive(Debug, Clone)]
pub enum AlignmentError {
    /// No ground-truth voxel above the occupancy threshold.
    EmptyOccupancy,
    /// The segmentation mask has no foreground pixel.
    EmptySegmentation,
    /// The reference model supplied no vertices.
    EmptyModel,
    /// The model bounding box collapses along one axis.
    DegenerateExtent { axis: usize },
}

impl fmt::Display for AlignmentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyOccupancy => {
                write!(f, "no occupied voxel above {OCCUPANCY_THRESHOLD} in the ground truth")
            }
            Self::EmptySegmentation => write!(f, "segmentation mask has no foreground pixel"),
            Self::EmptyModel => write!(f, "reference model has no vertices"),
            Self::DegenerateExtent { axis } => {
                write!(f, "model bounding box is flat along axis {axis}")
            }
        }
    }
}

impl std::error::Error for AlignmentError {}

// ── Alignment ───────────────────────────────────────────────────────────────

/// Affine mapping between voxel index space and the model frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoxelAlignment {
    /// Componentwise minimum occupied voxel index of the ground truth.
    pub padding: [usize; 3],
    /// Largest normalized extent of the 2D segmentation bounding box.
    pub raw_scale: f64,
    /// Per-axis scale after snapping against the tight voxel extent.
    pub scale: Vector3<f64>,
    /// Model bounding box minimum corner.
    pub bbox_min: Point3<f64>,
    /// Model bounding box extent (max − min).
    pub bbox_extent: Vector3<f64>,
    /// Largest component of the extent.
    pub bbox_scale: f64,
    /// Cubic grid edge length.
    pub resolution: f64,
}

impl VoxelAlignment {
    /// Derive the alignment from ground-truth occupancy, the 2D segmentation
    /// mask and the reference model's posed vertices.
    pub fn derive(
        occupancy: &VolumeGrid,
        mask: &GrayImage,
        model_vertices: &[Point3<f64>],
    ) -> Result<Self, AlignmentError> {
        let padding = occupancy
            .occupied_min_index(OCCUPANCY_THRESHOLD)
            .ok_or(AlignmentError::EmptyOccupancy)?;
        let resolution = occupancy.resolution() as f64;

        let (mask_min, mask_max) = mask_bounds(mask).ok_or(AlignmentError::EmptySegmentation)?;
        let span_x = (mask_max.0 - mask_min.0 + 1) as f64;
        let span_y = (mask_max.1 - mask_min.1 + 1) as f64;
        let raw_scale = (span_x / resolution).max(span_y / resolution);

        let (bbox_min, bbox_max) = vertex_bounds(model_vertices).ok_or(AlignmentError::EmptyModel)?;
        let bbox_extent = bbox_max - bbox_min;
        let bbox_scale = bbox_extent.max();

        // Tight voxel extent of the model box, then the snapped per-axis
        // scale round(raw * tight) / tight. Reproduced from the original
        // calibration; the rounding is intentional.
        let mut scale = Vector3::zeros();
        for axis in 0..3 {
            let tight = (resolution * bbox_extent[axis] / bbox_scale).round();
            if tight <= 0.0 {
                return Err(AlignmentError::DegenerateExtent { axis });
            }
            scale[axis] = (raw_scale * tight).round() / tight;
        }

        Ok(Self {
            padding,
            raw_scale,
            scale,
            bbox_min,
            bbox_extent,
            bbox_scale,
            resolution,
        })
    }

    /// Map a point from voxel index space into the model frame.
    pub fn to_model_frame(&self, p: &Point3<f64>) -> Point3<f64> {
        let mut out = Point3::origin();
        for axis in 0..3 {
            let centred = (p[axis] - self.padding[axis] as f64) / self.scale[axis];
            out[axis] = centred / self.resolution * self.bbox_scale + self.bbox_min[axis];
        }
        out
    }

    /// Map a point from the model frame back into voxel index space.
    pub fn to_voxel_frame(&self, p: &Point3<f64>) -> Point3<f64> {
        let mut out = Point3::origin();
        for axis in 0..3 {
            let normalized = (p[axis] - self.bbox_min[axis]) / self.bbox_scale * self.resolution;
            out[axis] = normalized * self.scale[axis] + self.padding[axis] as f64;
        }
        out
    }

    /// Rewrite every mesh vertex into the model frame. Triangles and
    /// confidences are untouched.
    pub fn apply(&self, mesh: &mut SurfaceMesh) {
        for v in &mut mesh.vertices {
            *v = self.to_model_frame(v);
        }
        debug!(
            "aligned {} vertices (padding {:?}, scale [{:.4}, {:.4}, {:.4}])",
            mesh.vertices.len(),
            self.padding,
            self.scale.x,
            self.scale.y,
            self.scale.z
        );
    }
}

fn mask_bounds(mask: &GrayImage) -> Option<((u32, u32), (u32, u32))> {
    let mut bounds: Option<((u32, u32), (u32, u32))> = None;
    for (x, y, pixel) in mask.enumerate_pixels() {
        if pixel.0[0] == 0 {
            continue;
        }
        match &mut bounds {
            Some((min, max)) => {
                min.0 = min.0.min(x);
                min.1 = min.1.min(y);
                max.0 = max.0.max(x);
                max.1 = max.1.max(y);
            }
            None => bounds = Some(((x, y), (x, y))),
        }
    }
    bounds
}

fn vertex_bounds(vertices: &[Point3<f64>]) -> Option<(Point3<f64>, Point3<f64>)> {
    let first = *vertices.first()?;
    let mut min = first;
    let mut max = first;
    for v in &vertices[1..] {
        for axis in 0..3 {
            min[axis] = min[axis].min(v[axis]);
            max[axis] = max[axis].max(v[axis]);
        }
    }
    Some((min, max))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use ndarray::Array3;

    fn cube_occupancy(n: usize, lo: usize, hi: usize) -> VolumeGrid {
        let mut data = Array3::<f32>::zeros((n, n, n));
        for x in lo..hi {
            for y in lo..hi {
                for z in lo..hi {
                    data[[x, y, z]] = 1.0;
                }
            }
        }
        VolumeGrid::new(data)
    }

    fn filled_mask(w: u32, h: u32) -> GrayImage {
        GrayImage::from_pixel(w, h, image::Luma([255]))
    }

    fn box_vertices(min: [f64; 3], max: [f64; 3]) -> Vec<Point3<f64>> {
        let mut verts = Vec::new();
        for &x in &[min[0], max[0]] {
            for &y in &[min[1], max[1]] {
                for &z in &[min[2], max[2]] {
                    verts.push(Point3::new(x, y, z));
                }
            }
        }
        verts
    }

    #[test]
    fn full_frame_mask_gives_unit_raw_scale() {
        let occupancy = cube_occupancy(128, 32, 96);
        let mask = filled_mask(128, 128);
        let verts = box_vertices([-0.4, -0.9, -0.2], [0.4, 0.9, 0.2]);
        let alignment = VoxelAlignment::derive(&occupancy, &mask, &verts).unwrap();
        assert_eq!(alignment.raw_scale, 1.0);
    }

    #[test]
    fn padding_is_the_minimum_occupied_corner() {
        let occupancy = cube_occupancy(128, 32, 96);
        let mask = filled_mask(128, 128);
        let verts = box_vertices([-0.4, -0.9, -0.2], [0.4, 0.9, 0.2]);
        let alignment = VoxelAlignment::derive(&occupancy, &mask, &verts).unwrap();
        assert_eq!(alignment.padding, [32, 32, 32]);
    }

    #[test]
    fn scale_snaps_against_the_tight_voxel_extent() {
        let occupancy = cube_occupancy(128, 10, 90);
        // Foreground rows 10..=111 and columns 0..=50: spans 102 and 51, so
        // the raw scale is 102/128.
        let mut mask = GrayImage::new(128, 128);
        for y in 10..=111 {
            for x in 0..=50 {
                mask.put_pixel(x, y, image::Luma([255]));
            }
        }
        // Extents (0.7, 1.75, 0.35) snap at tight extents (51, 128, 26).
        let verts = box_vertices([-0.35, -0.875, -0.175], [0.35, 0.875, 0.175]);
        let alignment = VoxelAlignment::derive(&occupancy, &mask, &verts).unwrap();

        assert_eq!(alignment.raw_scale, 102.0 / 128.0);
        assert_relative_eq!(alignment.scale.x, 41.0 / 51.0, epsilon = 1e-15);
        assert_relative_eq!(alignment.scale.y, 102.0 / 128.0, epsilon = 1e-15);
        assert_relative_eq!(alignment.scale.z, 21.0 / 26.0, epsilon = 1e-15);
        assert_relative_eq!(alignment.bbox_scale, 1.75, epsilon = 1e-12);
    }

    #[test]
    fn voxel_and_model_frames_roundtrip_on_bbox_corners() {
        let occupancy = cube_occupancy(128, 25, 100);
        let mask = filled_mask(128, 128);
        let corners = box_vertices([-0.35, -0.875, -0.175], [0.35, 0.875, 0.175]);
        let alignment = VoxelAlignment::derive(&occupancy, &mask, &corners).unwrap();

        for corner in &corners {
            let voxel = alignment.to_voxel_frame(corner);
            let back = alignment.to_model_frame(&voxel);
            assert_abs_diff_eq!(&back, corner, epsilon = 1e-12);
        }
    }

    #[test]
    fn derived_alignment_maps_a_voxelized_box_onto_the_model_bbox() {
        // Model bbox extents (0.9, 1.8, 0.45) have exact tight voxel extents
        // (64, 128, 32) at resolution 128. Voxelize the box at unit scale
        // with padding (16, 0, 48) and derive the alignment from that grid.
        let n = 128;
        let pad = [16usize, 0, 48];
        let tight = [64usize, 128, 32];
        let mut data = Array3::<f32>::zeros((n, n, n));
        for x in pad[0]..pad[0] + tight[0] {
            for y in pad[1]..pad[1] + tight[1] {
                for z in pad[2]..pad[2] + tight[2] {
                    data[[x, y, z]] = 1.0;
                }
            }
        }
        let occupancy = VolumeGrid::new(data);
        let mask = filled_mask(128, 128);
        let bbox_min = [-0.45, -0.9, -0.225];
        let bbox_max = [0.45, 0.9, 0.225];
        let corners = box_vertices(bbox_min, bbox_max);
        let alignment = VoxelAlignment::derive(&occupancy, &mask, &corners).unwrap();

        assert_eq!(alignment.padding, pad);
        for axis in 0..3 {
            assert_relative_eq!(alignment.scale[axis], 1.0, epsilon = 1e-15);
        }

        // The occupied region's corners land on the model bbox corners.
        let lo = Point3::new(pad[0] as f64, pad[1] as f64, pad[2] as f64);
        let hi = Point3::new(
            (pad[0] + tight[0]) as f64,
            (pad[1] + tight[1]) as f64,
            (pad[2] + tight[2]) as f64,
        );
        assert_abs_diff_eq!(
            alignment.to_model_frame(&lo),
            Point3::new(bbox_min[0], bbox_min[1], bbox_min[2]),
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(
            alignment.to_model_frame(&hi),
            Point3::new(bbox_max[0], bbox_max[1], bbox_max[2]),
            epsilon = 1e-12
        );
    }

    #[test]
    fn identity_alignment_is_idempotent() {
        let identity = VoxelAlignment {
            padding: [0, 0, 0],
            raw_scale: 1.0,
            scale: Vector3::new(1.0, 1.0, 1.0),
            bbox_min: Point3::origin(),
            bbox_extent: Vector3::new(128.0, 128.0, 128.0),
            bbox_scale: 128.0,
            resolution: 128.0,
        };
        let mut mesh = SurfaceMesh {
            vertices: vec![Point3::new(1.5, 20.0, 100.25), Point3::new(0.0, 0.0, 0.0)],
            triangles: Vec::new(),
            confidences: vec![1.0, 1.0],
        };
        let original = mesh.vertices.clone();
        identity.apply(&mut mesh);
        identity.apply(&mut mesh);
        for (v, o) in mesh.vertices.iter().zip(&original) {
            assert_abs_diff_eq!(v, o, epsilon = 1e-12);
        }
    }

    #[test]
    fn degenerate_evidence_is_rejected() {
        let empty = VolumeGrid::new(Array3::zeros((16, 16, 16)));
        let mask = filled_mask(16, 16);
        let verts = box_vertices([-0.5, -1.0, -0.25], [0.5, 1.0, 0.25]);
        assert!(matches!(
            VoxelAlignment::derive(&empty, &mask, &verts),
            Err(AlignmentError::EmptyOccupancy)
        ));

        let occupancy = cube_occupancy(16, 4, 12);
        let blank = GrayImage::new(16, 16);
        assert!(matches!(
            VoxelAlignment::derive(&occupancy, &blank, &verts),
            Err(AlignmentError::EmptySegmentation)
        ));

        assert!(matches!(
            VoxelAlignment::derive(&occupancy, &mask, &[]),
            Err(AlignmentError::EmptyModel)
        ));

        // A model flattened along z cannot define a tight extent there.
        let flat = box_vertices([-0.5, -1.0, 0.0], [0.5, 1.0, 0.0]);
        assert!(matches!(
            VoxelAlignment::derive(&occupancy, &mask, &flat),
            Err(AlignmentError::DegenerateExtent { axis: 2 })
        ));
    }
}
