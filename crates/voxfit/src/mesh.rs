//! Triangle meshes produced by iso-surface extraction.

use std::collections::HashMap;

use nalgebra::Point3;
use serde::{Deserialize, Serialize};

/// Surface mesh in voxel-index coordinates until alignment rewrites it.
///
/// `confidences` runs parallel to `vertices`: entry i holds the field
/// evidence backing vertex i and later weights that vertex in the surface
/// fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurfaceMesh {
    pub vertices: Vec<Point3<f64>>,
    pub triangles: Vec<[u32; 3]>,
    pub confidences: Vec<f32>,
}

impl SurfaceMesh {
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    /// Structural invariants: parallel confidences and in-range triangle
    /// indices.
    pub fn is_consistent(&self) -> bool {
        if self.vertices.len() != self.confidences.len() {
            return false;
        }
        let n = self.vertices.len() as u32;
        self.triangles
            .iter()
            .all(|t| t.iter().all(|&i| i < n))
    }

    /// True when every undirected triangle edge is shared by exactly two
    /// triangles, i.e. the mesh bounds a closed volume.
    pub fn is_closed_manifold(&self) -> bool {
        if self.triangles.is_empty() {
            return false;
        }
        let mut uses: HashMap<(u32, u32), u32> = HashMap::new();
        for t in &self.triangles {
            for k in 0..3 {
                let a = t[k];
                let b = t[(k + 1) % 3];
                let key = (a.min(b), a.max(b));
                *uses.entry(key).or_insert(0) += 1;
            }
        }
        uses.values().all(|&c| c == 2)
    }

    /// Axis-aligned bounds of the vertex cloud, `None` for an empty mesh.
    pub fn bounds(&self) -> Option<(Point3<f64>, Point3<f64>)> {
        let first = *self.vertices.first()?;
        let mut min = first;
        let mut max = first;
        for v in &self.vertices[1..] {
            for a in 0..3 {
                min[a] = min[a].min(v[a]);
                max[a] = max[a].max(v[a]);
            }
        }
        Some((min, max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tetrahedron() -> SurfaceMesh {
        SurfaceMesh {
            vertices: vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
                Point3::new(0.0, 0.0, 1.0),
            ],
            triangles: vec![[0, 2, 1], [0, 1, 3], [0, 3, 2], [1, 2, 3]],
            confidences: vec![0.9, 0.8, 0.7, 0.6],
        }
    }

    #[test]
    fn tetrahedron_is_consistent_and_closed() {
        let mesh = tetrahedron();
        assert!(mesh.is_consistent());
        assert!(mesh.is_closed_manifold());
    }

    #[test]
    fn missing_face_breaks_closedness() {
        let mut mesh = tetrahedron();
        mesh.triangles.pop();
        assert!(!mesh.is_closed_manifold());
    }

    #[test]
    fn mismatched_confidences_are_inconsistent() {
        let mut mesh = tetrahedron();
        mesh.confidences.pop();
        assert!(!mesh.is_consistent());
    }

    #[test]
    fn out_of_range_index_is_inconsistent() {
        let mut mesh = tetrahedron();
        mesh.triangles[0] = [0, 1, 9];
        assert!(!mesh.is_consistent());
    }

    #[test]
    fn bounds_cover_all_vertices() {
        let mesh = tetrahedron();
        let (min, max) = mesh.bounds().unwrap();
        assert_eq!(min, Point3::new(0.0, 0.0, 0.0));
        assert_eq!(max, Point3::new(1.0, 1.0, 1.0));
    }
}
