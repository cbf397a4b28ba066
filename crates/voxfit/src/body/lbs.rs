//! Linear-blend-skinning implementation of the body model capability.
//!
//! Holds the standard skinned-template data: rest vertices, linear shape
//! blendshapes, a joint regressor, the kinematic parent chain and per-vertex
//! skinning weights. Forward evaluation is: apply shape offsets, regress
//! rest joints, chain per-joint axis-angle rotations into world transforms,
//! then blend each vertex over the joints that influence it.

use nalgebra::{Point3, Rotation3, Vector3};
use ndarray::{Array2, Array3};

use super::DeformableModel;

// ── Error type ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum ModelDataError {
    NoVertices,
    NoJoints,
    ShapeDirsMismatch { vertices: usize, got: (usize, usize, usize) },
    RegressorMismatch { vertices: usize, got: (usize, usize) },
    WeightsMismatch { vertices: usize, joints: usize, got: (usize, usize) },
    BadKinematicTree { joint: usize, parent: usize },
    BadFace { face: usize, vertex: u32 },
}

impl std::fmt::Display for ModelDataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoVertices => write!(f, "model template has no vertices"),
            Self::NoJoints => write!(f, "joint regressor has no rows"),
            Self::ShapeDirsMismatch { vertices, got } => write!(
                f,
                "shape blendshapes must be ({}, 3, S), got {:?}",
                vertices, got
            ),
            Self::RegressorMismatch { vertices, got } => write!(
                f,
                "joint regressor must be (J, {}), got {:?}",
                vertices, got
            ),
            Self::WeightsMismatch {
                vertices,
                joints,
                got,
            } => write!(
                f,
                "skinning weights must be ({}, {}), got {:?}",
                vertices, joints, got
            ),
            Self::BadKinematicTree { joint, parent } => write!(
                f,
                "joint {} has parent {}; parents must precede children with joint 0 as root",
                joint, parent
            ),
            Self::BadFace { face, vertex } => {
                write!(f, "face {} names vertex {} outside the template", face, vertex)
            }
        }
    }
}

impl std::error::Error for ModelDataError {}

// ── Model ────────────────────────────────────────────────────────────────

/// Skinned template body with linear shape blendshapes.
#[derive(Debug, Clone)]
pub struct LbsModel {
    template: Vec<Point3<f64>>,
    /// (V, 3, S) per-vertex displacement per shape coefficient.
    shape_dirs: Array3<f64>,
    /// (J, V) rest-joint locations as linear combinations of vertices.
    joint_regressor: Array2<f64>,
    /// Parent joint per joint; entry 0 is the root and parents precede
    /// children.
    parents: Vec<usize>,
    /// (V, J) skinning weights, rows summing to one.
    weights: Array2<f64>,
    /// Fixed triangle topology over the template vertices.
    faces: Vec<[u32; 3]>,
    pose: Vec<f64>,
    shape: Vec<f64>,
}

impl LbsModel {
    pub fn from_parts(
        template: Vec<Point3<f64>>,
        shape_dirs: Array3<f64>,
        joint_regressor: Array2<f64>,
        parents: Vec<usize>,
        weights: Array2<f64>,
        faces: Vec<[u32; 3]>,
    ) -> Result<Self, ModelDataError> {
        let v = template.len();
        if v == 0 {
            return Err(ModelDataError::NoVertices);
        }
        let (j, rv) = joint_regressor.dim();
        if j == 0 {
            return Err(ModelDataError::NoJoints);
        }
        if rv != v {
            return Err(ModelDataError::RegressorMismatch {
                vertices: v,
                got: joint_regressor.dim(),
            });
        }
        let sd = shape_dirs.dim();
        if sd.0 != v || sd.1 != 3 {
            return Err(ModelDataError::ShapeDirsMismatch {
                vertices: v,
                got: sd,
            });
        }
        if weights.dim() != (v, j) {
            return Err(ModelDataError::WeightsMismatch {
                vertices: v,
                joints: j,
                got: weights.dim(),
            });
        }
        if parents.len() != j || parents[0] != 0 {
            return Err(ModelDataError::BadKinematicTree {
                joint: 0,
                parent: parents.first().copied().unwrap_or(usize::MAX),
            });
        }
        for (joint, &parent) in parents.iter().enumerate().skip(1) {
            if parent >= joint {
                return Err(ModelDataError::BadKinematicTree { joint, parent });
            }
        }
        for (face, tri) in faces.iter().enumerate() {
            if let Some(&vertex) = tri.iter().find(|&&i| i as usize >= v) {
                return Err(ModelDataError::BadFace { face, vertex });
            }
        }

        let shape_len = sd.2;
        Ok(Self {
            template,
            shape_dirs,
            joint_regressor,
            parents,
            weights,
            faces,
            pose: vec![0.0; 3 * j],
            shape: vec![0.0; shape_len],
        })
    }

    /// Triangle topology shared by every deformation of the template.
    pub fn faces(&self) -> &[[u32; 3]] {
        &self.faces
    }

    fn shaped_template(&self) -> Vec<Point3<f64>> {
        let mut shaped = self.template.clone();
        for (i, v) in shaped.iter_mut().enumerate() {
            for (s, &coeff) in self.shape.iter().enumerate() {
                if coeff == 0.0 {
                    continue;
                }
                v.x += coeff * self.shape_dirs[[i, 0, s]];
                v.y += coeff * self.shape_dirs[[i, 1, s]];
                v.z += coeff * self.shape_dirs[[i, 2, s]];
            }
        }
        shaped
    }

    fn rest_joints(&self, shaped: &[Point3<f64>]) -> Vec<Point3<f64>> {
        let (j, _) = self.joint_regressor.dim();
        let mut joints = vec![Point3::origin(); j];
        for (row, joint) in joints.iter_mut().enumerate() {
            let mut acc = Vector3::zeros();
            for (i, v) in shaped.iter().enumerate() {
                let w = self.joint_regressor[[row, i]];
                if w != 0.0 {
                    acc += w * v.coords;
                }
            }
            *joint = Point3::from(acc);
        }
        joints
    }

    fn joint_rotation(&self, j: usize) -> Rotation3<f64> {
        Rotation3::from_scaled_axis(Vector3::new(
            self.pose[3 * j],
            self.pose[3 * j + 1],
            self.pose[3 * j + 2],
        ))
    }

    /// World rotation and position per joint, root first.
    fn world_transforms(&self, rest: &[Point3<f64>]) -> Vec<(Rotation3<f64>, Vector3<f64>)> {
        let mut world = Vec::with_capacity(rest.len());
        world.push((self.joint_rotation(0), rest[0].coords));
        for j in 1..rest.len() {
            let p = self.parents[j];
            let (parent_rot, parent_pos) = world[p];
            let rot = parent_rot * self.joint_rotation(j);
            let pos = parent_pos + parent_rot * (rest[j] - rest[p]);
            world.push((rot, pos));
        }
        world
    }
}

impl DeformableModel for LbsModel {
    fn pose_len(&self) -> usize {
        self.pose.len()
    }

    fn shape_len(&self) -> usize {
        self.shape.len()
    }

    fn joint_count(&self) -> usize {
        self.parents.len()
    }

    fn pose(&self) -> &[f64] {
        &self.pose
    }

    fn shape(&self) -> &[f64] {
        &self.shape
    }

    fn set_pose(&mut self, pose: &[f64]) {
        assert_eq!(pose.len(), self.pose.len(), "pose length mismatch");
        self.pose.copy_from_slice(pose);
    }

    fn set_shape(&mut self, shape: &[f64]) {
        assert_eq!(shape.len(), self.shape.len(), "shape length mismatch");
        self.shape.copy_from_slice(shape);
    }

    fn vertices(&self) -> Vec<Point3<f64>> {
        let shaped = self.shaped_template();
        let rest = self.rest_joints(&shaped);
        let world = self.world_transforms(&rest);

        let mut out = Vec::with_capacity(shaped.len());
        for (i, v) in shaped.iter().enumerate() {
            let mut p = Vector3::zeros();
            for (j, (rot, pos)) in world.iter().enumerate() {
                let w = self.weights[[i, j]];
                if w == 0.0 {
                    continue;
                }
                p += w * (rot * (v - rest[j]) + pos);
            }
            out.push(Point3::from(p));
        }
        out
    }

    fn joints(&self) -> Vec<Point3<f64>> {
        let shaped = self.shaped_template();
        let rest = self.rest_joints(&shaped);
        self.world_transforms(&rest)
            .into_iter()
            .map(|(_, pos)| Point3::from(pos))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::chain_model;
    use approx::assert_relative_eq;

    #[test]
    fn zero_pose_reproduces_template() {
        let model = chain_model();
        let verts = model.vertices();
        for (v, t) in verts.iter().zip(model.template.iter()) {
            assert_relative_eq!(v.coords, t.coords, epsilon = 1e-12);
        }
    }

    #[test]
    fn global_rotation_is_rigid_about_the_root() {
        let mut model = chain_model();
        let rest_root = model.joints()[0];
        let before = model.vertices();

        let mut pose = vec![0.0; model.pose_len()];
        pose[2] = 0.9;
        model.set_pose(&pose);
        let rot = Rotation3::from_scaled_axis(Vector3::new(0.0, 0.0, 0.9));

        for (v, b) in model.vertices().iter().zip(&before) {
            let expected = rest_root + rot * (b - rest_root);
            assert_relative_eq!(v.coords, expected.coords, epsilon = 1e-10);
        }
    }

    #[test]
    fn middle_joint_rotation_leaves_upstream_untouched() {
        let mut model = chain_model();
        let before_joints = model.joints();
        let before_verts = model.vertices();

        let mut pose = vec![0.0; model.pose_len()];
        pose[3] = 0.6; // middle joint about x
        model.set_pose(&pose);

        let joints = model.joints();
        assert_relative_eq!(joints[0].coords, before_joints[0].coords, epsilon = 1e-12);
        assert_relative_eq!(joints[1].coords, before_joints[1].coords, epsilon = 1e-12);
        assert!((joints[2] - before_joints[2]).norm() > 0.05);

        // Root-ring vertices are rigidly bound to the root joint.
        for i in 0..8 {
            assert_relative_eq!(
                model.vertices()[i].coords,
                before_verts[i].coords,
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn elongation_shape_moves_joints_and_girth_does_not() {
        let mut model = chain_model();
        let rest = model.joints();

        model.set_shape(&[0.5, 0.0]);
        let elongated = model.joints();
        assert_relative_eq!(elongated[2].y, 1.5 * rest[2].y, epsilon = 1e-10);

        model.set_shape(&[0.0, 0.8]);
        let inflated = model.joints();
        for (a, b) in inflated.iter().zip(&rest) {
            assert_relative_eq!(a.coords, b.coords, epsilon = 1e-10);
        }
        // Vertices do move outward.
        let v = model.vertices();
        let t = &model.template;
        let radial = |p: &Point3<f64>| (p.x * p.x + p.z * p.z).sqrt();
        assert!(radial(&v[0]) > radial(&t[0]));
    }

    #[test]
    fn from_parts_rejects_malformed_data() {
        let model = chain_model();
        let bad_parents = vec![0, 0, 3];
        let err = LbsModel::from_parts(
            model.template.clone(),
            model.shape_dirs.clone(),
            model.joint_regressor.clone(),
            bad_parents,
            model.weights.clone(),
            model.faces.clone(),
        )
        .unwrap_err();
        assert_eq!(err, ModelDataError::BadKinematicTree { joint: 2, parent: 3 });

        let bad_weights = Array2::zeros((model.template.len(), 7));
        assert!(matches!(
            LbsModel::from_parts(
                model.template.clone(),
                model.shape_dirs.clone(),
                model.joint_regressor.clone(),
                vec![0, 0, 1],
                bad_weights,
                model.faces.clone(),
            ),
            Err(ModelDataError::WeightsMismatch { .. })
        ));

        let bad_faces = vec![[0u32, 1, 99]];
        assert_eq!(
            LbsModel::from_parts(
                model.template.clone(),
                model.shape_dirs.clone(),
                model.joint_regressor.clone(),
                vec![0, 0, 1],
                model.weights.clone(),
                bad_faces,
            )
            .unwrap_err(),
            ModelDataError::BadFace { face: 0, vertex: 99 }
        );
    }
}
