//! Nearest-vertex lookup between target surface points and model vertices.

use kiddo::immutable::float::kdtree::ImmutableKdTree;
use kiddo::SquaredEuclidean;
use nalgebra::Point3;

/// Bucket size for the KD-tree; plenty for body-scale vertex counts.
const BUCKET_SIZE: usize = 32;

/// For every query point, the index of the nearest vertex.
///
/// `vertices` must be non-empty when `queries` is non-empty. The tree is
/// rebuilt on every call; the surface stage deforms the model between
/// correspondence rounds, so a cached index would go stale anyway.
pub(crate) fn nearest_vertex_indices(
    vertices: &[Point3<f64>],
    queries: &[Point3<f64>],
) -> Vec<usize> {
    if queries.is_empty() {
        return Vec::new();
    }
    let entries: Vec<[f64; 3]> = vertices.iter().map(|p| [p.x, p.y, p.z]).collect();
    let tree: ImmutableKdTree<f64, u64, 3, BUCKET_SIZE> = (&*entries).into();
    queries
        .iter()
        .map(|q| {
            tree.nearest_one::<SquaredEuclidean>(&[q.x, q.y, q.z])
                .item as usize
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_the_closest_vertex_for_each_query() {
        let vertices = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 2.0, 0.0),
        ];
        let queries = vec![
            Point3::new(0.1, -0.1, 0.0),
            Point3::new(0.9, 0.2, 0.0),
            Point3::new(0.0, 1.6, 0.1),
        ];
        assert_eq!(nearest_vertex_indices(&vertices, &queries), vec![0, 1, 2]);
    }

    #[test]
    fn empty_queries_produce_empty_output() {
        let vertices = vec![Point3::new(0.0, 0.0, 0.0)];
        assert!(nearest_vertex_indices(&vertices, &[]).is_empty());
    }

    #[test]
    fn grid_queries_snap_to_their_cell_corners() {
        let mut vertices = Vec::new();
        for x in 0..4 {
            for y in 0..4 {
                vertices.push(Point3::new(x as f64, y as f64, 0.0));
            }
        }
        // Offsets below half the grid pitch keep the nearest corner unchanged.
        let queries: Vec<_> = vertices
            .iter()
            .map(|p| Point3::new(p.x + 0.2, p.y - 0.3, 0.1))
            .collect();
        let indices = nearest_vertex_indices(&vertices, &queries);
        assert_eq!(indices, (0..vertices.len()).collect::<Vec<_>>());
    }
}
