//! Separating-axis overlap test between a triangle and an axis-aligned cube.

use glam::Vec3;

const CUBE_AXES: [Vec3; 3] = [Vec3::X, Vec3::Y, Vec3::Z];

/// Returns `true` if `triangle` touches or crosses the cube centered on
/// `center` with half side length `half_width`.
///
/// The test is exact: boxes that merely touch the triangle count as overlapping.
pub fn triangle_overlaps_cube(triangle: &[Vec3; 3], center: Vec3, half_width: f32) -> bool {
    // Bounding-box rejection on X, Y and Z.
    let tri_min = triangle[0].min(triangle[1]).min(triangle[2]);
    let tri_max = triangle[0].max(triangle[1]).max(triangle[2]);
    let cube_min = center - Vec3::splat(half_width);
    let cube_max = center + Vec3::splat(half_width);
    if tri_min.cmpgt(cube_max).any() || tri_max.cmplt(cube_min).any() {
        return false;
    }

    let verts = [
        triangle[0] - center,
        triangle[1] - center,
        triangle[2] - center,
    ];
    let edges = [
        verts[1] - verts[0],
        verts[2] - verts[1],
        verts[0] - verts[2],
    ];

    // Triangle plane against the cube's projected radius.
    let normal = edges[0].cross(edges[1]);
    let distance = normal.dot(verts[0]);
    if distance.abs() > half_width * normal.abs().element_sum() {
        return false;
    }

    // Edge x axis. The edge's own endpoints project to the same value, so
    // only the start vertex and the opposite vertex are needed.
    for (i, edge) in edges.iter().enumerate() {
        let start = verts[i];
        let opposite = verts[(i + 2) % 3];
        for axis in CUBE_AXES {
            let separating = axis.cross(*edge);
            let p = start.dot(separating);
            let q = opposite.dot(separating);
            let radius = half_width * separating.abs().element_sum();
            if p.min(q) > radius || p.max(q) < -radius {
                return false;
            }
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn tri(a: [f32; 3], b: [f32; 3], c: [f32; 3]) -> [Vec3; 3] {
        [Vec3::from(a), Vec3::from(b), Vec3::from(c)]
    }

    #[test]
    fn test_triangle_inside_cube() {
        let t = tri([1.0, 1.0, 1.0], [2.0, 1.0, 1.0], [1.0, 2.0, 1.0]);
        assert!(triangle_overlaps_cube(&t, Vec3::ZERO, 4.0));
    }

    #[test]
    fn test_disjoint_bounding_boxes() {
        let t = tri([10.0, 0.0, 0.0], [11.0, 0.0, 0.0], [10.0, 1.0, 0.0]);
        assert!(!triangle_overlaps_cube(&t, Vec3::ZERO, 4.0));
    }

    #[test]
    fn test_cube_inside_large_triangle() {
        let t = tri(
            [-100.0, -100.0, 0.5],
            [100.0, -100.0, 0.5],
            [0.0, 100.0, 0.5],
        );
        assert!(triangle_overlaps_cube(&t, Vec3::ZERO, 1.0));
    }

    #[test]
    fn test_plane_separates() {
        // Bounding boxes overlap, but the plane passes above the cube corner.
        let t = tri([3.0, 0.0, 0.0], [0.0, 3.0, 0.0], [0.0, 0.0, 3.0]);
        assert!(!triangle_overlaps_cube(&t, Vec3::ZERO, 0.9));
        assert!(triangle_overlaps_cube(&t, Vec3::ZERO, 1.1));
    }

    #[test]
    fn test_edge_axis_separates() {
        // A sliver along the cube's diagonal direction that misses the corner:
        // bounding boxes and plane both overlap, only an edge axis separates.
        let t = tri([1.5, -0.5, 0.0], [-0.5, 1.5, 0.0], [1.6, -0.4, 0.1]);
        let center = Vec3::new(-0.5, -0.5, 0.0);
        assert!(!triangle_overlaps_cube(&t, center, 0.6));
    }

    #[test]
    fn test_touching_face_counts() {
        let t = tri([1.0, -1.0, -1.0], [1.0, 1.0, -1.0], [1.0, 0.0, 1.0]);
        assert!(triangle_overlaps_cube(&t, Vec3::ZERO, 1.0));
    }

    proptest! {
        #[test]
        fn prop_vertex_inside_cube_overlaps(
            cx in -100.0f32..100.0,
            cy in -100.0f32..100.0,
            cz in -100.0f32..100.0,
            half in 1.0f32..50.0,
            fx in -0.99f32..0.99,
            fy in -0.99f32..0.99,
            fz in -0.99f32..0.99,
            dx in -500.0f32..500.0,
            dy in -500.0f32..500.0,
        ) {
            let center = Vec3::new(cx, cy, cz);
            let inside = center + Vec3::new(fx, fy, fz) * half;
            let t = [inside, inside + Vec3::new(dx, dy, 1.0), inside + Vec3::new(-dy, dx, 2.0)];
            prop_assert!(triangle_overlaps_cube(&t, center, half));
        }
    }
}
