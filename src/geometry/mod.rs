/// Separating-axis triangle/cube overlap test
pub mod intersect;
/// Prism encoding of triangle vertices
pub mod prism;

use glam::Vec3;
use rootcause::Report;

use crate::error::{KclError, KclResult};

pub use intersect::triangle_overlaps_cube;
pub use prism::Prism;

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Bounds {
    pub min: Vec3,
    pub max: Vec3,
}

impl Bounds {
    pub fn new(min: Vec3, max: Vec3) -> Bounds {
        Bounds { min, max }
    }

    /// Smallest box containing every point, or `None` for an empty iterator.
    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Option<Bounds> {
        points.into_iter().fold(None, |bounds, point| {
            Some(match bounds {
                None => Bounds::new(point, point),
                Some(Bounds { min, max }) => Bounds::new(min.min(point), max.max(point)),
            })
        })
    }

    pub fn extent(&self) -> Vec3 {
        self.max - self.min
    }

    pub fn union(&self, other: &Bounds) -> Bounds {
        Bounds::new(self.min.min(other.min), self.max.max(other.max))
    }
}

/// A triangle given by its three vertices plus its opaque collision flags.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CollisionTriangle {
    pub vertices: [Vec3; 3],
    pub flags: u16,
}

impl CollisionTriangle {
    pub fn new(vertices: [Vec3; 3], flags: u16) -> CollisionTriangle {
        CollisionTriangle { vertices, flags }
    }

    pub fn to_prism(&self) -> Option<Prism> {
        let [v1, v2, v3] = self.vertices;
        Prism::from_vertices(v1, v2, v3)
    }

    /// Whether the triangle has no usable prism encoding (zero area or collinear).
    pub fn is_degenerate(&self) -> bool {
        self.to_prism().is_none()
    }
}

/// A triangle soup with the bounding box the octree grid is derived from.
///
/// The bounds always contain every vertex, so the octree grid covers every
/// triangle.
#[derive(Debug, Clone)]
pub struct CollisionMesh {
    triangles: Vec<CollisionTriangle>,
    bounds: Bounds,
}

impl CollisionMesh {
    /// Create a mesh, computing its bounding box from the vertices.
    pub fn new(triangles: Vec<CollisionTriangle>) -> KclResult<CollisionMesh> {
        let bounds = Bounds::from_points(triangles.iter().flat_map(|tri| tri.vertices))
            .ok_or_else(|| Report::new(KclError::EmptyMesh))?;
        Ok(CollisionMesh { triangles, bounds })
    }

    pub fn triangles(&self) -> &[CollisionTriangle] {
        &self.triangles
    }

    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    pub fn into_triangles(self) -> Vec<CollisionTriangle> {
        self.triangles
    }

    /// Join several meshes into one, as the encoder only supports a single model.
    pub fn merge(meshes: impl IntoIterator<Item = CollisionMesh>) -> KclResult<CollisionMesh> {
        let mut merged: Option<CollisionMesh> = None;
        for mesh in meshes {
            merged = Some(match merged {
                None => mesh,
                Some(mut acc) => {
                    acc.bounds = acc.bounds.union(&mesh.bounds);
                    acc.triangles.extend(mesh.triangles);
                    acc
                }
            });
        }
        merged.ok_or_else(|| Report::new(KclError::EmptyMesh))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_from_points() {
        let bounds = Bounds::from_points([
            Vec3::new(1.0, -2.0, 3.0),
            Vec3::new(-1.0, 5.0, 0.0),
            Vec3::new(0.0, 0.0, 9.0),
        ])
        .unwrap();
        assert_eq!(bounds.min, Vec3::new(-1.0, -2.0, 0.0));
        assert_eq!(bounds.max, Vec3::new(1.0, 5.0, 9.0));
        assert_eq!(bounds.extent(), Vec3::new(2.0, 7.0, 9.0));
        assert!(Bounds::from_points(std::iter::empty()).is_none());
    }

    #[test]
    fn test_empty_mesh_is_rejected() {
        let err = CollisionMesh::new(Vec::new()).unwrap_err();
        assert!(matches!(err.current_context(), KclError::EmptyMesh));
    }

    #[test]
    fn test_merge_unions_bounds() {
        let a = CollisionMesh::new(vec![CollisionTriangle::new(
            [Vec3::ZERO, Vec3::X, Vec3::Y],
            1,
        )])
        .unwrap();
        let b = CollisionMesh::new(vec![CollisionTriangle::new(
            [Vec3::splat(5.0), Vec3::splat(6.0), Vec3::new(5.0, 7.0, 5.0)],
            2,
        )])
        .unwrap();
        let merged = CollisionMesh::merge([a, b]).unwrap();
        assert_eq!(merged.triangles().len(), 2);
        assert_eq!(merged.bounds().min, Vec3::ZERO);
        assert_eq!(merged.bounds().max, Vec3::new(6.0, 7.0, 6.0));
    }

    #[test]
    fn test_degenerate_detection() {
        let flat = CollisionTriangle::new([Vec3::ZERO, Vec3::X, Vec3::X * 2.0], 0);
        assert!(flat.is_degenerate());
        let ok = CollisionTriangle::new([Vec3::ZERO, Vec3::X, Vec3::Z], 0);
        assert!(!ok.is_degenerate());
    }
}
