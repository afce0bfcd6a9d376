//! Conversion between explicit triangle vertices and the KCL prism encoding.
//!
//! A prism stores one corner `position`, the face normal `direction`, three
//! edge normals and the height `length` of the triangle measured along
//! `normal_c`. The other two corners are recovered by walking from
//! `position` along the in-plane edge directions until the projection onto
//! `normal_c` reaches `length`.

use glam::Vec3;

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Prism {
    pub length: f32,
    pub position: Vec3,
    pub direction: Vec3,
    pub normal_a: Vec3,
    pub normal_b: Vec3,
    pub normal_c: Vec3,
}

impl Prism {
    /// Encode three vertices. Returns `None` for collinear or zero-area input.
    pub fn from_vertices(v1: Vec3, v2: Vec3, v3: Vec3) -> Option<Prism> {
        let direction = (v2 - v1).cross(v3 - v1).try_normalize()?;
        let normal_a = direction.cross(v3 - v1).try_normalize()?;
        let normal_b = (-direction).cross(v2 - v1).try_normalize()?;
        let normal_c = direction.cross(v2 - v3).try_normalize()?;
        let length = (v2 - v1).dot(normal_c);

        let prism = Prism {
            length,
            position: v1,
            direction,
            normal_a,
            normal_b,
            normal_c,
        };
        // Reject anything the decoder could not invert.
        prism.vertices().map(|_| prism)
    }

    /// Reconstruct the three vertices.
    ///
    /// Returns `None` when an edge direction is perpendicular to `normal_c`,
    /// which only happens for degenerate or corrupt data.
    pub fn vertices(&self) -> Option<[Vec3; 3]> {
        let cross_a = self.normal_a.cross(self.direction);
        let cross_b = self.normal_b.cross(self.direction);

        let denom_b = cross_b.dot(self.normal_c);
        let denom_a = cross_a.dot(self.normal_c);
        if denom_a == 0.0 || denom_b == 0.0 {
            return None;
        }

        let v1 = self.position;
        let v2 = self.position + cross_b * (self.length / denom_b);
        let v3 = self.position + cross_a * (self.length / denom_a);

        (v2.is_finite() && v3.is_finite()).then_some([v1, v2, v3])
    }
}
