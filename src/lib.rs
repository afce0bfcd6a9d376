/// Binary reading and writing helpers shared by the codecs
pub mod data;
/// Error definitions
pub mod error;
/// Triangle geometry: bounds, prism encoding and cube intersection
pub mod geometry;
/// The KCL collision format: file and model codecs, octree, flag patching
pub mod kcl;
/// Wavefront OBJ import and export of collision meshes
pub mod obj;

pub use error::{KclError, KclResult};
pub use geometry::{CollisionMesh, CollisionTriangle};
pub use kcl::{EncodeOptions, KclFile, parse_kcl, write_kcl};
