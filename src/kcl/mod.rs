//! KCL collision files.
//!
//! ## File layout
//!
//! ```text
//! 0x00 FileHeader (0x38 bytes), magic first
//!      model octree, u32 words
//!      model offset array, one absolute u32 per model
//!      models, see `model`
//! ```
//!
//! Only single-model files are produced. The file-level model octree is
//! written as eight empty leaves and read back verbatim.

pub mod grid;
pub mod header;
pub mod model;
pub mod octree;
pub mod patch;

use bon::Builder;
use rootcause::Report;
use tracing::info;
use winnow::Parser;
use winnow::binary::be_u32;
use winnow::combinator::repeat;
use winnow::error::{ContextError, ErrMode};

use crate::data::parser_utils::{element_count, slice_at};
use crate::data::writer::BinaryWriter;
use crate::error::{KclError, KclResult};
use crate::geometry::{CollisionMesh, CollisionTriangle};

use grid::OctreeGrid;
use header::{FILE_HEADER_SIZE, FileHeader, parse_file_header};
use model::{Model, build_model, parse_model, write_model};
use octree::LEAF_FLAG;

pub const KCL_MAGIC: u32 = 0x0202_0000;

/// Entries in the file-level model octree written by the encoder.
const MODEL_OCTREE_ENTRIES: usize = 8;

/// Encoder settings.
#[derive(Builder, Debug, Clone, PartialEq, Eq)]
pub struct EncodeOptions {
    /// A cube holding at most this many triangles becomes a leaf.
    #[builder(default = 30)]
    pub max_triangles_per_leaf: usize,
    /// Cubes narrower than this are never split.
    #[builder(default = 256)]
    pub min_cube_width: u32,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        EncodeOptions::builder().build()
    }
}

impl EncodeOptions {
    pub fn validate(&self) -> KclResult<()> {
        if self.min_cube_width == 0 {
            return Err(Report::new(KclError::InvalidOptions {
                detail: "min_cube_width must be at least 1".to_string(),
            }));
        }
        Ok(())
    }
}

/// A decoded KCL file.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct KclFile {
    pub header: FileHeader,
    /// Raw words of the file-level model octree.
    pub model_octree: Vec<u32>,
    /// Absolute start offset of each model.
    pub model_offsets: Vec<u32>,
    pub models: Vec<Model>,
}

impl KclFile {
    /// Every triangle of every model, in model then triangle order.
    pub fn collision_triangles(&self) -> KclResult<Vec<CollisionTriangle>> {
        let mut triangles = Vec::new();
        for model in &self.models {
            triangles.extend(model.collision_triangles()?);
        }
        Ok(triangles)
    }
}

fn parse_words(file_data: &[u8], offset: usize, count: usize) -> KclResult<Vec<u32>> {
    let input = &mut slice_at(file_data, offset, count * 4)?;
    repeat(count, be_u32)
        .parse_next(input)
        .map_err(|e: ErrMode<ContextError>| Report::new(KclError::ParseError(format!("{e}"))))
}

/// Decode a KCL file.
pub fn parse_kcl(file_data: &[u8]) -> KclResult<KclFile> {
    let magic_bytes = &mut slice_at(file_data, 0, 4)?;
    let magic = be_u32
        .parse_next(magic_bytes)
        .map_err(|e: ErrMode<ContextError>| Report::new(KclError::from(e)))?;
    if magic != KCL_MAGIC {
        return Err(Report::new(KclError::InvalidMagic { got: magic }));
    }

    let input = &mut slice_at(file_data, 4, FILE_HEADER_SIZE - 4)?;
    let header = parse_file_header(input).map_err(|e| Report::new(KclError::from(e)))?;

    let octree_at = header.model_octree_offset as usize;
    let offsets_at = header.model_offset_array_offset as usize;
    let octree_words = element_count("model octree", octree_at, offsets_at, 4)?;
    let model_octree = parse_words(file_data, octree_at, octree_words)?;
    let model_offsets = parse_words(file_data, offsets_at, header.model_count as usize)?;

    let models = model_offsets
        .iter()
        .map(|&offset| parse_model(file_data, offset as usize))
        .collect::<KclResult<Vec<_>>>()?;

    Ok(KclFile {
        header,
        model_octree,
        model_offsets,
        models,
    })
}

/// Encode `meshes` as a KCL file.
///
/// Only one mesh is supported; merge several with [`CollisionMesh::merge`] first.
pub fn write_kcl(meshes: &[CollisionMesh], options: &EncodeOptions) -> KclResult<Vec<u8>> {
    options.validate()?;
    let mesh = match meshes {
        [] => return Err(Report::new(KclError::EmptyMesh)),
        [mesh] => mesh,
        _ => {
            return Err(Report::new(KclError::UnsupportedMultiModel {
                count: meshes.len(),
            }));
        }
    };

    let grid = OctreeGrid::for_bounds(mesh.bounds(), options.min_cube_width);
    let model = build_model(mesh, &grid, options)?;

    let header = FileHeader {
        model_count: 1,
        min_coordinate: grid.min,
        max_coordinate: grid.max,
        coordinate_shift: grid.axis_exponents,
        ..FileHeader::default()
    };

    let mut writer = BinaryWriter::new();
    let (octree_slot, offsets_slot) = header.write(&mut writer, KCL_MAGIC);

    writer.satisfy_here(octree_slot, 0)?;
    writer.write_u32s(&[LEAF_FLAG; MODEL_OCTREE_ENTRIES]);

    writer.satisfy_here(offsets_slot, 0)?;
    let model_slot = writer.reserve_offset();

    writer.satisfy_here(model_slot, 0)?;
    write_model(&mut writer, &model)?;

    let bytes = writer.finish()?;
    info!(
        triangles = model.triangles.len(),
        roots = model.octree.as_ref().map_or(0, Vec::len),
        bytes = bytes.len(),
        "encoded kcl"
    );
    Ok(bytes)
}
