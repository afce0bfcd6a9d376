use glam::Vec3;
use winnow::Parser;
use winnow::binary::{be_f32, be_u32};

use crate::data::parser_utils::{WResult, parse_u32x3, parse_vec3};
use crate::data::writer::{BinaryWriter, OffsetSlot};

/// Size of the file header, magic included.
pub const FILE_HEADER_SIZE: usize = 0x38;
/// Size of a model header.
pub const MODEL_HEADER_SIZE: usize = 0x3C;

/// File header following the magic.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FileHeader {
    /// Absolute offset of the model octree.
    pub model_octree_offset: u32,
    /// Absolute offset of the model offset array.
    pub model_offset_array_offset: u32,
    pub model_count: u32,
    pub min_coordinate: Vec3,
    pub max_coordinate: Vec3,
    /// Size exponents of the grid per axis.
    pub coordinate_shift: [u32; 3],
    /// Unknown; written as zero.
    pub unknown_0x34: u32,
}

/// Parse the fixed header fields after the magic.
pub fn parse_file_header(input: &mut &[u8]) -> WResult<FileHeader> {
    let model_octree_offset = be_u32.parse_next(input)?;
    let model_offset_array_offset = be_u32.parse_next(input)?;
    let model_count = be_u32.parse_next(input)?;
    let min_coordinate = parse_vec3(input)?;
    let max_coordinate = parse_vec3(input)?;
    let coordinate_shift = parse_u32x3(input)?;
    let unknown_0x34 = be_u32.parse_next(input)?;
    Ok(FileHeader {
        model_octree_offset,
        model_offset_array_offset,
        model_count,
        min_coordinate,
        max_coordinate,
        coordinate_shift,
        unknown_0x34,
    })
}

impl FileHeader {
    /// Write the header with placeholders for the two section offsets.
    ///
    /// Returns the `(model_octree, model_offset_array)` slots.
    pub fn write(&self, writer: &mut BinaryWriter, magic: u32) -> (OffsetSlot, OffsetSlot) {
        writer.write_u32(magic);
        let model_octree = writer.reserve_offset();
        let model_offset_array = writer.reserve_offset();
        writer.write_u32(self.model_count);
        writer.write_vec3(self.min_coordinate);
        writer.write_vec3(self.max_coordinate);
        writer.write_u32s(&self.coordinate_shift);
        writer.write_u32(self.unknown_0x34);
        (model_octree, model_offset_array)
    }
}

/// Per-model header. All section offsets are relative to the model start.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ModelHeader {
    pub positions_offset: u32,
    pub normals_offset: u32,
    pub triangles_offset: u32,
    pub octree_offset: u32,
    /// Unknown; the encoder writes 30.0.
    pub unknown_0x10: f32,
    /// Origin of the root cube grid.
    pub min_coordinate: Vec3,
    /// Per-axis mask words, `0xFFFFFFFF << n_axis` written as an `f32`.
    /// See [`crate::kcl::grid::axis_mask_exponent`].
    pub masks: [u32; 3],
    /// Cube shift, Y index shift, Z index shift.
    pub shifts: [u32; 3],
    /// Unknown; written as zero.
    pub unknown_0x38: f32,
}

pub fn parse_model_header(input: &mut &[u8]) -> WResult<ModelHeader> {
    let positions_offset = be_u32.parse_next(input)?;
    let normals_offset = be_u32.parse_next(input)?;
    let triangles_offset = be_u32.parse_next(input)?;
    let octree_offset = be_u32.parse_next(input)?;
    let unknown_0x10 = be_f32.parse_next(input)?;
    let min_coordinate = parse_vec3(input)?;
    let masks = parse_u32x3(input)?;
    let shifts = parse_u32x3(input)?;
    let unknown_0x38 = be_f32.parse_next(input)?;
    Ok(ModelHeader {
        positions_offset,
        normals_offset,
        triangles_offset,
        octree_offset,
        unknown_0x10,
        min_coordinate,
        masks,
        shifts,
        unknown_0x38,
    })
}

impl ModelHeader {
    /// Write the header with placeholders for the four section offsets.
    ///
    /// Returns the positions, normals, triangles and octree slots in that order.
    pub fn write(&self, writer: &mut BinaryWriter) -> [OffsetSlot; 4] {
        let slots = [
            writer.reserve_offset(),
            writer.reserve_offset(),
            writer.reserve_offset(),
            writer.reserve_offset(),
        ];
        writer.write_f32(self.unknown_0x10);
        writer.write_vec3(self.min_coordinate);
        writer.write_u32s(&self.masks);
        writer.write_u32s(&self.shifts);
        writer.write_f32(self.unknown_0x38);
        slots
    }
}
