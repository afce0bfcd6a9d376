//! A single collision model: header, position and normal tables, prism
//! triangles and the triangle octree.
//!
//! ## Layout
//!
//! ```text
//! ModelHeader (0x3C bytes), section offsets relative to the model start
//! positions   f32[3] per entry
//! normals     f32[3] per entry
//! triangles   20 bytes per entry
//! octree      see `octree`
//! ```

use glam::Vec3;
use rootcause::Report;
use tracing::{debug, warn};
use winnow::Parser;
use winnow::binary::{be_f32, be_u16, be_u32};
use winnow::combinator::repeat;
use winnow::error::{ContextError, ErrMode};

use crate::data::parser_utils::{WResult, element_count, parse_vec3, resolve_relptr, slice_at};
use crate::data::writer::BinaryWriter;
use crate::error::{KclError, KclResult};
use crate::geometry::{CollisionMesh, CollisionTriangle, Prism};
use crate::kcl::EncodeOptions;
use crate::kcl::grid::{OctreeGrid, RootLayout};
use crate::kcl::header::{MODEL_HEADER_SIZE, ModelHeader, parse_model_header};
use crate::kcl::octree::{OctreeNode, build_roots, parse_octree, write_octree};

pub const POSITION_STRIDE: usize = 12;
pub const NORMAL_STRIDE: usize = 12;
pub const TRIANGLE_STRIDE: usize = 20;
/// The normal table is sized as if it ran this far into the triangle section.
const NORMALS_OVERHANG: usize = 0x10;
/// Normal indices `4j..=4j+3` must fit in 16 bits.
pub const MAX_TRIANGLES: usize = 0x4000;
/// Value the encoder stores in `ModelHeader::unknown_0x10`.
const ENCODED_UNKNOWN_0X10: f32 = 30.0;

/// One prism-encoded triangle record.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Triangle {
    pub length: f32,
    pub position_index: u16,
    pub direction_index: u16,
    pub normal_a_index: u16,
    pub normal_b_index: u16,
    pub normal_c_index: u16,
    pub collision_flags: u16,
    pub global_index: u32,
}

fn parse_triangle(input: &mut &[u8]) -> WResult<Triangle> {
    let length = be_f32.parse_next(input)?;
    let position_index = be_u16.parse_next(input)?;
    let direction_index = be_u16.parse_next(input)?;
    let normal_a_index = be_u16.parse_next(input)?;
    let normal_b_index = be_u16.parse_next(input)?;
    let normal_c_index = be_u16.parse_next(input)?;
    let collision_flags = be_u16.parse_next(input)?;
    let global_index = be_u32.parse_next(input)?;
    Ok(Triangle {
        length,
        position_index,
        direction_index,
        normal_a_index,
        normal_b_index,
        normal_c_index,
        collision_flags,
        global_index,
    })
}

impl Triangle {
    fn write(&self, writer: &mut BinaryWriter) {
        writer.write_f32(self.length);
        writer.write_u16(self.position_index);
        writer.write_u16(self.direction_index);
        writer.write_u16(self.normal_a_index);
        writer.write_u16(self.normal_b_index);
        writer.write_u16(self.normal_c_index);
        writer.write_u16(self.collision_flags);
        writer.write_u32(self.global_index);
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Model {
    pub header: ModelHeader,
    pub positions: Vec<Vec3>,
    /// Face normals and edge normals; triangles index into this table for both.
    pub normals: Vec<Vec3>,
    pub triangles: Vec<Triangle>,
    /// One subtree per root cube, in file order.
    ///
    /// `None` when the file's octree could not be decoded; the tables are
    /// still usable.
    pub octree: Option<Vec<OctreeNode>>,
}

impl Model {
    /// Resolve the stored vectors of triangle `index`.
    pub fn prism(&self, index: usize) -> KclResult<Prism> {
        let triangle = self.triangles.get(index).ok_or_else(|| {
            Report::new(KclError::IndexOutOfRange {
                triangle: index,
                table: "triangles",
                index,
                len: self.triangles.len(),
            })
        })?;
        check_indices(index, triangle, self.positions.len(), self.normals.len())?;

        Ok(Prism {
            length: triangle.length,
            position: self.positions[triangle.position_index as usize],
            direction: self.normals[triangle.direction_index as usize],
            normal_a: self.normals[triangle.normal_a_index as usize],
            normal_b: self.normals[triangle.normal_b_index as usize],
            normal_c: self.normals[triangle.normal_c_index as usize],
        })
    }

    /// Reconstruct the three vertices of triangle `index`.
    pub fn triangle_vertices(&self, index: usize) -> KclResult<[Vec3; 3]> {
        self.prism(index)?
            .vertices()
            .ok_or_else(|| Report::new(KclError::DegenerateGeometry { triangle: index }))
    }

    /// Every triangle with its vertices and collision flags.
    pub fn collision_triangles(&self) -> KclResult<Vec<CollisionTriangle>> {
        self.triangles
            .iter()
            .enumerate()
            .map(|(index, triangle)| {
                let vertices = self.triangle_vertices(index)?;
                Ok(CollisionTriangle::new(vertices, triangle.collision_flags))
            })
            .collect()
    }

    pub fn root_layout(&self) -> KclResult<RootLayout> {
        RootLayout::from_model_header(&self.header)
    }
}

fn check_indices(
    index: usize,
    triangle: &Triangle,
    position_count: usize,
    normal_count: usize,
) -> KclResult<()> {
    let out_of_range = |table: &'static str, value: u16, len: usize| {
        Report::new(KclError::IndexOutOfRange {
            triangle: index,
            table,
            index: value as usize,
            len,
        })
    };

    if triangle.position_index as usize >= position_count {
        return Err(out_of_range(
            "positions",
            triangle.position_index,
            position_count,
        ));
    }
    for normal in [
        triangle.direction_index,
        triangle.normal_a_index,
        triangle.normal_b_index,
        triangle.normal_c_index,
    ] {
        if normal as usize >= normal_count {
            return Err(out_of_range("normals", normal, normal_count));
        }
    }
    Ok(())
}

fn parse_table<T>(
    file_data: &[u8],
    offset: usize,
    count: usize,
    stride: usize,
    parser: fn(&mut &[u8]) -> WResult<T>,
) -> KclResult<Vec<T>> {
    let input = &mut slice_at(file_data, offset, count * stride)?;
    repeat(count, parser)
        .parse_next(input)
        .map_err(|e: ErrMode<ContextError>| Report::new(KclError::ParseError(format!("{e}"))))
}

/// Parse the model starting at absolute offset `model_start`.
pub fn parse_model(file_data: &[u8], model_start: usize) -> KclResult<Model> {
    let input = &mut slice_at(file_data, model_start, MODEL_HEADER_SIZE)?;
    let header = parse_model_header(input).map_err(|e| Report::new(KclError::from(e)))?;

    let positions_at = resolve_relptr(model_start, header.positions_offset);
    let normals_at = resolve_relptr(model_start, header.normals_offset);
    let triangles_at = resolve_relptr(model_start, header.triangles_offset);
    let octree_at = resolve_relptr(model_start, header.octree_offset);

    let position_count = element_count("positions", positions_at, normals_at, POSITION_STRIDE)?;
    // The overhang never divides evenly, so this count is floored silently.
    let normal_count = (triangles_at + NORMALS_OVERHANG)
        .checked_sub(normals_at)
        .map(|size| size / NORMAL_STRIDE)
        .ok_or_else(|| {
            Report::new(KclError::InvalidSectionLayout {
                detail: format!(
                    "normals section at 0x{normals_at:X} starts after the triangles at 0x{triangles_at:X}"
                ),
            })
        })?;
    let triangle_count = element_count("triangles", triangles_at, octree_at, TRIANGLE_STRIDE)?;

    let positions = parse_table(
        file_data,
        positions_at,
        position_count,
        POSITION_STRIDE,
        parse_vec3,
    )?;
    let normals = parse_table(file_data, normals_at, normal_count, NORMAL_STRIDE, parse_vec3)?;
    let triangles = parse_table(
        file_data,
        triangles_at,
        triangle_count,
        TRIANGLE_STRIDE,
        parse_triangle,
    )?;

    for (index, triangle) in triangles.iter().enumerate() {
        check_indices(index, triangle, positions.len(), normals.len())?;
    }

    let octree = match RootLayout::from_model_header(&header)
        .and_then(|layout| parse_octree(file_data, octree_at, &layout, triangles.len()))
    {
        Ok(octree) => Some(octree),
        Err(report) => {
            warn!(
                model_start,
                error = %report.current_context(),
                "octree not decoded, keeping tables only"
            );
            None
        }
    };

    debug!(
        model_start,
        positions = positions.len(),
        normals = normals.len(),
        triangles = triangles.len(),
        roots = octree.as_ref().map(Vec::len),
        "parsed model"
    );

    Ok(Model {
        header,
        positions,
        normals,
        triangles,
        octree,
    })
}

/// Write `model` at the writer's current position.
///
/// The section offsets in `model.header` are ignored and recomputed. A model
/// whose octree was not decoded cannot be written.
pub fn write_model(writer: &mut BinaryWriter, model: &Model) -> KclResult<()> {
    let roots = model.octree.as_deref().ok_or_else(|| {
        Report::new(KclError::InvalidSectionLayout {
            detail: "model has no octree to write".to_string(),
        })
    })?;
    let model_start = writer.tell();
    let [positions, normals, triangles, octree] = model.header.write(writer);

    writer.satisfy_here(positions, model_start)?;
    for position in &model.positions {
        writer.write_vec3(*position);
    }

    writer.satisfy_here(normals, model_start)?;
    for normal in &model.normals {
        writer.write_vec3(*normal);
    }

    writer.satisfy_here(triangles, model_start)?;
    for triangle in &model.triangles {
        triangle.write(writer);
    }

    writer.satisfy_here(octree, model_start)?;
    write_octree(writer, roots)
}

/// Prism-encode `mesh` and build its octree over `grid`.
///
/// Triangle `j` owns position `j` and normals `4j..4j+4`; its global index is `j`.
pub fn build_model(
    mesh: &CollisionMesh,
    grid: &OctreeGrid,
    options: &EncodeOptions,
) -> KclResult<Model> {
    let count = mesh.triangles().len();
    if count == 0 {
        return Err(Report::new(KclError::EmptyMesh));
    }
    if count > MAX_TRIANGLES {
        return Err(Report::new(KclError::TooManyTriangles {
            count,
            max: MAX_TRIANGLES,
        }));
    }

    let mut positions = Vec::with_capacity(count);
    let mut normals = Vec::with_capacity(count * 4);
    let mut triangles = Vec::with_capacity(count);
    for (j, source) in mesh.triangles().iter().enumerate() {
        let prism = source
            .to_prism()
            .ok_or_else(|| Report::new(KclError::DegenerateGeometry { triangle: j }))?;
        let first_normal = (j * 4) as u16;

        positions.push(prism.position);
        normals.extend([
            prism.direction,
            prism.normal_a,
            prism.normal_b,
            prism.normal_c,
        ]);
        triangles.push(Triangle {
            length: prism.length,
            position_index: j as u16,
            direction_index: first_normal,
            normal_a_index: first_normal + 1,
            normal_b_index: first_normal + 2,
            normal_c_index: first_normal + 3,
            collision_flags: source.flags,
            global_index: j as u32,
        });
    }

    let vertices: Vec<[Vec3; 3]> = mesh.triangles().iter().map(|tri| tri.vertices).collect();
    let octree = build_roots(&grid.layout()?, &vertices, options);

    let header = ModelHeader {
        unknown_0x10: ENCODED_UNKNOWN_0X10,
        min_coordinate: grid.min,
        masks: grid.masks(),
        shifts: grid.shifts(),
        unknown_0x38: 0.0,
        ..ModelHeader::default()
    };

    Ok(Model {
        header,
        positions,
        normals,
        triangles,
        octree: Some(octree),
    })
}
