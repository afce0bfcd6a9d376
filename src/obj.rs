//! Wavefront OBJ interchange for collision meshes.
//!
//! Collision flags travel as material names: faces after `usemtl flag_<n>`
//! carry flags `n`, written in decimal or `0x` hex. Faces under any other
//! material, or before the first `usemtl`, get the caller's default flags.

use std::io::{BufRead, Write};

use glam::Vec3;
use rootcause::Report;

use crate::error::{KclError, KclResult};
use crate::geometry::CollisionTriangle;
use crate::kcl::KclFile;

const FLAG_MATERIAL_PREFIX: &str = "flag_";

/// Up axis of the mesh on the interchange side. KCL data is Y-up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "bin", derive(clap::ValueEnum))]
pub enum UpAxis {
    #[default]
    Y,
    Z,
}

impl UpAxis {
    /// Convert a point from this axis convention into file space.
    pub fn to_file(self, point: Vec3) -> Vec3 {
        match self {
            UpAxis::Y => point,
            UpAxis::Z => Vec3::new(point.x, point.z, -point.y),
        }
    }

    /// Convert a point from file space into this axis convention.
    pub fn from_file(self, point: Vec3) -> Vec3 {
        match self {
            UpAxis::Y => point,
            UpAxis::Z => Vec3::new(point.x, -point.z, point.y),
        }
    }
}

fn parse_error(line: usize, detail: impl Into<String>) -> Report<KclError> {
    Report::new(KclError::ObjParse {
        line,
        detail: detail.into(),
    })
}

/// Flags named by a `flag_<n>` material, if it is one.
pub fn material_flags(name: &str) -> Option<u16> {
    let value = name.strip_prefix(FLAG_MATERIAL_PREFIX)?;
    match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => u16::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}

fn resolve_index(token: &str, vertex_count: usize, line: usize) -> KclResult<usize> {
    let raw = token.split('/').next().unwrap_or_default();
    let index: i64 = raw
        .parse()
        .map_err(|_| parse_error(line, format!("bad vertex index {token:?}")))?;

    let resolved = match index {
        0 => None,
        i if i > 0 => Some(i as usize - 1),
        i => vertex_count.checked_sub(i.unsigned_abs() as usize),
    };
    resolved
        .filter(|&i| i < vertex_count)
        .ok_or_else(|| {
            parse_error(
                line,
                format!("vertex index {index} out of range for {vertex_count} vertices"),
            )
        })
}

/// Read every face of an OBJ stream as collision triangles in file space.
///
/// Polygons are fan-triangulated around their first vertex.
pub fn read_obj(
    reader: impl BufRead,
    up_axis: UpAxis,
    default_flags: u16,
) -> KclResult<Vec<CollisionTriangle>> {
    let mut vertices: Vec<Vec3> = Vec::new();
    let mut triangles = Vec::new();
    let mut flags = default_flags;

    for (i, line) in reader.lines().enumerate() {
        let line_number = i + 1;
        let line = line.map_err(io_error)?;
        let mut tokens = line.split_whitespace();

        match tokens.next() {
            Some("v") => {
                let mut coords = [0f32; 3];
                for coord in &mut coords {
                    let token = tokens
                        .next()
                        .ok_or_else(|| parse_error(line_number, "vertex needs 3 coordinates"))?;
                    *coord = token.parse().map_err(|_| {
                        parse_error(line_number, format!("bad coordinate {token:?}"))
                    })?;
                }
                vertices.push(up_axis.to_file(Vec3::from_array(coords)));
            }
            Some("f") => {
                let corners = tokens
                    .map(|token| resolve_index(token, vertices.len(), line_number))
                    .collect::<KclResult<Vec<_>>>()?;
                if corners.len() < 3 {
                    return Err(parse_error(line_number, "face needs at least 3 vertices"));
                }
                for pair in corners[1..].windows(2) {
                    triangles.push(CollisionTriangle::new(
                        [vertices[corners[0]], vertices[pair[0]], vertices[pair[1]]],
                        flags,
                    ));
                }
            }
            Some("usemtl") => {
                flags = tokens
                    .next()
                    .and_then(material_flags)
                    .unwrap_or(default_flags);
            }
            _ => {}
        }
    }

    Ok(triangles)
}

fn io_error(e: std::io::Error) -> Report<KclError> {
    Report::new(KclError::Io(e))
}

/// Write every model of `file` as an OBJ object named `Model<i>`.
///
/// Lines go straight to `writer`; wrap it in a `BufWriter` for files.
pub fn write_obj(mut writer: impl Write, file: &KclFile, up_axis: UpAxis) -> KclResult<()> {
    let mut next_vertex = 1usize;

    for (model_index, model) in file.models.iter().enumerate() {
        writeln!(writer, "o Model{model_index}").map_err(io_error)?;
        let mut current_flags = None;

        for triangle in model.collision_triangles()? {
            if current_flags != Some(triangle.flags) {
                writeln!(writer, "usemtl flag_0x{:04X}", triangle.flags).map_err(io_error)?;
                current_flags = Some(triangle.flags);
            }
            for vertex in triangle.vertices.map(|v| up_axis.from_file(v)) {
                writeln!(writer, "v {} {} {}", vertex.x, vertex.y, vertex.z).map_err(io_error)?;
            }
            writeln!(
                writer,
                "f {} {} {}",
                next_vertex,
                next_vertex + 1,
                next_vertex + 2
            )
            .map_err(io_error)?;
            next_vertex += 3;
        }
    }

    writer.flush().map_err(io_error)?;
    Ok(())
}
