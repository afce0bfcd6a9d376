//! Shared winnow-based parsing utilities used by the header, model and octree parsers.

use glam::Vec3;
use rootcause::Report;
use tracing::warn;
use winnow::Parser;
use winnow::binary::{be_f32, be_u32};
use winnow::error::ContextError;

use crate::error::{KclError, KclResult};

/// Common result type for winnow parsers.
pub type WResult<T> = Result<T, winnow::error::ErrMode<ContextError>>;

/// Resolve a relative offset: base_offset + rel_value = absolute file offset.
pub fn resolve_relptr(base_offset: usize, rel_value: u32) -> usize {
    base_offset + rel_value as usize
}

/// Parse three big-endian `f32`s as a vector.
pub fn parse_vec3(input: &mut &[u8]) -> WResult<Vec3> {
    let x = be_f32.parse_next(input)?;
    let y = be_f32.parse_next(input)?;
    let z = be_f32.parse_next(input)?;
    Ok(Vec3::new(x, y, z))
}

/// Parse three big-endian `u32`s.
pub fn parse_u32x3(input: &mut &[u8]) -> WResult<[u32; 3]> {
    let x = be_u32.parse_next(input)?;
    let y = be_u32.parse_next(input)?;
    let z = be_u32.parse_next(input)?;
    Ok([x, y, z])
}

/// Borrow `need` bytes of `file_data` starting at `offset`.
pub fn slice_at(file_data: &[u8], offset: usize, need: usize) -> KclResult<&[u8]> {
    match offset.checked_add(need) {
        Some(end) if end <= file_data.len() => Ok(&file_data[offset..end]),
        _ => Err(Report::new(KclError::DataTooShort {
            offset,
            need,
            have: file_data.len().saturating_sub(offset),
        })),
    }
}

/// Borrow everything from `offset` to the end of `file_data`.
pub fn tail_at(file_data: &[u8], offset: usize) -> KclResult<&[u8]> {
    file_data.get(offset..).ok_or_else(|| {
        Report::new(KclError::DataTooShort {
            offset,
            need: 0,
            have: 0,
        })
    })
}

/// Number of `stride`-sized elements in the byte range `start..end`.
///
/// Trailing bytes that do not form a whole element are ignored.
pub fn element_count(section: &str, start: usize, end: usize, stride: usize) -> KclResult<usize> {
    let size = end.checked_sub(start).ok_or_else(|| {
        Report::new(KclError::InvalidSectionLayout {
            detail: format!("{section} section ends at 0x{end:X} before it starts at 0x{start:X}"),
        })
    })?;
    if size % stride != 0 {
        warn!(
            section,
            size, stride, "section size is not a multiple of its stride, ignoring trailing bytes"
        );
    }
    Ok(size / stride)
}
