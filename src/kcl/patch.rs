//! In-place collision flag edits.

use std::collections::BTreeMap;

use rootcause::Report;
use tracing::debug;

use crate::data::parser_utils::resolve_relptr;
use crate::error::{KclError, KclResult};
use crate::kcl::model::TRIANGLE_STRIDE;
use crate::kcl::parse_kcl;

/// Offset of the flags field within a triangle record.
const FLAGS_FIELD: usize = 14;

/// Rewrite the collision flags of every triangle whose global index is a key
/// of `flags`. Returns the number of triangle records changed.
///
/// All indices are resolved before anything is written, so on error `data` is
/// left untouched.
pub fn patch_collision_flags(data: &mut [u8], flags: &BTreeMap<u32, u16>) -> KclResult<usize> {
    let file = parse_kcl(data)?;

    let mut writes: Vec<(usize, u16)> = Vec::new();
    for (&global_index, &value) in flags {
        let before = writes.len();
        for (model, &model_start) in file.models.iter().zip(&file.model_offsets) {
            let triangles_at = resolve_relptr(model_start as usize, model.header.triangles_offset);
            writes.extend(
                model
                    .triangles
                    .iter()
                    .enumerate()
                    .filter(|(_, triangle)| triangle.global_index == global_index)
                    .map(|(i, _)| (triangles_at + i * TRIANGLE_STRIDE + FLAGS_FIELD, value)),
            );
        }
        if writes.len() == before {
            return Err(Report::new(KclError::GlobalIndexNotFound { global_index }));
        }
    }

    for &(address, value) in &writes {
        data[address..address + 2].copy_from_slice(&value.to_be_bytes());
    }
    debug!(triangles = writes.len(), "patched collision flags");
    Ok(writes.len())
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;
    use crate::geometry::{CollisionMesh, CollisionTriangle};
    use crate::kcl::{EncodeOptions, write_kcl};

    fn encoded() -> Vec<u8> {
        let mesh = CollisionMesh::new(vec![
            CollisionTriangle::new([Vec3::ZERO, Vec3::X * 10.0, Vec3::Y * 10.0], 1),
            CollisionTriangle::new([Vec3::Z * 5.0, Vec3::Y * 10.0, Vec3::X * 10.0], 2),
        ])
        .unwrap();
        write_kcl(&[mesh], &EncodeOptions::default()).unwrap()
    }

    #[test]
    fn test_only_flag_bytes_change() {
        let original = encoded();
        let mut patched = original.clone();
        let changed =
            patch_collision_flags(&mut patched, &BTreeMap::from([(1, 0xABCD)])).unwrap();
        assert_eq!(changed, 1);

        let differing: Vec<usize> = (0..original.len())
            .filter(|&i| original[i] != patched[i])
            .collect();
        assert_eq!(differing.len(), 2);

        let file = parse_kcl(&patched).unwrap();
        let triangles = &file.models[0].triangles;
        assert_eq!(triangles[0].collision_flags, 1);
        assert_eq!(triangles[1].collision_flags, 0xABCD);
    }

    #[test]
    fn test_unknown_index_leaves_buffer_untouched() {
        let original = encoded();
        let mut patched = original.clone();
        let err = patch_collision_flags(&mut patched, &BTreeMap::from([(0, 7), (9, 7)]))
            .unwrap_err();
        assert!(matches!(
            err.current_context(),
            KclError::GlobalIndexNotFound { global_index: 9 }
        ));
        assert_eq!(patched, original);
    }
}
