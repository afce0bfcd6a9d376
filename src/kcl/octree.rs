//! Triangle octree: construction and on-disk (de)serialization.
//!
//! ## Layout
//!
//! ```text
//! Slot arrays (u32 each), breadth-first:
//!   root slots          one per root cube
//!   child slot arrays   8 per branch, in the order the branches are visited
//! Triangle lists (u16 each):
//!   one list per leaf, terminated by 0xFFFF
//! ```
//!
//! All values are relative to the start of the octree section. A branch slot
//! holds the offset of its 8 child slots. A leaf slot holds
//! `(list_offset - 2) | 0x80000000`.

use std::collections::VecDeque;

use glam::Vec3;
use rootcause::Report;
use tracing::debug;
use winnow::Parser;
use winnow::binary::{be_u16, be_u32};
use winnow::error::{ContextError, ErrMode};

#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::data::parser_utils::{slice_at, tail_at};
use crate::data::writer::{BinaryWriter, OffsetSlot, to_offset};
use crate::error::{KclError, KclResult};
use crate::geometry::triangle_overlaps_cube;
use crate::kcl::EncodeOptions;
use crate::kcl::grid::RootLayout;

/// High bit of a slot value marks a leaf.
pub const LEAF_FLAG: u32 = 0x8000_0000;
/// Terminates every leaf's triangle list.
pub const LIST_TERMINATOR: u16 = 0xFFFF;
/// Leaf slots point this many bytes before their triangle list.
const LEAF_BIAS: u32 = 2;
/// Deepest branch nesting accepted when decoding.
const MAX_DEPTH: usize = 32;

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OctreeNode {
    pub center: Vec3,
    pub half_width: f32,
    pub kind: OctreeNodeKind,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OctreeNodeKind {
    /// Indices of the triangles overlapping this cube.
    Leaf(Vec<u16>),
    /// Child cubes, index `x + 2y + 4z`.
    Branch(Box<[OctreeNode; 8]>),
}

/// Center and half width of child `index` (`x + 2y + 4z`) of a cube.
pub fn child_cube(center: Vec3, half_width: f32, index: usize) -> (Vec3, f32) {
    let quarter = half_width / 2.0;
    let sign = |bit: usize| if bit == 0 { -1.0 } else { 1.0 };
    let offset = Vec3::new(
        sign(index & 1),
        sign((index >> 1) & 1),
        sign((index >> 2) & 1),
    );
    (center + offset * quarter, quarter)
}

impl OctreeNode {
    /// Build the subtree for the cube at `base` with side `width`.
    pub fn build(
        base: Vec3,
        width: f32,
        triangles: &[[Vec3; 3]],
        candidates: &[u16],
        options: &EncodeOptions,
    ) -> OctreeNode {
        let half_width = width / 2.0;
        build_cube(
            base + Vec3::splat(half_width),
            half_width,
            triangles,
            candidates,
            options,
        )
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, OctreeNodeKind::Leaf(_))
    }

    pub fn triangles(&self) -> Option<&[u16]> {
        match &self.kind {
            OctreeNodeKind::Leaf(triangles) => Some(triangles),
            OctreeNodeKind::Branch(_) => None,
        }
    }

    pub fn children(&self) -> Option<&[OctreeNode; 8]> {
        match &self.kind {
            OctreeNodeKind::Leaf(_) => None,
            OctreeNodeKind::Branch(children) => Some(children),
        }
    }

    /// Minimum corner of the cube.
    pub fn base(&self) -> Vec3 {
        self.center - Vec3::splat(self.half_width)
    }

    /// All leaves below (or at) this node, depth-first.
    pub fn leaves(&self) -> Vec<&OctreeNode> {
        let mut leaves = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            match &node.kind {
                OctreeNodeKind::Leaf(_) => leaves.push(node),
                OctreeNodeKind::Branch(children) => stack.extend(children.iter().rev()),
            }
        }
        leaves
    }

    /// Number of branch levels below this node.
    pub fn depth(&self) -> usize {
        match &self.kind {
            OctreeNodeKind::Leaf(_) => 0,
            OctreeNodeKind::Branch(children) => {
                1 + children.iter().map(OctreeNode::depth).max().unwrap_or(0)
            }
        }
    }
}

fn build_cube(
    center: Vec3,
    half_width: f32,
    triangles: &[[Vec3; 3]],
    candidates: &[u16],
    options: &EncodeOptions,
) -> OctreeNode {
    let members: Vec<u16> = candidates
        .iter()
        .copied()
        .filter(|&idx| triangle_overlaps_cube(&triangles[idx as usize], center, half_width))
        .collect();

    let kind = if members.len() <= options.max_triangles_per_leaf
        || half_width < options.min_cube_width as f32
    {
        OctreeNodeKind::Leaf(members)
    } else {
        let children = std::array::from_fn(|index| {
            let (child_center, child_half) = child_cube(center, half_width, index);
            build_cube(child_center, child_half, triangles, &members, options)
        });
        OctreeNodeKind::Branch(Box::new(children))
    };

    OctreeNode {
        center,
        half_width,
        kind,
    }
}

/// Build one subtree per root cube of `layout`, in file order.
///
/// `triangles` must already be limited to 16-bit indices.
pub fn build_roots(
    layout: &RootLayout,
    triangles: &[[Vec3; 3]],
    options: &EncodeOptions,
) -> Vec<OctreeNode> {
    let candidates: Vec<u16> = (0..triangles.len()).map(|idx| idx as u16).collect();
    let cubes = layout.root_cubes();

    #[cfg(feature = "rayon")]
    let roots: Vec<OctreeNode> = cubes
        .par_iter()
        .map(|&(center, half_width)| {
            build_cube(center, half_width, triangles, &candidates, options)
        })
        .collect();
    #[cfg(not(feature = "rayon"))]
    let roots: Vec<OctreeNode> = cubes
        .iter()
        .map(|&(center, half_width)| {
            build_cube(center, half_width, triangles, &candidates, options)
        })
        .collect();

    let stats = OctreeStats::collect(&roots);
    debug!(
        roots = stats.roots,
        branches = stats.branches,
        leaves = stats.leaves,
        max_depth = stats.max_depth,
        max_leaf_triangles = stats.max_leaf_triangles,
        "built octree"
    );
    roots
}

/// Serialize `roots` at the writer's current position.
pub fn write_octree(writer: &mut BinaryWriter, roots: &[OctreeNode]) -> KclResult<()> {
    let start = writer.tell();

    let mut queue: VecDeque<(OffsetSlot, &OctreeNode)> = VecDeque::with_capacity(roots.len());
    for root in roots {
        queue.push_back((writer.reserve_offset(), root));
    }

    let mut leaves = Vec::new();
    while let Some((slot, node)) = queue.pop_front() {
        match &node.kind {
            OctreeNodeKind::Branch(children) => {
                writer.satisfy_here(slot, start)?;
                for child in children.iter() {
                    queue.push_back((writer.reserve_offset(), child));
                }
            }
            OctreeNodeKind::Leaf(triangles) => leaves.push((slot, triangles)),
        }
    }

    for (slot, triangles) in leaves {
        let list = to_offset(writer.tell(), start)?;
        let value = list
            .checked_sub(LEAF_BIAS)
            .filter(|value| value & LEAF_FLAG == 0)
            .ok_or_else(|| {
                Report::new(KclError::InvalidSectionLayout {
                    detail: format!("triangle list at 0x{list:X} cannot be addressed by a leaf"),
                })
            })?;
        writer.satisfy_offset(slot, value | LEAF_FLAG);
        for &triangle in triangles.iter() {
            writer.write_u16(triangle);
        }
        writer.write_u16(LIST_TERMINATOR);
    }

    Ok(())
}

/// Decode the octree section starting at `section_base` in `file_data`.
pub fn parse_octree(
    file_data: &[u8],
    section_base: usize,
    layout: &RootLayout,
    triangle_count: usize,
) -> KclResult<Vec<OctreeNode>> {
    let section = tail_at(file_data, section_base)?;
    let reader = OctreeReader {
        section,
        section_base,
        triangle_count,
    };
    (0..layout.root_count())
        .map(|index| {
            let (center, half_width) = layout.root_cube(index);
            reader.parse_node(index * 4, center, half_width, 0)
        })
        .collect()
}

struct OctreeReader<'a> {
    section: &'a [u8],
    section_base: usize,
    triangle_count: usize,
}

impl OctreeReader<'_> {
    fn invalid(&self, offset: usize, detail: String) -> Report<KclError> {
        Report::new(KclError::InvalidOctree {
            offset: self.section_base + offset,
            detail,
        })
    }

    fn parse_node(
        &self,
        slot: usize,
        center: Vec3,
        half_width: f32,
        depth: usize,
    ) -> KclResult<OctreeNode> {
        let input = &mut slice_at(self.section, slot, 4)?;
        let value = be_u32
            .parse_next(input)
            .map_err(|e: ErrMode<ContextError>| self.invalid(slot, format!("{e}")))?;

        let kind = if value & LEAF_FLAG != 0 {
            let list = (value & !LEAF_FLAG) as usize + LEAF_BIAS as usize;
            OctreeNodeKind::Leaf(self.parse_triangle_list(list)?)
        } else {
            let array = value as usize;
            if array <= slot || array % 4 != 0 {
                return Err(self.invalid(
                    slot,
                    format!(
                        "branch slot points to 0x{array:X}, expected an aligned offset past the slot"
                    ),
                ));
            }
            if depth >= MAX_DEPTH {
                return Err(self.invalid(slot, format!("branches nest deeper than {MAX_DEPTH}")));
            }
            let mut children = Vec::with_capacity(8);
            for index in 0..8 {
                let (child_center, child_half) = child_cube(center, half_width, index);
                children.push(self.parse_node(
                    array + index * 4,
                    child_center,
                    child_half,
                    depth + 1,
                )?);
            }
            let children: Box<[OctreeNode; 8]> = children
                .into_boxed_slice()
                .try_into()
                .map_err(|_| self.invalid(array, "branch does not have 8 children".to_string()))?;
            OctreeNodeKind::Branch(children)
        };

        Ok(OctreeNode {
            center,
            half_width,
            kind,
        })
    }

    fn parse_triangle_list(&self, list: usize) -> KclResult<Vec<u16>> {
        let input = &mut tail_at(self.section, list)?;
        let mut triangles = Vec::new();
        loop {
            let index = be_u16
                .parse_next(input)
                .map_err(|_: ErrMode<ContextError>| {
                    self.invalid(list, "unterminated triangle list".to_string())
                })?;
            if index == LIST_TERMINATOR {
                return Ok(triangles);
            }
            if index as usize >= self.triangle_count {
                return Err(self.invalid(
                    list,
                    format!(
                        "triangle index {index} out of range for {} triangles",
                        self.triangle_count
                    ),
                ));
            }
            triangles.push(index);
        }
    }
}

/// Shape summary of a set of root subtrees.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OctreeStats {
    pub roots: usize,
    pub branches: usize,
    pub leaves: usize,
    pub empty_leaves: usize,
    pub max_depth: usize,
    pub max_leaf_triangles: usize,
}

impl OctreeStats {
    pub fn collect(roots: &[OctreeNode]) -> OctreeStats {
        let mut stats = OctreeStats {
            roots: roots.len(),
            ..OctreeStats::default()
        };
        let mut stack: Vec<(&OctreeNode, usize)> = roots.iter().map(|root| (root, 0)).collect();
        while let Some((node, depth)) = stack.pop() {
            stats.max_depth = stats.max_depth.max(depth);
            match &node.kind {
                OctreeNodeKind::Leaf(triangles) => {
                    stats.leaves += 1;
                    if triangles.is_empty() {
                        stats.empty_leaves += 1;
                    }
                    stats.max_leaf_triangles = stats.max_leaf_triangles.max(triangles.len());
                }
                OctreeNodeKind::Branch(children) => {
                    stats.branches += 1;
                    stack.extend(children.iter().map(|child| (child, depth + 1)));
                }
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(max_triangles_per_leaf: usize, min_cube_width: u32) -> EncodeOptions {
        EncodeOptions::builder()
            .max_triangles_per_leaf(max_triangles_per_leaf)
            .min_cube_width(min_cube_width)
            .build()
    }

    /// Small triangles spread evenly through the cube `[0, width)^3`.
    fn scattered_triangles(count: usize, width: f32) -> Vec<[Vec3; 3]> {
        let per_axis = (count as f32).cbrt().ceil() as usize;
        let step = width / per_axis as f32;
        (0..count)
            .map(|i| {
                let cell = Vec3::new(
                    (i % per_axis) as f32,
                    ((i / per_axis) % per_axis) as f32,
                    (i / (per_axis * per_axis)) as f32,
                );
                let p = (cell + Vec3::splat(0.3)) * step;
                [p, p + Vec3::new(5.0, 0.0, 0.0), p + Vec3::new(0.0, 5.0, 2.0)]
            })
            .collect()
    }

    fn all_indices(count: usize) -> Vec<u16> {
        (0..count as u16).collect()
    }

    #[test]
    fn test_child_cube_order() {
        let (c0, h0) = child_cube(Vec3::ZERO, 4.0, 0);
        assert_eq!((c0, h0), (Vec3::splat(-2.0), 2.0));
        assert_eq!(child_cube(Vec3::ZERO, 4.0, 1).0, Vec3::new(2.0, -2.0, -2.0));
        assert_eq!(child_cube(Vec3::ZERO, 4.0, 2).0, Vec3::new(-2.0, 2.0, -2.0));
        assert_eq!(child_cube(Vec3::ZERO, 4.0, 4).0, Vec3::new(-2.0, -2.0, 2.0));
        assert_eq!(child_cube(Vec3::ZERO, 4.0, 7).0, Vec3::splat(2.0));
    }

    #[test]
    fn test_few_triangles_make_a_leaf() {
        let triangles = scattered_triangles(10, 512.0);
        let node = OctreeNode::build(
            Vec3::ZERO,
            512.0,
            &triangles,
            &all_indices(10),
            &options(30, 256),
        );
        assert_eq!(node.triangles().unwrap(), &all_indices(10)[..]);
    }

    #[test]
    fn test_min_width_stops_after_one_split() {
        let triangles = scattered_triangles(40, 512.0);
        let node = OctreeNode::build(
            Vec3::ZERO,
            512.0,
            &triangles,
            &all_indices(40),
            &options(30, 256),
        );

        let children = node.children().expect("root should split");
        for child in children.iter() {
            assert_eq!(child.half_width, 128.0);
            assert!(child.is_leaf());
        }
        assert_eq!(node.depth(), 1);
    }

    #[test]
    fn test_every_triangle_reaches_a_leaf() {
        let triangles = scattered_triangles(200, 2048.0);
        let node = OctreeNode::build(
            Vec3::ZERO,
            2048.0,
            &triangles,
            &all_indices(200),
            &options(8, 64),
        );
        assert!(node.depth() >= 2);

        let mut seen = vec![false; triangles.len()];
        for leaf in node.leaves() {
            let members = leaf.triangles().unwrap();
            assert!(members.len() <= 8 || leaf.half_width < 64.0 * 2.0);
            for &idx in members {
                seen[idx as usize] = true;
            }
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn test_outside_and_straddling_triangles() {
        let triangles = vec![
            // Entirely outside the 16-wide cube at the origin.
            [
                Vec3::new(100.0, 100.0, 100.0),
                Vec3::new(101.0, 100.0, 100.0),
                Vec3::new(100.0, 101.0, 100.0),
            ],
            // Crosses the x = 8 split plane inside the cube.
            [
                Vec3::new(6.0, 2.0, 2.0),
                Vec3::new(10.0, 2.0, 2.0),
                Vec3::new(6.0, 3.0, 2.0),
            ],
            [
                Vec3::new(1.0, 1.0, 1.0),
                Vec3::new(2.0, 1.0, 1.0),
                Vec3::new(1.0, 2.0, 1.0),
            ],
        ];
        let node = OctreeNode::build(Vec3::ZERO, 16.0, &triangles, &[0, 1, 2], &options(1, 8));

        let children = node.children().unwrap();
        assert_eq!(children[0].triangles().unwrap(), &[1, 2]);
        assert_eq!(children[1].triangles().unwrap(), &[1]);
        for leaf in node.leaves() {
            assert!(!leaf.triangles().unwrap().contains(&0));
        }
    }

    #[test]
    fn test_empty_leaf_serialization() {
        let root = OctreeNode {
            center: Vec3::ZERO,
            half_width: 1.0,
            kind: OctreeNodeKind::Leaf(Vec::new()),
        };
        let mut writer = BinaryWriter::new();
        write_octree(&mut writer, &[root]).unwrap();
        let bytes = writer.finish().unwrap();

        // One slot, then the list holding just the terminator at offset 4.
        assert_eq!(bytes.len(), 6);
        let slot = u32::from_be_bytes(bytes[0..4].try_into().unwrap());
        assert_eq!(slot, LEAF_FLAG | 2);
        assert_eq!(&bytes[4..6], &[0xFF, 0xFF]);
    }

    #[test]
    fn test_branch_serialization_layout() {
        let leaf = |center: Vec3, triangles: Vec<u16>| OctreeNode {
            center,
            half_width: 1.0,
            kind: OctreeNodeKind::Leaf(triangles),
        };
        let children = std::array::from_fn(|i| leaf(child_cube(Vec3::ZERO, 2.0, i).0, vec![i as u16]));
        let roots = [
            OctreeNode {
                center: Vec3::ZERO,
                half_width: 2.0,
                kind: OctreeNodeKind::Branch(Box::new(children)),
            },
            leaf(Vec3::new(4.0, 0.0, 0.0), vec![3, 4]),
        ];

        let mut writer = BinaryWriter::new();
        write_octree(&mut writer, &roots).unwrap();
        let bytes = writer.finish().unwrap();
        let word = |offset: usize| u32::from_be_bytes(bytes[offset..offset + 4].try_into().unwrap());

        // Root slots at 0 and 4, child slots at 8..40, lists after.
        assert_eq!(word(0), 8);
        assert_eq!(word(4), LEAF_FLAG | (40 - 2));
        assert_eq!(&bytes[40..46], &[0, 3, 0, 4, 0xFF, 0xFF]);
        assert_eq!(word(8), LEAF_FLAG | (46 - 2));
        assert_eq!(&bytes[46..50], &[0, 0, 0xFF, 0xFF]);

        let layout = RootLayout::new(Vec3::splat(-2.0), 2, [1, 0, 0]).unwrap();
        let parsed = parse_octree(&bytes, 0, &layout, 8).unwrap();
        assert_eq!(parsed.len(), 2);
        let parsed_children = parsed[0].children().unwrap();
        for (i, child) in parsed_children.iter().enumerate() {
            assert_eq!(child.triangles().unwrap(), &[i as u16]);
            assert_eq!(child.center, roots[0].children().unwrap()[i].center);
        }
        assert_eq!(parsed[1].triangles().unwrap(), &[3, 4]);
    }

    #[test]
    fn test_parse_rejects_backward_branch() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0u32.to_be_bytes());
        let layout = RootLayout::new(Vec3::ZERO, 8, [0, 0, 0]).unwrap();
        let err = parse_octree(&bytes, 0, &layout, 1).unwrap_err();
        assert!(matches!(err.current_context(), KclError::InvalidOctree { .. }));
    }

    #[test]
    fn test_parse_rejects_out_of_range_triangle() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(LEAF_FLAG | 2).to_be_bytes());
        bytes.extend_from_slice(&[0x00, 0x05, 0xFF, 0xFF]);
        let layout = RootLayout::new(Vec3::ZERO, 8, [0, 0, 0]).unwrap();
        let err = parse_octree(&bytes, 0, &layout, 5).unwrap_err();
        assert!(matches!(err.current_context(), KclError::InvalidOctree { .. }));
        assert!(parse_octree(&bytes, 0, &layout, 6).is_ok());
    }

    #[test]
    fn test_stats() {
        let triangles = scattered_triangles(40, 512.0);
        let node = OctreeNode::build(
            Vec3::ZERO,
            512.0,
            &triangles,
            &all_indices(40),
            &options(30, 256),
        );
        let stats = OctreeStats::collect(std::slice::from_ref(&node));
        assert_eq!(stats.roots, 1);
        assert_eq!(stats.branches, 1);
        assert_eq!(stats.leaves, 8);
        assert_eq!(stats.max_depth, 1);
    }
}
