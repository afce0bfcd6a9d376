//! Root cube grid of a model's octree.
//!
//! The padded bounding box is covered by a grid of equally sized
//! power-of-two cubes. Each axis of the grid spans `2^n_axis` units and is cut
//! into `2^(n_axis - n)` cubes of side `2^n`. The model header stores the same
//! geometry as masks and shifts, from which [`RootLayout`] recovers it.

use glam::Vec3;
use itertools::iproduct;
use rootcause::Report;

use crate::error::{KclError, KclResult};
use crate::geometry::Bounds;
use crate::kcl::header::ModelHeader;

/// Subtracted from the mesh minimum before the grid is derived.
pub const MIN_PADDING: Vec3 = Vec3::new(50.0, 80.0, 50.0);
/// Added to the mesh maximum before the grid is derived.
pub const MAX_PADDING: Vec3 = Vec3::splat(50.0);

/// Largest number of root cube index bits a model may use.
const MAX_ROOT_BITS: u32 = 24;

/// Lowest `n` such that `value <= 2^n`.
pub fn next_exponent(value: f32) -> u32 {
    if value <= 1.0 {
        0
    } else {
        f64::from(value).log2().ceil() as u32
    }
}

/// Header word for the axis mask `0xFFFFFFFF << n`, stored as an `f32`.
///
/// The float cannot represent masks below `n = 8` exactly; those round up to
/// 2^32 and no longer decode.
pub fn encode_axis_mask(n: u32) -> u32 {
    (u32::MAX.checked_shl(n).unwrap_or(0) as f32).to_bits()
}

/// Recover `n` from an axis mask word.
///
/// Accepts both the `f32` encoding and a plain integer mask. Integer masks
/// always have the top bit set, which a positive float never does.
pub fn axis_mask_exponent(word: u32) -> Option<u32> {
    if word & 0x8000_0000 != 0 {
        let n = word.trailing_zeros();
        return (word.leading_ones() + n == 32).then_some(n);
    }

    let value = f64::from(f32::from_bits(word));
    let full = f64::from(u32::MAX) + 1.0;
    if !value.is_finite() || value <= 0.0 || value >= full || value.fract() != 0.0 {
        return None;
    }
    let span = (full - value) as u64;
    span.is_power_of_two().then(|| span.trailing_zeros())
}

/// Grid derived from a mesh bounding box when encoding a new model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OctreeGrid {
    /// Padded minimum corner; also the model origin.
    pub min: Vec3,
    /// Padded maximum corner.
    pub max: Vec3,
    /// Per-axis size exponents `n_x`, `n_y`, `n_z`.
    pub axis_exponents: [u32; 3],
    /// Root cube exponent `n`.
    pub cube_exponent: u32,
}

impl OctreeGrid {
    pub fn for_bounds(bounds: &Bounds, min_cube_width: u32) -> OctreeGrid {
        let min = bounds.min - MIN_PADDING;
        let max = bounds.max + MAX_PADDING;
        let extent = max - min;

        let n_min = next_exponent(min_cube_width as f32);
        let axis_exponents = extent.to_array().map(|e| next_exponent(e).max(n_min));
        let smallest = axis_exponents.iter().copied().min().unwrap_or(n_min);
        let cube_exponent = smallest.saturating_sub(1).max(n_min);

        OctreeGrid {
            min,
            max,
            axis_exponents,
            cube_exponent,
        }
    }

    /// Per-axis root cube counts.
    pub fn divisions(&self) -> [u32; 3] {
        self.root_bits().map(|bits| 1u32 << bits)
    }

    /// Header words for the masks `0xFFFFFFFF << n_axis`.
    pub fn masks(&self) -> [u32; 3] {
        self.axis_exponents.map(encode_axis_mask)
    }

    /// Model header shifts `[n, n_x - n, (n_x - n) + (n_y - n)]`.
    pub fn shifts(&self) -> [u32; 3] {
        let [bits_x, bits_y, _] = self.root_bits();
        [self.cube_exponent, bits_x, bits_x + bits_y]
    }

    fn root_bits(&self) -> [u32; 3] {
        self.axis_exponents.map(|n| n - self.cube_exponent)
    }

    pub fn layout(&self) -> KclResult<RootLayout> {
        RootLayout::new(self.min, self.cube_exponent, self.root_bits())
    }
}

/// Placement of the root cubes, shared by the encoder and the decoder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RootLayout {
    pub origin: Vec3,
    pub cube_exponent: u32,
    /// Index bits per axis; root index is `x | y << bits_x | z << (bits_x + bits_y)`.
    pub bits: [u32; 3],
}

impl RootLayout {
    pub fn new(origin: Vec3, cube_exponent: u32, bits: [u32; 3]) -> KclResult<RootLayout> {
        let total: u32 = bits.iter().sum();
        if total > MAX_ROOT_BITS {
            return Err(Report::new(KclError::InvalidSectionLayout {
                detail: format!("root grid needs 2^{total} cubes"),
            }));
        }
        Ok(RootLayout {
            origin,
            cube_exponent,
            bits,
        })
    }

    /// Recover the root grid from a model header's masks and shifts.
    pub fn from_model_header(header: &ModelHeader) -> KclResult<RootLayout> {
        let [shift, y_shift, z_shift] = header.shifts;
        let invalid = |detail: String| {
            Report::new(KclError::InvalidSectionLayout {
                detail: format!("model header: {detail}"),
            })
        };

        let mut bits = [0u32; 3];
        for (axis, &word) in header.masks.iter().enumerate() {
            let n = axis_mask_exponent(word).ok_or_else(|| {
                invalid(format!("axis {axis} mask word 0x{word:08X} is not a mask"))
            })?;
            bits[axis] = n.checked_sub(shift).ok_or_else(|| {
                invalid(format!(
                    "axis {axis} mask 2^{n} is finer than the cube shift {shift}"
                ))
            })?;
        }
        if bits[0] != y_shift || bits[0] + bits[1] != z_shift {
            return Err(invalid(format!(
                "shifts {:?} disagree with masks {:08X?}",
                header.shifts, header.masks
            )));
        }

        RootLayout::new(header.min_coordinate, shift, bits)
    }

    pub fn cube_width(&self) -> f32 {
        2f32.powi(self.cube_exponent as i32)
    }

    pub fn root_count(&self) -> usize {
        1 << self.bits.iter().sum::<u32>()
    }

    /// Center and half width of root cube `index`.
    pub fn root_cube(&self, index: usize) -> (Vec3, f32) {
        let [bits_x, bits_y, _] = self.bits;
        let x = index & ((1 << bits_x) - 1);
        let y = (index >> bits_x) & ((1 << bits_y) - 1);
        let z = index >> (bits_x + bits_y);
        let width = self.cube_width();
        let base = self.origin + width * Vec3::new(x as f32, y as f32, z as f32);
        (base + Vec3::splat(width / 2.0), width / 2.0)
    }

    /// All root cubes in file order: z-major, then y, then x.
    pub fn root_cubes(&self) -> Vec<(Vec3, f32)> {
        let [bits_x, bits_y, bits_z] = self.bits;
        iproduct!(0..1usize << bits_z, 0..1usize << bits_y, 0..1usize << bits_x)
            .map(|(z, y, x)| self.root_cube(x | y << bits_x | z << (bits_x + bits_y)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_exponent() {
        assert_eq!(next_exponent(0.0), 0);
        assert_eq!(next_exponent(1.0), 0);
        assert_eq!(next_exponent(2.0), 1);
        assert_eq!(next_exponent(256.0), 8);
        assert_eq!(next_exponent(257.0), 9);
        assert_eq!(next_exponent(1000.0), 10);
    }

    #[test]
    fn test_grid_for_small_mesh() {
        // 10 x 10 x 0 mesh: padded to 110 x 140 x 110, every axis clamps to 2^8.
        let bounds = Bounds::new(Vec3::ZERO, Vec3::new(10.0, 10.0, 0.0));
        let grid = OctreeGrid::for_bounds(&bounds, 256);
        assert_eq!(grid.min, Vec3::new(-50.0, -80.0, -50.0));
        assert_eq!(grid.max, Vec3::new(60.0, 60.0, 50.0));
        assert_eq!(grid.axis_exponents, [8, 8, 8]);
        assert_eq!(grid.cube_exponent, 8);
        assert_eq!(grid.divisions(), [1, 1, 1]);
        assert_eq!(grid.shifts(), [8, 0, 0]);
        assert_eq!(grid.masks(), [0x4F7FFFFF; 3]);
    }

    #[test]
    fn test_grid_for_elongated_mesh() {
        // X spans 4000 (+100 padding) -> 2^13, Y and Z span ~1000 -> 2^10.
        let bounds = Bounds::new(Vec3::ZERO, Vec3::new(4000.0, 850.0, 900.0));
        let grid = OctreeGrid::for_bounds(&bounds, 256);
        assert_eq!(grid.axis_exponents, [13, 10, 10]);
        assert_eq!(grid.cube_exponent, 9);
        assert_eq!(grid.divisions(), [16, 2, 2]);
        assert_eq!(grid.shifts(), [9, 4, 5]);
        assert_eq!(
            grid.masks(),
            [0xFFFFE000u32, 0xFFFFFC00, 0xFFFFFC00].map(|mask| (mask as f32).to_bits())
        );
    }

    #[test]
    fn test_axis_mask_words() {
        assert_eq!(encode_axis_mask(8), 0x4F7FFFFF);
        for n in 8..24 {
            assert_eq!(axis_mask_exponent(encode_axis_mask(n)), Some(n));
            assert_eq!(axis_mask_exponent(u32::MAX << n), Some(n));
        }
        // 0xFFFFFFF0 rounds to 2^32 as a float.
        assert_eq!(axis_mask_exponent(encode_axis_mask(4)), None);
        assert_eq!(axis_mask_exponent(0xFF00FF00), None);
        assert_eq!(axis_mask_exponent(1.5f32.to_bits()), None);
        assert_eq!(axis_mask_exponent(0), None);
    }

    #[test]
    fn test_layout_accepts_integer_masks() {
        let bounds = Bounds::new(Vec3::ZERO, Vec3::new(4000.0, 850.0, 900.0));
        let grid = OctreeGrid::for_bounds(&bounds, 256);
        let header = ModelHeader {
            min_coordinate: grid.min,
            masks: grid.axis_exponents.map(|n| u32::MAX << n),
            shifts: grid.shifts(),
            ..ModelHeader::default()
        };
        assert_eq!(
            RootLayout::from_model_header(&header).unwrap(),
            grid.layout().unwrap()
        );
    }

    #[test]
    fn test_root_cubes_are_z_major() {
        let layout = RootLayout::new(Vec3::ZERO, 1, [1, 1, 1]).unwrap();
        let cubes = layout.root_cubes();
        assert_eq!(cubes.len(), 8);
        assert_eq!(cubes[0], (Vec3::new(1.0, 1.0, 1.0), 1.0));
        assert_eq!(cubes[1], (Vec3::new(3.0, 1.0, 1.0), 1.0));
        assert_eq!(cubes[2], (Vec3::new(1.0, 3.0, 1.0), 1.0));
        assert_eq!(cubes[4], (Vec3::new(1.0, 1.0, 3.0), 1.0));
        assert_eq!(cubes[7], (Vec3::new(3.0, 3.0, 3.0), 1.0));
    }

    #[test]
    fn test_layout_from_header_matches_grid() {
        let bounds = Bounds::new(Vec3::ZERO, Vec3::new(4000.0, 850.0, 900.0));
        let grid = OctreeGrid::for_bounds(&bounds, 256);
        let header = ModelHeader {
            min_coordinate: grid.min,
            masks: grid.masks(),
            shifts: grid.shifts(),
            ..ModelHeader::default()
        };
        let layout = RootLayout::from_model_header(&header).unwrap();
        assert_eq!(layout, grid.layout().unwrap());
        assert_eq!(layout.root_count(), 64);
    }

    #[test]
    fn test_layout_rejects_inconsistent_shifts() {
        let header = ModelHeader {
            masks: [0xFFFFFE00; 3],
            shifts: [8, 0, 1],
            ..ModelHeader::default()
        };
        assert!(RootLayout::from_model_header(&header).is_err());
    }
}
