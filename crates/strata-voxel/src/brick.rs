//! 8x8x8 voxel bricks with micro-block occupancy.
//!
//! Occupancy is tracked per 2x2x2 micro-block: bit `m` of the 64-bit mask is
//! set iff any voxel inside micro-block `m` is non-zero, with
//! `m = mx + my*4 + mz*16`.

use bitflags::bitflags;
use strata_core::constants::{BRICK_VOXELS, MICRO_BLOCKS, MICRO_BLOCK_SIZE, MICRO_BLOCKS_PER_AXIS};
use strata_core::coords::{micro_block_index, voxel_index};
use strata_core::PaletteIndex;

bitflags! {
    /// Brick record flags, stored verbatim in the GPU brick record.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct BrickFlags: u32 {
        /// All 512 voxels share one non-zero palette index; no payload tile.
        const SOLID = 1;
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum BrickData {
    Solid(PaletteIndex),
    Payload(Box<[PaletteIndex; BRICK_VOXELS]>),
}

/// A single 8x8x8 brick.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Brick {
    data: BrickData,
    occupancy: u64,
}

impl Default for Brick {
    fn default() -> Self {
        Self::new()
    }
}

impl Brick {
    /// Create an empty payload brick.
    pub fn new() -> Self {
        Self {
            data: BrickData::Payload(Box::new([0; BRICK_VOXELS])),
            occupancy: 0,
        }
    }

    /// Create a SOLID brick. Returns `None` for the empty index.
    pub fn solid(value: PaletteIndex) -> Option<Self> {
        (value != 0).then_some(Self {
            data: BrickData::Solid(value),
            occupancy: u64::MAX,
        })
    }

    /// Create a payload brick from raw voxels.
    pub fn from_payload(payload: [PaletteIndex; BRICK_VOXELS]) -> Self {
        let occupancy = compute_occupancy(&payload);
        Self {
            data: BrickData::Payload(Box::new(payload)),
            occupancy,
        }
    }

    /// Voxel at a linear brick index.
    #[inline]
    pub fn get(&self, index: usize) -> PaletteIndex {
        match &self.data {
            BrickData::Solid(value) => *value,
            BrickData::Payload(voxels) => voxels[index],
        }
    }

    /// Write a voxel at brick-local coordinates. Returns true if the value changed.
    ///
    /// Writing a different value into a SOLID brick expands it back into a
    /// payload brick first.
    pub fn set(&mut self, local: [u32; 3], value: PaletteIndex) -> bool {
        let [x, y, z] = local;
        let index = voxel_index(x, y, z);
        if self.get(index) == value {
            return false;
        }
        if let BrickData::Solid(v) = self.data {
            self.data = BrickData::Payload(Box::new([v; BRICK_VOXELS]));
        }
        if let BrickData::Payload(voxels) = &mut self.data {
            voxels[index] = value;
            let m = micro_block_index(x, y, z);
            if micro_block_occupied(voxels, m) {
                self.occupancy |= 1 << m;
            } else {
                self.occupancy &= !(1 << m);
            }
        }
        true
    }

    /// 64-bit micro-block occupancy mask.
    #[inline]
    pub const fn occupancy(&self) -> u64 {
        self.occupancy
    }

    #[inline]
    pub const fn flags(&self) -> BrickFlags {
        match self.data {
            BrickData::Solid(_) => BrickFlags::SOLID,
            BrickData::Payload(_) => BrickFlags::empty(),
        }
    }

    #[inline]
    pub const fn is_solid(&self) -> bool {
        matches!(self.data, BrickData::Solid(_))
    }

    /// The shared palette index of a SOLID brick.
    #[inline]
    pub const fn solid_value(&self) -> Option<PaletteIndex> {
        match self.data {
            BrickData::Solid(v) => Some(v),
            BrickData::Payload(_) => None,
        }
    }

    /// Payload voxels of a non-SOLID brick.
    pub fn payload(&self) -> Option<&[PaletteIndex; BRICK_VOXELS]> {
        match &self.data {
            BrickData::Solid(_) => None,
            BrickData::Payload(voxels) => Some(voxels),
        }
    }

    /// True when no voxel is set.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.occupancy == 0
    }

    /// The single value shared by every voxel, if the brick is homogeneous and non-empty.
    pub fn uniform_value(&self) -> Option<PaletteIndex> {
        match &self.data {
            BrickData::Solid(v) => Some(*v),
            BrickData::Payload(voxels) => {
                let first = voxels[0];
                (first != 0 && voxels.iter().all(|&v| v == first)).then_some(first)
            }
        }
    }

    /// Convert a homogeneous payload brick into a SOLID brick.
    ///
    /// Returns true if the brick was promoted.
    pub fn promote_to_solid(&mut self) -> bool {
        if self.is_solid() {
            return false;
        }
        match self.uniform_value() {
            Some(value) => {
                self.data = BrickData::Solid(value);
                self.occupancy = u64::MAX;
                true
            }
            None => false,
        }
    }
}

/// Compute the micro-block occupancy mask of a full payload.
pub fn compute_occupancy(voxels: &[PaletteIndex; BRICK_VOXELS]) -> u64 {
    (0..MICRO_BLOCKS).fold(0u64, |mask, m| {
        if micro_block_occupied(voxels, m) {
            mask | (1 << m)
        } else {
            mask
        }
    })
}

fn micro_block_occupied(voxels: &[PaletteIndex; BRICK_VOXELS], m: usize) -> bool {
    let m = m as u32;
    let n = MICRO_BLOCKS_PER_AXIS;
    let base = [
        (m % n) * MICRO_BLOCK_SIZE,
        ((m / n) % n) * MICRO_BLOCK_SIZE,
        (m / (n * n)) * MICRO_BLOCK_SIZE,
    ];
    for dz in 0..MICRO_BLOCK_SIZE {
        for dy in 0..MICRO_BLOCK_SIZE {
            for dx in 0..MICRO_BLOCK_SIZE {
                if voxels[voxel_index(base[0] + dx, base[1] + dy, base[2] + dz)] != 0 {
                    return true;
                }
            }
        }
    }
    false
}
