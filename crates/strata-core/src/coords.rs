//! Coordinate systems for the sparse voxel hierarchy.
//!
//! An object's voxel space is split into sectors of 32^3 voxels, each holding
//! 4^3 bricks of 8^3 voxels. Bricks further split into 2^3 micro-blocks for
//! occupancy tracking.

use crate::constants::{BRICK_SIZE, MICRO_BLOCKS_PER_AXIS, MICRO_BLOCK_SIZE, SECTOR_BRICKS_PER_AXIS};
use glam::{IVec3, Vec3};
use serde::{Deserialize, Serialize};

const SECTOR_BITS: u32 = 5;
const BRICK_BITS: u32 = 3;

/// Voxel position in an object's voxel space.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct VoxelCoord {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl VoxelCoord {
    /// Create a new voxel coordinate
    #[inline]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Sector containing this voxel.
    #[inline]
    pub const fn sector(self) -> SectorCoord {
        SectorCoord::new(
            self.x >> SECTOR_BITS,
            self.y >> SECTOR_BITS,
            self.z >> SECTOR_BITS,
        )
    }

    /// Brick within the containing sector.
    #[inline]
    pub const fn brick(self) -> BrickCoord {
        let mask = SECTOR_BRICKS_PER_AXIS as i32 - 1;
        BrickCoord::new(
            ((self.x >> BRICK_BITS) & mask) as u8,
            ((self.y >> BRICK_BITS) & mask) as u8,
            ((self.z >> BRICK_BITS) & mask) as u8,
        )
    }

    /// Position within the containing brick, each axis in `0..8`.
    #[inline]
    pub const fn local(self) -> [u32; 3] {
        let mask = BRICK_SIZE as i32 - 1;
        [
            (self.x & mask) as u32,
            (self.y & mask) as u32,
            (self.z & mask) as u32,
        ]
    }

    /// Split into sector, brick, and linear voxel index inside the brick.
    #[inline]
    pub const fn split(self) -> (SectorCoord, BrickCoord, usize) {
        let [x, y, z] = self.local();
        (self.sector(), self.brick(), voxel_index(x, y, z))
    }

    /// Rebuild a voxel coordinate from its hierarchy parts.
    #[inline]
    pub const fn from_parts(sector: SectorCoord, brick: BrickCoord, voxel: usize) -> Self {
        let [lx, ly, lz] = voxel_local(voxel);
        let origin = sector.origin_voxels_array();
        Self::new(
            origin[0] + (brick.x as i32) * BRICK_SIZE as i32 + lx as i32,
            origin[1] + (brick.y as i32) * BRICK_SIZE as i32 + ly as i32,
            origin[2] + (brick.z as i32) * BRICK_SIZE as i32 + lz as i32,
        )
    }

    #[inline]
    pub const fn to_ivec3(self) -> IVec3 {
        IVec3::new(self.x, self.y, self.z)
    }

    /// Voxel containing a floating-point position.
    #[inline]
    pub fn from_position(p: Vec3) -> Self {
        Self::new(p.x.floor() as i32, p.y.floor() as i32, p.z.floor() as i32)
    }
}

impl From<IVec3> for VoxelCoord {
    fn from(v: IVec3) -> Self {
        Self::new(v.x, v.y, v.z)
    }
}

/// Sector position in sector units (voxel coordinate >> 5).
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SectorCoord {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl SectorCoord {
    /// Create a new sector coordinate
    #[inline]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Voxel-space origin of the sector (`coord * 32`).
    #[inline]
    pub const fn origin_voxels(self) -> IVec3 {
        let [x, y, z] = self.origin_voxels_array();
        IVec3::new(x, y, z)
    }

    #[inline]
    const fn origin_voxels_array(self) -> [i32; 3] {
        [
            self.x << SECTOR_BITS,
            self.y << SECTOR_BITS,
            self.z << SECTOR_BITS,
        ]
    }

    #[inline]
    pub const fn to_ivec3(self) -> IVec3 {
        IVec3::new(self.x, self.y, self.z)
    }
}

impl From<IVec3> for SectorCoord {
    fn from(v: IVec3) -> Self {
        Self::new(v.x, v.y, v.z)
    }
}

/// Brick position inside a sector, each axis in `0..4`.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct BrickCoord {
    pub x: u8,
    pub y: u8,
    pub z: u8,
}

impl BrickCoord {
    #[inline]
    pub const fn new(x: u8, y: u8, z: u8) -> Self {
        debug_assert!((x as u32) < SECTOR_BRICKS_PER_AXIS);
        debug_assert!((y as u32) < SECTOR_BRICKS_PER_AXIS);
        debug_assert!((z as u32) < SECTOR_BRICKS_PER_AXIS);
        Self { x, y, z }
    }

    /// Linear brick index inside the sector, matching the `BrickMask` bit.
    #[inline]
    pub const fn index(self) -> usize {
        let n = SECTOR_BRICKS_PER_AXIS as usize;
        self.x as usize + self.y as usize * n + self.z as usize * n * n
    }

    /// Create from linear index
    #[inline]
    pub const fn from_index(index: usize) -> Self {
        let n = SECTOR_BRICKS_PER_AXIS as usize;
        Self {
            x: (index % n) as u8,
            y: ((index / n) % n) as u8,
            z: (index / (n * n)) as u8,
        }
    }

    /// Voxel offset of the brick relative to its sector origin.
    #[inline]
    pub const fn voxel_offset(self) -> IVec3 {
        IVec3::new(
            self.x as i32 * BRICK_SIZE as i32,
            self.y as i32 * BRICK_SIZE as i32,
            self.z as i32 * BRICK_SIZE as i32,
        )
    }
}

/// Linear index of a voxel inside a brick (`x + y*8 + z*64`).
#[inline]
pub const fn voxel_index(x: u32, y: u32, z: u32) -> usize {
    (x + y * BRICK_SIZE + z * BRICK_SIZE * BRICK_SIZE) as usize
}

/// Inverse of [`voxel_index`].
#[inline]
pub const fn voxel_local(index: usize) -> [u32; 3] {
    let n = BRICK_SIZE as usize;
    [
        (index % n) as u32,
        ((index / n) % n) as u32,
        (index / (n * n)) as u32,
    ]
}

/// Occupancy bit of the micro-block containing a brick-local voxel.
#[inline]
pub const fn micro_block_index(x: u32, y: u32, z: u32) -> usize {
    let (mx, my, mz) = (x / MICRO_BLOCK_SIZE, y / MICRO_BLOCK_SIZE, z / MICRO_BLOCK_SIZE);
    (mx + my * MICRO_BLOCKS_PER_AXIS + mz * MICRO_BLOCKS_PER_AXIS * MICRO_BLOCKS_PER_AXIS) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_voxel_maps_to_negative_sector() {
        let v = VoxelCoord::new(-1, -33, 31);
        assert_eq!(v.sector(), SectorCoord::new(-1, -2, 0));
        assert_eq!(v.brick(), BrickCoord::new(3, 3, 3));
        assert_eq!(v.local(), [7, 7, 7]);
    }

    #[test]
    fn split_and_rebuild() {
        for v in [
            VoxelCoord::new(0, 0, 0),
            VoxelCoord::new(5, 5, 5),
            VoxelCoord::new(-17, 40, 1023),
            VoxelCoord::new(-32, -1, 31),
        ] {
            let (sector, brick, voxel) = v.split();
            assert_eq!(VoxelCoord::from_parts(sector, brick, voxel), v);
        }
    }

    #[test]
    fn brick_index_matches_mask_layout() {
        assert_eq!(BrickCoord::new(1, 0, 0).index(), 1);
        assert_eq!(BrickCoord::new(0, 1, 0).index(), 4);
        assert_eq!(BrickCoord::new(0, 0, 1).index(), 16);
        assert_eq!(BrickCoord::from_index(63), BrickCoord::new(3, 3, 3));
    }

    #[test]
    fn micro_block_layout() {
        assert_eq!(micro_block_index(0, 0, 0), 0);
        assert_eq!(micro_block_index(1, 1, 1), 0);
        assert_eq!(micro_block_index(2, 0, 0), 1);
        assert_eq!(micro_block_index(0, 2, 0), 4);
        assert_eq!(micro_block_index(0, 0, 2), 16);
        assert_eq!(micro_block_index(7, 7, 7), 63);
    }

    #[test]
    fn sector_origin() {
        assert_eq!(SectorCoord::new(1, -1, 2).origin_voxels(), IVec3::new(32, -32, 64));
    }
}
