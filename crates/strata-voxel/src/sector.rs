//! 4x4x4 brick sectors.

use glam::Vec3;
use strata_core::constants::{SECTOR_BRICKS, SECTOR_SIZE};
use strata_core::{Aabb, BrickCoord, SectorCoord};

use crate::brick::Brick;

/// Identity of a sector instance within its object.
///
/// A sector that is removed and re-created at the same coordinate gets a new
/// id, which lets the uploader detect replacement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SectorId(pub u64);

/// A 32^3 voxel region holding up to 64 bricks.
#[derive(Clone, Debug)]
pub struct Sector {
    coord: SectorCoord,
    id: SectorId,
    brick_mask: u64,
    bricks: [Option<Box<Brick>>; SECTOR_BRICKS],
}

impl Sector {
    pub fn new(coord: SectorCoord, id: SectorId) -> Self {
        Self {
            coord,
            id,
            brick_mask: 0,
            bricks: std::array::from_fn(|_| None),
        }
    }

    #[inline]
    pub const fn coord(&self) -> SectorCoord {
        self.coord
    }

    #[inline]
    pub const fn id(&self) -> SectorId {
        self.id
    }

    /// Bit `i` is set iff brick `i` is materialised.
    #[inline]
    pub const fn brick_mask(&self) -> u64 {
        self.brick_mask
    }

    #[inline]
    pub fn brick(&self, index: usize) -> Option<&Brick> {
        self.bricks[index].as_deref()
    }

    #[inline]
    pub fn brick_mut(&mut self, index: usize) -> Option<&mut Brick> {
        self.bricks[index].as_deref_mut()
    }

    /// Get a brick, creating an empty one if absent. The flag reports creation.
    pub fn brick_or_insert(&mut self, index: usize) -> (&mut Brick, bool) {
        let created = self.bricks[index].is_none();
        if created {
            self.brick_mask |= 1 << index;
        }
        let brick = self.bricks[index].get_or_insert_with(|| Box::new(Brick::new()));
        (brick, created)
    }

    /// Insert or replace a brick.
    pub fn insert_brick(&mut self, index: usize, brick: Brick) -> Option<Brick> {
        self.brick_mask |= 1 << index;
        self.bricks[index].replace(Box::new(brick)).map(|b| *b)
    }

    pub fn remove_brick(&mut self, index: usize) -> Option<Brick> {
        self.brick_mask &= !(1 << index);
        self.bricks[index].take().map(|b| *b)
    }

    /// Materialised bricks with their linear index.
    pub fn bricks(&self) -> impl Iterator<Item = (usize, &Brick)> {
        self.bricks
            .iter()
            .enumerate()
            .filter_map(|(i, b)| b.as_deref().map(|b| (i, b)))
    }

    pub(crate) fn bricks_mut(&mut self) -> impl Iterator<Item = (usize, &mut Brick)> {
        self.bricks
            .iter_mut()
            .enumerate()
            .filter_map(|(i, b)| b.as_deref_mut().map(|b| (i, b)))
    }

    #[inline]
    pub const fn brick_count(&self) -> u32 {
        self.brick_mask.count_ones()
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.brick_mask == 0
    }

    /// Voxel-space bounds of the whole sector.
    pub fn bounds(&self) -> Aabb {
        let min = self.coord.origin_voxels().as_vec3();
        Aabb::new(min, min + Vec3::splat(SECTOR_SIZE as f32))
    }

    /// Voxel-space origin of a brick in this sector.
    pub fn brick_origin(&self, index: usize) -> glam::IVec3 {
        self.coord.origin_voxels() + BrickCoord::from_index(index).voxel_offset()
    }
}
