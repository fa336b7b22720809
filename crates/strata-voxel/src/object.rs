//! Voxel objects: a sparse map of sectors plus palette, transform and dirty state.

use std::collections::BTreeSet;

use glam::{IVec3, Mat4};
use hashbrown::HashMap;
use strata_core::{Aabb, Material, Palette, PaletteIndex, SectorCoord, VoxelCoord};

use crate::brick::Brick;
use crate::sector::{Sector, SectorId};

/// A brick addressed by its sector and linear index inside the sector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BrickKey {
    pub sector: SectorCoord,
    pub brick: u8,
}

impl BrickKey {
    #[inline]
    pub const fn new(sector: SectorCoord, brick: usize) -> Self {
        Self {
            sector,
            brick: brick as u8,
        }
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.brick as usize
    }
}

/// Pending changes since the last upload.
///
/// Ordered sets keep upload order deterministic.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DirtyState {
    /// Sector metadata (mask/origin) needs re-upload.
    pub sectors: BTreeSet<SectorCoord>,
    /// Brick record and/or payload needs re-upload.
    pub bricks: BTreeSet<BrickKey>,
    /// A sector or brick was added or removed.
    pub structure: bool,
    /// Palette entries changed.
    pub palette: bool,
}

impl DirtyState {
    pub fn is_empty(&self) -> bool {
        self.sectors.is_empty() && self.bricks.is_empty() && !self.structure && !self.palette
    }

    pub fn clear(&mut self) {
        self.sectors.clear();
        self.bricks.clear();
        self.structure = false;
        self.palette = false;
    }
}

/// A sparse voxel object.
#[derive(Clone, Debug)]
pub struct VoxelObject {
    sectors: HashMap<SectorCoord, Sector>,
    palette: Palette,
    transform: Mat4,
    lod_threshold: f32,
    dirty: DirtyState,
    next_sector_id: u64,
}

impl Default for VoxelObject {
    fn default() -> Self {
        Self::new()
    }
}

impl VoxelObject {
    pub fn new() -> Self {
        Self {
            sectors: HashMap::new(),
            palette: Palette::new(),
            transform: Mat4::IDENTITY,
            lod_threshold: 0.0,
            dirty: DirtyState {
                palette: true,
                ..DirtyState::default()
            },
            next_sector_id: 0,
        }
    }

    /// Builder-style transform setter.
    #[must_use]
    pub fn with_transform(mut self, transform: Mat4) -> Self {
        self.transform = transform;
        self
    }

    /// Write a voxel, creating the sector and brick on demand.
    ///
    /// Returns true if the stored value changed. Removing the last voxel of a
    /// brick removes the brick, and removing the last brick removes the sector.
    pub fn set_voxel(&mut self, pos: VoxelCoord, value: PaletteIndex) -> bool {
        let (sector_coord, brick_coord, _) = pos.split();
        let brick_index = brick_coord.index();
        let key = BrickKey::new(sector_coord, brick_index);

        if value == 0 {
            let Some(sector) = self.sectors.get_mut(&sector_coord) else {
                return false;
            };
            let Some(brick) = sector.brick_mut(brick_index) else {
                return false;
            };
            if !brick.set(pos.local(), 0) {
                return false;
            }
            self.dirty.bricks.insert(key);
            if brick.is_empty() {
                sector.remove_brick(brick_index);
                self.dirty.sectors.insert(sector_coord);
                self.dirty.structure = true;
                if sector.is_empty() {
                    self.sectors.remove(&sector_coord);
                }
            }
            return true;
        }

        let next_id = &mut self.next_sector_id;
        let mut sector_created = false;
        let sector = self.sectors.entry(sector_coord).or_insert_with(|| {
            sector_created = true;
            let id = SectorId(*next_id);
            *next_id += 1;
            Sector::new(sector_coord, id)
        });
        let (brick, brick_created) = sector.brick_or_insert(brick_index);
        let changed = brick.set(pos.local(), value);

        if sector_created || brick_created {
            self.dirty.sectors.insert(sector_coord);
            self.dirty.structure = true;
        }
        if changed || brick_created {
            self.dirty.bricks.insert(key);
        }
        changed
    }

    /// Read a voxel; 0 for missing sectors or bricks.
    pub fn get_voxel(&self, pos: VoxelCoord) -> PaletteIndex {
        let (sector_coord, brick_coord, voxel) = pos.split();
        self.sectors
            .get(&sector_coord)
            .and_then(|s| s.brick(brick_coord.index()))
            .map_or(0, |b| b.get(voxel))
    }

    /// Fill every voxel whose center lies within `radius` of `center`'s center.
    ///
    /// Returns the number of voxels that changed.
    pub fn fill_sphere(&mut self, center: VoxelCoord, radius: f32, value: PaletteIndex) -> usize {
        let r = radius.max(0.0);
        let reach = r.ceil() as i32;
        let r2 = r * r;
        let mut changed = 0;
        for dz in -reach..=reach {
            for dy in -reach..=reach {
                for dx in -reach..=reach {
                    let d2 = (dx * dx + dy * dy + dz * dz) as f32;
                    if d2 <= r2 {
                        let pos = VoxelCoord::new(center.x + dx, center.y + dy, center.z + dz);
                        changed += usize::from(self.set_voxel(pos, value));
                    }
                }
            }
        }
        changed
    }

    /// Fill the inclusive box `[min, max]`.
    pub fn fill_box(&mut self, min: VoxelCoord, max: VoxelCoord, value: PaletteIndex) -> usize {
        let mut changed = 0;
        for z in min.z..=max.z {
            for y in min.y..=max.y {
                for x in min.x..=max.x {
                    changed += usize::from(self.set_voxel(VoxelCoord::new(x, y, z), value));
                }
            }
        }
        changed
    }

    /// Promote every homogeneous payload brick to SOLID.
    ///
    /// Never runs implicitly; callers decide when the compaction pass is worth it.
    pub fn compact_solid_bricks(&mut self) -> usize {
        let mut promoted = 0;
        for (coord, sector) in &mut self.sectors {
            for (index, brick) in sector.bricks_mut() {
                if brick.promote_to_solid() {
                    self.dirty.bricks.insert(BrickKey::new(*coord, index));
                    promoted += 1;
                }
            }
        }
        if promoted > 0 {
            tracing::debug!(promoted, "promoted homogeneous bricks to SOLID");
        }
        promoted
    }

    /// Union of materialised sector bounds in voxel space.
    pub fn compute_aabb(&self) -> Aabb {
        self.sectors
            .values()
            .fold(Aabb::EMPTY, |acc, s| acc.merge(&s.bounds()))
    }

    /// World-space bounds of [`Self::compute_aabb`] under the object transform.
    pub fn world_aabb(&self) -> Aabb {
        self.compute_aabb().transformed(self.transform)
    }

    /// Empty every dirty set.
    pub fn clear_dirty(&mut self) {
        self.dirty.clear();
    }

    #[inline]
    pub const fn dirty(&self) -> &DirtyState {
        &self.dirty
    }

    /// Mutable access for uploaders that drain dirty entries incrementally.
    #[inline]
    pub fn dirty_mut(&mut self) -> &mut DirtyState {
        &mut self.dirty
    }

    #[inline]
    pub fn sector(&self, coord: SectorCoord) -> Option<&Sector> {
        self.sectors.get(&coord)
    }

    /// Sectors in unspecified order.
    pub fn sectors(&self) -> impl Iterator<Item = &Sector> {
        self.sectors.values()
    }

    /// Sector coordinates in sorted order.
    pub fn sorted_sector_coords(&self) -> Vec<SectorCoord> {
        let mut coords: Vec<_> = self.sectors.keys().copied().collect();
        coords.sort_unstable();
        coords
    }

    #[inline]
    pub fn sector_count(&self) -> usize {
        self.sectors.len()
    }

    pub fn brick_count(&self) -> usize {
        self.sectors.values().map(|s| s.brick_count() as usize).sum()
    }

    /// Remove a whole sector, marking the structure dirty.
    pub fn remove_sector(&mut self, coord: SectorCoord) -> Option<Sector> {
        let sector = self.sectors.remove(&coord)?;
        self.dirty.sectors.insert(coord);
        self.dirty.structure = true;
        Some(sector)
    }

    /// Replace a brick wholesale, creating its sector if needed.
    pub fn insert_brick(&mut self, sector_coord: SectorCoord, index: usize, brick: Brick) {
        if brick.is_empty() {
            if let Some(sector) = self.sectors.get_mut(&sector_coord) {
                if sector.remove_brick(index).is_some() {
                    self.dirty.bricks.insert(BrickKey::new(sector_coord, index));
                    self.dirty.sectors.insert(sector_coord);
                    self.dirty.structure = true;
                }
                if sector.is_empty() {
                    self.sectors.remove(&sector_coord);
                }
            }
            return;
        }
        let next_id = &mut self.next_sector_id;
        let sector = self.sectors.entry(sector_coord).or_insert_with(|| {
            let id = SectorId(*next_id);
            *next_id += 1;
            Sector::new(sector_coord, id)
        });
        if sector.insert_brick(index, brick).is_none() {
            self.dirty.sectors.insert(sector_coord);
            self.dirty.structure = true;
        }
        self.dirty.bricks.insert(BrickKey::new(sector_coord, index));
    }

    #[inline]
    pub const fn palette(&self) -> &Palette {
        &self.palette
    }

    /// Set a palette entry and mark the palette for re-upload.
    pub fn set_material(&mut self, index: PaletteIndex, material: Material) -> strata_core::Result<()> {
        self.palette.set(index, material)?;
        self.dirty.palette = true;
        Ok(())
    }

    #[inline]
    pub const fn transform(&self) -> Mat4 {
        self.transform
    }

    pub fn set_transform(&mut self, transform: Mat4) {
        self.transform = transform;
    }

    /// Stored per object; traversal does not consult it yet.
    #[inline]
    pub const fn lod_threshold(&self) -> f32 {
        self.lod_threshold
    }

    pub fn set_lod_threshold(&mut self, threshold: f32) {
        self.lod_threshold = threshold;
    }

    pub fn is_empty(&self) -> bool {
        self.sectors.is_empty()
    }

    /// Voxel coordinate of the brick origin for a key.
    pub fn brick_origin(key: BrickKey) -> IVec3 {
        key.sector.origin_voxels() + strata_core::BrickCoord::from_index(key.index()).voxel_offset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use strata_core::constants::{BRICK_VOXELS, SECTOR_BRICKS};
    use strata_core::coords::{micro_block_index, voxel_local};

    fn v(x: i32, y: i32, z: i32) -> VoxelCoord {
        VoxelCoord::new(x, y, z)
    }

    #[test]
    fn set_and_get() {
        let mut obj = VoxelObject::new();
        assert_eq!(obj.get_voxel(v(1, 2, 3)), 0);
        assert!(obj.set_voxel(v(1, 2, 3), 7));
        assert_eq!(obj.get_voxel(v(1, 2, 3)), 7);
        assert_eq!(obj.get_voxel(v(1, 2, 4)), 0);
        assert!(obj.set_voxel(v(-40, 0, 0), 2));
        assert_eq!(obj.get_voxel(v(-40, 0, 0)), 2);
        assert_eq!(obj.sector_count(), 2);
    }

    #[test]
    fn new_voxel_marks_structure() {
        let mut obj = VoxelObject::new();
        obj.clear_dirty();
        obj.set_voxel(v(0, 0, 0), 1);
        assert!(obj.dirty().structure);
        assert_eq!(obj.dirty().sectors.len(), 1);
        assert_eq!(obj.dirty().bricks.len(), 1);

        obj.clear_dirty();
        obj.set_voxel(v(1, 0, 0), 1);
        assert!(!obj.dirty().structure);
        assert!(obj.dirty().sectors.is_empty());
        assert_eq!(obj.dirty().bricks.len(), 1);
    }

    #[test]
    fn brush_marks_one_sector_and_one_brick() {
        let mut obj = VoxelObject::new();
        obj.clear_dirty();
        let changed = obj.fill_sphere(v(5, 5, 5), 2.0, 3);
        assert!(changed > 1);
        assert_eq!(obj.dirty().sectors.len(), 1);
        assert_eq!(obj.dirty().bricks.len(), 1);
        assert_eq!(obj.get_voxel(v(5, 5, 5)), 3);
        assert_eq!(obj.get_voxel(v(7, 5, 5)), 3);
        assert_eq!(obj.get_voxel(v(8, 5, 5)), 0);
    }

    #[test]
    fn clearing_last_voxel_removes_brick_and_sector() {
        let mut obj = VoxelObject::new();
        obj.set_voxel(v(3, 3, 3), 1);
        obj.clear_dirty();
        assert!(obj.set_voxel(v(3, 3, 3), 0));
        assert!(obj.is_empty());
        assert!(obj.dirty().structure);
        assert!(!obj.set_voxel(v(3, 3, 3), 0));
    }

    #[test]
    fn aabb_is_union_of_sectors() {
        let mut obj = VoxelObject::new();
        assert!(obj.compute_aabb().is_empty());
        obj.set_voxel(v(0, 0, 0), 1);
        obj.set_voxel(v(33, 0, -1), 1);
        let aabb = obj.compute_aabb();
        assert_eq!(aabb.min, Vec3::new(0.0, 0.0, -32.0));
        assert_eq!(aabb.max, Vec3::new(64.0, 32.0, 32.0));
    }

    #[test]
    fn compaction_is_explicit() {
        let mut obj = VoxelObject::new();
        obj.fill_box(v(0, 0, 0), v(7, 7, 7), 4);
        let key = BrickKey::new(SectorCoord::new(0, 0, 0), 0);
        assert!(!obj.sector(key.sector).unwrap().brick(0).unwrap().is_solid());

        obj.clear_dirty();
        assert_eq!(obj.compact_solid_bricks(), 1);
        assert!(obj.dirty().bricks.contains(&key));
        let brick = obj.sector(key.sector).unwrap().brick(0).unwrap();
        assert!(brick.is_solid());
        assert_eq!(obj.get_voxel(v(3, 6, 1)), 4);

        obj.set_voxel(v(0, 0, 0), 5);
        assert!(!obj.sector(key.sector).unwrap().brick(0).unwrap().is_solid());
        assert_eq!(obj.get_voxel(v(0, 0, 0)), 5);
        assert_eq!(obj.get_voxel(v(1, 0, 0)), 4);
    }

    #[test]
    fn palette_changes_mark_dirty() {
        let mut obj = VoxelObject::new();
        obj.clear_dirty();
        obj.set_material(3, Material::opaque(10, 20, 30)).unwrap();
        assert!(obj.dirty().palette);
        assert!(obj.set_material(0, Material::opaque(1, 1, 1)).is_err());
    }

    #[test]
    fn random_edits_keep_invariants() {
        let mut rng = StdRng::seed_from_u64(0xb01d);
        let mut obj = VoxelObject::new();
        for _ in 0..20_000 {
            let pos = v(rng.gen_range(-40..40), rng.gen_range(-8..24), rng.gen_range(-40..40));
            let value = if rng.gen_bool(0.3) { 0 } else { rng.gen_range(1..=4) };
            obj.set_voxel(pos, value);
        }
        obj.fill_box(v(64, 0, 0), v(71, 7, 7), 9);
        obj.compact_solid_bricks();

        for sector in obj.sectors() {
            assert!(!sector.is_empty());
            for i in 0..SECTOR_BRICKS {
                assert_eq!(sector.brick_mask() & (1 << i) != 0, sector.brick(i).is_some());
            }
            for (_, brick) in sector.bricks() {
                assert!(!brick.is_empty());
                if let Some(value) = brick.solid_value() {
                    assert_ne!(value, 0);
                    assert!((0..BRICK_VOXELS).all(|i| brick.get(i) == value));
                    continue;
                }
                for m in 0..64 {
                    let any = (0..BRICK_VOXELS).any(|i| {
                        let [x, y, z] = voxel_local(i);
                        micro_block_index(x, y, z) == m && brick.get(i) != 0
                    });
                    assert_eq!(brick.occupancy() & (1 << m) != 0, any);
                }
            }
        }
    }
}
