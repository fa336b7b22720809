//! Reconciles CPU voxel objects with their GPU mirror.
//!
//! Each frame the scene's dirty state is drained into per-object pending
//! sets, which are then uploaded under a fixed budget:
//!
//! 1. Orphan sweep: objects that left the scene release every slot.
//! 2. Structural diff: removed or replaced sectors release their slots, new
//!    sectors get a sector slot and a 64-entry brick block.
//! 3. Budgeted upload: bricks first, then sectors whose bricks are all on
//!    the GPU. A sector becomes resident, and thus reachable through the
//!    hash grid, only once its record has been written.
//! 4. Hash grid rebuild when the resident set changed.
//!
//! Entries that do not fit the budget, or that failed on a recoverable
//! error, stay pending for the next frame.

use std::collections::{BTreeMap, BTreeSet};

use strata_core::constants::SECTOR_BRICKS;
use strata_core::{ByteWriter, SectorCoord};
use strata_voxel::hash_grid::grid_size_for;
use strata_voxel::{
    BrickKey, DirtyState, GridEntry, SectorHashGrid, SectorId, SlotAllocator, VoxelError,
    VoxelObject,
};
use strata_world::{ObjectHandle, Scene};

use crate::config::RendererConfig;
use crate::error::{RenderError, Result};
use crate::gpu_types::{
    write_grid_entry, write_grid_params, write_material, AtlasLayout, BrickRecord,
    ObjectParamsRecord, SectorRecord, BRICKS_PER_BLOCK, BRICK_RECORD_SIZE, GRID_ENTRY_SIZE,
    GRID_PARAMS_SIZE, MATERIALS_PER_BLOCK, MATERIAL_RECORD_SIZE, NO_TREE64, SECTOR_RECORD_SIZE,
};
use crate::upload::{ensure, BufferTarget, UploadReport, UploadSink};

#[derive(Debug, Clone, Copy)]
struct SectorAlloc {
    id: SectorId,
    slot: u32,
    block: u32,
}

impl SectorAlloc {
    const fn brick_table_index(&self) -> u32 {
        self.block * BRICKS_PER_BLOCK
    }
}

#[derive(Debug, Default)]
struct ObjectAlloc {
    material_block: u32,
    sectors: BTreeMap<SectorCoord, SectorAlloc>,
    resident: BTreeSet<SectorCoord>,
    tiles: BTreeMap<BrickKey, u32>,
    pending_sectors: BTreeSet<SectorCoord>,
    pending_bricks: BTreeSet<BrickKey>,
    palette_pending: bool,
}

impl ObjectAlloc {
    fn has_pending_bricks(&self, coord: SectorCoord) -> bool {
        self.pending_bricks
            .range(sector_keys(coord))
            .next()
            .is_some()
    }
}

fn sector_keys(coord: SectorCoord) -> std::ops::RangeInclusive<BrickKey> {
    BrickKey::new(coord, 0)..=BrickKey::new(coord, SECTOR_BRICKS - 1)
}

/// The four slot pools mirrored on the GPU.
#[derive(Debug)]
struct Pools {
    sector_slots: SlotAllocator,
    brick_blocks: SlotAllocator,
    tiles: SlotAllocator,
    material_blocks: SlotAllocator,
}

impl Pools {
    fn release_sector(&mut self, alloc: &mut ObjectAlloc, coord: SectorCoord) -> bool {
        let Some(sector) = alloc.sectors.remove(&coord) else {
            return false;
        };
        self.sector_slots.free(sector.slot);
        self.brick_blocks.free(sector.block);
        let keys: Vec<BrickKey> = alloc.tiles.range(sector_keys(coord)).map(|(k, _)| *k).collect();
        for key in keys {
            if let Some(tile) = alloc.tiles.remove(&key) {
                self.tiles.free(tile);
            }
        }
        alloc.pending_sectors.remove(&coord);
        alloc.pending_bricks.retain(|k| k.sector != coord);
        alloc.resident.remove(&coord)
    }

    fn release_tile(&mut self, alloc: &mut ObjectAlloc, key: BrickKey) {
        if let Some(tile) = alloc.tiles.remove(&key) {
            self.tiles.free(tile);
        }
    }
}

/// CPU side of the voxel data plane: slot allocators, CPU to GPU maps and
/// the sector hash grid.
#[derive(Debug)]
pub struct VoxelSync {
    atlas: AtlasLayout,
    sectors_per_frame: usize,
    bricks_per_frame: usize,
    grid_load_factor: u32,
    grid_min_size: u32,
    grid_max_probes: u32,
    pools: Pools,
    objects: BTreeMap<ObjectHandle, ObjectAlloc>,
    grid: SectorHashGrid,
    grid_scale: u32,
    grid_regrow: bool,
    grid_uploaded: bool,
}

impl VoxelSync {
    pub fn new(config: &RendererConfig) -> Self {
        let atlas = AtlasLayout::new(config.atlas_bricks_per_side);
        Self {
            atlas,
            sectors_per_frame: config.sectors_per_frame,
            bricks_per_frame: config.bricks_per_frame(),
            grid_load_factor: config.hash_grid_load_factor,
            grid_min_size: config.hash_grid_min_size,
            grid_max_probes: config.hash_max_probes,
            pools: Pools {
                sector_slots: SlotAllocator::new(),
                brick_blocks: SlotAllocator::new(),
                // Tile 0 stays empty.
                tiles: SlotAllocator::bounded(1, atlas.capacity()),
                material_blocks: SlotAllocator::new(),
            },
            objects: BTreeMap::new(),
            grid: SectorHashGrid::new(config.hash_grid_min_size, config.hash_max_probes),
            grid_scale: 1,
            grid_regrow: false,
            grid_uploaded: false,
        }
    }

    pub const fn atlas(&self) -> AtlasLayout {
        self.atlas
    }

    /// Reconcile every object in `scene` and upload what the budget allows.
    ///
    /// Drains the objects' dirty state into per-object pending sets owned by
    /// the sync, so [`VoxelObject::dirty`] reads empty afterwards even while
    /// uploads are outstanding. Work cut off by the budget, a buffer ceiling
    /// or atlas exhaustion stays in those sets and is retried on later
    /// frames. An exhausted atlas only holds back the bricks that need a
    /// tile; other records keep uploading. Recoverable failures are collected
    /// in `report`; only fatal sink errors are returned.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn sync(
        &mut self,
        scene: &mut Scene,
        sink: &mut impl UploadSink,
        report: &mut UploadReport,
    ) -> Result<()> {
        let drained = scene.take_dirty();
        let scene: &Scene = scene;

        let mut residency_changed = self.sweep_orphans(scene);
        let mut structure_changed = false;
        for (handle, dirty) in drained {
            let Some(object) = scene.object(handle) else {
                continue;
            };
            structure_changed |= dirty.structure;
            residency_changed |= self.track(handle, object, dirty)?;
        }

        residency_changed |= self.upload_voxels(scene, sink, report)?;
        self.upload_materials(scene, sink, report)?;

        if residency_changed || structure_changed || self.grid_regrow || !self.grid_uploaded {
            self.rebuild_grid(sink, report)?;
        }

        report.pending_sectors = self.pending_sectors();
        report.pending_bricks = self.pending_bricks();
        tracing::trace!(
            sectors = report.sectors_uploaded,
            bricks = report.bricks_uploaded,
            pending_sectors = report.pending_sectors,
            pending_bricks = report.pending_bricks,
            "voxel sync"
        );
        Ok(())
    }

    /// Step A: release everything owned by objects no longer in the scene.
    fn sweep_orphans(&mut self, scene: &Scene) -> bool {
        let orphans: Vec<ObjectHandle> = self
            .objects
            .keys()
            .filter(|h| !scene.contains(**h))
            .copied()
            .collect();
        let mut changed = false;
        for handle in orphans {
            let Some(mut alloc) = self.objects.remove(&handle) else {
                continue;
            };
            let coords: Vec<SectorCoord> = alloc.sectors.keys().copied().collect();
            for coord in coords {
                changed |= self.pools.release_sector(&mut alloc, coord);
            }
            self.pools.material_blocks.free(alloc.material_block);
            tracing::debug!(object = handle.0, "released GPU slots of removed object");
        }
        changed
    }

    /// Step B: fold an object's drained dirty state into its pending sets.
    fn track(&mut self, handle: ObjectHandle, object: &VoxelObject, dirty: DirtyState) -> Result<bool> {
        let is_new = !self.objects.contains_key(&handle);
        if is_new {
            let material_block = self
                .pools
                .material_blocks
                .alloc()
                .map_err(|e| RenderError::ResourceCreation(e.to_string()))?;
            self.objects.insert(
                handle,
                ObjectAlloc {
                    material_block,
                    palette_pending: true,
                    ..ObjectAlloc::default()
                },
            );
            tracing::debug!(object = handle.0, material_block, "tracking new object");
        }
        let Some(alloc) = self.objects.get_mut(&handle) else {
            return Ok(false);
        };

        let mut changed = false;
        if is_new || dirty.structure {
            changed = diff_structure(&mut self.pools, alloc, object)?;
        }
        for coord in dirty.sectors {
            if alloc.sectors.contains_key(&coord) {
                alloc.pending_sectors.insert(coord);
            }
        }
        for key in dirty.bricks {
            if alloc.sectors.contains_key(&key.sector) {
                alloc.pending_bricks.insert(key);
            }
        }
        alloc.palette_pending |= dirty.palette;
        Ok(changed)
    }

    /// Step C: budgeted brick and sector uploads. Returns whether any sector
    /// became resident.
    fn upload_voxels(
        &mut self,
        scene: &Scene,
        sink: &mut impl UploadSink,
        report: &mut UploadReport,
    ) -> Result<bool> {
        let sector_bytes = u64::from(self.pools.sector_slots.tail().max(1)) * SECTOR_RECORD_SIZE as u64;
        let brick_bytes = u64::from(self.pools.brick_blocks.tail().max(1))
            * u64::from(BRICKS_PER_BLOCK)
            * BRICK_RECORD_SIZE as u64;
        let sectors_ok = ensure(sink, report, BufferTarget::Sectors, sector_bytes)?;
        let bricks_ok = ensure(sink, report, BufferTarget::Bricks, brick_bytes)?;
        if !(sectors_ok && bricks_ok) {
            tracing::warn!("voxel tables at buffer ceiling; uploads deferred");
            return Ok(false);
        }

        let mut budget = self.bricks_per_frame;
        let mut atlas_full = false;
        for (handle, alloc) in &mut self.objects {
            if budget == 0 {
                break;
            }
            let Some(object) = scene.object(*handle) else {
                continue;
            };
            let keys: Vec<BrickKey> = alloc.pending_bricks.iter().copied().collect();
            for key in keys {
                if budget == 0 {
                    break;
                }
                match upload_brick(&mut self.pools, self.atlas, alloc, object, key, atlas_full, sink, report) {
                    Ok(true) => {
                        alloc.pending_bricks.remove(&key);
                        report.bricks_uploaded += 1;
                        budget -= 1;
                    }
                    Ok(false) => {}
                    Err(err @ RenderError::AtlasExhaustion { .. }) => {
                        tracing::warn!(object = handle.0, "voxel payload atlas exhausted; brick left pending");
                        report.absorb(err)?;
                        atlas_full = true;
                    }
                    Err(err) => return Err(err),
                }
            }
        }

        let mut changed = false;
        let mut budget = self.sectors_per_frame;
        for (handle, alloc) in &mut self.objects {
            if budget == 0 {
                break;
            }
            let Some(object) = scene.object(*handle) else {
                continue;
            };
            let ready: Vec<SectorCoord> = alloc
                .pending_sectors
                .iter()
                .filter(|c| !alloc.has_pending_bricks(**c))
                .take(budget)
                .copied()
                .collect();
            for coord in ready {
                let (Some(sector), Some(slot)) = (object.sector(coord), alloc.sectors.get(&coord)) else {
                    alloc.pending_sectors.remove(&coord);
                    continue;
                };
                let record = SectorRecord {
                    origin_voxels: coord.origin_voxels(),
                    brick_table_index: slot.brick_table_index(),
                    brick_mask: sector.brick_mask(),
                };
                let offset = u64::from(slot.slot) * SECTOR_RECORD_SIZE as u64;
                sink.write_buffer(BufferTarget::Sectors, offset, &record.to_bytes())?;
                alloc.pending_sectors.remove(&coord);
                changed |= alloc.resident.insert(coord);
                report.sectors_uploaded += 1;
                budget -= 1;
            }
        }
        Ok(changed)
    }

    fn upload_materials(
        &mut self,
        scene: &Scene,
        sink: &mut impl UploadSink,
        report: &mut UploadReport,
    ) -> Result<()> {
        if !self.objects.values().any(|a| a.palette_pending) {
            return Ok(());
        }
        let block_bytes = u64::from(MATERIALS_PER_BLOCK) * MATERIAL_RECORD_SIZE as u64;
        let required = u64::from(self.pools.material_blocks.tail().max(1)) * block_bytes;
        if !ensure(sink, report, BufferTarget::Materials, required)? {
            return Ok(());
        }
        for (handle, alloc) in &mut self.objects {
            if !alloc.palette_pending {
                continue;
            }
            let Some(object) = scene.object(*handle) else {
                continue;
            };
            let mut w = ByteWriter::with_capacity(block_bytes as usize);
            for material in object.palette().entries() {
                write_material(&mut w, material);
            }
            sink.write_buffer(
                BufferTarget::Materials,
                u64::from(alloc.material_block) * block_bytes,
                w.as_slice(),
            )?;
            alloc.palette_pending = false;
            report.materials_uploaded += 1;
        }
        Ok(())
    }

    /// Step D: rebuild the hash grid over resident sectors.
    fn rebuild_grid(&mut self, sink: &mut impl UploadSink, report: &mut UploadReport) -> Result<()> {
        let entries: Vec<GridEntry> = self
            .objects
            .iter()
            .flat_map(|(handle, alloc)| {
                alloc.resident.iter().filter_map(|coord| {
                    alloc.sectors.get(coord).map(|s| GridEntry {
                        coords: coord.to_ivec3(),
                        base_idx: handle.0,
                        sector_idx: s.slot,
                    })
                })
            })
            .collect();
        let size = grid_size_for(
            entries.len(),
            self.grid_load_factor,
            self.grid_min_size,
            self.grid_scale,
        );

        let grid = match SectorHashGrid::build(size, self.grid_max_probes, entries) {
            Ok(grid) => grid,
            Err(VoxelError::HashOverflow {
                coords,
                base_idx,
                probes,
            }) => {
                tracing::error!(
                    %coords,
                    object = base_idx,
                    probes,
                    size,
                    "sector hash grid overflow; doubling grid next frame"
                );
                self.grid_scale = self.grid_scale.saturating_mul(2);
                self.grid_regrow = true;
                return report.absorb(RenderError::HashOverflow {
                    coords,
                    base_idx,
                    probes,
                });
            }
            Err(err) => return Err(RenderError::ResourceCreation(err.to_string())),
        };

        let grid_bytes = u64::from(grid.size()) * GRID_ENTRY_SIZE as u64;
        if !ensure(sink, report, BufferTarget::SectorGrid, grid_bytes)?
            || !ensure(sink, report, BufferTarget::GridParams, GRID_PARAMS_SIZE as u64)?
        {
            self.grid_regrow = true;
            return Ok(());
        }
        let mut w = ByteWriter::with_capacity(grid_bytes as usize);
        for entry in grid.entries() {
            write_grid_entry(&mut w, entry);
        }
        sink.write_buffer(BufferTarget::SectorGrid, 0, w.as_slice())?;
        let mut w = ByteWriter::with_capacity(GRID_PARAMS_SIZE);
        write_grid_params(&mut w, grid.params());
        sink.write_buffer(BufferTarget::GridParams, 0, w.as_slice())?;

        tracing::debug!(size = grid.size(), sectors = grid.occupied(), "sector hash grid rebuilt");
        self.grid = grid;
        self.grid_regrow = false;
        self.grid_uploaded = true;
        report.grid_rebuilt = true;
        Ok(())
    }

    /// Shader parameters for a tracked object.
    pub fn object_params(&self, handle: ObjectHandle, object: &VoxelObject) -> Option<ObjectParamsRecord> {
        let alloc = self.objects.get(&handle)?;
        Some(ObjectParamsRecord {
            object_hash_id: handle.0,
            material_base: alloc.material_block * MATERIALS_PER_BLOCK,
            tree64_base: NO_TREE64,
            lod_threshold: object.lod_threshold(),
            sector_count: alloc.resident.len() as u32,
        })
    }

    /// The last grid uploaded to the GPU.
    pub const fn grid(&self) -> &SectorHashGrid {
        &self.grid
    }

    /// Sector slot and brick table index of a tracked sector.
    pub fn sector_slot(&self, handle: ObjectHandle, coord: SectorCoord) -> Option<(u32, u32)> {
        let s = self.objects.get(&handle)?.sectors.get(&coord)?;
        Some((s.slot, s.brick_table_index()))
    }

    /// Atlas tile owned by a brick.
    pub fn brick_tile(&self, handle: ObjectHandle, key: BrickKey) -> Option<u32> {
        self.objects.get(&handle)?.tiles.get(&key).copied()
    }

    pub fn is_resident(&self, handle: ObjectHandle, coord: SectorCoord) -> bool {
        self.objects
            .get(&handle)
            .is_some_and(|a| a.resident.contains(&coord))
    }

    pub fn pending_sectors(&self) -> usize {
        self.objects.values().map(|a| a.pending_sectors.len()).sum()
    }

    pub fn pending_bricks(&self) -> usize {
        self.objects.values().map(|a| a.pending_bricks.len()).sum()
    }

    pub const fn live_sector_slots(&self) -> u32 {
        self.pools.sector_slots.live()
    }

    pub const fn live_brick_blocks(&self) -> u32 {
        self.pools.brick_blocks.live()
    }

    pub const fn live_tiles(&self) -> u32 {
        self.pools.tiles.live()
    }

    pub fn tracked_objects(&self) -> usize {
        self.objects.len()
    }
}

fn diff_structure(pools: &mut Pools, alloc: &mut ObjectAlloc, object: &VoxelObject) -> Result<bool> {
    let stale: Vec<SectorCoord> = alloc
        .sectors
        .iter()
        .filter(|(coord, s)| object.sector(**coord).map_or(true, |live| live.id() != s.id))
        .map(|(coord, _)| *coord)
        .collect();
    let mut changed = false;
    for coord in stale {
        changed |= pools.release_sector(alloc, coord);
    }

    for coord in object.sorted_sector_coords() {
        if alloc.sectors.contains_key(&coord) {
            continue;
        }
        let Some(sector) = object.sector(coord) else {
            continue;
        };
        let slot = pools
            .sector_slots
            .alloc()
            .map_err(|e| RenderError::ResourceCreation(e.to_string()))?;
        let block = pools
            .brick_blocks
            .alloc()
            .map_err(|e| RenderError::ResourceCreation(e.to_string()))?;
        alloc.sectors.insert(
            coord,
            SectorAlloc {
                id: sector.id(),
                slot,
                block,
            },
        );
        alloc.pending_sectors.insert(coord);
        for (index, _) in sector.bricks() {
            alloc.pending_bricks.insert(BrickKey::new(coord, index));
        }
    }
    Ok(changed)
}

/// Write one brick record and, for payload bricks, its atlas tile.
///
/// Returns `Ok(false)` when the brick needs a new tile but the atlas is
/// already known to be full this frame.
#[allow(clippy::too_many_arguments)]
fn upload_brick(
    pools: &mut Pools,
    atlas: AtlasLayout,
    alloc: &mut ObjectAlloc,
    object: &VoxelObject,
    key: BrickKey,
    atlas_full: bool,
    sink: &mut impl UploadSink,
    report: &mut UploadReport,
) -> Result<bool> {
    let Some(&sector) = alloc.sectors.get(&key.sector) else {
        return Ok(true);
    };
    let brick = object
        .sector(key.sector)
        .and_then(|s| s.brick(key.index()));

    let record = match brick {
        Some(brick) => match brick.payload() {
            Some(voxels) => {
                let tile = match alloc.tiles.get(&key) {
                    Some(&tile) => tile,
                    None if atlas_full => return Ok(false),
                    None => {
                        let tile = pools.tiles.alloc().map_err(|err| match err {
                            VoxelError::Exhausted { limit } => {
                                RenderError::AtlasExhaustion { capacity: limit }
                            }
                            other => RenderError::ResourceCreation(other.to_string()),
                        })?;
                        alloc.tiles.insert(key, tile);
                        tile
                    }
                };
                let origin = atlas.slot_origin(tile);
                sink.write_atlas_tile(origin, voxels)?;
                report.tiles_written += 1;
                BrickRecord::new(brick, Some(origin))
            }
            None => {
                pools.release_tile(alloc, key);
                BrickRecord::new(brick, None)
            }
        },
        None => {
            pools.release_tile(alloc, key);
            BrickRecord::EMPTY
        }
    };

    let index = u64::from(sector.brick_table_index()) + key.index() as u64;
    sink.write_buffer(
        BufferTarget::Bricks,
        index * BRICK_RECORD_SIZE as u64,
        &record.to_bytes(),
    )?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use glam::{IVec3, Mat4};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use strata_core::{Material, VoxelCoord};
    use strata_voxel::sector_hash;

    use super::*;
    use crate::gpu_types::{decode_grid_entry, unpack_atlas_offset};
    use crate::upload::testing::MemorySink;

    fn v(x: i32, y: i32, z: i32) -> VoxelCoord {
        VoxelCoord::new(x, y, z)
    }

    fn setup(config: &RendererConfig) -> (VoxelSync, MemorySink) {
        (VoxelSync::new(config), MemorySink::new(config.atlas_side_voxels()))
    }

    fn frame(sync: &mut VoxelSync, scene: &mut Scene, sink: &mut MemorySink) -> UploadReport {
        let mut report = UploadReport::default();
        sync.sync(scene, sink, &mut report).unwrap();
        report
    }

    fn gpu_brick(sink: &MemorySink, index: u32) -> BrickRecord {
        let offset = index as usize * BRICK_RECORD_SIZE;
        BrickRecord::decode(&sink.buffer(BufferTarget::Bricks)[offset..offset + BRICK_RECORD_SIZE]).unwrap()
    }

    fn gpu_sector(sink: &MemorySink, slot: u32) -> SectorRecord {
        let offset = slot as usize * SECTOR_RECORD_SIZE;
        SectorRecord::decode(&sink.buffer(BufferTarget::Sectors)[offset..offset + SECTOR_RECORD_SIZE]).unwrap()
    }

    /// Every brick of `object` matches its GPU record and tile.
    fn assert_mirrored(sync: &VoxelSync, sink: &MemorySink, handle: ObjectHandle, object: &VoxelObject) {
        for sector in object.sectors() {
            let (slot, table) = sync.sector_slot(handle, sector.coord()).unwrap();
            let record = gpu_sector(sink, slot);
            assert_eq!(record.origin_voxels, sector.coord().origin_voxels());
            assert_eq!(record.brick_mask, sector.brick_mask());
            assert_eq!(record.brick_table_index, table);
            for (index, brick) in sector.bricks() {
                let gpu = gpu_brick(sink, table + index as u32);
                let key = BrickKey::new(sector.coord(), index);
                let origin = sync.brick_tile(handle, key).map(|t| sync.atlas().slot_origin(t));
                assert_eq!(gpu, BrickRecord::new(brick, origin));
                if let Some(payload) = brick.payload() {
                    let tile = sink.tile(unpack_atlas_offset(gpu.atlas_offset)).unwrap();
                    assert_eq!(tile, payload);
                }
            }
        }
    }

    #[test]
    fn single_voxel_reaches_the_gpu() {
        let config = RendererConfig::default().with_atlas_bricks_per_side(4);
        let (mut sync, mut sink) = setup(&config);
        let mut scene = Scene::new();
        let mut object = VoxelObject::new();
        object.set_voxel(v(5, 5, 5), 3);
        let handle = scene.insert_object(object);

        let report = frame(&mut sync, &mut scene, &mut sink);
        assert_eq!(report.sectors_uploaded, 1);
        assert_eq!(report.bricks_uploaded, 1);
        assert_eq!(report.tiles_written, 1);
        assert!(report.grid_rebuilt);
        assert_eq!(report.materials_uploaded, 1);
        assert!(report.recoverable.is_empty());
        assert!(scene.object(handle).unwrap().dirty().is_empty());

        let object = scene.object(handle).unwrap();
        assert_mirrored(&sync, &sink, handle, object);
        // Tile 0 is reserved, so the first brick lands in tile 1.
        assert_eq!(sync.brick_tile(handle, BrickKey::new(SectorCoord::new(0, 0, 0), 0)), Some(1));

        let (slot, _) = sync.sector_slot(handle, SectorCoord::new(0, 0, 0)).unwrap();
        assert_eq!(sync.grid().lookup(IVec3::ZERO, handle.0), Some(slot));
        let cell = (sector_hash(IVec3::ZERO, handle.0) & sync.grid().mask()) as usize;
        let bytes = sink.buffer(BufferTarget::SectorGrid);
        let entry = decode_grid_entry(&bytes[cell * GRID_ENTRY_SIZE..(cell + 1) * GRID_ENTRY_SIZE]).unwrap();
        assert_eq!(entry.sector_idx, slot);
    }

    #[test]
    fn clean_frame_writes_nothing() {
        let config = RendererConfig::default().with_atlas_bricks_per_side(4);
        let (mut sync, mut sink) = setup(&config);
        let mut scene = Scene::new();
        let mut object = VoxelObject::new();
        object.fill_box(v(0, 0, 0), v(9, 3, 3), 1);
        scene.insert_object(object);
        frame(&mut sync, &mut scene, &mut sink);

        sink.clear_log();
        let report = frame(&mut sync, &mut scene, &mut sink);
        assert!(!report.grid_rebuilt);
        assert!(sink.buffer_writes.is_empty());
        assert!(sink.tile_writes.is_empty());
    }

    #[test]
    fn brush_edit_rewrites_only_touched_bricks() {
        let config = RendererConfig::default().with_atlas_bricks_per_side(8);
        let (mut sync, mut sink) = setup(&config);
        let mut scene = Scene::new();
        let mut object = VoxelObject::new();
        object.fill_box(v(0, 0, 0), v(31, 3, 31), 1);
        let handle = scene.insert_object(object);
        frame(&mut sync, &mut scene, &mut sink);

        sink.clear_log();
        scene.object_mut(handle).unwrap().fill_sphere(v(5, 5, 5), 2.0, 3);
        let report = frame(&mut sync, &mut scene, &mut sink);
        assert_eq!(report.bricks_uploaded, 1);
        assert_eq!(sink.tile_writes.len(), 1);
        assert!(sink
            .buffer_writes
            .iter()
            .all(|(target, _, _)| *target == BufferTarget::Bricks));
        assert_mirrored(&sync, &sink, handle, scene.object(handle).unwrap());
    }

    #[test]
    fn budget_spreads_uploads_over_frames() {
        let config = RendererConfig::default()
            .with_sectors_per_frame(2)
            .with_atlas_bricks_per_side(8);
        let (mut sync, mut sink) = setup(&config);
        let mut scene = Scene::new();
        let mut object = VoxelObject::new();
        for i in 0..6 {
            object.set_voxel(v(i * 32, 0, 0), 2);
        }
        let handle = scene.insert_object(object);

        let first = frame(&mut sync, &mut scene, &mut sink);
        assert_eq!(first.bricks_uploaded, 6);
        assert_eq!(first.sectors_uploaded, 2);
        assert_eq!(first.pending_sectors, 4);

        let mut frames = 1;
        while sync.pending_sectors() > 0 {
            let report = frame(&mut sync, &mut scene, &mut sink);
            assert!(report.sectors_uploaded <= 2);
            frames += 1;
        }
        assert_eq!(frames, 3);
        let object = scene.object(handle).unwrap();
        for coord in object.sorted_sector_coords() {
            assert!(sync.is_resident(handle, coord));
            assert!(sync.grid().lookup(coord.to_ivec3(), handle.0).is_some());
        }
        assert_mirrored(&sync, &sink, handle, object);
    }

    #[test]
    fn sector_waits_for_its_bricks() {
        let config = RendererConfig::default()
            .with_sectors_per_frame(1)
            .with_atlas_bricks_per_side(8);
        let (mut sync, mut sink) = setup(&config);
        let mut scene = Scene::new();
        let mut object = VoxelObject::new();
        // Eight bricks in one sector, four brick uploads per frame.
        object.fill_box(v(0, 0, 0), v(15, 15, 15), 1);
        let handle = scene.insert_object(object);

        let report = frame(&mut sync, &mut scene, &mut sink);
        assert_eq!(report.bricks_uploaded, 4);
        assert_eq!(report.sectors_uploaded, 0);
        assert!(!sync.is_resident(handle, SectorCoord::new(0, 0, 0)));
        assert_eq!(sync.grid().lookup(IVec3::ZERO, handle.0), None);

        let report = frame(&mut sync, &mut scene, &mut sink);
        assert_eq!(report.bricks_uploaded, 4);
        assert_eq!(report.sectors_uploaded, 1);
        assert!(report.grid_rebuilt);
        assert!(sync.grid().lookup(IVec3::ZERO, handle.0).is_some());
    }

    #[test]
    fn atlas_exhaustion_keeps_the_brick_pending() {
        // 2^3 tiles, one reserved: seven usable.
        let config = RendererConfig::default().with_atlas_bricks_per_side(2);
        let (mut sync, mut sink) = setup(&config);
        let mut scene = Scene::new();
        let mut object = VoxelObject::new();
        for i in 0..8 {
            object.set_voxel(v(i * 8, 0, 0), 1);
        }
        let handle = scene.insert_object(object);

        let report = frame(&mut sync, &mut scene, &mut sink);
        assert_eq!(report.bricks_uploaded, 7);
        assert!(matches!(
            report.recoverable.as_slice(),
            [RenderError::AtlasExhaustion { capacity: 7 }]
        ));
        assert_eq!(sync.live_tiles(), 7);
        assert_eq!(sync.pending_bricks(), 1);
        assert!(sink.tile_writes.iter().all(|o| o.max_element() < 16));
        // The retry lives in the sync, not in the object's dirty state.
        assert!(scene.object(handle).unwrap().dirty().is_empty());
        let report = frame(&mut sync, &mut scene, &mut sink);
        assert_eq!(report.bricks_uploaded, 0);
        assert_eq!(sync.pending_bricks(), 1);
        assert_eq!(report.recoverable.len(), 1);

        // Freeing a brick lets the pending one through on the next frame.
        scene.object_mut(handle).unwrap().set_voxel(v(0, 0, 0), 0);
        frame(&mut sync, &mut scene, &mut sink);
        let report = frame(&mut sync, &mut scene, &mut sink);
        assert!(report.recoverable.is_empty());
        assert_eq!(sync.pending_bricks(), 0);
        assert_eq!(sync.live_tiles(), 7);
        assert_mirrored(&sync, &sink, handle, scene.object(handle).unwrap());
    }

    #[test]
    fn solid_bricks_need_no_tile() {
        let config = RendererConfig::default().with_atlas_bricks_per_side(4);
        let (mut sync, mut sink) = setup(&config);
        let mut scene = Scene::new();
        let mut object = VoxelObject::new();
        object.fill_box(v(0, 0, 0), v(7, 7, 7), 4);
        let handle = scene.insert_object(object);
        frame(&mut sync, &mut scene, &mut sink);
        assert_eq!(sync.live_tiles(), 1);

        scene.object_mut(handle).unwrap().compact_solid_bricks();
        frame(&mut sync, &mut scene, &mut sink);
        assert_eq!(sync.live_tiles(), 0);
        let (_, table) = sync.sector_slot(handle, SectorCoord::new(0, 0, 0)).unwrap();
        let record = gpu_brick(&sink, table);
        assert!(record.is_solid());
        assert_eq!(record.atlas_offset, 4);
    }

    #[test]
    fn removed_object_releases_everything() {
        let config = RendererConfig::default().with_atlas_bricks_per_side(4);
        let (mut sync, mut sink) = setup(&config);
        let mut scene = Scene::new();
        let mut object = VoxelObject::new();
        object.set_voxel(v(0, 0, 0), 1);
        object.set_voxel(v(40, 0, 0), 1);
        let handle = scene.insert_object(object);
        frame(&mut sync, &mut scene, &mut sink);
        assert_eq!(sync.live_sector_slots(), 2);

        scene.remove_object(handle);
        let report = frame(&mut sync, &mut scene, &mut sink);
        assert!(report.grid_rebuilt);
        assert_eq!(sync.tracked_objects(), 0);
        assert_eq!(sync.live_sector_slots(), 0);
        assert_eq!(sync.live_brick_blocks(), 0);
        assert_eq!(sync.live_tiles(), 0);
        assert_eq!(sync.grid().occupied(), 0);
    }

    #[test]
    fn replaced_sector_reuses_freed_slots() {
        let config = RendererConfig::default().with_atlas_bricks_per_side(4);
        let (mut sync, mut sink) = setup(&config);
        let mut scene = Scene::new();
        let mut object = VoxelObject::new();
        object.set_voxel(v(0, 0, 0), 1);
        object.set_voxel(v(32, 0, 0), 1);
        let handle = scene.insert_object(object);
        frame(&mut sync, &mut scene, &mut sink);
        let before = sync.sector_slot(handle, SectorCoord::new(1, 0, 0)).unwrap();

        let object = scene.object_mut(handle).unwrap();
        object.remove_sector(SectorCoord::new(1, 0, 0));
        object.set_voxel(v(33, 1, 1), 2);
        frame(&mut sync, &mut scene, &mut sink);
        assert_eq!(sync.sector_slot(handle, SectorCoord::new(1, 0, 0)), Some(before));
        assert_eq!(sync.live_sector_slots(), 2);
        assert_eq!(sync.live_tiles(), 2);
        assert_mirrored(&sync, &sink, handle, scene.object(handle).unwrap());
    }

    #[test]
    fn ceiling_defers_uploads_without_losing_them() {
        let config = RendererConfig::default().with_atlas_bricks_per_side(4);
        let (mut sync, mut sink) = setup(&config);
        sink.ceiling = 512;
        let mut scene = Scene::new();
        let mut object = VoxelObject::new();
        object.set_voxel(v(0, 0, 0), 1);
        let handle = scene.insert_object(object);

        let report = frame(&mut sync, &mut scene, &mut sink);
        assert!(report
            .recoverable
            .iter()
            .any(|e| matches!(e, RenderError::BufferCeiling { buffer, .. } if buffer == "bricks")));
        assert_eq!(sync.pending_bricks(), 1);

        sink.ceiling = u64::MAX;
        frame(&mut sync, &mut scene, &mut sink);
        assert_eq!(sync.pending_bricks(), 0);
        assert_mirrored(&sync, &sink, handle, scene.object(handle).unwrap());
    }

    #[test]
    fn hash_overflow_regrows_the_grid() {
        // Two sectors whose hashes collide in a two-cell grid, one probe.
        let handle = ObjectHandle(1);
        let a = SectorCoord::new(0, 0, 0);
        let h = |c: SectorCoord| sector_hash(c.to_ivec3(), handle.0);
        let b = (1..64)
            .map(|x| SectorCoord::new(x, 0, 0))
            .find(|c| h(*c) & 1 == h(a) & 1 && h(*c) != h(a))
            .unwrap();

        let config = RendererConfig::default()
            .with_atlas_bricks_per_side(4)
            .with_hash_grid(1, 1, 1);
        let (mut sync, mut sink) = setup(&config);
        let mut scene = Scene::new();
        let mut object = VoxelObject::new();
        object.set_voxel(VoxelCoord::new(a.x * 32, 0, 0), 1);
        object.set_voxel(VoxelCoord::new(b.x * 32, 0, 0), 1);
        assert_eq!(scene.insert_object(object), handle);

        let report = frame(&mut sync, &mut scene, &mut sink);
        assert!(matches!(
            report.recoverable.as_slice(),
            [RenderError::HashOverflow { probes: 1, .. }]
        ));

        let mut frames = 0;
        while sync.grid().lookup(b.to_ivec3(), handle.0).is_none() {
            frame(&mut sync, &mut scene, &mut sink);
            frames += 1;
            assert!(frames < 32, "grid never regrew");
        }
        assert!(sync.grid().lookup(a.to_ivec3(), handle.0).is_some());
        assert!(sync.grid().size() > 2);
    }

    #[test]
    fn palette_changes_are_uploaded() {
        let config = RendererConfig::default().with_atlas_bricks_per_side(4);
        let (mut sync, mut sink) = setup(&config);
        let mut scene = Scene::new();
        scene.insert_object(VoxelObject::new());
        let handle = scene.insert_object(VoxelObject::new());
        frame(&mut sync, &mut scene, &mut sink);

        scene
            .object_mut(handle)
            .unwrap()
            .set_material(9, Material::translucent(10, 20, 30, 128))
            .unwrap();
        let report = frame(&mut sync, &mut scene, &mut sink);
        assert_eq!(report.materials_uploaded, 1);

        let params = sync.object_params(handle, scene.object(handle).unwrap()).unwrap();
        assert_eq!(params.material_base, MATERIALS_PER_BLOCK);
        assert_eq!(params.tree64_base, NO_TREE64);
        let offset = (params.material_base as usize + 9) * MATERIAL_RECORD_SIZE;
        assert_eq!(&sink.buffer(BufferTarget::Materials)[offset..offset + 4], &[10, 20, 30, 128]);
    }

    #[test]
    fn random_edits_stay_mirrored() {
        let config = RendererConfig::default()
            .with_sectors_per_frame(4)
            .with_atlas_bricks_per_side(16);
        let (mut sync, mut sink) = setup(&config);
        let mut scene = Scene::new();
        let handle = scene.insert_object(VoxelObject::new().with_transform(Mat4::IDENTITY));
        let mut rng = StdRng::seed_from_u64(0xb1ce);

        for _ in 0..20 {
            let object = scene.object_mut(handle).unwrap();
            for _ in 0..200 {
                let pos = v(rng.gen_range(-40..40), rng.gen_range(-8..8), rng.gen_range(-40..40));
                let value = if rng.gen_bool(0.3) { 0 } else { rng.gen_range(1..=5) };
                object.set_voxel(pos, value);
            }
            if rng.gen_bool(0.2) {
                object.compact_solid_bricks();
            }
            frame(&mut sync, &mut scene, &mut sink);
        }
        while sync.pending_bricks() + sync.pending_sectors() > 0 {
            frame(&mut sync, &mut scene, &mut sink);
        }

        let object = scene.object(handle).unwrap();
        assert_mirrored(&sync, &sink, handle, object);
        assert_eq!(sync.live_sector_slots() as usize, object.sector_count());
        let payload_bricks = object
            .sectors()
            .flat_map(|s| s.bricks())
            .filter(|(_, b)| !b.is_solid())
            .count();
        assert_eq!(sync.live_tiles() as usize, payload_bricks);
        for coord in object.sorted_sector_coords() {
            let (slot, _) = sync.sector_slot(handle, coord).unwrap();
            assert_eq!(sync.grid().lookup(coord.to_ivec3(), handle.0), Some(slot));
        }
    }
}
