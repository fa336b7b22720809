//! Upload spy.
//!
//! [`RecordingSink`] stands in for the GPU buffer manager: every buffer and
//! atlas write lands in CPU shadow memory and is logged, so tests can check
//! exactly what an update would have sent to the queue and rebuild the voxel
//! model from the uploaded bytes.

use std::collections::{BTreeMap, BTreeSet};

use glam::UVec3;
use strata_core::constants::BRICK_VOXELS;
use strata_core::{PaletteIndex, SectorCoord};
use strata_render::gpu_types::{
    decode_all, decode_grid_entry, unpack_atlas_offset, BrickRecord, SectorRecord, BRICK_RECORD_SIZE,
    GRID_ENTRY_SIZE, SECTOR_RECORD_SIZE,
};
use strata_render::upload::{BufferTarget, EnsureOutcome, UploadSink};
use strata_render::RenderError;
use strata_voxel::{Brick, VoxelObject};

use crate::{Result, TestError};

/// One write issued through the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordedWrite {
    Buffer {
        target: BufferTarget,
        offset: u64,
        len: usize,
    },
    Tile {
        origin: UVec3,
    },
}

/// An [`UploadSink`] over plain memory that logs every write.
#[derive(Debug)]
pub struct RecordingSink {
    buffers: BTreeMap<BufferTarget, Vec<u8>>,
    tiles: BTreeMap<[u32; 3], [PaletteIndex; BRICK_VOXELS]>,
    atlas_side: u32,
    ceiling: u64,
    log: Vec<RecordedWrite>,
}

impl RecordingSink {
    /// A sink mirroring an atlas `atlas_side` voxels wide, without a ceiling.
    pub fn new(atlas_side: u32) -> Self {
        Self {
            buffers: BTreeMap::new(),
            tiles: BTreeMap::new(),
            atlas_side,
            ceiling: u64::MAX,
            log: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_ceiling(mut self, ceiling: u64) -> Self {
        self.ceiling = ceiling;
        self
    }

    pub fn buffer(&self, target: BufferTarget) -> &[u8] {
        self.buffers.get(&target).map_or(&[], Vec::as_slice)
    }

    pub fn tile(&self, origin: UVec3) -> Option<&[PaletteIndex; BRICK_VOXELS]> {
        self.tiles.get(&origin.to_array())
    }

    pub fn log(&self) -> &[RecordedWrite] {
        &self.log
    }

    pub fn clear_log(&mut self) {
        self.log.clear();
    }

    /// Tile origins written since the log was last cleared.
    pub fn tile_writes(&self) -> Vec<UVec3> {
        self.log
            .iter()
            .filter_map(|w| match w {
                RecordedWrite::Tile { origin } => Some(*origin),
                RecordedWrite::Buffer { .. } => None,
            })
            .collect()
    }

    /// Indices of the `stride`-sized records of `target` touched by logged writes.
    pub fn written_records(&self, target: BufferTarget, stride: usize) -> BTreeSet<u64> {
        let stride = stride as u64;
        let mut records = BTreeSet::new();
        for write in &self.log {
            if let RecordedWrite::Buffer {
                target: t,
                offset,
                len,
            } = *write
            {
                if t == target && len > 0 {
                    records.extend(offset / stride..=(offset + len as u64 - 1) / stride);
                }
            }
        }
        records
    }

    /// Targets that received at least one logged write.
    pub fn written_targets(&self) -> BTreeSet<BufferTarget> {
        self.log
            .iter()
            .filter_map(|w| match w {
                RecordedWrite::Buffer { target, .. } => Some(*target),
                RecordedWrite::Tile { .. } => None,
            })
            .collect()
    }

    pub fn sector_record(&self, slot: u32) -> Result<SectorRecord> {
        let start = slot as usize * SECTOR_RECORD_SIZE;
        let bytes = self
            .buffer(BufferTarget::Sectors)
            .get(start..start + SECTOR_RECORD_SIZE)
            .ok_or_else(|| TestError::Gpu(format!("sector slot {slot} was never uploaded")))?;
        Ok(SectorRecord::decode(bytes)?)
    }

    pub fn brick_record(&self, index: u32) -> Result<BrickRecord> {
        let start = index as usize * BRICK_RECORD_SIZE;
        let bytes = self
            .buffer(BufferTarget::Bricks)
            .get(start..start + BRICK_RECORD_SIZE)
            .ok_or_else(|| TestError::Gpu(format!("brick record {index} was never uploaded")))?;
        Ok(BrickRecord::decode(bytes)?)
    }

    /// Rebuild the voxel structure of object `base_idx` from the uploaded
    /// grid, sector, brick and atlas data alone.
    pub fn reconstruct(&self, base_idx: u32) -> Result<VoxelObject> {
        let grid = decode_all(self.buffer(BufferTarget::SectorGrid), GRID_ENTRY_SIZE, decode_grid_entry)?;
        let mut object = VoxelObject::new();
        for entry in grid.iter().filter(|e| !e.is_empty() && e.base_idx == base_idx) {
            let sector = self.sector_record(entry.sector_idx)?;
            let coord = SectorCoord::from(entry.coords);
            if sector.origin_voxels != coord.origin_voxels() {
                return Err(TestError::Gpu(format!(
                    "sector {coord:?} record has origin {}",
                    sector.origin_voxels
                )));
            }
            for index in 0..64 {
                if sector.brick_mask & (1 << index) == 0 {
                    continue;
                }
                let record = self.brick_record(sector.brick_table_index + index)?;
                let brick = if record.is_solid() {
                    Brick::solid(record.atlas_offset as PaletteIndex)
                } else {
                    self.tile(unpack_atlas_offset(record.atlas_offset))
                        .map(|payload| Brick::from_payload(*payload))
                }
                .ok_or_else(|| TestError::Gpu(format!("brick {index} of sector {coord:?} has no data")))?;
                object.insert_brick(coord, index as usize, brick);
            }
        }
        object.clear_dirty();
        Ok(object)
    }
}

/// Same sectors, same brick masks, same bricks.
pub fn same_structure(a: &VoxelObject, b: &VoxelObject) -> bool {
    let coords = a.sorted_sector_coords();
    coords == b.sorted_sector_coords()
        && coords.iter().all(|&coord| match (a.sector(coord), b.sector(coord)) {
            (Some(sa), Some(sb)) => {
                sa.brick_mask() == sb.brick_mask() && sa.bricks().all(|(i, brick)| sb.brick(i) == Some(brick))
            }
            _ => false,
        })
}

impl UploadSink for RecordingSink {
    fn ensure_capacity(&mut self, target: BufferTarget, required: u64) -> strata_render::Result<EnsureOutcome> {
        if required > self.ceiling {
            return Err(RenderError::BufferCeiling {
                buffer: target.label().to_string(),
                required,
                ceiling: self.ceiling,
            });
        }
        let buf = self.buffers.entry(target).or_default();
        let recreated = (buf.len() as u64) < required;
        if recreated {
            buf.resize(required as usize, 0);
        }
        Ok(EnsureOutcome {
            recreated,
            capacity: buf.len() as u64,
        })
    }

    fn write_buffer(&mut self, target: BufferTarget, offset: u64, bytes: &[u8]) -> strata_render::Result<()> {
        let buf = self.buffers.entry(target).or_default();
        let start = offset as usize;
        let end = start + bytes.len();
        if end > buf.len() {
            return Err(RenderError::ResourceCreation(format!(
                "write of {} bytes at {offset} past {target} end {}",
                bytes.len(),
                buf.len()
            )));
        }
        buf[start..end].copy_from_slice(bytes);
        self.log.push(RecordedWrite::Buffer {
            target,
            offset,
            len: bytes.len(),
        });
        Ok(())
    }

    fn write_atlas_tile(&mut self, origin: UVec3, voxels: &[PaletteIndex; BRICK_VOXELS]) -> strata_render::Result<()> {
        if origin.max_element() + 8 > self.atlas_side {
            return Err(RenderError::ResourceCreation(format!(
                "atlas tile at {origin} outside atlas of side {}",
                self.atlas_side
            )));
        }
        self.tiles.insert(origin.to_array(), *voxels);
        self.log.push(RecordedWrite::Tile { origin });
        Ok(())
    }
}
