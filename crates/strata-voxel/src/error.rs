//! Error types for voxel storage.

use glam::IVec3;
use thiserror::Error;

/// Errors raised by the slot allocators and the sector hash grid.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VoxelError {
    /// A bounded allocator has handed out every slot.
    #[error("slot allocator exhausted ({limit} slots in use)")]
    Exhausted { limit: u32 },

    /// Linear probing did not find a free grid cell.
    #[error("sector grid overflow: sector {coords} of object {base_idx} not placed after {probes} probes")]
    HashOverflow {
        coords: IVec3,
        base_idx: u32,
        probes: u32,
    },
}

pub type Result<T> = std::result::Result<T, VoxelError>;
