//! Sparse hierarchical voxel storage for the Strata renderer.
//!
//! Objects store voxels in a three-level hierarchy:
//! - **Sector**: 4x4x4 bricks with a 64-bit brick mask
//! - **Brick**: 8x8x8 voxels with a 64-bit micro-block occupancy mask
//! - **Voxel**: an 8-bit palette index, 0 = empty
//!
//! The crate also provides the deterministic slot allocators and the sector
//! hash grid that the GPU uploader uses to mirror this structure.

pub mod allocator;
pub mod brick;
pub mod error;
pub mod hash_grid;
pub mod object;
pub mod raycast;
pub mod sector;

pub use allocator::SlotAllocator;
pub use brick::{compute_occupancy, Brick, BrickFlags};
pub use error::{Result, VoxelError};
pub use hash_grid::{sector_hash, GridEntry, GridParams, SectorHashGrid, EMPTY_SECTOR_INDEX};
pub use object::{BrickKey, DirtyState, VoxelObject};
pub use raycast::VoxelHit;
pub use sector::{Sector, SectorId};
