//! Core types, math, and coordinates for the Strata voxel renderer.
//!
//! This crate provides the foundational types used throughout the renderer:
//! - Voxel, brick, and sector coordinate systems
//! - Ray and AABB math
//! - Palette materials
//! - Little-endian byte writers for GPU records
//! - Common error types

pub mod bytes;
pub mod coords;
pub mod error;
pub mod math;
pub mod types;

pub use bytes::{ByteReader, ByteWriter};
pub use coords::{BrickCoord, SectorCoord, VoxelCoord};
pub use error::{Error, Result};
pub use math::{Aabb, Ray};
pub use types::{Material, Palette, PaletteIndex};

/// Renderer-wide constants.
pub mod constants {
    /// Voxels per brick edge.
    pub const BRICK_SIZE: u32 = 8;
    /// Voxels in one brick (8^3).
    pub const BRICK_VOXELS: usize = 512;
    /// Bricks per sector edge.
    pub const SECTOR_BRICKS_PER_AXIS: u32 = 4;
    /// Bricks in one sector (4^3).
    pub const SECTOR_BRICKS: usize = 64;
    /// Voxels per sector edge.
    pub const SECTOR_SIZE: u32 = BRICK_SIZE * SECTOR_BRICKS_PER_AXIS;
    /// Voxels per micro-block edge.
    pub const MICRO_BLOCK_SIZE: u32 = 2;
    /// Micro-blocks per brick edge.
    pub const MICRO_BLOCKS_PER_AXIS: u32 = BRICK_SIZE / MICRO_BLOCK_SIZE;
    /// Micro-blocks in one brick, one occupancy bit each.
    pub const MICRO_BLOCKS: usize = 64;
    /// Ray distance written for pixels that hit nothing.
    pub const FAR_DEPTH: f32 = 60000.0;
    /// Palette entries per object.
    pub const PALETTE_SIZE: usize = 256;
}
