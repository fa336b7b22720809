//! The seam between CPU reconciliation and GPU storage.
//!
//! Reconciliation code never touches wgpu directly; it writes through an
//! [`UploadSink`]. The renderer's buffer manager implements it on top of the
//! queue, and tests implement it over plain memory.

use std::fmt;

use glam::UVec3;
use strata_core::constants::BRICK_VOXELS;
use strata_core::PaletteIndex;

use crate::error::{RenderError, Result};

/// Growable storage buffers owned by the buffer manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BufferTarget {
    Instances,
    BvhNodes,
    Lights,
    ObjectParams,
    Sectors,
    Bricks,
    Materials,
    Tree64,
    SectorGrid,
    GridParams,
    Particles,
    ShadowIndices,
}

impl BufferTarget {
    pub const ALL: [Self; 12] = [
        Self::Instances,
        Self::BvhNodes,
        Self::Lights,
        Self::ObjectParams,
        Self::Sectors,
        Self::Bricks,
        Self::Materials,
        Self::Tree64,
        Self::SectorGrid,
        Self::GridParams,
        Self::Particles,
        Self::ShadowIndices,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            Self::Instances => "instances",
            Self::BvhNodes => "bvh_nodes",
            Self::Lights => "lights",
            Self::ObjectParams => "object_params",
            Self::Sectors => "sectors",
            Self::Bricks => "bricks",
            Self::Materials => "materials",
            Self::Tree64 => "tree64",
            Self::SectorGrid => "sector_grid",
            Self::GridParams => "grid_params",
            Self::Particles => "particles",
            Self::ShadowIndices => "shadow_indices",
        }
    }

    pub const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for BufferTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Result of [`UploadSink::ensure_capacity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnsureOutcome {
    /// The buffer was reallocated; bind groups built against it are stale.
    pub recreated: bool,
    /// Capacity in bytes after the call.
    pub capacity: u64,
}

/// Destination of every reconciliation write.
pub trait UploadSink {
    /// Make `target` hold at least `required` bytes, preserving contents.
    ///
    /// Fails with [`RenderError::BufferCeiling`] when `required` exceeds the
    /// configured ceiling; the old buffer stays in place.
    fn ensure_capacity(&mut self, target: BufferTarget, required: u64) -> Result<EnsureOutcome>;

    /// Write `bytes` at `offset`. The range must fit the current capacity.
    fn write_buffer(&mut self, target: BufferTarget, offset: u64, bytes: &[u8]) -> Result<()>;

    /// Write one 8x8x8 payload tile with its corner at `origin` voxels.
    fn write_atlas_tile(
        &mut self,
        origin: UVec3,
        voxels: &[PaletteIndex; BRICK_VOXELS],
    ) -> Result<()>;
}

/// Per-frame summary of what the upload stage did.
#[derive(Debug, Default)]
pub struct UploadReport {
    pub instances: usize,
    pub lights: usize,
    pub sectors_uploaded: usize,
    pub bricks_uploaded: usize,
    pub tiles_written: usize,
    pub pending_sectors: usize,
    pub pending_bricks: usize,
    pub grid_rebuilt: bool,
    pub materials_uploaded: usize,
    /// Buffers reallocated this frame.
    pub recreated: Vec<BufferTarget>,
    /// Data-plane failures that did not stop the frame.
    pub recoverable: Vec<RenderError>,
}

impl UploadReport {
    /// Record an ensure outcome.
    pub fn note(&mut self, target: BufferTarget, outcome: EnsureOutcome) {
        if outcome.recreated && !self.recreated.contains(&target) {
            self.recreated.push(target);
        }
    }

    /// Keep a recoverable error, or hand back a fatal one.
    pub fn absorb(&mut self, error: RenderError) -> Result<()> {
        if error.is_recoverable() {
            self.recoverable.push(error);
            Ok(())
        } else {
            Err(error)
        }
    }

    /// Fold another report into this one.
    pub fn merge(&mut self, other: Self) {
        self.instances += other.instances;
        self.lights += other.lights;
        self.sectors_uploaded += other.sectors_uploaded;
        self.bricks_uploaded += other.bricks_uploaded;
        self.tiles_written += other.tiles_written;
        self.pending_sectors = other.pending_sectors.max(self.pending_sectors);
        self.pending_bricks = other.pending_bricks.max(self.pending_bricks);
        self.grid_rebuilt |= other.grid_rebuilt;
        self.materials_uploaded += other.materials_uploaded;
        for target in other.recreated {
            if !self.recreated.contains(&target) {
                self.recreated.push(target);
            }
        }
        self.recoverable.extend(other.recoverable);
    }
}

/// Ensure capacity and record the outcome. Returns `Ok(false)` when the
/// ceiling was hit and the error was absorbed into `report`.
pub fn ensure(
    sink: &mut impl UploadSink,
    report: &mut UploadReport,
    target: BufferTarget,
    required: u64,
) -> Result<bool> {
    match sink.ensure_capacity(target, required) {
        Ok(outcome) => {
            report.note(target, outcome);
            Ok(true)
        }
        Err(err) => {
            report.absorb(err)?;
            Ok(false)
        }
    }
}
