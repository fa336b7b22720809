//! Open-addressing hash from (object id, sector coord) to sector slot.
//!
//! The grid is rebuilt whole on the CPU and uploaded verbatim; shaders probe
//! it with the same hash and linear probe sequence as [`SectorHashGrid::lookup`].

use glam::IVec3;

use crate::error::{Result, VoxelError};

/// `sectorIdx` of an unused grid cell.
pub const EMPTY_SECTOR_INDEX: u32 = u32::MAX;
/// Probe limit shared with the shaders.
pub const DEFAULT_MAX_PROBES: u32 = 128;

/// Unmasked spatial hash of a sector coordinate salted with the object id.
///
/// Arithmetic wraps in 32 bits, matching WGSL `u32` semantics.
#[inline]
pub const fn sector_hash(coords: IVec3, base_idx: u32) -> u32 {
    (coords.x as u32).wrapping_mul(73_856_093)
        ^ (coords.y as u32).wrapping_mul(19_349_663)
        ^ (coords.z as u32).wrapping_mul(83_492_791)
        ^ base_idx.wrapping_mul(99_999_989)
}

/// One grid cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GridEntry {
    pub coords: IVec3,
    pub base_idx: u32,
    pub sector_idx: u32,
}

impl GridEntry {
    pub const EMPTY: Self = Self {
        coords: IVec3::ZERO,
        base_idx: 0,
        sector_idx: EMPTY_SECTOR_INDEX,
    };

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.sector_idx == EMPTY_SECTOR_INDEX
    }
}

/// Grid dimensions as seen by shaders.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GridParams {
    pub size: u32,
    pub mask: u32,
}

/// Grid size for a sector count: next power of two of `count * load_factor`,
/// never below `min_size`, multiplied by the overflow `scale`.
pub fn grid_size_for(sector_count: usize, load_factor: u32, min_size: u32, scale: u32) -> u32 {
    let wanted = (sector_count as u64 * u64::from(load_factor))
        .max(u64::from(min_size))
        .next_power_of_two();
    let scaled = wanted.saturating_mul(u64::from(scale.max(1).next_power_of_two()));
    scaled.min(1 << 31) as u32
}

/// CPU image of the sector hash grid.
#[derive(Clone, Debug)]
pub struct SectorHashGrid {
    entries: Vec<GridEntry>,
    max_probes: u32,
    occupied: usize,
}

impl SectorHashGrid {
    /// Create an empty grid. `size` is rounded up to a power of two.
    pub fn new(size: u32, max_probes: u32) -> Self {
        let size = size.max(1).next_power_of_two();
        Self {
            entries: vec![GridEntry::EMPTY; size as usize],
            max_probes,
            occupied: 0,
        }
    }

    /// Build a grid from entries, failing on the first overflow.
    pub fn build(
        size: u32,
        max_probes: u32,
        entries: impl IntoIterator<Item = GridEntry>,
    ) -> Result<Self> {
        let mut grid = Self::new(size, max_probes);
        for entry in entries {
            grid.insert(entry)?;
        }
        Ok(grid)
    }

    /// Insert by linear probing. Returns the number of probes used.
    pub fn insert(&mut self, entry: GridEntry) -> Result<u32> {
        let mask = self.mask();
        let start = sector_hash(entry.coords, entry.base_idx) & mask;
        for probe in 0..self.max_probes {
            let slot = &mut self.entries[(start.wrapping_add(probe) & mask) as usize];
            if slot.is_empty() {
                *slot = entry;
                self.occupied += 1;
                return Ok(probe + 1);
            }
            if slot.coords == entry.coords && slot.base_idx == entry.base_idx {
                slot.sector_idx = entry.sector_idx;
                return Ok(probe + 1);
            }
        }
        Err(VoxelError::HashOverflow {
            coords: entry.coords,
            base_idx: entry.base_idx,
            probes: self.max_probes,
        })
    }

    /// Find the sector slot for a coordinate, with the number of probes taken.
    pub fn lookup_with_probes(&self, coords: IVec3, base_idx: u32) -> (Option<u32>, u32) {
        let mask = self.mask();
        let start = sector_hash(coords, base_idx) & mask;
        for probe in 0..self.max_probes {
            let slot = &self.entries[(start.wrapping_add(probe) & mask) as usize];
            if slot.is_empty() {
                return (None, probe + 1);
            }
            if slot.coords == coords && slot.base_idx == base_idx {
                return (Some(slot.sector_idx), probe + 1);
            }
        }
        (None, self.max_probes)
    }

    #[inline]
    pub fn lookup(&self, coords: IVec3, base_idx: u32) -> Option<u32> {
        self.lookup_with_probes(coords, base_idx).0
    }

    #[inline]
    pub fn size(&self) -> u32 {
        self.entries.len() as u32
    }

    #[inline]
    pub fn mask(&self) -> u32 {
        self.size() - 1
    }

    pub fn params(&self) -> GridParams {
        GridParams {
            size: self.size(),
            mask: self.mask(),
        }
    }

    /// All cells, including empty ones, in slot order.
    pub fn entries(&self) -> &[GridEntry] {
        &self.entries
    }

    #[inline]
    pub const fn occupied(&self) -> usize {
        self.occupied
    }
}
