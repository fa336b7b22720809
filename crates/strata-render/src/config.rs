//! Renderer configuration.

use serde::{Deserialize, Serialize};

/// Tunables for the voxel data plane and frame graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Dirty sectors uploaded per frame; bricks get four times this budget.
    pub sectors_per_frame: usize,
    /// Atlas edge in bricks. The atlas holds this value cubed payload tiles.
    pub atlas_bricks_per_side: u32,
    /// No single storage buffer may grow past this many bytes.
    pub buffer_ceiling_bytes: u64,
    /// Geometric growth factor applied when a buffer is reallocated.
    pub buffer_growth: f64,
    /// Shadow map edge in texels.
    pub shadow_map_size: u32,
    /// Shadow map array layers; lights beyond this count are unshadowed.
    pub max_shadow_layers: u32,
    /// Sector hash grid cells per live sector before rounding up.
    pub hash_grid_load_factor: u32,
    /// Smallest sector hash grid.
    pub hash_grid_min_size: u32,
    /// Linear probe limit for sector hash grid insertion and lookup.
    pub hash_max_probes: u32,
    /// Frames a released resource is kept alive for.
    pub frames_in_flight: usize,
    /// Hi-Z mip whose larger edge is at most this is read back to the CPU.
    pub hiz_readback_max_dim: u32,
    /// Drop instances hidden behind the last Hi-Z snapshot.
    pub occlusion_culling: bool,
    /// WBOIT depth-weight exponent.
    pub transparency_power: f32,
    /// Run the debug overlay pass.
    pub debug_overlay: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            sectors_per_frame: 64,
            atlas_bricks_per_side: 128,
            buffer_ceiling_bytes: 1 << 30,
            buffer_growth: 1.5,
            shadow_map_size: 1024,
            max_shadow_layers: 16,
            hash_grid_load_factor: 8,
            hash_grid_min_size: 1024,
            hash_max_probes: 128,
            frames_in_flight: 2,
            hiz_readback_max_dim: 128,
            occlusion_culling: true,
            transparency_power: 8.0,
            debug_overlay: false,
        }
    }
}

impl RendererConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_sectors_per_frame(mut self, sectors: usize) -> Self {
        self.sectors_per_frame = sectors.max(1);
        self
    }

    #[must_use]
    pub fn with_atlas_bricks_per_side(mut self, bricks: u32) -> Self {
        self.atlas_bricks_per_side = bricks.clamp(1, 128);
        self
    }

    #[must_use]
    pub fn with_buffer_ceiling(mut self, bytes: u64) -> Self {
        self.buffer_ceiling_bytes = bytes;
        self
    }

    #[must_use]
    pub fn with_buffer_growth(mut self, growth: f64) -> Self {
        self.buffer_growth = growth.max(1.0);
        self
    }

    #[must_use]
    pub fn with_shadow_map_size(mut self, size: u32) -> Self {
        self.shadow_map_size = size.max(1);
        self
    }

    #[must_use]
    pub fn with_max_shadow_layers(mut self, layers: u32) -> Self {
        self.max_shadow_layers = layers.max(1);
        self
    }

    #[must_use]
    pub fn with_hash_grid(mut self, load_factor: u32, min_size: u32, max_probes: u32) -> Self {
        self.hash_grid_load_factor = load_factor.max(1);
        self.hash_grid_min_size = min_size.max(1).next_power_of_two();
        self.hash_max_probes = max_probes.max(1);
        self
    }

    #[must_use]
    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames;
        self
    }

    #[must_use]
    pub fn with_hiz_readback_max_dim(mut self, dim: u32) -> Self {
        self.hiz_readback_max_dim = dim.max(1);
        self
    }

    #[must_use]
    pub fn with_occlusion_culling(mut self, enabled: bool) -> Self {
        self.occlusion_culling = enabled;
        self
    }

    #[must_use]
    pub fn with_transparency_power(mut self, power: f32) -> Self {
        self.transparency_power = power;
        self
    }

    #[must_use]
    pub fn with_debug_overlay(mut self, enabled: bool) -> Self {
        self.debug_overlay = enabled;
        self
    }

    /// Atlas edge in voxels.
    pub const fn atlas_side_voxels(&self) -> u32 {
        self.atlas_bricks_per_side * strata_core::constants::BRICK_SIZE
    }

    /// Brick uploads allowed per frame.
    pub const fn bricks_per_frame(&self) -> usize {
        self.sectors_per_frame * 4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RendererConfig::default();
        assert_eq!(config.sectors_per_frame, 64);
        assert_eq!(config.bricks_per_frame(), 256);
        assert_eq!(config.atlas_side_voxels(), 1024);
        assert_eq!(config.buffer_ceiling_bytes, 1 << 30);
        assert_eq!(config.max_shadow_layers, 16);
        assert_eq!(config.hash_max_probes, 128);
    }

    #[test]
    fn atlas_side_is_capped_by_packing() {
        let config = RendererConfig::new().with_atlas_bricks_per_side(4096);
        assert_eq!(config.atlas_side_voxels(), 1024);
    }

    #[test]
    fn builder_setters_apply() {
        let config = RendererConfig::new()
            .with_sectors_per_frame(0)
            .with_hash_grid(4, 100, 16)
            .with_debug_overlay(true);
        assert_eq!(config.sectors_per_frame, 1);
        assert_eq!(config.hash_grid_min_size, 128);
        assert_eq!(config.hash_grid_load_factor, 4);
        assert!(config.debug_overlay);
    }
}
