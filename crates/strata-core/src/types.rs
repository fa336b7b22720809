//! Palette and material types.

use crate::constants::PALETTE_SIZE;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// 8-bit voxel payload. Zero means empty.
pub type PaletteIndex = u8;

/// Material properties for rendering.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Material {
    /// Base color (RGBA, 0-255). Alpha is the opacity used by the transparency pass.
    pub color: [u8; 4],
    /// Roughness (0.0 = mirror, 1.0 = diffuse)
    pub roughness: f32,
    /// Metallic (0.0 = dielectric, 1.0 = metal)
    pub metallic: f32,
    /// Emission strength (0.0 = no emission)
    pub emission: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            color: [255, 0, 255, 255],
            roughness: 0.8,
            metallic: 0.0,
            emission: 0.0,
        }
    }
}

impl Material {
    /// Opaque diffuse material of the given color.
    pub const fn opaque(r: u8, g: u8, b: u8) -> Self {
        Self {
            color: [r, g, b, 255],
            roughness: 0.85,
            metallic: 0.0,
            emission: 0.0,
        }
    }

    /// Translucent material with alpha in `0..=255`.
    pub const fn translucent(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self {
            color: [r, g, b, a],
            roughness: 0.1,
            metallic: 0.0,
            emission: 0.0,
        }
    }

    /// Opacity in `[0, 1]`.
    #[inline]
    pub fn opacity(&self) -> f32 {
        f32::from(self.color[3]) / 255.0
    }

    /// True when the material is rendered by the transparency pass.
    #[inline]
    pub const fn is_transparent(&self) -> bool {
        self.color[3] < 255
    }
}

/// 256-entry material table of one object. Entry 0 is reserved for empty.
#[derive(Clone, Debug, PartialEq)]
pub struct Palette {
    entries: Vec<Material>,
}

impl Default for Palette {
    fn default() -> Self {
        Self::new()
    }
}

impl Palette {
    /// Create a palette filled with the default material.
    pub fn new() -> Self {
        Self {
            entries: vec![Material::default(); PALETTE_SIZE],
        }
    }

    /// Set an entry. Index 0 is reserved.
    pub fn set(&mut self, index: PaletteIndex, material: Material) -> Result<()> {
        if index == 0 {
            return Err(Error::ReservedPaletteIndex(index));
        }
        self.entries[usize::from(index)] = material;
        Ok(())
    }

    #[inline]
    pub fn get(&self, index: PaletteIndex) -> &Material {
        &self.entries[usize::from(index)]
    }

    /// All entries in index order.
    pub fn entries(&self) -> &[Material] {
        &self.entries
    }
}
