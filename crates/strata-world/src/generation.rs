//! Procedural demo content.

use glam::{Mat4, Vec3, Vec4};
use noise::{Fbm, MultiFractal, NoiseFn, Perlin};
use rayon::prelude::*;
use strata_core::{Material, PaletteIndex, VoxelCoord};
use strata_voxel::VoxelObject;

use crate::gizmo::Gizmo;
use crate::light::Light;
use crate::scene::{Particle, Scene};

pub const STONE: PaletteIndex = 1;
pub const DIRT: PaletteIndex = 2;
pub const GRASS: PaletteIndex = 3;
pub const GLASS: PaletteIndex = 4;
pub const BRICK_RED: PaletteIndex = 5;

/// Terrain generator configuration.
#[derive(Debug, Clone)]
pub struct TerrainConfig {
    /// Seed for noise generation.
    pub seed: u32,
    /// Footprint in voxels along X and Z.
    pub extent: i32,
    /// Lowest surface height.
    pub base_height: i32,
    /// Horizontal scale of terrain features.
    pub terrain_scale: f64,
    /// Maximum terrain height variation.
    pub terrain_height: f64,
    /// Number of noise octaves for detail.
    pub octaves: usize,
    /// Frequency multiplier between octaves.
    pub lacunarity: f64,
    /// Amplitude multiplier between octaves.
    pub persistence: f64,
    /// Depth of dirt layer below surface.
    pub dirt_depth: i32,
}

impl Default for TerrainConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            extent: 96,
            base_height: 4,
            terrain_scale: 48.0,
            terrain_height: 16.0,
            octaves: 4,
            lacunarity: 2.0,
            persistence: 0.5,
            dirt_depth: 3,
        }
    }
}

/// Fractal-noise heightmap terrain.
pub struct TerrainGenerator {
    config: TerrainConfig,
    height_noise: Fbm<Perlin>,
}

impl TerrainGenerator {
    pub fn new(config: TerrainConfig) -> Self {
        let height_noise = Fbm::<Perlin>::new(config.seed)
            .set_octaves(config.octaves)
            .set_lacunarity(config.lacunarity)
            .set_persistence(config.persistence);
        Self {
            config,
            height_noise,
        }
    }

    pub fn with_seed(seed: u32) -> Self {
        Self::new(TerrainConfig {
            seed,
            ..Default::default()
        })
    }

    pub const fn config(&self) -> &TerrainConfig {
        &self.config
    }

    /// Surface height at voxel column (x, z).
    pub fn height_at(&self, x: i32, z: i32) -> i32 {
        let nx = f64::from(x) / self.config.terrain_scale;
        let nz = f64::from(z) / self.config.terrain_scale;
        let n = self.height_noise.get([nx, nz]).clamp(-1.0, 1.0);
        ((n + 1.0) * 0.5 * self.config.terrain_height) as i32 + self.config.base_height
    }

    fn material_at(&self, y: i32, surface: i32) -> PaletteIndex {
        if y == surface {
            GRASS
        } else if y > surface - self.config.dirt_depth {
            DIRT
        } else {
            STONE
        }
    }

    /// Generate the terrain as one object spanning `[0, extent)` in X and Z.
    pub fn generate_object(&self) -> VoxelObject {
        let extent = self.config.extent;
        let heights: Vec<i32> = (0..extent * extent)
            .into_par_iter()
            .map(|i| self.height_at(i % extent, i / extent))
            .collect();

        let mut object = VoxelObject::new();
        apply_terrain_palette(&mut object);
        for z in 0..extent {
            for x in 0..extent {
                let surface = heights[(x + z * extent) as usize];
                for y in 0..=surface {
                    object.set_voxel(VoxelCoord::new(x, y, z), self.material_at(y, surface));
                }
            }
        }
        let promoted = object.compact_solid_bricks();
        tracing::info!(
            sectors = object.sector_count(),
            bricks = object.brick_count(),
            solid_bricks = promoted,
            "generated terrain object"
        );
        object
    }
}

fn apply_terrain_palette(object: &mut VoxelObject) {
    let entries = [
        (STONE, Material::opaque(128, 128, 128)),
        (DIRT, Material::opaque(139, 90, 43)),
        (GRASS, Material::opaque(86, 125, 70)),
        (GLASS, Material::translucent(120, 190, 230, 128)),
        (BRICK_RED, Material::opaque(180, 60, 50)),
    ];
    for (index, material) in entries {
        // Indices above are all non-zero.
        let _ = object.set_material(index, material);
    }
}

/// A cube object of `size` voxels filled with one palette entry.
pub fn cube_object(size: i32, value: PaletteIndex, transform: Mat4) -> VoxelObject {
    let mut object = VoxelObject::new().with_transform(transform);
    apply_terrain_palette(&mut object);
    object.fill_box(
        VoxelCoord::new(0, 0, 0),
        VoxelCoord::new(size - 1, size - 1, size - 1),
        value,
    );
    object
}

/// Terrain, an opaque cube, a glass cube, one sun and one point light.
pub fn demo_scene(seed: u32) -> Scene {
    let mut scene = Scene::new();
    let generator = TerrainGenerator::with_seed(seed);
    let extent = generator.config().extent as f32;

    let terrain = generator
        .generate_object()
        .with_transform(Mat4::from_translation(Vec3::new(-extent * 0.5, 0.0, -extent * 0.5)));
    scene.insert_object(terrain);

    scene.insert_object(cube_object(
        6,
        BRICK_RED,
        Mat4::from_translation(Vec3::new(-8.0, 24.0, -4.0)),
    ));
    scene.insert_object(cube_object(
        8,
        GLASS,
        Mat4::from_translation(Vec3::new(-4.0, 22.0, 4.0)),
    ));

    let mut sun = Light::directional(Vec3::new(-0.4, -1.0, -0.3), Vec3::new(1.0, 0.96, 0.9), 3.0);
    sun.set_range(extent);
    scene.add_light(sun);
    scene.add_light(Light::point(
        Vec3::new(6.0, 30.0, 6.0),
        Vec3::new(1.0, 0.6, 0.3),
        20.0,
        40.0,
    ));
    scene.set_ambient(Vec3::new(0.08, 0.09, 0.12));

    scene.set_particles(
        (0..16)
            .map(|i| {
                let a = i as f32 / 16.0 * std::f32::consts::TAU;
                Particle {
                    position: Vec3::new(a.cos() * 10.0, 28.0, a.sin() * 10.0),
                    size: 0.5,
                    color: Vec4::new(1.0, 0.8, 0.3, 0.6),
                }
            })
            .collect(),
    );

    scene.add_gizmo(Gizmo::line(Vec3::ZERO, Vec3::X * 8.0, Vec4::new(1.0, 0.0, 0.0, 1.0)));
    scene.add_gizmo(Gizmo::line(Vec3::ZERO, Vec3::Y * 8.0, Vec4::new(0.0, 1.0, 0.0, 1.0)));
    scene.add_gizmo(Gizmo::line(Vec3::ZERO, Vec3::Z * 8.0, Vec4::new(0.0, 0.0, 1.0, 1.0)));
    scene
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generator_deterministic() {
        let gen1 = TerrainGenerator::with_seed(12345);
        let gen2 = TerrainGenerator::with_seed(12345);
        for x in -50..50 {
            for z in -50..50 {
                assert_eq!(gen1.height_at(x, z), gen2.height_at(x, z));
            }
        }
    }

    #[test]
    fn terrain_object_matches_heightmap() {
        let gen = TerrainGenerator::new(TerrainConfig {
            seed: 42,
            extent: 20,
            ..Default::default()
        });
        let object = gen.generate_object();
        for (x, z) in [(0, 0), (7, 13), (19, 19)] {
            let h = gen.height_at(x, z);
            assert_eq!(object.get_voxel(VoxelCoord::new(x, h, z)), GRASS);
            assert_eq!(object.get_voxel(VoxelCoord::new(x, h + 1, z)), 0);
            assert_eq!(object.get_voxel(VoxelCoord::new(x, 0, z)), STONE);
        }
    }

    #[test]
    fn demo_scene_contents() {
        let mut scene = demo_scene(1);
        assert_eq!(scene.object_count(), 3);
        assert_eq!(scene.lights().len(), 2);
        assert!(scene.update_bvh());
        assert_eq!(scene.instances().len(), 3);
    }
}
