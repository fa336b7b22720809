//! Little-endian GPU record layouts shared with the WGSL structs.
//!
//! Every record is written field by field through [`ByteWriter`]. Records
//! that are read back on the CPU (sectors, bricks, grid cells) also decode.

use glam::{IVec3, Mat4, UVec3, Vec3};
use strata_core::constants::BRICK_SIZE;
use strata_core::{Aabb, ByteReader, ByteWriter, Material};
use strata_voxel::{Brick, BrickFlags, GridEntry, GridParams};
use strata_world::{BvhNode, Light, Particle};

pub const CAMERA_DATA_SIZE: usize = 256;
pub const SECTOR_RECORD_SIZE: usize = 32;
pub const BRICK_RECORD_SIZE: usize = 16;
pub const LIGHT_RECORD_SIZE: usize = 192;
pub const OBJECT_PARAMS_SIZE: usize = 32;
pub const GRID_ENTRY_SIZE: usize = 32;
pub const GRID_PARAMS_SIZE: usize = 16;
pub const INSTANCE_RECORD_SIZE: usize = 208;
pub const BVH_NODE_SIZE: usize = 48;
pub const MATERIAL_RECORD_SIZE: usize = 16;
pub const PARTICLE_RECORD_SIZE: usize = 32;

/// Brick records reserved per sector slot.
pub const BRICKS_PER_BLOCK: u32 = 64;
/// Material records reserved per object.
pub const MATERIALS_PER_BLOCK: u32 = 256;
/// `tree64Base` of an object without a Tree64 LOD structure.
pub const NO_TREE64: u32 = u32::MAX;

/// Maps payload tile slots to atlas voxel origins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtlasLayout {
    bricks_per_side: u32,
}

impl AtlasLayout {
    pub const fn new(bricks_per_side: u32) -> Self {
        Self { bricks_per_side }
    }

    pub const fn bricks_per_side(&self) -> u32 {
        self.bricks_per_side
    }

    /// Atlas edge in voxels.
    pub const fn side_voxels(&self) -> u32 {
        self.bricks_per_side * BRICK_SIZE
    }

    /// Total tiles, including the reserved tile 0.
    pub const fn capacity(&self) -> u32 {
        self.bricks_per_side * self.bricks_per_side * self.bricks_per_side
    }

    /// Voxel origin of tile `slot`.
    pub const fn slot_origin(&self, slot: u32) -> UVec3 {
        let n = self.bricks_per_side;
        UVec3::new(
            (slot % n) * BRICK_SIZE,
            ((slot / n) % n) * BRICK_SIZE,
            (slot / (n * n)) * BRICK_SIZE,
        )
    }

    /// Inverse of [`Self::slot_origin`].
    pub const fn origin_slot(&self, origin: UVec3) -> u32 {
        let n = self.bricks_per_side;
        origin.x / BRICK_SIZE + (origin.y / BRICK_SIZE) * n + (origin.z / BRICK_SIZE) * n * n
    }
}

/// Pack an atlas origin into a brick record's `atlas_offset`.
pub const fn pack_atlas_offset(origin: UVec3) -> u32 {
    (origin.x << 20) | (origin.y << 10) | origin.z
}

pub const fn unpack_atlas_offset(offset: u32) -> UVec3 {
    UVec3::new(offset >> 20, (offset >> 10) & 0x3FF, offset & 0x3FF)
}

/// 32-byte sector record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SectorRecord {
    pub origin_voxels: IVec3,
    /// First brick record of the sector's 64-entry block.
    pub brick_table_index: u32,
    pub brick_mask: u64,
}

impl SectorRecord {
    pub fn write(&self, w: &mut ByteWriter) {
        w.ivec3(self.origin_voxels)
            .pad(4)
            .u32(self.brick_table_index)
            .u32(self.brick_mask as u32)
            .u32((self.brick_mask >> 32) as u32)
            .pad(4);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(SECTOR_RECORD_SIZE);
        self.write(&mut w);
        w.into_vec()
    }

    pub fn decode(bytes: &[u8]) -> strata_core::Result<Self> {
        let mut r = ByteReader::new(bytes);
        let origin_voxels = r.ivec3()?;
        r.skip(4)?;
        let brick_table_index = r.u32()?;
        let lo = u64::from(r.u32()?);
        let hi = u64::from(r.u32()?);
        Ok(Self {
            origin_voxels,
            brick_table_index,
            brick_mask: lo | (hi << 32),
        })
    }
}

/// 16-byte brick record. All zeroes means "no brick".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BrickRecord {
    /// Packed atlas origin, or the palette value of a SOLID brick.
    pub atlas_offset: u32,
    pub occupancy: u64,
    pub flags: u32,
}

impl BrickRecord {
    pub const EMPTY: Self = Self {
        atlas_offset: 0,
        occupancy: 0,
        flags: 0,
    };

    /// Record for `brick`. Payload bricks need their tile origin.
    pub fn new(brick: &Brick, tile_origin: Option<UVec3>) -> Self {
        let atlas_offset = match brick.solid_value() {
            Some(value) => u32::from(value),
            None => tile_origin.map_or(0, pack_atlas_offset),
        };
        Self {
            atlas_offset,
            occupancy: brick.occupancy(),
            flags: brick.flags().bits(),
        }
    }

    pub const fn is_solid(&self) -> bool {
        self.flags & BrickFlags::SOLID.bits() != 0
    }

    pub fn write(&self, w: &mut ByteWriter) {
        w.u32(self.atlas_offset)
            .u32(self.occupancy as u32)
            .u32((self.occupancy >> 32) as u32)
            .u32(self.flags);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(BRICK_RECORD_SIZE);
        self.write(&mut w);
        w.into_vec()
    }

    pub fn decode(bytes: &[u8]) -> strata_core::Result<Self> {
        let mut r = ByteReader::new(bytes);
        let atlas_offset = r.u32()?;
        let lo = u64::from(r.u32()?);
        let hi = u64::from(r.u32()?);
        let flags = r.u32()?;
        Ok(Self {
            atlas_offset,
            occupancy: lo | (hi << 32),
            flags,
        })
    }
}

/// 192-byte light record.
pub fn write_light(w: &mut ByteWriter, light: &Light) {
    let view_proj = light.view_projection();
    w.vec3(light.position(), 1.0)
        .vec3(light.direction(), 0.0)
        .vec3(light.color(), light.intensity())
        .f32(light.range())
        .f32(light.cos_cone())
        .f32(light.kind().as_u32() as f32)
        .pad(4)
        .mat4(&view_proj)
        .mat4(&view_proj.inverse());
}

/// 32-byte per-object shader parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObjectParamsRecord {
    /// Salt for the sector hash grid.
    pub object_hash_id: u32,
    /// First material record of the object's palette block.
    pub material_base: u32,
    pub tree64_base: u32,
    pub lod_threshold: f32,
    pub sector_count: u32,
}

impl ObjectParamsRecord {
    pub fn write(&self, w: &mut ByteWriter) {
        // Shaders index materials as u32 words, four per record.
        w.u32(self.object_hash_id)
            .u32(0)
            .u32(0)
            .u32(self.material_base * 4)
            .u32(self.tree64_base)
            .f32(self.lod_threshold)
            .u32(self.sector_count)
            .pad(4);
    }
}

/// 208-byte instance record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstanceRecord {
    pub object_to_world: Mat4,
    pub local_aabb: Aabb,
    /// Index into the object params buffer.
    pub object_id: u32,
}

impl InstanceRecord {
    pub fn world_aabb(&self) -> Aabb {
        self.local_aabb.transformed(self.object_to_world)
    }

    pub fn write(&self, w: &mut ByteWriter) {
        let world = self.world_aabb();
        w.mat4(&self.object_to_world)
            .mat4(&self.object_to_world.inverse())
            .vec3(world.min, 0.0)
            .vec3(world.max, 0.0)
            .vec3(self.local_aabb.min, 0.0)
            .vec3(self.local_aabb.max, 0.0)
            .u32(self.object_id)
            .pad(12);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(INSTANCE_RECORD_SIZE);
        self.write(&mut w);
        w.into_vec()
    }
}

/// 48-byte BVH node.
pub fn write_bvh_node(w: &mut ByteWriter, node: &BvhNode) {
    w.vec3(node.min, 0.0)
        .vec3(node.max, 0.0)
        .i32(node.left)
        .i32(node.right)
        .i32(node.leaf_first)
        .i32(node.leaf_count);
}

/// Node uploaded for an empty scene: inverted bounds no ray enters.
pub const EMPTY_BVH_NODE: BvhNode = BvhNode {
    min: Vec3::ONE,
    max: Vec3::NEG_ONE,
    left: -1,
    right: -1,
    leaf_first: 0,
    leaf_count: 0,
};

/// 16-byte material record: packed rgba8, roughness, metallic, emission.
pub fn write_material(w: &mut ByteWriter, material: &Material) {
    w.u32(u32::from_le_bytes(material.color))
        .f32(material.roughness)
        .f32(material.metallic)
        .f32(material.emission);
}

/// 32-byte particle record.
pub fn write_particle(w: &mut ByteWriter, particle: &Particle) {
    w.vec3(particle.position, particle.size).vec4(particle.color);
}

/// 32-byte sector grid cell.
pub fn write_grid_entry(w: &mut ByteWriter, entry: &GridEntry) {
    w.ivec3(entry.coords)
        .u32(entry.base_idx)
        .u32(entry.sector_idx)
        .pad(12);
}

pub fn decode_grid_entry(bytes: &[u8]) -> strata_core::Result<GridEntry> {
    let mut r = ByteReader::new(bytes);
    Ok(GridEntry {
        coords: r.ivec3()?,
        base_idx: r.u32()?,
        sector_idx: r.u32()?,
    })
}

pub fn write_grid_params(w: &mut ByteWriter, params: GridParams) {
    w.u32(params.size).u32(params.mask).pad(8);
}

/// Decode a packed array of fixed-size records.
pub fn decode_all<T>(
    bytes: &[u8],
    stride: usize,
    decode: impl Fn(&[u8]) -> strata_core::Result<T>,
) -> strata_core::Result<Vec<T>> {
    bytes.chunks_exact(stride).map(decode).collect()
}

#[cfg(test)]
mod tests {
    use glam::Quat;
    use strata_world::LightType;

    use super::*;

    #[test]
    fn atlas_slot_mapping() {
        let atlas = AtlasLayout::new(128);
        assert_eq!(atlas.side_voxels(), 1024);
        assert_eq!(atlas.capacity(), 128 * 128 * 128);
        assert_eq!(atlas.slot_origin(0), UVec3::ZERO);
        assert_eq!(atlas.slot_origin(1), UVec3::new(8, 0, 0));
        assert_eq!(atlas.slot_origin(128), UVec3::new(0, 8, 0));
        assert_eq!(atlas.slot_origin(128 * 128), UVec3::new(0, 0, 8));
        assert_eq!(atlas.slot_origin(atlas.capacity() - 1), UVec3::splat(1016));
        assert_eq!(atlas.origin_slot(atlas.slot_origin(12345)), 12345);
    }

    #[test]
    fn atlas_offset_packing() {
        let origin = UVec3::new(1016, 8, 512);
        let packed = pack_atlas_offset(origin);
        assert_eq!(packed, (1016 << 20) | (8 << 10) | 512);
        assert_eq!(unpack_atlas_offset(packed), origin);
    }

    #[test]
    fn sector_record_layout() {
        let record = SectorRecord {
            origin_voxels: IVec3::new(-32, 64, 0),
            brick_table_index: 640,
            brick_mask: 0x8000_0000_0000_0001,
        };
        let bytes = record.to_bytes();
        assert_eq!(bytes.len(), SECTOR_RECORD_SIZE);
        assert_eq!(&bytes[0..4], &(-32i32).to_le_bytes());
        assert_eq!(&bytes[16..20], &640u32.to_le_bytes());
        assert_eq!(&bytes[20..24], &1u32.to_le_bytes());
        assert_eq!(&bytes[24..28], &0x8000_0000u32.to_le_bytes());
        assert_eq!(SectorRecord::decode(&bytes).unwrap(), record);
    }

    #[test]
    fn brick_record_for_solid_and_payload() {
        let solid = Brick::solid(7).unwrap();
        let record = BrickRecord::new(&solid, None);
        assert!(record.is_solid());
        assert_eq!(record.atlas_offset, 7);
        assert_eq!(record.occupancy, u64::MAX);

        let mut payload = Brick::new();
        payload.set([1, 0, 0], 3);
        let record = BrickRecord::new(&payload, Some(UVec3::new(8, 16, 24)));
        assert!(!record.is_solid());
        assert_eq!(unpack_atlas_offset(record.atlas_offset), UVec3::new(8, 16, 24));
        assert_eq!(record.occupancy, 1);
        let bytes = record.to_bytes();
        assert_eq!(bytes.len(), BRICK_RECORD_SIZE);
        assert_eq!(BrickRecord::decode(&bytes).unwrap(), record);
    }

    #[test]
    fn fixed_record_sizes() {
        let mut w = ByteWriter::new();
        write_light(&mut w, &Light::directional(Vec3::NEG_Y, Vec3::ONE, 1.0));
        assert_eq!(w.len(), LIGHT_RECORD_SIZE);

        let mut w = ByteWriter::new();
        ObjectParamsRecord {
            object_hash_id: 1,
            material_base: 256,
            tree64_base: NO_TREE64,
            lod_threshold: 1.0,
            sector_count: 3,
        }
        .write(&mut w);
        assert_eq!(w.len(), OBJECT_PARAMS_SIZE);
        assert_eq!(&w.as_slice()[12..16], &1024u32.to_le_bytes());
        assert_eq!(&w.as_slice()[16..20], &u32::MAX.to_le_bytes());

        let instance = InstanceRecord {
            object_to_world: Mat4::from_rotation_translation(Quat::IDENTITY, Vec3::X),
            local_aabb: Aabb::new(Vec3::ZERO, Vec3::ONE),
            object_id: 0,
        };
        assert_eq!(instance.to_bytes().len(), INSTANCE_RECORD_SIZE);
        assert_eq!(instance.world_aabb().min, Vec3::X);

        let mut w = ByteWriter::new();
        write_bvh_node(&mut w, &EMPTY_BVH_NODE);
        assert_eq!(w.len(), BVH_NODE_SIZE);

        let mut w = ByteWriter::new();
        write_material(&mut w, &Material::opaque(1, 2, 3));
        assert_eq!(w.len(), MATERIAL_RECORD_SIZE);
        assert_eq!(&w.as_slice()[0..4], &[1, 2, 3, 255]);

        let mut w = ByteWriter::new();
        write_grid_entry(&mut w, &GridEntry::EMPTY);
        assert_eq!(w.len(), GRID_ENTRY_SIZE);
        assert_eq!(decode_grid_entry(w.as_slice()).unwrap(), GridEntry::EMPTY);

        let mut w = ByteWriter::new();
        write_grid_params(&mut w, GridParams { size: 1024, mask: 1023 });
        assert_eq!(w.len(), GRID_PARAMS_SIZE);
    }

    #[test]
    fn light_type_is_encoded_as_float() {
        let light = Light::spot(Vec3::ZERO, Vec3::NEG_Y, 0.5, Vec3::ONE, 1.0, 10.0);
        let mut w = ByteWriter::new();
        write_light(&mut w, &light);
        let ty = f32::from_le_bytes(w.as_slice()[56..60].try_into().unwrap());
        assert_eq!(ty, LightType::Spot.as_u32() as f32);
    }
}
