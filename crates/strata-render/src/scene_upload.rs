//! Per-frame scene serialisation: instances, BVH nodes, lights, object
//! parameters and particles.

use rayon::prelude::*;
use strata_core::ByteWriter;
use strata_world::{ObjectHandle, Scene};

use crate::camera::Camera;
use crate::error::Result;
use crate::gpu_types::{
    write_bvh_node, write_light, write_particle, InstanceRecord, ObjectParamsRecord,
    BVH_NODE_SIZE, EMPTY_BVH_NODE, INSTANCE_RECORD_SIZE, LIGHT_RECORD_SIZE, NO_TREE64,
    OBJECT_PARAMS_SIZE, PARTICLE_RECORD_SIZE,
};
use crate::hiz::HiZSnapshot;
use crate::upload::{ensure, BufferTarget, UploadReport, UploadSink};
use crate::voxel_sync::VoxelSync;

/// Counts the passes need to size their dispatches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SceneCounts {
    pub instances: u32,
    pub bvh_nodes: u32,
    pub lights: u32,
    pub particles: u32,
    /// The instance BVH was rebuilt this frame.
    pub bvh_rebuilt: bool,
}

/// Serialise the visible instances in BVH leaf order together with their
/// object parameters. Instance `k` reads object params `k`.
fn instance_bytes(scene: &Scene, voxels: &VoxelSync) -> (Vec<u8>, Vec<u8>) {
    let handles: &[ObjectHandle] = scene.instances();
    let records: Vec<(InstanceRecord, ObjectParamsRecord)> = handles
        .par_iter()
        .enumerate()
        .filter_map(|(k, handle)| {
            let object = scene.object(*handle)?;
            let instance = InstanceRecord {
                object_to_world: object.transform(),
                local_aabb: object.compute_aabb(),
                object_id: k as u32,
            };
            let params = voxels
                .object_params(*handle, object)
                .unwrap_or(ObjectParamsRecord {
                    object_hash_id: handle.0,
                    material_base: 0,
                    tree64_base: NO_TREE64,
                    lod_threshold: object.lod_threshold(),
                    sector_count: 0,
                });
            Some((instance, params))
        })
        .collect();

    let mut instances = ByteWriter::with_capacity(records.len() * INSTANCE_RECORD_SIZE);
    let mut params = ByteWriter::with_capacity(records.len() * OBJECT_PARAMS_SIZE);
    for (instance, object) in &records {
        instance.write(&mut instances);
        object.write(&mut params);
    }
    (instances.into_vec(), params.into_vec())
}

/// Mark objects hidden behind `snapshot` as occluded so the next BVH build
/// leaves them out. Returns how many objects are occluded.
pub fn cull_occluded(scene: &mut Scene, snapshot: &HiZSnapshot, camera: &Camera) -> usize {
    let view_proj = camera.view_projection_matrix();
    scene.update_occlusion(|aabb| snapshot.occludes(view_proj, camera.position, aabb))
}

/// Write `bytes` to `target`, growing it first. Empty arrays still get a
/// minimum allocation of `stride` bytes so bindings stay valid.
fn upload_array(
    sink: &mut impl UploadSink,
    report: &mut UploadReport,
    target: BufferTarget,
    bytes: &[u8],
    stride: usize,
) -> Result<()> {
    let required = bytes.len().max(stride) as u64;
    if ensure(sink, report, target, required)? && !bytes.is_empty() {
        sink.write_buffer(target, 0, bytes)?;
    }
    Ok(())
}

/// Upload everything except voxel data. Call after [`VoxelSync::sync`] so
/// newly added objects already own their slots.
#[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
pub fn upload_scene(
    scene: &mut Scene,
    voxels: &VoxelSync,
    sink: &mut impl UploadSink,
    report: &mut UploadReport,
) -> Result<SceneCounts> {
    let bvh_rebuilt = scene.update_bvh();
    if bvh_rebuilt {
        tracing::trace!(instances = scene.instances().len(), "instance BVH rebuilt");
    }
    let scene: &Scene = scene;

    let (instances, params) = instance_bytes(scene, voxels);
    upload_array(sink, report, BufferTarget::Instances, &instances, INSTANCE_RECORD_SIZE)?;
    upload_array(sink, report, BufferTarget::ObjectParams, &params, OBJECT_PARAMS_SIZE)?;

    let nodes = scene.bvh().nodes();
    let mut w = ByteWriter::with_capacity(nodes.len().max(1) * BVH_NODE_SIZE);
    if nodes.is_empty() {
        write_bvh_node(&mut w, &EMPTY_BVH_NODE);
    }
    for node in nodes {
        write_bvh_node(&mut w, node);
    }
    upload_array(sink, report, BufferTarget::BvhNodes, w.as_slice(), BVH_NODE_SIZE)?;

    let lights = scene.lights();
    let mut w = ByteWriter::with_capacity(lights.len() * LIGHT_RECORD_SIZE);
    for light in lights {
        write_light(&mut w, light);
    }
    upload_array(sink, report, BufferTarget::Lights, w.as_slice(), LIGHT_RECORD_SIZE)?;

    let particles = scene.particles();
    let mut w = ByteWriter::with_capacity(particles.len() * PARTICLE_RECORD_SIZE);
    for particle in particles {
        write_particle(&mut w, particle);
    }
    upload_array(sink, report, BufferTarget::Particles, w.as_slice(), PARTICLE_RECORD_SIZE)?;

    let counts = SceneCounts {
        instances: (instances.len() / INSTANCE_RECORD_SIZE) as u32,
        bvh_nodes: nodes.len().max(1) as u32,
        lights: lights.len() as u32,
        particles: particles.len() as u32,
        bvh_rebuilt,
    };
    report.instances = counts.instances as usize;
    report.lights = counts.lights as usize;
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use glam::{Mat4, Vec3, Vec4};
    use strata_core::{ByteReader, VoxelCoord};
    use strata_voxel::VoxelObject;
    use strata_world::{Light, Particle};

    use super::*;
    use crate::config::RendererConfig;
    use crate::upload::testing::MemorySink;

    fn cube(offset: Vec3) -> VoxelObject {
        let mut object = VoxelObject::new().with_transform(Mat4::from_translation(offset));
        object.set_voxel(VoxelCoord::new(0, 0, 0), 1);
        object
    }

    fn update(scene: &mut Scene, sync: &mut VoxelSync, sink: &mut MemorySink) -> SceneCounts {
        let mut report = UploadReport::default();
        sync.sync(scene, sink, &mut report).unwrap();
        upload_scene(scene, sync, sink, &mut report).unwrap()
    }

    #[test]
    fn empty_scene_uploads_a_sentinel_node() {
        let config = RendererConfig::default().with_atlas_bricks_per_side(4);
        let mut sync = VoxelSync::new(&config);
        let mut sink = MemorySink::new(config.atlas_side_voxels());
        let mut scene = Scene::new();
        let counts = update(&mut scene, &mut sync, &mut sink);
        assert_eq!(counts.instances, 0);
        assert_eq!(counts.bvh_nodes, 1);

        let mut r = ByteReader::new(sink.buffer(BufferTarget::BvhNodes));
        let min = r.vec4().unwrap();
        let max = r.vec4().unwrap();
        assert!(min.x > max.x);
        assert_eq!(sink.buffer(BufferTarget::Instances).len(), INSTANCE_RECORD_SIZE);
        assert_eq!(sink.buffer(BufferTarget::Lights).len(), LIGHT_RECORD_SIZE);
    }

    #[test]
    fn instances_follow_bvh_order() {
        let config = RendererConfig::default().with_atlas_bricks_per_side(4);
        let mut sync = VoxelSync::new(&config);
        let mut sink = MemorySink::new(config.atlas_side_voxels());
        let mut scene = Scene::new();
        for x in [300.0, 0.0, 100.0, 200.0] {
            scene.insert_object(cube(Vec3::new(x, 0.0, 0.0)));
        }
        let hidden = scene.insert_object(cube(Vec3::new(-100.0, 0.0, 0.0)));
        scene.set_visible(hidden, false);
        scene.add_light(Light::directional(Vec3::NEG_Y, Vec3::ONE, 1.0));
        scene.set_particles(vec![Particle {
            position: Vec3::ZERO,
            size: 0.5,
            color: Vec4::new(1.0, 0.0, 0.0, 0.5),
        }]);

        let counts = update(&mut scene, &mut sync, &mut sink);
        assert_eq!(counts.instances, 4);
        assert_eq!(counts.lights, 1);
        assert_eq!(counts.particles, 1);

        let instances = sink.buffer(BufferTarget::Instances);
        let params = sink.buffer(BufferTarget::ObjectParams);
        for (k, handle) in scene.instances().iter().enumerate() {
            let mut r = ByteReader::new(&instances[k * INSTANCE_RECORD_SIZE..]);
            let o2w = r.mat4().unwrap();
            let expected = scene.object(*handle).unwrap().transform();
            assert_eq!(o2w, expected);
            let mut r = ByteReader::new(&instances[k * INSTANCE_RECORD_SIZE + 192..]);
            assert_eq!(r.u32().unwrap(), k as u32);

            let mut r = ByteReader::new(&params[k * OBJECT_PARAMS_SIZE..]);
            assert_eq!(r.u32().unwrap(), handle.0);
        }

        // Leaves index the instance buffer directly.
        let leaves: u32 = scene
            .bvh()
            .nodes()
            .iter()
            .filter(|n| n.is_leaf())
            .map(|n| n.leaf_count as u32)
            .sum();
        assert_eq!(leaves, 4);
    }

    #[test]
    fn occluded_instances_are_not_uploaded() {
        let config = RendererConfig::default().with_atlas_bricks_per_side(4);
        let mut sync = VoxelSync::new(&config);
        let mut sink = MemorySink::new(config.atlas_side_voxels());
        let mut scene = Scene::new();
        let near = scene.insert_object(cube(Vec3::new(0.0, 0.0, -8.0)));
        let far = scene.insert_object(cube(Vec3::new(0.0, 0.0, -40.0)));
        let camera = Camera::look_at_target(Vec3::ZERO, Vec3::NEG_Z, std::f32::consts::FRAC_PI_2, 1.0);
        assert_eq!(update(&mut scene, &mut sync, &mut sink).instances, 2);

        // Everything on screen is 12 units away.
        let snapshot = HiZSnapshot::from_data(vec![12.0; 64], 8, 8, 1)
            .unwrap()
            .with_view_proj(camera.view_projection_matrix());
        assert_eq!(cull_occluded(&mut scene, &snapshot, &camera), 1);
        let counts = update(&mut scene, &mut sync, &mut sink);
        assert!(counts.bvh_rebuilt);
        assert_eq!(counts.instances, 1);
        assert_eq!(scene.instances(), &[near]);
        let mut r = ByteReader::new(sink.buffer(BufferTarget::ObjectParams));
        assert_eq!(r.u32().unwrap(), near.0);

        // A snapshot from another viewpoint culls nothing.
        let moved = Camera::look_at_target(Vec3::new(0.0, 0.0, 5.0), Vec3::NEG_Z, std::f32::consts::FRAC_PI_2, 1.0);
        assert_eq!(cull_occluded(&mut scene, &snapshot, &moved), 0);
        assert!(!scene.is_occluded(far));
        assert_eq!(update(&mut scene, &mut sync, &mut sink).instances, 2);
    }
}
