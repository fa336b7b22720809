//! Scene container: objects behind stable handles, lights, gizmos, particles.

use glam::{Vec3, Vec4};
use strata_core::{Aabb, Ray};
use strata_voxel::{DirtyState, VoxelHit, VoxelObject};

use crate::bvh::Bvh;
use crate::gizmo::Gizmo;
use crate::light::Light;

/// Stable object identifier. Handles are never reused within a scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectHandle(pub u32);

/// Billboard particle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Particle {
    pub position: Vec3,
    pub size: f32,
    /// Linear RGBA; alpha feeds the transparency weight.
    pub color: Vec4,
}

/// Closest hit of a scene raycast.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneHit {
    pub object: ObjectHandle,
    pub hit: VoxelHit,
}

struct SceneObject {
    handle: ObjectHandle,
    object: VoxelObject,
    visible: bool,
    /// Hidden behind other geometry as of the last occlusion update.
    occluded: bool,
}

/// An ordered set of voxel objects plus lights and overlays.
pub struct Scene {
    objects: Vec<SceneObject>,
    next_handle: u32,
    lights: Vec<Light>,
    gizmos: Vec<Gizmo>,
    particles: Vec<Particle>,
    ambient: Vec3,
    bvh: Bvh,
    instances: Vec<ObjectHandle>,
    bvh_dirty: bool,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene {
    pub fn new() -> Self {
        Self {
            objects: Vec::new(),
            next_handle: 1,
            lights: Vec::new(),
            gizmos: Vec::new(),
            particles: Vec::new(),
            ambient: Vec3::splat(0.1),
            bvh: Bvh::default(),
            instances: Vec::new(),
            bvh_dirty: true,
        }
    }

    /// Add an object at the end of the scene order.
    pub fn insert_object(&mut self, object: VoxelObject) -> ObjectHandle {
        let handle = ObjectHandle(self.next_handle);
        self.next_handle += 1;
        self.objects.push(SceneObject {
            handle,
            object,
            visible: true,
            occluded: false,
        });
        self.bvh_dirty = true;
        tracing::debug!(object = handle.0, "object inserted");
        handle
    }

    /// Remove an object. Its GPU slots are released on the next upload.
    pub fn remove_object(&mut self, handle: ObjectHandle) -> Option<VoxelObject> {
        let index = self.objects.iter().position(|o| o.handle == handle)?;
        self.bvh_dirty = true;
        tracing::debug!(object = handle.0, "object removed");
        Some(self.objects.remove(index).object)
    }

    pub fn contains(&self, handle: ObjectHandle) -> bool {
        self.objects.iter().any(|o| o.handle == handle)
    }

    pub fn object(&self, handle: ObjectHandle) -> Option<&VoxelObject> {
        self.objects
            .iter()
            .find(|o| o.handle == handle)
            .map(|o| &o.object)
    }

    /// Mutable access; conservatively schedules a BVH rebuild.
    pub fn object_mut(&mut self, handle: ObjectHandle) -> Option<&mut VoxelObject> {
        self.bvh_dirty = true;
        self.objects
            .iter_mut()
            .find(|o| o.handle == handle)
            .map(|o| &mut o.object)
    }

    /// Objects in scene order.
    pub fn objects(&self) -> impl Iterator<Item = (ObjectHandle, &VoxelObject)> {
        self.objects.iter().map(|o| (o.handle, &o.object))
    }

    /// Take every object's dirty state, leaving the objects clean.
    ///
    /// Unlike [`Self::objects_mut`] this does not schedule a BVH rebuild.
    pub fn take_dirty(&mut self) -> Vec<(ObjectHandle, DirtyState)> {
        self.objects
            .iter_mut()
            .map(|o| (o.handle, std::mem::take(o.object.dirty_mut())))
            .collect()
    }

    /// Objects in scene order, mutably.
    pub fn objects_mut(&mut self) -> impl Iterator<Item = (ObjectHandle, &mut VoxelObject)> {
        self.bvh_dirty = true;
        self.objects.iter_mut().map(|o| (o.handle, &mut o.object))
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn set_visible(&mut self, handle: ObjectHandle, visible: bool) {
        if let Some(o) = self.objects.iter_mut().find(|o| o.handle == handle) {
            if o.visible != visible {
                o.visible = visible;
                self.bvh_dirty = true;
            }
        }
    }

    pub fn is_visible(&self, handle: ObjectHandle) -> bool {
        self.objects
            .iter()
            .any(|o| o.handle == handle && o.visible)
    }

    /// Re-run the occlusion test for every visible, non-empty object.
    ///
    /// `occluded` receives each world AABB. Objects whose verdict changed
    /// schedule a BVH rebuild. Returns how many objects are now occluded.
    pub fn update_occlusion(&mut self, mut occluded: impl FnMut(&Aabb) -> bool) -> usize {
        let mut count = 0;
        for o in &mut self.objects {
            let hidden = o.visible && !o.object.is_empty() && occluded(&o.object.world_aabb());
            if hidden != o.occluded {
                o.occluded = hidden;
                self.bvh_dirty = true;
            }
            count += usize::from(hidden);
        }
        count
    }

    pub fn is_occluded(&self, handle: ObjectHandle) -> bool {
        self.objects
            .iter()
            .any(|o| o.handle == handle && o.occluded)
    }

    /// Rebuild the instance BVH if anything that affects it changed.
    ///
    /// Instances are visible, unoccluded, non-empty objects. Returns true on
    /// rebuild.
    pub fn update_bvh(&mut self) -> bool {
        if !self.bvh_dirty {
            return false;
        }
        let candidates: Vec<(ObjectHandle, Aabb)> = self
            .objects
            .iter()
            .filter(|o| o.visible && !o.occluded && !o.object.is_empty())
            .map(|o| (o.handle, o.object.world_aabb()))
            .collect();
        let aabbs: Vec<Aabb> = candidates.iter().map(|(_, b)| *b).collect();
        self.bvh = Bvh::build(&aabbs);
        self.instances = self
            .bvh
            .order()
            .iter()
            .map(|&i| candidates[i as usize].0)
            .collect();
        self.bvh_dirty = false;
        true
    }

    pub const fn bvh(&self) -> &Bvh {
        &self.bvh
    }

    /// Visible, unoccluded objects in BVH leaf order; position `k` is
    /// instance `k` on the GPU.
    pub fn instances(&self) -> &[ObjectHandle] {
        &self.instances
    }

    pub fn add_light(&mut self, light: Light) -> usize {
        self.lights.push(light);
        self.lights.len() - 1
    }

    pub fn lights(&self) -> &[Light] {
        &self.lights
    }

    pub fn light_mut(&mut self, index: usize) -> Option<&mut Light> {
        self.lights.get_mut(index)
    }

    pub fn remove_light(&mut self, index: usize) -> Option<Light> {
        (index < self.lights.len()).then(|| self.lights.remove(index))
    }

    pub fn add_gizmo(&mut self, gizmo: Gizmo) {
        self.gizmos.push(gizmo);
    }

    pub fn gizmos(&self) -> &[Gizmo] {
        &self.gizmos
    }

    pub fn clear_gizmos(&mut self) {
        self.gizmos.clear();
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    pub fn set_particles(&mut self, particles: Vec<Particle>) {
        self.particles = particles;
    }

    pub const fn ambient(&self) -> Vec3 {
        self.ambient
    }

    pub fn set_ambient(&mut self, ambient: Vec3) {
        self.ambient = ambient;
    }

    /// Closest voxel hit over all visible objects, with `t` in world units.
    pub fn raycast(&self, ray: &Ray, max_t: f32) -> Option<SceneHit> {
        self.objects
            .iter()
            .filter(|o| o.visible)
            .filter_map(|o| {
                let local = ray.transform_keep_t(o.object.transform().inverse());
                o.object.raycast(&local, max_t).map(|hit| SceneHit {
                    object: o.handle,
                    hit,
                })
            })
            .min_by(|a, b| a.hit.t.total_cmp(&b.hit.t))
    }
}
