//! CPU hierarchical 3D-DDA over the sparse structure.
//!
//! Mirrors the shader traversal: sector steps of 32 voxels, brick steps of
//! 8, and voxel steps of 1, descending only where the outer mask bit is set.
//! Used for picking and to validate GPU output in tests.

use glam::{IVec3, Vec3};
use strata_core::constants::{BRICK_SIZE, SECTOR_SIZE};
use strata_core::coords::{micro_block_index, voxel_index};
use strata_core::{PaletteIndex, Ray, VoxelCoord};

use crate::brick::Brick;
use crate::object::VoxelObject;
use crate::sector::Sector;

/// Sector steps per ray.
pub const MAX_SECTOR_STEPS: u32 = 64;
/// Brick steps per sector.
pub const MAX_BRICK_STEPS: u32 = 64;
/// Voxel steps per brick.
pub const MAX_VOXEL_STEPS: u32 = 32;

/// First non-empty voxel along a ray.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VoxelHit {
    /// Ray parameter at the voxel entry.
    pub t: f32,
    pub voxel: VoxelCoord,
    pub value: PaletteIndex,
    /// Outward face normal of the entry face.
    pub normal: IVec3,
}

/// Amanatides-Woo stepping state for one grid level.
struct Dda {
    cell: IVec3,
    step: IVec3,
    t_max: Vec3,
    t_delta: Vec3,
    normal: IVec3,
}

impl Dda {
    /// Start at `t_start`, clamping the first cell into `[lo, hi]`.
    fn new(ray: &Ray, t_start: f32, size: f32, lo: IVec3, hi: IVec3, normal: IVec3) -> Self {
        let p = ray.at(t_start);
        let cell = (p / size).floor().as_ivec3().clamp(lo, hi);
        let step = IVec3::new(
            sign(ray.direction.x),
            sign(ray.direction.y),
            sign(ray.direction.z),
        );
        let mut t_max = Vec3::splat(f32::INFINITY);
        let mut t_delta = Vec3::splat(f32::INFINITY);
        for axis in 0..3 {
            let d = ray.direction[axis];
            if d != 0.0 {
                let boundary = if step[axis] > 0 {
                    (cell[axis] + 1) as f32 * size
                } else {
                    cell[axis] as f32 * size
                };
                t_max[axis] = (boundary - ray.origin[axis]) / d;
                t_delta[axis] = size / d.abs();
            }
        }
        Self {
            cell,
            step,
            t_max,
            t_delta,
            normal,
        }
    }

    /// Ray parameter where the current cell is left.
    #[inline]
    fn exit_t(&self) -> f32 {
        self.t_max.min_element()
    }

    fn advance(&mut self) {
        let axis = if self.t_max.x <= self.t_max.y && self.t_max.x <= self.t_max.z {
            0
        } else if self.t_max.y <= self.t_max.z {
            1
        } else {
            2
        };
        self.cell[axis] += self.step[axis];
        self.t_max[axis] += self.t_delta[axis];
        self.normal = IVec3::ZERO;
        self.normal[axis] = -self.step[axis];
    }
}

#[inline]
fn sign(v: f32) -> i32 {
    if v > 0.0 {
        1
    } else if v < 0.0 {
        -1
    } else {
        0
    }
}

fn entry_normal(ray: &Ray, min: Vec3, max: Vec3) -> IVec3 {
    let inv = Vec3::ONE / ray.direction;
    let t1 = (min - ray.origin) * inv;
    let t2 = (max - ray.origin) * inv;
    let t_near = t1.min(t2);
    let axis = if t_near.x >= t_near.y && t_near.x >= t_near.z {
        0
    } else if t_near.y >= t_near.z {
        1
    } else {
        2
    };
    let mut n = IVec3::ZERO;
    n[axis] = -sign(ray.direction[axis]);
    n
}

impl VoxelObject {
    /// Cast a ray given in the object's voxel space.
    ///
    /// `t` is measured in units of the ray direction, so a ray transformed
    /// with [`Ray::transform_keep_t`] reports world-space distances.
    pub fn raycast(&self, ray: &Ray, max_t: f32) -> Option<VoxelHit> {
        let bounds = self.compute_aabb();
        if bounds.is_empty() {
            return None;
        }
        let (t0, t1) = bounds.intersect_ray(ray)?;
        let t1 = t1.min(max_t);
        if t0 > t1 {
            return None;
        }

        let size = SECTOR_SIZE as f32;
        let lo = (bounds.min / size).floor().as_ivec3();
        let hi = (bounds.max / size).floor().as_ivec3() - IVec3::ONE;
        let normal = if t0 > 0.0 {
            entry_normal(ray, bounds.min, bounds.max)
        } else {
            IVec3::ZERO
        };
        let mut dda = Dda::new(ray, t0, size, lo, hi, normal);
        let mut t = t0;

        for _ in 0..MAX_SECTOR_STEPS {
            if dda.cell.cmplt(lo).any() || dda.cell.cmpgt(hi).any() {
                break;
            }
            let exit = dda.exit_t().min(t1);
            if let Some(sector) = self.sector(dda.cell.into()) {
                if let Some(hit) = march_sector(sector, ray, t, exit, dda.normal) {
                    return Some(hit);
                }
            }
            if exit >= t1 {
                break;
            }
            t = exit;
            dda.advance();
        }
        None
    }
}

fn march_sector(sector: &Sector, ray: &Ray, t_enter: f32, t_exit: f32, normal: IVec3) -> Option<VoxelHit> {
    let size = BRICK_SIZE as f32;
    let lo = sector.coord().origin_voxels() / BRICK_SIZE as i32;
    let hi = lo + IVec3::splat(3);
    let mut dda = Dda::new(ray, t_enter, size, lo, hi, normal);
    let mut t = t_enter;

    for _ in 0..MAX_BRICK_STEPS {
        if dda.cell.cmplt(lo).any() || dda.cell.cmpgt(hi).any() {
            break;
        }
        let exit = dda.exit_t().min(t_exit);
        let local = dda.cell - lo;
        let index = (local.x + local.y * 4 + local.z * 16) as usize;
        if sector.brick_mask() & (1 << index) != 0 {
            if let Some(brick) = sector.brick(index) {
                if let Some(hit) = march_brick(brick, dda.cell * BRICK_SIZE as i32, ray, t, exit, dda.normal) {
                    return Some(hit);
                }
            }
        }
        if exit >= t_exit {
            break;
        }
        t = exit;
        dda.advance();
    }
    None
}

fn march_brick(
    brick: &Brick,
    origin: IVec3,
    ray: &Ray,
    t_enter: f32,
    t_exit: f32,
    normal: IVec3,
) -> Option<VoxelHit> {
    let hi = origin + IVec3::splat(BRICK_SIZE as i32 - 1);
    let mut dda = Dda::new(ray, t_enter, 1.0, origin, hi, normal);
    let mut t = t_enter;
    let occupancy = brick.occupancy();

    for _ in 0..MAX_VOXEL_STEPS {
        if dda.cell.cmplt(origin).any() || dda.cell.cmpgt(hi).any() {
            break;
        }
        let local = (dda.cell - origin).as_uvec3();
        if occupancy & (1 << micro_block_index(local.x, local.y, local.z)) != 0 {
            let value = brick.get(voxel_index(local.x, local.y, local.z));
            if value != 0 {
                return Some(VoxelHit {
                    t,
                    voxel: dda.cell.into(),
                    value,
                    normal: dda.normal,
                });
            }
        }
        let exit = dda.exit_t();
        if exit >= t_exit {
            break;
        }
        t = exit;
        dda.advance();
    }
    None
}
