//! Math utilities and helpers.

use glam::{Mat4, Vec3};

/// Ray for raycasting operations.
#[derive(Clone, Copy, Debug)]
pub struct Ray {
    /// Ray origin
    pub origin: Vec3,
    /// Ray direction (normalized for rays built with [`Ray::new`])
    pub direction: Vec3,
}

impl Ray {
    /// Create a new ray
    #[inline]
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self {
            origin,
            direction: direction.normalize(),
        }
    }

    /// Get a point along the ray at distance t
    #[inline]
    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }

    /// Transform ray by a matrix and renormalize the direction.
    #[inline]
    pub fn transform(&self, matrix: Mat4) -> Self {
        let origin = matrix.transform_point3(self.origin);
        let direction = matrix.transform_vector3(self.direction).normalize();
        Self { origin, direction }
    }

    /// Transform ray by a matrix keeping the parameterisation, so that
    /// `t` along the result measures the same point as `t` along `self`.
    #[inline]
    pub fn transform_keep_t(&self, matrix: Mat4) -> Self {
        Self {
            origin: matrix.transform_point3(self.origin),
            direction: matrix.transform_vector3(self.direction),
        }
    }
}

/// Axis-Aligned Bounding Box.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Aabb {
    /// Minimum corner
    pub min: Vec3,
    /// Maximum corner
    pub max: Vec3,
}

impl Aabb {
    /// An inverted box that any merge or expand replaces.
    pub const EMPTY: Self = Self {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    /// Create a new AABB from min and max corners
    #[inline]
    pub const fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// True when min exceeds max on any axis.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    /// Get the center of the AABB
    #[inline]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Get the size of the AABB
    #[inline]
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Check if a point is inside the AABB
    #[inline]
    pub fn contains_point(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    /// Check if this AABB intersects another
    #[inline]
    pub fn intersects(&self, other: &Self) -> bool {
        self.min.cmple(other.max).all() && self.max.cmpge(other.min).all()
    }

    /// Ray-AABB slab test, returns (t_near, t_far) or None if no intersection.
    ///
    /// `t_near` is clamped to zero when the origin is inside the box.
    pub fn intersect_ray(&self, ray: &Ray) -> Option<(f32, f32)> {
        let inv_dir = Vec3::ONE / ray.direction;

        let t1 = (self.min - ray.origin) * inv_dir;
        let t2 = (self.max - ray.origin) * inv_dir;

        let t_min = t1.min(t2);
        let t_max = t1.max(t2);

        let t_near = t_min.max_element();
        let t_far = t_max.min_element();

        if t_near <= t_far && t_far >= 0.0 {
            Some((t_near.max(0.0), t_far))
        } else {
            None
        }
    }

    /// Expand AABB to include a point
    #[inline]
    pub fn expand_to_include(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    /// Merge two AABBs
    #[inline]
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Bounds of this box after an affine transform (all eight corners).
    #[must_use]
    pub fn transformed(&self, matrix: Mat4) -> Self {
        if self.is_empty() {
            return *self;
        }
        let mut out = Self::EMPTY;
        for i in 0..8 {
            let corner = Vec3::new(
                if i & 1 == 0 { self.min.x } else { self.max.x },
                if i & 2 == 0 { self.min.y } else { self.max.y },
                if i & 4 == 0 { self.min.z } else { self.max.z },
            );
            out.expand_to_include(matrix.transform_point3(corner));
        }
        out
    }

    /// Euclidean distance from a point to the box, zero inside.
    #[inline]
    pub fn distance_to_point(&self, point: Vec3) -> f32 {
        let clamped = point.clamp(self.min, self.max);
        point.distance(clamped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn ray_at() {
        let ray = Ray::new(Vec3::ZERO, Vec3::X);
        assert_eq!(ray.at(0.0), Vec3::ZERO);
        assert_eq!(ray.at(5.0), Vec3::new(5.0, 0.0, 0.0));
    }

    #[test]
    fn transform_keep_t_preserves_hit_distance() {
        let ray = Ray::new(Vec3::new(0.0, 0.0, 4.0), Vec3::NEG_Z);
        let m = Mat4::from_translation(Vec3::splat(0.5));
        let local = ray.transform_keep_t(m);
        assert_relative_eq!(local.at(3.5).z, 1.0);
    }

    #[test]
    fn aabb_ray_intersection() {
        let aabb = Aabb::new(Vec3::ZERO, Vec3::ONE);

        let ray = Ray::new(Vec3::new(-1.0, 0.5, 0.5), Vec3::X);
        let (t_near, t_far) = aabb.intersect_ray(&ray).unwrap();
        assert_relative_eq!(t_near, 1.0, epsilon = 1e-5);
        assert_relative_eq!(t_far, 2.0, epsilon = 1e-5);

        let ray = Ray::new(Vec3::new(-1.0, 2.0, 0.5), Vec3::X);
        assert!(aabb.intersect_ray(&ray).is_none());
    }

    #[test]
    fn empty_merges_away() {
        let b = Aabb::new(Vec3::ONE, Vec3::splat(2.0));
        assert!(Aabb::EMPTY.is_empty());
        assert_eq!(Aabb::EMPTY.merge(&b), b);
    }

    #[test]
    fn transformed_box_covers_rotation() {
        let b = Aabb::new(Vec3::ZERO, Vec3::new(2.0, 1.0, 1.0));
        let r = b.transformed(Mat4::from_rotation_z(std::f32::consts::FRAC_PI_2));
        assert_relative_eq!(r.min.x, -1.0, epsilon = 1e-5);
        assert_relative_eq!(r.max.y, 2.0, epsilon = 1e-5);
    }

    #[test]
    fn distance_to_point() {
        let b = Aabb::new(Vec3::ZERO, Vec3::ONE);
        assert_relative_eq!(b.distance_to_point(Vec3::new(0.5, 0.5, 3.0)), 2.0);
        assert_relative_eq!(b.distance_to_point(Vec3::splat(0.5)), 0.0);
    }
}
