//! Scene lights and their shadow projections.

use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};

const SHADOW_NEAR: f32 = 0.1;

/// Light type, matching the GPU `params.z` encoding.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LightType {
    Point = 0,
    Directional = 1,
    Spot = 2,
}

impl LightType {
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }
}

/// A light source.
///
/// Every mutation bumps `version`, which the renderer uses to decide which
/// shadow layers need to be recomputed.
#[derive(Debug, Clone, PartialEq)]
pub struct Light {
    kind: LightType,
    position: Vec3,
    direction: Vec3,
    color: Vec3,
    intensity: f32,
    range: f32,
    cos_cone: f32,
    version: u64,
}

impl Light {
    /// Directional light. `range` is the half extent of the shadow volume
    /// centred on the light position.
    pub fn directional(direction: Vec3, color: Vec3, intensity: f32) -> Self {
        Self {
            kind: LightType::Directional,
            position: Vec3::ZERO,
            direction: direction.normalize(),
            color,
            intensity,
            range: 64.0,
            cos_cone: -1.0,
            version: 0,
        }
    }

    pub fn point(position: Vec3, color: Vec3, intensity: f32, range: f32) -> Self {
        Self {
            kind: LightType::Point,
            position,
            direction: Vec3::NEG_Y,
            color,
            intensity,
            range,
            cos_cone: -1.0,
            version: 0,
        }
    }

    /// Spot light with a full cone angle in radians.
    pub fn spot(
        position: Vec3,
        direction: Vec3,
        cone_angle: f32,
        color: Vec3,
        intensity: f32,
        range: f32,
    ) -> Self {
        Self {
            kind: LightType::Spot,
            position,
            direction: direction.normalize(),
            color,
            intensity,
            range,
            cos_cone: (cone_angle * 0.5).cos(),
            version: 0,
        }
    }

    #[inline]
    pub const fn kind(&self) -> LightType {
        self.kind
    }

    #[inline]
    pub const fn position(&self) -> Vec3 {
        self.position
    }

    #[inline]
    pub const fn direction(&self) -> Vec3 {
        self.direction
    }

    #[inline]
    pub const fn color(&self) -> Vec3 {
        self.color
    }

    #[inline]
    pub const fn intensity(&self) -> f32 {
        self.intensity
    }

    #[inline]
    pub const fn range(&self) -> f32 {
        self.range
    }

    /// Cosine of the half cone angle; -1 for non-spot lights.
    #[inline]
    pub const fn cos_cone(&self) -> f32 {
        self.cos_cone
    }

    #[inline]
    pub const fn version(&self) -> u64 {
        self.version
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
        self.version += 1;
    }

    pub fn set_direction(&mut self, direction: Vec3) {
        self.direction = direction.normalize();
        self.version += 1;
    }

    pub fn set_color(&mut self, color: Vec3, intensity: f32) {
        self.color = color;
        self.intensity = intensity;
        self.version += 1;
    }

    pub fn set_range(&mut self, range: f32) {
        self.range = range;
        self.version += 1;
    }

    fn up(&self) -> Vec3 {
        if self.direction.y.abs() > 0.99 {
            Vec3::Z
        } else {
            Vec3::Y
        }
    }

    /// View matrix looking along the light direction.
    pub fn view_matrix(&self) -> Mat4 {
        let eye = match self.kind {
            LightType::Directional => self.position - self.direction * self.range,
            LightType::Point | LightType::Spot => self.position,
        };
        Mat4::look_to_rh(eye, self.direction, self.up())
    }

    /// Projection used for the light's shadow layer.
    pub fn projection_matrix(&self) -> Mat4 {
        let far = self.range.max(SHADOW_NEAR * 2.0);
        match self.kind {
            LightType::Directional => {
                let r = self.range;
                Mat4::orthographic_rh(-r, r, -r, r, 0.0, 2.0 * r)
            }
            LightType::Point => {
                Mat4::perspective_rh(std::f32::consts::FRAC_PI_2, 1.0, SHADOW_NEAR, far)
            }
            LightType::Spot => {
                let fov = (2.0 * self.cos_cone.clamp(-1.0, 1.0).acos())
                    .clamp(0.01, std::f32::consts::PI - 0.01);
                Mat4::perspective_rh(fov, 1.0, SHADOW_NEAR, far)
            }
        }
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }
}
