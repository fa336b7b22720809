//! Camera and view management.

use glam::{Mat4, Vec3};
use strata_core::{ByteWriter, Ray};

use crate::debug::{DebugMode, RenderMode};
use crate::gpu_types::CAMERA_DATA_SIZE;

/// Camera for rendering.
#[derive(Debug, Clone)]
pub struct Camera {
    pub position: Vec3,
    pub direction: Vec3,
    pub up: Vec3,
    pub fov: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 5.0),
            direction: Vec3::NEG_Z,
            up: Vec3::Y,
            fov: std::f32::consts::FRAC_PI_4,
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 1000.0,
        }
    }
}

impl Camera {
    /// Create a camera at `position` looking at `target`.
    pub fn look_at_target(position: Vec3, target: Vec3, fov: f32, aspect: f32) -> Self {
        Self {
            position,
            direction: (target - position).normalize(),
            fov,
            aspect,
            ..Self::default()
        }
    }

    /// Set the camera position.
    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
    }

    /// Look at a target position.
    pub fn look_at(&mut self, target: Vec3) {
        self.direction = (target - self.position).normalize();
    }

    /// Set the aspect ratio.
    pub fn set_aspect(&mut self, aspect: f32) {
        self.aspect = aspect;
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_to_rh(self.position, self.direction, self.up)
    }

    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov, self.aspect, self.near, self.far)
    }

    pub fn inverse_view_matrix(&self) -> Mat4 {
        self.view_matrix().inverse()
    }

    pub fn inverse_projection_matrix(&self) -> Mat4 {
        self.projection_matrix().inverse()
    }

    /// Get the view-projection matrix.
    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    /// Primary ray through normalised screen coordinates (`0..1`, y down),
    /// reconstructed the same way the raymarching shaders do.
    pub fn screen_ray(&self, u: f32, v: f32) -> Ray {
        let ndc = glam::Vec4::new(u * 2.0 - 1.0, 1.0 - v * 2.0, 1.0, 1.0);
        let target = self.inverse_projection_matrix() * ndc;
        let dir_vs = (target.truncate() / target.w).normalize();
        let dir = self.inverse_view_matrix().transform_vector3(dir_vs);
        Ray::new(self.position, dir)
    }
}

/// The 256-byte camera uniform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraData {
    pub view_proj: Mat4,
    pub inv_view: Mat4,
    pub inv_proj: Mat4,
    pub cam_pos: Vec3,
    /// Kept for older shaders; lighting reads the light buffer.
    pub light_pos: Vec3,
    pub ambient: Vec3,
    pub debug_mode: DebugMode,
    pub render_mode: RenderMode,
    pub num_lights: u32,
}

impl CameraData {
    pub fn new(camera: &Camera, ambient: Vec3, num_lights: u32) -> Self {
        Self {
            view_proj: camera.view_projection_matrix(),
            inv_view: camera.inverse_view_matrix(),
            inv_proj: camera.inverse_projection_matrix(),
            cam_pos: camera.position,
            light_pos: Vec3::ZERO,
            ambient,
            debug_mode: DebugMode::None,
            render_mode: RenderMode::Lit,
            num_lights,
        }
    }

    /// Serialise to the little-endian uniform layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(CAMERA_DATA_SIZE);
        w.mat4(&self.view_proj)
            .mat4(&self.inv_view)
            .mat4(&self.inv_proj)
            .vec3(self.cam_pos, 0.0)
            .vec3(self.light_pos, 0.0)
            .vec3(self.ambient, 0.0)
            .u32(self.debug_mode.as_u32())
            .u32(self.render_mode.as_u32())
            .u32(self.num_lights)
            .pad(4);
        w.into_vec()
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use strata_core::ByteReader;

    use super::*;

    #[test]
    fn camera_data_layout() {
        let camera = Camera::look_at_target(Vec3::new(0.0, 0.0, 4.0), Vec3::ZERO, 1.0, 1.0);
        let mut data = CameraData::new(&camera, Vec3::new(0.1, 0.2, 0.3), 3);
        data.render_mode = RenderMode::Normals;
        data.debug_mode = DebugMode::Lights;
        let bytes = data.to_bytes();
        assert_eq!(bytes.len(), CAMERA_DATA_SIZE);

        let mut r = ByteReader::new(&bytes);
        let view_proj = r.mat4().unwrap();
        assert!(view_proj.abs_diff_eq(camera.view_projection_matrix(), 1e-6));
        r.skip(128).unwrap();
        let pos = r.vec4().unwrap();
        assert_relative_eq!(pos.z, 4.0);
        r.skip(16).unwrap();
        let ambient = r.vec4().unwrap();
        assert_relative_eq!(ambient.y, 0.2);
        assert_eq!(r.u32().unwrap(), DebugMode::Lights.as_u32());
        assert_eq!(r.u32().unwrap(), 2);
        assert_eq!(r.u32().unwrap(), 3);
    }

    #[test]
    fn centre_ray_points_at_target() {
        let camera = Camera::look_at_target(Vec3::new(0.0, 0.0, 4.0), Vec3::ZERO, 1.0, 1.0);
        let ray = camera.screen_ray(0.5, 0.5);
        assert!(ray.direction.abs_diff_eq(Vec3::NEG_Z, 1e-5));
    }
}
