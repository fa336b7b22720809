//! GPU capability detection.

use crate::error::{GpuError, Result};

/// Minimum storage buffers per shader stage; the shadow pass binds ten.
pub const MIN_STORAGE_BUFFERS_PER_STAGE: u32 = 12;

/// Minimum storage textures per shader stage; the G-Buffer pass writes four.
pub const MIN_STORAGE_TEXTURES_PER_STAGE: u32 = 4;

/// GPU vendor identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Apple,
    Other(u32),
}

impl GpuVendor {
    /// Identify vendor from PCI vendor ID.
    pub fn from_vendor_id(id: u32) -> Self {
        match id {
            0x10DE => Self::Nvidia,
            0x1002 => Self::Amd,
            0x8086 => Self::Intel,
            0x106B => Self::Apple,
            other => Self::Other(other),
        }
    }
}

/// Detected GPU capabilities.
#[derive(Debug, Clone)]
pub struct GpuCapabilities {
    /// GPU vendor
    pub vendor: GpuVendor,
    /// Device name
    pub device_name: String,
    /// Backend the adapter runs on
    pub backend: wgpu::Backend,
    /// Storage buffers visible to one shader stage
    pub max_storage_buffers_per_stage: u32,
    /// Storage textures visible to one shader stage
    pub max_storage_textures_per_stage: u32,
    /// Largest 2D texture edge
    pub max_texture_dimension_2d: u32,
    /// Largest 3D texture edge
    pub max_texture_dimension_3d: u32,
    /// Largest texture array layer count
    pub max_texture_array_layers: u32,
    /// Largest single buffer
    pub max_buffer_size: u64,
    /// Largest storage buffer binding
    pub max_storage_buffer_binding_size: u32,
    /// Maximum compute workgroup size
    pub max_compute_workgroup_size: [u32; 3],
    /// Maximum compute workgroup invocations
    pub max_compute_workgroup_invocations: u32,
}

impl GpuCapabilities {
    /// Capture capabilities from an adapter.
    pub fn query(adapter: &wgpu::Adapter) -> Self {
        let info = adapter.get_info();
        Self::from_limits(
            GpuVendor::from_vendor_id(info.vendor),
            info.name,
            info.backend,
            &adapter.limits(),
        )
    }

    /// Build capabilities from raw limits.
    pub fn from_limits(
        vendor: GpuVendor,
        device_name: String,
        backend: wgpu::Backend,
        limits: &wgpu::Limits,
    ) -> Self {
        Self {
            vendor,
            device_name,
            backend,
            max_storage_buffers_per_stage: limits.max_storage_buffers_per_shader_stage,
            max_storage_textures_per_stage: limits.max_storage_textures_per_shader_stage,
            max_texture_dimension_2d: limits.max_texture_dimension_2d,
            max_texture_dimension_3d: limits.max_texture_dimension_3d,
            max_texture_array_layers: limits.max_texture_array_layers,
            max_buffer_size: limits.max_buffer_size,
            max_storage_buffer_binding_size: limits.max_storage_buffer_binding_size,
            max_compute_workgroup_size: [
                limits.max_compute_workgroup_size_x,
                limits.max_compute_workgroup_size_y,
                limits.max_compute_workgroup_size_z,
            ],
            max_compute_workgroup_invocations: limits.max_compute_invocations_per_workgroup,
        }
    }

    /// Check that the adapter can host the renderer with an atlas of
    /// `atlas_side` voxels per edge.
    pub fn check_requirements(&self, atlas_side: u32) -> Result<()> {
        if self.max_storage_buffers_per_stage < MIN_STORAGE_BUFFERS_PER_STAGE {
            return Err(GpuError::Unsupported(format!(
                "{} storage buffers per stage, need {MIN_STORAGE_BUFFERS_PER_STAGE}",
                self.max_storage_buffers_per_stage
            )));
        }
        if self.max_storage_textures_per_stage < MIN_STORAGE_TEXTURES_PER_STAGE {
            return Err(GpuError::Unsupported(format!(
                "{} storage textures per stage, need {MIN_STORAGE_TEXTURES_PER_STAGE}",
                self.max_storage_textures_per_stage
            )));
        }
        if self.max_texture_dimension_3d < atlas_side {
            return Err(GpuError::Unsupported(format!(
                "3D textures limited to {}, atlas needs {atlas_side}",
                self.max_texture_dimension_3d
            )));
        }
        Ok(())
    }

    /// Ceiling that any single storage buffer must stay under.
    pub fn buffer_ceiling(&self, configured: u64) -> u64 {
        configured
            .min(self.max_buffer_size)
            .min(u64::from(self.max_storage_buffer_binding_size))
    }

    /// Get a human-readable summary of capabilities.
    pub fn summary(&self) -> String {
        format!(
            "{} ({:?}) - {:?} - {} storage buffers/stage, 3D textures up to {}",
            self.device_name,
            self.vendor,
            self.backend,
            self.max_storage_buffers_per_stage,
            self.max_texture_dimension_3d,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(limits: &wgpu::Limits) -> GpuCapabilities {
        GpuCapabilities::from_limits(
            GpuVendor::Other(0),
            "test".to_string(),
            wgpu::Backend::Empty,
            limits,
        )
    }

    #[test]
    fn vendor_identification() {
        assert_eq!(GpuVendor::from_vendor_id(0x10DE), GpuVendor::Nvidia);
        assert_eq!(GpuVendor::from_vendor_id(0x1002), GpuVendor::Amd);
        assert_eq!(GpuVendor::from_vendor_id(0x8086), GpuVendor::Intel);
        assert_eq!(GpuVendor::from_vendor_id(0x1234), GpuVendor::Other(0x1234));
    }

    #[test]
    fn default_limits_lack_storage_buffers() {
        let limits = wgpu::Limits::default();
        assert!(caps(&limits).check_requirements(1024).is_err());
    }

    #[test]
    fn raised_limits_pass() {
        let limits = wgpu::Limits {
            max_storage_buffers_per_shader_stage: 16,
            ..wgpu::Limits::default()
        };
        assert!(caps(&limits).check_requirements(1024).is_ok());
        assert!(caps(&limits).check_requirements(4096).is_err());
    }

    #[test]
    fn ceiling_respects_binding_limit() {
        let limits = wgpu::Limits::default();
        let c = caps(&limits);
        assert_eq!(
            c.buffer_ceiling(u64::MAX),
            u64::from(limits.max_storage_buffer_binding_size).min(limits.max_buffer_size)
        );
        assert_eq!(c.buffer_ceiling(1024), 1024);
    }
}
