//! Bind group layout construction.

/// Fluent builder for bind group layouts.
pub struct BindGroupLayoutBuilder<'a> {
    label: Option<&'a str>,
    entries: Vec<wgpu::BindGroupLayoutEntry>,
}

impl<'a> BindGroupLayoutBuilder<'a> {
    /// Create a new builder.
    pub fn new(label: &'a str) -> Self {
        Self {
            label: Some(label),
            entries: Vec::new(),
        }
    }

    /// Add a binding.
    pub fn binding(mut self, binding: u32, visibility: wgpu::ShaderStages, ty: wgpu::BindingType) -> Self {
        self.entries.push(wgpu::BindGroupLayoutEntry {
            binding,
            visibility,
            ty,
            count: None,
        });
        self
    }

    /// Add a uniform buffer binding.
    pub fn uniform_buffer(self, binding: u32, visibility: wgpu::ShaderStages) -> Self {
        self.binding(
            binding,
            visibility,
            wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
        )
    }

    /// Add a storage buffer binding.
    pub fn storage_buffer(self, binding: u32, visibility: wgpu::ShaderStages, read_only: bool) -> Self {
        self.binding(
            binding,
            visibility,
            wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
        )
    }

    /// Add a non-filterable sampled texture binding, read with `textureLoad`.
    pub fn texture(
        self,
        binding: u32,
        visibility: wgpu::ShaderStages,
        sample_type: wgpu::TextureSampleType,
        view_dimension: wgpu::TextureViewDimension,
    ) -> Self {
        self.binding(
            binding,
            visibility,
            wgpu::BindingType::Texture {
                sample_type,
                view_dimension,
                multisampled: false,
            },
        )
    }

    /// Add an unfilterable float 2D texture binding.
    pub fn float_texture_2d(self, binding: u32, visibility: wgpu::ShaderStages) -> Self {
        self.texture(
            binding,
            visibility,
            wgpu::TextureSampleType::Float { filterable: false },
            wgpu::TextureViewDimension::D2,
        )
    }

    /// Add a write-only storage texture binding.
    pub fn storage_texture(
        self,
        binding: u32,
        visibility: wgpu::ShaderStages,
        format: wgpu::TextureFormat,
        view_dimension: wgpu::TextureViewDimension,
    ) -> Self {
        self.binding(
            binding,
            visibility,
            wgpu::BindingType::StorageTexture {
                access: wgpu::StorageTextureAccess::WriteOnly,
                format,
                view_dimension,
            },
        )
    }

    /// Number of entries added so far.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build the bind group layout.
    pub fn build(self, device: &wgpu::Device) -> wgpu::BindGroupLayout {
        device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: self.label,
            entries: &self.entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_accumulate_in_order() {
        let builder = BindGroupLayoutBuilder::new("scene")
            .uniform_buffer(0, wgpu::ShaderStages::COMPUTE)
            .storage_buffer(1, wgpu::ShaderStages::COMPUTE, true)
            .storage_texture(
                2,
                wgpu::ShaderStages::COMPUTE,
                wgpu::TextureFormat::Rgba32Float,
                wgpu::TextureViewDimension::D2,
            );
        assert_eq!(builder.len(), 3);
        let bindings: Vec<u32> = builder.entries.iter().map(|e| e.binding).collect();
        assert_eq!(bindings, vec![0, 1, 2]);
        assert!(matches!(
            builder.entries[1].ty,
            wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: true },
                ..
            }
        ));
    }
}
