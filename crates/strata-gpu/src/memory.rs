//! GPU buffer and texture ownership.
//!
//! Every resource carries a process-unique generation number. Bind groups
//! remember the generations they were built from, so replacing a resource
//! (for example when a buffer grows) is detectable without comparing handles.

use std::sync::atomic::{AtomicU64, Ordering};

use wgpu::util::DeviceExt;

use crate::error::{GpuError, Result};

/// Buffers are never created smaller than this; zero-sized bindings are invalid.
pub const MIN_BUFFER_SIZE: u64 = 256;

/// Sizes produced by [`grown_size`] are rounded up to this alignment.
pub const BUFFER_SIZE_ALIGNMENT: u64 = 256;

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

fn next_generation() -> u64 {
    NEXT_GENERATION.fetch_add(1, Ordering::Relaxed)
}

const fn align_up(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

/// Compute the new size of a buffer that must hold `required` bytes.
///
/// Returns `Ok(None)` when `current` already suffices. Otherwise the buffer
/// grows geometrically by `growth`, never below `required` and never above
/// `ceiling`. Requests past the ceiling fail with [`GpuError::BufferCeiling`].
pub fn grown_size(
    label: &str,
    current: u64,
    required: u64,
    growth: f64,
    ceiling: u64,
) -> Result<Option<u64>> {
    if required <= current {
        return Ok(None);
    }
    if required > ceiling {
        return Err(GpuError::BufferCeiling {
            label: label.to_string(),
            required,
            ceiling,
        });
    }

    let geometric = (current as f64 * growth.max(1.0)).ceil() as u64;
    let target = align_up(geometric.max(required).max(MIN_BUFFER_SIZE), BUFFER_SIZE_ALIGNMENT);
    Ok(Some(target.min(ceiling).max(required)))
}

/// Run `create` inside an out-of-memory/validation error scope.
///
/// Popping the scopes waits on the device, so this is for startup and
/// resize only. Per-frame allocations go through [`GpuBuffer::new_unscoped`].
fn scoped<T>(device: &wgpu::Device, what: &str, create: impl FnOnce() -> T) -> Result<T> {
    device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = create();
    let validation = pollster::block_on(device.pop_error_scope());
    let oom = pollster::block_on(device.pop_error_scope());
    match validation.or(oom) {
        Some(error) => Err(GpuError::AllocationFailed(format!("{what}: {error}"))),
        None => Ok(value),
    }
}

fn buffer_size(requested: u64) -> u64 {
    align_up(requested.max(MIN_BUFFER_SIZE), wgpu::COPY_BUFFER_ALIGNMENT)
}

fn create_buffer(device: &wgpu::Device, label: &str, size: u64, usage: wgpu::BufferUsages) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size,
        usage,
        mapped_at_creation: false,
    })
}

/// An owned GPU buffer.
pub struct GpuBuffer {
    buffer: wgpu::Buffer,
    size: u64,
    usage: wgpu::BufferUsages,
    label: String,
    generation: u64,
}

impl GpuBuffer {
    /// Create an uninitialised buffer of at least `size` bytes.
    pub fn new(
        device: &wgpu::Device,
        label: &str,
        size: u64,
        usage: wgpu::BufferUsages,
    ) -> Result<Self> {
        let size = buffer_size(size);
        let buffer = scoped(device, label, || create_buffer(device, label, size, usage))?;
        tracing::trace!(buffer = label, bytes = size, "created buffer");
        Ok(Self::from_raw(buffer, size, usage, label))
    }

    /// Create a buffer without an error scope, for allocations made while a
    /// frame is being built. Failures surface through the device's
    /// uncaptured-error handler instead of stalling the host.
    pub fn new_unscoped(
        device: &wgpu::Device,
        label: &str,
        size: u64,
        usage: wgpu::BufferUsages,
    ) -> Self {
        let size = buffer_size(size);
        let buffer = create_buffer(device, label, size, usage);
        tracing::trace!(buffer = label, bytes = size, "created buffer");
        Self::from_raw(buffer, size, usage, label)
    }

    fn from_raw(buffer: wgpu::Buffer, size: u64, usage: wgpu::BufferUsages, label: &str) -> Self {
        Self {
            buffer,
            size,
            usage,
            label: label.to_string(),
            generation: next_generation(),
        }
    }

    /// Create a buffer initialised with `contents`.
    pub fn with_data(
        device: &wgpu::Device,
        label: &str,
        contents: &[u8],
        usage: wgpu::BufferUsages,
    ) -> Result<Self> {
        let mut padded;
        let contents = if (contents.len() as u64) < MIN_BUFFER_SIZE
            || contents.len() as u64 % wgpu::COPY_BUFFER_ALIGNMENT != 0
        {
            let len = align_up(
                (contents.len() as u64).max(MIN_BUFFER_SIZE),
                wgpu::COPY_BUFFER_ALIGNMENT,
            );
            padded = vec![0u8; len as usize];
            padded[..contents.len()].copy_from_slice(contents);
            padded.as_slice()
        } else {
            contents
        };

        let buffer = scoped(device, label, || {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents,
                usage,
            })
        })?;

        Ok(Self::from_raw(buffer, contents.len() as u64, usage, label))
    }

    /// Queue a write of `data` at `offset`.
    pub fn write(&self, queue: &wgpu::Queue, offset: u64, data: &[u8]) -> Result<()> {
        let end = offset + data.len() as u64;
        if end > self.size {
            return Err(GpuError::InvalidState(format!(
                "write of {} bytes at {offset} overflows {} ({} bytes)",
                data.len(),
                self.label,
                self.size
            )));
        }
        if data.is_empty() {
            return Ok(());
        }
        queue.write_buffer(&self.buffer, offset, data);
        Ok(())
    }

    /// Create a larger replacement and record a copy of the current contents.
    ///
    /// Runs mid-frame, so the replacement is created unscoped. The caller
    /// must keep `self` alive until the encoder has been submitted, typically
    /// by handing it to a deferred deletion queue.
    pub fn grow(&self, device: &wgpu::Device, encoder: &mut wgpu::CommandEncoder, new_size: u64) -> Self {
        let grown = Self::new_unscoped(
            device,
            &self.label,
            new_size,
            self.usage | wgpu::BufferUsages::COPY_DST,
        );
        if self.usage.contains(wgpu::BufferUsages::COPY_SRC) {
            encoder.copy_buffer_to_buffer(&self.buffer, 0, &grown.buffer, 0, self.size);
        }
        grown
    }

    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn usage(&self) -> wgpu::BufferUsages {
        self.usage
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn as_entire_binding(&self) -> wgpu::BindingResource<'_> {
        self.buffer.as_entire_binding()
    }
}

/// Parameters for [`GpuTexture::new`].
#[derive(Clone, Debug)]
pub struct TextureDesc<'a> {
    pub label: &'a str,
    pub size: wgpu::Extent3d,
    pub mip_level_count: u32,
    pub dimension: wgpu::TextureDimension,
    pub view_dimension: wgpu::TextureViewDimension,
    pub format: wgpu::TextureFormat,
    pub usage: wgpu::TextureUsages,
}

impl<'a> TextureDesc<'a> {
    /// A single-mip 2D texture.
    pub fn d2(
        label: &'a str,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
        usage: wgpu::TextureUsages,
    ) -> Self {
        Self {
            label,
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            dimension: wgpu::TextureDimension::D2,
            view_dimension: wgpu::TextureViewDimension::D2,
            format,
            usage,
        }
    }
}

/// An owned GPU texture with a default full view.
pub struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    size: wgpu::Extent3d,
    format: wgpu::TextureFormat,
    view_dimension: wgpu::TextureViewDimension,
    mip_level_count: u32,
    generation: u64,
}

impl GpuTexture {
    pub fn new(device: &wgpu::Device, desc: &TextureDesc<'_>) -> Result<Self> {
        let texture = scoped(device, desc.label, || {
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some(desc.label),
                size: desc.size,
                mip_level_count: desc.mip_level_count,
                sample_count: 1,
                dimension: desc.dimension,
                format: desc.format,
                usage: desc.usage,
                view_formats: &[],
            })
        })?;

        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(desc.label),
            dimension: Some(desc.view_dimension),
            ..Default::default()
        });

        tracing::trace!(
            texture = desc.label,
            width = desc.size.width,
            height = desc.size.height,
            depth = desc.size.depth_or_array_layers,
            "created texture"
        );

        Ok(Self {
            texture,
            view,
            size: desc.size,
            format: desc.format,
            view_dimension: desc.view_dimension,
            mip_level_count: desc.mip_level_count,
            generation: next_generation(),
        })
    }

    /// View of a single mip level.
    pub fn mip_view(&self, level: u32) -> wgpu::TextureView {
        self.texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("mip view"),
            dimension: Some(self.view_dimension),
            base_mip_level: level,
            mip_level_count: Some(1),
            ..Default::default()
        })
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn size(&self) -> wgpu::Extent3d {
        self.size
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.format
    }

    pub fn mip_level_count(&self) -> u32 {
        self.mip_level_count
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}
