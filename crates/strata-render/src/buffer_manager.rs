//! GPU storage owned by the renderer.
//!
//! The buffer manager is the wgpu implementation of [`UploadSink`]: every
//! storage buffer, the camera uniform and the voxel payload atlas live here.
//! Bind groups borrow these resources and are rebuilt when a generation
//! changes.

use std::sync::Arc;

use glam::UVec3;
use strata_core::constants::{BRICK_SIZE, BRICK_VOXELS};
use strata_core::PaletteIndex;
use strata_gpu::{grown_size, DeferredDeletionQueue, GpuBuffer, GpuContext, GpuError, GpuTexture, TextureDesc};

use crate::config::RendererConfig;
use crate::error::{RenderError, Result};
use crate::gpu_types::CAMERA_DATA_SIZE;
use crate::upload::{BufferTarget, EnsureOutcome, UploadSink};

const STORAGE_USAGE: wgpu::BufferUsages = wgpu::BufferUsages::STORAGE
    .union(wgpu::BufferUsages::COPY_DST)
    .union(wgpu::BufferUsages::COPY_SRC);

/// Owns the storage buffers, camera uniform and payload atlas.
pub struct BufferManager {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    buffers: Vec<GpuBuffer>,
    camera: GpuBuffer,
    atlas: GpuTexture,
    atlas_side: u32,
    growth: f64,
    ceiling: u64,
    retired: DeferredDeletionQueue<GpuBuffer>,
    frame: u64,
}

impl BufferManager {
    pub fn new(context: &GpuContext, config: &RendererConfig) -> Result<Self> {
        let device = context.device_arc();
        let queue = context.queue_arc();

        let buffers = BufferTarget::ALL
            .iter()
            .map(|target| GpuBuffer::new(&device, target.label(), 0, STORAGE_USAGE))
            .collect::<strata_gpu::Result<Vec<_>>>()
            .map_err(RenderError::from_gpu)?;

        let camera = GpuBuffer::new(
            &device,
            "camera",
            CAMERA_DATA_SIZE as u64,
            wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        )
        .map_err(RenderError::from_gpu)?;

        let atlas_side = config.atlas_side_voxels();
        let atlas = GpuTexture::new(
            &device,
            &TextureDesc {
                label: "voxel_payload",
                size: wgpu::Extent3d {
                    width: atlas_side,
                    height: atlas_side,
                    depth_or_array_layers: atlas_side,
                },
                mip_level_count: 1,
                dimension: wgpu::TextureDimension::D3,
                view_dimension: wgpu::TextureViewDimension::D3,
                format: wgpu::TextureFormat::R8Uint,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            },
        )
        .map_err(RenderError::from_gpu)?;

        let ceiling = context
            .capabilities()
            .buffer_ceiling(config.buffer_ceiling_bytes);

        tracing::debug!(
            atlas_side,
            ceiling_bytes = ceiling,
            "buffer manager ready"
        );

        Ok(Self {
            device,
            queue,
            buffers,
            camera,
            atlas,
            atlas_side,
            growth: config.buffer_growth,
            ceiling,
            retired: DeferredDeletionQueue::new(config.frames_in_flight),
            frame: 0,
        })
    }

    /// Advance the frame counter and release buffers no frame can still use.
    pub fn begin_frame(&mut self, frame: u64) {
        self.frame = frame;
        let released = self.retired.process(frame);
        if released > 0 {
            tracing::trace!(released, "released retired buffers");
        }
    }

    /// Upload the 256-byte camera record.
    pub fn write_camera(&self, bytes: &[u8]) -> Result<()> {
        self.camera
            .write(&self.queue, 0, bytes)
            .map_err(RenderError::from_gpu)
    }

    pub fn buffer(&self, target: BufferTarget) -> &GpuBuffer {
        &self.buffers[target.index()]
    }

    pub fn generation(&self, target: BufferTarget) -> u64 {
        self.buffers[target.index()].generation()
    }

    pub fn camera(&self) -> &GpuBuffer {
        &self.camera
    }

    pub fn atlas(&self) -> &GpuTexture {
        &self.atlas
    }

    pub const fn atlas_side(&self) -> u32 {
        self.atlas_side
    }

    pub const fn ceiling(&self) -> u64 {
        self.ceiling
    }

    /// Buffers waiting for their last frame to retire.
    pub fn retired_count(&self) -> usize {
        self.retired.pending_count()
    }

    /// Release every retired buffer. Only call once the device is idle.
    pub fn flush_retired(&mut self) {
        self.retired.flush();
    }
}

impl UploadSink for BufferManager {
    fn ensure_capacity(&mut self, target: BufferTarget, required: u64) -> Result<EnsureOutcome> {
        let current = &self.buffers[target.index()];
        let old_bytes = current.size();
        let new_bytes = match grown_size(target.label(), old_bytes, required, self.growth, self.ceiling) {
            Ok(Some(size)) => size,
            Ok(None) => {
                return Ok(EnsureOutcome {
                    recreated: false,
                    capacity: old_bytes,
                })
            }
            Err(err @ GpuError::BufferCeiling { .. }) => {
                tracing::warn!(
                    buffer = target.label(),
                    required,
                    ceiling = self.ceiling,
                    "buffer ceiling hit, keeping old buffer"
                );
                return Err(RenderError::from_gpu(err));
            }
            Err(err) => return Err(RenderError::from_gpu(err)),
        };

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("buffer growth"),
            });
        let grown = current.grow(&self.device, &mut encoder, new_bytes);
        // Submitted now so queued writes to the new buffer land after the copy.
        self.queue.submit(Some(encoder.finish()));

        let old = std::mem::replace(&mut self.buffers[target.index()], grown);
        self.retired.queue(old, self.frame);

        tracing::warn!(
            buffer = target.label(),
            old_bytes,
            new_bytes,
            "reallocated storage buffer"
        );

        Ok(EnsureOutcome {
            recreated: true,
            capacity: new_bytes,
        })
    }

    fn write_buffer(&mut self, target: BufferTarget, offset: u64, bytes: &[u8]) -> Result<()> {
        self.buffers[target.index()]
            .write(&self.queue, offset, bytes)
            .map_err(RenderError::from_gpu)
    }

    fn write_atlas_tile(
        &mut self,
        origin: UVec3,
        voxels: &[PaletteIndex; BRICK_VOXELS],
    ) -> Result<()> {
        if origin.max_element() + BRICK_SIZE > self.atlas_side {
            return Err(RenderError::Gpu(GpuError::InvalidState(format!(
                "atlas tile at {origin} outside {} voxel atlas",
                self.atlas_side
            ))));
        }
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: self.atlas.texture(),
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: origin.x,
                    y: origin.y,
                    z: origin.z,
                },
                aspect: wgpu::TextureAspect::All,
            },
            voxels,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(BRICK_SIZE),
                rows_per_image: Some(BRICK_SIZE),
            },
            wgpu::Extent3d {
                width: BRICK_SIZE,
                height: BRICK_SIZE,
                depth_or_array_layers: BRICK_SIZE,
            },
        );
        Ok(())
    }
}
