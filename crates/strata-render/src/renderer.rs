//! The frame driver.
//!
//! Each frame reconciles the scene into GPU storage, refreshes bind groups
//! whose resources were replaced, then encodes the planned passes into one
//! command buffer. The Hi-Z level copy rides along at the end of that buffer
//! and is read back asynchronously, so occlusion data lags by at least one
//! frame. Every frame starts by consuming a finished readback and culling
//! instances against it.

use std::sync::Arc;

use strata_gpu::GpuContext;
use strata_world::Scene;

use crate::bind_groups::{BindGroupCache, BindGroupId};
use crate::buffer_manager::BufferManager;
use crate::camera::{Camera, CameraData};
use crate::config::RendererConfig;
use crate::debug::{DebugMode, RenderMode};
use crate::error::{RenderError, Result};
use crate::frame_graph::{plan, FrameInputs, PassId, PassRecord};
use crate::gizmo::GizmoBuffers;
use crate::hiz::{HiZReadback, HiZSnapshot, HiZState};
use crate::pipelines::{Layouts, Pipelines};
use crate::scene_upload::{cull_occluded, upload_scene, SceneCounts};
use crate::screenshot::read_texture;
use crate::shadow::{upload_shadow_indices, ShadowScheduler};
use crate::targets::{readback_level, RenderTargets, ShadowMaps};
use crate::upload::{BufferTarget, UploadReport};
use crate::voxel_sync::VoxelSync;

/// Targets that can be copied back to the CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadTarget {
    /// Final composited image.
    Output,
    /// G-Buffer ray distance.
    Depth,
    Normal,
    /// Lit opaque image before transparency.
    Intermediate,
    Accum,
    Weight,
}

/// What one call to [`Renderer::render_frame`] did.
#[derive(Debug, Default)]
pub struct FrameReport {
    pub frame: u64,
    pub upload: UploadReport,
    pub counts: SceneCounts,
    /// Lights whose shadow layers were re-rendered.
    pub shadow_layers: Vec<u32>,
    /// Passes in submission order.
    pub passes: Vec<PassId>,
    /// Whether the Hi-Z level copy was recorded this frame.
    pub hiz_copy_queued: bool,
    /// Objects left out because the last Hi-Z snapshot hides them.
    pub occluded: usize,
    pub bind_groups_rebuilt: u64,
}

/// Sparse voxel renderer.
pub struct Renderer {
    config: RendererConfig,
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    buffers: BufferManager,
    voxels: VoxelSync,
    shadows: ShadowScheduler,
    shadow_maps: ShadowMaps,
    targets: RenderTargets,
    pipelines: Pipelines,
    bind_groups: BindGroupCache,
    hiz: HiZReadback,
    gizmos: GizmoBuffers,
    frame: u64,
    debug_mode: DebugMode,
    render_mode: RenderMode,
}

/// Hi-Z level mirrored to the CPU and its extent.
fn readback_extent(targets: &RenderTargets, max_dim: u32) -> (u32, u32, u32) {
    let sizes = targets.hiz_sizes();
    let level = readback_level(sizes, max_dim);
    let (width, height) = sizes[level as usize];
    (level, width, height)
}

impl Renderer {
    /// Create every GPU resource and pipeline. Failures here are fatal.
    pub fn new(
        context: &GpuContext,
        config: RendererConfig,
        width: u32,
        height: u32,
        output_format: wgpu::TextureFormat,
    ) -> Result<Self> {
        let device = context.device_arc();
        let queue = context.queue_arc();

        let buffers = BufferManager::new(context, &config)?;
        let pipelines = Pipelines::new(&device, &config, output_format)?;
        let targets = RenderTargets::new(&device, width, height, output_format)?;
        let shadow_maps = ShadowMaps::new(&device, &config)?;
        let (level, hiz_width, hiz_height) = readback_extent(&targets, config.hiz_readback_max_dim);
        let hiz = HiZReadback::new(&device, level, hiz_width, hiz_height)?;
        let gizmos = GizmoBuffers::new(&device)?;

        let debug_mode = if config.debug_overlay {
            DebugMode::Bvh
        } else {
            DebugMode::None
        };

        tracing::info!(
            width = targets.width(),
            height = targets.height(),
            ?output_format,
            hiz_readback_level = level,
            "renderer initialized"
        );

        Ok(Self {
            voxels: VoxelSync::new(&config),
            shadows: ShadowScheduler::new(config.max_shadow_layers),
            config,
            device,
            queue,
            buffers,
            shadow_maps,
            targets,
            pipelines,
            bind_groups: BindGroupCache::new(),
            hiz,
            gizmos,
            frame: 0,
            debug_mode,
            render_mode: RenderMode::Lit,
        })
    }

    /// Reconcile `scene`, upload, and submit one frame.
    ///
    /// Recoverable failures (buffer ceiling, atlas exhaustion, hash overflow)
    /// are collected in the report and the frame still renders from the last
    /// consistent GPU state. Only fatal errors are returned.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn render_frame(&mut self, scene: &mut Scene, camera: &Camera) -> Result<FrameReport> {
        self.frame += 1;
        let frame = self.frame;
        self.buffers.begin_frame(frame);

        let mut camera_data = CameraData::new(camera, scene.ambient(), scene.lights().len() as u32);
        camera_data.debug_mode = self.debug_mode;
        camera_data.render_mode = self.render_mode;
        self.buffers.write_camera(&camera_data.to_bytes())?;

        self.device.poll(wgpu::Maintain::Poll);
        let snapshot = self.hiz.readback();
        let occluded = if self.config.occlusion_culling {
            cull_occluded(scene, &snapshot, camera)
        } else {
            scene.update_occlusion(|_| false)
        };

        let mut upload = UploadReport::default();
        self.voxels.sync(scene, &mut self.buffers, &mut upload)?;
        let counts = upload_scene(scene, &self.voxels, &mut self.buffers, &mut upload)?;

        let geometry_changed =
            counts.bvh_rebuilt || upload.sectors_uploaded > 0 || upload.bricks_uploaded > 0;
        let mut shadow_layers = self.shadows.select(scene.lights(), geometry_changed);
        if !upload_shadow_indices(&mut self.buffers, &mut upload, &shadow_layers)? {
            self.shadows.invalidate();
            shadow_layers.clear();
        }

        let mut draw_gizmos = !scene.gizmos().is_empty();
        if draw_gizmos {
            if let Err(error) =
                self.gizmos
                    .upload(&self.device, &self.queue, scene.gizmos(), self.buffers.ceiling())
            {
                upload.absorb(error)?;
                draw_gizmos = false;
            }
        }

        for error in &upload.recoverable {
            tracing::warn!(frame, %error, "recoverable upload failure");
        }

        let bind_groups_rebuilt = prepare_bind_groups(
            &mut self.bind_groups,
            &self.device,
            &self.pipelines.layouts,
            &self.buffers,
            &self.targets,
            &self.shadow_maps,
        );

        let passes = plan(&FrameInputs {
            width: self.targets.width(),
            height: self.targets.height(),
            shadow_map_size: self.shadow_maps.size(),
            shadow_updates: shadow_layers.len() as u32,
            hiz_sizes: self.targets.hiz_sizes().to_vec(),
            debug: self.debug_mode != DebugMode::None,
            gizmos: draw_gizmos,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("frame") });
        for pass in &passes {
            self.encode_pass(&mut encoder, pass, &counts);
        }
        let hiz_copy_queued = self
            .hiz
            .record_copy(&mut encoder, self.targets.hiz.texture(), frame, camera_data.view_proj);
        self.queue.submit(Some(encoder.finish()));
        self.hiz.after_submit();
        self.device.poll(wgpu::Maintain::Poll);

        tracing::trace!(
            frame,
            passes = passes.len(),
            instances = counts.instances,
            occluded,
            shadow_updates = shadow_layers.len(),
            "frame submitted"
        );

        Ok(FrameReport {
            frame,
            upload,
            counts,
            shadow_layers,
            passes: passes.iter().map(|p| p.id).collect(),
            hiz_copy_queued,
            occluded,
            bind_groups_rebuilt,
        })
    }

    fn groups(&self, ids: &[BindGroupId]) -> Option<Vec<&wgpu::BindGroup>> {
        ids.iter().map(|id| self.bind_groups.get(id)).collect()
    }

    fn dispatch(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        pass: &PassRecord,
        pipeline: &wgpu::ComputePipeline,
        ids: &[BindGroupId],
    ) {
        let Some(groups) = self.groups(ids) else {
            tracing::warn!(pass = %pass.id, "missing bind group, skipping pass");
            return;
        };
        let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(pass.id.label()),
            timestamp_writes: None,
        });
        cpass.set_pipeline(pipeline);
        for (index, group) in groups.into_iter().enumerate() {
            cpass.set_bind_group(index as u32, group, &[]);
        }
        for &[x, y, z] in &pass.workgroups {
            cpass.dispatch_workgroups(x, y, z);
        }
    }

    fn encode_pass(&self, encoder: &mut wgpu::CommandEncoder, pass: &PassRecord, counts: &SceneCounts) {
        use BindGroupId as B;

        let p = &self.pipelines;
        let t = &self.targets;
        match pass.id {
            PassId::GBuffer => self.dispatch(encoder, pass, &p.gbuffer, &[B::Scene, B::GBufferOut, B::Voxel]),
            PassId::Shadow => self.dispatch(encoder, pass, &p.shadow, &[B::Scene, B::ShadowOut, B::Voxel]),
            PassId::HiZ => {
                let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some(pass.id.label()),
                    timestamp_writes: None,
                });
                cpass.set_pipeline(&p.hiz);
                for (level, &[x, y, z]) in pass.workgroups.iter().enumerate() {
                    let Some(group) = self.bind_groups.get(&B::HiZ(level as u32)) else {
                        tracing::warn!(level, "missing hi-z bind group");
                        break;
                    };
                    cpass.set_bind_group(0, group, &[]);
                    cpass.dispatch_workgroups(x, y, z);
                }
            }
            PassId::Lighting => self.dispatch(encoder, pass, &p.lighting, &[B::Scene, B::LightingIo, B::Voxel]),
            PassId::Debug => self.dispatch(encoder, pass, &p.debug, &[B::Scene, B::DebugOut]),
            PassId::Blit => {
                let Some(groups) = self.groups(&[B::Blit]) else {
                    return;
                };
                let mut rpass = begin_render_pass(
                    encoder,
                    pass.id,
                    &[color_attachment(t.opaque.view(), wgpu::LoadOp::Clear(wgpu::Color::BLACK))],
                );
                rpass.set_pipeline(&p.blit);
                rpass.set_bind_group(0, groups[0], &[]);
                rpass.draw(0..3, 0..1);
            }
            PassId::Accumulation => {
                let (Some(overlay), Some(particles)) = (
                    self.groups(&[B::Scene, B::OverlayIn, B::Voxel]),
                    self.groups(&[B::Scene, B::ParticlesIn]),
                ) else {
                    return;
                };
                let zero = wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT);
                let mut rpass = begin_render_pass(
                    encoder,
                    pass.id,
                    &[color_attachment(t.accum.view(), zero), color_attachment(t.weight.view(), zero)],
                );
                rpass.set_pipeline(&p.overlay);
                for (index, group) in overlay.into_iter().enumerate() {
                    rpass.set_bind_group(index as u32, group, &[]);
                }
                rpass.draw(0..3, 0..1);

                if counts.particles > 0 {
                    rpass.set_pipeline(&p.particles);
                    for (index, group) in particles.into_iter().enumerate() {
                        rpass.set_bind_group(index as u32, group, &[]);
                    }
                    rpass.draw(0..6, 0..counts.particles);
                }
            }
            PassId::Resolve => {
                let Some(groups) = self.groups(&[B::Resolve]) else {
                    return;
                };
                let mut rpass = begin_render_pass(
                    encoder,
                    pass.id,
                    &[color_attachment(t.output.view(), wgpu::LoadOp::Clear(wgpu::Color::BLACK))],
                );
                rpass.set_pipeline(&p.resolve);
                rpass.set_bind_group(0, groups[0], &[]);
                rpass.draw(0..3, 0..1);
            }
            PassId::Gizmo => {
                let Some(groups) = self.groups(&[B::Gizmo]) else {
                    return;
                };
                let mut rpass =
                    begin_render_pass(encoder, pass.id, &[color_attachment(t.output.view(), wgpu::LoadOp::Load)]);
                rpass.set_pipeline(&p.gizmo);
                rpass.set_bind_group(0, groups[0], &[]);
                self.gizmos.draw(&mut rpass);
            }
        }
    }

    /// Recreate the size-dependent targets. Scene and voxel data survive.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        let (width, height) = (width.max(1), height.max(1));
        if width == self.targets.width() && height == self.targets.height() {
            return Ok(());
        }
        self.targets = RenderTargets::new(&self.device, width, height, self.pipelines.output_format())?;
        let (level, hiz_width, hiz_height) = readback_extent(&self.targets, self.config.hiz_readback_max_dim);
        self.hiz.recreate(&self.device, level, hiz_width, hiz_height)?;
        let levels = self.targets.hiz_sizes().len() as u32;
        self.bind_groups
            .retain(|id| !matches!(id, BindGroupId::HiZ(l) if *l >= levels));
        tracing::info!(width, height, hiz_readback_level = level, "resized render targets");
        Ok(())
    }

    /// Newest Hi-Z snapshot. Never empty; uniformly far until the first
    /// readback completes.
    pub fn readback_hiz(&mut self) -> HiZSnapshot {
        self.device.poll(wgpu::Maintain::Poll);
        self.hiz.readback()
    }

    pub fn hiz_state(&self) -> HiZState {
        self.hiz.state()
    }

    /// Copy a target back to the CPU. Blocks until the GPU is idle.
    pub fn read_target(&self, target: ReadTarget) -> Result<Vec<u8>> {
        let t = &self.targets;
        let texture = match target {
            ReadTarget::Output => &t.output,
            ReadTarget::Depth => &t.gbuffer.depth,
            ReadTarget::Normal => &t.gbuffer.normal,
            ReadTarget::Intermediate => &t.intermediate,
            ReadTarget::Accum => &t.accum,
            ReadTarget::Weight => &t.weight,
        };
        let format = texture.format();
        let bytes_per_texel = format
            .block_copy_size(None)
            .ok_or_else(|| RenderError::ResourceCreation(format!("{format:?} cannot be copied")))?;
        read_texture(&self.device, &self.queue, texture.texture(), bytes_per_texel)
    }

    /// Final image as tightly packed RGBA8, swizzled from BGRA outputs.
    pub fn read_output_rgba8(&self) -> Result<Vec<u8>> {
        let mut pixels = self.read_target(ReadTarget::Output)?;
        if matches!(
            self.targets.output_format(),
            wgpu::TextureFormat::Bgra8Unorm | wgpu::TextureFormat::Bgra8UnormSrgb
        ) {
            for texel in pixels.chunks_exact_mut(4) {
                texel.swap(0, 2);
            }
        }
        Ok(pixels)
    }

    /// Block until the GPU is idle and release every retired buffer.
    pub fn wait_idle(&mut self) {
        self.device.poll(wgpu::Maintain::Wait);
        self.buffers.flush_retired();
    }

    pub fn set_debug_mode(&mut self, mode: DebugMode) {
        self.debug_mode = mode;
    }

    pub const fn debug_mode(&self) -> DebugMode {
        self.debug_mode
    }

    pub fn set_render_mode(&mut self, mode: RenderMode) {
        self.render_mode = mode;
    }

    pub const fn render_mode(&self) -> RenderMode {
        self.render_mode
    }

    pub const fn frame(&self) -> u64 {
        self.frame
    }

    pub const fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub const fn targets(&self) -> &RenderTargets {
        &self.targets
    }

    pub const fn voxels(&self) -> &VoxelSync {
        &self.voxels
    }

    pub const fn buffers(&self) -> &BufferManager {
        &self.buffers
    }

    pub fn bind_group_rebuilds(&self) -> u64 {
        self.bind_groups.rebuilds()
    }
}

fn color_attachment(
    view: &wgpu::TextureView,
    load: wgpu::LoadOp<wgpu::Color>,
) -> Option<wgpu::RenderPassColorAttachment<'_>> {
    Some(wgpu::RenderPassColorAttachment {
        view,
        resolve_target: None,
        ops: wgpu::Operations {
            load,
            store: wgpu::StoreOp::Store,
        },
    })
}

fn begin_render_pass<'e>(
    encoder: &'e mut wgpu::CommandEncoder,
    id: PassId,
    attachments: &[Option<wgpu::RenderPassColorAttachment<'_>>],
) -> wgpu::RenderPass<'e> {
    encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some(id.label()),
        color_attachments: attachments,
        depth_stencil_attachment: None,
        timestamp_writes: None,
        occlusion_query_set: None,
    })
}

fn bind_group(
    device: &wgpu::Device,
    label: &str,
    layout: &wgpu::BindGroupLayout,
    resources: &[wgpu::BindingResource<'_>],
) -> wgpu::BindGroup {
    let entries: Vec<_> = resources
        .iter()
        .cloned()
        .enumerate()
        .map(|(binding, resource)| wgpu::BindGroupEntry {
            binding: binding as u32,
            resource,
        })
        .collect();
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout,
        entries: &entries,
    })
}

/// Rebuild every bind group whose resources changed generation. Returns the
/// number rebuilt.
fn prepare_bind_groups(
    cache: &mut BindGroupCache,
    device: &wgpu::Device,
    layouts: &Layouts,
    buffers: &BufferManager,
    targets: &RenderTargets,
    shadow_maps: &ShadowMaps,
) -> u64 {
    use wgpu::BindingResource::TextureView as View;
    use BufferTarget as T;

    let before = cache.rebuilds();
    let generation = |target| buffers.generation(target);
    let binding = |target| buffers.buffer(target).as_entire_binding();
    let camera = buffers.camera();
    let g = &targets.gbuffer;

    cache.ensure(
        BindGroupId::Scene,
        &[camera.generation(), generation(T::Instances), generation(T::BvhNodes), generation(T::Lights)],
        || {
            bind_group(
                device,
                "scene",
                &layouts.scene,
                &[camera.as_entire_binding(), binding(T::Instances), binding(T::BvhNodes), binding(T::Lights)],
            )
        },
    );

    let voxel_key = [
        generation(T::Sectors),
        generation(T::Bricks),
        buffers.atlas().generation(),
        generation(T::Materials),
        generation(T::ObjectParams),
        generation(T::Tree64),
        generation(T::SectorGrid),
        generation(T::GridParams),
    ];
    cache.ensure(BindGroupId::Voxel, &voxel_key, || {
        bind_group(
            device,
            "voxel",
            &layouts.voxel,
            &[
                binding(T::Sectors),
                binding(T::Bricks),
                View(buffers.atlas().view()),
                binding(T::Materials),
                binding(T::ObjectParams),
                binding(T::Tree64),
                binding(T::SectorGrid),
                binding(T::GridParams),
            ],
        )
    });

    let gbuffer_key = [
        g.depth.generation(),
        g.normal.generation(),
        g.material.generation(),
        g.position.generation(),
    ];
    let gbuffer_views = [
        View(g.depth.view()),
        View(g.normal.view()),
        View(g.material.view()),
        View(g.position.view()),
    ];
    cache.ensure(BindGroupId::GBufferOut, &gbuffer_key, || {
        bind_group(device, "gbuffer_out", &layouts.gbuffer_out, &gbuffer_views)
    });

    cache.ensure(
        BindGroupId::ShadowOut,
        &[shadow_maps.texture.generation(), generation(T::ShadowIndices)],
        || {
            bind_group(
                device,
                "shadow_out",
                &layouts.shadow_out,
                &[View(shadow_maps.texture.view()), binding(T::ShadowIndices)],
            )
        },
    );

    let mut lighting_key = gbuffer_key.to_vec();
    lighting_key.extend([shadow_maps.texture.generation(), targets.intermediate.generation()]);
    cache.ensure(BindGroupId::LightingIo, &lighting_key, || {
        let mut views = gbuffer_views.to_vec();
        views.extend([View(shadow_maps.texture.view()), View(targets.intermediate.view())]);
        bind_group(device, "lighting_io", &layouts.lighting_io, &views)
    });

    cache.ensure(BindGroupId::DebugOut, &[targets.intermediate.generation()], || {
        bind_group(device, "debug_out", &layouts.debug_out, &[View(targets.intermediate.view())])
    });

    cache.ensure(BindGroupId::OverlayIn, &[g.depth.generation()], || {
        bind_group(device, "overlay_in", &layouts.overlay_in, &[View(g.depth.view())])
    });

    cache.ensure(
        BindGroupId::ParticlesIn,
        &[g.depth.generation(), generation(T::Particles)],
        || {
            bind_group(
                device,
                "particles_in",
                &layouts.particles_in,
                &[View(g.depth.view()), binding(T::Particles)],
            )
        },
    );

    for level in 0..targets.hiz_sizes().len() as u32 {
        cache.ensure(
            BindGroupId::HiZ(level),
            &[g.depth.generation(), targets.hiz.generation()],
            || {
                // Level 0 reduces the G-Buffer depth, every later level the one above it.
                let src = (level > 0).then(|| targets.hiz.mip_view(level - 1));
                let dst = targets.hiz.mip_view(level);
                bind_group(
                    device,
                    "hiz",
                    &layouts.hiz,
                    &[View(src.as_ref().unwrap_or(g.depth.view())), View(&dst)],
                )
            },
        );
    }

    cache.ensure(BindGroupId::Blit, &[targets.intermediate.generation()], || {
        bind_group(device, "blit", &layouts.blit, &[View(targets.intermediate.view())])
    });

    cache.ensure(
        BindGroupId::Resolve,
        &[targets.opaque.generation(), targets.accum.generation(), targets.weight.generation()],
        || {
            bind_group(
                device,
                "resolve",
                &layouts.resolve,
                &[
                    View(targets.opaque.view()),
                    View(targets.accum.view()),
                    View(targets.weight.view()),
                ],
            )
        },
    );

    cache.ensure(BindGroupId::Gizmo, &[camera.generation()], || {
        bind_group(device, "gizmo", &layouts.gizmo, &[camera.as_entire_binding()])
    });

    let rebuilt = cache.rebuilds() - before;
    if rebuilt > 0 {
        tracing::debug!(rebuilt, "refreshed bind groups");
    }
    rebuilt
}
