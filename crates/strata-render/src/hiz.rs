//! Hi-Z occlusion pyramid readback.
//!
//! The pyramid is built on the GPU every frame. One small level is copied
//! into a mappable buffer and mapped asynchronously; the CPU reads it a
//! frame or more later. A four-state machine guarded by a mutex serialises
//! the copy, the map callback and the reader:
//!
//! ```text
//! Idle --copy queued--> Copy --map requested--> Mapping --ok--> Mapped --read--> Idle
//!                                                  \--failed--> Idle
//! ```
//!
//! Each snapshot remembers the view-projection it was rendered with. Boxes
//! are only culled against a snapshot taken from the current camera, so a
//! moving camera never hides geometry on stale depth.

use std::sync::Arc;

use glam::{Mat4, Vec2, Vec3};
use parking_lot::Mutex;
use strata_core::constants::FAR_DEPTH;
use strata_core::Aabb;
use strata_gpu::GpuBuffer;

use crate::error::{RenderError, Result};

/// Bytes per R32F texel.
const TEXEL_BYTES: u32 = 4;

/// View-projection tolerance for reusing a snapshot's camera.
const CAMERA_EPSILON: f32 = 1e-5;

/// Readback state.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HiZState {
    Idle = 0,
    Copy = 1,
    Mapping = 2,
    Mapped = 3,
}

/// Shared, mutex-guarded readback state.
#[derive(Debug, Clone)]
pub struct ReadbackStateMachine {
    state: Arc<Mutex<HiZState>>,
}

impl Default for ReadbackStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadbackStateMachine {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(HiZState::Idle)),
        }
    }

    pub fn state(&self) -> HiZState {
        *self.state.lock()
    }

    /// Idle -> Copy. Returns false, leaving the state alone, otherwise.
    pub fn try_begin_copy(&self) -> bool {
        self.transition(HiZState::Idle, HiZState::Copy)
    }

    /// Copy -> Mapping, once the copy has been submitted.
    pub fn begin_map(&self) -> bool {
        self.transition(HiZState::Copy, HiZState::Mapping)
    }

    /// Mapping -> Mapped on success, Mapping -> Idle on failure.
    pub fn complete_map(&self, success: bool) -> bool {
        let next = if success { HiZState::Mapped } else { HiZState::Idle };
        self.transition(HiZState::Mapping, next)
    }

    /// Mapped -> Idle after the CPU consumed and unmapped the buffer.
    pub fn finish_read(&self) -> bool {
        self.transition(HiZState::Mapped, HiZState::Idle)
    }

    fn transition(&self, from: HiZState, to: HiZState) -> bool {
        let mut state = self.state.lock();
        if *state == from {
            *state = to;
            true
        } else {
            false
        }
    }
}

/// A consistent depth snapshot read back from the pyramid.
#[derive(Debug, Clone, PartialEq)]
pub struct HiZSnapshot {
    data: Vec<f32>,
    width: u32,
    height: u32,
    /// Frame whose depth this is; `None` for the synthesised far snapshot.
    frame: Option<u64>,
    view_proj: Option<Mat4>,
}

impl HiZSnapshot {
    /// A snapshot where everything is infinitely far away.
    pub fn far(width: u32, height: u32) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        Self {
            data: vec![FAR_DEPTH; (width * height) as usize],
            width,
            height,
            frame: None,
            view_proj: None,
        }
    }

    pub fn from_data(data: Vec<f32>, width: u32, height: u32, frame: u64) -> Result<Self> {
        if data.len() != (width * height) as usize || data.is_empty() {
            return Err(RenderError::MapAsyncFailure(format!(
                "{} texels for a {width}x{height} snapshot",
                data.len()
            )));
        }
        Ok(Self {
            data,
            width,
            height,
            frame: Some(frame),
            view_proj: None,
        })
    }

    /// Tag the snapshot with the camera its depth was rendered from.
    #[must_use]
    pub fn with_view_proj(mut self, view_proj: Mat4) -> Self {
        self.view_proj = Some(view_proj);
        self
    }

    pub const fn view_proj(&self) -> Option<Mat4> {
        self.view_proj
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub const fn width(&self) -> u32 {
        self.width
    }

    pub const fn height(&self) -> u32 {
        self.height
    }

    pub const fn frame(&self) -> Option<u64> {
        self.frame
    }

    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.data[(y.min(self.height - 1) * self.width + x.min(self.width - 1)) as usize]
    }

    pub fn min_depth(&self) -> f32 {
        self.data.iter().copied().fold(f32::INFINITY, f32::min)
    }

    pub fn max_depth(&self) -> f32 {
        self.data.iter().copied().fold(0.0, f32::max)
    }

    /// Conservative occlusion test.
    ///
    /// `rect_min`/`rect_max` are the object's screen bounds in normalised
    /// coordinates (`0..1`, y down) and `min_distance` the smallest ray
    /// distance from the camera to its bounds. The object is occluded when
    /// it lies behind the farthest depth of every texel it overlaps.
    pub fn is_occluded(&self, rect_min: Vec2, rect_max: Vec2, min_distance: f32) -> bool {
        let lo = rect_min.max(Vec2::ZERO);
        let hi = rect_max.min(Vec2::ONE);
        if lo.x > hi.x || lo.y > hi.y {
            return false;
        }
        let size = Vec2::new(self.width as f32, self.height as f32);
        let first = (lo * size).floor().as_uvec2();
        let last = ((hi * size).ceil().as_uvec2()).max(first + 1);

        let mut farthest = 0.0f32;
        for y in first.y..last.y.min(self.height) {
            for x in first.x..last.x.min(self.width) {
                farthest = farthest.max(self.get(x, y));
            }
        }
        min_distance > farthest
    }

    /// Whether the world-space `aabb`, seen from `eye` through `view_proj`,
    /// is hidden behind this snapshot's depth.
    ///
    /// Never true for a snapshot from a different camera, for boxes that
    /// contain the eye or reach behind it.
    pub fn occludes(&self, view_proj: Mat4, eye: Vec3, aabb: &Aabb) -> bool {
        let same_camera = self
            .view_proj
            .is_some_and(|vp| vp.abs_diff_eq(view_proj, CAMERA_EPSILON));
        if !same_camera || aabb.is_empty() || aabb.contains_point(eye) {
            return false;
        }
        let mut lo = Vec2::splat(f32::INFINITY);
        let mut hi = Vec2::splat(f32::NEG_INFINITY);
        for i in 0..8 {
            let corner = Vec3::select(
                glam::BVec3::new(i & 1 != 0, i & 2 != 0, i & 4 != 0),
                aabb.max,
                aabb.min,
            );
            let clip = view_proj * corner.extend(1.0);
            if clip.w <= f32::EPSILON {
                return false;
            }
            let ndc = clip.truncate().truncate() / clip.w;
            let screen = Vec2::new(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5);
            lo = lo.min(screen);
            hi = hi.max(screen);
        }
        self.is_occluded(lo, hi, aabb.distance_to_point(eye))
    }
}

/// CPU reference of one reduction step. `src` is `src_w`x`src_h`, row major;
/// the result is `dst_w`x`dst_h`. Every texel reads its full 2x2 footprint,
/// with samples outside the source counting as [`FAR_DEPTH`]. An axis whose
/// source is one texel wide has nothing to pair with and reads one sample.
/// The last column and row also extend to the source edge.
pub fn reduce_max(src: &[f32], src_w: u32, src_h: u32, dst_w: u32, dst_h: u32) -> Vec<f32> {
    let footprint = |d: u32, dst: u32, src: u32| {
        let base = d * 2;
        let span = if src == 1 { 1 } else { 2 };
        let end = if d + 1 == dst { (base + span).max(src) } else { base + span };
        base..end
    };
    let sample = |x: u32, y: u32| {
        if x < src_w && y < src_h {
            src[(y * src_w + x) as usize]
        } else {
            FAR_DEPTH
        }
    };
    let mut out = Vec::with_capacity((dst_w * dst_h) as usize);
    for y in 0..dst_h {
        for x in 0..dst_w {
            let mut depth = 0.0_f32;
            for sy in footprint(y, dst_h, src_h) {
                for sx in footprint(x, dst_w, src_w) {
                    depth = depth.max(sample(sx, sy));
                }
            }
            out.push(depth);
        }
    }
    out
}

/// Row pitch of a texture-to-buffer copy.
pub const fn padded_bytes_per_row(width: u32) -> u32 {
    let unpadded = width * TEXEL_BYTES;
    unpadded.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT) * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT
}

/// Strip row padding and decode little-endian floats.
pub fn decode_rows(bytes: &[u8], width: u32, height: u32, padded_row: u32) -> Vec<f32> {
    let mut out = Vec::with_capacity((width * height) as usize);
    for row in 0..height as usize {
        let start = row * padded_row as usize;
        let row_bytes = &bytes[start..start + (width * TEXEL_BYTES) as usize];
        out.extend(
            row_bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])),
        );
    }
    out
}

/// GPU side of the readback: the mappable buffer and the level it mirrors.
pub struct HiZReadback {
    buffer: GpuBuffer,
    level: u32,
    width: u32,
    height: u32,
    padded_row: u32,
    machine: ReadbackStateMachine,
    copied_frame: u64,
    copied_view_proj: Mat4,
    last: Option<HiZSnapshot>,
}

impl HiZReadback {
    pub fn new(device: &wgpu::Device, level: u32, width: u32, height: u32) -> Result<Self> {
        let padded_row = padded_bytes_per_row(width);
        let buffer = GpuBuffer::new(
            device,
            "hiz_readback",
            u64::from(padded_row) * u64::from(height),
            wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        )
        .map_err(RenderError::from_gpu)?;
        Ok(Self {
            buffer,
            level,
            width,
            height,
            padded_row,
            machine: ReadbackStateMachine::new(),
            copied_frame: 0,
            copied_view_proj: Mat4::IDENTITY,
            last: None,
        })
    }

    /// Replace the buffer after a resize. The last snapshot stays valid
    /// because queries use normalised coordinates.
    pub fn recreate(&mut self, device: &wgpu::Device, level: u32, width: u32, height: u32) -> Result<()> {
        let last = self.last.take();
        *self = Self::new(device, level, width, height)?;
        self.last = last;
        Ok(())
    }

    pub const fn level(&self) -> u32 {
        self.level
    }

    pub fn state(&self) -> HiZState {
        self.machine.state()
    }

    /// Queue the level copy, but only from Idle. Returns whether it was queued.
    pub fn record_copy(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        hiz: &wgpu::Texture,
        frame: u64,
        view_proj: Mat4,
    ) -> bool {
        if !self.machine.try_begin_copy() {
            return false;
        }
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: hiz,
                mip_level: self.level,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: self.buffer.buffer(),
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(self.padded_row),
                    rows_per_image: Some(self.height),
                },
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
        self.copied_frame = frame;
        self.copied_view_proj = view_proj;
        true
    }

    /// Request the map once the frame containing the copy was submitted.
    pub fn after_submit(&mut self) {
        if !self.machine.begin_map() {
            return;
        }
        let machine = self.machine.clone();
        self.buffer
            .buffer()
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |result| {
                if let Err(error) = &result {
                    tracing::debug!(%error, "hi-z readback map failed");
                }
                machine.complete_map(result.is_ok());
            });
    }

    /// The newest completed snapshot, consuming a finished mapping first.
    ///
    /// Never empty: before any readback completes a uniform far snapshot is
    /// returned.
    pub fn readback(&mut self) -> HiZSnapshot {
        if self.machine.state() == HiZState::Mapped {
            let data = {
                let view = self.buffer.buffer().slice(..).get_mapped_range();
                decode_rows(&view, self.width, self.height, self.padded_row)
            };
            self.buffer.buffer().unmap();
            self.machine.finish_read();
            match HiZSnapshot::from_data(data, self.width, self.height, self.copied_frame) {
                Ok(snapshot) => self.last = Some(snapshot.with_view_proj(self.copied_view_proj)),
                Err(error) => tracing::debug!(%error, "discarded hi-z readback"),
            }
        }
        self.last
            .clone()
            .unwrap_or_else(|| HiZSnapshot::far(self.width, self.height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_only_starts_from_idle() {
        let m = ReadbackStateMachine::new();
        assert!(m.try_begin_copy());
        assert_eq!(m.state(), HiZState::Copy);
        assert!(!m.try_begin_copy());
        assert!(m.begin_map());
        assert!(!m.try_begin_copy());
        assert!(m.complete_map(true));
        assert_eq!(m.state(), HiZState::Mapped);
        assert!(!m.try_begin_copy());
        assert!(m.finish_read());
        assert!(m.try_begin_copy());
    }

    #[test]
    fn failed_map_returns_to_idle() {
        let m = ReadbackStateMachine::new();
        m.try_begin_copy();
        m.begin_map();
        assert!(m.complete_map(false));
        assert_eq!(m.state(), HiZState::Idle);
        assert!(!m.finish_read());
    }

    #[test]
    fn callback_from_another_thread() {
        let m = ReadbackStateMachine::new();
        m.try_begin_copy();
        m.begin_map();
        let shared = m.clone();
        std::thread::spawn(move || shared.complete_map(true))
            .join()
            .unwrap();
        assert_eq!(m.state(), HiZState::Mapped);
    }

    #[test]
    fn far_snapshot_is_never_empty() {
        let snapshot = HiZSnapshot::far(0, 0);
        assert_eq!(snapshot.data().len(), 1);
        assert_eq!(snapshot.min_depth(), FAR_DEPTH);
        assert_eq!(snapshot.frame(), None);
        assert!(!snapshot.is_occluded(Vec2::ZERO, Vec2::ONE, 100.0));
    }

    #[test]
    fn occlusion_is_conservative() {
        // Left half at depth 10, right half far.
        let data = vec![10.0, 10.0, FAR_DEPTH, FAR_DEPTH, 10.0, 10.0, FAR_DEPTH, FAR_DEPTH];
        let snapshot = HiZSnapshot::from_data(data, 4, 2, 3).unwrap();
        assert_eq!(snapshot.min_depth(), 10.0);

        assert!(snapshot.is_occluded(Vec2::new(0.05, 0.1), Vec2::new(0.45, 0.9), 12.0));
        assert!(!snapshot.is_occluded(Vec2::new(0.05, 0.1), Vec2::new(0.45, 0.9), 8.0));
        // Straddles into the far half.
        assert!(!snapshot.is_occluded(Vec2::new(0.3, 0.1), Vec2::new(0.6, 0.9), 12.0));
        // Entirely off screen.
        assert!(!snapshot.is_occluded(Vec2::new(1.5, 0.0), Vec2::new(2.0, 1.0), 12.0));
    }

    fn view_proj() -> Mat4 {
        let view = Mat4::look_to_rh(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y);
        Mat4::perspective_rh(std::f32::consts::FRAC_PI_2, 1.0, 0.1, 1000.0) * view
    }

    fn wall_at(depth: f32) -> HiZSnapshot {
        HiZSnapshot::from_data(vec![depth; 16], 4, 4, 7)
            .unwrap()
            .with_view_proj(view_proj())
    }

    #[test]
    fn boxes_behind_the_depth_are_occluded() {
        let snapshot = wall_at(10.0);
        let behind = Aabb::new(Vec3::new(-1.0, -1.0, -31.0), Vec3::new(1.0, 1.0, -29.0));
        let in_front = Aabb::new(Vec3::new(-1.0, -1.0, -6.0), Vec3::new(1.0, 1.0, -4.0));
        assert!(snapshot.occludes(view_proj(), Vec3::ZERO, &behind));
        assert!(!snapshot.occludes(view_proj(), Vec3::ZERO, &in_front));
        // Surrounding the eye or reaching behind it.
        let around = Aabb::new(Vec3::splat(-40.0), Vec3::splat(40.0));
        assert!(!snapshot.occludes(view_proj(), Vec3::ZERO, &around));
        let straddling = Aabb::new(Vec3::new(-1.0, -1.0, -30.0), Vec3::new(1.0, 1.0, 5.0));
        assert!(!snapshot.occludes(view_proj(), Vec3::new(0.0, 3.0, 0.0), &straddling));
    }

    #[test]
    fn occlusion_needs_the_same_camera() {
        let behind = Aabb::new(Vec3::new(-1.0, -1.0, -31.0), Vec3::new(1.0, 1.0, -29.0));
        let moved = Mat4::from_translation(Vec3::new(0.0, 0.0, -5.0)) * view_proj();
        assert!(!wall_at(10.0).occludes(moved, Vec3::ZERO, &behind));

        let untagged = HiZSnapshot::from_data(vec![10.0; 16], 4, 4, 7).unwrap();
        assert!(!untagged.occludes(view_proj(), Vec3::ZERO, &behind));
        assert!(!HiZSnapshot::far(4, 4).occludes(view_proj(), Vec3::ZERO, &behind));
    }

    #[test]
    fn rows_are_unpadded() {
        assert_eq!(padded_bytes_per_row(1), 256);
        assert_eq!(padded_bytes_per_row(64), 256);
        assert_eq!(padded_bytes_per_row(65), 512);

        let mut bytes = vec![0u8; 512];
        bytes[..4].copy_from_slice(&1.5f32.to_le_bytes());
        bytes[4..8].copy_from_slice(&2.5f32.to_le_bytes());
        bytes[256..260].copy_from_slice(&3.5f32.to_le_bytes());
        bytes[260..264].copy_from_slice(&4.5f32.to_le_bytes());
        assert_eq!(decode_rows(&bytes, 2, 2, 256), vec![1.5, 2.5, 3.5, 4.5]);
    }

    #[test]
    fn mismatched_snapshot_is_rejected() {
        assert!(HiZSnapshot::from_data(vec![1.0; 3], 2, 2, 0).is_err());
    }

    #[test]
    fn reduction_keeps_truncated_edge() {
        // 5x2 source into 2x1: the last destination texel also covers column 4.
        let src = [1.0, 2.0, 3.0, 4.0, 9.0, 1.0, 1.0, 1.0, 1.0, 1.0];
        assert_eq!(reduce_max(&src, 5, 2, 2, 1), vec![2.0, 9.0]);
    }

    #[test]
    fn out_of_bounds_samples_are_far() {
        // 3x2 into the rounded-up 2x1 level 0: the edge texel's second column is outside.
        let src = [5.0, 1.0, 2.0, 3.0, 1.0, 2.0];
        assert_eq!(reduce_max(&src, 3, 2, 2, 1), vec![5.0, FAR_DEPTH]);
        // A single-row source has no second row to pair with.
        assert_eq!(reduce_max(&[5.0, 1.0, 2.0], 3, 1, 2, 1), vec![5.0, FAR_DEPTH]);
        assert_eq!(reduce_max(&[3.0, 8.0], 2, 1, 1, 1), vec![8.0]);
        assert_eq!(reduce_max(&[4.0, 7.0, 1.0, 2.0], 2, 2, 1, 1), vec![7.0]);
    }

    #[test]
    fn far_edge_never_culls_more() {
        // 3x3 depth at 10 into 2x2: only the fully covered corner texel is near.
        let src = [10.0; 9];
        let out = reduce_max(&src, 3, 3, 2, 2);
        assert_eq!(out, vec![10.0, FAR_DEPTH, FAR_DEPTH, FAR_DEPTH]);
        let snapshot = HiZSnapshot::from_data(out, 2, 2, 0).unwrap();
        assert!(snapshot.is_occluded(Vec2::ZERO, Vec2::splat(0.4), 20.0));
        assert!(!snapshot.is_occluded(Vec2::splat(0.6), Vec2::ONE, 20.0));
    }
}
