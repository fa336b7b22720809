//! Gizmo tessellation and instancing.
//!
//! Every gizmo kind is a unit shape baked once into a shared line-list
//! vertex buffer. Per frame, gizmos are grouped by kind and each becomes a
//! model matrix plus colour; one instanced draw is issued per kind.

use std::f32::consts::TAU;
use std::ops::Range;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Quat, Vec3};
use strata_gpu::{grown_size, GpuBuffer};
use strata_world::{Gizmo, GizmoKind, GizmoShape};

use crate::error::{RenderError, Result};

/// Segments used for circles and each great circle of a sphere.
pub const CIRCLE_SEGMENTS: u32 = 32;

/// Per-instance vertex data: model matrix columns then colour.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct GizmoInstance {
    pub model: [[f32; 4]; 4],
    pub color: [f32; 4],
}

impl GizmoInstance {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    const ATTRIBUTES: [wgpu::VertexAttribute; 5] = wgpu::vertex_attr_array![
        1 => Float32x4,
        2 => Float32x4,
        3 => Float32x4,
        4 => Float32x4,
        5 => Float32x4
    ];

    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: Self::SIZE as u64,
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: &Self::ATTRIBUTES,
        }
    }

    pub fn model(&self) -> Mat4 {
        Mat4::from_cols_array_2d(&self.model)
    }
}

const POSITION_ATTRIBUTES: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![0 => Float32x3];

/// Layout of the static unit-shape buffer.
pub fn vertex_layout() -> wgpu::VertexBufferLayout<'static> {
    wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<[f32; 3]>() as u64,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &POSITION_ATTRIBUTES,
    }
}

/// All unit shapes as one line list.
#[derive(Debug, Clone)]
pub struct GizmoMesh {
    vertices: Vec<[f32; 3]>,
    ranges: [Range<u32>; 5],
}

fn push_circle(out: &mut Vec<[f32; 3]>, point: impl Fn(f32, f32) -> Vec3) {
    for i in 0..CIRCLE_SEGMENTS {
        let a0 = i as f32 / CIRCLE_SEGMENTS as f32 * TAU;
        let a1 = (i + 1) as f32 / CIRCLE_SEGMENTS as f32 * TAU;
        out.push(point(a0.cos(), a0.sin()).to_array());
        out.push(point(a1.cos(), a1.sin()).to_array());
    }
}

fn tessellate(kind: GizmoKind, out: &mut Vec<[f32; 3]>) {
    match kind {
        // Unit segment along +Z.
        GizmoKind::Line => {
            out.push([0.0, 0.0, 0.0]);
            out.push([0.0, 0.0, 1.0]);
        }
        // Edges of the [-1, 1] cube.
        GizmoKind::Cube => {
            for axis in 0..3 {
                let (u, v) = ((axis + 1) % 3, (axis + 2) % 3);
                for (su, sv) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
                    let mut a = [0.0f32; 3];
                    a[u] = su;
                    a[v] = sv;
                    let mut b = a;
                    a[axis] = -1.0;
                    b[axis] = 1.0;
                    out.push(a);
                    out.push(b);
                }
            }
        }
        // Three great circles of the unit sphere.
        GizmoKind::Sphere => {
            push_circle(out, |c, s| Vec3::new(c, s, 0.0));
            push_circle(out, |c, s| Vec3::new(c, 0.0, s));
            push_circle(out, |c, s| Vec3::new(0.0, c, s));
        }
        // [-1, 1] square in XY.
        GizmoKind::Rect => {
            let corners = [[-1.0, -1.0, 0.0], [1.0, -1.0, 0.0], [1.0, 1.0, 0.0], [-1.0, 1.0, 0.0]];
            for i in 0..4 {
                out.push(corners[i]);
                out.push(corners[(i + 1) % 4]);
            }
        }
        // Unit circle in XY.
        GizmoKind::Circle => push_circle(out, |c, s| Vec3::new(c, s, 0.0)),
    }
}

impl GizmoMesh {
    pub fn unit_shapes() -> Self {
        let mut vertices = Vec::new();
        let ranges = GizmoKind::ALL.map(|kind| {
            let start = vertices.len() as u32;
            tessellate(kind, &mut vertices);
            start..vertices.len() as u32
        });
        Self { vertices, ranges }
    }

    pub fn vertices(&self) -> &[[f32; 3]] {
        &self.vertices
    }

    /// Vertex range of `kind` in the shared buffer.
    pub fn range(&self, kind: GizmoKind) -> Range<u32> {
        self.ranges[kind as usize].clone()
    }
}

/// Rotation taking +Z onto `dir`, well defined for antiparallel input.
fn rotate_z_to(dir: Vec3) -> Quat {
    if dir.dot(Vec3::Z) < -0.9999 {
        Quat::from_rotation_x(std::f32::consts::PI)
    } else {
        Quat::from_rotation_arc(Vec3::Z, dir)
    }
}

/// Model matrix mapping the unit shape of `gizmo` into world space.
pub fn model_matrix(gizmo: &Gizmo) -> Mat4 {
    match gizmo.shape {
        GizmoShape::Line { from, to } => {
            let delta = to - from;
            let length = delta.length();
            if length <= f32::EPSILON {
                return Mat4::from_translation(from) * Mat4::from_scale(Vec3::ZERO);
            }
            Mat4::from_scale_rotation_translation(
                Vec3::new(1.0, 1.0, length),
                rotate_z_to(delta / length),
                from,
            )
        }
        GizmoShape::Cube { center, half_extents } => {
            Mat4::from_scale_rotation_translation(half_extents, Quat::IDENTITY, center)
        }
        GizmoShape::Sphere { center, radius } => {
            Mat4::from_scale_rotation_translation(Vec3::splat(radius), Quat::IDENTITY, center)
        }
        GizmoShape::Rect {
            center,
            half_size,
            rotation,
        } => Mat4::from_scale_rotation_translation(half_size.extend(1.0), rotation, center),
        GizmoShape::Circle {
            center,
            radius,
            normal,
        } => Mat4::from_scale_rotation_translation(
            Vec3::splat(radius),
            rotate_z_to(normal.try_normalize().unwrap_or(Vec3::Z)),
            center,
        ),
    }
}

/// One instanced draw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GizmoDraw {
    pub kind: GizmoKind,
    pub vertices: Range<u32>,
    pub instances: Range<u32>,
}

/// Instances grouped by kind, ready for upload.
#[derive(Debug, Clone, Default)]
pub struct GizmoBatch {
    pub instances: Vec<GizmoInstance>,
    pub draws: Vec<GizmoDraw>,
}

impl GizmoBatch {
    pub fn build(mesh: &GizmoMesh, gizmos: &[Gizmo]) -> Self {
        let mut batch = Self::default();
        for kind in GizmoKind::ALL {
            let start = batch.instances.len() as u32;
            batch.instances.extend(gizmos.iter().filter(|g| g.kind() == kind).map(|g| GizmoInstance {
                model: model_matrix(g).to_cols_array_2d(),
                color: g.color.to_array(),
            }));
            let end = batch.instances.len() as u32;
            if end > start {
                batch.draws.push(GizmoDraw {
                    kind,
                    vertices: mesh.range(kind),
                    instances: start..end,
                });
            }
        }
        batch
    }

    pub fn is_empty(&self) -> bool {
        self.draws.is_empty()
    }
}

/// GPU buffers for gizmo drawing.
pub struct GizmoBuffers {
    mesh: GizmoMesh,
    vertices: GpuBuffer,
    instances: GpuBuffer,
    draws: Vec<GizmoDraw>,
}

const INSTANCE_USAGE: wgpu::BufferUsages = wgpu::BufferUsages::VERTEX.union(wgpu::BufferUsages::COPY_DST);

impl GizmoBuffers {
    pub fn new(device: &wgpu::Device) -> Result<Self> {
        let mesh = GizmoMesh::unit_shapes();
        let vertices = GpuBuffer::with_data(
            device,
            "gizmo_vertices",
            bytemuck::cast_slice(mesh.vertices()),
            wgpu::BufferUsages::VERTEX,
        )
        .map_err(RenderError::from_gpu)?;
        let instances = GpuBuffer::new(device, "gizmo_instances", 64 * GizmoInstance::SIZE as u64, INSTANCE_USAGE)
            .map_err(RenderError::from_gpu)?;
        Ok(Self {
            mesh,
            vertices,
            instances,
            draws: Vec::new(),
        })
    }

    /// Batch and upload this frame's gizmos.
    pub fn upload(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        gizmos: &[Gizmo],
        ceiling: u64,
    ) -> Result<()> {
        let batch = GizmoBatch::build(&self.mesh, gizmos);
        let bytes: &[u8] = bytemuck::cast_slice(&batch.instances);
        if let Some(size) = grown_size("gizmo_instances", self.instances.size(), bytes.len() as u64, 2.0, ceiling)
            .map_err(RenderError::from_gpu)?
        {
            // Rewritten every frame, so nothing to copy.
            self.instances = GpuBuffer::new_unscoped(device, "gizmo_instances", size, INSTANCE_USAGE);
        }
        self.instances.write(queue, 0, bytes).map_err(RenderError::from_gpu)?;
        self.draws = batch.draws;
        Ok(())
    }

    pub fn draws(&self) -> &[GizmoDraw] {
        &self.draws
    }

    /// Record the instanced draws into an open render pass.
    pub fn draw(&self, pass: &mut wgpu::RenderPass<'_>) {
        pass.set_vertex_buffer(0, self.vertices.buffer().slice(..));
        pass.set_vertex_buffer(1, self.instances.buffer().slice(..));
        for draw in &self.draws {
            pass.draw(draw.vertices.clone(), draw.instances.clone());
        }
    }
}
