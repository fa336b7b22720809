//! Gizmo descriptions submitted by tools and debug code.

use glam::{Quat, Vec2, Vec3, Vec4};

/// Unit shape drawn for a gizmo.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GizmoKind {
    Line = 0,
    Cube = 1,
    Sphere = 2,
    Rect = 3,
    Circle = 4,
}

impl GizmoKind {
    pub const ALL: [Self; 5] = [Self::Line, Self::Cube, Self::Sphere, Self::Rect, Self::Circle];
}

/// Placement of a gizmo.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GizmoShape {
    Line { from: Vec3, to: Vec3 },
    Cube { center: Vec3, half_extents: Vec3 },
    Sphere { center: Vec3, radius: f32 },
    /// Rectangle in the local XY plane.
    Rect { center: Vec3, half_size: Vec2, rotation: Quat },
    /// Circle around `normal`.
    Circle { center: Vec3, radius: f32, normal: Vec3 },
}

/// A colored gizmo.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gizmo {
    pub shape: GizmoShape,
    pub color: Vec4,
}

impl Gizmo {
    pub const fn line(from: Vec3, to: Vec3, color: Vec4) -> Self {
        Self {
            shape: GizmoShape::Line { from, to },
            color,
        }
    }

    pub const fn cube(center: Vec3, half_extents: Vec3, color: Vec4) -> Self {
        Self {
            shape: GizmoShape::Cube { center, half_extents },
            color,
        }
    }

    pub const fn sphere(center: Vec3, radius: f32, color: Vec4) -> Self {
        Self {
            shape: GizmoShape::Sphere { center, radius },
            color,
        }
    }

    pub const fn rect(center: Vec3, half_size: Vec2, rotation: Quat, color: Vec4) -> Self {
        Self {
            shape: GizmoShape::Rect {
                center,
                half_size,
                rotation,
            },
            color,
        }
    }

    pub const fn circle(center: Vec3, radius: f32, normal: Vec3, color: Vec4) -> Self {
        Self {
            shape: GizmoShape::Circle {
                center,
                radius,
                normal,
            },
            color,
        }
    }

    pub const fn kind(&self) -> GizmoKind {
        match self.shape {
            GizmoShape::Line { .. } => GizmoKind::Line,
            GizmoShape::Cube { .. } => GizmoKind::Cube,
            GizmoShape::Sphere { .. } => GizmoKind::Sphere,
            GizmoShape::Rect { .. } => GizmoKind::Rect,
            GizmoShape::Circle { .. } => GizmoKind::Circle,
        }
    }
}
