//! Weighted blended order-independent transparency.
//!
//! Producers (the transparent overlay and particles) add premultiplied,
//! depth-weighted colour into `Accum` and the weight into `Weight`; the
//! resolve pass normalises. The functions here mirror the WGSL so the
//! composition can be checked on the CPU.

use glam::{Vec3, Vec4};

use crate::targets::{ACCUM_FORMAT, WEIGHT_FORMAT};

/// Smallest contribution weight, so fully transparent fragments still count.
pub const MIN_WEIGHT: f32 = 1e-3;

/// Weight floor used when resolving.
pub const RESOLVE_EPSILON: f32 = 1e-5;

/// Additive blend for both OIT targets: `src * 1 + dst * 1`.
pub const ADDITIVE: wgpu::BlendState = wgpu::BlendState {
    color: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::One,
        dst_factor: wgpu::BlendFactor::One,
        operation: wgpu::BlendOperation::Add,
    },
    alpha: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::One,
        dst_factor: wgpu::BlendFactor::One,
        operation: wgpu::BlendOperation::Add,
    },
};

/// Colour targets of the accumulation pass: RT0 = Accum, RT1 = Weight.
pub fn accumulation_targets() -> [Option<wgpu::ColorTargetState>; 2] {
    [
        Some(wgpu::ColorTargetState {
            format: ACCUM_FORMAT,
            blend: Some(ADDITIVE),
            write_mask: wgpu::ColorWrites::ALL,
        }),
        Some(wgpu::ColorTargetState {
            format: WEIGHT_FORMAT,
            blend: Some(ADDITIVE),
            write_mask: wgpu::ColorWrites::ALL,
        }),
    ]
}

/// Depth weight of a fragment at ray distance `t` in front of `t_opaque`.
pub fn weight(alpha: f32, t: f32, t_opaque: f32, power: f32) -> f32 {
    let closeness = (1.0 - t / t_opaque).clamp(0.0, 1.0);
    MIN_WEIGHT.max(alpha) * closeness.powf(power)
}

/// CPU model of one pixel of the Accum and Weight targets.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Accumulator {
    pub accum: Vec4,
    pub weight: f32,
}

impl Accumulator {
    /// Add one fragment exactly as the additive blend does.
    pub fn add(&mut self, color: Vec3, alpha: f32, w: f32) {
        self.accum += (color * alpha * w).extend(alpha * w);
        self.weight += alpha * w;
    }

    pub fn resolve(&self, opaque: Vec3) -> Vec4 {
        resolve(opaque, self.accum, self.weight)
    }
}

/// `saturate(opaque + accum.rgb / max(weight, eps))` with alpha 1.
pub fn resolve(opaque: Vec3, accum: Vec4, weight: f32) -> Vec4 {
    let rgb = opaque + accum.truncate() / weight.max(RESOLVE_EPSILON);
    rgb.clamp(Vec3::ZERO, Vec3::ONE).extend(1.0)
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn empty_accumulation_leaves_opaque() {
        let opaque = Vec3::new(0.2, 0.4, 0.6);
        let out = Accumulator::default().resolve(opaque);
        assert!(out.abs_diff_eq(opaque.extend(1.0), 1e-6));
    }

    #[test]
    fn half_transparent_layer_adds_its_colour() {
        let opaque = Vec3::new(0.25, 0.0, 0.0);
        let glass = Vec3::new(0.0, 0.5, 0.25);
        let mut acc = Accumulator::default();
        acc.add(glass, 0.5, weight(0.5, 6.0, 10.0, 8.0));
        let out = acc.resolve(opaque);
        assert!(out.truncate().abs_diff_eq(opaque + glass, 1e-4));
        assert_abs_diff_eq!(out.w, 1.0);
    }

    #[test]
    fn composition_is_order_independent() {
        let fragments = [
            (Vec3::new(1.0, 0.0, 0.0), 0.5, 2.0),
            (Vec3::new(0.0, 1.0, 0.0), 0.3, 4.0),
            (Vec3::new(0.0, 0.0, 1.0), 0.8, 7.0),
        ];
        let run = |order: &[usize]| {
            let mut acc = Accumulator::default();
            for &i in order {
                let (color, alpha, t) = fragments[i];
                acc.add(color, alpha, weight(alpha, t, 10.0, 8.0));
            }
            acc.resolve(Vec3::splat(0.1))
        };
        let a = run(&[0, 1, 2]);
        let b = run(&[2, 0, 1]);
        let c = run(&[1, 2, 0]);
        assert!(a.abs_diff_eq(b, 1e-5));
        assert!(a.abs_diff_eq(c, 1e-5));
    }

    #[test]
    fn weight_falls_off_towards_opaque_depth() {
        let near = weight(0.5, 1.0, 10.0, 8.0);
        let far = weight(0.5, 9.0, 10.0, 8.0);
        assert!(near > far);
        assert_abs_diff_eq!(weight(0.5, 10.0, 10.0, 8.0), 0.0);
        assert_abs_diff_eq!(weight(0.0, 0.0, 10.0, 8.0), MIN_WEIGHT);
    }

    #[test]
    fn resolve_saturates() {
        let out = resolve(Vec3::splat(0.9), Vec4::new(1.0, 1.0, 1.0, 1.0), 0.5);
        assert!(out.abs_diff_eq(Vec4::ONE, 1e-6));
    }
}
