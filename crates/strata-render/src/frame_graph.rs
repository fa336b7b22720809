//! Per-frame pass planning.
//!
//! A frame is a fixed sequence of concrete pass records. Planning is pure:
//! it only decides which passes run and how large their dispatches are. The
//! renderer walks the plan and encodes each record.

use std::fmt;

/// Compute dispatch or raster pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    Compute,
    Render,
}

/// Every pass of the frame, in submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PassId {
    GBuffer,
    Shadow,
    HiZ,
    Lighting,
    Debug,
    Blit,
    Accumulation,
    Resolve,
    Gizmo,
}

impl PassId {
    pub const fn kind(self) -> PassKind {
        match self {
            Self::GBuffer | Self::Shadow | Self::HiZ | Self::Lighting | Self::Debug => PassKind::Compute,
            Self::Blit | Self::Accumulation | Self::Resolve | Self::Gizmo => PassKind::Render,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::GBuffer => "gbuffer",
            Self::Shadow => "shadow",
            Self::HiZ => "hiz",
            Self::Lighting => "lighting",
            Self::Debug => "debug",
            Self::Blit => "blit",
            Self::Accumulation => "accumulation",
            Self::Resolve => "resolve",
            Self::Gizmo => "gizmo",
        }
    }
}

impl fmt::Display for PassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One planned pass. Compute passes carry one workgroup count per dispatch;
/// the Hi-Z pass dispatches once per pyramid level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassRecord {
    pub id: PassId,
    pub kind: PassKind,
    pub workgroups: Vec<[u32; 3]>,
}

impl PassRecord {
    fn compute(id: PassId, workgroups: Vec<[u32; 3]>) -> Self {
        Self {
            id,
            kind: PassKind::Compute,
            workgroups,
        }
    }

    fn render(id: PassId) -> Self {
        Self {
            id,
            kind: PassKind::Render,
            workgroups: Vec::new(),
        }
    }
}

/// What the plan depends on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameInputs {
    pub width: u32,
    pub height: u32,
    pub shadow_map_size: u32,
    /// Lights whose shadow layers are re-rendered this frame.
    pub shadow_updates: u32,
    pub hiz_sizes: Vec<(u32, u32)>,
    pub debug: bool,
    pub gizmos: bool,
}

const fn tiles(width: u32, height: u32, depth: u32) -> [u32; 3] {
    [width.div_ceil(8), height.div_ceil(8), depth]
}

/// Plan the frame.
pub fn plan(inputs: &FrameInputs) -> Vec<PassRecord> {
    let screen = tiles(inputs.width.max(1), inputs.height.max(1), 1);
    let mut passes = vec![PassRecord::compute(PassId::GBuffer, vec![screen])];

    if inputs.shadow_updates > 0 {
        passes.push(PassRecord::compute(
            PassId::Shadow,
            vec![tiles(inputs.shadow_map_size, inputs.shadow_map_size, inputs.shadow_updates)],
        ));
    }

    passes.push(PassRecord::compute(
        PassId::HiZ,
        inputs.hiz_sizes.iter().map(|&(w, h)| tiles(w, h, 1)).collect(),
    ));
    passes.push(PassRecord::compute(PassId::Lighting, vec![screen]));
    if inputs.debug {
        passes.push(PassRecord::compute(PassId::Debug, vec![screen]));
    }
    passes.push(PassRecord::render(PassId::Blit));
    passes.push(PassRecord::render(PassId::Accumulation));
    passes.push(PassRecord::render(PassId::Resolve));
    if inputs.gizmos {
        passes.push(PassRecord::render(PassId::Gizmo));
    }
    passes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::targets::hiz_mip_sizes;

    fn inputs() -> FrameInputs {
        FrameInputs {
            width: 100,
            height: 60,
            shadow_map_size: 1024,
            shadow_updates: 3,
            hiz_sizes: hiz_mip_sizes(100, 60),
            debug: true,
            gizmos: true,
        }
    }

    #[test]
    fn full_frame_order() {
        let ids: Vec<_> = plan(&inputs()).iter().map(|p| p.id).collect();
        assert_eq!(
            ids,
            vec![
                PassId::GBuffer,
                PassId::Shadow,
                PassId::HiZ,
                PassId::Lighting,
                PassId::Debug,
                PassId::Blit,
                PassId::Accumulation,
                PassId::Resolve,
                PassId::Gizmo,
            ]
        );
        let passes = plan(&inputs());
        assert!(passes.windows(2).all(|w| w[0].id < w[1].id));
        assert!(passes.iter().all(|p| p.kind == p.id.kind()));
    }

    #[test]
    fn dispatch_sizes() {
        let passes = plan(&inputs());
        assert_eq!(passes[0].workgroups, vec![[13, 8, 1]]);
        assert_eq!(passes[1].workgroups, vec![[128, 128, 3]]);
        let hiz = &passes[2];
        assert_eq!(hiz.workgroups.len(), hiz_mip_sizes(100, 60).len());
        assert_eq!(hiz.workgroups[0], [7, 4, 1]);
        assert_eq!(*hiz.workgroups.last().unwrap(), [1, 1, 1]);
    }

    #[test]
    fn optional_passes_drop_out() {
        let minimal = FrameInputs {
            shadow_updates: 0,
            debug: false,
            gizmos: false,
            ..inputs()
        };
        let ids: Vec<_> = plan(&minimal).iter().map(|p| p.id).collect();
        assert_eq!(
            ids,
            vec![
                PassId::GBuffer,
                PassId::HiZ,
                PassId::Lighting,
                PassId::Blit,
                PassId::Accumulation,
                PassId::Resolve,
            ]
        );
    }
}
