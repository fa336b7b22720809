//! WGSL shader sources for the Strata renderer.
//!
//! WGSL has no include mechanism, so each pipeline's source is the
//! concatenation of the shared record layouts, the bind group declarations it
//! needs and the pass body. Everything is embedded at compile time.

use strata_core::constants::FAR_DEPTH;

/// Name of the pipeline-overridable WBOIT depth-weight exponent.
pub const TRANSPARENCY_POWER_CONSTANT: &str = "TRANSPARENCY_POWER";

macro_rules! wgsl {
    ($($file:literal),+ $(,)?) => {
        concat!($(include_str!(concat!("../wgsl/", $file)), "\n"),+)
    };
}

/// Raymarching passes: shared types, scene group 0, voxel group 2 and the
/// hierarchical traversal, followed by the pass body.
macro_rules! raymarch_wgsl {
    ($pass:literal) => {
        wgsl!("types.wgsl", "scene.wgsl", "voxel.wgsl", "traverse.wgsl", $pass)
    };
}

pub const GBUFFER_WGSL: &str = raymarch_wgsl!("gbuffer.wgsl");
pub const SHADOW_WGSL: &str = raymarch_wgsl!("shadow.wgsl");
pub const LIGHTING_WGSL: &str = raymarch_wgsl!("lighting.wgsl");
pub const OVERLAY_WGSL: &str = raymarch_wgsl!("overlay.wgsl");
pub const DEBUG_WGSL: &str = wgsl!("types.wgsl", "scene.wgsl", "debug.wgsl");
pub const PARTICLES_WGSL: &str = wgsl!("types.wgsl", "scene.wgsl", "particles.wgsl");
pub const HIZ_WGSL: &str = wgsl!("types.wgsl", "hiz.wgsl");
pub const BLIT_WGSL: &str = wgsl!("types.wgsl", "blit.wgsl");
pub const RESOLVE_WGSL: &str = wgsl!("types.wgsl", "resolve.wgsl");
pub const GIZMO_WGSL: &str = wgsl!("gizmo.wgsl");

#[inline]
pub fn gbuffer_wgsl() -> &'static str {
    GBUFFER_WGSL
}

#[inline]
pub fn shadow_wgsl() -> &'static str {
    SHADOW_WGSL
}

#[inline]
pub fn lighting_wgsl() -> &'static str {
    LIGHTING_WGSL
}

#[inline]
pub fn overlay_wgsl() -> &'static str {
    OVERLAY_WGSL
}

#[inline]
pub fn debug_wgsl() -> &'static str {
    DEBUG_WGSL
}

#[inline]
pub fn particles_wgsl() -> &'static str {
    PARTICLES_WGSL
}

#[inline]
pub fn hiz_wgsl() -> &'static str {
    HIZ_WGSL
}

#[inline]
pub fn blit_wgsl() -> &'static str {
    BLIT_WGSL
}

#[inline]
pub fn resolve_wgsl() -> &'static str {
    RESOLVE_WGSL
}

#[inline]
pub fn gizmo_wgsl() -> &'static str {
    GIZMO_WGSL
}

/// Far depth constant as written in WGSL.
pub fn far_depth_literal() -> String {
    format!("const FAR_DEPTH: f32 = {FAR_DEPTH:.1};")
}
