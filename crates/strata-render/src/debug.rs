//! Debug and render mode selection written into the camera uniform.

/// Debug overlay drawn by the optional debug pass.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DebugMode {
    /// No overlay (default).
    #[default]
    None = 0,
    /// BVH node wireframes; leaves green, inner nodes orange.
    Bvh = 1,
    /// Instance world-space bounds.
    Instances = 2,
    /// Screen-space markers at point and spot light positions.
    Lights = 3,
}

impl DebugMode {
    /// Cycle to the next debug mode.
    #[must_use]
    pub fn next(self) -> Self {
        match self {
            Self::None => Self::Bvh,
            Self::Bvh => Self::Instances,
            Self::Instances => Self::Lights,
            Self::Lights => Self::None,
        }
    }

    /// Get the mode as a u32 for the camera uniform.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }
}

/// What the deferred lighting pass outputs.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderMode {
    #[default]
    Lit = 0,
    Albedo = 1,
    Normals = 2,
    /// Depth, normal, material and position in four quadrants.
    GBufferTiles = 3,
}

impl RenderMode {
    #[must_use]
    pub fn next(self) -> Self {
        match self {
            Self::Lit => Self::Albedo,
            Self::Albedo => Self::Normals,
            Self::Normals => Self::GBufferTiles,
            Self::GBufferTiles => Self::Lit,
        }
    }

    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_mode_cycles() {
        let mut mode = DebugMode::None;
        for _ in 0..4 {
            mode = mode.next();
        }
        assert_eq!(mode, DebugMode::None);
    }

    #[test]
    fn render_mode_values_match_shader() {
        assert_eq!(RenderMode::Lit.as_u32(), 0);
        assert_eq!(RenderMode::Albedo.as_u32(), 1);
        assert_eq!(RenderMode::Normals.as_u32(), 2);
        assert_eq!(RenderMode::GBufferTiles.as_u32(), 3);
    }
}
