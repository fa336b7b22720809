//! Render error types.

use glam::IVec3;
use strata_gpu::GpuError;
use thiserror::Error;

/// Errors raised by the renderer.
///
/// `PipelineCreation`, `ResourceCreation` and `Gpu` are fatal and propagate.
/// The remaining kinds are recoverable: they are logged, collected in the
/// frame report, and rendering continues from the last consistent state.
#[derive(Error, Debug)]
pub enum RenderError {
    /// Shader compilation or pipeline layout mismatch.
    #[error("pipeline creation failed: {0}")]
    PipelineCreation(String),

    /// Buffer or texture creation failed.
    #[error("resource creation failed: {0}")]
    ResourceCreation(String),

    /// A storage buffer would grow past the safety ceiling.
    #[error("buffer {buffer} needs {required} bytes, ceiling is {ceiling}")]
    BufferCeiling {
        buffer: String,
        required: u64,
        ceiling: u64,
    },

    /// The payload atlas has no free tile.
    #[error("voxel payload atlas exhausted ({capacity} tiles)")]
    AtlasExhaustion { capacity: u32 },

    /// Sector hash grid insertion ran out of probes.
    #[error("sector hash grid overflow at {coords} (object {base_idx}) after {probes} probes")]
    HashOverflow {
        coords: IVec3,
        base_idx: u32,
        probes: u32,
    },

    /// Hi-Z readback mapping failed.
    #[error("hi-z readback map failed: {0}")]
    MapAsyncFailure(String),

    /// Device-level failure.
    #[error(transparent)]
    Gpu(#[from] GpuError),
}

impl RenderError {
    /// Whether rendering can continue after this error.
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::BufferCeiling { .. }
                | Self::AtlasExhaustion { .. }
                | Self::HashOverflow { .. }
                | Self::MapAsyncFailure(_)
        )
    }

    /// Map a GPU-layer error to the renderer's taxonomy.
    pub fn from_gpu(error: GpuError) -> Self {
        match error {
            GpuError::BufferCeiling {
                label,
                required,
                ceiling,
            } => Self::BufferCeiling {
                buffer: label,
                required,
                ceiling,
            },
            GpuError::AllocationFailed(msg) => Self::ResourceCreation(msg),
            GpuError::ShaderCompilation(msg) | GpuError::PipelineCreation(msg) => {
                Self::PipelineCreation(msg)
            }
            GpuError::MapFailed(msg) => Self::MapAsyncFailure(msg),
            other => Self::Gpu(other),
        }
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, RenderError>;
