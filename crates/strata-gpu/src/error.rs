//! GPU error types.

use thiserror::Error;

/// GPU-related errors.
#[derive(Error, Debug)]
pub enum GpuError {
    /// No adapter satisfies the requested options.
    #[error("No suitable GPU adapter found")]
    NoSuitableAdapter,

    /// The adapter lacks a capability the renderer depends on.
    #[error("Adapter does not meet requirements: {0}")]
    Unsupported(String),

    /// Device request failed.
    #[error("Device request failed: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),

    /// Buffer or texture creation failed.
    #[error("Allocation failed: {0}")]
    AllocationFailed(String),

    /// A buffer would have to grow past the configured ceiling.
    #[error("Buffer {label} needs {required} bytes, ceiling is {ceiling}")]
    BufferCeiling {
        label: String,
        required: u64,
        ceiling: u64,
    },

    /// Shader module failed validation.
    #[error("Shader compilation failed: {0}")]
    ShaderCompilation(String),

    /// Pipeline creation failed.
    #[error("Pipeline creation failed: {0}")]
    PipelineCreation(String),

    /// Buffer mapping failed.
    #[error("Buffer map failed: {0}")]
    MapFailed(String),

    /// Invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;
