//! Sparse voxel renderer for Strata.
//!
//! This crate provides:
//! - CPU to GPU reconciliation of voxel objects (slots, payload atlas, hash grid)
//! - Growable storage buffers with deferred release
//! - The frame graph: G-Buffer, shadows, Hi-Z, lighting, transparency, gizmos
//! - Asynchronous Hi-Z readback for CPU occlusion queries
//! - Screenshot capture utilities

pub mod bind_groups;
pub mod buffer_manager;
pub mod camera;
pub mod config;
pub mod debug;
pub mod error;
pub mod frame_graph;
pub mod gizmo;
pub mod gpu_types;
pub mod hiz;
pub mod pipelines;
pub mod renderer;
pub mod scene_upload;
pub mod screenshot;
pub mod shadow;
pub mod targets;
pub mod transparency;
pub mod upload;
pub mod voxel_sync;

pub use buffer_manager::BufferManager;
pub use camera::{Camera, CameraData};
pub use config::RendererConfig;
pub use debug::{DebugMode, RenderMode};
pub use error::{RenderError, Result};
pub use frame_graph::{PassId, PassKind};
pub use hiz::{HiZSnapshot, HiZState};
pub use renderer::{FrameReport, ReadTarget, Renderer};
pub use scene_upload::SceneCounts;
pub use screenshot::{parse_frame_indices, save_rgba8, ScreenshotConfig, ScreenshotError};
pub use upload::{BufferTarget, UploadReport, UploadSink};
pub use voxel_sync::VoxelSync;
