//! Scene description for the Strata renderer.
//!
//! This crate provides:
//! - The scene container with stable object handles
//! - Directional, point and spot lights
//! - Instance BVH construction
//! - Gizmo and particle descriptions
//! - Procedural demo scene generation

pub mod bvh;
pub mod generation;
pub mod gizmo;
pub mod light;
pub mod scene;

pub use bvh::{Bvh, BvhNode};
pub use gizmo::{Gizmo, GizmoKind, GizmoShape};
pub use light::{Light, LightType};
pub use scene::{ObjectHandle, Particle, Scene, SceneHit};
