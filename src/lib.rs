//! # Cumulus
//!
//! **Real-time volumetric smoke and fire on wgpu.**
//!
//! Opaque geometry is drawn into an HDR target, animated density and
//! temperature fields are raymarched on top of it, and the result goes
//! through a compute bright pass, a bloom mip chain, and a tone-mapped
//! composite onto the swapchain.
//!
//! ```no_run
//! use cumulus::*;
//!
//! fn main() -> Result<(), AppError> {
//!     run(AppConfig::new().title("Plume").size(1280, 720))
//! }
//! ```
//!
//! Embedders drive [`FrameRenderer`] directly: build a [`Scene`], attach an
//! [`AnimatedVolume`] to a node, then call [`FrameRenderer::render`] once per
//! frame after advancing an [`AnimationClock`]. Without a window,
//! [`FrameRenderer::with_device`] and [`FrameRenderer::render_to_view`] draw
//! into any texture view.

mod app;
mod cache;
mod clock;
mod diagnostics;
mod error;
mod gpu;
mod mesh;
mod pipelines;
mod plan;
mod preparer;
mod renderer;
pub mod scene;
mod settings;
mod shaders;
mod targets;
pub mod volume;

pub use app::{AppConfig, DemoScene, apply_key, orbit_transform, run};
pub use cache::ResourceCache;
pub use clock::AnimationClock;
pub use diagnostics::{PassTimings, TimestampQueries, pass_durations};
pub use error::{AppError, GpuError, RenderError, Result, ShaderError, VolumeError};
pub use gpu::{DeviceLossFlag, GpuContext};
pub use mesh::{Mesh, MeshData, Transform, Vertex};
pub use pipelines::PipelineSet;
pub use plan::{FramePlan, PassStep, Submission, TimedPass};
pub use preparer::{GpuResourcePreparer, GpuTexture};
pub use renderer::{FrameRenderer, FrameStats, volume_matrices};
pub use scene::{Camera, Material, Model, Primitive, Scene};
pub use settings::{NoiseType, RenderSettings, ResolutionFactor, StepCount};
pub use shaders::ShaderLibrary;
pub use targets::{RenderTargets, TargetKey, TargetTracker, bloom_mip_count};
pub use volume::{AnimatedVolume, GpuVolume, VolumeResource, VoxelExtent, VoxelGrid};

// Re-export glam math types for convenience
pub use glam::{Mat4, Quat, Vec3};

// Scene nodes are hecs entities
pub use hecs::{Entity, World};
