//! Error types for the renderer.
//!
//! Errors are split by when they can happen:
//!
//! - [`GpuError`]: adapter and device acquisition. Fatal; nothing renders without a device.
//! - [`ShaderError`]: shader source fetch, reported immediately as a typed failure.
//! - [`VolumeError`]: raw voxel data that does not match the declared grid extent.
//! - [`RenderError`]: pipeline compilation (fatal at initialization) and the
//!   per-frame channel for surface and device loss.
//! - [`AppError`]: everything that can stop the demo binary.

use std::path::PathBuf;

use thiserror::Error;

use crate::volume::VoxelExtent;

/// Failures while acquiring the GPU.
#[derive(Error, Debug)]
pub enum GpuError {
    /// The window surface could not be created.
    #[error("failed to create surface: {0}")]
    Surface(#[from] wgpu::CreateSurfaceError),

    /// No adapter compatible with the surface was found.
    #[error("no compatible GPU adapter: {0}")]
    NoAdapter(#[from] wgpu::RequestAdapterError),

    /// The adapter refused to create a device.
    #[error("failed to create device: {0}")]
    Device(#[from] wgpu::RequestDeviceError),

    /// The surface reports no supported formats for this adapter.
    #[error("surface is not supported by the selected adapter")]
    UnsupportedSurface,
}

/// Failures while fetching shader sources.
#[derive(Error, Debug)]
pub enum ShaderError {
    #[error("failed to read shader '{}': {source}", path.display())]
    Fetch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failures while constructing voxel grids or animated volumes.
#[derive(Error, Debug)]
pub enum VolumeError {
    /// A grid was built from a byte buffer whose length is not `width * height * depth`.
    #[error("voxel data is {actual} bytes, expected {expected} for a {width}x{height}x{depth} grid")]
    LengthMismatch {
        expected: usize,
        actual: usize,
        width: u32,
        height: u32,
        depth: u32,
    },

    /// A raw stream is not a whole number of frames.
    #[error("raw stream of {len} bytes is not a multiple of the {frame_len}-byte frame size")]
    PartialFrame { len: usize, frame_len: usize },

    /// No frames were supplied.
    #[error("volume data contains no frames")]
    Empty,

    /// Density and temperature sequences have different lengths.
    #[error("density has {density} frames but temperature has {temperature}")]
    FrameCountMismatch { density: usize, temperature: usize },

    /// Frames of one animated volume do not share a single grid extent.
    #[error("frame {index} is {found}, expected {expected}")]
    ExtentMismatch {
        index: usize,
        expected: VoxelExtent,
        found: VoxelExtent,
    },

    /// A grid dimension is zero.
    #[error("voxel extent must be non-zero, got {width}x{height}x{depth}")]
    ZeroExtent { width: u32, height: u32, depth: u32 },

    #[error("failed to read volume data '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failures while building pipelines or rendering a frame.
#[derive(Error, Debug)]
pub enum RenderError {
    /// A pipeline failed validation (usually a shader compile error). Fatal at startup.
    #[error("failed to build the {label} pipeline: {message}")]
    Pipeline { label: &'static str, message: String },

    /// The swapchain image could not be acquired. The frame is skipped.
    #[error("surface error: {0}")]
    Surface(#[from] wgpu::SurfaceError),

    /// The device was lost. Distinct from initialization failures so the
    /// caller can decide to rebuild the renderer.
    #[error("GPU device lost: {0}")]
    DeviceLost(String),

    /// The entity passed as the camera has no `Camera` component.
    #[error("entity {0:?} is not a camera")]
    MissingCamera(hecs::Entity),

    /// A scene operation referenced a despawned node.
    #[error("scene node does not exist")]
    MissingNode(#[from] hecs::NoSuchEntity),

    #[error(transparent)]
    Shader(#[from] ShaderError),

    #[error(transparent)]
    Volume(#[from] VolumeError),

    #[error(transparent)]
    Gpu(#[from] GpuError),
}

/// Failures that end the demo application.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("event loop error: {0}")]
    EventLoop(#[from] winit::error::EventLoopError),

    #[error("failed to create window: {0}")]
    Window(#[from] winit::error::OsError),

    #[error(transparent)]
    Render(#[from] RenderError),
}

impl From<GpuError> for AppError {
    fn from(err: GpuError) -> Self {
        AppError::Render(err.into())
    }
}

impl From<VolumeError> for AppError {
    fn from(err: VolumeError) -> Self {
        AppError::Render(err.into())
    }
}

impl From<ShaderError> for AppError {
    fn from(err: ShaderError) -> Self {
        AppError::Render(err.into())
    }
}

impl RenderError {
    /// Whether the renderer can keep going after this error (possibly after
    /// reconfiguring the surface).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RenderError::Surface(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated)
                | RenderError::Surface(wgpu::SurfaceError::Timeout)
        )
    }
}

pub type Result<T, E = RenderError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_mismatch_message_names_the_extent() {
        let err = VolumeError::LengthMismatch {
            expected: 32768,
            actual: 100,
            width: 32,
            height: 32,
            depth: 32,
        };
        let text = err.to_string();
        assert!(text.contains("32x32x32"));
        assert!(text.contains("100"));
    }

    #[test]
    fn surface_loss_is_recoverable_but_device_loss_is_not() {
        assert!(RenderError::Surface(wgpu::SurfaceError::Lost).is_recoverable());
        assert!(RenderError::Surface(wgpu::SurfaceError::Outdated).is_recoverable());
        assert!(!RenderError::Surface(wgpu::SurfaceError::OutOfMemory).is_recoverable());
        assert!(!RenderError::DeviceLost("removed".into()).is_recoverable());
    }
}
