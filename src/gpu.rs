//! Adapter, device, and swapchain setup.
//!
//! [`GpuContext`] owns the wgpu objects every pass needs: the surface, the
//! device and queue, and the surface configuration. It is created once at
//! startup from a winit window and passed by reference to the renderer.
//!
//! Initialization failures are returned as [`GpuError`] rather than panicking.
//! Timestamp queries are requested only when the adapter supports them, and
//! device loss is latched into a flag the renderer checks at the start of
//! every frame.

use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};

use winit::window::Window;

use crate::error::GpuError;

/// Latched device-loss state, written from the wgpu callback.
#[derive(Clone, Default)]
pub struct DeviceLossFlag {
    lost: Arc<AtomicBool>,
    message: Arc<Mutex<Option<String>>>,
}

impl DeviceLossFlag {
    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }

    /// The reason reported by the driver, if the device has been lost.
    pub fn message(&self) -> Option<String> {
        if !self.is_lost() {
            return None;
        }
        self.message.lock().ok().and_then(|m| m.clone())
    }

    fn mark(&self, reason: String) {
        if let Ok(mut slot) = self.message.lock() {
            *slot = Some(reason);
        }
        self.lost.store(true, Ordering::Release);
    }
}

/// The device, queue, and window surface shared by every pass.
pub struct GpuContext {
    pub surface: wgpu::Surface<'static>,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    /// Swapchain format and size. `width`/`height` track the window.
    pub config: wgpu::SurfaceConfiguration,
    /// Whether `TIMESTAMP_QUERY` was granted on this device.
    pub timestamps: bool,
    pub device_loss: DeviceLossFlag,
}

impl GpuContext {
    /// Picks a high-performance adapter for `window`, opens a device (with
    /// `TIMESTAMP_QUERY` when the adapter has it), and configures an sRGB
    /// Fifo swapchain.
    pub fn new(window: Arc<Window>) -> Result<Self, GpuError> {
        let size = window.inner_size();

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let surface = instance.create_surface(window)?;

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))?;

        let info = adapter.get_info();
        log::info!("using adapter {} ({:?})", info.name, info.backend);

        let timestamps = adapter.features().contains(wgpu::Features::TIMESTAMP_QUERY);
        let required_features = if timestamps {
            wgpu::Features::TIMESTAMP_QUERY
        } else {
            log::info!("adapter lacks TIMESTAMP_QUERY, pass timings disabled");
            wgpu::Features::empty()
        };

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("Cumulus Device"),
            required_features,
            required_limits: wgpu::Limits::default(),
            memory_hints: Default::default(),
            trace: Default::default(),
            experimental_features: Default::default(),
        }))?;

        let device_loss = DeviceLossFlag::default();
        let flag = device_loss.clone();
        device.set_device_lost_callback(move |reason, message| {
            log::error!("device lost ({reason:?}): {message}");
            flag.mark(message);
        });

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .or_else(|| surface_caps.formats.first())
            .copied()
            .ok_or(GpuError::UnsupportedSurface)?;
        let alpha_mode = surface_caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        Ok(Self {
            surface,
            device,
            queue,
            config,
            timestamps,
            device_loss,
        })
    }

    /// Reconfigures the swapchain for a new window size.
    ///
    /// Ignores zero-sized dimensions (a minimized window).
    pub fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.config.width = width;
            self.config.height = height;
            self.surface.configure(&self.device, &self.config);
        }
    }

    /// Reapplies the current configuration after a lost or outdated surface.
    pub fn reconfigure(&self) {
        self.surface.configure(&self.device, &self.config);
    }

    pub fn width(&self) -> u32 {
        self.config.width
    }

    pub fn height(&self) -> u32 {
        self.config.height
    }

    /// Swapchain width over height, for the camera projection.
    pub fn aspect(&self) -> f32 {
        self.config.width as f32 / self.config.height as f32
    }
}

/// A surfaceless device for GPU-backed tests.
///
/// Returns `None` when no adapter is available or it cannot run compute
/// passes with `Rgba16Float` storage writes, so callers skip instead of fail.
#[cfg(test)]
pub(crate) fn headless_device() -> Option<(wgpu::Device, wgpu::Queue)> {
    headless_device_with(wgpu::Features::empty())
}

/// Like [`headless_device`], also `None` when the adapter lacks `features`.
#[cfg(test)]
pub(crate) fn headless_device_with(features: wgpu::Features) -> Option<(wgpu::Device, wgpu::Queue)> {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions::default())).ok()?;

    let compute = adapter
        .get_downlevel_capabilities()
        .flags
        .contains(wgpu::DownlevelFlags::COMPUTE_SHADERS);
    let storage = adapter
        .get_texture_format_features(crate::targets::HDR_FORMAT)
        .allowed_usages
        .contains(wgpu::TextureUsages::STORAGE_BINDING);
    if !compute || !storage || !adapter.features().contains(features) {
        log::warn!("adapter {} cannot run the pass chain, skipping", adapter.get_info().name);
        return None;
    }

    pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
        label: Some("Headless Test Device"),
        required_features: features,
        required_limits: adapter.limits(),
        ..Default::default()
    }))
    .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loss_flag_latches_the_reason() {
        let flag = DeviceLossFlag::default();
        assert!(!flag.is_lost());
        assert_eq!(flag.message(), None);

        let shared = flag.clone();
        shared.mark("driver reset".to_string());
        assert!(flag.is_lost());
        assert_eq!(flag.message().as_deref(), Some("driver reset"));
    }
}
