//! The interactive demo: a window, an orbiting camera, and one animated volume.
//!
//! [`run`] opens the window and drives [`FrameRenderer`] from winit's event
//! loop. Volume data comes from two raw streams when [`AppConfig::volume_data`]
//! is set, and from a procedural plume otherwise.
//!
//! # Keys
//!
//! | Key   | Action                                  |
//! |-------|-----------------------------------------|
//! | Space | pause or resume the animation           |
//! | R     | cycle the resolution factor             |
//! | N     | cycle the noise type                    |
//! | B     | show the raw noise instead of density   |
//! | F     | switch volume sampling linear / nearest |
//!
//! With [`AppConfig::shader_dir`] set, the shader directory is checked for
//! edits every half second and the pipelines are rebuilt on change. A shader
//! that fails to build is logged and the previous pipelines stay in use.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use glam::Vec3;
use hecs::Entity;
use winit::application::ApplicationHandler;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowAttributes, WindowId};

use crate::clock::AnimationClock;
use crate::error::{AppError, RenderError, VolumeError};
use crate::gpu::GpuContext;
use crate::mesh::{MeshData, Transform};
use crate::renderer::FrameRenderer;
use crate::scene::{Camera, Material, Model, Scene, checker_image};
use crate::settings::RenderSettings;
use crate::shaders::ShaderLibrary;
use crate::volume::{AnimatedVolume, VoxelExtent, read_raw_frames};

const PROCEDURAL_FRAMES: usize = 70;
const PROCEDURAL_SEED: u32 = 7;
const ORBIT_RADIUS: f32 = 18.0;
const ORBIT_HEIGHT: f32 = 6.0;
/// Radians per second.
const ORBIT_SPEED: f32 = 0.1;
const VOLUME_CENTER: Vec3 = Vec3::new(0.0, 4.7, 0.0);
const TIMING_LOG_INTERVAL: Duration = Duration::from_secs(2);
const SHADER_CHECK_INTERVAL: Duration = Duration::from_millis(500);

/// Window and data options for the demo.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub title: String,
    /// Initial window size in logical pixels.
    pub width: u32,
    pub height: u32,
    /// Raw density stream. Procedural frames are generated unless both paths are set.
    pub density_path: Option<PathBuf>,
    /// Raw temperature stream, frame-aligned with `density_path`.
    pub temperature_path: Option<PathBuf>,
    /// Loads shaders from this directory instead of the embedded copies,
    /// and reloads them when a file in it changes.
    pub shader_dir: Option<PathBuf>,
    /// Voxel extent of every frame in the raw streams, and of procedural frames.
    pub extent: VoxelExtent,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "Cumulus".to_string(),
            width: 1280,
            height: 720,
            density_path: None,
            temperature_path: None,
            shader_dir: None,
            extent: VoxelExtent::default(),
        }
    }
}

impl AppConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Sets both raw data streams.
    pub fn volume_data(mut self, density: impl Into<PathBuf>, temperature: impl Into<PathBuf>) -> Self {
        self.density_path = Some(density.into());
        self.temperature_path = Some(temperature.into());
        self
    }

    pub fn shader_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.shader_dir = Some(dir.into());
        self
    }

    pub fn extent(mut self, extent: VoxelExtent) -> Self {
        self.extent = extent;
        self
    }

    /// Raw streams from disk when both paths are set, otherwise a procedural plume.
    pub fn load_volume(&self) -> Result<AnimatedVolume, VolumeError> {
        match (&self.density_path, &self.temperature_path) {
            (Some(density), Some(temperature)) => {
                let density = read_raw_frames(density, self.extent)?;
                let temperature = read_raw_frames(temperature, self.extent)?;
                log::info!(
                    "loaded {} frames of {} voxel data",
                    density.len(),
                    self.extent
                );
                AnimatedVolume::new(density, temperature)
            }
            _ => {
                log::info!(
                    "no volume data given, generating {PROCEDURAL_FRAMES} procedural frames at {}",
                    self.extent
                );
                AnimatedVolume::procedural(self.extent, PROCEDURAL_FRAMES, PROCEDURAL_SEED)
            }
        }
    }

    pub fn load_shaders(&self) -> Result<ShaderLibrary, AppError> {
        Ok(match &self.shader_dir {
            Some(dir) => ShaderLibrary::from_dir(dir)?,
            None => ShaderLibrary::embedded(),
        })
    }
}

/// The demo scene: a checkered floor, one volume node, and an orbiting camera.
pub struct DemoScene {
    pub scene: Scene,
    /// Orbits the volume; see [`orbit_transform`].
    pub camera: Entity,
    /// Centered at `(0, 4.7, 0)` with a uniform scale of 5.
    pub volume_node: Entity,
    /// Frames in the attached volume, for sizing the [`AnimationClock`].
    pub frame_count: usize,
}

impl DemoScene {
    /// Builds the scene around `volume`. `aspect` is the initial camera aspect ratio.
    pub fn new(volume: AnimatedVolume, aspect: f32) -> Result<Self, hecs::NoSuchEntity> {
        let mut scene = Scene::new();
        let frame_count = volume.frame_count();

        let floor_texture = scene.add_texture(checker_image(512, 16, [150, 150, 155], [60, 60, 66], 3));
        let floor_mesh = scene.add_mesh(MeshData::plane(40.0, 8.0));
        let floor_material = scene.add_material(Material::textured(floor_texture));
        let floor = scene.spawn_node(Transform::new());
        scene.set_model(floor, Model::single(floor_mesh, floor_material))?;

        let volume_id = scene.add_volume(volume);
        let volume_node = scene.spawn_node(Transform::from_position(VOLUME_CENTER).uniform_scale(5.0));
        scene.attach_volume(volume_node, volume_id)?;

        let camera = scene.spawn_node(orbit_transform(0.0));
        scene.set_camera(
            camera,
            Camera {
                aspect,
                ..Camera::default()
            },
        )?;

        Ok(Self {
            scene,
            camera,
            volume_node,
            frame_count,
        })
    }

    /// Moves the camera along its orbit.
    pub fn orbit(&mut self, elapsed_secs: f32) {
        // The camera was spawned by `new`, so this cannot fail.
        let _ = self
            .scene
            .set_transform(self.camera, orbit_transform(elapsed_secs));
    }
}

/// Camera transform after `elapsed_secs` of orbiting the volume.
pub fn orbit_transform(elapsed_secs: f32) -> Transform {
    let angle = elapsed_secs * ORBIT_SPEED;
    let position = Vec3::new(angle.sin() * ORBIT_RADIUS, ORBIT_HEIGHT, angle.cos() * ORBIT_RADIUS);
    Transform::from_position(position).looking_at(VOLUME_CENTER, Vec3::Y)
}

/// The other of linear and nearest volume sampling.
fn toggled_filter(filter: wgpu::FilterMode) -> wgpu::FilterMode {
    match filter {
        wgpu::FilterMode::Linear => wgpu::FilterMode::Nearest,
        wgpu::FilterMode::Nearest => wgpu::FilterMode::Linear,
    }
}

/// Applies a key press to the settings. Returns whether anything changed.
pub fn apply_key(settings: &mut RenderSettings, key: KeyCode) -> bool {
    match key {
        KeyCode::Space => settings.animation_paused = !settings.animation_paused,
        KeyCode::KeyR => settings.resolution = settings.resolution.cycle(),
        KeyCode::KeyN => settings.noise_type = settings.noise_type.cycle(),
        KeyCode::KeyB => settings.show_noise = !settings.show_noise,
        _ => return false,
    }
    true
}

/// Opens the window and runs until it is closed or the device is lost.
pub fn run(config: AppConfig) -> Result<(), AppError> {
    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = CumulusApp::Pending { config };
    event_loop.run_app(&mut app)?;

    match app {
        CumulusApp::Failed(err) => Err(err),
        _ => Ok(()),
    }
}

enum CumulusApp {
    Pending {
        config: AppConfig,
    },
    Running(Box<Running>),
    Failed(AppError),
}

struct Running {
    window: Arc<Window>,
    gpu: GpuContext,
    renderer: FrameRenderer,
    shaders: ShaderLibrary,
    demo: DemoScene,
    settings: RenderSettings,
    clock: AnimationClock,
    start_time: Instant,
    last_frame: Instant,
    last_timing_log: Instant,
    last_shader_check: Instant,
}

impl Running {
    fn start(event_loop: &ActiveEventLoop, config: &AppConfig) -> Result<Self, AppError> {
        let window_attrs = WindowAttributes::default()
            .with_title(&config.title)
            .with_inner_size(winit::dpi::LogicalSize::new(config.width, config.height));
        let window = Arc::new(event_loop.create_window(window_attrs)?);

        let gpu = GpuContext::new(window.clone())?;
        let shaders = config.load_shaders()?;
        let renderer = FrameRenderer::new(&gpu, &shaders)?;

        let volume = config.load_volume()?;
        let demo = DemoScene::new(volume, gpu.aspect()).map_err(RenderError::from)?;
        let clock = AnimationClock::new(demo.frame_count);

        let now = Instant::now();
        Ok(Self {
            window,
            gpu,
            renderer,
            shaders,
            demo,
            settings: RenderSettings::default(),
            clock,
            start_time: now,
            last_frame: now,
            last_timing_log: now,
            last_shader_check: now,
        })
    }

    fn redraw(&mut self) -> Result<(), RenderError> {
        let now = Instant::now();
        let delta_ms = now.duration_since(self.last_frame).as_secs_f64() * 1000.0;
        self.last_frame = now;

        if now.duration_since(self.last_shader_check) >= SHADER_CHECK_INTERVAL {
            self.last_shader_check = now;
            self.reload_stale_shaders();
        }

        self.clock.advance(
            delta_ms,
            self.settings.animation_interval_ms(),
            self.settings.animation_paused,
        );
        self.demo.orbit(self.start_time.elapsed().as_secs_f32());

        let stats = self.renderer.render(
            &self.gpu,
            &self.demo.scene,
            self.demo.camera,
            &self.settings,
            &self.clock,
        )?;

        if now.duration_since(self.last_timing_log) >= TIMING_LOG_INTERVAL {
            self.last_timing_log = now;
            if let Some(timings) = stats.timings {
                log::info!(
                    "frame {} | {} | total {:.2}ms",
                    stats.frame_index,
                    timings.summary(),
                    timings.total_ms()
                );
            }
        }
        Ok(())
    }

    /// Rebuilds the pipelines when a file in the shader directory changed.
    fn reload_stale_shaders(&mut self) {
        if !self.shaders.is_stale() {
            return;
        }
        let Some(dir) = self.shaders.source_dir().map(Path::to_path_buf) else {
            return;
        };
        log::info!("shader change detected in {}", dir.display());
        match ShaderLibrary::from_dir(&dir) {
            Ok(shaders) => {
                if let Err(err) = self.renderer.reload_shaders(&self.gpu.device, &shaders) {
                    log::warn!("{err}, keeping previous pipelines");
                }
                // Adopted even on failure so one bad edit is reported once.
                self.shaders = shaders;
            }
            Err(err) => log::warn!("shader reload failed: {err}"),
        }
    }

    fn key_pressed(&mut self, key: KeyCode) {
        if key == KeyCode::KeyF {
            let filter = toggled_filter(self.renderer.volume_filter());
            self.renderer.set_volume_filter(&self.gpu.device, filter);
            return;
        }
        if apply_key(&mut self.settings, key) {
            log::info!(
                "paused={} resolution=1/{} noise={:?} show_noise={}",
                self.settings.animation_paused,
                self.settings.resolution.divisor(),
                self.settings.noise_type,
                self.settings.show_noise
            );
        }
    }
}

impl ApplicationHandler for CumulusApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        let CumulusApp::Pending { config } = self else {
            return;
        };
        *self = match Running::start(event_loop, config) {
            Ok(running) => CumulusApp::Running(Box::new(running)),
            Err(err) => {
                log::error!("startup failed: {err}");
                event_loop.exit();
                CumulusApp::Failed(err)
            }
        };
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let CumulusApp::Running(running) = self else {
            return;
        };

        match event {
            WindowEvent::CloseRequested => {
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                running.gpu.resize(size.width, size.height);
                let aspect = running.gpu.aspect();
                running.demo.scene.set_camera_aspect(running.demo.camera, aspect);
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(key),
                        state: ElementState::Pressed,
                        repeat: false,
                        ..
                    },
                ..
            } => {
                running.key_pressed(key);
            }
            WindowEvent::RedrawRequested => {
                match running.redraw() {
                    Ok(()) => {}
                    Err(err) if err.is_recoverable() => {
                        log::warn!("{err}, reconfiguring surface");
                        running.gpu.reconfigure();
                    }
                    Err(err) => {
                        log::error!("{err}");
                        event_loop.exit();
                        *self = CumulusApp::Failed(err.into());
                        return;
                    }
                }
                running.window.request_redraw();
            }
            _ => {}
        }
    }
}
