//! Per-frame orchestration of the pass chain.
//!
//! [`FrameRenderer::render`] draws into the window surface;
//! [`FrameRenderer::render_to_view`] draws into any caller-owned view of the
//! output format, which is how the renderer runs headless. Both run in two
//! phases:
//!
//! 1. **Prepare**: check the targets against the canvas and resolution
//!    factor, walk the scene, build any missing cache records, and write
//!    every uniform buffer for this frame.
//! 2. **Encode**: walk the [`FramePlan`], recording each group of passes
//!    into its own encoder and submitting it before the next group.
//!
//! All GPU objects derived from the scene live in [`ResourceCache`]s keyed by
//! entity or asset id and are reused across frames. Bind groups that
//! reference the offscreen targets remember the target generation they were
//! built against and are rebuilt lazily after a resize.

use std::collections::HashSet;

use glam::{Mat4, Vec4};
use hecs::Entity;

use crate::cache::ResourceCache;
use crate::clock::AnimationClock;
use crate::diagnostics::{PassTimings, TimestampQueries};
use crate::error::{RenderError, Result};
use crate::gpu::{DeviceLossFlag, GpuContext};
use crate::mesh::Mesh;
use crate::pipelines::{
    CameraUniform, MaterialUniform, NodeUniform, PipelineSet, ScalarUniform, VolumeParamsUniform,
    VolumeTransformUniform,
};
use crate::plan::{FramePlan, PassStep, Submission};
use crate::preparer::{GpuResourcePreparer, GpuTexture};
use crate::scene::{MaterialId, MeshId, Primitive, Scene, TextureId, VolumeId};
use crate::settings::RenderSettings;
use crate::shaders::ShaderLibrary;
use crate::targets::{RenderTargets, TargetTracker};
use crate::volume::GpuVolume;

const CLEAR_COLOR: wgpu::Color = wgpu::Color {
    r: 0.02,
    g: 0.02,
    b: 0.03,
    a: 1.0,
};

/// Swaps the X and Y axes of the volume's local frame.
pub const AXIS_SWAP: Mat4 = Mat4::from_cols(Vec4::Y, Vec4::X, Vec4::Z, Vec4::W);

/// Returns `(volume_matrix, inverse_mvp)` for a volume node with world matrix `world`.
///
/// `inverse_mvp` maps clip space back into the node's `[-1, 1]³` local cube.
pub fn volume_matrices(world: Mat4, view: Mat4, projection: Mat4) -> (Mat4, Mat4) {
    let volume_matrix = world * AXIS_SWAP;
    let inverse_mvp = (projection * view * volume_matrix).inverse();
    (volume_matrix, inverse_mvp)
}

/// Shader parameters for the volume pass, taken from the settings and clock.
pub(crate) fn volume_params(settings: &RenderSettings, clock: &AnimationClock) -> VolumeParamsUniform {
    VolumeParamsUniform {
        opacity: settings.volume_opacity(),
        noise_time: clock.noise_time(),
        step_count: settings.step_count.get(),
        noise_type: settings.noise_type.shader_id(),
        show_noise: settings.show_noise as u32,
        _pad: [0; 3],
    }
}

/// What one [`FrameRenderer::render`] call did.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameStats {
    /// Indexed draws issued by the unlit pass.
    pub unlit_draws: u32,
    /// Full-screen draws issued by the volume pass.
    pub volume_draws: u32,
    /// Volume entities in draw order.
    pub volume_order: Vec<Entity>,
    pub passes: usize,
    pub submissions: usize,
    pub targets_recreated: bool,
    pub frame_index: usize,
    /// Latest decoded timings, when timestamp queries are available.
    pub timings: Option<PassTimings>,
}

struct CameraRecord {
    buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
}

struct MaterialRecord {
    buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
}

/// Inputs a volume bind group was built from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct VolumeBindKey {
    volume: VolumeId,
    frame: usize,
    generation: u64,
    filter: wgpu::FilterMode,
}

enum NodeRecord {
    Unlit {
        buffer: wgpu::Buffer,
        bind_group: wgpu::BindGroup,
    },
    Volume {
        transform_buffer: wgpu::Buffer,
        params_buffer: wgpu::Buffer,
        bind_group: Option<(wgpu::BindGroup, VolumeBindKey)>,
    },
}

impl NodeRecord {
    fn is_volume(&self) -> bool {
        matches!(self, NodeRecord::Volume { .. })
    }
}

/// Bind groups that reference the offscreen targets.
struct PassBindGroups {
    generation: u64,
    bright: wgpu::BindGroup,
    /// `downsample[i]` samples bloom mip `i`.
    downsample: Vec<wgpu::BindGroup>,
    /// `upsample[i]` samples bloom mip `i`.
    upsample: Vec<wgpu::BindGroup>,
    final_composite: wgpu::BindGroup,
}

struct UnlitDraw {
    node: Entity,
    primitives: Vec<Primitive>,
}

/// Draws a [`Scene`] through the unlit, volume, bright, bloom, and final passes.
///
/// Owns the pipelines, the offscreen targets, and every GPU record derived
/// from the scene. One renderer serves one output format; records persist
/// across frames and are rebuilt only when their inputs change.
pub struct FrameRenderer {
    pipelines: PipelineSet,
    preparer: GpuResourcePreparer,
    output_format: wgpu::TextureFormat,
    tracker: TargetTracker,
    targets: Option<RenderTargets>,
    pass_groups: Option<PassBindGroups>,

    cameras: ResourceCache<Entity, CameraRecord>,
    nodes: ResourceCache<Entity, NodeRecord>,
    materials: ResourceCache<MaterialId, MaterialRecord>,
    textures: ResourceCache<TextureId, GpuTexture>,
    meshes: ResourceCache<MeshId, Mesh>,
    volumes: ResourceCache<VolumeId, GpuVolume>,
    volume_filter: wgpu::FilterMode,

    bright_params: wgpu::Buffer,
    bloom_params: wgpu::Buffer,
    timestamps: Option<TimestampQueries>,
    device_loss: DeviceLossFlag,
    warned: HashSet<Entity>,
}

impl FrameRenderer {
    /// Compiles the pipelines for `gpu`'s swapchain. Shader errors are fatal here.
    pub fn new(gpu: &GpuContext, shaders: &ShaderLibrary) -> Result<Self> {
        Self::with_device(
            &gpu.device,
            &gpu.queue,
            gpu.config.format,
            gpu.timestamps,
            gpu.device_loss.clone(),
            shaders,
        )
    }

    /// Builds a renderer on any device, without a window.
    ///
    /// # Arguments
    ///
    /// * `output_format` - format of the views the final pass draws into.
    /// * `timestamps` - whether `device` was opened with `TIMESTAMP_QUERY`.
    /// * `device_loss` - checked before every frame; a latched loss fails the frame.
    pub fn with_device(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        output_format: wgpu::TextureFormat,
        timestamps: bool,
        device_loss: DeviceLossFlag,
        shaders: &ShaderLibrary,
    ) -> Result<Self> {
        let pipelines = PipelineSet::new(device, shaders, output_format)?;
        let preparer = GpuResourcePreparer::new(device, queue);

        let bright_params = preparer.uniform_buffer(device, &ScalarUniform::new(1.0), "Bright Params");
        let bloom_params = preparer.uniform_buffer(device, &ScalarUniform::new(1.0), "Bloom Params");
        let timestamps = timestamps.then(|| TimestampQueries::new(device, queue));

        Ok(Self {
            pipelines,
            preparer,
            output_format,
            tracker: TargetTracker::new(),
            targets: None,
            pass_groups: None,
            cameras: ResourceCache::new(),
            nodes: ResourceCache::new(),
            materials: ResourceCache::new(),
            textures: ResourceCache::new(),
            meshes: ResourceCache::new(),
            volumes: ResourceCache::new(),
            volume_filter: wgpu::FilterMode::Linear,
            bright_params,
            bloom_params,
            timestamps,
            device_loss,
            warned: HashSet::new(),
        })
    }

    /// Number of node records built so far (one per node, plus kind changes and reloads).
    pub fn node_builds(&self) -> usize {
        self.nodes.builds()
    }

    /// The offscreen targets, once the first frame has allocated them.
    pub fn targets(&self) -> Option<&RenderTargets> {
        self.targets.as_ref()
    }

    pub fn volume_filter(&self) -> wgpu::FilterMode {
        self.volume_filter
    }

    /// Switches the sampler filter of every uploaded volume, and of volumes uploaded later.
    ///
    /// Volume bind groups pick up the new samplers on the next frame.
    pub fn set_volume_filter(&mut self, device: &wgpu::Device, filter: wgpu::FilterMode) {
        if filter == self.volume_filter {
            return;
        }
        self.volume_filter = filter;
        self.volumes.for_each_mut(|volume| volume.set_filter(device, filter));
        log::info!("volume filter set to {filter:?}");
    }

    /// Recompiles every pipeline from `shaders`.
    ///
    /// On error the current pipelines stay in place and keep rendering. On
    /// success every bind group built against the old layouts is dropped and
    /// rebuilt lazily.
    pub fn reload_shaders(&mut self, device: &wgpu::Device, shaders: &ShaderLibrary) -> Result<()> {
        self.pipelines = PipelineSet::new(device, shaders, self.output_format)?;
        self.cameras.clear();
        self.nodes.clear();
        self.materials.clear();
        self.pass_groups = None;
        log::info!("rebuilt pipelines from reloaded shaders");
        Ok(())
    }

    /// Renders one frame of `scene` from `camera` and presents it.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # fn frame(
    /// #     gpu: &cumulus::GpuContext,
    /// #     renderer: &mut cumulus::FrameRenderer,
    /// #     demo: &cumulus::DemoScene,
    /// # ) -> cumulus::Result<()> {
    /// use cumulus::{AnimationClock, RenderSettings};
    ///
    /// let mut clock = AnimationClock::new(demo.frame_count);
    /// let settings = RenderSettings::default();
    /// clock.advance(16.0, settings.animation_interval_ms(), settings.animation_paused);
    /// let stats = renderer.render(gpu, &demo.scene, demo.camera, &settings, &clock)?;
    /// assert_eq!(stats.frame_index, clock.current_frame());
    /// # Ok(())
    /// # }
    /// ```
    pub fn render(
        &mut self,
        gpu: &GpuContext,
        scene: &Scene,
        camera: Entity,
        settings: &RenderSettings,
        clock: &AnimationClock,
    ) -> Result<FrameStats> {
        self.check_device()?;
        // Fail before acquiring, so no surface texture is dropped unpresented.
        if scene.camera_matrices(camera).is_none() {
            return Err(RenderError::MissingCamera(camera));
        }

        let frame = gpu.surface.get_current_texture()?;
        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let stats = self.render_to_view(
            &gpu.device,
            &gpu.queue,
            &view,
            (gpu.width(), gpu.height()),
            scene,
            camera,
            settings,
            clock,
        )?;
        frame.present();
        Ok(stats)
    }

    /// Renders one frame into `output`, a view of the format this renderer was built for.
    ///
    /// `canvas` is the output size in pixels; the offscreen targets are that
    /// size divided by the resolution factor.
    #[allow(clippy::too_many_arguments)]
    pub fn render_to_view(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        output: &wgpu::TextureView,
        canvas: (u32, u32),
        scene: &Scene,
        camera: Entity,
        settings: &RenderSettings,
        clock: &AnimationClock,
    ) -> Result<FrameStats> {
        self.check_device()?;

        let mut stats = FrameStats {
            frame_index: clock.current_frame(),
            ..Default::default()
        };
        if let Some(timestamps) = &mut self.timestamps {
            timestamps.poll(device);
            stats.timings = timestamps.latest();
        }

        stats.targets_recreated = self.ensure_targets(device, canvas, settings);
        self.upload_camera(device, queue, scene, camera)?;
        let (unlit_draws, volume_draws) = self.prepare_nodes(device, queue, scene, camera, settings, clock);
        self.prepare_pass_groups(device, queue, settings);

        let Some(mip_count) = self.targets.as_ref().map(|t| t.key.mip_count) else {
            return Ok(stats);
        };
        let plan = FramePlan::new(mip_count);
        let mut index = 0;

        for (submission, steps) in plan.submissions() {
            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(submission_label(submission)),
            });

            for step in steps {
                self.encode_step(
                    &mut encoder,
                    &plan,
                    index,
                    *step,
                    camera,
                    &unlit_draws,
                    &volume_draws,
                    output,
                    &mut stats,
                );
                stats.passes += 1;
                index += 1;
            }

            let is_final = submission == Submission::Final;
            if is_final {
                if let Some(timestamps) = &mut self.timestamps {
                    timestamps.resolve(&mut encoder);
                }
            }
            queue.submit(std::iter::once(encoder.finish()));
            stats.submissions += 1;
            if is_final {
                if let Some(timestamps) = &mut self.timestamps {
                    timestamps.after_submit();
                }
            }
        }

        stats.volume_order = volume_draws;
        Ok(stats)
    }

    fn check_device(&self) -> Result<()> {
        match self.device_loss.message() {
            Some(message) => Err(RenderError::DeviceLost(message)),
            None => Ok(()),
        }
    }

    /// Recreates the targets when the canvas or factor changed. Returns whether it did.
    fn ensure_targets(&mut self, device: &wgpu::Device, canvas: (u32, u32), settings: &RenderSettings) -> bool {
        let (width, height) = canvas;
        let Some(key) = self.tracker.check(width, height, settings.resolution.divisor()) else {
            return false;
        };

        if let Some(old) = self.targets.take() {
            old.destroy();
        }
        self.targets = Some(RenderTargets::new(device, key));
        self.pass_groups = None;
        self.nodes.for_each_mut(|record| {
            if let NodeRecord::Volume { bind_group, .. } = record {
                *bind_group = None;
            }
        });
        true
    }

    fn upload_camera(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        scene: &Scene,
        camera: Entity,
    ) -> Result<()> {
        let matrices = scene
            .camera_matrices(camera)
            .ok_or(RenderError::MissingCamera(camera))?;

        let preparer = &self.preparer;
        let layout = &self.pipelines.camera_layout;
        let record = self.cameras.get_or_create(camera, || {
            log::debug!("building camera record for {camera:?}");
            let buffer = preparer.uniform_buffer(
                device,
                &CameraUniform::new(Mat4::IDENTITY, Mat4::IDENTITY),
                "Camera Uniforms",
            );
            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Camera Bind Group"),
                layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: buffer.as_entire_binding(),
                }],
            });
            CameraRecord { buffer, bind_group }
        });

        let uniform = CameraUniform::new(matrices.view, matrices.projection);
        queue.write_buffer(&record.buffer, 0, bytemuck::bytes_of(&uniform));
        Ok(())
    }

    /// Builds missing records and writes per-node uniforms. Returns the
    /// unlit draw list and the volume nodes, both in traversal order.
    fn prepare_nodes(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        scene: &Scene,
        camera: Entity,
        settings: &RenderSettings,
        clock: &AnimationClock,
    ) -> (Vec<UnlitDraw>, Vec<Entity>) {
        let matrices = scene.camera_matrices(camera);
        let params = volume_params(settings, clock);
        let mut unlit = Vec::new();
        let mut volumes = Vec::new();

        for visited in scene.traverse() {
            let node = visited.entity;
            if let Some(volume_id) = scene.volume_of(node) {
                let Some(m) = matrices else { continue };
                let (volume_matrix, inverse_mvp) = volume_matrices(visited.world, m.view, m.projection);
                let transform = VolumeTransformUniform {
                    volume_matrix: volume_matrix.to_cols_array_2d(),
                    inverse_mvp: inverse_mvp.to_cols_array_2d(),
                };
                if self.prepare_volume_node(device, queue, scene, node, volume_id, &transform, &params, clock) {
                    volumes.push(node);
                }
            } else {
                let primitives = scene.primitives_of(node);
                if primitives.is_empty() {
                    continue;
                }
                self.prepare_unlit_node(device, queue, node, visited.world);
                let drawable: Vec<Primitive> = primitives
                    .into_iter()
                    .filter(|p| self.prepare_primitive(device, queue, scene, *p))
                    .collect();
                unlit.push(UnlitDraw {
                    node,
                    primitives: drawable,
                });
            }
        }
        (unlit, volumes)
    }

    fn prepare_unlit_node(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, node: Entity, world: Mat4) {
        let preparer = &self.preparer;
        let layout = &self.pipelines.node_layout;
        let record = self.nodes.get_or_rebuild(
            node,
            |r| !r.is_volume(),
            || {
                log::debug!("building unlit record for {node:?}");
                let buffer =
                    preparer.uniform_buffer(device, &NodeUniform::new(Mat4::IDENTITY), "Node Uniforms");
                let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("Node Bind Group"),
                    layout,
                    entries: &[wgpu::BindGroupEntry {
                        binding: 0,
                        resource: buffer.as_entire_binding(),
                    }],
                });
                NodeRecord::Unlit { buffer, bind_group }
            },
        );
        if let NodeRecord::Unlit { buffer, .. } = record {
            queue.write_buffer(buffer, 0, bytemuck::bytes_of(&NodeUniform::new(world)));
        }
    }

    /// Ensures mesh, texture, and material records for `primitive` and
    /// writes the material's current base factor.
    fn prepare_primitive(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        scene: &Scene,
        primitive: Primitive,
    ) -> bool {
        let preparer = &self.preparer;

        let Some(mesh) = scene.mesh(primitive.mesh) else {
            log::warn!("primitive references missing mesh {:?}", primitive.mesh);
            return false;
        };
        self.meshes.get_or_create(primitive.mesh, || {
            preparer.upload_mesh(device, mesh, &format!("Mesh {}", primitive.mesh.0))
        });

        let Some(material) = scene.material(primitive.material) else {
            log::warn!("primitive references missing material {:?}", primitive.material);
            return false;
        };
        if let Some(texture_id) = material.texture {
            if let Some(image) = scene.texture(texture_id) {
                self.textures.get_or_create(texture_id, || {
                    preparer.upload_image(device, queue, image, &format!("Texture {}", texture_id.0))
                });
            }
        }

        let uniform = MaterialUniform {
            base_factor: material.base_factor,
        };
        let textures = &self.textures;
        let layout = &self.pipelines.material_layout;
        let record = self.materials.get_or_create(primitive.material, || {
            let texture = material
                .texture
                .and_then(|id| textures.get(&id))
                .unwrap_or_else(|| preparer.white_texture());
            let buffer = preparer.uniform_buffer(device, &uniform, "Material Uniforms");
            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Material Bind Group"),
                layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(&texture.view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: wgpu::BindingResource::Sampler(&preparer.repeat_sampler),
                    },
                ],
            });
            MaterialRecord { buffer, bind_group }
        });
        queue.write_buffer(&record.buffer, 0, bytemuck::bytes_of(&uniform));
        true
    }

    /// Writes the node's volume uniforms and makes sure its bind group
    /// matches the current frame and targets. Returns whether it can be drawn.
    #[allow(clippy::too_many_arguments)]
    fn prepare_volume_node(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        scene: &Scene,
        node: Entity,
        volume_id: VolumeId,
        transform: &VolumeTransformUniform,
        params: &VolumeParamsUniform,
        clock: &AnimationClock,
    ) -> bool {
        let Some(volume) = scene.volume(volume_id) else {
            log::warn!("node {node:?} references missing volume {volume_id:?}");
            return false;
        };
        let filter = self.volume_filter;
        let gpu_volume = self.volumes.get_or_create(volume_id, || {
            let mut uploaded = volume.upload(device, queue, &format!("Volume {}", volume_id.0));
            uploaded.set_filter(device, filter);
            uploaded
        });
        let frame_index = clock.current_frame() % gpu_volume.frame_count().max(1);

        let preparer = &self.preparer;
        let record = self.nodes.get_or_rebuild(node, NodeRecord::is_volume, || {
            log::debug!("building volume record for {node:?}");
            NodeRecord::Volume {
                transform_buffer: preparer.uniform_buffer(device, transform, "Volume Transform"),
                params_buffer: preparer.uniform_buffer(device, params, "Volume Params"),
                bind_group: None,
            }
        });
        let NodeRecord::Volume {
            transform_buffer,
            params_buffer,
            bind_group,
        } = record
        else {
            return false;
        };
        queue.write_buffer(transform_buffer, 0, bytemuck::bytes_of(transform));
        queue.write_buffer(params_buffer, 0, bytemuck::bytes_of(params));

        let key = VolumeBindKey {
            volume: volume_id,
            frame: frame_index,
            generation: self.tracker.generation(),
            filter,
        };
        if bind_group.as_ref().is_some_and(|(_, built)| *built == key) {
            return true;
        }

        let Some(targets) = &self.targets else {
            return false;
        };
        let (density, temperature) = gpu_volume.frame(frame_index);
        let (Some(density_view), Some(temperature_view), Some(sampler)) =
            (density.view(), temperature.view(), density.sampler())
        else {
            if self.warned.insert(node) {
                log::warn!("volume for {node:?} is not uploaded yet, skipping it");
            }
            *bind_group = None;
            return false;
        };

        let group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Volume Bind Group"),
            layout: &self.pipelines.volume_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: transform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(density_view),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::TextureView(temperature_view),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: wgpu::BindingResource::TextureView(gpu_volume.palette_view()),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: wgpu::BindingResource::TextureView(&targets.depth_view),
                },
                wgpu::BindGroupEntry {
                    binding: 6,
                    resource: params_buffer.as_entire_binding(),
                },
            ],
        });
        *bind_group = Some((group, key));
        true
    }

    /// Writes the bloom uniforms and rebuilds target-dependent bind groups if stale.
    fn prepare_pass_groups(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, settings: &RenderSettings) {
        queue.write_buffer(
            &self.bright_params,
            0,
            bytemuck::bytes_of(&ScalarUniform::new(settings.bloom_threshold())),
        );
        queue.write_buffer(
            &self.bloom_params,
            0,
            bytemuck::bytes_of(&ScalarUniform::new(settings.bloom_intensity())),
        );

        let generation = self.tracker.generation();
        if self
            .pass_groups
            .as_ref()
            .is_some_and(|g| g.generation == generation)
        {
            return;
        }
        let Some(targets) = &self.targets else {
            return;
        };

        let p = &self.pipelines;
        let sampler = &self.preparer.clamp_sampler;

        let bright = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Bright Bind Group"),
            layout: &p.bright_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.bright_params.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&targets.hdr_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&targets.bloom_storage_view),
                },
            ],
        });

        let downsample = targets
            .bloom_mip_views
            .iter()
            .map(|view| {
                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("Bloom Downsample Bind Group"),
                    layout: &p.downsample_layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: wgpu::BindingResource::TextureView(view),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: wgpu::BindingResource::Sampler(sampler),
                        },
                    ],
                })
            })
            .collect();

        let upsample = targets
            .bloom_mip_views
            .iter()
            .map(|view| {
                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("Bloom Upsample Bind Group"),
                    layout: &p.upsample_layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: wgpu::BindingResource::TextureView(view),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: wgpu::BindingResource::Sampler(sampler),
                        },
                        wgpu::BindGroupEntry {
                            binding: 2,
                            resource: self.bloom_params.as_entire_binding(),
                        },
                    ],
                })
            })
            .collect();

        let final_composite = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Final Bind Group"),
            layout: &p.final_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&targets.hdr_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&targets.bloom_mip_views[0]),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(sampler),
                },
            ],
        });

        log::debug!(
            "rebuilt pass bind groups for target generation {generation} ({} bloom levels)",
            targets.key.mip_count
        );
        self.pass_groups = Some(PassBindGroups {
            generation,
            bright,
            downsample,
            upsample,
            final_composite,
        });
    }

    #[allow(clippy::too_many_arguments)]
    fn encode_step(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        plan: &FramePlan,
        index: usize,
        step: PassStep,
        camera: Entity,
        unlit_draws: &[UnlitDraw],
        volume_draws: &[Entity],
        output: &wgpu::TextureView,
        stats: &mut FrameStats,
    ) {
        let (Some(targets), Some(groups)) = (&self.targets, &self.pass_groups) else {
            return;
        };
        let slots = plan.timestamp_slots(index);
        let render_writes = self.timestamps.as_ref().and_then(|t| t.render_writes(slots));
        let camera_group = self.cameras.get(&camera).map(|c| &c.bind_group);
        let p = &self.pipelines;

        match step {
            PassStep::Unlit => {
                let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("Unlit Pass"),
                    color_attachments: &[Some(color_attachment(
                        &targets.hdr_view,
                        wgpu::LoadOp::Clear(CLEAR_COLOR),
                    ))],
                    depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                        view: &targets.depth_view,
                        depth_ops: Some(wgpu::Operations {
                            load: wgpu::LoadOp::Clear(1.0),
                            store: wgpu::StoreOp::Store,
                        }),
                        stencil_ops: None,
                    }),
                    timestamp_writes: render_writes,
                    occlusion_query_set: None,
                });
                let Some(camera_group) = camera_group else {
                    return;
                };
                pass.set_pipeline(&p.unlit);
                pass.set_bind_group(0, camera_group, &[]);

                for draw in unlit_draws {
                    let Some(NodeRecord::Unlit { bind_group, .. }) = self.nodes.get(&draw.node) else {
                        continue;
                    };
                    pass.set_bind_group(1, bind_group, &[]);
                    for primitive in &draw.primitives {
                        let (Some(mesh), Some(material)) = (
                            self.meshes.get(&primitive.mesh),
                            self.materials.get(&primitive.material),
                        ) else {
                            continue;
                        };
                        pass.set_bind_group(2, &material.bind_group, &[]);
                        pass.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
                        pass.set_index_buffer(mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
                        pass.draw_indexed(0..mesh.index_count(), 0, 0..1);
                        stats.unlit_draws += 1;
                    }
                }
            }
            PassStep::Volume => {
                let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("Volume Pass"),
                    color_attachments: &[Some(color_attachment(&targets.hdr_view, wgpu::LoadOp::Load))],
                    depth_stencil_attachment: None,
                    timestamp_writes: render_writes,
                    occlusion_query_set: None,
                });
                let Some(camera_group) = camera_group else {
                    return;
                };
                pass.set_pipeline(&p.volume);
                pass.set_bind_group(0, camera_group, &[]);
                for node in volume_draws {
                    let Some(NodeRecord::Volume {
                        bind_group: Some((group, _)),
                        ..
                    }) = self.nodes.get(node)
                    else {
                        continue;
                    };
                    pass.set_bind_group(1, group, &[]);
                    pass.draw(0..3, 0..1);
                    stats.volume_draws += 1;
                }
            }
            PassStep::Bright => {
                let compute_writes = self.timestamps.as_ref().and_then(|t| t.compute_writes(slots));
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("Bright Pass"),
                    timestamp_writes: compute_writes,
                });
                pass.set_pipeline(&p.bright);
                pass.set_bind_group(0, &groups.bright, &[]);
                pass.dispatch_workgroups(
                    targets.key.width.div_ceil(8),
                    targets.key.height.div_ceil(8),
                    1,
                );
            }
            PassStep::Downsample { level } => {
                let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("Bloom Downsample Pass"),
                    color_attachments: &[Some(color_attachment(
                        &targets.bloom_mip_views[level as usize],
                        wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    ))],
                    depth_stencil_attachment: None,
                    timestamp_writes: render_writes,
                    occlusion_query_set: None,
                });
                pass.set_pipeline(&p.downsample);
                pass.set_bind_group(0, &groups.downsample[level as usize - 1], &[]);
                pass.draw(0..3, 0..1);
            }
            PassStep::Upsample { level } => {
                let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("Bloom Upsample Pass"),
                    color_attachments: &[Some(color_attachment(
                        &targets.bloom_mip_views[level as usize],
                        wgpu::LoadOp::Load,
                    ))],
                    depth_stencil_attachment: None,
                    timestamp_writes: render_writes,
                    occlusion_query_set: None,
                });
                pass.set_pipeline(&p.upsample);
                pass.set_bind_group(0, &groups.upsample[level as usize + 1], &[]);
                pass.draw(0..3, 0..1);
            }
            PassStep::Final => {
                let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("Final Pass"),
                    color_attachments: &[Some(color_attachment(
                        output,
                        wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    ))],
                    depth_stencil_attachment: None,
                    timestamp_writes: render_writes,
                    occlusion_query_set: None,
                });
                pass.set_pipeline(&p.final_composite);
                pass.set_bind_group(0, &groups.final_composite, &[]);
                pass.draw(0..3, 0..1);
            }
        }
    }
}

fn color_attachment(
    view: &wgpu::TextureView,
    load: wgpu::LoadOp<wgpu::Color>,
) -> wgpu::RenderPassColorAttachment<'_> {
    wgpu::RenderPassColorAttachment {
        view,
        depth_slice: None,
        resolve_target: None,
        ops: wgpu::Operations {
            load,
            store: wgpu::StoreOp::Store,
        },
    }
}

fn submission_label(submission: Submission) -> &'static str {
    match submission {
        Submission::Unlit => "Unlit Encoder",
        Submission::Volume => "Volume Encoder",
        Submission::Bright => "Bright Encoder",
        Submission::Bloom => "Bloom Encoder",
        Submission::Final => "Final Encoder",
    }
}
