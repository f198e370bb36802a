//! Compiled pipelines and bind group layouts for every pass.
//!
//! # Bind groups
//!
//! | Pipeline   | Group | Bindings                                                        |
//! |------------|-------|-----------------------------------------------------------------|
//! | unlit      | 0     | camera                                                          |
//! |            | 1     | node `{model, normal}`                                          |
//! |            | 2     | material, texture, sampler                                      |
//! | volume     | 0     | camera                                                          |
//! |            | 1     | transform, sampler, density, temperature, palette, depth, params |
//! | bright     | 0     | threshold, HDR, bloom mip 0 (storage)                           |
//! | bloom down | 0     | source mip, sampler                                             |
//! | bloom up   | 0     | source mip, sampler, intensity                                  |
//! | final      | 0     | HDR, bloom mip 0, sampler                                       |
//!
//! Every pipeline is created inside validation and internal error scopes, so
//! a shader that fails to compile or translate for the backend surfaces as
//! [`RenderError::Pipeline`] instead of an uncaptured-error panic.

use glam::Mat4;

use crate::error::{RenderError, Result};
use crate::mesh::Vertex;
use crate::shaders::ShaderLibrary;
use crate::targets::{DEPTH_FORMAT, HDR_FORMAT};

/// Camera uniforms. View at byte offset 0, projection at 64.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CameraUniform {
    pub view: [[f32; 4]; 4],
    pub projection: [[f32; 4]; 4],
}

impl CameraUniform {
    pub fn new(view: Mat4, projection: Mat4) -> Self {
        Self {
            view: view.to_cols_array_2d(),
            projection: projection.to_cols_array_2d(),
        }
    }
}

/// Per-node uniforms for the unlit pass.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct NodeUniform {
    pub model: [[f32; 4]; 4],
    /// Inverse transpose of `model`.
    pub normal: [[f32; 4]; 4],
}

impl NodeUniform {
    pub fn new(world: Mat4) -> Self {
        Self {
            model: world.to_cols_array_2d(),
            normal: world.inverse().transpose().to_cols_array_2d(),
        }
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MaterialUniform {
    pub base_factor: [f32; 4],
}

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct VolumeTransformUniform {
    pub volume_matrix: [[f32; 4]; 4],
    pub inverse_mvp: [[f32; 4]; 4],
}

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct VolumeParamsUniform {
    pub opacity: f32,
    pub noise_time: f32,
    pub step_count: u32,
    pub noise_type: u32,
    pub show_noise: u32,
    pub _pad: [u32; 3],
}

/// A single float padded to 16 bytes (bright threshold, bloom intensity).
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ScalarUniform {
    pub value: f32,
    pub _pad: [f32; 3],
}

impl ScalarUniform {
    pub fn new(value: f32) -> Self {
        Self {
            value,
            _pad: [0.0; 3],
        }
    }
}

/// Every pipeline of the pass chain with the layouts its bind groups are built against.
///
/// Built once per shader library. Rebuilding (after a shader reload) yields
/// new layouts, so bind groups made from a previous set must be dropped.
pub struct PipelineSet {
    /// Shared by the unlit and volume pipelines at group 0.
    pub camera_layout: wgpu::BindGroupLayout,
    pub node_layout: wgpu::BindGroupLayout,
    pub material_layout: wgpu::BindGroupLayout,
    /// Transform, sampler, density, temperature, palette, depth, params.
    pub volume_layout: wgpu::BindGroupLayout,
    pub bright_layout: wgpu::BindGroupLayout,
    pub downsample_layout: wgpu::BindGroupLayout,
    pub upsample_layout: wgpu::BindGroupLayout,
    pub final_layout: wgpu::BindGroupLayout,

    /// Textured meshes into HDR color and depth.
    pub unlit: wgpu::RenderPipeline,
    /// Full-screen raymarch, alpha-blended over HDR color.
    pub volume: wgpu::RenderPipeline,
    /// Compute pass writing over-threshold color into bloom mip 0.
    pub bright: wgpu::ComputePipeline,
    pub downsample: wgpu::RenderPipeline,
    /// Additive tent filter into the next larger mip.
    pub upsample: wgpu::RenderPipeline,
    /// Tonemapped HDR plus bloom, in the output format.
    pub final_composite: wgpu::RenderPipeline,
}

impl PipelineSet {
    /// Compiles every pipeline. Fails on the first shader or layout error.
    ///
    /// `surface_format` is the format of the view the final pass draws into.
    pub fn new(
        device: &wgpu::Device,
        shaders: &ShaderLibrary,
        surface_format: wgpu::TextureFormat,
    ) -> Result<Self> {
        use wgpu::ShaderStages as S;

        let camera_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Camera Bind Group Layout"),
            entries: &[uniform_entry(0, S::VERTEX | S::FRAGMENT)],
        });
        let node_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Node Bind Group Layout"),
            entries: &[uniform_entry(0, S::VERTEX)],
        });
        let material_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Material Bind Group Layout"),
            entries: &[
                uniform_entry(0, S::FRAGMENT),
                texture_entry(1, wgpu::TextureViewDimension::D2, filterable()),
                sampler_entry(2),
            ],
        });
        let volume_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Volume Bind Group Layout"),
            entries: &[
                uniform_entry(0, S::FRAGMENT),
                sampler_entry(1),
                texture_entry(2, wgpu::TextureViewDimension::D3, filterable()),
                texture_entry(3, wgpu::TextureViewDimension::D3, filterable()),
                texture_entry(4, wgpu::TextureViewDimension::D2, unfilterable()),
                texture_entry(5, wgpu::TextureViewDimension::D2, unfilterable()),
                uniform_entry(6, S::FRAGMENT),
            ],
        });
        let bright_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Bright Bind Group Layout"),
            entries: &[
                uniform_entry(0, S::COMPUTE),
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: S::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        sample_type: unfilterable(),
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: S::COMPUTE,
                    ty: wgpu::BindingType::StorageTexture {
                        access: wgpu::StorageTextureAccess::WriteOnly,
                        format: HDR_FORMAT,
                        view_dimension: wgpu::TextureViewDimension::D2,
                    },
                    count: None,
                },
            ],
        });
        let downsample_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Bloom Downsample Bind Group Layout"),
            entries: &[
                texture_entry(0, wgpu::TextureViewDimension::D2, filterable()),
                sampler_entry(1),
            ],
        });
        let upsample_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Bloom Upsample Bind Group Layout"),
            entries: &[
                texture_entry(0, wgpu::TextureViewDimension::D2, filterable()),
                sampler_entry(1),
                uniform_entry(2, S::FRAGMENT),
            ],
        });
        let final_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Final Bind Group Layout"),
            entries: &[
                texture_entry(0, wgpu::TextureViewDimension::D2, filterable()),
                texture_entry(1, wgpu::TextureViewDimension::D2, filterable()),
                sampler_entry(2),
            ],
        });

        let unlit = scoped(device, "unlit", || {
            let module = shader_module(device, "Unlit Shader", &shaders.unlit);
            let layout = pipeline_layout(
                device,
                "Unlit Pipeline Layout",
                &[&camera_layout, &node_layout, &material_layout],
            );
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("Unlit Pipeline"),
                layout: Some(&layout),
                vertex: wgpu::VertexState {
                    module: &module,
                    entry_point: Some("vs"),
                    buffers: &[Vertex::LAYOUT],
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &module,
                    entry_point: Some("fs"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: HDR_FORMAT,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    cull_mode: Some(wgpu::Face::Back),
                    front_face: wgpu::FrontFace::Ccw,
                    ..Default::default()
                },
                depth_stencil: Some(wgpu::DepthStencilState {
                    format: DEPTH_FORMAT,
                    depth_write_enabled: true,
                    depth_compare: wgpu::CompareFunction::Less,
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                }),
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            })
        })?;

        let volume_blend = wgpu::BlendState {
            color: wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::SrcAlpha,
                dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
                operation: wgpu::BlendOperation::Add,
            },
            alpha: wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::One,
                dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
                operation: wgpu::BlendOperation::Add,
            },
        };
        let volume = scoped(device, "volume", || {
            let module = shader_module(device, "Volume Shader", &shaders.volume);
            let layout = pipeline_layout(
                device,
                "Volume Pipeline Layout",
                &[&camera_layout, &volume_layout],
            );
            fullscreen_pipeline(device, "Volume Pipeline", &module, &layout, HDR_FORMAT, Some(volume_blend))
        })?;

        let bright = scoped(device, "bright", || {
            let module = shader_module(device, "Bright Shader", &shaders.bright);
            let layout = pipeline_layout(device, "Bright Pipeline Layout", &[&bright_layout]);
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some("Bright Pipeline"),
                layout: Some(&layout),
                module: &module,
                entry_point: Some("main"),
                compilation_options: Default::default(),
                cache: None,
            })
        })?;

        let downsample = scoped(device, "bloom downsample", || {
            let module = shader_module(device, "Bloom Downsample Shader", &shaders.bloom_downsample);
            let layout = pipeline_layout(device, "Bloom Downsample Pipeline Layout", &[&downsample_layout]);
            fullscreen_pipeline(device, "Bloom Downsample Pipeline", &module, &layout, HDR_FORMAT, None)
        })?;

        let additive = wgpu::BlendState {
            color: wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::SrcAlpha,
                dst_factor: wgpu::BlendFactor::One,
                operation: wgpu::BlendOperation::Add,
            },
            alpha: wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::One,
                dst_factor: wgpu::BlendFactor::One,
                operation: wgpu::BlendOperation::Add,
            },
        };
        let upsample = scoped(device, "bloom upsample", || {
            let module = shader_module(device, "Bloom Upsample Shader", &shaders.bloom_upsample);
            let layout = pipeline_layout(device, "Bloom Upsample Pipeline Layout", &[&upsample_layout]);
            fullscreen_pipeline(device, "Bloom Upsample Pipeline", &module, &layout, HDR_FORMAT, Some(additive))
        })?;

        let final_composite = scoped(device, "final", || {
            let module = shader_module(device, "Final Shader", &shaders.final_composite);
            let layout = pipeline_layout(device, "Final Pipeline Layout", &[&final_layout]);
            fullscreen_pipeline(device, "Final Pipeline", &module, &layout, surface_format, None)
        })?;

        log::info!("compiled pass pipelines for surface format {surface_format:?}");

        Ok(Self {
            camera_layout,
            node_layout,
            material_layout,
            volume_layout,
            bright_layout,
            downsample_layout,
            upsample_layout,
            final_layout,
            unlit,
            volume,
            bright,
            downsample,
            upsample,
            final_composite,
        })
    }
}

/// Runs `build` inside validation and internal error scopes.
///
/// Backends report shader translation failures (GLSL has no `textureLoad`
/// on depth textures, for one) as internal errors, so both are captured.
fn scoped<T>(device: &wgpu::Device, label: &'static str, build: impl FnOnce() -> T) -> Result<T> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    device.push_error_scope(wgpu::ErrorFilter::Internal);
    let value = build();
    // Scopes pop innermost first.
    let internal = pollster::block_on(device.pop_error_scope());
    let validation = pollster::block_on(device.pop_error_scope());
    match internal.or(validation) {
        None => Ok(value),
        Some(err) => {
            log::error!("{label} pipeline failed to build: {err}");
            Err(RenderError::Pipeline {
                label,
                message: err.to_string(),
            })
        }
    }
}

fn shader_module(device: &wgpu::Device, label: &str, source: &str) -> wgpu::ShaderModule {
    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    })
}

fn pipeline_layout(
    device: &wgpu::Device,
    label: &str,
    bind_group_layouts: &[&wgpu::BindGroupLayout],
) -> wgpu::PipelineLayout {
    device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts,
        push_constant_ranges: &[],
    })
}

/// A vertex-bufferless pipeline drawing one full-screen triangle.
fn fullscreen_pipeline(
    device: &wgpu::Device,
    label: &str,
    module: &wgpu::ShaderModule,
    layout: &wgpu::PipelineLayout,
    format: wgpu::TextureFormat,
    blend: Option<wgpu::BlendState>,
) -> wgpu::RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module,
            entry_point: Some("vs"),
            buffers: &[],
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module,
            entry_point: Some("fs"),
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend,
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: Default::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            ..Default::default()
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    })
}

fn filterable() -> wgpu::TextureSampleType {
    wgpu::TextureSampleType::Float { filterable: true }
}

fn unfilterable() -> wgpu::TextureSampleType {
    wgpu::TextureSampleType::Float { filterable: false }
}

fn uniform_entry(binding: u32, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn texture_entry(
    binding: u32,
    view_dimension: wgpu::TextureViewDimension,
    sample_type: wgpu::TextureSampleType,
) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type,
            view_dimension,
            multisampled: false,
        },
        count: None,
    }
}

fn sampler_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
        count: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    use crate::gpu::headless_device;

    const OUTPUT_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;

    #[test]
    fn uniform_sizes_match_the_wgsl_structs() {
        assert_eq!(std::mem::size_of::<CameraUniform>(), 128);
        assert_eq!(std::mem::size_of::<NodeUniform>(), 128);
        assert_eq!(std::mem::size_of::<MaterialUniform>(), 16);
        assert_eq!(std::mem::size_of::<VolumeTransformUniform>(), 128);
        assert_eq!(std::mem::size_of::<VolumeParamsUniform>(), 32);
        assert_eq!(std::mem::size_of::<ScalarUniform>(), 16);
    }

    #[test]
    fn camera_projection_starts_at_byte_64() {
        let projection = Mat4::from_scale(Vec3::splat(2.0));
        let uniform = CameraUniform::new(Mat4::IDENTITY, projection);
        let bytes = bytemuck::bytes_of(&uniform);
        let first_projection_float = f32::from_ne_bytes(bytes[64..68].try_into().unwrap());
        assert_eq!(first_projection_float, 2.0);
    }

    #[test]
    fn normal_matrix_undoes_non_uniform_scale() {
        let world = Mat4::from_scale(Vec3::new(2.0, 1.0, 1.0));
        let node = NodeUniform::new(world);
        let normal = Mat4::from_cols_array_2d(&node.normal);
        assert!((normal.x_axis.x - 0.5).abs() < 1e-6);
    }

    #[test]
    fn embedded_shaders_build_on_the_local_adapter() {
        let Some((device, _queue)) = headless_device() else {
            return;
        };
        let built = PipelineSet::new(&device, &ShaderLibrary::embedded(), OUTPUT_FORMAT);
        assert!(built.is_ok(), "{:?}", built.err());
    }

    #[test]
    fn broken_shader_is_reported_instead_of_panicking() {
        let Some((device, _queue)) = headless_device() else {
            return;
        };
        let mut shaders = ShaderLibrary::embedded();
        shaders.bright = "@compute @workgroup_size(8, 8) fn main( {".to_string();

        let err = PipelineSet::new(&device, &shaders, OUTPUT_FORMAT).err();
        assert!(matches!(err, Some(RenderError::Pipeline { label: "bright", .. })));
    }
}
