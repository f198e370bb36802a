//! Generic upload helpers shared by the passes.
//!
//! [`GpuResourcePreparer`] turns CPU-side assets (meshes, RGBA images, uniform
//! structs) into wgpu objects. It also owns the handful of resources every
//! frame reuses: a 1×1 white fallback texture and the two samplers.

use wgpu::util::DeviceExt;

use crate::mesh::{Mesh, MeshData};

/// A sampled 2D texture and its default view.
#[derive(Debug)]
pub struct GpuTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
}

pub struct GpuResourcePreparer {
    white: GpuTexture,
    /// Linear, repeating. Material textures.
    pub repeat_sampler: wgpu::Sampler,
    /// Linear, clamped. Post-process and volume lookups.
    pub clamp_sampler: wgpu::Sampler,
}

impl GpuResourcePreparer {
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        let white = Self::texture_from_rgba(device, queue, &[255; 4], 1, 1, "White Texture");
        Self {
            white,
            repeat_sampler: Self::sampler(device, "Repeat Sampler", wgpu::AddressMode::Repeat),
            clamp_sampler: Self::sampler(device, "Clamp Sampler", wgpu::AddressMode::ClampToEdge),
        }
    }

    /// Fallback for materials without a texture.
    pub fn white_texture(&self) -> &GpuTexture {
        &self.white
    }

    pub fn upload_mesh(&self, device: &wgpu::Device, data: &MeshData, label: &str) -> Mesh {
        Mesh::new(device, data, label)
    }

    pub fn upload_image(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        image: &image::RgbaImage,
        label: &str,
    ) -> GpuTexture {
        let (width, height) = image.dimensions();
        Self::texture_from_rgba(device, queue, image.as_raw(), width, height, label)
    }

    /// A uniform buffer initialized with `value`, writable later through the queue.
    pub fn uniform_buffer<T: bytemuck::Pod>(&self, device: &wgpu::Device, value: &T, label: &str) -> wgpu::Buffer {
        device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: bytemuck::bytes_of(value),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        })
    }

    fn texture_from_rgba(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        data: &[u8],
        width: u32,
        height: u32,
        label: &str,
    ) -> GpuTexture {
        let texture = device.create_texture_with_data(
            queue,
            &wgpu::TextureDescriptor {
                label: Some(label),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8UnormSrgb,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            data,
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        GpuTexture { texture, view }
    }

    fn sampler(device: &wgpu::Device, label: &str, address: wgpu::AddressMode) -> wgpu::Sampler {
        device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some(label),
            address_mode_u: address,
            address_mode_v: address,
            address_mode_w: address,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::headless_device;

    #[test]
    fn images_upload_at_their_own_size() {
        let Some((device, queue)) = headless_device() else {
            return;
        };
        let preparer = GpuResourcePreparer::new(&device, &queue);
        assert_eq!(preparer.white_texture().texture.width(), 1);

        let image = image::RgbaImage::new(8, 4);
        let uploaded = preparer.upload_image(&device, &queue, &image, "Test Image");
        assert_eq!((uploaded.texture.width(), uploaded.texture.height()), (8, 4));
    }
}
