//! Scalar voxel fields and their 3D texture lifecycle.
//!
//! - [`VoxelGrid`]: validated CPU-side bytes for one `r8unorm` field.
//! - [`VolumeResource`]: one field uploaded as a 3D texture plus sampler.
//!   Starts empty; every accessor returns `None` until [`VolumeResource::load`]
//!   has issued an upload.
//! - [`AnimatedVolume`]: parallel density and temperature sequences.
//! - [`GpuVolume`]: an uploaded [`AnimatedVolume`] with its color palette.
//!
//! Raw streams are `frame_count` consecutive blocks of `width * height * depth`
//! bytes, x fastest, then y, then z.

use std::fmt;
use std::path::Path;

use crate::error::VolumeError;

/// Dimensions of a voxel grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VoxelExtent {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl VoxelExtent {
    pub const fn new(width: u32, height: u32, depth: u32) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    /// Same size along every axis.
    pub const fn cube(size: u32) -> Self {
        Self::new(size, size, size)
    }

    /// Bytes in one frame of this extent.
    pub fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * self.depth as usize
    }

    fn validate(&self) -> Result<(), VolumeError> {
        if self.width == 0 || self.height == 0 || self.depth == 0 {
            return Err(VolumeError::ZeroExtent {
                width: self.width,
                height: self.height,
                depth: self.depth,
            });
        }
        Ok(())
    }

    fn to_wgpu(self) -> wgpu::Extent3d {
        wgpu::Extent3d {
            width: self.width,
            height: self.height,
            depth_or_array_layers: self.depth,
        }
    }
}

impl Default for VoxelExtent {
    fn default() -> Self {
        Self::cube(32)
    }
}

impl fmt::Display for VoxelExtent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.width, self.height, self.depth)
    }
}

/// One frame of single-channel voxel data whose length matches its extent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoxelGrid {
    extent: VoxelExtent,
    data: Vec<u8>,
}

impl VoxelGrid {
    /// Wraps `data`, failing unless it holds exactly one byte per voxel.
    pub fn from_bytes(extent: VoxelExtent, data: Vec<u8>) -> Result<Self, VolumeError> {
        extent.validate()?;
        let expected = extent.byte_len();
        if data.len() != expected {
            return Err(VolumeError::LengthMismatch {
                expected,
                actual: data.len(),
                width: extent.width,
                height: extent.height,
                depth: extent.depth,
            });
        }
        Ok(Self { extent, data })
    }

    /// An all-zero grid.
    pub fn empty(extent: VoxelExtent) -> Result<Self, VolumeError> {
        Self::from_bytes(extent, vec![0; extent.byte_len()])
    }

    pub fn extent(&self) -> VoxelExtent {
        self.extent
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn get(&self, x: u32, y: u32, z: u32) -> Option<u8> {
        let e = self.extent;
        if x >= e.width || y >= e.height || z >= e.depth {
            return None;
        }
        let idx = (z as usize * e.height as usize + y as usize) * e.width as usize + x as usize;
        self.data.get(idx).copied()
    }

    /// Generates frame `frame` of a looping `frame_count`-frame smoke plume.
    ///
    /// Returns `(density, temperature)`. The plume rises along the grid's x
    /// axis, which the renderer's axis swap maps to world up. Output is
    /// deterministic for a given seed.
    pub fn procedural_plume(
        extent: VoxelExtent,
        frame: usize,
        frame_count: usize,
        seed: u32,
    ) -> Result<(Self, Self), VolumeError> {
        extent.validate()?;
        let len = extent.byte_len();
        let mut density = vec![0u8; len];
        let mut temperature = vec![0u8; len];

        let phase = frame as f32 / frame_count.max(1) as f32 * std::f32::consts::TAU;
        let norm = |v: u32, n: u32| {
            if n > 1 {
                v as f32 / (n - 1) as f32
            } else {
                0.5
            }
        };

        let mut idx = 0;
        for z in 0..extent.depth {
            for y in 0..extent.height {
                for x in 0..extent.width {
                    let h = norm(x, extent.width);
                    let cy = norm(y, extent.height) - 0.5 - 0.08 * (h * 7.0 + phase).sin();
                    let cz = norm(z, extent.depth) - 0.5 - 0.08 * (h * 5.0 + phase).cos();
                    let r = (cy * cy + cz * cz).sqrt();
                    let radius = 0.12 + 0.3 * h;

                    let falloff = (1.0 - r / radius).clamp(0.0, 1.0);
                    let jitter = (hash(x + frame as u32 * 7, y, z, seed) % 64) as f32 / 255.0;
                    let d = (falloff * (1.0 - 0.7 * h) + jitter * falloff).clamp(0.0, 1.0);
                    let t = (falloff * (1.0 - h)).powf(0.7);

                    density[idx] = (d * 255.0) as u8;
                    temperature[idx] = (t * 255.0) as u8;
                    idx += 1;
                }
            }
        }

        Ok((
            Self::from_bytes(extent, density)?,
            Self::from_bytes(extent, temperature)?,
        ))
    }
}

/// Splits a raw stream into frames of `extent`.
pub fn split_raw_frames(extent: VoxelExtent, raw: &[u8]) -> Result<Vec<VoxelGrid>, VolumeError> {
    extent.validate()?;
    let frame_len = extent.byte_len();
    if raw.is_empty() {
        return Err(VolumeError::Empty);
    }
    if raw.len() % frame_len != 0 {
        return Err(VolumeError::PartialFrame {
            len: raw.len(),
            frame_len,
        });
    }
    raw.chunks_exact(frame_len)
        .map(|chunk| VoxelGrid::from_bytes(extent, chunk.to_vec()))
        .collect()
}

/// Reads and splits a raw frame stream from disk.
pub fn read_raw_frames(
    path: impl AsRef<Path>,
    extent: VoxelExtent,
) -> Result<Vec<VoxelGrid>, VolumeError> {
    let path = path.as_ref();
    let raw = std::fs::read(path).map_err(|source| VolumeError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let frames = split_raw_frames(extent, &raw)?;
    log::info!(
        "loaded {} frames of {} from {}",
        frames.len(),
        extent,
        path.display()
    );
    Ok(frames)
}

struct Uploaded {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    sampler: wgpu::Sampler,
}

/// A single scalar field on the GPU.
pub struct VolumeResource {
    label: String,
    filter: wgpu::FilterMode,
    extent: Option<VoxelExtent>,
    uploaded: Option<Uploaded>,
}

impl VolumeResource {
    /// An empty resource. Nothing is allocated until [`load`](Self::load).
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            filter: wgpu::FilterMode::Linear,
            extent: None,
            uploaded: None,
        }
    }

    /// Replaces the backing texture with `grid`, destroying any previous one first.
    pub fn load(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, grid: &VoxelGrid) {
        use wgpu::util::DeviceExt;

        if let Some(old) = self.uploaded.take() {
            old.texture.destroy();
        }

        let extent = grid.extent();
        let texture = device.create_texture_with_data(
            queue,
            &wgpu::TextureDescriptor {
                label: Some(&self.label),
                size: extent.to_wgpu(),
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D3,
                format: wgpu::TextureFormat::R8Unorm,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            grid.data(),
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(&format!("{} View", self.label)),
            dimension: Some(wgpu::TextureViewDimension::D3),
            ..Default::default()
        });
        let sampler = create_sampler(device, &self.label, self.filter);

        self.extent = Some(extent);
        self.uploaded = Some(Uploaded {
            texture,
            view,
            sampler,
        });
    }

    /// Swaps the sampler filter without re-uploading the texture.
    pub fn set_filter(&mut self, device: &wgpu::Device, filter: wgpu::FilterMode) {
        self.filter = filter;
        if let Some(uploaded) = &mut self.uploaded {
            uploaded.sampler = create_sampler(device, &self.label, filter);
        }
    }

    pub fn is_ready(&self) -> bool {
        self.uploaded.is_some()
    }

    pub fn extent(&self) -> Option<VoxelExtent> {
        self.extent
    }

    pub fn filter(&self) -> wgpu::FilterMode {
        self.filter
    }

    pub fn texture(&self) -> Option<&wgpu::Texture> {
        self.uploaded.as_ref().map(|u| &u.texture)
    }

    pub fn view(&self) -> Option<&wgpu::TextureView> {
        self.uploaded.as_ref().map(|u| &u.view)
    }

    pub fn sampler(&self) -> Option<&wgpu::Sampler> {
        self.uploaded.as_ref().map(|u| &u.sampler)
    }
}

impl Drop for VolumeResource {
    fn drop(&mut self) {
        if let Some(uploaded) = self.uploaded.take() {
            uploaded.texture.destroy();
        }
    }
}

fn create_sampler(device: &wgpu::Device, label: &str, filter: wgpu::FilterMode) -> wgpu::Sampler {
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some(&format!("{label} Sampler")),
        address_mode_u: wgpu::AddressMode::ClampToEdge,
        address_mode_v: wgpu::AddressMode::ClampToEdge,
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: filter,
        min_filter: filter,
        mipmap_filter: wgpu::FilterMode::Nearest,
        ..Default::default()
    })
}

/// Temperature-to-emission ramp, coldest first. Values above 1 feed the bloom.
pub const FIRE_PALETTE: [[f32; 4]; 6] = [
    [0.2, 0.2, 0.2, 1.0],
    [0.3, 0.3, 0.3, 1.0],
    [0.4, 0.4, 0.4, 1.0],
    [1.5, 0.4, 0.4, 1.0],
    [1.8, 1.2, 0.1, 1.0],
    [2.0, 2.0, 0.8, 1.0],
];

/// Density and temperature sequences stepped together by one frame index.
#[derive(Clone, Debug)]
pub struct AnimatedVolume {
    density: Vec<VoxelGrid>,
    temperature: Vec<VoxelGrid>,
}

impl AnimatedVolume {
    /// Pairs the sequences. Both must be non-empty, equally long, and share one extent.
    pub fn new(density: Vec<VoxelGrid>, temperature: Vec<VoxelGrid>) -> Result<Self, VolumeError> {
        if density.len() != temperature.len() {
            return Err(VolumeError::FrameCountMismatch {
                density: density.len(),
                temperature: temperature.len(),
            });
        }
        let Some(first) = density.first() else {
            return Err(VolumeError::Empty);
        };

        let expected = first.extent();
        for (index, grid) in density.iter().chain(temperature.iter()).enumerate() {
            if grid.extent() != expected {
                return Err(VolumeError::ExtentMismatch {
                    index: index % density.len(),
                    expected,
                    found: grid.extent(),
                });
            }
        }

        Ok(Self {
            density,
            temperature,
        })
    }

    /// A looping procedural plume of `frame_count` frames.
    pub fn procedural(extent: VoxelExtent, frame_count: usize, seed: u32) -> Result<Self, VolumeError> {
        let frame_count = frame_count.max(1);
        let (density, temperature): (Vec<_>, Vec<_>) = (0..frame_count)
            .map(|f| VoxelGrid::procedural_plume(extent, f, frame_count, seed))
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .unzip();
        Self::new(density, temperature)
    }

    pub fn frame_count(&self) -> usize {
        self.density.len()
    }

    pub fn extent(&self) -> VoxelExtent {
        self.density[0].extent()
    }

    pub fn density(&self) -> &[VoxelGrid] {
        &self.density
    }

    pub fn temperature(&self) -> &[VoxelGrid] {
        &self.temperature
    }

    /// Uploads every frame and the palette.
    pub fn upload(&self, device: &wgpu::Device, queue: &wgpu::Queue, label: &str) -> GpuVolume {
        let upload_all = |grids: &[VoxelGrid], kind: &str| {
            grids
                .iter()
                .enumerate()
                .map(|(i, grid)| {
                    let mut frame = VolumeResource::new(format!("{label} {kind} {i}"));
                    frame.load(device, queue, grid);
                    frame
                })
                .collect::<Vec<_>>()
        };

        let density = upload_all(&self.density, "Density");
        let temperature = upload_all(&self.temperature, "Temperature");
        let (palette, palette_view) = create_palette(device, queue, label);

        log::debug!(
            "uploaded volume '{label}': {} frames of {}",
            self.frame_count(),
            self.extent()
        );

        GpuVolume {
            density,
            temperature,
            palette,
            palette_view,
        }
    }
}

fn create_palette(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    label: &str,
) -> (wgpu::Texture, wgpu::TextureView) {
    use wgpu::util::DeviceExt;

    let texture = device.create_texture_with_data(
        queue,
        &wgpu::TextureDescriptor {
            label: Some(&format!("{label} Palette")),
            size: wgpu::Extent3d {
                width: FIRE_PALETTE.len() as u32,
                height: 1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba32Float,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        },
        wgpu::util::TextureDataOrder::LayerMajor,
        bytemuck::cast_slice(&FIRE_PALETTE),
    );
    // 6×1 2D rather than 1D: GLES has no 1D textures.
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    (texture, view)
}

/// An [`AnimatedVolume`] resident on the GPU.
pub struct GpuVolume {
    density: Vec<VolumeResource>,
    temperature: Vec<VolumeResource>,
    palette: wgpu::Texture,
    palette_view: wgpu::TextureView,
}

impl GpuVolume {
    pub fn frame_count(&self) -> usize {
        self.density.len()
    }

    /// Density and temperature for `index`, wrapped into range.
    pub fn frame(&self, index: usize) -> (&VolumeResource, &VolumeResource) {
        let i = index % self.density.len().max(1);
        (&self.density[i], &self.temperature[i])
    }

    pub fn palette_view(&self) -> &wgpu::TextureView {
        &self.palette_view
    }

    /// Applies `filter` to every frame's sampler.
    pub fn set_filter(&mut self, device: &wgpu::Device, filter: wgpu::FilterMode) {
        for frame in self.density.iter_mut().chain(self.temperature.iter_mut()) {
            frame.set_filter(device, filter);
        }
    }
}

impl Drop for GpuVolume {
    fn drop(&mut self) {
        self.palette.destroy();
    }
}

fn hash(x: u32, y: u32, z: u32, seed: u32) -> u32 {
    let mut h = seed;
    h = h.wrapping_add(x.wrapping_mul(374761393));
    h = h.wrapping_add(y.wrapping_mul(668265263));
    h = h.wrapping_add(z.wrapping_mul(2246822519));
    h ^= h >> 13;
    h = h.wrapping_mul(1274126177);
    h ^= h >> 16;
    h
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::headless_device;

    #[test]
    fn default_extent_is_32_cubed() {
        let extent = VoxelExtent::default();
        assert_eq!(extent, VoxelExtent::cube(32));
        assert_eq!(extent.byte_len(), 32768);
        assert_eq!(extent.to_string(), "32x32x32");
    }

    #[test]
    fn grid_accepts_exact_length() {
        let extent = VoxelExtent::new(4, 3, 2);
        let data: Vec<u8> = (0..24).collect();
        let grid = VoxelGrid::from_bytes(extent, data).unwrap();
        assert_eq!(grid.get(0, 0, 0), Some(0));
        assert_eq!(grid.get(1, 0, 0), Some(1));
        assert_eq!(grid.get(0, 1, 0), Some(4));
        assert_eq!(grid.get(0, 0, 1), Some(12));
        assert_eq!(grid.get(4, 0, 0), None);
    }

    #[test]
    fn grid_rejects_wrong_length() {
        let err = VoxelGrid::from_bytes(VoxelExtent::default(), vec![0; 100]).unwrap_err();
        assert!(matches!(
            err,
            VolumeError::LengthMismatch {
                expected: 32768,
                actual: 100,
                ..
            }
        ));
    }

    #[test]
    fn grid_rejects_zero_extent() {
        let err = VoxelGrid::from_bytes(VoxelExtent::new(0, 4, 4), vec![]).unwrap_err();
        assert!(matches!(err, VolumeError::ZeroExtent { width: 0, .. }));
    }

    #[test]
    fn unloaded_resource_exposes_nothing() {
        let frame = VolumeResource::new("Density");
        assert!(!frame.is_ready());
        assert!(frame.texture().is_none());
        assert!(frame.view().is_none());
        assert!(frame.sampler().is_none());
        assert!(frame.extent().is_none());
    }

    #[test]
    fn split_yields_one_grid_per_frame() {
        let extent = VoxelExtent::cube(2);
        let raw: Vec<u8> = (0..24).collect();
        let frames = split_raw_frames(extent, &raw).unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[1].data(), &[8, 9, 10, 11, 12, 13, 14, 15]);
    }

    #[test]
    fn split_rejects_partial_and_empty_streams() {
        let extent = VoxelExtent::cube(2);
        assert!(matches!(
            split_raw_frames(extent, &[0; 9]),
            Err(VolumeError::PartialFrame { len: 9, frame_len: 8 })
        ));
        assert!(matches!(split_raw_frames(extent, &[]), Err(VolumeError::Empty)));
    }

    #[test]
    fn missing_file_reports_the_path() {
        let err = read_raw_frames("/nonexistent/density.raw", VoxelExtent::default()).unwrap_err();
        match err {
            VolumeError::Io { path, .. } => assert!(path.ends_with("density.raw")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn animated_volume_requires_matching_sequences() {
        let extent = VoxelExtent::cube(2);
        let grid = || VoxelGrid::empty(extent).unwrap();

        assert!(matches!(
            AnimatedVolume::new(vec![grid(), grid()], vec![grid()]),
            Err(VolumeError::FrameCountMismatch {
                density: 2,
                temperature: 1
            })
        ));
        assert!(matches!(AnimatedVolume::new(vec![], vec![]), Err(VolumeError::Empty)));

        let other = VoxelGrid::empty(VoxelExtent::cube(3)).unwrap();
        assert!(matches!(
            AnimatedVolume::new(vec![grid(), grid()], vec![grid(), other]),
            Err(VolumeError::ExtentMismatch { index: 1, .. })
        ));
    }

    #[test]
    fn procedural_plume_is_deterministic_and_dense_near_the_base() {
        let extent = VoxelExtent::cube(16);
        let (a, _) = VoxelGrid::procedural_plume(extent, 3, 10, 42).unwrap();
        let (b, temp) = VoxelGrid::procedural_plume(extent, 3, 10, 42).unwrap();
        assert_eq!(a, b);

        let base = a.get(0, 8, 8).unwrap();
        let corner = a.get(0, 0, 0).unwrap();
        assert!(base > corner);
        assert!(temp.get(0, 8, 8).unwrap() > temp.get(15, 8, 8).unwrap());
    }

    #[test]
    fn procedural_volume_has_requested_frames() {
        let volume = AnimatedVolume::procedural(VoxelExtent::cube(8), 5, 1).unwrap();
        assert_eq!(volume.frame_count(), 5);
        assert_eq!(volume.temperature().len(), 5);
        assert_eq!(volume.extent(), VoxelExtent::cube(8));
    }

    #[test]
    fn palette_ends_hot() {
        assert_eq!(FIRE_PALETTE.len(), 6);
        assert!(FIRE_PALETTE[5][0] > 1.0);
        assert!(FIRE_PALETTE.iter().all(|c| c[3] == 1.0));
    }

    #[test]
    fn accessors_are_absent_until_loaded() {
        let Some((device, queue)) = headless_device() else {
            return;
        };
        let mut resource = VolumeResource::new("Test Density");
        assert!(!resource.is_ready());
        assert!(resource.texture().is_none());
        assert!(resource.view().is_none());
        assert!(resource.sampler().is_none());
        assert!(resource.extent().is_none());

        let extent = VoxelExtent::cube(8);
        resource.load(&device, &queue, &VoxelGrid::empty(extent).unwrap());
        let texture = resource.texture().unwrap();
        assert_eq!(texture.dimension(), wgpu::TextureDimension::D3);
        assert_eq!(texture.format(), wgpu::TextureFormat::R8Unorm);
        assert_eq!(texture.size(), extent.to_wgpu());
        assert!(resource.view().is_some());
        assert!(resource.sampler().is_some());
        assert_eq!(resource.extent(), Some(extent));
    }

    #[test]
    fn filter_carries_over_a_reload() {
        let Some((device, queue)) = headless_device() else {
            return;
        };
        let mut resource = VolumeResource::new("Test Temperature");
        resource.set_filter(&device, wgpu::FilterMode::Nearest);
        resource.load(&device, &queue, &VoxelGrid::empty(VoxelExtent::cube(8)).unwrap());
        assert_eq!(resource.filter(), wgpu::FilterMode::Nearest);

        resource.set_filter(&device, wgpu::FilterMode::Linear);
        let smaller = VoxelExtent::cube(4);
        resource.load(&device, &queue, &VoxelGrid::empty(smaller).unwrap());
        assert_eq!(resource.filter(), wgpu::FilterMode::Linear);
        assert_eq!(resource.texture().map(|t| t.size()), Some(smaller.to_wgpu()));
    }

    #[test]
    fn uploaded_volume_wraps_frames_and_shares_one_filter() {
        let Some((device, queue)) = headless_device() else {
            return;
        };
        let volume = AnimatedVolume::procedural(VoxelExtent::cube(4), 3, 1).unwrap();
        let mut uploaded = volume.upload(&device, &queue, "Test Volume");
        assert_eq!(uploaded.frame_count(), 3);
        assert!(std::ptr::eq(uploaded.frame(4).0, uploaded.frame(1).0));

        uploaded.set_filter(&device, wgpu::FilterMode::Nearest);
        for i in 0..3 {
            let (density, temperature) = uploaded.frame(i);
            assert_eq!(density.filter(), wgpu::FilterMode::Nearest);
            assert_eq!(temperature.filter(), wgpu::FilterMode::Nearest);
        }

        let palette = uploaded.palette.size();
        assert_eq!((palette.width, palette.height), (FIRE_PALETTE.len() as u32, 1));
        assert_eq!(uploaded.palette.dimension(), wgpu::TextureDimension::D2);
    }
}
