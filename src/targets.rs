//! Offscreen targets shared by the passes: HDR color, depth, and the bloom mip chain.
//!
//! All three share one base extent, the canvas size divided by the
//! resolution factor. [`TargetTracker`] decides when that extent changed;
//! [`RenderTargets`] holds the textures and is destroyed and rebuilt as a unit.

pub const HDR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Canvas size divided by `divisor`, never below 1×1.
pub fn base_extent(canvas_width: u32, canvas_height: u32, divisor: u32) -> (u32, u32) {
    let d = divisor.max(1);
    ((canvas_width / d).max(1), (canvas_height / d).max(1))
}

/// Levels in the bloom chain: `ceil(log2(max(w, h) / divisor))`, at least 1,
/// and never more than a `base_extent` texture can hold.
pub fn bloom_mip_count(canvas_width: u32, canvas_height: u32, divisor: u32) -> u32 {
    // Smallest n with divisor * 2^n >= largest, in integers to stay exact.
    let largest = canvas_width.max(canvas_height) as u64;
    let divisor64 = divisor.max(1) as u64;
    let mut wanted = 0u32;
    while (divisor64 << wanted) < largest {
        wanted += 1;
    }

    let (bw, bh) = base_extent(canvas_width, canvas_height, divisor);
    let possible = 32 - bw.max(bh).leading_zeros();
    wanted.clamp(1, possible.max(1))
}

/// Identity of one target allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TargetKey {
    pub width: u32,
    pub height: u32,
    pub divisor: u32,
    pub mip_count: u32,
}

impl TargetKey {
    pub fn new(canvas_width: u32, canvas_height: u32, divisor: u32) -> Self {
        let (width, height) = base_extent(canvas_width, canvas_height, divisor);
        Self {
            width,
            height,
            divisor: divisor.max(1),
            mip_count: bloom_mip_count(canvas_width, canvas_height, divisor),
        }
    }
}

/// Remembers the last allocated [`TargetKey`] and counts reallocations.
#[derive(Debug, Default)]
pub struct TargetTracker {
    current: Option<TargetKey>,
    generation: u64,
}

impl TargetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the new key if targets must be (re)created for this canvas
    /// size and divisor, `None` if the existing ones still fit.
    pub fn check(&mut self, canvas_width: u32, canvas_height: u32, divisor: u32) -> Option<TargetKey> {
        let key = TargetKey::new(canvas_width, canvas_height, divisor);
        if self.current == Some(key) {
            return None;
        }
        self.current = Some(key);
        self.generation += 1;
        Some(key)
    }

    pub fn current(&self) -> Option<TargetKey> {
        self.current
    }

    /// Bumped on every reallocation. Bind groups referencing targets record it.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

pub struct RenderTargets {
    pub key: TargetKey,
    hdr: wgpu::Texture,
    pub hdr_view: wgpu::TextureView,
    depth: wgpu::Texture,
    pub depth_view: wgpu::TextureView,
    bloom: wgpu::Texture,
    /// One single-level view per mip, for sampling and as render attachments.
    pub bloom_mip_views: Vec<wgpu::TextureView>,
    /// Mip 0 as a storage image for the bright pass.
    pub bloom_storage_view: wgpu::TextureView,
}

impl RenderTargets {
    pub fn new(device: &wgpu::Device, key: TargetKey) -> Self {
        let size = wgpu::Extent3d {
            width: key.width,
            height: key.height,
            depth_or_array_layers: 1,
        };

        let hdr = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("HDR Target"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: HDR_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let hdr_view = hdr.create_view(&wgpu::TextureViewDescriptor::default());

        let depth = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Depth Target"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let depth_view = depth.create_view(&wgpu::TextureViewDescriptor::default());

        let bloom = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Bloom Target"),
            size,
            mip_level_count: key.mip_count,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: HDR_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::STORAGE_BINDING,
            view_formats: &[],
        });
        let mip_view = |level: u32| {
            bloom.create_view(&wgpu::TextureViewDescriptor {
                label: Some(&format!("Bloom Mip {level}")),
                base_mip_level: level,
                mip_level_count: Some(1),
                ..Default::default()
            })
        };
        let bloom_mip_views = (0..key.mip_count).map(mip_view).collect();
        let bloom_storage_view = mip_view(0);

        log::info!(
            "created render targets {}x{} (1/{} scale, {} bloom mips)",
            key.width,
            key.height,
            key.divisor,
            key.mip_count
        );

        Self {
            key,
            hdr,
            hdr_view,
            depth,
            depth_view,
            bloom,
            bloom_mip_views,
            bloom_storage_view,
        }
    }

    /// Releases the GPU memory now rather than when the last reference drops.
    pub fn destroy(&self) {
        self.hdr.destroy();
        self.depth.destroy();
        self.bloom.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_extent_never_collapses_to_zero() {
        assert_eq!(base_extent(1920, 1080, 4), (480, 270));
        assert_eq!(base_extent(3, 2, 4), (1, 1));
        assert_eq!(base_extent(0, 0, 1), (1, 1));
    }

    #[test]
    fn mip_count_follows_the_log2_rule() {
        // 1920/4 = 480 -> log2 = 8.9 -> 9
        assert_eq!(bloom_mip_count(1920, 1080, 4), 9);
        // 1024/1 = 1024 -> exactly 10
        assert_eq!(bloom_mip_count(1024, 512, 1), 10);
        assert_eq!(bloom_mip_count(1, 1, 1), 1);
        assert_eq!(bloom_mip_count(2, 2, 4), 1);
    }

    #[test]
    fn mip_count_fits_the_base_texture() {
        for (w, h, d) in [(1920, 1080, 1), (800, 600, 2), (7, 5, 1), (1000, 1, 4)] {
            let (bw, bh) = base_extent(w, h, d);
            let max_levels = 32 - bw.max(bh).leading_zeros();
            assert!(bloom_mip_count(w, h, d) <= max_levels);
        }
    }

    #[test]
    fn unchanged_dimensions_do_not_recreate() {
        let mut tracker = TargetTracker::new();
        assert!(tracker.check(800, 600, 1).is_some());
        assert!(tracker.check(800, 600, 1).is_none());
        assert_eq!(tracker.generation(), 1);
    }

    #[test]
    fn resolution_change_recreates_at_quarter_size() {
        let mut tracker = TargetTracker::new();
        let full = tracker.check(1600, 1200, 1).unwrap();
        assert_eq!((full.width, full.height), (1600, 1200));

        let quarter = tracker.check(1600, 1200, 4).unwrap();
        assert_eq!((quarter.width, quarter.height), (400, 300));
        assert_eq!(tracker.generation(), 2);
        assert_eq!(tracker.current(), Some(quarter));
    }

    #[test]
    fn canvas_resize_recreates() {
        let mut tracker = TargetTracker::new();
        tracker.check(800, 600, 2);
        assert!(tracker.check(1024, 600, 2).is_some());
    }
}
