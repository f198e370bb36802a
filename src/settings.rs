//! Tuning surface exposed to external controls (a settings panel, key bindings).
//!
//! Every value is range-checked on write, so the renderer can read
//! [`RenderSettings`] at pass setup each frame without re-validating.

/// Number of raymarch samples taken through a volume.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StepCount {
    S16,
    S32,
    S64,
    S128,
    S256,
}

impl StepCount {
    pub const ALL: [StepCount; 5] = [
        StepCount::S16,
        StepCount::S32,
        StepCount::S64,
        StepCount::S128,
        StepCount::S256,
    ];

    pub fn get(self) -> u32 {
        match self {
            StepCount::S16 => 16,
            StepCount::S32 => 32,
            StepCount::S64 => 64,
            StepCount::S128 => 128,
            StepCount::S256 => 256,
        }
    }

    /// Parses one of the supported step counts.
    pub fn from_count(count: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.get() == count)
    }
}

/// Integer divisor applied to the canvas size for the offscreen targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResolutionFactor {
    Full,
    Halved,
    Quartered,
}

impl ResolutionFactor {
    pub fn divisor(self) -> u32 {
        match self {
            ResolutionFactor::Full => 1,
            ResolutionFactor::Halved => 2,
            ResolutionFactor::Quartered => 4,
        }
    }

    /// Next factor in Full → Halved → Quartered → Full order.
    pub fn cycle(self) -> Self {
        match self {
            ResolutionFactor::Full => ResolutionFactor::Halved,
            ResolutionFactor::Halved => ResolutionFactor::Quartered,
            ResolutionFactor::Quartered => ResolutionFactor::Full,
        }
    }
}

/// Procedural noise used to perturb the density field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NoiseType {
    Perlin,
    Worley,
    WorleyCurl,
}

impl NoiseType {
    /// Value uploaded to the volume shader.
    pub fn shader_id(self) -> u32 {
        match self {
            NoiseType::Perlin => 1,
            NoiseType::Worley => 2,
            NoiseType::WorleyCurl => 3,
        }
    }

    pub fn cycle(self) -> Self {
        match self {
            NoiseType::Perlin => NoiseType::Worley,
            NoiseType::Worley => NoiseType::WorleyCurl,
            NoiseType::WorleyCurl => NoiseType::Perlin,
        }
    }
}

pub const OPACITY_RANGE: (f32, f32) = (0.0, 40.0);
pub const BLOOM_INTENSITY_RANGE: (f32, f32) = (0.0, 2.0);
pub const BLOOM_THRESHOLD_RANGE: (f32, f32) = (0.0, 3.0);
pub const ANIMATION_INTERVAL_RANGE_MS: (f64, f64) = (50.0, 150.0);

/// Renderer settings, read at pass setup every frame.
///
/// Continuous values are clamped into their documented ranges by the setters.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderSettings {
    pub step_count: StepCount,
    pub resolution: ResolutionFactor,
    volume_opacity: f32,
    bloom_intensity: f32,
    bloom_threshold: f32,
    animation_interval_ms: f64,
    pub noise_type: NoiseType,
    pub show_noise: bool,
    pub animation_paused: bool,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            step_count: StepCount::S64,
            resolution: ResolutionFactor::Quartered,
            volume_opacity: 30.0,
            bloom_intensity: 0.8,
            bloom_threshold: 1.0,
            animation_interval_ms: 100.0,
            noise_type: NoiseType::WorleyCurl,
            show_noise: false,
            animation_paused: false,
        }
    }
}

impl RenderSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn volume_opacity(&self) -> f32 {
        self.volume_opacity
    }

    pub fn bloom_intensity(&self) -> f32 {
        self.bloom_intensity
    }

    pub fn bloom_threshold(&self) -> f32 {
        self.bloom_threshold
    }

    pub fn animation_interval_ms(&self) -> f64 {
        self.animation_interval_ms
    }

    pub fn set_volume_opacity(&mut self, value: f32) -> &mut Self {
        self.volume_opacity = clamp_f32(value, OPACITY_RANGE);
        self
    }

    pub fn set_bloom_intensity(&mut self, value: f32) -> &mut Self {
        self.bloom_intensity = clamp_f32(value, BLOOM_INTENSITY_RANGE);
        self
    }

    pub fn set_bloom_threshold(&mut self, value: f32) -> &mut Self {
        self.bloom_threshold = clamp_f32(value, BLOOM_THRESHOLD_RANGE);
        self
    }

    pub fn set_animation_interval_ms(&mut self, value: f64) -> &mut Self {
        let (lo, hi) = ANIMATION_INTERVAL_RANGE_MS;
        self.animation_interval_ms = if value.is_nan() { lo } else { value.clamp(lo, hi) };
        self
    }
}

fn clamp_f32(value: f32, (lo, hi): (f32, f32)) -> f32 {
    if value.is_nan() { lo } else { value.clamp(lo, hi) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_shipped_look() {
        let s = RenderSettings::default();
        assert_eq!(s.step_count.get(), 64);
        assert_eq!(s.resolution.divisor(), 4);
        assert_eq!(s.volume_opacity(), 30.0);
        assert_eq!(s.bloom_intensity(), 0.8);
        assert_eq!(s.bloom_threshold(), 1.0);
        assert_eq!(s.animation_interval_ms(), 100.0);
        assert_eq!(s.noise_type.shader_id(), 3);
        assert!(!s.show_noise);
        assert!(!s.animation_paused);
    }

    #[test]
    fn setters_clamp_into_range() {
        let mut s = RenderSettings::default();
        s.set_volume_opacity(100.0)
            .set_bloom_intensity(-1.0)
            .set_bloom_threshold(f32::NAN)
            .set_animation_interval_ms(10.0);
        assert_eq!(s.volume_opacity(), 40.0);
        assert_eq!(s.bloom_intensity(), 0.0);
        assert_eq!(s.bloom_threshold(), 0.0);
        assert_eq!(s.animation_interval_ms(), 50.0);

        s.set_animation_interval_ms(500.0);
        assert_eq!(s.animation_interval_ms(), 150.0);
    }

    #[test]
    fn step_count_only_accepts_supported_values() {
        assert_eq!(StepCount::from_count(128), Some(StepCount::S128));
        assert_eq!(StepCount::from_count(100), None);
    }

    #[test]
    fn resolution_cycle_visits_every_factor() {
        let mut r = ResolutionFactor::Full;
        let mut seen = vec![r.divisor()];
        for _ in 0..2 {
            r = r.cycle();
            seen.push(r.divisor());
        }
        assert_eq!(seen, vec![1, 2, 4]);
        assert_eq!(r.cycle(), ResolutionFactor::Full);
    }
}
