//! Fixed-interval stepping of the animated volume, decoupled from the display rate.

/// Advances a frame index every `interval` milliseconds of accumulated time.
///
/// Leftover time carries over to the next step (the interval is subtracted,
/// not reset), so a steady frame rate that does not divide the interval does
/// not drift.
#[derive(Clone, Debug)]
pub struct AnimationClock {
    frame_count: usize,
    current: usize,
    accumulated_ms: f64,
    total_ms: f64,
    noise_time: f32,
}

impl AnimationClock {
    /// Creates a clock over `frame_count` frames. A zero count is treated as one.
    pub fn new(frame_count: usize) -> Self {
        Self {
            frame_count: frame_count.max(1),
            current: 0,
            accumulated_ms: 0.0,
            total_ms: 0.0,
            noise_time: 0.0,
        }
    }

    /// Accumulates `delta_ms` and steps once per whole interval.
    ///
    /// Returns the number of steps taken. Does nothing while `paused`.
    pub fn advance(&mut self, delta_ms: f64, interval_ms: f64, paused: bool) -> usize {
        if paused || interval_ms <= 0.0 || !delta_ms.is_finite() || delta_ms <= 0.0 {
            return 0;
        }

        self.accumulated_ms += delta_ms;
        self.total_ms += delta_ms;

        let mut steps = 0;
        while self.accumulated_ms >= interval_ms {
            self.accumulated_ms -= interval_ms;
            self.current = (self.current + 1) % self.frame_count;
            steps += 1;
        }

        if steps > 0 {
            self.noise_time = (self.total_ms / 1000.0) as f32;
        }
        steps
    }

    pub fn current_frame(&self) -> usize {
        self.current
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    /// Time not yet consumed by a step.
    pub fn accumulated_ms(&self) -> f64 {
        self.accumulated_ms
    }

    /// Seconds of animated time at the most recent step; drives the noise offset.
    pub fn noise_time(&self) -> f32 {
        self.noise_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_interval_steps_once_and_empties_the_accumulator() {
        let mut clock = AnimationClock::new(70);
        let steps = clock.advance(100.0, 100.0, false);
        assert_eq!(steps, 1);
        assert_eq!(clock.current_frame(), 1);
        assert_eq!(clock.accumulated_ms(), 0.0);
    }

    #[test]
    fn leftover_time_carries_over() {
        let mut clock = AnimationClock::new(10);
        clock.advance(75.0, 100.0, false);
        assert_eq!(clock.current_frame(), 0);
        clock.advance(75.0, 100.0, false);
        assert_eq!(clock.current_frame(), 1);
        assert_eq!(clock.accumulated_ms(), 50.0);
    }

    #[test]
    fn index_matches_elapsed_over_interval_modulo_count() {
        let mut clock = AnimationClock::new(7);
        let mut total = 0.0;
        for delta in [16.0, 25.0, 250.0, 8.0, 1.0, 400.0, 33.0, 100.0] {
            clock.advance(delta, 50.0, false);
            total += delta;
            let expected = ((total / 50.0_f64).floor() as usize) % 7;
            assert_eq!(clock.current_frame(), expected);
            assert!(clock.current_frame() < clock.frame_count());
        }
    }

    #[test]
    fn wraps_back_to_zero() {
        let mut clock = AnimationClock::new(3);
        clock.advance(300.0, 100.0, false);
        assert_eq!(clock.current_frame(), 0);
    }

    #[test]
    fn paused_clock_does_not_accumulate() {
        let mut clock = AnimationClock::new(4);
        clock.advance(500.0, 100.0, true);
        assert_eq!(clock.current_frame(), 0);
        assert_eq!(clock.accumulated_ms(), 0.0);

        clock.advance(100.0, 100.0, false);
        assert_eq!(clock.current_frame(), 1);
    }

    #[test]
    fn noise_time_tracks_the_last_step() {
        let mut clock = AnimationClock::new(4);
        clock.advance(50.0, 100.0, false);
        assert_eq!(clock.noise_time(), 0.0);
        clock.advance(250.0, 100.0, false);
        assert!((clock.noise_time() - 0.3).abs() < 1e-6);
    }
}
