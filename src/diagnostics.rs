//! GPU pass timings through timestamp queries.
//!
//! Twelve queries bracket the six timed spans (see [`TimedPass`]). Each frame
//! the query set is resolved into a buffer and copied to a mappable one; the
//! map completes on a later frame and is decoded into [`PassTimings`]. While
//! a map is in flight the copy is skipped, so readback never stalls a frame.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::plan::{TimedPass, TimestampSlots};

pub const QUERY_COUNT: u32 = 12;
const BUFFER_SIZE: u64 = QUERY_COUNT as u64 * std::mem::size_of::<u64>() as u64;

const IDLE: u8 = 0;
const MAPPING: u8 = 1;
const READY: u8 = 2;

/// Milliseconds per timed span; `None` when a span did not run or its
/// queries are not ordered.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PassTimings {
    durations_ms: [Option<f64>; 6],
}

impl PassTimings {
    pub fn get(&self, pass: TimedPass) -> Option<f64> {
        self.durations_ms[(pass.query_index() / 2) as usize]
    }

    pub fn total_ms(&self) -> f64 {
        self.durations_ms.iter().flatten().sum()
    }

    /// `Unlit 0.12ms | Volume 1.40ms | ...`
    pub fn summary(&self) -> String {
        TimedPass::ALL
            .iter()
            .filter_map(|&p| self.get(p).map(|ms| format!("{} {:.2}ms", p.label(), ms)))
            .collect::<Vec<_>>()
            .join(" | ")
    }
}

/// Decodes resolved query values. `period_ns` is nanoseconds per tick.
pub fn pass_durations(raw: &[u64], period_ns: f32) -> PassTimings {
    let mut timings = PassTimings::default();
    for (slot, pair) in raw.chunks_exact(2).take(6).enumerate() {
        let (begin, end) = (pair[0], pair[1]);
        if begin == 0 || end <= begin {
            continue;
        }
        let ns = (end - begin) as f64 * period_ns as f64;
        timings.durations_ms[slot] = Some(ns / 1_000_000.0);
    }
    timings
}

pub struct TimestampQueries {
    query_set: wgpu::QuerySet,
    resolve_buffer: wgpu::Buffer,
    readback_buffer: wgpu::Buffer,
    state: Arc<AtomicU8>,
    copied: bool,
    period_ns: f32,
    latest: Option<PassTimings>,
}

impl TimestampQueries {
    /// Requires the device to have been created with `TIMESTAMP_QUERY`.
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        let query_set = device.create_query_set(&wgpu::QuerySetDescriptor {
            label: Some("Pass Timestamps"),
            ty: wgpu::QueryType::Timestamp,
            count: QUERY_COUNT,
        });
        let resolve_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Timestamp Resolve Buffer"),
            size: BUFFER_SIZE,
            usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let readback_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Timestamp Readback Buffer"),
            size: BUFFER_SIZE,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Self {
            query_set,
            resolve_buffer,
            readback_buffer,
            state: Arc::new(AtomicU8::new(IDLE)),
            copied: false,
            period_ns: queue.get_timestamp_period(),
            latest: None,
        }
    }

    pub fn render_writes(&self, slots: TimestampSlots) -> Option<wgpu::RenderPassTimestampWrites<'_>> {
        if slots.beginning.is_none() && slots.end.is_none() {
            return None;
        }
        Some(wgpu::RenderPassTimestampWrites {
            query_set: &self.query_set,
            beginning_of_pass_write_index: slots.beginning,
            end_of_pass_write_index: slots.end,
        })
    }

    pub fn compute_writes(&self, slots: TimestampSlots) -> Option<wgpu::ComputePassTimestampWrites<'_>> {
        if slots.beginning.is_none() && slots.end.is_none() {
            return None;
        }
        Some(wgpu::ComputePassTimestampWrites {
            query_set: &self.query_set,
            beginning_of_pass_write_index: slots.beginning,
            end_of_pass_write_index: slots.end,
        })
    }

    /// Records the resolve and copy into `encoder`, unless the readback
    /// buffer is still mapped from an earlier frame.
    pub fn resolve(&mut self, encoder: &mut wgpu::CommandEncoder) {
        if self.state.load(Ordering::Acquire) != IDLE {
            self.copied = false;
            return;
        }
        encoder.resolve_query_set(&self.query_set, 0..QUERY_COUNT, &self.resolve_buffer, 0);
        encoder.copy_buffer_to_buffer(&self.resolve_buffer, 0, &self.readback_buffer, 0, BUFFER_SIZE);
        self.copied = true;
    }

    /// Starts mapping the readback buffer. Call after the encoder from
    /// [`resolve`](Self::resolve) was submitted.
    pub fn after_submit(&mut self) {
        if !self.copied {
            return;
        }
        self.copied = false;
        self.state.store(MAPPING, Ordering::Release);
        let state = Arc::clone(&self.state);
        self.readback_buffer
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |result| {
                let next = match result {
                    Ok(()) => READY,
                    Err(err) => {
                        log::warn!("timestamp readback failed: {err}");
                        IDLE
                    }
                };
                state.store(next, Ordering::Release);
            });
    }

    /// Polls the device and decodes a completed readback, if any.
    pub fn poll(&mut self, device: &wgpu::Device) -> Option<PassTimings> {
        if let Err(err) = device.poll(wgpu::PollType::Poll) {
            log::warn!("device poll failed: {err}");
        }
        if self.state.load(Ordering::Acquire) != READY {
            return None;
        }

        let timings = {
            let view = self.readback_buffer.slice(..).get_mapped_range();
            let raw: &[u64] = bytemuck::cast_slice(&view);
            pass_durations(raw, self.period_ns)
        };
        self.readback_buffer.unmap();
        self.state.store(IDLE, Ordering::Release);

        log::debug!("pass timings: {}", timings.summary());
        self.latest = Some(timings);
        self.latest
    }

    /// Most recently decoded timings.
    pub fn latest(&self) -> Option<PassTimings> {
        self.latest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::headless_device_with;

    #[test]
    fn durations_scale_by_the_timestamp_period() {
        let mut raw = [0u64; 12];
        raw[0] = 1_000;
        raw[1] = 1_000 + 500_000;
        raw[2] = 2_000_000;
        raw[3] = 4_000_000;

        let timings = pass_durations(&raw, 2.0);
        assert!((timings.get(TimedPass::Unlit).unwrap() - 1.0).abs() < 1e-9);
        assert!((timings.get(TimedPass::Volume).unwrap() - 4.0).abs() < 1e-9);
        assert_eq!(timings.get(TimedPass::Bright), None);
        assert!((timings.total_ms() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn unordered_queries_are_dropped() {
        let mut raw = [0u64; 12];
        raw[10] = 900;
        raw[11] = 100;
        assert_eq!(pass_durations(&raw, 1.0).get(TimedPass::Final), None);
    }

    #[test]
    fn summary_lists_only_measured_passes() {
        let mut raw = [0u64; 12];
        raw[4] = 1;
        raw[5] = 1_000_001;
        let text = pass_durations(&raw, 1.0).summary();
        assert_eq!(text, "Bright 1.00ms");
    }

    #[test]
    fn readback_completes_after_polling() {
        let Some((device, queue)) = headless_device_with(wgpu::Features::TIMESTAMP_QUERY) else {
            return;
        };
        let mut queries = TimestampQueries::new(&device, &queue);
        assert!(queries.poll(&device).is_none());

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Timestamp Test Encoder"),
        });
        queries.resolve(&mut encoder);
        queue.submit(std::iter::once(encoder.finish()));
        queries.after_submit();

        let mut timings = None;
        for _ in 0..200 {
            timings = queries.poll(&device);
            if timings.is_some() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert!(timings.is_some());
        assert_eq!(queries.latest(), timings);

        // Back to idle: the next frame may resolve again.
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor::default());
        queries.resolve(&mut encoder);
        assert!(queries.copied);
    }
}
