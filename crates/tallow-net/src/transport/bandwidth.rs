//! Link quality measurement
//!
//! Samples round-trip time, loss, and throughput at one hertz or faster
//! and averages over a 30-sample sliding window. The window feeds the
//! chunk-size classifier re-evaluated every ten seconds.

use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tallow_protocol::chunk::ChunkSize;

/// Sliding-window size
const WINDOW: usize = 30;

/// Minimum spacing between samples (1 Hz ceiling on the interval)
pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Aggregated link statistics
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkStats {
    /// Smoothed round-trip time in milliseconds
    pub rtt_ms: f64,
    /// Loss fraction, 0.0 to 1.0
    pub loss: f64,
    /// Throughput in bytes per second
    pub throughput_bps: f64,
}

impl Default for LinkStats {
    fn default() -> Self {
        Self {
            rtt_ms: 0.0,
            loss: 0.0,
            throughput_bps: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    taken_at: Instant,
    rtt_ms: f64,
    loss: f64,
    bytes: u64,
}

/// Sliding-window bandwidth monitor
#[derive(Debug)]
pub struct BandwidthMonitor {
    samples: VecDeque<Sample>,
    bytes_since_sample: u64,
    latest_rtt_ms: f64,
    frames_sent: u64,
    frames_lost: u64,
    last_sample_at: Option<Instant>,
}

impl BandwidthMonitor {
    /// Create an empty monitor
    pub fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(WINDOW),
            bytes_since_sample: 0,
            latest_rtt_ms: 0.0,
            frames_sent: 0,
            frames_lost: 0,
            last_sample_at: None,
        }
    }

    /// Record a round-trip measurement
    pub fn record_rtt(&mut self, rtt: Duration) {
        self.latest_rtt_ms = rtt.as_secs_f64() * 1000.0;
    }

    /// Record payload bytes moved since the last call
    pub fn record_bytes(&mut self, bytes: u64) {
        self.bytes_since_sample += bytes;
    }

    /// Record frame accounting for the loss estimate
    pub fn record_frames(&mut self, sent: u64, lost: u64) {
        self.frames_sent += sent;
        self.frames_lost += lost;
    }

    /// Take a sample; call at one hertz or faster from the heartbeat task
    pub fn sample(&mut self, now: Instant) {
        let loss = if self.frames_sent == 0 {
            0.0
        } else {
            self.frames_lost as f64 / self.frames_sent as f64
        };
        if self.samples.len() == WINDOW {
            self.samples.pop_front();
        }
        self.samples.push_back(Sample {
            taken_at: now,
            rtt_ms: self.latest_rtt_ms,
            loss,
            bytes: self.bytes_since_sample,
        });
        self.bytes_since_sample = 0;
        self.frames_sent = 0;
        self.frames_lost = 0;
        self.last_sample_at = Some(now);
    }

    /// Whether the heartbeat is due for another sample
    pub fn sample_due(&self, now: Instant) -> bool {
        match self.last_sample_at {
            None => true,
            Some(last) => now.duration_since(last) >= SAMPLE_INTERVAL,
        }
    }

    /// Averages over the sliding window
    pub fn stats(&self) -> LinkStats {
        if self.samples.is_empty() {
            return LinkStats::default();
        }
        let n = self.samples.len() as f64;
        let rtt_ms = self.samples.iter().map(|s| s.rtt_ms).sum::<f64>() / n;
        let loss = self.samples.iter().map(|s| s.loss).sum::<f64>() / n;

        let bytes: u64 = self.samples.iter().map(|s| s.bytes).sum();
        let span = match (self.samples.front(), self.samples.back()) {
            (Some(first), Some(last)) if last.taken_at > first.taken_at => {
                last.taken_at.duration_since(first.taken_at).as_secs_f64()
            }
            _ => SAMPLE_INTERVAL.as_secs_f64(),
        };
        let throughput_bps = bytes as f64 / span.max(f64::EPSILON);

        LinkStats {
            rtt_ms,
            loss,
            throughput_bps,
        }
    }

    /// The chunk-size tier the current window calls for
    pub fn chunk_size(&self) -> ChunkSize {
        let stats = self.stats();
        if self.samples.is_empty() {
            return ChunkSize::default();
        }
        ChunkSize::for_link(stats.rtt_ms, stats.loss)
    }
}

impl Default for BandwidthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_monitor_defaults() {
        let monitor = BandwidthMonitor::new();
        assert_eq!(monitor.stats(), LinkStats::default());
        assert_eq!(monitor.chunk_size(), ChunkSize::default());
    }

    #[test]
    fn test_window_is_bounded() {
        let mut monitor = BandwidthMonitor::new();
        let start = Instant::now();
        for i in 0..50 {
            monitor.record_rtt(Duration::from_millis(10));
            monitor.sample(start + Duration::from_secs(i));
        }
        assert_eq!(monitor.samples.len(), WINDOW);
    }

    #[test]
    fn test_rtt_average() {
        let mut monitor = BandwidthMonitor::new();
        let start = Instant::now();
        monitor.record_rtt(Duration::from_millis(40));
        monitor.sample(start);
        monitor.record_rtt(Duration::from_millis(60));
        monitor.sample(start + Duration::from_secs(1));
        assert!((monitor.stats().rtt_ms - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_loss_resets_between_samples() {
        let mut monitor = BandwidthMonitor::new();
        let start = Instant::now();
        monitor.record_frames(100, 10);
        monitor.sample(start);
        monitor.record_frames(100, 0);
        monitor.sample(start + Duration::from_secs(1));
        assert!((monitor.stats().loss - 0.05).abs() < 1e-9);
    }

    #[test]
    fn test_throughput_over_window() {
        let mut monitor = BandwidthMonitor::new();
        let start = Instant::now();
        for i in 0..4u64 {
            monitor.record_bytes(1000);
            monitor.sample(start + Duration::from_secs(i));
        }
        // 4000 bytes over 3 seconds of window span
        let bps = monitor.stats().throughput_bps;
        assert!((bps - 4000.0 / 3.0).abs() < 1.0, "bps = {}", bps);
    }

    #[test]
    fn test_good_link_classifies_large_chunks() {
        let mut monitor = BandwidthMonitor::new();
        let start = Instant::now();
        monitor.record_rtt(Duration::from_millis(2));
        monitor.record_frames(1000, 0);
        monitor.sample(start);
        assert_eq!(monitor.chunk_size(), ChunkSize::Lan);
    }

    #[test]
    fn test_sample_due_respects_interval() {
        let mut monitor = BandwidthMonitor::new();
        let start = Instant::now();
        assert!(monitor.sample_due(start));
        monitor.sample(start);
        assert!(!monitor.sample_due(start + Duration::from_millis(500)));
        assert!(monitor.sample_due(start + Duration::from_secs(1)));
    }
}
