//! Timed throughput measurement over a transfer pool.
//!
//! The first `warmup` seconds of a run are excluded from the reported
//! speed. Progress is reported on one scale for both directions: warmup
//! occupies `[0, warmup_share)` and the measurement window the rest.

use super::error::Result;
use super::pool::TransferPool;
use super::session::TransferSession;
use super::{calculate_mbps, Direction, ProgressEvent, MAX_DURATION_SECS};
use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

pub const WARMUP_LABEL: &str = "Warming up...";

/// Normalized timing of one sampler run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Window {
    pub total_secs: u64,
    pub warmup_secs: u64,
    /// Seconds of the run that count toward the reported speed.
    pub measurement_secs: f64,
}

impl Window {
    pub fn new(duration_secs: u64, warmup_secs: u64) -> Self {
        let duration_secs = duration_secs.clamp(1, MAX_DURATION_SECS);
        let warmup_secs = warmup_secs.min(duration_secs - 1);
        let total_secs = duration_secs.max(warmup_secs + 1);
        let mut measurement_secs = (total_secs - warmup_secs) as f64;
        if measurement_secs <= 0.0 {
            measurement_secs = 1.0;
        }
        Self {
            total_secs,
            warmup_secs,
            measurement_secs,
        }
    }

    pub fn warmup_share(&self) -> f64 {
        self.warmup_secs as f64 / self.total_secs as f64
    }

    /// Progress while warming up, `elapsed` measured from the run start.
    pub fn warmup_progress(&self, elapsed: f64) -> f64 {
        (elapsed / self.total_secs as f64).clamp(0.0, self.warmup_share())
    }

    /// Progress once measuring, `elapsed` measured from the end of warmup.
    pub fn measurement_progress(&self, elapsed: f64) -> f64 {
        let share = self.warmup_share();
        let fraction = (elapsed / self.measurement_secs).clamp(0.0, 1.0);
        share + (1.0 - share) * fraction
    }
}

pub struct ThroughputSampler {
    direction: Direction,
    session: Arc<TransferSession>,
    poll_interval: Duration,
}

impl ThroughputSampler {
    pub fn new(direction: Direction, session: Arc<TransferSession>) -> Self {
        Self {
            direction,
            session,
            poll_interval: direction.poll_interval(),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Drive `connections` workers against `url` and return the
    /// warmup-excluded speed in Mbps. Stopping the session from outside
    /// ends the run early; the speed is then computed over whatever time
    /// elapsed.
    pub async fn run<F>(
        &self,
        url: &str,
        connections: usize,
        duration_secs: u64,
        warmup_secs: u64,
        mut on_progress: F,
    ) -> Result<f64>
    where
        F: FnMut(ProgressEvent),
    {
        let window = Window::new(duration_secs, warmup_secs);
        let start = Instant::now();
        let warmup_end = start + Duration::from_secs(window.warmup_secs);
        let test_end = start + Duration::from_secs(window.total_secs);

        let mut pool = TransferPool::new(self.direction, Arc::clone(&self.session));
        if let Err(e) = pool.start(url, connections) {
            pool.stop().await;
            return Err(e);
        }

        let mut warmup_complete = false;
        let mut bytes_at_warmup_end: u64 = 0;
        let mut measurement_start = start;
        let mut last_observed: u64 = 0;

        while self.session.is_running() && Instant::now() < test_end {
            let next_tick = (Instant::now() + self.poll_interval).min(test_end);
            tokio::time::sleep_until(next_tick).await;

            let now = Instant::now();
            let total = self.session.total_bytes();
            debug_assert!(total >= last_observed);
            last_observed = total;

            if !warmup_complete && now >= warmup_end {
                bytes_at_warmup_end = total;
                warmup_complete = true;
                measurement_start = now;
            }

            if warmup_complete {
                let elapsed = now.duration_since(measurement_start).as_secs_f64();
                let speed_mbps = calculate_mbps(total - bytes_at_warmup_end, elapsed);
                on_progress(ProgressEvent {
                    stage: self.direction.label().to_string(),
                    progress: window.measurement_progress(elapsed),
                    speed_mbps,
                });
            } else {
                let elapsed = now.duration_since(start).as_secs_f64();
                on_progress(ProgressEvent {
                    stage: WARMUP_LABEL.to_string(),
                    progress: window.warmup_progress(elapsed),
                    speed_mbps: 0.0,
                });
            }

            if pool.active_workers() == 0 {
                debug!("All {:?} workers exited early", self.direction);
                break;
            }
        }

        pool.stop().await;

        let finished = Instant::now();
        let (since, baseline) = if warmup_complete {
            (measurement_start, bytes_at_warmup_end)
        } else {
            (start, 0)
        };
        let elapsed = finished.duration_since(since).as_secs_f64();
        let measured = self.session.total_bytes() - baseline;
        let speed = calculate_mbps(measured, elapsed);

        info!(
            "{:?} finished: {} bytes in {:.2}s = {:.2} Mbps",
            self.direction, measured, elapsed, speed
        );
        Ok(speed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_normalizes_inputs() {
        let w = Window::new(10, 2);
        assert_eq!(w.total_secs, 10);
        assert_eq!(w.warmup_secs, 2);
        assert_eq!(w.measurement_secs, 8.0);

        let w = Window::new(0, 0);
        assert_eq!(w.total_secs, 1);
        assert_eq!(w.measurement_secs, 1.0);

        let w = Window::new(3, 9);
        assert_eq!(w.warmup_secs, 2);
        assert_eq!(w.measurement_secs, 1.0);

        let w = Window::new(u64::MAX, u64::MAX);
        assert_eq!(w.total_secs, MAX_DURATION_SECS);
        assert_eq!(w.warmup_secs, MAX_DURATION_SECS - 1);
    }

    #[test]
    fn progress_is_continuous_across_warmup() {
        let w = Window::new(10, 2);
        assert_eq!(w.warmup_progress(0.0), 0.0);
        assert!((w.warmup_progress(1.0) - 0.1).abs() < 1e-9);
        assert!((w.warmup_progress(5.0) - 0.2).abs() < 1e-9);
        assert!((w.measurement_progress(0.0) - 0.2).abs() < 1e-9);
        assert!((w.measurement_progress(4.0) - 0.6).abs() < 1e-9);
        assert_eq!(w.measurement_progress(100.0), 1.0);
    }

    #[test]
    fn no_warmup_spans_full_range() {
        let w = Window::new(4, 0);
        assert_eq!(w.warmup_share(), 0.0);
        assert_eq!(w.measurement_progress(2.0), 0.5);
    }

    #[tokio::test]
    async fn dead_server_yields_zero_speed() {
        let session = Arc::new(TransferSession::new());
        let sampler = ThroughputSampler::new(Direction::Download, Arc::clone(&session))
            .with_poll_interval(Duration::from_millis(100));

        let mut events = Vec::new();
        let started = std::time::Instant::now();
        let speed = sampler
            .run("http://127.0.0.1:9/", 2, 1, 0, |e| events.push(e))
            .await
            .unwrap();

        assert_eq!(speed, 0.0);
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(events
            .windows(2)
            .all(|pair| pair[0].progress <= pair[1].progress));
        assert!(events.iter().all(|e| (0.0..=1.0).contains(&e.progress)));
    }

    #[tokio::test]
    async fn stopped_session_returns_promptly() {
        let session = Arc::new(TransferSession::new());
        session.stop();
        let sampler = ThroughputSampler::new(Direction::Upload, Arc::clone(&session));

        let started = std::time::Instant::now();
        let speed = sampler
            .run("http://127.0.0.1:9/", 4, 30, 2, |_| {})
            .await
            .unwrap();

        assert_eq!(speed, 0.0);
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
