pub mod error;
pub mod orchestrator;
pub mod ping;
pub mod pool;
pub mod sampler;
pub mod server;
pub mod session;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use error::{Result, SpeedTestError};
pub use orchestrator::SpeedTest;
pub use ping::PingResults;
pub use server::TestServer;

/// Final record of a completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeedTestResult {
    pub download_mbps: f64,
    pub upload_mbps: f64,
    pub ping_ms: f64,
    pub jitter_ms: f64,
    pub server_name: String,
    pub server_host: String,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestPhase {
    Idle,
    Selecting,
    Pinging,
    Downloading,
    Uploading,
    Completed,
    Cancelled,
    Failed,
}

impl TestPhase {
    pub fn is_running(self) -> bool {
        matches!(
            self,
            TestPhase::Selecting | TestPhase::Pinging | TestPhase::Downloading | TestPhase::Uploading
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TestPhase::Completed | TestPhase::Cancelled | TestPhase::Failed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Download,
    Upload,
}

impl Direction {
    pub fn label(self) -> &'static str {
        match self {
            Direction::Download => "Downloading...",
            Direction::Upload => "Uploading...",
        }
    }

    /// Upload polls more often so its gauge moves smoothly.
    pub fn poll_interval(self) -> Duration {
        match self {
            Direction::Download => Duration::from_millis(500),
            Direction::Upload => Duration::from_millis(200),
        }
    }
}

/// A single progress notification. `progress` is in `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub stage: String,
    pub progress: f64,
    pub speed_mbps: f64,
}

/// Messages emitted by a running test, in order. Exactly one of
/// `Completed`, `Failed` or `Cancelled` ends the stream.
#[derive(Debug, Clone)]
pub enum TestUpdate {
    Phase(TestPhase),
    ServerSelected(TestServer),
    Progress(ProgressEvent),
    PingSample(Option<f64>),
    PingComplete(PingResults),
    DownloadComplete { speed_mbps: f64 },
    UploadComplete { speed_mbps: f64 },
    Completed(SpeedTestResult),
    Failed(String),
    Cancelled,
}

/// Caller-supplied parameters for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRunConfig {
    pub duration_secs: u64,
    pub warmup_secs: u64,
    pub connections: usize,
    pub ping_count: usize,
    pub auto_select: bool,
    pub server_index: usize,
}

impl Default for TestRunConfig {
    fn default() -> Self {
        Self {
            duration_secs: 10,
            warmup_secs: 2,
            connections: 4,
            ping_count: 5,
            auto_select: false,
            server_index: 0,
        }
    }
}

/// Longest accepted transfer stage, per direction.
pub const MAX_DURATION_SECS: u64 = 3600;
pub const MAX_CONNECTIONS: usize = 64;
pub const MAX_PING_COUNT: usize = 100;

impl TestRunConfig {
    /// Clamp every field into its usable range.
    pub fn validated(&self) -> Self {
        let duration_secs = self.duration_secs.clamp(1, MAX_DURATION_SECS);
        Self {
            duration_secs,
            warmup_secs: self.warmup_secs.min(duration_secs - 1),
            connections: self.connections.clamp(1, MAX_CONNECTIONS),
            ping_count: self.ping_count.clamp(1, MAX_PING_COUNT),
            auto_select: self.auto_select,
            server_index: self.server_index,
        }
    }
}

/// Decimal megabits per second. Zero when either input is non-positive.
pub fn calculate_mbps(bytes: u64, seconds: f64) -> f64 {
    if seconds <= 0.0 || !seconds.is_finite() {
        return 0.0;
    }
    (bytes as f64 * 8.0) / 1_000_000.0 / seconds
}

/// Format speed for display (e.g. "125.5 Mbps" or "1.2 Gbps")
pub fn format_speed(mbps: f64) -> String {
    if mbps >= 1000.0 {
        format!("{:.1} Gbps", mbps / 1000.0)
    } else if mbps >= 1.0 {
        format!("{:.1} Mbps", mbps)
    } else if mbps > 0.0 {
        format!("{:.0} Kbps", mbps * 1000.0)
    } else {
        "—".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mbps_is_decimal_megabits() {
        assert_eq!(calculate_mbps(10_000_000, 1.0), 80.0);
        assert_eq!(calculate_mbps(1_250_000, 2.0), 5.0);
    }

    #[test]
    fn mbps_never_divides_by_zero() {
        assert_eq!(calculate_mbps(0, 3.5), 0.0);
        assert_eq!(calculate_mbps(1_000_000, 0.0), 0.0);
        assert_eq!(calculate_mbps(1_000_000, -1.0), 0.0);
    }

    #[test]
    fn validated_clamps_degenerate_config() {
        let config = TestRunConfig {
            duration_secs: 0,
            warmup_secs: 5,
            connections: 0,
            ping_count: 0,
            auto_select: true,
            server_index: 2,
        }
        .validated();

        assert_eq!(config.duration_secs, 1);
        assert_eq!(config.warmup_secs, 0);
        assert_eq!(config.connections, 1);
        assert_eq!(config.ping_count, 1);
        assert!(config.auto_select);
        assert_eq!(config.server_index, 2);
    }

    #[test]
    fn validated_caps_oversized_config() {
        let config = TestRunConfig {
            duration_secs: u64::MAX,
            warmup_secs: u64::MAX,
            connections: usize::MAX,
            ping_count: usize::MAX,
            ..TestRunConfig::default()
        }
        .validated();

        assert_eq!(config.duration_secs, MAX_DURATION_SECS);
        assert_eq!(config.warmup_secs, MAX_DURATION_SECS - 1);
        assert_eq!(config.connections, MAX_CONNECTIONS);
        assert_eq!(config.ping_count, MAX_PING_COUNT);
    }

    #[test]
    fn validated_keeps_warmup_below_duration() {
        let config = TestRunConfig {
            duration_secs: 3,
            warmup_secs: 10,
            ..TestRunConfig::default()
        }
        .validated();
        assert_eq!(config.warmup_secs, 2);

        let config = TestRunConfig::default().validated();
        assert_eq!(config, TestRunConfig::default());
    }

    #[test]
    fn phase_classification() {
        assert!(TestPhase::Downloading.is_running());
        assert!(!TestPhase::Idle.is_running());
        assert!(TestPhase::Cancelled.is_terminal());
        assert!(!TestPhase::Uploading.is_terminal());
    }

    #[test]
    fn format_speed_units() {
        assert_eq!(format_speed(1200.0), "1.2 Gbps");
        assert_eq!(format_speed(50.44), "50.4 Mbps");
        assert_eq!(format_speed(0.5), "500 Kbps");
        assert_eq!(format_speed(0.0), "—");
    }
}
