//! Completed test results, most recent first, kept in the data directory.

use crate::speedtest::SpeedTestResult;
use anyhow::{Context, Result};
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const APP_NAME: &str = "speedmeter";
const HISTORY_FILE: &str = "history.json";
pub const MAX_ENTRIES: usize = 100;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    entries: Vec<SpeedTestResult>,
}

impl History {
    pub fn entries(&self) -> &[SpeedTestResult] {
        &self.entries
    }

    pub fn latest(&self) -> Option<&SpeedTestResult> {
        self.entries.first()
    }

    /// Record a result. Unsuccessful results are ignored.
    pub fn record(&mut self, result: SpeedTestResult) {
        if !result.success {
            return;
        }
        self.entries.insert(0, result);
        self.entries.truncate(MAX_ENTRIES);
    }

    pub fn load() -> Self {
        match history_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            debug!("No history at {:?}", path);
            return Self::default();
        }
        match fs::read_to_string(path).map(|content| serde_json::from_str::<History>(&content)) {
            Ok(Ok(history)) => {
                info!("Loaded {} history entries", history.entries.len());
                history
            }
            Ok(Err(e)) => {
                error!("Failed to parse history file: {}", e);
                Self::default()
            }
            Err(e) => {
                error!("Failed to read history file: {}", e);
                Self::default()
            }
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = history_path().context("could not determine data directory")?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create data directory {:?}", dir))?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("failed to write {:?}", path))?;
        Ok(())
    }
}

pub fn data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join(APP_NAME))
}

fn history_path() -> Option<PathBuf> {
    data_dir().map(|p| p.join(HISTORY_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn result(download_mbps: f64, success: bool) -> SpeedTestResult {
        SpeedTestResult {
            download_mbps,
            upload_mbps: 10.0,
            ping_ms: 12.5,
            jitter_ms: 1.5,
            server_name: "Cloudflare".to_string(),
            server_host: "speed.cloudflare.com".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            success,
            error: None,
        }
    }

    #[test]
    fn newest_first_and_capped() {
        let mut history = History::default();
        for i in 0..(MAX_ENTRIES + 5) {
            history.record(result(i as f64, true));
        }
        assert_eq!(history.entries().len(), MAX_ENTRIES);
        assert_eq!(history.latest().unwrap().download_mbps, (MAX_ENTRIES + 4) as f64);
    }

    #[test]
    fn failed_results_are_not_recorded() {
        let mut history = History::default();
        history.record(result(50.0, false));
        assert!(history.entries().is_empty());
    }

    #[test]
    fn persists_with_rfc3339_timestamps() {
        let path = std::env::temp_dir()
            .join(format!("speedmeter-history-{}", std::process::id()))
            .join(HISTORY_FILE);
        let mut history = History::default();
        history.record(result(93.0, true));
        history.save_to(&path).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("2024-05-01T12:00:00Z"));
        assert_eq!(History::load_from(&path), history);
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }
}
