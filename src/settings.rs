//! User-editable test settings, persisted as JSON in the config directory.

use crate::speedtest::TestRunConfig;
use anyhow::{Context, Result};
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const APP_NAME: &str = "speedmeter";
const SETTINGS_FILE: &str = "settings.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub duration_secs: u64,
    pub warmup_secs: u64,
    pub connections: usize,
    pub ping_count: usize,
    pub auto_select: bool,
    pub server_index: usize,
}

impl Default for Settings {
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

impl Settings {
    pub fn run_config(&self) -> TestRunConfig {
        TestRunConfig {
            duration_secs: self.duration_secs,
            warmup_secs: self.warmup_secs,
            connections: self.connections,
            ping_count: self.ping_count,
            auto_select: self.auto_select,
            server_index: self.server_index,
        }
        .validated()
    }

    /// Load from the default location, falling back to defaults on any
    /// problem.
    pub fn load() -> Self {
        match settings_path() {
            Some(path) => Self::load_from(&path),
            None => {
                debug!("Could not determine settings path, using defaults");
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            debug!("Settings file {:?} does not exist, using defaults", path);
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(settings) => {
                    info!("Loaded settings from {:?}", path);
                    settings
                }
                Err(e) => {
                    error!("Failed to parse settings file: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                error!("Failed to read settings file: {}", e);
                Self::default()
            }
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = settings_path().context("could not determine settings directory")?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create settings directory {:?}", dir))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("failed to write {:?}", path))?;
        info!("Saved settings to {:?}", path);
        Ok(())
    }
}

fn settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join(APP_NAME).join(SETTINGS_FILE))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsField {
    Duration,
    Warmup,
    Connections,
    PingCount,
    AutoSelect,
    Server,
}

impl SettingsField {
    pub const ALL: [SettingsField; 6] = [
        SettingsField::Duration,
        SettingsField::Warmup,
        SettingsField::Connections,
        SettingsField::PingCount,
        SettingsField::AutoSelect,
        SettingsField::Server,
    ];

    pub fn next(self) -> Self {
        match self {
            SettingsField::Duration => SettingsField::Warmup,
            SettingsField::Warmup => SettingsField::Connections,
            SettingsField::Connections => SettingsField::PingCount,
            SettingsField::PingCount => SettingsField::AutoSelect,
            SettingsField::AutoSelect => SettingsField::Server,
            SettingsField::Server => SettingsField::Duration,
        }
    }

    pub fn prev(self) -> Self {
        match self {
            SettingsField::Duration => SettingsField::Server,
            SettingsField::Warmup => SettingsField::Duration,
            SettingsField::Connections => SettingsField::Warmup,
            SettingsField::PingCount => SettingsField::Connections,
            SettingsField::AutoSelect => SettingsField::PingCount,
            SettingsField::Server => SettingsField::AutoSelect,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SettingsField::Duration => "Duration",
            SettingsField::Warmup => "Warmup",
            SettingsField::Connections => "Connections",
            SettingsField::PingCount => "Ping samples",
            SettingsField::AutoSelect => "Auto server",
            SettingsField::Server => "Server",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("speedmeter-test-{}-{}", std::process::id(), name))
            .join(SETTINGS_FILE)
    }

    #[test]
    fn defaults_match_engine_defaults() {
        assert_eq!(Settings::default().run_config(), TestRunConfig::default());
    }

    #[test]
    fn run_config_clamps_warmup() {
        let settings = Settings {
            duration_secs: 2,
            warmup_secs: 5,
            ..Settings::default()
        };
        assert_eq!(settings.run_config().warmup_secs, 1);
    }

    #[test]
    fn hand_edited_huge_duration_is_capped() {
        let path = temp_path("huge");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, r#"{ "duration_secs": 18446744073709551615 }"#).unwrap();

        let config = Settings::load_from(&path).run_config();
        assert_eq!(config.duration_secs, crate::speedtest::MAX_DURATION_SECS);
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn save_and_load_roundtrip() {
        let path = temp_path("roundtrip");
        let settings = Settings {
            duration_secs: 15,
            auto_select: true,
            server_index: 2,
            ..Settings::default()
        };
        settings.save_to(&path).unwrap();
        assert_eq!(Settings::load_from(&path), settings);
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let path = temp_path("partial");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, r#"{ "connections": 8 }"#).unwrap();

        let settings = Settings::load_from(&path);
        assert_eq!(settings.connections, 8);
        assert_eq!(settings.duration_secs, 10);
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn corrupt_or_missing_file_uses_defaults() {
        let path = temp_path("corrupt");
        assert_eq!(Settings::load_from(&path), Settings::default());

        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "not json").unwrap();
        assert_eq!(Settings::load_from(&path), Settings::default());
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn field_cycle_visits_every_field() {
        let mut field = SettingsField::Duration;
        for expected in SettingsField::ALL.iter().skip(1) {
            field = field.next();
            assert_eq!(field, *expected);
        }
        assert_eq!(field.next(), SettingsField::Duration);
        assert_eq!(SettingsField::Duration.prev(), SettingsField::Server);
    }
}
