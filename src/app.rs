use anyhow::Result;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use log::error;
use speedmeter::history::History;
use speedmeter::settings::{Settings, SettingsField};
use speedmeter::speedtest::orchestrator::{DOWNLOAD_RANGE, UPLOAD_RANGE};
use speedmeter::speedtest::{
    PingResults, ProgressEvent, SpeedTest, SpeedTestResult, TestPhase, TestServer, TestUpdate,
};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppView {
    Main,
    Settings,
    History,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Panel {
    Download,
    Upload,
    Ping,
}

impl Panel {
    pub fn next(self) -> Self {
        match self {
            Panel::Download => Panel::Upload,
            Panel::Upload => Panel::Ping,
            Panel::Ping => Panel::Download,
        }
    }

    pub fn prev(self) -> Self {
        match self {
            Panel::Download => Panel::Ping,
            Panel::Upload => Panel::Download,
            Panel::Ping => Panel::Upload,
        }
    }
}

/// Values shown in the panels. Filled in as the run reports them.
#[derive(Debug, Clone, Default)]
pub struct Measurements {
    pub download_mbps: f64,
    pub upload_mbps: f64,
    pub ping_ms: f64,
    pub jitter_ms: f64,
}

pub struct App {
    pub phase: TestPhase,
    pub measured: Measurements,
    pub should_quit: bool,

    pub engine: SpeedTest,
    pub server: Option<TestServer>,
    pub status: String,
    pub history: History,

    // UI state
    pub view: AppView,
    pub selected_panel: Panel,
    pub expanded: bool,
    pub history_scroll: usize,

    // Settings
    pub settings: Settings,
    pub selected_setting: SettingsField,

    // Progress tracking
    pub download_progress: f64,
    pub upload_progress: f64,

    // Speed samples for charts
    pub download_samples: Vec<f64>,
    pub upload_samples: Vec<f64>,
    pub ping_samples: Vec<f64>,
}

impl App {
    pub fn new(engine: SpeedTest, settings: Settings, history: History) -> Self {
        Self {
            phase: TestPhase::Idle,
            measured: Measurements::default(),
            should_quit: false,
            engine,
            server: None,
            status: "Ready".to_string(),
            history,
            view: AppView::Main,
            selected_panel: Panel::Download,
            expanded: false,
            history_scroll: 0,
            settings,
            selected_setting: SettingsField::Duration,
            download_progress: 0.0,
            upload_progress: 0.0,
            download_samples: Vec::new(),
            upload_samples: Vec::new(),
            ping_samples: Vec::new(),
        }
    }

    pub fn is_testing(&self) -> bool {
        self.phase.is_running()
    }

    pub fn selected_server_name(&self) -> &str {
        if self.settings.auto_select {
            return "auto";
        }
        self.engine
            .servers()
            .get(self.settings.server_index)
            .map(|s| s.name.as_str())
            .unwrap_or("—")
    }

    pub fn handle_key_event(&mut self, key: event::KeyEvent) -> Option<AppAction> {
        if key.kind != KeyEventKind::Press {
            return None;
        }

        match self.view {
            AppView::Main => self.handle_main_key(key),
            AppView::Settings => self.handle_settings_key(key),
            AppView::History => self.handle_history_key(key),
        }
    }

    fn handle_main_key(&mut self, key: event::KeyEvent) -> Option<AppAction> {
        match key.code {
            KeyCode::Char('q') => {
                self.should_quit = true;
                Some(AppAction::Quit)
            }
            KeyCode::Char('s') => {
                if !self.is_testing() {
                    self.view = AppView::Settings;
                }
                None
            }
            KeyCode::Char('h') => {
                self.history_scroll = 0;
                self.view = AppView::History;
                None
            }
            KeyCode::Enter => {
                if self.expanded {
                    self.expanded = false;
                    None
                } else if !self.is_testing() {
                    Some(AppAction::StartTest)
                } else {
                    // Expand current panel during test
                    self.expanded = true;
                    None
                }
            }
            KeyCode::Esc => {
                if self.expanded {
                    self.expanded = false;
                    None
                } else if self.is_testing() {
                    Some(AppAction::CancelTest)
                } else {
                    None
                }
            }
            KeyCode::Tab | KeyCode::Right | KeyCode::Char('j') => {
                if !self.expanded {
                    self.selected_panel = self.selected_panel.next();
                }
                None
            }
            KeyCode::BackTab | KeyCode::Left | KeyCode::Char('k') => {
                if !self.expanded {
                    self.selected_panel = self.selected_panel.prev();
                }
                None
            }
            KeyCode::Char(' ') => {
                self.expanded = !self.expanded;
                None
            }
            _ => None,
        }
    }

    fn handle_settings_key(&mut self, key: event::KeyEvent) -> Option<AppAction> {
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc | KeyCode::Enter => {
                self.view = AppView::Main;
                Some(AppAction::SaveSettings)
            }
            KeyCode::Up | KeyCode::Char('k') => {
                self.selected_setting = self.selected_setting.prev();
                None
            }
            KeyCode::Down | KeyCode::Char('j') | KeyCode::Tab => {
                self.selected_setting = self.selected_setting.next();
                None
            }
            KeyCode::Left | KeyCode::Char('h') => {
                self.decrease_setting();
                None
            }
            KeyCode::Right | KeyCode::Char('l') => {
                self.increase_setting();
                None
            }
            _ => None,
        }
    }

    fn handle_history_key(&mut self, key: event::KeyEvent) -> Option<AppAction> {
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc | KeyCode::Char('h') => {
                self.view = AppView::Main;
            }
            KeyCode::Down | KeyCode::Char('j') => {
                let last = self.history.entries().len().saturating_sub(1);
                self.history_scroll = (self.history_scroll + 1).min(last);
            }
            KeyCode::Up | KeyCode::Char('k') => {
                self.history_scroll = self.history_scroll.saturating_sub(1);
            }
            _ => {}
        }
        None
    }

    fn increase_setting(&mut self) {
        let s = &mut self.settings;
        match self.selected_setting {
            SettingsField::Duration => s.duration_secs = (s.duration_secs + 1).min(60),
            SettingsField::Warmup => {
                s.warmup_secs = (s.warmup_secs + 1).min(10).min(s.duration_secs.saturating_sub(1))
            }
            SettingsField::Connections => s.connections = (s.connections + 1).min(16),
            SettingsField::PingCount => s.ping_count = (s.ping_count + 1).min(20),
            SettingsField::AutoSelect => s.auto_select = !s.auto_select,
            SettingsField::Server => {
                let count = self.engine.servers().len().max(1);
                s.server_index = (s.server_index + 1) % count;
            }
        }
    }

    fn decrease_setting(&mut self) {
        let s = &mut self.settings;
        match self.selected_setting {
            SettingsField::Duration => {
                s.duration_secs = s.duration_secs.saturating_sub(1).max(1);
                s.warmup_secs = s.warmup_secs.min(s.duration_secs - 1);
            }
            SettingsField::Warmup => s.warmup_secs = s.warmup_secs.saturating_sub(1),
            SettingsField::Connections => s.connections = s.connections.saturating_sub(1).max(1),
            SettingsField::PingCount => s.ping_count = s.ping_count.saturating_sub(1).max(1),
            SettingsField::AutoSelect => s.auto_select = !s.auto_select,
            SettingsField::Server => {
                let count = self.engine.servers().len().max(1);
                s.server_index = (s.server_index + count - 1) % count;
            }
        }
    }

    pub fn reset_for_new_test(&mut self) {
        self.phase = TestPhase::Idle;
        self.measured = Measurements::default();
        self.server = None;
        self.download_progress = 0.0;
        self.upload_progress = 0.0;
        self.download_samples.clear();
        self.upload_samples.clear();
        self.ping_samples.clear();
        self.expanded = false;
    }

    pub fn handle_update(&mut self, update: TestUpdate) {
        match update {
            TestUpdate::Phase(phase) => self.phase = phase,
            TestUpdate::ServerSelected(server) => self.server = Some(server),
            TestUpdate::Progress(p) => self.update_progress(p),
            TestUpdate::PingSample(sample) => {
                if let Some(ms) = sample {
                    push_sample(&mut self.ping_samples, ms);
                }
            }
            TestUpdate::PingComplete(results) => self.complete_ping(results),
            TestUpdate::DownloadComplete { speed_mbps } => {
                self.measured.download_mbps = speed_mbps;
                self.download_progress = 1.0;
            }
            TestUpdate::UploadComplete { speed_mbps } => {
                self.measured.upload_mbps = speed_mbps;
                self.upload_progress = 1.0;
            }
            TestUpdate::Completed(result) => self.complete_test(result),
            TestUpdate::Failed(message) => {
                self.phase = TestPhase::Failed;
                self.status = format!("Error: {}", message);
            }
            TestUpdate::Cancelled => {
                self.phase = TestPhase::Cancelled;
                self.status = "Test stopped".to_string();
            }
        }
    }

    fn update_progress(&mut self, progress: ProgressEvent) {
        self.status = self.engine.status_summary();

        match self.phase {
            TestPhase::Downloading => {
                self.download_progress = local_progress(DOWNLOAD_RANGE, progress.progress);
                if progress.speed_mbps > 0.0 {
                    push_sample(&mut self.download_samples, progress.speed_mbps);
                }
            }
            TestPhase::Uploading => {
                self.upload_progress = local_progress(UPLOAD_RANGE, progress.progress);
                if progress.speed_mbps > 0.0 {
                    push_sample(&mut self.upload_samples, progress.speed_mbps);
                }
            }
            _ => {}
        }
    }

    fn complete_ping(&mut self, results: PingResults) {
        self.measured.ping_ms = results.avg_ms;
        self.measured.jitter_ms = results.jitter_ms;
    }

    fn complete_test(&mut self, result: SpeedTestResult) {
        self.phase = TestPhase::Completed;
        self.status = "Test completed successfully!".to_string();
        self.history.record(result);
        if let Err(e) = self.history.save() {
            error!("Failed to save history: {:#}", e);
        }
    }

    pub fn save_settings(&self) {
        if let Err(e) = self.settings.save() {
            error!("Failed to save settings: {:#}", e);
        }
    }

    pub fn cancel_test(&mut self) {
        self.engine.stop();
        self.status = "Stopping...".to_string();
    }
}

/// Map overall run progress back into one stage's `[0, 1]`.
fn local_progress(range: (f64, f64), overall: f64) -> f64 {
    ((overall - range.0) / (range.1 - range.0)).clamp(0.0, 1.0)
}

fn push_sample(samples: &mut Vec<f64>, value: f64) {
    samples.push(value);
    // Keep last 200 samples
    if samples.len() > 200 {
        samples.remove(0);
    }
}

#[derive(Debug, Clone, Copy)]
pub enum AppAction {
    Quit,
    StartTest,
    CancelTest,
    SaveSettings,
}

pub fn poll_event(timeout: Duration) -> Result<Option<Event>> {
    if event::poll(timeout)? {
        Ok(Some(event::read()?))
    } else {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_progress_maps_stage_ranges() {
        assert_eq!(local_progress(UPLOAD_RANGE, 0.66), 0.0);
        assert_eq!(local_progress(UPLOAD_RANGE, 1.0), 1.0);
        assert_eq!(local_progress(DOWNLOAD_RANGE, 0.1), 0.0);
        assert!((local_progress(DOWNLOAD_RANGE, 0.495) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn sample_buffer_is_bounded() {
        let mut samples = Vec::new();
        for i in 0..250 {
            push_sample(&mut samples, i as f64);
        }
        assert_eq!(samples.len(), 200);
        assert_eq!(samples[0], 50.0);
    }
}
