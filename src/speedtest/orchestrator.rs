//! Runs a complete test: server selection, latency, download, upload.
//!
//! Each run is a spawned task that reports through an unbounded channel, so
//! the caller's event loop only has to drain it. Cancellation is
//! cooperative: `stop` raises a flag checked between stages and stops the
//! active transfer session, which ends the sampler early.

use super::error::SpeedTestError;
use super::ping::PingTest;
use super::sampler::ThroughputSampler;
use super::server::TestServer;
use super::session::TransferSession;
use super::{
    format_speed, Direction, ProgressEvent, SpeedTestResult, TestPhase, TestRunConfig, TestUpdate,
};
use log::{debug, error, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Probes per candidate when auto-selecting a server.
const SELECTION_PING_COUNT: usize = 3;

pub const DOWNLOAD_RANGE: (f64, f64) = (0.33, 0.66);
pub const UPLOAD_RANGE: (f64, f64) = (0.66, 1.0);

/// Snapshot of the running test, shared with display code.
#[derive(Debug, Clone)]
pub struct LiveStatus {
    pub phase: TestPhase,
    pub stage: String,
    pub progress: f64,
    pub speed_mbps: f64,
}

impl Default for LiveStatus {
    fn default() -> Self {
        Self {
            phase: TestPhase::Idle,
            stage: "Ready".to_string(),
            progress: 0.0,
            speed_mbps: 0.0,
        }
    }
}

impl LiveStatus {
    pub fn summary(&self) -> String {
        if self.phase.is_running() {
            let mut text = format!("{} {:.0}%", self.stage, self.progress * 100.0);
            if self.speed_mbps > 0.0 {
                text.push_str(&format!(" · {}", format_speed(self.speed_mbps)));
            }
            text
        } else {
            self.stage.clone()
        }
    }
}

#[derive(Default)]
struct Shared {
    running: AtomicBool,
    cancelled: AtomicBool,
    session: Mutex<Option<Arc<TransferSession>>>,
    status: Mutex<LiveStatus>,
}

/// Handle to the test engine. Cheap to clone; clones control the same run.
#[derive(Clone)]
pub struct SpeedTest {
    servers: Arc<Vec<TestServer>>,
    shared: Arc<Shared>,
}

impl SpeedTest {
    pub fn new(servers: Vec<TestServer>) -> Self {
        Self {
            servers: Arc::new(servers),
            shared: Arc::new(Shared::default()),
        }
    }

    pub fn servers(&self) -> &[TestServer] {
        &self.servers
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Start a run in the background. Returns `None` if a run is already in
    /// progress.
    pub fn start(&self, config: TestRunConfig) -> Option<mpsc::UnboundedReceiver<TestUpdate>> {
        if self
            .shared
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Start requested while a test is running; ignoring");
            return None;
        }
        self.shared.cancelled.store(false, Ordering::SeqCst);

        let (tx, rx) = mpsc::unbounded_channel();
        let run = Run {
            servers: Arc::clone(&self.servers),
            shared: Arc::clone(&self.shared),
            config: config.validated(),
            tx,
        };
        tokio::spawn(async move { run.execute().await });
        Some(rx)
    }

    /// Request cancellation. A no-op when nothing is running.
    pub fn stop(&self) {
        if !self.is_running() {
            return;
        }
        info!("Cancelling speed test");
        self.shared.cancelled.store(true, Ordering::SeqCst);
        if let Some(session) = lock(&self.shared.session).as_ref() {
            session.stop();
        }
    }

    pub fn status(&self) -> LiveStatus {
        lock(&self.shared.status).clone()
    }

    /// One-line human readable status, formatted under the status lock.
    pub fn status_summary(&self) -> String {
        lock(&self.shared.status).summary()
    }
}

/// Index of the lowest average latency; ties keep the earlier entry.
/// Falls back to `fallback` when no candidate answered.
pub fn pick_fastest(averages: &[Option<f64>], fallback: usize) -> usize {
    let mut best: Option<(usize, f64)> = None;
    for (index, avg) in averages.iter().enumerate() {
        if let Some(avg) = *avg {
            if best.map_or(true, |(_, best_avg)| avg < best_avg) {
                best = Some((index, avg));
            }
        }
    }
    best.map(|(index, _)| index).unwrap_or(fallback)
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

enum Halt {
    Cancelled,
    Failed(SpeedTestError),
}

impl From<SpeedTestError> for Halt {
    fn from(e: SpeedTestError) -> Self {
        Halt::Failed(e)
    }
}

struct Run {
    servers: Arc<Vec<TestServer>>,
    shared: Arc<Shared>,
    config: TestRunConfig,
    tx: mpsc::UnboundedSender<TestUpdate>,
}

/// Reports a failure and frees the handle if the run task unwinds before
/// it reaches its own terminal update.
struct AbortGuard<'a> {
    run: &'a Run,
    armed: bool,
}

impl<'a> AbortGuard<'a> {
    fn new(run: &'a Run) -> Self {
        Self { run, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for AbortGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        error!("Speed test task ended without an outcome");
        let run = self.run;
        if let Some(session) = lock(&run.shared.session).take() {
            session.stop();
        }
        run.progress(TestPhase::Failed, "Error: test aborted", 0.0, 0.0);
        run.shared.running.store(false, Ordering::SeqCst);
        run.emit(TestUpdate::Phase(TestPhase::Failed));
        run.emit(TestUpdate::Failed("test aborted unexpectedly".to_string()));
    }
}

impl Run {
    async fn execute(&self) {
        let mut guard = AbortGuard::new(self);
        let outcome = self.run_stages().await;
        guard.disarm();
        self.set_session(None);

        let terminal = match outcome {
            Ok(result) => {
                info!(
                    "Speed test complete: down {:.2} Mbps, up {:.2} Mbps, ping {:.1} ms",
                    result.download_mbps, result.upload_mbps, result.ping_ms
                );
                self.progress(TestPhase::Completed, "Test complete!", 1.0, 0.0);
                (TestPhase::Completed, TestUpdate::Completed(result))
            }
            Err(Halt::Cancelled) => {
                info!("Speed test cancelled");
                self.progress(TestPhase::Cancelled, "Test stopped", 0.0, 0.0);
                (TestPhase::Cancelled, TestUpdate::Cancelled)
            }
            Err(Halt::Failed(e)) => {
                error!("Speed test failed: {}", e);
                self.progress(TestPhase::Failed, &format!("Error: {}", e), 0.0, 0.0);
                (TestPhase::Failed, TestUpdate::Failed(e.to_string()))
            }
        };

        // A new run may start as soon as the terminal update is seen.
        self.shared.running.store(false, Ordering::SeqCst);
        self.emit(TestUpdate::Phase(terminal.0));
        self.emit(terminal.1);
    }

    async fn run_stages(&self) -> Result<SpeedTestResult, Halt> {
        if self.servers.is_empty() {
            return Err(SpeedTestError::NoServers.into());
        }
        let ping_test = PingTest::new()?;

        self.enter(TestPhase::Selecting);
        let server = self.select_server(&ping_test).await?;
        info!("Testing against {} ({})", server.name, server.host);
        self.emit(TestUpdate::ServerSelected(server.clone()));

        self.check_cancelled()?;
        self.enter(TestPhase::Pinging);
        self.progress(TestPhase::Pinging, "Testing latency...", 0.0, 0.0);
        let count = self.config.ping_count;
        let mut taken = 0;
        let ping = ping_test
            .run_with(&server.host, server.port, count, |sample| {
                taken += 1;
                self.emit(TestUpdate::PingSample(sample));
                let progress = DOWNLOAD_RANGE.0 * taken as f64 / count as f64;
                self.progress(TestPhase::Pinging, "Testing latency...", progress, 0.0);
            })
            .await;
        if !ping.is_reachable() {
            return Err(SpeedTestError::Unreachable {
                server: server.name.clone(),
            }
            .into());
        }
        self.emit(TestUpdate::PingComplete(ping.clone()));

        self.check_cancelled()?;
        self.enter(TestPhase::Downloading);
        self.progress(
            TestPhase::Downloading,
            "Testing download speed...",
            DOWNLOAD_RANGE.0,
            0.0,
        );
        let download_mbps = self
            .measure(Direction::Download, &server.download_url, DOWNLOAD_RANGE)
            .await?;
        self.check_cancelled()?;
        if download_mbps == 0.0 {
            return Err(SpeedTestError::DownloadFailed.into());
        }
        self.emit(TestUpdate::DownloadComplete {
            speed_mbps: download_mbps,
        });

        self.enter(TestPhase::Uploading);
        self.progress(
            TestPhase::Uploading,
            "Testing upload speed...",
            UPLOAD_RANGE.0,
            0.0,
        );
        let upload_mbps = self
            .measure(Direction::Upload, &server.upload_url, UPLOAD_RANGE)
            .await?;
        self.check_cancelled()?;
        if upload_mbps == 0.0 {
            return Err(SpeedTestError::UploadFailed.into());
        }
        self.emit(TestUpdate::UploadComplete {
            speed_mbps: upload_mbps,
        });

        Ok(SpeedTestResult {
            download_mbps,
            upload_mbps,
            ping_ms: ping.avg_ms,
            jitter_ms: ping.jitter_ms,
            server_name: server.name.clone(),
            server_host: server.host.clone(),
            timestamp: chrono::Utc::now(),
            success: true,
            error: None,
        })
    }

    async fn select_server(&self, ping_test: &PingTest) -> Result<TestServer, Halt> {
        let fallback = self.config.server_index.min(self.servers.len() - 1);
        if !self.config.auto_select {
            return Ok(self.servers[fallback].clone());
        }

        let mut averages = Vec::with_capacity(self.servers.len());
        for (i, candidate) in self.servers.iter().enumerate() {
            self.check_cancelled()?;
            self.progress(
                TestPhase::Selecting,
                &format!("Probing {}...", candidate.name),
                0.0,
                0.0,
            );
            let results = ping_test
                .run(&candidate.host, candidate.port, SELECTION_PING_COUNT)
                .await;
            debug!(
                "Candidate {} ({}): {}/{} ok, avg {:.2} ms",
                i, candidate.name, results.success_count, results.total_count, results.avg_ms
            );
            averages.push(results.is_reachable().then_some(results.avg_ms));
        }
        self.check_cancelled()?;

        Ok(self.servers[pick_fastest(&averages, fallback)].clone())
    }

    /// Run one direction on a fresh session, mapping its progress into
    /// `range` of the overall run.
    async fn measure(&self, direction: Direction, url: &str, range: (f64, f64)) -> Result<f64, Halt> {
        let session = Arc::new(TransferSession::new());
        self.set_session(Some(Arc::clone(&session)));

        let phase = match direction {
            Direction::Download => TestPhase::Downloading,
            Direction::Upload => TestPhase::Uploading,
        };
        let (low, high) = range;
        let sampler = ThroughputSampler::new(direction, session);
        let outcome = sampler
            .run(
                url,
                self.config.connections,
                self.config.duration_secs,
                self.config.warmup_secs,
                |event: ProgressEvent| {
                    let progress = low + event.progress * (high - low);
                    self.progress(phase, &event.stage, progress, event.speed_mbps);
                },
            )
            .await;

        self.set_session(None);
        Ok(outcome?)
    }

    /// Publish the active session, stopping it at once if a cancel raced
    /// ahead of it.
    fn set_session(&self, session: Option<Arc<TransferSession>>) {
        let mut slot = lock(&self.shared.session);
        if let Some(session) = &session {
            if self.shared.cancelled.load(Ordering::SeqCst) {
                session.stop();
            }
        }
        *slot = session;
    }

    fn check_cancelled(&self) -> Result<(), Halt> {
        if self.shared.cancelled.load(Ordering::SeqCst) {
            Err(Halt::Cancelled)
        } else {
            Ok(())
        }
    }

    fn enter(&self, phase: TestPhase) {
        debug!("Entering {:?}", phase);
        lock(&self.shared.status).phase = phase;
        self.emit(TestUpdate::Phase(phase));
    }

    fn progress(&self, phase: TestPhase, stage: &str, progress: f64, speed_mbps: f64) {
        {
            let mut status = lock(&self.shared.status);
            status.phase = phase;
            status.stage = stage.to_string();
            status.progress = progress;
            status.speed_mbps = speed_mbps;
        }
        if phase.is_running() {
            self.emit(TestUpdate::Progress(ProgressEvent {
                stage: stage.to_string(),
                progress,
                speed_mbps,
            }));
        }
    }

    fn emit(&self, update: TestUpdate) {
        // The receiver may be gone if the caller lost interest.
        let _ = self.tx.send(update);
    }
}
