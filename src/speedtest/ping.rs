use super::error::Result;
use log::debug;
use reqwest::Client;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;

const PROBE_TIMEOUT: Duration = Duration::from_millis(5000);
const PROBE_DELAY: Duration = Duration::from_millis(100);

/// Aggregate latency statistics. All values are zero when no probe
/// succeeded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PingResults {
    pub min_ms: f64,
    pub max_ms: f64,
    pub avg_ms: f64,
    pub jitter_ms: f64,
    pub success_count: usize,
    pub total_count: usize,
    /// Successful samples in probe order.
    pub samples: Vec<f64>,
}

impl PingResults {
    pub fn from_samples(samples: Vec<f64>, total_count: usize) -> Self {
        if samples.is_empty() {
            return Self {
                total_count,
                ..Self::default()
            };
        }

        let min_ms = samples.iter().cloned().fold(f64::MAX, f64::min);
        let max_ms = samples.iter().cloned().fold(f64::MIN, f64::max);
        let avg_ms = samples.iter().sum::<f64>() / samples.len() as f64;

        Self {
            min_ms,
            max_ms,
            avg_ms,
            jitter_ms: calculate_jitter(&samples),
            success_count: samples.len(),
            total_count,
            samples,
        }
    }

    pub fn is_reachable(&self) -> bool {
        self.success_count > 0
    }
}

/// Population standard deviation of the absolute differences between
/// consecutive samples.
pub fn calculate_jitter(samples: &[f64]) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }

    let diffs: Vec<f64> = samples.windows(2).map(|w| (w[1] - w[0]).abs()).collect();
    let mean = diffs.iter().sum::<f64>() / diffs.len() as f64;
    let variance = diffs.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / diffs.len() as f64;
    variance.sqrt()
}

pub struct PingTest {
    client: Client,
    delay: Duration,
}

impl PingTest {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(PROBE_TIMEOUT)
            .danger_accept_invalid_certs(true)
            // Every probe opens a fresh connection, as a real round trip would.
            .pool_max_idle_per_host(0)
            .build()?;
        Ok(Self {
            client,
            delay: PROBE_DELAY,
        })
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub async fn run(&self, host: &str, port: u16, count: usize) -> PingResults {
        self.run_with(host, port, count, |_| {}).await
    }

    /// Like [`run`](Self::run), reporting each sample (`None` on failure)
    /// as soon as it is taken.
    pub async fn run_with<F>(&self, host: &str, port: u16, count: usize, mut on_sample: F) -> PingResults
    where
        F: FnMut(Option<f64>),
    {
        let mut samples = Vec::with_capacity(count);

        for i in 0..count {
            let sample = self.single_ping(host, port).await;
            match sample {
                Some(ms) => {
                    debug!("Ping {} to {}:{}: {:.2} ms", i + 1, host, port, ms);
                    samples.push(ms);
                }
                None => debug!("Ping {} to {}:{}: failed", i + 1, host, port),
            }
            on_sample(sample);

            if i + 1 < count {
                tokio::time::sleep(self.delay).await;
            }
        }

        PingResults::from_samples(samples, count)
    }

    /// HEAD round trip in milliseconds, falling back to TCP connect time.
    pub async fn single_ping(&self, host: &str, port: u16) -> Option<f64> {
        let url = if port == 80 {
            format!("http://{}", host)
        } else {
            format!("http://{}:{}", host, port)
        };

        match self.http_ping(&url).await {
            Some(ms) => Some(ms),
            None => tcp_ping(host, port).await,
        }
    }

    async fn http_ping(&self, url: &str) -> Option<f64> {
        let start = Instant::now();
        match self.client.head(url).send().await {
            Ok(_) => Some(start.elapsed().as_secs_f64() * 1000.0),
            Err(e) => {
                debug!("HTTP probe to {} failed: {}", url, e);
                None
            }
        }
    }
}

async fn tcp_ping(host: &str, port: u16) -> Option<f64> {
    let start = Instant::now();
    match tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect((host, port))).await {
        Ok(Ok(stream)) => {
            let elapsed = start.elapsed().as_secs_f64() * 1000.0;
            drop(stream);
            Some(elapsed)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn jitter_of_constant_latency_is_zero() {
        assert_eq!(calculate_jitter(&[20.0, 20.0, 20.0, 20.0]), 0.0);
    }

    #[test]
    fn jitter_of_alternating_samples_is_zero() {
        assert_eq!(calculate_jitter(&[10.0, 20.0, 10.0, 20.0]), 0.0);
        assert_eq!(calculate_jitter(&[10.0, 30.0, 10.0]), 0.0);
    }

    #[test]
    fn jitter_is_population_stddev_of_differences() {
        assert!(approx(calculate_jitter(&[10.0, 20.0, 40.0]), 5.0));
    }

    #[test]
    fn jitter_needs_two_samples() {
        assert_eq!(calculate_jitter(&[]), 0.0);
        assert_eq!(calculate_jitter(&[42.0]), 0.0);
    }

    #[test]
    fn stats_over_successful_samples() {
        let results = PingResults::from_samples(vec![12.0, 8.0, 10.0], 5);
        assert_eq!(results.min_ms, 8.0);
        assert_eq!(results.max_ms, 12.0);
        assert!(approx(results.avg_ms, 10.0));
        assert_eq!(results.success_count, 3);
        assert_eq!(results.total_count, 5);
        assert!(results.is_reachable());
    }

    #[test]
    fn no_samples_gives_zeroed_stats() {
        let results = PingResults::from_samples(Vec::new(), 4);
        assert_eq!(results.avg_ms, 0.0);
        assert_eq!(results.jitter_ms, 0.0);
        assert_eq!(results.success_count, 0);
        assert_eq!(results.total_count, 4);
        assert!(!results.is_reachable());
    }

    #[tokio::test]
    async fn unreachable_host_fails_every_probe() {
        let test = PingTest::new().unwrap().with_delay(Duration::from_millis(1));
        let mut seen = Vec::new();
        let results = test.run_with("127.0.0.1", 9, 3, |s| seen.push(s)).await;

        assert_eq!(seen, vec![None, None, None]);
        assert_eq!(results.total_count, 3);
        assert!(!results.is_reachable());
    }

    #[tokio::test]
    async fn tcp_fallback_times_plain_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                drop(stream);
            }
        });

        let sample = tcp_ping("127.0.0.1", port).await;
        assert!(sample.is_some_and(|ms| ms >= 0.0));
    }
}
