//! Parallel transfer workers.
//!
//! Each worker loops on one HTTP transfer against the target URL until the
//! session is stopped, adding transferred bytes to the shared counter.
//! TLS certificates are not verified: the pool only measures raw transfer
//! speed and never trusts the payload.

use super::error::Result;
use super::session::TransferSession;
use super::Direction;
use bytes::Bytes;
use futures::StreamExt;
use log::{debug, warn};
use rand::{RngCore, SeedableRng};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Size of the payload each upload worker POSTs repeatedly (1 MiB).
pub const UPLOAD_CHUNK_SIZE: usize = 1024 * 1024;

/// A worker exits after this many failed requests in a row.
const MAX_CONSECUTIVE_ERRORS: u32 = 3;

const RETRY_DELAY: Duration = Duration::from_millis(500);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(10);

pub struct TransferPool {
    direction: Direction,
    session: Arc<TransferSession>,
    handles: Vec<JoinHandle<()>>,
}

impl TransferPool {
    pub fn new(direction: Direction, session: Arc<TransferSession>) -> Self {
        Self {
            direction,
            session,
            handles: Vec::new(),
        }
    }

    /// Spawn `workers` transfer loops against `url`.
    pub fn start(&mut self, url: &str, workers: usize) -> Result<()> {
        for id in 0..workers {
            if !self.session.is_running() {
                break;
            }
            let client = build_client(self.direction)?;
            let url = url.to_string();
            let session = Arc::clone(&self.session);
            let handle = match self.direction {
                Direction::Download => {
                    tokio::spawn(download_worker(id, client, url, session))
                }
                Direction::Upload => tokio::spawn(upload_worker(id, client, url, session)),
            };
            self.handles.push(handle);
        }
        debug!(
            "Started {} {:?} workers",
            self.handles.len(),
            self.direction
        );
        Ok(())
    }

    /// Signal every worker to stop and wait for all of them to exit.
    /// No worker touches the counter once this returns.
    pub async fn stop(&mut self) {
        self.session.stop();
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                warn!("Transfer worker ended abnormally: {}", e);
            }
        }
    }

    pub fn active_workers(&self) -> usize {
        self.handles.iter().filter(|h| !h.is_finished()).count()
    }
}

impl Drop for TransferPool {
    fn drop(&mut self) {
        self.session.stop();
        for handle in &self.handles {
            handle.abort();
        }
    }
}

fn build_client(direction: Direction) -> Result<Client> {
    let timeout = match direction {
        Direction::Download => DOWNLOAD_TIMEOUT,
        Direction::Upload => UPLOAD_TIMEOUT,
    };
    let client = Client::builder()
        .timeout(timeout)
        .connect_timeout(CONNECT_TIMEOUT)
        .danger_accept_invalid_certs(true)
        .build()?;
    Ok(client)
}

async fn download_worker(id: usize, client: Client, url: String, session: Arc<TransferSession>) {
    let mut consecutive_errors = 0;

    while session.is_running() && consecutive_errors < MAX_CONSECUTIVE_ERRORS {
        match download_once(&client, &url, &session).await {
            Ok(_) => consecutive_errors = 0,
            Err(e) => {
                if !session.is_running() {
                    break;
                }
                consecutive_errors += 1;
                warn!(
                    "Download error in worker {}: {} (attempt {}/{})",
                    id, e, consecutive_errors, MAX_CONSECUTIVE_ERRORS
                );
                tokio::time::sleep(RETRY_DELAY).await;
            }
        }
    }

    if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
        warn!("Download worker {} giving up after repeated errors", id);
    }
}

/// Stream one response body, counting each chunk as it arrives.
async fn download_once(
    client: &Client,
    url: &str,
    session: &TransferSession,
) -> reqwest::Result<u64> {
    let response = client.get(url).send().await?.error_for_status()?;
    let mut stream = response.bytes_stream();
    let mut received: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        session.add_bytes(chunk.len() as u64);
        received += chunk.len() as u64;

        // Bodies can be tens of megabytes; finishing one after the session
        // ends would hold `stop` for seconds. Dropping the stream closes the
        // connection, and the worker loop then sees the flag and exits.
        if !session.is_running() {
            break;
        }
    }

    Ok(received)
}

async fn upload_worker(id: usize, client: Client, url: String, session: Arc<TransferSession>) {
    let payload = random_payload(UPLOAD_CHUNK_SIZE);
    let mut consecutive_errors = 0;

    while session.is_running() && consecutive_errors < MAX_CONSECUTIVE_ERRORS {
        match upload_once(&client, &url, payload.clone()).await {
            Ok(()) => {
                session.add_bytes(payload.len() as u64);
                consecutive_errors = 0;
            }
            Err(e) => {
                if !session.is_running() {
                    break;
                }
                consecutive_errors += 1;
                warn!(
                    "Upload error in worker {}: {} (attempt {}/{})",
                    id, e, consecutive_errors, MAX_CONSECUTIVE_ERRORS
                );
                tokio::time::sleep(RETRY_DELAY).await;
            }
        }
    }

    if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
        warn!("Upload worker {} giving up after repeated errors", id);
    }
}

async fn upload_once(client: &Client, url: &str, payload: Bytes) -> reqwest::Result<()> {
    let response = client
        .post(url)
        .header("Content-Type", "application/octet-stream")
        .body(payload)
        .send()
        .await?
        .error_for_status()?;
    // Drain so the connection can be reused.
    response.bytes().await?;
    Ok(())
}

/// Non-cryptographic filler for upload requests.
fn random_payload(size: usize) -> Bytes {
    let mut rng = rand::rngs::StdRng::from_entropy();
    let mut data = vec![0u8; size];
    rng.fill_bytes(&mut data);
    Bytes::from(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_has_requested_size() {
        let payload = random_payload(4096);
        assert_eq!(payload.len(), 4096);
        assert!(payload.iter().any(|&b| b != 0));
    }

    #[tokio::test]
    async fn stop_without_start_is_noop() {
        let session = Arc::new(TransferSession::new());
        let mut pool = TransferPool::new(Direction::Download, Arc::clone(&session));
        pool.stop().await;
        pool.stop().await;
        assert!(!session.is_running());
        assert_eq!(session.total_bytes(), 0);
    }

    #[tokio::test]
    async fn stop_abandons_a_long_download_body() {
        use tokio::io::AsyncWriteExt;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100000000\r\n\r\n")
                .await
                .unwrap();
            // Trickle a body that would take far longer than the test to finish.
            while socket.write_all(&[0u8; 1024]).await.is_ok() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        });

        let session = Arc::new(TransferSession::new());
        let mut pool = TransferPool::new(Direction::Download, Arc::clone(&session));
        pool.start(&format!("http://127.0.0.1:{port}/"), 1).unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while session.total_bytes() == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("body started streaming");

        let started = std::time::Instant::now();
        pool.stop().await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(pool.active_workers(), 0);
    }

    #[tokio::test]
    async fn workers_give_up_on_dead_server() {
        let session = Arc::new(TransferSession::new());
        let mut pool = TransferPool::new(Direction::Upload, Arc::clone(&session));
        // Port 9 (discard) is closed on loopback; connects fail immediately.
        pool.start("http://127.0.0.1:9/", 2).unwrap();

        tokio::time::timeout(Duration::from_secs(10), async {
            while pool.active_workers() > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await
        .expect("workers should exit after repeated failures");

        assert!(session.is_running());
        pool.stop().await;
        assert_eq!(session.total_bytes(), 0);
    }
}
