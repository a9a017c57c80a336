use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Run-scoped state shared between transfer workers and the sampler.
///
/// `running` is the only stop signal. `total_bytes` only ever grows while
/// the session lives; a new session is created for each direction.
#[derive(Debug, Default)]
pub struct TransferSession {
    running: AtomicBool,
    total_bytes: AtomicU64,
}

impl TransferSession {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            total_bytes: AtomicU64::new(0),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn add_bytes(&self, bytes: u64) {
        self.total_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn new_session_is_running_and_empty() {
        let session = TransferSession::new();
        assert!(session.is_running());
        assert_eq!(session.total_bytes(), 0);
        session.stop();
        assert!(!session.is_running());
    }

    #[test]
    fn counter_accumulates_across_threads() {
        let session = Arc::new(TransferSession::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let session = Arc::clone(&session);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        session.add_bytes(3);
                    }
                })
            })
            .collect();

        let mut last = 0;
        while handles.iter().any(|h| !h.is_finished()) {
            let now = session.total_bytes();
            assert!(now >= last);
            last = now;
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(session.total_bytes(), 8 * 1000 * 3);
    }
}
