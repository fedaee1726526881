use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

/// Delay strategy used for backoff and request spacing.
#[async_trait]
pub trait Pause: Send + Sync {
    async fn wait(&self, duration: Duration);
}

/// Real delay on the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioPause;

#[async_trait]
impl Pause for TokioPause {
    async fn wait(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}

/// Returns immediately and remembers every requested duration.
#[derive(Debug, Default)]
pub struct InstantPause {
    requested: Mutex<Vec<Duration>>,
}

impl InstantPause {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requested(&self) -> Vec<Duration> {
        self.requested
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    /// Number of waits of exactly `duration`.
    pub fn count_of(&self, duration: Duration) -> usize {
        self.requested()
            .into_iter()
            .filter(|requested| *requested == duration)
            .count()
    }
}

#[async_trait]
impl Pause for InstantPause {
    async fn wait(&self, duration: Duration) {
        if let Ok(mut guard) = self.requested.lock() {
            guard.push(duration);
        }
    }
}
