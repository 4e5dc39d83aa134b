//! Fixed request pacing
//!
//! Each worker waits a flat delay after every task that issued a request, whatever
//! its outcome. With `pool_size` workers this bounds the request rate at roughly
//! `pool_size / pacing` per second. There is no adaptive backoff at this level; the
//! HTTP client retries individual requests on its own.

use crate::shutdown::SharedShutdown;
use std::time::Duration;
use tokio::time::sleep;

/// Flat delay applied between consecutive requests of one worker
#[derive(Debug, Clone)]
pub struct Pacer {
    delay: Duration,
    shutdown: Option<SharedShutdown>,
}

impl Pacer {
    /// Create a pacer with the given delay
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            shutdown: None,
        }
    }

    /// Cut the delay short when shutdown is requested
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Wait out the delay
    ///
    /// Returns `false` if shutdown interrupted the wait.
    pub async fn pace(&self) -> bool {
        match &self.shutdown {
            Some(shutdown) => shutdown.sleep(self.delay).await,
            None => {
                if !self.delay.is_zero() {
                    sleep(self.delay).await;
                }
                true
            }
        }
    }
}
