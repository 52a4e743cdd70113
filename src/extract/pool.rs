//! Admission control for browser processes.
//!
//! At most `max_browsers` sessions are alive at once. A checkout waits for a
//! free slot up to the queue timeout and is then rejected, never dropped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

use super::renderer::{RenderSession, Renderer};
use crate::error::ExtractionError;

const DEFAULT_TEARDOWN_TIMEOUT: Duration = Duration::from_secs(10);

pub struct BrowserPool {
    renderer: Arc<dyn Renderer>,
    permits: Arc<Semaphore>,
    queue_timeout: Duration,
    teardown_timeout: Duration,
}

impl BrowserPool {
    pub fn new(renderer: Arc<dyn Renderer>, max_browsers: usize, queue_timeout: Duration) -> Self {
        Self {
            renderer,
            permits: Arc::new(Semaphore::new(max_browsers.max(1))),
            queue_timeout,
            teardown_timeout: DEFAULT_TEARDOWN_TIMEOUT,
        }
    }

    /// Upper bound on a graceful session close before the session is dropped.
    pub fn with_teardown_timeout(mut self, teardown_timeout: Duration) -> Self {
        self.teardown_timeout = teardown_timeout;
        self
    }

    pub fn is_available(&self) -> bool {
        self.renderer.available()
    }

    pub fn free_slots(&self) -> usize {
        self.permits.available_permits()
    }

    /// Reserve a slot and launch a dedicated browser process in it.
    ///
    /// Missing engine, a full pool and launch failures are all reported as
    /// `NoStrategyAvailable`; running out of request budget is a timeout.
    pub async fn checkout(&self, deadline: Instant) -> Result<PooledSession, ExtractionError> {
        if !self.renderer.available() {
            return Err(ExtractionError::NoStrategyAvailable(
                "No browser engine is available on this host".to_string(),
            ));
        }

        let wait = self
            .queue_timeout
            .min(deadline.saturating_duration_since(Instant::now()));
        let permit = match tokio::time::timeout(wait, self.permits.clone().acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                return Err(ExtractionError::Internal("Browser pool is closed".to_string()))
            }
            Err(_) => {
                tracing::warn!(wait_ms = wait.as_millis() as u64, "browser pool saturated");
                return Err(ExtractionError::NoStrategyAvailable(
                    "All browser slots are busy".to_string(),
                ));
            }
        };

        let session = match tokio::time::timeout_at(deadline, self.renderer.launch()).await {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                tracing::warn!(error = ?e, "browser launch failed");
                return Err(ExtractionError::NoStrategyAvailable(
                    "Browser engine could not be started".to_string(),
                ));
            }
            Err(_) => {
                return Err(ExtractionError::PageLoadTimeout(
                    "Browser launch exceeded the request timeout".to_string(),
                ))
            }
        };

        Ok(PooledSession {
            session: Some(session),
            teardown_timeout: self.teardown_timeout,
            _permit: permit,
        })
    }
}

/// A launched session plus the pool slot it occupies.
///
/// Field order matters: the session (and its process) is dropped before the
/// permit returns to the pool.
pub struct PooledSession {
    session: Option<Box<dyn RenderSession>>,
    teardown_timeout: Duration,
    _permit: OwnedSemaphorePermit,
}

impl PooledSession {
    pub fn session_mut(&mut self) -> Option<&mut (dyn RenderSession + 'static)> {
        self.session.as_deref_mut()
    }

    /// Close the browser process. Teardown failures are logged, never returned.
    ///
    /// A close that outlives the teardown timeout is abandoned; dropping the
    /// session then ends the process.
    pub async fn release(mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        match tokio::time::timeout(self.teardown_timeout, session.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = ?e, "browser teardown failed"),
            Err(_) => tracing::warn!(
                limit_ms = self.teardown_timeout.as_millis() as u64,
                "browser teardown timed out, dropping session"
            ),
        }
    }
}
