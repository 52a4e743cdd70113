//! Browser-engine abstraction used by the rendered-DOM strategy.
//!
//! A `Renderer` launches one isolated `RenderSession` (its own browser
//! process) per request. Sessions are never shared between requests.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

/// Something that can launch browser sessions.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Whether a browser engine was found on this host at all.
    fn available(&self) -> bool;
    /// Launch a fresh browser process with one blank page.
    async fn launch(&self) -> Result<Box<dyn RenderSession>>;
}

/// One live browser process driving a single page.
///
/// Dropping a session without calling [`RenderSession::close`] must still
/// terminate the underlying process.
#[async_trait]
pub trait RenderSession: Send + Sync {
    /// Navigate and wait for the load event. An engine that gives up waiting
    /// reports [`NavigationTimeout`] rather than a generic error.
    async fn navigate(&mut self, url: &str) -> Result<()>;
    /// Evaluate a read-only script in the page and return its JSON value.
    async fn evaluate(&self, script: &str) -> Result<Value>;
    /// URL of the page after any redirects.
    async fn current_url(&self) -> Result<Option<String>>;
    /// Graceful shutdown of the browser process.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// The engine stopped waiting for a navigation to finish.
#[derive(Debug, thiserror::Error)]
#[error("navigation timed out")]
pub struct NavigationTimeout;

/// Installed when no browser binary exists on the host; the static
/// strategy keeps working without it.
pub struct NoopRenderer;

#[async_trait]
impl Renderer for NoopRenderer {
    fn available(&self) -> bool {
        false
    }

    async fn launch(&self) -> Result<Box<dyn RenderSession>> {
        Err(anyhow::anyhow!("no browser engine installed on this host"))
    }
}
