//! Chromium sessions driven through chromiumoxide.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::error::CdpError;
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde_json::Value;
use tempfile::TempDir;
use tokio::task::JoinHandle;

use super::renderer::{NavigationTimeout, NoopRenderer, RenderSession, Renderer};
use crate::config::Config;

pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

const TEARDOWN_GRACE: Duration = Duration::from_secs(5);
/// Added on top of the largest request budget so chromiumoxide's own
/// per-command timeout never fires before the request deadline does.
const COMMAND_TIMEOUT_SLACK: Duration = Duration::from_secs(5);

/// Locate a Chromium-family binary: explicit path first, then `PATH`.
pub fn find_chromium(explicit: Option<&PathBuf>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Some(path.clone());
        }
        tracing::warn!(path = %path.display(), "configured browser binary does not exist");
    }

    ["google-chrome", "google-chrome-stable", "chromium", "chromium-browser"]
        .iter()
        .find_map(|name| which::which(name).ok())
}

/// Pick the Chromium renderer when a binary exists, otherwise the no-op one.
pub fn discover(config: &Config) -> Arc<dyn Renderer> {
    match find_chromium(config.chrome_path.as_ref()) {
        Some(path) => {
            tracing::info!(path = %path.display(), "browser engine found");
            Arc::new(ChromiumRenderer::new(
                path,
                config.chrome_no_sandbox,
                config.max_timeout,
            ))
        }
        None => {
            tracing::warn!("no browser engine found; only static extraction is available");
            Arc::new(NoopRenderer)
        }
    }
}

pub struct ChromiumRenderer {
    executable: PathBuf,
    no_sandbox: bool,
    command_timeout: Duration,
}

impl ChromiumRenderer {
    /// `max_request` is the longest budget any request may ask for.
    pub fn new(executable: PathBuf, no_sandbox: bool, max_request: Duration) -> Self {
        Self {
            executable,
            no_sandbox,
            command_timeout: max_request + COMMAND_TIMEOUT_SLACK,
        }
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    fn available(&self) -> bool {
        true
    }

    async fn launch(&self) -> Result<Box<dyn RenderSession>> {
        // Fresh profile per process: no cookies, cache or storage carry over.
        let profile = tempfile::Builder::new()
            .prefix("asset-extractor-profile-")
            .tempdir()
            .context("failed to create browser profile directory")?;

        let mut builder = BrowserConfig::builder()
            .chrome_executable(&self.executable)
            .user_data_dir(profile.path())
            .request_timeout(self.command_timeout)
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-background-networking")
            .arg("--disable-accelerated-2d-canvas")
            .arg("--no-first-run")
            .arg(format!("--user-agent={}", BROWSER_USER_AGENT));
        if self.no_sandbox {
            builder = builder.no_sandbox();
        }
        let config = builder
            .build()
            .map_err(|e| anyhow!("failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch browser")?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                let _ = event;
            }
        });

        // From here on the session owns the process; an early return drops it.
        let mut session = ChromiumSession {
            browser,
            page: None,
            handler,
            _profile: profile,
        };
        let page = session
            .browser
            .new_page("about:blank")
            .await
            .context("failed to open page")?;
        session.page = Some(page);

        Ok(Box::new(session))
    }
}

pub struct ChromiumSession {
    browser: Browser,
    page: Option<Page>,
    handler: JoinHandle<()>,
    _profile: TempDir,
}

impl ChromiumSession {
    fn page(&self) -> Result<&Page> {
        self.page.as_ref().ok_or_else(|| anyhow!("session has no page"))
    }
}

#[async_trait]
impl RenderSession for ChromiumSession {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        match self.page()?.goto(url).await {
            Ok(_) => Ok(()),
            Err(CdpError::Timeout) => Err(NavigationTimeout.into()),
            Err(e) => Err(anyhow::Error::new(e).context(format!("navigation to {url} failed"))),
        }
    }

    async fn evaluate(&self, script: &str) -> Result<Value> {
        self.page()?
            .evaluate(script)
            .await
            .context("script evaluation failed")?
            .into_value()
            .map_err(|e| anyhow!("failed to convert script result: {e:?}"))
    }

    async fn current_url(&self) -> Result<Option<String>> {
        self.page()?.url().await.context("failed to read page URL")
    }

    /// Close the page and browser, then wait for the process to exit. The
    /// whole sequence shares one grace period; past it the process is killed.
    async fn close(self: Box<Self>) -> Result<()> {
        let mut this = self;
        let page = this.page.take();
        let browser = &mut this.browser;
        let graceful = async move {
            if let Some(page) = page {
                if let Err(e) = page.close().await {
                    tracing::debug!(error = %e, "page close command failed");
                }
            }
            if let Err(e) = browser.close().await {
                tracing::debug!(error = %e, "browser close command failed");
            }
            browser.wait().await
        };
        match tokio::time::timeout(TEARDOWN_GRACE, graceful).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => {
                let _ = this.browser.kill().await;
                Err(anyhow!("waiting for browser exit failed, killed: {e}"))
            }
            Err(_) => {
                let _ = this.browser.kill().await;
                Err(anyhow!(
                    "browser did not exit within {}s, killed",
                    TEARDOWN_GRACE.as_secs()
                ))
            }
        }
    }
}

impl Drop for ChromiumSession {
    fn drop(&mut self) {
        // The Browser's child process is spawned kill-on-drop, so dropping
        // the session (including on cancellation) ends the process.
        self.handler.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_explicit_binary_is_not_returned() {
        let bogus = PathBuf::from("/definitely/not/a/browser");
        assert_ne!(find_chromium(Some(&bogus)), Some(bogus));
    }

    #[tokio::test]
    #[ignore] // Requires Chromium to be installed
    async fn launches_navigates_and_tears_down() {
        let path = find_chromium(None).expect("no browser installed");
        let renderer = ChromiumRenderer::new(path, true, Duration::from_secs(30));
        let mut session = renderer.launch().await.expect("launch failed");

        session
            .navigate("data:text/html,<title>Hi</title><img src='https://example.com/a.png'>")
            .await
            .expect("navigation failed");
        let title = session.evaluate("document.title").await.expect("eval failed");
        assert_eq!(title.as_str(), Some("Hi"));

        session.close().await.expect("close failed");
    }
}
