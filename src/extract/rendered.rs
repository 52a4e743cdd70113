//! Rendered-DOM strategy: render the page in a dedicated browser process and
//! read assets from the live DOM and its computed styles.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::time::Instant;
use url::Url;

use super::pool::PooledSession;
use super::renderer::{NavigationTimeout, RenderSession};
use super::Findings;
use crate::config::SettleCondition;
use crate::error::ExtractionError;
use crate::normalize::{absolutize, canonical_color, css_urls, is_web_url};

// ── Constants ────────────────────────────────────────────────────────────────

const IDLE_WINDOW: Duration = Duration::from_millis(500);
const IDLE_POLL: Duration = Duration::from_millis(100);
const MAX_IDLE_WAIT: Duration = Duration::from_secs(15);
const IMAGE_WAIT: Duration = Duration::from_secs(5);

// ── In-page scripts ──────────────────────────────────────────────────────────
// None of the scripts modify the document. Each one is evaluated separately
// so that a failure stays confined to its category.

// Resource timing stops recording at 250 entries unless the buffer is raised.
pub(crate) const RESOURCE_COUNT_JS: &str = r#"(() => {
  if (document.readyState !== 'complete') return -1;
  performance.setResourceTimingBufferSize(100000);
  return performance.getEntriesByType('resource').length;
})()"#;

pub(crate) const HAS_IMAGE_JS: &str = "document.querySelector('img') !== null";

pub(crate) const IMAGES_JS: &str = r#"(() => ({
  sources: Array.from(document.querySelectorAll('img')).map((img) => img.src).filter(Boolean),
  backgrounds: Array.from(document.querySelectorAll('[style]'))
    .map((el) => el.style.backgroundImage)
    .filter(Boolean),
}))()"#;

pub(crate) const VIDEOS_JS: &str = r#"(() => Array.from(
  document.querySelectorAll('video, video source, iframe')
).map((el) => el.src).filter(Boolean))()"#;

pub(crate) const FONTS_JS: &str = r#"(() => {
  const families = new Set();
  document.querySelectorAll('*').forEach((el) => {
    families.add(window.getComputedStyle(el).fontFamily);
  });
  return Array.from(families);
})()"#;

pub(crate) const COLORS_JS: &str = r#"(() => {
  const colors = new Set();
  document.querySelectorAll('*').forEach((el) => {
    const style = window.getComputedStyle(el);
    colors.add(style.color);
    colors.add(style.backgroundColor);
  });
  return Array.from(colors);
})()"#;

pub(crate) const METADATA_JS: &str = r#"(() => {
  const meta = document.querySelector('meta[name="description" i]')
    || document.querySelector('meta[property="og:description"]');
  return {
    title: document.title || null,
    description: meta ? meta.getAttribute('content') : null,
    links: Array.from(document.querySelectorAll('a[href]')).map((a) => a.href),
    scripts: Array.from(document.querySelectorAll('script[src]')).map((s) => s.src),
  };
})()"#;

// ── Query payloads ───────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct ImagesPayload {
    #[serde(default)]
    sources: Vec<String>,
    #[serde(default)]
    backgrounds: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct MetadataPayload {
    title: Option<String>,
    description: Option<String>,
    #[serde(default)]
    links: Vec<String>,
    #[serde(default)]
    scripts: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub settle: SettleCondition,
    pub query_timeout: Duration,
    pub collect_metadata: bool,
}

// ── Public API ───────────────────────────────────────────────────────────────

/// Render `target` in the pooled session and collect its assets.
///
/// The whole pipeline runs under `deadline`. The session is released on
/// every path; on timeout nothing gathered so far is returned.
pub async fn extract(
    mut pooled: PooledSession,
    target: &Url,
    deadline: Instant,
    options: &RenderOptions,
) -> Result<Findings, ExtractionError> {
    let started = Instant::now();
    let outcome = match pooled.session_mut() {
        Some(session) => {
            tokio::time::timeout_at(deadline, render_and_query(session, target, options)).await
        }
        None => Ok(Err(ExtractionError::Internal(
            "Browser session was already released".to_string(),
        ))),
    };
    pooled.release().await;

    match outcome {
        Ok(result) => result,
        Err(_) => {
            let elapsed = started.elapsed().as_millis() as u64;
            tracing::warn!(url = %target, elapsed_ms = elapsed, "page load timed out");
            Err(ExtractionError::PageLoadTimeout(format!(
                "Page did not finish loading within {} ms",
                elapsed
            )))
        }
    }
}

async fn render_and_query(
    session: &mut dyn RenderSession,
    target: &Url,
    options: &RenderOptions,
) -> Result<Findings, ExtractionError> {
    session.navigate(target.as_str()).await.map_err(|e| {
        if e.downcast_ref::<NavigationTimeout>().is_some() {
            tracing::warn!(url = %target, "navigation timed out in the browser");
            return ExtractionError::PageLoadTimeout("Page did not finish loading".to_string());
        }
        tracing::warn!(url = %target, error = ?e, "navigation failed");
        ExtractionError::FetchFailed("Could not load the page".to_string())
    })?;

    let session: &dyn RenderSession = session;
    if options.settle == SettleCondition::NetworkIdle {
        wait_for_network_idle(session).await;
    }
    wait_for_images(session).await;

    let base = effective_base(session, target).await;
    let limit = options.query_timeout;

    let images: ImagesPayload = query(session, "images", IMAGES_JS, limit).await;
    let videos: Vec<String> = query(session, "videos", VIDEOS_JS, limit).await;
    let fonts: Vec<String> = query(session, "fonts", FONTS_JS, limit).await;
    let colors: Vec<String> = query(session, "colors", COLORS_JS, limit).await;

    let background_urls: Vec<String> = images
        .backgrounds
        .iter()
        .flat_map(|bg| css_urls(bg))
        .collect();

    let mut findings = Findings {
        images: images
            .sources
            .iter()
            .chain(background_urls.iter())
            .filter_map(|raw| absolutize(&base, raw))
            .collect(),
        videos: videos.iter().filter_map(|raw| absolutize(&base, raw)).collect(),
        fonts: fonts
            .into_iter()
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .collect(),
        colors: colors.iter().filter_map(|c| canonical_color(c)).collect(),
        ..Default::default()
    };

    if options.collect_metadata {
        let meta: MetadataPayload = query(session, "metadata", METADATA_JS, limit).await;
        findings.links = Some(meta.links.iter().filter_map(|raw| absolutize(&base, raw)).collect());
        findings.scripts = Some(
            meta.scripts
                .iter()
                .filter_map(|raw| absolutize(&base, raw))
                .collect(),
        );
        findings.title = meta.title;
        findings.description = meta.description;
    }

    Ok(findings)
}

// ── Settling ─────────────────────────────────────────────────────────────────

/// Wait until the resource-timing entry count stops changing for
/// `IDLE_WINDOW`. Pages that never go quiet are queried after `MAX_IDLE_WAIT`.
async fn wait_for_network_idle(session: &dyn RenderSession) {
    let started = Instant::now();
    let mut last: Option<i64> = None;
    let mut stable_since = Instant::now();

    while started.elapsed() < MAX_IDLE_WAIT {
        let count = match session.evaluate(RESOURCE_COUNT_JS).await {
            Ok(value) => value.as_i64(),
            Err(e) => {
                tracing::debug!(error = ?e, "resource count unavailable, skipping idle wait");
                return;
            }
        };

        match count {
            Some(n) if n >= 0 && last == Some(n) => {
                if stable_since.elapsed() >= IDLE_WINDOW {
                    return;
                }
            }
            other => {
                last = other.filter(|n| *n >= 0);
                stable_since = Instant::now();
            }
        }
        tokio::time::sleep(IDLE_POLL).await;
    }
    tracing::debug!("network never went idle, querying anyway");
}

/// Give client-rendered pages a short chance to insert their first image.
async fn wait_for_images(session: &dyn RenderSession) {
    let started = Instant::now();
    while started.elapsed() < IMAGE_WAIT {
        match session.evaluate(HAS_IMAGE_JS).await {
            Ok(value) if value.as_bool() != Some(false) => return,
            Ok(_) => tokio::time::sleep(IDLE_POLL).await,
            Err(_) => return,
        }
    }
}

// ── Queries ──────────────────────────────────────────────────────────────────

async fn effective_base(session: &dyn RenderSession, target: &Url) -> Url {
    session
        .current_url()
        .await
        .ok()
        .flatten()
        .and_then(|u| Url::parse(&u).ok())
        .filter(is_web_url)
        .unwrap_or_else(|| target.clone())
}

/// Run one category query. Any failure yields an empty result for that
/// category only.
async fn query<T: DeserializeOwned + Default>(
    session: &dyn RenderSession,
    category: &'static str,
    script: &str,
    limit: Duration,
) -> T {
    let value = match tokio::time::timeout(limit, session.evaluate(script)).await {
        Ok(Ok(value)) => value,
        Ok(Err(e)) => {
            tracing::warn!(category, error = ?e, "in-page query failed");
            return T::default();
        }
        Err(_) => {
            tracing::warn!(category, limit_ms = limit.as_millis() as u64, "in-page query timed out");
            return T::default();
        }
    };

    serde_json::from_value(value).unwrap_or_else(|e| {
        tracing::warn!(category, error = %e, "in-page query returned an unexpected shape");
        T::default()
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::extract::pool::testing::{FakePage, FakeRenderer, Navigation};
    use crate::extract::pool::BrowserPool;

    fn options(collect_metadata: bool) -> RenderOptions {
        RenderOptions {
            settle: SettleCondition::Load,
            query_timeout: Duration::from_secs(1),
            collect_metadata,
        }
    }

    fn page() -> FakePage {
        let mut page = FakePage {
            final_url: Some("https://example.com/landing/".to_string()),
            ..Default::default()
        };
        page.responses.insert(HAS_IMAGE_JS, Ok(json!(true)));
        page.responses.insert(
            IMAGES_JS,
            Ok(json!({
                "sources": [
                    "https://example.com/a.png",
                    "https://example.com/a.png",
                    "data:image/gif;base64,R0lGOD",
                    "/b.png"
                ],
                "backgrounds": ["url(\"hero.jpg\")", "none"]
            })),
        );
        page.responses.insert(
            VIDEOS_JS,
            Ok(json!(["https://www.youtube.com/embed/xyz", "blob:https://example.com/1"])),
        );
        page.responses.insert(
            FONTS_JS,
            Ok(json!(["\"Helvetica Neue\", Arial, sans-serif", "Georgia, serif"])),
        );
        page.responses.insert(
            COLORS_JS,
            Ok(json!(["rgb(0, 128, 255)", "rgba(0, 0, 0, 0)", "color(srgb 1 0 0)"])),
        );
        page.responses.insert(
            METADATA_JS,
            Ok(json!({
                "title": "Landing",
                "description": "A page",
                "links": ["https://example.com/about", "javascript:void(0)"],
                "scripts": ["https://cdn.example.com/app.js"]
            })),
        );
        page
    }

    async fn run(
        renderer: FakeRenderer,
        timeout: Duration,
        options: &RenderOptions,
    ) -> (Result<Findings, ExtractionError>, Arc<std::sync::atomic::AtomicUsize>) {
        let live = Arc::clone(&renderer.live);
        let pool = BrowserPool::new(Arc::new(renderer), 1, Duration::from_millis(100));
        let deadline = Instant::now() + timeout;
        let session = pool.checkout(deadline).await.unwrap();
        let target = Url::parse("https://example.com/landing").unwrap();
        (extract(session, &target, deadline, options).await, live)
    }

    #[tokio::test]
    async fn collects_and_normalizes_every_category() {
        let renderer = FakeRenderer::with_page(page());
        let (result, live) = run(renderer, Duration::from_secs(5), &options(true)).await;
        let findings = result.unwrap();

        assert_eq!(
            findings.images,
            vec![
                "https://example.com/a.png",
                "https://example.com/a.png",
                "https://example.com/b.png",
                "https://example.com/landing/hero.jpg",
            ]
        );
        assert_eq!(findings.videos, vec!["https://www.youtube.com/embed/xyz"]);
        assert_eq!(
            findings.fonts,
            vec!["\"Helvetica Neue\", Arial, sans-serif", "Georgia, serif"]
        );
        assert_eq!(findings.colors, vec!["#0080ff", "#000000"]);
        assert_eq!(findings.links, Some(vec!["https://example.com/about".to_string()]));
        assert_eq!(findings.title.as_deref(), Some("Landing"));
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_style_queries_leave_other_categories_intact() {
        let mut page = page();
        page.responses
            .insert(FONTS_JS, Err("getComputedStyle threw".to_string()));
        page.responses
            .insert(COLORS_JS, Err("getComputedStyle threw".to_string()));
        let renderer = FakeRenderer::with_page(page);

        let (result, live) = run(renderer, Duration::from_secs(5), &options(true)).await;
        let findings = result.unwrap();

        assert!(!findings.images.is_empty());
        assert!(!findings.videos.is_empty());
        assert!(findings.fonts.is_empty());
        assert!(findings.colors.is_empty());
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unexpected_payload_shape_empties_only_that_category() {
        let mut page = page();
        page.responses.insert(VIDEOS_JS, Ok(json!({"not": "a list"})));
        let renderer = FakeRenderer::with_page(page);

        let (result, _) = run(renderer, Duration::from_secs(5), &options(true)).await;
        let findings = result.unwrap();
        assert!(findings.videos.is_empty());
        assert!(!findings.images.is_empty());
    }

    #[tokio::test]
    async fn metadata_is_skipped_when_not_collected() {
        let renderer = FakeRenderer::with_page(page());
        let (result, _) = run(renderer, Duration::from_secs(5), &options(false)).await;
        let findings = result.unwrap();
        assert!(findings.links.is_none());
        assert!(findings.scripts.is_none());
        assert!(findings.title.is_none());
    }

    #[tokio::test]
    async fn slow_navigation_times_out_and_tears_down() {
        let mut page = page();
        page.navigation_delay = Duration::from_secs(10);
        let renderer = FakeRenderer::with_page(page);
        let launched = Arc::clone(&renderer.launched);

        let (result, live) = run(renderer, Duration::from_millis(200), &options(true)).await;

        assert_eq!(result.unwrap_err().kind(), "PageLoadTimeout");
        assert_eq!(launched.load(Ordering::SeqCst), 1);
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn navigation_errors_are_fetch_failures_and_tear_down() {
        let mut page = page();
        page.navigation = Navigation::Fails;
        let renderer = FakeRenderer::with_page(page);

        let (result, live) = run(renderer, Duration::from_secs(5), &options(true)).await;

        assert_eq!(result.unwrap_err().kind(), "FetchFailed");
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn engine_navigation_timeout_is_a_page_load_timeout() {
        let mut page = page();
        page.navigation = Navigation::TimesOut;
        let renderer = FakeRenderer::with_page(page);

        let (result, live) = run(renderer, Duration::from_secs(5), &options(true)).await;

        assert_eq!(result.unwrap_err().kind(), "PageLoadTimeout");
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancelled_extraction_ends_the_session_and_frees_the_slot() {
        let mut page = page();
        page.navigation_delay = Duration::from_secs(10);
        let renderer = FakeRenderer::with_page(page);
        let live = Arc::clone(&renderer.live);
        let pool = BrowserPool::new(Arc::new(renderer), 1, Duration::from_millis(100));
        let deadline = Instant::now() + Duration::from_secs(30);
        let session = pool.checkout(deadline).await.unwrap();
        let target = Url::parse("https://example.com/landing").unwrap();
        assert_eq!(pool.free_slots(), 0);

        let cancelled = tokio::time::timeout(
            Duration::from_millis(100),
            extract(session, &target, deadline, &options(true)),
        )
        .await;

        assert!(cancelled.is_err());
        assert_eq!(live.load(Ordering::SeqCst), 0);
        assert_eq!(pool.free_slots(), 1);
    }

    #[tokio::test]
    async fn network_idle_returns_once_the_resource_count_settles() {
        let mut page = page();
        page.responses.insert(RESOURCE_COUNT_JS, Ok(json!(12)));
        let renderer = FakeRenderer::with_page(page);
        let options = RenderOptions {
            settle: SettleCondition::NetworkIdle,
            ..options(true)
        };

        let started = Instant::now();
        let (result, _) = run(renderer, Duration::from_secs(10), &options).await;

        assert!(result.is_ok());
        assert!(started.elapsed() < MAX_IDLE_WAIT);
        assert!(RESOURCE_COUNT_JS.contains("setResourceTimingBufferSize"));
    }
}
