//! Asset extraction: strategy selection and the two strategies.

pub mod chromium;
pub mod pool;
pub mod rendered;
pub mod renderer;
pub mod static_html;

use std::sync::Arc;

use tokio::time::Instant;

use crate::assemble::assemble;
use crate::config::Config;
use crate::error::ExtractionError;
use crate::models::{EngineHint, ExtractionRequest, ExtractionResult};

use self::pool::{BrowserPool, PooledSession};
use self::rendered::RenderOptions;
use self::renderer::Renderer;

/// What one strategy found, already absolutized and canonicalized but not
/// yet deduplicated. `None` means the strategy did not look for that field.
#[derive(Debug, Default)]
pub struct Findings {
    pub images: Vec<String>,
    pub videos: Vec<String>,
    pub fonts: Vec<String>,
    pub colors: Vec<String>,
    pub links: Option<Vec<String>>,
    pub scripts: Option<Vec<String>>,
    pub title: Option<String>,
    pub description: Option<String>,
}

/// The strategy chosen for one request. A rendered strategy already owns
/// its launched browser session.
pub enum Strategy {
    Rendered(PooledSession),
    Static,
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Rendered(_) => "rendered",
            Strategy::Static => "static",
        }
    }
}

/// Decide once, before any navigation or fetch, which strategy runs.
///
/// `auto` prefers rendering and falls back to static when no browser can be
/// obtained; an explicit `rendered` hint surfaces the failure instead.
pub async fn select_strategy(
    hint: EngineHint,
    pool: &BrowserPool,
    deadline: Instant,
) -> Result<Strategy, ExtractionError> {
    match hint {
        EngineHint::Static => Ok(Strategy::Static),
        EngineHint::Rendered => pool.checkout(deadline).await.map(Strategy::Rendered),
        EngineHint::Auto => match pool.checkout(deadline).await {
            Ok(session) => Ok(Strategy::Rendered(session)),
            Err(e) if e.is_strategy_unavailable() => {
                tracing::info!(reason = %e, "falling back to static extraction");
                Ok(Strategy::Static)
            }
            Err(e) => Err(e),
        },
    }
}

/// Entry point shared by every route: select, extract, assemble.
pub struct AssetExtractor {
    config: Arc<Config>,
    pool: BrowserPool,
}

impl AssetExtractor {
    pub fn new(config: Arc<Config>, renderer: Arc<dyn Renderer>) -> Self {
        let pool = BrowserPool::new(renderer, config.max_browsers, config.queue_timeout)
            .with_teardown_timeout(config.teardown_timeout);
        Self { config, pool }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pool(&self) -> &BrowserPool {
        &self.pool
    }

    pub async fn extract(
        &self,
        request: ExtractionRequest,
    ) -> Result<ExtractionResult, ExtractionError> {
        let started = Instant::now();
        let deadline = started + request.timeout;
        let target = &request.target_url;

        let strategy = select_strategy(request.engine, &self.pool, deadline).await?;
        let strategy_name = strategy.name();
        tracing::info!(url = %target, hint = %request.engine, strategy = strategy_name, "extracting");

        let findings = match strategy {
            Strategy::Rendered(session) => {
                let options = RenderOptions {
                    settle: self.config.settle,
                    query_timeout: self.config.query_timeout,
                    collect_metadata: self.config.collect_metadata,
                };
                rendered::extract(session, target, deadline, &options).await
            }
            Strategy::Static => static_html::extract(target, deadline, &self.config).await,
        };

        let findings = match findings {
            Ok(findings) => findings,
            Err(e) => {
                tracing::warn!(
                    url = %target,
                    strategy = strategy_name,
                    kind = e.kind(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "extraction failed"
                );
                return Err(e);
            }
        };

        let result = assemble(findings);
        tracing::info!(
            url = %target,
            strategy = strategy_name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            images = result.images.len(),
            videos = result.videos.len(),
            fonts = result.fonts.len(),
            colors = result.colors.len(),
            "extraction complete"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::pool::testing::FakeRenderer;
    use super::renderer::NoopRenderer;
    use super::*;

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    fn pool_with(renderer: Arc<dyn Renderer>) -> BrowserPool {
        BrowserPool::new(renderer, 1, Duration::from_millis(50))
    }

    #[tokio::test]
    async fn auto_prefers_rendering() {
        let pool = pool_with(Arc::new(FakeRenderer::default()));
        let strategy = select_strategy(EngineHint::Auto, &pool, deadline()).await.unwrap();
        assert_eq!(strategy.name(), "rendered");
    }

    #[tokio::test]
    async fn auto_falls_back_without_engine() {
        let pool = pool_with(Arc::new(NoopRenderer));
        let strategy = select_strategy(EngineHint::Auto, &pool, deadline()).await.unwrap();
        assert_eq!(strategy.name(), "static");
    }

    #[tokio::test]
    async fn auto_falls_back_when_launch_fails() {
        let renderer = FakeRenderer {
            fail_launch: true,
            ..Default::default()
        };
        let pool = pool_with(Arc::new(renderer));
        let strategy = select_strategy(EngineHint::Auto, &pool, deadline()).await.unwrap();
        assert_eq!(strategy.name(), "static");
    }

    #[tokio::test]
    async fn rendered_hint_without_engine_fails() {
        let pool = pool_with(Arc::new(NoopRenderer));
        let err = select_strategy(EngineHint::Rendered, &pool, deadline())
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), "NoStrategyAvailable");
    }

    #[tokio::test]
    async fn static_hint_never_launches() {
        let renderer = Arc::new(FakeRenderer::default());
        let launched = Arc::clone(&renderer.launched);
        let pool = pool_with(renderer);
        let strategy = select_strategy(EngineHint::Static, &pool, deadline()).await.unwrap();
        assert_eq!(strategy.name(), "static");
        assert_eq!(launched.load(std::sync::atomic::Ordering::SeqCst), 0);
    }
}
