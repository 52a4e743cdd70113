use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// When the rendered page counts as settled enough to query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleCondition {
    /// The navigation's load event.
    Load,
    /// Load, then no new resource fetches for a short quiet window.
    NetworkIdle,
}

impl FromStr for SettleCondition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "load" => Ok(SettleCondition::Load),
            "network-idle" | "networkidle" => Ok(SettleCondition::NetworkIdle),
            other => Err(format!("unknown settle condition '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: SocketAddr,
    pub default_timeout: Duration,
    pub min_timeout: Duration,
    pub max_timeout: Duration,
    pub query_timeout: Duration,
    pub max_browsers: usize,
    pub queue_timeout: Duration,
    pub teardown_timeout: Duration,
    pub max_body_bytes: usize,
    pub settle: SettleCondition,
    pub chrome_path: Option<PathBuf>,
    pub chrome_no_sandbox: bool,
    pub collect_metadata: bool,
    pub insecure_ssl: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind: SocketAddr::from(([0, 0, 0, 0], 8000)),
            default_timeout: Duration::from_millis(60_000),
            min_timeout: Duration::from_millis(1_000),
            max_timeout: Duration::from_millis(120_000),
            query_timeout: Duration::from_millis(10_000),
            max_browsers: 4,
            queue_timeout: Duration::from_millis(15_000),
            teardown_timeout: Duration::from_millis(10_000),
            max_body_bytes: 10 * 1024 * 1024,
            settle: SettleCondition::NetworkIdle,
            chrome_path: None,
            chrome_no_sandbox: false,
            collect_metadata: true,
            insecure_ssl: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unparsable values fall back to the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Config::default();
        let ms = |key: &str, default: Duration| {
            parsed::<u64>(&lookup, key)
                .map(Duration::from_millis)
                .unwrap_or(default)
        };

        let mut config = Config {
            bind: parsed(&lookup, "ASSET_EXTRACTOR_BIND").unwrap_or(defaults.bind),
            default_timeout: ms("ASSET_EXTRACTOR_DEFAULT_TIMEOUT_MS", defaults.default_timeout),
            min_timeout: ms("ASSET_EXTRACTOR_MIN_TIMEOUT_MS", defaults.min_timeout),
            max_timeout: ms("ASSET_EXTRACTOR_MAX_TIMEOUT_MS", defaults.max_timeout),
            query_timeout: ms("ASSET_EXTRACTOR_QUERY_TIMEOUT_MS", defaults.query_timeout),
            max_browsers: parsed(&lookup, "ASSET_EXTRACTOR_MAX_BROWSERS")
                .unwrap_or(defaults.max_browsers),
            queue_timeout: ms("ASSET_EXTRACTOR_QUEUE_TIMEOUT_MS", defaults.queue_timeout),
            teardown_timeout: ms(
                "ASSET_EXTRACTOR_TEARDOWN_TIMEOUT_MS",
                defaults.teardown_timeout,
            ),
            max_body_bytes: parsed(&lookup, "ASSET_EXTRACTOR_MAX_BODY_BYTES")
                .unwrap_or(defaults.max_body_bytes),
            settle: parsed(&lookup, "ASSET_EXTRACTOR_SETTLE").unwrap_or(defaults.settle),
            chrome_path: lookup("ASSET_EXTRACTOR_CHROME_PATH")
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
            chrome_no_sandbox: flag(&lookup, "ASSET_EXTRACTOR_CHROME_NO_SANDBOX")
                .unwrap_or(defaults.chrome_no_sandbox),
            collect_metadata: flag(&lookup, "ASSET_EXTRACTOR_COLLECT_METADATA")
                .unwrap_or(defaults.collect_metadata),
            insecure_ssl: flag(&lookup, "ASSET_EXTRACTOR_INSECURE_SSL")
                .unwrap_or(defaults.insecure_ssl),
        };

        if config.max_browsers == 0 {
            tracing::warn!("ASSET_EXTRACTOR_MAX_BROWSERS=0 is not usable, using 1");
            config.max_browsers = 1;
        }
        if config.min_timeout > config.max_timeout {
            tracing::warn!("timeout bounds are inverted, using defaults");
            config.min_timeout = defaults.min_timeout;
            config.max_timeout = defaults.max_timeout;
        }
        config.default_timeout = config
            .default_timeout
            .clamp(config.min_timeout, config.max_timeout);
        config
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable setting");
            None
        }
    }
}

fn flag(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<bool> {
    let raw = lookup(key)?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => {
            tracing::warn!(key, value = %raw, "ignoring unparsable flag");
            None
        }
    }
}
