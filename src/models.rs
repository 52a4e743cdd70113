use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::Config;
use crate::error::ExtractionError;
use crate::normalize::is_web_url;

/// Raw request as it arrives, either as query parameters or a JSON body.
#[derive(Debug, Default, Deserialize)]
pub struct ExtractRequest {
    pub url: Option<String>,
    pub engine: Option<String>,
    #[serde(rename = "timeoutMs", alias = "timeout_ms")]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineHint {
    Rendered,
    Static,
    #[default]
    Auto,
}

impl FromStr for EngineHint {
    type Err = ExtractionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rendered" => Ok(EngineHint::Rendered),
            "static" => Ok(EngineHint::Static),
            "auto" | "" => Ok(EngineHint::Auto),
            other => Err(ExtractionError::Validation(format!(
                "Unknown engine '{}', expected rendered, static or auto",
                other
            ))),
        }
    }
}

impl fmt::Display for EngineHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EngineHint::Rendered => "rendered",
            EngineHint::Static => "static",
            EngineHint::Auto => "auto",
        })
    }
}

/// A request that passed validation; nothing downstream re-checks it.
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub target_url: Url,
    pub engine: EngineHint,
    pub timeout: Duration,
}

impl ExtractRequest {
    pub fn validate(self, config: &Config) -> Result<ExtractionRequest, ExtractionError> {
        let raw = self.url.as_deref().map(str::trim).unwrap_or("");
        if raw.is_empty() {
            return Err(ExtractionError::Validation("No URL provided".to_string()));
        }

        let target_url = Url::parse(raw)
            .map_err(|e| ExtractionError::Validation(format!("Invalid URL: {}", e)))?;
        if !is_web_url(&target_url) || target_url.host_str().is_none() {
            return Err(ExtractionError::Validation(
                "Only absolute http(s) URLs are allowed".to_string(),
            ));
        }

        let engine = match self.engine.as_deref() {
            Some(token) => token.parse()?,
            None => EngineHint::Auto,
        };

        let timeout = match self.timeout_ms {
            None => config.default_timeout,
            Some(ms) => {
                let requested = Duration::from_millis(ms);
                if requested < config.min_timeout || requested > config.max_timeout {
                    return Err(ExtractionError::Validation(format!(
                        "timeoutMs must be between {} and {}",
                        config.min_timeout.as_millis(),
                        config.max_timeout.as_millis()
                    )));
                }
                requested
            }
        };

        Ok(ExtractionRequest {
            target_url,
            engine,
            timeout,
        })
    }
}

/// The asset inventory returned to callers. Every field is always present.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub images: Vec<String>,
    pub videos: Vec<String>,
    pub fonts: Vec<String>,
    pub colors: Vec<String>,
    pub links: Vec<String>,
    pub scripts: Vec<String>,
    pub title: String,
    pub description: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl From<&ExtractionError> for ErrorBody {
    fn from(err: &ExtractionError) -> Self {
        let details = err.to_string();
        ErrorBody {
            error: err.kind().to_string(),
            details: (!details.is_empty()).then_some(details),
        }
    }
}
