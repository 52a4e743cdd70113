use axum::http::StatusCode;

// ── Error type ───────────────────────────────────────────────────────────────

/// Every failure a caller can observe. Partial evaluation failures and
/// teardown failures never reach this type; they are logged where they occur.
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NoStrategyAvailable(String),
    #[error("{0}")]
    PageLoadTimeout(String),
    #[error("{0}")]
    FetchFailed(String),
    #[error("{0}")]
    Internal(String),
}

impl ExtractionError {
    /// Stable machine-readable kind, sent as the `error` field.
    pub fn kind(&self) -> &'static str {
        match self {
            ExtractionError::Validation(_) => "ValidationError",
            ExtractionError::NoStrategyAvailable(_) => "NoStrategyAvailable",
            ExtractionError::PageLoadTimeout(_) => "PageLoadTimeout",
            ExtractionError::FetchFailed(_) => "FetchFailed",
            ExtractionError::Internal(_) => "InternalError",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ExtractionError::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn is_strategy_unavailable(&self) -> bool {
        matches!(self, ExtractionError::NoStrategyAvailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_maps_to_bad_request() {
        let err = ExtractionError::Validation("No URL provided".into());
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.kind(), "ValidationError");
    }

    #[test]
    fn extraction_failures_map_to_server_error() {
        for err in [
            ExtractionError::NoStrategyAvailable("no engine".into()),
            ExtractionError::PageLoadTimeout("slow".into()),
            ExtractionError::FetchFailed("404".into()),
        ] {
            assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        }
    }
}
