use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};

use crate::error::ExtractionError;
use crate::extract::AssetExtractor;
use crate::models::{ErrorBody, ExtractRequest};

pub type SharedState = Arc<AssetExtractor>;

pub fn router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/scrape", get(scrape_query).post(scrape_json))
        .layer(cors)
        .with_state(state)
}

async fn health(State(state): State<SharedState>) -> impl IntoResponse {
    let pool = state.pool();
    Json(json!({
        "status": "ok",
        "renderer": pool.is_available(),
        "browser_slots": pool.free_slots(),
    }))
}

async fn scrape_query(
    State(state): State<SharedState>,
    query: Result<Query<ExtractRequest>, QueryRejection>,
) -> Response {
    match query {
        Ok(Query(req)) => scrape(&state, req).await,
        Err(rejection) => error_response(&ExtractionError::Validation(rejection.body_text())),
    }
}

async fn scrape_json(
    State(state): State<SharedState>,
    body: Result<Json<ExtractRequest>, JsonRejection>,
) -> Response {
    match body {
        Ok(Json(req)) => scrape(&state, req).await,
        Err(rejection) => error_response(&ExtractionError::Validation(rejection.body_text())),
    }
}

async fn scrape(extractor: &AssetExtractor, req: ExtractRequest) -> Response {
    let request = match req.validate(extractor.config()) {
        Ok(request) => request,
        Err(e) => {
            tracing::debug!(error = %e, "rejected request");
            return error_response(&e);
        }
    };

    match extractor.extract(request).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(e) => error_response(&e),
    }
}

fn error_response(err: &ExtractionError) -> Response {
    (err.status(), Json(ErrorBody::from(err))).into_response()
}
