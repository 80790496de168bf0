use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

use crate::models::{WikiContentRequest, WikiContentResponse};
use crate::wiki::{WikiClient, WikiError};

pub fn router(client: Arc<WikiClient>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/wiki/content", post(wiki_content))
        .with_state(client)
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn wiki_content(
    State(client): State<Arc<WikiClient>>,
    Json(req): Json<WikiContentRequest>,
) -> Response {
    match client.get_wiki_content(&req).await {
        Ok(content) => (StatusCode::OK, Json(WikiContentResponse::from(content))).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "wiki content request failed");
            let status = match &e {
                WikiError::InvalidUrl(_)
                | WikiError::MissingBaseUrl
                | WikiError::MissingCredentials
                | WikiError::InvalidHeader(_) => StatusCode::BAD_REQUEST,
                WikiError::Request(_) | WikiError::InvalidResponse(_) => StatusCode::BAD_GATEWAY,
            };
            (status, Json(json!({"detail": e.to_string()}))).into_response()
        }
    }
}
