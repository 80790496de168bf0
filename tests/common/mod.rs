#![allow(dead_code)]

use axum::{
    extract::Query,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use std::collections::HashMap;

pub const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\nnot-really-a-png";
pub const JPEG_BYTES: &[u8] = b"\xff\xd8\xff\xe0fake-jpeg";
pub const GIF_BYTES: &[u8] = b"GIF89a-fake";

/// Bind `app` on an ephemeral local port and return its base URL.
pub async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Image routes shared by the tests.
pub fn image_routes() -> Router {
    Router::new()
        .route(
            "/images/a.png",
            get(|| async { ([(header::CONTENT_TYPE, "image/png")], PNG_BYTES) }),
        )
        .route(
            "/images/photo",
            get(|| async { ([(header::CONTENT_TYPE, "image/jpeg")], JPEG_BYTES) }),
        )
        .route(
            "/images/raw.gif",
            get(|| async { ([(header::CONTENT_TYPE, "application/octet-stream")], GIF_BYTES) }),
        )
        .route(
            "/images/missing.png",
            get(|| async { StatusCode::NOT_FOUND }),
        )
        .route("/secure/x.png", get(secure_image))
}

async fn secure_image(headers: HeaderMap) -> impl IntoResponse {
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        == Some("Bearer sesame");
    if authorized {
        ([(header::CONTENT_TYPE, "image/png")], PNG_BYTES).into_response()
    } else {
        StatusCode::UNAUTHORIZED.into_response()
    }
}

/// Query helper used by page routes.
pub fn page_id(query: &Query<HashMap<String, String>>) -> Option<&str> {
    query.get("pageId").map(String::as_str)
}
