use serde::{Deserialize, Serialize};

use crate::wiki::WikiContent;

/// Body of `POST /wiki/content`. Fields parsed from `url` take precedence
/// over the explicit `base_url`, `space_key`, `content_id` and `title`.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct WikiContentRequest {
    pub url: Option<String>,
    pub base_url: Option<String>,
    pub space_key: Option<String>,
    pub content_id: Option<String>,
    pub title: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
    pub cookie: Option<String>,
    pub expand: Option<String>,
    /// Defaults to `true`.
    pub download_images: Option<bool>,
    /// Fetch the page HTML itself instead of going through the REST API.
    pub direct: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct WikiContentResponse {
    pub markdown: String,
    pub is_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_folder: Option<String>,
}

impl From<WikiContent> for WikiContentResponse {
    fn from(content: WikiContent) -> Self {
        Self {
            markdown: content.markdown,
            is_error: content.is_error,
            image_folder: content.staging_dir.map(|p| p.display().to_string()),
        }
    }
}
