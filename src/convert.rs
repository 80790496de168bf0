use std::path::PathBuf;

use reqwest::header::HeaderMap;

use crate::download::AssetDownloader;
use crate::extract::{extract, ExtractedContent};
use crate::images::locate_images;
use crate::markdown::render;
use crate::rewrite::rewrite;

const DEFAULT_TITLE: &str = "Page content";

/// Per-page inputs of [`convert_page`].
#[derive(Debug, Clone, Copy)]
pub struct ConvertOptions<'a> {
    /// Base against which relative image sources are resolved.
    pub base_url: &'a str,
    /// Sent with every image request.
    pub headers: &'a HeaderMap,
    /// Keys the staging directory; usually the page id.
    pub page_identity: &'a str,
    /// Used when the document has no title of its own.
    pub fallback_title: &'a str,
    pub download_images: bool,
}

#[derive(Debug, Clone)]
pub struct Conversion {
    pub title: String,
    pub markdown: String,
    pub staging_dir: Option<PathBuf>,
    pub images_found: usize,
    pub images_in_tables: usize,
    pub images_downloaded: usize,
}

/// Turn a wiki page's HTML into Markdown with its images stored locally.
///
/// Runs extract → locate → render synchronously, then awaits the whole
/// download batch, then rewrites image references to the local copies.
/// Never fails: missing images keep their remote URLs.
pub async fn convert_page(
    html: &str,
    downloader: &AssetDownloader,
    options: &ConvertOptions<'_>,
) -> Conversion {
    // The parsed document is dropped here, before the first await.
    let (doc_title, images, rendered) = {
        let ExtractedContent {
            title,
            content_html,
            document,
        } = extract(html);
        let images = locate_images(&document);
        let rendered = render(&content_html);
        (title, images, rendered)
    };

    let title = [doc_title.as_str(), options.fallback_title]
        .into_iter()
        .map(str::trim)
        .find(|t| !t.is_empty())
        .unwrap_or(DEFAULT_TITLE)
        .to_string();

    let images_in_tables = images.iter().filter(|i| i.in_table).count();
    tracing::info!(
        title = %title,
        images = images.len(),
        in_tables = images_in_tables,
        markdown_len = rendered.len(),
        "page rendered"
    );

    let mut markdown = format!("# {}\n\n{}", title, rendered);
    let mut staging_dir = None;
    let mut images_downloaded = 0;

    if options.download_images && !images.is_empty() {
        let batch = downloader
            .download_all(
                &images,
                options.base_url,
                options.headers,
                options.page_identity,
                &title,
            )
            .await;

        images_downloaded = batch.assets.len();
        if images_downloaded > 0 {
            markdown = rewrite(&markdown, &batch.assets);
            if let Some(dir) = &batch.staging_dir {
                markdown.push_str(&format!(
                    "\n\n---\n\n> Note: {} image(s) from this page ({} inside tables) were saved to {} and are referenced by relative path.",
                    images_downloaded,
                    images_in_tables,
                    dir.display()
                ));
            }
        }
        staging_dir = batch.staging_dir;
    }

    Conversion {
        title,
        markdown,
        staging_dir,
        images_found: images.len(),
        images_in_tables,
        images_downloaded,
    }
}
