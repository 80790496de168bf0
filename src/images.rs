use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};

static IMG_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("img").unwrap());

/// An image element found in a page, with its `src` exactly as written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub source_url: String,
    pub in_table: bool,
}

/// Every downloadable image of `document`, in document order.
///
/// Images with an empty `src` or a `data:` URI are skipped.
pub fn locate_images(document: &Html) -> Vec<ImageReference> {
    let images: Vec<ImageReference> = document
        .select(&IMG_SEL)
        .filter_map(|img| {
            let src = img.value().attr("src")?;
            if src.trim().is_empty() || src.starts_with("data:") {
                return None;
            }
            Some(ImageReference {
                source_url: src.to_string(),
                in_table: inside_table_cell(img),
            })
        })
        .collect();

    tracing::debug!(
        total = images.len(),
        in_tables = images.iter().filter(|i| i.in_table).count(),
        "located images"
    );
    images
}

fn inside_table_cell(el: ElementRef<'_>) -> bool {
    el.ancestors().any(|node| {
        node.value()
            .as_element()
            .is_some_and(|e| matches!(e.name(), "td" | "th"))
    })
}
