use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};

// ── Constants ────────────────────────────────────────────────────────────────

/// Content containers in priority order: wiki-specific first, then generic
/// article/main containers, then generic page containers.
const CONTENT_SELECTORS: &[&str] = &[
    "#main-content",
    "#content",
    ".wiki-content",
    ".confluence-content",
    "#wiki-content",
    ".page-content",
    ".pageSection",
    "#page",
    "article",
    "main",
    ".article-content",
    "#main",
    ".container",
    ".content",
];

/// A candidate must carry more than this much inner HTML to be picked.
const MIN_CANDIDATE_LEN: usize = 100;
/// Below this the picked candidate is discarded in favour of `<body>`.
const MIN_CONTENT_LEN: usize = 200;

// ── Lazy static selectors ────────────────────────────────────────────────────

static TITLE_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("title").unwrap());
static H1_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("h1").unwrap());
static BODY_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("body").unwrap());

static CONTENT_SELS: Lazy<Vec<(&'static str, Selector)>> = Lazy::new(|| {
    CONTENT_SELECTORS
        .iter()
        .filter_map(|s| Selector::parse(s).ok().map(|sel| (*s, sel)))
        .collect()
});

// ── Public types ─────────────────────────────────────────────────────────────

/// The content region of a page together with the parsed document it was
/// taken from. The document is the handle the image locator walks.
pub struct ExtractedContent {
    pub title: String,
    pub content_html: String,
    pub document: Html,
}

impl std::fmt::Debug for ExtractedContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractedContent")
            .field("title", &self.title)
            .field("content_len", &self.content_html.len())
            .finish_non_exhaustive()
    }
}

// ── Public API ───────────────────────────────────────────────────────────────

/// Parse `html` and locate its main content region.
///
/// Title: `<title>` text, else the first `<h1>`, else empty. Content: the
/// outer HTML of the first selector match whose inner HTML is longer than
/// 100 characters, unless that match is still shorter than 200 characters,
/// in which case the whole `<body>` is used.
pub fn extract(html: &str) -> ExtractedContent {
    let document = Html::parse_document(html);

    let content_html = match find_container(&document) {
        Some(el) => el.html(),
        None => {
            tracing::warn!("document has no body, keeping raw html");
            return ExtractedContent {
                title: String::new(),
                content_html: html.to_string(),
                document,
            };
        }
    };

    ExtractedContent {
        title: resolve_title(&document),
        content_html,
        document,
    }
}

// ── Title resolution ─────────────────────────────────────────────────────────

fn resolve_title(document: &Html) -> String {
    document
        .select(&TITLE_SEL)
        .next()
        .map(|el| collect_text(el).trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            document
                .select(&H1_SEL)
                .next()
                .map(|el| normalize_text(collect_text(el)))
                .filter(|s| !s.is_empty())
        })
        .unwrap_or_default()
}

// ── Container selection ──────────────────────────────────────────────────────

fn find_container(document: &Html) -> Option<ElementRef<'_>> {
    let mut picked: Option<(&str, ElementRef<'_>, usize)> = None;

    for (name, sel) in CONTENT_SELS.iter() {
        if let Some(el) = document.select(sel).next() {
            let len = inner_len(el);
            if len > MIN_CANDIDATE_LEN {
                picked = Some((name, el, len));
                break;
            }
        }
    }

    match picked {
        Some((selector, el, len)) if len >= MIN_CONTENT_LEN => {
            tracing::debug!(selector, len, "content region selected");
            Some(el)
        }
        _ => {
            tracing::debug!("no content container with enough content, using body");
            document.select(&BODY_SEL).next()
        }
    }
}

fn inner_len(el: ElementRef<'_>) -> usize {
    el.inner_html().trim().chars().count()
}

// ── DOM utility helpers ──────────────────────────────────────────────────────

/// Recursively collect all text from an element and its descendants.
pub(crate) fn collect_text(el: ElementRef<'_>) -> String {
    el.text().collect()
}

/// Collapse whitespace runs into single spaces and trim.
pub(crate) fn normalize_text(text: String) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
