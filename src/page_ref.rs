use percent_encoding::percent_decode_str;
use url::{Position, Url};

/// Path segments that mark the end of a wiki installation's context path.
const PATH_MARKERS: &[&str] = &["display", "spaces", "pages", "browse"];

/// Addressable pieces of a wiki page URL. Any field may be empty when the
/// URL shape does not carry it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageReference {
    pub base_url: String,
    pub space_key: String,
    pub content_id: String,
    pub title: String,
}

/// Split a wiki page URL into base URL, space key, content id and title.
///
/// Recognised shapes:
/// - `/display/{space}/{title}`
/// - `/spaces/{space}/pages/{id}/{title}`
/// - `/pages/viewpage.action?pageId={id}` (and `view.action`)
///
/// Anything else only yields `base_url`. Unparsable input yields an empty
/// reference instead of an error so callers can fall back to explicit
/// parameters.
pub fn resolve(url: &str) -> PageReference {
    let parsed = match Url::parse(url) {
        Ok(u) if u.host_str().is_some() => u,
        _ => {
            tracing::debug!(url, "could not parse wiki url");
            return PageReference::default();
        }
    };

    let path = parsed.path();
    let mut result = PageReference {
        base_url: format!("{}{}", &parsed[..Position::BeforePath], context_path(path)),
        ..PageReference::default()
    };

    if let Some(idx) = path.find("/display/") {
        let parts: Vec<&str> = path[idx + "/display/".len()..].split('/').collect();
        result.space_key = parts[0].to_string();
        if parts.len() >= 2 {
            result.title = decode_title(&parts[1..].join("/"));
        }
    } else if let Some(idx) = path.find("/spaces/") {
        let parts: Vec<&str> = path[idx + "/spaces/".len()..].split('/').collect();
        result.space_key = parts[0].to_string();
        if parts.len() >= 3 && parts[1] == "pages" {
            result.content_id = parts[2].to_string();
        }
        if parts.len() >= 4 {
            result.title = decode_title(&parts[3..].join("/"));
        }
    } else if path.contains("/pages/viewpage.action") || path.contains("/pages/view.action") {
        result.content_id = parsed
            .query_pairs()
            .find(|(k, _)| k == "pageId")
            .map(|(_, v)| v.into_owned())
            .unwrap_or_default();
    }

    result
}

/// Path prefix in front of the first wiki marker segment, without a
/// trailing slash. Empty when the wiki lives at the host root.
fn context_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').collect();
    for (i, segment) in segments.iter().enumerate().skip(1) {
        if PATH_MARKERS.contains(segment) {
            let prefix = segments[1..i].join("/");
            if prefix.is_empty() {
                return String::new();
            }
            return format!("/{}", prefix);
        }
    }
    String::new()
}

fn decode_title(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}
