use std::path::PathBuf;
use std::time::Duration;

use base64::Engine;
use reqwest::header::{
    HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, AUTHORIZATION, COOKIE, REFERER, USER_AGENT,
};
use reqwest::StatusCode;
use serde_json::Value;
use url::Url;

use crate::config::Config;
use crate::convert::{convert_page, ConvertOptions};
use crate::download::AssetDownloader;
use crate::markdown::render;
use crate::models::WikiContentRequest;
use crate::page_ref::resolve;

// ── Constants ────────────────────────────────────────────────────────────────

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const BROWSER_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";
const BROWSER_ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";
const DEFAULT_EXPAND: &str = "body.storage,space,version";
const DEFAULT_DOCUMENT_TITLE: &str = "Wiki Document";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_REDIRECTS: usize = 5;
const ERROR_BODY_PREVIEW: usize = 500;
const RAW_RESPONSE_PREVIEW: usize = 1000;

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum WikiError {
    #[error("{0}")]
    InvalidUrl(String),
    #[error("a wiki base url is required to use the REST API")]
    MissingBaseUrl,
    #[error("missing credentials: supply username and password, or a cookie or token for direct page fetches")]
    MissingCredentials,
    #[error("{0}")]
    InvalidHeader(String),
    #[error("{0}")]
    Request(String),
    #[error("unexpected wiki response: {0}")]
    InvalidResponse(String),
}

// ── Public result type ───────────────────────────────────────────────────────

/// Markdown handed back to the caller. Upstream failures are reported here
/// with `is_error` set rather than as a [`WikiError`].
#[derive(Debug, Clone)]
pub struct WikiContent {
    pub markdown: String,
    pub is_error: bool,
    pub staging_dir: Option<PathBuf>,
}

impl WikiContent {
    fn text(markdown: String) -> Self {
        Self {
            markdown,
            is_error: false,
            staging_dir: None,
        }
    }

    fn error(markdown: String) -> Self {
        Self {
            markdown,
            is_error: true,
            staging_dir: None,
        }
    }
}

// ── Request planning ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
enum Auth {
    Cookie(String),
    Token(String),
    Basic { username: String, password: String },
}

impl Auth {
    fn kind(&self) -> &'static str {
        match self {
            Auth::Cookie(_) => "cookie",
            Auth::Token(_) => "token",
            Auth::Basic { .. } => "basic",
        }
    }
}

/// Where and how a page is fetched, after merging the request's URL with
/// its explicit parameters.
#[derive(Debug, Clone, Default)]
struct Target {
    base_url: String,
    space_key: String,
    content_id: String,
    title: String,
    page_url: Option<Url>,
    direct: bool,
}

// ── Client ───────────────────────────────────────────────────────────────────

pub struct WikiClient {
    http: reqwest::Client,
    downloader: AssetDownloader,
    config: Config,
}

impl WikiClient {
    pub fn new(config: Config) -> Result<Self, WikiError> {
        let mut builder = reqwest::ClientBuilder::new()
            .timeout(REQUEST_TIMEOUT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS));
        if config.insecure_ssl {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let http = builder
            .build()
            .map_err(|e| WikiError::Request(e.to_string()))?;
        let downloader = AssetDownloader::new(config.image_dir.clone(), config.insecure_ssl)
            .map_err(|e| WikiError::Request(e.to_string()))?;

        Ok(Self {
            http,
            downloader,
            config,
        })
    }

    /// Fetch a wiki page (or a page listing) and return it as Markdown.
    ///
    /// Pages on direct hosts are fetched as HTML with cookie/token auth;
    /// everything else goes through `{base}/rest/api/content` with basic
    /// auth.
    pub async fn get_wiki_content(
        &self,
        req: &WikiContentRequest,
    ) -> Result<WikiContent, WikiError> {
        let target = self.plan(req)?;
        if target.direct {
            self.fetch_direct(req, &target).await
        } else {
            self.fetch_api(req, &target).await
        }
    }

    fn plan(&self, req: &WikiContentRequest) -> Result<Target, WikiError> {
        let mut target = Target {
            base_url: non_empty(&req.base_url).unwrap_or_default(),
            space_key: non_empty(&req.space_key).unwrap_or_default(),
            content_id: non_empty(&req.content_id).unwrap_or_default(),
            title: non_empty(&req.title).unwrap_or_default(),
            page_url: None,
            direct: req.direct.unwrap_or(false),
        };

        if let Some(url) = non_empty(&req.url) {
            let resolved = resolve(&url);
            override_with(&mut target.base_url, resolved.base_url);
            override_with(&mut target.space_key, resolved.space_key);
            override_with(&mut target.content_id, resolved.content_id);
            override_with(&mut target.title, resolved.title);

            match Url::parse(&url) {
                Ok(parsed) => {
                    if parsed.host_str().is_some_and(|h| self.config.is_direct_host(h)) {
                        target.direct = true;
                    }
                    target.page_url = Some(parsed);
                }
                Err(e) => tracing::debug!(url = %url, error = %e, "page url not parsable"),
            }
        }

        if target.direct && target.page_url.is_none() {
            return Err(WikiError::InvalidUrl(
                "a valid page url is required for direct fetches".to_string(),
            ));
        }

        while target.base_url.ends_with('/') {
            target.base_url.pop();
        }
        Ok(target)
    }

    async fn fetch_direct(
        &self,
        req: &WikiContentRequest,
        target: &Target,
    ) -> Result<WikiContent, WikiError> {
        let Some(page_url) = target.page_url.as_ref() else {
            return Err(WikiError::InvalidUrl("missing page url".to_string()));
        };

        let Some(auth) = direct_auth(req, &self.config) else {
            return Ok(WikiContent::text(credentials_guide(page_url.as_str())));
        };

        let origin = page_url.origin().ascii_serialization();
        let headers = build_headers(&auth, Some(&origin))?;
        tracing::info!(url = %page_url, auth = auth.kind(), "fetching wiki page");

        let (status, body) = self
            .send(self.http.get(page_url.clone()).headers(headers.clone()))
            .await?;
        if status.is_client_error() || status.is_server_error() {
            return Ok(WikiContent::error(upstream_error(status, &body)));
        }

        let base_url = if target.base_url.is_empty() {
            origin.as_str()
        } else {
            target.base_url.as_str()
        };
        let conversion = convert_page(
            &body,
            &self.downloader,
            &ConvertOptions {
                base_url,
                headers: &headers,
                page_identity: &target.content_id,
                fallback_title: &target.title,
                download_images: req.download_images.unwrap_or(true),
            },
        )
        .await;

        Ok(WikiContent {
            markdown: conversion.markdown,
            is_error: false,
            staging_dir: conversion.staging_dir,
        })
    }

    async fn fetch_api(
        &self,
        req: &WikiContentRequest,
        target: &Target,
    ) -> Result<WikiContent, WikiError> {
        if target.base_url.is_empty() {
            return Err(WikiError::MissingBaseUrl);
        }
        let auth = api_auth(req, &self.config).ok_or(WikiError::MissingCredentials)?;
        let headers = build_headers(&auth, Some(&target.base_url))?;
        let expand = non_empty(&req.expand).unwrap_or_else(|| DEFAULT_EXPAND.to_string());

        let endpoint = format!("{}/rest/api/content", target.base_url);
        let request = if target.content_id.is_empty() {
            let mut query = vec![("expand", expand.as_str())];
            if !target.space_key.is_empty() {
                query.push(("spaceKey", target.space_key.as_str()));
            }
            if !target.title.is_empty() {
                query.push(("title", target.title.as_str()));
            }
            self.http.get(&endpoint).query(&query)
        } else {
            self.http
                .get(format!("{}/{}", endpoint, target.content_id))
                .query(&[("expand", expand.as_str())])
        };

        tracing::info!(
            endpoint = %endpoint,
            content_id = %target.content_id,
            space_key = %target.space_key,
            auth = auth.kind(),
            "querying wiki rest api"
        );
        let (status, body) = self.send(request.headers(headers.clone())).await?;
        if status.is_client_error() || status.is_server_error() {
            return Ok(WikiContent::error(upstream_error(status, &body)));
        }

        let value: Value = serde_json::from_str(&body)
            .map_err(|e| WikiError::InvalidResponse(e.to_string()))?;

        if target.content_id.is_empty() {
            return Ok(WikiContent::text(listing_markdown(&value, target)));
        }

        let title = value
            .get("title")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .or(Some(target.title.as_str()).filter(|t| !t.is_empty()))
            .unwrap_or(DEFAULT_DOCUMENT_TITLE)
            .to_string();

        let Some(storage) = value.pointer("/body/storage/value").and_then(Value::as_str) else {
            tracing::warn!(content_id = %target.content_id, "response has no body.storage.value");
            let raw = serde_json::to_string_pretty(&value).unwrap_or_default();
            return Ok(WikiContent::text(format!(
                "# {}\n\n_Could not read the page body; the response format may have changed._\n\nRaw response:\n\n```json\n{}\n```",
                title,
                preview(&raw, RAW_RESPONSE_PREVIEW)
            )));
        };

        let document = format!(
            "<!DOCTYPE html><html><head><title>{}</title></head><body>{}</body></html>",
            escape_html(&title),
            storage
        );
        let conversion = convert_page(
            &document,
            &self.downloader,
            &ConvertOptions {
                base_url: &target.base_url,
                headers: &headers,
                page_identity: &target.content_id,
                fallback_title: &title,
                download_images: req.download_images.unwrap_or(true),
            },
        )
        .await;

        Ok(WikiContent {
            markdown: conversion.markdown,
            is_error: false,
            staging_dir: conversion.staging_dir,
        })
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<(StatusCode, String), WikiError> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                WikiError::Request(format!("TimeoutError: {}", e))
            } else if e.is_connect() {
                WikiError::Request(format!("ConnectError: {}", e))
            } else {
                WikiError::Request(format!("RequestError: {}", e))
            }
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| WikiError::Request(e.to_string()))?;
        tracing::info!(status = status.as_u16(), bytes = body.len(), "wiki responded");
        Ok((status, body))
    }
}

// ── Authentication ───────────────────────────────────────────────────────────

/// Cookie, then token (request before configuration), then request basic
/// credentials.
fn direct_auth(req: &WikiContentRequest, config: &Config) -> Option<Auth> {
    non_empty(&req.cookie)
        .map(Auth::Cookie)
        .or_else(|| non_empty(&req.token).map(Auth::Token))
        .or_else(|| config.cookie.clone().map(Auth::Cookie))
        .or_else(|| config.token.clone().map(Auth::Token))
        .or_else(|| {
            Some(Auth::Basic {
                username: non_empty(&req.username)?,
                password: non_empty(&req.password)?,
            })
        })
}

/// Basic credentials, each half falling back to configuration separately.
fn api_auth(req: &WikiContentRequest, config: &Config) -> Option<Auth> {
    let username = non_empty(&req.username).or_else(|| config.username.clone())?;
    let password = non_empty(&req.password).or_else(|| config.password.clone())?;
    Some(Auth::Basic { username, password })
}

fn build_headers(auth: &Auth, referer: Option<&str>) -> Result<HeaderMap, WikiError> {
    let mut headers = HeaderMap::new();
    match auth {
        Auth::Basic { username, password } => {
            let encoded = base64::engine::general_purpose::STANDARD
                .encode(format!("{}:{}", username, password));
            headers.insert(AUTHORIZATION, header_value(&format!("Basic {}", encoded), "credentials")?);
        }
        Auth::Token(token) => {
            headers.insert(AUTHORIZATION, header_value(&format!("Bearer {}", token), "token")?);
            insert_browser_headers(&mut headers);
        }
        Auth::Cookie(cookie) => {
            headers.insert(COOKIE, header_value(cookie, "cookie")?);
            insert_browser_headers(&mut headers);
            if let Some(referer) = referer {
                headers.insert(REFERER, header_value(referer, "referer")?);
            }
        }
    }
    Ok(headers)
}

fn insert_browser_headers(headers: &mut HeaderMap) {
    headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
    headers.insert(ACCEPT, HeaderValue::from_static(BROWSER_ACCEPT));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static(BROWSER_ACCEPT_LANGUAGE));
}

fn header_value(value: &str, what: &str) -> Result<HeaderValue, WikiError> {
    HeaderValue::from_str(value)
        .map_err(|_| WikiError::InvalidHeader(format!("{} contains characters not allowed in a header", what)))
}

// ── Markdown messages ────────────────────────────────────────────────────────

fn upstream_error(status: StatusCode, body: &str) -> String {
    let detail = if body.trim().is_empty() {
        "no details provided".to_string()
    } else {
        preview(body, ERROR_BODY_PREVIEW)
    };

    if status == StatusCode::NOT_FOUND {
        return format!(
            "# Could not fetch wiki content (HTTP 404)\n\n\
             The server answered 404: the page does not exist or you are not allowed to see it. Possible causes:\n\n\
             1. The page id is wrong or the page was deleted\n\
             2. The cookie or token has expired\n\
             3. Your account has no access to the page\n\
             4. The wiki's URL layout has changed\n\n\
             ## Things to try\n\n\
             1. Check the page id\n\
             2. Copy a fresh cookie from a logged-in browser session\n\
             3. Confirm you can open the page in the wiki itself\n\
             4. If the browser works but this does not, send the complete cookie string\n\n\
             Details: {}",
            detail
        );
    }

    format!(
        "# Failed to fetch wiki content: HTTP {}\n\nThe server returned an error status. Details:\n\n{}",
        status.as_u16(),
        detail
    )
}

fn credentials_guide(url: &str) -> String {
    format!(
        "# Credentials are needed to read this wiki page\n\n\
         Call again with one of the following:\n\n\
         ## 1. Username and password\n\n\
         ```json\n{{\n  \"url\": \"{url}\",\n  \"username\": \"your wiki username\",\n  \"password\": \"your wiki password\"\n}}\n```\n\n\
         ## 2. Access token\n\n\
         ```json\n{{\n  \"url\": \"{url}\",\n  \"token\": \"your wiki access token\"\n}}\n```\n\n\
         ## 3. Cookie\n\n\
         Reuses your browser's logged-in session:\n\n\
         1. Log in to the wiki in your browser\n\
         2. Open the developer tools and switch to the Network tab\n\
         3. Reload the page and select any request\n\
         4. Copy the full value of the Cookie request header\n\n\
         ```json\n{{\n  \"url\": \"{url}\",\n  \"cookie\": \"the copied cookie string\"\n}}\n```",
        url = url
    )
}

fn listing_markdown(value: &Value, target: &Target) -> String {
    let results = value
        .get("results")
        .and_then(Value::as_array)
        .filter(|r| !r.is_empty());
    let Some(items) = results else {
        return "No matching pages found.".to_string();
    };

    let mut markdown = format!("# Found {} pages\n\n", items.len());
    for item in items {
        let id = json_text(item.get("id"));
        let space = item
            .pointer("/space/name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| Some(target.space_key.clone()).filter(|s| !s.is_empty()))
            .unwrap_or_else(|| "unknown space".to_string());

        markdown.push_str(&format!("## {}\n", json_text(item.get("title"))));
        markdown.push_str(&format!("- ID: {}\n", id));
        markdown.push_str(&format!("- Space: {}\n", space));
        markdown.push_str(&format!(
            "- Link: {}/pages/viewpage.action?pageId={}\n\n",
            target.base_url, id
        ));

        if let Some(html) = item.pointer("/body/storage/value").and_then(Value::as_str) {
            markdown.push_str(&render(html));
            markdown.push_str("\n\n");
        }
    }
    markdown.trim_end().to_string()
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn override_with(field: &mut String, resolved: String) {
    if !resolved.is_empty() {
        *field = resolved;
    }
}

fn json_text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(config: Config) -> WikiClient {
        WikiClient::new(config).unwrap()
    }

    fn request(url: &str) -> WikiContentRequest {
        WikiContentRequest {
            url: Some(url.to_string()),
            ..WikiContentRequest::default()
        }
    }

    #[test]
    fn url_fields_override_explicit_parameters() {
        let c = client(Config::default());
        let mut req = request("https://wiki.example.com/confluence/spaces/DEV/pages/42/Intro");
        req.base_url = Some("https://other.example.com/".to_string());
        req.space_key = Some("OPS".to_string());
        let target = c.plan(&req).unwrap();
        assert_eq!(target.base_url, "https://wiki.example.com/confluence");
        assert_eq!(target.space_key, "DEV");
        assert_eq!(target.content_id, "42");
        assert_eq!(target.title, "Intro");
        assert!(!target.direct);
    }

    #[test]
    fn explicit_parameters_fill_gaps() {
        let c = client(Config::default());
        let mut req = request("https://wiki.example.com/pages/viewpage.action?pageId=7");
        req.space_key = Some("HR".to_string());
        let target = c.plan(&req).unwrap();
        assert_eq!(target.space_key, "HR");
        assert_eq!(target.content_id, "7");
    }

    #[test]
    fn configured_host_switches_to_direct() {
        let config = Config {
            direct_hosts: vec!["example.com".to_string()],
            ..Config::default()
        };
        let target = client(config)
            .plan(&request("https://wiki.example.com/pages/viewpage.action?pageId=7"))
            .unwrap();
        assert!(target.direct);
    }

    #[test]
    fn direct_without_url_is_rejected() {
        let req = WikiContentRequest {
            direct: Some(true),
            ..WikiContentRequest::default()
        };
        assert!(matches!(
            client(Config::default()).plan(&req),
            Err(WikiError::InvalidUrl(_))
        ));
    }

    #[test]
    fn direct_auth_priority() {
        let config = Config {
            cookie: Some("cfg-cookie".to_string()),
            token: Some("cfg-token".to_string()),
            ..Config::default()
        };
        let mut req = WikiContentRequest::default();
        assert_eq!(direct_auth(&req, &config), Some(Auth::Cookie("cfg-cookie".into())));

        req.token = Some("req-token".to_string());
        assert_eq!(direct_auth(&req, &config), Some(Auth::Token("req-token".into())));

        req.cookie = Some("req-cookie".to_string());
        assert_eq!(direct_auth(&req, &config), Some(Auth::Cookie("req-cookie".into())));

        let bare = WikiContentRequest {
            username: Some("u".to_string()),
            ..WikiContentRequest::default()
        };
        assert_eq!(direct_auth(&bare, &Config::default()), None);
    }

    #[test]
    fn api_auth_mixes_request_and_config() {
        let config = Config {
            username: Some("svc".to_string()),
            password: Some("secret".to_string()),
            ..Config::default()
        };
        let req = WikiContentRequest {
            password: Some("override".to_string()),
            ..WikiContentRequest::default()
        };
        assert_eq!(
            api_auth(&req, &config),
            Some(Auth::Basic {
                username: "svc".into(),
                password: "override".into()
            })
        );
        assert_eq!(api_auth(&req, &Config::default()), None);
    }

    #[test]
    fn basic_header_is_base64() {
        let headers = build_headers(
            &Auth::Basic {
                username: "alice".into(),
                password: "pw".into(),
            },
            None,
        )
        .unwrap();
        assert_eq!(headers[AUTHORIZATION], "Basic YWxpY2U6cHc=");
        assert!(headers.get(COOKIE).is_none());
    }

    #[test]
    fn cookie_headers_carry_referer() {
        let headers = build_headers(&Auth::Cookie("a=b".into()), Some("https://wiki.example.com")).unwrap();
        assert_eq!(headers[COOKIE], "a=b");
        assert_eq!(headers[REFERER], "https://wiki.example.com");
        assert!(headers.contains_key(USER_AGENT));
    }

    #[test]
    fn invalid_cookie_is_an_error() {
        assert!(matches!(
            build_headers(&Auth::Cookie("bad\nvalue".into()), None),
            Err(WikiError::InvalidHeader(_))
        ));
    }

    #[test]
    fn not_found_has_guidance() {
        let text = upstream_error(StatusCode::NOT_FOUND, "gone");
        assert!(text.starts_with("# Could not fetch wiki content (HTTP 404)"));
        assert!(text.ends_with("Details: gone"));

        let text = upstream_error(StatusCode::INTERNAL_SERVER_ERROR, &"x".repeat(2000));
        assert!(text.contains("HTTP 500"));
        assert!(text.ends_with(&"x".repeat(500)));
        assert!(!text.contains(&"x".repeat(501)));
    }

    #[test]
    fn listing_renders_each_result() {
        let value: Value = serde_json::json!({
            "results": [
                {"id": "1", "title": "Alpha", "space": {"name": "Dev"},
                 "body": {"storage": {"value": "<p><strong>hi</strong></p>"}}},
                {"id": 2, "title": "Beta"}
            ]
        });
        let target = Target {
            base_url: "https://wiki.example.com".to_string(),
            space_key: "DEV".to_string(),
            ..Target::default()
        };
        let md = listing_markdown(&value, &target);
        assert!(md.starts_with("# Found 2 pages\n\n## Alpha\n- ID: 1\n- Space: Dev\n"));
        assert!(md.contains("- Link: https://wiki.example.com/pages/viewpage.action?pageId=1\n\n**hi**"));
        assert!(md.contains("## Beta\n- ID: 2\n- Space: DEV\n"));

        let empty = listing_markdown(&serde_json::json!({"results": []}), &target);
        assert_eq!(empty, "No matching pages found.");
    }
}
