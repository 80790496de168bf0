use std::net::SocketAddr;
use std::path::PathBuf;

const DEFAULT_BIND: &str = "0.0.0.0:3331";
const DEFAULT_IMAGE_DIR: &str = "WikiImages";

/// Service settings, read from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// `WIKI_MD_BIND`
    pub bind_addr: SocketAddr,
    /// `WIKI_MD_IMAGE_DIR`: root under which per-page image folders are created.
    pub image_dir: PathBuf,
    /// `WIKI_MD_INSECURE_SSL=1`
    pub insecure_ssl: bool,
    /// `WIKI_MD_DIRECT_HOSTS`: hosts whose pages are fetched as HTML.
    pub direct_hosts: Vec<String>,
    /// `CONFLUENCE_USERNAME`
    pub username: Option<String>,
    /// `CONFLUENCE_PASSWORD`
    pub password: Option<String>,
    /// `WIKI_COOKIE`
    pub cookie: Option<String>,
    /// `WIKI_TOKEN`
    pub token: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3331)),
            image_dir: PathBuf::from(DEFAULT_IMAGE_DIR),
            insecure_ssl: false,
            direct_hosts: Vec::new(),
            username: None,
            password: None,
            cookie: None,
            token: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key lookup; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let bind_raw = get("WIKI_MD_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind_addr = bind_raw.parse().unwrap_or_else(|e| {
            tracing::warn!(value = %bind_raw, error = %e, "invalid WIKI_MD_BIND, using default");
            defaults.bind_addr
        });

        let direct_hosts = get("WIKI_MD_DIRECT_HOSTS")
            .map(|hosts| {
                hosts
                    .split(',')
                    .map(|h| h.trim().to_lowercase())
                    .filter(|h| !h.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Self {
            bind_addr,
            image_dir: get("WIKI_MD_IMAGE_DIR").map(PathBuf::from).unwrap_or(defaults.image_dir),
            insecure_ssl: get("WIKI_MD_INSECURE_SSL").as_deref() == Some("1"),
            direct_hosts,
            username: get("CONFLUENCE_USERNAME"),
            password: get("CONFLUENCE_PASSWORD"),
            cookie: get("WIKI_COOKIE"),
            token: get("WIKI_TOKEN"),
        }
    }

    pub fn is_direct_host(&self, host: &str) -> bool {
        let host = host.to_lowercase();
        self.direct_hosts
            .iter()
            .any(|h| host == *h || host.ends_with(&format!(".{}", h)))
    }
}
