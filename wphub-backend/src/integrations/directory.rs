//! Search client for the public wordpress.org plugin and theme directories.

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

static HTML_TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());

pub const DEFAULT_PER_PAGE: u32 = 20;
const MAX_PER_PAGE: u32 = 100;
const THEME_DESCRIPTION_CHARS: usize = 200;

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("WordPress.org request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("WordPress API returned {0}")]
    Status(u16),
    #[error("Invalid WordPress.org response: {0}")]
    Decode(String),
}

/// One page of a directory search
#[derive(Debug, Clone, Copy)]
pub struct SearchPage {
    pub page: u32,
    pub per_page: u32,
}

impl SearchPage {
    pub fn new(page: Option<u32>, per_page: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            per_page: per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DirectoryPlugin {
    pub name: String,
    pub slug: String,
    pub version: Option<String>,
    pub description: Option<String>,
    pub author: Option<String>,
    pub download_url: Option<String>,
    pub screenshot_url: String,
    pub active_installs: Option<i64>,
    pub rating: Option<f64>,
    pub num_ratings: Option<i64>,
    pub last_updated: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DirectoryTheme {
    pub name: String,
    pub slug: String,
    pub version: Option<String>,
    pub description: String,
    pub author: Option<String>,
    pub screenshot_url: Option<String>,
    pub preview_url: Option<String>,
    pub homepage: String,
    pub download_url: String,
    pub active_installs: Option<i64>,
    pub rating: Option<f64>,
    pub num_ratings: Option<i64>,
    pub last_updated: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PluginInfo {
    name: String,
    slug: String,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    short_description: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    download_link: Option<String>,
    #[serde(default)]
    icons: HashMap<String, String>,
    #[serde(default)]
    banners: Value,
    #[serde(default)]
    active_installs: Option<i64>,
    #[serde(default)]
    rating: Option<f64>,
    #[serde(default)]
    num_ratings: Option<i64>,
    #[serde(default)]
    last_updated: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ThemeInfo {
    name: String,
    slug: String,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    author: Value,
    #[serde(default)]
    screenshot_url: Option<String>,
    #[serde(default)]
    preview_url: Option<String>,
    #[serde(default)]
    homepage: Option<String>,
    #[serde(default)]
    download_link: Option<String>,
    #[serde(default)]
    active_installs: Option<i64>,
    #[serde(default)]
    rating: Option<f64>,
    #[serde(default)]
    num_ratings: Option<i64>,
    #[serde(default)]
    last_updated: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse<T> {
    #[serde(default)]
    info: Value,
    #[serde(default = "Vec::new", alias = "themes")]
    plugins: Vec<T>,
}

pub fn strip_html(text: &str) -> String {
    HTML_TAG_RE.replace_all(text, "").trim().to_string()
}

impl From<PluginInfo> for DirectoryPlugin {
    fn from(p: PluginInfo) -> Self {
        // banners is an empty array, not an object, when a plugin has none
        let banner = |size: &str| p.banners.get(size).and_then(|b| b.as_str()).map(String::from);
        let screenshot_url = p
            .icons
            .get("2x")
            .or_else(|| p.icons.get("1x"))
            .cloned()
            .or_else(|| banner("high"))
            .or_else(|| banner("low"))
            .unwrap_or_default();

        Self {
            name: p.name,
            slug: p.slug,
            version: p.version,
            description: p.short_description,
            author: p.author.as_deref().map(strip_html),
            download_url: p.download_link,
            screenshot_url,
            active_installs: p.active_installs,
            rating: p.rating,
            num_ratings: p.num_ratings,
            last_updated: p.last_updated,
        }
    }
}

impl From<ThemeInfo> for DirectoryTheme {
    fn from(t: ThemeInfo) -> Self {
        let description: String = strip_html(t.description.as_deref().unwrap_or_default())
            .chars()
            .take(THEME_DESCRIPTION_CHARS)
            .collect();
        let author = match &t.author {
            Value::String(name) => Some(name.clone()),
            other => other.get("display_name").and_then(|n| n.as_str()).map(String::from),
        };
        let version = t.version.as_deref().unwrap_or("latest");

        Self {
            homepage: t
                .homepage
                .clone()
                .unwrap_or_else(|| format!("https://wordpress.org/themes/{}/", t.slug)),
            download_url: t
                .download_link
                .clone()
                .unwrap_or_else(|| format!("https://downloads.wordpress.org/theme/{}.{}.zip", t.slug, version)),
            name: t.name,
            slug: t.slug,
            version: t.version,
            description,
            author,
            screenshot_url: t.screenshot_url,
            preview_url: t.preview_url,
            active_installs: t.active_installs,
            rating: t.rating,
            num_ratings: t.num_ratings,
            last_updated: t.last_updated,
        }
    }
}

pub struct DirectoryClient {
    client: Client,
    base_url: String,
}

impl DirectoryClient {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self, DirectoryError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn query<T: for<'de> Deserialize<'de>>(
        &self,
        kind: &str,
        action: &str,
        search: &str,
        page: SearchPage,
    ) -> Result<QueryResponse<T>, DirectoryError> {
        let url = format!("{}/{}/info/1.2/", self.base_url, kind);
        log::debug!("[DIRECTORY] {} search={} page={}", action, search, page.page);

        let response = self
            .client
            .get(&url)
            .query(&[
                ("action", action.to_string()),
                ("request[search]", search.to_string()),
                ("request[page]", page.page.to_string()),
                ("request[per_page]", page.per_page.to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            log::warn!("[DIRECTORY] {} returned {}", url, status);
            return Err(DirectoryError::Status(status.as_u16()));
        }
        response
            .json()
            .await
            .map_err(|e| DirectoryError::Decode(e.to_string()))
    }

    /// Returns the directory's paging info alongside the plugins
    pub async fn search_plugins(
        &self,
        search: &str,
        page: SearchPage,
    ) -> Result<(Value, Vec<DirectoryPlugin>), DirectoryError> {
        let found: QueryResponse<PluginInfo> = self.query("plugins", "query_plugins", search, page).await?;
        Ok((found.info, found.plugins.into_iter().map(Into::into).collect()))
    }

    pub async fn search_themes(
        &self,
        search: &str,
        page: SearchPage,
    ) -> Result<(Value, Vec<DirectoryTheme>), DirectoryError> {
        let found: QueryResponse<ThemeInfo> = self.query("themes", "query_themes", search, page).await?;
        Ok((found.info, found.plugins.into_iter().map(Into::into).collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_search_page_bounds() {
        let page = SearchPage::new(None, None);
        assert_eq!((page.page, page.per_page), (1, DEFAULT_PER_PAGE));
        let page = SearchPage::new(Some(0), Some(5000));
        assert_eq!((page.page, page.per_page), (1, MAX_PER_PAGE));
    }

    #[test]
    fn test_strip_html() {
        assert_eq!(strip_html("<a href=\"https://x.test\">Jane Doe</a>"), "Jane Doe");
        assert_eq!(strip_html("plain"), "plain");
    }

    #[tokio::test]
    async fn test_plugin_search_maps_results() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/plugins/info/1.2/"))
            .and(query_param("action", "query_plugins"))
            .and(query_param("request[search]", "seo"))
            .and(query_param("request[per_page]", "5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "info": { "page": 1, "pages": 3, "results": 12 },
                "plugins": [
                    {
                        "name": "SEO Tool", "slug": "seo-tool", "version": "2.1.0",
                        "short_description": "Ranks things",
                        "author": "<a href=\"https://example.com\">Acme</a>",
                        "download_link": "https://downloads.wordpress.org/plugin/seo-tool.zip",
                        "icons": { "1x": "https://ps.w.org/seo-tool/icon-128x128.png" },
                        "banners": [],
                        "active_installs": 10000, "rating": 92, "num_ratings": 40
                    },
                    {
                        "name": "Bare", "slug": "bare", "icons": {},
                        "banners": { "low": "https://ps.w.org/bare/banner-772x250.png", "high": false }
                    }
                ]
            })))
            .mount(&server)
            .await;

        let client = DirectoryClient::new(&server.uri(), 5).unwrap();
        let (info, plugins) = client.search_plugins("seo", SearchPage::new(None, Some(5))).await.unwrap();

        assert_eq!(info["results"], 12);
        assert_eq!(plugins.len(), 2);
        assert_eq!(plugins[0].author.as_deref(), Some("Acme"));
        assert_eq!(plugins[0].screenshot_url, "https://ps.w.org/seo-tool/icon-128x128.png");
        assert_eq!(plugins[1].screenshot_url, "https://ps.w.org/bare/banner-772x250.png");
    }

    #[tokio::test]
    async fn test_theme_search_fills_defaults() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/themes/info/1.2/"))
            .and(query_param("action", "query_themes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "info": { "page": 1, "pages": 1, "results": 1 },
                "themes": [ {
                    "name": "Plain", "slug": "plain", "version": "1.4",
                    "description": format!("<p>{}</p>", "x".repeat(300)),
                    "author": { "user_nicename": "jdoe", "display_name": "J. Doe" }
                } ]
            })))
            .mount(&server)
            .await;

        let client = DirectoryClient::new(&server.uri(), 5).unwrap();
        let (_, themes) = client.search_themes("plain", SearchPage::new(None, None)).await.unwrap();

        assert_eq!(themes[0].author.as_deref(), Some("J. Doe"));
        assert_eq!(themes[0].description.len(), THEME_DESCRIPTION_CHARS);
        assert_eq!(themes[0].homepage, "https://wordpress.org/themes/plain/");
        assert_eq!(themes[0].download_url, "https://downloads.wordpress.org/theme/plain.1.4.zip");
    }

    #[tokio::test]
    async fn test_upstream_failure_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = DirectoryClient::new(&server.uri(), 5).unwrap();
        let err = client.search_plugins("x", SearchPage::new(None, None)).await.unwrap_err();
        assert_eq!(err.to_string(), "WordPress API returned 503");
    }
}
