//! Client for the connector plugin installed on each managed WordPress site.
//!
//! Every call is `POST {site.url}/wp-json/wphub/v1/{endpoint}` with the site's
//! `api_key` merged into the JSON body.

use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

use crate::models::Site;

#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error("Connector request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// Non-2xx answer; `code` is the WP_Error code when the body carried one
    #[error("Connector error: {status} - {message}")]
    Status {
        status: u16,
        code: Option<String>,
        message: String,
    },
    /// 2xx answer with `success: false`
    #[error("{0}")]
    Rejected(String),
    #[error("Invalid connector response: {0}")]
    Decode(String),
}

impl ConnectorError {
    /// The connector refused our API key, or the plugin is not installed
    pub fn is_forbidden(&self) -> bool {
        matches!(
            self,
            ConnectorError::Status { code: Some(code), .. }
                if code == "rest_forbidden" || code == "invalid_api_key"
        ) || matches!(self, ConnectorError::Status { status: 401 | 403, .. })
    }

    /// Message suitable for the end user
    pub fn user_message(&self) -> String {
        if self.is_forbidden() {
            return "API key is incorrect or the connector plugin is not installed".to_string();
        }
        match self {
            ConnectorError::Status { message, .. } | ConnectorError::Rejected(message) => message.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PingResponse {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub wp_version: Option<String>,
    #[serde(default)]
    pub site_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WordPressVersion {
    pub version: String,
    #[serde(default)]
    pub php_version: Option<String>,
    #[serde(default)]
    pub mysql_version: Option<String>,
}

/// A plugin as reported by `listPlugins`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemotePlugin {
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub is_network_activated: bool,
}

impl RemotePlugin {
    pub fn is_active(&self) -> bool {
        self.status == "active" || self.is_network_activated
    }
}

/// A theme as reported by `listThemes`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteTheme {
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub parent_theme: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct DebugSettings {
    pub wp_debug: bool,
    pub wp_debug_log: bool,
    pub wp_debug_display: bool,
}

pub struct ConnectorClient {
    client: Client,
}

impl ConnectorClient {
    pub fn new(timeout_secs: u64) -> Result<Self, ConnectorError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self { client })
    }

    fn endpoint_url(site_url: &str, endpoint: &str) -> String {
        format!("{}/wp-json/wphub/v1/{}", site_url.trim_end_matches('/'), endpoint)
    }

    /// Raw call; returns the decoded JSON body of a successful answer
    pub async fn call(&self, site: &Site, endpoint: &str, params: Value) -> Result<Value, ConnectorError> {
        let mut body = json!({ "api_key": site.api_key });
        if let (Some(target), Value::Object(extra)) = (body.as_object_mut(), params) {
            target.extend(extra);
        }

        let url = Self::endpoint_url(&site.url, endpoint);
        log::debug!("[CONNECTOR] POST {}", url);

        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let parsed: Option<Value> = serde_json::from_str(&text).ok();
            let code = parsed
                .as_ref()
                .and_then(|v| v.get("code"))
                .and_then(|c| c.as_str())
                .map(String::from);
            let message = parsed
                .as_ref()
                .and_then(|v| v.get("message"))
                .and_then(|m| m.as_str())
                .map(String::from)
                .unwrap_or(text);
            log::warn!("[CONNECTOR] {} returned {}: {}", url, status, message);
            return Err(ConnectorError::Status {
                status: status.as_u16(),
                code,
                message,
            });
        }

        let value: Value = serde_json::from_str(&text).map_err(|e| ConnectorError::Decode(e.to_string()))?;
        if value.get("success").and_then(|s| s.as_bool()) == Some(false) {
            let message = value
                .get("message")
                .or_else(|| value.get("error"))
                .and_then(|m| m.as_str())
                .unwrap_or("Connector reported a failure")
                .to_string();
            return Err(ConnectorError::Rejected(message));
        }
        Ok(value)
    }

    async fn call_typed<T: for<'de> Deserialize<'de>>(
        &self,
        site: &Site,
        endpoint: &str,
        params: Value,
        field: Option<&str>,
    ) -> Result<T, ConnectorError> {
        let value = self.call(site, endpoint, params).await?;
        let target = match field {
            Some(f) => value.get(f).cloned().unwrap_or(Value::Null),
            None => value,
        };
        serde_json::from_value(target).map_err(|e| ConnectorError::Decode(e.to_string()))
    }

    pub async fn ping(&self, site: &Site) -> Result<PingResponse, ConnectorError> {
        self.call_typed(site, "ping", json!({}), None).await
    }

    pub async fn get_wordpress_version(&self, site: &Site) -> Result<WordPressVersion, ConnectorError> {
        self.call_typed(site, "getWordPressVersion", json!({}), None).await
    }

    pub async fn list_plugins(&self, site: &Site) -> Result<Vec<RemotePlugin>, ConnectorError> {
        self.call_typed(site, "listPlugins", json!({}), Some("plugins")).await
    }

    pub async fn list_themes(&self, site: &Site) -> Result<Vec<RemoteTheme>, ConnectorError> {
        self.call_typed(site, "listThemes", json!({}), Some("themes")).await
    }

    pub async fn install_plugin(&self, site: &Site, slug: &str, file_url: &str) -> Result<Value, ConnectorError> {
        self.call(site, "installPlugin", json!({ "plugin_slug": slug, "file_url": file_url }))
            .await
    }

    pub async fn uninstall_plugin(&self, site: &Site, slug: &str) -> Result<Value, ConnectorError> {
        self.call(site, "uninstallPlugin", json!({ "plugin_slug": slug })).await
    }

    /// Flip a plugin's activation; returns the connector's `new_status`
    pub async fn toggle_plugin(&self, site: &Site, slug: &str) -> Result<String, ConnectorError> {
        let value = self.call(site, "togglePlugin", json!({ "plugin_slug": slug })).await?;
        value
            .get("new_status")
            .and_then(|s| s.as_str())
            .map(String::from)
            .ok_or_else(|| ConnectorError::Decode("missing new_status".to_string()))
    }

    pub async fn download_theme(&self, site: &Site, slug: &str, file_url: &str) -> Result<Value, ConnectorError> {
        self.call(site, "downloadTheme", json!({ "theme_slug": slug, "file_url": file_url }))
            .await
    }

    pub async fn uninstall_theme(&self, site: &Site, slug: &str) -> Result<Value, ConnectorError> {
        self.call(site, "uninstallTheme", json!({ "theme_slug": slug })).await
    }

    pub async fn activate_theme(&self, site: &Site, slug: &str) -> Result<Value, ConnectorError> {
        self.call(site, "activateTheme", json!({ "theme_slug": slug })).await
    }

    pub async fn update_debug_settings(&self, site: &Site, settings: DebugSettings) -> Result<Value, ConnectorError> {
        // the plugin reads debug / debug_log / debug_display
        self.call(
            site,
            "updateDebugSettings",
            json!({
                "debug": settings.wp_debug,
                "debug_log": settings.wp_debug_log,
                "debug_display": settings.wp_debug_display,
            }),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::models::{OwnerType, SiteStatus};

    fn site(url: &str) -> Site {
        Site {
            id: "s1".to_string(),
            name: "Blog".to_string(),
            url: format!("{}/", url),
            api_key: "secret-key".to_string(),
            owner_type: OwnerType::User,
            owner_id: "u1".to_string(),
            status: SiteStatus::Inactive,
            wp_version: None,
            last_connection: None,
            plugins: vec![],
            health_check: json!({}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_list_plugins_sends_api_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/wp-json/wphub/v1/listPlugins"))
            .and(body_partial_json(json!({ "api_key": "secret-key" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "plugins": [
                    { "name": "SEO", "slug": "seo", "version": "1.0", "status": "active", "is_network_activated": false },
                    { "name": "Cache", "slug": "cache", "version": "2.1", "status": "inactive", "is_network_activated": false }
                ]
            })))
            .mount(&server)
            .await;

        let client = ConnectorClient::new(5).unwrap();
        let plugins = client.list_plugins(&site(&server.uri())).await.unwrap();
        assert_eq!(plugins.len(), 2);
        assert!(plugins[0].is_active());
        assert!(!plugins[1].is_active());
    }

    #[tokio::test]
    async fn test_forbidden_maps_to_api_key_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/wp-json/wphub/v1/ping"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "code": "rest_forbidden",
                "message": "Sorry, you are not allowed to do that.",
                "data": { "status": 401 }
            })))
            .mount(&server)
            .await;

        let client = ConnectorClient::new(5).unwrap();
        let err = client.ping(&site(&server.uri())).await.unwrap_err();
        assert!(err.is_forbidden());
        assert!(err.user_message().starts_with("API key is incorrect"));
    }

    #[tokio::test]
    async fn test_toggle_and_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/wp-json/wphub/v1/togglePlugin"))
            .and(body_partial_json(json!({ "plugin_slug": "seo" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true, "message": "Plugin deactivated", "new_status": "inactive"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/wp-json/wphub/v1/uninstallPlugin"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": false, "message": "Plugin not found"
            })))
            .mount(&server)
            .await;

        let client = ConnectorClient::new(5).unwrap();
        let s = site(&server.uri());
        assert_eq!(client.toggle_plugin(&s, "seo").await.unwrap(), "inactive");

        match client.uninstall_plugin(&s, "ghost").await {
            Err(ConnectorError::Rejected(msg)) => assert_eq!(msg, "Plugin not found"),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
