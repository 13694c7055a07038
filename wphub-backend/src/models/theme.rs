use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{InstallationRef, OwnerType};

#[derive(Debug, Clone, Serialize)]
pub struct Theme {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub owner_type: OwnerType,
    pub owner_id: String,
    pub is_public: bool,
    pub latest_version: Option<String>,
    pub download_url: Option<String>,
    pub installed_on: Vec<InstallationRef>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Public download location for a wordpress.org theme
pub fn wordpress_org_theme_url(slug: &str) -> String {
    format!("https://downloads.wordpress.org/theme/{}.latest-stable.zip", slug)
}

#[derive(Debug, Deserialize)]
pub struct CreateThemeRequest {
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    #[serde(default)]
    pub is_public: bool,
    pub latest_version: Option<String>,
    pub download_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct InstallThemeRequest {
    pub site_id: String,
    pub theme_slug: String,
    pub theme_id: Option<String>,
    pub download_url: Option<String>,
}

/// Shared by the uninstall and activate relays
#[derive(Debug, Deserialize)]
pub struct ThemeActionRequest {
    pub site_id: String,
    pub theme_slug: String,
    pub theme_id: Option<String>,
}
