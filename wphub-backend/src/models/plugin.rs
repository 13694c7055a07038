use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::OwnerType;

/// One site a library plugin or theme is installed on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallationRef {
    pub site_id: String,
    #[serde(default)]
    pub version: Option<String>,
    pub installed_at: DateTime<Utc>,
}

/// Add `site_id` unless it is already listed. Returns true when the list changed.
pub fn add_installation(list: &mut Vec<InstallationRef>, site_id: &str, version: Option<&str>) -> bool {
    if list.iter().any(|i| i.site_id == site_id) {
        return false;
    }
    list.push(InstallationRef {
        site_id: site_id.to_string(),
        version: version.map(String::from),
        installed_at: Utc::now(),
    });
    true
}

/// Drop every entry for `site_id`. Returns true when the list changed.
pub fn remove_installation(list: &mut Vec<InstallationRef>, site_id: &str) -> bool {
    let before = list.len();
    list.retain(|i| i.site_id != site_id);
    list.len() != before
}

#[derive(Debug, Clone, Serialize)]
pub struct Plugin {
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

impl Plugin {
    pub fn is_installed_on(&self, site_id: &str) -> bool {
        self.installed_on.iter().any(|i| i.site_id == site_id)
    }
}

#[derive(Debug, Deserialize)]
pub struct CreatePluginRequest {
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    #[serde(default)]
    pub is_public: bool,
    pub latest_version: Option<String>,
    pub download_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct InstallPluginRequest {
    pub site_id: String,
    pub plugin_slug: String,
    pub plugin_id: Option<String>,
    pub download_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UninstallPluginRequest {
    pub site_id: String,
    pub plugin_slug: String,
    pub plugin_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TogglePluginRequest {
    pub site_id: String,
    pub plugin_slug: String,
}
