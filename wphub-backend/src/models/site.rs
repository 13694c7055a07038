use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OwnerType {
    User,
    Team,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SiteStatus {
    Active,
    Inactive,
    Error,
}

/// Install state of one plugin on a site
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SitePluginEntry {
    #[serde(default)]
    pub plugin_id: Option<String>,
    pub slug: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    pub is_installed: bool,
    pub is_activated: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Site {
    pub id: String,
    pub name: String,
    pub url: String,
    pub api_key: String,
    pub owner_type: OwnerType,
    pub owner_id: String,
    pub status: SiteStatus,
    pub wp_version: Option<String>,
    pub last_connection: Option<DateTime<Utc>>,
    pub plugins: Vec<SitePluginEntry>,
    pub health_check: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Site {
    pub fn is_owned_by_user(&self, user_id: &str) -> bool {
        self.owner_type == OwnerType::User && self.owner_id == user_id
    }

    /// Insert or replace the entry for `entry.slug`
    pub fn upsert_plugin(&mut self, entry: SitePluginEntry) {
        match self.plugins.iter_mut().find(|p| p.slug == entry.slug) {
            Some(existing) => {
                // Keep the library link if the new entry came from a bare connector listing
                let plugin_id = entry.plugin_id.clone().or_else(|| existing.plugin_id.clone());
                *existing = SitePluginEntry { plugin_id, ..entry };
            }
            None => self.plugins.push(entry),
        }
    }

    /// Returns true when an entry was removed
    pub fn remove_plugin(&mut self, slug: &str) -> bool {
        let before = self.plugins.len();
        self.plugins.retain(|p| p.slug != slug);
        self.plugins.len() != before
    }

    pub fn set_plugin_activated(&mut self, slug: &str, activated: bool) -> bool {
        match self.plugins.iter_mut().find(|p| p.slug == slug) {
            Some(entry) => {
                entry.is_activated = activated;
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateSiteRequest {
    pub name: String,
    pub url: String,
    pub team_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SiteIdRequest {
    pub site_id: String,
}

#[derive(Debug, Deserialize)]
pub struct DebugSettingsRequest {
    pub site_id: String,
    #[serde(default)]
    pub wp_debug: bool,
    #[serde(default)]
    pub wp_debug_log: bool,
    #[serde(default)]
    pub wp_debug_display: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site() -> Site {
        Site {
            id: "s1".to_string(),
            name: "Blog".to_string(),
            url: "https://blog.example".to_string(),
            api_key: "k".to_string(),
            owner_type: OwnerType::User,
            owner_id: "u1".to_string(),
            status: SiteStatus::Active,
            wp_version: None,
            last_connection: None,
            plugins: vec![],
            health_check: serde_json::json!({}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn entry(slug: &str, plugin_id: Option<&str>) -> SitePluginEntry {
        SitePluginEntry {
            plugin_id: plugin_id.map(String::from),
            slug: slug.to_string(),
            name: None,
            version: Some("1.0.0".to_string()),
            is_installed: true,
            is_activated: true,
        }
    }

    #[test]
    fn test_upsert_replaces_by_slug() {
        let mut s = site();
        s.upsert_plugin(entry("seo", Some("p1")));
        s.upsert_plugin(SitePluginEntry {
            version: Some("2.0.0".to_string()),
            ..entry("seo", None)
        });

        assert_eq!(s.plugins.len(), 1);
        assert_eq!(s.plugins[0].version.as_deref(), Some("2.0.0"));
        // library link survives a listing without ids
        assert_eq!(s.plugins[0].plugin_id.as_deref(), Some("p1"));
    }

    #[test]
    fn test_remove_and_toggle() {
        let mut s = site();
        s.upsert_plugin(entry("seo", None));
        s.upsert_plugin(entry("cache", None));

        assert!(s.set_plugin_activated("cache", false));
        assert!(!s.plugins[1].is_activated);
        assert!(!s.set_plugin_activated("missing", true));

        assert!(s.remove_plugin("seo"));
        assert!(!s.remove_plugin("seo"));
        assert_eq!(s.plugins.len(), 1);
    }

    #[test]
    fn test_ownership() {
        let mut s = site();
        assert!(s.is_owned_by_user("u1"));
        assert!(!s.is_owned_by_user("u2"));
        s.owner_type = OwnerType::Team;
        assert!(!s.is_owned_by_user("u1"));
    }
}
