use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static VERSION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+\.\d+\.\d+$").unwrap());

/// A released build of the WordPress connector plugin
#[derive(Debug, Clone, Serialize)]
pub struct Connector {
    pub id: String,
    pub version: String,
    pub file_url: String,
    pub description: Option<String>,
    pub changelog: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Connector {
    /// Sort key so "1.10.0" orders after "1.9.3"
    pub fn version_key(&self) -> (u64, u64, u64) {
        version_key(&self.version)
    }
}

pub fn is_valid_version(version: &str) -> bool {
    VERSION_RE.is_match(version)
}

fn version_key(version: &str) -> (u64, u64, u64) {
    let mut parts = version.split('.').map(|p| p.parse::<u64>().unwrap_or(0));
    (
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
    )
}

#[derive(Debug, Deserialize)]
pub struct RegisterConnectorRequest {
    pub version: String,
    pub file_url: String,
    pub description: Option<String>,
    pub changelog: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_format() {
        assert!(is_valid_version("1.0.0"));
        assert!(is_valid_version("12.4.103"));
        assert!(!is_valid_version("1.0"));
        assert!(!is_valid_version("v1.0.0"));
        assert!(!is_valid_version("1.0.0-beta"));
    }

    #[test]
    fn test_version_ordering() {
        assert!(version_key("1.10.0") > version_key("1.9.3"));
        assert!(version_key("2.0.0") > version_key("1.99.99"));
    }
}
