use std::env;

/// Fallback Stripe endpoint when STRIPE_API_BASE is not set
pub const DEFAULT_STRIPE_API_BASE: &str = "https://api.stripe.com";
pub const DEFAULT_WORDPRESS_ORG_API_BASE: &str = "https://api.wordpress.org";

#[derive(Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub session_ttl_hours: i64,
    pub stripe_secret_key: Option<String>,
    pub stripe_webhook_secret: Option<String>,
    pub stripe_api_base: String,
    pub connector_timeout_secs: u64,
    pub wordpress_org_api_base: String,
    pub frontend_dist: Option<String>,
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .expect("PORT must be a valid number"),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "./.db/wphub.db".to_string()),
            session_ttl_hours: env::var("SESSION_TTL_HOURS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(168),
            stripe_secret_key: non_empty_var("STRIPE_SECRET_KEY"),
            stripe_webhook_secret: non_empty_var("STRIPE_WEBHOOK_SECRET"),
            stripe_api_base: non_empty_var("STRIPE_API_BASE")
                .unwrap_or_else(|| DEFAULT_STRIPE_API_BASE.to_string()),
            connector_timeout_secs: env::var("CONNECTOR_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            wordpress_org_api_base: non_empty_var("WORDPRESS_ORG_API_BASE")
                .unwrap_or_else(|| DEFAULT_WORDPRESS_ORG_API_BASE.to_string()),
            frontend_dist: non_empty_var("FRONTEND_DIST"),
            admin_email: non_empty_var("ADMIN_EMAIL"),
            admin_password: non_empty_var("ADMIN_PASSWORD"),
        }
    }

    /// Config used by handler tests: in-memory store, no Stripe key
    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            port: 0,
            database_url: ":memory:".to_string(),
            session_ttl_hours: 1,
            stripe_secret_key: None,
            stripe_webhook_secret: None,
            stripe_api_base: DEFAULT_STRIPE_API_BASE.to_string(),
            connector_timeout_secs: 5,
            wordpress_org_api_base: DEFAULT_WORDPRESS_ORG_API_BASE.to_string(),
            frontend_dist: None,
            admin_email: None,
            admin_password: None,
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Resolve the SPA build directory, if static serving is enabled
pub fn resolve_frontend_dist(config: &Config) -> Option<String> {
    if env::var("DISABLE_FRONTEND")
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(false)
    {
        log::info!("Frontend serving disabled via DISABLE_FRONTEND env var");
        return None;
    }

    let candidates = config
        .frontend_dist
        .iter()
        .map(|s| s.as_str())
        .chain(["./frontend/dist", "../frontend/dist"]);

    for candidate in candidates {
        if std::path::Path::new(candidate).exists() {
            return Some(candidate.to_string());
        }
    }

    log::warn!("Frontend dist not found - static file serving disabled");
    None
}
