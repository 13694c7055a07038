//! HTTP handlers, one module per feature area
//!
//! Every module exposes `config(cfg)`; `configure` mounts them all.

use actix_web::{http::StatusCode, web, HttpResponse};
use serde::Deserialize;
use std::fmt::Display;

use crate::integrations::{ConnectorError, DirectoryError, StripeClient, StripeError};
use crate::models::{OwnerType, Site, User};
use crate::AppState;

pub mod activity;
pub mod admin;
pub mod auth;
pub mod billing;
pub mod connectors;
pub mod health;
pub mod messages;
pub mod plugins;
pub mod projects;
pub mod sites;
pub mod subscriptions;
pub mod support_tickets;
pub mod teams;
pub mod themes;
pub mod transfers;
pub mod two_factor;
pub mod webhooks;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.configure(health::config)
        .configure(auth::config)
        .configure(admin::config)
        .configure(two_factor::config)
        .configure(subscriptions::config)
        .configure(billing::config)
        .configure(webhooks::config)
        .configure(sites::config)
        .configure(plugins::config)
        .configure(themes::config)
        .configure(transfers::config)
        .configure(messages::config)
        .configure(teams::config)
        .configure(projects::config)
        .configure(support_tickets::config)
        .configure(connectors::config)
        .configure(activity::config);
}

pub(crate) fn error_json(status: StatusCode, message: impl Into<String>) -> HttpResponse {
    HttpResponse::build(status).json(serde_json::json!({ "error": message.into() }))
}

/// Log a store failure and answer 500
pub(crate) fn db_error(context: &str, e: impl Display) -> HttpResponse {
    log::error!("{}: {}", context, e);
    error_json(StatusCode::INTERNAL_SERVER_ERROR, context)
}

pub(crate) fn stripe_client(state: &AppState) -> Result<&StripeClient, HttpResponse> {
    state.stripe.as_deref().ok_or_else(|| {
        log::error!("Stripe call attempted without STRIPE_SECRET_KEY");
        error_json(StatusCode::INTERNAL_SERVER_ERROR, "Stripe secret key not configured")
    })
}

/// API errors are the caller's problem (400); transport failures are ours
pub(crate) fn stripe_error(e: StripeError) -> HttpResponse {
    match e {
        StripeError::Api { .. } => error_json(StatusCode::BAD_REQUEST, e.to_string()),
        other => {
            log::error!("Stripe request failed: {}", other);
            error_json(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}

/// Relay failure from a site's connector plugin
pub(crate) fn connector_error(e: &ConnectorError) -> HttpResponse {
    let status = match e {
        ConnectorError::Request(_) | ConnectorError::Decode(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    };
    HttpResponse::build(status).json(serde_json::json!({
        "success": false,
        "error": e.user_message(),
    }))
}

/// Query string of the plugin and theme directory searches
#[derive(Debug, Deserialize)]
pub struct DirectorySearchQuery {
    #[serde(default)]
    pub search: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl DirectorySearchQuery {
    /// Trimmed search text, or the 400 answer when it is missing
    pub(crate) fn search_text(&self) -> Result<&str, HttpResponse> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| error_json(StatusCode::BAD_REQUEST, "Search query is required"))
    }
}

pub(crate) fn directory_error(e: DirectoryError) -> HttpResponse {
    log::error!("wordpress.org search failed: {}", e);
    HttpResponse::InternalServerError().json(serde_json::json!({
        "success": false,
        "error": e.to_string(),
    }))
}

/// Audit entry; a failed write never fails the request
pub(crate) fn record_activity(
    state: &AppState,
    user: &User,
    action: &str,
    entity_type: &str,
    entity_id: Option<&str>,
    details: Option<String>,
) {
    if let Err(e) = state
        .db
        .log_activity(&user.email, action, Some(entity_type), entity_id, details.as_deref())
    {
        log::warn!("Failed to log activity {} for {}: {}", action, user.email, e);
    }
}

/// The user owns the row directly or belongs to the owning team
pub(crate) fn is_owner_or_member(
    state: &AppState,
    owner_type: OwnerType,
    owner_id: &str,
    user: &User,
) -> rusqlite::Result<bool> {
    match owner_type {
        OwnerType::User => Ok(owner_id == user.id),
        OwnerType::Team => state.db.is_team_member(owner_id, &user.id),
    }
}

pub(crate) fn can_access_site(state: &AppState, site: &Site, user: &User) -> rusqlite::Result<bool> {
    is_owner_or_member(state, site.owner_type, &site.owner_id, user)
}

/// Load a site the caller may act on: 404 unknown, 403 foreign
pub(crate) fn load_accessible_site(state: &AppState, user: &User, site_id: &str) -> Result<Site, HttpResponse> {
    let site = match state.db.get_site(site_id) {
        Ok(Some(site)) => site,
        Ok(None) => return Err(error_json(StatusCode::NOT_FOUND, "Site not found")),
        Err(e) => return Err(db_error("Failed to load site", e)),
    };

    match can_access_site(state, &site, user) {
        Ok(true) => Ok(site),
        Ok(false) => Err(error_json(StatusCode::FORBIDDEN, "You do not have access to this site")),
        Err(e) => Err(db_error("Failed to check site access", e)),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use crate::config::{Config, DEFAULT_WORDPRESS_ORG_API_BASE};
    use crate::db::Database;
    use crate::integrations::{ConnectorClient, DirectoryClient, StripeClient};
    use crate::models::{User, UserRole};
    use crate::AppState;

    pub fn app_state() -> AppState {
        AppState {
            db: Arc::new(Database::in_memory()),
            config: Config::for_tests(),
            stripe: None,
            connector: Arc::new(ConnectorClient::new(5).unwrap()),
            directory: Arc::new(DirectoryClient::new(DEFAULT_WORDPRESS_ORG_API_BASE, 5).unwrap()),
        }
    }

    /// State whose wordpress.org client talks to a mock server
    pub fn app_state_with_directory(base_url: &str) -> AppState {
        let mut state = app_state();
        state.directory = Arc::new(DirectoryClient::new(base_url, 5).unwrap());
        state
    }

    /// State whose Stripe client talks to a mock server
    pub fn app_state_with_stripe(base_url: &str) -> AppState {
        let mut state = app_state();
        state.config.stripe_api_base = base_url.to_string();
        state.stripe = Some(Arc::new(StripeClient::new("sk_test_123", base_url).unwrap()));
        state
    }

    /// Create a user plus a live session; returns the user and its bearer header value
    pub fn seed_user(db: &Database, email: &str, role: UserRole) -> (User, String) {
        let user = db.create_user(email, "unused-hash", Some("Test User"), role).unwrap();
        let session = db.create_session(&user.id, 1).unwrap();
        (user, format!("Bearer {}", session.token))
    }
}
