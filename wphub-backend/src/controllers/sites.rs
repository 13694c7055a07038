use actix_web::{http::StatusCode, web, HttpRequest, HttpResponse, Responder};
use chrono::Utc;
use serde::Serialize;

use crate::controllers::{connector_error, db_error, error_json, load_accessible_site, record_activity};
use crate::integrations::wordpress::{DebugSettings, RemotePlugin};
use crate::middleware::session_auth::{authenticate, require_admin};
use crate::models::{
    add_installation, CreatePluginRequest, CreateSiteRequest, DebugSettingsRequest, OwnerType, Plugin, Site,
    SiteIdRequest, SitePluginEntry, SiteStatus,
};
use crate::security::generate_api_key;
use crate::AppState;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/sites")
            .route("", web::get().to(list_sites))
            .route("", web::post().to(create_site))
            .route("/test-connection", web::post().to(test_connection))
            .route("/sync", web::post().to(sync_site))
            .route("/sync-all", web::post().to(sync_all_sites))
            .route("/debug-settings", web::post().to(update_debug_settings))
            .route("/{id}", web::get().to(get_site))
            .route("/{id}", web::delete().to(delete_site))
            .route("/{id}/plugins", web::get().to(list_site_plugins))
            .route("/{id}/themes", web::get().to(list_site_themes)),
    );
}

/// Absolute http(s) URL without a trailing slash
fn normalize_site_url(raw: &str) -> Result<String, String> {
    let parsed = url::Url::parse(raw.trim()).map_err(|e| format!("Invalid site URL: {}", e))?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err("Site URL must be an http or https address".to_string());
    }
    Ok(parsed.as_str().trim_end_matches('/').to_string())
}

async fn list_sites(state: web::Data<AppState>, req: HttpRequest) -> impl Responder {
    let user = match authenticate(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    match state.db.list_sites_for_user(&user.id) {
        Ok(sites) => HttpResponse::Ok().json(serde_json::json!({ "sites": sites })),
        Err(e) => db_error("Failed to list sites", e),
    }
}

async fn create_site(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<CreateSiteRequest>,
) -> impl Responder {
    let user = match authenticate(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    let name = body.name.trim();
    if name.is_empty() {
        return error_json(StatusCode::BAD_REQUEST, "Site name is required");
    }
    let url = match normalize_site_url(&body.url) {
        Ok(u) => u,
        Err(msg) => return error_json(StatusCode::BAD_REQUEST, msg),
    };

    match state.db.get_site_by_url(&url) {
        Ok(Some(_)) => return error_json(StatusCode::CONFLICT, "A site with this URL is already registered"),
        Ok(None) => {}
        Err(e) => return db_error("Failed to check site URL", e),
    }

    let (owner_type, owner_id) = match &body.team_id {
        Some(team_id) => match state.db.is_team_member(team_id, &user.id) {
            Ok(true) => (OwnerType::Team, team_id.clone()),
            Ok(false) => return error_json(StatusCode::FORBIDDEN, "You are not a member of this team"),
            Err(e) => return db_error("Failed to check team membership", e),
        },
        None => (OwnerType::User, user.id.clone()),
    };

    let api_key = generate_api_key();
    match state.db.create_site(name, &url, &api_key, owner_type, &owner_id) {
        Ok(site) => {
            log::info!("Site {} registered by {}", site.url, user.email);
            record_activity(&state, &user, "site_created", "site", Some(&site.id), Some(site.url.clone()));
            HttpResponse::Created().json(serde_json::json!({ "success": true, "site": site }))
        }
        Err(e) => db_error("Failed to create site", e),
    }
}

async fn get_site(state: web::Data<AppState>, req: HttpRequest, path: web::Path<String>) -> impl Responder {
    let user = match authenticate(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    match load_accessible_site(&state, &user, &path.into_inner()) {
        Ok(site) => HttpResponse::Ok().json(serde_json::json!({ "site": site })),
        Err(resp) => resp,
    }
}

/// Only the personal owner may delete; team sites go through the team owner's account
async fn delete_site(state: web::Data<AppState>, req: HttpRequest, path: web::Path<String>) -> impl Responder {
    let user = match authenticate(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    let site = match load_accessible_site(&state, &user, &path.into_inner()) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    if !site.is_owned_by_user(&user.id) {
        return error_json(StatusCode::FORBIDDEN, "Only the site owner can delete this site");
    }

    match state.db.delete_site(&site.id) {
        Ok(true) => {
            record_activity(&state, &user, "site_deleted", "site", Some(&site.id), Some(site.url.clone()));
            HttpResponse::Ok().json(serde_json::json!({ "success": true }))
        }
        Ok(false) => error_json(StatusCode::NOT_FOUND, "Site not found"),
        Err(e) => db_error("Failed to delete site", e),
    }
}

async fn test_connection(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<SiteIdRequest>,
) -> impl Responder {
    let user = match authenticate(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let site = match load_accessible_site(&state, &user, &body.site_id) {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    let ping = match state.connector.ping(&site).await {
        Ok(p) => p,
        Err(e) => {
            log::warn!("Connection test for {} failed: {}", site.url, e);
            if let Err(db_err) = state.db.update_site_connection(&site.id, SiteStatus::Error, None, None) {
                log::error!("Failed to mark site {} as errored: {}", site.id, db_err);
            }
            record_activity(&state, &user, "site_connection_failed", "site", Some(&site.id), Some(e.user_message()));
            return connector_error(&e);
        }
    };

    let plugins_count = match state.connector.list_plugins(&site).await {
        Ok(plugins) => Some(plugins.len()),
        Err(e) => {
            log::debug!("Plugin count unavailable for {}: {}", site.url, e);
            None
        }
    };

    if let Err(e) = state.db.update_site_connection(
        &site.id,
        SiteStatus::Active,
        ping.wp_version.as_deref(),
        Some(Utc::now()),
    ) {
        return db_error("Failed to update site status", e);
    }

    record_activity(&state, &user, "site_connection_tested", "site", Some(&site.id), None);
    HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "message": ping.message.unwrap_or_else(|| "Connection successful".to_string()),
        "site_id": site.id,
        "site_name": ping.site_name.unwrap_or(site.name),
        "site_url": site.url,
        "wp_version": ping.wp_version,
        "plugins_count": plugins_count,
    }))
}

async fn sync_site(state: web::Data<AppState>, req: HttpRequest, body: web::Json<SiteIdRequest>) -> impl Responder {
    let user = match authenticate(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let site = match load_accessible_site(&state, &user, &body.site_id) {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    let version = match state.connector.get_wordpress_version(&site).await {
        Ok(v) => v,
        Err(e) => return connector_error(&e),
    };
    let remote = match state.connector.list_plugins(&site).await {
        Ok(p) => p,
        Err(e) => return connector_error(&e),
    };

    // the listing replaces the array; library links are carried over by slug
    let plugins: Vec<SitePluginEntry> = remote
        .iter()
        .map(|p| site_plugin_entry(p, linked_plugin_id(&site, &p.slug).map(String::from)))
        .collect();

    if let Err(e) = state.db.save_site_plugins(&site.id, &plugins) {
        return db_error("Failed to store site plugins", e);
    }
    if let Err(e) = state.db.update_site_connection(
        &site.id,
        SiteStatus::Active,
        Some(&version.version),
        Some(Utc::now()),
    ) {
        return db_error("Failed to update site status", e);
    }

    record_activity(
        &state,
        &user,
        "site_synced",
        "site",
        Some(&site.id),
        Some(format!("{} plugins", plugins.len())),
    );
    HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "wp_version": version.version,
        "php_version": version.php_version,
        "mysql_version": version.mysql_version,
        "plugins": plugins,
    }))
}

fn linked_plugin_id<'a>(site: &'a Site, slug: &str) -> Option<&'a str> {
    site.plugins
        .iter()
        .find(|existing| existing.slug == slug)
        .and_then(|existing| existing.plugin_id.as_deref())
}

fn site_plugin_entry(remote: &RemotePlugin, plugin_id: Option<String>) -> SitePluginEntry {
    SitePluginEntry {
        plugin_id,
        slug: remote.slug.clone(),
        name: Some(remote.name.clone()),
        version: remote.version.clone(),
        is_installed: true,
        is_activated: remote.is_active(),
    }
}

#[derive(Debug, Serialize)]
struct SiteSyncResult {
    site_id: String,
    site_name: String,
    site_url: String,
    status: &'static str,
    plugins_found: usize,
    plugins_synced: usize,
    new_plugins: usize,
    error: Option<String>,
}

impl SiteSyncResult {
    fn failed(mut self, error: String) -> Self {
        self.status = "failed";
        self.error = Some(error);
        self
    }
}

/// Library plugin for a slug found on `site`; created for the site owner when unknown
fn library_plugin_for(state: &AppState, site: &Site, remote: &RemotePlugin) -> rusqlite::Result<(Plugin, bool)> {
    if let Some(id) = linked_plugin_id(site, &remote.slug) {
        if let Some(plugin) = state.db.get_plugin(id)? {
            return Ok((plugin, false));
        }
    }
    if let Some(plugin) = state
        .db
        .find_owned_plugin_by_slug(&remote.slug, site.owner_type, &site.owner_id)?
    {
        return Ok((plugin, false));
    }

    let plugin = state.db.create_plugin(
        &CreatePluginRequest {
            name: remote.name.clone(),
            slug: remote.slug.clone(),
            description: remote.description.clone(),
            is_public: false,
            latest_version: remote.version.clone(),
            download_url: None,
        },
        &site.owner_id,
    )?;
    if site.owner_type == OwnerType::Team {
        state.db.set_plugin_owner(&plugin.id, OwnerType::Team, &site.owner_id)?;
    }
    Ok((plugin, true))
}

/// Pull one site's plugin list into its entries and the owner's library
async fn sync_site_library(state: &AppState, site: &Site) -> SiteSyncResult {
    let result = SiteSyncResult {
        site_id: site.id.clone(),
        site_name: site.name.clone(),
        site_url: site.url.clone(),
        status: "success",
        plugins_found: 0,
        plugins_synced: 0,
        new_plugins: 0,
        error: None,
    };

    let remote = match state.connector.list_plugins(site).await {
        Ok(p) => p,
        Err(e) => {
            log::warn!("[SYNC] {} ({}) failed: {}", site.name, site.url, e);
            return result.failed(e.user_message());
        }
    };
    let mut result = SiteSyncResult { plugins_found: remote.len(), ..result };

    let mut entries = Vec::with_capacity(remote.len());
    for plugin in &remote {
        let (library, created) = match library_plugin_for(state, site, plugin) {
            Ok(found) => found,
            Err(e) => return result.failed(format!("Failed to store plugin {}: {}", plugin.slug, e)),
        };
        if created {
            result.new_plugins += 1;
        }
        let mut installed_on = library.installed_on.clone();
        if add_installation(&mut installed_on, &site.id, plugin.version.as_deref()) {
            if let Err(e) = state.db.save_plugin_installations(&library.id, &installed_on) {
                return result.failed(format!("Failed to store plugin {}: {}", plugin.slug, e));
            }
        }
        entries.push(site_plugin_entry(plugin, Some(library.id)));
    }

    if let Err(e) = state.db.save_site_plugins(&site.id, &entries) {
        return result.failed(format!("Failed to store site plugins: {}", e));
    }
    if let Err(e) = state
        .db
        .update_site_connection(&site.id, SiteStatus::Active, None, Some(Utc::now()))
    {
        return result.failed(format!("Failed to update site status: {}", e));
    }
    result.plugins_synced = entries.len();
    result
}

/// Admin-wide plugin sync; one failing site does not stop the others
async fn sync_all_sites(state: web::Data<AppState>, req: HttpRequest) -> impl Responder {
    let admin = match require_admin(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    let sites = match state.db.list_all_sites() {
        Ok(sites) => sites,
        Err(e) => return db_error("Failed to list sites", e),
    };

    let mut site_results = Vec::with_capacity(sites.len());
    for site in &sites {
        site_results.push(sync_site_library(&state, site).await);
    }

    let successful = site_results.iter().filter(|r| r.error.is_none()).count();
    let failed = site_results.len() - successful;
    let synced: usize = site_results.iter().map(|r| r.plugins_synced).sum();
    let created: usize = site_results.iter().map(|r| r.new_plugins).sum();
    log::info!("[SYNC] {}/{} sites synced, {} new library plugins", successful, sites.len(), created);

    record_activity(
        &state,
        &admin,
        "all_sites_synced",
        "site",
        None,
        Some(format!("{} succeeded, {} failed, {} new plugins", successful, failed, created)),
    );
    HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "message": format!("Sync finished: {}/{} sites succeeded", successful, sites.len()),
        "results": {
            "total_sites": sites.len(),
            "successful_sites": successful,
            "failed_sites": failed,
            "total_plugins_synced": synced,
            "new_plugins_created": created,
            "site_results": site_results,
        },
    }))
}

async fn update_debug_settings(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<DebugSettingsRequest>,
) -> impl Responder {
    let user = match authenticate(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let site = match load_accessible_site(&state, &user, &body.site_id) {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    let settings = DebugSettings {
        wp_debug: body.wp_debug,
        wp_debug_log: body.wp_debug_log,
        wp_debug_display: body.wp_debug_display,
    };
    if let Err(e) = state.connector.update_debug_settings(&site, settings).await {
        return connector_error(&e);
    }

    let mut health_check = match site.health_check {
        serde_json::Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };
    health_check.insert(
        "debug_settings".to_string(),
        serde_json::json!({
            "wp_debug": settings.wp_debug,
            "wp_debug_log": settings.wp_debug_log,
            "wp_debug_display": settings.wp_debug_display,
            "updated_at": Utc::now(),
        }),
    );
    if let Err(e) = state
        .db
        .save_site_health_check(&site.id, &serde_json::Value::Object(health_check))
    {
        return db_error("Failed to store debug settings", e);
    }

    record_activity(
        &state,
        &user,
        "debug_settings_updated",
        "site",
        Some(&site.id),
        serde_json::to_string(&settings).ok(),
    );
    HttpResponse::Ok().json(serde_json::json!({ "success": true, "debug_settings": settings }))
}

async fn list_site_plugins(state: web::Data<AppState>, req: HttpRequest, path: web::Path<String>) -> impl Responder {
    let user = match authenticate(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let site = match load_accessible_site(&state, &user, &path.into_inner()) {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    match state.connector.list_plugins(&site).await {
        Ok(plugins) => HttpResponse::Ok().json(serde_json::json!({ "success": true, "plugins": plugins })),
        Err(e) => connector_error(&e),
    }
}

async fn list_site_themes(state: web::Data<AppState>, req: HttpRequest, path: web::Path<String>) -> impl Responder {
    let user = match authenticate(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let site = match load_accessible_site(&state, &user, &path.into_inner()) {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    match state.connector.list_themes(&site).await {
        Ok(themes) => HttpResponse::Ok().json(serde_json::json!({ "success": true, "themes": themes })),
        Err(e) => connector_error(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controllers::test_support::{app_state, seed_user};
    use crate::models::UserRole;
    use actix_web::{test, App};
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[actix_web::test]
    async fn test_normalize_site_url() {
        assert_eq!(normalize_site_url("https://blog.example/").unwrap(), "https://blog.example");
        assert_eq!(normalize_site_url(" http://a.example/wp/ ").unwrap(), "http://a.example/wp");
        assert!(normalize_site_url("ftp://a.example").is_err());
        assert!(normalize_site_url("not a url").is_err());
    }

    #[actix_web::test]
    async fn test_create_rejects_duplicate_url_and_hides_foreign_sites() {
        let state = app_state();
        let (_, auth) = seed_user(&state.db, "owner@example.com", UserRole::User);
        let (_, other) = seed_user(&state.db, "other@example.com", UserRole::User);
        let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(config)).await;

        let req = test::TestRequest::post()
            .uri("/api/sites")
            .insert_header(("Authorization", auth.clone()))
            .set_json(json!({ "name": "Blog", "url": "https://blog.example/" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: serde_json::Value = test::read_body_json(resp).await;
        let site_id = body["site"]["id"].as_str().unwrap().to_string();
        assert_eq!(body["site"]["url"], "https://blog.example");
        assert_eq!(body["site"]["api_key"].as_str().unwrap().len(), 64);

        let req = test::TestRequest::post()
            .uri("/api/sites")
            .insert_header(("Authorization", other.clone()))
            .set_json(json!({ "name": "Copy", "url": "https://blog.example" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CONFLICT);

        let req = test::TestRequest::get()
            .uri(&format!("/api/sites/{}", site_id))
            .insert_header(("Authorization", other.clone()))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

        let req = test::TestRequest::delete()
            .uri(&format!("/api/sites/{}", site_id))
            .insert_header(("Authorization", other))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

        let req = test::TestRequest::delete()
            .uri(&format!("/api/sites/{}", site_id))
            .insert_header(("Authorization", auth))
            .to_request();
        assert!(test::call_service(&app, req).await.status().is_success());
    }

    #[actix_web::test]
    async fn test_connection_success_and_failure_update_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/wp-json/wphub/v1/ping"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true, "message": "pong", "wp_version": "6.4.2", "site_name": "Blog"
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/wp-json/wphub/v1/ping"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "code": "rest_forbidden", "message": "Forbidden"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/wp-json/wphub/v1/listPlugins"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "plugins": [{ "name": "SEO", "slug": "seo", "status": "active" }]
            })))
            .mount(&server)
            .await;

        let state = app_state();
        let (user, auth) = seed_user(&state.db, "owner@example.com", UserRole::User);
        let site = state
            .db
            .create_site("Blog", &server.uri(), "key", OwnerType::User, &user.id)
            .unwrap();
        let db = state.db.clone();
        let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(config)).await;

        let req = test::TestRequest::post()
            .uri("/api/sites/test-connection")
            .insert_header(("Authorization", auth.clone()))
            .set_json(json!({ "site_id": site.id }))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["plugins_count"], 1);
        let stored = db.get_site(&site.id).unwrap().unwrap();
        assert_eq!(stored.status, SiteStatus::Active);
        assert_eq!(stored.wp_version.as_deref(), Some("6.4.2"));
        assert!(stored.last_connection.is_some());

        let req = test::TestRequest::post()
            .uri("/api/sites/test-connection")
            .insert_header(("Authorization", auth))
            .set_json(json!({ "site_id": site.id }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().starts_with("API key is incorrect"));
        assert_eq!(db.get_site(&site.id).unwrap().unwrap().status, SiteStatus::Error);
    }

    #[actix_web::test]
    async fn test_sync_keeps_library_links_and_debug_settings_are_stored() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/wp-json/wphub/v1/getWordPressVersion"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true, "version": "6.5", "php_version": "8.2"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/wp-json/wphub/v1/listPlugins"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "plugins": [
                    { "name": "SEO", "slug": "seo", "version": "2.0", "status": "active" },
                    { "name": "Cache", "slug": "cache", "version": "1.1", "status": "inactive" }
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/wp-json/wphub/v1/updateDebugSettings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
            .mount(&server)
            .await;

        let state = app_state();
        let (user, auth) = seed_user(&state.db, "owner@example.com", UserRole::User);
        let site = state
            .db
            .create_site("Blog", &server.uri(), "key", OwnerType::User, &user.id)
            .unwrap();
        state
            .db
            .save_site_plugins(
                &site.id,
                &[SitePluginEntry {
                    plugin_id: Some("lib-seo".to_string()),
                    slug: "seo".to_string(),
                    name: None,
                    version: Some("1.0".to_string()),
                    is_installed: true,
                    is_activated: true,
                }],
            )
            .unwrap();
        let db = state.db.clone();
        let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(config)).await;

        let req = test::TestRequest::post()
            .uri("/api/sites/sync")
            .insert_header(("Authorization", auth.clone()))
            .set_json(json!({ "site_id": site.id }))
            .to_request();
        assert!(test::call_service(&app, req).await.status().is_success());

        let stored = db.get_site(&site.id).unwrap().unwrap();
        assert_eq!(stored.wp_version.as_deref(), Some("6.5"));
        assert_eq!(stored.plugins.len(), 2);
        assert_eq!(stored.plugins[0].plugin_id.as_deref(), Some("lib-seo"));
        assert_eq!(stored.plugins[0].version.as_deref(), Some("2.0"));
        assert!(!stored.plugins[1].is_activated);

        let req = test::TestRequest::post()
            .uri("/api/sites/debug-settings")
            .insert_header(("Authorization", auth))
            .set_json(json!({ "site_id": site.id, "wp_debug": true, "wp_debug_log": true }))
            .to_request();
        assert!(test::call_service(&app, req).await.status().is_success());

        let stored = db.get_site(&site.id).unwrap().unwrap();
        assert_eq!(stored.health_check["debug_settings"]["wp_debug"], true);
        assert_eq!(stored.health_check["debug_settings"]["wp_debug_display"], false);
        let logs = db.list_activity(Some("owner@example.com"), 10).unwrap();
        assert!(logs.iter().any(|l| l.action == "debug_settings_updated"));
    }

    #[actix_web::test]
    async fn test_sync_all_links_library_and_reports_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/good/wp-json/wphub/v1/listPlugins"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "plugins": [
                    { "name": "SEO", "slug": "seo", "version": "2.0", "status": "active" },
                    { "name": "Forms", "slug": "forms", "version": "3.1", "status": "inactive" }
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/down/wp-json/wphub/v1/listPlugins"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({ "code": "invalid_api_key", "message": "Bad key" })))
            .mount(&server)
            .await;

        let state = app_state();
        let (_, admin_auth) = seed_user(&state.db, "admin@example.com", UserRole::Admin);
        let (user, user_auth) = seed_user(&state.db, "owner@example.com", UserRole::User);
        let existing = state
            .db
            .create_plugin(
                &CreatePluginRequest {
                    name: "SEO".to_string(),
                    slug: "seo".to_string(),
                    description: None,
                    is_public: false,
                    latest_version: None,
                    download_url: None,
                },
                &user.id,
            )
            .unwrap();
        let good = state
            .db
            .create_site("Good", &format!("{}/good", server.uri()), "k1", OwnerType::User, &user.id)
            .unwrap();
        let down = state
            .db
            .create_site("Down", &format!("{}/down", server.uri()), "k2", OwnerType::User, &user.id)
            .unwrap();
        let db = state.db.clone();
        let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(config)).await;

        let req = test::TestRequest::post()
            .uri("/api/sites/sync-all")
            .insert_header(("Authorization", user_auth))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

        let req = test::TestRequest::post()
            .uri("/api/sites/sync-all")
            .insert_header(("Authorization", admin_auth))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        let results = &body["results"];
        assert_eq!(results["total_sites"], 2);
        assert_eq!(results["successful_sites"], 1);
        assert_eq!(results["failed_sites"], 1);
        assert_eq!(results["total_plugins_synced"], 2);
        assert_eq!(results["new_plugins_created"], 1);
        let down_result = results["site_results"]
            .as_array()
            .unwrap()
            .iter()
            .find(|r| r["site_id"] == down.id.as_str())
            .unwrap()
            .clone();
        assert_eq!(down_result["status"], "failed");
        assert!(down_result["error"].as_str().unwrap().starts_with("API key is incorrect"));

        let stored = db.get_site(&good.id).unwrap().unwrap();
        assert_eq!(stored.status, SiteStatus::Active);
        assert_eq!(stored.plugins[0].plugin_id.as_deref(), Some(existing.id.as_str()));
        let forms = db.find_owned_plugin_by_slug("forms", OwnerType::User, &user.id).unwrap().unwrap();
        assert_eq!(stored.plugins[1].plugin_id.as_deref(), Some(forms.id.as_str()));
        assert!(forms.is_installed_on(&good.id));
        assert!(db.get_plugin(&existing.id).unwrap().unwrap().is_installed_on(&good.id));
        assert_eq!(db.get_site(&down.id).unwrap().unwrap().status, SiteStatus::Inactive);
    }
}
