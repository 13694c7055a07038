use actix_web::{http::StatusCode, web, HttpRequest, HttpResponse, Responder};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::controllers::{
    connector_error, db_error, directory_error, error_json, is_owner_or_member, load_accessible_site,
    record_activity, DirectorySearchQuery,
};
use crate::integrations::directory::SearchPage;
use crate::middleware::session_auth::authenticate;
use crate::models::{
    add_installation, remove_installation, CreatePluginRequest, InstallPluginRequest, Plugin, SitePluginEntry,
    TogglePluginRequest, UninstallPluginRequest, User,
};
use crate::AppState;

/// WordPress directory slugs: lowercase words joined by dashes or underscores
pub(crate) static SLUG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9_-]*$").unwrap());

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/plugins")
            .route("", web::get().to(list_plugins))
            .route("", web::post().to(create_plugin))
            .route("/search", web::get().to(search_directory))
            .route("/install", web::post().to(install_plugin))
            .route("/uninstall", web::post().to(uninstall_plugin))
            .route("/toggle", web::post().to(toggle_plugin)),
    );
}

/// Library row named by id, or the caller's (or a public) plugin with the slug
fn resolve_library_plugin(
    state: &AppState,
    user: &User,
    plugin_id: Option<&str>,
    slug: &str,
) -> Result<Option<Plugin>, HttpResponse> {
    let Some(id) = plugin_id else {
        return state
            .db
            .find_plugin_by_slug(slug, &user.id)
            .map_err(|e| db_error("Failed to look up plugin", e));
    };

    let plugin = match state.db.get_plugin(id) {
        Ok(Some(p)) => p,
        Ok(None) => return Err(error_json(StatusCode::NOT_FOUND, "Plugin not found")),
        Err(e) => return Err(db_error("Failed to load plugin", e)),
    };
    if !plugin.is_public {
        match is_owner_or_member(state, plugin.owner_type, &plugin.owner_id, user) {
            Ok(true) => {}
            Ok(false) => return Err(error_json(StatusCode::FORBIDDEN, "You do not have access to this plugin")),
            Err(e) => return Err(db_error("Failed to check plugin access", e)),
        }
    }
    Ok(Some(plugin))
}

async fn list_plugins(state: web::Data<AppState>, req: HttpRequest) -> impl Responder {
    let user = match authenticate(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    match state.db.list_plugins_for_user(&user.id) {
        Ok(plugins) => HttpResponse::Ok().json(serde_json::json!({ "plugins": plugins })),
        Err(e) => db_error("Failed to list plugins", e),
    }
}

/// Search the wordpress.org plugin directory
async fn search_directory(
    state: web::Data<AppState>,
    req: HttpRequest,
    query: web::Query<DirectorySearchQuery>,
) -> impl Responder {
    if let Err(resp) = authenticate(&state.db, &req) {
        return resp;
    }
    let search = match query.search_text() {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    match state
        .directory
        .search_plugins(search, SearchPage::new(query.page, query.per_page))
        .await
    {
        Ok((info, plugins)) => HttpResponse::Ok().json(serde_json::json!({
            "success": true,
            "info": info,
            "plugins": plugins,
        })),
        Err(e) => directory_error(e),
    }
}

async fn create_plugin(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<CreatePluginRequest>,
) -> impl Responder {
    let user = match authenticate(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    if body.name.trim().is_empty() {
        return error_json(StatusCode::BAD_REQUEST, "Plugin name is required");
    }
    if !SLUG_RE.is_match(&body.slug) {
        return error_json(StatusCode::BAD_REQUEST, "Plugin slug must be lowercase letters, digits, dashes or underscores");
    }
    match state.db.find_plugin_by_slug(&body.slug, &user.id) {
        Ok(Some(existing)) if existing.owner_id == user.id => {
            return error_json(StatusCode::CONFLICT, "You already have a plugin with this slug");
        }
        Ok(_) => {}
        Err(e) => return db_error("Failed to look up plugin", e),
    }

    match state.db.create_plugin(&body, &user.id) {
        Ok(plugin) => {
            record_activity(&state, &user, "plugin_created", "plugin", Some(&plugin.id), Some(plugin.slug.clone()));
            HttpResponse::Created().json(serde_json::json!({ "success": true, "plugin": plugin }))
        }
        Err(e) => db_error("Failed to create plugin", e),
    }
}

async fn install_plugin(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<InstallPluginRequest>,
) -> impl Responder {
    let user = match authenticate(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let mut site = match load_accessible_site(&state, &user, &body.site_id) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let library = match resolve_library_plugin(&state, &user, body.plugin_id.as_deref(), &body.plugin_slug) {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    let download_url = body
        .download_url
        .clone()
        .filter(|u| !u.trim().is_empty())
        .or_else(|| library.as_ref().and_then(|p| p.download_url.clone()));
    let Some(download_url) = download_url else {
        return error_json(StatusCode::BAD_REQUEST, "No download URL available for this plugin");
    };

    let response = match state
        .connector
        .install_plugin(&site, &body.plugin_slug, &download_url)
        .await
    {
        Ok(v) => v,
        Err(e) => return connector_error(&e),
    };

    let version = response
        .get("version")
        .and_then(|v| v.as_str())
        .map(String::from)
        .or_else(|| library.as_ref().and_then(|p| p.latest_version.clone()));

    site.upsert_plugin(SitePluginEntry {
        plugin_id: library.as_ref().map(|p| p.id.clone()),
        slug: body.plugin_slug.clone(),
        name: library.as_ref().map(|p| p.name.clone()),
        version: version.clone(),
        is_installed: true,
        is_activated: true,
    });
    if let Err(e) = state.db.save_site_plugins(&site.id, &site.plugins) {
        return db_error("Plugin installed but the site record could not be updated", e);
    }

    if let Some(mut plugin) = library {
        if add_installation(&mut plugin.installed_on, &site.id, version.as_deref()) {
            if let Err(e) = state.db.save_plugin_installations(&plugin.id, &plugin.installed_on) {
                return db_error("Plugin installed but the library record could not be updated", e);
            }
        }
    }

    record_activity(
        &state,
        &user,
        "plugin_installed",
        "site",
        Some(&site.id),
        Some(body.plugin_slug.clone()),
    );
    HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "message": response.get("message").and_then(|m| m.as_str()).unwrap_or("Plugin installed"),
        "plugins": site.plugins,
    }))
}

async fn uninstall_plugin(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<UninstallPluginRequest>,
) -> impl Responder {
    let user = match authenticate(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let mut site = match load_accessible_site(&state, &user, &body.site_id) {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    if let Err(e) = state.connector.uninstall_plugin(&site, &body.plugin_slug).await {
        return connector_error(&e);
    }

    let library_id = body.plugin_id.clone().or_else(|| {
        site.plugins
            .iter()
            .find(|p| p.slug == body.plugin_slug)
            .and_then(|p| p.plugin_id.clone())
    });

    if site.remove_plugin(&body.plugin_slug) {
        if let Err(e) = state.db.save_site_plugins(&site.id, &site.plugins) {
            return db_error("Plugin uninstalled but the site record could not be updated", e);
        }
    }

    if let Some(id) = library_id {
        match state.db.get_plugin(&id) {
            Ok(Some(mut plugin)) => {
                if remove_installation(&mut plugin.installed_on, &site.id) {
                    if let Err(e) = state.db.save_plugin_installations(&plugin.id, &plugin.installed_on) {
                        return db_error("Plugin uninstalled but the library record could not be updated", e);
                    }
                }
            }
            Ok(None) => log::debug!("Library plugin {} is gone; nothing to unlink", id),
            Err(e) => return db_error("Failed to load plugin", e),
        }
    }

    record_activity(
        &state,
        &user,
        "plugin_uninstalled",
        "site",
        Some(&site.id),
        Some(body.plugin_slug.clone()),
    );
    HttpResponse::Ok().json(serde_json::json!({ "success": true, "plugins": site.plugins }))
}

async fn toggle_plugin(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<TogglePluginRequest>,
) -> impl Responder {
    let user = match authenticate(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let mut site = match load_accessible_site(&state, &user, &body.site_id) {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    let new_status = match state.connector.toggle_plugin(&site, &body.plugin_slug).await {
        Ok(s) => s,
        Err(e) => return connector_error(&e),
    };
    let activated = new_status == "active";

    if !site.set_plugin_activated(&body.plugin_slug, activated) {
        // installed outside WP Hub; start tracking it
        site.upsert_plugin(SitePluginEntry {
            plugin_id: None,
            slug: body.plugin_slug.clone(),
            name: None,
            version: None,
            is_installed: true,
            is_activated: activated,
        });
    }
    if let Err(e) = state.db.save_site_plugins(&site.id, &site.plugins) {
        return db_error("Plugin toggled but the site record could not be updated", e);
    }

    let action = if activated { "plugin_activated" } else { "plugin_deactivated" };
    record_activity(&state, &user, action, "site", Some(&site.id), Some(body.plugin_slug.clone()));
    HttpResponse::Ok().json(serde_json::json!({ "success": true, "new_status": new_status }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controllers::test_support::{app_state, app_state_with_directory, seed_user};
    use crate::models::{OwnerType, UserRole};
    use actix_web::{test, App};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn library_plugin(download_url: Option<&str>) -> CreatePluginRequest {
        CreatePluginRequest {
            name: "SEO Toolkit".to_string(),
            slug: "seo-toolkit".to_string(),
            description: None,
            is_public: false,
            latest_version: Some("3.1.0".to_string()),
            download_url: download_url.map(String::from),
        }
    }

    #[actix_web::test]
    async fn test_install_twice_lists_site_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/wp-json/wphub/v1/installPlugin"))
            .and(body_partial_json(json!({ "plugin_slug": "seo-toolkit", "file_url": "https://dl.example/seo.zip" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true, "message": "Installed" })))
            .expect(2)
            .mount(&server)
            .await;

        let state = app_state();
        let (user, auth) = seed_user(&state.db, "owner@example.com", UserRole::User);
        let site = state
            .db
            .create_site("Blog", &server.uri(), "key", OwnerType::User, &user.id)
            .unwrap();
        let plugin = state
            .db
            .create_plugin(&library_plugin(Some("https://dl.example/seo.zip")), &user.id)
            .unwrap();
        let db = state.db.clone();
        let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(config)).await;

        for _ in 0..2 {
            let req = test::TestRequest::post()
                .uri("/api/plugins/install")
                .insert_header(("Authorization", auth.clone()))
                .set_json(json!({ "site_id": site.id, "plugin_slug": "seo-toolkit", "plugin_id": plugin.id }))
                .to_request();
            assert!(test::call_service(&app, req).await.status().is_success());
        }

        let stored = db.get_plugin(&plugin.id).unwrap().unwrap();
        assert_eq!(stored.installed_on.len(), 1);
        assert!(stored.is_installed_on(&site.id));
        let site = db.get_site(&site.id).unwrap().unwrap();
        assert_eq!(site.plugins.len(), 1);
        assert_eq!(site.plugins[0].plugin_id.as_deref(), Some(plugin.id.as_str()));
        assert_eq!(site.plugins[0].version.as_deref(), Some("3.1.0"));
    }

    #[actix_web::test]
    async fn test_install_without_download_url_is_rejected() {
        let state = app_state();
        let (user, auth) = seed_user(&state.db, "owner@example.com", UserRole::User);
        let site = state
            .db
            .create_site("Blog", "https://blog.example", "key", OwnerType::User, &user.id)
            .unwrap();
        state.db.create_plugin(&library_plugin(None), &user.id).unwrap();
        let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(config)).await;

        let req = test::TestRequest::post()
            .uri("/api/plugins/install")
            .insert_header(("Authorization", auth))
            .set_json(json!({ "site_id": site.id, "plugin_slug": "seo-toolkit" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "No download URL available for this plugin");
    }

    #[actix_web::test]
    async fn test_uninstall_and_toggle_update_bookkeeping() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/wp-json/wphub/v1/togglePlugin"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true, "new_status": "inactive"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/wp-json/wphub/v1/uninstallPlugin"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
            .mount(&server)
            .await;

        let state = app_state();
        let (user, auth) = seed_user(&state.db, "owner@example.com", UserRole::User);
        let site = state
            .db
            .create_site("Blog", &server.uri(), "key", OwnerType::User, &user.id)
            .unwrap();
        let mut plugin = state
            .db
            .create_plugin(&library_plugin(Some("https://dl.example/seo.zip")), &user.id)
            .unwrap();
        add_installation(&mut plugin.installed_on, &site.id, Some("3.1.0"));
        state.db.save_plugin_installations(&plugin.id, &plugin.installed_on).unwrap();
        state
            .db
            .save_site_plugins(
                &site.id,
                &[SitePluginEntry {
                    plugin_id: Some(plugin.id.clone()),
                    slug: "seo-toolkit".to_string(),
                    name: None,
                    version: Some("3.1.0".to_string()),
                    is_installed: true,
                    is_activated: true,
                }],
            )
            .unwrap();
        let db = state.db.clone();
        let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(config)).await;

        let req = test::TestRequest::post()
            .uri("/api/plugins/toggle")
            .insert_header(("Authorization", auth.clone()))
            .set_json(json!({ "site_id": site.id, "plugin_slug": "seo-toolkit" }))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["new_status"], "inactive");
        assert!(!db.get_site(&site.id).unwrap().unwrap().plugins[0].is_activated);

        let req = test::TestRequest::post()
            .uri("/api/plugins/uninstall")
            .insert_header(("Authorization", auth))
            .set_json(json!({ "site_id": site.id, "plugin_slug": "seo-toolkit" }))
            .to_request();
        assert!(test::call_service(&app, req).await.status().is_success());

        assert!(db.get_site(&site.id).unwrap().unwrap().plugins.is_empty());
        assert!(db.get_plugin(&plugin.id).unwrap().unwrap().installed_on.is_empty());
    }

    #[actix_web::test]
    async fn test_create_validates_slug_and_rejects_duplicates() {
        let state = app_state();
        let (_, auth) = seed_user(&state.db, "owner@example.com", UserRole::User);
        let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(config)).await;

        let cases = [
            (json!({ "name": "SEO", "slug": "Bad Slug" }), StatusCode::BAD_REQUEST),
            (json!({ "name": "SEO", "slug": "seo" }), StatusCode::CREATED),
            (json!({ "name": "SEO again", "slug": "seo" }), StatusCode::CONFLICT),
        ];
        for (payload, expected) in cases {
            let req = test::TestRequest::post()
                .uri("/api/plugins")
                .insert_header(("Authorization", auth.clone()))
                .set_json(&payload)
                .to_request();
            assert_eq!(test::call_service(&app, req).await.status(), expected, "payload {}", payload);
        }
    }

    #[actix_web::test]
    async fn test_directory_search() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/plugins/info/1.2/"))
            .and(query_param("request[search]", "forms"))
            .and(query_param("request[page]", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "info": { "page": 2, "pages": 4, "results": 80 },
                "plugins": [ { "name": "Form Builder", "slug": "form-builder", "author": "<b>Acme</b>" } ]
            })))
            .mount(&server)
            .await;

        let state = app_state_with_directory(&server.uri());
        let (_, auth) = seed_user(&state.db, "u@example.com", UserRole::User);
        let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(config)).await;

        let req = test::TestRequest::get().uri("/api/plugins/search?search=forms").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);

        let req = test::TestRequest::get()
            .uri("/api/plugins/search?search=%20")
            .insert_header(("Authorization", auth.clone()))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "Search query is required");

        let req = test::TestRequest::get()
            .uri("/api/plugins/search?search=forms&page=2")
            .insert_header(("Authorization", auth))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["info"]["pages"], 4);
        assert_eq!(body["plugins"][0]["slug"], "form-builder");
        assert_eq!(body["plugins"][0]["author"], "Acme");
    }
}
