use actix_web::{http::StatusCode, web, HttpRequest, HttpResponse, Responder};

use crate::controllers::plugins::SLUG_RE;
use crate::controllers::{
    connector_error, db_error, directory_error, error_json, is_owner_or_member, load_accessible_site,
    record_activity, DirectorySearchQuery,
};
use crate::integrations::directory::SearchPage;
use crate::middleware::session_auth::authenticate;
use crate::models::{
    add_installation, remove_installation, wordpress_org_theme_url, CreateThemeRequest, InstallThemeRequest, Theme,
    ThemeActionRequest, User,
};
use crate::AppState;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/themes")
            .route("", web::get().to(list_themes))
            .route("", web::post().to(create_theme))
            .route("/search", web::get().to(search_directory))
            .route("/install", web::post().to(install_theme))
            .route("/uninstall", web::post().to(uninstall_theme))
            .route("/activate", web::post().to(activate_theme)),
    );
}

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
        .search_themes(search, SearchPage::new(query.page, query.per_page))
        .await
    {
        Ok((info, themes)) => HttpResponse::Ok().json(serde_json::json!({
            "success": true,
            "info": {
                "page": info.get("page"),
                "pages": info.get("pages"),
                "results": info.get("results"),
            },
            "themes": themes,
        })),
        Err(e) => directory_error(e),
    }
}

fn resolve_library_theme(
    state: &AppState,
    user: &User,
    theme_id: Option<&str>,
    slug: &str,
) -> Result<Option<Theme>, HttpResponse> {
    let Some(id) = theme_id else {
        return state
            .db
            .find_theme_by_slug(slug, &user.id)
            .map_err(|e| db_error("Failed to look up theme", e));
    };

    let theme = match state.db.get_theme(id) {
        Ok(Some(t)) => t,
        Ok(None) => return Err(error_json(StatusCode::NOT_FOUND, "Theme not found")),
        Err(e) => return Err(db_error("Failed to load theme", e)),
    };
    if !theme.is_public {
        match is_owner_or_member(state, theme.owner_type, &theme.owner_id, user) {
            Ok(true) => {}
            Ok(false) => return Err(error_json(StatusCode::FORBIDDEN, "You do not have access to this theme")),
            Err(e) => return Err(db_error("Failed to check theme access", e)),
        }
    }
    Ok(Some(theme))
}

async fn list_themes(state: web::Data<AppState>, req: HttpRequest) -> impl Responder {
    let user = match authenticate(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    match state.db.list_themes_for_user(&user.id) {
        Ok(themes) => HttpResponse::Ok().json(serde_json::json!({ "themes": themes })),
        Err(e) => db_error("Failed to list themes", e),
    }
}

async fn create_theme(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<CreateThemeRequest>,
) -> impl Responder {
    let user = match authenticate(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    if body.name.trim().is_empty() {
        return error_json(StatusCode::BAD_REQUEST, "Theme name is required");
    }
    if !SLUG_RE.is_match(&body.slug) {
        return error_json(StatusCode::BAD_REQUEST, "Theme slug must be lowercase letters, digits, dashes or underscores");
    }

    match state.db.create_theme(&body, &user.id) {
        Ok(theme) => {
            record_activity(&state, &user, "theme_created", "theme", Some(&theme.id), Some(theme.slug.clone()));
            HttpResponse::Created().json(serde_json::json!({ "success": true, "theme": theme }))
        }
        Err(e) => db_error("Failed to create theme", e),
    }
}

async fn install_theme(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<InstallThemeRequest>,
) -> impl Responder {
    let user = match authenticate(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let site = match load_accessible_site(&state, &user, &body.site_id) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let library = match resolve_library_theme(&state, &user, body.theme_id.as_deref(), &body.theme_slug) {
        Ok(t) => t,
        Err(resp) => return resp,
    };

    // request, then library, then the wordpress.org directory
    let download_url = body
        .download_url
        .clone()
        .filter(|u| !u.trim().is_empty())
        .or_else(|| library.as_ref().and_then(|t| t.download_url.clone()))
        .unwrap_or_else(|| wordpress_org_theme_url(&body.theme_slug));

    if let Err(e) = state
        .connector
        .download_theme(&site, &body.theme_slug, &download_url)
        .await
    {
        return connector_error(&e);
    }

    if let Some(mut theme) = library {
        if add_installation(&mut theme.installed_on, &site.id, theme.latest_version.as_deref()) {
            if let Err(e) = state.db.save_theme_installations(&theme.id, &theme.installed_on) {
                return db_error("Theme installed but the library record could not be updated", e);
            }
        }
    }

    record_activity(
        &state,
        &user,
        "theme_installed",
        "site",
        Some(&site.id),
        Some(body.theme_slug.clone()),
    );
    HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "theme_slug": body.theme_slug,
        "download_url": download_url,
    }))
}

async fn uninstall_theme(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<ThemeActionRequest>,
) -> impl Responder {
    let user = match authenticate(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let site = match load_accessible_site(&state, &user, &body.site_id) {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    if let Err(e) = state.connector.uninstall_theme(&site, &body.theme_slug).await {
        return connector_error(&e);
    }

    let library = match resolve_library_theme(&state, &user, body.theme_id.as_deref(), &body.theme_slug) {
        Ok(t) => t,
        Err(resp) => return resp,
    };
    if let Some(mut theme) = library {
        if remove_installation(&mut theme.installed_on, &site.id) {
            if let Err(e) = state.db.save_theme_installations(&theme.id, &theme.installed_on) {
                return db_error("Theme uninstalled but the library record could not be updated", e);
            }
        }
    }

    record_activity(
        &state,
        &user,
        "theme_uninstalled",
        "site",
        Some(&site.id),
        Some(body.theme_slug.clone()),
    );
    HttpResponse::Ok().json(serde_json::json!({ "success": true }))
}

async fn activate_theme(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<ThemeActionRequest>,
) -> impl Responder {
    let user = match authenticate(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let site = match load_accessible_site(&state, &user, &body.site_id) {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    match state.connector.activate_theme(&site, &body.theme_slug).await {
        Ok(_) => {
            record_activity(
                &state,
                &user,
                "theme_activated",
                "site",
                Some(&site.id),
                Some(body.theme_slug.clone()),
            );
            HttpResponse::Ok().json(serde_json::json!({ "success": true, "active_theme": body.theme_slug }))
        }
        Err(e) => connector_error(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controllers::test_support::{app_state, app_state_with_directory, seed_user};
    use crate::models::{OwnerType, UserRole};
    use actix_web::{test, App};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[actix_web::test]
    async fn test_install_falls_back_to_wordpress_org() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/wp-json/wphub/v1/downloadTheme"))
            .and(body_partial_json(json!({
                "theme_slug": "astra",
                "file_url": "https://downloads.wordpress.org/theme/astra.latest-stable.zip"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
            .expect(1)
            .mount(&server)
            .await;

        let state = app_state();
        let (user, auth) = seed_user(&state.db, "owner@example.com", UserRole::User);
        let site = state
            .db
            .create_site("Blog", &server.uri(), "key", OwnerType::User, &user.id)
            .unwrap();
        let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(config)).await;

        let req = test::TestRequest::post()
            .uri("/api/themes/install")
            .insert_header(("Authorization", auth))
            .set_json(json!({ "site_id": site.id, "theme_slug": "astra" }))
            .to_request();
        assert!(test::call_service(&app, req).await.status().is_success());
    }

    #[actix_web::test]
    async fn test_library_theme_installed_on_tracks_site_once() {
        let server = MockServer::start().await;
        for endpoint in ["downloadTheme", "uninstallTheme"] {
            Mock::given(method("POST"))
                .and(path(format!("/wp-json/wphub/v1/{}", endpoint)))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
                .mount(&server)
                .await;
        }

        let state = app_state();
        let (user, auth) = seed_user(&state.db, "owner@example.com", UserRole::User);
        let site = state
            .db
            .create_site("Blog", &server.uri(), "key", OwnerType::User, &user.id)
            .unwrap();
        let theme = state
            .db
            .create_theme(
                &CreateThemeRequest {
                    name: "Studio".to_string(),
                    slug: "studio".to_string(),
                    description: None,
                    is_public: false,
                    latest_version: Some("1.2.0".to_string()),
                    download_url: Some("https://dl.example/studio.zip".to_string()),
                },
                &user.id,
            )
            .unwrap();
        let db = state.db.clone();
        let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(config)).await;

        for _ in 0..2 {
            let req = test::TestRequest::post()
                .uri("/api/themes/install")
                .insert_header(("Authorization", auth.clone()))
                .set_json(json!({ "site_id": site.id, "theme_slug": "studio" }))
                .to_request();
            assert!(test::call_service(&app, req).await.status().is_success());
        }
        assert_eq!(db.get_theme(&theme.id).unwrap().unwrap().installed_on.len(), 1);

        let req = test::TestRequest::post()
            .uri("/api/themes/uninstall")
            .insert_header(("Authorization", auth))
            .set_json(json!({ "site_id": site.id, "theme_slug": "studio", "theme_id": theme.id }))
            .to_request();
        assert!(test::call_service(&app, req).await.status().is_success());
        assert!(db.get_theme(&theme.id).unwrap().unwrap().installed_on.is_empty());
    }

    #[actix_web::test]
    async fn test_activate_relays_connector_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/wp-json/wphub/v1/activateTheme"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": false, "message": "Theme not installed"
            })))
            .mount(&server)
            .await;

        let state = app_state();
        let (user, auth) = seed_user(&state.db, "owner@example.com", UserRole::User);
        let site = state
            .db
            .create_site("Blog", &server.uri(), "key", OwnerType::User, &user.id)
            .unwrap();
        let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(config)).await;

        let req = test::TestRequest::post()
            .uri("/api/themes/activate")
            .insert_header(("Authorization", auth))
            .set_json(json!({ "site_id": site.id, "theme_slug": "ghost" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "Theme not installed");
    }

    #[actix_web::test]
    async fn test_directory_search() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/themes/info/1.2/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "info": { "page": 1, "pages": 1, "results": 1 },
                "themes": [ { "name": "Twenty", "slug": "twenty", "version": "2.0", "author": "wordpressdotorg" } ]
            })))
            .mount(&server)
            .await;

        let state = app_state_with_directory(&server.uri());
        let (_, auth) = seed_user(&state.db, "u@example.com", UserRole::User);
        let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(config)).await;

        let req = test::TestRequest::get()
            .uri("/api/themes/search")
            .insert_header(("Authorization", auth.clone()))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::get()
            .uri("/api/themes/search?search=twenty")
            .insert_header(("Authorization", auth))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["info"]["results"], 1);
        assert_eq!(body["themes"][0]["author"], "wordpressdotorg");
        assert_eq!(body["themes"][0]["download_url"], "https://downloads.wordpress.org/theme/twenty.2.0.zip");
    }
}
