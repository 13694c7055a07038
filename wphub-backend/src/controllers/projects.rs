use actix_web::{http::StatusCode, web, HttpRequest, HttpResponse, Responder};

use crate::controllers::{db_error, error_json, load_accessible_site, record_activity};
use crate::middleware::session_auth::authenticate;
use crate::models::{CreateProjectRequest, OwnerType};
use crate::AppState;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/projects")
            .route("", web::get().to(list_projects))
            .route("", web::post().to(create_project)),
    );
}

async fn list_projects(state: web::Data<AppState>, req: HttpRequest) -> impl Responder {
    let user = match authenticate(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    match state.db.list_projects_for_user(&user.id) {
        Ok(projects) => HttpResponse::Ok().json(serde_json::json!({ "projects": projects })),
        Err(e) => db_error("Failed to list projects", e),
    }
}

async fn create_project(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<CreateProjectRequest>,
) -> impl Responder {
    let user = match authenticate(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    let name = body.name.trim();
    if name.is_empty() {
        return error_json(StatusCode::BAD_REQUEST, "Project name is required");
    }

    if let Some(site_id) = &body.site_id {
        if let Err(resp) = load_accessible_site(&state, &user, site_id) {
            return resp;
        }
    }

    let (owner_type, owner_id) = match &body.team_id {
        Some(team_id) => match state.db.is_team_member(team_id, &user.id) {
            Ok(true) => (OwnerType::Team, team_id.clone()),
            Ok(false) => return error_json(StatusCode::FORBIDDEN, "You are not a member of this team"),
            Err(e) => return db_error("Failed to check team membership", e),
        },
        None => (OwnerType::User, user.id.clone()),
    };

    match state.db.create_project(
        name,
        body.description.as_deref(),
        owner_type,
        &owner_id,
        body.site_id.as_deref(),
    ) {
        Ok(project) => {
            record_activity(&state, &user, "project_created", "project", Some(&project.id), Some(project.name.clone()));
            HttpResponse::Created().json(serde_json::json!({ "success": true, "project": project }))
        }
        Err(e) => db_error("Failed to create project", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controllers::test_support::{app_state, seed_user};
    use crate::models::UserRole;
    use actix_web::{test, App};
    use serde_json::json;

    #[actix_web::test]
    async fn test_project_scoping() {
        let state = app_state();
        let (owner, auth) = seed_user(&state.db, "owner@example.com", UserRole::User);
        let (_, other) = seed_user(&state.db, "other@example.com", UserRole::User);
        let site = state
            .db
            .create_site("Blog", "https://blog.example", "key", OwnerType::User, &owner.id)
            .unwrap();
        let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(config)).await;

        let req = test::TestRequest::post()
            .uri("/api/projects")
            .insert_header(("Authorization", other.clone()))
            .set_json(json!({ "name": "Redesign", "site_id": site.id }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

        let req = test::TestRequest::post()
            .uri("/api/projects")
            .insert_header(("Authorization", auth.clone()))
            .set_json(json!({ "name": "Redesign", "site_id": site.id }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);

        for (token, expected) in [(auth, 1), (other, 0)] {
            let req = test::TestRequest::get()
                .uri("/api/projects")
                .insert_header(("Authorization", token))
                .to_request();
            let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
            assert_eq!(body["projects"].as_array().unwrap().len(), expected);
        }
    }
}
