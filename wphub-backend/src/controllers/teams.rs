use actix_web::{http::StatusCode, web, HttpRequest, HttpResponse, Responder};

use crate::controllers::{db_error, error_json, record_activity};
use crate::middleware::session_auth::authenticate;
use crate::models::{AddMemberRequest, CreateTeamRequest, Team, User, ADMIN_ROLE, OWNER_ROLE};
use crate::AppState;

const MEMBER_ROLE: &str = "Member";

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/teams")
            .route("", web::get().to(list_teams))
            .route("", web::post().to(create_team))
            .route("/{id}/members", web::get().to(list_members))
            .route("/{id}/members", web::post().to(add_member))
            .route("/{id}/roles", web::get().to(list_roles))
            .route("/{id}/default-roles", web::post().to(install_default_roles)),
    );
}

enum TeamAccess {
    Manager,
    Member,
}

/// Load a team and the caller's standing in it; non-members get 403
fn load_team(state: &AppState, user: &User, team_id: &str) -> Result<(Team, TeamAccess), HttpResponse> {
    let team = match state.db.get_team(team_id) {
        Ok(Some(t)) => t,
        Ok(None) => return Err(error_json(StatusCode::NOT_FOUND, "Team not found")),
        Err(e) => return Err(db_error("Failed to load team", e)),
    };
    if team.owner_id == user.id {
        return Ok((team, TeamAccess::Manager));
    }

    let member = match state.db.get_team_member(&team.id, &user.id) {
        Ok(Some(m)) => m,
        Ok(None) => return Err(error_json(StatusCode::FORBIDDEN, "You are not a member of this team")),
        Err(e) => return Err(db_error("Failed to check team membership", e)),
    };
    let role = match member.role_id.as_deref().map(|id| state.db.get_team_role(id)) {
        Some(Ok(role)) => role,
        Some(Err(e)) => return Err(db_error("Failed to load team role", e)),
        None => None,
    };

    let access = match role {
        Some(r) if r.name == OWNER_ROLE || r.name == ADMIN_ROLE => TeamAccess::Manager,
        _ => TeamAccess::Member,
    };
    Ok((team, access))
}

async fn list_teams(state: web::Data<AppState>, req: HttpRequest) -> impl Responder {
    let user = match authenticate(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    match state.db.list_teams_for_user(&user.id) {
        Ok(teams) => HttpResponse::Ok().json(serde_json::json!({ "teams": teams })),
        Err(e) => db_error("Failed to list teams", e),
    }
}

async fn create_team(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<CreateTeamRequest>,
) -> impl Responder {
    let user = match authenticate(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    let name = body.name.trim();
    if name.is_empty() {
        return error_json(StatusCode::BAD_REQUEST, "Team name is required");
    }

    let team = match state.db.create_team(name, body.description.as_deref(), &user.id) {
        Ok(t) => t,
        Err(e) => return db_error("Failed to create team", e),
    };
    let roles = match state.db.ensure_default_roles(&team.id) {
        Ok(r) => r,
        Err(e) => return db_error("Failed to create team roles", e),
    };

    let owner_role = roles.iter().find(|r| r.name == OWNER_ROLE).map(|r| r.id.as_str());
    if let Err(e) = state.db.add_team_member(&team.id, &user.id, owner_role) {
        return db_error("Failed to add team owner", e);
    }

    record_activity(&state, &user, "team_created", "team", Some(&team.id), Some(team.name.clone()));
    HttpResponse::Created().json(serde_json::json!({ "success": true, "team": team, "roles": roles }))
}

async fn list_members(state: web::Data<AppState>, req: HttpRequest, path: web::Path<String>) -> impl Responder {
    let user = match authenticate(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let (team, _) = match load_team(&state, &user, &path.into_inner()) {
        Ok(t) => t,
        Err(resp) => return resp,
    };

    match state.db.list_team_members(&team.id) {
        Ok(members) => HttpResponse::Ok().json(serde_json::json!({ "members": members })),
        Err(e) => db_error("Failed to list team members", e),
    }
}

async fn add_member(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Json<AddMemberRequest>,
) -> impl Responder {
    let user = match authenticate(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let team = match load_team(&state, &user, &path.into_inner()) {
        Ok((team, TeamAccess::Manager)) => team,
        Ok((_, TeamAccess::Member)) => {
            return error_json(StatusCode::FORBIDDEN, "Only team owners and admins can add members");
        }
        Err(resp) => return resp,
    };

    let invitee = match state.db.get_user_by_email(body.email.trim()) {
        Ok(Some(u)) => u,
        Ok(None) => return error_json(StatusCode::NOT_FOUND, "User not found"),
        Err(e) => return db_error("Failed to look up user", e),
    };
    match state.db.is_team_member(&team.id, &invitee.id) {
        Ok(true) => return error_json(StatusCode::CONFLICT, "User is already a member of this team"),
        Ok(false) => {}
        Err(e) => return db_error("Failed to check team membership", e),
    }

    let role_id = match &body.role_id {
        Some(role_id) => match state.db.get_team_role(role_id) {
            Ok(Some(role)) if role.team_id == team.id => role.id,
            Ok(_) => return error_json(StatusCode::BAD_REQUEST, "Role does not belong to this team"),
            Err(e) => return db_error("Failed to load team role", e),
        },
        None => match state.db.ensure_default_roles(&team.id) {
            Ok(roles) => match roles.into_iter().find(|r| r.name == MEMBER_ROLE) {
                Some(role) => role.id,
                None => return db_error("Failed to resolve default role", "Member role missing"),
            },
            Err(e) => return db_error("Failed to load team roles", e),
        },
    };

    match state.db.add_team_member(&team.id, &invitee.id, Some(&role_id)) {
        Ok(member) => {
            record_activity(
                &state,
                &user,
                "team_member_added",
                "team",
                Some(&team.id),
                Some(invitee.email.clone()),
            );
            HttpResponse::Created().json(serde_json::json!({ "success": true, "member": member }))
        }
        Err(e) => db_error("Failed to add team member", e),
    }
}

async fn list_roles(state: web::Data<AppState>, req: HttpRequest, path: web::Path<String>) -> impl Responder {
    let user = match authenticate(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let (team, _) = match load_team(&state, &user, &path.into_inner()) {
        Ok(t) => t,
        Err(resp) => return resp,
    };

    match state.db.list_team_roles(&team.id) {
        Ok(roles) => HttpResponse::Ok().json(serde_json::json!({ "roles": roles })),
        Err(e) => db_error("Failed to list team roles", e),
    }
}

/// Safe to repeat; only missing default roles are created
async fn install_default_roles(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
) -> impl Responder {
    let user = match authenticate(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let team = match load_team(&state, &user, &path.into_inner()) {
        Ok((team, TeamAccess::Manager)) => team,
        Ok((_, TeamAccess::Member)) => {
            return error_json(StatusCode::FORBIDDEN, "Only team owners and admins can manage roles");
        }
        Err(resp) => return resp,
    };

    match state.db.ensure_default_roles(&team.id) {
        Ok(roles) => {
            record_activity(&state, &user, "team_default_roles_ensured", "team", Some(&team.id), None);
            HttpResponse::Ok().json(serde_json::json!({ "success": true, "roles": roles }))
        }
        Err(e) => db_error("Failed to create default roles", e),
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
    async fn test_create_team_installs_roles_and_owner() {
        let state = app_state();
        let (user, auth) = seed_user(&state.db, "owner@example.com", UserRole::User);
        let db = state.db.clone();
        let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(config)).await;

        let req = test::TestRequest::post()
            .uri("/api/teams")
            .insert_header(("Authorization", auth.clone()))
            .set_json(json!({ "name": "Agency" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: serde_json::Value = test::read_body_json(resp).await;
        let team_id = body["team"]["id"].as_str().unwrap().to_string();
        assert_eq!(body["roles"].as_array().unwrap().len(), 4);

        let member = db.get_team_member(&team_id, &user.id).unwrap().unwrap();
        let role = db.get_team_role(member.role_id.as_deref().unwrap()).unwrap().unwrap();
        assert_eq!(role.name, OWNER_ROLE);

        // repeating is a no-op
        let req = test::TestRequest::post()
            .uri(&format!("/api/teams/{}/default-roles", team_id))
            .insert_header(("Authorization", auth))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["roles"].as_array().unwrap().len(), 4);
        assert_eq!(db.list_team_roles(&team_id).unwrap().len(), 4);
    }

    #[actix_web::test]
    async fn test_only_managers_add_members() {
        let state = app_state();
        let (owner, owner_auth) = seed_user(&state.db, "owner@example.com", UserRole::User);
        let (_, member_auth) = seed_user(&state.db, "member@example.com", UserRole::User);
        let (_, outsider_auth) = seed_user(&state.db, "outsider@example.com", UserRole::User);
        seed_user(&state.db, "new@example.com", UserRole::User);
        let team = state.db.create_team("Agency", None, &owner.id).unwrap();
        state.db.ensure_default_roles(&team.id).unwrap();
        let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(config)).await;

        let add = |auth: &str, email: &str| {
            test::TestRequest::post()
                .uri(&format!("/api/teams/{}/members", team.id))
                .insert_header(("Authorization", auth.to_string()))
                .set_json(json!({ "email": email }))
                .to_request()
        };

        assert_eq!(
            test::call_service(&app, add(&owner_auth, "member@example.com")).await.status(),
            StatusCode::CREATED
        );
        assert_eq!(
            test::call_service(&app, add(&owner_auth, "member@example.com")).await.status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            test::call_service(&app, add(&owner_auth, "ghost@example.com")).await.status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            test::call_service(&app, add(&member_auth, "new@example.com")).await.status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            test::call_service(&app, add(&outsider_auth, "new@example.com")).await.status(),
            StatusCode::FORBIDDEN
        );

        let req = test::TestRequest::get()
            .uri(&format!("/api/teams/{}/roles", team.id))
            .insert_header(("Authorization", member_auth))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["roles"][3]["name"], "Member");
    }
}
