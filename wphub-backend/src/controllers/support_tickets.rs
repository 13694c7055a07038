use actix_web::{http::StatusCode, web, HttpRequest, HttpResponse, Responder};

use crate::controllers::{db_error, error_json, record_activity};
use crate::middleware::session_auth::{authenticate, require_admin};
use crate::models::{CreateTicketRequest, UpdateTicketStatusRequest};
use crate::AppState;

const PRIORITIES: [&str; 4] = ["low", "normal", "high", "urgent"];

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/support-tickets")
            .route("", web::get().to(list_tickets))
            .route("", web::post().to(create_ticket))
            .route("/{id}/status", web::post().to(update_status)),
    );
}

/// Admins see every ticket, everyone else their own
async fn list_tickets(state: web::Data<AppState>, req: HttpRequest) -> impl Responder {
    let user = match authenticate(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    let scope = if user.is_admin() { None } else { Some(user.id.as_str()) };
    match state.db.list_tickets(scope) {
        Ok(tickets) => HttpResponse::Ok().json(serde_json::json!({ "tickets": tickets })),
        Err(e) => db_error("Failed to list support tickets", e),
    }
}

async fn create_ticket(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<CreateTicketRequest>,
) -> impl Responder {
    let user = match authenticate(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    if body.subject.trim().is_empty() || body.description.trim().is_empty() {
        return error_json(StatusCode::BAD_REQUEST, "Subject and description are required");
    }
    let priority = body.priority.as_deref().unwrap_or("normal");
    if !PRIORITIES.contains(&priority) {
        return error_json(StatusCode::BAD_REQUEST, "Priority must be one of low, normal, high, urgent");
    }

    match state
        .db
        .create_ticket(&user.id, body.subject.trim(), &body.description, priority)
    {
        Ok(ticket) => {
            record_activity(&state, &user, "support_ticket_created", "support_ticket", Some(&ticket.id), None);
            HttpResponse::Created().json(serde_json::json!({ "success": true, "ticket": ticket }))
        }
        Err(e) => db_error("Failed to create support ticket", e),
    }
}

async fn update_status(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Json<UpdateTicketStatusRequest>,
) -> impl Responder {
    let admin = match require_admin(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let id = path.into_inner();

    match state.db.update_ticket_status(&id, body.status) {
        Ok(true) => {
            record_activity(
                &state,
                &admin,
                "support_ticket_status_updated",
                "support_ticket",
                Some(&id),
                Some(body.status.to_string()),
            );
            HttpResponse::Ok().json(serde_json::json!({ "success": true, "status": body.status }))
        }
        Ok(false) => error_json(StatusCode::NOT_FOUND, "Support ticket not found"),
        Err(e) => db_error("Failed to update support ticket", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controllers::test_support::{app_state, seed_user};
    use crate::models::{TicketStatus, UserRole};
    use actix_web::{test, App};
    use serde_json::json;

    #[actix_web::test]
    async fn test_ticket_lifecycle() {
        let state = app_state();
        let (_, user) = seed_user(&state.db, "u@example.com", UserRole::User);
        let (_, admin) = seed_user(&state.db, "admin@example.com", UserRole::Admin);
        let db = state.db.clone();
        let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(config)).await;

        let req = test::TestRequest::post()
            .uri("/api/support-tickets")
            .insert_header(("Authorization", user.clone()))
            .set_json(json!({ "subject": "Broken", "description": "Sync fails", "priority": "critical" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::post()
            .uri("/api/support-tickets")
            .insert_header(("Authorization", user.clone()))
            .set_json(json!({ "subject": "Broken", "description": "Sync fails" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: serde_json::Value = test::read_body_json(resp).await;
        let id = body["ticket"]["id"].as_str().unwrap().to_string();
        assert_eq!(body["ticket"]["priority"], "normal");

        let req = test::TestRequest::post()
            .uri(&format!("/api/support-tickets/{}/status", id))
            .insert_header(("Authorization", user))
            .set_json(json!({ "status": "closed" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

        let req = test::TestRequest::post()
            .uri(&format!("/api/support-tickets/{}/status", id))
            .insert_header(("Authorization", admin.clone()))
            .set_json(json!({ "status": "in_progress" }))
            .to_request();
        assert!(test::call_service(&app, req).await.status().is_success());
        assert_eq!(db.list_tickets(None).unwrap()[0].status, TicketStatus::InProgress);

        let req = test::TestRequest::post()
            .uri("/api/support-tickets/missing/status")
            .insert_header(("Authorization", admin))
            .set_json(json!({ "status": "closed" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
    }
}
