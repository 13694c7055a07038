use actix_web::{http::StatusCode, web, HttpRequest, HttpResponse, Responder};

use crate::controllers::{db_error, error_json, record_activity};
use crate::middleware::session_auth::authenticate;
use crate::models::{MessageCategory, NewMessage, Priority, SendMessageRequest};
use crate::AppState;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/messages")
            .route("", web::get().to(inbox))
            .route("", web::post().to(send_message))
            .route("/sent", web::get().to(sent))
            .route("/{id}/read", web::post().to(mark_message_read)),
    )
    .service(
        web::scope("/api/notifications")
            .route("", web::get().to(list_notifications))
            .route("/{id}/read", web::post().to(mark_notification_read)),
    );
}

async fn inbox(state: web::Data<AppState>, req: HttpRequest) -> impl Responder {
    let user = match authenticate(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    match state.db.list_inbox(&user.id) {
        Ok(messages) => {
            let unread = messages.iter().filter(|m| !m.is_read).count();
            HttpResponse::Ok().json(serde_json::json!({ "messages": messages, "unread": unread }))
        }
        Err(e) => db_error("Failed to list messages", e),
    }
}

async fn sent(state: web::Data<AppState>, req: HttpRequest) -> impl Responder {
    let user = match authenticate(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    match state.db.list_sent_messages(&user.id) {
        Ok(messages) => HttpResponse::Ok().json(serde_json::json!({ "messages": messages })),
        Err(e) => db_error("Failed to list sent messages", e),
    }
}

async fn send_message(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<SendMessageRequest>,
) -> impl Responder {
    let user = match authenticate(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    if body.subject.trim().is_empty() || body.message.trim().is_empty() {
        return error_json(StatusCode::BAD_REQUEST, "Subject and message are required");
    }
    let recipient = match state.db.get_user_by_email(body.recipient_email.trim()) {
        Ok(Some(r)) => r,
        Ok(None) => return error_json(StatusCode::NOT_FOUND, "Recipient not found"),
        Err(e) => return db_error("Failed to look up recipient", e),
    };

    let new = NewMessage {
        subject: body.subject.trim().to_string(),
        message: body.message.clone(),
        sender_id: Some(user.id.clone()),
        sender_email: Some(user.email.clone()),
        sender_name: Some(user.display_name().to_string()),
        recipient_id: recipient.id.clone(),
        recipient_email: recipient.email.clone(),
        priority: body.priority.unwrap_or(Priority::Normal),
        category: MessageCategory::General,
        context: None,
    };

    match state.db.create_message(&new) {
        Ok(message) => {
            record_activity(
                &state,
                &user,
                "message_sent",
                "message",
                Some(&message.id),
                Some(recipient.email.clone()),
            );
            HttpResponse::Created().json(serde_json::json!({ "success": true, "message": message }))
        }
        Err(e) => db_error("Failed to send message", e),
    }
}

async fn mark_message_read(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
) -> impl Responder {
    let user = match authenticate(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    match state.db.mark_message_read(&path.into_inner(), &user.id) {
        Ok(true) => HttpResponse::Ok().json(serde_json::json!({ "success": true })),
        Ok(false) => error_json(StatusCode::NOT_FOUND, "Message not found"),
        Err(e) => db_error("Failed to update message", e),
    }
}

async fn list_notifications(state: web::Data<AppState>, req: HttpRequest) -> impl Responder {
    let user = match authenticate(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    match state.db.list_notifications(&user.id) {
        Ok(notifications) => HttpResponse::Ok().json(serde_json::json!({ "notifications": notifications })),
        Err(e) => db_error("Failed to list notifications", e),
    }
}

async fn mark_notification_read(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
) -> impl Responder {
    let user = match authenticate(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    match state.db.mark_notification_read(&path.into_inner(), &user.id) {
        Ok(true) => HttpResponse::Ok().json(serde_json::json!({ "success": true })),
        Ok(false) => error_json(StatusCode::NOT_FOUND, "Notification not found"),
        Err(e) => db_error("Failed to update notification", e),
    }
}
