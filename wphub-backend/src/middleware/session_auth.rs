// Session authentication helpers
// Controllers call `authenticate` / `require_admin` at the top of each protected
// handler and return the error response as-is.

use actix_web::{HttpRequest, HttpResponse};

use crate::db::Database;
use crate::models::User;

pub fn extract_token(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.trim_start_matches("Bearer ").trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Resolve the bearer token to an active user
pub fn authenticate(db: &Database, req: &HttpRequest) -> Result<User, HttpResponse> {
    let token = extract_token(req).ok_or_else(|| {
        HttpResponse::Unauthorized().json(serde_json::json!({
            "error": "No authorization token provided"
        }))
    })?;

    let session = match db.validate_session(&token) {
        Ok(Some(session)) => session,
        Ok(None) => {
            return Err(HttpResponse::Unauthorized().json(serde_json::json!({
                "error": "Invalid or expired session"
            })));
        }
        Err(e) => {
            log::error!("Session validation error: {}", e);
            return Err(internal_error());
        }
    };

    match db.get_user(&session.user_id) {
        Ok(Some(user)) if user.is_active() => Ok(user),
        Ok(_) => Err(HttpResponse::Unauthorized().json(serde_json::json!({
            "error": "Unauthorized"
        }))),
        Err(e) => {
            log::error!("Failed to load session user {}: {}", session.user_id, e);
            Err(internal_error())
        }
    }
}

/// `authenticate`, then insist on the admin role
pub fn require_admin(db: &Database, req: &HttpRequest) -> Result<User, HttpResponse> {
    let user = authenticate(db, req)?;
    if !user.is_admin() {
        return Err(HttpResponse::Forbidden().json(serde_json::json!({
            "error": "Admin access required"
        })));
    }
    Ok(user)
}

fn internal_error() -> HttpResponse {
    HttpResponse::InternalServerError().json(serde_json::json!({
        "error": "Internal server error"
    }))
}
