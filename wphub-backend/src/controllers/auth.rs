use actix_web::{http::StatusCode, web, HttpRequest, HttpResponse, Responder};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::controllers::{db_error, error_json, record_activity};
use crate::middleware::session_auth::{authenticate, extract_token};
use crate::models::{LoginRequest, RegisterRequest, User, UserRole};
use crate::security::{hash_password, verify_password};
use crate::AppState;

const MIN_PASSWORD_LEN: usize = 8;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap());

#[derive(Serialize)]
pub struct LoginResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<User>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl LoginResponse {
    fn failure(message: &str) -> Self {
        Self {
            success: false,
            token: None,
            expires_at: None,
            user: None,
            error: Some(message.to_string()),
        }
    }
}

#[derive(Deserialize)]
pub struct LogoutRequest {
    token: String,
}

#[derive(Serialize)]
pub struct LogoutResponse {
    success: bool,
}

#[derive(Serialize)]
pub struct ValidateResponse {
    valid: bool,
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/auth")
            .route("/register", web::post().to(register))
            .route("/login", web::post().to(login))
            .route("/logout", web::post().to(logout))
            .route("/validate", web::get().to(validate))
            .route("/me", web::get().to(me)),
    );
}

async fn register(state: web::Data<AppState>, body: web::Json<RegisterRequest>) -> impl Responder {
    let email = body.email.trim().to_lowercase();

    if !EMAIL_RE.is_match(&email) {
        return error_json(StatusCode::BAD_REQUEST, "Invalid email address");
    }
    if body.password.chars().count() < MIN_PASSWORD_LEN {
        return error_json(
            StatusCode::BAD_REQUEST,
            format!("Password must be at least {} characters", MIN_PASSWORD_LEN),
        );
    }

    match state.db.get_user_by_email(&email) {
        Ok(Some(_)) => return error_json(StatusCode::CONFLICT, "An account with this email already exists"),
        Ok(None) => {}
        Err(e) => return db_error("Failed to look up user", e),
    }

    let hash = match hash_password(&body.password) {
        Ok(h) => h,
        Err(e) => {
            log::error!("Password hashing failed: {}", e);
            return error_json(StatusCode::INTERNAL_SERVER_ERROR, "Failed to create account");
        }
    };

    let full_name = body.full_name.as_deref().map(str::trim).filter(|n| !n.is_empty());
    match state.db.create_user(&email, &hash, full_name, UserRole::User) {
        Ok(user) => {
            log::info!("Registered user {}", user.email);
            record_activity(&state, &user, "user_registered", "user", Some(&user.id), None);
            HttpResponse::Ok().json(serde_json::json!({ "success": true, "user": user }))
        }
        Err(e) => db_error("Failed to create account", e),
    }
}

async fn login(state: web::Data<AppState>, body: web::Json<LoginRequest>) -> impl Responder {
    let email = body.email.trim().to_lowercase();

    let user = match state.db.get_user_by_email(&email) {
        Ok(Some(user)) => user,
        Ok(None) => {
            return HttpResponse::Unauthorized().json(LoginResponse::failure("Invalid email or password"));
        }
        Err(e) => {
            log::error!("Failed to look up user {}: {}", email, e);
            return HttpResponse::InternalServerError().json(LoginResponse::failure("Database error"));
        }
    };

    match verify_password(&body.password, &user.password_hash) {
        Ok(true) => {}
        Ok(false) => {
            return HttpResponse::Unauthorized().json(LoginResponse::failure("Invalid email or password"));
        }
        Err(e) => {
            log::error!("Stored password hash for {} is unusable: {}", user.email, e);
            return HttpResponse::Unauthorized().json(LoginResponse::failure("Invalid email or password"));
        }
    }

    if !user.is_active() {
        return HttpResponse::Unauthorized().json(LoginResponse::failure("Account is inactive"));
    }

    match state.db.create_session(&user.id, state.config.session_ttl_hours) {
        Ok(session) => {
            record_activity(&state, &user, "user_login", "user", Some(&user.id), None);
            HttpResponse::Ok().json(LoginResponse {
                success: true,
                token: Some(session.token),
                expires_at: Some(session.expires_at.timestamp()),
                user: Some(user),
                error: None,
            })
        }
        Err(e) => {
            log::error!("Failed to create session: {}", e);
            HttpResponse::InternalServerError().json(LoginResponse::failure("Failed to create session"))
        }
    }
}

async fn logout(state: web::Data<AppState>, body: web::Json<LogoutRequest>) -> impl Responder {
    if let Err(e) = state.db.delete_session(&body.token) {
        log::error!("Failed to delete session: {}", e);
    }
    HttpResponse::Ok().json(LogoutResponse { success: true })
}

async fn validate(state: web::Data<AppState>, req: HttpRequest) -> impl Responder {
    let Some(token) = extract_token(&req) else {
        return HttpResponse::Ok().json(ValidateResponse { valid: false });
    };

    match state.db.validate_session(&token) {
        Ok(Some(_)) => HttpResponse::Ok().json(ValidateResponse { valid: true }),
        Ok(None) => HttpResponse::Ok().json(ValidateResponse { valid: false }),
        Err(e) => {
            log::error!("Failed to validate session: {}", e);
            HttpResponse::InternalServerError().json(ValidateResponse { valid: false })
        }
    }
}

async fn me(state: web::Data<AppState>, req: HttpRequest) -> impl Responder {
    match authenticate(&state.db, &req) {
        Ok(user) => HttpResponse::Ok().json(user),
        Err(resp) => resp,
    }
}
