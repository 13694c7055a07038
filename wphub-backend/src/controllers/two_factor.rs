use actix_web::{http::StatusCode, web, HttpRequest, HttpResponse, Responder};
use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::controllers::{db_error, error_json, record_activity};
use crate::middleware::session_auth::authenticate;
use crate::models::{TwoFactorSettingsRequest, VerifyCodeRequest};
use crate::security::generate_two_fa_code;
use crate::AppState;

/// Lifetime of a generated code
const CODE_TTL_MINUTES: i64 = 10;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/2fa")
            .route("/settings", web::post().to(update_settings))
            .route("/generate", web::post().to(generate_code))
            .route("/verify", web::post().to(verify_code))
            .route("/reset", web::post().to(reset_status)),
    );
}

async fn update_settings(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<TwoFactorSettingsRequest>,
) -> impl Responder {
    let user = match authenticate(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    if let Err(e) = state.db.set_two_fa_enabled(&user.id, body.enabled) {
        return db_error("Failed to update 2FA settings", e);
    }

    let action = if body.enabled { "2fa_enabled" } else { "2fa_disabled" };
    record_activity(&state, &user, action, "user", Some(&user.id), None);
    HttpResponse::Ok().json(serde_json::json!({ "success": true, "two_fa_enabled": body.enabled }))
}

/// The code is stored server side; delivery happens out of band
async fn generate_code(state: web::Data<AppState>, req: HttpRequest) -> impl Responder {
    let user = match authenticate(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    if !user.two_fa_enabled {
        return error_json(StatusCode::BAD_REQUEST, "2FA is not enabled for this account");
    }

    let code = generate_two_fa_code();
    let expires_at = Utc::now() + Duration::minutes(CODE_TTL_MINUTES);
    if let Err(e) = state.db.set_two_fa_code(&user.id, &code, expires_at) {
        return db_error("Failed to store 2FA code", e);
    }

    log::info!("Generated 2FA code for {}", user.email);
    record_activity(&state, &user, "2fa_code_generated", "user", Some(&user.id), None);
    HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "message": "Verification code generated",
        "expires_at": expires_at,
    }))
}

async fn verify_code(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<VerifyCodeRequest>,
) -> impl Responder {
    let user = match authenticate(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    if !user.two_fa_enabled {
        return error_json(StatusCode::BAD_REQUEST, "2FA is not enabled for this account");
    }
    let (Some(stored), Some(expires_at)) = (&user.two_fa_code, user.two_fa_code_expires_at) else {
        return error_json(StatusCode::BAD_REQUEST, "No verification code requested");
    };
    if expires_at < Utc::now() {
        return error_json(StatusCode::BAD_REQUEST, "Verification code has expired");
    }
    if stored != body.code.trim() {
        record_activity(&state, &user, "2fa_verification_failed", "user", Some(&user.id), None);
        return error_json(StatusCode::BAD_REQUEST, "Invalid verification code");
    }

    let verified_session = Uuid::new_v4().to_string();
    if let Err(e) = state.db.complete_two_fa(&user.id, &verified_session) {
        return db_error("Failed to complete 2FA verification", e);
    }

    record_activity(&state, &user, "2fa_verified", "user", Some(&user.id), None);
    HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "verified_session": verified_session,
    }))
}

async fn reset_status(state: web::Data<AppState>, req: HttpRequest) -> impl Responder {
    let user = match authenticate(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    match state.db.clear_two_fa_session(&user.id) {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({ "success": true })),
        Err(e) => db_error("Failed to reset 2FA status", e),
    }
}
