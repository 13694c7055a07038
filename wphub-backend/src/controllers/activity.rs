use actix_web::{web, HttpRequest, HttpResponse, Responder};
use serde::Deserialize;

use crate::controllers::db_error;
use crate::middleware::session_auth::authenticate;
use crate::AppState;

const DEFAULT_LIMIT: i64 = 100;

#[derive(Debug, Deserialize)]
struct ActivityQuery {
    limit: Option<i64>,
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/api/activity").route(web::get().to(list_own_activity)));
}

async fn list_own_activity(
    state: web::Data<AppState>,
    req: HttpRequest,
    query: web::Query<ActivityQuery>,
) -> impl Responder {
    let user = match authenticate(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, 500);
    match state.db.list_activity(Some(&user.email), limit) {
        Ok(logs) => HttpResponse::Ok().json(serde_json::json!({ "logs": logs })),
        Err(e) => db_error("Failed to load activity", e),
    }
}
