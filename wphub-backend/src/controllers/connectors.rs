use actix_web::{http::StatusCode, web, HttpRequest, HttpResponse, Responder};

use crate::controllers::{db_error, error_json, record_activity};
use crate::middleware::session_auth::{authenticate, require_admin};
use crate::models::{is_valid_version, RegisterConnectorRequest};
use crate::AppState;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/connectors")
            .route("", web::get().to(list_connectors))
            .route("", web::post().to(register_connector))
            .route("/latest", web::get().to(latest_connector)),
    );
}

async fn list_connectors(state: web::Data<AppState>, req: HttpRequest) -> impl Responder {
    if let Err(resp) = authenticate(&state.db, &req) {
        return resp;
    }

    match state.db.list_connectors() {
        Ok(connectors) => HttpResponse::Ok().json(serde_json::json!({ "connectors": connectors })),
        Err(e) => db_error("Failed to list connector versions", e),
    }
}

async fn latest_connector(state: web::Data<AppState>, req: HttpRequest) -> impl Responder {
    if let Err(resp) = authenticate(&state.db, &req) {
        return resp;
    }

    match state.db.list_connectors() {
        Ok(connectors) => match connectors.into_iter().next() {
            Some(latest) => HttpResponse::Ok().json(serde_json::json!({ "connector": latest })),
            None => error_json(StatusCode::NOT_FOUND, "No connector versions published"),
        },
        Err(e) => db_error("Failed to load connector versions", e),
    }
}

async fn register_connector(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<RegisterConnectorRequest>,
) -> impl Responder {
    let admin = match require_admin(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    if !is_valid_version(&body.version) {
        return error_json(StatusCode::BAD_REQUEST, "Version must look like 1.2.3");
    }
    if url::Url::parse(&body.file_url).is_err() {
        return error_json(StatusCode::BAD_REQUEST, "file_url must be an absolute URL");
    }
    match state.db.get_connector_by_version(&body.version) {
        Ok(Some(_)) => return error_json(StatusCode::CONFLICT, "This connector version already exists"),
        Ok(None) => {}
        Err(e) => return db_error("Failed to check connector version", e),
    }

    match state.db.create_connector(&body) {
        Ok(connector) => {
            log::info!("Connector {} published by {}", connector.version, admin.email);
            record_activity(
                &state,
                &admin,
                "connector_published",
                "connector",
                Some(&connector.id),
                Some(connector.version.clone()),
            );
            HttpResponse::Created().json(serde_json::json!({ "success": true, "connector": connector }))
        }
        Err(e) => db_error("Failed to store connector version", e),
    }
}
