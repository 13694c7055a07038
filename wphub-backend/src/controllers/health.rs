use actix_web::{web, HttpResponse, Responder};

use crate::AppState;

/// Version from Cargo.toml, available at compile time
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/api/health").route(web::get().to(health_check)));
    cfg.service(web::resource("/api/version").route(web::get().to(get_version)));
}

async fn health_check(state: web::Data<AppState>) -> impl Responder {
    let database = match state.db.ping() {
        Ok(()) => "ok",
        Err(e) => {
            log::error!("Database health check failed: {}", e);
            "unavailable"
        }
    };

    let body = serde_json::json!({
        "status": if database == "ok" { "ok" } else { "degraded" },
        "database": database,
        "stripe_configured": state.stripe.is_some(),
        "version": VERSION
    });

    if database == "ok" {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::ServiceUnavailable().json(body)
    }
}

async fn get_version() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "version": VERSION
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controllers::test_support::app_state;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_health_reports_database_and_stripe() {
        let app = test::init_service(App::new().app_data(web::Data::new(app_state())).configure(config)).await;
        let req = test::TestRequest::get().uri("/api/health").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["status"], "ok");
        assert_eq!(body["database"], "ok");
        assert_eq!(body["stripe_configured"], false);
        assert_eq!(body["version"], VERSION);
    }
}
