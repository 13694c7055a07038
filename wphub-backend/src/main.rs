use actix_cors::Cors;
use actix_files::{Files, NamedFile};
use actix_web::{middleware::Logger, web, App, HttpServer};
use dotenv::dotenv;
use std::path::PathBuf;
use std::sync::Arc;

mod config;
mod controllers;
mod db;
mod integrations;
mod middleware;
mod models;
mod security;

use config::Config;
use db::Database;
use integrations::{ConnectorClient, DirectoryClient, StripeClient};
use models::UserRole;

pub struct AppState {
    pub db: Arc<Database>,
    pub config: Config,
    /// None when STRIPE_SECRET_KEY is unset; billing handlers answer 500
    pub stripe: Option<Arc<StripeClient>>,
    pub connector: Arc<ConnectorClient>,
    pub directory: Arc<DirectoryClient>,
}

/// Create the first admin account from ADMIN_EMAIL / ADMIN_PASSWORD
fn seed_admin(db: &Database, config: &Config) {
    let (Some(email), Some(password)) = (&config.admin_email, &config.admin_password) else {
        return;
    };

    match db.has_admin() {
        Ok(true) => return,
        Ok(false) => {}
        Err(e) => {
            log::error!("Failed to check for admin account: {}", e);
            return;
        }
    }

    let hash = match security::hash_password(password) {
        Ok(h) => h,
        Err(e) => {
            log::error!("Failed to hash admin password: {}", e);
            return;
        }
    };

    match db.create_user(email, &hash, Some("Administrator"), UserRole::Admin) {
        Ok(user) => log::info!("Seeded admin account {}", user.email),
        Err(e) => log::error!("Failed to seed admin account: {}", e),
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::init();

    let config = Config::from_env();
    let port = config.port;

    log::info!("Initializing database at {}", config.database_url);
    let db = Database::new(&config.database_url).expect("Failed to initialize database");
    let db = Arc::new(db);
    seed_admin(&db, &config);

    let stripe = match &config.stripe_secret_key {
        Some(key) => {
            let client = StripeClient::new(key, &config.stripe_api_base).expect("Failed to build Stripe client");
            log::info!("Stripe client configured against {}", config.stripe_api_base);
            Some(Arc::new(client))
        }
        None => {
            log::warn!("STRIPE_SECRET_KEY not set - billing endpoints will fail");
            None
        }
    };
    if config.stripe_webhook_secret.is_none() {
        log::warn!("STRIPE_WEBHOOK_SECRET not set - webhook signatures will not be checked");
    }

    let connector = Arc::new(
        ConnectorClient::new(config.connector_timeout_secs).expect("Failed to build connector client"),
    );
    let directory = Arc::new(
        DirectoryClient::new(&config.wordpress_org_api_base, config.connector_timeout_secs)
            .expect("Failed to build wordpress.org client"),
    );

    let frontend_dist = config::resolve_frontend_dist(&config);

    log::info!("Starting WP Hub backend on port {}", port);
    if let Some(dist) = &frontend_dist {
        log::info!("Serving frontend from: {}", dist);
    }

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        let mut app = App::new()
            .app_data(web::Data::new(AppState {
                db: Arc::clone(&db),
                config: config.clone(),
                stripe: stripe.clone(),
                connector: Arc::clone(&connector),
                directory: Arc::clone(&directory),
            }))
            .wrap(Logger::default())
            .wrap(cors)
            .configure(controllers::configure);

        // Serve static files only if frontend dist exists
        if let Some(dist) = &frontend_dist {
            let index = PathBuf::from(dist).join("index.html");
            app = app.service(
                Files::new("/", dist.clone())
                    .index_file("index.html")
                    .default_handler(web::to(move || {
                        let index = index.clone();
                        async move { NamedFile::open(index) }
                    })),
            );
        }

        app
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
