use actix_cors::Cors;
use actix_web::{middleware::Compress, App, HttpServer};
use utoipa_swagger_ui::SwaggerUi;

mod auth;
mod error;
mod identity;
mod inbox;
mod mailer;
mod milestones;
mod models;
mod notify;
mod openapi;
mod rate_limit;
mod repo;
mod routes;
mod security;

use identity::IdentityCodec;
use mailer::build_mailer;
use notify::Notifier;
use openapi::ApiDoc;
use rate_limit::{InMemoryRateLimiter, RateLimitConfig, RateLimiterFacade};
#[cfg(all(feature = "inmem-store", not(feature = "postgres-store")))]
use repo::inmem::InMemRepo;
use routes::{config, AppState};
use security::SecurityHeaders;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi; // bring trait into scope for ApiDoc::openapi()

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Environment variables must be set externally (shell, systemd, Docker).
    // Load .env automatically only in debug builds.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    validate_env_vars();

    // Structured logging initialisation
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("Bootstrapping confide server");

    // The codec is the only holder of the encryption key; the key itself
    // is never logged.
    let key = std::env::var("ENCRYPTION_SECRET_KEY").expect("validated above");
    let codec = match IdentityCodec::from_hex_key(&key) {
        Ok(c) => Arc::new(c),
        Err(_) => {
            eprintln!("ENCRYPTION_SECRET_KEY must be 64 hex characters (32 bytes)");
            std::process::exit(1);
        }
    };

    #[cfg(all(feature = "inmem-store", not(feature = "postgres-store")))]
    let repo = InMemRepo::new();
    #[cfg(all(feature = "inmem-store", not(feature = "postgres-store")))]
    info!("Using in-memory repository backend");

    #[cfg(feature = "postgres-store")]
    let repo = {
        use sqlx::postgres::PgPoolOptions;
        let db_url =
            std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for postgres-store");
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(&db_url)
            .expect("Failed to create Pg pool");
        info!("Using Postgres repository backend");
        crate::repo::pg::PgRepo::new(pool)
    };

    // both backends are cheaply cloneable handles over shared state
    let logs: Arc<dyn repo::NotificationLogRepo> = Arc::new(repo.clone());
    let repo: Arc<dyn repo::Repo> = Arc::new(repo);
    let mailer = build_mailer();
    let notifier = Arc::new(Notifier::new(logs, mailer));
    let limits = RateLimiterFacade::new(
        InMemoryRateLimiter::new(
            std::env::var("RL_ENABLED").map(|v| v != "0").unwrap_or(true),
        ),
        RateLimitConfig::from_env(),
    );

    let openapi = ApiDoc::openapi();
    info!("OpenAPI spec generated");

    let state = AppState {
        repo,
        codec,
        notifier,
        limits,
    };

    let server = HttpServer::new(move || {
        let cors = {
            let mut c = Cors::default()
                .allowed_origin("http://localhost:3000")
                .allowed_origin("http://127.0.0.1:3000")
                .allow_any_header()
                .allowed_methods(["GET", "POST", "OPTIONS"])
                .supports_credentials()
                .max_age(3600);
            if let Ok(front) = std::env::var("FRONTEND_URL") {
                c = c.allowed_origin(&front);
            }
            c
        };

        App::new()
            .wrap(TracingLogger::default())
            .wrap(Compress::default())
            .wrap(SecurityHeaders::from_env().with_hsts(true))
            .wrap(cors)
            .configure(config)
            .service(SwaggerUi::new("/docs").url("/docs/openapi.json", openapi.clone()))
            .app_data(actix_web::web::Data::new(state.clone()))
    })
    .bind(("0.0.0.0", 8080))?;

    info!("Listening on http://0.0.0.0:8080 (all interfaces)");

    server.run().await
}

/// Validate that required environment variables are set
fn validate_env_vars() {
    use std::env;

    let required = vec!["JWT_SECRET", "ENCRYPTION_SECRET_KEY", "MAIL_RELAY_URL", "MAIL_FROM_EMAIL"];

    let mut missing = Vec::new();
    for var in required {
        if env::var(var).is_err() {
            missing.push(var);
        }
    }

    if !missing.is_empty() {
        eprintln!("Missing required environment variables: {missing:?}");
        eprintln!("Please copy .env.example to .env and configure it");
        std::process::exit(1);
    }

    if let Ok(secret) = env::var("JWT_SECRET") {
        if secret.len() < 32 {
            eprintln!("JWT_SECRET must be at least 32 characters long for security");
            std::process::exit(1);
        }
    }

    if let Ok(key) = env::var("ENCRYPTION_SECRET_KEY") {
        if key.trim().len() != 64 {
            eprintln!("ENCRYPTION_SECRET_KEY must be 64 hex characters (32 bytes)");
            std::process::exit(1);
        }
    }
}
