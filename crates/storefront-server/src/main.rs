use actix_governor::{Governor, GovernorConfigBuilder};
use actix_web::{middleware::Logger, web, App, HttpServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use storefront_server::{
    config::ServerConfig, db::Database, metrics::register_metrics, routes, state::AppState,
};

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = ServerConfig::from_env().expect("Failed to load configuration");
    let port = config.port;
    let allowed_origins = config.allowed_origins.clone();
    let rate_limit_rpm = config.rate_limit_rpm;

    tracing::info!("Starting storefront-server on port {}", port);
    tracing::info!("Hosted payment endpoint: {}", config.gateway.endpoint);
    tracing::info!("Merchant: {} / {}", config.gateway.merchant_id, config.gateway.account);
    tracing::info!("Signature policy: {:?}", config.signature_policy);

    // Initialize database
    let db = Database::new(&config.db_path).expect("Failed to initialize database");
    tracing::info!("Database initialized at: {}", config.db_path);

    // Register Prometheus metrics
    register_metrics();

    // Create shared state
    let state_data = web::Data::new(AppState::new(config, db));

    // Rate limiter for customer-facing routes
    let governor_conf = GovernorConfigBuilder::default()
        .requests_per_minute(rate_limit_rpm as u64)
        .finish()
        .expect("Failed to create rate limiter config");

    // Start HTTP server
    HttpServer::new(move || {
        let cors = storefront_server::cors::build_cors(&allowed_origins);

        App::new()
            .app_data(state_data.clone())
            .app_data(web::PayloadConfig::new(64 * 1024))
            .app_data(web::JsonConfig::default().limit(64 * 1024))
            .wrap(Logger::default())
            .wrap(cors)
            .configure(routes::configure_gateway_facing)
            .service(
                web::scope("")
                    .wrap(Governor::new(&governor_conf))
                    .configure(routes::configure_storefront),
            )
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
