//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{DbAdapter, InMemoryNoteRepository},
    config::Config,
    error::ApiError,
    sync::start_flusher,
    web::{
        create_note_handler, get_note_handler, health_handler,
        rest::{ApiDoc, SECRET_HEADER},
        state::AppState,
        update_note_handler, ws_handler,
    },
};
use axum::http::{
    header::{ACCEPT, CONTENT_TYPE},
    HeaderName, HeaderValue, Method,
};
use axum::{
    routing::{get, post},
    Router,
};
use quickpad_core::ports::NoteRepository;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to the Note Repository ---
    let db: Arc<dyn NoteRepository> = match &config.database_url {
        Some(database_url) => {
            info!("Connecting to database...");
            let db_pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(database_url)
                .await?;
            let db_adapter = DbAdapter::new(db_pool);
            info!("Running database migrations...");
            db_adapter.run_migrations().await?;
            info!("Database migrations complete.");
            Arc::new(db_adapter)
        }
        None => {
            warn!("DATABASE_URL is not set; notes are kept in memory and lost on restart.");
            Arc::new(InMemoryNoteRepository::new())
        }
    };

    // --- 3. Build the Shared AppState & Background Tasks ---
    let app_state = Arc::new(AppState::new(db, config.clone()));
    let shutdown = app_state.shutdown.clone();
    let flusher = start_flusher(
        app_state.registry.clone(),
        config.flush_interval,
        shutdown.clone(),
    );

    // --- 4. Create the Web Router ---
    let allowed_origin = config.client_url.parse::<HeaderValue>().map_err(|e| {
        ApiError::Internal(format!("Invalid CLIENT_URL '{}': {}", config.client_url, e))
    })?;
    let cors = CorsLayer::new()
        .allow_origin(allowed_origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, ACCEPT, HeaderName::from_static(SECRET_HEADER)]);

    let api_router = Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/notes", post(create_note_handler))
        .route(
            "/api/notes/{id}",
            get(get_note_handler).put(update_note_handler),
        )
        .route("/ws", get(ws_handler))
        .layer(cors)
        .with_state(app_state.clone());

    // Merge the API router with the Swagger UI router for a complete application.
    let app = Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 5. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Shutdown signal received.");
            // Upgraded sockets are not drained by axum; they watch this token.
            signal.cancel();
        })
        .await?;

    // --- 6. Persist Whatever Is Still Live ---
    shutdown.cancel();
    app_state.connections.close();
    app_state.connections.wait().await;
    info!("All WebSocket connections closed.");
    if let Err(e) = flusher.await {
        warn!("Periodic flusher ended abnormally: {}", e);
    }
    app_state.registry.flush_all().await;
    info!("All sessions flushed. Bye.");

    Ok(())
}
