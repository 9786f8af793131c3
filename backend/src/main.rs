use axum::{
    http::Method,
    routing::get,
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod automation;
mod config;
mod database;
mod error;
mod handlers;
mod jobs;

pub use error::{ApiError, ApiResult, AppError};

use automation::{
    ActionExecutor, AutomationEngine, AutomationStore, PgAutomationStore, ScorerConfig,
    SequenceManager, StoreExecutor,
};

pub struct AppState {
    pub db_pool: sqlx::PgPool,
    pub store: Arc<dyn AutomationStore>,
    pub engine: AutomationEngine,
    pub sequences: Arc<SequenceManager>,
    pub scorer: ScorerConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::from_env()?;
    let db_pool = database::create_pool(&config.database_url).await?;

    database::migrate(&db_pool).await?;

    let store: Arc<dyn AutomationStore> = Arc::new(PgAutomationStore::new(db_pool.clone()));
    let executor: Arc<dyn ActionExecutor> = Arc::new(StoreExecutor::new(Arc::clone(&store)));

    let engine = AutomationEngine::start(Arc::clone(&store), Arc::clone(&executor));
    let sequences = Arc::new(SequenceManager::new(
        Arc::clone(&store),
        Arc::clone(&executor),
    ));

    let scheduler = jobs::JobScheduler::new(
        Arc::clone(&store),
        Arc::clone(&sequences),
        engine.clone(),
        config.jobs.clone(),
    )
    .await?;
    scheduler.start().await?;

    let app_state = Arc::new(AppState {
        db_pool,
        store,
        engine,
        sequences,
        scorer: config.scorer.clone(),
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    let app = Router::new()
        .route("/", get(|| async { "Carepath Pipeline API v1.0.0" }))
        .route("/health", get(handlers::health_check))
        .nest("/api/v1/automation", handlers::automation_routes())
        .layer(ServiceBuilder::new().layer(cors))
        .with_state(app_state);

    let listener = tokio::net::TcpListener::bind(&config.server_addr).await?;
    tracing::info!("Server running on {}", config.server_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
