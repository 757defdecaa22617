use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use newsletter_digest::config::Config;
use newsletter_digest::db::Database;
use newsletter_digest::digest::{start_background_dispatch, Scheduler};
use newsletter_digest::news::NewsClient;
use newsletter_digest::routes::{self, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "newsletter_digest=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::var("DIGEST_CONFIG").unwrap_or_else(|_| "digest.toml".to_string());
    let config = Config::load(&config_path)?;
    info!("Loaded configuration from {}", config_path);

    let news = NewsClient::new(&config.news)?;
    if config.news.resolved_api_key().is_none() {
        info!("No news API key configured; upstream requests will be unauthenticated");
    }
    let news = Arc::new(news);

    // Initialize database
    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "sqlite:newsletter.db?mode=rwc".to_string());
    let db = Database::new(&database_url).await?;
    db.initialize().await?;
    info!("Database initialized");

    let db = Arc::new(db);

    // Start background dispatch task
    let scheduler = Arc::new(Scheduler::new(db.clone(), news.clone()));
    let bg_scheduler = scheduler.clone();
    let dispatch_interval = config.dispatch_interval;
    tokio::spawn(async move {
        start_background_dispatch(bg_scheduler, dispatch_interval).await;
    });

    let state = Arc::new(AppState {
        db,
        news,
        scheduler,
    });
    let app = routes::router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("Server starting on http://{}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
