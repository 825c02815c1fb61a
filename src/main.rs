use anyhow::Result;
use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod cache;
mod config;
mod error;
mod models;
mod providers;
mod services;

use cache::{CacheAside, MemoryStore};
use config::AppConfig;
use providers::{AniListClient, HiAnime, ScrapeApi, StreamingProvider};
use services::{EpisodeReconciler, SourceResolver};

pub struct AppState {
    pub config: AppConfig,
    pub cache: CacheAside,
    pub provider: Arc<dyn StreamingProvider>,
    pub anilist: AniListClient,
    pub resolver: SourceResolver,
    pub reconciler: EpisodeReconciler,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "anime_gateway=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load .env file if present
    dotenvy::dotenv().ok();

    let config = AppConfig::load();
    config.log_config();

    let cache = if config.cache_enabled {
        CacheAside::new(Arc::new(MemoryStore::new()))
    } else {
        CacheAside::disabled()
    };

    let provider: Arc<dyn StreamingProvider> = Arc::new(HiAnime::new(config.provider_url.clone()));
    let scrape = Arc::new(ScrapeApi::new(config.scrape_api_url.clone()));

    let anilist = match &config.anilist_api_url {
        Some(url) => AniListClient::with_api_url(url.clone()),
        None => AniListClient::new(),
    };

    let resolver = SourceResolver::new(provider.clone(), scrape);
    let reconciler = EpisodeReconciler::new(provider.clone());

    let state = Arc::new(AppState {
        config,
        cache,
        provider,
        anilist,
        resolver,
        reconciler,
    });

    // Root handler
    async fn root_handler() -> &'static str {
        "Anime Gateway"
    }

    // Build router
    let app = Router::new()
        .route("/", get(root_handler).head(root_handler))
        .route("/health", get(|| async { "OK" }))
        .merge(api::routes())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    let addr: SocketAddr = format!("{}:{}", state.config.bind_address, state.config.port).parse()?;
    tracing::info!("Starting server on {}", addr);

    // Create shutdown signal listener
    let shutdown_signal = async {
        let ctrl_c = async {
            tokio::signal::ctrl_c()
                .await
                .expect("Failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("Failed to install SIGTERM handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
            _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
        }
    };

    // Start server with graceful shutdown
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}
