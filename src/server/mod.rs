mod error;
mod routes;

use crate::{
    config::Config,
    media::{MetadataSource, StreamProxy, TokioProcessRunner, YtDlp},
};
use anyhow::{Context, Result};
use axum::{extract::DefaultBodyLimit, routing::get, routing::post, Router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub metadata: Arc<dyn MetadataSource>,
    pub proxy: Arc<StreamProxy>,
    pub max_upload_bytes: usize,
}

pub fn router(state: AppState) -> Router {
    // Leave room above the upload limit so oversized images reach the
    // handler and get a readable error instead of a bare 413.
    let wifi_body_limit = state.max_upload_bytes.saturating_mul(2);

    Router::new()
        .route("/api/health", get(routes::health))
        .route(
            "/api/wifi",
            post(routes::scan_wifi).layer(DefaultBodyLimit::max(wifi_body_limit)),
        )
        .route("/api/yt-download", post(routes::video_info))
        .route("/api/yt-download/download", post(routes::resolve_download))
        .route("/api/yt-download/proxy", post(routes::proxy_download))
        .with_state(state)
}

pub async fn run(config: Config) -> Result<()> {
    let ytdlp = YtDlp::from_config(&config.ytdlp);
    let binary = ytdlp.binary_path();

    if !binary.is_file() {
        warn!(
            "No provisioned yt-dlp at {}, downloads will fail until `qrtube provision` runs",
            binary.display()
        );
    }
    if !ytdlp.test_availability().await {
        warn!("Metadata requests will fail until yt-dlp is installed");
    }

    let state = AppState {
        metadata: Arc::new(ytdlp),
        proxy: Arc::new(StreamProxy::new(binary, Arc::new(TokioProcessRunner))),
        max_upload_bytes: config.wifi.max_upload_bytes,
    };

    let listener = TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;
    info!("Listening on http://{}", config.server.bind);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down...");
}
