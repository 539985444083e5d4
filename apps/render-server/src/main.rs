///! Render Server
///! REST API for submitting timeline render jobs and polling their status

mod api;

use axum::{
    routing::{get, post},
    Router,
};
use jobs::{JobManager, ManagerConfig, MemoryJobStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("render_server=debug,jobs=debug,axum=debug")
        .init();

    info!("Starting Render Server...");

    let work_root = std::env::var("RENDERLINE_WORK_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir().join("renderline"));
    std::fs::create_dir_all(&work_root)?;

    let mut config = ManagerConfig {
        work_root: work_root.clone(),
        output_url_base: Some("/files".to_string()),
        ..ManagerConfig::default()
    };
    if let Ok(root) = std::env::var("RENDERLINE_UPLOAD_ROOT") {
        config.asset_config.upload_root = PathBuf::from(root);
    }

    let manager = JobManager::new(Arc::new(MemoryJobStore::new()), config);
    let _sweeper = manager.spawn_sweeper(Duration::from_secs(60 * 60));
    info!("Job workdirs under: {}", work_root.display());

    let app = Router::new()
        .route("/api/render", post(api::submit_render))
        .route("/api/render/:id", get(api::get_render))
        .route("/api/render/:id/cancel", post(api::cancel_render))
        // Completed outputs are served straight from the work root
        .nest_service("/files", ServeDir::new(work_root))
        // CORS for the editor frontend
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(manager);

    let addr = std::env::var("RENDERLINE_ADDR").unwrap_or_else(|_| "127.0.0.1:3000".to_string());
    info!("Render server listening on http://{}", addr);
    info!("API endpoints:");
    info!("  POST /api/render            - Submit a timeline document");
    info!("  GET  /api/render/:id        - Poll job status");
    info!("  POST /api/render/:id/cancel - Cancel a running job");
    info!("  GET  /files/:id/...         - Download finished renders");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
