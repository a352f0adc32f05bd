//! JamSync 세션 서버

use anyhow::Context;
use jamsync::config::Config;
use jamsync::state::{evict_idle_rooms, AppState};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();

    // 로깅 초기화
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.log_level))
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Some(dir) = &config.storage_dir {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("failed to create storage dir {}", dir.display()))?;
    }

    let state = Arc::new(AppState::new(config.clone()));

    // 유휴 방 정리 스케줄러
    let sweep_state = state.clone();
    let sweep_every = tokio::time::Duration::from_secs(config.room.sweep_interval_secs.max(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_every);
        loop {
            interval.tick().await;
            evict_idle_rooms(&sweep_state);
        }
    });

    let app = jamsync::router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    tracing::info!("🎸 JamSync session server started");
    tracing::info!("Address: {}", addr);
    tracing::info!("WebSocket: ws://{}/rooms/{{room_id}}/ws", addr);
    match &config.storage_dir {
        Some(dir) => tracing::info!("Storage: files under {}", dir.display()),
        None => tracing::info!("Storage: in-memory (state is lost on restart)"),
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
