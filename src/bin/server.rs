// src/bin/server.rs
use anyhow::Context;
use axum::{routing::get, Router};
use city_leaderboard::{cors_layer, http_handlers, init_tracing, setup_shared_state, socket_handlers};
use socketioxide::SocketIo;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    info!("🏆 Starting City Leaderboard");

    let (layer, io) = SocketIo::builder().build_layer();
    let config = Arc::new(city_leaderboard::config::Config::from_env());
    let server_state = setup_shared_state(config.clone(), io.clone()).await?;

    let socket_state = server_state.clone();
    io.ns("/", move |s: socketioxide::extract::SocketRef| {
        let state = socket_state.clone();
        async move {
            socket_handlers::on_socket_connect(s, state).await;
        }
    });

    let app = Router::new()
        .route("/", get(http_handlers::root_handler))
        .route("/health", get(http_handlers::health_handler))
        .route("/rooms", get(http_handlers::rooms_handler))
        .route("/rooms/{room}", get(http_handlers::room_handler))
        .route("/leaderboard/{scope}/{locality}", get(http_handlers::snapshot_handler))
        .fallback(http_handlers::not_found_handler)
        .with_state(server_state)
        .layer(cors_layer(&config))
        .layer(layer);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("🌟 Leaderboard server listening on http://{}", addr);

    axum::serve(listener, app).await.context("Server failed")?;
    Ok(())
}
