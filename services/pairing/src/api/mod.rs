//! 本地控制接口：路由、CORS 与监听。

use anyhow::Context;
use axum::{
    Router,
    http::{Method, header::CONTENT_TYPE},
    routing::{get, post},
};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::service::PairingService;

mod error;
mod handlers;
mod response;

pub use response::{ApiEnvelope, ApiReply};

/// 构建控制接口路由。
pub fn router(service: PairingService) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE]);

    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/v1/pairing/state", get(handlers::state_handler))
        .route("/v1/pairing/approval", post(handlers::approval_handler))
        .route(
            "/v1/pairing/advertise/start",
            post(handlers::advertise_start_handler),
        )
        .route(
            "/v1/pairing/advertise/stop",
            post(handlers::advertise_stop_handler),
        )
        .route("/v1/pairing/send", post(handlers::send_handler))
        .route("/v1/pairing/peers", get(handlers::peers_handler))
        .route("/v1/pairing/events", get(handlers::events_handler))
        .layer(cors)
        .with_state(service)
}

/// 监听控制接口直到收到 Ctrl-C。
pub async fn serve(addr: &str, service: PairingService) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind pairing control api: {addr}"))?;
    info!("tc-pairing control api listening on {addr}");
    axum::serve(listener, router(service))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("tc-pairing shutdown requested");
        })
        .await
        .context("serve pairing control api")?;
    Ok(())
}
