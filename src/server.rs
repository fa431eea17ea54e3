//! Per-feed HTTP endpoints
//!
//! | Path | Description |
//! |------|-------------|
//! | `/stream` | MJPEG stream (`multipart/x-mixed-replace; boundary=frame`) |
//! | `/stats` | Feed statistics as JSON |
//! | `/health` | `{"status": "ok", "feed": <name>}` |
//!
//! Every feed is served on its own port.

use std::future::Future;
use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::State,
    http::header,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tracing::info;

use crate::stats::FeedStats;
use crate::stream::CONTENT_TYPE;
use crate::supervisor::{FeedHandle, Health};

pub fn router(feed: FeedHandle) -> Router {
    Router::new()
        .route("/stream", get(handle_stream))
        .route("/stats", get(handle_stats))
        .route("/health", get(handle_health))
        .with_state(feed)
}

/// Serve one feed until `shutdown` resolves.
///
/// Graceful shutdown waits for open streams, which end once the feed is
/// stopped, so stop the supervisor before or alongside the shutdown signal.
pub async fn serve(
    feed: FeedHandle,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(
        "Starting '{}' feed server on http://{}/stream",
        feed.name(),
        listener.local_addr()?
    );

    axum::serve(listener, router(feed))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn handle_stream(State(feed): State<FeedHandle>) -> Response {
    let body = Body::from_stream(feed.viewer().into_stream());
    (
        [
            (header::CONTENT_TYPE, CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
        ],
        body,
    )
        .into_response()
}

async fn handle_stats(State(feed): State<FeedHandle>) -> Json<FeedStats> {
    Json(feed.stats())
}

async fn handle_health(State(feed): State<FeedHandle>) -> Json<Health> {
    Json(feed.health())
}
