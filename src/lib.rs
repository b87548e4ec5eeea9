pub mod asr;
pub mod audio;
pub mod config;
pub mod handlers;
pub mod models;
pub mod protocol;
pub mod service;
pub mod session;

use crate::handlers::AppState;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// マルチパートの境界やヘッダー分の余裕
const BODY_LIMIT_SLACK: usize = 1024 * 1024;

pub fn create_app(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let body_limit = app_state.config.max_upload_bytes() + BODY_LIMIT_SLACK;

    Router::new()
        // 文字起こし
        .route("/api/transcribe/pcm", post(handlers::transcribe_pcm))
        .route("/transcribe_stream", post(handlers::transcribe_stream))
        .route("/api/transcribe/file", post(handlers::transcribe_file))
        .route("/ws/transcribe", get(handlers::ws_transcribe))
        // 状態
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::ready))
        .route("/stats", get(handlers::stats))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(app_state)
}
