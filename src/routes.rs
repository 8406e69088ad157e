use crate::handlers;
use crate::state::AppState;
use axum::http::{HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_credentials(true)
        .allow_origin([
            HeaderValue::from_static("http://localhost:3000"),
            HeaderValue::from_static("http://localhost:5173"),
        ])
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::ACCEPT,
            axum::http::header::COOKIE,
            axum::http::header::SET_COOKIE,
            axum::http::HeaderName::from_static("x-request-id"),
            axum::http::HeaderName::from_static("x-forwarded-for"),
        ]);

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/v1/sessions", get(handlers::list_sessions))
        .route("/api/v1/join", post(handlers::join))
        .route("/api/v1/quizzes/current", get(handlers::current_quizzes))
        .route("/api/v1/answers", post(handlers::submit_answer))
        .route("/api/v1/attempts", post(handlers::create_attempt))
        .route("/api/v1/leaderboard", get(handlers::leaderboard))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
