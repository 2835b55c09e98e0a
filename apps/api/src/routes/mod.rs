pub mod health;
pub mod page;

use axum::{
    http::Uri,
    routing::{get, post},
    Router,
};

use crate::errors::AppError;
use crate::plan::handlers;
use crate::state::AppState;

async fn not_found(uri: Uri) -> AppError {
    AppError::NotFound(format!("No route for {}", uri.path()))
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(page::index_handler))
        .route("/health", get(health::health_handler))
        // Plan API
        .route("/api/plan", post(handlers::handle_plan_stream))
        .route("/api/plan/generate", post(handlers::handle_generate))
        .route("/api/plan/parse", post(handlers::handle_parse))
        .fallback(not_found)
        .with_state(state)
}
