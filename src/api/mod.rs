use crate::service::VentilationService;
use axum::Router;
use axum::routing::{get, post};
use std::sync::Arc;

pub mod handlers;
pub mod responses;

pub fn router(service: Arc<VentilationService>) -> Router {
    Router::new()
        .route("/api/health", get(handlers::get_health))
        .route("/api/snapshot", get(handlers::get_snapshot))
        .route("/api/predictions", get(handlers::get_predictions))
        .route("/api/predictions/clear", post(handlers::post_clear_predictions))
        .route("/api/predictions/rearm", post(handlers::post_rearm_predictions))
        .route("/api/readings", get(handlers::get_readings))
        .route("/api/feedback", post(handlers::post_feedback))
        .route("/api/average", get(handlers::get_average))
        .route("/api/comparison", post(handlers::post_comparison))
        .with_state(service)
}
