use axum::{
    middleware,
    routing::{get, post},
    Router,
};

pub mod args;
pub mod form;
pub mod handlers;
pub mod metrics;
pub mod predict;
pub mod state;

use crate::handlers::{api_predict, healthz, index, submit};
use crate::metrics::{metrics_handler, track_requests};
use crate::state::AppState;

/// Routes for the question form, its JSON twin, and the health and metrics endpoints.
pub fn build_app(st: AppState) -> Router {
    Router::new()
        .route("/", get(index).post(submit))
        .route("/api/predict", post(api_predict))
        .route("/healthz", get(healthz))
        .route("/health", get(healthz))
        .route("/metrics", get(metrics_handler))
        .layer(middleware::from_fn_with_state(st.clone(), track_requests))
        .with_state(st)
}
