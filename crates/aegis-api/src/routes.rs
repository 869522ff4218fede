//! API routes

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::handlers;
use crate::state::App;

/// Build the clearinghouse router
pub fn router(app: Arc<App>) -> Router {
    Router::new()
        .route("/subscribe", post(handlers::subscribe))
        .route("/quote", post(handlers::quote))
        .route("/settle", post(handlers::settle))
        .route("/slash", post(handlers::slash))
        .route("/health", get(handlers::health))
        .route("/merchants", get(handlers::merchants))
        .route("/merchants/{address}", get(handlers::merchant_detail))
        .route("/payments", get(handlers::payments))
        .layer(CorsLayer::permissive())
        .with_state(app)
}
