// HTTP surfaces of both services
pub mod feed_routes;
pub mod rpc;
pub mod social_graph_routes;

use axum::{extract::State, middleware, routing::get, Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::app_state::{FeedState, SocialGraphState};
use crate::infrastructure::middleware::{request_id_middleware, require_bearer};
use crate::infrastructure::monitoring::{MetricsCollector, MetricsSnapshot};

pub async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn metrics_handler(
    State(metrics): State<Arc<MetricsCollector>>,
) -> Json<MetricsSnapshot> {
    Json(metrics.snapshot().await)
}

/// Unauthenticated operational routes
fn create_public_router(metrics: Arc<MetricsCollector>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(metrics)
}

/// Wrap authenticated routes with the shared layers. Request ids are
/// outermost so every response carries one, 401s included.
fn finish(protected: Router, public: Router) -> Router {
    protected
        .merge(public)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(middleware::from_fn(request_id_middleware))
}

pub fn create_social_graph_app(state: SocialGraphState) -> Router {
    let validator = state.validator.clone();
    let public = create_public_router(state.metrics.clone());
    let protected = social_graph_routes::create_social_graph_router()
        .merge(rpc::create_relationship_rpc_router())
        .route_layer(middleware::from_fn_with_state(validator, require_bearer))
        .with_state(state);
    finish(protected, public)
}

pub fn create_feed_app(state: FeedState) -> Router {
    let validator = state.validator.clone();
    let public = create_public_router(state.metrics.clone());
    let protected = feed_routes::create_feed_router()
        .merge(rpc::create_feed_rpc_router())
        .route_layer(middleware::from_fn_with_state(validator, require_bearer))
        .with_state(state);
    finish(protected, public)
}
