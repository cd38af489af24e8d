//! HTTP router construction.

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::service::GraphqlService;

/// Build the full Axum router with CORS and request tracing.
/// Returns Router<()> (state fully applied) for use with axum::serve.
pub fn build_app(service: Arc<GraphqlService>) -> Router<()> {
    Router::new()
        .merge(GraphqlService::router())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}
