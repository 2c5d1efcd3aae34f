use axum::{
    http::{HeaderValue, Method},
    routing::get,
    Extension, Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::controllers;
use crate::AppState;

pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.cors_origins);
    let state = Arc::new(state);
    Router::new()
        .route("/health", get(controllers::health))
        // GET /messages serve sia la lista che l'upgrade WebSocket
        .route("/messages", get(controllers::messages_get).post(controllers::create_message))
        .route(
            "/messages/:id",
            get(controllers::get_message)
                .patch(controllers::update_message)
                .delete(controllers::delete_message),
        )
        .layer(Extension(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

// "*" ammette qualsiasi origine; origini non valide vengono ignorate con un warning
fn cors_layer(origins: &[String]) -> CorsLayer {
    let methods = [Method::GET, Method::POST, Method::PATCH, Method::DELETE];
    let base = CorsLayer::new().allow_methods(methods).allow_headers(Any);
    if origins.iter().any(|o| o == "*") {
        return base.allow_origin(Any);
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    base.allow_origin(AllowOrigin::list(allowed))
}
