//! Thin HTTP and WebSocket service in front of the session registry.

pub mod error;
mod handlers;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    routing::{delete, get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::ServerConfig;
use crate::session::SessionRegistry;
use crate::transport::FrontendHub;

use handlers::{
    callback_invoke, catalog_delete, catalog_new, fits_delete, fits_new, health, polygon_delete,
    polygon_new, window_close, window_get, window_jump_to, window_list, window_message,
    window_new, window_predicates, window_title, window_ws,
};

/// Raster uploads carry whole image files.
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub registry: SessionRegistry,
    /// Must be the transport the registry's windows deliver through.
    pub hub: FrontendHub,
    pub config: Arc<ServerConfig>,
}

pub fn router(state: AppState) -> Router {
    let windows = Router::new()
        .route("/", get(window_list))
        .route("/new", post(window_new))
        .route("/{id}", get(window_get).delete(window_close))
        .route("/{id}/jump_to", post(window_jump_to))
        .route("/{id}/title", post(window_title))
        .route("/{id}/predicates", get(window_predicates))
        .route("/{id}/catalog/new", post(catalog_new))
        .route("/{id}/catalog/{cid}", delete(catalog_delete))
        .route("/{id}/fits/new", post(fits_new))
        .route("/{id}/fits/{rid}", delete(fits_delete))
        .route("/{id}/polygon/new", post(polygon_new))
        .route("/{id}/polygon/{pid}", delete(polygon_delete))
        .route("/{id}/callback/{cbid}", post(callback_invoke))
        .route("/{id}/message", post(window_message))
        .route("/{id}/ws", get(window_ws));

    let frontend_url = state.config.frontend_url.clone();
    let router = Router::new()
        .route("/health", get(health))
        .nest("/api/window", windows)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // The frontend is usually served from another origin.
    match frontend_url.and_then(|url| url.parse::<HeaderValue>().ok()) {
        Some(origin) => router.layer(
            CorsLayer::new()
                .allow_origin(origin)
                .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
                .allow_headers([header::CONTENT_TYPE]),
        ),
        None => router,
    }
}
