//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the REST API, WebSocket endpoint, and OpenAPI documentation.

use crate::{
    handlers,
    models::{
        ConversationMessage, ErrorResponse, HistoryEntry, Role, SaveDataRequest,
        SaveDataResponse, SessionSnapshot,
    },
    state::AppState,
    ws::ws_handler,
};

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::create_session,
        handlers::save_data,
        handlers::get_session,
    ),
    components(
        schemas(SaveDataRequest, SaveDataResponse, ConversationMessage, Role, SessionSnapshot, HistoryEntry, ErrorResponse)
    ),
    tags(
        (name = "Onboarding API", description = "Voice session relay and onboarding data collection")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    // Group all routes that require AppState into their own router.
    let api_router = Router::new()
        .route("/", get(handlers::index))
        .route("/session", post(handlers::create_session))
        .route("/session/{id}", get(handlers::get_session))
        .route("/save", post(handlers::save_data))
        .route("/ws/onboard", get(ws_handler))
        // Apply the state ONLY to this group of routes.
        .with_state(app_state);

    // Create the final router that merges the stateful routes
    // with the stateless routes (like Swagger UI).
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}
