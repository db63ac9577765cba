//! Axum Handlers for the REST API
//!
//! This module contains the logic for handling HTTP requests: the static
//! client page, the voice session relay, the persistence sink and the chat
//! session lookup. It uses `utoipa` doc comments to generate OpenAPI documentation.

use axum::{
    body::Bytes,
    extract::{
        Path, State,
        rejection::{JsonRejection, PathRejection},
    },
    http::{StatusCode, header},
    response::{Html, IntoResponse, Json, Response},
};
use onboard_core::prompt::RealtimeSessionConfig;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    models::{ErrorResponse, SaveDataRequest, SaveDataResponse, SessionSnapshot},
    relay::RelayError,
    state::AppState,
};

pub const SAVE_SUCCESS_MESSAGE: &str = "Data and transcript saved successfully!";

pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Unprocessable(String),
    Relay(RelayError),
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(error) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { error })).into_response()
            }
            ApiError::NotFound(error) => {
                (StatusCode::NOT_FOUND, Json(ErrorResponse { error })).into_response()
            }
            ApiError::Unprocessable(error) => {
                (StatusCode::UNPROCESSABLE_ENTITY, Json(ErrorResponse { error })).into_response()
            }
            ApiError::Relay(err) => {
                // Upstream details stay in the logs.
                error!("Session relay failed: {}", err);
                let (status, error) = match err {
                    RelayError::Timeout => (
                        StatusCode::GATEWAY_TIMEOUT,
                        "The realtime API did not respond in time.",
                    ),
                    RelayError::Upstream { .. } | RelayError::Transport(_) => (
                        StatusCode::BAD_GATEWAY,
                        "The realtime API could not create the session.",
                    ),
                    RelayError::MissingApiKey | RelayError::Encode(_) => (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "An internal server error occurred.",
                    ),
                };
                (
                    status,
                    Json(ErrorResponse {
                        error: error.to_string(),
                    }),
                )
                    .into_response()
            }
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                let error = "An internal server error occurred.".to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse { error }),
                )
                    .into_response()
            }
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::InternalServerError(err.into())
    }
}

/// Serve the browser client.
pub async fn index(State(state): State<Arc<AppState>>) -> Html<String> {
    Html(state.client_page.as_str().to_owned())
}

/// Open a realtime voice session from a WebRTC SDP offer.
#[utoipa::path(
    post,
    path = "/session",
    request_body(content = String, content_type = "application/sdp", description = "SDP offer"),
    responses(
        (status = 200, description = "SDP answer from the realtime API", body = String, content_type = "application/sdp"),
        (status = 502, description = "Realtime API rejected the offer", body = ErrorResponse),
        (status = 504, description = "Realtime API timed out", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    sdp_offer: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let session = RealtimeSessionConfig::for_schema(
        &state.schema,
        &state.config.realtime_model,
        &state.config.realtime_voice,
    );

    let sdp_answer = state
        .relay
        .create_call(sdp_offer, &session)
        .await
        .map_err(ApiError::Relay)?;

    Ok(([(header::CONTENT_TYPE, "application/sdp")], sdp_answer))
}

/// Save the collected profile and the conversation transcript.
#[utoipa::path(
    post,
    path = "/save",
    request_body = SaveDataRequest,
    responses(
        (status = 200, description = "Data written", body = SaveDataResponse),
        (status = 400, description = "Malformed body", body = ErrorResponse),
        (status = 422, description = "Required fields missing", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn save_data(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SaveDataRequest>, JsonRejection>,
) -> Result<Json<SaveDataResponse>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    if state.config.require_complete_save {
        let missing = state.schema.missing_fields(&request.data);
        if !missing.is_empty() {
            return Err(ApiError::Unprocessable(format!(
                "Missing required fields: {}",
                missing.join(", ")
            )));
        }
    }

    let receipt = state.sink.save(&request.data, &request.transcript).await?;
    info!(
        transcript_messages = receipt.transcript_messages,
        "Onboarding data persisted"
    );

    Ok(Json(SaveDataResponse {
        message: SAVE_SUCCESS_MESSAGE.to_string(),
        data: request.data,
        transcript_messages: receipt.transcript_messages,
    }))
}

/// Get the answers collected by a chat session.
#[utoipa::path(
    get,
    path = "/session/{id}",
    responses(
        (status = 200, description = "Session details", body = SessionSnapshot),
        (status = 400, description = "Malformed session ID", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID")
    )
)]
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let Path(id) = id.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let session = state
        .sessions
        .get(id)
        .await
        .ok_or_else(|| ApiError::NotFound("Session not found".to_string()))?;
    Ok(Json(session.into()))
}
