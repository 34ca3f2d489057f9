use axum::{
    Json,
    extract::State,
    http::{
        HeaderValue, StatusCode,
        header::{CONTENT_DISPOSITION, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
};
use bytes::Bytes;

use crate::domain::render::{PNG_CONTENT_TYPE, ResponseEnvelope};

use super::state::GatewayState;

const INLINE_DISPOSITION: &str = "inline; filename=\"diagram.png\"";

pub(super) async fn plantuml_to_png(State(state): State<GatewayState>, body: Bytes) -> Response {
    match state.gateway.handle(&body).await {
        Ok(ResponseEnvelope::Inline(artifact)) => (
            StatusCode::OK,
            [
                (CONTENT_TYPE, HeaderValue::from_static(PNG_CONTENT_TYPE)),
                (
                    CONTENT_DISPOSITION,
                    HeaderValue::from_static(INLINE_DISPOSITION),
                ),
            ],
            artifact.into_bytes(),
        )
            .into_response(),
        Ok(ResponseEnvelope::Url(envelope)) => (StatusCode::OK, Json(envelope)).into_response(),
        Err(err) => err.into_response(),
    }
}

pub(super) async fn healthz() -> StatusCode {
    StatusCode::NO_CONTENT
}
