use std::error::Error as StdError;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::{
    application::{
        render::{RenderError, WorkspaceError},
        storage::StorageError,
    },
    domain::error::DomainError,
    infra::error::InfraError,
};

pub const MISSING_DIAGRAM_MESSAGE: &str = "Missing 'diagram' key in request body";
pub const RENDER_FAILED_MESSAGE: &str = "Failed to generate PNG";
pub const GENERIC_FAILURE_MESSAGE: &str = "An error occurred";

#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

/// Coarse classification of a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    ClientInput,
    Renderer,
    Storage,
    Resource,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::ClientInput => "client_input",
            FailureKind::Renderer => "renderer",
            FailureKind::Storage => "storage",
            FailureKind::Resource => "resource",
        }
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid render request: {0}")]
    InvalidRequest(#[source] DomainError),
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl GatewayError {
    pub fn kind(&self) -> FailureKind {
        match self {
            GatewayError::InvalidRequest(_) => FailureKind::ClientInput,
            GatewayError::Workspace(_) => FailureKind::Resource,
            GatewayError::Render(err) => err.failure_kind(),
            GatewayError::Storage(_) => FailureKind::Storage,
        }
    }

    fn status_code(&self) -> StatusCode {
        match self.kind() {
            FailureKind::ClientInput => StatusCode::BAD_REQUEST,
            FailureKind::Renderer | FailureKind::Storage | FailureKind::Resource => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn presentation_message(&self) -> &'static str {
        match self.kind() {
            FailureKind::ClientInput => MISSING_DIAGRAM_MESSAGE,
            FailureKind::Renderer => RENDER_FAILED_MESSAGE,
            FailureKind::Storage | FailureKind::Resource => GENERIC_FAILURE_MESSAGE,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let details = match self.kind() {
            FailureKind::ClientInput => None,
            _ => Some(self.to_string()),
        };
        let body = ErrorBody {
            error: self.presentation_message(),
            details,
        };
        let report = ErrorReport::from_error("application::gateway", status, &self);
        let mut response = (status, Json(body)).into_response();
        report.attach(&mut response);
        response
    }
}

/// Process-level failures surfaced by the binary.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}
