use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use contracts::{ApiError, ErrorCode};

use crate::StoreError;

#[derive(Debug)]
pub enum ServerError {
    Io(std::io::Error),
    Store(StoreError),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "server io error: {err}"),
            Self::Store(err) => write!(f, "server store error: {err}"),
        }
    }
}

impl std::error::Error for ServerError {}

impl From<std::io::Error> for ServerError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

#[derive(Debug)]
pub(super) struct HttpApiError {
    status: StatusCode,
    error: ApiError,
}

impl HttpApiError {
    pub(super) fn from_store(err: StoreError) -> Self {
        let error = err.to_api_error();
        let status = status_for(error.error_code);
        Self { status, error }
    }

    pub(super) fn missing_org_header() -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: ApiError::new(
                ErrorCode::OrgScopeViolation,
                "x-org-id header is required",
                None,
            ),
        }
    }

    pub(super) fn invalid_request(message: impl Into<String>, details: Option<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: ApiError::new(ErrorCode::ValidationFailed, message, details),
        }
    }
}

fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::ValidationFailed
        | ErrorCode::CharacteristicNotApplicable
        | ErrorCode::OrgScopeViolation
        | ErrorCode::ContractVersionUnsupported => StatusCode::BAD_REQUEST,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::InsufficientFunds
        | ErrorCode::StatusPreconditionFailed
        | ErrorCode::AgreementNotEditable
        | ErrorCode::Conflict
        | ErrorCode::TemplateInUse => StatusCode::CONFLICT,
        ErrorCode::StoreError | ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for HttpApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.error)).into_response()
    }
}
