use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tenancy_core::errors::TenancyError;

#[derive(Debug)]
pub struct TenancyAxumError(pub anyhow::Error);

impl From<anyhow::Error> for TenancyAxumError {
    fn from(e: anyhow::Error) -> Self {
        Self(e)
    }
}

impl From<TenancyError> for TenancyAxumError {
    fn from(e: TenancyError) -> Self {
        Self(e.into_anyhow())
    }
}

impl IntoResponse for TenancyAxumError {
    fn into_response(self) -> Response {
        // keep the structured fields even when wrapped in anyhow contexts
        if let Some(err) = TenancyError::from_anyhow(&self.0) {
            return respond(err.sanitize_for_client());
        }

        respond(TenancyError::general_error(self.0.to_string()))
    }
}

fn respond(err: TenancyError) -> Response {
    let status = StatusCode::from_u16(err.code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(err.to_json())).into_response()
}
