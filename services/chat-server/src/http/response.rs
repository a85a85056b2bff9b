use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chat_core::DeliveryError;
use chat_protocol::{HttpErrorEnvelope, error_codes};
use std::fmt::Display;

pub type HttpResponse = Response;
pub type HttpResult<T = ()> = Result<T, HttpResponse>;

pub(crate) fn json_error(
    status: StatusCode,
    code: impl Into<String>,
    message: impl Into<String>,
) -> HttpResponse {
    (
        status,
        Json(HttpErrorEnvelope {
            code: code.into(),
            message: message.into(),
            details: None,
        }),
    )
        .into_response()
}

pub fn internal_error(err: impl Display) -> HttpResponse {
    json_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        error_codes::STORAGE,
        err.to_string(),
    )
}

pub fn bad_request(message: impl Into<String>) -> HttpResponse {
    json_error(StatusCode::BAD_REQUEST, error_codes::VALIDATION, message)
}

pub fn not_found(message: impl Into<String>) -> HttpResponse {
    json_error(StatusCode::NOT_FOUND, error_codes::NOT_FOUND, message)
}

pub fn forbidden(message: impl Into<String>) -> HttpResponse {
    json_error(StatusCode::FORBIDDEN, error_codes::FORBIDDEN, message)
}

pub fn unauthorized(message: impl Into<String>) -> HttpResponse {
    json_error(StatusCode::UNAUTHORIZED, error_codes::UNAUTHORIZED, message)
}

/// Maps the core's error taxonomy onto the frozen HTTP envelope.
pub fn delivery_error(err: DeliveryError) -> HttpResponse {
    match err {
        DeliveryError::NotFound(msg) => not_found(msg),
        DeliveryError::Forbidden(msg) => forbidden(msg),
        DeliveryError::Validation(msg) => bad_request(msg),
        DeliveryError::Conflict(msg) => json_error(StatusCode::CONFLICT, error_codes::CONFLICT, msg),
        DeliveryError::Storage(e) => internal_error(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn assert_error_response(
        response: Response,
        expected_status: StatusCode,
        expected_code: &str,
    ) {
        assert_eq!(response.status(), expected_status);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: HttpErrorEnvelope = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.code, expected_code);
    }

    #[tokio::test]
    async fn not_found_sets_not_found_contract() {
        let response = not_found("message missing");
        assert_error_response(response, StatusCode::NOT_FOUND, error_codes::NOT_FOUND).await;
    }

    #[tokio::test]
    async fn delivery_error_forbidden_maps_to_403() {
        let response = delivery_error(DeliveryError::Forbidden("not a member".to_owned()));
        assert_error_response(response, StatusCode::FORBIDDEN, error_codes::FORBIDDEN).await;
    }
}
