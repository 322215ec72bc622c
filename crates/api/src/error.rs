//! API error types with HTTP response mapping.
//!
//! Every error renders as `{ "title", "detail", "status", "data" }`.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use saga::OrderError;
use serde::Serialize;
use serde_json::{Value, json};

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Error from the order coordinator.
    Order(OrderError),
    /// Bad request from the client.
    BadRequest(String),
    /// The caller did not identify itself.
    Unauthorized,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub title: String,
    pub detail: String,
    pub status: u16,
    pub data: Value,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, title, detail, data) = match self {
            ApiError::Order(err) => order_error_parts(err),
            ApiError::BadRequest(detail) => {
                (StatusCode::BAD_REQUEST, "Bad request".to_string(), detail, Value::Null)
            }
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "Unauthorized".to_string(),
                "missing or invalid x-user-id header".to_string(),
                Value::Null,
            ),
        };

        metrics::counter!("http_errors_total", "status" => status.as_u16().to_string())
            .increment(1);
        let body = ErrorBody {
            title,
            detail,
            status: status.as_u16(),
            data,
        };
        (status, Json(body)).into_response()
    }
}

fn order_error_parts(err: OrderError) -> (StatusCode, String, String, Value) {
    let detail = err.to_string();
    match err {
        OrderError::Validation {
            title,
            detail,
            fields,
        } => (StatusCode::BAD_REQUEST, title, detail, json!(fields)),
        OrderError::TransitionRejected { from, to } => (
            StatusCode::CONFLICT,
            "Invalid status transition".to_string(),
            detail,
            json!({ "from": from, "to": to }),
        ),
        OrderError::NotFound { entity, id } => (
            StatusCode::NOT_FOUND,
            format!("{entity} not found"),
            detail,
            json!({ "id": id }),
        ),
        OrderError::OutOfStock { product_id } => (
            StatusCode::CONFLICT,
            "Out of stock".to_string(),
            detail,
            json!({ "productId": product_id }),
        ),
        OrderError::Pricing(_) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            "Pricing failed".to_string(),
            detail,
            Value::Null,
        ),
        OrderError::Unavailable { ref service, .. } => (
            StatusCode::SERVICE_UNAVAILABLE,
            "Service unavailable".to_string(),
            detail,
            json!({ "service": service }),
        ),
        OrderError::Internal(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error".to_string(),
            "something went wrong".to_string(),
            Value::Null,
        ),
    }
}

impl From<OrderError> for ApiError {
    fn from(err: OrderError) -> Self {
        ApiError::Order(err)
    }
}
