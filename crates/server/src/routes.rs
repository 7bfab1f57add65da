//! Demo endpoints sitting behind the rate limiter.

use axum::Json;
use http::StatusCode;

#[derive(Debug, serde::Serialize)]
pub(crate) struct Message {
    message: &'static str,
    status: &'static str,
}

/// Handles requests to the root endpoint.
pub(crate) async fn home() -> (StatusCode, Json<Message>) {
    (
        StatusCode::OK,
        Json(Message {
            message: "Welcome to the Gatehouse API",
            status: "ok",
        }),
    )
}

/// Handles requests to the test endpoint.
pub(crate) async fn test() -> (StatusCode, Json<Message>) {
    (
        StatusCode::OK,
        Json(Message {
            message: "This is a test endpoint",
            status: "ok",
        }),
    )
}
