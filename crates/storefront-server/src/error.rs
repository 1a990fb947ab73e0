use actix_web::{HttpResponse, ResponseError};
use hpp::PaymentError;
use std::fmt;

#[derive(Debug)]
pub enum StoreError {
    /// Database error
    Database(rusqlite::Error),
    /// Protocol-level error from the payment library
    Payment(PaymentError),
    /// Checkout request failed validation
    InvalidCheckout(String),
    /// No order with this number
    OrderNotFound(String),
    /// Order is no longer pending
    OrderAlreadySettled(String),
    /// Internal error
    Internal(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Database(e) => write!(f, "database error: {}", e),
            StoreError::Payment(e) => write!(f, "{}", e),
            StoreError::InvalidCheckout(msg) => write!(f, "invalid checkout: {}", msg),
            StoreError::OrderNotFound(number) => write!(f, "order not found: {}", number),
            StoreError::OrderAlreadySettled(number) => {
                write!(f, "order already settled: {}", number)
            }
            StoreError::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e)
    }
}

impl From<PaymentError> for StoreError {
    fn from(e: PaymentError) -> Self {
        StoreError::Payment(e)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Internal(format!("serialization failed: {e}"))
    }
}

impl ResponseError for StoreError {
    fn error_response(&self) -> HttpResponse {
        match self {
            StoreError::InvalidCheckout(msg) => {
                HttpResponse::BadRequest().json(serde_json::json!({
                    "error": "invalid_checkout",
                    "message": msg
                }))
            }
            StoreError::Payment(PaymentError::InvalidAmount(msg)) => {
                HttpResponse::BadRequest().json(serde_json::json!({
                    "error": "invalid_amount",
                    "message": msg
                }))
            }
            StoreError::Payment(PaymentError::UnsupportedCountry(code)) => {
                HttpResponse::BadRequest().json(serde_json::json!({
                    "error": "unsupported_country",
                    "message": format!("Shipping to '{}' is not supported", code)
                }))
            }
            StoreError::OrderNotFound(number) => HttpResponse::NotFound().json(serde_json::json!({
                "error": "order_not_found",
                "message": format!("Order '{}' not found", number)
            })),
            StoreError::OrderAlreadySettled(number) => {
                HttpResponse::Conflict().json(serde_json::json!({
                    "error": "order_settled",
                    "message": format!("Order '{}' has already been paid or closed", number)
                }))
            }
            StoreError::Payment(e) => {
                tracing::error!("Payment configuration error: {}", e);
                HttpResponse::InternalServerError().json(serde_json::json!({
                    "error": "internal_error",
                    "message": "Payments are temporarily unavailable"
                }))
            }
            StoreError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                HttpResponse::InternalServerError().json(serde_json::json!({
                    "error": "internal_error",
                    "message": "An internal error occurred"
                }))
            }
            StoreError::Database(e) => {
                tracing::error!("Database error: {}", e);
                HttpResponse::InternalServerError().json(serde_json::json!({
                    "error": "internal_error",
                    "message": "An internal error occurred"
                }))
            }
        }
    }
}
