use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde::Serialize;

use crate::infrastructure::StoreError;
use crate::BillingError;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
}

impl BillingError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::EmptyCart | Self::CartExpired | Self::ProductUnavailable(_) | Self::CouponInvalid(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InsufficientStock { .. } | Self::Store(StoreError::Conflict(_)) => StatusCode::CONFLICT,
            Self::IntegrityViolation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::TotalsMismatch { .. } | Self::CheckoutFailed | Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-facing text. Internal failures say nothing about their cause.
    fn response_message(&self) -> String {
        match self {
            Self::Store(StoreError::Conflict(_)) => "Cart changed while the request ran; please retry".to_string(),
            Self::TotalsMismatch { .. } | Self::Store(_) => "Internal server error".to_string(),
            Self::CheckoutFailed => "Checkout failed, nothing was charged; please retry".to_string(),
            Self::CouponInvalid(reason) => reason.to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for BillingError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            reason: match &self { Self::CouponInvalid(reason) => Some(reason.code()), _ => None },
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::services::CouponRejection;
    use uuid::Uuid;

    #[test]
    fn test_status_mapping() {
        let tampered = BillingError::IntegrityViolation { item_id: Uuid::new_v4(), product_id: Uuid::new_v4() };
        assert_eq!(tampered.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(tampered.response_message(), "cart integrity check failed");
        assert_eq!(BillingError::CouponInvalid(CouponRejection::Expired).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(BillingError::InsufficientStock { product_id: Uuid::new_v4(), available: 0, requested: 1 }.status_code(), StatusCode::CONFLICT);
        assert_eq!(BillingError::CheckoutFailed.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        let stale = BillingError::Store(StoreError::Conflict("cart is no longer active".into()));
        assert_eq!(stale.status_code(), StatusCode::CONFLICT);
        assert_eq!(stale.response_message(), "Cart changed while the request ran; please retry");
    }
}
