use crate::errors::{ApiError, ServiceError};
use crate::ApiResponse;
use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

/// Standard success envelope
pub fn success_response<T>(msg: &str, data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse::ok(msg, data))
}

/// Validate request input
pub fn validate_input<T: Validate>(input: &T) -> Result<(), ApiError> {
    input
        .validate()
        .map_err(|e| ApiError::ValidationError(format!("Validation failed: {}", e)))
}

/// Map service errors to API errors
pub fn map_service_error(err: ServiceError) -> ApiError {
    ApiError::ServiceError(err)
}

pub fn map_json_rejection(rejection: JsonRejection) -> ApiError {
    ApiError::BadRequest(rejection.body_text())
}

pub fn map_query_rejection(rejection: QueryRejection) -> ApiError {
    ApiError::BadRequest(rejection.body_text())
}

/// Parses a required identifier, naming the parameter in the error.
pub fn parse_id(name: &str, raw: &str) -> Result<Uuid, ApiError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ServiceError::InvalidInput(format!("Missing {}", name)).into());
    }
    Uuid::parse_str(raw)
        .map_err(|_| ServiceError::InvalidInput(format!("Invalid {}: {}", name, raw)).into())
}

/// `?userId=`
#[derive(Debug, Default, Deserialize, Validate)]
pub struct UserQuery {
    #[serde(default, rename = "userId")]
    #[validate(length(min = 1, message = "Missing userId"))]
    pub user_id: String,
}

impl UserQuery {
    pub fn user_id(&self) -> Result<Uuid, ApiError> {
        parse_id("userId", &self.user_id)
    }
}

/// `?productId=&userId=`
#[derive(Debug, Default, Deserialize, Validate)]
pub struct CartItemQuery {
    #[serde(default, rename = "productId")]
    #[validate(length(min = 1, message = "Missing productId"))]
    pub product_id: String,
    #[serde(default, rename = "userId")]
    #[validate(length(min = 1, message = "Missing userId"))]
    pub user_id: String,
}

impl CartItemQuery {
    pub fn ids(&self) -> Result<(Uuid, Uuid), ApiError> {
        Ok((
            parse_id("userId", &self.user_id)?,
            parse_id("productId", &self.product_id)?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn parse_id_accepts_uuid() {
        let id = Uuid::new_v4();
        assert_eq!(parse_id("userId", &id.to_string()).unwrap(), id);
    }

    #[test]
    fn parse_id_rejects_empty_and_garbage() {
        assert_matches!(
            parse_id("userId", "  "),
            Err(ApiError::ServiceError(ServiceError::InvalidInput(msg))) if msg == "Missing userId"
        );
        assert_matches!(
            parse_id("productId", "42"),
            Err(ApiError::ServiceError(ServiceError::InvalidInput(_)))
        );
    }

    #[test]
    fn empty_query_fails_validation() {
        let query = CartItemQuery::default();
        assert!(validate_input(&query).is_err());
        assert!(validate_input(&UserQuery {
            user_id: Uuid::new_v4().to_string()
        })
        .is_ok());
    }
}
