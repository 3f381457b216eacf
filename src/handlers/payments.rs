use crate::handlers::common::{
    map_json_rejection, map_service_error, success_response, validate_input,
};
use crate::{
    entities::payment_payload,
    errors::ApiError,
    services::payments::PaymentRequest,
    ApiResponse, AppState,
};
use axum::{
    extract::{rejection::JsonRejection, State},
    routing::{get, post},
    Json, Router,
};

/// Creates the router for payment endpoints
pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/user/payment", post(create_payment))
        .route("/user/view-payment", get(view_payments))
}

/// Sign and submit a payment request; responds with the gateway pay URL
async fn create_payment(
    State(state): State<AppState>,
    payload: Result<Json<PaymentRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<String>>, ApiError> {
    let Json(payload) = payload.map_err(map_json_rejection)?;
    validate_input(&payload)?;

    let pay_url = state
        .services
        .payments
        .submit_payment(payload)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(
        "New payload has been successfully added",
        pay_url,
    ))
}

/// Every payload sent to the gateway, oldest first
async fn view_payments(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<payment_payload::Model>>>, ApiError> {
    let payloads = state
        .services
        .payments
        .list_payloads()
        .await
        .map_err(map_service_error)?;

    Ok(success_response("Successfully", payloads))
}
