use crate::handlers::common::{
    map_query_rejection, map_service_error, success_response, validate_input, UserQuery,
};
use crate::{errors::ApiError, services::commerce::OrderView, ApiResponse, AppState};
use axum::{
    extract::{rejection::QueryRejection, Query, State},
    routing::get,
    Json, Router,
};

/// Creates the router for checkout and the order ledger
pub fn checkout_routes() -> Router<AppState> {
    Router::new()
        .route("/user/cart-checkout", get(checkout))
        .route("/admin/view-orders", get(view_orders))
        .route("/user/view-orders", get(view_user_orders))
}

/// Turn the user's cart into an order
async fn checkout(
    State(state): State<AppState>,
    query: Result<Query<UserQuery>, QueryRejection>,
) -> Result<Json<ApiResponse<OrderView>>, ApiError> {
    let Query(query) = query.map_err(map_query_rejection)?;
    validate_input(&query)?;
    let user_id = query.user_id()?;

    let order = state
        .services
        .checkout
        .checkout(user_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response("Successfully placed the order", order))
}

/// All orders, newest first
async fn view_orders(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<OrderView>>>, ApiError> {
    let orders = state
        .services
        .checkout
        .list_orders()
        .await
        .map_err(map_service_error)?;

    Ok(success_response("Successfully", orders))
}

/// Orders of one user, newest first
async fn view_user_orders(
    State(state): State<AppState>,
    query: Result<Query<UserQuery>, QueryRejection>,
) -> Result<Json<ApiResponse<Vec<OrderView>>>, ApiError> {
    let Query(query) = query.map_err(map_query_rejection)?;
    validate_input(&query)?;
    let user_id = query.user_id()?;

    let orders = state
        .services
        .checkout
        .list_orders_for_user(user_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response("Successfully", orders))
}
