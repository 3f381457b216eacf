use crate::handlers::common::{
    map_query_rejection, map_service_error, success_response, validate_input, CartItemQuery,
    UserQuery,
};
use crate::{
    errors::ApiError,
    services::commerce::CartSummary,
    ApiResponse, AppState,
};
use axum::{
    extract::{rejection::QueryRejection, Query, State},
    routing::{get, patch},
    Json, Router,
};

/// Creates the router for cart endpoints
pub fn carts_routes() -> Router<AppState> {
    Router::new()
        .route("/user/add-to-cart", patch(add_to_cart))
        .route("/user/remove-item", patch(remove_item))
        .route("/user/list-cart", get(list_cart))
}

/// Add one unit of a product to the user's cart
async fn add_to_cart(
    State(state): State<AppState>,
    query: Result<Query<CartItemQuery>, QueryRejection>,
) -> Result<Json<ApiResponse<CartSummary>>, ApiError> {
    let Query(query) = query.map_err(map_query_rejection)?;
    validate_input(&query)?;
    let (user_id, product_id) = query.ids()?;

    let cart = state
        .services
        .cart
        .add_item(user_id, product_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response("Successfully added to the cart", cart))
}

/// Remove every unit of a product from the user's cart
async fn remove_item(
    State(state): State<AppState>,
    query: Result<Query<CartItemQuery>, QueryRejection>,
) -> Result<Json<ApiResponse<CartSummary>>, ApiError> {
    let Query(query) = query.map_err(map_query_rejection)?;
    validate_input(&query)?;
    let (user_id, product_id) = query.ids()?;

    let cart = state
        .services
        .cart
        .remove_item(user_id, product_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response("Successfully removed from cart", cart))
}

/// Cart contents and total
async fn list_cart(
    State(state): State<AppState>,
    query: Result<Query<UserQuery>, QueryRejection>,
) -> Result<Json<ApiResponse<CartSummary>>, ApiError> {
    let Query(query) = query.map_err(map_query_rejection)?;
    validate_input(&query)?;
    let user_id = query.user_id()?;

    let cart = state
        .services
        .cart
        .compute_cart_total(user_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response("Successfully", cart))
}
