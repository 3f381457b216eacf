//! HTTP-level tests for checkout and the order ledger.

mod common;

use axum::http::{Method, StatusCode};
use common::{response_json, TestApp};
use uuid::Uuid;

async fn add(app: &TestApp, user: Uuid, product: Uuid) {
    let response = app
        .request(
            Method::PATCH,
            &format!("/user/add-to-cart?productId={}&userId={}", product, user),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn checkout_creates_order_and_clears_cart() {
    let app = TestApp::new().await;
    let user = app.seed_user("alice").await;
    let mug = app.seed_product("Mug", 1000).await;
    let lamp = app.seed_product("Lamp", 1500).await;
    add(&app, user, mug).await;
    add(&app, user, lamp).await;

    let response = app
        .request(Method::GET, &format!("/user/cart-checkout?userId={}", user), None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = response_json(response).await;
    assert_eq!(body["msg"], "Successfully placed the order");
    assert_eq!(body["data"]["total"], "25.00");
    assert_eq!(body["data"]["totalMinor"], 2500);
    assert_eq!(body["data"]["userId"], user.to_string());
    assert_eq!(body["data"]["items"].as_array().map(Vec::len), Some(2));

    let cart = response_json(
        app.request(Method::GET, &format!("/user/list-cart?userId={}", user), None)
            .await,
    )
    .await;
    assert_eq!(cart["data"]["itemCount"], 0);
}

#[tokio::test]
async fn empty_cart_checkout_is_unprocessable() {
    let app = TestApp::new().await;
    let user = app.seed_user("bob").await;

    let response = app
        .request(Method::GET, &format!("/user/cart-checkout?userId={}", user), None)
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let body = response_json(response).await;
    assert_eq!(body["status"], "Failed");
    assert_eq!(body["code"], 422);

    let orders = response_json(app.request(Method::GET, "/admin/view-orders", None).await).await;
    assert_eq!(orders["data"].as_array().map(Vec::len), Some(0));
}

#[tokio::test]
async fn second_checkout_of_same_cart_fails() {
    let app = TestApp::new().await;
    let user = app.seed_user("carol").await;
    let mug = app.seed_product("Mug", 1000).await;
    add(&app, user, mug).await;

    let uri = format!("/user/cart-checkout?userId={}", user);
    let (first, second) = tokio::join!(
        app.request(Method::GET, &uri, None),
        app.request(Method::GET, &uri, None)
    );

    let mut statuses = [first.status(), second.status()];
    statuses.sort();
    assert_eq!(
        statuses,
        [StatusCode::OK, StatusCode::UNPROCESSABLE_ENTITY]
    );

    let orders = response_json(app.request(Method::GET, "/admin/view-orders", None).await).await;
    assert_eq!(orders["data"].as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn checkout_for_unknown_user_is_not_found() {
    let app = TestApp::new().await;

    let response = app
        .request(
            Method::GET,
            &format!("/user/cart-checkout?userId={}", Uuid::new_v4()),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn checkout_without_user_id_is_bad_request() {
    let app = TestApp::new().await;

    let response = app.request(Method::GET, "/user/cart-checkout", None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response_json(response).await;
    assert_eq!(body["status"], "Failed");
}

#[tokio::test]
async fn view_orders_lists_newest_first() {
    let app = TestApp::new().await;
    let first_user = app.seed_user("dave").await;
    let second_user = app.seed_user("erin").await;
    let mug = app.seed_product("Mug", 1000).await;

    add(&app, first_user, mug).await;
    app.request(
        Method::GET,
        &format!("/user/cart-checkout?userId={}", first_user),
        None,
    )
    .await;
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    add(&app, second_user, mug).await;
    add(&app, second_user, mug).await;
    app.request(
        Method::GET,
        &format!("/user/cart-checkout?userId={}", second_user),
        None,
    )
    .await;

    let response = app.request(Method::GET, "/admin/view-orders", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = response_json(response).await;
    let orders = body["data"].as_array().expect("order list");
    assert_eq!(orders.len(), 2);
    assert_eq!(orders[0]["userId"], second_user.to_string());
    assert_eq!(orders[0]["total"], "20.00");
    assert_eq!(orders[1]["userId"], first_user.to_string());
}

#[tokio::test]
async fn user_order_history_lists_only_that_user() {
    let app = TestApp::new().await;
    let ada = app.seed_user("ada").await;
    let bob = app.seed_user("bob").await;
    let mug = app.seed_product("Mug", 1000).await;

    for user in [ada, bob] {
        add(&app, user, mug).await;
        let response = app
            .request(Method::GET, &format!("/user/cart-checkout?userId={}", user), None)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app
        .request(Method::GET, &format!("/user/view-orders?userId={}", ada), None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    let orders = body["data"].as_array().expect("order list");
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0]["userId"], ada.to_string());

    let response = app
        .request(
            Method::GET,
            &format!("/user/view-orders?userId={}", Uuid::new_v4()),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app.request(Method::GET, "/user/view-orders", None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
