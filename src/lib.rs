//! Storefront API Library
//!
//! Cart, checkout and signed payment-initiation backend.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod services;
pub mod tracing;

use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<config::AppConfig>,
    pub services: handlers::AppServices,
}

/// Outcome marker carried by every response envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseStatus {
    #[serde(rename = "OK")]
    Ok,
    Failed,
}

/// Response envelope shared by every endpoint:
/// `{ "status": "OK" | "Failed", "code": 200, "msg": "...", "data": ... }`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub status: ResponseStatus,
    pub code: u16,
    pub msg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn ok(msg: impl Into<String>, data: T) -> Self {
        Self {
            status: ResponseStatus::Ok,
            code: StatusCode::OK.as_u16(),
            msg: msg.into(),
            data: Some(data),
        }
    }

    pub fn failed(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Failed,
            code: status.as_u16(),
            msg: msg.into(),
            data: None,
        }
    }
}

/// Storefront routes, mirroring the public URL layout of the shop frontend.
pub fn storefront_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .merge(handlers::commerce::carts_routes())
        .merge(handlers::commerce::checkout_routes())
        .merge(handlers::payments::payment_routes())
}

/// Fully layered application router: routes, request ids and HTTP tracing.
pub fn app_router(state: AppState) -> Router {
    storefront_routes()
        .layer(crate::tracing::configure_http_tracing())
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id::request_id_middleware,
        ))
        .with_state(state)
}

async fn health_check(State(state): State<AppState>) -> Json<ApiResponse<Value>> {
    let db_status = match db::check_connection(&state.db).await {
        Ok(()) => "healthy",
        Err(_) => "unhealthy",
    };

    Json(ApiResponse::ok(
        "Service status",
        json!({
            "status": if db_status == "healthy" { "healthy" } else { "degraded" },
            "database": db_status,
            "version": env!("CARGO_PKG_VERSION"),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }),
    ))
}
