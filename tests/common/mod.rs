#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{self, Body},
    http::{header, Method, Request},
    response::Response,
    Router,
};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use serde_json::Value;
use storefront_api::{
    app_router,
    config::{AppConfig, PaymentGatewayConfig},
    db::{self, DbConfig},
    entities::{product, user},
    events::{self, EventSender},
    handlers::AppServices,
    services::payments::HttpPaymentGateway,
    AppState,
};
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::MockServer;

pub const GATEWAY_PATH: &str = "/v2/gateway/api/create";

/// Application backed by an in-memory SQLite database and a mock payment gateway.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub gateway: MockServer,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        let gateway = MockServer::start().await;

        let mut payment = PaymentGatewayConfig::new(
            format!("{}{}", gateway.uri(), GATEWAY_PATH),
            "MOMOTEST",
            "test-access-key",
            "test-secret-key",
        );
        payment.max_attempts = 2;
        payment.retry_backoff_ms = 1;
        payment.request_timeout_secs = 2;

        let mut cfg = AppConfig::new("sqlite::memory:", payment);
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_with_config(&DbConfig::from(&cfg))
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let (event_sender, event_rx) = EventSender::channel(cfg.event_channel_capacity);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let http_gateway =
            HttpPaymentGateway::new(&cfg.payment).expect("gateway client for tests");
        let cfg = Arc::new(cfg);
        let services = AppServices::new(
            db_arc.clone(),
            Arc::new(event_sender),
            Arc::new(http_gateway),
            cfg.clone(),
        )
        .expect("services");

        let state = AppState {
            db: db_arc,
            config: cfg,
            services,
        };

        Self {
            router: app_router(state.clone()),
            state,
            gateway,
            _event_task: event_task,
        }
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.state.db
    }

    pub async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        self.router
            .clone()
            .oneshot(builder.body(body).expect("request"))
            .await
            .expect("router response")
    }

    /// Sends a raw body with a JSON content type, for malformed-payload cases.
    pub async fn request_raw_json(&self, method: Method, uri: &str, raw: &str) -> Response {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(raw.to_string()))
            .expect("request");

        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router response")
    }

    pub async fn seed_user(&self, name: &str) -> Uuid {
        user::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            cart_version: Set(0),
            created_at: Set(Utc::now()),
        }
        .insert(self.db())
        .await
        .expect("seed user")
        .id
    }

    pub async fn seed_product(&self, name: &str, price_minor: i64) -> Uuid {
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            price_minor: Set(price_minor),
            available: Set(true),
            created_at: Set(Utc::now()),
        }
        .insert(self.db())
        .await
        .expect("seed product")
        .id
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("json body")
}
