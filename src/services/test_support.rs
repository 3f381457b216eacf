//! In-memory database fixture shared by the service unit tests.

use crate::{
    config::{AppConfig, PaymentGatewayConfig},
    db::{self, DbConfig},
    entities::{product, user},
    events::{self, EventSender},
    services::{
        commerce::{CartService, CheckoutService, UserLocks},
        payments::{PaymentGateway, PaymentService, RequestIdGenerator},
    },
};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use std::sync::Arc;
use uuid::Uuid;

pub(crate) fn test_config() -> AppConfig {
    let mut config = AppConfig::new(
        "sqlite::memory:",
        PaymentGatewayConfig::new(
            "http://127.0.0.1:9/v2/gateway/api/create",
            "MOMOTEST",
            "test-access-key",
            "test-secret-key",
        ),
    );
    config.db_max_connections = 1;
    config.db_min_connections = 1;
    config
}

pub(crate) struct TestDb {
    db: Arc<DatabaseConnection>,
    config: Arc<AppConfig>,
    events: Arc<EventSender>,
    locks: Arc<UserLocks>,
}

impl TestDb {
    pub(crate) async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    /// Fixture over a tweaked copy of [`test_config`].
    pub(crate) async fn with_config(config: AppConfig) -> Self {
        let pool = db::establish_connection_with_config(&DbConfig::from(&config))
            .await
            .expect("in-memory database");
        db::run_migrations(&pool).await.expect("migrations");

        let (events, rx) = EventSender::channel(config.event_channel_capacity);
        tokio::spawn(events::process_events(rx));

        Self {
            db: Arc::new(pool),
            config: Arc::new(config),
            events: Arc::new(events),
            locks: Arc::new(UserLocks::new()),
        }
    }

    pub(crate) fn conn(&self) -> &DatabaseConnection {
        &self.db
    }

    pub(crate) fn config(&self) -> &AppConfig {
        &self.config
    }

    pub(crate) fn locks(&self) -> &UserLocks {
        &self.locks
    }

    pub(crate) fn cart_service(&self) -> CartService {
        CartService::new(
            self.db.clone(),
            self.events.clone(),
            self.locks.clone(),
            self.config.clone(),
        )
    }

    pub(crate) fn checkout_service(&self) -> CheckoutService {
        CheckoutService::new(
            self.db.clone(),
            self.events.clone(),
            self.locks.clone(),
            self.config.clone(),
        )
    }

    pub(crate) fn payment_service(&self, gateway: Arc<dyn PaymentGateway>) -> PaymentService {
        let ids = RequestIdGenerator::new(&self.config.request_id).expect("id generator");
        self.payment_service_with_ids(gateway, Arc::new(ids))
    }

    pub(crate) fn payment_service_with_ids(
        &self,
        gateway: Arc<dyn PaymentGateway>,
        ids: Arc<RequestIdGenerator>,
    ) -> PaymentService {
        PaymentService::new(
            self.db.clone(),
            self.events.clone(),
            gateway,
            ids,
            self.config.clone(),
        )
    }

    pub(crate) async fn seed_user(&self, name: &str) -> Uuid {
        user::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            cart_version: Set(0),
            created_at: Set(Utc::now()),
        }
        .insert(self.conn())
        .await
        .expect("seed user")
        .id
    }

    pub(crate) async fn seed_product(&self, name: &str, price_minor: i64, available: bool) -> Uuid {
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            price_minor: Set(price_minor),
            available: Set(available),
            created_at: Set(Utc::now()),
        }
        .insert(self.conn())
        .await
        .expect("seed product")
        .id
    }

    pub(crate) async fn set_price(&self, product_id: Uuid, price_minor: i64) {
        let mut model: product::ActiveModel = product::Entity::find_by_id(product_id)
            .one(self.conn())
            .await
            .expect("load product")
            .expect("product exists")
            .into();
        model.price_minor = Set(price_minor);
        model.update(self.conn()).await.expect("update price");
    }

    pub(crate) async fn cart_version(&self, user_id: Uuid) -> i64 {
        user::Entity::find_by_id(user_id)
            .one(self.conn())
            .await
            .expect("load user")
            .expect("user exists")
            .cart_version
    }
}
