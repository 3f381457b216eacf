pub mod commerce;
pub mod common;
pub mod payments;

use crate::{
    config::AppConfig,
    db::DbPool,
    errors::ServiceError,
    events::EventSender,
    services::{
        commerce::{CartService, CheckoutService, UserLocks},
        payments::{PaymentGateway, PaymentService, RequestIdGenerator},
    },
};
use std::sync::Arc;

/// Service container shared by all handlers
#[derive(Clone)]
pub struct AppServices {
    pub cart: Arc<CartService>,
    pub checkout: Arc<CheckoutService>,
    pub payments: Arc<PaymentService>,
}

impl AppServices {
    /// Wires every service against one pool, one event channel and one
    /// set of per-user locks.
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn PaymentGateway>,
        config: Arc<AppConfig>,
    ) -> Result<Self, ServiceError> {
        let locks = Arc::new(UserLocks::new());
        let ids = Arc::new(RequestIdGenerator::new(&config.request_id)?);

        Ok(Self {
            cart: Arc::new(CartService::new(
                db_pool.clone(),
                event_sender.clone(),
                locks.clone(),
                config.clone(),
            )),
            checkout: Arc::new(CheckoutService::new(
                db_pool.clone(),
                event_sender.clone(),
                locks,
                config.clone(),
            )),
            payments: Arc::new(PaymentService::new(
                db_pool,
                event_sender,
                gateway,
                ids,
                config,
            )),
        })
    }
}
