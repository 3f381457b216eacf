use crate::{
    config::AppConfig,
    entities::{cart_item, order, order_item},
    errors::ServiceError,
    events::{Event, EventSender},
    middleware_helpers::retry::{with_retry, ConflictRetryPolicy, RetryConfig},
    services::commerce::{
        aggregation::{load_cart_items, load_user, summarize, to_decimal, CartLine},
        cart_service::bump_cart_version,
        user_locks::UserLocks,
    },
};
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};
use tokio::time::timeout;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Order as returned by checkout and the order ledger listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderView {
    pub id: Uuid,
    pub user_id: Uuid,
    pub total: Decimal,
    pub total_minor: i64,
    pub item_count: i32,
    pub items: Vec<CartLine>,
    pub created_at: DateTime<Utc>,
}

impl OrderView {
    fn from_models(
        order: order::Model,
        items: Vec<order_item::Model>,
        scale: u32,
    ) -> Result<Self, ServiceError> {
        let lines = items
            .into_iter()
            .map(|item| {
                Ok(CartLine {
                    product_id: item.product_id,
                    unit_price: to_decimal(item.unit_price_minor, scale)?,
                    unit_price_minor: item.unit_price_minor,
                })
            })
            .collect::<Result<Vec<_>, ServiceError>>()?;

        Ok(Self {
            id: order.id,
            user_id: order.user_id,
            total: to_decimal(order.total_minor, scale)?,
            total_minor: order.total_minor,
            item_count: order.item_count,
            items: lines,
            created_at: order.created_at,
        })
    }
}

/// Checkout service for converting carts to orders
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    locks: Arc<UserLocks>,
    config: Arc<AppConfig>,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        locks: Arc<UserLocks>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            event_sender,
            locks,
            config,
        }
    }

    /// Converts the user's cart into an order and empties the cart.
    ///
    /// Order creation and cart clearing commit together or not at all. A
    /// concurrent checkout of the same user waits for this one and then
    /// sees an empty cart.
    ///
    /// # Errors
    ///
    /// * `NotFound` - the user does not exist
    /// * `EmptyCart` - there is nothing to check out; no order is written
    /// * `Timeout` - the flow deadline expired; the transaction rolled back
    #[instrument(skip(self))]
    pub async fn checkout(&self, user_id: Uuid) -> Result<OrderView, ServiceError> {
        let started = std::time::Instant::now();
        let deadline = self.config.flow_timeout();
        let retry = RetryConfig::new(self.config.cart_conflict_retries, Duration::from_millis(10));

        let result = timeout(deadline, async {
            let _guard = self.locks.lock(user_id).await;
            with_retry(&retry, ConflictRetryPolicy, || self.try_checkout(user_id)).await
        })
        .await
        .map_err(|_| ServiceError::Timeout(deadline))
        .and_then(|inner| inner);

        histogram!("storefront_checkout_duration_seconds", started.elapsed());
        let order = match result {
            Ok(order) => order,
            Err(err) => {
                counter!("storefront_checkouts_total", 1, "outcome" => "failed");
                warn!(%user_id, error = %err, "Checkout failed");
                return Err(err);
            }
        };

        counter!("storefront_checkouts_total", 1, "outcome" => "created");
        self.event_sender
            .send_or_log(Event::OrderCreated {
                order_id: order.id,
                user_id,
                total_minor: order.total_minor,
            })
            .await;

        info!(order_id = %order.id, %user_id, total = %order.total, "Checkout completed");
        Ok(order)
    }

    async fn try_checkout(&self, user_id: Uuid) -> Result<OrderView, ServiceError> {
        let scale = self.config.money_scale;
        let txn = self.db.begin().await?;

        let user = load_user(&txn, user_id).await?;
        let items = load_cart_items(&txn, user_id).await?;
        if items.is_empty() {
            return Err(ServiceError::EmptyCart(user_id));
        }

        let summary = summarize(&items, scale)?;
        let item_count = i32::try_from(items.len())
            .map_err(|_| ServiceError::InvalidInput("Cart has too many items".to_string()))?;

        let order = order::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            total_minor: Set(summary.total_minor),
            item_count: Set(item_count),
            created_at: Set(Utc::now()),
        }
        .insert(&txn)
        .await?;

        let mut order_items = Vec::with_capacity(items.len());
        for (position, item) in (0..item_count).zip(items.iter()) {
            let line = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order.id),
                product_id: Set(item.product_id),
                unit_price_minor: Set(item.unit_price_minor),
                position: Set(position),
            }
            .insert(&txn)
            .await?;
            order_items.push(line);
        }

        cart_item::Entity::delete_many()
            .filter(cart_item::Column::UserId.eq(user_id))
            .exec(&txn)
            .await?;
        bump_cart_version(&txn, &user).await?;

        txn.commit().await?;

        OrderView::from_models(order, order_items, scale)
    }

    /// Every order, newest first.
    #[instrument(skip(self))]
    pub async fn list_orders(&self) -> Result<Vec<OrderView>, ServiceError> {
        self.within_flow_deadline(async {
            let orders = order::Entity::find()
                .order_by_desc(order::Column::CreatedAt)
                .all(&*self.db)
                .await?;
            self.with_items(&*self.db, orders).await
        })
        .await
    }

    /// Orders of one user, newest first.
    #[instrument(skip(self))]
    pub async fn list_orders_for_user(&self, user_id: Uuid) -> Result<Vec<OrderView>, ServiceError> {
        self.within_flow_deadline(async {
            load_user(&*self.db, user_id).await?;
            let orders = order::Entity::find()
                .filter(order::Column::UserId.eq(user_id))
                .order_by_desc(order::Column::CreatedAt)
                .all(&*self.db)
                .await?;
            self.with_items(&*self.db, orders).await
        })
        .await
    }

    async fn within_flow_deadline<T, Fut>(&self, operation: Fut) -> Result<T, ServiceError>
    where
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let deadline = self.config.flow_timeout();
        timeout(deadline, operation)
            .await
            .map_err(|_| ServiceError::Timeout(deadline))?
    }

    async fn with_items<C>(
        &self,
        conn: &C,
        orders: Vec<order::Model>,
    ) -> Result<Vec<OrderView>, ServiceError>
    where
        C: ConnectionTrait,
    {
        if orders.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
        let mut items_by_order: HashMap<Uuid, Vec<order_item::Model>> = HashMap::new();
        for item in order_item::Entity::find()
            .filter(order_item::Column::OrderId.is_in(ids))
            .order_by_asc(order_item::Column::Position)
            .all(conn)
            .await?
        {
            items_by_order.entry(item.order_id).or_default().push(item);
        }

        orders
            .into_iter()
            .map(|order| {
                let items = items_by_order.remove(&order.id).unwrap_or_default();
                OrderView::from_models(order, items, self.config.money_scale)
            })
            .collect()
    }
}
