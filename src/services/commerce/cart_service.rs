use crate::{
    config::AppConfig,
    entities::{cart_item, product, user},
    errors::ServiceError,
    events::{Event, EventSender},
    middleware_helpers::retry::{with_retry, ConflictRetryPolicy, RetryConfig},
    services::commerce::{
        aggregation::{self, load_cart_items, load_user, summarize, CartSummary},
        user_locks::UserLocks,
    },
};
use chrono::Utc;
use metrics::counter;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, Set, TransactionTrait,
};
use std::{future::Future, sync::Arc, time::Duration};
use tokio::time::timeout;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Cart store: owns each user's cart line items.
///
/// Every mutation runs under the user's in-process lock and inside one
/// storage transaction that compare-and-sets `users.cart_version`. A lost
/// race with another process surfaces as `Conflict` and is retried with
/// backoff.
///
/// # Examples
///
/// ```ignore
/// let carts = CartService::new(db, event_sender, locks, config);
/// let summary = carts.add_item(user_id, product_id).await?;
/// assert_eq!(summary.item_count, 1);
/// ```
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    locks: Arc<UserLocks>,
    config: Arc<AppConfig>,
}

impl CartService {
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

    /// Appends a snapshot of the product's current price to the user's cart.
    ///
    /// # Errors
    ///
    /// * `NotFound` - the user or the product does not exist
    /// * `InvalidInput` - the product is flagged unavailable
    /// * `Timeout` - the storage deadline expired; nothing was written
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        user_id: Uuid,
        product_id: Uuid,
    ) -> Result<CartSummary, ServiceError> {
        let summary = self
            .serialized(user_id, || self.try_add_item(user_id, product_id))
            .await?;

        counter!("storefront_cart_mutations_total", 1, "operation" => "add");
        self.event_sender
            .send_or_log(Event::CartItemAdded {
                user_id,
                product_id,
            })
            .await;

        info!(%user_id, %product_id, items = summary.item_count, "Added item to cart");
        Ok(summary)
    }

    /// Removes every entry of `product_id` from the user's cart.
    ///
    /// Removing a product that is not in the cart is a no-op that returns
    /// the unchanged cart.
    #[instrument(skip(self))]
    pub async fn remove_item(
        &self,
        user_id: Uuid,
        product_id: Uuid,
    ) -> Result<CartSummary, ServiceError> {
        let (summary, removed) = self
            .serialized(user_id, || self.try_remove_item(user_id, product_id))
            .await?;

        if removed > 0 {
            counter!("storefront_cart_mutations_total", 1, "operation" => "remove");
            self.event_sender
                .send_or_log(Event::CartItemRemoved {
                    user_id,
                    product_id,
                    removed,
                })
                .await;
        }

        info!(%user_id, %product_id, removed, "Removed item from cart");
        Ok(summary)
    }

    /// Current cart value, computed from a single ordered read.
    #[instrument(skip(self))]
    pub async fn compute_cart_total(&self, user_id: Uuid) -> Result<CartSummary, ServiceError> {
        let deadline = self.config.flow_timeout();
        timeout(
            deadline,
            aggregation::compute_cart_total(&*self.db, user_id, self.config.money_scale),
        )
        .await
        .map_err(|_| ServiceError::Timeout(deadline))?
    }

    /// Runs a cart mutation under the user lock, the storage deadline and
    /// the conflict retry policy.
    async fn serialized<F, Fut, T>(&self, user_id: Uuid, operation: F) -> Result<T, ServiceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let deadline = self.config.storage_timeout();
        let retry = RetryConfig::new(self.config.cart_conflict_retries, Duration::from_millis(10));

        timeout(deadline, async {
            let _guard = self.locks.lock(user_id).await;
            with_retry(&retry, ConflictRetryPolicy, operation).await
        })
        .await
        .map_err(|_| ServiceError::Timeout(deadline))?
    }

    async fn try_add_item(
        &self,
        user_id: Uuid,
        product_id: Uuid,
    ) -> Result<CartSummary, ServiceError> {
        let txn = self.db.begin().await?;

        let user = load_user(&txn, user_id).await?;
        let product = product::Entity::find_by_id(product_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

        if !product.available {
            return Err(ServiceError::InvalidInput(format!(
                "Product {} is not available",
                product_id
            )));
        }

        let version = bump_cart_version(&txn, &user).await?;

        cart_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            product_id: Set(product_id),
            unit_price_minor: Set(product.price_minor),
            position: Set(version),
            created_at: Set(Utc::now()),
        }
        .insert(&txn)
        .await?;

        let items = load_cart_items(&txn, user_id).await?;
        let summary = summarize(&items, self.config.money_scale)?;

        txn.commit().await?;
        Ok(summary)
    }

    async fn try_remove_item(
        &self,
        user_id: Uuid,
        product_id: Uuid,
    ) -> Result<(CartSummary, u64), ServiceError> {
        let txn = self.db.begin().await?;

        let user = load_user(&txn, user_id).await?;
        let removed = cart_item::Entity::delete_many()
            .filter(cart_item::Column::UserId.eq(user_id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .exec(&txn)
            .await?
            .rows_affected;

        if removed > 0 {
            bump_cart_version(&txn, &user).await?;
        } else {
            debug!(%user_id, %product_id, "Product not in cart");
        }

        let items = load_cart_items(&txn, user_id).await?;
        let summary = summarize(&items, self.config.money_scale)?;

        txn.commit().await?;
        Ok((summary, removed))
    }
}

/// Advances the user's cart version from the value read in `user`.
///
/// Returns the new version, or `Conflict` when another writer advanced it
/// first.
pub(crate) async fn bump_cart_version<C>(conn: &C, user: &user::Model) -> Result<i64, ServiceError>
where
    C: ConnectionTrait,
{
    let next = user
        .cart_version
        .checked_add(1)
        .ok_or_else(|| ServiceError::InternalError("cart version overflow".to_string()))?;

    let result = user::Entity::update_many()
        .col_expr(user::Column::CartVersion, Expr::value(next))
        .filter(user::Column::Id.eq(user.id))
        .filter(user::Column::CartVersion.eq(user.cart_version))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        return Err(ServiceError::Conflict(format!(
            "Cart of user {} was modified concurrently",
            user.id
        )));
    }

    Ok(next)
}
