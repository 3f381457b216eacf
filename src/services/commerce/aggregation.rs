//! Cart aggregation.
//!
//! Totals are computed from the same ordered read that produces the item
//! list, so a summary never pairs items with a total from another snapshot.

use crate::{
    entities::{cart_item, user},
    errors::ServiceError,
};
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One cart or order line as returned to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub product_id: Uuid,
    pub unit_price: Decimal,
    pub unit_price_minor: i64,
}

/// Value of a user's cart
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartSummary {
    pub total: Decimal,
    pub total_minor: i64,
    pub item_count: usize,
    pub items: Vec<CartLine>,
}

/// Renders integer minor units as a decimal amount with `scale` places.
pub fn to_decimal(minor: i64, scale: u32) -> Result<Decimal, ServiceError> {
    Decimal::try_new(minor, scale)
        .map_err(|e| ServiceError::InternalError(format!("Invalid money scale {}: {}", scale, e)))
}

/// Checked sum of unit prices in minor units.
pub fn total_minor<'a, I>(prices: I) -> Result<i64, ServiceError>
where
    I: IntoIterator<Item = &'a i64>,
{
    prices.into_iter().try_fold(0i64, |acc, price| {
        acc.checked_add(*price)
            .ok_or_else(|| ServiceError::InvalidInput("Cart total overflows".to_string()))
    })
}

/// Builds the summary of exactly `items`, in their given order.
pub fn summarize(items: &[cart_item::Model], scale: u32) -> Result<CartSummary, ServiceError> {
    let total_minor = total_minor(items.iter().map(|item| &item.unit_price_minor))?;

    let lines = items
        .iter()
        .map(|item| {
            Ok(CartLine {
                product_id: item.product_id,
                unit_price: to_decimal(item.unit_price_minor, scale)?,
                unit_price_minor: item.unit_price_minor,
            })
        })
        .collect::<Result<Vec<_>, ServiceError>>()?;

    Ok(CartSummary {
        total: to_decimal(total_minor, scale)?,
        total_minor,
        item_count: lines.len(),
        items: lines,
    })
}

pub(crate) async fn load_user<C>(conn: &C, user_id: Uuid) -> Result<user::Model, ServiceError>
where
    C: ConnectionTrait,
{
    user::Entity::find_by_id(user_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("User {} not found", user_id)))
}

/// Cart rows of `user_id` in insertion order
pub(crate) async fn load_cart_items<C>(
    conn: &C,
    user_id: Uuid,
) -> Result<Vec<cart_item::Model>, ServiceError>
where
    C: ConnectionTrait,
{
    Ok(cart_item::Entity::find()
        .filter(cart_item::Column::UserId.eq(user_id))
        .order_by_asc(cart_item::Column::Position)
        .all(conn)
        .await?)
}

/// Computes the current value of the user's cart.
///
/// # Errors
/// `NotFound` if the user does not exist.
pub async fn compute_cart_total<C>(
    conn: &C,
    user_id: Uuid,
    scale: u32,
) -> Result<CartSummary, ServiceError>
where
    C: ConnectionTrait,
{
    load_user(conn, user_id).await?;
    let items = load_cart_items(conn, user_id).await?;
    summarize(&items, scale)
}
