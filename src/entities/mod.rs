//! Database entities.
//!
//! `products` and `users` are read-only collaborators for this service; the
//! cart, order and payment tables are owned by it.

pub mod cart_item;
pub mod order;
pub mod order_item;
pub mod payment_payload;
pub mod product;
pub mod user;
