/// Commerce services module - cart, aggregation and checkout
pub mod aggregation;
pub mod cart_service;
pub mod checkout_service;
pub mod user_locks;

// Re-export services for convenience
pub use aggregation::{compute_cart_total, summarize, CartLine, CartSummary};
pub use cart_service::CartService;
pub use checkout_service::{CheckoutService, OrderView};
pub use user_locks::UserLocks;
