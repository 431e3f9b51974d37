//! Aggregates module
pub mod product;
pub mod order;
pub mod cart;

pub use product::Product;
pub use order::{Order, OrderItem, OrderStatus, ShippingRecord, UnknownStatus};
pub use cart::{Cart, CartLine, LineChange};
