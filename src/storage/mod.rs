//! Persistence for carts and orders.
//!
//! Every method is one transaction scope. Implementations must keep the
//! (cart, product, size) line key unique, serialize mutations per cart, and
//! make `place_order` all-or-nothing.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::aggregates::{Cart, CartLine, LineChange, Order, OrderItem, OrderStatus, ShippingRecord};
use crate::domain::value_objects::{Identity, OrderNumber, Quantity, Size, ValueError};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("order number already taken")]
    DuplicateOrderNumber,

    #[error("cart has no lines")]
    CartEmpty,

    #[error("cart changed while checking out")]
    CartChanged,

    #[error("cart line not found")]
    LineNotFound,

    #[error("order not found")]
    OrderNotFound,

    #[error("order status changed concurrently")]
    StatusConflict,

    #[error(transparent)]
    Invalid(#[from] ValueError),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A cart line as it was priced by checkout. The store refuses the order if
/// the cart no longer holds exactly these lines.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsumedLine {
    pub line_id: Uuid,
    pub quantity: Quantity,
}

/// Everything checkout computed, ready to be written in one transaction.
#[derive(Clone, Debug)]
pub struct OrderDraft {
    pub order_number: OrderNumber,
    pub cart_id: Uuid,
    pub user_id: Option<Uuid>,
    pub consumed: Vec<ConsumedLine>,
    pub items: Vec<OrderItem>,
    pub total_price: Decimal,
    pub notes: String,
    pub shipping: ShippingRecord,
}

impl OrderDraft {
    /// Whether `lines` is exactly the set of lines this draft was priced from.
    pub fn matches_lines(&self, lines: &[CartLine]) -> bool {
        let mut current: Vec<(Uuid, u32)> = lines.iter().map(|l| (l.id, l.quantity.value())).collect();
        let mut priced: Vec<(Uuid, u32)> = self.consumed.iter().map(|c| (c.line_id, c.quantity.value())).collect();
        current.sort_unstable();
        priced.sort_unstable();
        current == priced
    }
}

#[async_trait]
pub trait CommerceStore: Send + Sync {
    /// Return the identity's cart, creating an empty one if none exists.
    async fn get_or_create_cart(&self, identity: &Identity) -> StoreResult<Cart>;

    async fn cart_lines(&self, cart_id: Uuid) -> StoreResult<Vec<CartLine>>;

    /// Look up a line in any cart.
    async fn line(&self, line_id: Uuid) -> StoreResult<Option<CartLine>>;

    /// Atomically add `quantity` to the (product, size) line of the cart,
    /// creating the line if it does not exist. A sum above `Quantity::MAX`
    /// fails with `Invalid` and leaves the line unchanged.
    async fn upsert_line(&self, cart_id: Uuid, product_id: Uuid, size: &Size, quantity: Quantity) -> StoreResult<CartLine>;

    /// Apply a stepper delta; the line is deleted instead of reaching zero.
    async fn step_line(&self, cart_id: Uuid, line_id: Uuid, delta: i32) -> StoreResult<LineChange>;

    async fn delete_line(&self, cart_id: Uuid, line_id: Uuid) -> StoreResult<()>;

    /// Write order, items and shipping record and remove the consumed lines
    /// from the cart, all or nothing.
    async fn place_order(&self, draft: OrderDraft) -> StoreResult<Order>;

    async fn order_by_number(&self, number: &OrderNumber) -> StoreResult<Option<Order>>;

    /// Orders of a user, newest first.
    async fn orders_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Order>>;

    /// Compare-and-set on the order status.
    async fn update_order_status(&self, number: &OrderNumber, expected: OrderStatus, next: OrderStatus) -> StoreResult<Order>;
}
