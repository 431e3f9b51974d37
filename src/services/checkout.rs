//! Checkout: turns a cart into an immutable order.
//!
//! Prices are read from the catalog once per attempt and frozen into the
//! order items and the order total. The store writes order, items and
//! shipping record and empties the cart in one transaction; a taken order
//! number or a cart that changed underneath us aborts that transaction and
//! the attempt is retried.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use super::EventPublisher;
use crate::catalog::Catalog;
use crate::domain::aggregates::{Cart, CartLine, Order, OrderItem, ShippingRecord};
use crate::domain::events::DomainEvent;
use crate::domain::value_objects::{Identity, OrderNumber};
use crate::storage::{CommerceStore, ConsumedLine, OrderDraft, StoreError};
use crate::{CommerceError, Result};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

pub trait OrderNumberGenerator: Send + Sync {
    fn generate(&self, today: NaiveDate) -> OrderNumber;
}

/// `ORD` + date + six random digits.
#[derive(Clone, Copy, Debug, Default)]
pub struct RandomOrderNumbers;

impl OrderNumberGenerator for RandomOrderNumbers {
    fn generate(&self, today: NaiveDate) -> OrderNumber {
        OrderNumber::random(today, &mut rand::thread_rng())
    }
}

fn not_blank(value: &str) -> std::result::Result<(), ValidationError> {
    if value.trim().is_empty() { Err(ValidationError::new("blank")) } else { Ok(()) }
}

/// Contact and delivery details submitted with the checkout form.
#[derive(Clone, Debug, Default, Deserialize, Validate)]
#[serde(default)]
pub struct ShippingDetails {
    #[validate(custom = "not_blank", length(max = 200))]
    pub full_name: String,
    #[validate(custom = "not_blank", length(max = 20))]
    pub phone: String,
    #[validate(email)]
    pub email: Option<String>,
    #[validate(custom = "not_blank")]
    pub address: String,
    #[validate(custom = "not_blank", length(max = 100))]
    pub city: String,
    #[validate(length(max = 20))]
    pub postal_code: Option<String>,
    pub delivery_notes: Option<String>,
}

fn optional(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl ShippingDetails {
    /// Trims every field and turns blank optional fields into `None`.
    pub fn normalized(self) -> Self {
        Self {
            full_name: self.full_name.trim().to_string(),
            phone: self.phone.trim().to_string(),
            email: optional(self.email),
            address: self.address.trim().to_string(),
            city: self.city.trim().to_string(),
            postal_code: optional(self.postal_code),
            delivery_notes: optional(self.delivery_notes),
        }
    }

    fn check(&self) -> Result<()> {
        self.validate().map_err(|errors| {
            let mut fields: Vec<&str> = errors.field_errors().keys().copied().collect();
            fields.sort_unstable();
            CommerceError::InvalidArgument(format!("invalid shipping fields: {}", fields.join(", ")))
        })
    }

    fn into_record(self) -> ShippingRecord {
        ShippingRecord {
            full_name: self.full_name,
            phone: self.phone,
            email: self.email,
            address: self.address,
            city: self.city,
            postal_code: self.postal_code,
            notes: self.delivery_notes,
            created_at: Utc::now(),
        }
    }
}

#[derive(Clone)]
pub struct CheckoutService {
    store: Arc<dyn CommerceStore>,
    catalog: Arc<dyn Catalog>,
    numbers: Arc<dyn OrderNumberGenerator>,
    max_attempts: u32,
    events: EventPublisher,
}

impl CheckoutService {
    pub fn new(
        store: Arc<dyn CommerceStore>,
        catalog: Arc<dyn Catalog>,
        numbers: Arc<dyn OrderNumberGenerator>,
        max_attempts: u32,
        events: EventPublisher,
    ) -> Self {
        Self { store, catalog, numbers, max_attempts: max_attempts.max(1), events }
    }

    #[instrument(skip_all, fields(cart_id = %cart.id, identity = %caller))]
    pub async fn checkout(&self, caller: &Identity, cart: &Cart, shipping: ShippingDetails, notes: &str) -> Result<Order> {
        if !cart.is_owned_by(caller) {
            return Err(CommerceError::PermissionDenied);
        }
        if self.store.cart_lines(cart.id).await?.is_empty() {
            return Err(CommerceError::EmptyCart);
        }
        let shipping = shipping.normalized();
        shipping.check()?;

        let mut collisions = 0;
        let mut cart_changes = 0;
        loop {
            let lines = self.store.cart_lines(cart.id).await?;
            if lines.is_empty() {
                return Err(CommerceError::EmptyCart);
            }
            let number = self.numbers.generate(Utc::now().date_naive());
            let draft = self.draft(caller, cart, &lines, number, shipping.clone(), notes).await?;

            match self.store.place_order(draft).await {
                Ok(order) => {
                    info!(order_number = %order.order_number, total = %order.total_price, items = order.items.len(), "order placed");
                    self.events
                        .publish(DomainEvent::OrderPlaced {
                            order_id: order.id,
                            order_number: order.order_number.clone(),
                            user_id: order.user_id,
                            total: order.total_price,
                            item_count: order.item_count(),
                        })
                        .await;
                    return Ok(order);
                }
                Err(StoreError::DuplicateOrderNumber) => {
                    collisions += 1;
                    warn!(attempt = collisions, "order number collision");
                    if collisions >= self.max_attempts {
                        error!(attempts = collisions, "order number space exhausted");
                        return Err(CommerceError::OrderNumberExhausted { attempts: collisions });
                    }
                }
                Err(StoreError::CartChanged) => {
                    cart_changes += 1;
                    debug!(attempt = cart_changes, "cart changed during checkout, repricing");
                    if cart_changes >= self.max_attempts {
                        return Err(CommerceError::Unavailable("cart kept changing during checkout".into()));
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn draft(
        &self,
        caller: &Identity,
        cart: &Cart,
        lines: &[CartLine],
        order_number: OrderNumber,
        shipping: ShippingDetails,
        notes: &str,
    ) -> Result<OrderDraft> {
        let mut items = Vec::with_capacity(lines.len());
        for line in lines {
            let product = self
                .catalog
                .product(line.product_id)
                .await?
                .ok_or_else(|| CommerceError::not_found(format!("Product {}", line.product_id)))?;
            items.push(OrderItem {
                id: Uuid::now_v7(),
                product_id: line.product_id,
                quantity: line.quantity,
                size: line.size.clone(),
                price: product.effective_price(),
            });
        }
        let total_price: Decimal = items.iter().map(OrderItem::subtotal).sum();

        Ok(OrderDraft {
            order_number,
            cart_id: cart.id,
            user_id: caller.user_id(),
            consumed: lines.iter().map(|l| ConsumedLine { line_id: l.id, quantity: l.quantity }).collect(),
            items,
            total_price,
            notes: notes.trim().to_string(),
            shipping: shipping.into_record(),
        })
    }
}
