//! Cart store operations: merging lines, the quantity stepper, removal and
//! live totals.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{instrument, warn};
use uuid::Uuid;

use super::EventPublisher;
use crate::catalog::Catalog;
use crate::domain::aggregates::{Cart, CartLine, LineChange};
use crate::domain::events::DomainEvent;
use crate::domain::value_objects::{Identity, Quantity, Size};
use crate::storage::CommerceStore;
use crate::{CommerceError, Result};

#[derive(Clone)]
pub struct CartService {
    store: Arc<dyn CommerceStore>,
    catalog: Arc<dyn Catalog>,
    events: EventPublisher,
}

/// A cart line priced against the current catalog.
#[derive(Clone, Debug, Serialize)]
pub struct CartSummaryLine {
    #[serde(flatten)]
    pub line: CartLine,
    /// `None` when the product has left the catalog.
    pub product_name: Option<String>,
    pub unit_price: Option<Decimal>,
    pub subtotal: Decimal,
}

#[derive(Clone, Debug, Serialize)]
pub struct CartSummary {
    pub cart: Cart,
    pub lines: Vec<CartSummaryLine>,
    pub total_price: Decimal,
    pub total_items: u64,
}

impl CartService {
    pub fn new(store: Arc<dyn CommerceStore>, catalog: Arc<dyn Catalog>, events: EventPublisher) -> Self {
        Self { store, catalog, events }
    }

    #[instrument(skip_all, fields(identity = %identity))]
    pub async fn get_or_create_cart(&self, identity: &Identity) -> Result<Cart> {
        Ok(self.store.get_or_create_cart(identity).await?)
    }

    #[instrument(skip_all, fields(cart_id = %cart.id, %product_id, quantity = quantity))]
    pub async fn add_item(&self, caller: &Identity, cart: &Cart, product_id: Uuid, quantity: u32, size: Size) -> Result<CartLine> {
        authorize(caller, cart)?;
        let quantity = Quantity::new(quantity)?;
        match self.catalog.product(product_id).await? {
            Some(p) if p.is_active => {}
            _ => return Err(CommerceError::not_found(format!("Product {product_id}"))),
        }

        let line = self.store.upsert_line(cart.id, product_id, &size, quantity).await?;
        tracing::debug!(line_id = %line.id, quantity = line.quantity.value(), "line merged");
        self.events
            .publish(DomainEvent::CartLineAdded {
                cart_id: cart.id,
                line_id: line.id,
                product_id,
                size,
                quantity: quantity.value(),
            })
            .await;
        Ok(line)
    }

    /// Stepper adjustment. Going below one removes the line.
    #[instrument(skip_all, fields(cart_id = %cart.id, %line_id))]
    pub async fn set_line_quantity(&self, caller: &Identity, cart: &Cart, line_id: Uuid, delta: i32) -> Result<LineChange> {
        authorize(caller, cart)?;
        if delta == 0 {
            return Err(CommerceError::InvalidArgument("quantity delta must not be zero".into()));
        }
        self.check_line(cart, line_id).await?;
        Ok(self.store.step_line(cart.id, line_id, delta).await?)
    }

    #[instrument(skip_all, fields(cart_id = %cart.id, %line_id))]
    pub async fn remove_item(&self, caller: &Identity, cart: &Cart, line_id: Uuid) -> Result<()> {
        authorize(caller, cart)?;
        self.check_line(cart, line_id).await?;
        Ok(self.store.delete_line(cart.id, line_id).await?)
    }

    /// Lines with live prices plus totals.
    pub async fn summary(&self, caller: &Identity, cart: &Cart) -> Result<CartSummary> {
        authorize(caller, cart)?;
        self.price_lines(cart).await
    }

    pub async fn total_price(&self, cart: &Cart) -> Result<Decimal> {
        Ok(self.price_lines(cart).await?.total_price)
    }

    pub async fn total_item_count(&self, cart: &Cart) -> Result<u64> {
        let lines = self.store.cart_lines(cart.id).await?;
        Ok(lines.iter().map(|l| u64::from(l.quantity.value())).sum())
    }

    async fn price_lines(&self, cart: &Cart) -> Result<CartSummary> {
        let lines = self.store.cart_lines(cart.id).await?;
        let mut priced = Vec::with_capacity(lines.len());
        for line in lines {
            let product = self.catalog.product(line.product_id).await?;
            if product.is_none() {
                warn!(line_id = %line.id, product_id = %line.product_id, "cart line references a missing product");
            }
            let unit_price = product.as_ref().map(|p| p.effective_price());
            priced.push(CartSummaryLine {
                subtotal: unit_price.map(|p| line.subtotal(p)).unwrap_or(Decimal::ZERO),
                product_name: product.map(|p| p.name),
                unit_price,
                line,
            });
        }
        Ok(CartSummary {
            cart: cart.clone(),
            total_price: priced.iter().map(|l| l.subtotal).sum(),
            total_items: priced.iter().map(|l| u64::from(l.line.quantity.value())).sum(),
            lines: priced,
        })
    }

    /// Missing lines are `NotFound`; lines of someone else's cart are `PermissionDenied`.
    async fn check_line(&self, cart: &Cart, line_id: Uuid) -> Result<()> {
        match self.store.line(line_id).await? {
            None => Err(CommerceError::not_found("Cart line")),
            Some(line) if line.cart_id != cart.id => {
                warn!(%line_id, cart_id = %cart.id, "cross-cart line access rejected");
                Err(CommerceError::PermissionDenied)
            }
            Some(_) => Ok(()),
        }
    }
}

fn authorize(caller: &Identity, cart: &Cart) -> Result<()> {
    if cart.is_owned_by(caller) { Ok(()) } else { Err(CommerceError::PermissionDenied) }
}
