//! Application services over the store and the catalog.

mod cart;
mod checkout;
mod orders;
mod publisher;

#[cfg(test)]
mod fixtures;

pub use cart::{CartService, CartSummary, CartSummaryLine};
pub use checkout::{CheckoutService, OrderNumberGenerator, RandomOrderNumbers, ShippingDetails, DEFAULT_MAX_ATTEMPTS};
pub use orders::OrderService;
pub use publisher::EventPublisher;

use std::sync::Arc;

use crate::catalog::Catalog;
use crate::storage::CommerceStore;

/// All storefront operations, sharing one store and catalog.
#[derive(Clone)]
pub struct Storefront {
    pub carts: CartService,
    pub checkout: CheckoutService,
    pub orders: OrderService,
}

impl Storefront {
    pub fn new(store: Arc<dyn CommerceStore>, catalog: Arc<dyn Catalog>) -> Self {
        Self::with_parts(store, catalog, EventPublisher::disabled(), Arc::new(RandomOrderNumbers), DEFAULT_MAX_ATTEMPTS)
    }

    pub fn with_parts(
        store: Arc<dyn CommerceStore>,
        catalog: Arc<dyn Catalog>,
        events: EventPublisher,
        numbers: Arc<dyn OrderNumberGenerator>,
        max_attempts: u32,
    ) -> Self {
        Self {
            carts: CartService::new(store.clone(), catalog.clone(), events.clone()),
            checkout: CheckoutService::new(store.clone(), catalog, numbers, max_attempts, events.clone()),
            orders: OrderService::new(store, events),
        }
    }
}
