//! Shared test fixtures: a storefront over the in-memory store and catalog.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use uuid::Uuid;

use super::{EventPublisher, OrderNumberGenerator, RandomOrderNumbers, ShippingDetails, Storefront, DEFAULT_MAX_ATTEMPTS};
use crate::catalog::InMemoryCatalog;
use crate::domain::aggregates::{Cart, Product};
use crate::domain::value_objects::{Identity, OrderNumber, SessionToken};
use crate::storage::MemoryStore;

pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub catalog: Arc<InMemoryCatalog>,
    pub shop: Storefront,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_numbers(Arc::new(RandomOrderNumbers)).await
    }

    pub async fn with_numbers(numbers: Arc<dyn OrderNumberGenerator>) -> Self {
        let store = Arc::new(MemoryStore::new());
        let catalog = Arc::new(InMemoryCatalog::new());
        let shop = Storefront::with_parts(store.clone(), catalog.clone(), EventPublisher::disabled(), numbers, DEFAULT_MAX_ATTEMPTS);
        Self { store, catalog, shop }
    }

    pub async fn product(&self, name: &str, price: Decimal) -> Uuid {
        self.catalog.insert(Product::new(name, price)).await
    }

    pub async fn discounted(&self, name: &str, price: Decimal, discount: Decimal) -> Uuid {
        self.catalog.insert(Product::new(name, price).with_discount(discount)).await
    }

    pub async fn guest_cart(&self) -> (Identity, Cart) {
        self.cart_for(Identity::anonymous(SessionToken::generate())).await
    }

    pub async fn user_cart(&self) -> (Identity, Cart) {
        self.cart_for(Identity::user(Uuid::new_v4())).await
    }

    pub async fn cart_for(&self, identity: Identity) -> (Identity, Cart) {
        let cart = self.shop.carts.get_or_create_cart(&identity).await.unwrap();
        (identity, cart)
    }
}

pub fn shipping() -> ShippingDetails {
    ShippingDetails {
        full_name: "Amal Hassan".into(),
        phone: "+20 100 000 0000".into(),
        email: Some("amal@example.com".into()),
        address: "12 Tahrir Square".into(),
        city: "Cairo".into(),
        postal_code: Some("11511".into()),
        delivery_notes: None,
    }
}

/// Hands out every number twice, so each checkout after the first collides once.
#[derive(Default)]
pub struct RepeatingNumbers {
    calls: AtomicU32,
}

impl OrderNumberGenerator for RepeatingNumbers {
    fn generate(&self, today: NaiveDate) -> OrderNumber {
        OrderNumber::from_parts(today, self.calls.fetch_add(1, Ordering::SeqCst) / 2)
    }
}

/// Always the same number.
pub struct SameNumber;

impl OrderNumberGenerator for SameNumber {
    fn generate(&self, today: NaiveDate) -> OrderNumber {
        OrderNumber::from_parts(today, 123_456)
    }
}
