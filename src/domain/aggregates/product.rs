//! Catalog product as seen by the cart and checkout

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub base_price: Decimal,
    pub discount_price: Option<Decimal>,
    pub is_active: bool,
    pub stock: u32,
}

impl Product {
    pub fn new(name: impl Into<String>, base_price: Decimal) -> Self {
        Self { id: Uuid::now_v7(), name: name.into(), base_price, discount_price: None, is_active: true, stock: 0 }
    }

    pub fn with_discount(mut self, discount_price: Decimal) -> Self {
        self.discount_price = Some(discount_price);
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    /// A discount only counts when it is strictly lower than the base price.
    pub fn has_discount(&self) -> bool {
        matches!(self.discount_price, Some(d) if d < self.base_price)
    }

    /// The price actually charged.
    pub fn effective_price(&self) -> Decimal {
        match self.discount_price {
            Some(d) if d < self.base_price => d,
            _ => self.base_price,
        }
    }
}
