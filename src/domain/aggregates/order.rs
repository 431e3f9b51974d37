//! Order Aggregate
//!
//! Orders are created once by checkout and never repriced. Only the status
//! moves afterwards, driven by the store operator.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;
use crate::domain::value_objects::{OrderNumber, Quantity, Size};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub order_number: OrderNumber,
    /// `None` for guest checkouts.
    pub user_id: Option<Uuid>,
    pub status: OrderStatus,
    pub total_price: Decimal,
    pub notes: String,
    pub items: Vec<OrderItem>,
    pub shipping: ShippingRecord,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn item_count(&self) -> u64 { self.items.iter().map(|i| u64::from(i.quantity.value())).sum() }
    pub fn status_label(&self) -> &'static str { self.status.label() }
    pub fn status_step(&self) -> u8 { self.status.step() }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: Uuid,
    pub product_id: Uuid,
    pub quantity: Quantity,
    pub size: Size,
    /// Unit price captured at checkout.
    pub price: Decimal,
}

impl OrderItem {
    pub fn subtotal(&self) -> Decimal { self.price * Decimal::from(self.quantity.value()) }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShippingRecord {
    pub full_name: String,
    pub phone: String,
    pub email: Option<String>,
    pub address: String,
    pub city: String,
    pub postal_code: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Pending,
    Confirmed,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown order status: {0}")]
pub struct UnknownStatus(pub String);

impl OrderStatus {
    pub const ALL: [OrderStatus; 6] = [
        Self::Pending, Self::Confirmed, Self::Processing, Self::Shipped, Self::Delivered, Self::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Processing => "processing",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Confirmed => "Confirmed",
            Self::Processing => "Processing",
            Self::Shipped => "Shipped",
            Self::Delivered => "Delivered",
            Self::Cancelled => "Cancelled",
        }
    }

    /// Progress step for display. Cancellation resets progress to 0.
    pub fn step(&self) -> u8 {
        match self {
            Self::Pending => 1,
            Self::Confirmed => 2,
            Self::Processing => 3,
            Self::Shipped => 4,
            Self::Delivered => 5,
            Self::Cancelled => 0,
        }
    }

    /// Step for a raw stored value; anything outside the enum maps to 0.
    pub fn step_of(raw: &str) -> u8 {
        raw.parse::<OrderStatus>().map(|s| s.step()).unwrap_or(0)
    }

    pub fn is_terminal(&self) -> bool { matches!(self, Self::Delivered | Self::Cancelled) }

    /// Operator rule: forward along the chain (skipping allowed), or cancel
    /// from any non-terminal state.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        if self.is_terminal() { return false; }
        match next {
            Self::Cancelled => true,
            _ => next.step() > self.step(),
        }
    }
}

impl FromStr for OrderStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|st| st.as_str() == s).ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.as_str()) }
}
