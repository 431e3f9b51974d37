//! Domain events
use crate::domain::aggregates::OrderStatus;
use crate::domain::value_objects::{OrderNumber, Size};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    CartLineAdded { cart_id: Uuid, line_id: Uuid, product_id: Uuid, size: Size, quantity: u32 },
    OrderPlaced { order_id: Uuid, order_number: OrderNumber, user_id: Option<Uuid>, total: Decimal, item_count: u64 },
    OrderStatusChanged { order_number: OrderNumber, from: OrderStatus, to: OrderStatus },
}

impl DomainEvent {
    pub fn subject(&self) -> &'static str {
        match self {
            Self::CartLineAdded { .. } => "storefront.cart.line_added",
            Self::OrderPlaced { .. } => "storefront.orders.placed",
            Self::OrderStatusChanged { .. } => "storefront.orders.status_changed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    #[test]
    fn test_order_placed_payload() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        let event = DomainEvent::OrderPlaced {
            order_id: Uuid::nil(),
            order_number: OrderNumber::from_parts(date, 42),
            user_id: None,
            total: dec!(250.00),
            item_count: 3,
        };
        assert_eq!(event.subject(), "storefront.orders.placed");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "order_placed");
        assert_eq!(json["order_number"], "ORD20240309000042");
        assert_eq!(json["total"], "250.00");
    }

    #[test]
    fn test_status_change_subject() {
        let event = DomainEvent::OrderStatusChanged {
            order_number: "ORD20240309000042".parse().unwrap(),
            from: OrderStatus::Pending,
            to: OrderStatus::Cancelled,
        };
        assert_eq!(event.subject(), "storefront.orders.status_changed");
        assert_eq!(serde_json::to_value(&event).unwrap()["to"], "cancelled");
    }
}
