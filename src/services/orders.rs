//! Order reads and operator status updates.

use std::sync::Arc;

use tracing::{info, instrument};

use super::EventPublisher;
use crate::domain::aggregates::{Order, OrderStatus};
use crate::domain::events::DomainEvent;
use crate::domain::value_objects::{Identity, OrderNumber};
use crate::storage::CommerceStore;
use crate::{CommerceError, Result};

#[derive(Clone)]
pub struct OrderService {
    store: Arc<dyn CommerceStore>,
    events: EventPublisher,
}

impl OrderService {
    pub fn new(store: Arc<dyn CommerceStore>, events: EventPublisher) -> Self {
        Self { store, events }
    }

    /// Guest orders are visible to anyone holding the number; user orders
    /// only to their owner.
    #[instrument(skip(self, caller), fields(identity = %caller))]
    pub async fn order_detail(&self, caller: &Identity, order_number: &str) -> Result<Order> {
        let order = self.find(order_number).await?;
        match order.user_id {
            Some(owner) if caller.user_id() != Some(owner) => Err(CommerceError::PermissionDenied),
            _ => Ok(order),
        }
    }

    /// Newest first. Requires an authenticated caller.
    pub async fn order_history(&self, caller: &Identity) -> Result<Vec<Order>> {
        let user_id = caller.user_id().ok_or(CommerceError::PermissionDenied)?;
        Ok(self.store.orders_for_user(user_id).await?)
    }

    #[instrument(skip(self))]
    pub async fn update_status(&self, order_number: &str, next: OrderStatus) -> Result<Order> {
        let current = self.find(order_number).await?;
        let from = current.status;
        if !from.can_transition_to(next) {
            return Err(CommerceError::InvalidTransition { from, to: next });
        }
        let order = self.store.update_order_status(&current.order_number, from, next).await?;
        info!(order_number = %order.order_number, %from, to = %next, "order status changed");
        self.events
            .publish(DomainEvent::OrderStatusChanged { order_number: order.order_number.clone(), from, to: next })
            .await;
        Ok(order)
    }

    async fn find(&self, order_number: &str) -> Result<Order> {
        let number: OrderNumber = order_number.parse().map_err(|_| CommerceError::not_found("Order"))?;
        self.store.order_by_number(&number).await?.ok_or_else(|| CommerceError::not_found("Order"))
    }
}
