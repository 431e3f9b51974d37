//! In-memory store. A single lock makes each call one transaction.

use std::collections::HashMap;
#[cfg(test)]
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{CommerceStore, OrderDraft, StoreError, StoreResult};
use crate::domain::aggregates::cart::{merge_line, step_line};
use crate::domain::aggregates::{Cart, CartLine, LineChange, Order, OrderStatus};
use crate::domain::value_objects::{Identity, OrderNumber, Quantity, Size};

#[derive(Default)]
struct State {
    carts: HashMap<Uuid, Cart>,
    cart_by_identity: HashMap<Identity, Uuid>,
    lines: HashMap<Uuid, Vec<CartLine>>,
    orders: HashMap<Uuid, Order>,
    order_by_number: HashMap<OrderNumber, Uuid>,
}

impl State {
    fn touch_cart(&mut self, cart_id: Uuid) {
        if let Some(cart) = self.carts.get_mut(&cart_id) {
            cart.touch();
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    #[cfg(test)]
    fail_next_order: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
impl MemoryStore {
    /// Make the next `place_order` fail after validation, as a broken
    /// database connection would.
    pub fn fail_next_order(&self) {
        self.fail_next_order.store(true, Ordering::SeqCst);
    }

    pub async fn cart_count(&self) -> usize {
        self.state.lock().await.carts.len()
    }

    pub async fn order_count(&self) -> usize {
        self.state.lock().await.orders.len()
    }

    pub async fn order_item_count(&self) -> usize {
        self.state.lock().await.orders.values().map(|o| o.items.len()).sum()
    }
}

#[async_trait]
impl CommerceStore for MemoryStore {
    async fn get_or_create_cart(&self, identity: &Identity) -> StoreResult<Cart> {
        let mut state = self.state.lock().await;
        if let Some(cart) = state.cart_by_identity.get(identity).and_then(|id| state.carts.get(id)) {
            return Ok(cart.clone());
        }
        let cart = Cart::new(identity.clone());
        state.cart_by_identity.insert(identity.clone(), cart.id);
        state.carts.insert(cart.id, cart.clone());
        Ok(cart)
    }

    async fn cart_lines(&self, cart_id: Uuid) -> StoreResult<Vec<CartLine>> {
        Ok(self.state.lock().await.lines.get(&cart_id).cloned().unwrap_or_default())
    }

    async fn line(&self, line_id: Uuid) -> StoreResult<Option<CartLine>> {
        let state = self.state.lock().await;
        Ok(state.lines.values().flatten().find(|l| l.id == line_id).cloned())
    }

    async fn upsert_line(&self, cart_id: Uuid, product_id: Uuid, size: &Size, quantity: Quantity) -> StoreResult<CartLine> {
        let mut state = self.state.lock().await;
        let line = merge_line(state.lines.entry(cart_id).or_default(), cart_id, product_id, quantity, size.clone())?;
        state.touch_cart(cart_id);
        Ok(line)
    }

    async fn step_line(&self, cart_id: Uuid, line_id: Uuid, delta: i32) -> StoreResult<LineChange> {
        let mut state = self.state.lock().await;
        let lines = state.lines.get_mut(&cart_id).ok_or(StoreError::LineNotFound)?;
        let change = step_line(lines, line_id, delta)?.ok_or(StoreError::LineNotFound)?;
        state.touch_cart(cart_id);
        Ok(change)
    }

    async fn delete_line(&self, cart_id: Uuid, line_id: Uuid) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let lines = state.lines.get_mut(&cart_id).ok_or(StoreError::LineNotFound)?;
        let before = lines.len();
        lines.retain(|l| l.id != line_id);
        if lines.len() == before { return Err(StoreError::LineNotFound); }
        state.touch_cart(cart_id);
        Ok(())
    }

    async fn place_order(&self, draft: OrderDraft) -> StoreResult<Order> {
        let mut state = self.state.lock().await;
        let current = state.lines.get(&draft.cart_id).cloned().unwrap_or_default();
        if current.is_empty() { return Err(StoreError::CartEmpty); }
        if !draft.matches_lines(&current) { return Err(StoreError::CartChanged); }
        if state.order_by_number.contains_key(&draft.order_number) { return Err(StoreError::DuplicateOrderNumber); }
        #[cfg(test)]
        if self.fail_next_order.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Corrupt("injected failure".into()));
        }

        let now = Utc::now();
        let order = Order {
            id: Uuid::now_v7(),
            order_number: draft.order_number,
            user_id: draft.user_id,
            status: OrderStatus::Pending,
            total_price: draft.total_price,
            notes: draft.notes,
            items: draft.items,
            shipping: draft.shipping,
            created_at: now,
            updated_at: now,
        };
        if let Some(lines) = state.lines.get_mut(&draft.cart_id) {
            lines.retain(|l| !draft.consumed.iter().any(|c| c.line_id == l.id));
        }
        state.touch_cart(draft.cart_id);
        state.order_by_number.insert(order.order_number.clone(), order.id);
        state.orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn order_by_number(&self, number: &OrderNumber) -> StoreResult<Option<Order>> {
        let state = self.state.lock().await;
        Ok(state.order_by_number.get(number).and_then(|id| state.orders.get(id)).cloned())
    }

    async fn orders_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Order>> {
        let state = self.state.lock().await;
        let mut orders: Vec<Order> = state.orders.values().filter(|o| o.user_id == Some(user_id)).cloned().collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(orders)
    }

    async fn update_order_status(&self, number: &OrderNumber, expected: OrderStatus, next: OrderStatus) -> StoreResult<Order> {
        let mut state = self.state.lock().await;
        let id = *state.order_by_number.get(number).ok_or(StoreError::OrderNotFound)?;
        let order = state.orders.get_mut(&id).ok_or(StoreError::OrderNotFound)?;
        if order.status != expected { return Err(StoreError::StatusConflict); }
        order.status = next;
        order.updated_at = Utc::now();
        Ok(order.clone())
    }
}
