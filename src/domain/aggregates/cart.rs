//! Cart Aggregate

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::domain::value_objects::{Identity, Quantity, Size, ValueError};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Cart {
    pub id: Uuid,
    pub identity: Identity,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Cart {
    pub fn new(identity: Identity) -> Self {
        let now = Utc::now();
        Self { id: Uuid::now_v7(), identity, created_at: now, updated_at: now }
    }

    pub fn is_owned_by(&self, identity: &Identity) -> bool { &self.identity == identity }

    pub fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CartLine {
    pub id: Uuid,
    pub cart_id: Uuid,
    pub product_id: Uuid,
    pub quantity: Quantity,
    pub size: Size,
    pub created_at: DateTime<Utc>,
}

impl CartLine {
    pub fn new(cart_id: Uuid, product_id: Uuid, quantity: Quantity, size: Size) -> Self {
        Self { id: Uuid::now_v7(), cart_id, product_id, quantity, size, created_at: Utc::now() }
    }

    /// Uniqueness key within a cart.
    pub fn matches(&self, product_id: Uuid, size: &Size) -> bool {
        self.product_id == product_id && &self.size == size
    }

    pub fn subtotal(&self, unit_price: Decimal) -> Decimal {
        unit_price * Decimal::from(self.quantity.value())
    }
}

/// Outcome of a stepper adjustment.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "line", rename_all = "snake_case")]
pub enum LineChange {
    Updated(CartLine),
    Removed,
}

/// Merges `quantity` into the line keyed by (product, size), creating it if absent.
/// Returns the resulting line; an overflowing merge leaves `lines` untouched.
pub fn merge_line(
    lines: &mut Vec<CartLine>,
    cart_id: Uuid,
    product_id: Uuid,
    quantity: Quantity,
    size: Size,
) -> Result<CartLine, ValueError> {
    if let Some(existing) = lines.iter_mut().find(|l| l.matches(product_id, &size)) {
        existing.quantity = existing.quantity.checked_add(quantity)?;
        return Ok(existing.clone());
    }
    let line = CartLine::new(cart_id, product_id, quantity, size);
    lines.push(line.clone());
    Ok(line)
}

/// Applies a stepper delta, dropping the line instead of letting it reach zero.
/// Returns `Ok(None)` when no line has `line_id`.
pub fn step_line(lines: &mut Vec<CartLine>, line_id: Uuid, delta: i32) -> Result<Option<LineChange>, ValueError> {
    let Some(pos) = lines.iter().position(|l| l.id == line_id) else { return Ok(None) };
    let line = &mut lines[pos];
    match line.quantity.step(delta)? {
        Some(q) => {
            line.quantity = q;
            Ok(Some(LineChange::Updated(line.clone())))
        }
        None => {
            lines.remove(pos);
            Ok(Some(LineChange::Removed))
        }
    }
}
