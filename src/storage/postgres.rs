//! PostgreSQL store.
//!
//! Line merging uses `INSERT .. ON CONFLICT DO UPDATE` against the
//! (cart_id, product_id, size) constraint. Checkout locks the cart row and its
//! lines, so checkouts and line mutations on one cart run one at a time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgPool;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use super::{CommerceStore, OrderDraft, StoreError, StoreResult};
use crate::catalog::Catalog;
use crate::domain::aggregates::{Cart, CartLine, LineChange, Order, OrderItem, OrderStatus, Product, ShippingRecord};
use crate::domain::value_objects::{Identity, OrderNumber, Quantity, SessionToken, Size, ValueError};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Inserts or replaces a catalog product.
    pub async fn upsert_product(&self, product: &Product) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO products (id, name, base_price, discount_price, is_active, stock) VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, base_price = EXCLUDED.base_price, \
             discount_price = EXCLUDED.discount_price, is_active = EXCLUDED.is_active, stock = EXCLUDED.stock, updated_at = NOW()",
        )
        .bind(product.id).bind(&product.name).bind(product.base_price).bind(product.discount_price)
        .bind(product.is_active).bind(i32::try_from(product.stock).unwrap_or(i32::MAX))
        .execute(&self.pool).await?;
        Ok(())
    }

    async fn load_order(&self, row: OrderRow) -> StoreResult<Order> {
        let items = sqlx::query_as::<_, OrderItemRow>(
            "SELECT id, product_id, quantity, size, price FROM order_items WHERE order_id = $1 ORDER BY id",
        )
        .bind(row.id)
        .fetch_all(&self.pool)
        .await?;
        let shipping = sqlx::query_as::<_, ShippingRow>(
            "SELECT full_name, phone, email, address, city, postal_code, notes, created_at FROM shipping_info WHERE order_id = $1",
        )
        .bind(row.id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::Corrupt(format!("order {} has no shipping record", row.order_number)))?;

        Ok(Order {
            id: row.id,
            order_number: row.order_number.parse().map_err(|e| StoreError::Corrupt(format!("{e}")))?,
            user_id: row.user_id,
            status: row.status.parse().map_err(|e| StoreError::Corrupt(format!("{e}")))?,
            total_price: row.total_price,
            notes: row.notes,
            items: items.into_iter().map(OrderItem::try_from).collect::<StoreResult<_>>()?,
            shipping: shipping.into(),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CartRow { id: Uuid, user_id: Option<Uuid>, session_key: Option<String>, created_at: DateTime<Utc>, updated_at: DateTime<Utc> }

#[derive(sqlx::FromRow)]
struct CartLineRow { id: Uuid, cart_id: Uuid, product_id: Uuid, quantity: i32, size: Option<String>, created_at: DateTime<Utc> }

#[derive(sqlx::FromRow)]
struct ProductRow { id: Uuid, name: String, base_price: Decimal, discount_price: Option<Decimal>, is_active: bool, stock: i32 }

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid, order_number: String, user_id: Option<Uuid>, status: String, total_price: Decimal, notes: String,
    created_at: DateTime<Utc>, updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct OrderItemRow { id: Uuid, product_id: Uuid, quantity: i32, size: Option<String>, price: Decimal }

#[derive(sqlx::FromRow)]
struct ShippingRow {
    full_name: String, phone: String, email: Option<String>, address: String, city: String,
    postal_code: Option<String>, notes: Option<String>, created_at: DateTime<Utc>,
}

fn quantity_from_db(raw: i32) -> StoreResult<Quantity> {
    u32::try_from(raw)
        .ok()
        .and_then(|q| Quantity::new(q).ok())
        .ok_or_else(|| StoreError::Corrupt(format!("quantity {raw}")))
}

impl TryFrom<CartRow> for Cart {
    type Error = StoreError;
    fn try_from(r: CartRow) -> StoreResult<Self> {
        let identity = match (r.user_id, r.session_key) {
            (Some(id), None) => Identity::user(id),
            (None, Some(key)) => Identity::anonymous(SessionToken::new(key).map_err(|e| StoreError::Corrupt(e.to_string()))?),
            _ => return Err(StoreError::Corrupt(format!("cart {} has no single owner", r.id))),
        };
        Ok(Cart { id: r.id, identity, created_at: r.created_at, updated_at: r.updated_at })
    }
}

impl TryFrom<CartLineRow> for CartLine {
    type Error = StoreError;
    fn try_from(r: CartLineRow) -> StoreResult<Self> {
        Ok(CartLine {
            id: r.id, cart_id: r.cart_id, product_id: r.product_id, quantity: quantity_from_db(r.quantity)?,
            size: Size::from(r.size), created_at: r.created_at,
        })
    }
}

impl TryFrom<OrderItemRow> for OrderItem {
    type Error = StoreError;
    fn try_from(r: OrderItemRow) -> StoreResult<Self> {
        Ok(OrderItem { id: r.id, product_id: r.product_id, quantity: quantity_from_db(r.quantity)?, size: Size::from(r.size), price: r.price })
    }
}

impl From<ShippingRow> for ShippingRecord {
    fn from(r: ShippingRow) -> Self {
        ShippingRecord {
            full_name: r.full_name, phone: r.phone, email: r.email, address: r.address, city: r.city,
            postal_code: r.postal_code, notes: r.notes, created_at: r.created_at,
        }
    }
}

const LINE_COLUMNS: &str = "id, cart_id, product_id, quantity, size, created_at";
const ORDER_COLUMNS: &str = "id, order_number, user_id, status, total_price, notes, created_at, updated_at";

async fn touch_cart(tx: &mut Transaction<'_, Postgres>, cart_id: Uuid) -> StoreResult<()> {
    sqlx::query("UPDATE carts SET updated_at = NOW() WHERE id = $1").bind(cart_id).execute(&mut **tx).await?;
    Ok(())
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error().map(|d| d.is_unique_violation()).unwrap_or(false)
}

#[async_trait]
impl CommerceStore for PgStore {
    async fn get_or_create_cart(&self, identity: &Identity) -> StoreResult<Cart> {
        let insert = "INSERT INTO carts (id, user_id, session_key, created_at, updated_at) VALUES ($1, $2, $3, NOW(), NOW()) ON CONFLICT DO NOTHING";
        let session_key = identity.session_token().map(|t| t.as_str().to_string());
        sqlx::query(insert)
            .bind(Uuid::now_v7()).bind(identity.user_id()).bind(&session_key)
            .execute(&self.pool).await?;

        let row = match identity {
            Identity::User { id } => {
                sqlx::query_as::<_, CartRow>("SELECT * FROM carts WHERE user_id = $1").bind(id).fetch_one(&self.pool).await?
            }
            Identity::Anonymous { session_token } => {
                sqlx::query_as::<_, CartRow>("SELECT * FROM carts WHERE session_key = $1").bind(session_token.as_str()).fetch_one(&self.pool).await?
            }
        };
        Cart::try_from(row)
    }

    async fn cart_lines(&self, cart_id: Uuid) -> StoreResult<Vec<CartLine>> {
        let rows = sqlx::query_as::<_, CartLineRow>(&format!("SELECT {LINE_COLUMNS} FROM cart_lines WHERE cart_id = $1 ORDER BY created_at, id"))
            .bind(cart_id).fetch_all(&self.pool).await?;
        rows.into_iter().map(CartLine::try_from).collect()
    }

    async fn line(&self, line_id: Uuid) -> StoreResult<Option<CartLine>> {
        sqlx::query_as::<_, CartLineRow>(&format!("SELECT {LINE_COLUMNS} FROM cart_lines WHERE id = $1"))
            .bind(line_id).fetch_optional(&self.pool).await?
            .map(CartLine::try_from).transpose()
    }

    async fn upsert_line(&self, cart_id: Uuid, product_id: Uuid, size: &Size, quantity: Quantity) -> StoreResult<CartLine> {
        let mut tx = self.pool.begin().await?;
        // Lock order matches place_order: cart row first.
        touch_cart(&mut tx, cart_id).await?;
        let row = sqlx::query_as::<_, CartLineRow>(&format!(
            "INSERT INTO cart_lines (id, cart_id, product_id, quantity, size, created_at) VALUES ($1, $2, $3, $4, $5, NOW()) \
             ON CONFLICT (cart_id, product_id, size) DO UPDATE SET quantity = cart_lines.quantity + EXCLUDED.quantity \
             WHERE cart_lines.quantity::BIGINT + EXCLUDED.quantity <= $6 \
             RETURNING {LINE_COLUMNS}"
        ))
        .bind(Uuid::now_v7()).bind(cart_id).bind(product_id).bind(quantity.as_i32()).bind(size.as_deref())
        .bind(i64::from(Quantity::MAX))
        .fetch_optional(&mut *tx).await?
        // The conflict branch skips the update when the sum would pass the bound.
        .ok_or(StoreError::Invalid(ValueError::QuantityTooLarge { max: Quantity::MAX }))?;
        tx.commit().await?;
        CartLine::try_from(row)
    }

    async fn step_line(&self, cart_id: Uuid, line_id: Uuid, delta: i32) -> StoreResult<LineChange> {
        let mut tx = self.pool.begin().await?;
        touch_cart(&mut tx, cart_id).await?;
        let row = sqlx::query_as::<_, CartLineRow>(&format!("SELECT {LINE_COLUMNS} FROM cart_lines WHERE id = $1 AND cart_id = $2 FOR UPDATE"))
            .bind(line_id).bind(cart_id).fetch_optional(&mut *tx).await?
            .ok_or(StoreError::LineNotFound)?;
        let mut line = CartLine::try_from(row)?;

        let change = match line.quantity.step(delta)? {
            Some(q) => {
                sqlx::query("UPDATE cart_lines SET quantity = $2 WHERE id = $1").bind(line_id).bind(q.as_i32()).execute(&mut *tx).await?;
                line.quantity = q;
                LineChange::Updated(line)
            }
            None => {
                sqlx::query("DELETE FROM cart_lines WHERE id = $1").bind(line_id).execute(&mut *tx).await?;
                LineChange::Removed
            }
        };
        tx.commit().await?;
        Ok(change)
    }

    async fn delete_line(&self, cart_id: Uuid, line_id: Uuid) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        touch_cart(&mut tx, cart_id).await?;
        let result = sqlx::query("DELETE FROM cart_lines WHERE id = $1 AND cart_id = $2").bind(line_id).bind(cart_id).execute(&mut *tx).await?;
        if result.rows_affected() == 0 { return Err(StoreError::LineNotFound); }
        tx.commit().await?;
        Ok(())
    }

    async fn place_order(&self, draft: OrderDraft) -> StoreResult<Order> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT id FROM carts WHERE id = $1 FOR UPDATE").bind(draft.cart_id).fetch_optional(&mut *tx).await?;
        let current = sqlx::query_as::<_, CartLineRow>(&format!("SELECT {LINE_COLUMNS} FROM cart_lines WHERE cart_id = $1 FOR UPDATE"))
            .bind(draft.cart_id).fetch_all(&mut *tx).await?
            .into_iter().map(CartLine::try_from).collect::<StoreResult<Vec<_>>>()?;
        if current.is_empty() { return Err(StoreError::CartEmpty); }
        if !draft.matches_lines(&current) { return Err(StoreError::CartChanged); }

        let order_row = sqlx::query_as::<_, OrderRow>(&format!(
            "INSERT INTO orders (id, order_number, user_id, status, total_price, notes, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW()) RETURNING {ORDER_COLUMNS}"
        ))
        .bind(Uuid::now_v7()).bind(draft.order_number.as_str()).bind(draft.user_id).bind(OrderStatus::Pending.as_str())
        .bind(draft.total_price).bind(&draft.notes)
        .fetch_one(&mut *tx).await
        .map_err(|e| if is_unique_violation(&e) { StoreError::DuplicateOrderNumber } else { StoreError::Database(e) })?;

        for item in &draft.items {
            sqlx::query("INSERT INTO order_items (id, order_id, product_id, quantity, size, price) VALUES ($1, $2, $3, $4, $5, $6)")
                .bind(item.id).bind(order_row.id).bind(item.product_id).bind(item.quantity.as_i32())
                .bind(item.size.as_deref()).bind(item.price)
                .execute(&mut *tx).await?;
        }

        let s = &draft.shipping;
        sqlx::query(
            "INSERT INTO shipping_info (order_id, full_name, phone, email, address, city, postal_code, notes, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(order_row.id).bind(&s.full_name).bind(&s.phone).bind(&s.email).bind(&s.address).bind(&s.city)
        .bind(&s.postal_code).bind(&s.notes).bind(s.created_at)
        .execute(&mut *tx).await?;

        let consumed: Vec<Uuid> = draft.consumed.iter().map(|c| c.line_id).collect();
        sqlx::query("DELETE FROM cart_lines WHERE id = ANY($1)").bind(&consumed).execute(&mut *tx).await?;
        touch_cart(&mut tx, draft.cart_id).await?;

        tx.commit().await?;

        Ok(Order {
            id: order_row.id,
            order_number: draft.order_number,
            user_id: draft.user_id,
            status: OrderStatus::Pending,
            total_price: order_row.total_price,
            notes: order_row.notes,
            items: draft.items,
            shipping: draft.shipping,
            created_at: order_row.created_at,
            updated_at: order_row.updated_at,
        })
    }

    async fn order_by_number(&self, number: &OrderNumber) -> StoreResult<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE order_number = $1"))
            .bind(number.as_str()).fetch_optional(&self.pool).await?;
        match row {
            Some(row) => Ok(Some(self.load_order(row).await?)),
            None => Ok(None),
        }
    }

    async fn orders_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Order>> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 ORDER BY created_at DESC, id DESC"))
            .bind(user_id).fetch_all(&self.pool).await?;
        let mut orders = Vec::with_capacity(rows.len());
        for row in rows {
            orders.push(self.load_order(row).await?);
        }
        Ok(orders)
    }

    async fn update_order_status(&self, number: &OrderNumber, expected: OrderStatus, next: OrderStatus) -> StoreResult<Order> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "UPDATE orders SET status = $3, updated_at = NOW() WHERE order_number = $1 AND status = $2 RETURNING {ORDER_COLUMNS}"
        ))
        .bind(number.as_str()).bind(expected.as_str()).bind(next.as_str())
        .fetch_optional(&self.pool).await?;

        match row {
            Some(row) => self.load_order(row).await,
            None => {
                let exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM orders WHERE order_number = $1")
                    .bind(number.as_str()).fetch_optional(&self.pool).await?;
                Err(if exists.is_some() { StoreError::StatusConflict } else { StoreError::OrderNotFound })
            }
        }
    }
}

#[async_trait]
impl Catalog for PgStore {
    async fn product(&self, id: Uuid) -> StoreResult<Option<Product>> {
        let row = sqlx::query_as::<_, ProductRow>("SELECT id, name, base_price, discount_price, is_active, stock FROM products WHERE id = $1")
            .bind(id).fetch_optional(&self.pool).await?;
        Ok(row.map(|r| Product {
            id: r.id,
            name: r.name,
            base_price: r.base_price,
            discount_price: r.discount_price,
            is_active: r.is_active,
            stock: u32::try_from(r.stock).unwrap_or(0),
        }))
    }
}
