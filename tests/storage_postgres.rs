//! PostgreSQL store tests using testcontainers.
//!
//! Run with: cargo test --test storage_postgres --features postgres-tests -- --nocapture
//!
//! Each test starts its own PostgreSQL container and runs the migrations.

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use testcontainers::{
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
    ContainerAsync, GenericImage, ImageExt,
};
use uuid::Uuid;

use opensase_storefront::{
    catalog::Catalog,
    services::{ShippingDetails, Storefront},
    storage::{CommerceStore, ConsumedLine, OrderDraft, PgStore, StoreError},
    CartLine, CommerceError, Identity, LineChange, OrderNumber, OrderStatus, Product, Quantity, SessionToken,
    ShippingRecord, Size,
};

/// Start PostgreSQL. NULLS NOT DISTINCT needs 15 or later.
async fn start_postgres() -> (ContainerAsync<GenericImage>, String) {
    let image = GenericImage::new("postgres", "16")
        .with_exposed_port(5432.tcp())
        .with_wait_for(WaitFor::message_on_stdout("database system is ready to accept connections"));

    let container = image
        .with_env_var("POSTGRES_USER", "storefront")
        .with_env_var("POSTGRES_PASSWORD", "storefront")
        .with_env_var("POSTGRES_DB", "storefront")
        .with_startup_timeout(Duration::from_secs(60))
        .start()
        .await
        .expect("Failed to start postgres container");

    // The ready message is printed once during init and again when serving.
    tokio::time::sleep(Duration::from_secs(1)).await;

    let port = container.get_host_port_ipv4(5432).await.expect("Failed to get mapped port");
    let host = container.get_host().await.expect("Failed to get container host");
    (container, format!("postgres://storefront:storefront@{host}:{port}/storefront"))
}

async fn connect_and_migrate(connection_string: &str) -> PgStore {
    let pool = sqlx::PgPool::connect(connection_string).await.expect("Failed to connect to PostgreSQL");
    sqlx::migrate!("./migrations").run(&pool).await.expect("Failed to run migrations");
    PgStore::new(pool)
}

async fn product(store: &PgStore, name: &str, price: Decimal) -> Uuid {
    let p = Product::new(name, price);
    store.upsert_product(&p).await.unwrap();
    p.id
}

fn user() -> Identity {
    Identity::user(Uuid::new_v4())
}

fn number(suffix: u32) -> OrderNumber {
    OrderNumber::from_parts(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), suffix)
}

fn draft(cart_id: Uuid, lines: &[CartLine], order_number: OrderNumber, user_id: Option<Uuid>) -> OrderDraft {
    OrderDraft {
        order_number,
        cart_id,
        user_id,
        consumed: lines.iter().map(|l| ConsumedLine { line_id: l.id, quantity: l.quantity }).collect(),
        items: vec![],
        total_price: Decimal::ZERO,
        notes: String::new(),
        shipping: ShippingRecord {
            full_name: "Amal Hassan".into(),
            phone: "0100000000".into(),
            email: None,
            address: "12 Tahrir Square".into(),
            city: "Cairo".into(),
            postal_code: None,
            notes: None,
            created_at: Utc::now(),
        },
    }
}

fn shipping() -> ShippingDetails {
    ShippingDetails {
        full_name: "Amal Hassan".into(),
        phone: "0100000000".into(),
        address: "12 Tahrir Square".into(),
        city: "Cairo".into(),
        ..ShippingDetails::default()
    }
}

async fn count(store: &PgStore, table: &str) -> i64 {
    let (n,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table}")).fetch_one(store.pool()).await.unwrap();
    n
}

#[tokio::test]
async fn test_postgres_carts_and_lines() {
    let (_container, url) = start_postgres().await;
    let store = connect_and_migrate(&url).await;
    let shirt = product(&store, "Shirt", dec!(100.00)).await;

    let guest = Identity::anonymous(SessionToken::generate());
    let cart = store.get_or_create_cart(&guest).await.unwrap();
    assert_eq!(store.get_or_create_cart(&guest).await.unwrap().id, cart.id);
    assert!(cart.is_owned_by(&guest));
    let member = user();
    assert_ne!(store.get_or_create_cart(&member).await.unwrap().id, cart.id);
    assert_eq!(count(&store, "carts").await, 2);

    // Absent size and empty size are different lines; repeats merge.
    store.upsert_line(cart.id, shirt, &Size::none(), Quantity::ONE).await.unwrap();
    let merged = store.upsert_line(cart.id, shirt, &Size::none(), Quantity::new(2).unwrap()).await.unwrap();
    assert_eq!(merged.quantity.value(), 3);
    let empty = store.upsert_line(cart.id, shirt, &Size::labelled(""), Quantity::ONE).await.unwrap();
    assert_eq!(empty.size, Size::labelled(""));
    store.upsert_line(cart.id, shirt, &Size::labelled("M"), Quantity::ONE).await.unwrap();
    assert_eq!(store.cart_lines(cart.id).await.unwrap().len(), 3);

    match store.step_line(cart.id, merged.id, 1).await.unwrap() {
        LineChange::Updated(line) => assert_eq!(line.quantity.value(), 4),
        LineChange::Removed => panic!("line should remain"),
    }
    assert_eq!(store.step_line(cart.id, empty.id, -1).await.unwrap(), LineChange::Removed);
    assert!(store.line(empty.id).await.unwrap().is_none());

    assert!(matches!(store.delete_line(cart.id, empty.id).await, Err(StoreError::LineNotFound)));
    let other = store.get_or_create_cart(&member).await.unwrap();
    assert!(matches!(store.delete_line(other.id, merged.id).await, Err(StoreError::LineNotFound)));
    store.delete_line(cart.id, merged.id).await.unwrap();
    assert_eq!(store.cart_lines(cart.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_postgres_concurrent_merges() {
    let (_container, url) = start_postgres().await;
    let store = Arc::new(connect_and_migrate(&url).await);
    let cap = product(&store, "Cap", dec!(10.00)).await;
    let cart_id = store.get_or_create_cart(&user()).await.unwrap().id;

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..20 {
        let store = store.clone();
        tasks.spawn(async move { store.upsert_line(cart_id, cap, &Size::labelled("S"), Quantity::ONE).await });
    }
    while let Some(res) = tasks.join_next().await {
        res.unwrap().unwrap();
    }

    let lines = store.cart_lines(cart_id).await.unwrap();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].quantity.value(), 20);
}

#[tokio::test]
async fn test_postgres_quantity_bound() {
    let (_container, url) = start_postgres().await;
    let store = connect_and_migrate(&url).await;
    let cap = product(&store, "Cap", dec!(1.00)).await;
    let cart = store.get_or_create_cart(&user()).await.unwrap();
    let max = Quantity::new(Quantity::MAX).unwrap();

    let line = store.upsert_line(cart.id, cap, &Size::none(), max).await.unwrap();
    let err = store.upsert_line(cart.id, cap, &Size::none(), Quantity::new(5).unwrap()).await.unwrap_err();
    assert!(matches!(err, StoreError::Invalid(_)));
    assert!(matches!(store.step_line(cart.id, line.id, 1).await, Err(StoreError::Invalid(_))));
    assert_eq!(store.line(line.id).await.unwrap().unwrap().quantity, max);
}

#[tokio::test]
async fn test_postgres_duplicate_order_number_rolls_back() {
    let (_container, url) = start_postgres().await;
    let store = connect_and_migrate(&url).await;
    let cap = product(&store, "Cap", dec!(10.00)).await;

    let first = store.get_or_create_cart(&user()).await.unwrap();
    let second = store.get_or_create_cart(&user()).await.unwrap();
    for cart in [&first, &second] {
        store.upsert_line(cart.id, cap, &Size::none(), Quantity::ONE).await.unwrap();
    }

    let lines = store.cart_lines(first.id).await.unwrap();
    store.place_order(draft(first.id, &lines, number(7), None)).await.unwrap();
    assert!(store.cart_lines(first.id).await.unwrap().is_empty());

    let lines = store.cart_lines(second.id).await.unwrap();
    let err = store.place_order(draft(second.id, &lines, number(7), None)).await.unwrap_err();
    assert!(matches!(err, StoreError::DuplicateOrderNumber));
    assert_eq!(store.cart_lines(second.id).await.unwrap().len(), 1);
    assert_eq!(count(&store, "orders").await, 1);
    assert_eq!(count(&store, "shipping_info").await, 1);

    // A stale draft is refused without writing anything.
    store.upsert_line(second.id, cap, &Size::none(), Quantity::ONE).await.unwrap();
    let err = store.place_order(draft(second.id, &lines, number(8), None)).await.unwrap_err();
    assert!(matches!(err, StoreError::CartChanged));
    assert_eq!(count(&store, "orders").await, 1);

    let err = store.place_order(draft(first.id, &[], number(9), None)).await.unwrap_err();
    assert!(matches!(err, StoreError::CartEmpty));
}

#[tokio::test]
async fn test_postgres_checkout_snapshot_and_history() {
    let (_container, url) = start_postgres().await;
    let store = Arc::new(connect_and_migrate(&url).await);
    let a = product(&store, "A", dec!(100.00)).await;
    let b = Product::new("B", dec!(70.00)).with_discount(dec!(50.00));
    store.upsert_product(&b).await.unwrap();
    let shop = Storefront::new(store.clone(), store.clone());

    let who = user();
    let cart = shop.carts.get_or_create_cart(&who).await.unwrap();
    shop.carts.add_item(&who, &cart, a, 2, Size::labelled("M")).await.unwrap();
    shop.carts.add_item(&who, &cart, b.id, 1, Size::labelled("")).await.unwrap();
    assert_eq!(shop.carts.total_price(&cart).await.unwrap(), dec!(250.00));

    let order = shop.checkout.checkout(&who, &cart, shipping(), "ring twice").await.unwrap();
    assert_eq!(order.total_price, dec!(250.00));
    store.upsert_product(&Product { base_price: dec!(10.00), discount_price: None, ..b.clone() }).await.unwrap();

    let stored = store.order_by_number(&order.order_number).await.unwrap().unwrap();
    assert_eq!(stored.total_price, dec!(250.00));
    assert_eq!(stored.items.len(), 2);
    assert!(stored.items.iter().any(|i| i.size == Size::labelled("") && i.price == dec!(50.00)));
    assert_eq!(stored.shipping.city, "Cairo");
    assert_eq!(stored.notes, "ring twice");
    assert_eq!(stored.status, OrderStatus::Pending);
    assert!(store.cart_lines(cart.id).await.unwrap().is_empty());
    assert_eq!(store.product(b.id).await.unwrap().unwrap().base_price, dec!(10.00));

    shop.carts.add_item(&who, &cart, a, 1, Size::none()).await.unwrap();
    let newer = shop.checkout.checkout(&who, &cart, shipping(), "").await.unwrap();
    let history = shop.orders.order_history(&who).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].order_number, newer.order_number);
}

#[tokio::test]
async fn test_postgres_concurrent_checkout_makes_one_order() {
    let (_container, url) = start_postgres().await;
    let store = Arc::new(connect_and_migrate(&url).await);
    let a = product(&store, "A", dec!(3.00)).await;
    let shop = Storefront::new(store.clone(), store.clone());
    let who = Identity::anonymous(SessionToken::generate());
    let cart = shop.carts.get_or_create_cart(&who).await.unwrap();
    shop.carts.add_item(&who, &cart, a, 1, Size::none()).await.unwrap();

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..8 {
        let checkout = shop.checkout.clone();
        let (who, cart) = (who.clone(), cart.clone());
        tasks.spawn(async move { checkout.checkout(&who, &cart, shipping(), "").await });
    }
    let mut placed = 0;
    while let Some(res) = tasks.join_next().await {
        match res.unwrap() {
            Ok(_) => placed += 1,
            Err(CommerceError::EmptyCart) => {}
            Err(other) => panic!("unexpected {other:?}"),
        }
    }
    assert_eq!(placed, 1);
    assert_eq!(count(&store, "orders").await, 1);
    assert_eq!(count(&store, "order_items").await, 1);
}

#[tokio::test]
async fn test_postgres_status_compare_and_set() {
    let (_container, url) = start_postgres().await;
    let store = connect_and_migrate(&url).await;
    let cap = product(&store, "Cap", dec!(10.00)).await;
    let cart = store.get_or_create_cart(&user()).await.unwrap();
    store.upsert_line(cart.id, cap, &Size::none(), Quantity::ONE).await.unwrap();
    let lines = store.cart_lines(cart.id).await.unwrap();
    let order = store.place_order(draft(cart.id, &lines, number(1), None)).await.unwrap();

    let err = store.update_order_status(&order.order_number, OrderStatus::Shipped, OrderStatus::Delivered).await.unwrap_err();
    assert!(matches!(err, StoreError::StatusConflict));
    let updated = store.update_order_status(&order.order_number, OrderStatus::Pending, OrderStatus::Confirmed).await.unwrap();
    assert_eq!(updated.status, OrderStatus::Confirmed);

    let err = store.update_order_status(&number(2), OrderStatus::Pending, OrderStatus::Confirmed).await.unwrap_err();
    assert!(matches!(err, StoreError::OrderNotFound));
}
