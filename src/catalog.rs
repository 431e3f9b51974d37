//! Catalog accessor.
//!
//! Read-only product lookup used for live cart pricing and for the price
//! snapshot taken at checkout.

use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::aggregates::Product;
use crate::storage::StoreResult;

#[async_trait]
pub trait Catalog: Send + Sync {
    /// Look up a product by id, active or not.
    ///
    /// Returns `None` if the product does not exist.
    async fn product(&self, id: Uuid) -> StoreResult<Option<Product>>;
}

/// One product of a catalog seed file. Prices are decimal strings.
#[derive(Debug, Deserialize)]
struct SeedProduct {
    id: Option<Uuid>,
    name: String,
    base_price: Decimal,
    #[serde(default)]
    discount_price: Option<Decimal>,
    #[serde(default = "active")]
    is_active: bool,
    #[serde(default)]
    stock: u32,
}

fn active() -> bool {
    true
}

/// Parses a catalog seed: a JSON array of products. Missing ids are generated.
pub fn parse_seed(json: &str) -> serde_json::Result<Vec<Product>> {
    let seed: Vec<SeedProduct> = serde_json::from_str(json)?;
    Ok(seed
        .into_iter()
        .map(|p| Product {
            id: p.id.unwrap_or_else(Uuid::now_v7),
            name: p.name,
            base_price: p.base_price,
            discount_price: p.discount_price,
            is_active: p.is_active,
            stock: p.stock,
        })
        .collect())
}

/// Catalog held in memory. Used when no database is configured and in tests.
#[derive(Default)]
pub struct InMemoryCatalog {
    products: RwLock<HashMap<Uuid, Product>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_products(products: impl IntoIterator<Item = Product>) -> Self {
        Self { products: RwLock::new(products.into_iter().map(|p| (p.id, p)).collect()) }
    }

    pub async fn product_count(&self) -> usize {
        self.products.read().await.len()
    }

    pub async fn insert(&self, product: Product) -> Uuid {
        let id = product.id;
        self.products.write().await.insert(id, product);
        id
    }

    /// Changes base and discount price. Returns false for unknown products.
    pub async fn reprice(&self, id: Uuid, base_price: Decimal, discount_price: Option<Decimal>) -> bool {
        match self.products.write().await.get_mut(&id) {
            Some(p) => {
                p.base_price = base_price;
                p.discount_price = discount_price;
                true
            }
            None => false,
        }
    }

    pub async fn set_active(&self, id: Uuid, active: bool) -> bool {
        match self.products.write().await.get_mut(&id) {
            Some(p) => {
                p.is_active = active;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn product(&self, id: Uuid) -> StoreResult<Option<Product>> {
        Ok(self.products.read().await.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_lookup_and_reprice() {
        let catalog = InMemoryCatalog::new();
        let id = catalog.insert(Product::new("Cap", dec!(20.00))).await;

        assert!(catalog.reprice(id, dec!(25.00), Some(dec!(15.00))).await);
        let p = catalog.product(id).await.unwrap().unwrap();
        assert_eq!(p.effective_price(), dec!(15.00));

        assert!(catalog.product(Uuid::new_v4()).await.unwrap().is_none());
        assert!(!catalog.reprice(Uuid::new_v4(), dec!(1), None).await);
    }

    #[tokio::test]
    async fn test_seeded_catalog() {
        let json = r#"[
            {"id": "0190a5d0-0000-7000-8000-000000000001", "name": "Shirt", "base_price": "100.00"},
            {"name": "Socks", "base_price": "60.00", "discount_price": "50.00", "stock": 12},
            {"name": "Old hat", "base_price": "5.00", "is_active": false}
        ]"#;
        let products = parse_seed(json).unwrap();
        assert_eq!(products.len(), 3);
        assert!(products[0].is_active);
        assert_eq!(products[1].effective_price(), dec!(50.00));
        assert!(!products[2].is_active);

        let shirt = products[0].id;
        let catalog = InMemoryCatalog::with_products(products);
        assert_eq!(catalog.product_count().await, 3);
        assert_eq!(catalog.product(shirt).await.unwrap().unwrap().name, "Shirt");
    }

    #[test]
    fn test_seed_requires_prices() {
        assert!(parse_seed(r#"[{"name": "Free lunch"}]"#).is_err());
        assert!(parse_seed("{}").is_err());
    }
}
