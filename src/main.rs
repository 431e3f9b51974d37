//! OpenSASE Storefront - cart and checkout service

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use opensase_storefront::{
    api,
    catalog::{self, Catalog, InMemoryCatalog},
    config::Config,
    services::{EventPublisher, RandomOrderNumbers, Storefront},
    storage::{CommerceStore, MemoryStore, PgStore},
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())).with(tracing_subscriber::fmt::layer()).init();
    let config = Config::from_env()?;

    let seed = match &config.catalog_file {
        Some(path) => {
            let json = tokio::fs::read_to_string(path).await.with_context(|| format!("reading {}", path.display()))?;
            let products = catalog::parse_seed(&json).with_context(|| format!("parsing {}", path.display()))?;
            tracing::info!(products = products.len(), file = %path.display(), "catalog seed loaded");
            products
        }
        None => Vec::new(),
    };

    let (store, catalog): (Arc<dyn CommerceStore>, Arc<dyn Catalog>) = match &config.database_url {
        Some(url) => {
            let db = PgPoolOptions::new().max_connections(config.database_max_connections).connect(url).await?;
            sqlx::migrate!("./migrations").run(&db).await?;
            let pg = Arc::new(PgStore::new(db));
            for product in &seed {
                pg.upsert_product(product).await?;
            }
            (pg.clone(), pg)
        }
        None => {
            if seed.is_empty() {
                anyhow::bail!("DATABASE_URL not set and CATALOG_FILE empty or missing: the in-memory store has no products to sell");
            }
            tracing::warn!("DATABASE_URL not set, carts and orders live in memory only");
            (Arc::new(MemoryStore::new()), Arc::new(InMemoryCatalog::with_products(seed)))
        }
    };

    let nats = match &config.nats_url {
        Some(url) => match async_nats::connect(url.as_str()).await {
            Ok(client) => Some(client),
            Err(e) => {
                tracing::warn!(error = %e, "NATS unavailable, events will not be published");
                None
            }
        },
        None => None,
    };

    let shop = Storefront::with_parts(store, catalog, EventPublisher::new(nats), Arc::new(RandomOrderNumbers), config.checkout_max_attempts);
    let app = api::router(shop);

    tracing::info!("🚀 OpenSASE Storefront listening on 0.0.0.0:{}", config.port);
    axum::serve(tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?, app).await?;
    Ok(())
}
