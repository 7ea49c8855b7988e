//! CLI command implementations

pub mod buy;
pub mod catalog;
pub mod owned;
pub mod restore;
pub mod scenario;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use iap_lib::platform::{NativeProduct, NativeTransaction, Platform};
use iap_lib::sandbox::SandboxStore;
use iap_lib::{
    IapConfig, IapManager, Product, ProductKind, Purchase, TransactionEvent, TransactionEvents,
};
use serde::{Deserialize, Serialize};

use crate::ui;

/// How long to wait for the store to report a purchase outcome.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

/// A purchase the sandbox user already owns at startup.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OwnedEntry {
    pub product_id: String,
    pub token: String,
    #[serde(default)]
    pub acknowledged: bool,
}

/// Demo configuration, loaded from `--config`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DemoConfig {
    #[serde(default)]
    pub iap: IapConfig,

    #[serde(default = "default_catalog")]
    pub catalog: Vec<NativeProduct>,

    #[serde(default)]
    pub owned: Vec<OwnedEntry>,
}

fn default_catalog() -> Vec<NativeProduct> {
    vec![
        NativeProduct::one_time("coins_100", "100 Coins", "$0.99", "USD", 990_000)
            .with_description("A small pile of coins"),
        NativeProduct::one_time("premium", "Premium", "$4.99", "USD", 4_990_000)
            .with_description("Unlock every level"),
        NativeProduct::one_time("gold_monthly", "Gold", "$12.49", "USD", 12_490_000)
            .with_description("Monthly gold membership")
            .with_kind(ProductKind::Recurring)
            .with_offer_token("gold-monthly-base"),
    ]
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            iap: IapConfig::default(),
            catalog: default_catalog(),
            owned: Vec::new(),
        }
    }
}

impl DemoConfig {
    /// Load from a JSON file, or fall back to the built-in catalog.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.iap.validate()?;
        Ok(config)
    }
}

/// A sandbox store with a connected manager on top.
pub struct Session<P: Platform> {
    pub store: Arc<SandboxStore>,
    pub manager: IapManager<P>,
}

impl<P: Platform> Session<P> {
    pub async fn open(config: &DemoConfig) -> Result<Self> {
        let mut store = SandboxStore::new(P::KIND);
        for product in &config.catalog {
            store = store.with_product(product.clone());
        }
        let purchase_time = chrono::Utc::now().timestamp_millis();
        for entry in &config.owned {
            store = store.with_owned(
                NativeTransaction::purchased(&entry.product_id, &entry.token, purchase_time)
                    .acknowledged(entry.acknowledged),
            );
        }
        let store = Arc::new(store);

        let manager = IapManager::with_config(store.clone(), config.iap.clone())?;
        tracing::debug!(platform = %P::KIND, "connecting to sandbox store");
        manager
            .connect()
            .await
            .context("Failed to connect to the store")?;

        Ok(Self { store, manager })
    }

    /// Look up one product, failing if the store does not know it.
    pub async fn product(&self, product_id: &str) -> Result<Product> {
        self.manager
            .lookup_products([product_id])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Unknown product: {}", product_id))
    }
}

/// Wait for the next transaction event.
pub async fn next_event(events: &mut TransactionEvents) -> Result<TransactionEvent> {
    tokio::time::timeout(EVENT_TIMEOUT, events.recv())
        .await
        .context("Timed out waiting for the store")?
        .ok_or_else(|| anyhow::anyhow!("Transaction stream closed"))
}

pub fn print_product(product: &Product) {
    ui::key_value("Product", &product.id);
    ui::key_value("Title", &product.title);
    if !product.description.is_empty() {
        ui::key_value("Description", &product.description);
    }
    let (units, micros) = product.price_units();
    ui::key_value(
        "Price",
        &format!(
            "{} ({}.{:06} {})",
            product.price, units, micros, product.currency_code
        ),
    );
    ui::key_value("Type", product.kind.as_str());
}

pub fn print_purchase(purchase: &Purchase) {
    ui::key_value("Product", &purchase.product_id);
    ui::key_value("Token", &purchase.purchase_token);
    ui::key_value("Order", &purchase.order_id);
    if let Some(at) = purchase.purchased_at() {
        ui::key_value("Purchased", &at.to_rfc3339());
    }
    ui::key_value(
        "Acknowledged",
        if purchase.acknowledged { "yes" } else { "no" },
    );
    ui::key_value(
        "Receipt",
        if purchase.is_verifiable() {
            "signed"
        } else {
            "none (verify server-side)"
        },
    );
}

pub fn print_purchases(purchases: &[Purchase]) {
    if purchases.is_empty() {
        ui::info("No purchases");
        return;
    }
    for (index, purchase) in purchases.iter().enumerate() {
        if index > 0 {
            ui::separator();
        }
        print_purchase(purchase);
    }
}
