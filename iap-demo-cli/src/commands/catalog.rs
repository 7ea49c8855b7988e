//! Catalog command - look up products

use anyhow::Result;
use iap_lib::Platform;

use super::{print_product, DemoConfig, Session};
use crate::ui;

#[tracing::instrument(skip(config))]
pub async fn run<P: Platform>(config: &DemoConfig, ids: Vec<String>, json: bool) -> Result<()> {
    let session = Session::<P>::open(config).await?;

    let ids = if ids.is_empty() {
        config.catalog.iter().map(|p| p.id.clone()).collect()
    } else {
        ids
    };
    tracing::debug!("Looking up {} product ids", ids.len());
    let products = session.manager.lookup_products(ids).await?;

    if json {
        ui::json(&serde_json::to_value(&products)?);
        return Ok(());
    }

    ui::header(&format!("Catalog ({})", P::KIND));
    if products.is_empty() {
        ui::warning("The store did not recognise any of the requested products");
    }
    for (index, product) in products.iter().enumerate() {
        if index > 0 {
            ui::separator();
        }
        print_product(product);
    }
    Ok(())
}
