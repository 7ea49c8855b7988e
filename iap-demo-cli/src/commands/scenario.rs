//! Scenario command - walk through the full purchase lifecycle

use anyhow::{Context, Result};
use iap_lib::Platform;

use super::{print_product, print_purchase, DemoConfig, Session, EVENT_TIMEOUT};
use crate::ui;

#[tracing::instrument(skip(config))]
pub async fn run<P: Platform>(config: &DemoConfig, product_id: &str) -> Result<()> {
    ui::header(&format!("Purchase lifecycle on {}", P::KIND));

    ui::step(1, "Connect");
    let session = Session::<P>::open(config).await?;
    let manager = &session.manager;
    let mut updates = manager.subscribe_to_purchase_updates()?;
    ui::key_value("State", &manager.state().to_string());

    ui::step(2, "Look up product");
    let product = session.product(product_id).await?;
    print_product(&product);

    ui::step(3, "Purchase");
    manager.launch_purchase(&product).await?;
    let purchase = tokio::time::timeout(EVENT_TIMEOUT, updates.recv())
        .await
        .context("Timed out waiting for the purchase")?
        .ok_or_else(|| anyhow::anyhow!("Purchase stream closed"))?;
    print_purchase(&purchase);

    ui::step(4, "Acknowledge");
    let acknowledged = manager.acknowledge(&purchase).await?;
    manager.acknowledge(&purchase).await?;
    ui::key_value("Acknowledged", &acknowledged.acknowledged.to_string());
    ui::key_value(
        "Store acknowledgements",
        &session.store.calls().acknowledge.to_string(),
    );

    ui::step(5, "Consume");
    if P::SUPPORTS_CONSUME {
        manager.consume(&acknowledged).await?;
        ui::success("Consumed; the product can be bought again");
    } else {
        ui::info("This store has no consume step");
    }

    ui::step(6, "Restore");
    let restored = manager.restore().await?;
    ui::key_value("Restored", &restored.len().to_string());
    ui::key_value(
        "Transactions finished",
        &session.store.finished_tokens().len().to_string(),
    );

    ui::step(7, "Disconnect");
    manager.disconnect();
    ui::key_value("State", &manager.state().to_string());

    println!();
    ui::success("Scenario complete");
    Ok(())
}
