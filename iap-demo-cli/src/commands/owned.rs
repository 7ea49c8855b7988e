//! Owned command - list purchases without finalizing them

use anyhow::Result;
use iap_lib::Platform;

use super::{print_purchases, DemoConfig, Session};
use crate::ui;

#[tracing::instrument(skip(config))]
pub async fn run<P: Platform>(config: &DemoConfig, json: bool) -> Result<()> {
    let session = Session::<P>::open(config).await?;
    let purchases = session.manager.query_owned_purchases().await?;

    if json {
        ui::json(&serde_json::to_value(&purchases)?);
    } else {
        ui::header(&format!("Owned purchases ({})", purchases.len()));
        print_purchases(&purchases);
    }
    Ok(())
}
