//! Restore command - restore and finalize prior purchases

use anyhow::Result;
use iap_lib::Platform;

use super::{print_purchases, DemoConfig, Session};
use crate::ui;

#[tracing::instrument(skip(config))]
pub async fn run<P: Platform>(config: &DemoConfig) -> Result<()> {
    let session = Session::<P>::open(config).await?;
    let restored = session.manager.restore().await?;

    ui::header(&format!("Restored purchases ({})", restored.len()));
    print_purchases(&restored);

    let calls = session.store.calls();
    ui::separator();
    ui::key_value("Store acknowledgements", &calls.acknowledge.to_string());
    ui::key_value("Transactions finished", &calls.finish_transaction.to_string());
    Ok(())
}
