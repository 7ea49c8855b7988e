//! Buy command - run one purchase flow

use anyhow::Result;
use iap_lib::sandbox::PurchaseScript;
use iap_lib::{IapError, Platform, TransactionEvent};

use super::{next_event, print_purchase, DemoConfig, Session};
use crate::ui;

/// What the simulated user does in the purchase flow.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UserAction {
    Complete,
    Cancel,
    Defer,
}

#[tracing::instrument(skip(config))]
pub async fn run<P: Platform>(
    config: &DemoConfig,
    product_id: &str,
    action: UserAction,
    consume: bool,
) -> Result<()> {
    let session = Session::<P>::open(config).await?;
    let mut events = session.manager.subscribe_to_transaction_events()?;

    let product = session.product(product_id).await?;
    ui::header(&format!("Buying {}", product.title));

    session.store.script_next_purchase(match action {
        UserAction::Complete => PurchaseScript::Complete,
        UserAction::Cancel => PurchaseScript::Cancel,
        UserAction::Defer => PurchaseScript::Defer,
    });

    match session.manager.launch_purchase(&product).await {
        Ok(()) => tracing::debug!("Purchase flow accepted"),
        Err(IapError::UserCancelled) => {
            ui::warning("Purchase cancelled");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    }

    loop {
        match next_event(&mut events).await? {
            TransactionEvent::Purchased(purchase) => {
                ui::success("Purchase completed");
                let purchase = session.manager.acknowledge(&purchase).await?;
                print_purchase(&purchase);
                if consume {
                    session.manager.consume(&purchase).await?;
                    ui::success("Purchase consumed");
                }
                return Ok(());
            }
            TransactionEvent::Pending { product_id } => {
                ui::warning(&format!("Purchase of {} is waiting for approval", product_id));
                return Ok(());
            }
            TransactionEvent::Cancelled { .. } => {
                ui::warning("Purchase cancelled by user");
                return Ok(());
            }
            TransactionEvent::Failed { error, .. } => return Err(error.into()),
            TransactionEvent::Restored(purchase) => {
                tracing::debug!("Ignoring restored purchase {}", purchase.purchase_token);
            }
        }
    }
}
