//! Google Play Billing.
//!
//! Purchases arrive through a one-shot `PurchasesUpdatedListener` and stay
//! unacknowledged until the app acknowledges or consumes them. Play refunds
//! purchases that are not acknowledged within three days, so the coordinator
//! never acknowledges silently outside of `restore()`.

use super::{identity, receipt, MalformedTransaction, NativeTransaction, Platform, PlatformKind};
use crate::model::Purchase;

/// `BillingClient.BillingResponseCode` values.
pub mod response_code {
    pub const SERVICE_TIMEOUT: i32 = -3;
    pub const FEATURE_NOT_SUPPORTED: i32 = -2;
    pub const SERVICE_DISCONNECTED: i32 = -1;
    pub const OK: i32 = 0;
    pub const USER_CANCELED: i32 = 1;
    pub const SERVICE_UNAVAILABLE: i32 = 2;
    pub const BILLING_UNAVAILABLE: i32 = 3;
    pub const ITEM_UNAVAILABLE: i32 = 4;
    pub const DEVELOPER_ERROR: i32 = 5;
    pub const ERROR: i32 = 6;
    pub const ITEM_ALREADY_OWNED: i32 = 7;
    pub const ITEM_NOT_OWNED: i32 = 8;
    pub const NETWORK_ERROR: i32 = 12;
}

/// Play Billing variant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PlayBilling;

impl Platform for PlayBilling {
    const KIND: PlatformKind = PlatformKind::PlayBilling;
    const AUTO_FINALIZE: bool = false;
    const SUPPORTS_CONSUME: bool = true;
    const USER_CANCELLED_CODE: i32 = response_code::USER_CANCELED;

    fn normalize(transaction: &NativeTransaction) -> Result<Purchase, MalformedTransaction> {
        let (product_id, purchase_token) = identity(transaction)?;
        Ok(Purchase {
            product_id,
            purchase_token,
            order_id: transaction.order_id.clone().unwrap_or_default(),
            purchase_time_ms: transaction.purchase_time_ms,
            acknowledged: transaction.acknowledged,
            receipt: receipt(transaction),
        })
    }
}
