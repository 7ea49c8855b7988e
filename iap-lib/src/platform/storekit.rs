//! Apple StoreKit payment queue.
//!
//! The queue observer is persistent: unfinished transactions are redelivered
//! every time the app starts observing until `finishTransaction` is called.
//! The coordinator finishes each purchased or restored transaction once, so
//! purchases are reported as acknowledged.

use super::{identity, MalformedTransaction, NativeTransaction, Platform, PlatformKind};
use crate::model::Purchase;

/// `SKErrorCode` values.
pub mod error_code {
    pub const UNKNOWN: i32 = 0;
    pub const CLIENT_INVALID: i32 = 1;
    pub const PAYMENT_CANCELLED: i32 = 2;
    pub const PAYMENT_INVALID: i32 = 3;
    pub const PAYMENT_NOT_ALLOWED: i32 = 4;
    pub const STORE_PRODUCT_NOT_AVAILABLE: i32 = 5;
}

/// Message used when the device does not allow payments.
pub const PAYMENTS_DISABLED: &str = "In-app purchases are disabled";

/// StoreKit variant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoreKit;

impl Platform for StoreKit {
    const KIND: PlatformKind = PlatformKind::StoreKit;
    const AUTO_FINALIZE: bool = true;
    const SUPPORTS_CONSUME: bool = false;
    const USER_CANCELLED_CODE: i32 = error_code::PAYMENT_CANCELLED;

    fn normalize(transaction: &NativeTransaction) -> Result<Purchase, MalformedTransaction> {
        let (product_id, purchase_token) = identity(transaction)?;
        Ok(Purchase {
            product_id,
            order_id: purchase_token.clone(),
            purchase_token,
            purchase_time_ms: transaction.purchase_time_ms,
            acknowledged: true,
            receipt: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_uses_transaction_id_as_order_id() {
        let tx = NativeTransaction::restored("premium", "1000000812345", 1_650_000_000_000)
            .with_receipt("ignored", "ignored");
        let purchase = StoreKit::normalize(&tx).unwrap();

        assert_eq!(purchase.order_id, "1000000812345");
        assert_eq!(purchase.purchase_token, "1000000812345");
        assert!(purchase.acknowledged);
        assert!(purchase.receipt.is_none());
    }
}
