//! Platform contract for the two supported commerce SDKs.
//!
//! The coordinator is written once against [`Platform`]; the two zero-sized
//! implementations capture where Play Billing and StoreKit disagree:
//!
//! | | Play Billing | StoreKit |
//! |---|---|---|
//! | finalization | explicit `acknowledge` | `finishTransaction`, done by the observer |
//! | consume step | yes | no |
//! | `acknowledged` on delivery | from the store | always `true` |
//! | receipt | `originalJson` + signature | none |
//! | user cancellation code | `USER_CANCELED = 1` | `SKErrorPaymentCancelled = 2` |
//!
//! [`DefaultPlatform`] picks the variant for the build target.

mod native;
pub mod play_billing;
mod store;
pub mod storekit;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use native::{
    ConnectOptions, NativeError, NativeOutcome, NativeProduct, NativeTransaction,
    NativeTransactionState, ProductQueryResponse,
};
pub use play_billing::PlayBilling;
pub use store::{NativeObserver, NativeStore};
pub use storekit::StoreKit;

use crate::model::{Purchase, Receipt};

/// Which commerce SDK a manager is driving.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformKind {
    PlayBilling,
    StoreKit,
}

impl fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PlayBilling => f.write_str("play-billing"),
            Self::StoreKit => f.write_str("storekit"),
        }
    }
}

/// A transaction that cannot be turned into a purchase.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MalformedTransaction {
    MissingProductId,
    MissingToken { product_id: String },
}

impl fmt::Display for MalformedTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingProductId => f.write_str("transaction has no product id"),
            Self::MissingToken { product_id } => {
                write!(f, "transaction for {} has no token", product_id)
            }
        }
    }
}

/// Per-platform behaviour of the purchase lifecycle.
pub trait Platform: Send + Sync + 'static {
    const KIND: PlatformKind;

    /// The observer finalizes purchases itself (`finishTransaction`), so
    /// delivered purchases are already acknowledged.
    const AUTO_FINALIZE: bool;

    /// Consumables must be consumed through the store.
    const SUPPORTS_CONSUME: bool;

    /// Native code a failed transaction carries when the user backed out.
    const USER_CANCELLED_CODE: i32;

    /// Convert a purchased or restored transaction into a [`Purchase`].
    fn normalize(transaction: &NativeTransaction) -> Result<Purchase, MalformedTransaction>;

    fn is_user_cancellation(error: &NativeError) -> bool {
        error.code == Self::USER_CANCELLED_CODE
    }
}

/// Product id and token shared by both normalizers.
fn identity(transaction: &NativeTransaction) -> Result<(String, String), MalformedTransaction> {
    if transaction.product_id.is_empty() {
        return Err(MalformedTransaction::MissingProductId);
    }
    let token = transaction
        .token()
        .ok_or_else(|| MalformedTransaction::MissingToken {
            product_id: transaction.product_id.clone(),
        })?;
    Ok((transaction.product_id.clone(), token.to_string()))
}

fn receipt(transaction: &NativeTransaction) -> Option<Receipt> {
    match (&transaction.original_json, &transaction.signature) {
        (Some(payload), Some(signature)) if !payload.is_empty() && !signature.is_empty() => {
            Some(Receipt {
                payload: payload.clone(),
                signature: signature.clone(),
            })
        }
        _ => None,
    }
}

/// The platform of the build target.
#[cfg(target_vendor = "apple")]
pub type DefaultPlatform = StoreKit;

/// The platform of the build target.
#[cfg(not(target_vendor = "apple"))]
pub type DefaultPlatform = PlayBilling;
