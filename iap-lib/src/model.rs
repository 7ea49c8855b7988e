//! Platform-neutral purchase values.
//!
//! [`Product`] and [`Purchase`] are immutable snapshots. A later product query
//! supersedes a `Product` rather than mutating it, and the purchase ledger
//! hands out the same `Purchase` value for every delivery of a token.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{IapError, IapResult};

/// Coarse product type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ProductKind {
    /// Consumable or non-consumable one-time purchase.
    #[default]
    #[serde(rename = "inapp")]
    OneTime,
    /// Auto-renewing subscription.
    #[serde(rename = "subs")]
    Recurring,
}

impl ProductKind {
    /// The name both platforms use for this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneTime => "inapp",
            Self::Recurring => "subs",
        }
    }
}

impl fmt::Display for ProductKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A purchasable product as reported by the store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    /// Identifier, unique within the catalog
    pub id: String,
    /// Localized display title
    pub title: String,
    /// Localized description
    pub description: String,
    /// Formatted price, passed through from the store
    pub price: String,
    /// ISO 4217 currency code
    pub currency_code: String,
    /// Price in micro-units of the currency (1_000_000 = 1.00)
    pub price_micros: i64,
    /// One-time or recurring
    pub kind: ProductKind,
}

impl Product {
    /// Split the price into whole currency units and the micro remainder.
    ///
    /// ```
    /// # use iap_lib::{Product, ProductKind};
    /// let product = Product {
    ///     id: "coins_100".into(),
    ///     title: "100 Coins".into(),
    ///     description: String::new(),
    ///     price: "$0.99".into(),
    ///     currency_code: "USD".into(),
    ///     price_micros: 990_000,
    ///     kind: ProductKind::OneTime,
    /// };
    /// assert_eq!(product.price_units(), (0, 990_000));
    /// ```
    pub fn price_units(&self) -> (i64, i64) {
        (
            self.price_micros / 1_000_000,
            self.price_micros % 1_000_000,
        )
    }
}

/// Signed receipt payload for server-side verification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Raw signed payload (Play Billing `originalJson`)
    pub payload: String,
    /// Signature over `payload`
    pub signature: String,
}

/// A completed purchase.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Purchase {
    /// Purchased product
    pub product_id: String,
    /// Opaque token; idempotency key for consume and acknowledge
    pub purchase_token: String,
    /// Order identifier; equals the token where the store has no orders
    pub order_id: String,
    /// Purchase time in milliseconds since the Unix epoch (UTC)
    pub purchase_time_ms: i64,
    /// Whether the purchase has been acknowledged or finished
    pub acknowledged: bool,
    /// Signed receipt, present only when the store provides one.
    ///
    /// `None` means the purchase cannot be verified locally and must be
    /// verified some other way.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt: Option<Receipt>,
}

impl Purchase {
    /// Purchase time as a UTC timestamp.
    pub fn purchased_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.purchase_time_ms)
    }

    /// Whether a signed receipt is attached.
    pub fn is_verifiable(&self) -> bool {
        self.receipt.is_some()
    }
}

/// A normalized transaction-state notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransactionEvent {
    /// A new purchase completed.
    Purchased(Purchase),
    /// A prior purchase was restored.
    Restored(Purchase),
    /// A purchase awaits external approval (ask-to-buy, pending payment).
    Pending {
        /// Product awaiting approval
        product_id: String,
    },
    /// The user backed out of the purchase flow.
    Cancelled {
        /// Product that was being purchased
        product_id: String,
    },
    /// The purchase failed.
    Failed {
        /// Product that was being purchased
        product_id: String,
        /// Platform failure
        error: IapError,
    },
}

impl TransactionEvent {
    /// Product the event refers to.
    pub fn product_id(&self) -> &str {
        match self {
            Self::Purchased(purchase) | Self::Restored(purchase) => &purchase.product_id,
            Self::Pending { product_id }
            | Self::Cancelled { product_id }
            | Self::Failed { product_id, .. } => product_id,
        }
    }

    /// The purchase carried by a purchased or restored event.
    pub fn purchase(&self) -> Option<&Purchase> {
        match self {
            Self::Purchased(purchase) | Self::Restored(purchase) => Some(purchase),
            _ => None,
        }
    }

    /// Map the event onto the error taxonomy.
    pub fn into_result(self) -> IapResult<Purchase> {
        match self {
            Self::Purchased(purchase) | Self::Restored(purchase) => Ok(purchase),
            Self::Pending { product_id } => Err(IapError::Pending { product_id }),
            Self::Cancelled { .. } => Err(IapError::UserCancelled),
            Self::Failed { error, .. } => Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn purchase() -> Purchase {
        Purchase {
            product_id: "coins_100".into(),
            purchase_token: "tok-1".into(),
            order_id: "GPA.1234".into(),
            purchase_time_ms: 1_700_000_000_000,
            acknowledged: false,
            receipt: None,
        }
    }

    #[test]
    fn test_product_kind_serializes_as_platform_names() {
        assert_eq!(
            serde_json::to_string(&ProductKind::Recurring).unwrap(),
            "\"subs\""
        );
        let kind: ProductKind = serde_json::from_str("\"inapp\"").unwrap();
        assert_eq!(kind, ProductKind::OneTime);
    }

    #[test]
    fn test_price_units() {
        let product = Product {
            id: "gold".into(),
            title: "Gold".into(),
            description: "Gold tier".into(),
            price: "$12.49".into(),
            currency_code: "USD".into(),
            price_micros: 12_490_000,
            kind: ProductKind::Recurring,
        };
        assert_eq!(product.price_units(), (12, 490_000));
    }

    #[test]
    fn test_purchased_at() {
        let at = purchase().purchased_at().unwrap();
        assert_eq!(at.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_receipt_omitted_when_absent() {
        let json = serde_json::to_value(purchase()).unwrap();
        assert!(json.get("receipt").is_none());
        assert!(!purchase().is_verifiable());
    }

    #[test]
    fn test_event_into_result() {
        let ok = TransactionEvent::Purchased(purchase()).into_result();
        assert_eq!(ok.unwrap().purchase_token, "tok-1");

        let cancelled = TransactionEvent::Cancelled {
            product_id: "coins_100".into(),
        };
        assert_eq!(cancelled.product_id(), "coins_100");
        assert_eq!(cancelled.into_result(), Err(IapError::UserCancelled));

        let pending = TransactionEvent::Pending {
            product_id: "coins_100".into(),
        };
        assert!(matches!(
            pending.into_result(),
            Err(IapError::Pending { .. })
        ));
    }
}
