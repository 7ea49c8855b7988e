//! Values exchanged with the native commerce SDK.
//!
//! These mirror what the platform bridges hand over the FFI boundary. They are
//! deliberately loose: fields may be empty or missing and it is the job of
//! [`Platform::normalize`](super::Platform::normalize) to reject what cannot
//! become a [`Purchase`](crate::Purchase).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::{Product, ProductKind};

/// A failure reported by the native SDK.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeError {
    /// Platform-specific code (Play response code or `SKErrorCode`)
    pub code: i32,
    /// Platform-supplied message
    pub message: String,
}

impl NativeError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

impl std::error::Error for NativeError {}

/// What a native completion callback carries.
pub type NativeOutcome<T> = Result<T, NativeError>;

/// A product handle as returned by a product query.
///
/// The coordinator caches these and passes them back to
/// [`NativeStore::launch_billing_flow`](super::NativeStore::launch_billing_flow).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeProduct {
    pub id: String,
    pub title: String,
    pub description: String,
    pub formatted_price: String,
    pub currency_code: String,
    pub price_micros: i64,
    pub kind: ProductKind,
    /// Offer token required to launch a subscription flow on Play Billing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer_token: Option<String>,
}

impl NativeProduct {
    /// Convenience constructor for a one-time product.
    pub fn one_time(
        id: impl Into<String>,
        title: impl Into<String>,
        formatted_price: impl Into<String>,
        currency_code: impl Into<String>,
        price_micros: i64,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            formatted_price: formatted_price.into(),
            currency_code: currency_code.into(),
            price_micros,
            kind: ProductKind::OneTime,
            offer_token: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_kind(mut self, kind: ProductKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_offer_token(mut self, token: impl Into<String>) -> Self {
        self.offer_token = Some(token.into());
        self
    }
}

impl From<&NativeProduct> for Product {
    fn from(native: &NativeProduct) -> Self {
        Self {
            id: native.id.clone(),
            title: native.title.clone(),
            description: native.description.clone(),
            price: native.formatted_price.clone(),
            currency_code: native.currency_code.clone(),
            price_micros: native.price_micros,
            kind: native.kind,
        }
    }
}

/// Response to a product-details query.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProductQueryResponse {
    /// Products the store knows about
    pub products: Vec<NativeProduct>,
    /// Requested identifiers the store did not recognise
    pub invalid_ids: Vec<String>,
}

/// Native transaction state as reported by the payment queue or listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NativeTransactionState {
    Purchasing,
    Purchased,
    Failed,
    Restored,
    Deferred,
}

/// A transaction as delivered by the native SDK.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeTransaction {
    pub product_id: String,
    /// Purchase token (Play) or transaction identifier (StoreKit)
    pub transaction_id: Option<String>,
    /// Play order id; StoreKit has none
    pub order_id: Option<String>,
    pub purchase_time_ms: i64,
    pub state: NativeTransactionState,
    pub acknowledged: bool,
    /// Play `originalJson`
    pub original_json: Option<String>,
    pub signature: Option<String>,
    /// Populated for [`NativeTransactionState::Failed`]
    pub error: Option<NativeError>,
}

impl NativeTransaction {
    fn base(product_id: impl Into<String>, state: NativeTransactionState) -> Self {
        Self {
            product_id: product_id.into(),
            transaction_id: None,
            order_id: None,
            purchase_time_ms: 0,
            state,
            acknowledged: false,
            original_json: None,
            signature: None,
            error: None,
        }
    }

    pub fn purchased(
        product_id: impl Into<String>,
        token: impl Into<String>,
        purchase_time_ms: i64,
    ) -> Self {
        Self {
            transaction_id: Some(token.into()),
            purchase_time_ms,
            ..Self::base(product_id, NativeTransactionState::Purchased)
        }
    }

    pub fn restored(
        product_id: impl Into<String>,
        token: impl Into<String>,
        purchase_time_ms: i64,
    ) -> Self {
        Self {
            transaction_id: Some(token.into()),
            purchase_time_ms,
            ..Self::base(product_id, NativeTransactionState::Restored)
        }
    }

    pub fn failed(product_id: impl Into<String>, error: NativeError) -> Self {
        Self {
            error: Some(error),
            ..Self::base(product_id, NativeTransactionState::Failed)
        }
    }

    pub fn deferred(product_id: impl Into<String>) -> Self {
        Self::base(product_id, NativeTransactionState::Deferred)
    }

    pub fn purchasing(product_id: impl Into<String>) -> Self {
        Self::base(product_id, NativeTransactionState::Purchasing)
    }

    pub fn with_order_id(mut self, order_id: impl Into<String>) -> Self {
        self.order_id = Some(order_id.into());
        self
    }

    /// Attach the signed purchase payload.
    pub fn with_receipt(mut self, original_json: impl Into<String>, signature: impl Into<String>) -> Self {
        self.original_json = Some(original_json.into());
        self.signature = Some(signature.into());
        self
    }

    pub fn acknowledged(mut self, acknowledged: bool) -> Self {
        self.acknowledged = acknowledged;
        self
    }

    /// The token, if present and non-empty.
    pub fn token(&self) -> Option<&str> {
        self.transaction_id.as_deref().filter(|t| !t.is_empty())
    }
}

/// Options passed to [`NativeStore::start_connection`](super::NativeStore::start_connection).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Play Billing `enablePendingPurchases`; ignored by StoreKit
    pub enable_pending_purchases: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            enable_pending_purchases: true,
        }
    }
}
