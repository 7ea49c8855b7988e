//! Prelude module for convenient imports.
//!
//! ```rust,ignore
//! use iap_lib::prelude::*;
//! ```

// Manager and lifecycle
pub use crate::config::IapConfig;
pub use crate::manager::{ConnectionState, IapManager};

// Values
pub use crate::model::{Product, ProductKind, Purchase, Receipt, TransactionEvent};

// Error handling
pub use crate::errors::{IapError, IapErrorCode, IapResult, Operation};

// Subscriptions
pub use crate::observer::{PurchaseUpdates, TransactionEvents};

// Platforms
pub use crate::platform::{
    DefaultPlatform, NativeError, NativeProduct, NativeStore, NativeTransaction, Platform,
    PlatformKind, PlayBilling, StoreKit,
};

// Sandbox store
#[cfg(any(test, feature = "sandbox"))]
pub use crate::sandbox::{PurchaseScript, SandboxCall, SandboxStore};
