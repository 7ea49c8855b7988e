//! In-app purchase coordinator.
//!
//! One asynchronous, platform-neutral API over Google Play Billing and Apple
//! StoreKit. Both stores are callback driven and disagree on how purchases
//! are delivered and finalized; [`IapManager`] hides the difference:
//!
//! - each store request becomes one awaitable outcome
//! - product handles from a lookup are cached for the purchase call
//! - every transaction update is classified, finalized once, and fanned out
//!   to any number of subscribers
//!
//! The native SDK sits behind the [`NativeStore`](platform::NativeStore) and
//! [`NativeObserver`](platform::NativeObserver) traits, implemented by the
//! host bindings. `sandbox::SandboxStore` implements them in process for
//! tests and demos.
//!
//! # Features
//!
//! - `host` (default): [`host::HostRuntime`] for Swift/Kotlin callers that
//!   cannot await Rust futures
//! - `sandbox`: the in-process `SandboxStore`, for tests and demos
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use iap_lib::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> IapResult<()> {
//! let store = Arc::new(
//!     SandboxStore::new(PlatformKind::StoreKit)
//!         .with_product(NativeProduct::one_time("premium", "Premium", "$4.99", "USD", 4_990_000)),
//! );
//! let manager: IapManager<StoreKit> = IapManager::new(store);
//! manager.connect().await?;
//!
//! let products = manager.lookup_products(["premium", "unknown"]).await?;
//! assert_eq!(products.len(), 1);
//! assert_eq!(products[0].price_units(), (4, 990_000));
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod cache;
pub mod config;
pub mod errors;
#[cfg(feature = "host")]
pub mod host;
pub mod manager;
pub mod model;
pub mod observer;
pub mod platform;
pub mod prelude;
/// This module is only available with the `sandbox` feature or in test builds.
#[cfg(any(test, feature = "sandbox"))]
pub mod sandbox;

pub use config::IapConfig;
pub use errors::{IapError, IapErrorCode, IapResult, Operation};
pub use manager::{ConnectionState, IapManager};
pub use model::{Product, ProductKind, Purchase, Receipt, TransactionEvent};
pub use observer::{PurchaseUpdates, TransactionEvents};
pub use platform::{DefaultPlatform, Platform, PlatformKind, PlayBilling, StoreKit};
