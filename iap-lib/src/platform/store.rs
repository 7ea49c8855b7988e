//! Callback interface to the native commerce SDK.
//!
//! Implementations wrap a `BillingClient` or an `SKPaymentQueue` on the host
//! side. Every request method takes a [`Completion`] which must be resolved
//! exactly once, from any thread. A completion that is dropped unresolved
//! fails its request rather than leaving the caller waiting.

use std::sync::Arc;

use super::native::{ConnectOptions, NativeProduct, NativeTransaction, ProductQueryResponse};
use crate::bridge::Completion;

/// Push notifications from the native SDK.
///
/// Registered once per connection through [`NativeStore::start_connection`].
pub trait NativeObserver: Send + Sync {
    /// A batch of transaction state changes, in delivery order.
    fn on_transactions_updated(&self, transactions: Vec<NativeTransaction>);

    /// The platform service went away.
    fn on_service_disconnected(&self);
}

/// The native commerce SDK.
pub trait NativeStore: Send + Sync {
    /// Open the connection and register the long-lived observer.
    fn start_connection(
        &self,
        options: ConnectOptions,
        observer: Arc<dyn NativeObserver>,
        done: Completion<()>,
    );

    /// Close the connection and drop the observer registration.
    fn end_connection(&self);

    fn query_product_details(&self, ids: Vec<String>, done: Completion<ProductQueryResponse>);

    /// Present the purchase flow. Resolves once the flow is accepted; the
    /// result arrives through the observer.
    fn launch_billing_flow(&self, product: &NativeProduct, done: Completion<()>);

    fn consume(&self, token: &str, done: Completion<()>);

    fn acknowledge(&self, token: &str, done: Completion<()>);

    /// Currently owned purchases, without side effects.
    fn query_owned_purchases(&self, done: Completion<Vec<NativeTransaction>>);

    /// Restore prior purchases. May also push restored transactions through
    /// the observer before completing.
    fn restore(&self, done: Completion<Vec<NativeTransaction>>);

    /// Remove a transaction from the payment queue. No-op where the platform
    /// has no queue.
    fn finish_transaction(&self, transaction: &NativeTransaction);
}
