//! The purchase manager.
//!
//! [`IapManager`] owns one store connection and everything tied to it: the
//! product cache, the pending-request table, the purchase ledger and the
//! transaction observer. Its state machine is
//!
//! ```text
//! Disconnected --connect()--> Connecting --ok--> Ready
//!      ^                          |                |
//!      +------ failure/drop ------+                |
//!      +------------- service lost ----------------+
//!
//! any state --disconnect()--> Closed
//! ```
//!
//! Every connection attempt starts a new epoch. Callbacks and query results
//! from an older epoch are ignored, so a stale connection can never write into
//! the cache or publish events.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use serde::{Deserialize, Serialize};

use crate::bridge::Bridge;
use crate::cache::ProductCache;
use crate::config::IapConfig;
use crate::errors::{IapError, IapResult, Operation};
use crate::model::{Product, Purchase};
use crate::observer::{
    Claim, Finalization, PurchaseLedger, PurchaseUpdates, TransactionEvents, TransactionObserver,
};
use crate::platform::{
    ConnectOptions, DefaultPlatform, NativeObserver, NativeStore, NativeTransaction,
    NativeTransactionState, Platform, PlatformKind,
};

/// Connection lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Ready,
    /// Terminal; reached only through [`IapManager::disconnect`].
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting => f.write_str("connecting"),
            Self::Ready => f.write_str("ready"),
            Self::Closed => f.write_str("closed"),
        }
    }
}

#[derive(Debug)]
struct Lifecycle {
    state: ConnectionState,
    epoch: u64,
}

struct Inner<P: Platform> {
    store: Arc<dyn NativeStore>,
    config: IapConfig,
    lifecycle: Mutex<Lifecycle>,
    cache: ProductCache,
    bridge: Bridge,
    ledger: Arc<Mutex<PurchaseLedger>>,
    observer: TransactionObserver<P>,
}

impl<P: Platform> Inner<P> {
    /// The current epoch if the connection is ready.
    fn ready_epoch(&self, operation: Operation) -> IapResult<u64> {
        let lifecycle = self.lifecycle.lock().expect("lock poisoned");
        match lifecycle.state {
            ConnectionState::Ready => Ok(lifecycle.epoch),
            _ => Err(IapError::NotReady { operation }),
        }
    }

    fn service_lost(&self, epoch: u64) {
        {
            let mut lifecycle = self.lifecycle.lock().expect("lock poisoned");
            if lifecycle.epoch != epoch
                || !matches!(
                    lifecycle.state,
                    ConnectionState::Connecting | ConnectionState::Ready
                )
            {
                return;
            }
            lifecycle.state = ConnectionState::Disconnected;
            lifecycle.epoch += 1;
        }
        let aborted = self.bridge.abort_all();
        tracing::debug!(platform = %P::KIND, aborted, "store service disconnected");
    }

    fn transactions_updated(&self, epoch: u64, transactions: Vec<NativeTransaction>) {
        if self.lifecycle.lock().expect("lock poisoned").epoch != epoch {
            tracing::trace!(
                count = transactions.len(),
                "ignoring transactions from a previous connection"
            );
            return;
        }
        self.observer.handle(transactions);
    }
}

/// The observer registered with the store for one connection attempt.
struct ConnectionObserver<P: Platform> {
    inner: Weak<Inner<P>>,
    epoch: u64,
}

impl<P: Platform> NativeObserver for ConnectionObserver<P> {
    fn on_transactions_updated(&self, transactions: Vec<NativeTransaction>) {
        if let Some(inner) = self.inner.upgrade() {
            inner.transactions_updated(self.epoch, transactions);
        }
    }

    fn on_service_disconnected(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.service_lost(self.epoch);
        }
    }
}

/// Puts the manager back into `Disconnected` if a connection attempt fails
/// or its future is dropped.
///
/// An attempt dropped before the store answered is also ended on the store
/// side, so a connection that completes later leaves no observer behind.
struct ConnectGuard<'a, P: Platform> {
    inner: &'a Inner<P>,
    epoch: u64,
    answered: bool,
}

impl<P: Platform> Drop for ConnectGuard<'_, P> {
    fn drop(&mut self) {
        let reverted = {
            let mut lifecycle = self.inner.lifecycle.lock().expect("lock poisoned");
            let current =
                lifecycle.epoch == self.epoch && lifecycle.state == ConnectionState::Connecting;
            if current {
                lifecycle.state = ConnectionState::Disconnected;
                lifecycle.epoch += 1;
            }
            current
        };
        if reverted && !self.answered {
            self.inner.store.end_connection();
            tracing::debug!(platform = %P::KIND, "connection attempt abandoned");
        }
    }
}

/// Platform-neutral in-app purchase coordinator.
///
/// One manager drives one store connection. Operations other than
/// [`connect`](Self::connect), [`disconnect`](Self::disconnect) and the
/// subscription methods require the [`Ready`](ConnectionState::Ready) state.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use iap_lib::prelude::*;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> IapResult<()> {
/// let store = Arc::new(
///     SandboxStore::new(PlatformKind::PlayBilling).with_product(NativeProduct::one_time(
///         "coins_100", "100 Coins", "$0.99", "USD", 990_000,
///     )),
/// );
/// let manager: IapManager<PlayBilling> = IapManager::new(store);
/// let mut updates = manager.subscribe_to_purchase_updates()?;
///
/// manager.connect().await?;
/// let products = manager.lookup_products(["coins_100"]).await?;
/// manager.launch_purchase(&products[0]).await?;
///
/// let purchase = updates.recv().await.expect("purchase delivered");
/// let purchase = manager.acknowledge(&purchase).await?;
/// assert!(purchase.acknowledged);
/// manager.disconnect();
/// # Ok(())
/// # }
/// ```
pub struct IapManager<P: Platform = DefaultPlatform> {
    inner: Arc<Inner<P>>,
}

impl<P: Platform> IapManager<P> {
    /// Create a manager with the default configuration.
    pub fn new(store: Arc<dyn NativeStore>) -> Self {
        Self::build(store, IapConfig::default())
    }

    /// Create a manager with a custom configuration.
    pub fn with_config(store: Arc<dyn NativeStore>, config: IapConfig) -> IapResult<Self> {
        config.validate()?;
        Ok(Self::build(store, config))
    }

    fn build(store: Arc<dyn NativeStore>, config: IapConfig) -> Self {
        let ledger = Arc::new(Mutex::new(PurchaseLedger::new()));
        let observer = TransactionObserver::new(store.clone(), ledger.clone(), config.event_capacity);
        Self {
            inner: Arc::new(Inner {
                store,
                config,
                lifecycle: Mutex::new(Lifecycle {
                    state: ConnectionState::Disconnected,
                    epoch: 0,
                }),
                cache: ProductCache::new(),
                bridge: Bridge::new(),
                ledger,
                observer,
            }),
        }
    }

    /// Open the store connection and register the transaction observer.
    ///
    /// Only valid from `Disconnected`. Store failures are returned verbatim.
    /// Dropping the returned future before it completes leaves the manager
    /// `Disconnected` and ends the half-open store connection.
    #[tracing::instrument(skip(self), fields(platform = %P::KIND))]
    pub async fn connect(&self) -> IapResult<()> {
        let operation = Operation::Connect;
        let epoch = {
            let mut lifecycle = self.inner.lifecycle.lock().expect("lock poisoned");
            match lifecycle.state {
                ConnectionState::Disconnected => {
                    lifecycle.state = ConnectionState::Connecting;
                    lifecycle.epoch += 1;
                    lifecycle.epoch
                }
                ConnectionState::Closed => return Err(IapError::Closed),
                state => return Err(IapError::AlreadyConnected { state }),
            }
        };
        let mut guard = ConnectGuard {
            inner: &self.inner,
            epoch,
            answered: false,
        };

        let observer: Arc<dyn NativeObserver> = Arc::new(ConnectionObserver {
            inner: Arc::downgrade(&self.inner),
            epoch,
        });
        let options = ConnectOptions {
            enable_pending_purchases: self.inner.config.enable_pending_purchases,
        };

        let outcome = self
            .inner
            .bridge
            .call(operation, |done| {
                self.inner.store.start_connection(options, observer, done)
            })
            .await;
        guard.answered = true;
        outcome?.map_err(|e| IapError::platform(operation, e))?;

        let mut lifecycle = self.inner.lifecycle.lock().expect("lock poisoned");
        if lifecycle.epoch != epoch || lifecycle.state != ConnectionState::Connecting {
            return Err(IapError::Disconnected { operation });
        }
        lifecycle.state = ConnectionState::Ready;
        tracing::debug!(epoch, "store connection ready");
        Ok(())
    }

    /// Close the connection for good.
    ///
    /// Ends the store connection, fails every pending request with
    /// `Disconnected`, empties the product cache and the ledger, and ends all
    /// subscriptions. Safe to call from any state and more than once.
    pub fn disconnect(&self) {
        let previous = {
            let mut lifecycle = self.inner.lifecycle.lock().expect("lock poisoned");
            let previous = lifecycle.state;
            if previous == ConnectionState::Closed {
                return;
            }
            lifecycle.state = ConnectionState::Closed;
            lifecycle.epoch += 1;
            previous
        };

        if matches!(
            previous,
            ConnectionState::Connecting | ConnectionState::Ready
        ) {
            self.inner.store.end_connection();
        }
        let aborted = self.inner.bridge.close();
        self.inner.cache.clear();
        self.inner.ledger.lock().expect("lock poisoned").clear();
        self.inner.observer.close();
        tracing::debug!(platform = %P::KIND, %previous, aborted, "purchase manager closed");
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lifecycle.lock().expect("lock poisoned").state
    }

    pub fn platform_kind(&self) -> PlatformKind {
        P::KIND
    }

    pub fn config(&self) -> &IapConfig {
        &self.inner.config
    }

    /// The product from the most recent lookup, without contacting the store.
    pub fn cached_product(&self, product_id: &str) -> Option<Product> {
        self.inner.cache.get(product_id)
    }

    /// Requests still waiting for the store.
    pub fn pending_requests(&self) -> usize {
        self.inner.bridge.pending()
    }

    /// Query product details and cache the native handles.
    ///
    /// Duplicate ids are collapsed. Ids the store does not recognise are left
    /// out of the result.
    #[tracing::instrument(skip(self, ids), fields(platform = %P::KIND))]
    pub async fn lookup_products<I, S>(&self, ids: I) -> IapResult<Vec<Product>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let operation = Operation::LookupProducts;
        let epoch = self.inner.ready_epoch(operation)?;
        let ids: BTreeSet<String> = ids.into_iter().map(Into::into).collect();
        if ids.is_empty() {
            return Err(IapError::InvalidArgument(
                "at least one product id is required".to_string(),
            ));
        }

        let response = self
            .inner
            .bridge
            .call(operation, |done| {
                self.inner
                    .store
                    .query_product_details(ids.into_iter().collect(), done)
            })
            .await?
            .map_err(|e| IapError::platform(operation, e))?;

        if !response.invalid_ids.is_empty() {
            tracing::debug!(invalid_ids = ?response.invalid_ids, "store did not recognise product ids");
        }

        let products: Vec<Product> = response.products.iter().map(Product::from).collect();
        {
            let lifecycle = self.inner.lifecycle.lock().expect("lock poisoned");
            if lifecycle.epoch != epoch {
                return Err(IapError::Disconnected { operation });
            }
            self.inner.cache.insert(response.products);
        }
        tracing::debug!(count = products.len(), "products cached");
        Ok(products)
    }

    /// Start the purchase flow for a previously looked-up product.
    ///
    /// Resolves once the store accepts the flow. The outcome of the purchase
    /// itself arrives through the subscription streams.
    #[tracing::instrument(skip(self, product), fields(platform = %P::KIND, product_id = %product.id))]
    pub async fn launch_purchase(&self, product: &Product) -> IapResult<()> {
        let operation = Operation::LaunchPurchase;
        self.inner.ready_epoch(operation)?;
        let handle = self.inner.cache.handle(&product.id)?;

        self.inner
            .bridge
            .call(operation, |done| {
                self.inner.store.launch_billing_flow(&handle, done)
            })
            .await?
            .map_err(|e| {
                if P::is_user_cancellation(&e) {
                    IapError::UserCancelled
                } else {
                    IapError::platform(operation, e)
                }
            })
    }

    /// Acknowledge a purchase and return it with `acknowledged = true`.
    ///
    /// The store is contacted at most once per token, also when several
    /// calls overlap. Purchases that are already acknowledged or consumed, or
    /// that come from an auto-finalizing store, return immediately.
    #[tracing::instrument(skip(self, purchase), fields(platform = %P::KIND, product_id = %purchase.product_id))]
    pub async fn acknowledge(&self, purchase: &Purchase) -> IapResult<Purchase> {
        let operation = Operation::Acknowledge;
        self.inner.ready_epoch(operation)?;
        if P::AUTO_FINALIZE {
            return Ok(self.record_acknowledged(purchase));
        }

        self.acknowledge_with_store(operation, purchase).await
    }

    /// Consume a purchase so the product can be bought again. A consumed
    /// purchase counts as acknowledged.
    ///
    /// A no-op on stores without a consume step and for tokens already
    /// consumed on this manager. Overlapping calls for one token share a
    /// single store call.
    #[tracing::instrument(skip(self, purchase), fields(platform = %P::KIND, product_id = %purchase.product_id))]
    pub async fn consume(&self, purchase: &Purchase) -> IapResult<()> {
        let operation = Operation::Consume;
        self.inner.ready_epoch(operation)?;
        if !P::SUPPORTS_CONSUME {
            return Ok(());
        }
        let token = purchase.purchase_token.as_str();

        loop {
            let ticket = match self.claim(operation, token, |ledger| ledger.is_consumed(token))? {
                None => {
                    tracing::debug!("purchase already consumed");
                    return Ok(());
                }
                Some(Claim::Wait(outcome)) => {
                    Claim::wait(outcome, Finalization::Consume).await?;
                    continue;
                }
                Some(Claim::Owner(ticket)) => ticket,
            };

            let result = self
                .inner
                .bridge
                .call(operation, |done| self.inner.store.consume(token, done))
                .await
                .and_then(|outcome| outcome.map_err(|e| IapError::platform(operation, e)));

            return ticket.finish(Finalization::Consume, result, |ledger| {
                ledger.acknowledge(purchase);
                ledger.mark_consumed(token);
            });
        }
    }

    /// Purchases the user currently owns. Nothing is acknowledged or finished.
    #[tracing::instrument(skip(self), fields(platform = %P::KIND))]
    pub async fn query_owned_purchases(&self) -> IapResult<Vec<Purchase>> {
        let operation = Operation::QueryOwnedPurchases;
        self.inner.ready_epoch(operation)?;

        let transactions = self
            .inner
            .bridge
            .call(operation, |done| self.inner.store.query_owned_purchases(done))
            .await?
            .map_err(|e| IapError::platform(operation, e))?;

        Ok(self
            .normalize_owned(&transactions)
            .into_iter()
            .map(|(_, purchase)| purchase)
            .collect())
    }

    /// Restore prior purchases and finalize each one.
    ///
    /// Every returned purchase is acknowledged. Calling this again is safe;
    /// purchases already finalized are not finalized twice.
    #[tracing::instrument(skip(self), fields(platform = %P::KIND))]
    pub async fn restore(&self) -> IapResult<Vec<Purchase>> {
        let operation = Operation::Restore;
        self.inner.ready_epoch(operation)?;

        let transactions = self
            .inner
            .bridge
            .call(operation, |done| self.inner.store.restore(done))
            .await?
            .map_err(|e| IapError::platform(operation, e))?;

        let mut restored = Vec::with_capacity(transactions.len());
        for (transaction, purchase) in self.normalize_owned(&transactions) {
            if P::AUTO_FINALIZE {
                self.inner.observer.finalize_once(transaction);
                restored.push(purchase);
            } else {
                restored.push(self.acknowledge_with_store(operation, &purchase).await?);
            }
        }
        tracing::debug!(count = restored.len(), "purchases restored");
        Ok(restored)
    }

    /// Stream of purchased and restored purchases.
    ///
    /// Allowed before `connect()`. Fails with `Closed` after `disconnect()`.
    pub fn subscribe_to_purchase_updates(&self) -> IapResult<PurchaseUpdates> {
        self.inner.observer.subscribe().map(PurchaseUpdates::new)
    }

    /// Stream of every transaction event, including pending, cancelled and
    /// failed purchases.
    pub fn subscribe_to_transaction_events(&self) -> IapResult<TransactionEvents> {
        self.inner.observer.subscribe()
    }

    fn record_acknowledged(&self, purchase: &Purchase) -> Purchase {
        self.inner
            .ledger
            .lock()
            .expect("lock poisoned")
            .acknowledge(purchase)
    }

    /// Check `done` and claim `token` under one ledger lock. `None` means
    /// the ledger already shows the step as done.
    fn claim(
        &self,
        operation: Operation,
        token: &str,
        done: impl FnOnce(&PurchaseLedger) -> bool,
    ) -> IapResult<Option<Claim>> {
        self.inner.ready_epoch(operation)?;
        let mut ledger = self.inner.ledger.lock().expect("lock poisoned");
        if done(&*ledger) {
            return Ok(None);
        }
        Ok(Some(Claim::acquire(&self.inner.ledger, &mut *ledger, token)))
    }

    async fn acknowledge_with_store(
        &self,
        operation: Operation,
        purchase: &Purchase,
    ) -> IapResult<Purchase> {
        let token = purchase.purchase_token.as_str();

        loop {
            let claim = self.claim(operation, token, |ledger| {
                purchase.acknowledged || ledger.is_acknowledged(token) || ledger.is_consumed(token)
            })?;
            let ticket = match claim {
                None => return Ok(self.record_acknowledged(purchase)),
                Some(Claim::Wait(outcome)) => {
                    Claim::wait(outcome, Finalization::Acknowledge).await?;
                    continue;
                }
                Some(Claim::Owner(ticket)) => ticket,
            };

            let result = self
                .inner
                .bridge
                .call(operation, |done| self.inner.store.acknowledge(token, done))
                .await
                .and_then(|outcome| outcome.map_err(|e| IapError::platform(operation, e)));

            let acknowledged = ticket.finish(Finalization::Acknowledge, result, |ledger| {
                ledger.acknowledge(purchase)
            })?;
            tracing::debug!(product_id = %purchase.product_id, "purchase acknowledged");
            return Ok(acknowledged);
        }
    }

    /// Terminal-success transactions as canonical purchases, paired with the
    /// transaction they came from.
    fn normalize_owned<'t>(
        &self,
        transactions: &'t [NativeTransaction],
    ) -> Vec<(&'t NativeTransaction, Purchase)> {
        let mut ledger = self.inner.ledger.lock().expect("lock poisoned");
        transactions
            .iter()
            .filter(|t| {
                matches!(
                    t.state,
                    NativeTransactionState::Purchased | NativeTransactionState::Restored
                )
            })
            .filter_map(|t| match P::normalize(t) {
                Ok(purchase) => Some((t, ledger.record(purchase))),
                Err(reason) => {
                    tracing::warn!(platform = %P::KIND, "skipping malformed transaction: {}", reason);
                    None
                }
            })
            .collect()
    }
}

impl<P: Platform> Drop for IapManager<P> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl<P: Platform> fmt::Debug for IapManager<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let purchases = self.inner.ledger.lock().expect("lock poisoned").len();
        f.debug_struct("IapManager")
            .field("platform", &P::KIND)
            .field("state", &self.state())
            .field("cached_products", &self.inner.cache.len())
            .field("purchases", &purchases)
            .field("pending_requests", &self.pending_requests())
            .field("subscribers", &self.inner.observer.subscriber_count())
            .finish()
    }
}
