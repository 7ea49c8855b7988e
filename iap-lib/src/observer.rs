//! Transaction observer and event fan-out.
//!
//! The platform pushes transaction batches to one long-lived observer per
//! connection. Each transaction is classified, purchased and restored ones are
//! normalized and recorded in the [`PurchaseLedger`], StoreKit transactions
//! are finished exactly once, and the result is broadcast to subscribers.
//! Finishing never waits for, or depends on, a subscriber.
//!
//! The ledger also serializes caller-driven finalization: only one
//! acknowledge or consume per token talks to the store at a time, and
//! callers arriving meanwhile wait for its outcome.

use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, watch};

use crate::errors::{IapError, IapResult, Operation};
use crate::model::{Purchase, TransactionEvent};
use crate::platform::{NativeStore, NativeTransaction, NativeTransactionState, Platform};

/// Canonical purchase per token for the current manager.
///
/// Redelivering a token returns the copy recorded first, with `acknowledged`
/// only ever moving from false to true.
#[derive(Debug, Default)]
pub struct PurchaseLedger {
    purchases: HashMap<String, Purchase>,
    finalized: HashSet<String>,
    consumed: HashSet<String>,
    /// Store calls in flight, by token
    claims: HashMap<String, (u64, watch::Receiver<ClaimOutcome>)>,
    next_claim: u64,
}

impl PurchaseLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a delivery and return the canonical purchase for its token.
    pub fn record(&mut self, purchase: Purchase) -> Purchase {
        match self.purchases.get_mut(&purchase.purchase_token) {
            Some(existing) => {
                if purchase.acknowledged {
                    existing.acknowledged = true;
                }
                existing.clone()
            }
            None => {
                self.purchases
                    .insert(purchase.purchase_token.clone(), purchase.clone());
                purchase
            }
        }
    }

    /// Mark a purchase acknowledged and return the canonical copy.
    pub fn acknowledge(&mut self, purchase: &Purchase) -> Purchase {
        let entry = self
            .purchases
            .entry(purchase.purchase_token.clone())
            .or_insert_with(|| purchase.clone());
        entry.acknowledged = true;
        entry.clone()
    }

    pub fn is_acknowledged(&self, token: &str) -> bool {
        self.purchases
            .get(token)
            .map(|p| p.acknowledged)
            .unwrap_or(false)
    }

    /// Returns true the first time a token is finalized.
    pub fn mark_finalized(&mut self, token: &str) -> bool {
        self.finalized.insert(token.to_string())
    }

    pub fn mark_consumed(&mut self, token: &str) {
        self.consumed.insert(token.to_string());
    }

    pub fn is_consumed(&self, token: &str) -> bool {
        self.consumed.contains(token)
    }

    pub(crate) fn len(&self) -> usize {
        self.purchases.len()
    }

    /// Forget everything. Claims in flight keep running but no longer block
    /// new callers.
    pub fn clear(&mut self) {
        self.purchases.clear();
        self.finalized.clear();
        self.consumed.clear();
        self.claims.clear();
    }

    #[allow(clippy::type_complexity)]
    fn claim(
        &mut self,
        token: &str,
    ) -> Result<(u64, watch::Sender<ClaimOutcome>), watch::Receiver<ClaimOutcome>> {
        if let Some((_, outcome)) = self.claims.get(token) {
            return Err(outcome.clone());
        }
        self.next_claim += 1;
        let (tx, rx) = watch::channel(None);
        self.claims.insert(token.to_string(), (self.next_claim, rx));
        Ok((self.next_claim, tx))
    }

    fn release_claim(&mut self, token: &str, id: u64) {
        if self.claims.get(token).is_some_and(|(owner, _)| *owner == id) {
            self.claims.remove(token);
        }
    }
}

/// Store step a caller drives for a token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Finalization {
    Acknowledge,
    Consume,
}

/// Set once by the claim owner when its store call returns.
pub(crate) type ClaimOutcome = Option<(Finalization, IapResult<()>)>;

pub(crate) enum Claim {
    /// The caller talks to the store and settles the claim.
    Owner(ClaimTicket),
    /// Another call holds the token. Wait for it, then check the ledger again.
    Wait(watch::Receiver<ClaimOutcome>),
}

impl Claim {
    /// Claim `token` in `ledger`, which must be the locked contents of
    /// `shared`.
    pub(crate) fn acquire(
        shared: &Arc<Mutex<PurchaseLedger>>,
        ledger: &mut PurchaseLedger,
        token: &str,
    ) -> Self {
        match ledger.claim(token) {
            Ok((id, tx)) => Claim::Owner(ClaimTicket {
                ledger: shared.clone(),
                token: token.to_string(),
                id,
                tx,
                released: false,
            }),
            Err(outcome) => Claim::Wait(outcome),
        }
    }

    /// Wait for the owner of a claim.
    ///
    /// Fails with the owner's error if it failed at the same step. Any other
    /// ending, including the owner being dropped, returns `Ok` so the caller
    /// looks at the ledger again.
    pub(crate) async fn wait(
        mut outcome: watch::Receiver<ClaimOutcome>,
        step: Finalization,
    ) -> IapResult<()> {
        let outcome = outcome
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|settled| (*settled).clone());
        match outcome {
            Some((owner_step, Err(error))) if owner_step == step => Err(error),
            _ => Ok(()),
        }
    }
}

/// Exclusive right to finalize one token with the store.
///
/// Dropping it unsettled releases the token; waiting callers then retry.
pub(crate) struct ClaimTicket {
    ledger: Arc<Mutex<PurchaseLedger>>,
    token: String,
    id: u64,
    tx: watch::Sender<ClaimOutcome>,
    released: bool,
}

impl ClaimTicket {
    /// Settle the claim with the store's answer. On success `record` updates
    /// the ledger before any waiting caller wakes up.
    pub(crate) fn finish<R>(
        mut self,
        step: Finalization,
        result: IapResult<()>,
        record: impl FnOnce(&mut PurchaseLedger) -> R,
    ) -> IapResult<R> {
        let recorded = {
            let mut ledger = self.ledger.lock().expect("lock poisoned");
            ledger.release_claim(&self.token, self.id);
            match &result {
                Ok(()) => Ok(record(&mut ledger)),
                Err(error) => Err(error.clone()),
            }
        };
        self.released = true;
        self.tx.send_replace(Some((step, result)));
        recorded
    }
}

impl Drop for ClaimTicket {
    fn drop(&mut self) {
        if !self.released {
            self.ledger
                .lock()
                .expect("lock poisoned")
                .release_claim(&self.token, self.id);
        }
    }
}

/// Classifies native transactions and publishes [`TransactionEvent`]s.
pub struct TransactionObserver<P: Platform> {
    store: Arc<dyn NativeStore>,
    ledger: Arc<Mutex<PurchaseLedger>>,
    sender: Mutex<Option<broadcast::Sender<TransactionEvent>>>,
    _platform: PhantomData<P>,
}

impl<P: Platform> TransactionObserver<P> {
    pub fn new(
        store: Arc<dyn NativeStore>,
        ledger: Arc<Mutex<PurchaseLedger>>,
        capacity: usize,
    ) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            store,
            ledger,
            sender: Mutex::new(Some(sender)),
            _platform: PhantomData,
        }
    }

    /// Process a batch in delivery order.
    pub fn handle(&self, transactions: Vec<NativeTransaction>) {
        for transaction in transactions {
            self.handle_one(&transaction);
        }
    }

    fn handle_one(&self, transaction: &NativeTransaction) {
        match transaction.state {
            NativeTransactionState::Purchasing => {
                tracing::trace!(product_id = %transaction.product_id, "transaction in flight");
            }
            NativeTransactionState::Deferred => {
                tracing::debug!(product_id = %transaction.product_id, "purchase awaiting approval");
                self.publish(TransactionEvent::Pending {
                    product_id: transaction.product_id.clone(),
                });
            }
            NativeTransactionState::Purchased | NativeTransactionState::Restored => {
                let purchase = match P::normalize(transaction) {
                    Ok(purchase) => purchase,
                    Err(reason) => {
                        tracing::warn!(platform = %P::KIND, "skipping malformed transaction: {}", reason);
                        return;
                    }
                };
                let purchase = self.ledger.lock().expect("lock poisoned").record(purchase);
                self.finalize_once(transaction);

                let event = if transaction.state == NativeTransactionState::Restored {
                    TransactionEvent::Restored(purchase)
                } else {
                    TransactionEvent::Purchased(purchase)
                };
                self.publish(event);
            }
            NativeTransactionState::Failed => {
                if P::AUTO_FINALIZE {
                    self.store.finish_transaction(transaction);
                }
                let product_id = transaction.product_id.clone();
                let event = match &transaction.error {
                    Some(error) if P::is_user_cancellation(error) => {
                        TransactionEvent::Cancelled { product_id }
                    }
                    Some(error) => TransactionEvent::Failed {
                        product_id,
                        error: IapError::platform(Operation::LaunchPurchase, error.clone()),
                    },
                    None => TransactionEvent::Failed {
                        product_id,
                        error: IapError::Platform {
                            operation: Operation::LaunchPurchase,
                            message: "transaction failed without an error".to_string(),
                            code: None,
                        },
                    },
                };
                self.publish(event);
            }
        }
    }

    /// Finish a transaction unless this token was already finished.
    ///
    /// Only applies to auto-finalizing platforms. Returns true if the store
    /// was asked to finish the transaction.
    pub fn finalize_once(&self, transaction: &NativeTransaction) -> bool {
        if !P::AUTO_FINALIZE {
            return false;
        }
        let Some(token) = transaction.token() else {
            return false;
        };
        let first = self.ledger.lock().expect("lock poisoned").mark_finalized(token);
        if first {
            self.store.finish_transaction(transaction);
        }
        first
    }

    fn publish(&self, event: TransactionEvent) {
        let sender = self.sender.lock().expect("lock poisoned");
        match sender.as_ref() {
            Some(sender) => {
                if sender.send(event).is_err() {
                    tracing::trace!("no subscribers for transaction event");
                }
            }
            None => tracing::trace!("observer closed, dropping transaction event"),
        }
    }

    /// Subscribe to future events.
    pub fn subscribe(&self) -> IapResult<TransactionEvents> {
        self.sender
            .lock()
            .expect("lock poisoned")
            .as_ref()
            .map(|sender| TransactionEvents::new(sender.subscribe()))
            .ok_or(IapError::Closed)
    }

    /// End all subscriptions. Later subscribe calls fail with `Closed`.
    pub fn close(&self) {
        self.sender.lock().expect("lock poisoned").take();
    }

    /// Live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.sender
            .lock()
            .expect("lock poisoned")
            .as_ref()
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }
}

/// Stream of every transaction event.
///
/// Sees only events published after it was created. A subscriber that falls
/// more than the configured capacity behind skips the oldest events; the
/// number skipped is logged and added to [`missed`](Self::missed).
#[derive(Debug)]
pub struct TransactionEvents {
    receiver: broadcast::Receiver<TransactionEvent>,
    missed: u64,
}

impl TransactionEvents {
    fn new(receiver: broadcast::Receiver<TransactionEvent>) -> Self {
        Self {
            receiver,
            missed: 0,
        }
    }

    /// The next event, or `None` once the manager disconnects.
    pub async fn recv(&mut self) -> Option<TransactionEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => self.lagged(skipped),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// The next event if one is already buffered.
    pub fn try_recv(&mut self) -> Option<TransactionEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(skipped)) => self.lagged(skipped),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Events skipped because this subscriber lagged.
    pub fn missed(&self) -> u64 {
        self.missed
    }

    fn lagged(&mut self, skipped: u64) {
        tracing::warn!(skipped, "transaction subscriber lagged");
        self.missed += skipped;
    }
}

/// Stream of purchased and restored purchases.
#[derive(Debug)]
pub struct PurchaseUpdates {
    events: TransactionEvents,
}

impl PurchaseUpdates {
    pub(crate) fn new(events: TransactionEvents) -> Self {
        Self { events }
    }

    /// The next purchase, or `None` once the manager disconnects.
    pub async fn recv(&mut self) -> Option<Purchase> {
        loop {
            match self.events.recv().await? {
                TransactionEvent::Purchased(purchase) | TransactionEvent::Restored(purchase) => {
                    return Some(purchase)
                }
                _ => continue,
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<Purchase> {
        loop {
            match self.events.try_recv()? {
                TransactionEvent::Purchased(purchase) | TransactionEvent::Restored(purchase) => {
                    return Some(purchase)
                }
                _ => continue,
            }
        }
    }

    pub fn missed(&self) -> u64 {
        self.events.missed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn purchase(token: &str, acknowledged: bool) -> Purchase {
        Purchase {
            product_id: "coins_100".into(),
            purchase_token: token.into(),
            order_id: token.into(),
            purchase_time_ms: 1,
            acknowledged,
            receipt: None,
        }
    }

    #[test]
    fn test_record_returns_canonical_copy() {
        let mut ledger = PurchaseLedger::new();
        let first = ledger.record(purchase("tok", false));

        let mut redelivered = purchase("tok", false);
        redelivered.purchase_time_ms = 99;
        assert_eq!(ledger.record(redelivered), first);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_acknowledged_never_reverts() {
        let mut ledger = PurchaseLedger::new();
        ledger.record(purchase("tok", false));
        let acked = ledger.acknowledge(&purchase("tok", false));
        assert!(acked.acknowledged);

        let again = ledger.record(purchase("tok", false));
        assert!(again.acknowledged);
        assert!(ledger.is_acknowledged("tok"));
    }

    #[test]
    fn test_mark_finalized_once() {
        let mut ledger = PurchaseLedger::new();
        assert!(ledger.mark_finalized("tok"));
        assert!(!ledger.mark_finalized("tok"));
        ledger.clear();
        assert!(ledger.mark_finalized("tok"));
    }

    fn acquire(shared: &Arc<Mutex<PurchaseLedger>>, token: &str) -> Claim {
        let mut ledger = shared.lock().unwrap();
        Claim::acquire(shared, &mut *ledger, token)
    }

    #[tokio::test]
    async fn test_second_claim_shares_owner_failure() {
        let shared = Arc::new(Mutex::new(PurchaseLedger::new()));
        let Claim::Owner(ticket) = acquire(&shared, "tok") else {
            panic!("first caller owns the token");
        };
        let Claim::Wait(outcome) = acquire(&shared, "tok") else {
            panic!("second caller waits");
        };
        assert!(matches!(acquire(&shared, "other"), Claim::Owner(_)));

        let error = IapError::Platform {
            operation: Operation::Consume,
            message: "Item not owned".to_string(),
            code: Some(8),
        };
        let result = ticket.finish(Finalization::Consume, Err(error.clone()), |_| ());
        assert_eq!(result, Err(error.clone()));
        assert_eq!(
            Claim::wait(outcome.clone(), Finalization::Consume).await,
            Err(error)
        );
        // A different step checks the ledger again instead.
        assert_eq!(
            Claim::wait(outcome, Finalization::Acknowledge).await,
            Ok(())
        );

        let again = acquire(&shared, "tok");
        assert!(matches!(again, Claim::Owner(_)));
    }

    #[tokio::test]
    async fn test_finish_records_before_waiters_wake() {
        let shared = Arc::new(Mutex::new(PurchaseLedger::new()));
        let Claim::Owner(ticket) = acquire(&shared, "tok") else {
            panic!("first caller owns the token");
        };
        let Claim::Wait(outcome) = acquire(&shared, "tok") else {
            panic!("second caller waits");
        };

        let acked = ticket
            .finish(Finalization::Acknowledge, Ok(()), |ledger| {
                ledger.acknowledge(&purchase("tok", false))
            })
            .unwrap();
        assert!(acked.acknowledged);
        assert_eq!(Claim::wait(outcome, Finalization::Acknowledge).await, Ok(()));
        assert!(shared.lock().unwrap().is_acknowledged("tok"));
    }

    #[tokio::test]
    async fn test_dropped_owner_releases_token() {
        let shared = Arc::new(Mutex::new(PurchaseLedger::new()));
        let owner = acquire(&shared, "tok");
        let Claim::Wait(outcome) = acquire(&shared, "tok") else {
            panic!("second caller waits");
        };

        drop(owner);
        assert_eq!(Claim::wait(outcome, Finalization::Consume).await, Ok(()));
        let again = acquire(&shared, "tok");
        assert!(matches!(again, Claim::Owner(_)));
    }

    #[test]
    fn test_clear_drops_claims() {
        let shared = Arc::new(Mutex::new(PurchaseLedger::new()));
        let _owner = acquire(&shared, "tok");
        shared.lock().unwrap().clear();
        let again = acquire(&shared, "tok");
        assert!(matches!(again, Claim::Owner(_)));
    }

    proptest! {
        #[test]
        fn prop_acknowledged_is_monotonic(
            deliveries in prop::collection::vec(("[a-c]", any::<bool>()), 1..50)
        ) {
            let mut ledger = PurchaseLedger::new();
            let mut seen_acked = HashSet::new();
            for (token, acked) in deliveries {
                let canonical = ledger.record(purchase(&token, acked));
                if acked {
                    seen_acked.insert(token.clone());
                }
                prop_assert_eq!(canonical.acknowledged, seen_acked.contains(&token));
            }
        }
    }
}
