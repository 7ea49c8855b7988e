//! In-process store for tests and demos.
//!
//! [`SandboxStore`] implements [`NativeStore`] without a device. It behaves
//! like one of the two real stores:
//!
//! - Play Billing: purchases stay unacknowledged until acknowledged or
//!   consumed, restore is the same as querying owned purchases, and a one-time
//!   product cannot be bought again until consumed.
//! - StoreKit: purchases go through the payment queue and are redelivered on
//!   every connection until finished, and restore pushes restored
//!   transactions through the observer before completing.
//!
//! Failures, user behaviour and callback timing can be scripted. The store
//! never holds its lock while calling the observer or resolving a completion.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::bridge::Completion;
use crate::model::ProductKind;
use crate::platform::play_billing::response_code;
use crate::platform::storekit::error_code;
use crate::platform::{
    ConnectOptions, NativeError, NativeObserver, NativeOutcome, NativeProduct, NativeStore,
    NativeTransaction, NativeTransactionState, PlatformKind, ProductQueryResponse,
};

/// Store requests that can be made to fail once with [`SandboxStore::fail_next`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SandboxCall {
    QueryProductDetails,
    LaunchBillingFlow,
    Consume,
    Acknowledge,
    QueryOwnedPurchases,
    Restore,
}

/// What the simulated user does in the next purchase flow.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum PurchaseScript {
    /// The purchase completes.
    #[default]
    Complete,
    /// The user backs out.
    Cancel,
    /// The purchase needs approval from someone else.
    Defer,
    /// The store reports a failure.
    Fail(NativeError),
}

/// How many times each store method was called.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SandboxCalls {
    pub start_connection: usize,
    pub end_connection: usize,
    pub query_product_details: usize,
    pub launch_billing_flow: usize,
    pub consume: usize,
    pub acknowledge: usize,
    pub query_owned_purchases: usize,
    pub restore: usize,
    pub finish_transaction: usize,
}

type HeldCallback = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct SandboxState {
    catalog: BTreeMap<String, NativeProduct>,
    /// Owned purchases by token
    owned: BTreeMap<String, NativeTransaction>,
    /// StoreKit payment queue
    unfinished: Vec<NativeTransaction>,
    observer: Option<Arc<dyn NativeObserver>>,
    connect_error: Option<NativeError>,
    last_options: Option<ConnectOptions>,
    failures: HashMap<SandboxCall, NativeError>,
    scripts: VecDeque<PurchaseScript>,
    holding: bool,
    held: Vec<HeldCallback>,
    calls: SandboxCalls,
    finished: Vec<String>,
    last_launched: Option<NativeProduct>,
    next_order: u64,
}

/// Simulated store. See the module documentation.
pub struct SandboxStore {
    kind: PlatformKind,
    state: Mutex<SandboxState>,
}

impl SandboxStore {
    pub fn new(kind: PlatformKind) -> Self {
        Self {
            kind,
            state: Mutex::new(SandboxState::default()),
        }
    }

    pub fn kind(&self) -> PlatformKind {
        self.kind
    }

    fn lock(&self) -> MutexGuard<'_, SandboxState> {
        self.state.lock().expect("lock poisoned")
    }

    /// Add a product to the catalog.
    pub fn with_product(self, product: NativeProduct) -> Self {
        self.set_product(product);
        self
    }

    /// Add or replace a catalog entry, as a store-side price change would.
    pub fn set_product(&self, product: NativeProduct) {
        self.lock().catalog.insert(product.id.clone(), product);
    }

    /// Seed a purchase made before this process started.
    pub fn with_owned(self, transaction: NativeTransaction) -> Self {
        if let Some(token) = transaction.token().map(str::to_string) {
            self.lock().owned.insert(token, transaction);
        }
        self
    }

    /// Seed an unfinished transaction in the StoreKit payment queue.
    pub fn with_unfinished(self, transaction: NativeTransaction) -> Self {
        {
            let mut state = self.lock();
            if let Some(token) = transaction.token() {
                state.owned.insert(token.to_string(), transaction.clone());
            }
            state.unfinished.push(transaction);
        }
        self
    }

    /// Make `start_connection` fail until cleared.
    pub fn set_connect_error(&self, error: Option<NativeError>) {
        self.lock().connect_error = error;
    }

    /// Fail the next call of the given kind.
    pub fn fail_next(&self, call: SandboxCall, error: NativeError) {
        self.lock().failures.insert(call, error);
    }

    /// Queue the behaviour of an upcoming purchase flow.
    pub fn script_next_purchase(&self, script: PurchaseScript) {
        self.lock().scripts.push_back(script);
    }

    /// Stop answering requests until [`release_callbacks`](Self::release_callbacks).
    pub fn hold_callbacks(&self) {
        self.lock().holding = true;
    }

    /// Answer every held request, in order. Returns how many were released.
    pub fn release_callbacks(&self) -> usize {
        let held = {
            let mut state = self.lock();
            state.holding = false;
            std::mem::take(&mut state.held)
        };
        let count = held.len();
        for callback in held {
            callback();
        }
        count
    }

    /// Answer the oldest held request only. Returns false if none was held.
    pub fn release_next(&self) -> bool {
        let next = {
            let mut state = self.lock();
            if state.held.is_empty() {
                None
            } else {
                Some(state.held.remove(0))
            }
        };
        match next {
            Some(callback) => {
                callback();
                true
            }
            None => false,
        }
    }

    /// Requests currently held back.
    pub fn held_callbacks(&self) -> usize {
        self.lock().held.len()
    }

    /// Push transactions to the registered observer, if any.
    pub fn deliver(&self, transactions: Vec<NativeTransaction>) -> bool {
        let observer = self.lock().observer.clone();
        match observer {
            Some(observer) => {
                observer.on_transactions_updated(transactions);
                true
            }
            None => false,
        }
    }

    /// Simulate the store service going away.
    pub fn disconnect_service(&self) {
        let observer = self.lock().observer.take();
        if let Some(observer) = observer {
            observer.on_service_disconnected();
        }
    }

    pub fn calls(&self) -> SandboxCalls {
        self.lock().calls
    }

    /// Tokens passed to `finish_transaction`, in call order.
    pub fn finished_tokens(&self) -> Vec<String> {
        self.lock().finished.clone()
    }

    /// Transactions the user currently owns.
    pub fn owned(&self) -> Vec<NativeTransaction> {
        self.lock().owned.values().cloned().collect()
    }

    /// Transactions still waiting in the StoreKit payment queue.
    pub fn unfinished(&self) -> Vec<NativeTransaction> {
        self.lock().unfinished.clone()
    }

    pub fn last_launched(&self) -> Option<NativeProduct> {
        self.lock().last_launched.clone()
    }

    pub fn last_connect_options(&self) -> Option<ConnectOptions> {
        self.lock().last_options
    }

    fn respond<T: Send + 'static>(&self, done: Completion<T>, outcome: NativeOutcome<T>) {
        let mut state = self.lock();
        if state.holding {
            state.held.push(Box::new(move || {
                done.resolve(outcome);
            }));
            return;
        }
        drop(state);
        done.resolve(outcome);
    }

    fn not_owned(&self) -> NativeError {
        match self.kind {
            PlatformKind::PlayBilling => NativeError::new(response_code::ITEM_NOT_OWNED, "Item not owned"),
            PlatformKind::StoreKit => NativeError::new(error_code::PAYMENT_INVALID, "Unknown transaction"),
        }
    }

    fn unavailable(&self, product_id: &str) -> NativeError {
        let code = match self.kind {
            PlatformKind::PlayBilling => response_code::ITEM_UNAVAILABLE,
            PlatformKind::StoreKit => error_code::STORE_PRODUCT_NOT_AVAILABLE,
        };
        NativeError::new(code, format!("Product {} is not available", product_id))
    }

    /// Build a completed purchase and put it where the store keeps it.
    fn complete_purchase(&self, state: &mut SandboxState, product: &NativeProduct) -> NativeTransaction {
        state.next_order += 1;
        let now = chrono::Utc::now().timestamp_millis();
        let transaction = match self.kind {
            PlatformKind::PlayBilling => {
                let token = uuid::Uuid::new_v4().simple().to_string();
                let order_id = format!("GPA.0000-0000-0000-{:05}", state.next_order);
                let payload = serde_json::json!({
                    "orderId": order_id,
                    "packageName": "com.example.sandbox",
                    "productId": product.id,
                    "purchaseTime": now,
                    "purchaseState": 0,
                    "purchaseToken": token,
                    "acknowledged": false,
                });
                NativeTransaction::purchased(product.id.clone(), token.clone(), now)
                    .with_order_id(order_id)
                    .with_receipt(payload.to_string(), format!("sandbox:{}", token))
            }
            PlatformKind::StoreKit => {
                let transaction_id = format!("{}", 2_000_000_000_000_000u64 + state.next_order);
                NativeTransaction::purchased(product.id.clone(), transaction_id, now)
            }
        };
        if let Some(token) = transaction.token() {
            state.owned.insert(token.to_string(), transaction.clone());
        }
        if self.kind == PlatformKind::StoreKit {
            state.unfinished.push(transaction.clone());
        }
        transaction
    }
}

impl NativeStore for SandboxStore {
    fn start_connection(
        &self,
        options: ConnectOptions,
        observer: Arc<dyn NativeObserver>,
        done: Completion<()>,
    ) {
        let (outcome, redeliver) = {
            let mut state = self.lock();
            state.calls.start_connection += 1;
            state.last_options = Some(options);
            match state.connect_error.clone() {
                Some(error) => (Err(error), Vec::new()),
                None => {
                    state.observer = Some(observer.clone());
                    let redeliver = match self.kind {
                        PlatformKind::StoreKit => state.unfinished.clone(),
                        PlatformKind::PlayBilling => Vec::new(),
                    };
                    (Ok(()), redeliver)
                }
            }
        };
        self.respond(done, outcome);
        if !redeliver.is_empty() {
            observer.on_transactions_updated(redeliver);
        }
    }

    fn end_connection(&self) {
        let mut state = self.lock();
        state.calls.end_connection += 1;
        state.observer = None;
    }

    fn query_product_details(&self, ids: Vec<String>, done: Completion<ProductQueryResponse>) {
        let outcome = {
            let mut state = self.lock();
            state.calls.query_product_details += 1;
            match state.failures.remove(&SandboxCall::QueryProductDetails) {
                Some(error) => Err(error),
                None => {
                    let mut response = ProductQueryResponse::default();
                    for id in ids {
                        match state.catalog.get(&id) {
                            Some(product) => response.products.push(product.clone()),
                            None => response.invalid_ids.push(id),
                        }
                    }
                    Ok(response)
                }
            }
        };
        self.respond(done, outcome);
    }

    fn launch_billing_flow(&self, product: &NativeProduct, done: Completion<()>) {
        let (outcome, delivery) = {
            let mut state = self.lock();
            state.calls.launch_billing_flow += 1;
            state.last_launched = Some(product.clone());

            if let Some(error) = state.failures.remove(&SandboxCall::LaunchBillingFlow) {
                (Err(error), Vec::new())
            } else if !state.catalog.contains_key(&product.id) {
                (Err(self.unavailable(&product.id)), Vec::new())
            } else if self.kind == PlatformKind::PlayBilling
                && product.kind == ProductKind::OneTime
                && state.owned.values().any(|t| t.product_id == product.id)
            {
                (
                    Err(NativeError::new(
                        response_code::ITEM_ALREADY_OWNED,
                        "Item already owned",
                    )),
                    Vec::new(),
                )
            } else {
                let script = state.scripts.pop_front().unwrap_or_default();
                let delivery = match script {
                    PurchaseScript::Complete => {
                        let purchased = self.complete_purchase(&mut state, product);
                        match self.kind {
                            PlatformKind::StoreKit => {
                                vec![NativeTransaction::purchasing(product.id.clone()), purchased]
                            }
                            PlatformKind::PlayBilling => vec![purchased],
                        }
                    }
                    PurchaseScript::Cancel => {
                        let code = match self.kind {
                            PlatformKind::PlayBilling => response_code::USER_CANCELED,
                            PlatformKind::StoreKit => error_code::PAYMENT_CANCELLED,
                        };
                        vec![NativeTransaction::failed(
                            product.id.clone(),
                            NativeError::new(code, "User canceled"),
                        )]
                    }
                    PurchaseScript::Defer => vec![NativeTransaction::deferred(product.id.clone())],
                    PurchaseScript::Fail(error) => {
                        vec![NativeTransaction::failed(product.id.clone(), error)]
                    }
                };
                (Ok(()), delivery)
            }
        };
        self.respond(done, outcome);
        if !delivery.is_empty() {
            self.deliver(delivery);
        }
    }

    fn consume(&self, token: &str, done: Completion<()>) {
        let outcome = {
            let mut state = self.lock();
            state.calls.consume += 1;
            match state.failures.remove(&SandboxCall::Consume) {
                Some(error) => Err(error),
                None if self.kind == PlatformKind::StoreKit => Ok(()),
                None => match state.owned.remove(token) {
                    Some(_) => Ok(()),
                    None => Err(self.not_owned()),
                },
            }
        };
        self.respond(done, outcome);
    }

    fn acknowledge(&self, token: &str, done: Completion<()>) {
        let outcome = {
            let mut state = self.lock();
            state.calls.acknowledge += 1;
            match state.failures.remove(&SandboxCall::Acknowledge) {
                Some(error) => Err(error),
                None if self.kind == PlatformKind::StoreKit => Ok(()),
                None => match state.owned.get_mut(token) {
                    Some(transaction) => {
                        transaction.acknowledged = true;
                        Ok(())
                    }
                    None => Err(self.not_owned()),
                },
            }
        };
        self.respond(done, outcome);
    }

    fn query_owned_purchases(&self, done: Completion<Vec<NativeTransaction>>) {
        let outcome = {
            let mut state = self.lock();
            state.calls.query_owned_purchases += 1;
            match state.failures.remove(&SandboxCall::QueryOwnedPurchases) {
                Some(error) => Err(error),
                None => Ok(state.owned.values().cloned().collect()),
            }
        };
        self.respond(done, outcome);
    }

    fn restore(&self, done: Completion<Vec<NativeTransaction>>) {
        let outcome = {
            let mut state = self.lock();
            state.calls.restore += 1;
            match state.failures.remove(&SandboxCall::Restore) {
                Some(error) => Err(error),
                None => Ok(state
                    .owned
                    .values()
                    .cloned()
                    .map(|mut transaction| {
                        if self.kind == PlatformKind::StoreKit {
                            transaction.state = NativeTransactionState::Restored;
                        }
                        transaction
                    })
                    .collect::<Vec<_>>()),
            }
        };
        if let (PlatformKind::StoreKit, Ok(restored)) = (self.kind, &outcome) {
            if !restored.is_empty() {
                self.deliver(restored.clone());
            }
        }
        self.respond(done, outcome);
    }

    fn finish_transaction(&self, transaction: &NativeTransaction) {
        let mut state = self.lock();
        state.calls.finish_transaction += 1;
        if let Some(token) = transaction.token() {
            state.finished.push(token.to_string());
            state.unfinished.retain(|t| t.token() != Some(token));
        }
    }
}

impl fmt::Debug for SandboxStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("SandboxStore")
            .field("kind", &self.kind)
            .field("catalog", &state.catalog.len())
            .field("owned", &state.owned.len())
            .field("unfinished", &state.unfinished.len())
            .field("calls", &state.calls)
            .finish()
    }
}
