//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use iap_lib::platform::{NativeProduct, NativeTransaction, Platform};
use iap_lib::{
    IapManager, PlatformKind, PlayBilling, ProductKind, Purchase, PurchaseUpdates, StoreKit,
    TransactionEvent, TransactionEvents,
};
use iap_lib::sandbox::SandboxStore;

pub const COINS: &str = "coins_100";
pub const PREMIUM: &str = "premium";
pub const GOLD: &str = "gold_monthly";

pub fn coins() -> NativeProduct {
    NativeProduct::one_time(COINS, "100 Coins", "$0.99", "USD", 990_000)
        .with_description("A small pile of coins")
}

pub fn premium() -> NativeProduct {
    NativeProduct::one_time(PREMIUM, "Premium", "$4.99", "USD", 4_990_000)
}

pub fn gold() -> NativeProduct {
    NativeProduct::one_time(GOLD, "Gold", "$12.49", "USD", 12_490_000)
        .with_kind(ProductKind::Recurring)
        .with_offer_token("gold-monthly-base")
}

pub fn catalog(kind: PlatformKind) -> SandboxStore {
    SandboxStore::new(kind)
        .with_product(coins())
        .with_product(premium())
        .with_product(gold())
}

pub fn manager<P: Platform>(store: SandboxStore) -> (Arc<SandboxStore>, IapManager<P>) {
    let store = Arc::new(store);
    let manager = IapManager::new(store.clone());
    (store, manager)
}

/// A connected Play Billing manager over the default catalog.
pub async fn play() -> (Arc<SandboxStore>, IapManager<PlayBilling>) {
    let (store, manager) = manager(catalog(PlatformKind::PlayBilling));
    manager.connect().await.expect("connect");
    (store, manager)
}

/// A connected StoreKit manager over the default catalog.
pub async fn storekit() -> (Arc<SandboxStore>, IapManager<StoreKit>) {
    let (store, manager) = manager(catalog(PlatformKind::StoreKit));
    manager.connect().await.expect("connect");
    (store, manager)
}

/// A purchase made in an earlier session, as the store reports it.
pub fn prior_purchase(product_id: &str, token: &str) -> NativeTransaction {
    NativeTransaction::purchased(product_id, token, 1_690_000_000_000)
        .with_order_id(format!("GPA.{}", token))
        .with_receipt(format!("{{\"purchaseToken\":\"{}\"}}", token), "sig")
}

pub async fn next_event(events: &mut TransactionEvents) -> TransactionEvent {
    tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .expect("event within a second")
        .expect("stream still open")
}

pub async fn next_purchase(updates: &mut PurchaseUpdates) -> Purchase {
    tokio::time::timeout(Duration::from_secs(1), updates.recv())
        .await
        .expect("purchase within a second")
        .expect("stream still open")
}

/// Yield until `check` holds. Callers run on a single-threaded test runtime.
pub async fn until(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(1), async {
        while !check() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("condition reached within a second");
}
