//! Product identifier to native handle cache.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::errors::{IapError, IapResult};
use crate::model::Product;
use crate::platform::NativeProduct;

/// Handles from the most recent product query for each identifier.
///
/// Entries are replaced, never merged: a later query for the same id wins.
/// Looking up a missing id is an error and never triggers a fetch.
#[derive(Debug, Default)]
pub struct ProductCache {
    entries: RwLock<HashMap<String, Arc<NativeProduct>>>,
}

impl ProductCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a batch of query results.
    pub fn insert<I>(&self, products: I)
    where
        I: IntoIterator<Item = NativeProduct>,
    {
        let mut entries = self.entries.write().expect("lock poisoned");
        for product in products {
            entries.insert(product.id.clone(), Arc::new(product));
        }
    }

    /// The native handle for `product_id`.
    pub fn handle(&self, product_id: &str) -> IapResult<Arc<NativeProduct>> {
        self.entries
            .read()
            .expect("lock poisoned")
            .get(product_id)
            .cloned()
            .ok_or_else(|| IapError::NotFound {
                product_id: product_id.to_string(),
            })
    }

    /// The cached product, if any.
    pub fn get(&self, product_id: &str) -> Option<Product> {
        self.entries
            .read()
            .expect("lock poisoned")
            .get(product_id)
            .map(|native| Product::from(native.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.write().expect("lock poisoned").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn product(id: &str, micros: i64) -> NativeProduct {
        NativeProduct::one_time(id, id, format!("{} micros", micros), "USD", micros)
    }

    #[test]
    fn test_missing_product_is_not_found() {
        let cache = ProductCache::new();
        assert_eq!(
            cache.handle("coins_100").unwrap_err(),
            IapError::NotFound {
                product_id: "coins_100".into()
            }
        );
        assert!(cache.get("coins_100").is_none());
    }

    #[test]
    fn test_later_insert_replaces_handle() {
        let cache = ProductCache::new();
        cache.insert([product("coins_100", 990_000)]);
        let first = cache.handle("coins_100").unwrap();
        cache.insert([product("coins_100", 1_990_000)]);

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.handle("coins_100").unwrap().price_micros, 1_990_000);
        // Handles already given out stay valid snapshots.
        assert_eq!(first.price_micros, 990_000);
    }

    #[test]
    fn test_clear() {
        let cache = ProductCache::new();
        cache.insert([product("a", 1), product("b", 2)]);
        assert!(cache.get("a").is_some());
        cache.clear();
        assert!(cache.is_empty());
    }

    proptest! {
        #[test]
        fn prop_last_write_wins(
            writes in prop::collection::vec(("[a-d]", 0i64..10_000_000), 1..40)
        ) {
            let cache = ProductCache::new();
            let mut expected = HashMap::new();
            for (id, micros) in &writes {
                cache.insert([product(id, *micros)]);
                expected.insert(id.clone(), *micros);
            }
            prop_assert_eq!(cache.len(), expected.len());
            for (id, micros) in expected {
                prop_assert_eq!(cache.handle(&id).unwrap().price_micros, micros);
            }
        }
    }
}
