//! Configuration for the purchase manager.

use serde::{Deserialize, Serialize};

use crate::errors::{IapError, IapResult};

/// Manager configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IapConfig {
    /// Events buffered per subscriber before it starts lagging.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Accept purchases that complete later (cash payments, ask-to-buy).
    /// Passed to the store at connection time; StoreKit ignores it.
    #[serde(default = "default_enable_pending_purchases")]
    pub enable_pending_purchases: bool,
}

fn default_event_capacity() -> usize {
    64
}

fn default_enable_pending_purchases() -> bool {
    true
}

impl Default for IapConfig {
    fn default() -> Self {
        Self {
            event_capacity: default_event_capacity(),
            enable_pending_purchases: default_enable_pending_purchases(),
        }
    }
}

impl IapConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a JSON configuration. Missing fields take their
    /// defaults.
    pub fn from_json(json: &str) -> IapResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| IapError::Config(format!("failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Set the per-subscriber event buffer.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Enable or disable pending purchases.
    pub fn with_pending_purchases(mut self, enabled: bool) -> Self {
        self.enable_pending_purchases = enabled;
        self
    }

    pub fn validate(&self) -> IapResult<()> {
        if self.event_capacity == 0 {
            return Err(IapError::Config(
                "event_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
