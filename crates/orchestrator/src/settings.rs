//! User settings seam
//!
//! Persistence is external; the orchestrator only reads the API key through
//! this trait.

use parking_lot::RwLock;
use std::collections::HashMap;

pub const API_KEY: &str = "api_key";

#[cfg_attr(test, mockall::automock)]
pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

/// Non-empty API key from `store`, if one is configured.
pub fn api_key(store: &dyn SettingsStore) -> Option<String> {
    store
        .get(API_KEY)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[derive(Debug, Default)]
pub struct InMemorySettingsStore {
    values: RwLock<HashMap<String, String>>,
}

impl InMemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_api_key(key: &str) -> Self {
        let store = Self::new();
        store.set(API_KEY, key);
        store
    }
}

impl SettingsStore for InMemorySettingsStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.values.write().insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.values.write().remove(key);
    }
}
