//! Credential persistence
//!
//! The client only needs get/set/remove by string key. Embedders back
//! [`CredentialStore`] with whatever persistence their platform offers;
//! [`TokenStore`] is the in-process implementation.

use crate::error::Result;
use papaya::HashMap;
use std::future::Future;
use std::sync::Arc;

pub const ACCESS_TOKEN_KEY: &str = "accessToken";
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";
pub const USER_KEY: &str = "user";
pub const DEVICE_ID_KEY: &str = "deviceId";

/// Keys wiped whenever the session ends (refresh denied or logout)
pub const SESSION_KEYS: [&str; 3] = [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_KEY];

/// Key-value persistence for credentials
///
/// The client re-reads the access token through this trait for every outgoing request,
/// so whatever the store holds is always the current credential.
pub trait CredentialStore: Send + Sync + 'static {
    /// Read a value, `None` when the key is absent
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>>> + Send;

    fn set(&self, key: &str, value: String) -> impl Future<Output = Result<()>> + Send;

    fn remove(&self, key: &str) -> impl Future<Output = Result<()>> + Send;

    /// Remove several keys at once
    fn multi_remove(&self, keys: &[&str]) -> impl Future<Output = Result<()>> + Send;
}

/// Thread-safe in-memory credential store using Papaya HashMap
///
/// Cloning is cheap and every clone sees the same entries.
#[derive(Clone)]
pub struct TokenStore {
    entries: Arc<HashMap<String, String>>,
}

impl TokenStore {
    /// Create a new token store
    pub fn new() -> Self {
        Self {
            entries: Arc::new(HashMap::new()),
        }
    }

    /// Check if a value exists for a key
    pub fn contains(&self, key: &str) -> bool {
        self.entries.pin().contains_key(key)
    }

    /// Get all keys currently stored
    pub fn keys(&self) -> Vec<String> {
        self.entries.pin().iter().map(|(k, _)| k.clone()).collect()
    }

    /// Clear all stored values
    pub fn clear(&self) {
        self.entries.pin().clear();
    }
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for TokenStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.pin().get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.entries.pin().insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.pin().remove(key);
        Ok(())
    }

    async fn multi_remove(&self, keys: &[&str]) -> Result<()> {
        let entries = self.entries.pin();
        for key in keys {
            entries.remove(*key);
        }
        Ok(())
    }
}
