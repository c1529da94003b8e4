use crate::secrets::string::SecretString;
use crate::secrets::CredentialStore;
use sdk::errors::RouterError;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// In-memory cache in front of [`CredentialStore`].
///
/// Every backend call needs its credential; resolving through the keychain on
/// each turn is slow, so resolved values are kept here for the process lifetime.
#[derive(Clone)]
pub struct CredentialCache {
    store: Arc<CredentialStore>,
    cache: Arc<RwLock<HashMap<String, SecretString>>>,
}

impl CredentialCache {
    pub fn new(store: Arc<CredentialStore>) -> Self {
        Self {
            store,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Returns the cached credential, resolving and caching it on a miss.
    pub fn get_secret(&self, key: &str) -> Result<SecretString, RouterError> {
        {
            let cache = self
                .cache
                .read()
                .map_err(|_| RouterError::Credential("credential cache poisoned".to_string()))?;
            if let Some(secret) = cache.get(key) {
                return Ok(secret.clone());
            }
        }

        let secret = SecretString::new(self.store.get_secret(key)?);

        {
            let mut cache = self
                .cache
                .write()
                .map_err(|_| RouterError::Credential("credential cache poisoned".to_string()))?;
            cache.insert(key.to_string(), secret.clone());
        }

        Ok(secret)
    }

    /// Seeds a credential without consulting the store.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<SecretString>) {
        if let Ok(mut cache) = self.cache.write() {
            cache.insert(key.into(), value.into());
        }
    }

    /// Resolves every key up front, failing on the first missing one.
    pub fn preload(&self, keys: &[&str]) -> Result<(), RouterError> {
        for key in keys {
            self.get_secret(key)?;
        }
        Ok(())
    }
}
