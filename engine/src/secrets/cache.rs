use crate::secrets::string::SecretString;
use crate::secrets::SecretManager;
use sdk::errors::EngineError;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Process-local cache in front of `SecretManager`.
///
/// Providers resolve their key once per request; the cache keeps that from
/// touching the keychain every time.
#[derive(Clone)]
pub struct SecretCache {
    manager: Arc<SecretManager>,
    cache: Arc<RwLock<HashMap<String, SecretString>>>,
}

impl SecretCache {
    pub fn new(manager: Arc<SecretManager>) -> Self {
        Self {
            manager,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Cache pre-seeded with fixed values; used by tests and embedders
    pub fn with_values(manager: Arc<SecretManager>, values: &[(&str, &str)]) -> Self {
        let cache = Self::new(manager);
        {
            let mut map = cache.cache.write().unwrap_or_else(|e| e.into_inner());
            for (k, v) in values {
                map.insert((*k).to_string(), SecretString::new(*v));
            }
        }
        cache
    }

    /// Return the cached secret, resolving it through the manager on a miss
    pub fn get_secret(&self, key: &str) -> Result<SecretString, EngineError> {
        {
            let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
            if let Some(secret) = cache.get(key) {
                return Ok(secret.clone());
            }
        }

        let secret = SecretString::new(self.manager.get_secret(key)?);

        self.cache
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), secret.clone());

        Ok(secret)
    }

    pub fn manager(&self) -> &SecretManager {
        &self.manager
    }
}
