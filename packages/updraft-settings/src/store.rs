use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

/// Well-known settings keys. Hosts may store additional keys of their own;
/// the updater only ever touches these.
pub mod keys {
    pub const APPCAST_URL: &str = "appcastUrl";
    pub const CHECK_INTERVAL_SECONDS: &str = "checkIntervalSeconds";
    pub const AUTOMATIC_CHECKS: &str = "automaticChecks";
    pub const LAST_CHECK_TIME: &str = "lastCheckTime";
    pub const SKIPPED_VERSION: &str = "skippedVersion";
    pub const REGISTRY_PATH: &str = "registryPath";
    pub const LANGUAGE: &str = "language";
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("settings format error: {0}")]
    Format(#[from] serde_json::Error),
    #[error("settings store poisoned")]
    Poisoned,
}

/// Persisted key/value settings, the only long-lived mutable state the
/// updater shares with the host. Implementations must be safe to call from
/// any thread; the state machine serializes its own writes.
pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, SettingsError>;
    fn set(&self, key: &str, value: &str) -> Result<(), SettingsError>;
    fn remove(&self, key: &str) -> Result<(), SettingsError>;
}

/// Volatile store for tests and hosts that manage persistence themselves.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, SettingsError> {
        let values = self.values.lock().map_err(|_| SettingsError::Poisoned)?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SettingsError> {
        let mut values = self.values.lock().map_err(|_| SettingsError::Poisoned)?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), SettingsError> {
        let mut values = self.values.lock().map_err(|_| SettingsError::Poisoned)?;
        values.remove(key);
        Ok(())
    }
}
