//! Browser-profile key/value storage.
//!
//! Two stores cooperate: a durable one that survives tab close (backed by
//! SQLite) and an ephemeral per-tab one (in memory) that records whether the
//! current session was already synchronized.

mod sqlite;

pub use sqlite::SqliteStore;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{StoreError, StoreResult};

/// Durable key holding the user identity.
pub const USER_ID_KEY: &str = "behavioral-experiment-user-id";
/// Durable key holding the participant identity.
pub const PARTICIPANT_ID_KEY: &str = "behavioral-experiment-participant-id";
/// Durable key holding the server-rendered user id.
pub const RENDERED_USER_ID_KEY: &str = "p3d-user-id";
/// Durable key holding the experiment progress record.
pub const PROGRESS_KEY: &str = "behavioral-experiment-progress";

/// String key/value store with `localStorage` semantics.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Get the value stored under `key`.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;
    /// Store `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: &str) -> StoreResult<()>;
    /// Remove `key`. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> StoreResult<()>;
}

/// Outcome of reading a structured value from a store.
#[derive(Debug, Clone, PartialEq)]
pub enum Stored<T> {
    /// The key exists and its value parsed.
    Present(T),
    /// The key does not exist.
    Absent,
    /// The key exists but its value could not be parsed.
    Malformed {
        /// Stored text.
        raw: String,
        /// Parser message.
        reason: String,
    },
}

impl<T> Stored<T> {
    /// Convert into an `Option`, treating malformed values as absent.
    pub fn present(self) -> Option<T> {
        match self {
            Stored::Present(value) => Some(value),
            Stored::Absent | Stored::Malformed { .. } => None,
        }
    }

    /// Whether nothing is stored under the key.
    pub fn is_absent(&self) -> bool {
        matches!(self, Stored::Absent)
    }
}

/// Read and parse a JSON value.
pub async fn read_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> StoreResult<Stored<T>> {
    let Some(raw) = store.get(key).await? else {
        return Ok(Stored::Absent);
    };

    match serde_json::from_str(&raw) {
        Ok(value) => Ok(Stored::Present(value)),
        Err(e) => Ok(Stored::Malformed {
            raw,
            reason: e.to_string(),
        }),
    }
}

/// Serialize `value` as JSON, store it, and return the stored text.
pub async fn write_json<T: Serialize + ?Sized>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> StoreResult<String> {
    let serialized = serde_json::to_string(value).map_err(|e| StoreError::Serialization {
        key: key.to_string(),
        message: e.to_string(),
    })?;
    store.set(key, &serialized).await?;
    Ok(serialized)
}

/// In-memory store standing in for the per-tab `sessionStorage`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> StoreError {
    StoreError::Query {
        message: "memory store lock poisoned".to_string(),
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> StoreResult<()> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.remove(key);
        Ok(())
    }
}
