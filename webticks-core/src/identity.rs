//! User and session identity
//!
//! - `userId` is durable on the browser (persisted in host storage under
//!   [`USER_ID_STORAGE_KEY`]) and instance-scoped on the server.
//! - `sessionId` is generated once per tracker and never persisted.
//!
//! All identifiers come from an [`IdGenerator`] so tests can supply
//! deterministic ids.

use std::collections::HashMap;

use parking_lot::RwLock;
use uuid::Uuid;

/// Storage key holding the durable browser user id
pub const USER_ID_STORAGE_KEY: &str = "webticks_uid";

/// Source of fresh identifiers (user, session and per-event request ids).
pub trait IdGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// Random v4 UUIDs, the default generator
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn generate(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

/// Client-side string key/value store (the `localStorage` capability).
pub trait KeyValueStore: Send + Sync {
    fn get_item(&self, key: &str) -> Option<String>;
    fn set_item(&self, key: &str, value: &str);
}

/// In-memory [`KeyValueStore`]
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: RwLock<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStorage {
    fn get_item(&self, key: &str) -> Option<String> {
        self.items.read().get(key).cloned()
    }

    fn set_item(&self, key: &str, value: &str) {
        self.items.write().insert(key.to_string(), value.to_string());
    }
}

/// Read the persisted user id, creating and storing one on first use.
pub fn load_or_create_user_id(store: &dyn KeyValueStore, ids: &dyn IdGenerator) -> String {
    if let Some(existing) = store.get_item(USER_ID_STORAGE_KEY) {
        if !existing.is_empty() {
            return existing;
        }
    }

    let user_id = ids.generate();
    store.set_item(USER_ID_STORAGE_KEY, &user_id);
    tracing::debug!(user_id = %user_id, "Created persistent user id");
    user_id
}
