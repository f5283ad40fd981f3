//! External presence sets (`user:<id>:connections`, `org:<id>:clients`,
//! `room:<id>:users`), written by the hub and read by the presence endpoints.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::bus::BusError;

/// Set-valued key/value store.
#[async_trait]
pub trait PresenceStore: Send + Sync {
    async fn add_member(&self, key: &str, member: &str) -> Result<(), BusError>;
    async fn remove_member(&self, key: &str, member: &str) -> Result<(), BusError>;
    /// Members of `key`, sorted; empty when the key does not exist.
    async fn members(&self, key: &str) -> Result<Vec<String>, BusError>;
}

/// Process-local presence store.
#[derive(Default)]
pub struct InMemoryPresence {
    sets: RwLock<HashMap<String, BTreeSet<String>>>,
}

impl InMemoryPresence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PresenceStore for InMemoryPresence {
    async fn add_member(&self, key: &str, member: &str) -> Result<(), BusError> {
        self.sets
            .write()
            .await
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn remove_member(&self, key: &str, member: &str) -> Result<(), BusError> {
        let mut sets = self.sets.write().await;
        if let Some(set) = sets.get_mut(key) {
            set.remove(member);
            if set.is_empty() {
                sets.remove(key);
            }
        }
        Ok(())
    }

    async fn members(&self, key: &str) -> Result<Vec<String>, BusError> {
        Ok(self
            .sets
            .read()
            .await
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }
}
