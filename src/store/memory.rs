use super::{ClosureStore, DefinitionStore};
use crate::core::{Closure, ClosureDefinition, ClosureError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Process-local closure store. Every write is linearized by one lock.
#[derive(Default)]
pub struct InMemoryClosureStore {
    records: RwLock<HashMap<String, Closure>>,
}

impl InMemoryClosureStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClosureStore for InMemoryClosureStore {
    async fn get(&self, id: &str) -> Result<Option<Closure>> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn insert(&self, mut closure: Closure) -> Result<Closure> {
        let mut records = self.records.write().await;
        if records.contains_key(&closure.id) {
            return Err(ClosureError::Conflict(format!(
                "closure '{}' already exists",
                closure.id
            )));
        }

        closure.version = 1;
        records.insert(closure.id.clone(), closure.clone());
        Ok(closure)
    }

    async fn update(&self, mut closure: Closure, expected_version: u64) -> Result<Closure> {
        let mut records = self.records.write().await;
        let Some(stored) = records.get_mut(&closure.id) else {
            return Err(ClosureError::NotFound(closure.id));
        };

        if stored.version != expected_version {
            return Err(ClosureError::VersionConflict {
                id: closure.id,
                expected: expected_version,
                actual: stored.version,
            });
        }

        closure.version = expected_version + 1;
        *stored = closure.clone();
        Ok(closure)
    }

    async fn list(&self) -> Result<Vec<Closure>> {
        let records = self.records.read().await;
        let mut all: Vec<Closure> = records.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, closure| !closure.is_expired_at(now));
        Ok(before - records.len())
    }
}

/// Process-local definition catalog keyed by link.
#[derive(Default)]
pub struct InMemoryDefinitionStore {
    definitions: RwLock<HashMap<String, ClosureDefinition>>,
}

impl InMemoryDefinitionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DefinitionStore for InMemoryDefinitionStore {
    async fn get_definition(&self, link: &str) -> Result<Option<ClosureDefinition>> {
        Ok(self.definitions.read().await.get(link).cloned())
    }

    async fn put_definition(&self, definition: ClosureDefinition) -> Result<ClosureDefinition> {
        if definition.link.trim().is_empty() {
            return Err(ClosureError::Validation(
                "closure definition link is required".to_string(),
            ));
        }
        if definition.runtime.trim().is_empty() {
            return Err(ClosureError::Validation(
                "closure definition runtime is required".to_string(),
            ));
        }

        self.definitions
            .write()
            .await
            .insert(definition.link.clone(), definition.clone());
        Ok(definition)
    }
}
