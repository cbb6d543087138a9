//! Persistence seam for execution instances and their definitions.
//!
//! The surrounding platform owns durable storage; this core only needs versioned
//! per-entity reads and optimistic writes.

pub mod memory;

use crate::core::{Closure, ClosureDefinition, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use memory::{InMemoryClosureStore, InMemoryDefinitionStore};

/// Versioned storage for `Closure` records.
#[async_trait]
pub trait ClosureStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Closure>>;

    /// Stores a new record with version 1. Fails with `Conflict` if the id is taken.
    async fn insert(&self, closure: Closure) -> Result<Closure>;

    /// Replaces the record if its stored version still equals `expected_version`.
    ///
    /// On success the returned record carries the bumped version. A mismatch fails with
    /// `ClosureError::VersionConflict` and leaves the stored record untouched.
    async fn update(&self, closure: Closure, expected_version: u64) -> Result<Closure>;

    async fn list(&self) -> Result<Vec<Closure>>;

    /// Drops records whose TTL has elapsed. Returns how many were reaped.
    async fn purge_expired(&self, _now: DateTime<Utc>) -> Result<usize> {
        Ok(0)
    }
}

/// Read access to closure definitions.
#[async_trait]
pub trait DefinitionStore: Send + Sync {
    async fn get_definition(&self, link: &str) -> Result<Option<ClosureDefinition>>;

    async fn put_definition(&self, definition: ClosureDefinition) -> Result<ClosureDefinition>;
}
