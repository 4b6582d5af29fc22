//! In-memory [`ReferenceStore`] implementation for tests and dry runs.
//!
//! All state sits behind one `RwLock`, so every operation, including the
//! check-then-write in `create`, is atomic.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::models::{ContentReference, ReferenceFields, ReferenceState, StoredKey, TelemetryRecord};

use super::ReferenceStore;

#[derive(Default)]
struct State {
    /// Indexed by `local_key - 1`.
    references: Vec<ContentReference>,
    by_key: HashMap<(String, String), i64>,
    telemetry: Vec<TelemetryRecord>,
    terms: HashMap<(String, String), i64>,
    next_term: i64,
}

impl State {
    fn reference_mut(&mut self, local_key: i64) -> Result<&mut ContentReference> {
        usize::try_from(local_key - 1)
            .ok()
            .and_then(|i| self.references.get_mut(i))
            .ok_or_else(|| anyhow!("no content reference with key {}", local_key))
    }
}

/// In-memory store.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    /// Add a local taxonomy term, returning its id. Idempotent per name.
    pub fn add_term(&self, vocabulary: &str, name: &str) -> Result<i64> {
        let mut state = self.write()?;
        let key = (vocabulary.to_string(), name.to_string());
        if let Some(&id) = state.terms.get(&key) {
            return Ok(id);
        }
        state.next_term += 1;
        let id = state.next_term;
        state.terms.insert(key, id);
        Ok(id)
    }

    /// Snapshot of all references, in creation order.
    pub fn references(&self) -> Result<Vec<ContentReference>> {
        Ok(self.read()?.references.clone())
    }

    /// Snapshot of all telemetry records, in append order.
    pub fn telemetry(&self) -> Result<Vec<TelemetryRecord>> {
        Ok(self.read()?.telemetry.clone())
    }
}

#[async_trait]
impl ReferenceStore for InMemoryStore {
    async fn find_by_key(
        &self,
        source_identity: &str,
        remote_key: &str,
    ) -> Result<Option<ContentReference>> {
        let state = self.read()?;
        let key = (source_identity.to_string(), remote_key.to_string());
        Ok(state
            .by_key
            .get(&key)
            .and_then(|&k| state.references.get((k - 1) as usize))
            .cloned())
    }

    async fn create(&self, fields: &ReferenceFields) -> Result<i64> {
        let mut state = self.write()?;
        let key = (fields.source_identity.clone(), fields.remote_key.clone());
        if let Some(&existing) = state.by_key.get(&key) {
            let reference = state.reference_mut(existing)?;
            reference.fields = fields.clone();
            reference.state = ReferenceState::Active;
            return Ok(existing);
        }
        let local_key = state.references.len() as i64 + 1;
        state.references.push(ContentReference {
            local_key,
            state: ReferenceState::Active,
            fields: fields.clone(),
        });
        state.by_key.insert(key, local_key);
        Ok(local_key)
    }

    async fn update(&self, local_key: i64, fields: &ReferenceFields) -> Result<()> {
        let mut state = self.write()?;
        let reference = state.reference_mut(local_key)?;
        if reference.fields.source_identity != fields.source_identity
            || reference.fields.remote_key != fields.remote_key
        {
            bail!(
                "refusing to move content reference {} to a different remote key",
                local_key
            );
        }
        reference.fields = fields.clone();
        reference.state = ReferenceState::Active;
        Ok(())
    }

    async fn set_published(&self, local_key: i64, published: bool) -> Result<()> {
        let mut state = self.write()?;
        state.reference_mut(local_key)?.state = ReferenceState::from_published(published);
        Ok(())
    }

    async fn query_by_source(&self, source_identity: &str) -> Result<Vec<StoredKey>> {
        let state = self.read()?;
        Ok(state
            .references
            .iter()
            .filter(|r| r.fields.source_identity == source_identity)
            .map(|r| StoredKey {
                local_key: r.local_key,
                remote_key: r.fields.remote_key.clone(),
                state: r.state,
            })
            .collect())
    }

    async fn create_telemetry(&self, record: &TelemetryRecord) -> Result<i64> {
        let mut state = self.write()?;
        state.telemetry.push(record.clone());
        Ok(state.telemetry.len() as i64)
    }

    async fn find_term(&self, vocabulary: &str, name: &str) -> Result<Option<i64>> {
        let state = self.read()?;
        Ok(state
            .terms
            .get(&(vocabulary.to_string(), name.to_string()))
            .copied())
    }
}
