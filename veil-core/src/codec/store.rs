//! In-process [`ExternalStore`] used by tests and local development. Real
//! deployments plug in a store client for whatever blob storage backs them.

use crate::codec::batching::{ExternalStore, StoreError, StoreRecord};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Mutex;

/// Keeps externalized payload data in a process-local map, partitioned by
/// tenant.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<(String, String), Bytes>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records currently held across all tenants.
    pub fn len(&self) -> usize {
        self.entries.lock().expect("store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ExternalStore for MemoryStore {
    async fn write_batch(&self, tenant: &str, records: Vec<StoreRecord>) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().expect("store lock poisoned");
        for record in records {
            entries.insert((tenant.to_string(), record.id), record.data);
        }
        Ok(())
    }

    async fn read_batch(
        &self,
        tenant: &str,
        ids: &[String],
    ) -> Result<HashMap<String, Bytes>, StoreError> {
        let entries = self.entries.lock().expect("store lock poisoned");
        Ok(ids
            .iter()
            .filter_map(|id| {
                entries
                    .get(&(tenant.to_string(), id.clone()))
                    .map(|data| (id.clone(), data.clone()))
            })
            .collect())
    }
}
