use std::collections::{BTreeMap, HashMap};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::{EntityStore, FieldFilter, WriteOp};

type Collections = HashMap<String, BTreeMap<Uuid, Value>>;

/// In-memory reference engine. A single RwLock over all collections keeps
/// `apply_batch` trivially atomic with respect to every reader.
#[derive(Default)]
pub struct InMemoryStore {
    collections: RwLock<Collections>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map(|records| records.len())
            .unwrap_or(0)
    }

    pub async fn is_empty(&self, collection: &str) -> bool {
        self.len(collection).await == 0
    }
}

#[async_trait]
impl EntityStore for InMemoryStore {
    async fn get(&self, collection: &str, id: Uuid) -> Result<Option<Value>> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .and_then(|records| records.get(&id))
            .cloned())
    }

    async fn upsert(&self, collection: &str, id: Uuid, record: Value) -> Result<()> {
        let mut collections = self.collections.write().await;
        collections
            .entry(collection.to_string())
            .or_default()
            .insert(id, record);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: Uuid) -> Result<bool> {
        let mut collections = self.collections.write().await;
        Ok(collections
            .get_mut(collection)
            .map(|records| records.remove(&id).is_some())
            .unwrap_or(false))
    }

    async fn find(&self, collection: &str, filters: &[FieldFilter]) -> Result<Vec<Value>> {
        let collections = self.collections.read().await;
        let matches = collections
            .get(collection)
            .map(|records| {
                records
                    .values()
                    .filter(|record| filters.iter().all(|f| f.matches(record)))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        Ok(matches)
    }

    async fn apply_batch(&self, ops: Vec<WriteOp>) -> Result<()> {
        debug!("Applying batch of {} write ops", ops.len());
        let mut collections = self.collections.write().await;
        for op in ops {
            match op {
                WriteOp::Upsert {
                    collection,
                    id,
                    record,
                } => {
                    collections.entry(collection).or_default().insert(id, record);
                }
                WriteOp::Delete { collection, id } => {
                    if let Some(records) = collections.get_mut(&collection) {
                        records.remove(&id);
                    }
                }
            }
        }
        Ok(())
    }
}
