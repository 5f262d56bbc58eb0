use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

pub mod memory;

pub use memory::InMemoryStore;

/// Field-equality predicate for indexed lookups, e.g.
/// `FieldFilter::eq("doctor_id", doctor_id)`.
#[derive(Debug, Clone)]
pub struct FieldFilter {
    pub field: String,
    pub value: Value,
}

impl FieldFilter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, record: &Value) -> bool {
        record.get(&self.field) == Some(&self.value)
    }
}

/// One element of an atomic write set.
#[derive(Debug, Clone)]
pub enum WriteOp {
    Upsert {
        collection: String,
        id: Uuid,
        record: Value,
    },
    Delete {
        collection: String,
        id: Uuid,
    },
}

impl WriteOp {
    pub fn upsert(collection: impl Into<String>, id: Uuid, record: Value) -> Self {
        WriteOp::Upsert {
            collection: collection.into(),
            id,
            record,
        }
    }

    pub fn delete(collection: impl Into<String>, id: Uuid) -> Self {
        WriteOp::Delete {
            collection: collection.into(),
            id,
        }
    }
}

/// Generic transactional entity store the scheduling core is written
/// against, independent of storage engine. Records are JSON documents keyed
/// by collection name and id.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn get(&self, collection: &str, id: Uuid) -> Result<Option<Value>>;

    async fn upsert(&self, collection: &str, id: Uuid, record: Value) -> Result<()>;

    /// Returns true if a record was removed.
    async fn delete(&self, collection: &str, id: Uuid) -> Result<bool>;

    /// All records of a collection matching every filter (conjunction).
    async fn find(&self, collection: &str, filters: &[FieldFilter]) -> Result<Vec<Value>>;

    /// Apply the whole write set as a single atomic unit: either every
    /// operation takes effect or none does.
    async fn apply_batch(&self, ops: Vec<WriteOp>) -> Result<()>;
}
