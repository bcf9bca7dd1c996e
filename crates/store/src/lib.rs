//! Storage and messaging collaborators used by the pipeline.
//!
//! Each collaborator is an async trait so deployments can swap the backing
//! service; the implementations here cover local disk, sled and a plain HTTP
//! publish endpoint.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

pub mod error;
pub mod events;
pub mod kv;
pub mod object;
pub mod records;

pub use error::{Result, StoreError};
pub use events::{notify, EventMessage, HttpEventSink, NotifyResult, TracingEventSink};
pub use kv::SledKvStore;
pub use object::LocalObjectStore;
pub use records::{Order, RowQuery, SledRecordStore};

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stores `bytes` and returns the stored path.
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String>;

    async fn download(&self, bucket: &str, path: &str) -> Result<Vec<u8>>;

    async fn create_signed_url(&self, bucket: &str, path: &str, ttl: Duration) -> Result<String>;

    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<()>;
}

/// Table-oriented row store. Rows are JSON objects carrying an `id` field.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Inserts a row under a generated id and returns that id.
    async fn insert(&self, table: &str, row: Value) -> Result<String>;

    async fn upsert(&self, table: &str, id: &str, row: Value) -> Result<()>;

    async fn select(&self, table: &str, query: &RowQuery) -> Result<Vec<Value>>;

    async fn delete(&self, table: &str, id: &str) -> Result<bool>;

    async fn count(&self, table: &str, query: &RowQuery) -> Result<usize>;
}

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn set(&self, key: &str, value: &Value) -> Result<()>;

    /// Writes all entries atomically.
    async fn mset(&self, entries: &[(String, Value)]) -> Result<()>;

    async fn get_by_prefix(&self, prefix: &str) -> Result<Vec<(String, Value)>>;

    async fn del(&self, key: &str) -> Result<()>;
}

/// Fire-and-forget notification sink.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, message: &EventMessage) -> Result<()>;
}
