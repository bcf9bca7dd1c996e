use super::{KvStore, Result};
use async_trait::async_trait;
use serde_json::Value;

/// Key-value metadata store on a single sled tree.
#[derive(Clone)]
pub struct SledKvStore {
    tree: sled::Tree,
}

impl SledKvStore {
    pub fn new(db: &sled::Db) -> Result<Self> {
        Ok(Self {
            tree: db.open_tree("kv")?,
        })
    }
}

#[async_trait]
impl KvStore for SledKvStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        match self.tree.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &Value) -> Result<()> {
        self.tree.insert(key.as_bytes(), serde_json::to_vec(value)?)?;
        Ok(())
    }

    async fn mset(&self, entries: &[(String, Value)]) -> Result<()> {
        let mut batch = sled::Batch::default();
        for (key, value) in entries {
            batch.insert(key.as_bytes(), serde_json::to_vec(value)?);
        }
        self.tree.apply_batch(batch)?;
        Ok(())
    }

    async fn get_by_prefix(&self, prefix: &str) -> Result<Vec<(String, Value)>> {
        let mut out = Vec::new();
        for item in self.tree.scan_prefix(prefix.as_bytes()) {
            let (k, v) = item?;
            let key = String::from_utf8_lossy(&k).into_owned();
            out.push((key, serde_json::from_slice(&v)?));
        }
        Ok(out)
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.tree.remove(key.as_bytes())?;
        Ok(())
    }
}
