use super::{RecordStore, Result, StoreError};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    #[default]
    Asc,
    Desc,
}

/// Equality filters, ordering and pagination over one table.
#[derive(Debug, Clone, Default)]
pub struct RowQuery {
    pub filters: Vec<(String, Value)>,
    pub order_by: Option<(String, Order)>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl RowQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push((field.to_string(), value.into()));
        self
    }

    pub fn order_by(mut self, field: &str, order: Order) -> Self {
        self.order_by = Some((field.to_string(), order));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    fn matches(&self, row: &Value) -> bool {
        self.filters
            .iter()
            .all(|(field, expected)| row.get(field) == Some(expected))
    }
}

fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Bool(_)) => 1,
        Some(Value::Number(_)) => 2,
        Some(Value::String(_)) => 3,
        Some(_) => 4,
    }
}

// Missing and null sort first; mixed types order by type rank.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Row store with one sled tree per table.
///
/// Generated ids are zero-padded sled counters, so key order is insertion
/// order and an unordered select returns rows oldest first.
#[derive(Clone)]
pub struct SledRecordStore {
    db: sled::Db,
}

impl SledRecordStore {
    pub fn new(db: sled::Db) -> Self {
        Self { db }
    }

    fn table(&self, table: &str) -> Result<sled::Tree> {
        Ok(self.db.open_tree(format!("table:{table}"))?)
    }

    fn with_id(row: Value, id: &str) -> Result<Value> {
        let mut map: Map<String, Value> = match row {
            Value::Object(map) => map,
            _ => return Err(StoreError::InvalidRow),
        };
        map.insert("id".to_string(), Value::String(id.to_string()));
        Ok(Value::Object(map))
    }

    fn scan(&self, table: &str, query: &RowQuery) -> Result<Vec<Value>> {
        let tree = self.table(table)?;
        let mut rows = Vec::new();
        for item in tree.iter() {
            let (_k, v) = item?;
            let row: Value = serde_json::from_slice(&v)?;
            if query.matches(&row) {
                rows.push(row);
            }
        }
        if let Some((field, order)) = &query.order_by {
            // stable sort keeps insertion order among equal keys
            rows.sort_by(|a, b| {
                let ord = compare_values(a.get(field), b.get(field));
                match order {
                    Order::Asc => ord,
                    Order::Desc => ord.reverse(),
                }
            });
        }
        Ok(rows)
    }
}

#[async_trait]
impl RecordStore for SledRecordStore {
    async fn insert(&self, table: &str, row: Value) -> Result<String> {
        let id = format!("{:020}", self.db.generate_id()?);
        let row = Self::with_id(row, &id)?;
        self.table(table)?
            .insert(id.as_bytes(), serde_json::to_vec(&row)?)?;
        Ok(id)
    }

    async fn upsert(&self, table: &str, id: &str, row: Value) -> Result<()> {
        let row = Self::with_id(row, id)?;
        self.table(table)?
            .insert(id.as_bytes(), serde_json::to_vec(&row)?)?;
        Ok(())
    }

    async fn select(&self, table: &str, query: &RowQuery) -> Result<Vec<Value>> {
        let rows = self.scan(table, query)?;
        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(rows.into_iter().skip(query.offset).take(limit).collect())
    }

    async fn delete(&self, table: &str, id: &str) -> Result<bool> {
        Ok(self.table(table)?.remove(id.as_bytes())?.is_some())
    }

    async fn count(&self, table: &str, query: &RowQuery) -> Result<usize> {
        Ok(self.scan(table, query)?.len())
    }
}
