//! In-memory relational store
//!
//! Tables are created lazily on first insert; selects against a table that
//! was never written return no rows. Row identifiers are assigned from a
//! per-table counter starting at 1. Transactions snapshot the whole store
//! and restore it on rollback.

use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use upfield_core::{Order, Predicate, RelationalStore, Row, Select, StoreError, StoreResult, Value};

#[derive(Clone, Default)]
struct Table {
    next_id: i64,
    rows: Vec<Row>,
}

#[derive(Default)]
struct Inner {
    tables: HashMap<String, Table>,
    snapshot: Option<HashMap<String, Table>>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows currently held in `table`. Test convenience.
    pub fn row_count(&self, table: &str) -> usize {
        let inner = self.inner.lock().expect("memory store lock poisoned");
        inner.tables.get(table).map(|t| t.rows.len()).unwrap_or(0)
    }

    fn matches(inner: &Inner, row: &Row, predicate: &Predicate) -> bool {
        match predicate {
            Predicate::Eq { column, value } => row.get(column).unwrap_or(&Value::Null) == value,
            Predicate::In { column, values } => {
                let cell = row.get(column).unwrap_or(&Value::Null);
                values.iter().any(|v| v == cell)
            }
            Predicate::NotInColumn {
                column,
                ref_table,
                ref_column,
            } => {
                let cell = row.get(column).unwrap_or(&Value::Null);
                let referenced = inner
                    .tables
                    .get(ref_table)
                    .map(|t| {
                        t.rows
                            .iter()
                            .filter_map(|r| r.get(ref_column))
                            .filter(|v| !v.is_null())
                            .any(|v| v == cell)
                    })
                    .unwrap_or(false);
                !referenced
            }
        }
    }

    fn compare(a: &Value, b: &Value) -> CmpOrdering {
        match (a, b) {
            (Value::Int(x), Value::Int(y)) => x.cmp(y),
            (Value::Float(x), Value::Float(y)) => x.partial_cmp(y).unwrap_or(CmpOrdering::Equal),
            (Value::Text(x), Value::Text(y)) => x.cmp(y),
            (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
            (Value::Null, Value::Null) => CmpOrdering::Equal,
            (Value::Null, _) => CmpOrdering::Less,
            (_, Value::Null) => CmpOrdering::Greater,
            _ => CmpOrdering::Equal,
        }
    }
}

#[async_trait]
impl RelationalStore for MemoryStore {
    async fn select(&self, query: &Select) -> StoreResult<Vec<Row>> {
        let inner = self.inner.lock().expect("memory store lock poisoned");
        let Some(table) = inner.tables.get(&query.table) else {
            return Ok(Vec::new());
        };

        let mut rows: Vec<Row> = table
            .rows
            .iter()
            .filter(|row| {
                query
                    .predicates
                    .iter()
                    .all(|p| Self::matches(&inner, row, p))
            })
            .cloned()
            .collect();

        if let Some((column, order)) = &query.order_by {
            rows.sort_by(|a, b| {
                let ordering = Self::compare(
                    a.get(column).unwrap_or(&Value::Null),
                    b.get(column).unwrap_or(&Value::Null),
                );
                match order {
                    Order::Asc => ordering,
                    Order::Desc => ordering.reverse(),
                }
            });
        }

        if !query.columns.is_empty() {
            for row in &mut rows {
                row.retain(|column, _| query.columns.contains(column));
            }
        }

        Ok(rows)
    }

    async fn insert(
        &self,
        table: &str,
        values: &[(String, Value)],
        primary_key: Option<&str>,
    ) -> StoreResult<i64> {
        let mut inner = self.inner.lock().expect("memory store lock poisoned");
        let entry = inner.tables.entry(table.to_string()).or_default();
        entry.next_id += 1;
        let id = entry.next_id;

        let mut row: Row = values.iter().cloned().collect();
        if let Some(pk) = primary_key {
            // Keep the generated id visible unless the caller supplied the key.
            row.entry(pk.to_string()).or_insert(Value::Int(id));
        }
        entry.rows.push(row);
        Ok(id)
    }

    async fn update(
        &self,
        table: &str,
        values: &[(String, Value)],
        filter: &[Predicate],
    ) -> StoreResult<u64> {
        let mut inner = self.inner.lock().expect("memory store lock poisoned");
        let Some(existing) = inner.tables.get(table) else {
            return Ok(0);
        };

        let targets: Vec<usize> = existing
            .rows
            .iter()
            .enumerate()
            .filter(|(_, row)| filter.iter().all(|p| Self::matches(&inner, row, p)))
            .map(|(i, _)| i)
            .collect();

        let affected = targets.len() as u64;
        if let Some(entry) = inner.tables.get_mut(table) {
            for index in targets {
                for (column, value) in values {
                    entry.rows[index].insert(column.clone(), value.clone());
                }
            }
        }
        Ok(affected)
    }

    async fn delete(&self, table: &str, filter: &[Predicate]) -> StoreResult<u64> {
        let mut inner = self.inner.lock().expect("memory store lock poisoned");
        let Some(existing) = inner.tables.get(table) else {
            return Ok(0);
        };

        let keep: Vec<Row> = existing
            .rows
            .iter()
            .filter(|row| !filter.iter().all(|p| Self::matches(&inner, row, p)))
            .cloned()
            .collect();

        let removed = (existing.rows.len() - keep.len()) as u64;
        if let Some(entry) = inner.tables.get_mut(table) {
            entry.rows = keep;
        }
        Ok(removed)
    }

    async fn begin(&self) -> StoreResult<()> {
        let mut inner = self.inner.lock().expect("memory store lock poisoned");
        if inner.snapshot.is_some() {
            return Err(StoreError::NestedTransaction);
        }
        inner.snapshot = Some(inner.tables.clone());
        Ok(())
    }

    async fn commit(&self) -> StoreResult<()> {
        let mut inner = self.inner.lock().expect("memory store lock poisoned");
        if inner.snapshot.take().is_none() {
            return Err(StoreError::NoTransaction);
        }
        Ok(())
    }

    async fn rollback(&self) -> StoreResult<()> {
        let mut inner = self.inner.lock().expect("memory store lock poisoned");
        match inner.snapshot.take() {
            Some(snapshot) => {
                inner.tables = snapshot;
                Ok(())
            }
            None => Err(StoreError::NoTransaction),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Value {
        Value::Text(s.to_string())
    }

    #[tokio::test]
    async fn insert_assigns_sequential_ids_and_backfills_key() {
        let store = MemoryStore::new();
        let first = store
            .insert("uploads", &[("name".into(), text("a"))], Some("id"))
            .await
            .unwrap();
        let second = store
            .insert("uploads", &[("name".into(), text("b"))], Some("id"))
            .await
            .unwrap();
        assert_eq!((first, second), (1, 2));

        let rows = store.select(&Select::new("uploads")).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("id"), Some(&Value::Int(1)));
    }

    #[tokio::test]
    async fn caller_supplied_key_is_not_overwritten() {
        let store = MemoryStore::new();
        store
            .insert("uploads", &[("id".into(), Value::Int(99))], Some("id"))
            .await
            .unwrap();
        let rows = store.select(&Select::new("uploads")).await.unwrap();
        assert_eq!(rows[0].get("id"), Some(&Value::Int(99)));
    }

    #[tokio::test]
    async fn update_and_delete_respect_predicates() {
        let store = MemoryStore::new();
        for name in ["a", "b", "c"] {
            store
                .insert("uploads", &[("name".into(), text(name))], Some("id"))
                .await
                .unwrap();
        }

        let updated = store
            .update(
                "uploads",
                &[("name".into(), text("renamed"))],
                &[Predicate::Eq {
                    column: "id".into(),
                    value: Value::Int(2),
                }],
            )
            .await
            .unwrap();
        assert_eq!(updated, 1);

        let deleted = store
            .delete(
                "uploads",
                &[Predicate::In {
                    column: "id".into(),
                    values: vec![Value::Int(1), Value::Int(3)],
                }],
            )
            .await
            .unwrap();
        assert_eq!(deleted, 2);

        let rows = store.select(&Select::new("uploads")).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("name"), Some(&text("renamed")));
    }

    #[tokio::test]
    async fn not_in_column_ignores_null_references() {
        let store = MemoryStore::new();
        for id in 1..=3i64 {
            store
                .insert("uploads", &[("id".into(), Value::Int(id))], Some("id"))
                .await
                .unwrap();
        }
        store
            .insert("albums", &[("cover_id".into(), Value::Int(2))], Some("id"))
            .await
            .unwrap();
        store
            .insert("albums", &[("cover_id".into(), Value::Null)], Some("id"))
            .await
            .unwrap();

        let orphans = store
            .select(&Select::new("uploads").filter(Predicate::NotInColumn {
                column: "id".into(),
                ref_table: "albums".into(),
                ref_column: "cover_id".into(),
            }))
            .await
            .unwrap();

        let mut ids: Vec<i64> = orphans.iter().filter_map(|r| r.get("id")?.as_int()).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 3]);
    }

    #[tokio::test]
    async fn order_by_and_column_projection() {
        let store = MemoryStore::new();
        for (id, name) in [(3, "c"), (1, "a"), (2, "b")] {
            store
                .insert(
                    "uploads",
                    &[("id".into(), Value::Int(id)), ("name".into(), text(name))],
                    Some("id"),
                )
                .await
                .unwrap();
        }

        let rows = store
            .select(
                &Select::new("uploads")
                    .columns(["name"])
                    .order("id", Order::Asc),
            )
            .await
            .unwrap();
        let names: Vec<&str> = rows.iter().filter_map(|r| r.get("name")?.as_text()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert!(rows[0].get("id").is_none());
    }

    #[tokio::test]
    async fn rollback_restores_the_snapshot() {
        let store = MemoryStore::new();
        store
            .insert("uploads", &[("name".into(), text("keep"))], Some("id"))
            .await
            .unwrap();

        store.begin().await.unwrap();
        store
            .insert("uploads", &[("name".into(), text("discard"))], Some("id"))
            .await
            .unwrap();
        store.rollback().await.unwrap();

        assert_eq!(store.row_count("uploads"), 1);
        assert!(matches!(
            store.commit().await,
            Err(StoreError::NoTransaction)
        ));
    }

    #[tokio::test]
    async fn nested_begin_is_rejected() {
        let store = MemoryStore::new();
        store.begin().await.unwrap();
        assert!(matches!(
            store.begin().await,
            Err(StoreError::NestedTransaction)
        ));
        store.commit().await.unwrap();
    }
}
