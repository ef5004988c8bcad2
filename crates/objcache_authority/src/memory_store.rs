//! In-memory backing store.
//!
//! Tables are created per cache from its descriptor. Rows get integer
//! identities on create and `createdAt`/`updatedAt` stamps from a clock that
//! never repeats a millisecond, so `updated_after` narrowing sees every
//! write exactly once.

use crate::store::{BackingStore, StoreError, StoreResult};
use async_trait::async_trait;
use objcache_codec::{Timestamp, Value};
use objcache_core::{CacheDescriptor, QueryDescriptor, Record, Selector};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

#[derive(Debug)]
struct Table {
    id_property: String,
    created_at: String,
    updated_at: String,
    rows: BTreeMap<Value, Record>,
    next_id: i64,
    find_all_calls: usize,
    last_query: Option<QueryDescriptor>,
}

impl Table {
    fn matches(&self, row: &Record, query: &QueryDescriptor) -> bool {
        if !query.selector.matches(row) {
            return false;
        }
        match query.updated_after {
            None => true,
            Some(after) => row
                .get(&self.updated_at)
                .and_then(Value::as_timestamp)
                .is_some_and(|ts| ts > after),
        }
    }
}

#[derive(Debug, Default)]
struct State {
    tables: HashMap<String, Table>,
    last_stamp: i64,
    fail_next: Option<String>,
}

impl State {
    fn stamp(&mut self) -> Timestamp {
        let now = Timestamp::now().as_millis().max(self.last_stamp + 1);
        self.last_stamp = now;
        Timestamp::from_millis(now).unwrap_or_else(Timestamp::now)
    }

    fn check_fault(&mut self) -> StoreResult<()> {
        match self.fail_next.take() {
            Some(message) => Err(StoreError::Unavailable(message)),
            None => Ok(()),
        }
    }

    fn table(&mut self, cache: &str) -> StoreResult<&mut Table> {
        self.tables
            .get_mut(cache)
            .ok_or_else(|| StoreError::UnknownTable(cache.to_string()))
    }
}

/// A [`BackingStore`] held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    latency: Option<Duration>,
}

impl MemoryStore {
    /// Creates a store with no tables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every call, to widen interleaving windows in tests.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Creates the table backing a cache. Existing tables are kept.
    pub fn define_table(&self, descriptor: &CacheDescriptor) {
        self.state
            .lock()
            .tables
            .entry(descriptor.name().to_string())
            .or_insert_with(|| Table {
                id_property: descriptor.id_property().to_string(),
                created_at: descriptor.created_at_property().to_string(),
                updated_at: descriptor.updated_at_property().to_string(),
                rows: BTreeMap::new(),
                next_id: 1,
                find_all_calls: 0,
                last_query: None,
            });
    }

    /// Makes the next store call fail with `Unavailable`.
    pub fn fail_next(&self, message: impl Into<String>) {
        self.state.lock().fail_next = Some(message.into());
    }

    /// Number of `find_all` calls made against a table.
    pub fn find_all_calls(&self, cache: &str) -> usize {
        self.state
            .lock()
            .tables
            .get(cache)
            .map_or(0, |t| t.find_all_calls)
    }

    /// Most recent `find_all` descriptor for a table.
    pub fn last_query(&self, cache: &str) -> Option<QueryDescriptor> {
        self.state
            .lock()
            .tables
            .get(cache)
            .and_then(|t| t.last_query.clone())
    }

    /// Number of rows in a table.
    pub fn row_count(&self, cache: &str) -> usize {
        self.state.lock().tables.get(cache).map_or(0, |t| t.rows.len())
    }

    /// Current copy of a row.
    pub fn row(&self, cache: &str, id: &Value) -> Option<Record> {
        self.state
            .lock()
            .tables
            .get(cache)
            .and_then(|t| t.rows.get(id).cloned())
    }

    async fn pause(&self) {
        match self.latency {
            Some(latency) => tokio::time::sleep(latency).await,
            None => tokio::task::yield_now().await,
        }
    }
}

#[async_trait]
impl BackingStore for MemoryStore {
    async fn find_one(&self, cache: &str, query: &QueryDescriptor) -> StoreResult<Option<Record>> {
        self.pause().await;
        let mut state = self.state.lock();
        state.check_fault()?;
        let table = state.table(cache)?;
        Ok(table
            .rows
            .values()
            .find(|row| table.matches(row, query))
            .cloned())
    }

    async fn find_all(&self, cache: &str, query: &QueryDescriptor) -> StoreResult<Vec<Record>> {
        self.pause().await;
        let mut state = self.state.lock();
        state.check_fault()?;
        let table = state.table(cache)?;
        table.find_all_calls += 1;
        table.last_query = Some(query.clone());
        Ok(table
            .rows
            .values()
            .filter(|row| table.matches(row, query))
            .cloned()
            .collect())
    }

    async fn create(&self, cache: &str, mut values: Record) -> StoreResult<Record> {
        self.pause().await;
        let mut state = self.state.lock();
        state.check_fault()?;
        let stamp = state.stamp();
        let table = state.table(cache)?;

        let id = match values.get(&table.id_property).filter(|v| !v.is_null()) {
            Some(id) => id.clone(),
            None => {
                let id = Value::Integer(table.next_id);
                table.next_id += 1;
                id
            }
        };
        if table.rows.contains_key(&id) {
            return Err(StoreError::Constraint(format!(
                "{cache}: duplicate {} {id}",
                table.id_property
            )));
        }
        if let Some(n) = id.as_integer() {
            table.next_id = table.next_id.max(n + 1);
        }
        values.set(table.id_property.clone(), id.clone());
        values.set(table.created_at.clone(), stamp);
        values.set(table.updated_at.clone(), stamp);
        table.rows.insert(id, values.clone());
        Ok(values)
    }

    async fn update(&self, cache: &str, values: Record, selector: &Selector) -> StoreResult<u64> {
        self.pause().await;
        let mut state = self.state.lock();
        state.check_fault()?;
        let stamp = state.stamp();
        let table = state.table(cache)?;

        let mut affected = 0;
        for row in table.rows.values_mut() {
            if selector.matches(row) {
                for (name, value) in values.iter() {
                    if *name != table.id_property && *name != table.created_at {
                        row.set(name.clone(), value.clone());
                    }
                }
                row.set(table.updated_at.clone(), stamp);
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn destroy(&self, cache: &str, selector: &Selector) -> StoreResult<u64> {
        self.pause().await;
        let mut state = self.state.lock();
        state.check_fault()?;
        let table = state.table(cache)?;
        let before = table.rows.len();
        table.rows.retain(|_, row| !selector.matches(row));
        Ok((before - table.rows.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store.define_table(&CacheDescriptor::new("users"));
        store
    }

    #[tokio::test]
    async fn create_allocates_ids_and_stamps() {
        let store = store();
        let a = store.create("users", Record::new().with("name", "A")).await.unwrap();
        let b = store.create("users", Record::new().with("name", "B")).await.unwrap();
        assert_eq!(a.get("id"), Some(&Value::Integer(1)));
        assert_eq!(b.get("id"), Some(&Value::Integer(2)));
        let ta = a.get("updatedAt").and_then(Value::as_timestamp).unwrap();
        let tb = b.get("updatedAt").and_then(Value::as_timestamp).unwrap();
        assert!(tb > ta);
        assert_eq!(a.get("createdAt"), a.get("updatedAt"));
    }

    #[tokio::test]
    async fn explicit_duplicate_id_is_a_constraint_error() {
        let store = store();
        store.create("users", Record::new().with("id", 9)).await.unwrap();
        let err = store.create("users", Record::new().with("id", 9)).await.unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));
        let next = store.create("users", Record::new()).await.unwrap();
        assert_eq!(next.get("id"), Some(&Value::Integer(10)));
    }

    #[tokio::test]
    async fn updated_after_narrows() {
        let store = store();
        let first = store.create("users", Record::new().with("team", "red")).await.unwrap();
        store.create("users", Record::new().with("team", "red")).await.unwrap();
        let after = first.get("updatedAt").and_then(Value::as_timestamp);

        let all = QueryDescriptor::new(Selector::eq("team", "red"));
        assert_eq!(store.find_all("users", &all).await.unwrap().len(), 2);
        let delta = all.clone().updated_after(after);
        assert_eq!(store.find_all("users", &delta).await.unwrap().len(), 1);
        assert_eq!(store.find_all_calls("users"), 2);
        assert_eq!(store.last_query("users").unwrap().updated_after, after);
    }

    #[tokio::test]
    async fn update_and_destroy_count_rows() {
        let store = store();
        store.create("users", Record::new().with("team", "red")).await.unwrap();
        store.create("users", Record::new().with("team", "red")).await.unwrap();
        store.create("users", Record::new().with("team", "blue")).await.unwrap();

        let n = store
            .update("users", Record::new().with("active", true), &Selector::eq("team", "red"))
            .await
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(
            store.row("users", &Value::Integer(1)).unwrap().get("active"),
            Some(&Value::Bool(true))
        );

        let n = store.destroy("users", &Selector::eq("team", "red")).await.unwrap();
        assert_eq!(n, 2);
        assert_eq!(store.row_count("users"), 1);
        assert_eq!(store.update("users", Record::new(), &Selector::eq("id", 1)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn faults_and_unknown_tables() {
        let store = store();
        store.fail_next("disk on fire");
        let err = store.find_all("users", &QueryDescriptor::default()).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(ref m) if m == "disk on fire"));
        assert!(store.find_all("users", &QueryDescriptor::default()).await.is_ok());

        let err = store.find_one("orders", &QueryDescriptor::default()).await.unwrap_err();
        assert!(matches!(err, StoreError::UnknownTable(_)));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn stamps_strictly_increase(teams in proptest::collection::vec(0u8..3, 1..20)) {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .unwrap();
                rt.block_on(async {
                    let store = store();
                    let mut last = None;
                    for team in &teams {
                        let row = store
                            .create("users", Record::new().with("team", i64::from(*team)))
                            .await
                            .unwrap();
                        let ts = row.get("updatedAt").and_then(Value::as_timestamp).unwrap();
                        if let Some(prev) = last {
                            prop_assert!(ts > prev);
                        }
                        last = Some(ts);
                    }
                    prop_assert_eq!(store.row_count("users"), teams.len());
                    Ok(())
                })?;
            }
        }
    }
}
