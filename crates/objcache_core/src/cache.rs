//! Per-cache state shared by authority and session endpoints, and the
//! merge algorithm that folds incoming records into it.

use crate::descriptor::CacheDescriptor;
use crate::error::{CacheError, CacheResult};
use crate::events::{CacheEvent, EventHub, StagedChange};
use crate::query::{QueryInput, Selector, ShapeKey};
use crate::record::{CachedObject, IdOrRecord, Record};
use crate::registry::SharedMemorySet;
use objcache_codec::{Timestamp, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// Descriptor, optional MemorySet and event hub of one named cache.
///
/// Cloning is cheap and clones share state.
#[derive(Debug, Clone)]
pub struct Cache {
    descriptor: Arc<CacheDescriptor>,
    memory_set: Option<SharedMemorySet>,
    events: Arc<EventHub>,
}

impl Cache {
    /// Creates a cache over an optional MemorySet.
    pub fn new(descriptor: Arc<CacheDescriptor>, memory_set: Option<SharedMemorySet>) -> Self {
        Self {
            descriptor,
            memory_set,
            events: Arc::new(EventHub::new()),
        }
    }

    /// Rebuilds the cache over a new declaration and MemorySet, keeping
    /// every event subscriber.
    #[must_use]
    pub fn redeclare(
        &self,
        descriptor: Arc<CacheDescriptor>,
        memory_set: Option<SharedMemorySet>,
    ) -> Self {
        Self {
            descriptor,
            memory_set,
            events: Arc::clone(&self.events),
        }
    }

    /// Cache name.
    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    /// Cache declaration.
    pub fn descriptor(&self) -> &Arc<CacheDescriptor> {
        &self.descriptor
    }

    /// Backing MemorySet, if this side keeps one.
    pub fn memory_set(&self) -> Option<&SharedMemorySet> {
        self.memory_set.as_ref()
    }

    /// Event subscribers.
    pub fn events(&self) -> &EventHub {
        &self.events
    }

    /// Cached object by identity; never fetches.
    pub fn get_object_now(&self, id: &Value) -> Option<CachedObject> {
        self.memory_set.as_ref()?.lock().get_by_id(id)
    }

    /// Cached objects matching the input; never fetches.
    pub fn get_objects_now(&self, input: &QueryInput) -> Vec<CachedObject> {
        let Some(set) = &self.memory_set else {
            return Vec::new();
        };
        let set = set.lock();
        match input {
            QueryInput::Id(id) => set.get_by_id(id).into_iter().collect(),
            QueryInput::Filter(fields) => set.select(&Selector::from_record(fields.clone())),
            QueryInput::All => set.list().to_vec(),
        }
    }

    /// Cached objects filed under a key (or key prefix) of a named index.
    pub fn index_lookup(&self, index: &str, key: &[Value]) -> CacheResult<Vec<CachedObject>> {
        match &self.memory_set {
            Some(set) => set.lock().index_lookup(index, key),
            None => Ok(Vec::new()),
        }
    }

    /// Greatest `updatedAt` recorded for a query shape.
    pub fn last_updated_at(&self, shape: &ShapeKey) -> Option<Timestamp> {
        self.memory_set.as_ref()?.lock().last_updated_at(shape)
    }

    /// Builds a fresh cached instance from raw fields.
    pub async fn wrap_object(&self, raw: Record) -> CachedObject {
        let object = CachedObject::new(self.descriptor.wrap(raw));
        self.fire(CacheEvent::Wrapped {
            cache: self.name().to_string(),
            object: object.clone(),
        })
        .await;
        object
    }

    /// Merges incoming records into the cache.
    ///
    /// Returns one object per accepted record, in input order. Records that
    /// carry no identity are skipped. When `shape` is given, the greatest
    /// incoming `updatedAt` is recorded for it.
    pub async fn apply_changes(
        &self,
        records: Vec<Record>,
        shape: Option<&ShapeKey>,
    ) -> Vec<CachedObject> {
        let mut accepted = Vec::with_capacity(records.len());
        let mut newest: Option<Timestamp> = None;
        for mut record in records {
            self.normalize_temporal(&mut record);
            if self.descriptor.id_of(&record).is_none() {
                warn!(
                    cache = self.name(),
                    id_property = self.descriptor.id_property(),
                    "skipping record without identity"
                );
                continue;
            }
            if let Some(ts) = record
                .get(self.descriptor.updated_at_property())
                .and_then(Value::as_timestamp)
            {
                newest = newest.max(Some(ts));
            }
            accepted.push(record);
        }

        let Some(set) = &self.memory_set else {
            let mut objects = Vec::with_capacity(accepted.len());
            for record in accepted {
                objects.push(self.wrap_object(record).await);
            }
            return objects;
        };

        let staged: Vec<StagedChange> = {
            let set = set.lock();
            accepted
                .into_iter()
                .map(|record| {
                    let existing = self
                        .descriptor
                        .id_of(&record)
                        .and_then(|id| set.get_by_id(&id));
                    match existing {
                        Some(existing) => StagedChange::Update {
                            existing,
                            incoming: record,
                        },
                        None => StagedChange::New(CachedObject::new(self.descriptor.wrap(record))),
                    }
                })
                .collect()
        };

        for change in &staged {
            if let StagedChange::New(object) = change {
                self.fire(CacheEvent::Wrapped {
                    cache: self.name().to_string(),
                    object: object.clone(),
                })
                .await;
            }
        }
        self.fire(CacheEvent::Updating {
            cache: self.name().to_string(),
            staged: staged.clone(),
        })
        .await;

        let mut objects = Vec::with_capacity(staged.len());
        let mut added = Vec::new();
        {
            let mut set = set.lock();
            for change in staged {
                let outcome = match change {
                    StagedChange::New(object) => set.insert_object(object),
                    StagedChange::Update { incoming, .. } => set.upsert(incoming),
                };
                match outcome {
                    Ok(outcome) => {
                        if outcome.inserted {
                            added.push(outcome.object.clone());
                        }
                        objects.push(outcome.object);
                    }
                    Err(err) => warn!(cache = self.name(), error = %err, "record not merged"),
                }
            }
            if let (Some(shape), Some(ts)) = (shape, newest) {
                set.check_updated_at(ts, *shape);
            }
        }
        debug!(
            cache = self.name(),
            merged = objects.len(),
            added = added.len(),
            "applied changes"
        );

        self.fire(CacheEvent::Updated {
            cache: self.name().to_string(),
            objects: objects.clone(),
            added,
        })
        .await;
        objects
    }

    /// Removes an object from the cache and fires `removed`.
    pub async fn remove_from_cache(&self, target: &IdOrRecord) -> Option<CachedObject> {
        let id = self.descriptor.target_id(target)?;
        let removed = self.memory_set.as_ref()?.lock().remove(&id)?;
        self.fire(CacheEvent::Removed {
            cache: self.name().to_string(),
            object: removed.object.clone(),
        })
        .await;
        Some(removed.object)
    }

    /// Fires `error` for a failure that is absorbed rather than returned.
    pub async fn fire_error(&self, error: CacheError) {
        self.fire(CacheEvent::Error {
            cache: self.name().to_string(),
            error: Arc::new(error),
        })
        .await;
    }

    /// Delivers an event to subscribers.
    ///
    /// Listener failures are logged by the hub and go no further.
    pub async fn fire(&self, event: CacheEvent) {
        let _ = self.events.emit(&event).await;
    }

    fn normalize_temporal(&self, record: &mut Record) {
        for field in [
            self.descriptor.created_at_property(),
            self.descriptor.updated_at_property(),
        ] {
            let parsed = match record.get(field) {
                Some(Value::Integer(ms)) => Timestamp::from_millis(*ms)
                    .ok_or_else(|| format!("{ms} is out of range")),
                Some(Value::Text(text)) => {
                    Timestamp::parse_rfc3339(text).map_err(|e| e.to_string())
                }
                _ => continue,
            };
            match parsed {
                Ok(ts) => {
                    record.set(field, ts);
                }
                Err(reason) => warn!(cache = self.name(), field, %reason, "unparseable timestamp"),
            }
        }
    }
}
