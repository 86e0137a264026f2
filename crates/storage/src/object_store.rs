// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Object Store (C1): a filesystem-backed, watchable store keyed by
//! object id, parallel-reader/single-writer per object (§4.1).

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::SystemTime;

use lvp_core::{CoreError, CoreResult, CreateStrategy, MachineId};
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};

use crate::persist;
use crate::watch::{Watch, WatchEventType, WatchRegistry};

trait StoredResource:
    lvp_core::Resource + Clone + Serialize + DeserializeOwned + Send + Sync + 'static
{
}
impl<T> StoredResource for T where
    T: lvp_core::Resource + Clone + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

struct Inner<T: StoredResource> {
    objects: HashMap<MachineId, T>,
    watchers: WatchRegistry<T>,
}

/// A store of `T` records, one JSON file per object under `dir`.
///
/// `create`/`update`/`delete` each take the single internal lock for the
/// duration of the mutation (including the durable write), so readers
/// never observe a write half-applied, and watch events are emitted in
/// commit order while still holding that lock.
pub struct ObjectStore<T: StoredResource> {
    dir: PathBuf,
    inner: Mutex<Inner<T>>,
}

impl<T: StoredResource> ObjectStore<T> {
    /// Open (or create) the store rooted at `dir`, rebuilding its
    /// in-memory index by scanning `dir` for `*.json` files. Malformed
    /// files are logged and skipped rather than failing startup.
    pub fn open(dir: impl Into<PathBuf>) -> CoreResult<Self> {
        let dir = dir.into();
        let objects: Vec<T> = persist::scan(&dir, |path, err| {
            tracing::warn!(path = %path.display(), error = %err, "skipping malformed object file");
        })?;

        let mut index = HashMap::with_capacity(objects.len());
        for obj in objects {
            index.insert(obj.id(), obj);
        }

        Ok(Self {
            dir,
            inner: Mutex::new(Inner { objects: index, watchers: WatchRegistry::new() }),
        })
    }

    fn path_for(&self, id: &MachineId) -> PathBuf {
        persist::object_path(&self.dir, &id.to_string())
    }

    pub fn get(&self, id: &MachineId) -> CoreResult<T> {
        let inner = self.inner.lock();
        inner.objects.get(id).cloned().ok_or_else(|| CoreError::not_found(id))
    }

    pub fn list(&self) -> Vec<T> {
        self.inner.lock().objects.values().cloned().collect()
    }

    pub fn create(&self, mut obj: T, strategy: &impl CreateStrategy<T>) -> CoreResult<T> {
        let mut inner = self.inner.lock();
        let id = obj.id();
        if inner.objects.contains_key(&id) {
            return Err(CoreError::AlreadyExists(id.to_string()));
        }

        obj.set_created_at(SystemTime::now());
        obj.set_resource_version(1);
        obj.set_generation(1);
        strategy.prepare(&mut obj);

        let path = self.path_for(&id);
        persist::write_atomic(&self.dir, &path, &obj)?;

        inner.objects.insert(id, obj.clone());
        inner.watchers.notify(WatchEventType::Created, &obj);
        Ok(obj)
    }

    pub fn update(&self, obj: T) -> CoreResult<T> {
        let mut inner = self.inner.lock();
        let id = obj.id();
        let Some(stored) = inner.objects.get(&id) else {
            return Err(CoreError::not_found(id));
        };

        if obj.resource_version() != stored.resource_version() {
            return Err(CoreError::ResourceVersionNotLatest {
                expected: obj.resource_version(),
                actual: stored.resource_version(),
            });
        }

        let generation = if obj.spec_differs_from(stored) { stored.generation() + 1 } else { stored.generation() };

        let mut next = obj;
        next.set_resource_version(stored.resource_version() + 1);
        next.set_generation(generation);

        let path = self.path_for(&id);

        if next.finalizers().is_empty() && next.deleted_at().is_some() {
            persist::remove(&path)?;
            inner.objects.remove(&id);
            inner.watchers.notify(WatchEventType::Deleted, &next);
            return Ok(next);
        }

        persist::write_atomic(&self.dir, &path, &next)?;
        inner.objects.insert(id, next.clone());
        inner.watchers.notify(WatchEventType::Updated, &next);
        Ok(next)
    }

    /// Soft-delete (set `deleted_at` if unset) or, once finalizers have
    /// drained, hard-remove the record.
    pub fn delete(&self, id: &MachineId) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        let Some(stored) = inner.objects.get(id).cloned() else {
            return Err(CoreError::not_found(id));
        };

        let path = self.path_for(id);

        if stored.finalizers().is_empty() {
            persist::remove(&path)?;
            inner.objects.remove(id);
            inner.watchers.notify(WatchEventType::Deleted, &stored);
            return Ok(());
        }

        if stored.deleted_at().is_some() {
            // Already marked; nothing new to persist.
            return Ok(());
        }

        let mut next = stored;
        next.set_deleted_at(SystemTime::now());
        persist::write_atomic(&self.dir, &path, &next)?;
        inner.objects.insert(id.clone(), next.clone());
        inner.watchers.notify(WatchEventType::Updated, &next);
        Ok(())
    }

    pub fn watch(&self) -> Watch<T> {
        self.inner.lock().watchers.subscribe()
    }
}
