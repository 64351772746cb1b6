//! In-memory object store for testing
//!
//! Behaves like a small API server: it assigns resourceVersions, bumps
//! `metadata.generation` when the spec changes, rejects stale updates and
//! keeps `status` behind a separate subresource. Tests play the downstream
//! controller by registering reactors that mutate an object whenever it is
//! read.

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::DynamicObject;
use kube::core::ErrorResponse;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{Labels, ObjectStore, matches_labels, spec};
use crate::error::{KubeError, Result};
use trellis_core::{ObjectKey, ResourceKind};

/// Simulated controller: runs against the stored object on every `get`
pub type Reactor = Box<dyn FnMut(&mut DynamicObject) + Send>;

/// In-memory object store for testing
#[derive(Clone, Default)]
pub struct MockStore {
    state: Arc<Mutex<State>>,
}

/// Counts of operations performed for testing assertions
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OperationCounts {
    pub gets: usize,
    pub lists: usize,
    pub creates: usize,
    pub updates: usize,
    pub patches: usize,
    pub deletes: usize,
    /// Writes rejected because of a stale resourceVersion or a lost create race
    pub conflicts: usize,
}

impl OperationCounts {
    /// Every request that changed (or tried to change) an object
    pub fn writes(&self) -> usize {
        self.creates + self.updates + self.patches + self.deletes
    }
}

#[derive(Default)]
struct State {
    objects: HashMap<ObjectKey, DynamicObject>,
    resource_version: u64,
    counts: OperationCounts,
    /// Updates still to be rejected as if another writer got there first
    conflicts: HashMap<ObjectKey, usize>,
    /// Gets still to fail with a server error
    errors: HashMap<ObjectKey, usize>,
    /// Gets an object survives after deletion was requested
    deletion_holds: HashMap<ObjectKey, usize>,
    /// Objects being deleted and the gets they still survive
    terminating: HashMap<ObjectKey, usize>,
    reactors: HashMap<ObjectKey, Reactor>,
}

impl State {
    fn next_resource_version(&mut self) -> String {
        self.resource_version += 1;
        self.resource_version.to_string()
    }
}

impl MockStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store an object as-is, bypassing admission, for test setup
    pub fn insert(&self, key: &ObjectKey, mut object: DynamicObject) {
        let mut state = self.state();
        object.metadata.name = Some(key.name.clone());
        object.metadata.namespace = Some(key.namespace.clone());
        object.metadata.resource_version = Some(state.next_resource_version());
        if object.metadata.generation.is_none() {
            object.metadata.generation = Some(1);
        }
        state.objects.insert(key.clone(), object);
    }

    /// Replace the status of a stored object, as its controller would
    pub fn set_status(&self, key: &ObjectKey, status: Value) {
        let mut state = self.state();
        let version = state.next_resource_version();
        if let Some(object) = state.objects.get_mut(key) {
            object.data["status"] = status;
            object.metadata.resource_version = Some(version);
        }
    }

    /// Run `reactor` against the object every time it is read
    pub fn set_reactor(&self, key: &ObjectKey, reactor: impl FnMut(&mut DynamicObject) + Send + 'static) {
        self.state().reactors.insert(key.clone(), Box::new(reactor));
    }

    /// Reject the next `count` updates of `key` with a conflict
    ///
    /// Each rejection also bumps the stored resourceVersion, as the
    /// competing write would have.
    pub fn inject_conflicts(&self, key: &ObjectKey, count: usize) {
        self.state().conflicts.insert(key.clone(), count);
    }

    /// Fail the next `count` reads of `key` with a server error
    pub fn inject_errors(&self, key: &ObjectKey, count: usize) {
        self.state().errors.insert(key.clone(), count);
    }

    /// Keep `key` around for `gets` reads after deletion, like a finalizer would
    pub fn hold_deletion(&self, key: &ObjectKey, gets: usize) {
        self.state().deletion_holds.insert(key.clone(), gets);
    }

    /// Finish a held deletion immediately
    pub fn finalize(&self, key: &ObjectKey) {
        let mut state = self.state();
        if state.terminating.remove(key).is_some() {
            state.objects.remove(key);
        }
    }

    /// Read an object without counting the request or running reactors
    pub fn object(&self, key: &ObjectKey) -> Option<DynamicObject> {
        self.state().objects.get(key).cloned()
    }

    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.state().objects.contains_key(key)
    }

    /// Names of all stored objects of `kind` in `namespace`, sorted
    pub fn names(&self, kind: &ResourceKind, namespace: &str) -> Vec<String> {
        let state = self.state();
        let mut names: Vec<String> = state
            .objects
            .keys()
            .filter(|key| &key.kind == kind && key.namespace == namespace)
            .map(|key| key.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Get operation counts for assertions
    pub fn operation_counts(&self) -> OperationCounts {
        self.state().counts.clone()
    }

    /// Reset operation counts
    pub fn reset_counts(&self) {
        self.state().counts = OperationCounts::default();
    }
}

fn server_error(key: &ObjectKey) -> KubeError {
    KubeError::Api(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: format!("injected failure reading {}", key),
        reason: "ServiceUnavailable".to_string(),
        code: 503,
    }))
}

/// Apply an RFC 7386 JSON merge patch
pub(crate) fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(entries) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(map) = target {
        for (key, value) in entries {
            if value.is_null() {
                map.remove(key);
            } else {
                merge_patch(map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

fn patched(object: &DynamicObject, patch: &Value) -> Result<DynamicObject> {
    let mut value = serde_json::to_value(object)?;
    merge_patch(&mut value, patch);
    Ok(serde_json::from_value(value)?)
}

#[async_trait]
impl ObjectStore for MockStore {
    async fn get(&self, key: &ObjectKey) -> Result<DynamicObject> {
        tokio::task::yield_now().await;
        let mut guard = self.state();
        let state = &mut *guard;
        state.counts.gets += 1;

        if let Some(remaining) = state.errors.get_mut(key)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(server_error(key));
        }

        if let Some(remaining) = state.terminating.get_mut(key) {
            if *remaining == 0 {
                state.terminating.remove(key);
                state.objects.remove(key);
            } else {
                *remaining -= 1;
            }
        }

        let version = state.next_resource_version();
        let object = state
            .objects
            .get_mut(key)
            .ok_or_else(|| KubeError::NotFound { key: key.to_string() })?;

        if let Some(reactor) = state.reactors.get_mut(key) {
            reactor(object);
            object.metadata.resource_version = Some(version);
        }

        Ok(object.clone())
    }

    async fn list(&self, kind: &ResourceKind, namespace: &str, labels: &Labels) -> Result<Vec<DynamicObject>> {
        tokio::task::yield_now().await;
        let mut state = self.state();
        state.counts.lists += 1;

        let mut items: Vec<(&ObjectKey, &DynamicObject)> = state
            .objects
            .iter()
            .filter(|(key, _)| &key.kind == kind && key.namespace == namespace)
            .filter(|(_, object)| matches_labels(&super::labels(object), labels))
            .collect();
        items.sort_by(|a, b| a.0.name.cmp(&b.0.name));
        Ok(items.into_iter().map(|(_, object)| object.clone()).collect())
    }

    async fn create(&self, key: &ObjectKey, object: &DynamicObject) -> Result<DynamicObject> {
        tokio::task::yield_now().await;
        let mut state = self.state();
        state.counts.creates += 1;

        if state.objects.contains_key(key) {
            state.counts.conflicts += 1;
            return Err(KubeError::AlreadyExists { key: key.to_string() });
        }

        let mut created = object.clone();
        created.metadata.name = Some(key.name.clone());
        created.metadata.namespace = Some(key.namespace.clone());
        created.metadata.resource_version = Some(state.next_resource_version());
        created.metadata.generation = Some(1);
        created.metadata.creation_timestamp = Some(Time(Utc::now()));
        if let Value::Object(data) = &mut created.data {
            data.remove("status");
        }

        state.objects.insert(key.clone(), created.clone());
        Ok(created)
    }

    async fn update(&self, key: &ObjectKey, object: &DynamicObject) -> Result<DynamicObject> {
        tokio::task::yield_now().await;
        let mut guard = self.state();
        let state = &mut *guard;
        state.counts.updates += 1;

        if !state.objects.contains_key(key) {
            return Err(KubeError::NotFound { key: key.to_string() });
        }

        if let Some(remaining) = state.conflicts.get_mut(key)
            && *remaining > 0
        {
            *remaining -= 1;
            state.counts.conflicts += 1;
            let version = state.next_resource_version();
            if let Some(stored) = state.objects.get_mut(key) {
                stored.metadata.resource_version = Some(version);
            }
            return Err(KubeError::Conflict { key: key.to_string() });
        }

        let version = state.next_resource_version();
        let stored = state
            .objects
            .get_mut(key)
            .ok_or_else(|| KubeError::NotFound { key: key.to_string() })?;

        if object.metadata.resource_version.is_some()
            && object.metadata.resource_version != stored.metadata.resource_version
        {
            state.counts.conflicts += 1;
            return Err(KubeError::Conflict { key: key.to_string() });
        }

        let mut updated = object.clone();
        updated.metadata.name = Some(key.name.clone());
        updated.metadata.namespace = Some(key.namespace.clone());
        updated.metadata.resource_version = Some(version);
        updated.metadata.creation_timestamp = stored.metadata.creation_timestamp.clone();
        updated.metadata.deletion_timestamp = stored.metadata.deletion_timestamp.clone();
        let generation = stored.metadata.generation.unwrap_or(1);
        updated.metadata.generation = Some(if spec(&updated) != spec(stored) {
            generation + 1
        } else {
            generation
        });
        match super::status(stored).cloned() {
            Some(status) => updated.data["status"] = status,
            None => {
                if let Value::Object(data) = &mut updated.data {
                    data.remove("status");
                }
            }
        }

        *stored = updated.clone();
        Ok(updated)
    }

    async fn patch(&self, key: &ObjectKey, patch: &Value) -> Result<DynamicObject> {
        tokio::task::yield_now().await;
        let mut guard = self.state();
        let state = &mut *guard;
        state.counts.patches += 1;

        let version = state.next_resource_version();
        let stored = state
            .objects
            .get_mut(key)
            .ok_or_else(|| KubeError::NotFound { key: key.to_string() })?;

        let mut patch = patch.clone();
        if let Value::Object(entries) = &mut patch {
            entries.remove("status");
        }
        let mut updated = patched(stored, &patch)?;
        updated.metadata.resource_version = Some(version);
        if spec(&updated) != spec(stored) {
            updated.metadata.generation = Some(stored.metadata.generation.unwrap_or(1) + 1);
        }

        *stored = updated.clone();
        Ok(updated)
    }

    async fn patch_status(&self, key: &ObjectKey, patch: &Value) -> Result<DynamicObject> {
        tokio::task::yield_now().await;
        let mut guard = self.state();
        let state = &mut *guard;
        state.counts.patches += 1;

        let version = state.next_resource_version();
        let stored = state
            .objects
            .get_mut(key)
            .ok_or_else(|| KubeError::NotFound { key: key.to_string() })?;

        let status_patch = serde_json::json!({ "status": patch });
        let mut updated = patched(stored, &status_patch)?;
        updated.metadata.resource_version = Some(version);

        *stored = updated.clone();
        Ok(updated)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        tokio::task::yield_now().await;
        let mut guard = self.state();
        let state = &mut *guard;
        state.counts.deletes += 1;

        if !state.objects.contains_key(key) {
            return Err(KubeError::NotFound { key: key.to_string() });
        }

        match state.deletion_holds.remove(key) {
            Some(gets) => {
                if let Some(object) = state.objects.get_mut(key) {
                    object.metadata.deletion_timestamp = Some(Time(Utc::now()));
                }
                state.terminating.insert(key.clone(), gets);
            }
            None if state.terminating.contains_key(key) => {}
            None => {
                state.objects.remove(key);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::new_object;
    use serde_json::json;

    fn bundle_key() -> ObjectKey {
        ObjectKey::managed_resource("ns1", "n1")
    }

    fn bundle(spec: Value) -> DynamicObject {
        let mut object = new_object(&bundle_key());
        object.data["spec"] = spec;
        object
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = MockStore::new();
        let created = store
            .create(&bundle_key(), &bundle(json!({"secretRefs": []})))
            .await
            .unwrap();
        assert_eq!(created.metadata.generation, Some(1));
        assert!(created.metadata.resource_version.is_some());

        let fetched = store.get(&bundle_key()).await.unwrap();
        assert_eq!(fetched.metadata.resource_version, created.metadata.resource_version);

        let counts = store.operation_counts();
        assert_eq!(counts.creates, 1);
        assert_eq!(counts.gets, 1);
    }

    #[tokio::test]
    async fn test_create_duplicate_fails() {
        let store = MockStore::new();
        let object = bundle(json!({}));
        store.create(&bundle_key(), &object).await.unwrap();
        let result = store.create(&bundle_key(), &object).await;
        assert!(result.unwrap_err().is_already_exists());
        assert_eq!(store.operation_counts().conflicts, 1);
    }

    #[tokio::test]
    async fn test_get_not_found() {
        let store = MockStore::new();
        assert!(store.get(&bundle_key()).await.unwrap_err().is_not_found());
        assert!(store.get_opt(&bundle_key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_rejects_stale_resource_version() {
        let store = MockStore::new();
        let created = store.create(&bundle_key(), &bundle(json!({"a": 1}))).await.unwrap();

        let mut first = created.clone();
        first.data["spec"] = json!({"a": 2});
        let updated = store.update(&bundle_key(), &first).await.unwrap();
        assert_eq!(updated.metadata.generation, Some(2));

        let mut stale = created;
        stale.data["spec"] = json!({"a": 3});
        assert!(store.update(&bundle_key(), &stale).await.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn test_update_without_spec_change_keeps_generation() {
        let store = MockStore::new();
        let created = store.create(&bundle_key(), &bundle(json!({"a": 1}))).await.unwrap();
        let mut same = created.clone();
        same.metadata.labels = Some([("x".to_string(), "y".to_string())].into_iter().collect());
        let updated = store.update(&bundle_key(), &same).await.unwrap();
        assert_eq!(updated.metadata.generation, Some(1));
    }

    #[tokio::test]
    async fn test_status_is_a_subresource() {
        let store = MockStore::new();
        let created = store.create(&bundle_key(), &bundle(json!({}))).await.unwrap();
        store
            .patch_status(&bundle_key(), &json!({"observedGeneration": 1}))
            .await
            .unwrap();

        let mut overwrite = store.get(&bundle_key()).await.unwrap();
        overwrite.data["status"] = json!({"observedGeneration": 99});
        let updated = store.update(&bundle_key(), &overwrite).await.unwrap();
        assert_eq!(updated.data["status"]["observedGeneration"], 1);
        assert_eq!(updated.metadata.generation, created.metadata.generation);
    }

    #[tokio::test]
    async fn test_patch_merges_annotations() {
        let store = MockStore::new();
        store.create(&bundle_key(), &bundle(json!({}))).await.unwrap();
        store
            .patch(&bundle_key(), &json!({"metadata": {"annotations": {"a": "1", "b": "2"}}}))
            .await
            .unwrap();
        let patched = store
            .patch(&bundle_key(), &json!({"metadata": {"annotations": {"a": null}}}))
            .await
            .unwrap();
        let annotations = patched.metadata.annotations.unwrap();
        assert!(!annotations.contains_key("a"));
        assert_eq!(annotations.get("b").map(String::as_str), Some("2"));
        assert_eq!(patched.metadata.generation, Some(1));
    }

    #[tokio::test]
    async fn test_injected_conflicts() {
        let store = MockStore::new();
        let created = store.create(&bundle_key(), &bundle(json!({}))).await.unwrap();
        store.inject_conflicts(&bundle_key(), 1);

        assert!(store.update(&bundle_key(), &created).await.unwrap_err().is_conflict());
        // the competing write moved the resourceVersion on
        assert!(store.update(&bundle_key(), &created).await.unwrap_err().is_conflict());
        let fresh = store.get(&bundle_key()).await.unwrap();
        assert!(store.update(&bundle_key(), &fresh).await.is_ok());
        assert_eq!(store.operation_counts().conflicts, 2);
    }

    #[tokio::test]
    async fn test_held_deletion() {
        let store = MockStore::new();
        store.create(&bundle_key(), &bundle(json!({}))).await.unwrap();
        store.hold_deletion(&bundle_key(), 2);
        store.delete(&bundle_key()).await.unwrap();

        let terminating = store.get(&bundle_key()).await.unwrap();
        assert!(terminating.metadata.deletion_timestamp.is_some());
        assert!(store.get(&bundle_key()).await.is_ok());
        assert!(store.get(&bundle_key()).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_reactor_runs_on_get() {
        let store = MockStore::new();
        store.create(&bundle_key(), &bundle(json!({}))).await.unwrap();
        let mut polls = 0;
        store.set_reactor(&bundle_key(), move |object| {
            polls += 1;
            object.data["status"] = json!({"polls": polls});
        });
        store.get(&bundle_key()).await.unwrap();
        let object = store.get(&bundle_key()).await.unwrap();
        assert_eq!(object.data["status"]["polls"], 2);
    }

    #[tokio::test]
    async fn test_injected_errors() {
        let store = MockStore::new();
        store.create(&bundle_key(), &bundle(json!({}))).await.unwrap();
        store.inject_errors(&bundle_key(), 1);
        let err = store.get(&bundle_key()).await.unwrap_err();
        assert!(!err.is_not_found());
        assert!(store.get(&bundle_key()).await.is_ok());
    }

    #[tokio::test]
    async fn test_list_filters_by_labels() {
        let store = MockStore::new();
        for (name, pool) in [("a", "p1"), ("b", "p2")] {
            let key = ObjectKey::managed_resource("ns1", name);
            let mut object = new_object(&key);
            object.metadata.labels = Some([("pool".to_string(), pool.to_string())].into_iter().collect());
            store.create(&key, &object).await.unwrap();
        }
        let mut selector = Labels::new();
        selector.insert("pool".to_string(), "p2".to_string());
        let items = store
            .list(&ResourceKind::managed_resource(), "ns1", &selector)
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].metadata.name.as_deref(), Some("b"));
        assert_eq!(
            store.names(&ResourceKind::managed_resource(), "ns1"),
            vec!["a".to_string(), "b".to_string()]
        );
    }

    #[test]
    fn test_merge_patch() {
        let mut target = json!({"a": {"b": 1, "c": 2}, "d": [1, 2]});
        merge_patch(&mut target, &json!({"a": {"b": null, "e": 3}, "d": [3]}));
        assert_eq!(target, json!({"a": {"c": 2, "e": 3}, "d": [3]}));
    }
}
