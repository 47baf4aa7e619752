//! Owner index
//!
//! Maps a child object to the UID of its controller owner so that children
//! can be looked up by owner. Only owners of the configured kind are indexed.
//!
//! The index is filled from a watch on the child kind (`maintain`) and is
//! shared by clones, so the store and the watch task see the same entries.

use crate::error::StoreError;
use futures::StreamExt;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::runtime::{WatchStreamExt, watcher};
use kube::{Api, Resource};
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Namespace and owner UID
type Bucket = (String, String);
/// Namespace and object name
type ObjectKey = (String, String);

struct IndexState<K> {
    buckets: HashMap<Bucket, BTreeMap<String, K>>,
    locations: HashMap<ObjectKey, Bucket>,
}

impl<K> Default for IndexState<K> {
    fn default() -> Self {
        Self {
            buckets: HashMap::new(),
            locations: HashMap::new(),
        }
    }
}

impl<K> IndexState<K> {
    fn remove(&mut self, key: &ObjectKey) {
        let Some(bucket) = self.locations.remove(key) else {
            return;
        };
        if let Some(objects) = self.buckets.get_mut(&bucket) {
            objects.remove(&key.1);
            if objects.is_empty() {
                self.buckets.remove(&bucket);
            }
        }
    }
}

/// Index of child objects of type `K` keyed by their controller owner's UID
pub struct OwnerIndex<K> {
    key: String,
    owner_kind: String,
    state: Arc<RwLock<IndexState<K>>>,
    synced: Arc<watch::Sender<bool>>,
}

impl<K> Clone for OwnerIndex<K> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            owner_kind: self.owner_kind.clone(),
            state: Arc::clone(&self.state),
            synced: Arc::clone(&self.synced),
        }
    }
}

impl<K> std::fmt::Debug for OwnerIndex<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnerIndex")
            .field("key", &self.key)
            .field("owner_kind", &self.owner_kind)
            .field("synced", &*self.synced.borrow())
            .finish_non_exhaustive()
    }
}

impl<K> OwnerIndex<K>
where
    K: Resource<DynamicType = ()> + Clone,
{
    /// Registers an index under `key` for children owned by `owner_kind`.
    ///
    /// Fails when either name is blank or when the owner kind equals the
    /// child kind.
    pub fn new(key: impl Into<String>, owner_kind: impl Into<String>) -> Result<Self, StoreError> {
        let key = key.into();
        let owner_kind = owner_kind.into();

        if key.trim().is_empty() {
            return Err(StoreError::InvalidIndex("index key must not be empty".to_string()));
        }
        if owner_kind.trim().is_empty() {
            return Err(StoreError::InvalidIndex(format!(
                "owner kind for index {} must not be empty",
                key
            )));
        }
        if owner_kind == K::kind(&()) {
            return Err(StoreError::InvalidIndex(format!(
                "index {}: {} cannot own objects of its own kind",
                key, owner_kind
            )));
        }

        let (synced, _) = watch::channel(false);
        Ok(Self {
            key,
            owner_kind,
            state: Arc::new(RwLock::new(IndexState::default())),
            synced: Arc::new(synced),
        })
    }

    /// Index key this index was registered under
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Owner kind this index accepts
    pub fn owner_kind(&self) -> &str {
        &self.owner_kind
    }

    /// Returns the index values for `obj`: the controller owner's UID when
    /// that owner is of the configured kind, otherwise nothing.
    pub fn index_values(&self, obj: &K) -> Vec<String> {
        controller_of(obj)
            .filter(|owner| owner.kind == self.owner_kind)
            .map(|owner| vec![owner.uid.clone()])
            .unwrap_or_default()
    }

    /// Filters `objects` down to those in `namespace` indexed under
    /// `owner_uid`, without touching the live entries.
    pub fn lookup(&self, objects: impl IntoIterator<Item = K>, namespace: &str, owner_uid: &str) -> Vec<K> {
        objects
            .into_iter()
            .filter(|obj| obj.meta().namespace.as_deref() == Some(namespace))
            .filter(|obj| self.index_values(obj).iter().any(|uid| uid == owner_uid))
            .collect()
    }

    /// Returns the indexed objects in `namespace` owned by `owner_uid`.
    pub fn get(&self, namespace: &str, owner_uid: &str) -> Vec<K> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .buckets
            .get(&(namespace.to_string(), owner_uid.to_string()))
            .map(|objects| objects.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Inserts or updates `obj`, moving it when its controller owner changed.
    pub fn apply(&self, obj: K) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        Self::apply_locked(&mut state, &self.index_values(&obj), obj);
    }

    /// Drops `obj` from the index.
    pub fn delete(&self, obj: &K) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.remove(&object_key(obj));
    }

    /// Replaces every entry with `objects` and marks the index as synced.
    pub fn replace(&self, objects: impl IntoIterator<Item = K>) {
        let mut fresh = IndexState::default();
        for obj in objects {
            let values = self.index_values(&obj);
            Self::apply_locked(&mut fresh, &values, obj);
        }
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = fresh;
        self.synced.send_replace(true);
    }

    /// Whether a full listing has been loaded
    pub fn is_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Resolves once a full listing has been loaded.
    pub async fn wait_synced(&self) {
        let mut rx = self.synced.subscribe();
        // The sender lives in `self`, so the channel cannot close here
        let _ = rx.wait_for(|synced| *synced).await;
    }

    fn apply_locked(state: &mut IndexState<K>, values: &[String], obj: K) {
        let key = object_key(&obj);
        state.remove(&key);
        let Some(uid) = values.first() else {
            return;
        };
        let bucket = (key.0.clone(), uid.clone());
        state
            .buckets
            .entry(bucket.clone())
            .or_default()
            .insert(key.1.clone(), obj);
        state.locations.insert(key, bucket);
    }
}

impl<K> OwnerIndex<K>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + std::fmt::Debug + Send + Sync + 'static,
{
    /// Keeps the index in step with the objects `api` can see.
    ///
    /// Each (re)list rebuilds the index; watch errors are logged and retried
    /// with the watcher's default backoff. Runs until the watch stream ends.
    pub async fn maintain(&self, api: Api<K>, config: watcher::Config) {
        info!("Starting {} index {} for owner kind {}", K::kind(&()), self.key, self.owner_kind);

        let mut events = watcher(api, config).default_backoff().boxed();
        let mut listing = Vec::new();
        while let Some(event) = events.next().await {
            match event {
                Ok(watcher::Event::Init) => listing.clear(),
                Ok(watcher::Event::InitApply(obj)) => listing.push(obj),
                Ok(watcher::Event::InitDone) => {
                    let count = listing.len();
                    self.replace(std::mem::take(&mut listing));
                    debug!("Index {} synced with {} objects", self.key, count);
                }
                Ok(watcher::Event::Apply(obj)) => self.apply(obj),
                Ok(watcher::Event::Delete(obj)) => self.delete(&obj),
                Err(e) => warn!("Watch for index {} failed: {}", self.key, e),
            }
        }
        warn!("Watch for index {} ended", self.key);
    }
}

fn object_key<K: Resource>(obj: &K) -> ObjectKey {
    let meta = obj.meta();
    (
        meta.namespace.clone().unwrap_or_default(),
        meta.name.clone().unwrap_or_default(),
    )
}

/// Returns the owner reference marked as controller, if any.
pub fn controller_of<K: Resource>(obj: &K) -> Option<&OwnerReference> {
    obj.meta()
        .owner_references
        .as_ref()?
        .iter()
        .find(|owner| owner.controller == Some(true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::batch::v1::Job;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn owner(kind: &str, uid: &str, controller: bool) -> OwnerReference {
        OwnerReference {
            api_version: "geofront.nerv.com/v1alpha1".to_string(),
            kind: kind.to_string(),
            name: "unit-01".to_string(),
            uid: uid.to_string(),
            controller: Some(controller),
            block_owner_deletion: Some(true),
        }
    }

    fn job(namespace: &str, name: &str, owners: Vec<OwnerReference>) -> Job {
        Job {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                owner_references: Some(owners),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn index() -> OwnerIndex<Job> {
        OwnerIndex::new(".metadata.controller", "Eva").unwrap()
    }

    #[test]
    fn test_new_rejects_blank_key() {
        let result = OwnerIndex::<Job>::new("  ", "Eva");
        assert!(matches!(result, Err(StoreError::InvalidIndex(_))));
    }

    #[test]
    fn test_new_rejects_blank_owner_kind() {
        let result = OwnerIndex::<Job>::new(".metadata.controller", "");
        assert!(matches!(result, Err(StoreError::InvalidIndex(_))));
    }

    #[test]
    fn test_new_rejects_self_owning_kind() {
        let result = OwnerIndex::<Job>::new(".metadata.controller", "Job");
        assert!(matches!(result, Err(StoreError::InvalidIndex(_))));
    }

    #[test]
    fn test_index_values_uses_controller_owner() {
        let job = job("default", "a", vec![owner("Eva", "uid-1", true)]);
        assert_eq!(index().index_values(&job), vec!["uid-1".to_string()]);
    }

    #[test]
    fn test_index_values_skips_non_controller_and_other_kinds() {
        let not_controller = job("default", "a", vec![owner("Eva", "uid-1", false)]);
        assert!(index().index_values(&not_controller).is_empty());

        let other_kind = job("default", "b", vec![owner("CronJob", "uid-2", true)]);
        assert!(index().index_values(&other_kind).is_empty());

        let orphan = Job::default();
        assert!(index().index_values(&orphan).is_empty());
    }

    #[test]
    fn test_lookup_filters_by_namespace_and_uid() {
        let jobs = vec![
            job("default", "mine", vec![owner("Eva", "uid-1", true)]),
            job("default", "theirs", vec![owner("Eva", "uid-2", true)]),
            job("other", "elsewhere", vec![owner("Eva", "uid-1", true)]),
        ];
        let found = index().lookup(jobs, "default", "uid-1");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].metadata.name.as_deref(), Some("mine"));
    }

    #[test]
    fn test_get_returns_applied_children() {
        let index = index();
        index.apply(job("default", "mine", vec![owner("Eva", "uid-1", true)]));
        index.apply(job("default", "theirs", vec![owner("Eva", "uid-2", true)]));
        index.apply(job("other", "elsewhere", vec![owner("Eva", "uid-1", true)]));
        index.apply(job("default", "orphan", Vec::new()));

        let found = index.get("default", "uid-1");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].metadata.name.as_deref(), Some("mine"));
        assert!(index.get("default", "uid-3").is_empty());
    }

    #[test]
    fn test_apply_moves_object_when_owner_changes() {
        let index = index();
        index.apply(job("default", "a", vec![owner("Eva", "uid-1", true)]));
        index.apply(job("default", "a", vec![owner("Eva", "uid-2", true)]));

        assert!(index.get("default", "uid-1").is_empty());
        assert_eq!(index.get("default", "uid-2").len(), 1);

        index.apply(job("default", "a", vec![owner("Eva", "uid-2", false)]));
        assert!(index.get("default", "uid-2").is_empty());
    }

    #[test]
    fn test_apply_updates_in_place() {
        let index = index();
        let mut first = job("default", "a", vec![owner("Eva", "uid-1", true)]);
        first.metadata.resource_version = Some("1".to_string());
        let mut second = first.clone();
        second.metadata.resource_version = Some("2".to_string());

        index.apply(first);
        index.apply(second);

        let found = index.get("default", "uid-1");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].metadata.resource_version.as_deref(), Some("2"));
    }

    #[test]
    fn test_delete_removes_entry() {
        let index = index();
        let child = job("default", "a", vec![owner("Eva", "uid-1", true)]);
        index.apply(child.clone());
        index.delete(&child);
        assert!(index.get("default", "uid-1").is_empty());
    }

    #[test]
    fn test_replace_rebuilds_and_marks_synced() {
        let index = index();
        assert!(!index.is_synced());
        index.apply(job("default", "stale", vec![owner("Eva", "uid-1", true)]));

        index.replace(vec![job("default", "fresh", vec![owner("Eva", "uid-1", true)])]);

        assert!(index.is_synced());
        let found = index.get("default", "uid-1");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].metadata.name.as_deref(), Some("fresh"));
    }

    #[test]
    fn test_clones_share_entries() {
        let index = index();
        let shared = index.clone();
        index.apply(job("default", "a", vec![owner("Eva", "uid-1", true)]));
        assert_eq!(shared.get("default", "uid-1").len(), 1);
        assert_eq!(shared.owner_kind(), "Eva");
    }

    #[tokio::test]
    async fn test_wait_synced_resolves_after_replace() {
        let index = index();
        let waiter = {
            let index = index.clone();
            tokio::spawn(async move { index.wait_synced().await })
        };
        index.replace(Vec::new());
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
