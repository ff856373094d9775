//! Resource stores.
//!
//! The reconciler only needs to read one object and write it back whole, so
//! the store surface is limited to `get` and `update`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use kube::api::{Api, PostParams};
use kube::Client;
use sempex_core::{Cluster, ObjectKey};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::error::{Error, Result};

/// Trait for loading and writing `Cluster` objects.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Load the object for `key`; `None` if it does not exist.
    async fn get(&self, key: &ObjectKey) -> Result<Option<Cluster>>;

    /// Replace the stored object with `cluster`.
    ///
    /// Must fail with `Error::Conflict` if the stored version is no longer the
    /// one `cluster` was read at.
    async fn update(&self, cluster: &Cluster) -> Result<Cluster>;
}

/// Store backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeResourceStore {
    client: Client,
}

impl KubeResourceStore {
    /// Create a new store.
    pub const fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, key: &ObjectKey) -> Api<Cluster> {
        match &key.namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }
}

#[async_trait]
impl ResourceStore for KubeResourceStore {
    async fn get(&self, key: &ObjectKey) -> Result<Option<Cluster>> {
        match self.api(key).get(&key.name).await {
            Ok(cluster) => Ok(Some(cluster)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(classify(key, e)),
        }
    }

    async fn update(&self, cluster: &Cluster) -> Result<Cluster> {
        let key = ObjectKey::from_resource(cluster)?;
        // PUT carries metadata.resourceVersion; the API server answers 409 if it is stale.
        let stored = self
            .api(&key)
            .replace(&key.name, &PostParams::default(), cluster)
            .await
            .map_err(|e| classify(&key, e))?;
        debug!(key = %key, version = ?stored.resource_version(), "Replaced cluster");
        Ok(stored)
    }
}

/// Map an API failure onto the reconciler's error taxonomy.
pub fn classify(key: &ObjectKey, err: kube::Error) -> Error {
    match err {
        kube::Error::Api(ae) if ae.code == 409 => Error::conflict(key, ae.message),
        other => Error::store(key, other.to_string()),
    }
}

/// Failure to inject into the next [`InMemoryResourceStore::update`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateFault {
    /// Reject as if a concurrent writer got there first.
    Conflict,
    /// Reject as if the store were unreachable.
    Unavailable,
}

/// In-memory store with resource-version checks.
///
/// Every write assigns a fresh version, and `update` only succeeds against the
/// version the caller read.
#[derive(Default)]
pub struct InMemoryResourceStore {
    objects: RwLock<HashMap<ObjectKey, Cluster>>,
    version: AtomicU64,
    gets: AtomicUsize,
    updates: AtomicUsize,
    fault: Mutex<Option<UpdateFault>>,
}

impl InMemoryResourceStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn next_version(&self) -> String {
        self.version
            .fetch_add(1, Ordering::SeqCst)
            .saturating_add(1)
            .to_string()
    }

    /// Insert or overwrite an object directly, bypassing version checks.
    ///
    /// # Errors
    ///
    /// Returns an error if the object has no name.
    pub async fn insert(&self, mut cluster: Cluster) -> Result<ObjectKey> {
        let key = ObjectKey::from_resource(&cluster)?;
        cluster.metadata.resource_version = Some(self.next_version());
        self.objects.write().await.insert(key.clone(), cluster);
        Ok(key)
    }

    /// Simulate an external edit of `spec.certificate`.
    ///
    /// Returns `false` if no such object exists.
    pub async fn edit_certificate(&self, key: &ObjectKey, certificate: i64) -> bool {
        let version = self.next_version();
        let mut objects = self.objects.write().await;
        objects.get_mut(key).is_some_and(|cluster| {
            cluster.spec.certificate = certificate;
            cluster.metadata.resource_version = Some(version);
            true
        })
    }

    /// Remove an object.
    pub async fn remove(&self, key: &ObjectKey) -> Option<Cluster> {
        self.objects.write().await.remove(key)
    }

    /// Current stored copy of an object.
    pub async fn snapshot(&self, key: &ObjectKey) -> Option<Cluster> {
        self.objects.read().await.get(key).cloned()
    }

    /// Fail the next `update` call with `fault`.
    pub async fn fail_next_update(&self, fault: UpdateFault) {
        *self.fault.lock().await = Some(fault);
    }

    /// Number of `get` calls so far.
    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    /// Number of `update` calls so far, including rejected ones.
    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResourceStore for InMemoryResourceStore {
    async fn get(&self, key: &ObjectKey) -> Result<Option<Cluster>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        Ok(self.objects.read().await.get(key).cloned())
    }

    async fn update(&self, cluster: &Cluster) -> Result<Cluster> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        let key = ObjectKey::from_resource(cluster)?;

        if let Some(fault) = self.fault.lock().await.take() {
            return Err(match fault {
                UpdateFault::Conflict => Error::conflict(&key, "injected conflict"),
                UpdateFault::Unavailable => Error::store(&key, "injected outage"),
            });
        }

        let mut objects = self.objects.write().await;
        let Some(stored) = objects.get(&key) else {
            return Err(Error::store(&key, "object not found"));
        };
        if stored.resource_version() != cluster.resource_version() {
            return Err(Error::conflict(
                &key,
                format!(
                    "stored version {:?} does not match {:?}",
                    stored.resource_version(),
                    cluster.resource_version()
                ),
            ));
        }

        let mut next = cluster.clone();
        next.metadata.resource_version = Some(self.next_version());
        objects.insert(key, next.clone());
        Ok(next)
    }
}
