//! Kind/resource resolution via live discovery
//!
//! Every GVK used for I/O goes through `TypeResolver` first: discovery maps
//! the kind to its REST collection (the plural) and tells us whether the
//! resource is namespaced. Results are cached per GVK for the lifetime of
//! the process. Plural names are never guessed.

use std::collections::HashMap;
use std::sync::RwLock;

use kube::core::GroupVersionKind;
use kube::discovery::{ApiCapabilities, ApiResource, Discovery};
use kube::Client;

use xrdiff_core::object::api_version_of;

use crate::error::{KubeError, Result};

/// API groups served by the cluster itself rather than by CRDs. Anything
/// outside this set (and outside `*.k8s.io`) is assumed to need a CRD.
const BUILT_IN_GROUPS: &[&str] = &[
    "",
    "apps",
    "batch",
    "extensions",
    "policy",
    "autoscaling",
    "events.k8s.io",
    "networking.k8s.io",
    "rbac.authorization.k8s.io",
    "storage.k8s.io",
    "apiextensions.k8s.io",
    "apiregistration.k8s.io",
    "admissionregistration.k8s.io",
    "authentication.k8s.io",
    "authorization.k8s.io",
    "certificates.k8s.io",
    "coordination.k8s.io",
    "discovery.k8s.io",
    "flowcontrol.apiserver.k8s.io",
    "node.k8s.io",
    "scheduling.k8s.io",
];

/// Whether a GVK's group requires a CustomResourceDefinition to be served.
///
/// Fail-closed: unknown groups are assumed CRD-backed.
pub fn group_requires_crd(gvk: &GroupVersionKind) -> bool {
    let group = gvk.group.as_str();
    if BUILT_IN_GROUPS.contains(&group) {
        return false;
    }
    if group.ends_with(".k8s.io") {
        return false;
    }
    true
}

/// Maps Kind<->Resource via live discovery, with per-GVK caching.
pub struct TypeResolver {
    client: Client,
    discovery: tokio::sync::RwLock<Option<Discovery>>,
    gvr_cache: RwLock<HashMap<String, (ApiResource, ApiCapabilities)>>,
    crd_cache: RwLock<HashMap<String, bool>>,
}

fn cache_key(gvk: &GroupVersionKind) -> String {
    format!("{}/{}/{}", gvk.group, gvk.version, gvk.kind)
}

impl TypeResolver {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            discovery: tokio::sync::RwLock::new(None),
            gvr_cache: RwLock::new(HashMap::new()),
            crd_cache: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve a GVK to its API resource (plural + scope). Failure to
    /// resolve is fatal for the operation that needed it.
    pub async fn resolve_gvr(&self, gvk: &GroupVersionKind) -> Result<(ApiResource, ApiCapabilities)> {
        let key = cache_key(gvk);
        if let Some(found) = self.gvr_cache.read().expect("gvr cache poisoned").get(&key) {
            return Ok(found.clone());
        }

        self.ensure_discovery().await?;

        let guard = self.discovery.read().await;
        let discovery = guard.as_ref().expect("discovery initialized above");
        let (ar, caps) = discovery.resolve_gvk(gvk).ok_or_else(|| KubeError::Discovery {
            api_version: api_version_of(gvk),
        })?;

        self.gvr_cache
            .write()
            .expect("gvr cache poisoned")
            .insert(key, (ar.clone(), caps.clone()));

        Ok((ar, caps))
    }

    /// Whether diffing objects of this GVK needs a CRD fetched for schema
    /// validation. Unknown groups answer `true` (fail-closed).
    pub async fn is_crd_required(&self, gvk: &GroupVersionKind) -> bool {
        let key = cache_key(gvk);
        if let Some(found) = self.crd_cache.read().expect("crd cache poisoned").get(&key) {
            return *found;
        }

        let required = group_requires_crd(gvk);
        self.crd_cache
            .write()
            .expect("crd cache poisoned")
            .insert(key, required);

        required
    }

    async fn ensure_discovery(&self) -> Result<()> {
        if self.discovery.read().await.is_some() {
            return Ok(());
        }

        let mut guard = self.discovery.write().await;
        if guard.is_none() {
            let discovery = Discovery::new(self.client.clone()).run().await?;
            *guard = Some(discovery);
        }
        Ok(())
    }
}
