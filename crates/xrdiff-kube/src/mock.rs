//! In-memory cluster client for testing
//!
//! Stores fixtures in memory and answers the full `ClusterClient` surface
//! without a cluster. Operation counts are tracked so tests can assert
//! caching behavior (e.g. that the XRD list hits the backend exactly once).

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use kube::core::{DynamicObject, GroupVersionKind};

use xrdiff_core::object::{gvk_of, string_at};
use xrdiff_core::{Composition, Function, Xrd};

use crate::client::{ClusterClient, ResourceTree};
use crate::composition::{functions_from_pipeline, CompositionMatcher};
use crate::discovery::group_requires_crd;
use crate::error::{KubeError, Result, ResultExt};

/// Counts of operations performed, for caching assertions.
#[derive(Debug, Default, Clone)]
pub struct OperationCounts {
    /// Underlying XRD list calls (cache misses only)
    pub xrd_lists: usize,
    pub resource_gets: usize,
    pub label_lists: usize,
    pub crd_gets: usize,
    pub dry_run_applies: usize,
    pub tree_walks: usize,
}

/// In-memory `ClusterClient` with builder-style fixture population.
#[derive(Default)]
pub struct MockClusterClient {
    compositions: HashMap<String, Composition>,
    functions: HashMap<String, Function>,
    xrds: Vec<Xrd>,
    xrds_loaded: AtomicBool,
    resources: Vec<DynamicObject>,
    environment_configs: Vec<DynamicObject>,
    crds: HashMap<String, DynamicObject>,
    dry_run_projections: HashMap<String, DynamicObject>,
    xrd_list_error: Option<String>,
    dry_run_error: Option<String>,
    operations: RwLock<OperationCounts>,
}

fn object_key(api_version: &str, kind: &str, name: &str) -> String {
    format!("{api_version}|{kind}|{name}")
}

impl MockClusterClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_compositions(mut self, compositions: Vec<Composition>) -> Self {
        for c in compositions {
            self.compositions.insert(c.name.clone(), c);
        }
        self
    }

    pub fn with_functions(mut self, functions: Vec<Function>) -> Self {
        for f in functions {
            self.functions.insert(f.name.clone(), f);
        }
        self
    }

    pub fn with_xrds(mut self, xrds: Vec<Xrd>) -> Self {
        self.xrds = xrds;
        self
    }

    /// Seed live cluster objects answered by get/list operations.
    pub fn with_resources(mut self, resources: Vec<DynamicObject>) -> Self {
        self.resources.extend(resources);
        self
    }

    pub fn with_environment_configs(mut self, configs: Vec<DynamicObject>) -> Self {
        self.environment_configs = configs;
        self
    }

    /// Seed a CRD answered by `get_crd` for the given kind.
    pub fn with_crd(mut self, kind: &str, crd: DynamicObject) -> Self {
        self.crds.insert(kind.to_string(), crd);
        self
    }

    /// Replace the dry-run echo for one object with a server projection.
    pub fn with_dry_run_projection(mut self, projected: DynamicObject) -> Self {
        if let (Some(tm), Some(name)) = (projected.types.clone(), projected.metadata.name.clone()) {
            self.dry_run_projections
                .insert(object_key(&tm.api_version, &tm.kind, &name), projected);
        }
        self
    }

    pub fn fail_xrd_list(mut self, message: &str) -> Self {
        self.xrd_list_error = Some(message.to_string());
        self
    }

    pub fn fail_dry_run(mut self, message: &str) -> Self {
        self.dry_run_error = Some(message.to_string());
        self
    }

    pub fn operation_counts(&self) -> OperationCounts {
        self.operations.read().expect("counts poisoned").clone()
    }

    fn count(&self, bump: impl FnOnce(&mut OperationCounts)) {
        bump(&mut self.operations.write().expect("counts poisoned"));
    }

    fn labels_match(obj: &DynamicObject, selector: &BTreeMap<String, String>) -> bool {
        let labels = obj.metadata.labels.clone().unwrap_or_default();
        selector.iter().all(|(k, v)| labels.get(k) == Some(v))
    }

    fn find(&self, gvk: &GroupVersionKind, namespace: Option<&str>, name: &str) -> Option<DynamicObject> {
        self.resources
            .iter()
            .find(|obj| {
                let Ok(obj_gvk) = gvk_of(obj) else { return false };
                if obj_gvk != *gvk || obj.metadata.name.as_deref() != Some(name) {
                    return false;
                }
                match (namespace, obj.metadata.namespace.as_deref()) {
                    (Some(ns), Some(obj_ns)) if !ns.is_empty() => ns == obj_ns,
                    _ => true,
                }
            })
            .cloned()
    }
}

#[async_trait]
impl ClusterClient for MockClusterClient {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn get_environment_configs(&self) -> Result<Vec<DynamicObject>> {
        Ok(self.environment_configs.clone())
    }

    async fn get_xrds(&self) -> Result<Vec<Xrd>> {
        if self.xrds_loaded.load(Ordering::Acquire) {
            return Ok(self.xrds.clone());
        }

        if let Some(message) = &self.xrd_list_error {
            return Err(KubeError::Other(message.clone())).context("cannot list XRDs");
        }

        self.count(|c| c.xrd_lists += 1);
        self.xrds_loaded.store(true, Ordering::Release);
        Ok(self.xrds.clone())
    }

    async fn get_all_resources_by_labels(
        &self,
        gvks: &[GroupVersionKind],
        selectors: &[BTreeMap<String, String>],
    ) -> Result<Vec<DynamicObject>> {
        if gvks.len() != selectors.len() {
            return Err(KubeError::SelectorMismatch);
        }

        let mut all = Vec::new();
        for (gvk, selector) in gvks.iter().zip(selectors) {
            all.extend(self.get_resources_by_label(None, gvk, selector).await?);
        }
        Ok(all)
    }

    async fn get_resource(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<DynamicObject> {
        self.count(|c| c.resource_gets += 1);
        self.find(gvk, namespace, name).ok_or_else(|| KubeError::NotFound {
            kind: gvk.kind.clone(),
            name: name.to_string(),
        })
    }

    async fn get_resources_by_label(
        &self,
        namespace: Option<&str>,
        gvk: &GroupVersionKind,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<DynamicObject>> {
        self.count(|c| c.label_lists += 1);

        Ok(self
            .resources
            .iter()
            .filter(|obj| {
                let Ok(obj_gvk) = gvk_of(obj) else { return false };
                if obj_gvk != *gvk || !Self::labels_match(obj, selector) {
                    return false;
                }
                match (namespace, obj.metadata.namespace.as_deref()) {
                    (Some(ns), Some(obj_ns)) if !ns.is_empty() => ns == obj_ns,
                    _ => true,
                }
            })
            .cloned()
            .collect())
    }

    async fn get_resource_tree(&self, root: &DynamicObject) -> Result<ResourceTree> {
        self.count(|c| c.tree_walks += 1);

        let live_root = root
            .metadata
            .name
            .as_deref()
            .and_then(|name| gvk_of(root).ok().and_then(|gvk| self.find(&gvk, None, name)));
        let Some(live_root) = live_root else {
            return Ok(ResourceTree {
                root: root.clone(),
                children: Vec::new(),
            });
        };

        let refs = live_root
            .data
            .get("spec")
            .and_then(|s| s.get("resourceRefs"))
            .and_then(|r| r.as_array())
            .cloned()
            .unwrap_or_default();

        let mut children = Vec::new();
        for r in &refs {
            let (Some(api_version), Some(kind), Some(name)) = (
                string_at(r, &["apiVersion"]),
                string_at(r, &["kind"]),
                string_at(r, &["name"]),
            ) else {
                continue;
            };
            let (group, version) = match api_version.rsplit_once('/') {
                Some((g, v)) => (g, v),
                None => ("", api_version),
            };
            let gvk = GroupVersionKind::gvk(group, version, kind);
            if let Some(child) = self.find(&gvk, None, name) {
                children.push(child);
            }
        }

        Ok(ResourceTree {
            root: live_root,
            children,
        })
    }

    async fn get_crd(&self, gvk: &GroupVersionKind) -> Result<DynamicObject> {
        self.count(|c| c.crd_gets += 1);
        self.crds.get(&gvk.kind).cloned().ok_or_else(|| KubeError::NotFound {
            kind: "CustomResourceDefinition".to_string(),
            name: format!("{}.{}", gvk.kind.to_lowercase(), gvk.group),
        })
    }

    async fn dry_run_apply(&self, obj: &DynamicObject) -> Result<DynamicObject> {
        self.count(|c| c.dry_run_applies += 1);

        if let Some(message) = &self.dry_run_error {
            return Err(KubeError::Other(message.clone()));
        }

        if let (Some(tm), Some(name)) = (obj.types.as_ref(), obj.metadata.name.as_deref()) {
            if let Some(projected) = self
                .dry_run_projections
                .get(&object_key(&tm.api_version, &tm.kind, name))
            {
                return Ok(projected.clone());
            }
        }

        Ok(obj.clone())
    }

    async fn find_matching_composition(&self, xr: &DynamicObject) -> Result<Composition> {
        CompositionMatcher::new(&self.compositions, &self.xrds).find_matching(xr)
    }

    async fn get_functions_from_pipeline(&self, comp: &Composition) -> Result<Vec<Function>> {
        functions_from_pipeline(comp, &self.functions)
    }

    async fn is_crd_required(&self, gvk: &GroupVersionKind) -> bool {
        group_requires_crd(gvk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resource(api_version: &str, kind: &str, name: &str, labels: serde_json::Value) -> DynamicObject {
        serde_json::from_value(json!({
            "apiVersion": api_version,
            "kind": kind,
            "metadata": {"name": name, "namespace": "default", "labels": labels},
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_get_resource_and_not_found() {
        let client = MockClusterClient::new()
            .with_resources(vec![resource("example.org/v1", "XR1", "my-xr", json!({}))]);

        let gvk = GroupVersionKind::gvk("example.org", "v1", "XR1");
        let found = client.get_resource(&gvk, Some("default"), "my-xr").await.unwrap();
        assert_eq!(found.metadata.name.as_deref(), Some("my-xr"));

        let err = client.get_resource(&gvk, Some("default"), "missing").await.unwrap_err();
        assert!(err.is_not_found());

        let counts = client.operation_counts();
        assert_eq!(counts.resource_gets, 2);
    }

    #[tokio::test]
    async fn test_label_list_filters_by_selector() {
        let client = MockClusterClient::new().with_resources(vec![
            resource("example.org/v1", "Composed", "a", json!({"app": "test"})),
            resource("example.org/v1", "Composed", "b", json!({"app": "other"})),
        ]);

        let gvk = GroupVersionKind::gvk("example.org", "v1", "Composed");
        let mut selector = BTreeMap::new();
        selector.insert("app".to_string(), "test".to_string());

        let found = client
            .get_resources_by_label(Some("default"), &gvk, &selector)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].metadata.name.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_xrds_cached_after_first_call() {
        let client = MockClusterClient::new().with_xrds(vec![]);

        client.get_xrds().await.unwrap();
        client.get_xrds().await.unwrap();

        // Second call reads the cache; an empty successful list counts as loaded.
        assert_eq!(client.operation_counts().xrd_lists, 1);
    }

    #[tokio::test]
    async fn test_xrd_list_error_is_wrapped_and_not_cached() {
        let client = MockClusterClient::new().fail_xrd_list("api server down");

        let err = client.get_xrds().await.unwrap_err();
        assert_eq!(err.to_string(), "cannot list XRDs: api server down");
        assert_eq!(client.operation_counts().xrd_lists, 0);
    }

    #[tokio::test]
    async fn test_all_resources_preserve_input_gvk_order() {
        let client = MockClusterClient::new().with_resources(vec![
            resource("example.org/v1", "Second", "s1", json!({"app": "test"})),
            resource("example.org/v1", "First", "f1", json!({"app": "test"})),
            resource("example.org/v1", "First", "f2", json!({"app": "test"})),
        ]);

        let gvks = vec![
            GroupVersionKind::gvk("example.org", "v1", "First"),
            GroupVersionKind::gvk("example.org", "v1", "Second"),
        ];
        let mut selector = BTreeMap::new();
        selector.insert("app".to_string(), "test".to_string());
        let selectors = vec![selector.clone(), selector];

        let found = client.get_all_resources_by_labels(&gvks, &selectors).await.unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|r| r.metadata.name.clone().unwrap_or_default())
            .collect();
        assert_eq!(names, vec!["f1", "f2", "s1"]);
    }

    #[tokio::test]
    async fn test_selector_arity_mismatch() {
        let client = MockClusterClient::new();
        let gvks = vec![GroupVersionKind::gvk("example.org", "v1", "A")];

        let err = client.get_all_resources_by_labels(&gvks, &[]).await.unwrap_err();
        assert_eq!(err.to_string(), "number of GVKs must match number of selectors");
    }

    #[tokio::test]
    async fn test_resource_tree_follows_resource_refs() {
        let root: DynamicObject = serde_json::from_value(json!({
            "apiVersion": "example.org/v1",
            "kind": "XR1",
            "metadata": {"name": "parent"},
            "spec": {"resourceRefs": [
                {"apiVersion": "example.org/v1", "kind": "Composed", "name": "c1"},
                {"apiVersion": "example.org/v1", "kind": "Composed", "name": "gone"},
            ]},
        }))
        .unwrap();

        let client = MockClusterClient::new().with_resources(vec![
            root.clone(),
            resource("example.org/v1", "Composed", "c1", json!({})),
        ]);

        let tree = client.get_resource_tree(&root).await.unwrap();
        assert_eq!(tree.children.len(), 1);
        assert_eq!(tree.children[0].metadata.name.as_deref(), Some("c1"));

        // A root that is not live yields an empty tree.
        let absent: DynamicObject = serde_json::from_value(json!({
            "apiVersion": "example.org/v1",
            "kind": "XR1",
            "metadata": {"name": "ghost"},
        }))
        .unwrap();
        let tree = client.get_resource_tree(&absent).await.unwrap();
        assert!(tree.children.is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_echo_and_projection() {
        let obj = resource("example.org/v1", "Composed", "c1", json!({}));

        let echo_client = MockClusterClient::new();
        let echoed = echo_client.dry_run_apply(&obj).await.unwrap();
        assert_eq!(echoed.metadata.name, obj.metadata.name);

        let mut projected = obj.clone();
        projected.data["spec"] = json!({"defaulted": true});
        let client = MockClusterClient::new().with_dry_run_projection(projected);
        let out = client.dry_run_apply(&obj).await.unwrap();
        assert_eq!(out.data["spec"]["defaulted"], json!(true));
    }
}
