//! Cluster facade for the diff pipeline
//!
//! `ClusterClient` is the seam the processor talks through: typed reads,
//! composition/function/XRD caches, a shallow resource-tree walk and a
//! server-side dry-run apply. `ApiClusterClient` implements it over a live
//! cluster; `MockClusterClient` (see `mock`) implements it in memory for
//! tests. The tool only ever reads; the one write-shaped call is dry-run.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::core::{DynamicObject, GroupVersionKind};
use kube::discovery::{ApiCapabilities, ApiResource, Scope};
use kube::Client;
use tracing::debug;

use xrdiff_core::object::{gvk_display, gvk_of, string_at};
use xrdiff_core::{Composition, CoreError, Function, Xrd};

use crate::composition::{functions_from_pipeline, CompositionMatcher};
use crate::discovery::TypeResolver;
use crate::error::{KubeError, Result, ResultExt};

/// Field manager recorded by dry-run server-side applies.
const FIELD_MANAGER: &str = "xrdiff";

/// The composite plus its currently live composed children, one level deep.
#[derive(Debug, Clone)]
pub struct ResourceTree {
    pub root: DynamicObject,
    pub children: Vec<DynamicObject>,
}

/// Read-only cluster surface consumed by the diff processor.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Populate the composition, function and XRD caches. Must complete
    /// before any render loop starts.
    async fn initialize(&self) -> Result<()>;

    /// List all environment-config objects.
    async fn get_environment_configs(&self) -> Result<Vec<DynamicObject>>;

    /// Memoised XRD list; at most one successful underlying list call per
    /// process. An empty-but-successful list counts as loaded.
    async fn get_xrds(&self) -> Result<Vec<Xrd>>;

    /// Aggregate label-selected lists across several GVKs, preserving input
    /// GVK order and in-GVK list order.
    async fn get_all_resources_by_labels(
        &self,
        gvks: &[GroupVersionKind],
        selectors: &[BTreeMap<String, String>],
    ) -> Result<Vec<DynamicObject>>;

    /// Direct get. A 404 surfaces as a distinguishable NotFound.
    async fn get_resource(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<DynamicObject>;

    /// Label-selected list scoped to the (possibly absent) namespace.
    async fn get_resources_by_label(
        &self,
        namespace: Option<&str>,
        gvk: &GroupVersionKind,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<DynamicObject>>;

    /// The composite plus its live composed children, as a shallow tree.
    async fn get_resource_tree(&self, root: &DynamicObject) -> Result<ResourceTree>;

    /// Fetch the CRD backing a GVK; the CRD name is `plural.group` with the
    /// plural taken from discovery, never guessed.
    async fn get_crd(&self, gvk: &GroupVersionKind) -> Result<DynamicObject>;

    /// Server-side apply with dryRun=All; returns the server's projection.
    async fn dry_run_apply(&self, obj: &DynamicObject) -> Result<DynamicObject>;

    /// Select exactly one composition for the XR.
    async fn find_matching_composition(&self, xr: &DynamicObject) -> Result<Composition>;

    /// Resolve the function package behind every pipeline step.
    async fn get_functions_from_pipeline(&self, comp: &Composition) -> Result<Vec<Function>>;

    /// Whether objects of this GVK are served by a CRD (fail-closed).
    async fn is_crd_required(&self, gvk: &GroupVersionKind) -> bool;
}

fn well_known(group: &str, version: &str, kind: &str, plural: &str) -> ApiResource {
    ApiResource::from_gvk_with_plural(&GroupVersionKind::gvk(group, version, kind), plural)
}

fn composition_resource() -> ApiResource {
    well_known("apiextensions.crossplane.io", "v1", "Composition", "compositions")
}

fn function_resource() -> ApiResource {
    well_known("pkg.crossplane.io", "v1", "Function", "functions")
}

fn xrd_resource() -> ApiResource {
    well_known(
        "apiextensions.crossplane.io",
        "v1",
        "CompositeResourceDefinition",
        "compositeresourcedefinitions",
    )
}

fn environment_config_resource() -> ApiResource {
    well_known(
        "apiextensions.crossplane.io",
        "v1alpha1",
        "EnvironmentConfig",
        "environmentconfigs",
    )
}

fn crd_resource() -> ApiResource {
    well_known(
        "apiextensions.k8s.io",
        "v1",
        "CustomResourceDefinition",
        "customresourcedefinitions",
    )
}

fn selector_string(selector: &BTreeMap<String, String>) -> String {
    selector
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Live implementation over a kube client, with process-lifetime caches.
/// Caches are filled during `initialize` and read-only afterwards.
pub struct ApiClusterClient {
    client: Client,
    resolver: TypeResolver,
    compositions: RwLock<HashMap<String, Composition>>,
    functions: RwLock<HashMap<String, Function>>,
    xrds: RwLock<Vec<Xrd>>,
    xrds_loaded: AtomicBool,
}

impl ApiClusterClient {
    pub fn new(client: Client) -> Self {
        Self {
            resolver: TypeResolver::new(client.clone()),
            client,
            compositions: RwLock::new(HashMap::new()),
            functions: RwLock::new(HashMap::new()),
            xrds: RwLock::new(Vec::new()),
            xrds_loaded: AtomicBool::new(false),
        }
    }

    fn api_for(&self, ar: &ApiResource, caps: &ApiCapabilities, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) if !ns.is_empty() && caps.scope == Scope::Namespaced => {
                Api::namespaced_with(self.client.clone(), ns, ar)
            }
            _ => Api::all_with(self.client.clone(), ar),
        }
    }

    async fn list_all(&self, ar: &ApiResource) -> Result<Vec<DynamicObject>> {
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), ar);
        let list = api.list(&ListParams::default()).await?;
        Ok(list.items)
    }
}

#[async_trait]
impl ClusterClient for ApiClusterClient {
    async fn initialize(&self) -> Result<()> {
        let compositions = self
            .list_all(&composition_resource())
            .await
            .context("cannot list compositions")?;
        {
            let mut cache = self.compositions.write().expect("composition cache poisoned");
            cache.clear();
            for obj in &compositions {
                let comp = Composition::from_object(obj)?;
                cache.insert(comp.name.clone(), comp);
            }
        }

        let functions = self
            .list_all(&function_resource())
            .await
            .context("cannot list functions")?;
        {
            let mut cache = self.functions.write().expect("function cache poisoned");
            cache.clear();
            for obj in &functions {
                let function = Function::from_object(obj)?;
                cache.insert(function.name.clone(), function);
            }
        }

        self.get_xrds().await.context("Failed to preload XRDs")?;

        debug!(
            compositions = compositions.len(),
            functions = functions.len(),
            "cluster caches initialized"
        );
        Ok(())
    }

    async fn get_environment_configs(&self) -> Result<Vec<DynamicObject>> {
        self.list_all(&environment_config_resource())
            .await
            .context("cannot list environment configs")
    }

    async fn get_xrds(&self) -> Result<Vec<Xrd>> {
        if self.xrds_loaded.load(Ordering::Acquire) {
            return Ok(self.xrds.read().expect("xrd cache poisoned").clone());
        }

        let objs = self
            .list_all(&xrd_resource())
            .await
            .context("cannot list XRDs")?;
        let mut parsed = Vec::with_capacity(objs.len());
        for obj in &objs {
            parsed.push(Xrd::from_object(obj)?);
        }

        *self.xrds.write().expect("xrd cache poisoned") = parsed.clone();
        // The loaded flag is set exactly once, and only on success.
        self.xrds_loaded.store(true, Ordering::Release);

        Ok(parsed)
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
            let found = self.get_resources_by_label(None, gvk, selector).await?;
            all.extend(found);
        }
        Ok(all)
    }

    async fn get_resource(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<DynamicObject> {
        let (ar, caps) = self.resolver.resolve_gvr(gvk).await?;
        let api = self.api_for(&ar, &caps, namespace);

        match api.get(name).await {
            Ok(obj) => Ok(obj),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Err(KubeError::NotFound {
                kind: gvk.kind.clone(),
                name: name.to_string(),
            }),
            Err(e) => Err(KubeError::from(e).wrap(format!(
                "cannot get resource {}/{} of kind {}",
                namespace.unwrap_or_default(),
                name,
                gvk.kind
            ))),
        }
    }

    async fn get_resources_by_label(
        &self,
        namespace: Option<&str>,
        gvk: &GroupVersionKind,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<DynamicObject>> {
        let (ar, caps) = self.resolver.resolve_gvr(gvk).await?;
        let api = self.api_for(&ar, &caps, namespace);

        let mut params = ListParams::default();
        let selector_text = selector_string(selector);
        if !selector_text.is_empty() {
            params = params.labels(&selector_text);
        }

        let list = api.list(&params).await.map_err(|e| {
            KubeError::from(e).wrap(format!(
                "cannot list resources for '{}' matching '{}'",
                gvk_display(gvk),
                selector_text
            ))
        })?;
        Ok(list.items)
    }

    async fn get_resource_tree(&self, root: &DynamicObject) -> Result<ResourceTree> {
        // The tree reflects cluster state: walk the live root's resource
        // references, not whatever the caller rendered locally.
        let live_root = match root.metadata.name.as_deref() {
            Some(name) => {
                let gvk = gvk_of(root)?;
                match self
                    .get_resource(&gvk, root.metadata.namespace.as_deref(), name)
                    .await
                {
                    Ok(live) => Some(live),
                    Err(e) if e.is_not_found() => None,
                    Err(e) => return Err(e.wrap("cannot walk resource tree")),
                }
            }
            None => None,
        };

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

        let mut children = Vec::with_capacity(refs.len());
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
            let namespace = string_at(r, &["namespace"]).or(live_root.metadata.namespace.as_deref());

            match self.get_resource(&gvk, namespace, name).await {
                Ok(child) => children.push(child),
                Err(e) if e.is_not_found() => {
                    debug!(kind, name, "referenced composed resource not found, skipping");
                }
                Err(e) => return Err(e.wrap("cannot walk resource tree")),
            }
        }

        Ok(ResourceTree {
            root: live_root,
            children,
        })
    }

    async fn get_crd(&self, gvk: &GroupVersionKind) -> Result<DynamicObject> {
        let (ar, _) = self.resolver.resolve_gvr(gvk).await?;
        let crd_name = format!("{}.{}", ar.plural, gvk.group);

        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &crd_resource());
        match api.get(&crd_name).await {
            Ok(crd) => Ok(crd),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Err(KubeError::NotFound {
                kind: "CustomResourceDefinition".to_string(),
                name: crd_name,
            }),
            Err(e) => Err(KubeError::from(e).wrap(format!(
                "cannot get CRD {} for {}",
                crd_name,
                gvk_display(gvk)
            ))),
        }
    }

    async fn dry_run_apply(&self, obj: &DynamicObject) -> Result<DynamicObject> {
        let gvk = gvk_of(obj)?;
        let (ar, caps) = self.resolver.resolve_gvr(&gvk).await?;

        let name = obj.metadata.name.as_deref().ok_or_else(|| {
            KubeError::Invalid(CoreError::InvalidResource(
                "cannot dry-run apply an object without metadata.name".to_string(),
            ))
        })?;

        let api = self.api_for(&ar, &caps, obj.metadata.namespace.as_deref());

        let mut params = PatchParams::apply(FIELD_MANAGER);
        params.force = true;
        params.dry_run = true;

        api.patch(name, &params, &Patch::Apply(obj))
            .await
            .map_err(|e| {
                KubeError::from(e).wrap(format!("cannot dry-run apply {}/{}", gvk.kind, name))
            })
    }

    async fn find_matching_composition(&self, xr: &DynamicObject) -> Result<Composition> {
        let compositions = self.compositions.read().expect("composition cache poisoned").clone();
        let xrds = self.xrds.read().expect("xrd cache poisoned").clone();
        CompositionMatcher::new(&compositions, &xrds).find_matching(xr)
    }

    async fn get_functions_from_pipeline(&self, comp: &Composition) -> Result<Vec<Function>> {
        let functions = self.functions.read().expect("function cache poisoned").clone();
        functions_from_pipeline(comp, &functions)
    }

    async fn is_crd_required(&self, gvk: &GroupVersionKind) -> bool {
        self.resolver.is_crd_required(gvk).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_string_is_deterministic() {
        let mut selector = BTreeMap::new();
        selector.insert("b".to_string(), "2".to_string());
        selector.insert("a".to_string(), "1".to_string());
        assert_eq!(selector_string(&selector), "a=1,b=2");
        assert_eq!(selector_string(&BTreeMap::new()), "");
    }

    #[test]
    fn test_well_known_api_resources() {
        let comp = composition_resource();
        assert_eq!(comp.plural, "compositions");
        assert_eq!(comp.api_version, "apiextensions.crossplane.io/v1");

        let crd = crd_resource();
        assert_eq!(crd.plural, "customresourcedefinitions");
        assert_eq!(crd.group, "apiextensions.k8s.io");
    }
}
