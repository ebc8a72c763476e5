//! Schema validation for rendered resources
//!
//! XRDs are converted to an equivalent CRD view at initialize time; CRDs for
//! composed kinds are fetched lazily from the cluster. Validation is
//! structural (required fields, primitive types) against each version's
//! OpenAPI schema. A kind with no known CRD validates vacuously: previewing
//! a diff must not fail just because a schema is absent.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use kube::core::DynamicObject;
use serde_json::Value;
use tracing::debug;

use xrdiff_core::object::{gvk_of, string_at};
use xrdiff_core::Xrd;
use xrdiff_kube::ClusterClient;

use crate::error::{DiffError, Result};

/// A CRD reduced to what validation needs.
#[derive(Debug, Clone, PartialEq)]
pub struct CrdSchema {
    pub name: String,
    pub group: String,
    pub kind: String,
    pub plural: String,
    pub scope: CrdScope,
    pub versions: Vec<CrdVersion>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CrdScope {
    #[default]
    Namespaced,
    Cluster,
}

/// One served version with its (optional) OpenAPI v3 schema.
#[derive(Debug, Clone, PartialEq)]
pub struct CrdVersion {
    pub name: String,
    pub served: bool,
    pub schema: Option<Value>,
}

impl CrdSchema {
    /// Parse from a CustomResourceDefinition object fetched off the cluster.
    pub fn from_object(crd: &DynamicObject) -> Result<Self> {
        let name = crd
            .metadata
            .name
            .clone()
            .unwrap_or_default();
        let spec = crd.data.get("spec").ok_or_else(|| {
            DiffError::Validation(format!("CRD {name} has no spec"))
        })?;

        let group = string_at(spec, &["group"]).unwrap_or_default().to_string();
        let kind = string_at(spec, &["names", "kind"]).unwrap_or_default().to_string();
        let plural = string_at(spec, &["names", "plural"]).unwrap_or_default().to_string();
        let scope = match string_at(spec, &["scope"]) {
            Some("Cluster") => CrdScope::Cluster,
            _ => CrdScope::Namespaced,
        };

        let versions = spec
            .get("versions")
            .and_then(Value::as_array)
            .map(|versions| {
                versions
                    .iter()
                    .map(|v| CrdVersion {
                        name: string_at(v, &["name"]).unwrap_or_default().to_string(),
                        served: v.get("served").and_then(Value::as_bool).unwrap_or(false),
                        schema: v.get("schema").and_then(|s| s.get("openAPIV3Schema")).cloned(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            name,
            group,
            kind,
            plural,
            scope,
            versions,
        })
    }

    /// Convert an XRD to the CRD view of its XR kind, preserving group,
    /// names, scope and per-version schema.
    pub fn from_xrd(xrd: &Xrd) -> Self {
        let versions = xrd
            .versions
            .iter()
            .map(|v| CrdVersion {
                name: v.name.clone(),
                served: v.served,
                schema: v
                    .schema
                    .as_ref()
                    .and_then(|s| s.get("openAPIV3Schema"))
                    .cloned(),
            })
            .collect();

        Self {
            name: format!("{}.{}", xrd.names.plural, xrd.group),
            group: xrd.group.clone(),
            kind: xrd.names.kind.clone(),
            plural: xrd.names.plural.clone(),
            scope: match xrd.scope.as_deref() {
                Some("Namespaced") => CrdScope::Namespaced,
                _ => CrdScope::Cluster,
            },
            versions,
        }
    }

    fn version_schema(&self, version: &str) -> Option<&Value> {
        self.versions
            .iter()
            .find(|v| v.name == version)
            .and_then(|v| v.schema.as_ref())
    }
}

/// Validates rendered objects against the XRD/CRD schema cache.
pub struct SchemaValidator {
    client: Arc<dyn ClusterClient>,
    crds: RwLock<HashMap<String, CrdSchema>>,
}

fn crd_key(group: &str, kind: &str) -> String {
    format!("{group}/{kind}")
}

impl SchemaValidator {
    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        Self {
            client,
            crds: RwLock::new(HashMap::new()),
        }
    }

    /// Load XRDs and convert each to its CRD view.
    pub async fn initialize(&self) -> Result<()> {
        let xrds = self.client.get_xrds().await?;
        let mut cache = self.crds.write().expect("crd cache poisoned");
        for xrd in &xrds {
            let crd = CrdSchema::from_xrd(xrd);
            cache.insert(crd_key(&crd.group, &crd.kind), crd);
        }
        Ok(())
    }

    /// Fetch CRDs for every distinct composed kind not yet cached. Missing
    /// CRDs are tolerated; other fetch failures propagate.
    pub async fn ensure_composed_resource_crds(&self, objs: &[DynamicObject]) -> Result<()> {
        for obj in objs {
            let Ok(gvk) = gvk_of(obj) else { continue };
            let key = crd_key(&gvk.group, &gvk.kind);
            if self.crds.read().expect("crd cache poisoned").contains_key(&key) {
                continue;
            }
            if !self.client.is_crd_required(&gvk).await {
                continue;
            }

            match self.client.get_crd(&gvk).await {
                Ok(crd) => {
                    let parsed = CrdSchema::from_object(&crd)?;
                    self.crds.write().expect("crd cache poisoned").insert(key, parsed);
                }
                Err(e) if e.is_not_found() => {
                    debug!(kind = %gvk.kind, "no CRD on cluster for composed kind, skipping validation");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Validate the XR and its composed resources against every cached
    /// schema. Kinds without a schema pass. Failures are aggregated into a
    /// single error.
    pub fn validate(&self, resources: &[DynamicObject]) -> Result<()> {
        let cache = self.crds.read().expect("crd cache poisoned");
        let mut failures = Vec::new();

        for obj in resources {
            let Ok(gvk) = gvk_of(obj) else { continue };
            let Some(crd) = cache.get(&crd_key(&gvk.group, &gvk.kind)) else {
                continue;
            };
            let Some(schema) = crd.version_schema(&gvk.version) else {
                continue;
            };

            let value = match serde_json::to_value(obj) {
                Ok(v) => v,
                Err(e) => {
                    failures.push(format!("{}: {e}", gvk.kind));
                    continue;
                }
            };

            let subject = format!(
                "{}/{}",
                gvk.kind,
                obj.metadata
                    .name
                    .clone()
                    .or(obj.metadata.generate_name.clone())
                    .unwrap_or_default()
            );
            check_value(&value, schema, "", &subject, &mut failures);
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(DiffError::Validation(failures.join("; ")))
        }
    }
}

/// Structural check of a value against an OpenAPI v3 schema node.
fn check_value(value: &Value, schema: &Value, path: &str, subject: &str, failures: &mut Vec<String>) {
    if schema
        .get("x-kubernetes-preserve-unknown-fields")
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        return;
    }
    if schema
        .get("x-kubernetes-int-or-string")
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        if !(value.is_i64() || value.is_u64() || value.is_string()) {
            failures.push(format!("{subject}: {path} must be an integer or a string"));
        }
        return;
    }

    let declared = schema.get("type").and_then(Value::as_str);
    let type_ok = match declared {
        Some("object") | None => value.is_object(),
        Some("array") => value.is_array(),
        Some("string") => value.is_string(),
        Some("integer") => value.is_i64() || value.is_u64(),
        Some("number") => value.is_number(),
        Some("boolean") => value.is_boolean(),
        Some(_) => true,
    };
    if !type_ok {
        if value.is_null() && schema.get("nullable").and_then(Value::as_bool).unwrap_or(false) {
            return;
        }
        failures.push(format!(
            "{subject}: {path} is not of type {}",
            declared.unwrap_or("object")
        ));
        return;
    }

    if let Some(map) = value.as_object() {
        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            for field in required.iter().filter_map(Value::as_str) {
                if !map.contains_key(field) {
                    failures.push(format!("{subject}: missing required field {path}.{field}"));
                }
            }
        }
        if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
            for (key, child_schema) in properties {
                if let Some(child) = map.get(key) {
                    check_value(child, child_schema, &format!("{path}.{key}"), subject, failures);
                }
            }
        }
    }

    if let (Some(items), Some(item_schema)) = (value.as_array(), schema.get("items")) {
        for (i, item) in items.iter().enumerate() {
            check_value(item, item_schema, &format!("{path}[{i}]"), subject, failures);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use xrdiff_kube::MockClusterClient;

    fn xrd_with_schema() -> Xrd {
        let obj: DynamicObject = serde_json::from_value(json!({
            "apiVersion": "apiextensions.crossplane.io/v1",
            "kind": "CompositeResourceDefinition",
            "metadata": {"name": "xrs.example.org"},
            "spec": {
                "group": "example.org",
                "names": {"kind": "XR1", "plural": "xr1s"},
                "versions": [{
                    "name": "v1",
                    "served": true,
                    "referenceable": true,
                    "schema": {"openAPIV3Schema": {
                        "type": "object",
                        "properties": {
                            "spec": {
                                "type": "object",
                                "required": ["size"],
                                "properties": {
                                    "size": {"type": "integer"},
                                    "region": {"type": "string"},
                                },
                            },
                        },
                    }},
                }],
            },
        }))
        .unwrap();
        Xrd::from_object(&obj).unwrap()
    }

    fn xr(spec: serde_json::Value) -> DynamicObject {
        serde_json::from_value(json!({
            "apiVersion": "example.org/v1",
            "kind": "XR1",
            "metadata": {"name": "my-xr"},
            "spec": spec,
        }))
        .unwrap()
    }

    async fn validator_with_xrd() -> SchemaValidator {
        let client = Arc::new(MockClusterClient::new().with_xrds(vec![xrd_with_schema()]));
        let validator = SchemaValidator::new(client);
        validator.initialize().await.unwrap();
        validator
    }

    #[tokio::test]
    async fn test_valid_object_passes() {
        let validator = validator_with_xrd().await;
        validator
            .validate(&[xr(json!({"size": 3, "region": "eu-west-1"}))])
            .unwrap();
    }

    #[tokio::test]
    async fn test_missing_required_field_fails() {
        let validator = validator_with_xrd().await;
        let err = validator
            .validate(&[xr(json!({"region": "eu-west-1"}))])
            .unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with("cannot validate resources"), "{message}");
        assert!(message.contains("missing required field .spec.size"), "{message}");
    }

    #[tokio::test]
    async fn test_wrong_type_fails() {
        let validator = validator_with_xrd().await;
        let err = validator
            .validate(&[xr(json!({"size": "three"}))])
            .unwrap_err();
        assert!(err.to_string().contains(".spec.size is not of type integer"));
    }

    #[tokio::test]
    async fn test_unknown_kind_passes_vacuously() {
        let validator = validator_with_xrd().await;
        let stranger: DynamicObject = serde_json::from_value(json!({
            "apiVersion": "other.org/v1",
            "kind": "Mystery",
            "metadata": {"name": "m"},
        }))
        .unwrap();
        validator.validate(&[stranger]).unwrap();
    }

    #[tokio::test]
    async fn test_ensure_composed_crds_tolerates_missing() {
        let client = Arc::new(MockClusterClient::new());
        let validator = SchemaValidator::new(client.clone());

        let composed: DynamicObject = serde_json::from_value(json!({
            "apiVersion": "example.org/v1",
            "kind": "Composed",
            "metadata": {"name": "c1"},
        }))
        .unwrap();

        validator.ensure_composed_resource_crds(&[composed.clone()]).await.unwrap();
        // Missing CRD never makes validation fail.
        validator.validate(&[composed]).unwrap();
        assert_eq!(client.operation_counts().crd_gets, 1);
    }

    #[tokio::test]
    async fn test_ensure_composed_crds_fetches_and_validates() {
        let crd: DynamicObject = serde_json::from_value(json!({
            "apiVersion": "apiextensions.k8s.io/v1",
            "kind": "CustomResourceDefinition",
            "metadata": {"name": "composeds.example.org"},
            "spec": {
                "group": "example.org",
                "names": {"kind": "Composed", "plural": "composeds"},
                "scope": "Namespaced",
                "versions": [{
                    "name": "v1",
                    "served": true,
                    "schema": {"openAPIV3Schema": {
                        "type": "object",
                        "properties": {"spec": {"type": "object", "required": ["field"]}},
                    }},
                }],
            },
        }))
        .unwrap();

        let client = Arc::new(MockClusterClient::new().with_crd("Composed", crd));
        let validator = SchemaValidator::new(client);

        let bad: DynamicObject = serde_json::from_value(json!({
            "apiVersion": "example.org/v1",
            "kind": "Composed",
            "metadata": {"name": "c1"},
            "spec": {},
        }))
        .unwrap();

        validator.ensure_composed_resource_crds(&[bad.clone()]).await.unwrap();
        let err = validator.validate(&[bad]).unwrap_err();
        assert!(err.to_string().contains("missing required field .spec.field"));
    }

    #[test]
    fn test_builtin_kinds_skip_crd_fetch() {
        // Covered through is_crd_required: core/built-in groups never reach get_crd.
        let gvk = kube::core::GroupVersionKind::gvk("", "v1", "ConfigMap");
        assert!(!xrdiff_kube::group_requires_crd(&gvk));
    }
}
