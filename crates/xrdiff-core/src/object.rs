//! Helpers over dynamically typed cluster objects
//!
//! Every cluster payload is handled as a `kube::core::DynamicObject`: typed
//! metadata plus an arbitrary `serde_json::Value` tree. The helpers here do
//! the nested-field plumbing that the rest of the workspace builds on.

use kube::core::{DynamicObject, GroupVersionKind, TypeMeta};
use serde_json::Value;

use crate::error::{CoreError, Result};

/// Fields under `metadata` that the server manages and that must never
/// participate in a diff.
const VOLATILE_METADATA_FIELDS: &[&str] = &[
    "resourceVersion",
    "uid",
    "generation",
    "creationTimestamp",
    "managedFields",
    "selfLink",
    "ownerReferences",
];

/// Extract the GroupVersionKind of a dynamic object.
///
/// Fails when the object carries no TypeMeta; the resolver layer requires a
/// GVK for every I/O operation.
pub fn gvk_of(obj: &DynamicObject) -> Result<GroupVersionKind> {
    let tm = obj
        .types
        .as_ref()
        .ok_or_else(|| CoreError::InvalidResource("object missing apiVersion or kind".to_string()))?;
    Ok(gvk_from_type_meta(tm))
}

/// Convert TypeMeta to GroupVersionKind.
///
/// - "apps/v1" -> group="apps", version="v1"
/// - "v1" -> group="", version="v1" (core API)
pub fn gvk_from_type_meta(tm: &TypeMeta) -> GroupVersionKind {
    let (group, version) = match tm.api_version.rsplit_once('/') {
        Some((g, v)) => (g.to_string(), v.to_string()),
        None => (String::new(), tm.api_version.clone()),
    };

    GroupVersionKind {
        group,
        version,
        kind: tm.kind.clone(),
    }
}

/// Render a GVK the way the API machinery prints it: `group/version, Kind=K`.
pub fn gvk_display(gvk: &GroupVersionKind) -> String {
    format!("{}, Kind={}", api_version_of(gvk), gvk.kind)
}

/// The apiVersion string for a GVK ("v1" for the core group).
pub fn api_version_of(gvk: &GroupVersionKind) -> String {
    if gvk.group.is_empty() {
        gvk.version.clone()
    } else {
        format!("{}/{}", gvk.group, gvk.version)
    }
}

/// Navigate a nested field path in a JSON tree.
pub fn field<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut current = value;
    for part in path {
        current = current.get(part)?;
    }
    Some(current)
}

/// Read a nested string field.
pub fn string_at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    field(value, path).and_then(Value::as_str)
}

/// Key identifying a resource for diff and removal detection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub namespace: Option<String>,
}

impl ResourceKey {
    /// Build a key from a dynamic object.
    pub fn from_object(obj: &DynamicObject) -> Result<Self> {
        let tm = obj
            .types
            .as_ref()
            .ok_or_else(|| CoreError::InvalidResource("object missing apiVersion or kind".to_string()))?;
        Ok(Self {
            api_version: tm.api_version.clone(),
            kind: tm.kind.clone(),
            name: obj.metadata.name.clone().unwrap_or_default(),
            namespace: obj.metadata.namespace.clone(),
        })
    }

    /// Display name for headers and log lines.
    pub fn display_name(&self) -> String {
        format!("{}/{}", self.kind, self.name)
    }
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.api_version, self.kind, self.name)
    }
}

/// Merge `overlay` over `base`, in place. Maps merge recursively; on any
/// other conflict the overlay wins. Null overlay values never erase base
/// content, matching the input-XR-over-rendered-XR merge the processor needs.
pub fn merge_over(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (k, v) in overlay_map {
                if v.is_null() {
                    continue;
                }
                match base_map.get_mut(k) {
                    Some(existing) => merge_over(existing, v),
                    None => {
                        base_map.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (base_slot, v) => {
            if !v.is_null() {
                *base_slot = v.clone();
            }
        }
    }
}

/// Convert a dynamic object into its full JSON tree (apiVersion, kind,
/// metadata and all nested fields).
pub fn object_to_value(obj: &DynamicObject) -> Result<Value> {
    Ok(serde_json::to_value(obj)?)
}

/// Rebuild a dynamic object from a JSON tree.
pub fn value_to_object(value: Value) -> Result<DynamicObject> {
    Ok(serde_json::from_value(value)?)
}

/// Strip the fields that must not participate in a diff: volatile metadata,
/// the whole `status`, and `spec.resourceRefs`.
pub fn cleanup_for_diff(value: &mut Value) {
    if let Some(metadata) = value.get_mut("metadata").and_then(Value::as_object_mut) {
        for f in VOLATILE_METADATA_FIELDS {
            metadata.remove(*f);
        }
    }

    if let Some(spec) = value.get_mut("spec").and_then(Value::as_object_mut) {
        spec.remove("resourceRefs");
    }

    if let Some(obj) = value.as_object_mut() {
        obj.remove("status");
    }
}

/// Serialize an object tree to canonical YAML. `serde_json` maps iterate in
/// sorted key order, so identical inputs always produce identical text.
pub fn to_canonical_yaml(value: &Value) -> Result<String> {
    Ok(serde_yaml::to_string(value)?)
}
