//! Typed views over dynamically typed platform objects
//!
//! Conversions are explicit: the cluster hands us `DynamicObject`s and the
//! call sites decide when a strongly typed `Composition`, `Xrd` or `Function`
//! is needed. Parsing keeps only the fields the diff pipeline reads.

use std::collections::BTreeMap;

use kube::core::{DynamicObject, GroupVersionKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, Result};

/// Composition mode accepted by the pipeline.
pub const MODE_PIPELINE: &str = "Pipeline";

/// The apiVersion+Kind a composition accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeRef {
    pub api_version: String,
    pub kind: String,
}

impl TypeRef {
    /// Exact group+version+kind match; a v1 XR never matches a v2 ref.
    pub fn matches(&self, gvk: &GroupVersionKind) -> bool {
        let (group, version) = match self.api_version.rsplit_once('/') {
            Some((g, v)) => (g, v),
            None => ("", self.api_version.as_str()),
        };
        group == gvk.group && version == gvk.version && self.kind == gvk.kind
    }
}

/// Reference to a function package from a pipeline step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionRef {
    pub name: String,
}

/// One named invocation of a function with opaque input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStep {
    pub step: String,
    pub function_ref: FunctionRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
}

/// Composition spec fields read by the diff pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositionSpec {
    pub composite_type_ref: TypeRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default)]
    pub pipeline: Vec<PipelineStep>,
}

/// A composition: the function pipeline transforming an XR into children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Composition {
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub spec: CompositionSpec,
}

impl Composition {
    /// Parse the typed view out of a dynamic object.
    pub fn from_object(obj: &DynamicObject) -> Result<Self> {
        let name = obj
            .metadata
            .name
            .clone()
            .ok_or_else(|| CoreError::InvalidResource("composition missing metadata.name".to_string()))?;
        let labels = obj
            .metadata
            .labels
            .clone()
            .map(|l| l.into_iter().collect())
            .unwrap_or_default();
        let spec_value = obj.data.get("spec").cloned().ok_or_else(|| CoreError::MissingField {
            kind: "Composition".to_string(),
            path: "spec".to_string(),
        })?;
        let spec: CompositionSpec = serde_json::from_value(spec_value)
            .map_err(|e| CoreError::InvalidResource(format!("composition {name}: {e}")))?;

        Ok(Self { name, labels, spec })
    }

    /// Whether the composition's labels are a superset of the selector.
    pub fn matches_labels(&self, selector: &BTreeMap<String, String>) -> bool {
        selector.iter().all(|(k, v)| self.labels.get(k) == Some(v))
    }
}

/// Naming declared by an XRD.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct XrdNames {
    pub kind: String,
    #[serde(default)]
    pub plural: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub singular: Option<String>,
}

/// One declared version of an XR family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct XrdVersion {
    pub name: String,
    #[serde(default)]
    pub served: bool,
    #[serde(default)]
    pub referenceable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
}

/// A CompositeResourceDefinition: declares an XR family and optional claim kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Xrd {
    pub name: String,
    pub group: String,
    pub names: XrdNames,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_names: Option<XrdNames>,
    pub versions: Vec<XrdVersion>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl Xrd {
    pub fn from_object(obj: &DynamicObject) -> Result<Self> {
        let name = obj
            .metadata
            .name
            .clone()
            .ok_or_else(|| CoreError::InvalidResource("XRD missing metadata.name".to_string()))?;
        let spec = obj.data.get("spec").ok_or_else(|| CoreError::MissingField {
            kind: "CompositeResourceDefinition".to_string(),
            path: "spec".to_string(),
        })?;

        let group = spec
            .get("group")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::MissingField {
                kind: "CompositeResourceDefinition".to_string(),
                path: "spec.group".to_string(),
            })?
            .to_string();

        let names: XrdNames = spec
            .get("names")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| CoreError::InvalidResource(format!("XRD {name}: {e}")))?
            .ok_or_else(|| CoreError::MissingField {
                kind: "CompositeResourceDefinition".to_string(),
                path: "spec.names".to_string(),
            })?;

        let claim_names: Option<XrdNames> = spec
            .get("claimNames")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| CoreError::InvalidResource(format!("XRD {name}: {e}")))?;

        let versions: Vec<XrdVersion> = spec
            .get("versions")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| CoreError::InvalidResource(format!("XRD {name}: {e}")))?
            .unwrap_or_default();

        let scope = spec.get("scope").and_then(Value::as_str).map(String::from);

        Ok(Self {
            name,
            group,
            names,
            claim_names,
            versions,
            scope,
        })
    }

    /// The one version compositions may reference, if any. At most one
    /// version per XRD carries the flag.
    pub fn referenceable_version(&self) -> Option<&XrdVersion> {
        self.versions.iter().find(|v| v.referenceable)
    }

    /// Whether this XRD declares `kind` as its claim kind.
    pub fn has_claim_kind(&self, kind: &str) -> bool {
        self.claim_names.as_ref().is_some_and(|c| c.kind == kind)
    }
}

/// A function package, referenced by name from pipeline steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
}

impl Function {
    pub fn from_object(obj: &DynamicObject) -> Result<Self> {
        let name = obj
            .metadata
            .name
            .clone()
            .ok_or_else(|| CoreError::InvalidResource("function missing metadata.name".to_string()))?;
        Ok(Self { name })
    }
}
