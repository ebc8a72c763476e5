//! The render contract
//!
//! Rendering is delegated to an injected engine: given an XR, its
//! composition, the referenced function packages and any extra resources
//! discovered so far, the engine produces the desired composite, its
//! composed children and the requirements it could not satisfy locally.
//! The engine never touches the cluster.

use async_trait::async_trait;
use kube::core::DynamicObject;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::composition::{Composition, Function};

/// A renderer-emitted request for a live resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Requirement {
    pub api_version: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_labels: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Everything the renderer needs for one pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderInputs {
    pub xr: DynamicObject,
    pub composition: Composition,
    pub functions: Vec<Function>,
    #[serde(default)]
    pub extra_resources: Vec<DynamicObject>,
}

/// The renderer's desired state for one pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderOutputs {
    pub composite_resource: DynamicObject,
    #[serde(default)]
    pub composed_resources: Vec<DynamicObject>,
    #[serde(default)]
    pub requirements: Vec<Requirement>,
}

/// A failed render pass. A failure may still surface requirements; the
/// render loop resolves them and retries instead of aborting.
#[derive(Debug, Clone)]
pub struct RenderFailure {
    pub reason: String,
    pub requirements: Vec<Requirement>,
}

impl RenderFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            requirements: Vec::new(),
        }
    }

    pub fn with_requirements(reason: impl Into<String>, requirements: Vec<Requirement>) -> Self {
        Self {
            reason: reason.into(),
            requirements,
        }
    }
}

impl std::fmt::Display for RenderFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.reason)
    }
}

impl std::error::Error for RenderFailure {}

/// The injected render engine.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, inputs: RenderInputs) -> Result<RenderOutputs, RenderFailure>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_requirement_round_trips_name_selector() {
        let req: Requirement = serde_json::from_value(json!({
            "apiVersion": "example.org/v1",
            "kind": "ExtraResource",
            "name": "extra-1",
            "namespace": "default",
        }))
        .unwrap();

        assert_eq!(req.name.as_deref(), Some("extra-1"));
        assert!(req.match_labels.is_none());

        let back = serde_json::to_value(&req).unwrap();
        assert_eq!(back["name"], json!("extra-1"));
        assert!(back.get("matchLabels").is_none());
    }

    #[test]
    fn test_requirement_label_selector() {
        let req: Requirement = serde_json::from_value(json!({
            "apiVersion": "example.org/v1",
            "kind": "ExtraResource",
            "matchLabels": {"app": "test"},
        }))
        .unwrap();

        assert!(req.name.is_none());
        assert_eq!(
            req.match_labels.unwrap().get("app"),
            Some(&"test".to_string())
        );
    }

    #[test]
    fn test_render_failure_display() {
        let failure = RenderFailure::new("pipeline step exploded");
        assert_eq!(failure.to_string(), "pipeline step exploded");
        assert!(failure.requirements.is_empty());
    }
}
