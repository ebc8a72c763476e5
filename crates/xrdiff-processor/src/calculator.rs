//! The render loop and per-object diff calculation
//!
//! Rendering is a fixed-point iteration: each pass may surface requirements
//! for live resources the functions need; those are resolved and fed back
//! as extra resources until a pass produces no new requirements, no new
//! resources, or the iteration ceiling is hit. A failed pass that still
//! surfaced requirements keeps the loop alive; a failed pass with nothing
//! to feed back is fatal.

use std::collections::HashSet;
use std::sync::Arc;

use kube::core::DynamicObject;
use tracing::debug;

use xrdiff_core::composition::MODE_PIPELINE;
use xrdiff_core::render::{RenderInputs, RenderOutputs, Renderer};
use xrdiff_core::{Composition, Function};
use xrdiff_kube::ClusterClient;

use crate::error::{DiffError, Result};
use crate::formatter::{generate_diff, ResourceDiff};
use crate::requirements::RequirementsProvider;
use crate::resources::ResourceManager;

/// Hard ceiling on requirement-discovery iterations.
pub const MAX_REQUIREMENT_ITERATIONS: usize = 10;

pub struct DiffCalculator {
    client: Arc<dyn ClusterClient>,
    renderer: Arc<dyn Renderer>,
    requirements: RequirementsProvider,
    resources: ResourceManager,
}

fn extra_resource_key(obj: &DynamicObject) -> String {
    let api_version = obj
        .types
        .as_ref()
        .map(|t| t.api_version.clone())
        .unwrap_or_default();
    format!("{}/{}", api_version, obj.metadata.name.clone().unwrap_or_default())
}

impl DiffCalculator {
    pub fn new(client: Arc<dyn ClusterClient>, renderer: Arc<dyn Renderer>) -> Self {
        Self {
            requirements: RequirementsProvider::new(client.clone()),
            resources: ResourceManager::new(client.clone()),
            client,
            renderer,
        }
    }

    pub fn resource_manager(&self) -> &ResourceManager {
        &self.resources
    }

    /// Render the XR, feeding discovered requirements back until a fixed
    /// point. `seed_extras` (environment configs and the like) participate
    /// from the first pass. Non-pipeline compositions render exactly once
    /// with no loop and no seeds.
    pub async fn render_with_requirements(
        &self,
        xr: &DynamicObject,
        composition: &Composition,
        functions: &[Function],
        seed_extras: Vec<DynamicObject>,
    ) -> Result<RenderOutputs> {
        let inputs = |extras: Vec<DynamicObject>| RenderInputs {
            xr: xr.clone(),
            composition: composition.clone(),
            functions: functions.to_vec(),
            extra_resources: extras,
        };

        if composition.spec.mode.as_deref() != Some(MODE_PIPELINE) {
            return self
                .renderer
                .render(inputs(Vec::new()))
                .await
                .map_err(|f| DiffError::Render(f.reason));
        }

        let mut extras: Vec<DynamicObject> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for obj in seed_extras {
            if seen.insert(extra_resource_key(&obj)) {
                extras.push(obj);
            }
        }

        for iteration in 1..=MAX_REQUIREMENT_ITERATIONS {
            let (outputs, requirements) = match self.renderer.render(inputs(extras.clone())).await {
                Ok(out) => {
                    let requirements = out.requirements.clone();
                    (Some(out), requirements)
                }
                Err(failure) if !failure.requirements.is_empty() => {
                    debug!(iteration, reason = %failure.reason, "render pass failed but surfaced requirements, continuing");
                    (None, failure.requirements)
                }
                Err(failure) => return Err(DiffError::Render(failure.reason)),
            };

            if requirements.is_empty() {
                return Ok(outputs.expect("a pass without requirements cannot have failed"));
            }

            let resolved = self.requirements.provide(&requirements).await?;
            let mut discovered_new = false;
            for obj in resolved {
                // First-seen order keeps subsequent renders stable.
                if seen.insert(extra_resource_key(&obj)) {
                    extras.push(obj);
                    discovered_new = true;
                }
            }

            if !discovered_new {
                return outputs.ok_or_else(|| {
                    DiffError::Render("render failed and requirement resolution made no progress".to_string())
                });
            }

            if iteration == MAX_REQUIREMENT_ITERATIONS {
                debug!(iteration, "requirement iteration ceiling reached");
                return outputs.ok_or_else(|| {
                    DiffError::Render("render failed at requirement iteration ceiling".to_string())
                });
            }
        }

        unreachable!("loop returns within the iteration ceiling")
    }

    /// Diff one desired object against its live counterpart. The desired
    /// side is projected through a server-side dry-run apply so defaulted
    /// fields compare equal; objects the server rejects (e.g. nameless
    /// generateName children) fall back to the rendered form.
    pub async fn calculate_diff(
        &self,
        composite: Option<&DynamicObject>,
        desired: &DynamicObject,
    ) -> Result<ResourceDiff> {
        let (current, _is_new) = self.resources.fetch_current(composite, desired).await?;

        let mut desired = desired.clone();
        if let Some(parent) = composite {
            self.resources.update_owner_refs(parent, &mut desired);
        }
        if desired.metadata.name.is_none() {
            if let Some(current) = &current {
                desired.metadata.name = current.metadata.name.clone();
            }
        }

        let projected = if desired.metadata.name.is_some() {
            match self.client.dry_run_apply(&desired).await {
                Ok(projected) => projected,
                Err(e) => {
                    debug!(error = %e, "dry-run apply rejected, diffing the rendered object");
                    desired.clone()
                }
            }
        } else {
            desired.clone()
        };

        generate_diff(current.as_ref(), Some(&projected))
    }

    /// Walk the composite's live tree and emit a removed diff for every
    /// descendant no longer present in the rendered set.
    pub async fn detect_removed_resources(
        &self,
        composite: &DynamicObject,
        rendered: &[DynamicObject],
    ) -> Result<Vec<ResourceDiff>> {
        let tree = self.client.get_resource_tree(composite).await?;

        let rendered_keys: HashSet<String> = rendered
            .iter()
            .map(|obj| {
                format!(
                    "{}|{}",
                    obj.types
                        .as_ref()
                        .map(|t| format!("{}/{}", t.api_version, t.kind))
                        .unwrap_or_default(),
                    obj.metadata.name.clone().unwrap_or_default()
                )
            })
            .collect();

        let mut removed = Vec::new();
        for child in &tree.children {
            let key = format!(
                "{}|{}",
                child
                    .types
                    .as_ref()
                    .map(|t| format!("{}/{}", t.api_version, t.kind))
                    .unwrap_or_default(),
                child.metadata.name.clone().unwrap_or_default()
            );
            if !rendered_keys.contains(&key) {
                removed.push(generate_diff(Some(child), None)?);
            }
        }

        Ok(removed)
    }
}
