//! Composition selection for composite resources
//!
//! Given an XR and the process-lifetime caches, select exactly one
//! composition. Three rules apply in order: direct reference, label
//! selector, unique default. Claim kinds are first resolved to their XR
//! kind through the owning XRD's referenceable version.

use std::collections::{BTreeMap, HashMap};

use kube::core::{DynamicObject, GroupVersionKind};

use xrdiff_core::composition::MODE_PIPELINE;
use xrdiff_core::object::{gvk_display, gvk_of, string_at};
use xrdiff_core::{Composition, Function, Xrd};

use crate::error::{KubeError, Result};

/// Stateless matcher over the composition and XRD caches.
pub struct CompositionMatcher<'a> {
    compositions: &'a HashMap<String, Composition>,
    xrds: &'a [Xrd],
}

impl<'a> CompositionMatcher<'a> {
    pub fn new(compositions: &'a HashMap<String, Composition>, xrds: &'a [Xrd]) -> Self {
        Self { compositions, xrds }
    }

    /// Select exactly one composition for the XR, or fail with a
    /// user-facing message naming what went wrong.
    pub fn find_matching(&self, xr: &DynamicObject) -> Result<Composition> {
        let gvk = gvk_of(xr)?;
        let effective = self.effective_gvk(&gvk)?;
        let gvk_text = gvk_display(&effective);
        let xr_name = xr.metadata.name.as_deref().unwrap_or_default();

        // Rule 1: direct reference.
        if let Some(referenced) = string_at(&xr.data, &["spec", "compositionRef", "name"]) {
            let comp = self.compositions.get(referenced).ok_or_else(|| {
                KubeError::Composition(format!(
                    "composition {referenced} referenced in {gvk_text}/{xr_name} not found"
                ))
            })?;
            if !comp.spec.composite_type_ref.matches(&effective) {
                return Err(KubeError::Composition(format!(
                    "composition {referenced} is not compatible with {gvk_text}"
                )));
            }
            return Ok(comp.clone());
        }

        // Rule 2: label selector.
        if let Some(selector) = selector_labels(xr) {
            let mut candidates: Vec<&Composition> = self
                .compositions
                .values()
                .filter(|c| c.matches_labels(&selector) && c.spec.composite_type_ref.matches(&effective))
                .collect();
            return match candidates.len() {
                0 => Err(KubeError::Composition(format!(
                    "no compatible composition found matching labels {} for {gvk_text}/{xr_name}",
                    format_labels(&selector)
                ))),
                1 => Ok(candidates.remove(0).clone()),
                _ => Err(KubeError::Composition(
                    "ambiguous composition selection: multiple compositions match".to_string(),
                )),
            };
        }

        // Rule 3: unique default for the type.
        let mut candidates: Vec<&Composition> = self
            .compositions
            .values()
            .filter(|c| c.spec.composite_type_ref.matches(&effective))
            .collect();
        match candidates.len() {
            0 => Err(KubeError::Composition(format!(
                "no composition found for {gvk_text}"
            ))),
            1 => Ok(candidates.remove(0).clone()),
            _ => Err(KubeError::Composition(format!(
                "ambiguous composition selection: multiple compositions exist for {gvk_text}"
            ))),
        }
    }

    /// Resolve a claim kind to the XR GVK compositions reference. Non-claim
    /// kinds pass through unchanged.
    fn effective_gvk(&self, gvk: &GroupVersionKind) -> Result<GroupVersionKind> {
        let Some(xrd) = self
            .xrds
            .iter()
            .find(|x| x.group == gvk.group && x.has_claim_kind(&gvk.kind))
        else {
            return Ok(gvk.clone());
        };

        let version = xrd.referenceable_version().ok_or_else(|| {
            KubeError::Composition("no referenceable version found in XRD".to_string())
        })?;

        Ok(GroupVersionKind::gvk(
            &xrd.group,
            &version.name,
            &xrd.names.kind,
        ))
    }
}

/// Resolve the function package for every pipeline step, in step order.
pub fn functions_from_pipeline(
    comp: &Composition,
    functions: &HashMap<String, Function>,
) -> Result<Vec<Function>> {
    match comp.spec.mode.as_deref() {
        Some(MODE_PIPELINE) => {}
        Some(other) => {
            return Err(KubeError::Pipeline(format!(
                "Unsupported composition Mode '{other}'; supported types are [{MODE_PIPELINE}]"
            )));
        }
        None => {
            return Err(KubeError::Pipeline(
                "Unsupported Composition; no Mode found.".to_string(),
            ));
        }
    }

    let mut resolved = Vec::with_capacity(comp.spec.pipeline.len());
    for step in &comp.spec.pipeline {
        let name = &step.function_ref.name;
        let function = functions.get(name).ok_or_else(|| {
            KubeError::Pipeline(format!(
                "function \"{name}\" referenced in pipeline step \"{}\" not found",
                step.step
            ))
        })?;
        resolved.push(function.clone());
    }

    Ok(resolved)
}

fn selector_labels(xr: &DynamicObject) -> Option<BTreeMap<String, String>> {
    let labels = xr
        .data
        .get("spec")?
        .get("compositionSelector")?
        .get("matchLabels")?
        .as_object()?;

    Some(
        labels
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
            .collect(),
    )
}

fn format_labels(labels: &BTreeMap<String, String>) -> String {
    let inner: Vec<String> = labels.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("{{{}}}", inner.join(", "))
}
