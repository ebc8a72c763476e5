//! Matching desired composed resources to their live counterparts
//!
//! A rendered child may carry a concrete name, a generateName, or neither.
//! The live counterpart is found by direct get when possible, otherwise by
//! the owner label plus the composition-resource-name annotation, with the
//! generateName prefix as a tie-breaker for server-assigned names.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use kube::core::DynamicObject;
use tracing::debug;
use uuid::Uuid;

use xrdiff_core::object::gvk_of;
use xrdiff_kube::ClusterClient;

use crate::error::Result;

/// Label marking a composed resource with the name of its composite.
pub const COMPOSITE_LABEL: &str = "crossplane.io/composite";

/// Annotation naming a composed resource's slot in the composition.
pub const RESOURCE_NAME_ANNOTATION: &str = "crossplane.io/composition-resource-name";

pub struct ResourceManager {
    client: Arc<dyn ClusterClient>,
    /// Fabricated owner UIDs, stable for this run and never sent anywhere.
    fabricated_uids: Mutex<HashMap<String, String>>,
}

impl ResourceManager {
    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        Self {
            client,
            fabricated_uids: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve a desired object to its live counterpart. Returns the
    /// current object (if any) and whether the desired object is new.
    pub async fn fetch_current(
        &self,
        composite: Option<&DynamicObject>,
        desired: &DynamicObject,
    ) -> Result<(Option<DynamicObject>, bool)> {
        // Rule 1: direct lookup when the desired object names itself.
        if let Some(name) = desired.metadata.name.as_deref() {
            match self
                .client
                .get_resource(&gvk_of(desired)?, desired.metadata.namespace.as_deref(), name)
                .await
            {
                Ok(current) => return Ok((Some(current), false)),
                Err(e) if e.is_not_found() => {
                    debug!(name, "no direct match, falling back to owner lookup");
                }
                Err(e) => return Err(e.into()),
            }
        }

        let Some(composite) = composite else {
            return Ok((None, true));
        };

        // Rules 2 and 3: match through the composite's owner label and the
        // composition-resource-name annotation; a generateName narrows the
        // candidates to those the server named from it.
        let prefix = desired.metadata.generate_name.as_deref().unwrap_or_default();
        self.lookup_by_owner(composite, desired, prefix).await
    }

    async fn lookup_by_owner(
        &self,
        composite: &DynamicObject,
        desired: &DynamicObject,
        prefix: &str,
    ) -> Result<(Option<DynamicObject>, bool)> {
        let Some(composite_name) = composite.metadata.name.as_deref() else {
            return Ok((None, true));
        };
        let Some(resource_name) = annotation(desired, RESOURCE_NAME_ANNOTATION) else {
            return Ok((None, true));
        };

        let mut selector = std::collections::BTreeMap::new();
        selector.insert(COMPOSITE_LABEL.to_string(), composite_name.to_string());

        let candidates = self
            .client
            .get_resources_by_label(
                desired.metadata.namespace.as_deref(),
                &gvk_of(desired)?,
                &selector,
            )
            .await?;

        let mut matched: Vec<DynamicObject> = candidates
            .into_iter()
            .filter(|c| annotation(c, RESOURCE_NAME_ANNOTATION) == Some(resource_name))
            .filter(|c| {
                c.metadata
                    .name
                    .as_deref()
                    .is_some_and(|n| n.starts_with(prefix))
            })
            .collect();

        match matched.len() {
            1 => Ok((Some(matched.remove(0)), false)),
            0 => Ok((None, true)),
            _ => {
                debug!(
                    resource_name,
                    count = matched.len(),
                    "ambiguous owner match, treating as new"
                );
                Ok((None, true))
            }
        }
    }

    /// Fill empty owner-reference UIDs on the child so it compares equal to
    /// the live object: a reference to the parent gets the parent's UID,
    /// every other empty UID gets a random UID stable for this run.
    /// Non-empty UIDs are never touched.
    pub fn update_owner_refs(&self, parent: &DynamicObject, child: &mut DynamicObject) {
        let Some(refs) = child.metadata.owner_references.as_mut() else {
            return;
        };

        let parent_api_version = parent.types.as_ref().map(|t| t.api_version.clone()).unwrap_or_default();
        let parent_kind = parent.types.as_ref().map(|t| t.kind.clone()).unwrap_or_default();
        let parent_name = parent.metadata.name.clone().unwrap_or_default();

        for r in refs.iter_mut() {
            if !r.uid.is_empty() {
                continue;
            }

            let is_parent =
                r.api_version == parent_api_version && r.kind == parent_kind && r.name == parent_name;
            if is_parent {
                if let Some(uid) = parent.metadata.uid.clone().filter(|u| !u.is_empty()) {
                    r.uid = uid;
                    continue;
                }
            }

            r.uid = self.fabricated_uid(&format!("{}|{}|{}", r.api_version, r.kind, r.name));
        }
    }

    fn fabricated_uid(&self, owner_key: &str) -> String {
        self.fabricated_uids
            .lock()
            .expect("uid map poisoned")
            .entry(owner_key.to_string())
            .or_insert_with(|| Uuid::new_v4().to_string())
            .clone()
    }
}

fn annotation<'a>(obj: &'a DynamicObject, key: &str) -> Option<&'a str> {
    obj.metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(key))
        .map(String::as_str)
}
