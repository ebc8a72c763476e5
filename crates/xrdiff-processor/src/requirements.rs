//! Resolution of renderer-emitted requirements
//!
//! Each requirement names a live resource either directly (`name`) or by
//! label selector. Missing named resources are soft: the requirement is
//! dropped with a debug log and rendering continues without it. Transport
//! errors abort the render loop.

use std::sync::Arc;

use kube::core::{DynamicObject, GroupVersionKind};
use tracing::debug;

use xrdiff_core::Requirement;
use xrdiff_kube::ClusterClient;

use crate::error::Result;

pub struct RequirementsProvider {
    client: Arc<dyn ClusterClient>,
}

impl RequirementsProvider {
    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        Self { client }
    }

    /// Translate requirements into concrete live resources.
    pub async fn provide(&self, requirements: &[Requirement]) -> Result<Vec<DynamicObject>> {
        let mut resolved = Vec::new();

        for req in requirements {
            let (group, version) = match req.api_version.rsplit_once('/') {
                Some((g, v)) => (g, v),
                None => ("", req.api_version.as_str()),
            };
            let gvk = GroupVersionKind::gvk(group, version, &req.kind);

            if let Some(name) = &req.name {
                match self
                    .client
                    .get_resource(&gvk, req.namespace.as_deref(), name)
                    .await
                {
                    Ok(obj) => resolved.push(obj),
                    Err(e) if e.is_not_found() => {
                        debug!(kind = %req.kind, name = %name, "required resource not found, dropping requirement");
                    }
                    Err(e) => return Err(e.into()),
                }
            } else if let Some(labels) = &req.match_labels {
                let found = self
                    .client
                    .get_resources_by_label(req.namespace.as_deref(), &gvk, labels)
                    .await?;
                resolved.extend(found);
            } else {
                debug!(kind = %req.kind, "requirement has neither name nor matchLabels, dropping");
            }
        }

        Ok(resolved)
    }
}
