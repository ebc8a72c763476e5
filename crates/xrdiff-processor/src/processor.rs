//! Per-XR diff pipeline
//!
//! For each input XR: match its composition, resolve the pipeline's
//! functions, run the render loop, merge the input XR over the rendered
//! composite, validate everything against known schemas, then diff the XR,
//! its composed children and any live descendants that would be removed.

use std::io::Write;
use std::sync::Arc;

use kube::core::DynamicObject;
use tracing::debug;

use xrdiff_core::object::{merge_over, object_to_value, value_to_object};
use xrdiff_core::Renderer;
use xrdiff_kube::ClusterClient;

use crate::calculator::DiffCalculator;
use crate::error::{DiffError, Result, ResultExt};
use crate::formatter::{format_diff, DiffOptions, ResourceDiff};
use crate::schema::SchemaValidator;

pub struct DiffProcessor {
    client: Arc<dyn ClusterClient>,
    calculator: DiffCalculator,
    validator: SchemaValidator,
    namespace: String,
    options: DiffOptions,
}

impl DiffProcessor {
    pub fn new(
        client: Arc<dyn ClusterClient>,
        renderer: Arc<dyn Renderer>,
        namespace: impl Into<String>,
        options: DiffOptions,
    ) -> Self {
        Self {
            calculator: DiffCalculator::new(client.clone(), renderer),
            validator: SchemaValidator::new(client.clone()),
            client,
            namespace: namespace.into(),
            options,
        }
    }

    /// Populate every cache: compositions, functions, XRDs, and the XRD
    /// derived schemas. Must complete before the first render loop.
    pub async fn initialize(&self) -> Result<()> {
        self.client.initialize().await?;
        self.validator.initialize().await
    }

    /// Process every input XR, aggregating per-XR failures into one error
    /// that retains the individual messages.
    pub async fn process_all(
        &self,
        stdout: &mut (dyn Write + Send),
        resources: &[DynamicObject],
    ) -> Result<()> {
        let mut failures = Vec::new();
        for res in resources {
            if let Err(e) = self.process_resource(stdout, res).await {
                failures.push(format!(
                    "unable to process resource {}: {e}",
                    res.metadata.name.as_deref().unwrap_or_default()
                ));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(DiffError::Aggregate(failures.join("\n")))
        }
    }

    /// Process one XR: render, validate, diff, print.
    pub async fn process_resource(
        &self,
        stdout: &mut (dyn Write + Send),
        res: &DynamicObject,
    ) -> Result<()> {
        let mut xr = res.clone();
        if xr.metadata.namespace.is_none() {
            xr.metadata.namespace = Some(self.namespace.clone());
        }

        let composition = self
            .client
            .find_matching_composition(&xr)
            .await
            .map_err(DiffError::from)
            .context("cannot find matching composition")?;

        let functions = self
            .client
            .get_functions_from_pipeline(&composition)
            .await
            .map_err(DiffError::from)
            .context("cannot get functions from pipeline")?;

        // Environment configs participate in rendering from the first pass.
        // A cluster without the EnvironmentConfig API simply has none.
        let environment_configs = match self.client.get_environment_configs().await {
            Ok(configs) => configs,
            Err(e) if e.is_not_found() => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let outputs = self
            .calculator
            .render_with_requirements(&xr, &composition, &functions, environment_configs)
            .await?;

        // The renderer only reflects the input spec back; the server copy
        // may differ, so the input is merged over the rendered composite
        // (input wins) before diffing.
        let mut merged_value = object_to_value(&outputs.composite_resource)?;
        merge_over(&mut merged_value, &object_to_value(&xr)?);
        let merged = value_to_object(merged_value)?;

        self.validator
            .ensure_composed_resource_crds(&outputs.composed_resources)
            .await?;
        let mut to_validate = vec![merged.clone()];
        to_validate.extend(outputs.composed_resources.iter().cloned());
        self.validator.validate(&to_validate)?;

        let mut diffs: Vec<ResourceDiff> = Vec::new();
        diffs.push(
            self.calculator
                .calculate_diff(None, &merged)
                .await
                .context("cannot calculate diff")?,
        );

        for composed in &outputs.composed_resources {
            diffs.push(
                self.calculator
                    .calculate_diff(Some(&merged), composed)
                    .await
                    .context("cannot calculate diff")?,
            );
        }

        diffs.extend(
            self.calculator
                .detect_removed_resources(&merged, &outputs.composed_resources)
                .await?,
        );

        for diff in &diffs {
            let text = format_diff(diff, &self.options);
            if text.is_empty() {
                debug!(kind = %diff.kind, name = %diff.name, "no changes");
                continue;
            }
            write!(stdout, "{}\n---\n", text.trim_end_matches('\n'))
                .map_err(|e| DiffError::Format(e.to_string()))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use xrdiff_core::composition::{CompositionSpec, FunctionRef, PipelineStep, TypeRef, MODE_PIPELINE};
    use xrdiff_core::render::{RenderFailure, RenderInputs, RenderOutputs};
    use xrdiff_core::{Composition, Function};
    use xrdiff_kube::MockClusterClient;

    /// Renderer returning a fixed desired state for every XR.
    struct StaticRenderer {
        outputs: RenderOutputs,
    }

    #[async_trait]
    impl Renderer for StaticRenderer {
        async fn render(
            &self,
            inputs: RenderInputs,
        ) -> std::result::Result<RenderOutputs, RenderFailure> {
            let mut outputs = self.outputs.clone();
            // The engine echoes the input spec into the rendered composite.
            outputs.composite_resource.metadata.name = inputs.xr.metadata.name.clone();
            Ok(outputs)
        }
    }

    fn composition() -> Composition {
        Composition {
            name: "test-comp".to_string(),
            labels: Default::default(),
            spec: CompositionSpec {
                composite_type_ref: TypeRef {
                    api_version: "example.org/v1".to_string(),
                    kind: "XR1".to_string(),
                },
                mode: Some(MODE_PIPELINE.to_string()),
                pipeline: vec![PipelineStep {
                    step: "compose".to_string(),
                    function_ref: FunctionRef {
                        name: "function-compose".to_string(),
                    },
                    input: None,
                }],
            },
        }
    }

    fn function() -> Function {
        Function {
            name: "function-compose".to_string(),
        }
    }

    fn xr(name: &str) -> DynamicObject {
        serde_json::from_value(json!({
            "apiVersion": "example.org/v1",
            "kind": "XR1",
            "metadata": {"name": name},
            "spec": {"size": 3},
        }))
        .unwrap()
    }

    fn composed(name: &str, field: &str) -> DynamicObject {
        serde_json::from_value(json!({
            "apiVersion": "example.org/v1",
            "kind": "Composed",
            "metadata": {
                "name": name,
                "namespace": "default",
                "labels": {"crossplane.io/composite": "my-xr"},
                "annotations": {"crossplane.io/composition-resource-name": name},
            },
            "spec": {"field": field},
        }))
        .unwrap()
    }

    fn renderer(composed_resources: Vec<DynamicObject>) -> Arc<StaticRenderer> {
        Arc::new(StaticRenderer {
            outputs: RenderOutputs {
                composite_resource: xr("placeholder"),
                composed_resources,
                requirements: vec![],
            },
        })
    }

    fn processor(client: Arc<MockClusterClient>, renderer: Arc<StaticRenderer>) -> DiffProcessor {
        let options = DiffOptions {
            use_colors: false,
            ..DiffOptions::default()
        };
        DiffProcessor::new(client, renderer, "default", options)
    }

    #[tokio::test]
    async fn test_new_xr_prints_added_diffs() {
        let client = Arc::new(
            MockClusterClient::new()
                .with_compositions(vec![composition()])
                .with_functions(vec![function()]),
        );
        let proc = processor(client, renderer(vec![composed("resource-a", "value")]));
        proc.initialize().await.unwrap();

        let mut out = Vec::new();
        proc.process_resource(&mut out, &xr("my-xr")).await.unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("+++ XR1/my-xr\n"), "{text}");
        assert!(text.contains("+++ Composed/resource-a\n"), "{text}");
        // The XR's diff precedes its children's, separated by ---.
        let xr_pos = text.find("+++ XR1/my-xr").unwrap();
        let child_pos = text.find("+++ Composed/resource-a").unwrap();
        assert!(xr_pos < child_pos);
        assert_eq!(text.matches("\n---\n").count(), 2);
    }

    #[tokio::test]
    async fn test_modified_composed_resource() {
        let live = composed("resource-a", "old-value");
        let client = Arc::new(
            MockClusterClient::new()
                .with_compositions(vec![composition()])
                .with_functions(vec![function()])
                .with_resources(vec![live]),
        );
        let proc = processor(client, renderer(vec![composed("resource-a", "new-value")]));
        proc.initialize().await.unwrap();

        let mut out = Vec::new();
        proc.process_resource(&mut out, &xr("my-xr")).await.unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("~~~ Composed/resource-a\n"), "{text}");
        assert!(text.contains("- ") && text.contains("field: old-value"));
        assert!(text.contains("+ ") && text.contains("field: new-value"));
    }

    #[tokio::test]
    async fn test_removed_descendant_is_reported() {
        let live_kept = composed("resource-a", "value");
        let live_removed = composed("resource-b", "value");
        let live_xr: DynamicObject = serde_json::from_value(json!({
            "apiVersion": "example.org/v1",
            "kind": "XR1",
            "metadata": {"name": "my-xr", "namespace": "default"},
            "spec": {
                "size": 3,
                "resourceRefs": [
                    {"apiVersion": "example.org/v1", "kind": "Composed", "name": "resource-a"},
                    {"apiVersion": "example.org/v1", "kind": "Composed", "name": "resource-b"},
                ],
            },
        }))
        .unwrap();

        let client = Arc::new(
            MockClusterClient::new()
                .with_compositions(vec![composition()])
                .with_functions(vec![function()])
                .with_resources(vec![live_xr, live_kept, live_removed]),
        );
        let proc = processor(client, renderer(vec![composed("resource-a", "value")]));
        proc.initialize().await.unwrap();

        let mut out = Vec::new();
        proc.process_resource(&mut out, &xr("my-xr")).await.unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("--- Composed/resource-b\n"), "{text}");
        assert!(!text.contains("--- Composed/resource-a"));
    }

    #[tokio::test]
    async fn test_unmatched_xr_fails_with_composition_error() {
        let client = Arc::new(MockClusterClient::new());
        let proc = processor(client, renderer(vec![]));
        proc.initialize().await.unwrap();

        let mut out = Vec::new();
        let err = proc.process_resource(&mut out, &xr("my-xr")).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "cannot find matching composition: no composition found for example.org/v1, Kind=XR1"
        );
    }

    #[tokio::test]
    async fn test_process_all_aggregates_failures() {
        let client = Arc::new(MockClusterClient::new());
        let proc = processor(client, renderer(vec![]));
        proc.initialize().await.unwrap();

        let mut out = Vec::new();
        let err = proc
            .process_all(&mut out, &[xr("first-xr"), xr("second-xr")])
            .await
            .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("unable to process resource first-xr"), "{message}");
        assert!(message.contains("unable to process resource second-xr"), "{message}");
    }

    #[tokio::test]
    async fn test_input_xr_merged_over_rendered_composite() {
        // The live XR differs from the input; the diff must show the input's
        // value winning over what is currently on the server.
        let live_xr: DynamicObject = serde_json::from_value(json!({
            "apiVersion": "example.org/v1",
            "kind": "XR1",
            "metadata": {"name": "my-xr", "namespace": "default"},
            "spec": {"size": 1},
        }))
        .unwrap();
        let client = Arc::new(
            MockClusterClient::new()
                .with_compositions(vec![composition()])
                .with_functions(vec![function()])
                .with_resources(vec![live_xr]),
        );
        let proc = processor(client, renderer(vec![]));
        proc.initialize().await.unwrap();

        let mut out = Vec::new();
        proc.process_resource(&mut out, &xr("my-xr")).await.unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("- size: 1"), "{text}");
        assert!(text.contains("+ size: 3"), "{text}");
    }
}
