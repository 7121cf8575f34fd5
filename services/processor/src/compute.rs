//! Per-step field computation: registry, then engine or extractor, then
//! renderer.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use derived::{ContainerSet, DerivedEngine, DerivedError};
use extraction::RawExtractor;
use field_config::{FieldRegistry, ResolvedFieldConfig};
use futures::stream::{self, StreamExt};
use tracing::{debug, info, instrument, warn};
use wx_common::{Grid, StepKey};

use crate::layout::OutputLayout;
use crate::render::{RenderRequest, Renderer};

/// Fields computed at once within one step.
const DEFAULT_FIELD_CONCURRENCY: usize = 4;

/// What happened to one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldOutcome {
    Produced,
    /// An input is absent from this step's containers.
    Missing(String),
    /// Broken configuration, decode error or render error.
    Failed(String),
}

/// Per-field results of one step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepReport {
    pub produced: Vec<String>,
    pub missing: Vec<(String, String)>,
    pub failed: Vec<(String, String)>,
}

impl StepReport {
    fn record(&mut self, field: String, outcome: FieldOutcome) {
        match outcome {
            FieldOutcome::Produced => self.produced.push(field),
            FieldOutcome::Missing(reason) => self.missing.push((field, reason)),
            FieldOutcome::Failed(reason) => self.failed.push((field, reason)),
        }
    }
}

/// Named fields plus every field of the named categories, without
/// duplicates. An empty request selects every registered field.
pub fn resolve_request(
    registry: &FieldRegistry,
    fields: &[String],
    categories: &[String],
) -> field_config::Result<Vec<String>> {
    if fields.is_empty() && categories.is_empty() {
        return registry.field_names();
    }

    let mut seen = BTreeSet::new();
    let mut selected = Vec::new();
    for name in fields {
        if !registry.contains(name)? {
            warn!(field = %name, "Requested field is not configured");
            continue;
        }
        if seen.insert(name.clone()) {
            selected.push(name.clone());
        }
    }
    for category in categories {
        let names = registry.by_category(category)?;
        if names.is_empty() {
            warn!(category = %category, "Requested category has no fields");
        }
        for name in names {
            if seen.insert(name.clone()) {
                selected.push(name);
            }
        }
    }
    Ok(selected)
}

/// Turns staged containers into rendered artifacts.
pub struct FieldPipeline {
    registry: Arc<FieldRegistry>,
    engine: DerivedEngine,
    renderer: Arc<dyn Renderer>,
    outputs: OutputLayout,
    field_concurrency: usize,
}

impl FieldPipeline {
    pub fn new(
        registry: Arc<FieldRegistry>,
        extractor: RawExtractor,
        renderer: Arc<dyn Renderer>,
        outputs: OutputLayout,
        category_file_types: BTreeMap<String, String>,
    ) -> Self {
        let engine = DerivedEngine::new(registry.clone(), Arc::new(extractor))
            .with_category_file_types(category_file_types);
        Self {
            registry,
            engine,
            renderer,
            outputs,
            field_concurrency: DEFAULT_FIELD_CONCURRENCY,
        }
    }

    pub fn with_field_concurrency(mut self, n: usize) -> Self {
        self.field_concurrency = n.max(1);
        self
    }

    pub fn registry(&self) -> &Arc<FieldRegistry> {
        &self.registry
    }

    pub fn outputs(&self) -> &OutputLayout {
        &self.outputs
    }

    /// Compute and render `fields` for one step. Field failures never stop
    /// their siblings.
    #[instrument(skip(self, fields, containers), fields(step = %step, count = fields.len()))]
    pub async fn process_step(
        &self,
        step: &StepKey,
        fields: &[String],
        containers: &ContainerSet,
    ) -> StepReport {
        let futures: Vec<_> = fields
            .iter()
            .map(|field| async move {
                let outcome = self.process_field(step, field, containers).await;
                (field.clone(), outcome)
            })
            .collect();
        let outcomes: Vec<(String, FieldOutcome)> = stream::iter(futures)
            .buffer_unordered(self.field_concurrency)
            .collect()
            .await;

        let mut report = StepReport::default();
        for (field, outcome) in outcomes {
            report.record(field, outcome);
        }
        info!(
            produced = report.produced.len(),
            missing = report.missing.len(),
            failed = report.failed.len(),
            "Step computed"
        );
        report
    }

    /// Compute and render a single field.
    pub async fn process_field(
        &self,
        step: &StepKey,
        name: &str,
        containers: &ContainerSet,
    ) -> FieldOutcome {
        let config = match self.registry.get(name) {
            Ok(config) => config,
            Err(e) => {
                warn!(field = %name, error = %e, "Field configuration unavailable");
                return FieldOutcome::Failed(e.to_string());
            }
        };

        let grid = match self.load(name, &config, containers).await {
            Ok(grid) => grid,
            Err(outcome) => return outcome,
        };

        match self.render(step, grid, config).await {
            Ok(()) => {
                metrics::counter!("fields_rendered_total").increment(1);
                FieldOutcome::Produced
            }
            Err(e) => {
                warn!(field = %name, error = %e, "Render failed");
                FieldOutcome::Failed(format!("render: {:#}", e))
            }
        }
    }

    async fn load(
        &self,
        name: &str,
        config: &ResolvedFieldConfig,
        containers: &ContainerSet,
    ) -> Result<Grid, FieldOutcome> {
        if config.is_derived() {
            return self
                .engine
                .compute(name, config, containers)
                .await
                .map_err(|e| match e {
                    DerivedError::NotFound { reason, .. } => {
                        debug!(field = %name, reason = %reason, "Derived input missing");
                        FieldOutcome::Missing(reason)
                    }
                    e @ DerivedError::Configuration { .. } => {
                        warn!(field = %name, error = %e, "Derived field misconfigured");
                        FieldOutcome::Failed(e.to_string())
                    }
                });
        }

        let Some(loaded) = self.engine.load_raw(config, containers).await else {
            return Err(FieldOutcome::Missing("no container staged".to_string()));
        };
        loaded.map_err(|e| {
            if e.is_not_found() {
                debug!(field = %name, error = %e, "Raw field missing");
                FieldOutcome::Missing(e.to_string())
            } else {
                warn!(field = %name, error = %e, "Raw extraction failed");
                FieldOutcome::Failed(e.to_string())
            }
        })
    }

    async fn render(
        &self,
        step: &StepKey,
        grid: Grid,
        config: Arc<ResolvedFieldConfig>,
    ) -> anyhow::Result<()> {
        let renderer = self.renderer.clone();
        let step = step.clone();
        let output_dir = self.outputs.step_dir(&step);

        let artifact = tokio::task::spawn_blocking(move || {
            renderer.render(&RenderRequest {
                grid: &grid,
                config: &config,
                step: &step,
                output_dir: &output_dir,
            })
        })
        .await??;

        debug!(
            field = %artifact.field,
            path = %artifact.image.display(),
            bytes = artifact.bytes,
            "Artifact written"
        );
        Ok(())
    }
}
