//! Raw field extraction with fallback strategies.
//!
//! Strategies run in order until one yields the variable:
//!
//! 1. Direct keyed open, filtered by the access bag.
//! 2. The external utility, when the field carries an extraction hint.
//! 3. Exhaustive search over every sub-dataset of the container.
//!
//! Each strategy runs on the blocking pool under its own timeout. A timed-out
//! strategy has its cancellation token tripped and the next one starts.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use field_config::{RawFieldConfig, ResolvedFieldConfig};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use wx_common::Grid;

use crate::backend::{AccessFilter, ContainerBackend};
use crate::dataset::{Variable, UNKNOWN_VARIABLE};
use crate::error::{ExtractionError, Result};
use crate::shaping::shape;
use crate::transform::apply_transform;
use crate::wgrib2::Wgrib2Runner;

/// Per-strategy time limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategyTimeouts {
    pub direct: Duration,
    pub utility: Duration,
    pub search: Duration,
}

impl Default for StrategyTimeouts {
    fn default() -> Self {
        Self {
            direct: Duration::from_secs(30),
            utility: Duration::from_secs(40),
            search: Duration::from_secs(60),
        }
    }
}

/// Loads raw fields from containers.
#[derive(Clone)]
pub struct RawExtractor {
    backend: Arc<dyn ContainerBackend>,
    utility: Option<Wgrib2Runner>,
    timeouts: StrategyTimeouts,
}

impl RawExtractor {
    pub fn new(backend: Arc<dyn ContainerBackend>) -> Self {
        Self {
            backend,
            utility: None,
            timeouts: StrategyTimeouts::default(),
        }
    }

    /// Enable the external-utility strategy.
    pub fn with_utility(mut self, runner: Wgrib2Runner) -> Self {
        self.utility = Some(runner);
        self
    }

    pub fn with_timeouts(mut self, timeouts: StrategyTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn backend(&self) -> &Arc<dyn ContainerBackend> {
        &self.backend
    }

    /// Load, shape and transform one raw field.
    #[instrument(skip(self, config), fields(field = %config.name))]
    pub async fn extract(&self, container: &Path, config: &ResolvedFieldConfig) -> Result<Grid> {
        let raw = config
            .as_raw()
            .ok_or_else(|| ExtractionError::NotRaw(config.name.clone()))?;

        let grid = self.load(container, &config.name, raw).await?;
        let grid = shape(grid, &config.name, raw)?;
        let mut grid = apply_transform(grid, config.transform);

        grid.name = config.name.clone();
        grid.set_attr("long_name", config.title.clone());
        grid.set_attr("units", config.units.clone());
        Ok(grid)
    }

    async fn load(&self, container: &Path, field: &str, raw: &RawFieldConfig) -> Result<Grid> {
        if !raw.requires_multi_dataset {
            match self.direct_open(container, raw).await {
                Ok(grid) => return Ok(grid),
                Err(e) => debug!(field = %field, error = %e, "Direct open failed"),
            }
        }

        if let (Some(hint), Some(runner)) = (&raw.extraction_hint, &self.utility) {
            match self.utility_extract(runner, container, hint, raw).await {
                Ok(grid) => {
                    info!(field = %field, pattern = %hint, "Extracted with external utility");
                    return Ok(grid);
                }
                Err(e) => debug!(field = %field, error = %e, "External utility failed"),
            }
        }

        match self.exhaustive_search(container, raw).await {
            Ok(grid) => Ok(grid),
            Err(e) => {
                if !e.is_not_found() {
                    warn!(field = %field, error = %e, "Exhaustive search failed");
                }
                Err(ExtractionError::NotFound {
                    field: field.to_string(),
                    var: raw.var.clone(),
                })
            }
        }
    }

    async fn direct_open(&self, container: &Path, raw: &RawFieldConfig) -> Result<Grid> {
        let backend = self.backend.clone();
        let path = container.to_path_buf();
        let filter = AccessFilter::from_access(&raw.access);
        let var = raw.var.clone();

        run_bounded("direct open", self.timeouts.direct, move |cancel| {
            let mut dataset = backend.open_filtered(&path, &filter, cancel)?;
            dataset
                .take_where(|v| v.name == var)
                .map(|v| v.grid)
                .ok_or_else(|| not_found(&var))
        })
        .await
    }

    async fn utility_extract(
        &self,
        runner: &Wgrib2Runner,
        container: &Path,
        pattern: &str,
        raw: &RawFieldConfig,
    ) -> Result<Grid> {
        let limit = self.timeouts.utility;
        let started = tokio::time::Instant::now();
        let subset = tokio::time::timeout(limit, runner.extract_matching(container, pattern))
            .await
            .map_err(|_| ExtractionError::Timeout {
                strategy: "external utility",
                seconds: limit.as_secs(),
            })??;

        let backend = self.backend.clone();
        let var = raw.var.clone();
        let remaining = limit.saturating_sub(started.elapsed());

        run_bounded("external utility", remaining, move |cancel| {
            let variables: Vec<Variable> = backend
                .open_all(subset.path(), cancel)?
                .into_iter()
                .flat_map(|d| d.variables)
                .collect();
            pick_variable(variables, &var)
                .map(|v| v.grid)
                .ok_or_else(|| not_found(&var))
        })
        .await
    }

    async fn exhaustive_search(&self, container: &Path, raw: &RawFieldConfig) -> Result<Grid> {
        let backend = self.backend.clone();
        let path = container.to_path_buf();
        let var = raw.var.clone();
        let aliases = raw.shortname_aliases.clone();

        run_bounded("exhaustive search", self.timeouts.search, move |cancel| {
            backend
                .search(&path, &var, &aliases, cancel)?
                .map(|v| v.grid)
                .ok_or_else(|| not_found(&var))
        })
        .await
    }
}

/// Run `f` on the blocking pool, bounded by `limit`.
async fn run_bounded<T, F>(strategy: &'static str, limit: Duration, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&CancellationToken) -> Result<T> + Send + 'static,
{
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let handle = tokio::task::spawn_blocking(move || f(&token));

    match tokio::time::timeout(limit, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(ExtractionError::Container(format!(
            "{} task failed: {}",
            strategy, e
        ))),
        Err(_) => {
            cancel.cancel();
            warn!(strategy = strategy, seconds = limit.as_secs(), "Strategy timed out");
            Err(ExtractionError::Timeout {
                strategy,
                seconds: limit.as_secs(),
            })
        }
    }
}

fn not_found(var: &str) -> ExtractionError {
    ExtractionError::NotFound {
        field: String::new(),
        var: var.to_string(),
    }
}

/// Pick from a utility subset: `var`, then lower-case `var`, then
/// `unknown`, then whatever comes first.
fn pick_variable(mut variables: Vec<Variable>, var: &str) -> Option<Variable> {
    let lower = var.to_lowercase();
    let index = variables
        .iter()
        .position(|v| v.name == var)
        .or_else(|| variables.iter().position(|v| v.name == lower))
        .or_else(|| variables.iter().position(|v| v.name == UNKNOWN_VARIABLE))
        .or(if variables.is_empty() { None } else { Some(0) })?;
    Some(variables.remove(index))
}
