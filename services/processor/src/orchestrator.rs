//! Drives one model run through fetch, staging and compute.
//!
//! Each step moves through
//! `Unstarted -> Skipped | Fetching -> Staged -> Computing -> Done | Failed`.
//! Fetching runs ahead of compute by a small window; a staged step spawns
//! its compute task at once, so downloads and rendering overlap.

use std::path::PathBuf;
use std::sync::Arc;

use derived::ContainerSet;
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use wx_common::{RunKey, StepKey};

use crate::compute::{FieldPipeline, StepReport};
use crate::config::ModelConfig;
use crate::fetch::SourceFetcher;
use crate::layout::StagingLayout;

const DEFAULT_FETCH_WORKERS: usize = 2;

/// Per-run knobs.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Fields to produce for every step.
    pub fields: Vec<String>,
    /// Recompute fields that already have artifacts.
    pub force: bool,
    /// Use already staged containers, never fetch.
    pub compute_only: bool,
    /// Steps fetched ahead of the one being staged.
    pub prefetch: usize,
}

/// Final state of one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Done {
        produced: usize,
        missing: usize,
        failed: usize,
    },
    /// Every requested field already had an artifact.
    Skipped,
    /// Fetching or staging failed.
    Failed(String),
}

impl StepOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepOutcome::Done { .. } => "done",
            StepOutcome::Skipped => "skipped",
            StepOutcome::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct StepResult {
    pub step: StepKey,
    pub outcome: StepOutcome,
    pub report: Option<StepReport>,
}

/// Results of a whole run, in forecast-hour order.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run: RunKey,
    pub steps: Vec<StepResult>,
}

impl RunSummary {
    fn count(&self, outcome: &str) -> usize {
        self.steps
            .iter()
            .filter(|s| s.outcome.as_str() == outcome)
            .count()
    }

    pub fn done(&self) -> usize {
        self.count("done")
    }

    pub fn skipped(&self) -> usize {
        self.count("skipped")
    }

    pub fn failed(&self) -> usize {
        self.count("failed")
    }

    pub fn fields_produced(&self) -> usize {
        self.steps
            .iter()
            .map(|s| match s.outcome {
                StepOutcome::Done { produced, .. } => produced,
                _ => 0,
            })
            .sum()
    }

    /// False only when nothing was produced and nothing was already there.
    pub fn is_success(&self) -> bool {
        self.fields_produced() > 0 || self.skipped() > 0
    }
}

/// What preparing a step yielded.
enum Prepared {
    Finished(StepResult),
    Staged {
        step: StepKey,
        fields: Vec<String>,
        containers: ContainerSet,
    },
}

/// Runs the fetch and compute pools for one model.
pub struct RunOrchestrator {
    model: Arc<ModelConfig>,
    fetcher: Arc<SourceFetcher>,
    pipeline: Arc<FieldPipeline>,
    staging: StagingLayout,
    fetch_pool: Arc<Semaphore>,
    compute_pool: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl RunOrchestrator {
    pub fn new(
        model: Arc<ModelConfig>,
        fetcher: SourceFetcher,
        pipeline: FieldPipeline,
        staging: StagingLayout,
    ) -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);
        Self {
            model,
            fetcher: Arc::new(fetcher),
            pipeline: Arc::new(pipeline),
            staging,
            fetch_pool: Arc::new(Semaphore::new(DEFAULT_FETCH_WORKERS)),
            compute_pool: Arc::new(Semaphore::new(cpus)),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_fetch_workers(mut self, n: usize) -> Self {
        self.fetch_pool = Arc::new(Semaphore::new(n.max(1)));
        self
    }

    pub fn with_compute_workers(mut self, n: usize) -> Self {
        self.compute_pool = Arc::new(Semaphore::new(n.max(1)));
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn model(&self) -> &ModelConfig {
        &self.model
    }

    /// Process `hours` of `run`. Step failures are recorded, never raised.
    #[instrument(skip(self, hours, options), fields(run = %run, steps = hours.len()))]
    pub async fn run(&self, run: &RunKey, hours: &[u32], options: &RunOptions) -> RunSummary {
        let mut results: Vec<StepResult> = Vec::with_capacity(hours.len());
        let mut computing: Vec<(StepKey, JoinHandle<Option<StepReport>>)> = Vec::new();

        let mut prepared = stream::iter(hours.iter().copied())
            .map(|fhr| self.prepare(run.step(fhr), options))
            .buffer_unordered(options.prefetch + 1);

        while let Some(prepared_step) = prepared.next().await {
            match prepared_step {
                Prepared::Finished(result) => results.push(result),
                Prepared::Staged {
                    step,
                    fields,
                    containers,
                } => {
                    let pipeline = self.pipeline.clone();
                    let pool = self.compute_pool.clone();
                    let task_step = step.clone();
                    let handle = tokio::spawn(async move {
                        let _permit = pool.acquire_owned().await.ok()?;
                        Some(pipeline.process_step(&task_step, &fields, &containers).await)
                    });
                    computing.push((step, handle));
                }
            }
        }
        drop(prepared);

        for (step, handle) in computing {
            let result = match handle.await {
                Ok(Some(report)) => StepResult {
                    outcome: StepOutcome::Done {
                        produced: report.produced.len(),
                        missing: report.missing.len(),
                        failed: report.failed.len(),
                    },
                    step,
                    report: Some(report),
                },
                Ok(None) => failed(step, "compute pool closed".to_string()),
                Err(e) => {
                    error!(step = %step, error = %e, "Compute task panicked");
                    failed(step, format!("compute task: {}", e))
                }
            };
            results.push(result);
        }

        results.sort_by_key(|r| r.step.forecast_hour);
        for result in &results {
            metrics::counter!("step_outcomes_total", "outcome" => result.outcome.as_str())
                .increment(1);
        }

        let summary = RunSummary {
            run: run.clone(),
            steps: results,
        };
        info!(
            done = summary.done(),
            skipped = summary.skipped(),
            failed = summary.failed(),
            produced = summary.fields_produced(),
            "Run finished"
        );
        summary
    }

    /// Completeness check, then fetch and stage.
    async fn prepare(&self, step: StepKey, options: &RunOptions) -> Prepared {
        let fields = if options.force {
            options.fields.clone()
        } else {
            self.pipeline
                .outputs()
                .missing_fields(&step, &options.fields)
        };
        if fields.is_empty() {
            info!(step = %step, "All artifacts present, skipping");
            return Prepared::Finished(StepResult {
                step,
                outcome: StepOutcome::Skipped,
                report: None,
            });
        }
        if self.cancel.is_cancelled() {
            return Prepared::Finished(failed(step, "cancelled".to_string()));
        }

        let staged = if options.compute_only {
            self.already_staged(&step)
        } else {
            self.fetch_and_stage(&step).await
        };

        match staged {
            Ok(staged) => {
                let mut containers = ContainerSet::new(self.model.processing.primary_file_type.clone());
                for (category, path) in staged {
                    containers.insert(category, path);
                }
                info!(step = %step, fields = fields.len(), "Step staged");
                Prepared::Staged {
                    step,
                    fields,
                    containers,
                }
            }
            Err(reason) => {
                warn!(step = %step, reason = %reason, "Step failed before compute");
                Prepared::Finished(failed(step, reason))
            }
        }
    }

    fn already_staged(&self, step: &StepKey) -> Result<Vec<(String, PathBuf)>, String> {
        let names: Vec<(String, String)> = self
            .model
            .file_categories()
            .into_iter()
            .filter_map(|category| {
                let name = self.model.filename(step, &category)?;
                Some((category, name))
            })
            .collect();
        let staged = self.staging.staged(step, &names);
        if staged.is_empty() {
            return Err("no staged containers".to_string());
        }
        Ok(staged)
    }

    async fn fetch_and_stage(&self, step: &StepKey) -> Result<Vec<(String, PathBuf)>, String> {
        let fetches = self.model.file_categories().into_iter().map(|category| async move {
            let _permit = self
                .fetch_pool
                .acquire()
                .await
                .map_err(|e| format!("fetch pool closed: {}", e))?;
            let dest_dir = self.staging.central_dir(&step.run, &category);
            self.fetcher
                .fetch(step, &category, &dest_dir, &self.cancel)
                .await
                .map(|fetched| (category, fetched.path))
                .map_err(|failure| failure.to_string())
        });

        let sources = join_all(fetches)
            .await
            .into_iter()
            .collect::<Result<Vec<_>, String>>()?;

        let staging = self.staging.clone();
        let task_step = step.clone();
        tokio::task::spawn_blocking(move || staging.stage(&task_step, &sources))
            .await
            .map_err(|e| format!("staging task: {}", e))?
            .map_err(|e| format!("staging: {}", e))
    }
}

fn failed(step: StepKey, reason: String) -> StepResult {
    StepResult {
        step,
        outcome: StepOutcome::Failed(reason),
        report: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(fhr: u32, outcome: StepOutcome) -> StepResult {
        StepResult {
            step: RunKey::parse("hrrr", "2025121012").unwrap().step(fhr),
            outcome,
            report: None,
        }
    }

    #[test]
    fn test_summary_counts() {
        let summary = RunSummary {
            run: RunKey::parse("hrrr", "2025121012").unwrap(),
            steps: vec![
                result(0, StepOutcome::Done { produced: 3, missing: 1, failed: 0 }),
                result(1, StepOutcome::Skipped),
                result(2, StepOutcome::Failed("404".to_string())),
            ],
        };
        assert_eq!(summary.done(), 1);
        assert_eq!(summary.skipped(), 1);
        assert_eq!(summary.failed(), 1);
        assert_eq!(summary.fields_produced(), 3);
        assert!(summary.is_success());
    }

    #[test]
    fn test_summary_without_output_is_not_success() {
        let summary = RunSummary {
            run: RunKey::parse("hrrr", "2025121012").unwrap(),
            steps: vec![result(0, StepOutcome::Failed("404".to_string()))],
        };
        assert!(!summary.is_success());
    }

    #[test]
    fn test_summary_with_existing_output_is_success() {
        let summary = RunSummary {
            run: RunKey::parse("hrrr", "2025121012").unwrap(),
            steps: vec![
                result(0, StepOutcome::Skipped),
                result(1, StepOutcome::Skipped),
                result(2, StepOutcome::Failed("404".to_string())),
            ],
        };
        assert_eq!(summary.fields_produced(), 0);
        assert!(summary.is_success());
    }
}
