//! Whole-run behaviour: fetch, stage, compute, render, and delta reruns.

mod common;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use common::{surface_container, wind_only_container, Reply, ScriptedTransport};
use derived::FunctionLibrary;
use extraction::{Grib2Backend, RawExtractor};
use field_config::FieldRegistry;
use processor::{
    BuiltinStyles, FieldPipeline, ModelConfig, OutputLayout, PngRenderer, RunOptions,
    RunOrchestrator, SourceFetcher, StagingLayout, StepOutcome,
};
use serde_json::Value;
use tempfile::TempDir;
use test_utils::{assert_approx_eq, temp_config_dir};
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;
use wx_common::RunKey;

const ALL_FIELDS: [&str; 5] = ["t2m", "u10", "v10", "wind_speed_10m", "wind_barbs_10m"];

struct Harness {
    config: TempDir,
    work: TempDir,
    transport: Arc<ScriptedTransport>,
}

impl Harness {
    fn new(rules: Vec<(&'static str, Reply)>) -> Self {
        Self {
            config: temp_config_dir().unwrap(),
            work: TempDir::new().unwrap(),
            transport: Arc::new(ScriptedTransport::new(rules)),
        }
    }

    fn outputs(&self) -> PathBuf {
        self.work.path().join("outputs")
    }

    fn orchestrator(&self) -> RunOrchestrator {
        let model = Arc::new(ModelConfig::load(&self.config.path().join("models/hrrr.yaml")).unwrap());
        let registry = Arc::new(
            FieldRegistry::from_dir(self.config.path().join("fields"))
                .unwrap()
                .with_known_functions(FunctionLibrary::builtin().names()),
        );
        let pipeline = FieldPipeline::new(
            registry,
            RawExtractor::new(Arc::new(Grib2Backend::default())),
            Arc::new(PngRenderer::new(Arc::new(BuiltinStyles::default()))),
            OutputLayout::new(self.outputs()),
            model.processing.category_file_types.clone(),
        );
        let fetcher = SourceFetcher::new(self.transport.clone(), model.clone());
        RunOrchestrator::new(
            model,
            fetcher,
            pipeline,
            StagingLayout::new(self.work.path().join("grib_files")),
        )
        .with_compute_workers(2)
    }
}

fn run() -> RunKey {
    RunKey::parse("hrrr", "2025121012").unwrap()
}

fn options(fields: &[&str]) -> RunOptions {
    RunOptions {
        fields: fields.iter().map(|f| f.to_string()).collect(),
        prefetch: 1,
        ..RunOptions::default()
    }
}

fn sidecar(dir: &Path, field: &str, fhr: u32) -> Value {
    let path = dir.join(format!("{}_f{:02}.json", field, fhr));
    serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
}

#[tokio::test]
async fn test_run_renders_every_field() {
    let harness = Harness::new(vec![("mirror-a", Reply::Serve(surface_container()))]);

    let summary = harness
        .orchestrator()
        .run(&run(), &[0, 1], &options(&ALL_FIELDS))
        .await;

    assert_eq!(summary.done(), 2);
    assert_eq!(summary.fields_produced(), 10);
    assert!(summary.is_success());
    // Two steps, two file categories each.
    assert_eq!(harness.transport.downloads().len(), 4);

    let step_dir = harness.outputs().join("hrrr/20251210/12z/F01");
    for field in ALL_FIELDS {
        assert!(step_dir.join(format!("{}_f01.png", field)).is_file(), "{}", field);
    }

    let t2m = sidecar(&step_dir, "t2m", 1);
    assert_approx_eq!(t2m["max"].as_f64().unwrap(), 15.0, 1e-3);

    let speed = sidecar(&step_dir, "wind_speed_10m", 1);
    assert_approx_eq!(speed["max"].as_f64().unwrap(), 5.0, 1e-5);
    assert_eq!(speed["derived"], true);

    let barbs = sidecar(&step_dir, "wind_barbs_10m", 1);
    assert_eq!(barbs["plot_style"], "lines_with_barbs");
    assert_eq!(
        barbs["composite_inputs"],
        serde_json::json!(["wind_speed_10m", "u10", "v10"])
    );
}

#[tokio::test]
async fn test_second_run_makes_no_fetches() {
    let harness = Harness::new(vec![("mirror-a", Reply::Serve(surface_container()))]);
    let fields = options(&ALL_FIELDS);

    harness.orchestrator().run(&run(), &[0, 1, 2], &fields).await;
    let calls = harness.transport.calls();

    let summary = harness.orchestrator().run(&run(), &[0, 1, 2], &fields).await;
    assert_eq!(summary.skipped(), 3);
    assert_eq!(summary.fields_produced(), 0);
    assert!(summary.is_success());
    assert_eq!(harness.transport.calls(), calls);
}

#[tokio::test]
async fn test_rerun_computes_only_missing_fields() {
    let harness = Harness::new(vec![("mirror-a", Reply::Serve(surface_container()))]);
    let fields = options(&ALL_FIELDS);
    harness.orchestrator().run(&run(), &[0], &fields).await;
    let calls = harness.transport.calls();

    let step_dir = harness.outputs().join("hrrr/20251210/12z/F00");
    std::fs::remove_file(step_dir.join("u10_f00.png")).unwrap();

    let summary = harness.orchestrator().run(&run(), &[0], &fields).await;
    let report = summary.steps[0].report.as_ref().unwrap();
    assert_eq!(report.produced, vec!["u10"]);
    // Central containers are reused.
    assert_eq!(harness.transport.calls(), calls);
}

#[tokio::test]
async fn test_missing_input_skips_field_only() {
    let harness = Harness::new(vec![("mirror-a", Reply::Serve(wind_only_container()))]);

    let summary = harness
        .orchestrator()
        .run(&run(), &[0], &options(&["t2m", "wind_speed_10m"]))
        .await;

    assert_eq!(
        summary.steps[0].outcome,
        StepOutcome::Done {
            produced: 1,
            missing: 1,
            failed: 0
        }
    );
    let step_dir = harness.outputs().join("hrrr/20251210/12z/F00");
    assert!(!step_dir.join("t2m_f00.png").exists());
    assert!(!step_dir.join("t2m_f00.json").exists());
    assert!(step_dir.join("wind_speed_10m_f00.png").exists());
}

#[tokio::test]
async fn test_fetch_failure_fails_step() {
    let harness = Harness::new(Vec::new());

    let summary = harness
        .orchestrator()
        .run(&run(), &[0, 1], &options(&ALL_FIELDS))
        .await;

    assert_eq!(summary.failed(), 2);
    assert!(!summary.is_success());
    // Both file categories of both steps try both mirrors.
    assert_eq!(harness.transport.downloads().len(), 8);
    assert!(!harness.outputs().join("hrrr/20251210/12z/F00").exists());
}

#[tokio::test]
async fn test_compute_only_without_staged_files() {
    let harness = Harness::new(vec![("mirror-a", Reply::Serve(surface_container()))]);
    let options = RunOptions {
        compute_only: true,
        ..options(&ALL_FIELDS)
    };

    let summary = harness.orchestrator().run(&run(), &[0], &options).await;

    assert_eq!(
        summary.steps[0].outcome,
        StepOutcome::Failed("no staged containers".to_string())
    );
    assert_eq!(harness.transport.calls(), 0);
}

#[tokio::test]
async fn test_force_recomputes_from_staged_files() {
    let harness = Harness::new(vec![("mirror-a", Reply::Serve(surface_container()))]);
    harness.orchestrator().run(&run(), &[0], &options(&ALL_FIELDS)).await;
    let calls = harness.transport.calls();

    let options = RunOptions {
        force: true,
        compute_only: true,
        ..options(&ALL_FIELDS)
    };
    let summary = harness.orchestrator().run(&run(), &[0], &options).await;

    assert_eq!(summary.fields_produced(), 5);
    assert_eq!(harness.transport.calls(), calls);
}

#[tokio::test]
async fn test_prefetch_window_bounds_steps_in_flight() {
    for prefetch in [0usize, 1] {
        let harness = Harness::new(vec![(
            "mirror-a",
            Reply::Slow(surface_container(), Duration::from_millis(50)),
        )]);
        let options = RunOptions {
            prefetch,
            ..options(&["t2m"])
        };

        let summary = harness
            .orchestrator()
            .with_fetch_workers(8)
            .run(&run(), &[0, 1, 2, 3, 4], &options)
            .await;

        assert_eq!(summary.done(), 5);
        // Two containers per step, `prefetch + 1` steps at a time.
        let peak = harness.transport.peak_in_flight();
        assert!(peak <= 2 * (prefetch + 1), "prefetch {prefetch}: peak {peak}");
        assert!(peak >= 2, "prefetch {prefetch}: peak {peak}");
        if prefetch > 0 {
            assert!(peak > 2, "steps did not overlap: peak {peak}");
        }
    }
}

#[tokio::test]
async fn test_later_step_may_finish_first() {
    let harness = Harness::new(vec![
        (
            "f00.grib2",
            Reply::Slow(surface_container(), Duration::from_millis(400)),
        ),
        ("mirror-a", Reply::Serve(surface_container())),
    ]);

    let summary = harness
        .orchestrator()
        .with_fetch_workers(4)
        .run(&run(), &[0, 1], &options(&ALL_FIELDS))
        .await;

    let hours: Vec<u32> = summary.steps.iter().map(|s| s.step.forecast_hour).collect();
    assert_eq!(hours, vec![0, 1]);
    for step in &summary.steps {
        assert_eq!(
            step.outcome,
            StepOutcome::Done {
                produced: 5,
                missing: 0,
                failed: 0
            }
        );
    }

    let day = harness.outputs().join("hrrr/20251210/12z");
    let modified = |fhr: u32| {
        std::fs::metadata(day.join(format!("F{:02}/t2m_f{:02}.png", fhr, fhr)))
            .and_then(|m| m.modified())
            .unwrap()
    };
    assert!(modified(1) < modified(0));

    for fhr in [0, 1] {
        let t2m = sidecar(&day.join(format!("F{:02}", fhr)), "t2m", fhr);
        assert_eq!(t2m["forecast_hour"], fhr);
    }
}

#[tokio::test]
async fn test_cancellation_leaves_no_final_files() {
    let harness = Harness::new(vec![("mirror-a", Reply::Hang)]);
    let cancel = CancellationToken::new();
    let orchestrator = harness.orchestrator().with_cancellation(cancel.clone());

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let options = RunOptions {
        prefetch: 0,
        ..options(&ALL_FIELDS)
    };
    let summary = orchestrator.run(&run(), &[0, 1, 2], &options).await;

    assert_eq!(summary.failed(), 3);
    assert!(!summary.is_success());
    for step in &summary.steps[1..] {
        assert_eq!(step.outcome, StepOutcome::Failed("cancelled".to_string()));
    }
    // Only the first step's two containers were started.
    assert_eq!(harness.transport.downloads().len(), 2);

    let files: Vec<PathBuf> = WalkDir::new(harness.work.path())
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect();
    assert_eq!(files.len(), 2);
    for file in &files {
        let name = file.file_name().unwrap().to_string_lossy();
        assert!(
            name.ends_with(".partial") || name.starts_with('.'),
            "{}",
            file.display()
        );
    }
}
