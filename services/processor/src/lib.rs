//! Model run processor.
//!
//! Fetches the GRIB2 containers of a model run from ordered mirrors, stages
//! them per forecast step, then extracts, derives and renders every
//! configured field. Steps whose artifacts already exist are skipped.

pub mod availability;
pub mod compute;
pub mod config;
pub mod fetch;
pub mod layout;
pub mod orchestrator;
pub mod render;

pub use compute::{resolve_request, FieldOutcome, FieldPipeline, StepReport};
pub use config::{load_model_configs, parse_hours, ModelConfig};
pub use fetch::{FetchFailure, Fetched, HttpTransport, MirrorFailure, SourceFetcher, Transport};
pub use layout::{OutputLayout, StagingLayout};
pub use orchestrator::{RunOptions, RunOrchestrator, RunSummary, StepOutcome, StepResult};
pub use render::{BuiltinStyles, PngRenderer, RenderRequest, RenderedArtifact, Renderer, StyleProvider};
